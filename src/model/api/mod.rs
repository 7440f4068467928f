pub mod admin;
pub mod audit;
pub mod auth;
pub mod candidate;
pub mod recap;
pub mod settings;
pub mod vote;
pub mod voter;
