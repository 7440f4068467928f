pub mod audit;
pub mod client;
pub mod identity;
pub mod vote;
