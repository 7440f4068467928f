pub mod admin;
pub mod audit;
pub mod ballot;
pub mod candidate;
pub mod candidate_totals;
pub mod settings;
pub mod voter;
