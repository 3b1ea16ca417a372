//! Unattended Twitch drops miner: picks the most valuable campaign, watches a
//! stream for it and claims rewards as they complete.

pub mod error;
pub mod models;
pub mod services;
pub mod utils;
