//! regharvest - resumable harvesting of drug-registration data.
//!
//! A tool for pulling structured registration records out of a regulatory
//! data portal's paginated search API, built around durable per-page
//! progress state so multi-hour runs survive crashes, blocks and restarts.

pub mod cli;
pub mod config;
pub mod harvest;
pub mod models;
pub mod output;
pub mod state;
