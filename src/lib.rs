//! Polls with validated lifecycle commands, one-vote-per-voter integrity and
//! live result tallies, served over HTTP on top of PostgreSQL.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod poll;
pub mod ports;
pub mod results;
pub mod routes;
pub mod service;
pub mod store;
pub mod validation;
pub mod vote;

#[cfg(test)]
mod test_support;

pub use error::{ActionResult, Navigation, PollError};
pub use service::PollService;
