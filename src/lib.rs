//! TRADR: supervised live trading loop for prop-firm challenge accounts.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod gateway;
pub mod signal;
pub mod risk;
pub mod engine;
pub mod storage;
