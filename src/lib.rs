//! suiterun - HTTP API test suite execution engine
//!
//! Runs ordered suites of HTTP test cases against an environment, with
//! variable substitution, authentication, assertions, chained extraction,
//! live logs and persisted reports.

pub mod cli;
pub mod commands;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod logging;
pub mod repository;
pub mod store;

#[cfg(test)]
mod test_support;

pub use commands::ExecutionService;
pub use error::{Error, Result};
