pub mod assertion;
pub mod auth;
pub mod cancel;
pub mod case_runner;
pub mod env;
pub mod extract;
pub mod http;
pub mod monitor;
pub mod orchestrator;
pub mod report;
