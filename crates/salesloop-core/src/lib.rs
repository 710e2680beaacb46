//! # Salesloop Core
//!
//! Shared foundation for the Salesloop background workers: runtime
//! configuration, the error taxonomy, domain types for automation jobs and
//! scheduled follow-up tasks, and the async contracts the orchestration
//! delegates to (grading, analysis, email drafting, mail delivery).

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::SalesloopConfig;
pub use error::{Result, SalesloopError};
