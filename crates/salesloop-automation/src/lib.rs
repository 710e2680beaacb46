//! Automation job engine.
//!
//! Each queued job walks one customer through the outreach pipeline:
//! grading, analysis, initial email, follow-up scheduling. Jobs are claimed
//! atomically from the shared store, so any number of pollers can drain the
//! same queue without double-processing.

mod engine;
mod poller;

pub use engine::AutomationEngine;
pub use poller::AutomationPoller;
