//! Follow-up scheduler.
//!
//! Computes when a follow-up email is due (fixed delay or cron), creates the
//! task row, and later executes it: draft, send, finalize, with a bounded
//! retry/backoff ladder on failure. The [`TaskRunner`] drives due tasks on a
//! timer.

mod cron;
mod runner;
mod scheduler;

pub use cron::CronSchedule;
pub use runner::TaskRunner;
pub use scheduler::FollowupScheduler;
