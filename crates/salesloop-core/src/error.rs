//! Error taxonomy shared across the Salesloop crates.
//!
//! Expected failures are always values, never panics. Collaborator failures
//! carry the stage or phase in which they occurred so callers can render a
//! useful message.

use thiserror::Error;

/// Convenience result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, SalesloopError>;

#[derive(Error, Debug)]
pub enum SalesloopError {
    /// Bad or missing input: schedule parameters, cron expressions, ids.
    #[error("validation: {0}")]
    Validation(String),

    /// State changed underneath the caller: an active job already exists,
    /// or a compare-and-swap claim lost to a concurrent caller.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown job or task id.
    #[error("not found: {0}")]
    NotFound(String),

    /// A grading/analysis/email/mail collaborator failed, tagged with the
    /// stage or task phase it failed in.
    #[error("{phase}: {message}")]
    External { phase: String, message: String },

    /// Neither a contact email nor an administrator fallback is available.
    #[error("no reachable recipient emails; add a contact email or configure an administrator email")]
    NoRecipients,

    #[error("store: {0}")]
    Store(String),

    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SalesloopError {
    /// Tag a collaborator failure with the stage/phase it happened in.
    pub fn external(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self::External {
            phase: phase.into(),
            message: message.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_no_recipients(&self) -> bool {
        matches!(self, Self::NoRecipients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_keeps_phase_in_message() {
        let err = SalesloopError::external("grading", "model unavailable");
        assert_eq!(err.to_string(), "grading: model unavailable");
    }

    #[test]
    fn classification_helpers() {
        assert!(SalesloopError::Conflict("busy".into()).is_conflict());
        assert!(SalesloopError::NoRecipients.is_no_recipients());
        assert!(!SalesloopError::Validation("x".into()).is_conflict());
    }
}
