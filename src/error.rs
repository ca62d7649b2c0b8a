//! Error taxonomy and the normalized boundary envelope.
//!
//! Three families:
//! - `ConfigError`: malformed registration or compilation, surfaced at
//!   build time, never retried.
//! - `StepError`: anything a step can raise at run time (validation,
//!   guard violations, system-step failures, generic failures).
//! - `ErrorEnvelope`: the single typed envelope every error is
//!   normalized into before it crosses the kernel boundary. Callers map
//!   it to their own transport representation.

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::phase::Phase;

/// Malformed registration or compilation. Fatal at build time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate atom registration: {domain}:{subject}")]
    DuplicateAtom { domain: String, subject: String },

    #[error("unknown anchor: {0}")]
    UnknownAnchor(String),

    #[error("unsupported key type for field {field}: {ty}")]
    UnsupportedKeyType { field: String, ty: String },

    #[error("unknown entity: {0}")]
    UnknownEntity(String),
}

/// One field-level validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

impl FieldIssue {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        FieldIssue { field: field.to_string(), message: message.into() }
    }
}

/// Run-time failure raised by a step (atom, hook, or system step).
#[derive(Debug, Error)]
pub enum StepError {
    #[error("validation failed: {message}")]
    Validation { message: String, issues: Vec<FieldIssue> },

    /// Illegal storage write for the current phase.
    #[error("db.{op}() is not allowed during {phase} phase")]
    Guard { phase: Phase, op: &'static str },

    /// A required system capability failed (e.g. transaction begin).
    #[error("system step {label} failed: {source}")]
    System {
        label: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl StepError {
    pub fn validation(message: impl Into<String>, issues: Vec<FieldIssue>) -> Self {
        StepError::Validation { message: message.into(), issues }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        StepError::Failed(message.into())
    }

    /// Machine code for the envelope.
    pub fn code(&self) -> &'static str {
        match self {
            StepError::Validation { .. } => "validation_error",
            StepError::Guard { .. } => "guard_violation",
            StepError::System { .. } => "system_step_error",
            StepError::Failed(_) => "step_error",
            StepError::Internal(_) => "step_error",
        }
    }
}

/// The normalized envelope every error crossing the kernel boundary is
/// mapped into: machine code, human message, optional structured detail.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("{code}: {message}")]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl ErrorEnvelope {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        ErrorEnvelope { code: code.to_string(), message: message.into(), detail: None }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Normalize a step failure observed in `phase`.
    pub fn from_step(phase: Phase, err: &StepError) -> Self {
        let detail = match err {
            StepError::Validation { issues, .. } => Some(json!({
                "phase": phase.as_str(),
                "issues": issues,
            })),
            StepError::Guard { phase, op } => Some(json!({
                "phase": phase.as_str(),
                "op": op,
            })),
            _ => Some(json!({ "phase": phase.as_str() })),
        };
        ErrorEnvelope { code: err.code().to_string(), message: err.to_string(), detail }
    }

    pub fn cancelled() -> Self {
        ErrorEnvelope::new("cancelled", "operation cancelled by caller")
    }
}

impl From<ConfigError> for ErrorEnvelope {
    fn from(err: ConfigError) -> Self {
        ErrorEnvelope::new("config_error", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_error_codes() {
        assert_eq!(StepError::validation("bad", vec![]).code(), "validation_error");
        assert_eq!(StepError::Guard { phase: Phase::Handler, op: "commit" }.code(), "guard_violation");
        assert_eq!(
            StepError::System { label: "sys:txn:begin@START_TX".into(), source: anyhow::anyhow!("boom") }
                .code(),
            "system_step_error"
        );
        assert_eq!(StepError::failed("x").code(), "step_error");
    }

    #[test]
    fn guard_message_names_phase_and_op() {
        let err = StepError::Guard { phase: Phase::PreCommit, op: "flush" };
        assert_eq!(err.to_string(), "db.flush() is not allowed during PRE_COMMIT phase");
    }

    #[test]
    fn validation_detail_carries_field_issues() {
        let err = StepError::validation("bad payload", vec![FieldIssue::new("name", "required")]);
        let env = ErrorEnvelope::from_step(Phase::PreHandler, &err);
        assert_eq!(env.code, "validation_error");
        let detail = env.detail.unwrap();
        assert_eq!(detail["issues"][0]["field"], "name");
        assert_eq!(detail["phase"], "PRE_HANDLER");
    }

    #[test]
    fn config_error_normalizes() {
        let env: ErrorEnvelope =
            ConfigError::DuplicateAtom { domain: "wire".into(), subject: "dump".into() }.into();
        assert_eq!(env.code, "config_error");
        assert!(env.message.contains("wire:dump"));
    }
}
