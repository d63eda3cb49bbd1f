//! Engine-level error taxonomy.
//!
//! Transfer-level failures live in [`crate::retry::TransferError`]; they are
//! retried locally and only reach job state as an [`ErrorKind`] plus message.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::job::{JobId, JobStatus};

/// Machine-readable error category carried by jobs, units and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    QuotaExceeded,
    StorageExceeded,
    TransientNetwork,
    PermanentSource,
    LocalStorage,
    InvalidTransition,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::StorageExceeded => "storage_exceeded",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::PermanentSource => "permanent_source",
            ErrorKind::LocalStorage => "local_storage",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "quota_exceeded" => ErrorKind::QuotaExceeded,
            "storage_exceeded" => ErrorKind::StorageExceeded,
            "transient_network" => ErrorKind::TransientNetwork,
            "permanent_source" => ErrorKind::PermanentSource,
            "local_storage" => ErrorKind::LocalStorage,
            "invalid_transition" => ErrorKind::InvalidTransition,
            "cancelled" => ErrorKind::Cancelled,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last error recorded on a job or unit: human-readable message plus kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Why the Quota Gate refused a submission. Never retried by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    QuotaExceeded,
    StorageExceeded,
}

impl RejectReason {
    pub fn kind(self) -> ErrorKind {
        match self {
            RejectReason::QuotaExceeded => ErrorKind::QuotaExceeded,
            RejectReason::StorageExceeded => ErrorKind::StorageExceeded,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::QuotaExceeded => write!(f, "download quota exceeded"),
            RejectReason::StorageExceeded => write!(f, "storage limit exceeded"),
        }
    }
}

/// Errors returned by job control operations on the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {job_id} is {status}; cannot {action}")]
    InvalidTransition {
        job_id: JobId,
        status: JobStatus,
        action: &'static str,
    },
    #[error("registry: {0:#}")]
    Registry(#[from] anyhow::Error),
    #[error("engine is shut down")]
    Shutdown,
}

impl EngineError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            EngineError::InvalidTransition { .. } => Some(ErrorKind::InvalidTransition),
            _ => None,
        }
    }
}

/// Errors returned by `Engine::submit_job`.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("rejected: {0}")]
    Rejected(RejectReason),
    #[error("course {0} has no items matching the selection")]
    NoItems(String),
    #[error("course catalog: {0:#}")]
    Catalog(anyhow::Error),
    #[error("account limits: {0:#}")]
    Limits(anyhow::Error),
    #[error("registry: {0:#}")]
    Registry(anyhow::Error),
    #[error("engine is shut down")]
    Shutdown,
}

impl SubmitError {
    /// Rejection reason if this was an admission refusal.
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            SubmitError::Rejected(r) => Some(*r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_string_roundtrip() {
        for kind in [
            ErrorKind::QuotaExceeded,
            ErrorKind::StorageExceeded,
            ErrorKind::TransientNetwork,
            ErrorKind::PermanentSource,
            ErrorKind::LocalStorage,
            ErrorKind::InvalidTransition,
            ErrorKind::Cancelled,
        ] {
            assert_eq!(ErrorKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::from_str("bogus"), None);
    }

    #[test]
    fn invalid_transition_message_names_state() {
        let e = EngineError::InvalidTransition {
            job_id: 7,
            status: JobStatus::Completed,
            action: "pause",
        };
        assert_eq!(e.to_string(), "job 7 is completed; cannot pause");
        assert_eq!(e.kind(), Some(ErrorKind::InvalidTransition));
    }
}
