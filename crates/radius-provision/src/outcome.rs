//! Result type for every provisioning side effect
//!
//! Directory writes and router driver calls never fail across the
//! coordinator boundary. They report a [`ProvisioningOutcome`] instead, so a
//! degraded network side effect can be recorded without unwinding the
//! billing transition that triggered it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a failed provisioning step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Directory (radcheck/radreply) write or read failed
    DirectoryWrite,
    /// Router driver reported a failure
    Driver,
    /// PPPoE credentials could not be generated or stored
    CredentialGeneration,
    /// Referenced service plan does not exist
    PlanNotFound,
    /// Billing database read failed
    Repository,
    /// Caller supplied an unusable value (empty username, missing router)
    InvalidInput,
    /// Background provisioning queue is no longer accepting tasks
    QueueClosed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DirectoryWrite => "directory_write",
            ErrorKind::Driver => "driver",
            ErrorKind::CredentialGeneration => "credential_generation",
            ErrorKind::PlanNotFound => "plan_not_found",
            ErrorKind::Repository => "repository",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::QueueClosed => "queue_closed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single provisioning, deprovisioning or sync call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningOutcome {
    pub success: bool,
    /// Human readable description of what happened (or what went wrong)
    pub transaction_detail: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl ProvisioningOutcome {
    pub fn ok(detail: impl Into<String>) -> Self {
        ProvisioningOutcome {
            success: true,
            transaction_detail: Some(detail.into()),
            error_kind: None,
        }
    }

    pub fn failed(kind: ErrorKind, detail: impl Into<String>) -> Self {
        ProvisioningOutcome {
            success: false,
            transaction_detail: Some(detail.into()),
            error_kind: Some(kind),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn detail(&self) -> &str {
        self.transaction_detail.as_deref().unwrap_or("")
    }
}

impl fmt::Display for ProvisioningOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.success, self.error_kind) {
            (true, _) => write!(f, "ok: {}", self.detail()),
            (false, Some(kind)) => write!(f, "failed ({}): {}", kind, self.detail()),
            (false, None) => write!(f, "failed: {}", self.detail()),
        }
    }
}
