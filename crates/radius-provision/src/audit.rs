//! Activity log for provisioning events
//!
//! One JSON object per line: every lifecycle transition, provisioning
//! failure, credit note and probe. Operators reconcile degraded services
//! from this file.

use crate::outcome::ProvisioningOutcome;
use crate::service::{CustomerId, ServiceId};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ServiceActivated,
    ServiceSuspended,
    ServiceTerminated,
    PlanChanged,
    CredentialsChanged,
    PaymentApplied,
    /// A RADIUS or router step failed after the billing change committed
    ProvisioningFailed,
    /// A queued router task finished
    RouterTaskCompleted,
    CreditNoteIssued,
    DirectoryReconciled,
    RadiusProbe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unix epoch seconds
    pub timestamp: i64,
    /// ISO 8601 formatted timestamp
    pub timestamp_iso: String,
    pub event_type: AuditEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_id: Option<ServiceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<CustomerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Attempted operation, e.g. "radius.provision"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub version: String,
}

impl AuditEntry {
    pub fn new(event_type: AuditEventType) -> Self {
        let now = chrono::Utc::now();
        AuditEntry {
            timestamp: now.timestamp(),
            timestamp_iso: now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            event_type,
            service_id: None,
            customer_id: None,
            username: None,
            operation: None,
            details: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_service(mut self, service_id: ServiceId, customer_id: CustomerId) -> Self {
        self.service_id = Some(service_id);
        self.customer_id = Some(customer_id);
        self
    }

    pub fn with_customer(mut self, customer_id: CustomerId) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Entry for a failed provisioning step
    pub fn provisioning_failure(
        service_id: ServiceId,
        customer_id: CustomerId,
        operation: &str,
        outcome: &ProvisioningOutcome,
    ) -> Self {
        AuditEntry::new(AuditEventType::ProvisioningFailed)
            .with_service(service_id, customer_id)
            .with_operation(operation)
            .with_details(outcome.to_string())
    }
}

pub struct AuditLogger {
    file_path: Option<String>,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl AuditLogger {
    pub fn new(file_path: Option<String>) -> std::io::Result<Self> {
        let file = if let Some(ref path) = file_path {
            let f = OpenOptions::new().create(true).append(true).open(path)?;
            Some(Arc::new(Mutex::new(f)))
        } else {
            None
        };

        Ok(AuditLogger { file_path, file })
    }

    /// Logger that drops every entry
    pub fn disabled() -> Self {
        AuditLogger {
            file_path: None,
            file: None,
        }
    }

    pub async fn log(&self, entry: AuditEntry) {
        if let Some(ref file) = self.file {
            match serde_json::to_string(&entry) {
                Ok(json) => {
                    let mut f = file.lock().await;
                    if let Err(e) = writeln!(f, "{}", json) {
                        error!("Failed to write audit log: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize audit entry: {}", e);
                }
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    pub fn file_path(&self) -> Option<&str> {
        self.file_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::ErrorKind;
    use std::fs;
    use tempfile::NamedTempFile;

    #[test]
    fn test_audit_entry_creation() {
        let entry = AuditEntry::new(AuditEventType::ServiceActivated)
            .with_service(12, 4)
            .with_username("alice");

        assert_eq!(entry.service_id, Some(12));
        assert_eq!(entry.customer_id, Some(4));
        assert_eq!(entry.username.as_deref(), Some("alice"));
    }

    #[test]
    fn test_failure_entry_serialization() {
        let outcome = ProvisioningOutcome::failed(ErrorKind::Driver, "router 3 unreachable");
        let entry = AuditEntry::provisioning_failure(12, 4, "router.provision", &outcome);

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("provisioning_failed"));
        assert!(json.contains("router.provision"));
        assert!(json.contains("router 3 unreachable"));
        assert!(!json.contains("username"));
    }

    #[tokio::test]
    async fn test_audit_logger() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap().to_string();

        let logger = AuditLogger::new(Some(path.clone())).unwrap();
        assert!(logger.is_enabled());
        assert_eq!(logger.file_path(), Some(path.as_str()));

        logger
            .log(AuditEntry::new(AuditEventType::ServiceSuspended).with_service(1, 2))
            .await;
        logger
            .log(AuditEntry::new(AuditEventType::CreditNoteIssued).with_customer(2))
            .await;

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("service_suspended"));
    }

    #[test]
    fn test_audit_logger_disabled() {
        assert!(!AuditLogger::new(None).unwrap().is_enabled());
        assert!(!AuditLogger::disabled().is_enabled());
    }
}
