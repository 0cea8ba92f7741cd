//! FreeRADIUS directory management
//!
//! Translates a service's credentials, speed and address into `radcheck` /
//! `radreply` rows. Every operation is idempotent and is applied as a single
//! atomic edit, so a failed write never leaves a half-provisioned user.
//!
//! Row model:
//!
//! | table    | attribute             | op   | meaning                          |
//! |----------|-----------------------|------|----------------------------------|
//! | radcheck | Cleartext-Password    | `:=` | credential                       |
//! | radcheck | Auth-Type             | `:=` | `Reject` while suspended         |
//! | radcheck | NAS-Identifier        | `==` | binds the login to one router    |
//! | radreply | Framed-IP-Address     | `:=` | static address                   |
//! | radreply | vendor speed attrs    | `:=` | see [`crate::vendor`]            |
//! | radreply | Service-Type, Framed-Protocol | `:=` | PPP session setup       |

mod memory;
mod postgres;

pub use memory::MemoryDirectoryStore;
pub use postgres::PgDirectoryStore;

use crate::outcome::{ErrorKind, ProvisioningOutcome};
use crate::service::{PlanCatalog, PlanId, ServicePlan};
use crate::vendor::{SpeedLimit, VendorProfile};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const CLEARTEXT_PASSWORD: &str = "Cleartext-Password";
pub const AUTH_TYPE: &str = "Auth-Type";
pub const AUTH_TYPE_REJECT: &str = "Reject";
pub const NAS_IDENTIFIER: &str = "NAS-Identifier";
pub const FRAMED_IP_ADDRESS: &str = "Framed-IP-Address";
pub const SERVICE_TYPE: &str = "Service-Type";
pub const FRAMED_PROTOCOL: &str = "Framed-Protocol";

pub const OP_SET: &str = ":=";
pub const OP_EQUAL: &str = "==";

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Database connection error: {0}")]
    Connection(String),
    #[error("Database query error: {0}")]
    Query(String),
}

impl From<sqlx::Error> for DirectoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DirectoryError::Connection(err.to_string())
            }
            other => DirectoryError::Query(other.to_string()),
        }
    }
}

/// One radcheck or radreply row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRow {
    pub attribute: String,
    pub op: String,
    pub value: String,
}

impl DirectoryRow {
    /// `attribute := value`
    pub fn set(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        DirectoryRow {
            attribute: attribute.into(),
            op: OP_SET.to_string(),
            value: value.into(),
        }
    }

    /// `attribute == value`
    pub fn matches(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        DirectoryRow {
            attribute: attribute.into(),
            op: OP_EQUAL.to_string(),
            value: value.into(),
        }
    }
}

/// All rows held for one username
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub check: Vec<DirectoryRow>,
    pub reply: Vec<DirectoryRow>,
}

impl DirectoryEntry {
    pub fn is_empty(&self) -> bool {
        self.check.is_empty() && self.reply.is_empty()
    }

    pub fn check_value(&self, attribute: &str) -> Option<&str> {
        find_value(&self.check, attribute)
    }

    pub fn reply_value(&self, attribute: &str) -> Option<&str> {
        find_value(&self.reply, attribute)
    }

    /// Apply an edit: drop every row whose attribute is removed or replaced,
    /// then append the replacement rows.
    pub fn apply(&mut self, edit: &RowEdit) {
        apply_rows(&mut self.check, &edit.remove_check, &edit.put_check);
        apply_rows(&mut self.reply, &edit.remove_reply, &edit.put_reply);
    }
}

fn find_value<'a>(rows: &'a [DirectoryRow], attribute: &str) -> Option<&'a str> {
    rows.iter()
        .find(|r| r.attribute == attribute)
        .map(|r| r.value.as_str())
}

fn apply_rows(rows: &mut Vec<DirectoryRow>, remove: &[String], put: &[DirectoryRow]) {
    rows.retain(|row| {
        !remove.iter().any(|name| *name == row.attribute)
            && !put.iter().any(|p| p.attribute == row.attribute)
    });
    rows.extend(put.iter().cloned());
}

/// Atomic change to one username's rows. `put_*` rows replace every existing
/// row with the same attribute name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowEdit {
    pub remove_check: Vec<String>,
    pub put_check: Vec<DirectoryRow>,
    pub remove_reply: Vec<String>,
    pub put_reply: Vec<DirectoryRow>,
}

impl RowEdit {
    /// Attribute names whose rows this edit deletes from a table
    pub fn touched(remove: &[String], put: &[DirectoryRow]) -> Vec<String> {
        let mut names: Vec<String> = remove
            .iter()
            .cloned()
            .chain(put.iter().map(|r| r.attribute.clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Storage for directory rows
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn entry(&self, username: &str) -> Result<DirectoryEntry, DirectoryError>;

    /// Apply an edit atomically
    async fn apply(&self, username: &str, edit: &RowEdit) -> Result<(), DirectoryError>;

    /// Remove every row for the username, returning how many were removed
    async fn purge(&self, username: &str) -> Result<u64, DirectoryError>;

    /// Accounting sessions without a stop time
    async fn open_sessions(&self, username: &str) -> Result<u64, DirectoryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Active,
    Suspended,
    /// No directory rows exist
    Absent,
}

/// A username's authentication identity as reconstructed from the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RadiusCredential {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub nas_identifier: Option<String>,
    pub download_speed_mbps: Option<u32>,
    pub upload_speed_mbps: Option<u32>,
    pub framed_ip_address: Option<Ipv4Addr>,
    /// Profile whose speed attributes were found
    pub vendor: Option<VendorProfile>,
    pub status: CredentialStatus,
}

impl RadiusCredential {
    fn from_entry(username: &str, entry: &DirectoryEntry) -> Self {
        let status = if entry.check_value(AUTH_TYPE) == Some(AUTH_TYPE_REJECT) {
            CredentialStatus::Suspended
        } else {
            CredentialStatus::Active
        };
        let speed = VendorProfile::detect_speed(
            entry
                .reply
                .iter()
                .map(|r| (r.attribute.as_str(), r.value.as_str())),
        );

        RadiusCredential {
            username: username.to_string(),
            password: entry.check_value(CLEARTEXT_PASSWORD).map(String::from),
            nas_identifier: entry.check_value(NAS_IDENTIFIER).map(String::from),
            download_speed_mbps: speed.map(|(_, s)| s.download_mbps),
            upload_speed_mbps: speed.map(|(_, s)| s.upload_mbps),
            framed_ip_address: entry
                .reply_value(FRAMED_IP_ADDRESS)
                .and_then(|v| v.parse().ok()),
            vendor: speed.map(|(profile, _)| profile),
            status,
        }
    }

    pub fn speed(&self) -> Option<SpeedLimit> {
        match (self.download_speed_mbps, self.upload_speed_mbps) {
            (Some(down), Some(up)) => Some(SpeedLimit::new(down, up)),
            _ => None,
        }
    }
}

/// Optional authorization settings for [`DirectoryManager::provision`].
/// `None` keeps whatever the directory already holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionOptions {
    pub ip_address: Option<Ipv4Addr>,
    pub speed: Option<SpeedLimit>,
    pub nas_identifier: Option<String>,
    /// Speed attribute family; the manager's default when unset
    pub vendor: Option<VendorProfile>,
}

/// High level directory operations, serialized per username
pub struct DirectoryManager {
    store: Arc<dyn DirectoryStore>,
    plans: Arc<dyn PlanCatalog>,
    default_vendor: VendorProfile,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DirectoryManager {
    pub fn new(
        store: Arc<dyn DirectoryStore>,
        plans: Arc<dyn PlanCatalog>,
        default_vendor: VendorProfile,
    ) -> Self {
        DirectoryManager {
            store,
            plans,
            default_vendor,
            locks: DashMap::new(),
        }
    }

    pub fn default_vendor(&self) -> VendorProfile {
        self.default_vendor
    }

    /// Run `op` holding the username's lock. The lock entry is dropped
    /// afterwards unless another caller is still holding or waiting on it.
    async fn serialized<T, F, Fut>(&self, username: &str, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = Arc::clone(&self.locks.entry(username.to_string()).or_default());
        let result = {
            let _guard = lock.lock().await;
            op().await
        };
        drop(lock);
        self.locks.remove_if(username, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.len()
    }

    async fn write(
        &self,
        username: &str,
        edit: &RowEdit,
        operation: &str,
    ) -> Result<(), ProvisioningOutcome> {
        self.store.apply(username, edit).await.map_err(|e| {
            warn!(
                username = %username,
                operation = operation,
                error = %e,
                "Directory write failed"
            );
            ProvisioningOutcome::failed(
                ErrorKind::DirectoryWrite,
                format!("{} {} failed: {}", operation, username, e),
            )
        })
    }

    async fn read(
        &self,
        username: &str,
        operation: &str,
    ) -> Result<DirectoryEntry, ProvisioningOutcome> {
        self.store.entry(username).await.map_err(|e| {
            warn!(
                username = %username,
                operation = operation,
                error = %e,
                "Directory read failed"
            );
            ProvisioningOutcome::failed(
                ErrorKind::DirectoryWrite,
                format!("{} {} failed: {}", operation, username, e),
            )
        })
    }

    /// Create or replace the credential and authorization rows for a username.
    /// Clears any suspension.
    pub async fn provision(
        &self,
        username: &str,
        password: &str,
        options: &ProvisionOptions,
    ) -> ProvisioningOutcome {
        if username.trim().is_empty() {
            return ProvisioningOutcome::failed(ErrorKind::InvalidInput, "username is empty");
        }
        if password.is_empty() {
            return ProvisioningOutcome::failed(
                ErrorKind::InvalidInput,
                format!("refusing to provision {} with an empty password", username),
            );
        }

        let mut edit = RowEdit {
            remove_check: vec![AUTH_TYPE.to_string()],
            put_check: vec![DirectoryRow::set(CLEARTEXT_PASSWORD, password)],
            remove_reply: vec![],
            put_reply: vec![
                DirectoryRow::set(SERVICE_TYPE, "Framed-User"),
                DirectoryRow::set(FRAMED_PROTOCOL, "PPP"),
            ],
        };
        if let Some(ref nas) = options.nas_identifier {
            edit.put_check.push(DirectoryRow::matches(NAS_IDENTIFIER, nas.as_str()));
        }
        if let Some(ip) = options.ip_address {
            edit.put_reply.push(DirectoryRow::set(FRAMED_IP_ADDRESS, ip.to_string()));
        }
        if let Some(speed) = options.speed {
            let vendor = options.vendor.unwrap_or(self.default_vendor);
            push_speed(&mut edit, vendor, speed);
        }

        let written = self
            .serialized(username, || self.write(username, &edit, "provision"))
            .await;
        if let Err(outcome) = written {
            return outcome;
        }

        info!(username = %username, speed = ?options.speed, "Provisioned RADIUS user");
        ProvisioningOutcome::ok(format!("provisioned {}", username))
    }

    /// Block authentication while keeping password and reply rows for reactivation
    pub async fn suspend(&self, username: &str, reason: &str) -> ProvisioningOutcome {
        self.serialized(username, || self.suspend_locked(username, reason)).await
    }

    async fn suspend_locked(&self, username: &str, reason: &str) -> ProvisioningOutcome {
        let entry = match self.read(username, "suspend").await {
            Ok(entry) => entry,
            Err(outcome) => return outcome,
        };
        if entry.is_empty() {
            debug!(username = %username, "Suspend requested for user absent from directory");
            return ProvisioningOutcome::ok(format!(
                "{} has no directory entry, nothing to suspend",
                username
            ));
        }

        let edit = RowEdit {
            put_check: vec![DirectoryRow::set(AUTH_TYPE, AUTH_TYPE_REJECT)],
            ..RowEdit::default()
        };
        if let Err(outcome) = self.write(username, &edit, "suspend").await {
            return outcome;
        }

        info!(username = %username, reason = %reason, "Suspended RADIUS user");
        ProvisioningOutcome::ok(format!("suspended {}: {}", username, reason))
    }

    /// Remove every row for a username. Absent users are a success.
    pub async fn deprovision(&self, username: &str, reason: &str) -> ProvisioningOutcome {
        let removed = self.serialized(username, || self.store.purge(username)).await;

        match removed {
            Ok(0) => {
                debug!(username = %username, "Deprovision found no directory rows");
                ProvisioningOutcome::ok(format!("{} already absent", username))
            }
            Ok(rows) => {
                info!(
                    username = %username,
                    rows = rows,
                    reason = %reason,
                    "Deprovisioned RADIUS user"
                );
                let detail = format!("removed {} rows for {}: {}", rows, username, reason);
                ProvisioningOutcome::ok(detail)
            }
            Err(e) => {
                warn!(username = %username, error = %e, "Directory deprovision failed");
                ProvisioningOutcome::failed(
                    ErrorKind::DirectoryWrite,
                    format!("deprovision {} failed: {}", username, e),
                )
            }
        }
    }

    /// Rewrite only the speed attributes from a plan's limits
    pub async fn sync_speed(
        &self,
        username: &str,
        plan_id: PlanId,
        vendor: VendorProfile,
    ) -> ProvisioningOutcome {
        let plan = match self.plans.plan(plan_id).await {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                return ProvisioningOutcome::failed(
                    ErrorKind::PlanNotFound,
                    format!("service plan {} does not exist", plan_id),
                )
            }
            Err(e) => {
                warn!(username = %username, plan_id = plan_id, error = %e, "Plan lookup failed");
                return ProvisioningOutcome::failed(
                    ErrorKind::Repository,
                    format!("plan {} lookup failed: {}", plan_id, e),
                );
            }
        };

        self.serialized(username, || self.sync_speed_locked(username, &plan, vendor)).await
    }

    async fn sync_speed_locked(
        &self,
        username: &str,
        plan: &ServicePlan,
        vendor: VendorProfile,
    ) -> ProvisioningOutcome {
        let entry = match self.read(username, "sync speed").await {
            Ok(entry) => entry,
            Err(outcome) => return outcome,
        };
        if entry.is_empty() {
            return ProvisioningOutcome::ok(format!(
                "{} has no directory entry, speed sync skipped",
                username
            ));
        }

        let mut edit = RowEdit::default();
        push_speed(&mut edit, vendor, plan.speed());
        if let Err(outcome) = self.write(username, &edit, "sync speed").await {
            return outcome;
        }

        info!(
            username = %username,
            plan_id = plan.id,
            speed = %plan.speed(),
            vendor = %vendor,
            "Synced RADIUS speed"
        );
        ProvisioningOutcome::ok(format!("{} now limited to {}", username, plan.speed()))
    }

    /// Reconstruct a username's credential, None when no rows exist
    pub async fn lookup(&self, username: &str) -> Result<Option<RadiusCredential>, DirectoryError> {
        let entry = self.store.entry(username).await?;
        if entry.is_empty() {
            return Ok(None);
        }
        Ok(Some(RadiusCredential::from_entry(username, &entry)))
    }

    pub async fn status(&self, username: &str) -> Result<CredentialStatus, DirectoryError> {
        Ok(self
            .lookup(username)
            .await?
            .map(|c| c.status)
            .unwrap_or(CredentialStatus::Absent))
    }

    /// Whether accounting shows a session without a stop time
    pub async fn is_online(&self, username: &str) -> Result<bool, DirectoryError> {
        Ok(self.store.open_sessions(username).await? > 0)
    }
}

fn push_speed(edit: &mut RowEdit, vendor: VendorProfile, speed: SpeedLimit) {
    edit.remove_reply.extend(
        VendorProfile::all_speed_attribute_names()
            .into_iter()
            .map(String::from),
    );
    edit.put_reply.extend(
        vendor
            .encode_speed(speed)
            .into_iter()
            .map(|(attr, value)| DirectoryRow::set(attr.name, value)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::MemoryServiceRepository;
    use rust_decimal::Decimal;

    async fn manager() -> (DirectoryManager, MemoryDirectoryStore) {
        let store = MemoryDirectoryStore::new();
        let plans = MemoryServiceRepository::new();
        plans
            .insert_plan(ServicePlan {
                id: 2,
                name: "Home 50".to_string(),
                download_mbps: 50,
                upload_mbps: 10,
                price: Decimal::new(4500, 2),
                billing_cycle_days: 30,
            })
            .await;
        let manager = DirectoryManager::new(
            Arc::new(store.clone()),
            Arc::new(plans),
            VendorProfile::Mikrotik,
        );
        (manager, store)
    }

    #[test]
    fn test_entry_apply_replaces_by_name() {
        let mut entry = DirectoryEntry::default();
        entry.apply(&RowEdit {
            put_check: vec![DirectoryRow::set(CLEARTEXT_PASSWORD, "one")],
            put_reply: vec![DirectoryRow::set(FRAMED_IP_ADDRESS, "10.0.0.5")],
            ..RowEdit::default()
        });
        entry.apply(&RowEdit {
            put_check: vec![DirectoryRow::set(CLEARTEXT_PASSWORD, "two")],
            ..RowEdit::default()
        });

        assert_eq!(entry.check.len(), 1);
        assert_eq!(entry.check_value(CLEARTEXT_PASSWORD), Some("two"));
        assert_eq!(entry.reply_value(FRAMED_IP_ADDRESS), Some("10.0.0.5"));
    }

    #[test]
    fn test_touched_names() {
        let names = RowEdit::touched(
            &[AUTH_TYPE.to_string()],
            &[
                DirectoryRow::set(CLEARTEXT_PASSWORD, "x"),
                DirectoryRow::set(AUTH_TYPE, "Reject"),
            ],
        );
        assert_eq!(names, vec![AUTH_TYPE.to_string(), CLEARTEXT_PASSWORD.to_string()]);
    }

    #[tokio::test]
    async fn test_provision_and_lookup() {
        let (manager, _) = manager().await;
        let options = ProvisionOptions {
            ip_address: Some(Ipv4Addr::new(10, 0, 0, 5)),
            speed: Some(SpeedLimit::new(20, 5)),
            nas_identifier: Some("core-bras".to_string()),
            vendor: None,
        };
        assert!(manager.provision("alice", "secret123", &options).await.success);

        let credential = manager.lookup("alice").await.unwrap().unwrap();
        assert_eq!(credential.status, CredentialStatus::Active);
        assert_eq!(credential.password.as_deref(), Some("secret123"));
        assert_eq!(credential.speed(), Some(SpeedLimit::new(20, 5)));
        assert_eq!(credential.framed_ip_address, Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(credential.nas_identifier.as_deref(), Some("core-bras"));
        assert_eq!(credential.vendor, Some(VendorProfile::Mikrotik));
    }

    #[tokio::test]
    async fn test_provision_rejects_empty_password() {
        let (manager, store) = manager().await;
        let outcome = manager.provision("alice", "", &ProvisionOptions::default()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::InvalidInput));
        assert!(store.entry("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reprovision_does_not_duplicate() {
        let (manager, store) = manager().await;
        let options = ProvisionOptions {
            speed: Some(SpeedLimit::new(20, 5)),
            ..ProvisionOptions::default()
        };
        manager.provision("alice", "secret123", &options).await;
        manager.provision("alice", "secret456", &options).await;

        let entry = store.entry("alice").await.unwrap();
        assert_eq!(
            entry.check.iter().filter(|r| r.attribute == CLEARTEXT_PASSWORD).count(),
            1
        );
        assert_eq!(entry.check_value(CLEARTEXT_PASSWORD), Some("secret456"));
        assert_eq!(entry.reply.len(), 3);
    }

    #[tokio::test]
    async fn test_vendor_switch_replaces_speed_rows() {
        let (manager, store) = manager().await;
        let mut options = ProvisionOptions {
            speed: Some(SpeedLimit::new(20, 5)),
            ..ProvisionOptions::default()
        };
        manager.provision("carol", "pw-carol-123", &options).await;
        options.vendor = Some(VendorProfile::Ubiquiti);
        manager.provision("carol", "pw-carol-123", &options).await;

        let entry = store.entry("carol").await.unwrap();
        assert!(entry.reply_value("Mikrotik-Rate-Limit").is_none());
        assert_eq!(entry.reply_value("WISPr-Bandwidth-Max-Down"), Some("20000000"));
    }

    #[tokio::test]
    async fn test_suspend_and_reactivate() {
        let (manager, _) = manager().await;
        let options = ProvisionOptions {
            speed: Some(SpeedLimit::new(20, 5)),
            ..ProvisionOptions::default()
        };
        manager.provision("alice", "secret123", &options).await;

        assert!(manager.suspend("alice", "non-payment").await.success);
        assert_eq!(manager.status("alice").await.unwrap(), CredentialStatus::Suspended);

        // Reactivation without speed keeps the stored limits
        let outcome = manager
            .provision("alice", "secret123", &ProvisionOptions::default())
            .await;
        assert!(outcome.success);
        let credential = manager.lookup("alice").await.unwrap().unwrap();
        assert_eq!(credential.status, CredentialStatus::Active);
        assert_eq!(credential.speed(), Some(SpeedLimit::new(20, 5)));
    }

    #[tokio::test]
    async fn test_suspend_absent_user() {
        let (manager, store) = manager().await;
        assert!(manager.suspend("ghost", "manual").await.success);
        assert!(store.entry("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deprovision_is_idempotent() {
        let (manager, _) = manager().await;
        manager
            .provision("dave", "pw-dave-1234", &ProvisionOptions::default())
            .await;

        let first = manager.deprovision("dave", "deleted").await;
        let second = manager.deprovision("dave", "deleted").await;
        assert!(first.success);
        assert!(second.success);
        assert_eq!(manager.status("dave").await.unwrap(), CredentialStatus::Absent);
    }

    #[tokio::test]
    async fn test_sync_speed_touches_only_speed() {
        let (manager, _) = manager().await;
        let options = ProvisionOptions {
            ip_address: Some(Ipv4Addr::new(10, 0, 0, 5)),
            speed: Some(SpeedLimit::new(20, 5)),
            ..ProvisionOptions::default()
        };
        manager.provision("bob", "bob-password", &options).await;

        let outcome = manager.sync_speed("bob", 2, VendorProfile::Mikrotik).await;
        assert!(outcome.success, "{}", outcome);

        let credential = manager.lookup("bob").await.unwrap().unwrap();
        assert_eq!(credential.speed(), Some(SpeedLimit::new(50, 10)));
        assert_eq!(credential.framed_ip_address, Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(credential.password.as_deref(), Some("bob-password"));
    }

    #[tokio::test]
    async fn test_sync_speed_unknown_plan() {
        let (manager, _) = manager().await;
        let outcome = manager.sync_speed("bob", 99, VendorProfile::Mikrotik).await;
        assert_eq!(outcome.error_kind, Some(ErrorKind::PlanNotFound));
    }

    #[tokio::test]
    async fn test_lock_table_does_not_grow() {
        let (manager, _) = manager().await;
        let options = ProvisionOptions {
            speed: Some(SpeedLimit::new(20, 5)),
            ..ProvisionOptions::default()
        };
        for i in 0..20 {
            let username = format!("user{}", i);
            manager.provision(&username, "secret", &options).await;
            manager.suspend(&username, "unpaid").await;
            manager.sync_speed(&username, 2, VendorProfile::Mikrotik).await;
            manager.deprovision(&username, "closed").await;
        }
        assert_eq!(manager.lock_count(), 0);

        let (a, b, c) = tokio::join!(
            manager.provision("erin", "secret", &options),
            manager.suspend("erin", "unpaid"),
            manager.deprovision("erin", "closed"),
        );
        assert!(a.success && b.success && c.success);
        assert_eq!(manager.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_is_online() {
        let (manager, store) = manager().await;
        assert!(!manager.is_online("alice").await.unwrap());
        store.open_session("alice").await;
        assert!(manager.is_online("alice").await.unwrap());
        store.close_session("alice").await;
        assert!(!manager.is_online("alice").await.unwrap());
    }
}
