//! Service provisioning for RADIUS-enforced ISP networks
//!
//! Keeps three systems in step: the billing record of each customer
//! service, the FreeRADIUS SQL tables that authenticate and rate-limit its
//! PPPoE session, and the NAS router that enforces it directly.
//!
//! - Lifecycle coordination driven by billing events (payment, suspension,
//!   plan and credential changes, deletion with prorated credit)
//! - Directory management over `radcheck`/`radreply`/`radusergroup`
//! - Vendor speed attributes for MikroTik, Ubiquiti (WISPr), Juniper and generic NAS
//! - NAS-IP-Address detection and an Access-Request connectivity probe
//! - Background router provisioning queue and periodic reconciliation
//!
//! # Example
//!
//! ```rust
//! use radius_provision::directory::{DirectoryManager, MemoryDirectoryStore, ProvisionOptions};
//! use radius_provision::service::MemoryServiceRepository;
//! use radius_provision::vendor::{SpeedLimit, VendorProfile};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let directory = DirectoryManager::new(
//!         Arc::new(MemoryDirectoryStore::new()),
//!         Arc::new(MemoryServiceRepository::new()),
//!         VendorProfile::Mikrotik,
//!     );
//!
//!     let options = ProvisionOptions {
//!         speed: Some(SpeedLimit::new(20, 5)),
//!         ..Default::default()
//!     };
//!     let outcome = directory.provision("alice", "s3cret", &options).await;
//!     assert!(outcome.success);
//! }
//! ```

pub mod audit;
pub mod billing;
pub mod config;
pub mod credentials;
pub mod db;
pub mod directory;
pub mod lifecycle;
pub mod outcome;
pub mod probe;
pub mod queue;
pub mod reconcile;
pub mod resolver;
pub mod router;
pub mod service;
pub mod vendor;

pub use audit::{AuditEntry, AuditEventType, AuditLogger};
pub use billing::{BillingLedger, CreditNote, LedgerError, MemoryLedger, PaymentApplication};
pub use config::{Config, ConfigError};
pub use directory::{
    CredentialStatus, DirectoryManager, DirectoryStore, MemoryDirectoryStore, PgDirectoryStore,
    ProvisionOptions, RadiusCredential,
};
pub use lifecycle::{
    ActivationTrigger, Coordinator, LifecycleError, PaymentReport, TransitionReport,
};
pub use outcome::{ErrorKind, ProvisioningOutcome};
pub use probe::{ProbeRequest, RadiusProbe, RadiusProbeResult};
pub use queue::{ProvisioningQueue, ProvisioningWorker, RouterTask, TaskHandle};
pub use reconcile::{ReconcileReport, Reconciler};
pub use resolver::{IpResolver, NetworkAddress, ResolutionError};
pub use router::{RouterDriver, UnconfiguredDriver};
pub use service::{
    CustomerService, EnforcementMode, MemoryServiceRepository, PgServiceRepository,
    ServicePlan, ServiceRepository, ServiceStatus,
};
pub use vendor::{SpeedLimit, VendorProfile};
