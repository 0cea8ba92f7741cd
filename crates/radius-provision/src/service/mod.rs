//! Billing-side service records
//!
//! The billing database is the source of truth for a service's status. The
//! coordinator reads and writes it through [`ServiceRepository`]; plans are
//! looked up through the narrower [`PlanCatalog`] so the directory manager
//! can resolve speeds without seeing the rest of the billing model.

mod memory;
mod postgres;

pub use memory::MemoryServiceRepository;
pub use postgres::PgServiceRepository;

use crate::vendor::{SpeedLimit, VendorProfile};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

pub type ServiceId = i64;
pub type CustomerId = i64;
pub type PlanId = i64;
pub type RouterId = i64;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Service not found: {0}")]
    ServiceNotFound(ServiceId),
    #[error("Database connection error: {0}")]
    Connection(String),
    #[error("Database query error: {0}")]
    Query(String),
    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                RepositoryError::Connection(err.to_string())
            }
            other => RepositoryError::Query(other.to_string()),
        }
    }
}

/// Lifecycle state of a customer service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Pending,
    Active,
    Suspended,
    Terminated,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Pending => "pending",
            ServiceStatus::Active => "active",
            ServiceStatus::Suspended => "suspended",
            ServiceStatus::Terminated => "terminated",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceStatus {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ServiceStatus::Pending),
            "active" => Ok(ServiceStatus::Active),
            "suspended" => Ok(ServiceStatus::Suspended),
            "terminated" | "cancelled" => Ok(ServiceStatus::Terminated),
            other => Err(RepositoryError::InvalidValue(format!("service status {}", other))),
        }
    }
}

/// Where access control for a service is enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    /// FreeRADIUS only
    Radius,
    /// Router configuration only
    Direct,
    /// Both
    Hybrid,
}

impl EnforcementMode {
    pub fn uses_radius(&self) -> bool {
        matches!(self, EnforcementMode::Radius | EnforcementMode::Hybrid)
    }

    pub fn uses_router(&self) -> bool {
        matches!(self, EnforcementMode::Direct | EnforcementMode::Hybrid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnforcementMode::Radius => "radius",
            EnforcementMode::Direct => "direct",
            EnforcementMode::Hybrid => "hybrid",
        }
    }
}

impl FromStr for EnforcementMode {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "radius" => Ok(EnforcementMode::Radius),
            "direct" => Ok(EnforcementMode::Direct),
            "hybrid" => Ok(EnforcementMode::Hybrid),
            other => Err(RepositoryError::InvalidValue(format!("enforcement mode {}", other))),
        }
    }
}

/// How the subscriber attaches to the access network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Pppoe,
    Static,
    Dhcp,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Pppoe => "pppoe",
            ConnectionType::Static => "static",
            ConnectionType::Dhcp => "dhcp",
        }
    }
}

impl FromStr for ConnectionType {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pppoe" => Ok(ConnectionType::Pppoe),
            "static" | "static_ip" => Ok(ConnectionType::Static),
            "dhcp" => Ok(ConnectionType::Dhcp),
            other => Err(RepositoryError::InvalidValue(format!("connection type {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerService {
    pub id: ServiceId,
    pub customer_id: CustomerId,
    pub service_plan_id: PlanId,
    pub status: ServiceStatus,
    pub ip_address: Option<Ipv4Addr>,
    pub mac_address: Option<String>,
    pub connection_type: ConnectionType,
    pub enforcement_mode: EnforcementMode,
    pub pppoe_username: Option<String>,
    pub pppoe_password: Option<String>,
    pub router_id: Option<RouterId>,
    pub monthly_fee: Decimal,
    /// End of the period already paid for
    pub paid_until: Option<DateTime<Utc>>,
    /// Scheduled installation; a pending service waits for it
    pub installation_date: Option<NaiveDate>,
    pub activated_at: Option<DateTime<Utc>>,
    pub suspended_at: Option<DateTime<Utc>>,
}

impl CustomerService {
    /// A pending service with no credentials, router or address assigned
    pub fn new(
        id: ServiceId,
        customer_id: CustomerId,
        service_plan_id: PlanId,
        enforcement_mode: EnforcementMode,
    ) -> Self {
        CustomerService {
            id,
            customer_id,
            service_plan_id,
            status: ServiceStatus::Pending,
            ip_address: None,
            mac_address: None,
            connection_type: ConnectionType::Pppoe,
            enforcement_mode,
            pppoe_username: None,
            pppoe_password: None,
            router_id: None,
            monthly_fee: Decimal::ZERO,
            paid_until: None,
            installation_date: None,
            activated_at: None,
            suspended_at: None,
        }
    }

    /// Whether this service authenticates against the RADIUS directory
    pub fn needs_radius_credentials(&self) -> bool {
        self.enforcement_mode.uses_radius()
    }

    /// Whether a payment on `today` should activate this service: any
    /// suspended service, or a pending one that was never activated and
    /// whose installation date has come.
    pub fn awaiting_activation(&self, today: NaiveDate) -> bool {
        match self.status {
            ServiceStatus::Suspended => true,
            ServiceStatus::Pending => {
                self.activated_at.is_none() && self.installation_date.map_or(true, |d| d <= today)
            }
            ServiceStatus::Active | ServiceStatus::Terminated => false,
        }
    }

    /// Stored PPPoE credentials when both parts are present and non-empty
    pub fn stored_credentials(&self) -> Option<(&str, &str)> {
        match (self.pppoe_username.as_deref(), self.pppoe_password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePlan {
    pub id: PlanId,
    pub name: String,
    pub download_mbps: u32,
    pub upload_mbps: u32,
    pub price: Decimal,
    pub billing_cycle_days: u32,
}

impl ServicePlan {
    pub fn speed(&self) -> SpeedLimit {
        SpeedLimit::new(self.download_mbps, self.upload_mbps)
    }
}

/// A NAS as stored in the billing database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterRecord {
    pub id: RouterId,
    pub name: String,
    /// Vendor type column
    pub router_type: String,
    pub nas_identifier: Option<String>,
    pub nas_address: Option<Ipv4Addr>,
    pub radius_secret: Option<String>,
}

impl RouterRecord {
    pub fn vendor(&self) -> VendorProfile {
        VendorProfile::from_router_type(&self.router_type)
    }
}

/// Service plan lookup
#[async_trait]
pub trait PlanCatalog: Send + Sync {
    async fn plan(&self, id: PlanId) -> Result<Option<ServicePlan>, RepositoryError>;
}

/// Billing-side persistence the coordinator depends on
#[async_trait]
pub trait ServiceRepository: Send + Sync {
    async fn service(&self, id: ServiceId) -> Result<Option<CustomerService>, RepositoryError>;

    /// Commit a status change. Entering `Active` stamps `activated_at` and
    /// clears `suspended_at`; entering `Suspended` stamps `suspended_at`.
    async fn set_status(
        &self,
        id: ServiceId,
        status: ServiceStatus,
        at: DateTime<Utc>,
    ) -> Result<CustomerService, RepositoryError>;

    async fn set_credentials(
        &self,
        id: ServiceId,
        username: &str,
        password: &str,
    ) -> Result<(), RepositoryError>;

    async fn set_plan(
        &self,
        id: ServiceId,
        plan_id: PlanId,
    ) -> Result<CustomerService, RepositoryError>;

    async fn set_paid_until(
        &self,
        id: ServiceId,
        paid_until: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Remove the row. Returns false when it was already gone.
    async fn delete(&self, id: ServiceId) -> Result<bool, RepositoryError>;

    /// Customer portal login, used to derive PPPoE usernames
    async fn portal_username(
        &self,
        customer_id: CustomerId,
    ) -> Result<Option<String>, RepositoryError>;

    /// Whether another service already holds this PPPoE username
    async fn username_taken(
        &self,
        username: &str,
        except: ServiceId,
    ) -> Result<bool, RepositoryError>;

    async fn router(&self, id: RouterId) -> Result<Option<RouterRecord>, RepositoryError>;

    /// Services of a customer a payment should activate, oldest first.
    /// See [`CustomerService::awaiting_activation`].
    async fn eligible_for_activation(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<CustomerService>, RepositoryError>;

    /// Services in a status with an id above `after`, in id order, at most `limit`
    async fn services_with_status(
        &self,
        status: ServiceStatus,
        after: ServiceId,
        limit: u32,
    ) -> Result<Vec<CustomerService>, RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enforcement_mode_routing() {
        assert!(EnforcementMode::Radius.uses_radius());
        assert!(!EnforcementMode::Radius.uses_router());
        assert!(!EnforcementMode::Direct.uses_radius());
        assert!(EnforcementMode::Direct.uses_router());
        assert!(EnforcementMode::Hybrid.uses_radius());
        assert!(EnforcementMode::Hybrid.uses_router());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("active".parse::<ServiceStatus>().unwrap(), ServiceStatus::Active);
        assert_eq!("cancelled".parse::<ServiceStatus>().unwrap(), ServiceStatus::Terminated);
        assert!("deleted?".parse::<ServiceStatus>().is_err());
        assert_eq!("static_ip".parse::<ConnectionType>().unwrap(), ConnectionType::Static);
    }

    #[test]
    fn test_stored_credentials() {
        let mut service = CustomerService::new(1, 7, 3, EnforcementMode::Radius);
        assert!(service.stored_credentials().is_none());

        service.pppoe_username = Some("alice".to_string());
        service.pppoe_password = Some(String::new());
        assert!(service.stored_credentials().is_none());

        service.pppoe_password = Some("secret123".to_string());
        assert_eq!(service.stored_credentials(), Some(("alice", "secret123")));
    }

    #[test]
    fn test_awaiting_activation() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let mut service = CustomerService::new(1, 7, 3, EnforcementMode::Radius);
        assert!(service.awaiting_activation(today));

        service.installation_date = NaiveDate::from_ymd_opt(2024, 6, 20);
        assert!(!service.awaiting_activation(today));
        service.installation_date = Some(today);
        assert!(service.awaiting_activation(today));

        service.activated_at = Some(Utc::now());
        assert!(!service.awaiting_activation(today));

        service.status = ServiceStatus::Suspended;
        assert!(service.awaiting_activation(today));
        service.status = ServiceStatus::Active;
        assert!(!service.awaiting_activation(today));
    }
}
