//! Router provisioning driver boundary
//!
//! Vendor API/SSH drivers live outside this crate. They push or retract a
//! subscriber's configuration on the NAS and report a [`ProvisioningOutcome`].

use crate::outcome::{ErrorKind, ProvisioningOutcome};
use crate::service::{ConnectionType, CustomerId, CustomerService, RouterId, ServiceId};
use crate::vendor::SpeedLimit;
use async_trait::async_trait;
use serde::Serialize;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouterProvisionParams {
    pub service_id: ServiceId,
    pub customer_id: CustomerId,
    pub router_id: RouterId,
    pub ip_address: Option<Ipv4Addr>,
    pub connection_type: ConnectionType,
    pub pppoe_username: Option<String>,
    #[serde(skip_serializing)]
    pub pppoe_password: Option<String>,
    pub download_speed_mbps: u32,
    pub upload_speed_mbps: u32,
}

impl RouterProvisionParams {
    pub fn for_service(service: &CustomerService, router_id: RouterId, speed: SpeedLimit) -> Self {
        RouterProvisionParams {
            service_id: service.id,
            customer_id: service.customer_id,
            router_id,
            ip_address: service.ip_address,
            connection_type: service.connection_type,
            pppoe_username: service.pppoe_username.clone(),
            pppoe_password: service.pppoe_password.clone(),
            download_speed_mbps: speed.download_mbps,
            upload_speed_mbps: speed.upload_mbps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouterDeprovisionParams {
    pub service_id: ServiceId,
    pub customer_id: CustomerId,
    pub router_id: RouterId,
    pub connection_type: ConnectionType,
    pub ip_address: Option<Ipv4Addr>,
    pub pppoe_username: Option<String>,
    pub reason: String,
}

impl RouterDeprovisionParams {
    pub fn for_service(
        service: &CustomerService,
        router_id: RouterId,
        reason: impl Into<String>,
    ) -> Self {
        RouterDeprovisionParams {
            service_id: service.id,
            customer_id: service.customer_id,
            router_id,
            connection_type: service.connection_type,
            ip_address: service.ip_address,
            pppoe_username: service.pppoe_username.clone(),
            reason: reason.into(),
        }
    }
}

/// Pushes subscriber configuration to a NAS
#[async_trait]
pub trait RouterDriver: Send + Sync {
    async fn provision(&self, params: &RouterProvisionParams) -> ProvisioningOutcome;

    async fn deprovision(&self, params: &RouterDeprovisionParams) -> ProvisioningOutcome;
}

/// Driver used when no router integration is configured. Every call fails
/// with a driver error so the gap shows up in transition reports.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredDriver;

#[async_trait]
impl RouterDriver for UnconfiguredDriver {
    async fn provision(&self, params: &RouterProvisionParams) -> ProvisioningOutcome {
        ProvisioningOutcome::failed(
            ErrorKind::Driver,
            format!("no router driver configured for router {}", params.router_id),
        )
    }

    async fn deprovision(&self, params: &RouterDeprovisionParams) -> ProvisioningOutcome {
        ProvisioningOutcome::failed(
            ErrorKind::Driver,
            format!("no router driver configured for router {}", params.router_id),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::EnforcementMode;

    #[test]
    fn test_params_from_service() {
        let mut service = CustomerService::new(5, 9, 2, EnforcementMode::Hybrid);
        service.ip_address = Some(Ipv4Addr::new(10, 0, 0, 5));
        service.pppoe_username = Some("bob".to_string());
        service.pppoe_password = Some("hunter22hunter22".to_string());

        let params = RouterProvisionParams::for_service(&service, 3, SpeedLimit::new(50, 10));
        assert_eq!(params.router_id, 3);
        assert_eq!(params.download_speed_mbps, 50);
        assert_eq!(params.pppoe_username.as_deref(), Some("bob"));

        let json = serde_json::to_string(&params).unwrap();
        assert!(!json.contains("hunter22"));

        let params = RouterDeprovisionParams::for_service(&service, 3, "suspended");
        assert_eq!(params.reason, "suspended");
        assert_eq!(params.ip_address, Some(Ipv4Addr::new(10, 0, 0, 5)));
    }

    #[tokio::test]
    async fn test_unconfigured_driver_fails() {
        let service = CustomerService::new(5, 9, 2, EnforcementMode::Direct);
        let params = RouterDeprovisionParams::for_service(&service, 1, "suspended");
        let outcome = UnconfiguredDriver.deprovision(&params).await;
        assert_eq!(outcome.error_kind, Some(ErrorKind::Driver));
    }
}
