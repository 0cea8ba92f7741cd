//! Directory reconciliation
//!
//! Billing is authoritative. A sweep re-provisions active services whose
//! RADIUS rows are missing or suspended, and suspends rows that are still
//! active for services billing has suspended or terminated.
//!
//! Each status is walked in id order, one batch per sweep. The position is
//! kept between sweeps and wraps to the start once a status is exhausted.

use crate::directory::{CredentialStatus, DirectoryManager};
use crate::lifecycle::radius_options;
use crate::outcome::{ErrorKind, ProvisioningOutcome};
use crate::service::{
    CustomerService, PlanCatalog, RepositoryError, ServiceId, ServiceRepository, ServiceStatus,
};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileFailure {
    pub service_id: ServiceId,
    pub username: String,
    pub outcome: ProvisioningOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub examined: usize,
    pub in_sync: usize,
    pub provisioned: usize,
    pub suspended: usize,
    /// Active RADIUS services without stored credentials
    pub skipped: usize,
    pub failures: Vec<ReconcileFailure>,
}

impl ReconcileReport {
    pub fn changed(&self) -> usize {
        self.provisioned + self.suspended
    }
}

pub struct Reconciler {
    services: Arc<dyn ServiceRepository>,
    plans: Arc<dyn PlanCatalog>,
    directory: Arc<DirectoryManager>,
    batch_size: u32,
    /// Last service id examined per status
    cursors: DashMap<ServiceStatus, ServiceId>,
}

impl Reconciler {
    pub fn new(
        services: Arc<dyn ServiceRepository>,
        plans: Arc<dyn PlanCatalog>,
        directory: Arc<DirectoryManager>,
        batch_size: u32,
    ) -> Self {
        Reconciler {
            services,
            plans,
            directory,
            batch_size: batch_size.max(1),
            cursors: DashMap::new(),
        }
    }

    /// Examine up to one batch of services per status and repair drift
    pub async fn sweep(&self) -> Result<ReconcileReport, RepositoryError> {
        let mut report = ReconcileReport::default();

        let active = self.next_page(ServiceStatus::Active).await?;
        for service in active.iter().filter(|s| s.enforcement_mode.uses_radius()) {
            report.examined += 1;
            self.restore_access(service, &mut report).await;
        }

        for status in [ServiceStatus::Suspended, ServiceStatus::Terminated] {
            let services = self.next_page(status).await?;
            for service in &services {
                report.examined += 1;
                self.revoke_access(service, &mut report).await;
            }
        }

        info!(
            examined = report.examined,
            provisioned = report.provisioned,
            suspended = report.suspended,
            failures = report.failures.len(),
            "Directory reconciliation finished"
        );
        Ok(report)
    }

    async fn next_page(
        &self,
        status: ServiceStatus,
    ) -> Result<Vec<CustomerService>, RepositoryError> {
        let after = self.cursors.get(&status).map_or(0, |cursor| *cursor);
        let mut page = self
            .services
            .services_with_status(status, after, self.batch_size)
            .await?;
        if page.is_empty() && after > 0 {
            page = self
                .services
                .services_with_status(status, 0, self.batch_size)
                .await?;
        }

        let next = match page.last() {
            Some(last) if page.len() >= self.batch_size as usize => last.id,
            _ => 0,
        };
        debug!(status = %status, after = after, next = next, rows = page.len(), "Reconcile page");
        self.cursors.insert(status, next);
        Ok(page)
    }

    async fn restore_access(&self, service: &CustomerService, report: &mut ReconcileReport) {
        let Some((username, password)) = service.stored_credentials() else {
            debug!(service_id = service.id, "Active service has no stored credentials");
            report.skipped += 1;
            return;
        };

        match self.directory.status(username).await {
            Ok(CredentialStatus::Active) => {
                report.in_sync += 1;
                return;
            }
            Ok(status) => {
                info!(
                    service_id = service.id,
                    username = %username,
                    status = ?status,
                    "Restoring RADIUS access"
                );
            }
            Err(e) => {
                report.failures.push(failure(service, username, e.to_string()));
                return;
            }
        }

        let plan = match self.plans.plan(service.service_plan_id).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(
                    service_id = service.id,
                    error = %e,
                    "Plan lookup failed during reconciliation"
                );
                None
            }
        };
        let router = match service.router_id {
            Some(router_id) => self.services.router(router_id).await.ok().flatten(),
            None => None,
        };
        let vendor = router
            .as_ref()
            .map(|r| r.vendor())
            .unwrap_or_else(|| self.directory.default_vendor());
        let options = radius_options(service, plan.as_ref(), router.as_ref(), vendor);

        let outcome = self.directory.provision(username, password, &options).await;
        if outcome.success {
            report.provisioned += 1;
        } else {
            report.failures.push(ReconcileFailure {
                service_id: service.id,
                username: username.to_string(),
                outcome,
            });
        }
    }

    async fn revoke_access(&self, service: &CustomerService, report: &mut ReconcileReport) {
        let Some(username) = service.pppoe_username.as_deref().filter(|u| !u.is_empty()) else {
            return;
        };

        match self.directory.status(username).await {
            Ok(CredentialStatus::Active) => {}
            Ok(_) => {
                report.in_sync += 1;
                return;
            }
            Err(e) => {
                report.failures.push(failure(service, username, e.to_string()));
                return;
            }
        }

        let reason = format!("service {}", service.status);
        let outcome = self.directory.suspend(username, &reason).await;
        if outcome.success {
            info!(
                service_id = service.id,
                username = %username,
                status = %service.status,
                "Suspended stale RADIUS access"
            );
            report.suspended += 1;
        } else {
            report.failures.push(ReconcileFailure {
                service_id: service.id,
                username: username.to_string(),
                outcome,
            });
        }
    }
}

fn failure(service: &CustomerService, username: &str, error: String) -> ReconcileFailure {
    warn!(
        service_id = service.id,
        username = %username,
        error = %error,
        "Directory read failed during reconciliation"
    );
    ReconcileFailure {
        service_id: service.id,
        username: username.to_string(),
        outcome: ProvisioningOutcome::failed(ErrorKind::DirectoryWrite, error),
    }
}
