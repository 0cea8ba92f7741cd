//! Service lifecycle coordinator
//!
//! Drives the RADIUS directory and router drivers from billing events.
//!
//! ```text
//! pending --activate--> active --suspend--> suspended --activate--> active
//!    \                    |                     |
//!     `-------------------+------delete---------+--> terminated (row removed)
//! ```
//!
//! The billing row is written first and is never rolled back: a failed
//! RADIUS or router step leaves the new status committed and shows up as a
//! failed [`ProvisioningOutcome`] in the [`TransitionReport`], in the tracing
//! output and in the audit log.

use crate::audit::{AuditEntry, AuditEventType, AuditLogger};
use crate::billing::{
    prorated_credit, BillingLedger, CreditNote, CreditNoteRequest, LedgerError, PaymentApplication,
};
use crate::credentials::{
    base_username, generate_password, service_username, GENERATED_PASSWORD_LENGTH,
};
use crate::directory::{DirectoryManager, ProvisionOptions};
use crate::outcome::{ErrorKind, ProvisioningOutcome};
use crate::queue::{ProvisioningQueue, RouterTask, TaskHandle};
use crate::router::{RouterDeprovisionParams, RouterDriver, RouterProvisionParams};
use crate::service::{
    ConnectionType, CustomerId, CustomerService, PlanCatalog, PlanId, RepositoryError,
    RouterRecord, ServiceId, ServicePlan, ServiceRepository, ServiceStatus,
};
use crate::vendor::VendorProfile;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Billing cycle assumed when a terminated service's plan is gone
const FALLBACK_CYCLE_DAYS: u32 = 30;

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Service not found: {0}")]
    ServiceNotFound(ServiceId),
    #[error("Service {service_id} cannot move from {from} to {to}")]
    InvalidTransition {
        service_id: ServiceId,
        from: ServiceStatus,
        to: ServiceStatus,
    },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationTrigger {
    Payment { reference: String },
    Manual,
}

impl ActivationTrigger {
    fn describe(&self) -> String {
        match self {
            ActivationTrigger::Payment { reference } => format!("payment {}", reference),
            ActivationTrigger::Manual => "manual".to_string(),
        }
    }
}

/// What one transition committed and how its side effects went
#[derive(Debug, Clone, Serialize)]
pub struct TransitionReport {
    pub service_id: ServiceId,
    pub customer_id: CustomerId,
    pub from: ServiceStatus,
    pub to: ServiceStatus,
    /// The billing row was written
    pub committed: bool,
    pub username: Option<String>,
    pub radius: Option<ProvisioningOutcome>,
    pub router: Option<ProvisioningOutcome>,
    /// Router work handed to the background worker
    pub provisioning_task: Option<TaskHandle>,
    pub credit_note: Option<CreditNote>,
    pub billing_issue: Option<String>,
}

impl TransitionReport {
    fn new(service: &CustomerService, from: ServiceStatus, to: ServiceStatus) -> Self {
        TransitionReport {
            service_id: service.id,
            customer_id: service.customer_id,
            from,
            to,
            committed: false,
            username: service.pppoe_username.clone(),
            radius: None,
            router: None,
            provisioning_task: None,
            credit_note: None,
            billing_issue: None,
        }
    }

    /// Failed RADIUS or router steps
    pub fn provisioning_issues(&self) -> Vec<&ProvisioningOutcome> {
        [self.radius.as_ref(), self.router.as_ref()]
            .into_iter()
            .flatten()
            .filter(|o| !o.success)
            .collect()
    }

    /// Committed and every awaited side effect succeeded. Queued router
    /// tasks are not covered.
    pub fn fully_synced(&self) -> bool {
        self.committed && self.provisioning_issues().is_empty() && self.billing_issue.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationFailure {
    /// None when the eligible services could not be listed at all
    pub service_id: Option<ServiceId>,
    pub error: String,
}

/// Result of a payment and the activations it triggered
#[derive(Debug, Clone, Serialize)]
pub struct PaymentReport {
    pub customer_id: CustomerId,
    pub payment: PaymentApplication,
    pub activations: Vec<TransitionReport>,
    pub failures: Vec<ActivationFailure>,
}

impl PaymentReport {
    pub fn services_considered(&self) -> usize {
        self.activations.len() + self.failures.iter().filter(|f| f.service_id.is_some()).count()
    }

    /// Services activated with a failed side effect, plus services that could not be activated
    pub fn services_with_issues(&self) -> usize {
        self.activations
            .iter()
            .filter(|r| !r.provisioning_issues().is_empty())
            .count()
            + self.failures.len()
    }

    pub fn summary(&self) -> String {
        let considered = self.services_considered();
        let issues = self.services_with_issues();
        if issues > 0 {
            format!(
                "Payment applied; {} of {} services had provisioning issues",
                issues, considered
            )
        } else if considered == 0 {
            "Payment applied; no services awaiting activation".to_string()
        } else {
            format!("Payment applied; {} services activated", considered)
        }
    }
}

/// Provisioning options for a service, from its plan and router
pub fn radius_options(
    service: &CustomerService,
    plan: Option<&ServicePlan>,
    router: Option<&RouterRecord>,
    vendor: VendorProfile,
) -> ProvisionOptions {
    ProvisionOptions {
        ip_address: service.ip_address,
        speed: plan.map(|p| p.speed()),
        nas_identifier: router.and_then(|r| r.nas_identifier.clone()),
        vendor: Some(vendor),
    }
}

pub struct Coordinator {
    services: Arc<dyn ServiceRepository>,
    plans: Arc<dyn PlanCatalog>,
    directory: Arc<DirectoryManager>,
    router: Arc<dyn RouterDriver>,
    ledger: Arc<dyn BillingLedger>,
    queue: ProvisioningQueue,
    audit: Arc<AuditLogger>,
}

impl Coordinator {
    pub fn new(
        services: Arc<dyn ServiceRepository>,
        plans: Arc<dyn PlanCatalog>,
        directory: Arc<DirectoryManager>,
        router: Arc<dyn RouterDriver>,
        ledger: Arc<dyn BillingLedger>,
        queue: ProvisioningQueue,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Coordinator {
            services,
            plans,
            directory,
            router,
            ledger,
            queue,
            audit,
        }
    }

    /// Move a pending or suspended service to active.
    ///
    /// From pending, RADIUS is provisioned inline and router provisioning is
    /// queued. From suspended, both run as a joined concurrent pair using the
    /// stored credentials. Activating an active service changes nothing.
    pub async fn activate(
        &self,
        service_id: ServiceId,
        trigger: ActivationTrigger,
    ) -> Result<TransitionReport, LifecycleError> {
        let current = self.load(service_id).await?;
        let from = current.status;
        match from {
            ServiceStatus::Active => return Ok(TransitionReport::new(&current, from, from)),
            ServiceStatus::Terminated => {
                return Err(LifecycleError::InvalidTransition {
                    service_id,
                    from,
                    to: ServiceStatus::Active,
                })
            }
            ServiceStatus::Pending | ServiceStatus::Suspended => {}
        }

        let mut service = self
            .services
            .set_status(service_id, ServiceStatus::Active, Utc::now())
            .await?;
        let mut report = TransitionReport::new(&service, from, ServiceStatus::Active);
        report.committed = true;
        info!(
            service_id = service_id,
            customer_id = service.customer_id,
            from = %from,
            trigger = %trigger.describe(),
            "Service activated"
        );

        let plan = self.plan_for(&service).await;
        if let (ActivationTrigger::Payment { .. }, Ok(plan)) = (&trigger, &plan) {
            self.extend_paid_period(&mut service, plan, &mut report).await;
        }
        let router = self.router_for(&service).await;
        let vendor = self.vendor_for(router.as_ref());

        let needs_credentials =
            service.needs_radius_credentials() || service.connection_type == ConnectionType::Pppoe;
        let credentials = if needs_credentials {
            match self.ensure_credentials(&mut service).await {
                Ok(credentials) => Some(credentials),
                Err(outcome) => {
                    report.radius = Some(outcome);
                    None
                }
            }
        } else {
            None
        };
        report.username = service.pppoe_username.clone();

        let radius_step = async {
            if !service.enforcement_mode.uses_radius() {
                return None;
            }
            let (username, password) = credentials.as_ref()?;
            let options = radius_options(&service, plan.as_ref().ok(), router.as_ref(), vendor);
            let outcome = self.directory.provision(username, password, &options).await;
            match &plan {
                Err(missing) if outcome.success => Some(ProvisioningOutcome::failed(
                    missing.error_kind.unwrap_or(ErrorKind::PlanNotFound),
                    format!("{} provisioned without speed limits: {}", username, missing.detail()),
                )),
                _ => Some(outcome),
            }
        };

        let router_params = if service.enforcement_mode.uses_router() {
            Some(self.router_provision_params(&service, &plan))
        } else {
            None
        };

        if from == ServiceStatus::Pending {
            if let Some(outcome) = radius_step.await {
                report.radius = Some(outcome);
            }
            match router_params {
                Some(Ok(params)) => self.enqueue(RouterTask::Provision(params), &mut report),
                Some(Err(outcome)) => report.router = Some(outcome),
                None => {}
            }
        } else {
            let router_step = async {
                match &router_params {
                    Some(Ok(params)) => Some(self.router.provision(params).await),
                    Some(Err(outcome)) => Some(outcome.clone()),
                    None => None,
                }
            };
            let (radius, router) = tokio::join!(radius_step, router_step);
            if radius.is_some() {
                report.radius = radius;
            }
            report.router = router;
        }

        self.record(
            &report,
            AuditEventType::ServiceActivated,
            ("radius.provision", "router.provision"),
            format!("{} -> active ({})", from, trigger.describe()),
        )
        .await;
        Ok(report)
    }

    /// Suspend an active service. RADIUS suspension and router removal run concurrently.
    pub async fn suspend(
        &self,
        service_id: ServiceId,
        reason: &str,
    ) -> Result<TransitionReport, LifecycleError> {
        let current = self.load(service_id).await?;
        let from = current.status;
        match from {
            ServiceStatus::Suspended => return Ok(TransitionReport::new(&current, from, from)),
            ServiceStatus::Pending | ServiceStatus::Terminated => {
                return Err(LifecycleError::InvalidTransition {
                    service_id,
                    from,
                    to: ServiceStatus::Suspended,
                })
            }
            ServiceStatus::Active => {}
        }

        let service = self
            .services
            .set_status(service_id, ServiceStatus::Suspended, Utc::now())
            .await?;
        let mut report = TransitionReport::new(&service, from, ServiceStatus::Suspended);
        report.committed = true;
        info!(
            service_id = service_id,
            customer_id = service.customer_id,
            reason = %reason,
            "Service suspended"
        );

        let radius_step = async {
            if !service.enforcement_mode.uses_radius() {
                return None;
            }
            Some(match service.pppoe_username.as_deref().filter(|u| !u.is_empty()) {
                Some(username) => self.directory.suspend(username, reason).await,
                None => ProvisioningOutcome::ok("no RADIUS username on record, nothing to suspend"),
            })
        };
        let router_step = async {
            if !service.enforcement_mode.uses_router() {
                return None;
            }
            Some(match service.router_id {
                Some(router_id) => {
                    let params =
                        RouterDeprovisionParams::for_service(&service, router_id, "suspended");
                    self.router.deprovision(&params).await
                }
                None => ProvisioningOutcome::failed(
                    ErrorKind::InvalidInput,
                    format!("service {} has no router assigned", service.id),
                ),
            })
        };
        let (radius, router) = tokio::join!(radius_step, router_step);
        report.radius = radius;
        report.router = router;

        self.record(
            &report,
            AuditEventType::ServiceSuspended,
            ("radius.suspend", "router.deprovision"),
            format!("active -> suspended: {}", reason),
        )
        .await;
        Ok(report)
    }

    /// Terminate and remove a service.
    ///
    /// The row is marked terminated, RADIUS and router are deprovisioned
    /// concurrently, a credit note for the unused prepaid period is issued,
    /// and only then is the row deleted. Side-effect failures do not stop
    /// the deletion.
    pub async fn delete(
        &self,
        service_id: ServiceId,
        reason: &str,
    ) -> Result<TransitionReport, LifecycleError> {
        let current = self.load(service_id).await?;
        let from = current.status;
        let now = Utc::now();

        let service = if from == ServiceStatus::Terminated {
            current
        } else {
            self.services
                .set_status(service_id, ServiceStatus::Terminated, now)
                .await?
        };
        let mut report = TransitionReport::new(&service, from, ServiceStatus::Terminated);
        report.committed = true;

        let radius_step = async {
            let username = service.pppoe_username.as_deref().filter(|u| !u.is_empty())?;
            Some(self.directory.deprovision(username, reason).await)
        };
        let router_step = async {
            if !service.enforcement_mode.uses_router() {
                return None;
            }
            let router_id = service.router_id?;
            let params = RouterDeprovisionParams::for_service(&service, router_id, reason);
            Some(self.router.deprovision(&params).await)
        };
        let (radius, router) = tokio::join!(radius_step, router_step);
        report.radius = radius;
        report.router = router;

        let cycle_days = match self.plans.plan(service.service_plan_id).await {
            Ok(Some(plan)) => plan.billing_cycle_days,
            _ => FALLBACK_CYCLE_DAYS,
        };
        let credit = prorated_credit(service.monthly_fee, service.paid_until, cycle_days, now);
        if credit > Decimal::ZERO {
            let request = CreditNoteRequest {
                customer_id: service.customer_id,
                service_id,
                amount: credit,
                reason: format!("Unused service period: {}", reason),
            };
            match self.ledger.issue_credit_note(&request).await {
                Ok(note) => {
                    info!(
                        service_id = service_id,
                        customer_id = service.customer_id,
                        amount = %note.amount,
                        number = %note.number,
                        "Credit note issued"
                    );
                    self.audit
                        .log(
                            AuditEntry::new(AuditEventType::CreditNoteIssued)
                                .with_service(service_id, service.customer_id)
                                .with_details(format!("{} for {}", note.number, note.amount)),
                        )
                        .await;
                    report.credit_note = Some(note);
                }
                Err(e) => {
                    warn!(
                        service_id = service_id,
                        customer_id = service.customer_id,
                        error = %e,
                        "Credit note could not be issued"
                    );
                    report.billing_issue =
                        Some(format!("credit note of {} not issued: {}", credit, e));
                }
            }
        }

        self.record(
            &report,
            AuditEventType::ServiceTerminated,
            ("radius.deprovision", "router.deprovision"),
            format!("{} -> terminated: {}", from, reason),
        )
        .await;

        self.services.delete(service_id).await?;
        info!(service_id = service_id, customer_id = service.customer_id, "Service deleted");
        Ok(report)
    }

    /// Switch plans. An active service gets its RADIUS speed rewritten and,
    /// for router enforcement, a queued router re-provision.
    pub async fn change_plan(
        &self,
        service_id: ServiceId,
        plan_id: PlanId,
    ) -> Result<TransitionReport, LifecycleError> {
        let current = self.load(service_id).await?;
        if current.status == ServiceStatus::Terminated {
            return Err(LifecycleError::InvalidTransition {
                service_id,
                from: current.status,
                to: current.status,
            });
        }
        let plan = self
            .plans
            .plan(plan_id)
            .await?
            .ok_or_else(|| {
                LifecycleError::InvalidRequest(format!("plan {} does not exist", plan_id))
            })?;

        let service = self.services.set_plan(service_id, plan_id).await?;
        let mut report = TransitionReport::new(&service, service.status, service.status);
        report.committed = true;
        info!(
            service_id = service_id,
            customer_id = service.customer_id,
            plan_id = plan_id,
            "Service plan changed"
        );

        if service.status == ServiceStatus::Active {
            let router = self.router_for(&service).await;
            let vendor = self.vendor_for(router.as_ref());

            if service.enforcement_mode.uses_radius() {
                let username = service.pppoe_username.as_deref().filter(|u| !u.is_empty());
                if let Some(username) = username {
                    let outcome = self.directory.sync_speed(username, plan_id, vendor).await;
                    report.radius = Some(outcome);
                }
            }
            if service.enforcement_mode.uses_router() {
                self.queue_router_provision(&service, Ok(plan), &mut report);
            }
        }

        self.record(
            &report,
            AuditEventType::PlanChanged,
            ("radius.sync_speed", "router.provision"),
            format!("plan -> {}", plan_id),
        )
        .await;
        Ok(report)
    }

    /// Replace a service's PPPoE credentials. A renamed login has its old
    /// directory rows removed and, on a router-enforced active service, a
    /// queued router removal ahead of the new login's provisioning.
    pub async fn change_credentials(
        &self,
        service_id: ServiceId,
        username: &str,
        password: &str,
    ) -> Result<TransitionReport, LifecycleError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(LifecycleError::InvalidRequest(
                "username and password must not be empty".to_string(),
            ));
        }

        let current = self.load(service_id).await?;
        if current.status == ServiceStatus::Terminated {
            return Err(LifecycleError::InvalidTransition {
                service_id,
                from: current.status,
                to: current.status,
            });
        }
        let previous = current.pppoe_username.clone().filter(|u| !u.is_empty());
        let renamed = previous.as_deref() != Some(username);
        if renamed && self.services.username_taken(username, service_id).await? {
            return Err(LifecycleError::InvalidRequest(format!(
                "username {} is already in use",
                username
            )));
        }

        self.services.set_credentials(service_id, username, password).await?;
        let retired_login = match (previous.as_ref(), current.router_id) {
            (Some(_), Some(router_id))
                if renamed
                    && current.status == ServiceStatus::Active
                    && current.enforcement_mode.uses_router() =>
            {
                let reason = "credentials changed";
                Some(RouterDeprovisionParams::for_service(&current, router_id, reason))
            }
            _ => None,
        };
        let mut service = current;
        service.pppoe_username = Some(username.to_string());
        service.pppoe_password = Some(password.to_string());

        let mut report = TransitionReport::new(&service, service.status, service.status);
        report.committed = true;
        info!(
            service_id = service_id,
            customer_id = service.customer_id,
            username = %username,
            "Credentials changed"
        );
        if let Some(params) = retired_login {
            self.enqueue(RouterTask::Deprovision(params), &mut report);
        }

        let mut removal = None;
        if let Some(old) = previous.as_deref().filter(|_| renamed) {
            removal = Some(self.directory.deprovision(old, "credentials changed").await);
        }

        if service.status == ServiceStatus::Active {
            let plan = self.plan_for(&service).await;
            if service.enforcement_mode.uses_radius() {
                let router = self.router_for(&service).await;
                let vendor = self.vendor_for(router.as_ref());
                let options = radius_options(&service, plan.as_ref().ok(), router.as_ref(), vendor);
                report.radius = Some(self.directory.provision(username, password, &options).await);
            }
            if service.enforcement_mode.uses_router() {
                self.queue_router_provision(&service, plan, &mut report);
            }
        }
        if let Some(removal) = removal.filter(|o| !o.success) {
            if report.radius.as_ref().map_or(true, |o| o.success) {
                report.radius = Some(removal);
            }
        }

        self.record(
            &report,
            AuditEventType::CredentialsChanged,
            ("radius.provision", "router.provision"),
            match previous {
                Some(old) if renamed => format!("{} -> {}", old, username),
                _ => "password changed".to_string(),
            },
        )
        .await;
        Ok(report)
    }

    /// Apply a payment and activate the customer's services that were waiting
    /// on it: suspended ones, and pending ones whose installation is due.
    ///
    /// Each service is activated on its own; a failure on one is collected
    /// in the report and the loop moves on. Only a ledger failure is fatal.
    pub async fn apply_payment(
        &self,
        customer_id: CustomerId,
        amount: Decimal,
        reference: &str,
    ) -> Result<PaymentReport, LifecycleError> {
        let payment = self.ledger.apply_payment(customer_id, amount, reference).await?;
        self.audit
            .log(
                AuditEntry::new(AuditEventType::PaymentApplied)
                    .with_customer(customer_id)
                    .with_details(format!("{} ({})", amount, reference)),
            )
            .await;

        let mut report = PaymentReport {
            customer_id,
            payment,
            activations: Vec::new(),
            failures: Vec::new(),
        };

        let eligible = match self.services.eligible_for_activation(customer_id).await {
            Ok(eligible) => eligible,
            Err(e) => {
                error!(
                    customer_id = customer_id,
                    error = %e,
                    "Could not list services awaiting activation"
                );
                report.failures.push(ActivationFailure {
                    service_id: None,
                    error: e.to_string(),
                });
                return Ok(report);
            }
        };

        for service in eligible {
            let trigger = ActivationTrigger::Payment {
                reference: reference.to_string(),
            };
            match self.activate(service.id, trigger).await {
                Ok(activation) => report.activations.push(activation),
                Err(e) => {
                    error!(
                        service_id = service.id,
                        customer_id = customer_id,
                        error = %e,
                        "Service activation failed"
                    );
                    report.failures.push(ActivationFailure {
                        service_id: Some(service.id),
                        error: e.to_string(),
                    });
                }
            }
        }

        if report.services_with_issues() > 0 {
            warn!(customer_id = customer_id, "{}", report.summary());
        } else {
            info!(customer_id = customer_id, "{}", report.summary());
        }
        Ok(report)
    }

    async fn load(&self, service_id: ServiceId) -> Result<CustomerService, LifecycleError> {
        self.services
            .service(service_id)
            .await?
            .ok_or(LifecycleError::ServiceNotFound(service_id))
    }

    async fn plan_for(
        &self,
        service: &CustomerService,
    ) -> Result<ServicePlan, ProvisioningOutcome> {
        match self.plans.plan(service.service_plan_id).await {
            Ok(Some(plan)) => Ok(plan),
            Ok(None) => Err(ProvisioningOutcome::failed(
                ErrorKind::PlanNotFound,
                format!("service plan {} does not exist", service.service_plan_id),
            )),
            Err(e) => Err(ProvisioningOutcome::failed(
                ErrorKind::Repository,
                format!("plan {} lookup failed: {}", service.service_plan_id, e),
            )),
        }
    }

    async fn router_for(&self, service: &CustomerService) -> Option<RouterRecord> {
        let router_id = service.router_id?;
        match self.services.router(router_id).await {
            Ok(Some(router)) => Some(router),
            Ok(None) => {
                warn!(
                    service_id = service.id,
                    router_id = router_id,
                    "Assigned router does not exist"
                );
                None
            }
            Err(e) => {
                warn!(
                    service_id = service.id,
                    router_id = router_id,
                    error = %e,
                    "Router lookup failed"
                );
                None
            }
        }
    }

    fn vendor_for(&self, router: Option<&RouterRecord>) -> VendorProfile {
        router
            .map(|r| r.vendor())
            .unwrap_or_else(|| self.directory.default_vendor())
    }

    fn router_provision_params(
        &self,
        service: &CustomerService,
        plan: &Result<ServicePlan, ProvisioningOutcome>,
    ) -> Result<RouterProvisionParams, ProvisioningOutcome> {
        let router_id = service.router_id.ok_or_else(|| {
            ProvisioningOutcome::failed(
                ErrorKind::InvalidInput,
                format!("service {} has no router assigned", service.id),
            )
        })?;
        let plan = plan.as_ref().map_err(|missing| missing.clone())?;
        Ok(RouterProvisionParams::for_service(service, router_id, plan.speed()))
    }

    fn queue_router_provision(
        &self,
        service: &CustomerService,
        plan: Result<ServicePlan, ProvisioningOutcome>,
        report: &mut TransitionReport,
    ) {
        match self.router_provision_params(service, &plan) {
            Ok(params) => self.enqueue(RouterTask::Provision(params), report),
            Err(outcome) => report.router = Some(outcome),
        }
    }

    /// Hand a router task to the worker. A closed queue is reported as the
    /// router outcome unless an earlier router step already failed.
    fn enqueue(&self, task: RouterTask, report: &mut TransitionReport) {
        match self.queue.enqueue(task) {
            Ok(handle) => report.provisioning_task = Some(handle),
            Err(e) => {
                if report.router.as_ref().map_or(true, |o| o.success) {
                    report.router =
                        Some(ProvisioningOutcome::failed(ErrorKind::QueueClosed, e.to_string()));
                }
            }
        }
    }

    /// Push `paid_until` one billing cycle past the later of now and the
    /// current paid period.
    async fn extend_paid_period(
        &self,
        service: &mut CustomerService,
        plan: &ServicePlan,
        report: &mut TransitionReport,
    ) {
        let now = Utc::now();
        let start = service.paid_until.filter(|until| *until > now).unwrap_or(now);
        let until = start + Duration::days(i64::from(plan.billing_cycle_days));
        match self.services.set_paid_until(service.id, until).await {
            Ok(()) => {
                debug!(service_id = service.id, paid_until = %until, "Paid period extended");
                service.paid_until = Some(until);
            }
            Err(e) => {
                warn!(service_id = service.id, error = %e, "Paid period could not be extended");
                report.billing_issue = Some(format!("paid period not extended: {}", e));
            }
        }
    }

    /// Fill in missing PPPoE credentials and persist them. Stored credentials are reused.
    async fn ensure_credentials(
        &self,
        service: &mut CustomerService,
    ) -> Result<(String, String), ProvisioningOutcome> {
        if let Some((username, password)) = service.stored_credentials() {
            return Ok((username.to_string(), password.to_string()));
        }

        let username = match service.pppoe_username.clone().filter(|u| !u.is_empty()) {
            Some(username) => username,
            None => self.derive_username(service).await?,
        };
        let password = match service.pppoe_password.clone().filter(|p| !p.is_empty()) {
            Some(password) => password,
            None => generate_password(GENERATED_PASSWORD_LENGTH).map_err(|e| {
                warn!(service_id = service.id, error = %e, "Password generation failed");
                ProvisioningOutcome::failed(ErrorKind::CredentialGeneration, e.to_string())
            })?,
        };

        self.services
            .set_credentials(service.id, &username, &password)
            .await
            .map_err(|e| {
                ProvisioningOutcome::failed(
                    ErrorKind::CredentialGeneration,
                    format!("storing credentials for service {} failed: {}", service.id, e),
                )
            })?;
        info!(service_id = service.id, username = %username, "Generated PPPoE credentials");

        service.pppoe_username = Some(username.clone());
        service.pppoe_password = Some(password.clone());
        Ok((username, password))
    }

    async fn derive_username(
        &self,
        service: &CustomerService,
    ) -> Result<String, ProvisioningOutcome> {
        let lookup_failed = |e: RepositoryError| {
            ProvisioningOutcome::failed(
                ErrorKind::CredentialGeneration,
                format!("username lookup for service {} failed: {}", service.id, e),
            )
        };

        let portal = self
            .services
            .portal_username(service.customer_id)
            .await
            .map_err(lookup_failed)?;
        let base = base_username(portal.as_deref(), service.customer_id);
        if self
            .services
            .username_taken(&base, service.id)
            .await
            .map_err(lookup_failed)?
        {
            Ok(service_username(&base, service.id))
        } else {
            Ok(base)
        }
    }

    async fn record(
        &self,
        report: &TransitionReport,
        event: AuditEventType,
        operations: (&str, &str),
        details: String,
    ) {
        let mut entry = AuditEntry::new(event)
            .with_service(report.service_id, report.customer_id)
            .with_details(details);
        if let Some(ref username) = report.username {
            entry = entry.with_username(username.as_str());
        }
        self.audit.log(entry).await;

        let steps = [(operations.0, &report.radius), (operations.1, &report.router)];
        for (operation, outcome) in steps {
            let Some(outcome) = outcome.as_ref().filter(|o| !o.success) else {
                continue;
            };
            warn!(
                service_id = report.service_id,
                customer_id = report.customer_id,
                operation = operation,
                error = %outcome,
                "Provisioning step failed, billing change kept"
            );
            self.audit
                .log(AuditEntry::provisioning_failure(
                    report.service_id,
                    report.customer_id,
                    operation,
                    outcome,
                ))
                .await;
        }
    }
}
