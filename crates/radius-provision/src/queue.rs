//! Background router provisioning
//!
//! Router work that must not hold up the customer-facing operation is handed
//! to a [`ProvisioningQueue`]. The caller gets a [`TaskHandle`] back as soon
//! as the task is queued; a [`ProvisioningWorker`] drains the queue and runs
//! each task on its own tokio task so one hanging router cannot stall others.

use crate::audit::{AuditEntry, AuditEventType, AuditLogger};
use crate::outcome::ProvisioningOutcome;
use crate::router::{RouterDeprovisionParams, RouterDriver, RouterProvisionParams};
use crate::service::{CustomerId, ServiceId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("provisioning queue is closed")]
pub struct QueueClosed;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouterTask {
    Provision(RouterProvisionParams),
    Deprovision(RouterDeprovisionParams),
}

impl RouterTask {
    pub fn operation(&self) -> &'static str {
        match self {
            RouterTask::Provision(_) => "router.provision",
            RouterTask::Deprovision(_) => "router.deprovision",
        }
    }

    fn ids(&self) -> (ServiceId, CustomerId) {
        match self {
            RouterTask::Provision(p) => (p.service_id, p.customer_id),
            RouterTask::Deprovision(p) => (p.service_id, p.customer_id),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningTask {
    pub id: u64,
    pub task: RouterTask,
    pub enqueued_at: DateTime<Utc>,
}

/// Receipt for a queued task. Holding it says nothing about completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskHandle {
    pub id: u64,
    pub service_id: ServiceId,
}

#[derive(Clone)]
pub struct ProvisioningQueue {
    sender: mpsc::UnboundedSender<ProvisioningTask>,
    next_id: Arc<AtomicU64>,
}

impl ProvisioningQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProvisioningTask>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = ProvisioningQueue {
            sender,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (queue, receiver)
    }

    pub fn enqueue(&self, task: RouterTask) -> Result<TaskHandle, QueueClosed> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (service_id, _) = task.ids();
        debug!(
            task_id = id,
            service_id = service_id,
            operation = task.operation(),
            "Queueing router task"
        );

        self.sender
            .send(ProvisioningTask {
                id,
                task,
                enqueued_at: Utc::now(),
            })
            .map_err(|_| QueueClosed)?;
        Ok(TaskHandle { id, service_id })
    }
}

/// Executes queued router tasks against a driver
#[derive(Clone)]
pub struct ProvisioningWorker {
    driver: Arc<dyn RouterDriver>,
    audit: Arc<AuditLogger>,
}

impl ProvisioningWorker {
    pub fn new(driver: Arc<dyn RouterDriver>, audit: Arc<AuditLogger>) -> Self {
        ProvisioningWorker { driver, audit }
    }

    /// Drain the queue on a background task until every sender is dropped
    pub fn spawn(self, receiver: mpsc::UnboundedReceiver<ProvisioningTask>) -> JoinHandle<()> {
        tokio::spawn(self.run(receiver))
    }

    pub async fn run(self, mut receiver: mpsc::UnboundedReceiver<ProvisioningTask>) {
        let mut in_flight = Vec::new();
        while let Some(task) = receiver.recv().await {
            let worker = self.clone();
            in_flight.push(tokio::spawn(async move {
                worker.execute(task).await;
            }));
            in_flight.retain(|handle: &JoinHandle<()>| !handle.is_finished());
        }
        for handle in in_flight {
            if let Err(e) = handle.await {
                warn!(error = %e, "Router task panicked");
            }
        }
        info!("Provisioning queue closed, worker stopped");
    }

    /// Run one task and record its outcome
    pub async fn execute(&self, task: ProvisioningTask) -> ProvisioningOutcome {
        let operation = task.task.operation();
        let (service_id, customer_id) = task.task.ids();

        let outcome = match &task.task {
            RouterTask::Provision(params) => self.driver.provision(params).await,
            RouterTask::Deprovision(params) => self.driver.deprovision(params).await,
        };

        let waited_ms = (Utc::now() - task.enqueued_at).num_milliseconds();
        if outcome.success {
            info!(
                task_id = task.id,
                service_id = service_id,
                customer_id = customer_id,
                operation = operation,
                waited_ms = waited_ms,
                "Router task completed"
            );
            self.audit
                .log(
                    AuditEntry::new(AuditEventType::RouterTaskCompleted)
                        .with_service(service_id, customer_id)
                        .with_operation(operation)
                        .with_details(outcome.detail()),
                )
                .await;
        } else {
            warn!(
                task_id = task.id,
                service_id = service_id,
                customer_id = customer_id,
                operation = operation,
                error = %outcome,
                "Router task failed"
            );
            self.audit
                .log(AuditEntry::provisioning_failure(
                    service_id,
                    customer_id,
                    operation,
                    &outcome,
                ))
                .await;
        }
        outcome
    }
}
