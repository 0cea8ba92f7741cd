//! In-memory service repository

use super::{
    CustomerId, CustomerService, PlanCatalog, PlanId, RepositoryError, RouterId, RouterRecord,
    ServiceId, ServicePlan, ServiceRepository, ServiceStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    services: BTreeMap<ServiceId, CustomerService>,
    plans: HashMap<PlanId, ServicePlan>,
    routers: HashMap<RouterId, RouterRecord>,
    portal_usernames: HashMap<CustomerId, String>,
}

/// Billing tables held in local memory.
///
/// Used for single-process deployments without a database and as the
/// repository behind coordinator tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryServiceRepository {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryServiceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_service(&self, service: CustomerService) {
        self.tables.write().await.services.insert(service.id, service);
    }

    pub async fn insert_plan(&self, plan: ServicePlan) {
        self.tables.write().await.plans.insert(plan.id, plan);
    }

    pub async fn insert_router(&self, router: RouterRecord) {
        self.tables.write().await.routers.insert(router.id, router);
    }

    pub async fn set_portal_username(&self, customer_id: CustomerId, username: impl Into<String>) {
        self.tables
            .write()
            .await
            .portal_usernames
            .insert(customer_id, username.into());
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.services.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tables.read().await.services.is_empty()
    }

    async fn update<F>(&self, id: ServiceId, f: F) -> Result<CustomerService, RepositoryError>
    where
        F: FnOnce(&mut CustomerService) + Send,
    {
        let mut tables = self.tables.write().await;
        let service = tables
            .services
            .get_mut(&id)
            .ok_or(RepositoryError::ServiceNotFound(id))?;
        f(service);
        Ok(service.clone())
    }
}

#[async_trait]
impl PlanCatalog for MemoryServiceRepository {
    async fn plan(&self, id: PlanId) -> Result<Option<ServicePlan>, RepositoryError> {
        Ok(self.tables.read().await.plans.get(&id).cloned())
    }
}

#[async_trait]
impl ServiceRepository for MemoryServiceRepository {
    async fn service(&self, id: ServiceId) -> Result<Option<CustomerService>, RepositoryError> {
        Ok(self.tables.read().await.services.get(&id).cloned())
    }

    async fn set_status(
        &self,
        id: ServiceId,
        status: ServiceStatus,
        at: DateTime<Utc>,
    ) -> Result<CustomerService, RepositoryError> {
        self.update(id, |service| {
            service.status = status;
            match status {
                ServiceStatus::Active => {
                    service.activated_at = Some(at);
                    service.suspended_at = None;
                }
                ServiceStatus::Suspended => service.suspended_at = Some(at),
                ServiceStatus::Pending | ServiceStatus::Terminated => {}
            }
        })
        .await
    }

    async fn set_credentials(
        &self,
        id: ServiceId,
        username: &str,
        password: &str,
    ) -> Result<(), RepositoryError> {
        let (username, password) = (username.to_string(), password.to_string());
        self.update(id, move |service| {
            service.pppoe_username = Some(username);
            service.pppoe_password = Some(password);
        })
        .await
        .map(|_| ())
    }

    async fn set_plan(
        &self,
        id: ServiceId,
        plan_id: PlanId,
    ) -> Result<CustomerService, RepositoryError> {
        self.update(id, |service| service.service_plan_id = plan_id).await
    }

    async fn set_paid_until(
        &self,
        id: ServiceId,
        paid_until: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.update(id, |service| service.paid_until = Some(paid_until))
            .await
            .map(|_| ())
    }

    async fn delete(&self, id: ServiceId) -> Result<bool, RepositoryError> {
        Ok(self.tables.write().await.services.remove(&id).is_some())
    }

    async fn portal_username(
        &self,
        customer_id: CustomerId,
    ) -> Result<Option<String>, RepositoryError> {
        Ok(self.tables.read().await.portal_usernames.get(&customer_id).cloned())
    }

    async fn username_taken(
        &self,
        username: &str,
        except: ServiceId,
    ) -> Result<bool, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .services
            .values()
            .any(|s| s.id != except && s.pppoe_username.as_deref() == Some(username)))
    }

    async fn router(&self, id: RouterId) -> Result<Option<RouterRecord>, RepositoryError> {
        Ok(self.tables.read().await.routers.get(&id).cloned())
    }

    async fn eligible_for_activation(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<CustomerService>, RepositoryError> {
        let today = Utc::now().date_naive();
        let tables = self.tables.read().await;
        Ok(tables
            .services
            .values()
            .filter(|s| s.customer_id == customer_id && s.awaiting_activation(today))
            .cloned()
            .collect())
    }

    async fn services_with_status(
        &self,
        status: ServiceStatus,
        after: ServiceId,
        limit: u32,
    ) -> Result<Vec<CustomerService>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .services
            .range(after.saturating_add(1)..)
            .map(|(_, s)| s)
            .filter(|s| s.status == status)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::EnforcementMode;
    use chrono::Duration;

    #[tokio::test]
    async fn test_status_timestamps() {
        let repo = MemoryServiceRepository::new();
        repo.insert_service(CustomerService::new(1, 10, 100, EnforcementMode::Radius))
            .await;

        let now = Utc::now();
        let active = repo.set_status(1, ServiceStatus::Active, now).await.unwrap();
        assert_eq!(active.activated_at, Some(now));
        assert_eq!(active.suspended_at, None);

        let suspended = repo.set_status(1, ServiceStatus::Suspended, now).await.unwrap();
        assert_eq!(suspended.suspended_at, Some(now));

        let reactivated = repo.set_status(1, ServiceStatus::Active, now).await.unwrap();
        assert_eq!(reactivated.suspended_at, None);
    }

    #[tokio::test]
    async fn test_missing_service() {
        let repo = MemoryServiceRepository::new();
        let err = repo
            .set_status(42, ServiceStatus::Active, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ServiceNotFound(42)));
        assert!(!repo.delete(42).await.unwrap());
    }

    #[tokio::test]
    async fn test_eligible_and_username_checks() {
        let repo = MemoryServiceRepository::new();
        for id in 1..=3 {
            repo.insert_service(CustomerService::new(id, 10, 100, EnforcementMode::Radius))
                .await;
        }
        repo.insert_service(CustomerService::new(4, 11, 100, EnforcementMode::Radius))
            .await;
        let mut scheduled = CustomerService::new(5, 10, 100, EnforcementMode::Radius);
        scheduled.installation_date = Some(Utc::now().date_naive() + Duration::days(3));
        repo.insert_service(scheduled).await;
        repo.set_status(2, ServiceStatus::Active, Utc::now()).await.unwrap();
        repo.set_credentials(2, "alice", "secret123").await.unwrap();
        repo.set_status(3, ServiceStatus::Active, Utc::now()).await.unwrap();
        repo.set_status(3, ServiceStatus::Suspended, Utc::now()).await.unwrap();

        let eligible = repo.eligible_for_activation(10).await.unwrap();
        let ids: Vec<ServiceId> = eligible.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 3]);

        assert!(repo.username_taken("alice", 1).await.unwrap());
        assert!(!repo.username_taken("alice", 2).await.unwrap());
    }

    #[tokio::test]
    async fn test_services_with_status_pages_by_id() {
        let repo = MemoryServiceRepository::new();
        for id in 1..=5 {
            repo.insert_service(CustomerService::new(id, 10, 100, EnforcementMode::Radius))
                .await;
        }
        repo.set_status(2, ServiceStatus::Active, Utc::now()).await.unwrap();

        let ids = |page: Vec<CustomerService>| page.iter().map(|s| s.id).collect::<Vec<_>>();
        let first = repo.services_with_status(ServiceStatus::Pending, 0, 2).await.unwrap();
        assert_eq!(ids(first), vec![1, 3]);
        let next = repo.services_with_status(ServiceStatus::Pending, 3, 2).await.unwrap();
        assert_eq!(ids(next), vec![4, 5]);
        let last = repo.services_with_status(ServiceStatus::Pending, 5, 2).await.unwrap();
        assert!(last.is_empty());
    }

    #[tokio::test]
    async fn test_set_paid_until() {
        let repo = MemoryServiceRepository::new();
        repo.insert_service(CustomerService::new(1, 10, 100, EnforcementMode::Radius))
            .await;
        let until = Utc::now() + Duration::days(30);
        repo.set_paid_until(1, until).await.unwrap();
        assert_eq!(repo.service(1).await.unwrap().unwrap().paid_until, Some(until));
    }
}
