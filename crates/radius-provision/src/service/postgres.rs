//! PostgreSQL service repository over the billing tables

use super::{
    CustomerId, CustomerService, PlanCatalog, PlanId, RepositoryError, RouterId, RouterRecord,
    ServiceId, ServicePlan, ServiceRepository, ServiceStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use std::net::Ipv4Addr;
use tracing::debug;

const SERVICE_COLUMNS: &str = "id, customer_id, service_plan_id, status, \
     ip_address::text AS ip_address, mac_address, connection_type, enforcement_mode, \
     pppoe_username, pppoe_password, router_id, monthly_fee, paid_until, installation_date, \
     activated_at, suspended_at";

pub struct PgServiceRepository {
    pool: PgPool,
}

impl PgServiceRepository {
    pub fn new(pool: PgPool) -> Self {
        PgServiceRepository { pool }
    }

    async fn fetch_service(
        &self,
        id: ServiceId,
    ) -> Result<Option<CustomerService>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM customer_services WHERE id = $1",
            SERVICE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(service_from_row).transpose()
    }

    async fn require_service(&self, id: ServiceId) -> Result<CustomerService, RepositoryError> {
        self.fetch_service(id)
            .await?
            .ok_or(RepositoryError::ServiceNotFound(id))
    }
}

fn parse_ip(value: Option<String>) -> Option<Ipv4Addr> {
    // inet::text renders as "10.0.0.5/32"
    value.and_then(|v| v.split('/').next().and_then(|ip| ip.parse().ok()))
}

fn to_u32(value: i32, column: &str) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::InvalidValue(format!("{} is negative: {}", column, value)))
}

fn service_from_row(row: &PgRow) -> Result<CustomerService, RepositoryError> {
    let status: String = row.try_get("status")?;
    let connection_type: String = row.try_get("connection_type")?;
    let enforcement_mode: String = row.try_get("enforcement_mode")?;

    Ok(CustomerService {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        service_plan_id: row.try_get("service_plan_id")?,
        status: status.parse()?,
        ip_address: parse_ip(row.try_get("ip_address")?),
        mac_address: row.try_get("mac_address")?,
        connection_type: connection_type.parse()?,
        enforcement_mode: enforcement_mode.parse()?,
        pppoe_username: row.try_get("pppoe_username")?,
        pppoe_password: row.try_get("pppoe_password")?,
        router_id: row.try_get("router_id")?,
        monthly_fee: row.try_get("monthly_fee")?,
        paid_until: row.try_get("paid_until")?,
        installation_date: row.try_get("installation_date")?,
        activated_at: row.try_get("activated_at")?,
        suspended_at: row.try_get("suspended_at")?,
    })
}

#[async_trait]
impl PlanCatalog for PgServiceRepository {
    async fn plan(&self, id: PlanId) -> Result<Option<ServicePlan>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, download_speed, upload_speed, price, billing_cycle_days \
             FROM service_plans WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(ServicePlan {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            download_mbps: to_u32(row.try_get("download_speed")?, "download_speed")?,
            upload_mbps: to_u32(row.try_get("upload_speed")?, "upload_speed")?,
            price: row.try_get("price")?,
            billing_cycle_days: to_u32(row.try_get("billing_cycle_days")?, "billing_cycle_days")?,
        }))
    }
}

#[async_trait]
impl ServiceRepository for PgServiceRepository {
    async fn service(&self, id: ServiceId) -> Result<Option<CustomerService>, RepositoryError> {
        self.fetch_service(id).await
    }

    async fn set_status(
        &self,
        id: ServiceId,
        status: ServiceStatus,
        at: DateTime<Utc>,
    ) -> Result<CustomerService, RepositoryError> {
        debug!(service_id = id, status = %status, "Updating service status");

        let query = match status {
            ServiceStatus::Active => {
                "UPDATE customer_services SET status = $2, activated_at = $3, suspended_at = NULL, \
                 updated_at = $3 WHERE id = $1"
            }
            ServiceStatus::Suspended => {
                "UPDATE customer_services SET status = $2, suspended_at = $3, updated_at = $3 \
                 WHERE id = $1"
            }
            ServiceStatus::Pending | ServiceStatus::Terminated => {
                "UPDATE customer_services SET status = $2, updated_at = $3 WHERE id = $1"
            }
        };

        let result = sqlx::query(query)
            .bind(id)
            .bind(status.as_str())
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::ServiceNotFound(id));
        }
        self.require_service(id).await
    }

    async fn set_credentials(
        &self,
        id: ServiceId,
        username: &str,
        password: &str,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE customer_services SET pppoe_username = $2, pppoe_password = $3, \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(username)
        .bind(password)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::ServiceNotFound(id));
        }
        Ok(())
    }

    async fn set_plan(
        &self,
        id: ServiceId,
        plan_id: PlanId,
    ) -> Result<CustomerService, RepositoryError> {
        let result = sqlx::query(
            "UPDATE customer_services SET service_plan_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(plan_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::ServiceNotFound(id));
        }
        self.require_service(id).await
    }

    async fn set_paid_until(
        &self,
        id: ServiceId,
        paid_until: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE customer_services SET paid_until = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(paid_until)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::ServiceNotFound(id));
        }
        Ok(())
    }

    async fn delete(&self, id: ServiceId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM customer_services WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn portal_username(
        &self,
        customer_id: CustomerId,
    ) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query("SELECT username FROM customers WHERE id = $1")
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(row.try_get("username")?),
            None => Ok(None),
        }
    }

    async fn username_taken(
        &self,
        username: &str,
        except: ServiceId,
    ) -> Result<bool, RepositoryError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM customer_services \
             WHERE pppoe_username = $1 AND id <> $2) AS taken",
        )
        .bind(username)
        .bind(except)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("taken")?)
    }

    async fn router(&self, id: RouterId) -> Result<Option<RouterRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, type, nas_identifier, ip_address::text AS ip_address, radius_secret \
             FROM routers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(RouterRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            router_type: row.try_get("type")?,
            nas_identifier: row.try_get("nas_identifier")?,
            nas_address: parse_ip(row.try_get("ip_address")?),
            radius_secret: row.try_get("radius_secret")?,
        }))
    }

    async fn eligible_for_activation(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<CustomerService>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM customer_services WHERE customer_id = $1 AND (status = 'suspended' \
             OR (status = 'pending' AND activated_at IS NULL \
                 AND (installation_date IS NULL OR installation_date <= CURRENT_DATE))) \
             ORDER BY id",
            SERVICE_COLUMNS
        ))
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(service_from_row).collect()
    }

    async fn services_with_status(
        &self,
        status: ServiceStatus,
        after: ServiceId,
        limit: u32,
    ) -> Result<Vec<CustomerService>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM customer_services WHERE status = $1 AND id > $2 ORDER BY id LIMIT $3",
            SERVICE_COLUMNS
        ))
        .bind(status.as_str())
        .bind(after)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(service_from_row).collect()
    }
}
