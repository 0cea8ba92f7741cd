//! PostgreSQL pool setup shared by the directory and service backends

use crate::config::DatabaseConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

/// Open a connection pool for the configured database
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    debug!("Creating PostgreSQL connection pool to {}", mask_url(&config.url));

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.timeout))
        .connect(&config.url)
        .await?;

    info!(
        max_connections = config.max_connections,
        "PostgreSQL connection pool created successfully"
    );

    Ok(pool)
}

/// Hide credentials in a connection URL before it reaches a log line
pub fn mask_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(scheme_end) = url.find("://") {
            let scheme = &url[..scheme_end + 3];
            let host_part = &url[at_pos..];
            format!("{}***:***{}", scheme, host_part)
        } else {
            "***:***@***".to_string()
        }
    } else {
        url.to_string()
    }
}
