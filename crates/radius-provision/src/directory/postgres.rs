//! PostgreSQL directory store over the FreeRADIUS schema

use super::{DirectoryEntry, DirectoryError, DirectoryRow, DirectoryStore, RowEdit};
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::debug;

/// Reads and writes `radcheck`, `radreply`, `radusergroup` and reads `radacct`
pub struct PgDirectoryStore {
    pool: PgPool,
}

impl PgDirectoryStore {
    pub fn new(pool: PgPool) -> Self {
        PgDirectoryStore { pool }
    }

    async fn rows(
        &self,
        table: Table,
        username: &str,
    ) -> Result<Vec<DirectoryRow>, DirectoryError> {
        let rows = sqlx::query(table.select())
            .bind(username)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<DirectoryRow, DirectoryError> {
                Ok(DirectoryRow {
                    attribute: row.try_get("attribute")?,
                    op: row.try_get("op")?,
                    value: row.try_get("value")?,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
enum Table {
    Check,
    Reply,
}

impl Table {
    fn select(self) -> &'static str {
        match self {
            Table::Check => {
                "SELECT attribute, op, value FROM radcheck WHERE username = $1 ORDER BY id"
            }
            Table::Reply => {
                "SELECT attribute, op, value FROM radreply WHERE username = $1 ORDER BY id"
            }
        }
    }

    fn delete_attributes(self) -> &'static str {
        match self {
            Table::Check => "DELETE FROM radcheck WHERE username = $1 AND attribute = ANY($2)",
            Table::Reply => "DELETE FROM radreply WHERE username = $1 AND attribute = ANY($2)",
        }
    }

    fn insert(self) -> &'static str {
        match self {
            Table::Check => {
                "INSERT INTO radcheck (username, attribute, op, value) VALUES ($1, $2, $3, $4)"
            }
            Table::Reply => {
                "INSERT INTO radreply (username, attribute, op, value) VALUES ($1, $2, $3, $4)"
            }
        }
    }
}

#[async_trait]
impl DirectoryStore for PgDirectoryStore {
    async fn entry(&self, username: &str) -> Result<DirectoryEntry, DirectoryError> {
        Ok(DirectoryEntry {
            check: self.rows(Table::Check, username).await?,
            reply: self.rows(Table::Reply, username).await?,
        })
    }

    async fn apply(&self, username: &str, edit: &RowEdit) -> Result<(), DirectoryError> {
        let mut tx = self.pool.begin().await?;

        for (table, remove, put) in [
            (Table::Check, &edit.remove_check, &edit.put_check),
            (Table::Reply, &edit.remove_reply, &edit.put_reply),
        ] {
            let names = RowEdit::touched(remove, put);
            if !names.is_empty() {
                sqlx::query(table.delete_attributes())
                    .bind(username)
                    .bind(names)
                    .execute(&mut *tx)
                    .await?;
            }
            for row in put.iter() {
                sqlx::query(table.insert())
                    .bind(username)
                    .bind(&row.attribute)
                    .bind(&row.op)
                    .bind(&row.value)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        debug!(username = %username, "Directory edit committed");
        Ok(())
    }

    async fn purge(&self, username: &str) -> Result<u64, DirectoryError> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for query in [
            "DELETE FROM radcheck WHERE username = $1",
            "DELETE FROM radreply WHERE username = $1",
            "DELETE FROM radusergroup WHERE username = $1",
        ] {
            removed += sqlx::query(query)
                .bind(username)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn open_sessions(&self, username: &str) -> Result<u64, DirectoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS sessions FROM radacct WHERE username = $1 AND acctstoptime IS NULL",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;

        let sessions: i64 = row.try_get("sessions")?;
        Ok(sessions.max(0) as u64)
    }
}
