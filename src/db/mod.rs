//! Database Layer
//!
//! PostgreSQL access through sqlx, with every call routed through an
//! instrumented wrapper: query latency histogram, operation counter with a
//! success/error status, and an active-connection gauge that is guard-based
//! so it stays symmetric on every exit path, including errors and dropped
//! futures. The wrapper observes failures and propagates them unchanged.

use std::future::Future;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::metrics::{values, AppMetrics, Gauge, Timer};
use crate::models::DataItem;

const MAX_CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BACKOFF_START: Duration = Duration::from_secs(2);
const CONNECT_BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Derive the operation label from the first SQL keyword. Unknown or empty
/// statements fall back to a fixed label rather than minting new series.
fn operation_label(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .map(|word| word.to_lowercase())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Decrements the active-connection gauge when dropped.
struct ActiveConnGuard<'a> {
    gauge: &'a Gauge,
}

impl<'a> ActiveConnGuard<'a> {
    fn acquire(gauge: &'a Gauge) -> Self {
        gauge.add(&[], 1.0);
        Self { gauge }
    }
}

impl Drop for ActiveConnGuard<'_> {
    fn drop(&mut self) {
        self.gauge.decrement(&[], 1.0);
    }
}

/// Run one database operation with metrics collection. Duration and outcome
/// are recorded for both branches; the result is returned as-is.
pub(crate) async fn observe_query<T, F>(
    metrics: &AppMetrics,
    operation: &str,
    fut: F,
) -> Result<T, sqlx::Error>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    let _conn = ActiveConnGuard::acquire(&metrics.db_connections_active);
    let timer = Timer::new();
    let result = fut.await;

    let status = if result.is_ok() {
        values::STATUS_SUCCESS
    } else {
        values::STATUS_ERROR
    };
    metrics
        .db_query_duration_seconds
        .observe(&[operation], timer.elapsed_secs());
    metrics
        .db_operations_total
        .increment(&[operation, status], 1);
    result
}

pub struct Database {
    pub pool: PgPool,
    metrics: AppMetrics,
}

impl Database {
    /// Connect with bounded exponential backoff, then probe the connection.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        metrics: AppMetrics,
    ) -> anyhow::Result<Self> {
        let mut delay = CONNECT_BACKOFF_START;
        let mut attempt = 1;
        let pool = loop {
            tracing::info!(attempt, max = MAX_CONNECT_ATTEMPTS, "connecting to database");
            match PgPoolOptions::new()
                .min_connections(1)
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(30))
                .connect(database_url)
                .await
            {
                Ok(pool) => break pool,
                Err(err) if attempt < MAX_CONNECT_ATTEMPTS => {
                    tracing::warn!(attempt, error = %err, "database connection failed, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(CONNECT_BACKOFF_CAP);
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(error = %err, "database connection failed after {} attempts", attempt);
                    return Err(err.into());
                }
            }
        };

        sqlx::query("SELECT 1").execute(&pool).await?;
        tracing::info!("database connection established");
        Ok(Self { pool, metrics })
    }

    /// Idempotent schema bootstrap. Must complete before the service accepts
    /// traffic.
    pub async fn init_schema(&self) -> Result<(), sqlx::Error> {
        self.execute(
            r#"
            CREATE TABLE IF NOT EXISTS user_data (
                id SERIAL PRIMARY KEY,
                name VARCHAR(100) NOT NULL,
                email VARCHAR(255) NOT NULL,
                message VARCHAR(500),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ
            )
            "#,
        )
        .await?;
        Ok(())
    }

    /// Execute a statement, deriving the operation label from its first
    /// keyword. Returns the number of affected rows.
    pub async fn execute(&self, sql: &str) -> Result<u64, sqlx::Error> {
        let operation = operation_label(sql);
        observe_query(&self.metrics, &operation, async {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map(|done| done.rows_affected())
        })
        .await
    }

    pub async fn insert_item(
        &self,
        name: &str,
        email: &str,
        message: Option<&str>,
    ) -> Result<DataItem, sqlx::Error> {
        observe_query(&self.metrics, "insert", async {
            sqlx::query_as::<_, DataItem>(
                r#"
                INSERT INTO user_data (name, email, message, created_at)
                VALUES ($1, $2, $3, NOW())
                RETURNING id, name, email, message, created_at, updated_at
                "#,
            )
            .bind(name)
            .bind(email)
            .bind(message)
            .fetch_one(&self.pool)
            .await
        })
        .await
    }

    pub async fn list_items(&self, limit: i64) -> Result<Vec<DataItem>, sqlx::Error> {
        observe_query(&self.metrics, "select", async {
            sqlx::query_as::<_, DataItem>(
                r#"
                SELECT id, name, email, message, created_at, updated_at
                FROM user_data
                ORDER BY id DESC
                LIMIT $1
                "#,
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        })
        .await
    }

    pub async fn get_item(&self, id: i32) -> Result<Option<DataItem>, sqlx::Error> {
        observe_query(&self.metrics, "select", async {
            sqlx::query_as::<_, DataItem>(
                r#"
                SELECT id, name, email, message, created_at, updated_at
                FROM user_data
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
        })
        .await
    }

    /// Delete an item; returns whether a row was removed.
    pub async fn delete_item(&self, id: i32) -> Result<bool, sqlx::Error> {
        observe_query(&self.metrics, "delete", async {
            sqlx::query("DELETE FROM user_data WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map(|done| done.rows_affected() > 0)
        })
        .await
    }
}
