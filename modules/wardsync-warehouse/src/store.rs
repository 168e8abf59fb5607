use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, QueryBuilder, Row};
use tracing::{info, warn};
use uuid::Uuid;

use wardsync_common::EXTRACTION_FLOOR;

/// Tables the generic load operations may touch. Table names are spliced
/// into SQL, so they come from this list, never from input.
const RECORD_TABLES: [&str; 4] = [
    "sessions",
    "patient_training_sessions",
    "nurse_training_sessions",
    "nurses",
];

/// Rows per INSERT statement. Keeps well under the Postgres bind limit.
const INSERT_BATCH: usize = 1000;

/// Warehouse contention retry policy: fixed attempts, fixed sleep.
const MAX_ATTEMPTS: u32 = 5;
const RETRY_SLEEP: Duration = Duration::from_secs(5);

/// SQLSTATEs treated as transient contention (serialization failure,
/// deadlock detected). Everything else propagates immediately.
const CONTENTION_SQLSTATES: [&str; 2] = ["40001", "40P01"];

/// Load disposition for a record table, mirroring the warehouse API the
/// pipelines were written against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Append rows to whatever is already there.
    Append,
    /// Truncate the table, then write.
    Truncate,
    /// Fail if the table already has rows.
    Empty,
}

fn is_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .as_deref()
            .is_some_and(|code| CONTENTION_SQLSTATES.contains(&code)),
        _ => false,
    }
}

/// Run a warehouse statement, retrying transient contention with a fixed
/// sleep. The warehouse occasionally rejects concurrent watermark updates;
/// a handful of spaced retries has always been enough.
pub async fn exec_with_retry<T, F, Fut>(op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_contention(&err) && attempt < MAX_ATTEMPTS => {
                warn!(attempt, error = %err, "Warehouse contention, retrying");
                tokio::time::sleep(RETRY_SLEEP).await;
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Record-table load operations: fixed column lists, explicit dispositions,
/// the keep-latest nurse merge, and the roster seed.
#[derive(Clone)]
pub struct WarehouseStore {
    pool: PgPool,
}

struct RecordRow {
    username: Option<String>,
    payload: Value,
    md5: String,
    extracted_at: DateTime<Utc>,
    extracted_uuid: Uuid,
}

fn lift_columns(rows: &[Value]) -> Result<Vec<RecordRow>> {
    rows.iter()
        .map(|row| {
            let obj = row
                .as_object()
                .ok_or_else(|| anyhow!("record is not a JSON object"))?;
            let md5 = obj
                .get("md5")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("record missing content hash"))?
                .to_string();
            let extracted_at = obj
                .get("_extracted_at")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("record missing _extracted_at"))?;
            let extracted_at = DateTime::parse_from_rfc3339(extracted_at)
                .context("invalid _extracted_at")?
                .with_timezone(&Utc);
            let extracted_uuid = obj
                .get("_extracted_uuid")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("record missing _extracted_uuid"))?;
            let extracted_uuid =
                Uuid::parse_str(extracted_uuid).context("invalid _extracted_uuid")?;
            let username = obj
                .get("username")
                .and_then(Value::as_str)
                .map(str::to_string);
            Ok(RecordRow {
                username,
                payload: row.clone(),
                md5,
                extracted_at,
                extracted_uuid,
            })
        })
        .collect()
}

impl WarehouseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn check_table(table: &str) -> Result<()> {
        if RECORD_TABLES.contains(&table) {
            Ok(())
        } else {
            bail!("unknown record table: {table}")
        }
    }

    pub async fn table_row_count(&self, table: &str) -> Result<i64> {
        Self::check_table(table)?;
        let row = sqlx::query(&format!("SELECT count(*) AS n FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// Latest session date already loaded, for export window resolution.
    /// None when the table is empty.
    pub async fn max_session_date(&self, table: &str, date_field: &str) -> Result<Option<chrono::NaiveDate>> {
        Self::check_table(table)?;
        // date fields arrive as dd-mm-YYYY strings inside the payload
        let sql = format!(
            "SELECT max(to_date(payload->>'{date_field}', 'DD-MM-YYYY')) AS d FROM {table}"
        );
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(row.get("d"))
    }

    /// Load rows into a record table under the given disposition.
    /// Rows must already carry content hash and provenance columns.
    pub async fn load(&self, table: &str, rows: &[Value], disposition: Disposition) -> Result<u64> {
        Self::check_table(table)?;

        match disposition {
            Disposition::Append => {}
            Disposition::Truncate => {
                exec_with_retry(|| async {
                    let sql = format!("TRUNCATE {table}");
                    sqlx::query(&sql).execute(&self.pool).await
                })
                .await?;
            }
            Disposition::Empty => {
                if self.table_row_count(table).await? > 0 {
                    bail!("table {table} is not empty (WRITE_EMPTY disposition)");
                }
            }
        }

        let lifted = lift_columns(rows)?;
        let mut written = 0u64;
        for batch in lifted.chunks(INSERT_BATCH) {
            written += exec_with_retry(|| async {
                let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(format!(
                    "INSERT INTO {table} (username, payload, md5, _extracted_at, _extracted_uuid) "
                ));
                qb.push_values(batch, |mut b, row| {
                    b.push_bind(row.username.as_deref())
                        .push_bind(&row.payload)
                        .push_bind(&row.md5)
                        .push_bind(row.extracted_at)
                        .push_bind(row.extracted_uuid);
                });
                let result = qb.build().execute(&self.pool).await?;
                Ok(result.rows_affected())
            })
            .await?;
        }

        info!(table, rows = written, "Loaded rows into warehouse");
        Ok(written)
    }

    /// Merge new nurse profiles, keeping only the latest row per username.
    ///
    /// Runs as one transaction (insert, then prune older duplicates) so two
    /// concurrent merges cannot interleave a read-modify-write the way the
    /// old read-concat-truncate version could.
    pub async fn merge_latest_nurses(&self, rows: &[Value]) -> Result<u64> {
        let lifted = lift_columns(rows)?;

        let written = exec_with_retry(|| async {
            let mut tx = self.pool.begin().await?;

            let mut written = 0u64;
            for batch in lifted.chunks(INSERT_BATCH) {
                let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
                    "INSERT INTO nurses (username, payload, md5, _extracted_at, _extracted_uuid) ",
                );
                qb.push_values(batch, |mut b, row| {
                    b.push_bind(row.username.as_deref())
                        .push_bind(&row.payload)
                        .push_bind(&row.md5)
                        .push_bind(row.extracted_at)
                        .push_bind(row.extracted_uuid);
                });
                written += qb.build().execute(&mut *tx).await?.rows_affected();
            }

            // Keep the newest row per username; uuid breaks extracted_at ties.
            sqlx::query(
                "DELETE FROM nurses a
                 USING nurses b
                 WHERE a.username = b.username
                   AND (a._extracted_at, a._extracted_uuid)
                     < (b._extracted_at, b._extracted_uuid)",
            )
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(written)
        })
        .await?;

        info!(rows = written, "Merged nurse profiles (latest per username)");
        Ok(written)
    }

    /// Seed the sync roster from an initial batch of user records. Fails if
    /// the roster already has rows; duplicate usernames keep the first
    /// occurrence. Watermarks start at the extraction floor.
    pub async fn seed_users(&self, users: &[Value]) -> Result<u64> {
        let count: i64 = sqlx::query("SELECT count(*) AS n FROM users")
            .fetch_one(&self.pool)
            .await?
            .get("n");
        if count > 0 {
            bail!("users table is not empty (WRITE_EMPTY disposition)");
        }

        let mut written = 0u64;
        for user in users {
            let username = user
                .get("username")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("user record missing username"))?;
            let result = sqlx::query(
                "INSERT INTO users (username, profile, max_todate)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (username) DO NOTHING",
            )
            .bind(username)
            .bind(user)
            .bind(EXTRACTION_FLOOR)
            .execute(&self.pool)
            .await?;
            written += result.rows_affected();
        }

        info!(rows = written, "Seeded sync roster");
        Ok(written)
    }
}
