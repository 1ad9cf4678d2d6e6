use std::path::Path;

use sqlx::sqlite::SqlitePool;
use tracing::{debug, info};

use crate::error::{ErrorKind, NotaryResult};
use crate::sink::base::RecordSink;
use crate::types::{SignedBatch, SignedRecord};
use crate::{bail, db, notary_error};

const CREATE_SIGNED_TABLE: &str = "CREATE TABLE IF NOT EXISTS signed \
    (id INTEGER PRIMARY KEY, signature CHAR(128), signer CHAR(88))";

/// Record sink backed by the `signed` table of a SQLite database.
///
/// Each batch is written inside one transaction, so a failing row leaves the table as it was
/// before the batch.
#[derive(Debug, Clone)]
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    /// Opens the database at `path` and creates the `signed` table when missing.
    pub async fn connect(path: impl AsRef<Path>) -> NotaryResult<Self> {
        let path = path.as_ref();
        let pool = db::connect(path).await.map_err(|err| {
            notary_error!(
                ErrorKind::SinkQueryFailed,
                "Failed to open the sink database",
                format!("{}: {err}", path.display()),
                source: err
            )
        })?;

        let sink = Self { pool };
        sink.create_table().await?;

        Ok(sink)
    }

    async fn create_table(&self) -> NotaryResult<()> {
        sqlx::query(CREATE_SIGNED_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|err| {
                notary_error!(
                    ErrorKind::SinkQueryFailed,
                    "Failed to create the signed table",
                    err.to_string(),
                    source: err
                )
            })?;

        Ok(())
    }

    /// Drops every signed record by recreating the `signed` table.
    pub async fn reset(&self) -> NotaryResult<()> {
        info!("resetting the signed table");

        sqlx::query("DROP TABLE IF EXISTS signed")
            .execute(&self.pool)
            .await
            .map_err(|err| {
                notary_error!(
                    ErrorKind::SinkQueryFailed,
                    "Failed to drop the signed table",
                    err.to_string(),
                    source: err
                )
            })?;

        self.create_table().await
    }

    /// Number of rows in the `signed` table.
    pub async fn count(&self) -> NotaryResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM signed")
            .fetch_one(&self.pool)
            .await
            .map_err(|err| {
                notary_error!(
                    ErrorKind::SinkQueryFailed,
                    "Failed to count signed records",
                    err.to_string(),
                    source: err
                )
            })?;

        Ok(count as u64)
    }

    /// Returns every signed record ordered by id.
    pub async fn signed_records(&self) -> NotaryResult<Vec<SignedRecord>> {
        let rows: Vec<(i64, String, String)> =
            sqlx::query_as("SELECT id, signature, signer FROM signed ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(|err| {
                    notary_error!(
                        ErrorKind::SinkQueryFailed,
                        "Failed to read signed records",
                        err.to_string(),
                        source: err
                    )
                })?;

        Ok(rows
            .into_iter()
            .map(|(id, signature, signer)| SignedRecord {
                id,
                signature,
                signer,
            })
            .collect())
    }
}

impl RecordSink for SqliteSink {
    fn name() -> &'static str {
        "sqlite"
    }

    async fn write_signed_batch(&self, batch: SignedBatch) -> NotaryResult<()> {
        let mut tx = self.pool.begin().await.map_err(|err| {
            notary_error!(
                ErrorKind::SinkQueryFailed,
                "Failed to begin the batch transaction",
                err.to_string(),
                source: err
            )
        })?;

        for record in &batch {
            let result = sqlx::query("INSERT INTO signed (id, signature, signer) VALUES (?, ?, ?)")
                .bind(record.id)
                .bind(&record.signature)
                .bind(&record.signer)
                .execute(&mut *tx)
                .await
                .map_err(|err| {
                    notary_error!(
                        ErrorKind::SinkQueryFailed,
                        "Failed to insert a signed record",
                        format!("record {}: {err}", record.id),
                        source: err
                    )
                })?;

            // Dropping `tx` on the way out rolls the batch back.
            if result.rows_affected() != 1 {
                bail!(
                    ErrorKind::SinkWriteFailed,
                    "Insert did not affect exactly one row",
                    format!("record {}", record.id)
                );
            }
        }

        tx.commit().await.map_err(|err| {
            notary_error!(
                ErrorKind::SinkQueryFailed,
                "Failed to commit the batch transaction",
                err.to_string(),
                source: err
            )
        })?;

        debug!(records = batch.len(), "committed signed batch");

        Ok(())
    }
}
