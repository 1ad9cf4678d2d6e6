use std::collections::VecDeque;
use std::path::Path;

use rand::SeedableRng;
use rand::rngs::StdRng;
use sqlx::sqlite::SqlitePool;
use tracing::{debug, info};

use crate::error::{ErrorKind, NotaryResult};
use crate::source::base::RecordSource;
use crate::source::generate::random_message;
use crate::types::Record;
use crate::{bail, db, notary_error};

const CREATE_MESSAGES_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS messages (id INTEGER PRIMARY KEY, size INTEGER, message TEXT)";

/// Record source backed by the `messages` table of a SQLite database.
///
/// Rows are read in id order, `page_size` at a time, continuing after the last id seen so the
/// read never holds a statement open between records.
#[derive(Debug)]
pub struct SqliteSource {
    pool: SqlitePool,
    page_size: usize,
    buffered: VecDeque<Record>,
    last_id: Option<i64>,
    exhausted: bool,
}

impl SqliteSource {
    /// Opens the database at `path` and creates the `messages` table when missing.
    pub async fn connect(path: impl AsRef<Path>, page_size: usize) -> NotaryResult<Self> {
        if page_size == 0 {
            bail!(
                ErrorKind::ConfigError,
                "Source page size must be greater than zero"
            );
        }

        let path = path.as_ref();
        let pool = db::connect(path).await.map_err(|err| {
            notary_error!(
                ErrorKind::SourceQueryFailed,
                "Failed to open the source database",
                format!("{}: {err}", path.display()),
                source: err
            )
        })?;

        sqlx::query(CREATE_MESSAGES_TABLE)
            .execute(&pool)
            .await
            .map_err(|err| {
                notary_error!(
                    ErrorKind::SourceQueryFailed,
                    "Failed to create the messages table",
                    err.to_string(),
                    source: err
                )
            })?;

        Ok(Self {
            pool,
            page_size,
            buffered: VecDeque::with_capacity(page_size),
            last_id: None,
            exhausted: false,
        })
    }

    /// Number of rows in the `messages` table.
    pub async fn count(&self) -> NotaryResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await
            .map_err(|err| {
                notary_error!(
                    ErrorKind::SourceQueryFailed,
                    "Failed to count messages",
                    err.to_string(),
                    source: err
                )
            })?;

        Ok(count as u64)
    }

    pub async fn is_empty(&self) -> NotaryResult<bool> {
        Ok(self.count().await? == 0)
    }

    /// Inserts `count` synthetic messages in a single transaction.
    ///
    /// See [`crate::source::generate`] for how messages are built. Fails without inserting
    /// anything if any row cannot be inserted.
    pub async fn populate(&self, count: usize, max_message_bytes: usize) -> NotaryResult<()> {
        info!(count, max_message_bytes, "populating source with synthetic messages");

        let mut rng = StdRng::from_entropy();
        let mut tx = self.pool.begin().await.map_err(|err| {
            notary_error!(
                ErrorKind::SourceQueryFailed,
                "Failed to begin the populate transaction",
                err.to_string(),
                source: err
            )
        })?;

        for index in 0..count {
            let message = random_message(&mut rng, max_message_bytes);
            let size = message.len();

            let result = sqlx::query("INSERT INTO messages (id, size, message) VALUES (NULL, ?, ?)")
                .bind(size as i64)
                .bind(message)
                .execute(&mut *tx)
                .await
                .map_err(|err| {
                    notary_error!(
                        ErrorKind::SourceQueryFailed,
                        "Failed to insert a synthetic message",
                        format!(
                            "insertion failed at count {index} for message with size {size}: {err}"
                        ),
                        source: err
                    )
                })?;

            if result.rows_affected() != 1 {
                bail!(
                    ErrorKind::SourceQueryFailed,
                    "Insert did not affect exactly one row",
                    format!("insertion failed at count {index} for message with size {size}")
                );
            }
        }

        tx.commit().await.map_err(|err| {
            notary_error!(
                ErrorKind::SourceQueryFailed,
                "Failed to commit the populate transaction",
                err.to_string(),
                source: err
            )
        })?;

        Ok(())
    }

    async fn fetch_page(&mut self) -> NotaryResult<()> {
        let rows: Vec<(i64, Option<String>)> = sqlx::query_as(
            "SELECT id, message FROM messages WHERE id > ? ORDER BY id LIMIT ?",
        )
        .bind(self.last_id.unwrap_or(i64::MIN))
        .bind(self.page_size as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| {
            notary_error!(
                ErrorKind::SourceQueryFailed,
                "Failed to read messages",
                err.to_string(),
                source: err
            )
        })?;

        debug!(rows = rows.len(), after_id = ?self.last_id, "fetched message page");

        if rows.len() < self.page_size {
            self.exhausted = true;
        }

        if let Some((id, _)) = rows.last() {
            self.last_id = Some(*id);
        }

        self.buffered.extend(
            rows.into_iter()
                .map(|(id, message)| Record::new(id, message.unwrap_or_default())),
        );

        Ok(())
    }
}

impl RecordSource for SqliteSource {
    fn name() -> &'static str {
        "sqlite"
    }

    async fn next_record(&mut self) -> NotaryResult<Option<Record>> {
        if self.buffered.is_empty() && !self.exhausted {
            self.fetch_page().await?;
        }

        Ok(self.buffered.pop_front())
    }
}
