//! PostgreSQL batch loader
//!
//! Each batch becomes one transaction holding multi-row `INSERT`s into
//! `user_logins`. The transaction commits only after every row is accepted.

use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnectOptions, PgConnection},
    Connection, PgExecutor, Postgres, QueryBuilder,
};
use tracing::{debug, info, instrument, warn};

use super::BatchLoader;
use crate::config::DatabaseConfig;
use crate::error::{EtlResult, LoadError};
use crate::event::NormalizedRecord;

const INSERT_USER_LOGINS: &str = "INSERT INTO user_logins \
    (user_id, device_type, masked_ip, masked_device_id, locale, app_version, create_date) ";

/// Bind parameters per row.
const COLUMNS_PER_ROW: usize = 7;

/// PostgreSQL caps a statement at 65535 bind parameters.
pub const MAX_ROWS_PER_STATEMENT: usize = u16::MAX as usize / COLUMNS_PER_ROW;

/// Batch loader holding the daemon's single database connection
pub struct PgBatchLoader {
    conn: Option<PgConnection>,
}

impl PgBatchLoader {
    /// Open the connection described by `config`
    pub async fn connect(config: &DatabaseConfig) -> EtlResult<Self> {
        let options: PgConnectOptions = config.url.parse()?;

        let conn = tokio::time::timeout(config.connect_timeout(), PgConnection::connect_with(&options))
            .await
            .map_err(|_| {
                sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!(
                        "database connection not established within {}s",
                        config.connect_timeout_secs
                    ),
                ))
            })??;

        info!("Database connection established");

        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: PgConnection) -> Self {
        Self { conn: Some(conn) }
    }
}

#[async_trait]
impl BatchLoader for PgBatchLoader {
    #[instrument(skip_all, fields(records = records.len()))]
    async fn load(&mut self, records: &[NormalizedRecord]) -> Result<u64, LoadError> {
        if records.is_empty() {
            return Ok(0);
        }

        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| LoadError::Rejected("database connection already closed".to_string()))?;

        let mut tx = conn.begin().await?;

        match insert_records(&mut *tx, records).await {
            Ok(inserted) if inserted == records.len() as u64 => {
                tx.commit().await?;
                debug!(inserted, "Batch committed");
                Ok(inserted)
            },
            Ok(inserted) => {
                rollback(tx).await;
                Err(LoadError::Rejected(format!(
                    "store accepted {} of {} rows",
                    inserted,
                    records.len()
                )))
            },
            Err(e) => {
                rollback(tx).await;
                Err(e)
            },
        }
    }

    async fn close(&mut self) -> Result<(), LoadError> {
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
            info!("Database connection closed");
        }
        Ok(())
    }
}

async fn insert_records(
    conn: &mut PgConnection,
    records: &[NormalizedRecord],
) -> Result<u64, LoadError> {
    let mut inserted = 0;

    for chunk in records.chunks(MAX_ROWS_PER_STATEMENT) {
        inserted += insert_chunk(&mut *conn, chunk).await?;
    }

    Ok(inserted)
}

async fn insert_chunk<'e, E>(executor: E, chunk: &[NormalizedRecord]) -> Result<u64, LoadError>
where
    E: PgExecutor<'e>,
{
    let mut builder = QueryBuilder::<Postgres>::new(INSERT_USER_LOGINS);

    builder.push_values(chunk, |mut row, record| {
        row.push_bind(record.user_id())
            .push_bind(record.device_type())
            .push_bind(record.masked_ip())
            .push_bind(record.masked_device_id())
            .push_bind(record.locale())
            .push_bind(record.app_version_major())
            .push_bind(record.create_date());
    });

    let result = builder.build().execute(executor).await?;
    Ok(result.rows_affected())
}

async fn rollback(tx: sqlx::Transaction<'_, Postgres>) {
    if let Err(e) = tx.rollback().await {
        // The server discards the transaction when the connection drops anyway
        warn!(error = %e, "Rollback failed");
    }
}
