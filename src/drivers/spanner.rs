//! Cloud Spanner binding.
//!
//! A lock is a row in a table shaped like:
//!
//! ```sql
//! CREATE TABLE locks (
//!     name STRING(MAX) NOT NULL,
//!     writer STRING(MAX),
//!     token TIMESTAMP OPTIONS (allow_commit_timestamp=true),
//! ) PRIMARY KEY (name)
//! ```
//!
//! Acquiring inserts the row (Spanner rejects the insert if the primary key
//! exists), releasing deletes it. `writer` and `token` are only there for
//! whoever is looking at the table.

use crate::driver::Driver;
use crate::error::LockError;
use google_cloud_spanner::client::Client;
use google_cloud_spanner::client::ClientConfig;
use google_cloud_spanner::statement::Statement;
use log::*;
use std::fmt::Write as _;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::runtime::Runtime;
use uuid::Uuid;

pub fn get_spanner_client(rt: &Runtime, db: String) -> anyhow::Result<Client> {
    rt.block_on(async {
        let config = ClientConfig::default().with_auth().await?;
        let client = Client::new(db, config).await?;
        Ok::<_, anyhow::Error>(client)
    })
}

/// Driver backed by a Spanner table. Owns its own tokio runtime so the
/// blocking [`Driver`] calls can drive the async client.
pub struct SpannerDriver {
    table: String,
    id: String,
    rt: Runtime,
    client: Option<Client>,
}

impl SpannerDriver {
    pub fn builder() -> SpannerDriverBuilder {
        SpannerDriverBuilder::default()
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Runs one DML statement in a read-write transaction and returns the
    /// affected row count.
    fn exec(&self, stmt: Statement) -> anyhow::Result<i64> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("spanner client closed"))?;

        self.rt.block_on(async {
            let mut tx = client.begin_read_write_transaction().await?;
            let res = tx.update(stmt).await;
            let (ts, count) = tx.end(res, None).await?;
            if let Some(ts) = ts {
                if let Some(dt) = OffsetDateTime::from_unix_timestamp(ts.seconds)
                    .ok()
                    .and_then(|dt| dt.replace_nanosecond(ts.nanos as u32).ok())
                {
                    debug!("commit_timestamp: {dt}");
                }
            }

            Ok::<_, anyhow::Error>(count)
        })
    }
}

impl Driver for SpannerDriver {
    fn acquire(&self, key: &str) -> Result<(), LockError> {
        let start = Instant::now();
        let mut q = String::new();
        let _ = write!(&mut q, "insert into {} (name, writer, token) ", self.table);
        let _ = write!(&mut q, "values (@name, @writer, PENDING_COMMIT_TIMESTAMP())");
        let mut stmt = Statement::new(q);
        let name = key.to_string();
        stmt.add_param("name", &name);
        stmt.add_param("writer", &self.id);

        let res = self.exec(stmt);
        info!("acquire({key}) took {:?}", start.elapsed());
        match res {
            Ok(1) => Ok(()),
            Ok(n) => Err(LockError::acquire_with(
                key,
                format!("insert affected {n} rows"),
            )),
            Err(e) => Err(LockError::acquire_with(key, e)),
        }
    }

    fn release(&self, key: &str) -> Result<(), LockError> {
        let start = Instant::now();
        let mut q = String::new();
        let _ = write!(&mut q, "delete from {} ", self.table);
        let _ = write!(&mut q, "where name = @name");
        let mut stmt = Statement::new(q);
        let name = key.to_string();
        stmt.add_param("name", &name);

        let res = self.exec(stmt);
        info!("release({key}) took {:?}", start.elapsed());
        match res {
            Ok(1) => Ok(()),
            Ok(0) => Err(LockError::release(key)),
            Ok(n) => Err(LockError::release_with(
                key,
                format!("delete affected {n} rows"),
            )),
            Err(e) => Err(LockError::release_with(key, e)),
        }
    }
}

impl Drop for SpannerDriver {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.rt.block_on(async { client.close().await });
        }
    }
}

#[derive(Default)]
pub struct SpannerDriverBuilder {
    db: String,
    table: String,
    id: String,
}

impl SpannerDriverBuilder {
    pub fn new() -> SpannerDriverBuilder {
        SpannerDriverBuilder::default()
    }

    /// Database path, `projects/{p}/instances/{i}/databases/{d}`.
    pub fn db(mut self, db: String) -> SpannerDriverBuilder {
        self.db = db;
        self
    }

    pub fn table(mut self, table: String) -> SpannerDriverBuilder {
        self.table = table;
        self
    }

    /// Written to the `writer` column; a random UUID when unset.
    pub fn id(mut self, id: String) -> SpannerDriverBuilder {
        self.id = id;
        self
    }

    /// Connects to Spanner. Credentials are resolved the usual Google way
    /// (`GOOGLE_APPLICATION_CREDENTIALS`, metadata server, ...).
    pub fn build(self) -> anyhow::Result<SpannerDriver> {
        anyhow::ensure!(!self.db.is_empty(), "spanner database not set");
        anyhow::ensure!(!self.table.is_empty(), "spanner table not set");
        let id = if self.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            self.id
        };

        info!("spanner driver: table={}, id={id}", self.table);
        let rt = Runtime::new()?;
        let client = get_spanner_client(&rt, self.db)?;
        Ok(SpannerDriver {
            table: self.table,
            id,
            rt,
            client: Some(client),
        })
    }
}
