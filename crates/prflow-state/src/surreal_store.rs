//! SurrealDB-backed WorkflowStore implementation
//!
//! Uses `schema::WorkflowRow` for persistence, converting to/from
//! `storage_traits::WorkflowRecord` at the boundary.

use std::path::Path;

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::migrations;
use crate::schema::WorkflowRow;
use crate::storage_traits::{StorageResult, WorkflowRecord, WorkflowStore};

const NAMESPACE: &str = "prflow";
const DATABASE: &str = "main";

/// SurrealDB-backed implementation of [`WorkflowStore`].
pub struct SurrealWorkflowStore {
    db: Surreal<Any>,
}

impl SurrealWorkflowStore {
    /// Connect to any SurrealDB endpoint (`mem://`, `surrealkv://path`,
    /// `ws://host:port`), select `prflow/main` and initialise the schema.
    pub async fn connect(endpoint: &str) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(endpoint)
            .await
            .map_err(|e| StorageError::Connection(format!("{endpoint}: {e}")))?;

        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!(endpoint = %endpoint, "SurrealWorkflowStore connected");
        Ok(Self { db })
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect("mem://").await
    }

    /// Open (creating if needed) a local on-disk store.
    pub async fn at_path(path: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(path).map_err(|e| {
            StorageError::Connection(format!(
                "Failed to create database directory {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::connect(&format!("surrealkv://{}", path.display())).await
    }

    /// Resolve the store from the environment.
    ///
    /// `SURREALDB_URL` wins; otherwise a local store under `.prflow/db`.
    pub async fn from_env() -> StorageResult<Self> {
        if let Ok(url) = std::env::var("SURREALDB_URL") {
            return Self::connect(&url).await;
        }
        info!("No SURREALDB_URL found, using local persistence in .prflow/db");
        Self::at_path(Path::new(".prflow/db")).await
    }

    async fn select_rows(
        &self,
        sql: &'static str,
        key: Option<String>,
    ) -> StorageResult<Vec<WorkflowRow>> {
        let query = self.db.query(sql);
        let query = match key {
            Some(k) => query.bind(("key", k)),
            None => query,
        };
        let mut res = query
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        res.take(0).map_err(|e| StorageError::Backend(e.to_string()))
    }
}

#[async_trait]
impl WorkflowStore for SurrealWorkflowStore {
    async fn save_workflow(&self, record: WorkflowRecord) -> StorageResult<()> {
        record.validate()?;
        let wid = record.workflow_id.clone();
        let row = WorkflowRow::from(record);

        debug!(workflow_id = %wid, state = %row.state, "saving workflow");

        self.db
            .query("DELETE workflows WHERE workflow_id = $wid; CREATE workflows CONTENT $row;")
            .bind(("wid", wid))
            .bind(("row", row))
            .await
            .and_then(|res| res.check())
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn get_workflow(&self, workflow_id: &str) -> StorageResult<Option<WorkflowRecord>> {
        let rows = self
            .select_rows(
                "SELECT * FROM workflows WHERE workflow_id = $key",
                Some(workflow_id.to_string()),
            )
            .await?;
        Ok(rows.into_iter().next().map(WorkflowRecord::from))
    }

    async fn list_workflows(&self, pr_id: Option<&str>) -> StorageResult<Vec<WorkflowRecord>> {
        let rows = match pr_id {
            Some(pr) => {
                self.select_rows(
                    "SELECT * FROM workflows WHERE pr_id = $key ORDER BY started_at DESC",
                    Some(pr.to_string()),
                )
                .await?
            }
            None => {
                self.select_rows("SELECT * FROM workflows ORDER BY started_at DESC", None)
                    .await?
            }
        };
        Ok(rows.into_iter().map(WorkflowRecord::from).collect())
    }
}
