//! SurrealDB schema initialization
//!
//! Safe to call on every connection: every definition is `IF NOT EXISTS`.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::storage_traits::StorageResult;

/// Initialize all prflow tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    info!("Initializing prflow SurrealDB schema");
    init_workflows_table(db).await?;
    Ok(())
}

/// Initialize `workflows` table with indexes
///
/// Schema:
/// ```text
/// TABLE workflows {
///   workflow_id:   STRING (unique)
///   pr_id:         STRING (indexed)
///   state:         STRING (indexed)
///   started_at:    DATETIME (indexed)
///   completed_at:  DATETIME?
///   payload:       OBJECT
/// }
/// ```
async fn init_workflows_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing workflows table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS workflows SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_workflow_id ON TABLE workflows COLUMNS workflow_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_pr_id ON TABLE workflows COLUMNS pr_id;
        DEFINE INDEX IF NOT EXISTS idx_state ON TABLE workflows COLUMNS state;
        DEFINE INDEX IF NOT EXISTS idx_started_at ON TABLE workflows COLUMNS started_at;
    "#;

    db.query(sql)
        .await
        .and_then(|res| res.check())
        .map_err(|e| StorageError::SchemaSetup(e.to_string()))?;
    Ok(())
}
