//! Automatic record-table maintenance
//!
//! Each object type owns one table whose shape is derived from its
//! normalized schema. Startup creates missing tables with
//! `CREATE TABLE IF NOT EXISTS`, then adds any missing columns via
//! `ALTER TABLE ADD COLUMN` so pre-existing databases migrate in place
//! without touching existing rows. GPS, file-list and capture-context
//! columns always exist regardless of whether GPS capture is enabled, so
//! databases remain interchangeable between configurations.

use crate::schema::ObjectTypeSchema;
use crate::Result;
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

/// Column definition for the dynamic record tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    /// SQL type (e.g. "TEXT", "INTEGER", "REAL")
    pub sql_type: String,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
        }
    }
}

/// System columns shared by every record table, in DDL order.
/// `id` is excluded; it is declared separately as the primary key.
fn system_columns() -> Vec<ColumnDefinition> {
    vec![
        ColumnDefinition::new("meta_signature", "TEXT"),
        ColumnDefinition::new("images_json", "TEXT"),
        ColumnDefinition::new("thumbs_json", "TEXT"),
        ColumnDefinition::new("webps_json", "TEXT"),
        ColumnDefinition::new("json_files_json", "TEXT"),
        ColumnDefinition::new("gps_lat", "REAL"),
        ColumnDefinition::new("gps_lon", "REAL"),
        ColumnDefinition::new("gps_alt", "REAL"),
        ColumnDefinition::new("gps_acc", "REAL"),
        ColumnDefinition::new("img_width", "INTEGER"),
        ColumnDefinition::new("img_height", "INTEGER"),
        ColumnDefinition::new("captured_at", "TEXT"),
        ColumnDefinition::new("client_ip", "TEXT"),
        ColumnDefinition::new("user_agent", "TEXT"),
        ColumnDefinition::new("exif_json", "TEXT"),
        ColumnDefinition::new("date_last_saved", "TEXT"),
    ]
}

/// Expected columns for an object type's table, excluding `id`
pub fn expected_columns(schema: &ObjectTypeSchema) -> Vec<ColumnDefinition> {
    let mut columns: Vec<ColumnDefinition> = schema
        .fields
        .iter()
        .map(|f| ColumnDefinition::new(f.column.clone(), f.kind.sql_type()))
        .collect();
    columns.extend(system_columns());
    columns
}

/// Check if a table exists
pub async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name = ?
        )
        "#,
    )
    .bind(table_name)
    .fetch_one(pool)
    .await?;

    Ok(exists)
}

/// Read actual column names from a table via PRAGMA table_info
pub async fn table_columns(pool: &SqlitePool, table_name: &str) -> Result<Vec<String>> {
    let query = format!("PRAGMA table_info({})", table_name);
    let rows = sqlx::query(&query).fetch_all(pool).await?;
    Ok(rows.iter().map(|row| row.get("name")).collect())
}

/// Create the table if missing, then add any missing columns
pub async fn ensure_table(pool: &SqlitePool, schema: &ObjectTypeSchema) -> Result<()> {
    create_table(pool, schema).await?;
    sync_table(pool, schema).await
}

async fn create_table(pool: &SqlitePool, schema: &ObjectTypeSchema) -> Result<()> {
    let mut decls = vec!["id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
    decls.extend(
        expected_columns(schema)
            .iter()
            .map(|c| format!("\"{}\" {}", c.name, c.sql_type)),
    );

    let ddl = format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        schema.otype,
        decls.join(", ")
    );
    sqlx::query(&ddl).execute(pool).await?;
    Ok(())
}

/// Add columns missing from an existing table. Never removes or retypes
/// columns; extra columns from older configurations are left alone.
async fn sync_table(pool: &SqlitePool, schema: &ObjectTypeSchema) -> Result<()> {
    let actual = table_columns(pool, &schema.otype).await?;

    let mut added = 0;
    for column in expected_columns(schema) {
        if actual.iter().any(|name| name == &column.name) {
            continue;
        }
        add_column(pool, &schema.otype, &column).await?;
        added += 1;
    }

    if added > 0 {
        info!("Schema sync: added {} column(s) to '{}'", added, schema.otype);
    }
    Ok(())
}

async fn add_column(pool: &SqlitePool, table: &str, column: &ColumnDefinition) -> Result<()> {
    let sql = format!(
        "ALTER TABLE {} ADD COLUMN \"{}\" {}",
        table, column.name, column.sql_type
    );

    info!("  Adding column: {}.{} ({})", table, column.name, column.sql_type);

    match sqlx::query(&sql).execute(pool).await {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) if db_err.message().contains("duplicate column") => {
            // Concurrent initialization - column added by another connection
            warn!("  Column {}.{} already added", table, column.name);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
