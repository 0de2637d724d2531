// Database connection and pool management
// Handles SQLite connections for the canonical store and run ledger using sqlx

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Create database file directory if it doesn't exist
        let db_path = if database_url.starts_with("sqlite://") {
            database_url.trim_start_matches("sqlite://")
        } else if database_url.starts_with("sqlite:") {
            database_url.trim_start_matches("sqlite:")
        } else {
            database_url
        };

        if db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if !Path::new(db_path).exists() {
                std::fs::File::create(db_path)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_canonical_records_sql = r#"
            CREATE TABLE IF NOT EXISTS canonical_records (
                source TEXT NOT NULL,
                entity TEXT NOT NULL,
                natural_key TEXT NOT NULL,
                snapshot_date DATE,
                attributes TEXT NOT NULL,
                first_seen_at DATETIME NOT NULL,
                fetched_at DATETIME NOT NULL,
                PRIMARY KEY (source, entity, natural_key)
            )
        "#;

        let create_sync_logs_sql = r#"
            CREATE TABLE IF NOT EXISTS sync_logs (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                sync_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'running',
                requested_start DATE NOT NULL,
                requested_end DATE NOT NULL,
                window_count INTEGER NOT NULL DEFAULT 0,
                windows_processed INTEGER NOT NULL DEFAULT 0,
                windows_failed INTEGER NOT NULL DEFAULT 0,
                records_fetched INTEGER NOT NULL DEFAULT 0,
                records_saved INTEGER NOT NULL DEFAULT 0,
                records_updated INTEGER NOT NULL DEFAULT 0,
                records_rejected INTEGER NOT NULL DEFAULT 0,
                window_outcomes TEXT,
                error_details TEXT,
                started_at DATETIME NOT NULL,
                completed_at DATETIME,
                duration_seconds REAL NOT NULL DEFAULT 0
            )
        "#;

        let create_validation_failures_sql = r#"
            CREATE TABLE IF NOT EXISTS validation_failures (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                entity TEXT NOT NULL,
                natural_key TEXT NOT NULL DEFAULT '',
                reason TEXT NOT NULL,
                payload_excerpt TEXT NOT NULL DEFAULT '',
                occurred_at DATETIME NOT NULL
            )
        "#;

        let create_sync_status_sql = r#"
            CREATE TABLE IF NOT EXISTS sync_status (
                source_name TEXT PRIMARY KEY,
                source_type TEXT NOT NULL,
                last_sync_attempt DATETIME,
                last_successful_sync DATETIME,
                sync_status TEXT,
                sync_duration_seconds REAL NOT NULL DEFAULT 0,
                records_synced INTEGER NOT NULL DEFAULT 0,
                records_failed INTEGER NOT NULL DEFAULT 0,
                error_count INTEGER NOT NULL DEFAULT 0,
                first_error_at DATETIME,
                last_error TEXT,
                is_healthy BOOLEAN NOT NULL DEFAULT 1,
                health_score INTEGER NOT NULL DEFAULT 100,
                data_lag_hours REAL NOT NULL DEFAULT 0,
                updated_at DATETIME NOT NULL
            )
        "#;

        let create_indexes_sql = [
            "CREATE INDEX IF NOT EXISTS idx_canonical_records_snapshot_date ON canonical_records (snapshot_date)",
            "CREATE INDEX IF NOT EXISTS idx_canonical_records_source_entity ON canonical_records (source, entity)",
            "CREATE INDEX IF NOT EXISTS idx_sync_logs_source ON sync_logs (source, started_at)",
            "CREATE INDEX IF NOT EXISTS idx_sync_logs_status ON sync_logs (status)",
            "CREATE INDEX IF NOT EXISTS idx_validation_failures_source ON validation_failures (source, occurred_at)",
        ];

        sqlx::query(create_canonical_records_sql)
            .execute(&self.pool)
            .await?;
        sqlx::query(create_sync_logs_sql).execute(&self.pool).await?;
        sqlx::query(create_validation_failures_sql)
            .execute(&self.pool)
            .await?;
        sqlx::query(create_sync_status_sql)
            .execute(&self.pool)
            .await?;
        for sql in create_indexes_sql {
            sqlx::query(sql).execute(&self.pool).await?;
        }

        Ok(())
    }
}
