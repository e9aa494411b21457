use anyhow::Result;
use sqlx::{Executor, PgPool};
use tracing::info;

use crate::error::Error;

/// Embedded migrations, applied in order. Every statement is idempotent.
const MIGRATIONS: &[(&str, &str)] = &[(
    "001_create_license_plates.sql",
    include_str!("sql/001_create_license_plates.sql"),
)];

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for (name, sql) in MIGRATIONS {
        pool.execute(*sql)
            .await
            .map_err(|e| Error::Database(format!("Migration {} failed: {}", name, e)))?;
        info!("Applied migration: {}", name);
    }

    Ok(())
}
