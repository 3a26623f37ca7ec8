//! Embedded schema migrations.

use std::borrow::Cow;

use sqlx_core::migrate::{Migration, MigrationType, Migrator};
use tracing::{info, instrument};

use crate::{PgPool, StorageError, StorageResult};

/// (version, description, sql) in apply order.
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    20250301000001,
    "auth_schema",
    include_str!("../migrations/20250301000001_auth_schema.sql"),
)];

fn build_migrations() -> Vec<Migration> {
    MIGRATIONS
        .iter()
        .map(|(version, description, sql)| Migration {
            version: *version,
            description: Cow::Borrowed(description),
            migration_type: MigrationType::Simple,
            sql: Cow::Borrowed(sql),
            checksum: Cow::Borrowed(&[]),
            no_tx: false,
        })
        .collect()
}

/// Runs all pending migrations. Applied versions are tracked in
/// `_sqlx_migrations`.
///
/// # Errors
///
/// Returns `Migration` if a migration fails to execute.
#[instrument(skip(pool))]
pub async fn run(pool: &PgPool) -> StorageResult<()> {
    let migrations = build_migrations();
    info!(count = migrations.len(), "Running auth schema migrations");

    let migrator = Migrator {
        migrations: Cow::Owned(migrations),
        ignore_missing: false,
        locking: true,
        no_tx: false,
    };
    migrator
        .run(pool)
        .await
        .map_err(|e| StorageError::Migration(e.to_string()))?;

    info!("Auth schema migrations completed");
    Ok(())
}
