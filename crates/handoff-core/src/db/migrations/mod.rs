//! Numbered schema migrations.
//!
//! SQL is embedded at compile time. Each migration carries an up and a down
//! script; applied versions are tracked in `schema_migrations`.

use crate::error::{Error, Result};
use rusqlite::{params, Connection};
use tracing::info;

/// A single schema migration.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub up: &'static str,
    pub down: &'static str,
}

/// All migrations, in application order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "sessions",
        up: include_str!("001_sessions.sql"),
        down: include_str!("001_sessions.down.sql"),
    },
    Migration {
        version: 2,
        name: "auxiliary",
        up: include_str!("002_auxiliary.sql"),
        down: include_str!("002_auxiliary.down.sql"),
    },
];

fn ensure_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY NOT NULL,
            name       TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )",
    )?;
    Ok(())
}

/// Versions currently applied, ascending.
pub fn applied_versions(conn: &Connection) -> Result<Vec<u32>> {
    ensure_version_table(conn)?;
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let versions = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<u32>, _>>()?;
    Ok(versions)
}

/// Apply every pending migration in order. Returns how many were applied.
pub fn run_migrations(conn: &mut Connection) -> Result<usize> {
    let applied = applied_versions(conn)?;
    let mut count = 0;

    for migration in MIGRATIONS.iter().filter(|m| !applied.contains(&m.version)) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.up)
            .map_err(|e| Error::migration(migration.version, e.to_string()))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![
                migration.version,
                migration.name,
                chrono::Utc::now().timestamp_millis()
            ],
        )?;
        tx.commit()?;

        info!(version = migration.version, name = migration.name, "Applied migration");
        count += 1;
    }

    Ok(count)
}

/// Roll back every applied migration newer than `target`, newest first.
/// Returns how many were rolled back.
pub fn rollback_to(conn: &mut Connection, target: u32) -> Result<usize> {
    let applied = applied_versions(conn)?;
    let mut count = 0;

    for migration in MIGRATIONS
        .iter()
        .rev()
        .filter(|m| m.version > target && applied.contains(&m.version))
    {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.down)
            .map_err(|e| Error::migration(migration.version, e.to_string()))?;
        tx.execute(
            "DELETE FROM schema_migrations WHERE version = ?1",
            params![migration.version],
        )?;
        tx.commit()?;

        info!(version = migration.version, name = migration.name, "Rolled back migration");
        count += 1;
    }

    Ok(count)
}
