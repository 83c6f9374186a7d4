// src/db/schema.rs

//! Database schema definitions and migrations
//!
//! Defines the SQLite schema for the node cache and stored rules, with a
//! small migration system so the schema can evolve over time.

use crate::error::Result;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

/// Set the schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying schema migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    Ok(())
}

/// Apply a specific migration version
fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        _ => unreachable!("unknown migration version {}", version),
    }
}

/// v1: node cache and rules tables
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE nodes (
            uuid TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            error TEXT,
            bmc_address TEXT
        );

        -- Correlation attributes (BMC address, MACs) pointing back at a
        -- cached node. An attribute value identifies at most one node.
        CREATE TABLE node_attributes (
            name TEXT NOT NULL,
            value TEXT NOT NULL,
            node_uuid TEXT NOT NULL REFERENCES nodes(uuid) ON DELETE CASCADE,
            PRIMARY KEY (name, value)
        );
        CREATE INDEX idx_node_attributes_node ON node_attributes(node_uuid);

        CREATE TABLE rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            description TEXT,
            conditions TEXT NOT NULL,
            actions TEXT NOT NULL,
            conditions_join_type TEXT NOT NULL DEFAULT 'and',
            invert_conditions_outcome INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );",
    )?;
    Ok(())
}
