// src/db/mod.rs

//! SQLite persistence for the node cache and stored rules
//!
//! Follows a database-first layout: `open` applies schema migrations, the
//! model modules (`nodes`, `rules`) own their SQL, and [`Store`] wraps the
//! connection behind a mutex so concurrent introspection runs serialize
//! their store access. Runs for different nodes only contend here for the
//! duration of single statements.

pub mod nodes;
pub mod rules;
pub mod schema;

pub use nodes::NodeInfo;

use crate::error::{Error, Result};
use crate::rules::Rule;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Open (and migrate) a database at the given path.
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::migrate(&conn)?;
    Ok(conn)
}

/// Open (and migrate) an in-memory database. Used by tests and by
/// deployments that do not need the cache to survive restarts.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::migrate(&conn)?;
    Ok(conn)
}

/// Run `f` inside a database transaction.
pub fn transaction<T>(
    conn: &mut Connection,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    let tx = conn.transaction()?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

/// Shared handle to the node cache and rule storage.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open(path)?),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open_in_memory()?),
        })
    }

    /// Register a node for introspection, replacing any previous session.
    pub fn register_node(
        &self,
        uuid: &str,
        bmc_address: Option<&str>,
        macs: &[String],
    ) -> Result<NodeInfo> {
        let mut conn = self.conn.lock();
        let info = transaction(&mut conn, |tx| NodeInfo::add(tx, uuid, bmc_address, macs))?;
        debug!("Registered node {} for introspection", uuid);
        Ok(info)
    }

    /// Correlate a payload with its registered node. Failing to match is a
    /// `NotRegistered` error, surfaced before anything external is touched.
    pub fn find_node(&self, bmc_address: Option<&str>, macs: &[String]) -> Result<NodeInfo> {
        let conn = self.conn.lock();
        NodeInfo::find_by_attributes(&conn, bmc_address, macs)?.ok_or_else(|| {
            Error::NotRegistered(format!(
                "no introspection session matches bmc_address={:?} macs={:?}",
                bmc_address, macs
            ))
        })
    }

    /// Close a node's session, recording the failure reason if any.
    pub fn finish_node(&self, uuid: &str, error: Option<&str>) -> Result<()> {
        let conn = self.conn.lock();
        NodeInfo::finish(&conn, uuid, error)
    }

    /// Close sessions older than `timeout`, returning the affected uuids.
    /// Meant to be called periodically by the embedding service.
    pub fn clean_up(&self, timeout: Duration) -> Result<Vec<String>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::hours(1));
        let conn = self.conn.lock();
        NodeInfo::clean_up(&conn, cutoff)
    }

    /// All stored rules, in creation order.
    pub fn list_rules(&self) -> Result<Vec<Rule>> {
        let conn = self.conn.lock();
        rules::list(&conn)
    }

    /// Store a rule, filling in its id.
    pub fn add_rule(&self, rule: &mut Rule) -> Result<i64> {
        let conn = self.conn.lock();
        rules::insert(&conn, rule)
    }

    pub fn get_rule(&self, id: i64) -> Result<Option<Rule>> {
        let conn = self.conn.lock();
        rules::get(&conn, id)
    }

    pub fn delete_rule(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        rules::delete(&conn, id)
    }
}
