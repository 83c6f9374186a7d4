// src/db/nodes.rs

//! Node cache model
//!
//! One row per introspection session, created at registration time and
//! closed when the run finishes (or times out). Correlation attributes
//! (BMC address, MAC addresses) live in a side table so a payload can be
//! matched back to its node by any of them.

use crate::error::{Error, Result};
use crate::inventory::normalize_mac;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, warn};

/// Attribute names used for correlation.
pub const ATTR_BMC_ADDRESS: &str = "bmc_address";
pub const ATTR_MAC: &str = "mac";

/// One cached introspection session.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub uuid: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub bmc_address: Option<String>,
}

impl NodeInfo {
    /// Seconds elapsed since the session started.
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.started_at)
    }

    /// Register a node for introspection. Replaces any previous session
    /// for the same uuid; attributes already pointing at another node are
    /// re-pointed, since registration is authoritative.
    pub fn add(
        conn: &Connection,
        uuid: &str,
        bmc_address: Option<&str>,
        macs: &[String],
    ) -> Result<NodeInfo> {
        let started_at = Utc::now();

        let replaced = conn.execute("DELETE FROM nodes WHERE uuid = ?1", [uuid])?;
        if replaced > 0 {
            debug!("Replacing previous introspection session for node {}", uuid);
        }

        conn.execute(
            "INSERT INTO nodes (uuid, started_at, bmc_address) VALUES (?1, ?2, ?3)",
            params![uuid, started_at.to_rfc3339(), bmc_address],
        )?;

        if let Some(bmc) = bmc_address {
            conn.execute(
                "INSERT OR REPLACE INTO node_attributes (name, value, node_uuid)
                 VALUES (?1, ?2, ?3)",
                params![ATTR_BMC_ADDRESS, bmc, uuid],
            )?;
        }
        for mac in macs {
            conn.execute(
                "INSERT OR REPLACE INTO node_attributes (name, value, node_uuid)
                 VALUES (?1, ?2, ?3)",
                params![ATTR_MAC, normalize_mac(mac), uuid],
            )?;
        }

        Ok(NodeInfo {
            uuid: uuid.to_string(),
            started_at,
            finished_at: None,
            error: None,
            bmc_address: bmc_address.map(str::to_string),
        })
    }

    /// Fetch one session by node uuid.
    pub fn get(conn: &Connection, uuid: &str) -> Result<Option<NodeInfo>> {
        conn.query_row(
            "SELECT uuid, started_at, finished_at, error, bmc_address
             FROM nodes WHERE uuid = ?1",
            [uuid],
            Self::from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Correlate a payload with an active (unfinished) session by BMC
    /// address or by any of the given MACs.
    ///
    /// Returns `Ok(None)` when nothing matches. More than one match means
    /// the attributes are ambiguous, which is an error rather than a
    /// guess.
    pub fn find_by_attributes(
        conn: &Connection,
        bmc_address: Option<&str>,
        macs: &[String],
    ) -> Result<Option<NodeInfo>> {
        let mut sql = String::from(
            "SELECT DISTINCT n.uuid FROM nodes n
             JOIN node_attributes a ON a.node_uuid = n.uuid
             WHERE n.finished_at IS NULL AND (",
        );
        let mut clauses = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(bmc) = bmc_address {
            values.push(bmc.to_string());
            clauses.push(format!(
                "(a.name = '{}' AND a.value = ?{})",
                ATTR_BMC_ADDRESS,
                values.len()
            ));
        }
        if !macs.is_empty() {
            let placeholders: Vec<String> = macs
                .iter()
                .map(|mac| {
                    values.push(normalize_mac(mac));
                    format!("?{}", values.len())
                })
                .collect();
            clauses.push(format!(
                "(a.name = '{}' AND a.value IN ({}))",
                ATTR_MAC,
                placeholders.join(", ")
            ));
        }

        if clauses.is_empty() {
            return Ok(None);
        }
        sql.push_str(&clauses.join(" OR "));
        sql.push(')');

        let mut stmt = conn.prepare(&sql)?;
        let uuids: Vec<String> = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;

        match uuids.as_slice() {
            [] => Ok(None),
            [uuid] => Self::get(conn, uuid),
            many => Err(Error::NotRegistered(format!(
                "{} cached nodes match the given attributes",
                many.len()
            ))),
        }
    }

    /// Close a session, recording the failure reason if any.
    pub fn finish(conn: &Connection, uuid: &str, error: Option<&str>) -> Result<()> {
        conn.execute(
            "UPDATE nodes SET finished_at = ?1, error = ?2 WHERE uuid = ?3",
            params![Utc::now().to_rfc3339(), error, uuid],
        )?;
        Ok(())
    }

    /// Close sessions that started before `cutoff` and never finished.
    /// Returns the affected node uuids.
    pub fn clean_up(conn: &Connection, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT uuid FROM nodes WHERE finished_at IS NULL AND started_at < ?1",
        )?;
        let stale: Vec<String> = stmt
            .query_map([cutoff.to_rfc3339()], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;

        for uuid in &stale {
            warn!("Introspection session for node {} timed out", uuid);
            Self::finish(conn, uuid, Some("Introspection timeout"))?;
        }

        Ok(stale)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<NodeInfo> {
        let started_at: String = row.get(1)?;
        let finished_at: Option<String> = row.get(2)?;
        Ok(NodeInfo {
            uuid: row.get(0)?,
            started_at: parse_timestamp(&started_at),
            finished_at: finished_at.as_deref().map(parse_timestamp),
            error: row.get(3)?,
            bmc_address: row.get(4)?,
        })
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
