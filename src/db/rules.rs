// src/db/rules.rs

//! Stored rule persistence
//!
//! Rules are authored through the management boundary (out of scope here)
//! and read back by the rules engine once per introspection run. Condition
//! and action lists are stored as JSON columns; the join type and the
//! outcome inversion flag are real columns so they can be queried.

use crate::error::{Error, Result};
use crate::rules::{JoinType, Rule};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::str::FromStr;

/// Insert a rule and fill in its id.
pub fn insert(conn: &Connection, rule: &mut Rule) -> Result<i64> {
    let conditions = serde_json::to_string(&rule.conditions)
        .map_err(|e| Error::ValidationError(format!("cannot serialize conditions: {}", e)))?;
    let actions = serde_json::to_string(&rule.actions)
        .map_err(|e| Error::ValidationError(format!("cannot serialize actions: {}", e)))?;

    conn.execute(
        "INSERT INTO rules
         (description, conditions, actions, conditions_join_type, invert_conditions_outcome)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            &rule.description,
            conditions,
            actions,
            rule.conditions_join_type.to_string(),
            rule.invert_conditions_outcome,
        ],
    )?;

    let id = conn.last_insert_rowid();
    rule.id = Some(id);
    Ok(id)
}

/// Load all rules in creation order.
pub fn list(conn: &Connection) -> Result<Vec<Rule>> {
    let mut stmt = conn.prepare(
        "SELECT id, description, conditions, actions, conditions_join_type,
                invert_conditions_outcome, created_at
         FROM rules ORDER BY id",
    )?;
    let rules = stmt
        .query_map([], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rules)
}

/// Load one rule by id.
pub fn get(conn: &Connection, id: i64) -> Result<Option<Rule>> {
    conn.query_row(
        "SELECT id, description, conditions, actions, conditions_join_type,
                invert_conditions_outcome, created_at
         FROM rules WHERE id = ?1",
        [id],
        from_row,
    )
    .optional()
    .map_err(Error::from)
}

/// Delete one rule by id. Returns whether a rule was deleted.
pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM rules WHERE id = ?1", [id])?;
    Ok(deleted > 0)
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<Rule> {
    let conditions: String = row.get(2)?;
    let actions: String = row.get(3)?;
    let join_type: String = row.get(4)?;

    Ok(Rule {
        id: Some(row.get(0)?),
        description: row.get(1)?,
        conditions: serde_json::from_str(&conditions).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?,
        actions: serde_json::from_str(&actions).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?,
        conditions_join_type: JoinType::from_str(&join_type).unwrap_or(JoinType::And),
        invert_conditions_outcome: row.get(5)?,
        created_at: row.get(6)?,
    })
}
