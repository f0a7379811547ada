use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use shared::types::DiscoveryRecord;
use crate::error::Result;
use super::{time_column, to_sql_time};

/// Append one immutable scan snapshot. History rows are never updated.
pub(crate) fn append(
    conn: &Connection,
    server_id: i64,
    discovery_type: &str,
    payload: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<i64> {
    let data = serde_json::to_string(payload)?;
    conn.execute(
        "INSERT INTO discovery_history (server_id, discovery_type, data, discovered_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![server_id, discovery_type, data, to_sql_time(&now)],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn list_for_server(
    conn: &Connection,
    server_id: i64,
    limit: Option<u32>,
) -> Result<Vec<DiscoveryRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, server_id, discovery_type, data, discovered_at
         FROM discovery_history WHERE server_id = ?1
         ORDER BY id DESC LIMIT ?2",
    )?;

    // SQLite treats a negative LIMIT as unbounded
    let limit = limit.map(i64::from).unwrap_or(-1);
    let records = stmt
        .query_map(params![server_id, limit], row_to_record)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

#[cfg(test)]
pub(crate) fn count_for_server(conn: &Connection, server_id: i64) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM discovery_history WHERE server_id = ?1",
        [server_id],
        |row| row.get(0),
    )?)
}

fn row_to_record(row: &rusqlite::Row) -> Result<DiscoveryRecord, rusqlite::Error> {
    let data: String = row.get(3)?;
    let payload = serde_json::from_str(&data).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(DiscoveryRecord {
        id: row.get(0)?,
        server_id: row.get(1)?,
        discovery_type: row.get(2)?,
        payload,
        discovered_at: time_column(row, 4)?,
    })
}
