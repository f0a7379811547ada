use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use shared::protocol::DEFAULT_DEPENDENCY_TYPE;
use shared::types::{Dependency, DependencyPatch, DependencyQuery, NewDependency};
use crate::error::{CmdbError, Result};
use super::{check_count, services, time_column, to_sql_time, Filter};

const COLUMNS: &str = "id, source_service_id, target_service_id, dependency_type, port, protocol,
                       description, created_at, updated_at";

#[derive(Debug, Clone, Default)]
pub(crate) struct DependencyValues {
    pub id: Option<i64>,
    pub source_service_id: i64,
    pub target_service_id: i64,
    pub dependency_type: Option<String>,
    pub port: Option<i64>,
    pub protocol: Option<String>,
    pub description: Option<String>,
}

impl DependencyValues {
    pub fn from_new(new: &NewDependency) -> Self {
        Self {
            id: None,
            source_service_id: new.source_service_id,
            target_service_id: new.target_service_id,
            dependency_type: new.dependency_type.clone(),
            port: new.port,
            protocol: new.protocol.clone(),
            description: new.description.clone(),
        }
    }

    /// The edge type with blanks falling back to the default.
    pub fn edge_type(&self) -> String {
        match self.dependency_type.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => DEFAULT_DEPENDENCY_TYPE.to_string(),
        }
    }
}

/// Insert an edge. Both endpoints must exist and the (source, target, type)
/// triple must be new.
pub(crate) fn insert(conn: &Connection, values: &DependencyValues, now: DateTime<Utc>) -> Result<i64> {
    check_count("port", values.port)?;
    for (role, id) in [("source", values.source_service_id), ("target", values.target_service_id)] {
        if services::get(conn, id)?.is_none() {
            return Err(CmdbError::invalid(format!("{role} service {id} does not exist")));
        }
    }

    let edge_type = values.edge_type();
    if let Some(existing) = find_edge(conn, values.source_service_id, values.target_service_id, &edge_type)? {
        return Err(CmdbError::conflict(format!(
            "service {} already {} service {} (dependency {})",
            values.source_service_id, edge_type, values.target_service_id, existing.id
        )));
    }

    conn.execute(
        r#"
        INSERT INTO dependencies (
            id, source_service_id, target_service_id, dependency_type, port, protocol,
            description, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
        "#,
        params![
            values.id,
            values.source_service_id,
            values.target_service_id,
            edge_type,
            values.port,
            values.protocol,
            values.description,
            to_sql_time(&now),
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

pub(crate) fn get(conn: &Connection, id: i64) -> Result<Option<Dependency>> {
    let sql = format!("SELECT {COLUMNS} FROM dependencies WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], row_to_dependency).optional()?)
}

pub(crate) fn require(conn: &Connection, id: i64) -> Result<Dependency> {
    get(conn, id)?.ok_or_else(|| CmdbError::not_found("dependency", id))
}

pub(crate) fn find_edge(
    conn: &Connection,
    source: i64,
    target: i64,
    edge_type: &str,
) -> Result<Option<Dependency>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM dependencies
         WHERE source_service_id = ?1 AND target_service_id = ?2 AND dependency_type = ?3"
    );
    Ok(conn
        .query_row(&sql, params![source, target, edge_type], row_to_dependency)
        .optional()?)
}

pub(crate) fn list(conn: &Connection, query: &DependencyQuery) -> Result<Vec<Dependency>> {
    let mut filter = Filter::default();
    filter
        .eq_int("source_service_id", query.source_service_id)
        .eq_int("target_service_id", query.target_service_id)
        .eq_text("dependency_type", query.dependency_type.as_ref());

    let sql = format!("SELECT {COLUMNS} FROM dependencies{} ORDER BY id", filter.where_sql());
    let mut stmt = conn.prepare(&sql)?;
    let deps = stmt
        .query_map(filter.params(), row_to_dependency)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(deps)
}

pub(crate) fn update(
    conn: &Connection,
    id: i64,
    patch: &DependencyPatch,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut dep = require(conn, id)?;

    if let Some(edge_type) = &patch.dependency_type {
        let edge_type = super::required_text("dependency_type", edge_type)?;
        if edge_type != dep.dependency_type {
            if let Some(existing) =
                find_edge(conn, dep.source_service_id, dep.target_service_id, &edge_type)?
            {
                return Err(CmdbError::conflict(format!(
                    "dependency {} already has type {edge_type}",
                    existing.id
                )));
            }
            dep.dependency_type = edge_type;
        }
    }
    if patch.port.is_some() {
        dep.port = patch.port;
    }
    if let Some(protocol) = &patch.protocol {
        dep.protocol = Some(protocol.clone());
    }
    if let Some(description) = &patch.description {
        dep.description = Some(description.clone());
    }
    check_count("port", dep.port)?;

    conn.execute(
        r#"
        UPDATE dependencies SET
            dependency_type = ?2, port = ?3, protocol = ?4, description = ?5, updated_at = ?6
        WHERE id = ?1
        "#,
        params![id, dep.dependency_type, dep.port, dep.protocol, dep.description, to_sql_time(&now)],
    )?;
    Ok(())
}

pub(crate) fn delete(conn: &Connection, id: i64) -> Result<()> {
    if conn.execute("DELETE FROM dependencies WHERE id = ?1", [id])? == 0 {
        return Err(CmdbError::not_found("dependency", id));
    }
    Ok(())
}

pub(crate) fn row_to_dependency(row: &rusqlite::Row) -> Result<Dependency, rusqlite::Error> {
    Ok(Dependency {
        id: row.get(0)?,
        source_service_id: row.get(1)?,
        target_service_id: row.get(2)?,
        dependency_type: row.get(3)?,
        port: row.get(4)?,
        protocol: row.get(5)?,
        description: row.get(6)?,
        created_at: time_column(row, 7)?,
        updated_at: time_column(row, 8)?,
    })
}
