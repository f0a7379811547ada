use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use shared::types::{Application, ApplicationPatch, ApplicationQuery, DeleteSummary, NewApplication};
use crate::config::DefaultsConfig;
use crate::error::{CmdbError, Result};
use super::{required_text, time_column, to_sql_time, Filter};

const COLUMNS: &str = "id, name, version, type, language, repository_url, documentation_url,
                       owner, criticality, notes, created_at, updated_at";

#[derive(Debug, Clone, Default)]
pub(crate) struct ApplicationValues {
    pub id: Option<i64>,
    pub name: String,
    pub version: Option<String>,
    pub app_type: Option<String>,
    pub language: Option<String>,
    pub repository_url: Option<String>,
    pub documentation_url: Option<String>,
    pub owner: Option<String>,
    pub criticality: Option<String>,
    pub notes: Option<String>,
}

impl ApplicationValues {
    pub fn from_new(new: &NewApplication, defaults: &DefaultsConfig) -> Self {
        Self {
            id: None,
            name: new.name.clone(),
            version: new.version.clone(),
            app_type: new.app_type.clone(),
            language: new.language.clone(),
            repository_url: new.repository_url.clone(),
            documentation_url: new.documentation_url.clone(),
            owner: new.owner.clone(),
            criticality: new
                .criticality
                .clone()
                .or_else(|| Some(defaults.application_criticality.clone())),
            notes: new.notes.clone(),
        }
    }
}

pub(crate) fn insert(conn: &Connection, values: &ApplicationValues, now: DateTime<Utc>) -> Result<i64> {
    let name = required_text("name", &values.name)?;
    if find_by_name(conn, &name)?.is_some() {
        return Err(CmdbError::conflict(format!("application {name} already exists")));
    }

    conn.execute(
        r#"
        INSERT INTO applications (
            id, name, version, type, language, repository_url, documentation_url,
            owner, criticality, notes, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
        "#,
        params![
            values.id,
            name,
            values.version,
            values.app_type,
            values.language,
            values.repository_url,
            values.documentation_url,
            values.owner,
            values.criticality,
            values.notes,
            to_sql_time(&now),
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

pub(crate) fn get(conn: &Connection, id: i64) -> Result<Option<Application>> {
    let sql = format!("SELECT {COLUMNS} FROM applications WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], row_to_application).optional()?)
}

pub(crate) fn require(conn: &Connection, id: i64) -> Result<Application> {
    get(conn, id)?.ok_or_else(|| CmdbError::not_found("application", id))
}

pub(crate) fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Application>> {
    let sql = format!("SELECT {COLUMNS} FROM applications WHERE name = ?1");
    Ok(conn.query_row(&sql, [name], row_to_application).optional()?)
}

pub(crate) fn list(conn: &Connection, query: &ApplicationQuery) -> Result<Vec<Application>> {
    let mut filter = Filter::default();
    filter
        .eq_text("criticality", query.criticality.as_ref())
        .eq_text("type", query.app_type.as_ref())
        .eq_text("owner", query.owner.as_ref());

    let sql = format!("SELECT {COLUMNS} FROM applications{} ORDER BY name", filter.where_sql());
    let mut stmt = conn.prepare(&sql)?;
    let apps = stmt
        .query_map(filter.params(), row_to_application)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(apps)
}

pub(crate) fn update(
    conn: &Connection,
    id: i64,
    patch: &ApplicationPatch,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut app = require(conn, id)?;

    if let Some(name) = &patch.name {
        let name = required_text("name", name)?;
        if name != app.name && find_by_name(conn, &name)?.is_some() {
            return Err(CmdbError::conflict(format!("application {name} already exists")));
        }
        app.name = name;
    }
    let fields = [
        (&mut app.version, &patch.version),
        (&mut app.app_type, &patch.app_type),
        (&mut app.language, &patch.language),
        (&mut app.repository_url, &patch.repository_url),
        (&mut app.documentation_url, &patch.documentation_url),
        (&mut app.owner, &patch.owner),
        (&mut app.criticality, &patch.criticality),
        (&mut app.notes, &patch.notes),
    ];
    for (field, value) in fields {
        if let Some(value) = value {
            *field = Some(value.clone());
        }
    }

    conn.execute(
        r#"
        UPDATE applications SET
            name = ?2, version = ?3, type = ?4, language = ?5, repository_url = ?6,
            documentation_url = ?7, owner = ?8, criticality = ?9, notes = ?10, updated_at = ?11
        WHERE id = ?1
        "#,
        params![
            id,
            app.name,
            app.version,
            app.app_type,
            app.language,
            app.repository_url,
            app.documentation_url,
            app.owner,
            app.criticality,
            app.notes,
            to_sql_time(&now),
        ],
    )?;
    Ok(())
}

/// Detach every service running the application, then drop the application row.
pub(crate) fn delete(conn: &Connection, id: i64, now: DateTime<Utc>) -> Result<DeleteSummary> {
    require(conn, id)?;

    let services_detached = conn.execute(
        "UPDATE services SET application_id = NULL, updated_at = ?2 WHERE application_id = ?1",
        params![id, to_sql_time(&now)],
    )?;
    conn.execute("DELETE FROM applications WHERE id = ?1", [id])?;

    Ok(DeleteSummary {
        services_detached,
        ..Default::default()
    })
}

pub(crate) fn row_to_application(row: &rusqlite::Row) -> Result<Application, rusqlite::Error> {
    Ok(Application {
        id: row.get(0)?,
        name: row.get(1)?,
        version: row.get(2)?,
        app_type: row.get(3)?,
        language: row.get(4)?,
        repository_url: row.get(5)?,
        documentation_url: row.get(6)?,
        owner: row.get(7)?,
        criticality: row.get(8)?,
        notes: row.get(9)?,
        created_at: time_column(row, 10)?,
        updated_at: time_column(row, 11)?,
    })
}
