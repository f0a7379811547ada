use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use shared::types::{DeleteSummary, NewService, Service, ServiceListing, ServicePatch, ServiceQuery};
use crate::config::DefaultsConfig;
use crate::error::{CmdbError, Result};
use super::{applications, check_count, required_text, servers, time_column, to_sql_time, Filter};

const COLUMNS: &str = "s.id, s.server_id, s.application_id, s.service_name, s.port, s.protocol,
                       s.status, s.process_name, s.start_command, s.config_file, s.log_file,
                       s.created_at, s.updated_at";

#[derive(Debug, Clone, Default)]
pub(crate) struct ServiceValues {
    pub id: Option<i64>,
    pub server_id: i64,
    pub application_id: Option<i64>,
    pub service_name: String,
    pub port: Option<i64>,
    pub protocol: Option<String>,
    pub status: String,
    pub process_name: Option<String>,
    pub start_command: Option<String>,
    pub config_file: Option<String>,
    pub log_file: Option<String>,
}

impl ServiceValues {
    pub fn from_new(new: &NewService, defaults: &DefaultsConfig) -> Self {
        Self {
            id: None,
            server_id: new.server_id,
            application_id: new.application_id,
            service_name: new.service_name.clone(),
            port: new.port,
            protocol: new
                .protocol
                .clone()
                .or_else(|| Some(defaults.service_protocol.clone())),
            status: new
                .status
                .clone()
                .unwrap_or_else(|| defaults.service_status.clone()),
            process_name: new.process_name.clone(),
            start_command: new.start_command.clone(),
            config_file: new.config_file.clone(),
            log_file: new.log_file.clone(),
        }
    }
}

pub(crate) fn insert(conn: &Connection, values: &ServiceValues, now: DateTime<Utc>) -> Result<i64> {
    let service_name = required_text("service_name", &values.service_name)?;
    let status = required_text("status", &values.status)?;
    check_count("port", values.port)?;
    check_references(conn, values.server_id, values.application_id)?;

    conn.execute(
        r#"
        INSERT INTO services (
            id, server_id, application_id, service_name, port, protocol, status,
            process_name, start_command, config_file, log_file, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
        "#,
        params![
            values.id,
            values.server_id,
            values.application_id,
            service_name,
            values.port,
            values.protocol,
            status,
            values.process_name,
            values.start_command,
            values.config_file,
            values.log_file,
            to_sql_time(&now),
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

fn check_references(conn: &Connection, server_id: i64, application_id: Option<i64>) -> Result<()> {
    if servers::get(conn, server_id)?.is_none() {
        return Err(CmdbError::invalid(format!("server {server_id} does not exist")));
    }
    if let Some(app_id) = application_id {
        if applications::get(conn, app_id)?.is_none() {
            return Err(CmdbError::invalid(format!("application {app_id} does not exist")));
        }
    }
    Ok(())
}

pub(crate) fn get(conn: &Connection, id: i64) -> Result<Option<Service>> {
    let sql = format!("SELECT {COLUMNS} FROM services s WHERE s.id = ?1");
    Ok(conn.query_row(&sql, [id], row_to_service).optional()?)
}

pub(crate) fn require(conn: &Connection, id: i64) -> Result<Service> {
    get(conn, id)?.ok_or_else(|| CmdbError::not_found("service", id))
}

fn filter_for(query: &ServiceQuery) -> Filter {
    let mut filter = Filter::default();
    filter
        .eq_int("s.server_id", query.server_id)
        .eq_int("s.application_id", query.application_id)
        .eq_text("s.status", query.status.as_ref());
    filter
}

pub(crate) fn list(conn: &Connection, query: &ServiceQuery) -> Result<Vec<Service>> {
    let filter = filter_for(query);
    let sql = format!(
        "SELECT {COLUMNS} FROM services s{} ORDER BY s.service_name, s.id",
        filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let services = stmt
        .query_map(filter.params(), row_to_service)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(services)
}

pub(crate) fn list_with_context(conn: &Connection, query: &ServiceQuery) -> Result<Vec<ServiceListing>> {
    let filter = filter_for(query);
    let sql = format!(
        r#"
        SELECT {COLUMNS}, srv.hostname, a.name
        FROM services s
        LEFT JOIN servers srv ON s.server_id = srv.id
        LEFT JOIN applications a ON s.application_id = a.id{}
        ORDER BY s.service_name, s.id
        "#,
        filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let listings = stmt
        .query_map(filter.params(), |row| {
            Ok(ServiceListing {
                service: row_to_service(row)?,
                hostname: row.get(13)?,
                application_name: row.get(14)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(listings)
}

pub(crate) fn update(conn: &Connection, id: i64, patch: &ServicePatch, now: DateTime<Utc>) -> Result<()> {
    let mut service = require(conn, id)?;

    if let Some(server_id) = patch.server_id {
        service.server_id = server_id;
    }
    if let Some(application_id) = patch.application_id {
        service.application_id = application_id;
    }
    if let Some(name) = &patch.service_name {
        service.service_name = required_text("service_name", name)?;
    }
    if let Some(status) = &patch.status {
        service.status = required_text("status", status)?;
    }
    if patch.port.is_some() {
        service.port = patch.port;
    }
    let fields = [
        (&mut service.protocol, &patch.protocol),
        (&mut service.process_name, &patch.process_name),
        (&mut service.start_command, &patch.start_command),
        (&mut service.config_file, &patch.config_file),
        (&mut service.log_file, &patch.log_file),
    ];
    for (field, value) in fields {
        if let Some(value) = value {
            *field = Some(value.clone());
        }
    }

    check_count("port", service.port)?;
    check_references(conn, service.server_id, service.application_id)?;

    conn.execute(
        r#"
        UPDATE services SET
            server_id = ?2, application_id = ?3, service_name = ?4, port = ?5, protocol = ?6,
            status = ?7, process_name = ?8, start_command = ?9, config_file = ?10,
            log_file = ?11, updated_at = ?12
        WHERE id = ?1
        "#,
        params![
            id,
            service.server_id,
            service.application_id,
            service.service_name,
            service.port,
            service.protocol,
            service.status,
            service.process_name,
            service.start_command,
            service.config_file,
            service.log_file,
            to_sql_time(&now),
        ],
    )?;
    Ok(())
}

/// Delete a service and every edge that touches it.
pub(crate) fn delete(conn: &Connection, id: i64) -> Result<DeleteSummary> {
    require(conn, id)?;

    let dependencies_removed = conn.execute(
        "DELETE FROM dependencies WHERE source_service_id = ?1 OR target_service_id = ?1",
        [id],
    )?;
    conn.execute("DELETE FROM services WHERE id = ?1", [id])?;

    Ok(DeleteSummary {
        services_removed: 1,
        dependencies_removed,
        ..Default::default()
    })
}

pub(crate) fn row_to_service(row: &rusqlite::Row) -> Result<Service, rusqlite::Error> {
    Ok(Service {
        id: row.get(0)?,
        server_id: row.get(1)?,
        application_id: row.get(2)?,
        service_name: row.get(3)?,
        port: row.get(4)?,
        protocol: row.get(5)?,
        status: row.get(6)?,
        process_name: row.get(7)?,
        start_command: row.get(8)?,
        config_file: row.get(9)?,
        log_file: row.get(10)?,
        created_at: time_column(row, 11)?,
        updated_at: time_column(row, 12)?,
    })
}
