use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use shared::protocol::SERVER_STATUS_ACTIVE;
use shared::types::{DeleteSummary, NewServer, Server, ServerOrder, ServerPatch, ServerQuery};
use crate::config::DefaultsConfig;
use crate::error::{CmdbError, Result};
use super::{
    check_capacity, check_count, opt_time_column, required_text, time_column, to_sql_time, Filter,
};

const COLUMNS: &str = "id, hostname, ip_address, os_type, os_version, cpu_cores, memory_gb,
                       disk_gb, environment, status, location, owner, notes, last_seen,
                       created_at, updated_at";

/// Every column a caller may set on insert. `id` is only given by bulk import.
#[derive(Debug, Clone, Default)]
pub(crate) struct ServerValues {
    pub id: Option<i64>,
    pub hostname: String,
    pub ip_address: Option<String>,
    pub os_type: Option<String>,
    pub os_version: Option<String>,
    pub cpu_cores: Option<i64>,
    pub memory_gb: Option<f64>,
    pub disk_gb: Option<f64>,
    pub environment: Option<String>,
    pub status: String,
    pub location: Option<String>,
    pub owner: Option<String>,
    pub notes: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl ServerValues {
    pub fn from_new(new: &NewServer, defaults: &DefaultsConfig) -> Self {
        Self {
            id: None,
            hostname: new.hostname.clone(),
            ip_address: new.ip_address.clone(),
            os_type: new.os_type.clone(),
            os_version: new.os_version.clone(),
            cpu_cores: new.cpu_cores,
            memory_gb: new.memory_gb,
            disk_gb: new.disk_gb,
            environment: new
                .environment
                .clone()
                .or_else(|| Some(defaults.server_environment.clone())),
            status: new.status.clone().unwrap_or_default(),
            location: new.location.clone(),
            owner: new.owner.clone(),
            notes: new.notes.clone(),
            last_seen: None,
        }
    }
}

/// Facts a discovery scan can observe. `None` means the scan did not see it.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Observation {
    pub ip_address: Option<String>,
    pub os_type: Option<String>,
    pub os_version: Option<String>,
    pub cpu_cores: Option<i64>,
    pub memory_gb: Option<f64>,
    pub disk_gb: Option<f64>,
}

impl Observation {
    /// Whether applying this observation would change any stored value.
    pub fn differs_from(&self, server: &Server) -> bool {
        fn differs<T: PartialEq>(seen: &Option<T>, stored: &Option<T>) -> bool {
            seen.is_some() && seen != stored
        }

        differs(&self.ip_address, &server.ip_address)
            || differs(&self.os_type, &server.os_type)
            || differs(&self.os_version, &server.os_version)
            || differs(&self.cpu_cores, &server.cpu_cores)
            || differs(&self.memory_gb, &server.memory_gb)
            || differs(&self.disk_gb, &server.disk_gb)
    }

    pub fn validate(&self) -> Result<()> {
        check_count("cpu_cores", self.cpu_cores)?;
        check_capacity("memory_gb", self.memory_gb)?;
        check_capacity("disk_gb", self.disk_gb)
    }
}

pub(crate) fn insert(conn: &Connection, values: &ServerValues, now: DateTime<Utc>) -> Result<i64> {
    let hostname = required_text("hostname", &values.hostname)?;
    check_count("cpu_cores", values.cpu_cores)?;
    check_capacity("memory_gb", values.memory_gb)?;
    check_capacity("disk_gb", values.disk_gb)?;

    if find_by_hostname(conn, &hostname)?.is_some() {
        return Err(CmdbError::conflict(format!("server {hostname} already exists")));
    }

    let status = match values.status.trim() {
        "" => SERVER_STATUS_ACTIVE.to_string(),
        s => s.to_string(),
    };
    let now = to_sql_time(&now);

    conn.execute(
        r#"
        INSERT INTO servers (
            id, hostname, ip_address, os_type, os_version, cpu_cores, memory_gb, disk_gb,
            environment, status, location, owner, notes, last_seen, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)
        "#,
        params![
            values.id,
            hostname,
            values.ip_address,
            values.os_type,
            values.os_version,
            values.cpu_cores,
            values.memory_gb,
            values.disk_gb,
            values.environment,
            status,
            values.location,
            values.owner,
            values.notes,
            values.last_seen.as_ref().map(to_sql_time),
            now,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

pub(crate) fn get(conn: &Connection, id: i64) -> Result<Option<Server>> {
    let sql = format!("SELECT {COLUMNS} FROM servers WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], row_to_server).optional()?)
}

pub(crate) fn require(conn: &Connection, id: i64) -> Result<Server> {
    get(conn, id)?.ok_or_else(|| CmdbError::not_found("server", id))
}

pub(crate) fn find_by_hostname(conn: &Connection, hostname: &str) -> Result<Option<Server>> {
    let sql = format!("SELECT {COLUMNS} FROM servers WHERE hostname = ?1");
    Ok(conn.query_row(&sql, [hostname], row_to_server).optional()?)
}

pub(crate) fn list(conn: &Connection, query: &ServerQuery) -> Result<Vec<Server>> {
    let mut filter = Filter::default();
    filter
        .eq_text("environment", query.environment.as_ref())
        .eq_text("status", query.status.as_ref())
        .eq_text("os_type", query.os_type.as_ref());

    let order = match query.order {
        ServerOrder::Hostname => "hostname",
        ServerOrder::Newest => "created_at DESC, id DESC",
    };
    let mut sql = format!("SELECT {COLUMNS} FROM servers{} ORDER BY {order}", filter.where_sql());
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    let mut stmt = conn.prepare(&sql)?;
    let servers = stmt
        .query_map(filter.params(), row_to_server)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(servers)
}

/// Apply an operator edit. Any field may change, including the hostname.
pub(crate) fn update(conn: &Connection, id: i64, patch: &ServerPatch, now: DateTime<Utc>) -> Result<()> {
    let mut server = require(conn, id)?;

    if let Some(hostname) = &patch.hostname {
        let hostname = required_text("hostname", hostname)?;
        if hostname != server.hostname {
            if find_by_hostname(conn, &hostname)?.is_some() {
                return Err(CmdbError::conflict(format!("server {hostname} already exists")));
            }
            server.hostname = hostname;
        }
    }
    if let Some(status) = &patch.status {
        server.status = required_text("status", status)?;
    }
    merge(&mut server.ip_address, &patch.ip_address);
    merge(&mut server.os_type, &patch.os_type);
    merge(&mut server.os_version, &patch.os_version);
    merge(&mut server.environment, &patch.environment);
    merge(&mut server.location, &patch.location);
    merge(&mut server.owner, &patch.owner);
    merge(&mut server.notes, &patch.notes);
    merge(&mut server.cpu_cores, &patch.cpu_cores);
    merge(&mut server.memory_gb, &patch.memory_gb);
    merge(&mut server.disk_gb, &patch.disk_gb);

    check_count("cpu_cores", server.cpu_cores)?;
    check_capacity("memory_gb", server.memory_gb)?;
    check_capacity("disk_gb", server.disk_gb)?;

    conn.execute(
        r#"
        UPDATE servers SET
            hostname = ?2, ip_address = ?3, os_type = ?4, os_version = ?5, cpu_cores = ?6,
            memory_gb = ?7, disk_gb = ?8, environment = ?9, status = ?10, location = ?11,
            owner = ?12, notes = ?13, updated_at = ?14
        WHERE id = ?1
        "#,
        params![
            id,
            server.hostname,
            server.ip_address,
            server.os_type,
            server.os_version,
            server.cpu_cores,
            server.memory_gb,
            server.disk_gb,
            server.environment,
            server.status,
            server.location,
            server.owner,
            server.notes,
            to_sql_time(&now),
        ],
    )?;
    Ok(())
}

/// Overwrite only the machine-observable fields and `last_seen`.
/// Operator-owned fields (environment, owner, location, notes, status) are never touched.
pub(crate) fn record_observation(
    conn: &Connection,
    id: i64,
    seen: &Observation,
    now: DateTime<Utc>,
) -> Result<()> {
    let now = to_sql_time(&now);
    let updated = conn.execute(
        r#"
        UPDATE servers SET
            ip_address = COALESCE(?2, ip_address),
            os_type    = COALESCE(?3, os_type),
            os_version = COALESCE(?4, os_version),
            cpu_cores  = COALESCE(?5, cpu_cores),
            memory_gb  = COALESCE(?6, memory_gb),
            disk_gb    = COALESCE(?7, disk_gb),
            last_seen  = ?8,
            updated_at = ?8
        WHERE id = ?1
        "#,
        params![
            id,
            seen.ip_address,
            seen.os_type,
            seen.os_version,
            seen.cpu_cores,
            seen.memory_gb,
            seen.disk_gb,
            now,
        ],
    )?;

    if updated == 0 {
        return Err(CmdbError::not_found("server", id));
    }
    Ok(())
}

/// Delete in dependency order: edges of the server's services, the services,
/// the scan history, then the server row.
pub(crate) fn delete(conn: &Connection, id: i64) -> Result<DeleteSummary> {
    require(conn, id)?;

    let dependencies_removed = conn.execute(
        r#"
        DELETE FROM dependencies
        WHERE source_service_id IN (SELECT id FROM services WHERE server_id = ?1)
           OR target_service_id IN (SELECT id FROM services WHERE server_id = ?1)
        "#,
        [id],
    )?;
    let services_removed = conn.execute("DELETE FROM services WHERE server_id = ?1", [id])?;
    let discoveries_removed =
        conn.execute("DELETE FROM discovery_history WHERE server_id = ?1", [id])?;
    conn.execute("DELETE FROM servers WHERE id = ?1", [id])?;

    Ok(DeleteSummary {
        services_removed,
        dependencies_removed,
        discoveries_removed,
        services_detached: 0,
    })
}

fn merge<T: Clone>(field: &mut Option<T>, patch: &Option<T>) {
    if let Some(value) = patch {
        *field = Some(value.clone());
    }
}

pub(crate) fn row_to_server(row: &rusqlite::Row) -> Result<Server, rusqlite::Error> {
    Ok(Server {
        id: row.get(0)?,
        hostname: row.get(1)?,
        ip_address: row.get(2)?,
        os_type: row.get(3)?,
        os_version: row.get(4)?,
        cpu_cores: row.get(5)?,
        memory_gb: row.get(6)?,
        disk_gb: row.get(7)?,
        environment: row.get(8)?,
        status: row.get(9)?,
        location: row.get(10)?,
        owner: row.get(11)?,
        notes: row.get(12)?,
        last_seen: opt_time_column(row, 13)?,
        created_at: time_column(row, 14)?,
        updated_at: time_column(row, 15)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::store::testing;
    use super::*;

    #[test]
    fn test_create_and_query() {
        let mut store = testing::store();
        let created = store
            .create_server(&NewServer {
                hostname: "web-prod-01".to_string(),
                ip_address: Some("10.0.1.10".to_string()),
                cpu_cores: Some(4),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(created.status, "active");
        assert_eq!(created.environment.as_deref(), Some("production"));
        assert!(created.last_seen.is_none());
        assert_eq!(created.created_at, created.updated_at);

        let fetched = store.get_server(created.id).unwrap();
        assert_eq!(fetched, created);
    }

    #[test]
    fn test_duplicate_hostname_conflicts_and_leaves_store_unchanged() {
        let mut store = testing::store();
        testing::server(&mut store, "db-01");

        let err = store
            .create_server(&NewServer {
                hostname: "db-01".to_string(),
                owner: Some("someone else".to_string()),
                ..Default::default()
            })
            .unwrap_err();

        assert!(matches!(err, CmdbError::Conflict(_)));
        let all = store.list_servers(&ServerQuery::default()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].owner, None);
    }

    #[test]
    fn test_hostname_is_case_sensitive() {
        let mut store = testing::store();
        testing::server(&mut store, "db-01");
        testing::server(&mut store, "DB-01");
        assert_eq!(store.list_servers(&ServerQuery::default()).unwrap().len(), 2);
    }

    #[test]
    fn test_blank_hostname_and_negative_capacity_are_invalid() {
        let mut store = testing::store();

        let blank = store.create_server(&NewServer {
            hostname: "   ".to_string(),
            ..Default::default()
        });
        assert!(matches!(blank, Err(CmdbError::InvalidArgument(_))));

        let negative = store.create_server(&NewServer {
            hostname: "web-01".to_string(),
            memory_gb: Some(-2.0),
            ..Default::default()
        });
        assert!(matches!(negative, Err(CmdbError::InvalidArgument(_))));
    }

    #[test]
    fn test_update_merges_and_refreshes_timestamp() {
        let mut store = testing::store();
        let server = testing::server(&mut store, "app-01");

        let updated = store
            .update_server(
                server.id,
                &ServerPatch {
                    owner: Some("SRE Team".to_string()),
                    status: Some("maintenance".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.owner.as_deref(), Some("SRE Team"));
        assert_eq!(updated.status, "maintenance");
        assert_eq!(updated.hostname, "app-01");
        assert_eq!(updated.created_at, server.created_at);
        assert!(updated.updated_at >= server.updated_at);
    }

    #[test]
    fn test_update_to_taken_hostname_conflicts() {
        let mut store = testing::store();
        testing::server(&mut store, "a");
        let b = testing::server(&mut store, "b");

        let err = store
            .update_server(
                b.id,
                &ServerPatch {
                    hostname: Some("a".to_string()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, CmdbError::Conflict(_)));
    }

    #[test]
    fn test_missing_ids_are_not_found() {
        let mut store = testing::store();
        assert_eq!(store.get_server(99).unwrap_err(), CmdbError::not_found("server", 99));
        assert!(matches!(
            store.update_server(99, &ServerPatch::default()),
            Err(CmdbError::NotFound { .. })
        ));
        assert!(matches!(store.delete_server(99), Err(CmdbError::NotFound { .. })));
    }

    #[test]
    fn test_list_filters_and_orders() {
        let mut store = testing::store();
        for (hostname, env) in [("web-02", "production"), ("app-staging-01", "staging"), ("web-01", "production")] {
            store
                .create_server(&NewServer {
                    hostname: hostname.to_string(),
                    environment: Some(env.to_string()),
                    ..Default::default()
                })
                .unwrap();
        }

        let production = store
            .list_servers(&ServerQuery {
                environment: Some("production".to_string()),
                ..Default::default()
            })
            .unwrap();
        let names: Vec<_> = production.iter().map(|s| s.hostname.as_str()).collect();
        assert_eq!(names, ["web-01", "web-02"]);

        let newest = store
            .list_servers(&ServerQuery {
                order: ServerOrder::Newest,
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].hostname, "web-01");
    }

    #[test]
    fn test_delete_cascades_through_services_and_edges() {
        let mut store = testing::store();
        let db = testing::server(&mut store, "db-01");
        let web = testing::server(&mut store, "web-01");
        let mysql = testing::application(&mut store, "MySQL");

        let primary = testing::service(&mut store, db.id, Some(mysql.id), "mysql-primary");
        let app = testing::service(&mut store, web.id, None, "ecommerce-app");
        testing::edge(&mut store, app.id, primary.id);

        let summary = store.delete_server(db.id).unwrap();
        assert_eq!(summary.services_removed, 1);
        assert_eq!(summary.dependencies_removed, 1);

        assert!(matches!(store.get_service(primary.id), Err(CmdbError::NotFound { .. })));
        assert!(store.list_dependencies(&Default::default()).unwrap().is_empty());
        assert_eq!(store.get_application(mysql.id).unwrap().name, "MySQL");
        assert_eq!(store.get_service(app.id).unwrap().service_name, "ecommerce-app");
    }
}
