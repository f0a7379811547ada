use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use shared::rows::{EntityKind, FlatRow, ImportSummary};
use crate::error::{CmdbError, Result};
use crate::graph;
use crate::store::applications::{self, ApplicationValues};
use crate::store::dependencies::{self, DependencyValues};
use crate::store::servers::{self, ServerValues};
use crate::store::services::{self, ServiceValues};
use crate::store::{now, parse_time, Store};

/// Stream every column of every row of `kind` to `sink`, in id order and
/// schema column order. Returns the number of rows written. An error from
/// `sink` stops the export.
pub fn export_rows(
    store: &Store,
    kind: EntityKind,
    mut sink: impl FnMut(FlatRow) -> Result<()>,
) -> Result<usize> {
    store.read(|conn| {
        let mut stmt = conn.prepare(&format!("SELECT * FROM {} ORDER BY id", kind.table()))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query([])?;
        let mut written = 0;
        while let Some(row) = rows.next()? {
            let mut flat = FlatRow::new();
            for (idx, column) in columns.iter().enumerate() {
                flat.push(column.clone(), cell_text(row.get_ref(idx)?));
            }
            sink(flat)?;
            written += 1;
        }
        Ok(written)
    })
}

fn cell_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Some(hex::encode(b)),
    }
}

enum RowOutcome {
    Imported,
    Duplicate,
}

/// Import rows one at a time, best effort.
///
/// A row whose unique key already exists is skipped. A malformed or otherwise
/// rejected row is recorded in `errors` and the batch carries on. Store-managed
/// timestamps are assigned fresh; `last_seen` is carried over when present.
/// Only a storage failure aborts the batch, and then nothing is kept.
pub fn import_rows(
    store: &mut Store,
    kind: EntityKind,
    rows: impl IntoIterator<Item = FlatRow>,
) -> Result<ImportSummary> {
    let summary = store.write(|tx| {
        let mut summary = ImportSummary::default();
        for (index, row) in rows.into_iter().enumerate() {
            let sp = tx.savepoint()?;
            match import_one(&sp, kind, &row, now()) {
                Ok(RowOutcome::Imported) => {
                    sp.commit()?;
                    summary.imported += 1;
                }
                Ok(RowOutcome::Duplicate) => summary.skipped += 1,
                Err(err @ CmdbError::Storage { .. }) => return Err(err),
                Err(err) => {
                    let message = format!("row {}: {}", index + 1, err);
                    tracing::warn!("Import into {} rejected {}", kind, message);
                    summary.errors.push(message);
                }
            }
        }
        Ok(summary)
    })?;

    tracing::info!(
        "Imported {} {} ({} skipped, {} errors)",
        summary.imported,
        kind,
        summary.skipped,
        summary.errors.len()
    );
    Ok(summary)
}

fn import_one(conn: &Connection, kind: EntityKind, row: &FlatRow, now: DateTime<Utc>) -> Result<RowOutcome> {
    match kind {
        EntityKind::Servers => {
            let values = ServerValues {
                id: int(row, "id")?,
                hostname: required(row, "hostname")?,
                ip_address: text(row, "ip_address"),
                os_type: text(row, "os_type"),
                os_version: text(row, "os_version"),
                cpu_cores: int(row, "cpu_cores")?,
                memory_gb: real(row, "memory_gb")?,
                disk_gb: real(row, "disk_gb")?,
                environment: text(row, "environment"),
                status: text(row, "status").unwrap_or_default(),
                location: text(row, "location"),
                owner: text(row, "owner"),
                notes: text(row, "notes"),
                last_seen: time(row, "last_seen")?,
            };
            if servers::find_by_hostname(conn, &values.hostname)?.is_some() {
                return Ok(RowOutcome::Duplicate);
            }
            servers::insert(conn, &values, now)?;
        }
        EntityKind::Applications => {
            let values = ApplicationValues {
                id: int(row, "id")?,
                name: required(row, "name")?,
                version: text(row, "version"),
                app_type: text(row, "type"),
                language: text(row, "language"),
                repository_url: text(row, "repository_url"),
                documentation_url: text(row, "documentation_url"),
                owner: text(row, "owner"),
                criticality: text(row, "criticality"),
                notes: text(row, "notes"),
            };
            if applications::find_by_name(conn, &values.name)?.is_some() {
                return Ok(RowOutcome::Duplicate);
            }
            applications::insert(conn, &values, now)?;
        }
        EntityKind::Services => {
            let values = ServiceValues {
                id: int(row, "id")?,
                server_id: required_int(row, "server_id")?,
                application_id: int(row, "application_id")?,
                service_name: required(row, "service_name")?,
                port: int(row, "port")?,
                protocol: text(row, "protocol"),
                status: text(row, "status")
                    .unwrap_or_else(|| shared::protocol::SERVICE_STATUS_RUNNING.to_string()),
                process_name: text(row, "process_name"),
                start_command: text(row, "start_command"),
                config_file: text(row, "config_file"),
                log_file: text(row, "log_file"),
            };
            if let Some(id) = values.id {
                if services::get(conn, id)?.is_some() {
                    return Ok(RowOutcome::Duplicate);
                }
            }
            services::insert(conn, &values, now)?;
        }
        EntityKind::Dependencies => {
            let values = DependencyValues {
                id: int(row, "id")?,
                source_service_id: required_int(row, "source_service_id")?,
                target_service_id: required_int(row, "target_service_id")?,
                dependency_type: text(row, "dependency_type"),
                port: int(row, "port")?,
                protocol: text(row, "protocol"),
                description: text(row, "description"),
            };
            if let Some(id) = values.id {
                if dependencies::get(conn, id)?.is_some() {
                    return Ok(RowOutcome::Duplicate);
                }
            }
            let existing = dependencies::find_edge(
                conn,
                values.source_service_id,
                values.target_service_id,
                &values.edge_type(),
            )?;
            if existing.is_some() {
                return Ok(RowOutcome::Duplicate);
            }
            let id = dependencies::insert(conn, &values, now)?;
            graph::self_loop_warning(id, values.source_service_id, values.target_service_id);
        }
    }
    Ok(RowOutcome::Imported)
}

fn text(row: &FlatRow, column: &str) -> Option<String> {
    row.get(column).map(str::to_string)
}

/// Key columns are matched trimmed, the same way explicit creation stores them.
fn required(row: &FlatRow, column: &str) -> Result<String> {
    row.get(column)
        .map(|v| v.trim().to_string())
        .ok_or_else(|| CmdbError::invalid(format!("{column} is required")))
}

fn int(row: &FlatRow, column: &str) -> Result<Option<i64>> {
    row.get(column)
        .map(|v| {
            v.trim()
                .parse::<i64>()
                .map_err(|_| CmdbError::invalid(format!("{column}: '{v}' is not an integer")))
        })
        .transpose()
}

fn required_int(row: &FlatRow, column: &str) -> Result<i64> {
    int(row, column)?.ok_or_else(|| CmdbError::invalid(format!("{column} is required")))
}

fn real(row: &FlatRow, column: &str) -> Result<Option<f64>> {
    row.get(column)
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .map_err(|_| CmdbError::invalid(format!("{column}: '{v}' is not a number")))
        })
        .transpose()
}

fn time(row: &FlatRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    row.get(column)
        .map(|v| {
            parse_time(0, v.trim())
                .map_err(|_| CmdbError::invalid(format!("{column}: '{v}' is not an RFC 3339 timestamp")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use shared::types::{
        ApplicationQuery, DependencyQuery, NewServer, NewService, ServerQuery, ServiceQuery,
    };
    use crate::config::DiscoveryConfig;
    use crate::discovery::reconcile::reconcile;
    use crate::store::testing;
    use super::*;

    fn export_all(store: &Store, kind: EntityKind) -> Vec<FlatRow> {
        let mut rows = Vec::new();
        export_rows(store, kind, |row| {
            rows.push(row);
            Ok(())
        })
        .unwrap();
        rows
    }

    fn populated() -> Store {
        let mut store = testing::store();
        let web = store
            .create_server(&NewServer {
                hostname: "web-prod-01".to_string(),
                ip_address: Some("10.0.1.10".to_string()),
                memory_gb: Some(7.75),
                owner: Some("DevOps Team".to_string()),
                notes: Some("  line one\n  line two\n".to_string()),
                ..Default::default()
            })
            .unwrap();
        let db = testing::server(&mut store, "db-prod-01");
        reconcile(
            &mut store,
            "db-prod-01",
            &serde_json::json!({"system": {"cpu_cores": 16, "disk_gb": 512.5}}),
            &DiscoveryConfig::default(),
        )
        .unwrap();
        let mysql = testing::application(&mut store, "MySQL Database");
        let app = testing::service(&mut store, web.id, None, "ecommerce-app");
        let primary = store
            .create_service(&NewService {
                server_id: db.id,
                application_id: Some(mysql.id),
                service_name: "mysql-primary".to_string(),
                port: Some(3306),
                ..Default::default()
            })
            .unwrap();
        testing::edge(&mut store, app.id, primary.id);
        store
    }

    #[test]
    fn test_export_uses_schema_column_order() {
        let store = populated();
        let rows = export_all(&store, EntityKind::Servers);

        assert_eq!(rows.len(), 2);
        let columns: Vec<_> = rows[0].columns().collect();
        assert_eq!(&columns[..3], ["id", "hostname", "ip_address"]);
        assert_eq!(columns.last(), Some(&"updated_at"));
        assert_eq!(rows[0].get("hostname"), Some("web-prod-01"));
        assert_eq!(rows[0].get("memory_gb"), Some("7.75"));
        assert_eq!(rows[0].get("last_seen"), None);
    }

    #[test]
    fn test_export_stops_when_sink_fails() {
        let store = populated();
        let mut seen = 0;
        let result = export_rows(&store, EntityKind::Servers, |_| {
            seen += 1;
            Err(CmdbError::storage("consumer went away", false))
        });
        assert!(result.is_err());
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_round_trip_into_empty_store() {
        let source = populated();
        let mut target = testing::store();

        for kind in EntityKind::ALL {
            let summary = import_rows(&mut target, kind, export_all(&source, kind)).unwrap();
            assert!(summary.errors.is_empty(), "{kind}: {:?}", summary.errors);
            assert_eq!(summary.skipped, 0);
        }

        let servers = |s: &Store| {
            s.list_servers(&ServerQuery::default())
                .unwrap()
                .into_iter()
                .map(|mut srv| {
                    srv.created_at = chrono::DateTime::<Utc>::MIN_UTC;
                    srv.updated_at = chrono::DateTime::<Utc>::MIN_UTC;
                    srv
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(servers(&source), servers(&target));

        let app_names = |s: &Store| {
            s.list_applications(&ApplicationQuery::default())
                .unwrap()
                .into_iter()
                .map(|a| (a.id, a.name, a.criticality))
                .collect::<Vec<_>>()
        };
        assert_eq!(app_names(&source), app_names(&target));

        let service_keys = |s: &Store| {
            s.list_services(&ServiceQuery::default())
                .unwrap()
                .into_iter()
                .map(|svc| (svc.id, svc.server_id, svc.application_id, svc.service_name, svc.port, svc.protocol, svc.status))
                .collect::<Vec<_>>()
        };
        assert_eq!(service_keys(&source), service_keys(&target));

        let edges = |s: &Store| {
            s.list_dependencies(&DependencyQuery::default())
                .unwrap()
                .into_iter()
                .map(|d| (d.id, d.source_service_id, d.target_service_id, d.dependency_type))
                .collect::<Vec<_>>()
        };
        assert_eq!(edges(&source), edges(&target));
    }

    #[test]
    fn test_duplicates_are_skipped_and_bad_rows_reported() {
        let mut store = testing::store();
        testing::server(&mut store, "web-prod-01");

        let rows = vec![
            FlatRow::new().with("hostname", "web-prod-01").with("owner", "someone"),
            FlatRow::new().with("hostname", "db-prod-01").with("cpu_cores", "eight"),
            FlatRow::new().with("ip_address", "10.0.0.1"),
            FlatRow::new().with("hostname", "cache-prod-01").with("memory_gb", "-1"),
            FlatRow::new().with("hostname", "backup-01").with("os_type", "Linux"),
        ];

        let summary = import_rows(&mut store, EntityKind::Servers, rows).unwrap();
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errors.len(), 3);
        assert!(summary.errors[0].starts_with("row 2:"));

        let servers = store.list_servers(&ServerQuery::default()).unwrap();
        let names: Vec<_> = servers.iter().map(|s| s.hostname.as_str()).collect();
        assert_eq!(names, ["backup-01", "web-prod-01"]);
        assert_eq!(servers[1].owner, None);
    }

    #[test]
    fn test_import_rejects_unresolved_references_per_row() {
        let mut store = testing::store();
        let server = testing::server(&mut store, "web-01");

        let rows = vec![
            FlatRow::new().with("server_id", "77").with("service_name", "ghost"),
            FlatRow::new()
                .with("server_id", server.id.to_string())
                .with("service_name", "nginx")
                .with("port", "80"),
        ];
        let summary = import_rows(&mut store, EntityKind::Services, rows).unwrap();
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.errors.len(), 1);

        let services = store.list_services(&ServiceQuery::default()).unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].status, "running");
    }

    #[test]
    fn test_duplicate_edges_are_skipped() {
        let mut store = testing::store();
        let server = testing::server(&mut store, "web-01");
        let a = testing::service(&mut store, server.id, None, "a");
        let b = testing::service(&mut store, server.id, None, "b");
        testing::edge(&mut store, a.id, b.id);

        let row = FlatRow::new()
            .with("source_service_id", a.id.to_string())
            .with("target_service_id", b.id.to_string());
        let summary = import_rows(&mut store, EntityKind::Dependencies, vec![row]).unwrap();
        assert_eq!(summary, ImportSummary { imported: 0, skipped: 1, errors: vec![] });
    }

    #[test]
    fn test_self_loop_edges_import() {
        let mut store = testing::store();
        let server = testing::server(&mut store, "db-01");
        let mysql = testing::service(&mut store, server.id, None, "mysql");

        let row = FlatRow::new()
            .with("source_service_id", mysql.id.to_string())
            .with("target_service_id", mysql.id.to_string())
            .with("dependency_type", "replicates");
        let summary = import_rows(&mut store, EntityKind::Dependencies, vec![row]).unwrap();
        assert_eq!(summary.imported, 1);

        let edges = store.list_dependencies(&DependencyQuery::default()).unwrap();
        assert_eq!(edges[0].source_service_id, edges[0].target_service_id);
    }
}
