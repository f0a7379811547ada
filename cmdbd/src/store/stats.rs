use std::collections::BTreeMap;
use rusqlite::Connection;
use shared::protocol::{SERVER_STATUS_ACTIVE, SERVICE_STATUS_RUNNING, UNKNOWN_GROUP};
use shared::types::{
    ApplicationStats, CountStats, InventoryStats, ServerStats, ServiceStats,
};
use crate::error::Result;

pub(crate) fn collect(conn: &Connection) -> Result<InventoryStats> {
    Ok(InventoryStats {
        servers: ServerStats {
            total: count(conn, "SELECT COUNT(*) FROM servers", [])?,
            active: count(conn, "SELECT COUNT(*) FROM servers WHERE status = ?1", [SERVER_STATUS_ACTIVE])?,
            by_os: group(
                conn,
                "SELECT COALESCE(os_type, ?1), COUNT(*) FROM servers GROUP BY 1",
                [UNKNOWN_GROUP],
            )?,
            by_environment: group(
                conn,
                "SELECT environment, COUNT(*) FROM servers
                 WHERE environment IS NOT NULL GROUP BY environment",
                [],
            )?,
        },
        applications: ApplicationStats {
            total: count(conn, "SELECT COUNT(*) FROM applications", [])?,
            by_criticality: group(
                conn,
                "SELECT criticality, COUNT(*) FROM applications
                 WHERE criticality IS NOT NULL GROUP BY criticality",
                [],
            )?,
        },
        services: ServiceStats {
            total: count(conn, "SELECT COUNT(*) FROM services", [])?,
            running: count(conn, "SELECT COUNT(*) FROM services WHERE status = ?1", [SERVICE_STATUS_RUNNING])?,
        },
        dependencies: CountStats {
            total: count(conn, "SELECT COUNT(*) FROM dependencies", [])?,
        },
        discoveries: CountStats {
            total: count(conn, "SELECT COUNT(*) FROM discovery_history", [])?,
        },
    })
}

fn count<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<i64> {
    Ok(conn.query_row(sql, params, |row| row.get(0))?)
}

fn group<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<BTreeMap<String, i64>> {
    let mut stmt = conn.prepare(sql)?;
    let groups = stmt
        .query_map(params, |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<Result<BTreeMap<_, _>, _>>()?;
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use shared::types::{NewApplication, NewServer, NewService};
    use crate::store::testing;

    #[test]
    fn test_stats_group_and_count() {
        let mut store = testing::store();
        for (hostname, os, env) in [
            ("web-prod-01", Some("Linux"), "production"),
            ("db-staging-01", Some("Linux"), "staging"),
            ("dev-workstation-01", None, "development"),
        ] {
            store
                .create_server(&NewServer {
                    hostname: hostname.to_string(),
                    os_type: os.map(str::to_string),
                    environment: Some(env.to_string()),
                    ..Default::default()
                })
                .unwrap();
        }
        let retired = store
            .create_server(&NewServer {
                hostname: "old-01".to_string(),
                os_type: Some("Windows".to_string()),
                status: Some("retired".to_string()),
                ..Default::default()
            })
            .unwrap();
        store
            .create_application(&NewApplication {
                name: "Nginx".to_string(),
                criticality: Some("high".to_string()),
                ..Default::default()
            })
            .unwrap();
        store
            .create_service(&NewService {
                server_id: retired.id,
                service_name: "iis".to_string(),
                status: Some("stopped".to_string()),
                ..Default::default()
            })
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.servers.total, 4);
        assert_eq!(stats.servers.active, 3);
        assert_eq!(stats.servers.by_os.get("Linux"), Some(&2));
        assert_eq!(stats.servers.by_os.get("unknown"), Some(&1));
        assert_eq!(stats.servers.by_environment.get("production"), Some(&2));
        assert_eq!(stats.applications.by_criticality.get("high"), Some(&1));
        assert_eq!(stats.services.total, 1);
        assert_eq!(stats.services.running, 0);
        assert_eq!(stats.dependencies.total, 0);
    }
}
