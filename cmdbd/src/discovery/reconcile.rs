use serde_json::Value;
use shared::protocol::SERVER_STATUS_ACTIVE;
use shared::types::{ReconcileResult, ScanPayload};
use crate::config::DiscoveryConfig;
use crate::error::{CmdbError, Result};
use crate::store::servers::{self, Observation, ServerValues};
use crate::store::{history, now, Store};
use super::scan;

/// Merge one host scan into the inventory.
///
/// Looks the server up by hostname and either creates it from the scanned
/// facts or overwrites only the machine-observable fields, leaving
/// operator-curated metadata alone. Exactly one discovery record carrying
/// `payload` verbatim is appended. The upsert and the append commit together
/// or not at all.
pub fn reconcile(
    store: &mut Store,
    hostname: &str,
    payload: &Value,
    config: &DiscoveryConfig,
) -> Result<ReconcileResult> {
    let hostname = hostname.trim();
    if hostname.is_empty() {
        return Err(CmdbError::invalid("hostname is required"));
    }

    let scan: ScanPayload = serde_json::from_value(payload.clone())
        .map_err(|e| CmdbError::invalid(format!("malformed scan payload: {e}")))?;
    let seen = scan::observe(&scan.system, config.os_version_max_chars);
    seen.validate()?;

    let discovery_type = scan
        .discovery_type
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(&config.default_discovery_type);

    let result = store.write(|tx| {
        let now = now();

        let (server_id, created, changed) = match servers::find_by_hostname(tx, hostname)? {
            Some(existing) => {
                servers::record_observation(tx, existing.id, &seen, now)?;
                (existing.id, false, seen.differs_from(&existing))
            }
            None => {
                let values = new_server(hostname, &seen, now);
                match servers::insert(tx, &values, now) {
                    Ok(id) => (id, true, true),
                    // Another writer on the same database file won the race for this hostname
                    Err(CmdbError::Conflict(_)) => {
                        let existing = servers::find_by_hostname(tx, hostname)?.ok_or_else(|| {
                            CmdbError::storage(format!("server {hostname} vanished during reconcile"), true)
                        })?;
                        servers::record_observation(tx, existing.id, &seen, now)?;
                        (existing.id, false, seen.differs_from(&existing))
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let discovery_id = history::append(tx, server_id, discovery_type, payload, now)?;

        Ok(ReconcileResult {
            server_id,
            discovery_id,
            created,
            changed,
            processes_observed: scan.processes.len(),
            sockets_observed: scan.sockets.len(),
        })
    })?;

    tracing::info!(
        "Reconciled {} as server {} (created: {}, changed: {}, {} processes, {} sockets)",
        hostname,
        result.server_id,
        result.created,
        result.changed,
        result.processes_observed,
        result.sockets_observed
    );

    Ok(result)
}

fn new_server(hostname: &str, seen: &Observation, now: chrono::DateTime<chrono::Utc>) -> ServerValues {
    ServerValues {
        hostname: hostname.to_string(),
        ip_address: seen.ip_address.clone(),
        os_type: seen.os_type.clone(),
        os_version: seen.os_version.clone(),
        cpu_cores: seen.cpu_cores,
        memory_gb: seen.memory_gb,
        disk_gb: seen.disk_gb,
        status: SERVER_STATUS_ACTIVE.to_string(),
        last_seen: Some(now),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use shared::types::{NewServer, ServerPatch, ServerQuery};
    use crate::store::{history::count_for_server, testing};
    use super::*;

    fn config() -> DiscoveryConfig {
        DiscoveryConfig::default()
    }

    fn scan(cores: i64, memory: f64) -> Value {
        json!({
            "system": {
                "hostname": "host-a",
                "ip_address": "10.0.1.10",
                "os_type": "Linux",
                "os_version": "Ubuntu 22.04",
                "cpu_cores": cores,
                "memory_gb": memory,
                "disk_gb": 100.0
            },
            "services": [
                {"name": "nginx", "pid": 812, "status": "sleeping", "memory_percent": 0.4},
                {"name": "postgres", "pid": 901, "status": "running", "memory_percent": 2.1}
            ],
            "connections": [{"port": 443, "address": "0.0.0.0", "type": "tcp"}]
        })
    }

    #[test]
    fn test_first_scan_creates_active_server() {
        let mut store = testing::store();

        let result = reconcile(&mut store, "host-a", &scan(4, 8.0), &config()).unwrap();
        assert!(result.created);
        assert_eq!(result.processes_observed, 2);
        assert_eq!(result.sockets_observed, 1);

        let server = store.get_server(result.server_id).unwrap();
        assert_eq!(server.cpu_cores, Some(4));
        assert_eq!(server.status, "active");
        assert_eq!(server.environment, None);
        assert!(server.last_seen.is_some());
    }

    #[test]
    fn test_rescan_updates_same_row() {
        let mut store = testing::store();

        let first = reconcile(&mut store, "host-a", &scan(4, 8.0), &config()).unwrap();
        let second = reconcile(&mut store, "host-a", &scan(8, 16.0), &config()).unwrap();

        assert_eq!(first.server_id, second.server_id);
        assert!(!second.created);
        assert!(second.changed);

        let servers = store.list_servers(&ServerQuery::default()).unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].cpu_cores, Some(8));
        assert_eq!(servers[0].memory_gb, Some(16.0));
    }

    #[test]
    fn test_identical_rescan_reports_no_change() {
        let mut store = testing::store();
        reconcile(&mut store, "host-a", &scan(4, 8.0), &config()).unwrap();
        let again = reconcile(&mut store, "host-a", &scan(4, 8.0), &config()).unwrap();
        assert!(!again.changed);
    }

    #[test]
    fn test_operator_fields_survive_rescans() {
        let mut store = testing::store();
        let server = store
            .create_server(&NewServer {
                hostname: "host-a".to_string(),
                environment: Some("staging".to_string()),
                owner: Some("Dev Team".to_string()),
                notes: Some("Staging application server".to_string()),
                ..Default::default()
            })
            .unwrap();

        reconcile(&mut store, "host-a", &scan(4, 8.0), &config()).unwrap();
        store
            .update_server(server.id, &ServerPatch {
                status: Some("maintenance".to_string()),
                location: Some("rack 12".to_string()),
                ..Default::default()
            })
            .unwrap();
        reconcile(&mut store, "host-a", &scan(8, 16.0), &config()).unwrap();

        let server = store.get_server(server.id).unwrap();
        assert_eq!(server.cpu_cores, Some(8));
        assert_eq!(server.environment.as_deref(), Some("staging"));
        assert_eq!(server.owner.as_deref(), Some("Dev Team"));
        assert_eq!(server.notes.as_deref(), Some("Staging application server"));
        assert_eq!(server.status, "maintenance");
        assert_eq!(server.location.as_deref(), Some("rack 12"));
    }

    #[test]
    fn test_every_scan_appends_one_record() {
        let mut store = testing::store();
        let mut server_id = 0;
        for cores in 1..=5 {
            server_id = reconcile(&mut store, "host-a", &scan(cores, 8.0), &config())
                .unwrap()
                .server_id;
        }

        let count = store.read(|conn| count_for_server(conn, server_id)).unwrap();
        assert_eq!(count, 5);

        let latest = &store.list_discoveries(server_id, Some(1)).unwrap()[0];
        assert_eq!(latest.discovery_type, "local_discovery");
        assert_eq!(latest.payload, scan(5, 8.0));
    }

    #[test]
    fn test_hostname_is_trimmed_and_required() {
        let mut store = testing::store();
        let padded = reconcile(&mut store, "  host-a\n", &scan(4, 8.0), &config()).unwrap();
        let plain = reconcile(&mut store, "host-a", &scan(4, 8.0), &config()).unwrap();
        assert_eq!(padded.server_id, plain.server_id);

        let blank = reconcile(&mut store, "   ", &scan(4, 8.0), &config());
        assert!(matches!(blank, Err(CmdbError::InvalidArgument(_))));
    }

    #[test]
    fn test_invalid_scan_leaves_no_state() {
        let mut store = testing::store();

        let negative = reconcile(&mut store, "host-a", &scan(-4, 8.0), &config());
        assert!(matches!(negative, Err(CmdbError::InvalidArgument(_))));

        let malformed = reconcile(&mut store, "host-a", &json!({"system": "nope"}), &config());
        assert!(matches!(malformed, Err(CmdbError::InvalidArgument(_))));

        assert!(store.find_server_by_hostname("host-a").unwrap().is_none());
        assert_eq!(store.stats().unwrap().discoveries.total, 0);
    }

    #[test]
    fn test_os_version_is_bounded() {
        let mut store = testing::store();
        let long_version = "x".repeat(120);
        let payload = json!({
            "discovery_type": "agent_scan",
            "system": {"os_version": long_version}
        });

        let result = reconcile(&mut store, "host-b", &payload, &config()).unwrap();
        let server = store.get_server(result.server_id).unwrap();
        assert_eq!(server.os_version.unwrap().len(), 50);

        let record = &store.list_discoveries(result.server_id, None).unwrap()[0];
        assert_eq!(record.discovery_type, "agent_scan");
        assert_eq!(record.payload["system"]["os_version"].as_str().unwrap().len(), 120);
    }

    #[test]
    fn test_unobserved_fields_keep_previous_values() {
        let mut store = testing::store();
        reconcile(&mut store, "host-a", &scan(4, 8.0), &config()).unwrap();
        let partial = json!({"system": {"cpu_cores": 6}});

        let result = reconcile(&mut store, "host-a", &partial, &config()).unwrap();
        let server = store.get_server(result.server_id).unwrap();
        assert_eq!(server.cpu_cores, Some(6));
        assert_eq!(server.ip_address.as_deref(), Some("10.0.1.10"));
        assert_eq!(server.memory_gb, Some(8.0));
    }

    #[test]
    fn test_unreadable_process_attributes_are_accepted() {
        let mut store = testing::store();
        let payload = json!({
            "system": {"os_type": "Linux", "cpu_cores": 2},
            "services": [
                {"name": null, "pid": 1, "status": null, "memory_percent": null},
                {"name": "sshd", "pid": null}
            ],
            "connections": [{"port": null, "address": null, "type": "udp"}]
        });

        let result = reconcile(&mut store, "host-c", &payload, &config()).unwrap();
        assert_eq!(result.processes_observed, 2);
        assert_eq!(result.sockets_observed, 1);

        let record = &store.list_discoveries(result.server_id, None).unwrap()[0];
        assert_eq!(record.payload, payload);
    }
}
