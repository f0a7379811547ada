use rusqlite::Connection;
use serde::Serialize;
use sha2::{Digest, Sha256};
use shared::types::{ApplicationQuery, DependencyQuery, ServerQuery, ServiceQuery};
use crate::error::Result;
use super::{applications, dependencies, servers, services};

/// Hash every column except `last_seen` and the bookkeeping timestamps, which
/// move on every rescan but don't represent meaningful inventory changes.
#[derive(Serialize)]
struct ServerView<'a> {
    id: i64,
    hostname: &'a str,
    ip_address: Option<&'a str>,
    os_type: Option<&'a str>,
    os_version: Option<&'a str>,
    cpu_cores: Option<i64>,
    memory_gb: Option<f64>,
    disk_gb: Option<f64>,
    environment: Option<&'a str>,
    status: &'a str,
    location: Option<&'a str>,
    owner: Option<&'a str>,
    notes: Option<&'a str>,
}

#[derive(Serialize)]
struct ApplicationView<'a> {
    id: i64,
    name: &'a str,
    version: Option<&'a str>,
    app_type: Option<&'a str>,
    language: Option<&'a str>,
    repository_url: Option<&'a str>,
    documentation_url: Option<&'a str>,
    owner: Option<&'a str>,
    criticality: Option<&'a str>,
    notes: Option<&'a str>,
}

#[derive(Serialize)]
struct ServiceView<'a> {
    id: i64,
    server_id: i64,
    application_id: Option<i64>,
    service_name: &'a str,
    port: Option<i64>,
    protocol: Option<&'a str>,
    status: &'a str,
    process_name: Option<&'a str>,
    start_command: Option<&'a str>,
    config_file: Option<&'a str>,
    log_file: Option<&'a str>,
}

#[derive(Serialize)]
struct DependencyView<'a> {
    id: i64,
    source_service_id: i64,
    target_service_id: i64,
    dependency_type: &'a str,
    port: Option<i64>,
    protocol: Option<&'a str>,
    description: Option<&'a str>,
}

#[derive(Serialize)]
struct InventoryView<'a> {
    servers: Vec<ServerView<'a>>,
    applications: Vec<ApplicationView<'a>>,
    services: Vec<ServiceView<'a>>,
    dependencies: Vec<DependencyView<'a>>,
}

/// Computes a SHA-256 hex digest over the current inventory.
/// Rows are read in id order so the digest is deterministic.
pub(crate) fn inventory_hash(conn: &Connection) -> Result<String> {
    let mut all_servers = servers::list(conn, &ServerQuery::default())?;
    all_servers.sort_by_key(|s| s.id);
    let mut all_apps = applications::list(conn, &ApplicationQuery::default())?;
    all_apps.sort_by_key(|a| a.id);
    let mut all_services = services::list(conn, &ServiceQuery::default())?;
    all_services.sort_by_key(|s| s.id);
    let all_deps = dependencies::list(conn, &DependencyQuery::default())?;

    let view = InventoryView {
        servers: all_servers
            .iter()
            .map(|s| ServerView {
                id: s.id,
                hostname: &s.hostname,
                ip_address: s.ip_address.as_deref(),
                os_type: s.os_type.as_deref(),
                os_version: s.os_version.as_deref(),
                cpu_cores: s.cpu_cores,
                memory_gb: s.memory_gb,
                disk_gb: s.disk_gb,
                environment: s.environment.as_deref(),
                status: &s.status,
                location: s.location.as_deref(),
                owner: s.owner.as_deref(),
                notes: s.notes.as_deref(),
            })
            .collect(),
        applications: all_apps
            .iter()
            .map(|a| ApplicationView {
                id: a.id,
                name: &a.name,
                version: a.version.as_deref(),
                app_type: a.app_type.as_deref(),
                language: a.language.as_deref(),
                repository_url: a.repository_url.as_deref(),
                documentation_url: a.documentation_url.as_deref(),
                owner: a.owner.as_deref(),
                criticality: a.criticality.as_deref(),
                notes: a.notes.as_deref(),
            })
            .collect(),
        services: all_services
            .iter()
            .map(|s| ServiceView {
                id: s.id,
                server_id: s.server_id,
                application_id: s.application_id,
                service_name: &s.service_name,
                port: s.port,
                protocol: s.protocol.as_deref(),
                status: &s.status,
                process_name: s.process_name.as_deref(),
                start_command: s.start_command.as_deref(),
                config_file: s.config_file.as_deref(),
                log_file: s.log_file.as_deref(),
            })
            .collect(),
        dependencies: all_deps
            .iter()
            .map(|d| DependencyView {
                id: d.id,
                source_service_id: d.source_service_id,
                target_service_id: d.target_service_id,
                dependency_type: &d.dependency_type,
                port: d.port,
                protocol: d.protocol.as_deref(),
                description: d.description.as_deref(),
            })
            .collect(),
    };

    let json = serde_json::to_string(&view)?;
    Ok(hex::encode(Sha256::digest(json.as_bytes())))
}
