use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A managed host.
/// This is the canonical server record used by the store, the reconciler and the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: i64,

    /// Identity key, unique and case-sensitive, e.g. "db-prod-01"
    pub hostname: String,

    /// Network address as reported by discovery or the operator
    pub ip_address: Option<String>,

    /// OS family, e.g. "Linux"
    pub os_type: Option<String>,

    /// OS version string, bounded in length when it comes from a scan
    pub os_version: Option<String>,

    pub cpu_cores: Option<i64>,

    /// Memory capacity in GiB
    pub memory_gb: Option<f64>,

    /// Disk capacity in GiB
    pub disk_gb: Option<f64>,

    /// Free-form environment tag, e.g. "production"
    pub environment: Option<String>,

    /// Lifecycle status, "active" unless an operator says otherwise
    pub status: String,

    pub location: Option<String>,

    pub owner: Option<String>,

    pub notes: Option<String>,

    /// Last time a discovery scan saw this host; never set by hand
    pub last_seen: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when an operator registers a server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewServer {
    pub hostname: String,
    pub ip_address: Option<String>,
    pub os_type: Option<String>,
    pub os_version: Option<String>,
    pub cpu_cores: Option<i64>,
    pub memory_gb: Option<f64>,
    pub disk_gb: Option<f64>,
    pub environment: Option<String>,
    pub status: Option<String>,
    pub location: Option<String>,
    pub owner: Option<String>,
    pub notes: Option<String>,
}

/// Partial server update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerPatch {
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    pub os_type: Option<String>,
    pub os_version: Option<String>,
    pub cpu_cores: Option<i64>,
    pub memory_gb: Option<f64>,
    pub disk_gb: Option<f64>,
    pub environment: Option<String>,
    pub status: Option<String>,
    pub location: Option<String>,
    pub owner: Option<String>,
    pub notes: Option<String>,
}

/// A piece of software, independent of any host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    /// Identity key
    pub name: String,
    pub version: Option<String>,
    #[serde(rename = "type")]
    pub app_type: Option<String>,
    pub language: Option<String>,
    pub repository_url: Option<String>,
    pub documentation_url: Option<String>,
    pub owner: Option<String>,
    /// Criticality tier, e.g. "critical", "high", "medium"
    pub criticality: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewApplication {
    pub name: String,
    pub version: Option<String>,
    #[serde(rename = "type")]
    pub app_type: Option<String>,
    pub language: Option<String>,
    pub repository_url: Option<String>,
    pub documentation_url: Option<String>,
    pub owner: Option<String>,
    pub criticality: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationPatch {
    pub name: Option<String>,
    pub version: Option<String>,
    #[serde(rename = "type")]
    pub app_type: Option<String>,
    pub language: Option<String>,
    pub repository_url: Option<String>,
    pub documentation_url: Option<String>,
    pub owner: Option<String>,
    pub criticality: Option<String>,
    pub notes: Option<String>,
}

/// A running instance of an application on a server.
///
/// Deleting the server deletes the service; deleting the application only
/// clears `application_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
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
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewService {
    pub server_id: i64,
    pub application_id: Option<i64>,
    pub service_name: String,
    pub port: Option<i64>,
    pub protocol: Option<String>,
    pub status: Option<String>,
    pub process_name: Option<String>,
    pub start_command: Option<String>,
    pub config_file: Option<String>,
    pub log_file: Option<String>,
}

/// Partial service update.
///
/// `application_id` distinguishes "absent" (keep) from an explicit `null`
/// (detach from the application).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicePatch {
    pub server_id: Option<i64>,
    #[serde(deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub application_id: Option<Option<i64>>,
    pub service_name: Option<String>,
    pub port: Option<i64>,
    pub protocol: Option<String>,
    pub status: Option<String>,
    pub process_name: Option<String>,
    pub start_command: Option<String>,
    pub config_file: Option<String>,
    pub log_file: Option<String>,
}

/// A service together with the names of the records it hangs off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceListing {
    #[serde(flatten)]
    pub service: Service,
    pub hostname: Option<String>,
    pub application_name: Option<String>,
}

/// A directed edge: `source_service_id` depends on `target_service_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub id: i64,
    pub source_service_id: i64,
    pub target_service_id: i64,
    pub dependency_type: String,
    /// Overrides the target service's port for this edge
    pub port: Option<i64>,
    pub protocol: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewDependency {
    pub source_service_id: i64,
    pub target_service_id: i64,
    pub dependency_type: Option<String>,
    pub port: Option<i64>,
    pub protocol: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyPatch {
    pub dependency_type: Option<String>,
    pub port: Option<i64>,
    pub protocol: Option<String>,
    pub description: Option<String>,
}

/// Result of adding an edge. Self-loops are stored but flagged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddedEdge {
    pub dependency: Dependency,
    pub warnings: Vec<String>,
}

/// One fully resolved dependency edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub dependency: Dependency,
    pub source: Service,
    pub target: Service,
    pub source_server: Server,
    pub target_server: Server,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDirection {
    #[default]
    Outgoing,
    Incoming,
}

/// Immutable snapshot of one discovery scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    pub id: i64,
    pub server_id: i64,
    pub discovery_type: String,
    /// Raw scan facts, stored verbatim
    pub payload: serde_json::Value,
    pub discovered_at: DateTime<Utc>,
}

/// Point-in-time facts about one host, produced by an external scanner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanPayload {
    /// Tag stored on the discovery record, e.g. "local_discovery"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery_type: Option<String>,
    pub system: SystemFacts,
    #[serde(alias = "services")]
    pub processes: Vec<ProcessFact>,
    #[serde(alias = "connections")]
    pub sockets: Vec<SocketFact>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemFacts {
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    pub os_type: Option<String>,
    pub os_version: Option<String>,
    pub platform: Option<String>,
    pub architecture: Option<String>,
    pub processor: Option<String>,
    pub cpu_cores: Option<i64>,
    pub memory_gb: Option<f64>,
    pub disk_gb: Option<f64>,
}

/// One running process. Scanners report `null` for attributes they could not
/// read, so every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessFact {
    pub name: Option<String>,
    pub pid: Option<u32>,
    pub status: Option<String>,
    pub memory_percent: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketFact {
    pub port: Option<u16>,
    pub address: Option<String>,
    /// "tcp" or "udp"
    #[serde(rename = "type")]
    pub transport: Option<String>,
}

/// What the reconciler tells its caller. The raw payload is not echoed back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileResult {
    pub server_id: i64,
    pub discovery_id: i64,
    /// A new server row was created for this hostname
    pub created: bool,
    /// At least one machine-observed field differs from what was stored
    pub changed: bool,
    pub processes_observed: usize,
    pub sockets_observed: usize,
}

/// Rows removed or detached as a side effect of a delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSummary {
    pub services_removed: usize,
    pub dependencies_removed: usize,
    pub discoveries_removed: usize,
    pub services_detached: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerOrder {
    #[default]
    Hostname,
    /// Most recently created first
    Newest,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerQuery {
    pub environment: Option<String>,
    pub status: Option<String>,
    pub os_type: Option<String>,
    pub order: ServerOrder,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationQuery {
    pub criticality: Option<String>,
    #[serde(rename = "type")]
    pub app_type: Option<String>,
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceQuery {
    pub server_id: Option<i64>,
    pub application_id: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyQuery {
    pub source_service_id: Option<i64>,
    pub target_service_id: Option<i64>,
    pub dependency_type: Option<String>,
}

/// Read-only projection over the whole inventory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryStats {
    pub servers: ServerStats,
    pub applications: ApplicationStats,
    pub services: ServiceStats,
    pub dependencies: CountStats,
    pub discoveries: CountStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerStats {
    pub total: i64,
    pub active: i64,
    pub by_os: BTreeMap<String, i64>,
    pub by_environment: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationStats {
    pub total: i64,
    pub by_criticality: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub total: i64,
    pub running: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountStats {
    pub total: i64,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
