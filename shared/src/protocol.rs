/// API path prefix
pub const API_PREFIX: &str = "/v1";

/// Discovery type recorded when a scan does not name one
pub const DEFAULT_DISCOVERY_TYPE: &str = "local_discovery";

/// Dependency type used when an edge is created without one
pub const DEFAULT_DEPENDENCY_TYPE: &str = "requires";

/// Lifecycle status given to every server created by discovery
pub const SERVER_STATUS_ACTIVE: &str = "active";

pub const SERVICE_STATUS_RUNNING: &str = "running";

/// Group key reported for servers whose OS family was never recorded
pub const UNKNOWN_GROUP: &str = "unknown";
