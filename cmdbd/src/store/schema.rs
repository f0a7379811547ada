/// Inventory schema. Foreign keys are declared for the backstop, but deletes
/// also walk the tree explicitly so that the counts can be reported.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS servers (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    hostname    TEXT NOT NULL UNIQUE CHECK (length(hostname) > 0),
    ip_address  TEXT,
    os_type     TEXT,
    os_version  TEXT,
    cpu_cores   INTEGER CHECK (cpu_cores IS NULL OR cpu_cores >= 0),
    memory_gb   REAL CHECK (memory_gb IS NULL OR memory_gb >= 0),
    disk_gb     REAL CHECK (disk_gb IS NULL OR disk_gb >= 0),
    environment TEXT,
    status      TEXT NOT NULL DEFAULT 'active',
    location    TEXT,
    owner       TEXT,
    notes       TEXT,
    last_seen   TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS applications (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    name              TEXT NOT NULL UNIQUE CHECK (length(name) > 0),
    version           TEXT,
    type              TEXT,
    language          TEXT,
    repository_url    TEXT,
    documentation_url TEXT,
    owner             TEXT,
    criticality       TEXT,
    notes             TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS services (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    server_id      INTEGER NOT NULL REFERENCES servers(id) ON DELETE CASCADE,
    application_id INTEGER REFERENCES applications(id) ON DELETE SET NULL,
    service_name   TEXT NOT NULL,
    port           INTEGER CHECK (port IS NULL OR port >= 0),
    protocol       TEXT,
    status         TEXT NOT NULL DEFAULT 'running',
    process_name   TEXT,
    start_command  TEXT,
    config_file    TEXT,
    log_file       TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_services_server ON services(server_id);
CREATE INDEX IF NOT EXISTS idx_services_application ON services(application_id);

CREATE TABLE IF NOT EXISTS dependencies (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    source_service_id INTEGER NOT NULL REFERENCES services(id) ON DELETE CASCADE,
    target_service_id INTEGER NOT NULL REFERENCES services(id) ON DELETE CASCADE,
    dependency_type   TEXT NOT NULL DEFAULT 'requires',
    port              INTEGER CHECK (port IS NULL OR port >= 0),
    protocol          TEXT,
    description       TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_dependencies_edge
    ON dependencies(source_service_id, target_service_id, dependency_type);
CREATE INDEX IF NOT EXISTS idx_dependencies_target ON dependencies(target_service_id);

CREATE TABLE IF NOT EXISTS discovery_history (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    server_id      INTEGER NOT NULL REFERENCES servers(id) ON DELETE CASCADE,
    discovery_type TEXT NOT NULL,
    data           TEXT NOT NULL,
    discovered_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_discovery_server ON discovery_history(server_id);
"#;
