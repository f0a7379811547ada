pub mod applications;
pub mod dependencies;
pub mod hash;
pub mod history;
pub mod schema;
pub mod servers;
pub mod services;
pub mod stats;

use std::path::Path;
use std::time::Duration;
use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use shared::types::{
    Application, ApplicationPatch, ApplicationQuery, DeleteSummary, Dependency, DependencyPatch,
    DependencyQuery, DiscoveryRecord, InventoryStats, NewApplication, NewDependency, NewServer,
    NewService, Server, ServerPatch, ServerQuery, Service, ServiceListing, ServicePatch,
    ServiceQuery,
};
use crate::config::DefaultsConfig;
use crate::error::{CmdbError, Result};

/// The entity store. Owns the SQLite connection and every persisted row.
///
/// Each public operation runs in exactly one transaction; writers take the
/// database lock up front so that a busy database surfaces as a retryable
/// failure instead of a mid-transaction upgrade deadlock.
pub struct Store {
    conn: Connection,
    defaults: DefaultsConfig,
}

impl Store {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::open_with(path, Duration::from_secs(5))
    }

    pub fn open_with(path: impl AsRef<Path>, busy_timeout: Duration) -> anyhow::Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.busy_timeout(busy_timeout)
            .context("Failed to set busy timeout")?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL mode")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("Failed to enable foreign keys")?;

        conn.execute_batch(schema::SCHEMA)
            .context("Failed to create database schema")?;

        Ok(Self {
            conn,
            defaults: DefaultsConfig::default(),
        })
    }

    pub fn with_defaults(mut self, defaults: DefaultsConfig) -> Self {
        self.defaults = defaults;
        self
    }

    /// Run `op` inside one write transaction. Nothing persists unless `op` succeeds.
    pub(crate) fn write<T>(
        &mut self,
        op: impl FnOnce(&mut Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        write_tx(&mut self.conn, op)
    }

    /// Run `op` against one consistent read snapshot.
    pub(crate) fn read<T>(&self, op: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let value = op(&tx)?;
        tx.finish()?;
        Ok(value)
    }

    // --- servers ---

    pub fn create_server(&mut self, new: &NewServer) -> Result<Server> {
        let Store { conn, defaults } = self;
        write_tx(conn, |tx| {
            let values = servers::ServerValues::from_new(new, defaults);
            let id = servers::insert(tx, &values, now())?;
            tracing::info!("Registered server {} as id {}", values.hostname, id);
            servers::require(tx, id)
        })
    }

    pub fn get_server(&self, id: i64) -> Result<Server> {
        self.read(|conn| servers::require(conn, id))
    }

    pub fn find_server_by_hostname(&self, hostname: &str) -> Result<Option<Server>> {
        self.read(|conn| servers::find_by_hostname(conn, hostname.trim()))
    }

    pub fn list_servers(&self, query: &ServerQuery) -> Result<Vec<Server>> {
        self.read(|conn| servers::list(conn, query))
    }

    pub fn update_server(&mut self, id: i64, patch: &ServerPatch) -> Result<Server> {
        self.write(|tx| {
            servers::update(tx, id, patch, now())?;
            servers::require(tx, id)
        })
    }

    /// Delete a server together with its services, their edges and its scan history.
    pub fn delete_server(&mut self, id: i64) -> Result<DeleteSummary> {
        self.write(|tx| {
            let summary = servers::delete(tx, id)?;
            tracing::info!(
                "Deleted server {} ({} services, {} dependencies, {} discoveries)",
                id,
                summary.services_removed,
                summary.dependencies_removed,
                summary.discoveries_removed
            );
            Ok(summary)
        })
    }

    // --- applications ---

    pub fn create_application(&mut self, new: &NewApplication) -> Result<Application> {
        let Store { conn, defaults } = self;
        write_tx(conn, |tx| {
            let values = applications::ApplicationValues::from_new(new, defaults);
            let id = applications::insert(tx, &values, now())?;
            tracing::info!("Registered application {} as id {}", values.name, id);
            applications::require(tx, id)
        })
    }

    pub fn get_application(&self, id: i64) -> Result<Application> {
        self.read(|conn| applications::require(conn, id))
    }

    pub fn list_applications(&self, query: &ApplicationQuery) -> Result<Vec<Application>> {
        self.read(|conn| applications::list(conn, query))
    }

    pub fn update_application(&mut self, id: i64, patch: &ApplicationPatch) -> Result<Application> {
        self.write(|tx| {
            applications::update(tx, id, patch, now())?;
            applications::require(tx, id)
        })
    }

    /// Delete an application. Services running it stay, detached.
    pub fn delete_application(&mut self, id: i64) -> Result<DeleteSummary> {
        self.write(|tx| {
            let summary = applications::delete(tx, id, now())?;
            tracing::info!(
                "Deleted application {} ({} services detached)",
                id,
                summary.services_detached
            );
            Ok(summary)
        })
    }

    // --- services ---

    pub fn create_service(&mut self, new: &NewService) -> Result<Service> {
        let Store { conn, defaults } = self;
        write_tx(conn, |tx| {
            let values = services::ServiceValues::from_new(new, defaults);
            let id = services::insert(tx, &values, now())?;
            tracing::debug!("Created service {} on server {}", values.service_name, values.server_id);
            services::require(tx, id)
        })
    }

    pub fn get_service(&self, id: i64) -> Result<Service> {
        self.read(|conn| services::require(conn, id))
    }

    pub fn list_services(&self, query: &ServiceQuery) -> Result<Vec<Service>> {
        self.read(|conn| services::list(conn, query))
    }

    /// Services joined with their server's hostname and application's name.
    pub fn list_service_listings(&self, query: &ServiceQuery) -> Result<Vec<ServiceListing>> {
        self.read(|conn| services::list_with_context(conn, query))
    }

    pub fn update_service(&mut self, id: i64, patch: &ServicePatch) -> Result<Service> {
        self.write(|tx| {
            services::update(tx, id, patch, now())?;
            services::require(tx, id)
        })
    }

    pub fn delete_service(&mut self, id: i64) -> Result<DeleteSummary> {
        self.write(|tx| services::delete(tx, id))
    }

    // --- dependencies ---

    pub fn create_dependency(&mut self, new: &NewDependency) -> Result<Dependency> {
        self.write(|tx| {
            let values = dependencies::DependencyValues::from_new(new);
            let id = dependencies::insert(tx, &values, now())?;
            dependencies::require(tx, id)
        })
    }

    pub fn get_dependency(&self, id: i64) -> Result<Dependency> {
        self.read(|conn| dependencies::require(conn, id))
    }

    pub fn list_dependencies(&self, query: &DependencyQuery) -> Result<Vec<Dependency>> {
        self.read(|conn| dependencies::list(conn, query))
    }

    pub fn update_dependency(&mut self, id: i64, patch: &DependencyPatch) -> Result<Dependency> {
        self.write(|tx| {
            dependencies::update(tx, id, patch, now())?;
            dependencies::require(tx, id)
        })
    }

    pub fn delete_dependency(&mut self, id: i64) -> Result<()> {
        self.write(|tx| dependencies::delete(tx, id))
    }

    // --- history, stats ---

    /// Scan history of one server, newest first.
    pub fn list_discoveries(&self, server_id: i64, limit: Option<u32>) -> Result<Vec<DiscoveryRecord>> {
        self.read(|conn| {
            servers::require(conn, server_id)?;
            history::list_for_server(conn, server_id, limit)
        })
    }

    pub fn stats(&self) -> Result<InventoryStats> {
        self.read(stats::collect)
    }

    /// Fingerprint of the inventory's stable fields.
    pub fn inventory_hash(&self) -> Result<String> {
        self.read(hash::inventory_hash)
    }
}

fn write_tx<T>(
    conn: &mut Connection,
    op: impl FnOnce(&mut Transaction<'_>) -> Result<T>,
) -> Result<T> {
    let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = op(&mut tx)?;
    tx.commit()?;
    Ok(value)
}

/// Current time at the precision timestamps are stored with.
pub(crate) fn now() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_nanosecond(now.nanosecond() / 1_000 * 1_000).unwrap_or(now)
}

pub(crate) fn to_sql_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_time(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn time_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    parse_time(idx, &text)
}

pub(crate) fn opt_time_column(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| parse_time(idx, &t)).transpose()
}

/// Trimmed, non-empty text for a required field.
pub(crate) fn required_text(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CmdbError::invalid(format!("{field} is required")));
    }
    Ok(value.to_string())
}

pub(crate) fn check_count(field: &str, value: Option<i64>) -> Result<()> {
    match value {
        Some(v) if v < 0 => Err(CmdbError::invalid(format!("{field} must not be negative, got {v}"))),
        _ => Ok(()),
    }
}

pub(crate) fn check_capacity(field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => {
            Err(CmdbError::invalid(format!("{field} must be a non-negative number, got {v}")))
        }
        _ => Ok(()),
    }
}

/// Equality filters for list queries, AND-ed together.
#[derive(Default)]
pub(crate) struct Filter {
    clauses: Vec<String>,
    values: Vec<Value>,
}

impl Filter {
    pub(crate) fn eq_text(&mut self, column: &str, value: Option<&String>) -> &mut Self {
        if let Some(v) = value {
            self.values.push(Value::Text(v.clone()));
            self.clauses.push(format!("{column} = ?{}", self.values.len()));
        }
        self
    }

    pub(crate) fn eq_int(&mut self, column: &str, value: Option<i64>) -> &mut Self {
        if let Some(v) = value {
            self.values.push(Value::Integer(v));
            self.clauses.push(format!("{column} = ?{}", self.values.len()));
        }
        self
    }

    pub(crate) fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub(crate) fn params(&self) -> rusqlite::ParamsFromIter<std::slice::Iter<'_, Value>> {
        rusqlite::params_from_iter(self.values.iter())
    }
}


#[cfg(test)]
mod tests {
    use super::testing;
    use super::*;

    #[test]
    fn test_failed_write_leaves_no_partial_state() {
        let mut store = testing::store();

        let result: Result<()> = store.write(|tx| {
            let values = servers::ServerValues {
                hostname: "half-written".to_string(),
                ..Default::default()
            };
            servers::insert(tx, &values, now())?;
            Err(CmdbError::storage("simulated failure", true))
        });

        assert!(result.unwrap_err().is_retryable());
        assert!(store.find_server_by_hostname("half-written").unwrap().is_none());
    }

    #[test]
    fn test_timestamps_round_trip_at_stored_precision() {
        let t = now();
        assert_eq!(parse_time(0, &to_sql_time(&t)).unwrap(), t);
    }

    #[test]
    fn test_filter_numbers_placeholders_in_order() {
        let mut filter = Filter::default();
        filter
            .eq_text("environment", Some(&"staging".to_string()))
            .eq_text("status", None)
            .eq_int("server_id", Some(4));

        assert_eq!(filter.where_sql(), " WHERE environment = ?1 AND server_id = ?2");
    }

    #[test]
    fn test_negative_numbers_are_rejected() {
        assert!(check_count("cpu_cores", Some(-1)).is_err());
        assert!(check_count("cpu_cores", Some(0)).is_ok());
        assert!(check_capacity("memory_gb", Some(f64::NAN)).is_err());
        assert!(check_capacity("memory_gb", None).is_ok());
    }
}
