use std::collections::HashMap;
use rusqlite::Connection;
use shared::types::{
    AddedEdge, Dependency, DependencyQuery, EdgeDirection, GraphEdge, NewDependency, Server,
    ServerQuery, Service, ServiceQuery,
};
use crate::error::Result;
use crate::store::{dependencies, servers, services, Store};

/// Every dependency edge with both endpoints resolved to their service and
/// hosting server. Edges that don't fully resolve are left out.
pub fn list_edges(store: &Store) -> Result<Vec<GraphEdge>> {
    store.read(|conn| {
        let deps = dependencies::list(conn, &DependencyQuery::default())?;
        resolve(conn, deps)
    })
}

/// Edges leaving (`Outgoing`) or entering (`Incoming`) one service.
pub fn neighbors(store: &Store, service_id: i64, direction: EdgeDirection) -> Result<Vec<GraphEdge>> {
    store.read(|conn| {
        services::require(conn, service_id)?;
        let query = match direction {
            EdgeDirection::Outgoing => DependencyQuery {
                source_service_id: Some(service_id),
                ..Default::default()
            },
            EdgeDirection::Incoming => DependencyQuery {
                target_service_id: Some(service_id),
                ..Default::default()
            },
        };
        let deps = dependencies::list(conn, &query)?;
        resolve(conn, deps)
    })
}

/// Add a dependency edge.
///
/// Unknown endpoints are an `InvalidArgument`; an edge with the same source,
/// target and type is a `Conflict`. A self-loop is stored but reported back as
/// a warning.
pub fn add_edge(store: &mut Store, new: &NewDependency) -> Result<AddedEdge> {
    let dependency = store.create_dependency(new)?;

    let mut warnings = Vec::new();
    if let Some(warning) = self_loop_warning(
        dependency.id,
        dependency.source_service_id,
        dependency.target_service_id,
    ) {
        warnings.push(warning);
    } else {
        tracing::info!(
            "Service {} now {} service {}",
            dependency.source_service_id,
            dependency.dependency_type,
            dependency.target_service_id
        );
    }

    Ok(AddedEdge { dependency, warnings })
}

/// Logs and describes a dependency whose source and target are the same service.
pub(crate) fn self_loop_warning(dependency_id: i64, source: i64, target: i64) -> Option<String> {
    if source != target {
        return None;
    }
    tracing::warn!("Dependency {} is a self-loop on service {}", dependency_id, source);
    Some(format!("service {source} depends on itself"))
}

fn resolve(conn: &Connection, deps: Vec<Dependency>) -> Result<Vec<GraphEdge>> {
    if deps.is_empty() {
        return Ok(Vec::new());
    }

    let services: HashMap<i64, Service> = services::list(conn, &ServiceQuery::default())?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();
    let servers: HashMap<i64, Server> = servers::list(conn, &ServerQuery::default())?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

    let edges = deps
        .into_iter()
        .filter_map(|dependency| {
            let source = services.get(&dependency.source_service_id)?;
            let target = services.get(&dependency.target_service_id)?;
            let source_server = servers.get(&source.server_id)?;
            let target_server = servers.get(&target.server_id)?;
            Some(GraphEdge {
                source: source.clone(),
                target: target.clone(),
                source_server: source_server.clone(),
                target_server: target_server.clone(),
                dependency,
            })
        })
        .collect();

    Ok(edges)
}

#[cfg(test)]
mod tests {
    use crate::error::CmdbError;
    use crate::store::testing;
    use super::*;

    struct Topology {
        nginx: i64,
        app: i64,
        mysql: i64,
    }

    fn topology(store: &mut Store) -> Topology {
        let web = testing::server(store, "web-prod-01");
        let db = testing::server(store, "db-prod-01");
        let nginx = testing::service(store, web.id, None, "nginx-web").id;
        let app = testing::service(store, web.id, None, "ecommerce-app").id;
        let mysql = testing::service(store, db.id, None, "mysql-primary").id;
        testing::edge(store, nginx, app);
        testing::edge(store, app, mysql);
        Topology { nginx, app, mysql }
    }

    #[test]
    fn test_list_edges_resolves_servers() {
        let mut store = testing::store();
        let t = topology(&mut store);

        let edges = list_edges(&store).unwrap();
        assert_eq!(edges.len(), 2);

        let to_db = edges
            .iter()
            .find(|e| e.target.id == t.mysql)
            .unwrap();
        assert_eq!(to_db.source.service_name, "ecommerce-app");
        assert_eq!(to_db.source_server.hostname, "web-prod-01");
        assert_eq!(to_db.target_server.hostname, "db-prod-01");
    }

    #[test]
    fn test_neighbors_by_direction() {
        let mut store = testing::store();
        let t = topology(&mut store);

        let out = neighbors(&store, t.app, EdgeDirection::Outgoing).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].target.id, t.mysql);

        let incoming = neighbors(&store, t.app, EdgeDirection::Incoming).unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].source.id, t.nginx);

        assert!(neighbors(&store, t.nginx, EdgeDirection::Incoming).unwrap().is_empty());
        assert!(matches!(
            neighbors(&store, 999, EdgeDirection::Outgoing),
            Err(CmdbError::NotFound { .. })
        ));
    }

    #[test]
    fn test_add_edge_rejects_duplicates_and_unknown_endpoints() {
        let mut store = testing::store();
        let t = topology(&mut store);

        let dup = add_edge(&mut store, &NewDependency {
            source_service_id: t.app,
            target_service_id: t.mysql,
            ..Default::default()
        });
        assert!(matches!(dup, Err(CmdbError::Conflict(_))));

        let dangling = add_edge(&mut store, &NewDependency {
            source_service_id: t.app,
            target_service_id: 0,
            ..Default::default()
        });
        assert!(matches!(dangling, Err(CmdbError::InvalidArgument(_))));
        assert_eq!(list_edges(&store).unwrap().len(), 2);
    }

    #[test]
    fn test_self_loop_is_flagged() {
        let mut store = testing::store();
        let t = topology(&mut store);

        let added = add_edge(&mut store, &NewDependency {
            source_service_id: t.mysql,
            target_service_id: t.mysql,
            dependency_type: Some("replicates".to_string()),
            description: Some("Database replication".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(added.warnings.len(), 1);

        let clean = add_edge(&mut store, &NewDependency {
            source_service_id: t.nginx,
            target_service_id: t.mysql,
            ..Default::default()
        })
        .unwrap();
        assert!(clean.warnings.is_empty());
    }

    #[test]
    fn test_self_loop_warning_only_for_same_endpoints() {
        assert_eq!(
            self_loop_warning(7, 3, 3).as_deref(),
            Some("service 3 depends on itself")
        );
        assert_eq!(self_loop_warning(8, 3, 4), None);
    }

    #[test]
    fn test_dangling_edges_are_skipped_not_fatal() {
        let mut store = testing::store();
        let t = topology(&mut store);

        // Bypass the cascade to simulate a broken invariant
        testing::raw(&store)
            .execute_batch(&format!(
                "PRAGMA foreign_keys=OFF;
                 DELETE FROM services WHERE id = {};
                 PRAGMA foreign_keys=ON;",
                t.mysql
            ))
            .unwrap();

        let edges = list_edges(&store).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target.id, t.app);
    }
}
