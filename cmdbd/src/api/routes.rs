use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use shared::protocol::API_PREFIX;
use shared::rows::{EntityKind, FlatRow, ImportSummary};
use shared::types::{
    AddedEdge, Application, ApplicationPatch, ApplicationQuery, DeleteSummary, Dependency,
    DependencyPatch, DependencyQuery, DiscoveryRecord, EdgeDirection, GraphEdge, InventoryStats,
    NewApplication, NewDependency, NewServer, NewService, ReconcileResult, Server, ServerPatch,
    ServerQuery, Service, ServiceListing, ServicePatch, ServiceQuery,
};
use crate::error::CmdbError;
use crate::store_manager::StoreHandle;
use super::error::ApiResult;

#[derive(Clone)]
pub struct AppState {
    pub store: StoreHandle,
    pub hash_rx: watch::Receiver<String>,
}

#[derive(Deserialize)]
pub struct HistoryParams {
    pub limit: Option<u32>,
}

#[derive(Deserialize)]
pub struct NeighborParams {
    #[serde(default)]
    pub direction: EdgeDirection,
}

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/stats", get(get_stats))
        .route("/inventory/hash", get(get_hash))
        .route("/servers", get(list_servers).post(create_server))
        .route(
            "/servers/:id",
            get(get_server).patch(update_server).delete(delete_server),
        )
        .route("/servers/:id/discoveries", get(list_discoveries))
        .route("/applications", get(list_applications).post(create_application))
        .route(
            "/applications/:id",
            get(get_application)
                .patch(update_application)
                .delete(delete_application),
        )
        .route("/services", get(list_services).post(create_service))
        .route(
            "/services/:id",
            get(get_service).patch(update_service).delete(delete_service),
        )
        .route("/dependencies", get(list_dependencies).post(add_dependency))
        .route(
            "/dependencies/:id",
            get(get_dependency)
                .patch(update_dependency)
                .delete(delete_dependency),
        )
        .route("/graph/edges", get(list_edges))
        .route("/graph/services/:id/neighbors", get(neighbors))
        .route("/discover/:hostname", post(discover))
        .route("/export/:table", get(export_table))
        .route("/import/:table", post(import_table));

    Router::new().nest(API_PREFIX, v1).with_state(state)
}

async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<InventoryStats>> {
    Ok(Json(state.store.stats().await?))
}

async fn get_hash(State(state): State<AppState>) -> String {
    state.hash_rx.borrow().clone()
}

// --- servers ---

async fn list_servers(
    State(state): State<AppState>,
    Query(query): Query<ServerQuery>,
) -> ApiResult<Json<Vec<Server>>> {
    Ok(Json(state.store.list_servers(query).await?))
}

async fn create_server(
    State(state): State<AppState>,
    Json(new): Json<NewServer>,
) -> ApiResult<(StatusCode, Json<Server>)> {
    let server = state.store.create_server(new).await?;
    Ok((StatusCode::CREATED, Json(server)))
}

async fn get_server(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Server>> {
    Ok(Json(state.store.get_server(id).await?))
}

async fn update_server(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<ServerPatch>,
) -> ApiResult<Json<Server>> {
    Ok(Json(state.store.update_server(id, patch).await?))
}

async fn delete_server(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<DeleteSummary>> {
    Ok(Json(state.store.delete_server(id).await?))
}

async fn list_discoveries(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<Vec<DiscoveryRecord>>> {
    Ok(Json(state.store.list_discoveries(id, params.limit).await?))
}

// --- applications ---

async fn list_applications(
    State(state): State<AppState>,
    Query(query): Query<ApplicationQuery>,
) -> ApiResult<Json<Vec<Application>>> {
    Ok(Json(state.store.list_applications(query).await?))
}

async fn create_application(
    State(state): State<AppState>,
    Json(new): Json<NewApplication>,
) -> ApiResult<(StatusCode, Json<Application>)> {
    let application = state.store.create_application(new).await?;
    Ok((StatusCode::CREATED, Json(application)))
}

async fn get_application(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Application>> {
    Ok(Json(state.store.get_application(id).await?))
}

async fn update_application(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<ApplicationPatch>,
) -> ApiResult<Json<Application>> {
    Ok(Json(state.store.update_application(id, patch).await?))
}

async fn delete_application(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<DeleteSummary>> {
    Ok(Json(state.store.delete_application(id).await?))
}

// --- services ---

async fn list_services(
    State(state): State<AppState>,
    Query(query): Query<ServiceQuery>,
) -> ApiResult<Json<Vec<ServiceListing>>> {
    Ok(Json(state.store.list_service_listings(query).await?))
}

async fn create_service(
    State(state): State<AppState>,
    Json(new): Json<NewService>,
) -> ApiResult<(StatusCode, Json<Service>)> {
    let service = state.store.create_service(new).await?;
    Ok((StatusCode::CREATED, Json(service)))
}

async fn get_service(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Service>> {
    Ok(Json(state.store.get_service(id).await?))
}

async fn update_service(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<ServicePatch>,
) -> ApiResult<Json<Service>> {
    Ok(Json(state.store.update_service(id, patch).await?))
}

async fn delete_service(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<DeleteSummary>> {
    Ok(Json(state.store.delete_service(id).await?))
}

// --- dependencies and the graph ---

async fn list_dependencies(
    State(state): State<AppState>,
    Query(query): Query<DependencyQuery>,
) -> ApiResult<Json<Vec<Dependency>>> {
    Ok(Json(state.store.list_dependencies(query).await?))
}

async fn add_dependency(
    State(state): State<AppState>,
    Json(new): Json<NewDependency>,
) -> ApiResult<(StatusCode, Json<AddedEdge>)> {
    let added = state.store.add_edge(new).await?;
    Ok((StatusCode::CREATED, Json(added)))
}

async fn get_dependency(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Dependency>> {
    Ok(Json(state.store.get_dependency(id).await?))
}

async fn update_dependency(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<DependencyPatch>,
) -> ApiResult<Json<Dependency>> {
    Ok(Json(state.store.update_dependency(id, patch).await?))
}

async fn delete_dependency(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.store.delete_dependency(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_edges(State(state): State<AppState>) -> ApiResult<Json<Vec<GraphEdge>>> {
    Ok(Json(state.store.list_edges().await?))
}

async fn neighbors(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<NeighborParams>,
) -> ApiResult<Json<Vec<GraphEdge>>> {
    Ok(Json(state.store.neighbors(id, params.direction).await?))
}

// --- discovery ---

async fn discover(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<Json<ReconcileResult>> {
    Ok(Json(state.store.reconcile(hostname, payload).await?))
}

// --- bulk transfer ---

fn parse_kind(table: &str) -> Result<EntityKind, CmdbError> {
    table.parse().map_err(CmdbError::InvalidArgument)
}

/// Newline-delimited JSON, one object per row, written as rows are read.
async fn export_table(State(state): State<AppState>, Path(table): Path<String>) -> ApiResult<Response> {
    let kind = parse_kind(&table)?;
    let rows = state.store.export(kind).await?;

    let lines = rows.map(|row| {
        row.and_then(|row| serde_json::to_vec(&row).map_err(CmdbError::from))
            .map(|mut line| {
                line.push(b'\n');
                line
            })
    });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}

async fn import_table(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Json(rows): Json<Vec<FlatRow>>,
) -> ApiResult<Json<ImportSummary>> {
    let kind = parse_kind(&table)?;
    Ok(Json(state.store.import(kind, rows).await?))
}
