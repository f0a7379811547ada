use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use futures::Stream;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use shared::rows::{EntityKind, FlatRow, ImportSummary};
use shared::types::{
    AddedEdge, Application, ApplicationPatch, ApplicationQuery, DeleteSummary, Dependency,
    DependencyPatch, DependencyQuery, DiscoveryRecord, EdgeDirection, GraphEdge, InventoryStats,
    NewApplication, NewDependency, NewServer, NewService, ReconcileResult, Server, ServerPatch,
    ServerQuery, Service, ServiceListing, ServicePatch, ServiceQuery,
};
use crate::config::DiscoveryConfig;
use crate::discovery::reconcile;
use crate::error::{CmdbError, Result};
use crate::store::Store;
use crate::{bulk, graph};

/// Work shipped to the store thread. Returns whether it succeeded and a
/// closure that hands the result back to the caller.
type Job = Box<dyn FnOnce(&mut Store) -> (bool, Reply) + Send>;
type Reply = Box<dyn FnOnce()>;

/// Commands sent to the store thread
pub enum StoreCommand {
    Read(Job),
    /// Like `Read`, but the inventory hash is republished after a successful run
    Write(Job),
    Shutdown,
}

/// Handle to interact with the store thread.
///
/// Every operation is executed one at a time on a dedicated thread that owns
/// the SQLite connection, so writes (and in particular reconciles of the same
/// hostname) never interleave. Callers wait at most `request_timeout`; a
/// timed-out write may still commit.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
    discovery: Arc<DiscoveryConfig>,
    request_timeout: Duration,
}

impl StoreHandle {
    /// Spawn a new store thread owning `store`
    pub fn spawn(
        store: Store,
        hash_tx: watch::Sender<String>,
        discovery: DiscoveryConfig,
        request_timeout: Duration,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<StoreCommand>(256);

        thread::spawn(move || {
            let mut store = store;
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    StoreCommand::Read(job) => {
                        let (_, reply) = job(&mut store);
                        reply();
                    }
                    StoreCommand::Write(job) => {
                        let (ok, reply) = job(&mut store);
                        // Publish before replying so a caller never sees a stale hash after its write
                        if ok {
                            publish_hash(&store, &hash_tx);
                        }
                        reply();
                    }
                    StoreCommand::Shutdown => {
                        tracing::info!("Store thread shutting down");
                        break;
                    }
                }
            }
        });

        Self {
            tx,
            discovery: Arc::new(discovery),
            request_timeout,
        }
    }

    async fn call<T, F>(&self, mutates: bool, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Store) -> Result<T> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job: Job = Box::new(move |store| {
            let result = op(store);
            let ok = result.is_ok();
            let deliver: Reply = Box::new(move || {
                let _ = reply.send(result);
            });
            (ok, deliver)
        });
        let cmd = if mutates {
            StoreCommand::Write(job)
        } else {
            StoreCommand::Read(job)
        };

        let exchange = async {
            self.tx.send(cmd).await.map_err(|_| thread_gone())?;
            rx.await.map_err(|_| thread_gone())?
        };
        tokio::time::timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| {
                CmdbError::storage(
                    format!("store did not answer within {:?}", self.request_timeout),
                    true,
                )
            })?
    }

    // --- servers ---

    pub async fn create_server(&self, new: NewServer) -> Result<Server> {
        self.call(true, move |store| store.create_server(&new)).await
    }

    pub async fn get_server(&self, id: i64) -> Result<Server> {
        self.call(false, move |store| store.get_server(id)).await
    }

    pub async fn list_servers(&self, query: ServerQuery) -> Result<Vec<Server>> {
        self.call(false, move |store| store.list_servers(&query)).await
    }

    pub async fn update_server(&self, id: i64, patch: ServerPatch) -> Result<Server> {
        self.call(true, move |store| store.update_server(id, &patch)).await
    }

    pub async fn delete_server(&self, id: i64) -> Result<DeleteSummary> {
        self.call(true, move |store| store.delete_server(id)).await
    }

    pub async fn list_discoveries(&self, server_id: i64, limit: Option<u32>) -> Result<Vec<DiscoveryRecord>> {
        self.call(false, move |store| store.list_discoveries(server_id, limit)).await
    }

    // --- applications ---

    pub async fn create_application(&self, new: NewApplication) -> Result<Application> {
        self.call(true, move |store| store.create_application(&new)).await
    }

    pub async fn get_application(&self, id: i64) -> Result<Application> {
        self.call(false, move |store| store.get_application(id)).await
    }

    pub async fn list_applications(&self, query: ApplicationQuery) -> Result<Vec<Application>> {
        self.call(false, move |store| store.list_applications(&query)).await
    }

    pub async fn update_application(&self, id: i64, patch: ApplicationPatch) -> Result<Application> {
        self.call(true, move |store| store.update_application(id, &patch)).await
    }

    pub async fn delete_application(&self, id: i64) -> Result<DeleteSummary> {
        self.call(true, move |store| store.delete_application(id)).await
    }

    // --- services ---

    pub async fn create_service(&self, new: NewService) -> Result<Service> {
        self.call(true, move |store| store.create_service(&new)).await
    }

    pub async fn get_service(&self, id: i64) -> Result<Service> {
        self.call(false, move |store| store.get_service(id)).await
    }

    pub async fn list_service_listings(&self, query: ServiceQuery) -> Result<Vec<ServiceListing>> {
        self.call(false, move |store| store.list_service_listings(&query)).await
    }

    pub async fn update_service(&self, id: i64, patch: ServicePatch) -> Result<Service> {
        self.call(true, move |store| store.update_service(id, &patch)).await
    }

    pub async fn delete_service(&self, id: i64) -> Result<DeleteSummary> {
        self.call(true, move |store| store.delete_service(id)).await
    }

    // --- dependencies and the graph ---

    pub async fn get_dependency(&self, id: i64) -> Result<Dependency> {
        self.call(false, move |store| store.get_dependency(id)).await
    }

    pub async fn list_dependencies(&self, query: DependencyQuery) -> Result<Vec<Dependency>> {
        self.call(false, move |store| store.list_dependencies(&query)).await
    }

    pub async fn update_dependency(&self, id: i64, patch: DependencyPatch) -> Result<Dependency> {
        self.call(true, move |store| store.update_dependency(id, &patch)).await
    }

    pub async fn delete_dependency(&self, id: i64) -> Result<()> {
        self.call(true, move |store| store.delete_dependency(id)).await
    }

    pub async fn add_edge(&self, new: NewDependency) -> Result<AddedEdge> {
        self.call(true, move |store| graph::add_edge(store, &new)).await
    }

    pub async fn list_edges(&self) -> Result<Vec<GraphEdge>> {
        self.call(false, |store| graph::list_edges(store)).await
    }

    pub async fn neighbors(&self, service_id: i64, direction: EdgeDirection) -> Result<Vec<GraphEdge>> {
        self.call(false, move |store| graph::neighbors(store, service_id, direction)).await
    }

    // --- discovery ---

    /// Reconcile one scan for `hostname`
    pub async fn reconcile(&self, hostname: String, payload: Value) -> Result<ReconcileResult> {
        let discovery = self.discovery.clone();
        self.call(true, move |store| {
            reconcile::reconcile(store, &hostname, &payload, &discovery)
        })
        .await
    }

    // --- aggregates ---

    pub async fn stats(&self) -> Result<InventoryStats> {
        self.call(false, |store| store.stats()).await
    }

    // --- bulk transfer ---

    pub async fn import(&self, kind: EntityKind, rows: Vec<FlatRow>) -> Result<ImportSummary> {
        self.call(true, move |store| bulk::import_rows(store, kind, rows)).await
    }

    /// Stream every row of `kind`. Rows are produced as the consumer pulls
    /// them; dropping the stream stops the export. A consumer that stops
    /// pulling for longer than `request_timeout` gets a retryable error in
    /// place of the remaining rows, and the store thread moves on.
    pub async fn export(&self, kind: EntityKind) -> Result<impl Stream<Item = Result<FlatRow>> + Send + 'static> {
        let (row_tx, row_rx) = mpsc::channel::<Result<FlatRow>>(EXPORT_BUFFER + 1);
        let stall_limit = self.request_timeout;

        let job: Job = Box::new(move |store| {
            let result = bulk::export_rows(store, kind, |row| send_row(&row_tx, row, stall_limit));
            let ok = match result {
                Ok(count) => {
                    tracing::debug!("Exported {} {}", count, kind);
                    true
                }
                Err(e) => {
                    tracing::warn!("Export of {} stopped: {}", kind, e);
                    let _ = row_tx.try_send(Err(e));
                    false
                }
            };
            let done: Reply = Box::new(|| {});
            (ok, done)
        });

        tokio::time::timeout(self.request_timeout, self.tx.send(StoreCommand::Read(job)))
            .await
            .map_err(|_| CmdbError::storage("store queue is full", true))?
            .map_err(|_| thread_gone())?;

        Ok(futures::stream::unfold(row_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }))
    }

    /// Shutdown the store thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(StoreCommand::Shutdown)
            .await
            .map_err(|_| thread_gone())
    }
}

/// Rows buffered ahead of the export consumer. One more slot is kept free for
/// the error that ends a failed export.
const EXPORT_BUFFER: usize = 64;
const EXPORT_POLL: Duration = Duration::from_millis(5);

/// Hand one row to the export consumer without ever blocking the store
/// thread for longer than `stall_limit`.
fn send_row(tx: &mpsc::Sender<Result<FlatRow>>, row: FlatRow, stall_limit: Duration) -> Result<()> {
    let gone = || CmdbError::storage("export consumer went away", false);
    let deadline = Instant::now() + stall_limit;
    loop {
        if tx.is_closed() {
            return Err(gone());
        }
        if tx.capacity() > 1 {
            return tx.try_send(Ok(row)).map_err(|_| gone());
        }
        if Instant::now() >= deadline {
            return Err(CmdbError::storage(
                format!("export consumer stalled for {:?}", stall_limit),
                true,
            ));
        }
        thread::sleep(EXPORT_POLL);
    }
}

fn thread_gone() -> CmdbError {
    CmdbError::storage("store thread is not running", false)
}

fn publish_hash(store: &Store, hash_tx: &watch::Sender<String>) {
    match store.inventory_hash() {
        Ok(hash) => {
            hash_tx.send_if_modified(|current| {
                if *current == hash {
                    return false;
                }
                *current = hash;
                true
            });
        }
        Err(e) => tracing::error!("Failed to recompute inventory hash: {}", e),
    }
}
