//! Label-selector service router
//!
//! The active [`ForwardingTable`] lives in an `ArcSwap`. Lookups load the
//! current snapshot without locking; rebuilds construct a complete new table
//! and swap it in, so a reader sees either the old or the new table and
//! never a mix. Rebuilds are serialized by a writer lock that readers never
//! touch.

pub mod ports;
pub mod proxy;
pub mod table;

pub use ports::NodePortAllocator;
pub use proxy::ServiceProxy;
pub use table::{Endpoint, ForwardingTable, Route, RouteKey};

use crate::cluster::PodStore;
use crate::metrics::ClusterMetrics;
use crate::model::{Protocol, Service};
use crate::{Result, TinykubeError};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct Router {
    table: ArcSwap<ForwardingTable>,
    services: DashMap<String, Service>,
    services_changed: watch::Sender<u64>,
    store: PodStore,
    metrics: ClusterMetrics,
    writer: Mutex<()>,
}

impl Router {
    pub fn new(store: PodStore, metrics: ClusterMetrics) -> Self {
        let (services_changed, _) = watch::channel(0);
        Self {
            table: ArcSwap::from_pointee(ForwardingTable::default()),
            services: DashMap::new(),
            services_changed,
            store,
            metrics,
            writer: Mutex::new(()),
        }
    }

    /// Latest published table.
    pub fn snapshot(&self) -> Arc<ForwardingTable> {
        self.table.load_full()
    }

    pub fn upsert_service(&self, service: Service) {
        self.services.insert(service.name.clone(), service);
        self.services_changed.send_modify(|g| *g += 1);
    }

    pub fn remove_service(&self, name: &str) -> Option<Service> {
        let removed = self.services.remove(name).map(|(_, s)| s);
        if removed.is_some() {
            self.services_changed.send_modify(|g| *g += 1);
        }
        removed
    }

    pub fn service(&self, name: &str) -> Option<Service> {
        self.services.get(name).map(|r| r.clone())
    }

    pub fn services(&self) -> Vec<Service> {
        let mut services: Vec<Service> = self.services.iter().map(|r| r.value().clone()).collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
    }

    /// Build and publish a new table from the current services and pods.
    pub fn rebuild(&self) -> u64 {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let version = self.table.load().version() + 1;
        let services = self.services();
        let pods = self.store.list();
        let table = ForwardingTable::build(version, &services, &pods);

        debug!(
            "Forwarding table v{}: {} routes, {} endpoints",
            version,
            table.len(),
            table.endpoint_count()
        );
        self.table.store(Arc::new(table));
        self.metrics.set_table_version(version);
        version
    }

    /// Rebuild whenever pods or services change.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("Starting service router");
        let mut pods = self.store.subscribe();
        let mut services = self.services_changed.subscribe();

        loop {
            self.rebuild();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = pods.changed() => {}
                _ = services.changed() => {}
            }
        }

        info!("Service router stopped");
    }

    /// Choose an endpoint for a service port from the latest snapshot.
    pub fn pick(&self, key: &RouteKey) -> Result<Endpoint> {
        self.snapshot()
            .route(key)
            .and_then(|route| route.pick())
            .cloned()
            .ok_or_else(|| TinykubeError::NoEndpoints {
                service: key.service.clone(),
                protocol: key.protocol.to_string(),
                port: key.port,
            })
    }

    /// Connect to a service port from inside the cluster.
    pub async fn dial(&self, service: &str, protocol: Protocol, port: u16) -> Result<TcpStream> {
        let endpoint = self.pick(&RouteKey::new(service, protocol, port))?;
        debug!("Dialing {} via pod {} at {}", service, endpoint.pod_id, endpoint.addr);
        Ok(TcpStream::connect(endpoint.addr).await?)
    }
}
