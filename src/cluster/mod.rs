//! Single-node cluster: pod store, runtime, controllers and router
//!
//! Deployments and services are applied declaratively. Each deployment
//! gets its own controller task; the router rebuilds its table on every pod
//! or service change.

pub mod store;

pub use store::PodStore;

use crate::controller::{ControllerConfig, DeploymentController};
use crate::manifest::Manifest;
use crate::metrics::ClusterMetrics;
use crate::model::{Deployment, DeploymentStatus, NodePortRange, Pod, PodStatusUpdate, Service};
use crate::router::{NodePortAllocator, Router, ServiceProxy};
use crate::runtime::{ImageCatalog, LocalRuntime, PodRuntime};
use crate::{Result, TinykubeError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Address NodePort listeners bind to.
    pub node_address: IpAddr,
    /// Address LoadBalancer service ports bind to.
    pub external_address: IpAddr,
    /// Address pod containers bind to.
    pub pod_address: IpAddr,
    pub node_port_range: NodePortRange,
    pub controller: ControllerConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            external_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            pod_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            node_port_range: NodePortRange::default(),
            controller: ControllerConfig::default(),
        }
    }
}

struct ControllerHandle {
    spec: watch::Sender<Deployment>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

pub struct Cluster {
    config: ClusterConfig,
    store: PodStore,
    runtime: Arc<dyn PodRuntime>,
    router: Arc<Router>,
    proxy: ServiceProxy,
    metrics: ClusterMetrics,
    controllers: DashMap<String, ControllerHandle>,
    node_ports: Mutex<NodePortAllocator>,
    router_shutdown: CancellationToken,
    router_task: Mutex<Option<JoinHandle<()>>>,
}

impl Cluster {
    /// Start a cluster that runs pods in-process. Must be called from
    /// within a tokio runtime.
    pub fn new(config: ClusterConfig, catalog: ImageCatalog) -> Result<Self> {
        let store = PodStore::new();
        let runtime = Arc::new(LocalRuntime::new(catalog, store.clone(), config.pod_address));
        Self::with_runtime(config, store, runtime)
    }

    pub fn with_runtime(
        config: ClusterConfig,
        store: PodStore,
        runtime: Arc<dyn PodRuntime>,
    ) -> Result<Self> {
        let metrics = ClusterMetrics::new()?;
        let router = Arc::new(Router::new(store.clone(), metrics.clone()));
        let proxy = ServiceProxy::new(
            router.clone(),
            metrics.clone(),
            config.node_address,
            config.external_address,
        );

        let router_shutdown = CancellationToken::new();
        let router_task = tokio::spawn(router.clone().run(router_shutdown.clone()));

        Ok(Self {
            node_ports: Mutex::new(NodePortAllocator::new(config.node_port_range)),
            config,
            store,
            runtime,
            router,
            proxy,
            metrics,
            controllers: DashMap::new(),
            router_shutdown,
            router_task: Mutex::new(Some(router_task)),
        })
    }

    /// Create a deployment, or replace the desired state of an existing one.
    pub fn apply_deployment(&self, deployment: Deployment) -> Result<()> {
        deployment.validate()?;

        let entry = match self.controllers.entry(deployment.name.clone()) {
            Entry::Occupied(handle) => {
                if handle.get().spec.borrow().selector != deployment.selector {
                    return Err(TinykubeError::validation(
                        "deployment",
                        &deployment.name,
                        "selector is immutable",
                    ));
                }
                info!(
                    "Updating deployment {} (replicas={})",
                    deployment.name, deployment.replicas
                );
                handle.get().spec.send_replace(deployment);
                return Ok(());
            }
            Entry::Vacant(entry) => entry,
        };

        info!(
            "Creating deployment {} (replicas={}, image={})",
            deployment.name, deployment.replicas, deployment.template.image
        );
        let (spec, spec_rx) = watch::channel(deployment);
        let shutdown = CancellationToken::new();
        let controller = DeploymentController::new(
            spec_rx,
            self.store.clone(),
            self.runtime.clone(),
            self.metrics.clone(),
            self.config.controller.clone(),
        );
        let task = tokio::spawn(controller.run(shutdown.clone()));

        entry.insert(ControllerHandle {
            spec,
            shutdown,
            task,
        });
        Ok(())
    }

    /// Stop reconciling a deployment and remove all of its pods. Returns
    /// once the pods are gone from the store.
    pub async fn delete_deployment(&self, name: &str) -> Result<()> {
        let (_, handle) = self
            .controllers
            .remove(name)
            .ok_or_else(|| TinykubeError::DeploymentNotFound(name.to_string()))?;

        info!("Deleting deployment {}", name);
        handle.shutdown.cancel();
        if let Err(e) = handle.task.await {
            warn!("Controller for {} ended abnormally: {}", name, e);
        }
        Ok(())
    }

    /// Create or replace a service. Missing nodePorts are filled in; the
    /// resolved service is returned.
    pub async fn apply_service(&self, mut service: Service) -> Result<Service> {
        service.validate(self.config.node_port_range)?;
        self.node_ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .allocate(&mut service)?;

        info!(
            "Applying service {} ({:?}, selector {})",
            service.name, service.service_type, service.selector
        );
        self.router.upsert_service(service.clone());
        self.router.rebuild();
        self.proxy.expose(&service).await;
        Ok(service)
    }

    pub async fn delete_service(&self, name: &str) -> Result<()> {
        self.router
            .remove_service(name)
            .ok_or_else(|| TinykubeError::ServiceNotFound(name.to_string()))?;

        info!("Deleting service {}", name);
        self.proxy.unexpose(name).await;
        self.node_ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(name);
        self.router.rebuild();
        Ok(())
    }

    pub async fn apply_manifest(&self, manifest: Manifest) -> Result<Vec<Service>> {
        for deployment in manifest.deployments {
            self.apply_deployment(deployment)?;
        }

        let mut services = Vec::with_capacity(manifest.services.len());
        for service in manifest.services {
            services.push(self.apply_service(service).await?);
        }
        Ok(services)
    }

    /// Stop a pod behind its controller's back, as if its process died.
    pub fn kill_pod(&self, pod_id: &str) -> bool {
        let killed = self.store.apply_update(PodStatusUpdate::terminated(pod_id));
        if killed {
            info!("Killed pod {}", pod_id);
            self.runtime.stop(pod_id);
        }
        killed
    }

    pub fn deployment(&self, name: &str) -> Option<Deployment> {
        self.controllers
            .get(name)
            .map(|handle| handle.spec.borrow().clone())
    }

    pub fn deployments(&self) -> Vec<Deployment> {
        let mut deployments: Vec<Deployment> = self
            .controllers
            .iter()
            .map(|handle| handle.spec.borrow().clone())
            .collect();
        deployments.sort_by(|a, b| a.name.cmp(&b.name));
        deployments
    }

    pub fn deployment_status(&self, name: &str) -> Result<DeploymentStatus> {
        let deployment = self
            .deployment(name)
            .ok_or_else(|| TinykubeError::DeploymentNotFound(name.to_string()))?;
        Ok(deployment.status(&self.store.list()))
    }

    pub fn services(&self) -> Vec<Service> {
        self.router.services()
    }

    pub fn pods(&self) -> Vec<Pod> {
        self.store.list()
    }

    pub fn store(&self) -> &PodStore {
        &self.store
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn metrics(&self) -> &ClusterMetrics {
        &self.metrics
    }

    /// NodePort address of a service port on this node.
    pub fn node_endpoint(&self, node_port: u16) -> SocketAddr {
        SocketAddr::new(self.config.node_address, node_port)
    }

    /// Delete every deployment, close all listeners and stop the router.
    pub async fn shutdown(&self) {
        info!("Shutting down cluster");

        let names: Vec<String> = self.controllers.iter().map(|h| h.key().clone()).collect();
        let deletions = names.iter().map(|name| self.delete_deployment(name));
        for result in join_all(deletions).await {
            if let Err(e) = result {
                warn!("Failed to delete deployment during shutdown: {}", e);
            }
        }

        self.proxy.shutdown().await;
        self.runtime.shutdown();

        self.router_shutdown.cancel();
        let task = self
            .router_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
