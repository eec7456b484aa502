//! In-process pod runtime
//!
//! Each pod becomes a task running one embedded responder per container
//! port, bound to an ephemeral port on the pod address. The bound
//! addresses play the role of the pod IP.

use crate::cluster::PodStore;
use crate::model::{ImageRef, Pod, PodStatusUpdate};
use crate::runtime::{ImageCatalog, ImageSpec, PodRuntime};
use dashmap::DashMap;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tinykube_responder::{Responder, ResponderConfig};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

pub struct LocalRuntime {
    catalog: ImageCatalog,
    store: PodStore,
    pod_address: IpAddr,
    running: DashMap<String, CancellationToken>,
    tracker: TaskTracker,
}

impl LocalRuntime {
    pub fn new(catalog: ImageCatalog, store: PodStore, pod_address: IpAddr) -> Self {
        Self {
            catalog,
            store,
            pod_address,
            running: DashMap::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn running_pods(&self) -> usize {
        self.running.len()
    }
}

impl PodRuntime for LocalRuntime {
    fn start(&self, pod: &Pod) {
        let token = CancellationToken::new();
        if let Some(previous) = self.running.insert(pod.id.clone(), token.clone()) {
            previous.cancel();
        }

        let job = PodJob {
            pod_id: pod.id.clone(),
            image: pod.image.clone(),
            spec: self.catalog.resolve(&pod.image).cloned(),
            ports: pod.container_ports.clone(),
            pod_address: self.pod_address,
            store: self.store.clone(),
        };
        self.tracker.spawn(job.run(token));
    }

    fn stop(&self, pod_id: &str) {
        if let Some((_, token)) = self.running.remove(pod_id) {
            debug!("Stopping pod {}", pod_id);
            token.cancel();
        }
    }

    fn shutdown(&self) {
        for entry in self.running.iter() {
            entry.value().cancel();
        }
        self.running.clear();
        self.tracker.close();
    }
}

struct PodJob {
    pod_id: String,
    image: ImageRef,
    spec: Option<ImageSpec>,
    ports: Vec<u16>,
    pod_address: IpAddr,
    store: PodStore,
}

impl PodJob {
    async fn run(self, token: CancellationToken) {
        let Some(spec) = self.spec else {
            warn!("Pod {}: image {} not found", self.pod_id, self.image);
            self.store.apply_update(PodStatusUpdate::crashed(
                &self.pod_id,
                format!("ImagePullBackOff: image {} not found", self.image),
            ));
            return;
        };

        let mut responders = Vec::with_capacity(self.ports.len());
        let mut endpoints = BTreeMap::new();
        for &container_port in &self.ports {
            let config = ResponderConfig {
                bind: self.pod_address,
                port: 0,
                greeting: spec.greeting.clone(),
            };
            let bound = match Responder::bind(&config).await {
                Ok(responder) => responder.local_addr().map(|addr| (responder, addr)),
                Err(e) => Err(e),
            };
            match bound {
                Ok((responder, addr)) => {
                    endpoints.insert(container_port, addr);
                    responders.push(responder);
                }
                Err(e) => {
                    warn!("Pod {} failed to start: {:#}", self.pod_id, e);
                    self.store.apply_update(PodStatusUpdate::crashed(
                        &self.pod_id,
                        format!("CrashLoopBackOff: {:#}", e),
                    ));
                    return;
                }
            }
        }

        if token.is_cancelled() {
            return;
        }

        info!("Pod {} running ({})", self.pod_id, self.image);
        self.store
            .apply_update(PodStatusUpdate::running(&self.pod_id, endpoints));

        let results = join_all(responders.into_iter().map(|r| r.serve(token.clone()))).await;
        if let Some(e) = results.into_iter().find_map(|r| r.err()) {
            self.store.apply_update(PodStatusUpdate::crashed(
                &self.pod_id,
                format!("CrashLoopBackOff: {:#}", e),
            ));
            return;
        }

        self.store
            .apply_update(PodStatusUpdate::terminated(&self.pod_id));
        debug!("Pod {} stopped", self.pod_id);
    }
}
