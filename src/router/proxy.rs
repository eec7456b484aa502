//! TCP listeners for NodePort and LoadBalancer services
//!
//! The endpoint for a connection is chosen from the latest table snapshot
//! when the connection is accepted. Without an endpoint the client socket is
//! closed straight away.

use crate::metrics::{outcome, ClusterMetrics};
use crate::model::{Protocol, Service, ServiceType};
use crate::router::{RouteKey, Router};
use dashmap::DashMap;
use futures::future::join_all;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

pub struct ServiceProxy {
    router: Arc<Router>,
    metrics: ClusterMetrics,
    node_address: IpAddr,
    external_address: IpAddr,
    listeners: DashMap<String, ServiceListeners>,
}

/// Accept loops of one service.
struct ServiceListeners {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ServiceListeners {
    /// Stop the accept loops and wait until their sockets are closed.
    async fn close(self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl ServiceProxy {
    pub fn new(
        router: Arc<Router>,
        metrics: ClusterMetrics,
        node_address: IpAddr,
        external_address: IpAddr,
    ) -> Self {
        Self {
            router,
            metrics,
            node_address,
            external_address,
            listeners: DashMap::new(),
        }
    }

    /// (Re)bind the listeners of a service. Previous listeners are closed
    /// before rebinding. Returns the addresses bound; bind failures are
    /// logged and leave that mapping unexposed.
    pub async fn expose(&self, service: &Service) -> Vec<SocketAddr> {
        self.unexpose(&service.name).await;

        let mut bound = Vec::new();
        if !service.service_type.exposes_node_ports() {
            return bound;
        }

        let listeners = ServiceListeners {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        };
        for mapping in &service.ports {
            if mapping.protocol != Protocol::Tcp {
                warn!(
                    "Service {} {}/{} is not proxied: only TCP listeners are supported",
                    service.name, mapping.protocol, mapping.port
                );
                continue;
            }

            let key = RouteKey::new(&service.name, mapping.protocol, mapping.port);
            let mut addrs = Vec::new();
            if let Some(node_port) = mapping.node_port {
                addrs.push(SocketAddr::new(self.node_address, node_port));
            }
            if service.service_type == ServiceType::LoadBalancer {
                addrs.push(SocketAddr::new(self.external_address, mapping.port));
            }

            for addr in addrs {
                let listener = match TcpListener::bind(addr).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        error!("Failed to expose service {} on {}: {}", service.name, addr, e);
                        continue;
                    }
                };
                let local = listener.local_addr().unwrap_or(addr);
                info!(
                    "Service {} listening on {} -> targetPort {}",
                    service.name, local, mapping.target_port
                );
                bound.push(local);

                listeners.tracker.spawn(accept_loop(
                    listener,
                    key.clone(),
                    self.router.clone(),
                    self.metrics.clone(),
                    listeners.token.clone(),
                ));
            }
        }

        if let Some(previous) = self.listeners.insert(service.name.clone(), listeners) {
            // listeners of a concurrent expose of the same service
            previous.close().await;
        }
        bound
    }

    /// Close the listeners of a service. Returns once their ports are free.
    pub async fn unexpose(&self, service: &str) {
        if let Some((_, listeners)) = self.listeners.remove(service) {
            debug!("Closing listeners of service {}", service);
            listeners.close().await;
        }
    }

    /// Close every listener and wait for the accept loops to exit.
    pub async fn shutdown(&self) {
        let names: Vec<String> = self.listeners.iter().map(|e| e.key().clone()).collect();
        join_all(names.iter().map(|name| self.unexpose(name))).await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    key: RouteKey,
    router: Arc<Router>,
    metrics: ClusterMetrics,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((client, peer)) => {
                    tokio::spawn(forward(router.clone(), metrics.clone(), key.clone(), client, peer));
                }
                Err(e) => {
                    warn!("Accept for service {} failed: {}", key.service, e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }
}

async fn forward(
    router: Arc<Router>,
    metrics: ClusterMetrics,
    key: RouteKey,
    mut client: TcpStream,
    peer: SocketAddr,
) {
    let endpoint = match router.pick(&key) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            debug!("Dropping connection from {}: {}", peer, e);
            metrics.connection(&key.service, outcome::NO_ENDPOINTS);
            return;
        }
    };

    let mut upstream = match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(endpoint.addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!("Pod {} at {} refused connection: {}", endpoint.pod_id, endpoint.addr, e);
            metrics.connection(&key.service, outcome::UPSTREAM_ERROR);
            return;
        }
        Err(_) => {
            debug!("Connecting to pod {} at {} timed out", endpoint.pod_id, endpoint.addr);
            metrics.connection(&key.service, outcome::UPSTREAM_ERROR);
            return;
        }
    };

    metrics.connection(&key.service, outcome::FORWARDED);
    match copy_bidirectional(&mut client, &mut upstream).await {
        Ok((sent, received)) => debug!(
            "{} -> pod {}: {} bytes sent, {} bytes received",
            peer, endpoint.pod_id, sent, received
        ),
        Err(e) => debug!("{} -> pod {} failed: {}", peer, endpoint.pod_id, e),
    }
}
