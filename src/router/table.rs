//! Immutable forwarding table snapshots
//!
//! A table is built in one go from the service set and the observed pods,
//! then published whole. Only the round-robin cursors mutate after build.

use crate::model::{Pod, Protocol, Service};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub service: String,
    pub protocol: Protocol,
    pub port: u16,
}

impl RouteKey {
    pub fn new(service: impl Into<String>, protocol: Protocol, port: u16) -> Self {
        Self {
            service: service.into(),
            protocol,
            port,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub pod_id: String,
    pub addr: SocketAddr,
}

#[derive(Debug)]
pub struct Route {
    pub target_port: u16,
    pub node_port: Option<u16>,
    pub endpoints: Vec<Endpoint>,
    cursor: AtomicUsize,
}

impl Route {
    /// Round-robin over the endpoints.
    pub fn pick(&self) -> Option<&Endpoint> {
        if self.endpoints.is_empty() {
            return None;
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        self.endpoints.get(i)
    }
}

#[derive(Debug, Default)]
pub struct ForwardingTable {
    version: u64,
    routes: HashMap<RouteKey, Route>,
}

impl ForwardingTable {
    /// Map every service port to the Running pods that match the service
    /// selector and expose the target port.
    pub fn build<'a, S>(version: u64, services: S, pods: &[Pod]) -> Self
    where
        S: IntoIterator<Item = &'a Service>,
    {
        let mut routes = HashMap::new();

        for service in services {
            let members: Vec<&Pod> = pods
                .iter()
                .filter(|pod| service.selector.matches(&pod.labels))
                .collect();

            for mapping in &service.ports {
                let endpoints = members
                    .iter()
                    .filter_map(|pod| {
                        pod.endpoint(mapping.target_port).map(|addr| Endpoint {
                            pod_id: pod.id.clone(),
                            addr,
                        })
                    })
                    .collect();

                routes.insert(
                    RouteKey::new(&service.name, mapping.protocol, mapping.port),
                    Route {
                        target_port: mapping.target_port,
                        node_port: mapping.node_port,
                        endpoints,
                        cursor: AtomicUsize::new(0),
                    },
                );
            }
        }

        Self { version, routes }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn route(&self, key: &RouteKey) -> Option<&Route> {
        self.routes.get(key)
    }

    pub fn routes(&self) -> impl Iterator<Item = (&RouteKey, &Route)> {
        self.routes.iter()
    }

    pub fn endpoint_count(&self) -> usize {
        self.routes.values().map(|r| r.endpoints.len()).sum()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
