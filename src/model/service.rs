use crate::model::Selector;
use crate::{Result, TinykubeError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

pub const DEFAULT_SERVICE_PORT: u16 = 80;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceType {
    /// Reachable only from inside the cluster.
    #[default]
    ClusterInternal,
    /// Also exposed on a fixed port of every node.
    NodePort,
    /// NodePort plus the service port on the external address.
    LoadBalancer,
}

impl ServiceType {
    pub fn exposes_node_ports(self) -> bool {
        matches!(self, ServiceType::NodePort | ServiceType::LoadBalancer)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Sctp => "SCTP",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub protocol: Protocol,
    pub port: u16,
    pub target_port: u16,
    pub node_port: Option<u16>,
}

/// Inclusive range nodePorts are allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePortRange {
    pub min: u16,
    pub max: u16,
}

impl NodePortRange {
    pub fn contains(&self, port: u16) -> bool {
        (self.min..=self.max).contains(&port)
    }
}

impl Default for NodePortRange {
    fn default() -> Self {
        Self {
            min: 30000,
            max: 32767,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub service_type: ServiceType,
    pub selector: Selector,
    pub ports: Vec<PortMapping>,
}

impl Service {
    pub fn validate(&self, range: NodePortRange) -> Result<()> {
        let invalid = |reason: String| TinykubeError::validation("service", &self.name, reason);

        if self.name.is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        if self.selector.is_empty() {
            return Err(invalid("selector must not be empty".to_string()));
        }
        if self.ports.is_empty() {
            return Err(invalid("at least one port is required".to_string()));
        }

        let mut seen = HashSet::new();
        for mapping in &self.ports {
            if mapping.port == 0 || mapping.target_port == 0 {
                return Err(invalid("ports must be between 1 and 65535".to_string()));
            }
            if !seen.insert((mapping.protocol, mapping.port)) {
                return Err(invalid(format!(
                    "duplicate port {}/{}",
                    mapping.protocol, mapping.port
                )));
            }
            if let Some(node_port) = mapping.node_port {
                if !self.service_type.exposes_node_ports() {
                    return Err(invalid(format!(
                        "nodePort {} requires type NodePort or LoadBalancer",
                        node_port
                    )));
                }
                if !range.contains(node_port) {
                    return Err(TinykubeError::NodePortOutOfRange {
                        port: node_port,
                        min: range.min,
                        max: range.max,
                    });
                }
            }
        }

        Ok(())
    }
}
