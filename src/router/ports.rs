use crate::model::{NodePortRange, Protocol, Service};
use crate::{Result, TinykubeError};
use std::collections::BTreeMap;

/// Cluster-wide nodePort bookkeeping, per protocol.
#[derive(Debug, Default)]
pub struct NodePortAllocator {
    range: NodePortRange,
    allocated: BTreeMap<(Protocol, u16), String>,
}

impl NodePortAllocator {
    pub fn new(range: NodePortRange) -> Self {
        Self {
            range,
            allocated: BTreeMap::new(),
        }
    }

    /// Fill in missing nodePorts and claim all of the service's nodePorts.
    ///
    /// Ports previously held by the same service are released first. On
    /// error nothing changes.
    pub fn allocate(&mut self, service: &mut Service) -> Result<()> {
        if !service.service_type.exposes_node_ports() {
            self.release(&service.name);
            return Ok(());
        }

        let mut taken: BTreeMap<(Protocol, u16), String> = self
            .allocated
            .iter()
            .filter(|(_, owner)| **owner != service.name)
            .map(|(key, owner)| (*key, owner.clone()))
            .collect();

        for mapping in &service.ports {
            let Some(port) = mapping.node_port else {
                continue;
            };
            if !self.range.contains(port) {
                return Err(TinykubeError::NodePortOutOfRange {
                    port,
                    min: self.range.min,
                    max: self.range.max,
                });
            }
            if let Some(owner) = taken.insert((mapping.protocol, port), service.name.clone()) {
                return Err(TinykubeError::NodePortConflict { port, owner });
            }
        }

        let mut assigned = Vec::new();
        for (index, mapping) in service.ports.iter().enumerate() {
            if mapping.node_port.is_none() {
                let port = (self.range.min..=self.range.max)
                    .find(|&p| !taken.contains_key(&(mapping.protocol, p)))
                    .ok_or(TinykubeError::NodePortsExhausted {
                        min: self.range.min,
                        max: self.range.max,
                    })?;
                taken.insert((mapping.protocol, port), service.name.clone());
                assigned.push((index, port));
            }
        }

        for (index, port) in assigned {
            service.ports[index].node_port = Some(port);
        }
        self.allocated = taken;
        Ok(())
    }

    pub fn release(&mut self, service: &str) {
        self.allocated.retain(|_, owner| owner != service);
    }

    pub fn owner(&self, protocol: Protocol, port: u16) -> Option<&str> {
        self.allocated.get(&(protocol, port)).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PortMapping, Selector, ServiceType};

    fn service(name: &str, node_ports: &[Option<u16>]) -> Service {
        Service {
            name: name.to_string(),
            service_type: ServiceType::NodePort,
            selector: Selector::from([("app", name)]),
            ports: node_ports
                .iter()
                .enumerate()
                .map(|(i, node_port)| PortMapping {
                    protocol: Protocol::Tcp,
                    port: 80 + i as u16,
                    target_port: 8080,
                    node_port: *node_port,
                })
                .collect(),
        }
    }

    #[test]
    fn test_assigns_lowest_free_port() {
        let mut allocator = NodePortAllocator::new(NodePortRange::default());
        let mut first = service("a", &[Some(30000), None]);
        allocator.allocate(&mut first).unwrap();
        assert_eq!(first.ports[1].node_port, Some(30001));

        let mut second = service("b", &[None]);
        allocator.allocate(&mut second).unwrap();
        assert_eq!(second.ports[0].node_port, Some(30002));
    }

    #[test]
    fn test_conflicting_explicit_port() {
        let mut allocator = NodePortAllocator::new(NodePortRange::default());
        allocator.allocate(&mut service("a", &[Some(30080)])).unwrap();

        let err = allocator
            .allocate(&mut service("b", &[Some(30080)]))
            .unwrap_err();
        assert!(matches!(err, TinykubeError::NodePortConflict { port: 30080, ref owner } if owner == "a"));
        assert_eq!(allocator.owner(Protocol::Tcp, 30080), Some("a"));
    }

    #[test]
    fn test_reapply_keeps_own_ports() {
        let mut allocator = NodePortAllocator::new(NodePortRange::default());
        allocator.allocate(&mut service("a", &[Some(30080)])).unwrap();
        allocator.allocate(&mut service("a", &[Some(30080)])).unwrap();

        allocator.release("a");
        assert_eq!(allocator.owner(Protocol::Tcp, 30080), None);
    }

    #[test]
    fn test_tcp_and_udp_share_a_node_port() {
        let mut allocator = NodePortAllocator::new(NodePortRange::default());
        let mut dns = service("dns", &[Some(30053), Some(30053)]);
        dns.ports[1].protocol = Protocol::Udp;
        dns.ports[1].port = 80;

        allocator.allocate(&mut dns).unwrap();
        assert_eq!(allocator.owner(Protocol::Tcp, 30053), Some("dns"));
        assert_eq!(allocator.owner(Protocol::Udp, 30053), Some("dns"));

        // the same protocol and port twice is still a conflict
        let mut twice = service("twice", &[Some(30054), Some(30054)]);
        assert!(matches!(
            allocator.allocate(&mut twice),
            Err(TinykubeError::NodePortConflict { port: 30054, .. })
        ));
        assert_eq!(allocator.owner(Protocol::Tcp, 30054), None);
    }

    #[test]
    fn test_exhausted_range() {
        let mut allocator = NodePortAllocator::new(NodePortRange { min: 30000, max: 30000 });
        allocator.allocate(&mut service("a", &[None])).unwrap();
        let err = allocator.allocate(&mut service("b", &[None])).unwrap_err();
        assert!(matches!(err, TinykubeError::NodePortsExhausted { .. }));
    }
}
