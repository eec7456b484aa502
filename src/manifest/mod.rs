pub mod descriptor;

pub use descriptor::{Descriptor, DeploymentDescriptor, ServiceDescriptor};

use crate::model::{Deployment, NodePortRange, Service};
use crate::{Result, TinykubeError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Validated objects loaded from one or more YAML manifests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Manifest {
    pub deployments: Vec<Deployment>,
    pub services: Vec<Service>,
}

impl Manifest {
    /// Parse a multi-document YAML string. Empty documents are skipped.
    pub fn parse(content: &str, range: NodePortRange) -> Result<Self> {
        let mut manifest = Manifest::default();

        for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
            let value = serde_yaml::Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }

            let descriptor: Descriptor = serde_yaml::from_value(value).map_err(|e| {
                TinykubeError::Manifest(format!("document {}: {}", index + 1, e))
            })?;

            match descriptor {
                Descriptor::Deployment(d) => manifest.deployments.push(d.into_deployment()?),
                Descriptor::Service(s) => manifest.services.push(s.into_service(range)?),
            }
        }

        manifest.check_unique_names()?;
        Ok(manifest)
    }

    pub fn load(path: &Path, range: NodePortRange) -> Result<Self> {
        debug!("Loading manifest {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            TinykubeError::Manifest(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content, range)
            .map_err(|e| TinykubeError::Manifest(format!("{}: {}", path.display(), e)))
    }

    pub fn load_all<P: AsRef<Path>>(paths: &[P], range: NodePortRange) -> Result<Self> {
        let mut merged = Manifest::default();
        for path in paths {
            let manifest = Self::load(path.as_ref(), range)?;
            merged.deployments.extend(manifest.deployments);
            merged.services.extend(manifest.services);
        }
        merged.check_unique_names()?;
        Ok(merged)
    }

    fn check_unique_names(&self) -> Result<()> {
        let mut names = HashSet::new();
        for deployment in &self.deployments {
            if !names.insert(deployment.name.as_str()) {
                return Err(TinykubeError::Manifest(format!(
                    "deployment {} is defined more than once",
                    deployment.name
                )));
            }
        }

        names.clear();
        for service in &self.services {
            if !names.insert(service.name.as_str()) {
                return Err(TinykubeError::Manifest(format!(
                    "service {} is defined more than once",
                    service.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Protocol, ServiceType};

    const DEMO: &str = r#"
kind: Deployment
name: demo
replicas: 1
selector:
  matchLabels:
    app: demo
template:
  metadata:
    labels:
      app: demo
  spec:
    containers:
      - name: hello
        image: tinykube/responder:1.0
        ports:
          - containerPort: 8080
---
kind: Service
name: demo
type: NodePort
selector:
  app: demo
ports:
  - protocol: TCP
    port: 80
    targetPort: 8080
    nodePort: 30080
"#;

    #[test]
    fn test_parse_demo_manifest() {
        let manifest = Manifest::parse(DEMO, NodePortRange::default()).unwrap();

        assert_eq!(manifest.deployments.len(), 1);
        let deployment = &manifest.deployments[0];
        assert_eq!(deployment.name, "demo");
        assert_eq!(deployment.replicas, 1);
        assert_eq!(deployment.template.image.to_string(), "tinykube/responder:1.0");
        assert_eq!(deployment.template.container_ports, vec![8080]);

        assert_eq!(manifest.services.len(), 1);
        let service = &manifest.services[0];
        assert_eq!(service.service_type, ServiceType::NodePort);
        assert_eq!(service.ports[0].protocol, Protocol::Tcp);
        assert_eq!(service.ports[0].port, 80);
        assert_eq!(service.ports[0].target_port, 8080);
        assert_eq!(service.ports[0].node_port, Some(30080));
    }

    #[test]
    fn test_defaults() {
        let content = r#"
kind: Deployment
name: web
selector:
  matchLabels: {app: web}
template:
  metadata:
    labels: {app: web}
  spec:
    containers:
      - image: hello
---
---
kind: Service
name: web
selector: {app: web}
ports:
  - {}
"#;
        let manifest = Manifest::parse(content, NodePortRange::default()).unwrap();

        let deployment = &manifest.deployments[0];
        assert_eq!(deployment.replicas, 1);
        assert_eq!(deployment.template.container_ports, vec![8080]);
        assert_eq!(deployment.template.image.tag, "latest");

        let service = &manifest.services[0];
        assert_eq!(service.service_type, ServiceType::ClusterInternal);
        assert_eq!(service.ports[0].port, 80);
        assert_eq!(service.ports[0].target_port, 8080);
        assert_eq!(service.ports[0].node_port, None);
    }

    #[test]
    fn test_template_labels_must_cover_selector() {
        let content = DEMO.replacen("      app: demo\n  spec", "      app: other\n  spec", 1);
        let err = Manifest::parse(&content, NodePortRange::default()).unwrap_err();
        assert!(err.to_string().contains("does not match template labels"), "{}", err);
    }

    #[test]
    fn test_negative_replicas_rejected() {
        let content = DEMO.replacen("replicas: 1", "replicas: -2", 1);
        let err = Manifest::parse(&content, NodePortRange::default()).unwrap_err();
        assert!(err.to_string().contains("non-negative"), "{}", err);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = Manifest::parse("kind: Ingress\nname: x\n", NodePortRange::default()).unwrap_err();
        assert!(matches!(err, TinykubeError::Manifest(_)));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let content = format!("{}\n---\n{}", DEMO, DEMO);
        let err = Manifest::parse(&content, NodePortRange::default()).unwrap_err();
        assert!(err.to_string().contains("defined more than once"));
    }

    #[test]
    fn test_two_containers_rejected() {
        let content = DEMO.replacen(
            "          - containerPort: 8080\n",
            "          - containerPort: 8080\n      - image: sidecar:1\n",
            1,
        );
        let err = Manifest::parse(&content, NodePortRange::default()).unwrap_err();
        assert!(err.to_string().contains("only one container"), "{}", err);
    }
}
