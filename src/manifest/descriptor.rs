//! Declarative descriptors as written by operators
//!
//! Field names follow the familiar Kubernetes shapes (`selector.matchLabels`,
//! `template.spec.containers[].ports[].containerPort`). Descriptors are
//! converted into the validated model types before anything runs.

use crate::model::{
    Deployment, ImageRef, Labels, NodePortRange, PodTemplate, PortMapping, Protocol, Selector,
    Service, ServiceType, DEFAULT_SERVICE_PORT,
};
use crate::{Result, TinykubeError};
use serde::{Deserialize, Serialize};
use tinykube_responder::DEFAULT_PORT as DEFAULT_CONTAINER_PORT;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Descriptor {
    Deployment(DeploymentDescriptor),
    Service(ServiceDescriptor),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentDescriptor {
    pub name: String,
    #[serde(default = "default_replicas")]
    pub replicas: i64,
    pub selector: SelectorDescriptor,
    pub template: TemplateDescriptor,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorDescriptor {
    #[serde(default)]
    pub match_labels: Labels,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDescriptor {
    #[serde(default)]
    pub metadata: MetadataDescriptor,
    pub spec: PodSpecDescriptor,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataDescriptor {
    #[serde(default)]
    pub labels: Labels,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodSpecDescriptor {
    #[serde(default)]
    pub containers: Vec<ContainerDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    pub image: String,
    #[serde(default)]
    pub ports: Vec<ContainerPortDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPortDescriptor {
    pub container_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub name: String,
    #[serde(rename = "type", default)]
    pub service_type: ServiceType,
    #[serde(default)]
    pub selector: Labels,
    #[serde(default)]
    pub ports: Vec<ServicePortDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePortDescriptor {
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_service_port")]
    pub port: u16,
    #[serde(default = "default_target_port")]
    pub target_port: u16,
    #[serde(default)]
    pub node_port: Option<u16>,
}

fn default_replicas() -> i64 {
    1
}

fn default_service_port() -> u16 {
    DEFAULT_SERVICE_PORT
}

fn default_target_port() -> u16 {
    DEFAULT_CONTAINER_PORT
}

impl DeploymentDescriptor {
    pub fn into_deployment(self) -> Result<Deployment> {
        let invalid = |reason: &str| TinykubeError::validation("deployment", &self.name, reason);

        let replicas = u32::try_from(self.replicas)
            .map_err(|_| invalid("replicas must be a non-negative integer"))?;

        let container = match self.template.spec.containers.as_slice() {
            [container] => container,
            [] => return Err(invalid("template must define exactly one container")),
            _ => return Err(invalid("only one container per pod is supported")),
        };

        let image = ImageRef::parse(&container.image)?;
        let container_ports = if container.ports.is_empty() {
            vec![DEFAULT_CONTAINER_PORT]
        } else {
            container.ports.iter().map(|p| p.container_port).collect()
        };

        let deployment = Deployment {
            name: self.name.clone(),
            replicas,
            selector: Selector::new(self.selector.match_labels.clone()),
            template: PodTemplate {
                labels: self.template.metadata.labels.clone(),
                image,
                container_ports,
            },
        };
        deployment.validate()?;
        Ok(deployment)
    }
}

impl ServiceDescriptor {
    pub fn into_service(self, range: NodePortRange) -> Result<Service> {
        let service = Service {
            name: self.name,
            service_type: self.service_type,
            selector: Selector::new(self.selector),
            ports: self
                .ports
                .into_iter()
                .map(|p| PortMapping {
                    protocol: p.protocol,
                    port: p.port,
                    target_port: p.target_port,
                    node_port: p.node_port,
                })
                .collect(),
        };
        service.validate(range)?;
        Ok(service)
    }
}
