pub mod deployment;
pub mod image;
pub mod labels;
pub mod pod;
pub mod service;

pub use deployment::{Deployment, DeploymentStatus, PodTemplate, DEPLOYMENT_LABEL};
pub use image::ImageRef;
pub use labels::{labels, Labels, Selector};
pub use pod::{Pod, PodStatus, PodStatusUpdate};
pub use service::{NodePortRange, PortMapping, Protocol, Service, ServiceType, DEFAULT_SERVICE_PORT};
