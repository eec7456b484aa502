pub mod cli;
pub mod cluster;
pub mod controller;
pub mod error;
pub mod manifest;
pub mod metrics;
pub mod model;
pub mod router;
pub mod runtime;

pub use cluster::{Cluster, ClusterConfig};
pub use error::{Result, TinykubeError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the bundled responder image in the default catalog.
pub const RESPONDER_IMAGE: &str = "tinykube/responder";
