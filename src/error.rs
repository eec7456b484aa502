use thiserror::Error;

#[derive(Error, Debug)]
pub enum TinykubeError {
    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Invalid {kind} {name}: {reason}")]
    Validation {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("Invalid image reference {reference:?}: {reason}")]
    InvalidImageRef { reference: String, reason: String },

    #[error("Deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("nodePort {port} is already allocated to service {owner}")]
    NodePortConflict { port: u16, owner: String },

    #[error("nodePort {port} is outside the allowed range {min}-{max}")]
    NodePortOutOfRange { port: u16, min: u16, max: u16 },

    #[error("No free nodePort left in range {min}-{max}")]
    NodePortsExhausted { min: u16, max: u16 },

    #[error("No endpoints available for {service} {protocol}/{port}")]
    NoEndpoints {
        service: String,
        protocol: String,
        port: u16,
    },

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TinykubeError {
    pub(crate) fn validation(
        kind: &'static str,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Validation {
            kind,
            name: name.into(),
            reason: reason.into(),
        }
    }
}

impl From<prometheus::Error> for TinykubeError {
    fn from(e: prometheus::Error) -> Self {
        Self::Metrics(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TinykubeError>;
