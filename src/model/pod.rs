use crate::model::{ImageRef, Labels};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodStatus {
    Pending,
    Running,
    CrashLoop,
    Terminated,
}

impl PodStatus {
    /// Pending and Running pods count toward a deployment's replicas.
    pub fn is_live(self) -> bool {
        matches!(self, PodStatus::Pending | PodStatus::Running)
    }

    /// Lifecycle: `Pending -> Running -> (Terminated | CrashLoop)`.
    /// Pending may crash directly; anything may be terminated; Terminated
    /// is final.
    pub fn can_transition_to(self, next: PodStatus) -> bool {
        use PodStatus::*;
        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Pending, Running) | (Pending, CrashLoop) | (Running, CrashLoop) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PodStatus::Pending => "Pending",
            PodStatus::Running => "Running",
            PodStatus::CrashLoop => "CrashLoop",
            PodStatus::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    pub id: String,
    /// Name of the deployment that created this pod.
    pub owner: Option<String>,
    pub labels: Labels,
    pub image: ImageRef,
    pub container_ports: Vec<u16>,
    pub status: PodStatus,
    /// Host address each container port is reachable on, set once Running.
    pub endpoints: BTreeMap<u16, SocketAddr>,
    /// Failure reason for a crash-looping pod.
    pub message: Option<String>,
    /// Store-assigned creation order, lower is older.
    pub created_seq: u64,
    pub created_at: DateTime<Utc>,
}

impl Pod {
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    pub fn endpoint(&self, container_port: u16) -> Option<SocketAddr> {
        if self.status != PodStatus::Running {
            return None;
        }
        self.endpoints.get(&container_port).copied()
    }
}

/// Asynchronous status report from a pod runtime.
#[derive(Debug, Clone)]
pub struct PodStatusUpdate {
    pub pod_id: String,
    pub status: PodStatus,
    pub endpoints: BTreeMap<u16, SocketAddr>,
    pub message: Option<String>,
}

impl PodStatusUpdate {
    pub fn running(pod_id: impl Into<String>, endpoints: BTreeMap<u16, SocketAddr>) -> Self {
        Self {
            pod_id: pod_id.into(),
            status: PodStatus::Running,
            endpoints,
            message: None,
        }
    }

    pub fn crashed(pod_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            pod_id: pod_id.into(),
            status: PodStatus::CrashLoop,
            endpoints: BTreeMap::new(),
            message: Some(message.into()),
        }
    }

    pub fn terminated(pod_id: impl Into<String>) -> Self {
        Self {
            pod_id: pod_id.into(),
            status: PodStatus::Terminated,
            endpoints: BTreeMap::new(),
            message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PodStatus::*;

    #[test]
    fn test_liveness() {
        assert!(Pending.is_live());
        assert!(Running.is_live());
        assert!(!CrashLoop.is_live());
        assert!(!Terminated.is_live());
    }

    #[test]
    fn test_transitions() {
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(CrashLoop));
        assert!(Running.can_transition_to(CrashLoop));
        assert!(Running.can_transition_to(Terminated));
        assert!(CrashLoop.can_transition_to(Terminated));

        assert!(!Running.can_transition_to(Pending));
        assert!(!CrashLoop.can_transition_to(Running));
        assert!(!Terminated.can_transition_to(Running));
        assert!(!Terminated.can_transition_to(Terminated));
    }
}
