use crate::model::{ImageRef, Labels, Pod, PodStatus, Selector};
use crate::{Result, TinykubeError};
use serde::{Deserialize, Serialize};

/// Label stamped on every pod a deployment creates.
pub const DEPLOYMENT_LABEL: &str = "tinykube.io/deployment";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodTemplate {
    pub labels: Labels,
    pub image: ImageRef,
    pub container_ports: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub name: String,
    pub replicas: u32,
    pub selector: Selector,
    pub template: PodTemplate,
}

impl Deployment {
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| TinykubeError::validation("deployment", &self.name, reason);

        if self.name.is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        if self.selector.is_empty() {
            return Err(invalid("selector must not be empty".to_string()));
        }
        if !self.selector.matches(&self.template.labels) {
            return Err(invalid(format!(
                "selector {} does not match template labels",
                self.selector
            )));
        }
        if self.template.labels.contains_key(DEPLOYMENT_LABEL) {
            return Err(invalid(format!(
                "template labels must not set reserved label {}",
                DEPLOYMENT_LABEL
            )));
        }
        if self.template.container_ports.contains(&0) {
            return Err(invalid("containerPort must be between 1 and 65535".to_string()));
        }

        Ok(())
    }

    /// Template labels plus the ownership label.
    pub fn pod_labels(&self) -> Labels {
        let mut labels = self.template.labels.clone();
        labels.insert(DEPLOYMENT_LABEL.to_string(), self.name.clone());
        labels
    }

    /// A deployment owns the pods it created that still match its selector.
    pub fn owns(&self, pod: &Pod) -> bool {
        pod.owner.as_deref() == Some(self.name.as_str()) && self.selector.matches(&pod.labels)
    }

    pub fn status(&self, pods: &[Pod]) -> DeploymentStatus {
        let owned = pods.iter().filter(|p| self.owns(p));
        let mut status = DeploymentStatus {
            desired: self.replicas,
            ..Default::default()
        };
        for pod in owned {
            match pod.status {
                PodStatus::Pending => status.replicas += 1,
                PodStatus::Running => {
                    status.replicas += 1;
                    status.ready_replicas += 1;
                }
                PodStatus::CrashLoop => status.crash_looping += 1,
                PodStatus::Terminated => {}
            }
        }
        status
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub desired: u32,
    /// Live pods (Pending or Running).
    pub replicas: u32,
    pub ready_replicas: u32,
    pub crash_looping: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::labels;

    fn demo() -> Deployment {
        Deployment {
            name: "demo".to_string(),
            replicas: 2,
            selector: Selector::from([("app", "demo")]),
            template: PodTemplate {
                labels: labels([("app", "demo"), ("tier", "web")]),
                image: ImageRef::new("hello", "1.0"),
                container_ports: vec![8080],
            },
        }
    }

    #[test]
    fn test_valid_deployment() {
        demo().validate().unwrap();
    }

    #[test]
    fn test_selector_must_be_subset_of_template_labels() {
        let mut deployment = demo();
        deployment.selector = Selector::from([("app", "other")]);
        let err = deployment.validate().unwrap_err();
        assert!(err.to_string().contains("does not match template labels"));
    }

    #[test]
    fn test_empty_selector_rejected() {
        let mut deployment = demo();
        deployment.selector = Selector::default();
        assert!(deployment.validate().is_err());
    }

    #[test]
    fn test_pod_labels_carry_identity() {
        let labels = demo().pod_labels();
        assert_eq!(labels.get("app").map(String::as_str), Some("demo"));
        assert_eq!(labels.get(DEPLOYMENT_LABEL).map(String::as_str), Some("demo"));
    }
}
