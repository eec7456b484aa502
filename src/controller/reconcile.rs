//! Pure reconciliation: desired deployment + observed pods -> actions
//!
//! No I/O and no hidden state, so the same inputs always produce the same
//! actions. The controller task executes them.

use crate::model::{Deployment, Pod, PodStatus};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Create this many pods from the template.
    Create { count: u32 },
    /// Stop a pod and mark it Terminated.
    Terminate { pod_id: String },
    /// Remove a Terminated pod from the store.
    Reap { pod_id: String },
}

/// Compute the actions that move `observed` toward `desired`.
///
/// Only pods owned by the deployment are considered. CrashLoop pods are
/// not live: they are terminated and replaced in the same pass.
pub fn reconcile(desired: &Deployment, observed: &[Pod]) -> Vec<Action> {
    let mut actions = Vec::new();
    let mut live = Vec::new();

    for pod in observed.iter().filter(|p| desired.owns(p)) {
        match pod.status {
            PodStatus::Pending | PodStatus::Running => live.push(pod),
            PodStatus::CrashLoop => actions.push(Action::Terminate {
                pod_id: pod.id.clone(),
            }),
            PodStatus::Terminated => actions.push(Action::Reap {
                pod_id: pod.id.clone(),
            }),
        }
    }

    let want = desired.replicas as usize;
    match live.len().cmp(&want) {
        Ordering::Less => actions.push(Action::Create {
            count: (want - live.len()) as u32,
        }),
        Ordering::Greater => {
            live.sort_by(|a, b| scale_down_order(a, b));
            actions.extend(live.iter().take(live.len() - want).map(|pod| {
                Action::Terminate {
                    pod_id: pod.id.clone(),
                }
            }));
        }
        Ordering::Equal => {}
    }

    actions
}

/// Pending pods go first, then the oldest.
fn scale_down_order(a: &Pod, b: &Pod) -> Ordering {
    let rank = |pod: &Pod| match pod.status {
        PodStatus::Pending => 0,
        _ => 1,
    };
    rank(a)
        .cmp(&rank(b))
        .then(a.created_seq.cmp(&b.created_seq))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::store::tests::pod;
    use crate::model::{labels, ImageRef, PodTemplate, Selector, DEPLOYMENT_LABEL};

    fn deployment(replicas: u32) -> Deployment {
        Deployment {
            name: "demo".to_string(),
            replicas,
            selector: Selector::from([("app", "demo")]),
            template: PodTemplate {
                labels: labels([("app", "demo")]),
                image: ImageRef::new("hello", "1.0"),
                container_ports: vec![8080],
            },
        }
    }

    fn owned(id: &str, seq: u64, status: PodStatus) -> Pod {
        pod(
            id,
            seq,
            Some("demo"),
            labels([("app", "demo"), (DEPLOYMENT_LABEL, "demo")]),
            status,
        )
    }

    /// Apply actions the way the controller would, with new pods Running.
    fn apply(desired: &Deployment, pods: &mut Vec<Pod>, actions: &[Action]) {
        for action in actions {
            match action {
                Action::Create { count } => {
                    for _ in 0..*count {
                        let seq = pods.iter().map(|p| p.created_seq).max().unwrap_or(0) + 1;
                        let mut new = owned(&format!("demo-{}", seq), seq, PodStatus::Running);
                        new.labels = desired.pod_labels();
                        pods.push(new);
                    }
                }
                Action::Terminate { pod_id } => {
                    if let Some(p) = pods.iter_mut().find(|p| &p.id == pod_id) {
                        p.status = PodStatus::Terminated;
                    }
                }
                Action::Reap { pod_id } => pods.retain(|p| &p.id != pod_id),
            }
        }
    }

    fn live_count(desired: &Deployment, pods: &[Pod]) -> usize {
        pods.iter().filter(|p| desired.owns(p) && p.is_live()).count()
    }

    #[test]
    fn test_scale_up_from_nothing() {
        assert_eq!(reconcile(&deployment(3), &[]), vec![Action::Create { count: 3 }]);
    }

    #[test]
    fn test_matching_state_needs_nothing() {
        let pods = vec![owned("a", 1, PodStatus::Running), owned("b", 2, PodStatus::Pending)];
        assert!(reconcile(&deployment(2), &pods).is_empty());
    }

    #[test]
    fn test_scale_down_prefers_pending_then_oldest() {
        let pods = vec![
            owned("old", 1, PodStatus::Running),
            owned("mid", 2, PodStatus::Running),
            owned("new", 3, PodStatus::Running),
            owned("pending", 4, PodStatus::Pending),
        ];

        let actions = reconcile(&deployment(2), &pods);
        assert_eq!(
            actions,
            vec![
                Action::Terminate { pod_id: "pending".to_string() },
                Action::Terminate { pod_id: "old".to_string() },
            ]
        );
    }

    #[test]
    fn test_scale_to_zero() {
        let pods = vec![owned("a", 1, PodStatus::Running), owned("b", 2, PodStatus::Running)];
        assert_eq!(reconcile(&deployment(0), &pods).len(), 2);
    }

    #[test]
    fn test_crash_loop_is_replaced() {
        let pods = vec![owned("a", 1, PodStatus::Running), owned("b", 2, PodStatus::CrashLoop)];

        let actions = reconcile(&deployment(2), &pods);
        assert_eq!(
            actions,
            vec![
                Action::Terminate { pod_id: "b".to_string() },
                Action::Create { count: 1 },
            ]
        );
    }

    #[test]
    fn test_terminated_pods_are_reaped() {
        let pods = vec![owned("a", 1, PodStatus::Running), owned("gone", 2, PodStatus::Terminated)];
        assert_eq!(
            reconcile(&deployment(1), &pods),
            vec![Action::Reap { pod_id: "gone".to_string() }]
        );
    }

    #[test]
    fn test_foreign_pods_are_ignored() {
        let pods = vec![
            // matches the selector but was not created by this deployment
            pod("stray", 1, None, labels([("app", "demo")]), PodStatus::Running),
            // created by this deployment but relabeled out of the selector
            pod("moved", 2, Some("demo"), labels([("app", "debug")]), PodStatus::Running),
            pod("other", 3, Some("other"), labels([("app", "demo")]), PodStatus::Running),
        ];

        assert_eq!(reconcile(&deployment(1), &pods), vec![Action::Create { count: 1 }]);
    }

    #[test]
    fn test_converges_and_is_idempotent() {
        let desired = deployment(3);
        let mut pods = vec![
            owned("a", 1, PodStatus::CrashLoop),
            owned("b", 2, PodStatus::Running),
            owned("c", 3, PodStatus::Terminated),
        ];

        let mut passes = 0;
        loop {
            let actions = reconcile(&desired, &pods);
            if actions.is_empty() {
                break;
            }
            apply(&desired, &mut pods, &actions);
            passes += 1;
            assert!(passes <= 3, "did not converge: {:?}", pods);
        }

        assert_eq!(live_count(&desired, &pods), 3);
        assert!(reconcile(&desired, &pods).is_empty());
        assert!(reconcile(&desired, &pods).is_empty());
    }

    #[test]
    fn test_terminating_one_pod_brings_a_replacement() {
        let desired = deployment(2);
        let mut pods = vec![owned("a", 1, PodStatus::Running), owned("b", 2, PodStatus::Running)];

        apply(
            &desired,
            &mut pods,
            &[Action::Terminate { pod_id: "a".to_string() }],
        );
        assert_eq!(live_count(&desired, &pods), 1);

        let actions = reconcile(&desired, &pods);
        assert!(actions.contains(&Action::Create { count: 1 }));
        apply(&desired, &mut pods, &actions);
        assert_eq!(live_count(&desired, &pods), 2);
    }
}
