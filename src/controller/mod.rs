//! Replica controller
//!
//! One [`DeploymentController`] task runs per deployment and is the only
//! writer of that deployment's pods. It wakes on pod store changes, spec
//! updates, a resync tick and backoff expiry, and executes the actions
//! computed by [`reconcile`].

pub mod backoff;
pub mod reconcile;

pub use backoff::CreateBackoff;
pub use reconcile::{reconcile, Action};

use crate::cluster::PodStore;
use crate::metrics::ClusterMetrics;
use crate::model::{Deployment, DeploymentStatus, Pod, PodStatus, PodStatusUpdate};
use crate::runtime::PodRuntime;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub resync_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(2),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

pub struct DeploymentController {
    spec: watch::Receiver<Deployment>,
    store: PodStore,
    runtime: Arc<dyn PodRuntime>,
    metrics: ClusterMetrics,
    config: ControllerConfig,
    backoff: CreateBackoff,
    last_status: Option<DeploymentStatus>,
}

impl DeploymentController {
    pub fn new(
        spec: watch::Receiver<Deployment>,
        store: PodStore,
        runtime: Arc<dyn PodRuntime>,
        metrics: ClusterMetrics,
        config: ControllerConfig,
    ) -> Self {
        let backoff = CreateBackoff::new(config.backoff_base, config.backoff_max);
        Self {
            spec,
            store,
            runtime,
            metrics,
            config,
            backoff,
            last_status: None,
        }
    }

    /// Reconcile until `shutdown` fires, then remove every owned pod.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let name = self.spec.borrow().name.clone();
        info!("Starting controller for deployment {}", name);

        let mut pods_changed = self.store.subscribe();
        let mut resync = tokio::time::interval(self.config.resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let retry_at = self.sync_once();

            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = self.spec.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    debug!("Deployment {} spec updated", name);
                }
                _ = pods_changed.changed() => {}
                _ = resync.tick() => {}
                _ = sleep_until(retry_at) => {
                    debug!("Creation backoff for {} expired", name);
                }
            }
        }

        self.teardown();
        info!("Stopped controller for deployment {}", name);
    }

    /// One reconciliation pass. Returns when deferred creations may retry.
    pub fn sync_once(&mut self) -> Option<Instant> {
        let desired = self.spec.borrow_and_update().clone();
        let observed = self.store.list();
        let now = Instant::now();

        let owned: Vec<&Pod> = observed.iter().filter(|p| desired.owns(p)).collect();
        self.backoff.observe(&owned, now);

        let mut retry_at = None;
        for action in reconcile(&desired, &observed) {
            match action {
                Action::Create { count } => {
                    if self.backoff.is_ready(now) {
                        for _ in 0..count {
                            self.create_pod(&desired);
                        }
                    } else {
                        retry_at = self.backoff.ready_at();
                        debug!(
                            "Deferring {} pod creation(s) for {} after {} failure(s)",
                            count,
                            desired.name,
                            self.backoff.failures()
                        );
                    }
                }
                Action::Terminate { pod_id } => self.terminate_pod(&desired.name, &pod_id),
                Action::Reap { pod_id } => {
                    debug!("Reaping pod {}", pod_id);
                    self.store.remove(&pod_id);
                }
            }
        }

        self.metrics.reconcile_pass(&desired.name);
        self.report_status(&desired);
        retry_at
    }

    fn create_pod(&self, deployment: &Deployment) {
        let seq = self.store.next_seq();
        let pod = Pod {
            id: format!("{}-{:05x}", deployment.name, seq),
            owner: Some(deployment.name.clone()),
            labels: deployment.pod_labels(),
            image: deployment.template.image.clone(),
            container_ports: deployment.template.container_ports.clone(),
            status: PodStatus::Pending,
            endpoints: BTreeMap::new(),
            message: None,
            created_seq: seq,
            created_at: Utc::now(),
        };

        info!("Creating pod {} for deployment {}", pod.id, deployment.name);
        self.store.insert(pod.clone());
        self.runtime.start(&pod);
        self.metrics.pod_created(&deployment.name);
    }

    fn terminate_pod(&self, deployment: &str, pod_id: &str) {
        if let Some(pod) = self.store.get(pod_id) {
            match &pod.message {
                Some(message) if pod.status == PodStatus::CrashLoop => {
                    warn!("Replacing crashed pod {}: {}", pod_id, message)
                }
                _ => info!("Terminating pod {} of deployment {}", pod_id, deployment),
            }
        }

        self.store.apply_update(PodStatusUpdate::terminated(pod_id));
        self.runtime.stop(pod_id);
        self.metrics.pod_terminated(deployment);
    }

    fn teardown(&self) {
        let desired = self.spec.borrow().clone();
        for pod in self.store.list().iter().filter(|p| desired.owns(p)) {
            if pod.status != PodStatus::Terminated {
                self.terminate_pod(&desired.name, &pod.id);
            }
            self.store.remove(&pod.id);
        }
        self.metrics.remove_deployment(&desired.name);
    }

    fn report_status(&mut self, desired: &Deployment) {
        let status = desired.status(&self.store.list());
        self.metrics
            .set_live_pods(&desired.name, i64::from(status.replicas));

        if self.last_status != Some(status) {
            info!(
                "Deployment {}: {}/{} ready, {} live, {} crash-looping",
                desired.name,
                status.ready_replicas,
                status.desired,
                status.replicas,
                status.crash_looping
            );
            self.last_status = Some(status);
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{labels, ImageRef, PodTemplate, Selector};
    use std::sync::Mutex;

    /// Runtime that records calls and leaves pods Pending.
    #[derive(Default)]
    struct RecordingRuntime {
        started: Mutex<Vec<String>>,
        stopped: Mutex<Vec<String>>,
    }

    impl PodRuntime for RecordingRuntime {
        fn start(&self, pod: &Pod) {
            self.started.lock().unwrap().push(pod.id.clone());
        }

        fn stop(&self, pod_id: &str) {
            self.stopped.lock().unwrap().push(pod_id.to_string());
        }
    }

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

    fn controller(
        replicas: u32,
    ) -> (
        DeploymentController,
        watch::Sender<Deployment>,
        PodStore,
        Arc<RecordingRuntime>,
    ) {
        let (tx, rx) = watch::channel(deployment(replicas));
        let store = PodStore::new();
        let runtime = Arc::new(RecordingRuntime::default());
        let controller = DeploymentController::new(
            rx,
            store.clone(),
            runtime.clone(),
            ClusterMetrics::new().unwrap(),
            ControllerConfig::default(),
        );
        (controller, tx, store, runtime)
    }

    #[tokio::test]
    async fn test_sync_creates_owned_pods_and_is_idempotent() {
        let (mut controller, _tx, store, runtime) = controller(3);

        controller.sync_once();
        assert_eq!(store.len(), 3);
        assert_eq!(runtime.started.lock().unwrap().len(), 3);
        for pod in store.list() {
            assert_eq!(pod.owner.as_deref(), Some("demo"));
            assert_eq!(pod.status, PodStatus::Pending);
            assert!(pod.id.starts_with("demo-"));
        }

        controller.sync_once();
        assert_eq!(store.len(), 3);
        assert_eq!(runtime.started.lock().unwrap().len(), 3);
        assert!(runtime.stopped.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spec_update_scales_down() {
        let (mut controller, tx, store, runtime) = controller(3);
        controller.sync_once();

        tx.send_replace(deployment(1));
        controller.sync_once();
        assert_eq!(runtime.stopped.lock().unwrap().len(), 2);

        // terminated pods are reaped on the following pass
        controller.sync_once();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_crash_loop_creation_is_backed_off() {
        let (mut controller, _tx, store, runtime) = controller(1);
        controller.sync_once();

        let first = store.list()[0].id.clone();
        store.apply_update(PodStatusUpdate::crashed(&first, "ImagePullBackOff: image hello:1.0 not found"));

        let retry_at = controller.sync_once();
        assert!(retry_at.is_some());
        assert_eq!(runtime.stopped.lock().unwrap().as_slice(), &[first]);
        // replacement deferred until the backoff expires
        assert_eq!(runtime.started.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_teardown_removes_owned_pods() {
        let (controller, _tx, store, _runtime) = controller(2);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(controller.run(shutdown.clone()));

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        task.await.unwrap();
        assert!(store.is_empty());
    }
}
