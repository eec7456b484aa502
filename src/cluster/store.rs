//! Observed pod set shared by controllers, runtimes and the router
//!
//! Every mutation bumps a generation counter published on a `watch`
//! channel, so observers wake up on change without polling the map.

use crate::model::{Labels, Pod, PodStatusUpdate, Selector};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

struct StoreInner {
    pods: DashMap<String, Pod>,
    next_seq: AtomicU64,
    generation: watch::Sender<u64>,
}

/// Thread-safe pod store
#[derive(Clone)]
pub struct PodStore {
    inner: Arc<StoreInner>,
}

impl PodStore {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            inner: Arc::new(StoreInner {
                pods: DashMap::new(),
                next_seq: AtomicU64::new(1),
                generation,
            }),
        }
    }

    /// Allocate the next creation sequence number.
    pub fn next_seq(&self) -> u64 {
        self.inner.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, pod: Pod) {
        self.inner.pods.insert(pod.id.clone(), pod);
        self.bump();
    }

    pub fn get(&self, pod_id: &str) -> Option<Pod> {
        self.inner.pods.get(pod_id).map(|r| r.clone())
    }

    pub fn remove(&self, pod_id: &str) -> Option<Pod> {
        let removed = self.inner.pods.remove(pod_id).map(|(_, pod)| pod);
        if removed.is_some() {
            self.bump();
        }
        removed
    }

    /// Apply a runtime status report. Reports that would break the pod
    /// lifecycle (or refer to a removed pod) are ignored.
    pub fn apply_update(&self, update: PodStatusUpdate) -> bool {
        let applied = match self.inner.pods.get_mut(&update.pod_id) {
            Some(mut pod) if pod.status.can_transition_to(update.status) => {
                debug!(
                    "Pod {} {} -> {}",
                    update.pod_id, pod.status, update.status
                );
                pod.status = update.status;
                pod.endpoints = update.endpoints;
                pod.message = update.message;
                true
            }
            Some(pod) => {
                debug!(
                    "Ignoring {} for pod {} in state {}",
                    update.status, update.pod_id, pod.status
                );
                false
            }
            None => false,
        };

        if applied {
            self.bump();
        }
        applied
    }

    /// Replace a pod's labels.
    pub fn relabel(&self, pod_id: &str, labels: Labels) -> bool {
        let found = match self.inner.pods.get_mut(pod_id) {
            Some(mut pod) => {
                pod.labels = labels;
                true
            }
            None => false,
        };

        if found {
            self.bump();
        }
        found
    }

    /// All pods, oldest first.
    pub fn list(&self) -> Vec<Pod> {
        let mut pods: Vec<Pod> = self.inner.pods.iter().map(|r| r.value().clone()).collect();
        pods.sort_by(|a, b| a.created_seq.cmp(&b.created_seq).then_with(|| a.id.cmp(&b.id)));
        pods
    }

    pub fn list_matching(&self, selector: &Selector) -> Vec<Pod> {
        self.list()
            .into_iter()
            .filter(|pod| selector.matches(&pod.labels))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.pods.is_empty()
    }

    pub fn generation(&self) -> u64 {
        *self.inner.generation.borrow()
    }

    /// Receiver that is notified after every change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.generation.subscribe()
    }

    fn bump(&self) {
        self.inner.generation.send_modify(|generation| *generation += 1);
    }
}

impl Default for PodStore {
    fn default() -> Self {
        Self::new()
    }
}
