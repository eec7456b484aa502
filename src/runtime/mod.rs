pub mod catalog;
pub mod local;

pub use catalog::{ImageCatalog, ImageSpec};
pub use local::LocalRuntime;

use crate::model::Pod;

/// Starts and stops pods on behalf of controllers.
///
/// Both calls return immediately. Resulting status changes are reported
/// asynchronously through the pod store.
pub trait PodRuntime: Send + Sync {
    fn start(&self, pod: &Pod);

    fn stop(&self, pod_id: &str);

    /// Stop every pod this runtime started.
    fn shutdown(&self) {}
}
