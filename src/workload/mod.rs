//! Workload pipeline: classify nodes, render their manifests, reconcile them
//!
//! - `classifier`: container vs VM decision and its explanation
//! - `renderer`: NodeConfig assembly and per-node resource rendering
//! - `container` / `vm` / `files`: manifest builders
//! - `diff`: desired vs live comparison
//! - `reconciler`: create/update/delete against the cluster
//! - `status`: runtime readiness of the live workloads

pub mod classifier;
pub mod container;
pub mod diff;
pub mod files;
pub mod reconciler;
pub mod renderer;
pub mod status;
pub mod vm;

pub use classifier::{Classification, ClassificationRule, ClassifierConfig, WorkloadClassifier};
pub use reconciler::{Action, ReconcileResult, ResourceInfo, WorkloadReconciler};
pub use renderer::{build_node_config, RenderResult, RenderedResource, WorkloadRenderer};
pub use status::NodeStatus;
