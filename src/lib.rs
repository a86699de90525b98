//! Lattice Topology - ClusterClass managed-topology reconciliation
//!
//! A Cluster bound to a ClusterClass gets its whole object graph (infrastructure
//! cluster, control plane, worker MachineDeployments and their templates)
//! generated from the class, the Cluster's variable overrides, and a pipeline of
//! runtime extensions. The controller in this crate reads the live graph,
//! computes the desired one, and converges the two.
//!
//! # Modules
//!
//! - [`crd`] - ClusterClass and Cluster custom resources
//! - [`variables`] - Variable schema validation, defaulting and value checks
//! - [`schema`] - Structural schema checks and defaulting over JSON values
//! - [`current_state`] - Snapshot of everything a Cluster currently owns
//! - [`desired_state`] - Desired object graph computed from the ClusterClass
//! - [`patches`] - GeneratePatches / ValidateTopology orchestration
//! - [`runtime`] - Runtime extension hooks, registry and failure policies
//! - [`webhook`] - ClusterClass admission validation
//! - [`controller`] - Topology reconciliation loop
//! - [`store`] - Object store abstraction over the Kubernetes API
//! - [`client`] - Typed Cluster and ClusterClass access
//! - [`objects`] - Per-kind capabilities and `DynamicObject` helpers
//! - [`field`] - Field paths and aggregated field errors
//! - [`retry`] - Backoff for transient read failures
//! - [`config`] - Controller configuration
//! - [`telemetry`] - Logging setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod current_state;
pub mod desired_state;
pub mod error;
pub mod field;
pub mod objects;
pub mod patches;
pub mod retry;
pub mod runtime;
pub mod schema;
pub mod store;
pub mod telemetry;
#[cfg(test)]
pub(crate) mod test_fixtures;
pub mod variables;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Well-known labels
// =============================================================================

/// Label carrying the name of the Cluster an object belongs to
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Label marking an object as generated and owned by the topology controller
///
/// The value is always the empty string; presence is what matters.
pub const TOPOLOGY_OWNED_LABEL: &str = "topology.cluster.x-k8s.io/owned";

/// Label carrying the worker-group (MachineDeployment topology) name
pub const DEPLOYMENT_NAME_LABEL: &str = "topology.cluster.x-k8s.io/deployment-name";

/// Reserved variable namespace for values computed by the controller
pub const BUILTIN_VARIABLE_PREFIX: &str = "builtin";

/// API group of Cluster, ClusterClass and MachineDeployment
pub const CLUSTER_API_GROUP: &str = "cluster.x-k8s.io";

/// API version of Cluster, ClusterClass and MachineDeployment
pub const CLUSTER_API_VERSION: &str = "cluster.x-k8s.io/v1beta1";

/// Default field manager for writes made by the topology controller
pub const DEFAULT_FIELD_MANAGER: &str = "lattice-topology";
