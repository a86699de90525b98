//! Cluster topology controller
//!
//! [`topology`] holds the reconcile loop, [`apply`] the write step and
//! [`runner`] wires both into a kube-rs `Controller`.

pub mod apply;
mod runner;
mod topology;

pub use apply::{apply_desired_state, reconcile_object, ApplyOutcome, ApplySummary};
pub use runner::build_topology_controller;
pub use topology::{
    error_policy, reconcile, Context, ContextBuilder, REASON_HOOK_BLOCKING,
    REASON_RECONCILE_FAILED, REASON_RECONCILE_SUCCEEDED,
};
