//! NetworkAddonsConfig controller
//!
//! Drives the cluster towards the singleton config: each pass renders the
//! enabled components, applies what changed, prunes what is no longer
//! wanted and writes the aggregated status back. Passes are serialized by
//! the runner and triggered by watches on everything the operator owns.

mod client;
mod reconcile;
mod runner;
pub mod status;

pub use client::{KubeClient, KubeClientImpl, LiveObject};
pub use reconcile::{
    daemon_set_rollout, deployment_rollout, reconcile, run_pass, unschedulable_message, Context,
    ContextBuilder, PassOutcome, Rollout, APPLY_CONCURRENCY, REQUEUE_CONVERGING, RESYNC_INTERVAL,
};
pub use runner::{run, run_loop, spawn_watchers, Trigger, ERROR_REQUEUE};
