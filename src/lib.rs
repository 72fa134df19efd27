//! Network add-ons operator - converges CNI add-on components with one desired-state resource
//!
//! The operator watches the singleton `NetworkAddonsConfig` named `cluster` and
//! keeps the enabled network add-ons (Multus, Linux bridge, KubeMacPool, OVS CNI,
//! macvtap CNI and the metrics proxies in front of them) deployed, pruned,
//! health-checked and reported on.
//!
//! # Architecture
//!
//! - Resolvers turn the declared config into concrete images, placement and TLS settings
//! - The renderer turns resolved settings into Kubernetes objects (pure, deterministic)
//! - The controller applies and prunes objects and aggregates health into status
//! - The certificate rotation engine runs on its own timer and only talks to the
//!   controller through the Secrets it writes
//!
//! # Modules
//!
//! - [`crd`] - NetworkAddonsConfig custom resource
//! - [`images`] - Image reference resolution and related-images inventory
//! - [`placement`] - Role and component placement resolution
//! - [`tls`] - TLS security profile resolution
//! - [`render`] - Manifest rendering per component
//! - [`pki`] - Certificate authority and certificate issuance
//! - [`certs`] - Certificate rotation engine
//! - [`controller`] - Convergence controller, status aggregation and trigger loop
//! - [`health`] - Liveness, readiness and metrics endpoint of the operator itself
//! - [`config`] - Environment-provided defaults
//! - [`telemetry`] - Logging setup
//! - [`retry`] - Backoff for transient API failures
//! - [`duration`] - Duration string parsing
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod certs;
pub mod config;
pub mod controller;
pub mod crd;
pub mod duration;
pub mod error;
pub mod health;
pub mod images;
pub mod pki;
pub mod placement;
pub mod render;
pub mod retry;
pub mod telemetry;
pub mod tls;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// Names and defaults shared by the renderer, the controller, the rotation
// engine and the tests.

/// Name of the operator, its Deployment and its field manager
pub const OPERATOR_NAME: &str = "cluster-network-addons-operator";

/// Fixed name of the singleton NetworkAddonsConfig
pub const CONFIG_NAME: &str = "cluster";

/// API group of the NetworkAddonsConfig CRD, also used as label prefix
pub const API_GROUP: &str = "networkaddonsoperator.network.kubevirt.io";

/// Namespace operands are deployed into unless overridden
pub const DEFAULT_OPERAND_NAMESPACE: &str = "cluster-network-addons";

/// Label carrying the owner of a rendered object
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Managed-by value on objects rendered by the controller
pub const MANAGED_BY_CONTROLLER: &str = "cluster-network-addons-operator";

/// Managed-by value on Secrets written by the rotation engine
pub const MANAGED_BY_CERTIFICATES: &str = "cluster-network-addons-certificates";

/// Label carrying the component an object belongs to
pub const COMPONENT_LABEL: &str = "networkaddonsoperator.network.kubevirt.io/component";

/// Annotation carrying the operator version that rendered an object
pub const VERSION_ANNOTATION: &str = "networkaddonsoperator.network.kubevirt.io/version";

/// Annotation carrying the hash of the rendered object
pub const RENDERED_HASH_ANNOTATION: &str = "networkaddonsoperator.network.kubevirt.io/rendered-hash";

/// How long a component may stay unavailable before it is reported Degraded
pub const DEFAULT_DEGRADED_GRACE_PERIOD: std::time::Duration = std::time::Duration::from_secs(300);

/// Address the operator serves health and metrics on
///
/// Reachable from the pod IP for kubelet health checks; kube-rbac-proxy
/// forwards to the same port over loopback.
pub const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:8080";
