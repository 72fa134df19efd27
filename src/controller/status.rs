//! Status aggregation
//!
//! Folds per-component outcomes of a pass into the conditions of the
//! NetworkAddonsConfig. Condition order is fixed: `Available`, `Progressing`,
//! `Degraded`, then one `<Component>Available` per enabled component in
//! component order. A condition keeps its `lastTransitionTime` until its
//! status flips and its `lastHeartbeatTime` until its reason or message
//! changes, so an unchanged cluster produces a byte-identical status.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::crd::{Condition, ConditionStatus, ContainerInfo, NetworkAddonsConfigStatus};
use crate::render::Component;

/// Condition type: every enabled component is ready
pub const AVAILABLE: &str = "Available";
/// Condition type: some component is rolling out
pub const PROGRESSING: &str = "Progressing";
/// Condition type: something needs attention
pub const DEGRADED: &str = "Degraded";

/// Reason of a condition in its expected state
pub const REASON_AS_EXPECTED: &str = "AsExpected";
/// Available with no component toggled on
pub const REASON_NO_COMPONENTS_ENABLED: &str = "NoComponentsEnabled";
/// The config is not named `cluster`
pub const REASON_INVALID_CONFIGURATION_NAME: &str = "InvalidConfigurationName";
/// A spec field is malformed or contradictory
pub const REASON_INVALID_CONFIGURATION: &str = "InvalidConfiguration";
/// Rendering a component failed
pub const REASON_RENDER_FAILED: &str = "RenderFailed";
/// Writing or deleting objects failed after retries
pub const REASON_APPLY_FAILED: &str = "ApplyFailed";
/// Reading managed objects back failed after retries
pub const REASON_READ_FAILED: &str = "ReadFailed";
/// Pods of a workload cannot be scheduled
pub const REASON_UNSCHEDULABLE: &str = "Unschedulable";
/// A workload runs fewer ready pods than desired
pub const REASON_MINIMUM_REPLICAS_UNAVAILABLE: &str = "MinimumReplicasUnavailable";
/// A workload is rolling out a new template
pub const REASON_DEPLOYING: &str = "Deploying";

/// A reason and message pair describing why something is not as expected
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Problem {
    /// Machine-readable reason
    pub reason: String,
    /// Human-readable message
    pub message: String,
}

impl Problem {
    /// Create a problem with the given reason and message
    pub fn new(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            message: message.into(),
        }
    }
}

/// Observed state of one component at the end of a pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ComponentState {
    /// Every workload is ready
    Ready,
    /// Objects are in place but workloads are not ready yet
    Unavailable(Problem),
    /// Configuration, render or apply failed
    Failed(Problem),
}

/// Outcome of one enabled component
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentReport {
    /// Component the report is about
    pub component: Component,
    /// Readiness of the component
    pub state: ComponentState,
    /// Whether a workload of the component is rolling out
    pub progressing: bool,
}

impl ComponentReport {
    /// Whether the component is ready
    pub fn is_ready(&self) -> bool {
        self.state == ComponentState::Ready
    }
}

/// Everything a pass learned, ready to be folded into a status
#[derive(Clone, Debug)]
pub struct StatusInput<'a> {
    /// One report per enabled component, in component order
    pub reports: &'a [ComponentReport],
    /// Failures not tied to a single component
    pub failures: &'a [Problem],
    /// Containers of live operand workloads
    pub containers: Vec<ContainerInfo>,
    /// Version of the running operator
    pub operator_version: &'a str,
    /// How long a component may stay unavailable before Degraded
    pub grace_period: Duration,
}

/// Carry timestamps over from the stored condition where nothing changed
pub fn merge_condition(previous: Option<&Condition>, desired: Condition) -> Condition {
    match previous {
        Some(prev) if prev.status == desired.status => {
            let same_text = prev.reason == desired.reason && prev.message == desired.message;
            Condition {
                last_transition_time: prev.last_transition_time,
                last_heartbeat_time: if same_text {
                    prev.last_heartbeat_time.or(desired.last_heartbeat_time)
                } else {
                    desired.last_heartbeat_time
                },
                ..desired
            }
        }
        _ => desired,
    }
}

fn condition(
    previous: Option<&NetworkAddonsConfigStatus>,
    type_: &str,
    status: ConditionStatus,
    problem: Option<&Problem>,
    now: DateTime<Utc>,
) -> Condition {
    let (reason, message) = match problem {
        Some(p) => (p.reason.as_str(), p.message.as_str()),
        None => (REASON_AS_EXPECTED, ""),
    };
    merge_condition(
        previous.and_then(|p| p.condition(type_)),
        Condition::new(type_, status, reason, message, now),
    )
}

/// Join several problems into one, keeping the first reason
fn combine(problems: &[Problem]) -> Option<Problem> {
    let first = problems.first()?;
    let message = problems
        .iter()
        .map(|p| p.message.as_str())
        .filter(|m| !m.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    Some(Problem::new(first.reason.clone(), message))
}

/// Fold the outcome of a pass into a status
pub fn aggregate(
    previous: Option<&NetworkAddonsConfigStatus>,
    input: &StatusInput<'_>,
    now: DateTime<Utc>,
) -> NetworkAddonsConfigStatus {
    let grace = chrono::Duration::from_std(input.grace_period).unwrap_or(chrono::Duration::MAX);

    let mut component_conditions = Vec::new();
    let mut unavailable = Vec::new();
    let mut degraded: Vec<Problem> = input.failures.to_vec();
    let mut progressing = Vec::new();

    for report in input.reports {
        let problem = match &report.state {
            ComponentState::Ready => None,
            ComponentState::Unavailable(p) => Some(p),
            ComponentState::Failed(p) => {
                degraded.push(Problem::new(
                    p.reason.clone(),
                    format!("{}: {}", report.component, p.message),
                ));
                Some(p)
            }
        };
        if let Some(p) = problem {
            unavailable.push(Problem::new(
                p.reason.clone(),
                format!("{}: {}", report.component, p.message),
            ));
        }
        if report.progressing {
            progressing.push(report.component);
        }

        let Some(type_) = report.component.condition_type() else {
            continue;
        };
        let merged = condition(
            previous,
            &type_,
            ConditionStatus::from_bool(problem.is_none()),
            problem,
            now,
        );
        if let ComponentState::Unavailable(p) = &report.state {
            if now - merged.last_transition_time > grace {
                degraded.push(Problem::new(
                    p.reason.clone(),
                    format!(
                        "{} unavailable since {}: {}",
                        report.component,
                        merged.last_transition_time.to_rfc3339(),
                        p.message
                    ),
                ));
            }
        }
        component_conditions.push(merged);
    }

    let available = if input.reports.is_empty() {
        condition(
            previous,
            AVAILABLE,
            ConditionStatus::True,
            Some(&Problem::new(REASON_NO_COMPONENTS_ENABLED, "no components are enabled")),
            now,
        )
    } else {
        let problem = combine(&unavailable);
        condition(
            previous,
            AVAILABLE,
            ConditionStatus::from_bool(problem.is_none()),
            problem.as_ref(),
            now,
        )
    };

    let progressing_problem = (!progressing.is_empty()).then(|| {
        let names: Vec<&str> = progressing.iter().map(|c| c.name()).collect();
        Problem::new(REASON_DEPLOYING, format!("rolling out {}", names.join(", ")))
    });
    let progressing = condition(
        previous,
        PROGRESSING,
        ConditionStatus::from_bool(progressing_problem.is_some()),
        progressing_problem.as_ref(),
        now,
    );

    let degraded_problem = combine(&degraded);
    let degraded = condition(
        previous,
        DEGRADED,
        ConditionStatus::from_bool(degraded_problem.is_some()),
        degraded_problem.as_ref(),
        now,
    );

    let observed_version = if available.is_true() {
        Some(input.operator_version.to_string())
    } else {
        previous.and_then(|p| p.observed_version.clone())
    };

    let mut containers = input.containers.clone();
    containers.sort();
    containers.dedup();

    let mut conditions = vec![available, progressing, degraded];
    conditions.extend(component_conditions);

    NetworkAddonsConfigStatus {
        conditions,
        containers,
        observed_version,
        operator_version: Some(input.operator_version.to_string()),
        target_version: Some(input.operator_version.to_string()),
    }
}

/// Status of a config that is not the singleton and is never reconciled
pub fn invalid_name(
    previous: Option<&NetworkAddonsConfigStatus>,
    operator_version: &str,
    now: DateTime<Utc>,
) -> NetworkAddonsConfigStatus {
    let problem = Problem::new(
        REASON_INVALID_CONFIGURATION_NAME,
        format!("only a NetworkAddonsConfig named {:?} is reconciled", crate::CONFIG_NAME),
    );
    NetworkAddonsConfigStatus {
        conditions: vec![condition(previous, DEGRADED, ConditionStatus::True, Some(&problem), now)],
        operator_version: Some(operator_version.to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    fn ready(component: Component) -> ComponentReport {
        ComponentReport {
            component,
            state: ComponentState::Ready,
            progressing: false,
        }
    }

    fn unschedulable(component: Component) -> ComponentReport {
        ComponentReport {
            component,
            state: ComponentState::Unavailable(Problem::new(
                REASON_UNSCHEDULABLE,
                "0/3 nodes are available",
            )),
            progressing: true,
        }
    }

    fn input<'a>(reports: &'a [ComponentReport], failures: &'a [Problem]) -> StatusInput<'a> {
        StatusInput {
            reports,
            failures,
            containers: Vec::new(),
            operator_version: "0.1.0",
            grace_period: Duration::from_secs(300),
        }
    }

    fn types(status: &NetworkAddonsConfigStatus) -> Vec<&str> {
        status.conditions.iter().map(|c| c.type_.as_str()).collect()
    }

    /// Story: a cluster with everything ready reports Available and records the version
    #[test]
    fn story_all_ready_is_available() {
        let reports = [ready(Component::Multus), ready(Component::Ovs), ready(Component::Monitoring)];
        let status = aggregate(None, &input(&reports, &[]), t0());

        assert_eq!(
            types(&status),
            vec!["Available", "Progressing", "Degraded", "MultusAvailable", "OvsAvailable"]
        );
        assert!(status.condition(AVAILABLE).unwrap().is_true());
        assert!(!status.condition(PROGRESSING).unwrap().is_true());
        assert!(!status.condition(DEGRADED).unwrap().is_true());
        assert_eq!(status.observed_version.as_deref(), Some("0.1.0"));
        assert_eq!(status.target_version.as_deref(), Some("0.1.0"));
    }

    #[test]
    fn test_no_components_enabled_is_available() {
        let status = aggregate(None, &input(&[], &[]), t0());
        let available = status.condition(AVAILABLE).unwrap();
        assert!(available.is_true());
        assert_eq!(available.reason, REASON_NO_COMPONENTS_ENABLED);
        assert_eq!(status.conditions.len(), 3);
    }

    /// Story: an unschedulable component degrades only after the grace period
    ///
    /// Unavailability first shows up as Available=False with the workload's
    /// reason. Degraded flips once the component's own condition has been
    /// False for longer than the grace period.
    #[test]
    fn story_unavailable_degrades_after_grace_period() {
        let reports = [unschedulable(Component::KubeMacPool)];
        let first = aggregate(None, &input(&reports, &[]), t0());

        let available = first.condition(AVAILABLE).unwrap();
        assert!(!available.is_true());
        assert_eq!(available.reason, REASON_UNSCHEDULABLE);
        assert!(first.condition(PROGRESSING).unwrap().is_true());
        assert!(!first.condition(DEGRADED).unwrap().is_true());
        assert_eq!(first.observed_version, None);

        let within = aggregate(Some(&first), &input(&reports, &[]), t0() + chrono::Duration::seconds(300));
        assert!(!within.condition(DEGRADED).unwrap().is_true());

        let after = aggregate(Some(&within), &input(&reports, &[]), t0() + chrono::Duration::seconds(301));
        let degraded = after.condition(DEGRADED).unwrap();
        assert!(degraded.is_true());
        assert_eq!(degraded.reason, REASON_UNSCHEDULABLE);
        assert_eq!(degraded.last_transition_time, t0() + chrono::Duration::seconds(301));
        assert_eq!(
            after.condition("KubeMacPoolAvailable").unwrap().last_transition_time,
            t0()
        );
    }

    #[test]
    fn test_failures_degrade_immediately() {
        let reports = [
            ready(Component::Multus),
            ComponentReport {
                component: Component::KubeMacPool,
                state: ComponentState::Failed(Problem::new(
                    REASON_INVALID_CONFIGURATION,
                    "rangeStart without rangeEnd",
                )),
                progressing: false,
            },
        ];
        let status = aggregate(None, &input(&reports, &[]), t0());
        let degraded = status.condition(DEGRADED).unwrap();
        assert!(degraded.is_true());
        assert_eq!(degraded.reason, REASON_INVALID_CONFIGURATION);
        assert!(degraded.message.contains("rangeStart"));
        assert!(status.condition("MultusAvailable").unwrap().is_true());
        assert_eq!(
            status.condition("KubeMacPoolAvailable").unwrap().reason,
            REASON_INVALID_CONFIGURATION
        );
    }

    #[test]
    fn test_global_failures_come_first() {
        let reports = [ready(Component::Multus)];
        let failures = [Problem::new(REASON_INVALID_CONFIGURATION, "bad overlap")];
        let status = aggregate(None, &input(&reports, &failures), t0());
        assert_eq!(status.condition(DEGRADED).unwrap().reason, REASON_INVALID_CONFIGURATION);
        assert!(status.condition(AVAILABLE).unwrap().is_true());
    }

    /// Story: re-aggregating an unchanged outcome yields an identical status
    #[test]
    fn story_unchanged_outcome_keeps_timestamps() {
        let reports = [ready(Component::Multus)];
        let first = aggregate(None, &input(&reports, &[]), t0());
        let second = aggregate(Some(&first), &input(&reports, &[]), t0() + chrono::Duration::hours(1));
        assert_eq!(first, second);
    }

    #[test]
    fn test_message_change_refreshes_heartbeat_only() {
        let later = t0() + chrono::Duration::minutes(1);
        let previous = Condition::new(AVAILABLE, ConditionStatus::False, REASON_UNSCHEDULABLE, "a", t0());
        let desired = Condition::new(AVAILABLE, ConditionStatus::False, REASON_UNSCHEDULABLE, "b", later);
        let merged = merge_condition(Some(&previous), desired);
        assert_eq!(merged.last_transition_time, t0());
        assert_eq!(merged.last_heartbeat_time, Some(later));
        assert_eq!(merged.message, "b");

        let flipped = Condition::new(AVAILABLE, ConditionStatus::True, REASON_AS_EXPECTED, "", later);
        let merged = merge_condition(Some(&previous), flipped);
        assert_eq!(merged.last_transition_time, later);
    }

    #[test]
    fn test_observed_version_sticks_while_unavailable() {
        let first = aggregate(None, &input(&[ready(Component::Multus)], &[]), t0());
        let reports = [unschedulable(Component::Multus)];
        let mut next_input = input(&reports, &[]);
        next_input.operator_version = "0.2.0";
        let second = aggregate(Some(&first), &next_input, t0());
        assert_eq!(second.observed_version.as_deref(), Some("0.1.0"));
        assert_eq!(second.operator_version.as_deref(), Some("0.2.0"));
    }

    #[test]
    fn test_containers_are_sorted() {
        let reports = [ready(Component::Multus)];
        let mut status_input = input(&reports, &[]);
        status_input.containers = vec![
            ContainerInfo {
                parent_kind: "DaemonSet".to_string(),
                parent_name: "multus".to_string(),
                name: "kube-multus".to_string(),
                image: "m".to_string(),
            },
            ContainerInfo {
                parent_kind: "DaemonSet".to_string(),
                parent_name: "bridge-marker".to_string(),
                name: "bridge-marker".to_string(),
                image: "b".to_string(),
            },
        ];
        let status = aggregate(None, &status_input, t0());
        assert_eq!(status.containers[0].parent_name, "bridge-marker");
    }

    #[test]
    fn test_invalid_name_is_stable() {
        let first = invalid_name(None, "0.1.0", t0());
        let degraded = first.condition(DEGRADED).unwrap();
        assert!(degraded.is_true());
        assert_eq!(degraded.reason, REASON_INVALID_CONFIGURATION_NAME);
        let second = invalid_name(Some(&first), "0.1.0", t0() + chrono::Duration::hours(1));
        assert_eq!(first, second);
    }
}
