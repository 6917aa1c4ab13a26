//! The Ready/Progressing/Degraded condition triple every reconciler
//! publishes.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::crd::{
    BasicStatus, Condition, FunctionStatus, HostStatus, PackageReferencesStatus,
};

pub const READY: &str = "Ready";
pub const PROGRESSING: &str = "Progressing";
pub const DEGRADED: &str = "Degraded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

/// The three well-known conditions, always written as one value so a
/// resource can never be Ready and Degraded at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionTriple {
    pub degraded: ConditionStatus,
    pub progressing: ConditionStatus,
    pub ready: ConditionStatus,
}

impl ConditionTriple {
    pub const READY: Self = Self::new(false, false, true);
    pub const PROGRESSING: Self = Self::new(false, true, false);
    pub const DEGRADED: Self = Self::new(true, false, false);
    /// A dependency is missing or not ready; the reconcile retries.
    pub const WAITING: Self = Self::new(true, true, false);

    const fn new(degraded: bool, progressing: bool, ready: bool) -> Self {
        const fn flag(value: bool) -> ConditionStatus {
            if value {
                ConditionStatus::True
            } else {
                ConditionStatus::False
            }
        }
        Self {
            degraded: flag(degraded),
            progressing: flag(progressing),
            ready: flag(ready),
        }
    }
}

/// Implemented by every status type the operator writes, in place of
/// reflective access to a `conditions` field.
pub trait HasConditions {
    fn conditions(&self) -> &[Condition];
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
}

macro_rules! impl_has_conditions {
    ($($status:ty),*) => {
        $(
            impl HasConditions for $status {
                fn conditions(&self) -> &[Condition] {
                    &self.conditions
                }

                fn conditions_mut(&mut self) -> &mut Vec<Condition> {
                    &mut self.conditions
                }
            }
        )*
    };
}

impl_has_conditions!(HostStatus, FunctionStatus, PackageReferencesStatus, BasicStatus);

pub fn set_conditions(
    conditions: &mut Vec<Condition>,
    triple: ConditionTriple,
    reason: &str,
    message: &str,
    generation: Option<i64>,
) {
    set_conditions_at(conditions, triple, reason, message, generation, Utc::now());
}

pub fn set_conditions_at(
    conditions: &mut Vec<Condition>,
    triple: ConditionTriple,
    reason: &str,
    message: &str,
    generation: Option<i64>,
    now: DateTime<Utc>,
) {
    let now = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    for (kind, status) in [
        (DEGRADED, triple.degraded),
        (PROGRESSING, triple.progressing),
        (READY, triple.ready),
    ] {
        set_condition(conditions, kind, status, reason, message, generation, &now);
    }
}

fn set_condition(
    conditions: &mut Vec<Condition>,
    kind: &str,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    generation: Option<i64>,
    now: &str,
) {
    let status = status.as_str();
    match conditions.iter_mut().find(|c| c.r#type == kind) {
        Some(existing) => {
            // lastTransitionTime only moves when the status flips
            if existing.status != status {
                existing.status = status.into();
                existing.last_transition_time = Some(now.into());
            }
            existing.reason = Some(reason.into());
            existing.message = Some(message.into());
            existing.observed_generation = generation;
        }
        None => conditions.push(Condition {
            r#type: kind.into(),
            status: status.into(),
            reason: Some(reason.into()),
            message: Some(message.into()),
            last_transition_time: Some(now.into()),
            observed_generation: generation,
        }),
    }
}

pub fn find<'a>(conditions: &'a [Condition], kind: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == kind)
}

pub fn is_ready(conditions: &[Condition]) -> bool {
    find(conditions, READY).is_some_and(|c| c.status == ConditionStatus::True.as_str())
}
