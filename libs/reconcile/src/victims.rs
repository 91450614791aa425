//! Victim selection on scale-down.
//!
//! The default policy removes the first `count` active instances in the
//! order the store listed them. [`VictimPolicy::Ranked`] is an opt-in
//! alternative that removes the least useful instances first.

use std::fmt;
use std::str::FromStr;

use crate::classify::is_ready;
use crate::model::{Instance, InstancePhase};

/// How instances are chosen for deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VictimPolicy {
    /// First `count` instances in observed order.
    #[default]
    ObservedOrder,

    /// Order by [`DrainPriority`], newest first within a priority.
    Ranked,
}

impl VictimPolicy {
    /// Pick up to `count` distinct instances from `active` to delete.
    pub fn select<'a>(&self, active: &[&'a Instance], count: usize) -> Vec<&'a Instance> {
        match self {
            Self::ObservedOrder => select_victims(active, count),
            Self::Ranked => select_ranked(active, count),
        }
    }
}

impl fmt::Display for VictimPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ObservedOrder => f.write_str("observed"),
            Self::Ranked => f.write_str("ranked"),
        }
    }
}

impl FromStr for VictimPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "observed" => Ok(Self::ObservedOrder),
            "ranked" => Ok(Self::Ranked),
            other => Err(format!(
                "unknown victim policy {other:?}, expected \"observed\" or \"ranked\""
            )),
        }
    }
}

/// Select the first `count` active instances.
///
/// Returns `min(count, active.len())` distinct instances.
pub fn select_victims<'a>(active: &[&'a Instance], count: usize) -> Vec<&'a Instance> {
    active[..count.min(active.len())].to_vec()
}

/// Drain priority for ranked selection.
///
/// Lower priority values are deleted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DrainPriority {
    /// Instance is being torn down already.
    Terminating = 0,

    /// Instance has not started.
    Pending = 1,

    /// Instance is running but not ready.
    NotReady = 2,

    /// Instance is serving (delete last).
    Ready = 3,
}

impl DrainPriority {
    pub fn of(instance: &Instance) -> Self {
        match instance.phase {
            InstancePhase::Terminating => Self::Terminating,
            InstancePhase::Pending => Self::Pending,
            _ if is_ready(instance) => Self::Ready,
            _ => Self::NotReady,
        }
    }
}

fn select_ranked<'a>(active: &[&'a Instance], count: usize) -> Vec<&'a Instance> {
    let mut ranked = active.to_vec();
    // Stable: equal keys keep observed order.
    ranked.sort_by(|a, b| {
        DrainPriority::of(a)
            .cmp(&DrainPriority::of(b))
            .then_with(|| b.creation_timestamp.cmp(&a.creation_timestamp))
    });
    ranked.truncate(count);
    ranked
}
