//! Replica diff between observed and desired counts.
//!
//! The amount of work in a single pass is clamped to a burst ceiling. Large
//! deltas therefore take several passes to converge.

use std::fmt;

/// Default maximum number of creates or deletes issued in one pass.
pub const BURST_REPLICAS: usize = 500;

/// Direction of a corrective action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffKind {
    Create,
    Delete,
    None,
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Delete => "delete",
            Self::None => "none",
        };
        f.write_str(s)
    }
}

/// Corrective action for one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaDiff {
    pub kind: DiffKind,
    pub amount: usize,
}

impl ReplicaDiff {
    pub const NONE: Self = Self {
        kind: DiffKind::None,
        amount: 0,
    };

    pub fn is_none(&self) -> bool {
        self.kind == DiffKind::None
    }
}

/// Compare the active count against the desired count.
///
/// `amount` is `min(|active - desired|, burst)`.
pub fn diff(active: usize, desired: usize, burst: usize) -> ReplicaDiff {
    let kind = match active.cmp(&desired) {
        std::cmp::Ordering::Less => DiffKind::Create,
        std::cmp::Ordering::Greater => DiffKind::Delete,
        std::cmp::Ordering::Equal => return ReplicaDiff::NONE,
    };

    ReplicaDiff {
        kind,
        amount: active.abs_diff(desired).min(burst),
    }
}
