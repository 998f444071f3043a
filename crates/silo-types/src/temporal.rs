use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Monotonic creation timestamp.
///
/// Combines a wall-clock component with a logical counter so that anchors
/// issued by one record store are strictly increasing even when several
/// rows are created within the same millisecond or the wall clock steps
/// backwards. The node identifier breaks ties between stores that were
/// merged from separate journals.
///
/// Ordering: `physical_ms` → `logical` → `node_id` (total order).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemporalAnchor {
    /// Wall-clock milliseconds since UNIX epoch.
    pub physical_ms: u64,
    /// Logical counter for anchors issued in the same millisecond.
    pub logical: u32,
    /// Store identifier.
    pub node_id: u16,
}

impl TemporalAnchor {
    /// Create a new anchor with explicit values.
    pub fn new(physical_ms: u64, logical: u32, node_id: u16) -> Self {
        Self {
            physical_ms,
            logical,
            node_id,
        }
    }

    /// Create an anchor for the current wall-clock time.
    pub fn now(node_id: u16) -> Self {
        Self {
            physical_ms: wall_clock_ms(),
            logical: 0,
            node_id,
        }
    }

    /// The zero anchor.
    pub const fn zero() -> Self {
        Self {
            physical_ms: 0,
            logical: 0,
            node_id: 0,
        }
    }

    /// Issue the next anchor after `last`, strictly greater than it.
    ///
    /// Uses the wall clock when it has moved past `last`, otherwise bumps the
    /// logical counter of `last`.
    pub fn next_after(last: Option<&Self>, node_id: u16) -> Self {
        let now = Self::now(node_id);
        match last {
            None => now,
            Some(prev) if now.physical_ms > prev.physical_ms => now,
            Some(prev) => match prev.logical.checked_add(1) {
                Some(logical) => Self::new(prev.physical_ms, logical, node_id),
                // Logical counter exhausted: carry into the next millisecond.
                None => Self::new(prev.physical_ms.saturating_add(1), 0, node_id),
            },
        }
    }

    pub fn is_after(&self, other: &Self) -> bool {
        self > other
    }

    pub fn is_before(&self, other: &Self) -> bool {
        self < other
    }
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl PartialOrd for TemporalAnchor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TemporalAnchor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.physical_ms
            .cmp(&other.physical_ms)
            .then(self.logical.cmp(&other.logical))
            .then(self.node_id.cmp(&other.node_id))
    }
}

impl fmt::Debug for TemporalAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TemporalAnchor({}ms.{}.n{})",
            self.physical_ms, self.logical, self.node_id
        )
    }
}

impl fmt::Display for TemporalAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.n{}", self.physical_ms, self.logical, self.node_id)
    }
}
