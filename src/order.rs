//! Priority ranks and deterministic priority ordering.
//!
//! A [`Priority`] is an importance rank: `1` is the most important load.
//! Restore passes walk candidates ascending (most important first), shed
//! passes walk them descending (least important first). Both orderings are
//! stable, so equal ranks keep their snapshot order.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Importance rank of a controllable load. Lower is more important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(u32);

impl Priority {
    /// Most important rank.
    pub const HIGHEST: Priority = Priority(1);

    /// Rank given to loads that arrive without one: least important in both
    /// the shed and the restore ordering.
    pub const UNRANKED: Priority = Priority(999);

    /// Parses a rank from an optional raw value.
    ///
    /// A missing value becomes [`Priority::UNRANKED`]; zero is rejected since
    /// ranks start at one.
    pub fn parse(raw: Option<i64>) -> Option<Self> {
        match raw {
            None => Some(Self::UNRANKED),
            Some(v) => u32::try_from(v).ok().filter(|&r| r >= 1).map(Self),
        }
    }

    /// Creates a rank, clamping zero up to [`Priority::HIGHEST`].
    pub fn new(rank: u32) -> Self {
        Self(rank.max(1))
    }

    pub fn rank(self) -> u32 {
        self.0
    }

    /// `true` when `self` is strictly less important than `other`.
    pub fn is_less_important_than(self, other: Priority) -> bool {
        self.0 > other.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::UNRANKED
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable sort, most important first.
pub fn sort_restore_order<T>(items: &mut [T], priority: impl Fn(&T) -> Priority) {
    items.sort_by(|a, b| priority(a).cmp(&priority(b)));
}

/// Stable sort, least important first.
pub fn sort_shed_order<T>(items: &mut [T], priority: impl Fn(&T) -> Priority) {
    items.sort_by(|a, b| priority(b).cmp(&priority(a)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_priority_is_unranked() {
        assert_eq!(Priority::parse(None), Some(Priority::UNRANKED));
        assert_eq!(Priority::parse(Some(3)), Some(Priority::new(3)));
        assert_eq!(Priority::parse(Some(0)), None);
        assert_eq!(Priority::parse(Some(-4)), None);
    }

    #[test]
    fn restore_order_is_ascending_and_stable() {
        let mut items = vec![("a", 5), ("b", 1), ("c", 5), ("d", 2)];
        sort_restore_order(&mut items, |(_, p)| Priority::new(*p));
        let ids: Vec<_> = items.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn shed_order_is_descending_and_stable() {
        let mut items = vec![("a", 5), ("b", 1), ("c", 5), ("d", 2)];
        sort_shed_order(&mut items, |(_, p)| Priority::new(*p));
        let ids: Vec<_> = items.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec!["a", "c", "d", "b"]);
    }

    #[test]
    fn unranked_sheds_first_and_restores_last() {
        let mut items = vec![Priority::UNRANKED, Priority::new(50), Priority::HIGHEST];
        sort_shed_order(&mut items, |p| *p);
        assert_eq!(items[0], Priority::UNRANKED);
        sort_restore_order(&mut items, |p| *p);
        assert_eq!(items[2], Priority::UNRANKED);
    }
}
