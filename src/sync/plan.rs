//! Pure reconciliation plan: the diff between a remote snapshot and the
//! local cache, computed before any mutation is applied.

use std::collections::HashSet;

use crate::mail::types::{FlagState, RemoteSnapshot};

/// The six uid lists a reconciliation run applies, in order: deletions,
/// imports (newest first), then the four flag flips.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub delete: Vec<u32>,
    pub import: Vec<u32>,
    pub mark_seen: Vec<u32>,
    pub mark_unseen: Vec<u32>,
    pub flag: Vec<u32>,
    pub unflag: Vec<u32>,
}

impl ReconcilePlan {
    /// Diff the cached rows of one folder against a remote snapshot.
    ///
    /// An absent snapshot category skips the corresponding steps entirely:
    /// no `all` set means no deletions or imports (a transient fetch
    /// failure must not read as "delete everything"), while a
    /// present-but-empty `all` legitimately deletes every cached row.
    /// Flip lists cover only rows that are cached and not being deleted;
    /// uids yet to be imported arrive already-correct from the fetch.
    pub fn compute(local: &[FlagState], snapshot: &RemoteSnapshot) -> Self {
        let local_ids: HashSet<u32> = local.iter().map(|m| m.uid).collect();
        let mut plan = Self::default();

        if let Some(all) = &snapshot.all {
            plan.delete = local_ids.difference(all).copied().collect();
            plan.delete.sort_unstable();
            plan.import = all.difference(&local_ids).copied().collect();
            // Newest remote ids first, so recent messages become visible
            // even if the run is interrupted partway.
            plan.import.sort_unstable_by(|a, b| b.cmp(a));
        }

        let deleted: HashSet<u32> = plan.delete.iter().copied().collect();

        if let Some(seen) = &snapshot.seen {
            for m in local {
                if deleted.contains(&m.uid) {
                    continue;
                }
                match (m.seen, seen.contains(&m.uid)) {
                    (true, false) => plan.mark_unseen.push(m.uid),
                    (false, true) => plan.mark_seen.push(m.uid),
                    _ => {}
                }
            }
        }

        if let Some(flagged) = &snapshot.flagged {
            for m in local {
                if deleted.contains(&m.uid) {
                    continue;
                }
                match (m.flagged, flagged.contains(&m.uid)) {
                    (true, false) => plan.unflag.push(m.uid),
                    (false, true) => plan.flag.push(m.uid),
                    _ => {}
                }
            }
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        self.delete.is_empty()
            && self.import.is_empty()
            && self.mark_seen.is_empty()
            && self.mark_unseen.is_empty()
            && self.flag.is_empty()
            && self.unflag.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(uid: u32, seen: bool, flagged: bool) -> FlagState {
        FlagState { uid, seen, flagged }
    }

    fn uids(values: &[u32]) -> Option<HashSet<u32>> {
        Some(values.iter().copied().collect())
    }

    #[test]
    fn test_insertions_sorted_descending() {
        let local = vec![state(1, false, false), state(2, false, false)];
        let snapshot = RemoteSnapshot {
            all: uids(&[1, 2, 3, 5, 4]),
            ..Default::default()
        };

        let plan = ReconcilePlan::compute(&local, &snapshot);
        assert_eq!(plan.import, vec![5, 4, 3]);
        assert!(plan.delete.is_empty());
    }

    #[test]
    fn test_deletions_for_vanished_uids() {
        let local = vec![state(1, true, false), state(2, false, false), state(3, false, false)];
        let snapshot = RemoteSnapshot {
            all: uids(&[2]),
            ..Default::default()
        };

        let plan = ReconcilePlan::compute(&local, &snapshot);
        assert_eq!(plan.delete, vec![1, 3]);
        assert!(plan.import.is_empty());
    }

    #[test]
    fn test_seen_flips_both_directions() {
        // Remote says only uid 1 is seen; uid 2 must flip to unseen,
        // uid 3 (not cached) is untouched by this step.
        let local = vec![state(1, true, false), state(2, true, false)];
        let snapshot = RemoteSnapshot {
            all: uids(&[1, 2, 3]),
            seen: uids(&[1]),
            ..Default::default()
        };

        let plan = ReconcilePlan::compute(&local, &snapshot);
        assert_eq!(plan.import, vec![3]);
        assert_eq!(plan.mark_unseen, vec![2]);
        assert!(plan.mark_seen.is_empty());
    }

    #[test]
    fn test_flag_flips_symmetric() {
        let local = vec![state(1, false, true), state(2, false, false)];
        let snapshot = RemoteSnapshot {
            all: uids(&[1, 2]),
            flagged: uids(&[2]),
            ..Default::default()
        };

        let plan = ReconcilePlan::compute(&local, &snapshot);
        assert_eq!(plan.unflag, vec![1]);
        assert_eq!(plan.flag, vec![2]);
    }

    #[test]
    fn test_deleted_rows_excluded_from_flips() {
        let local = vec![state(1, true, true)];
        let snapshot = RemoteSnapshot {
            all: uids(&[]),
            seen: uids(&[]),
            flagged: uids(&[]),
        };

        let plan = ReconcilePlan::compute(&local, &snapshot);
        assert_eq!(plan.delete, vec![1]);
        assert!(plan.mark_unseen.is_empty());
        assert!(plan.unflag.is_empty());
    }

    #[test]
    fn test_absent_all_skips_deletions_and_imports() {
        let local = vec![state(1, true, false), state(2, false, false)];
        let snapshot = RemoteSnapshot {
            all: None,
            seen: uids(&[2]),
            ..Default::default()
        };

        let plan = ReconcilePlan::compute(&local, &snapshot);
        assert!(plan.delete.is_empty());
        assert!(plan.import.is_empty());
        // Flag passes still run against present categories.
        assert_eq!(plan.mark_unseen, vec![1]);
        assert_eq!(plan.mark_seen, vec![2]);
    }

    #[test]
    fn test_empty_all_is_delete_everything() {
        let local = vec![state(7, false, false)];
        let snapshot = RemoteSnapshot {
            all: uids(&[]),
            ..Default::default()
        };

        let plan = ReconcilePlan::compute(&local, &snapshot);
        assert_eq!(plan.delete, vec![7]);
    }

    #[test]
    fn test_matching_state_yields_empty_plan() {
        let local = vec![state(1, true, false), state(2, false, true)];
        let snapshot = RemoteSnapshot {
            all: uids(&[1, 2]),
            seen: uids(&[1]),
            flagged: uids(&[2]),
        };

        let plan = ReconcilePlan::compute(&local, &snapshot);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_recompute_is_idempotent() {
        // Applying the plan and recomputing against the same snapshot
        // must produce an empty diff.
        let snapshot = RemoteSnapshot {
            all: uids(&[1, 2, 3]),
            seen: uids(&[1, 3]),
            flagged: uids(&[2]),
        };
        let reconciled = vec![state(1, true, false), state(2, false, true), state(3, true, false)];

        assert!(ReconcilePlan::compute(&reconciled, &snapshot).is_empty());
    }
}
