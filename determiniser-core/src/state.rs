use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use crate::value::{Value, WeakObj};
use crate::TileCode;

struct BagState {
    liveness: WeakObj,
    queue: VecDeque<TileCode>,
    epoch: u64,
    refilling: bool,
}

impl BagState {
    fn is_live(&self) -> bool {
        self.liveness.strong_count() > 0
    }
}

/// Per-pool bookkeeping keyed by object identity. The table never owns a
/// pool: each entry holds a weak handle, entries for dropped pools read as
/// absent and are swept on the next insert. An address reused by a new
/// allocation therefore never inherits the old entry.
#[derive(Default)]
pub struct StateStore {
    bags: RefCell<HashMap<usize, BagState>>,
}

impl StateStore {
    pub fn new() -> StateStore {
        StateStore::default()
    }

    /// Replaces the pool's queue wholesale and stamps it with `epoch`. The
    /// refill flag is separate state and survives the reseed.
    pub fn seed(&self, bag: &Value, desired: &[TileCode], epoch: u64) {
        let (key, weak) = match (bag.obj_key(), bag.obj_weak()) {
            (Some(k), Some(w)) => (k, w),
            _ => return,
        };
        let mut bags = self.bags.borrow_mut();
        bags.retain(|_, state| state.is_live());
        let refilling = bags.get(&key).map(|state| state.refilling).unwrap_or(false);
        bags.insert(
            key,
            BagState {
                liveness: weak,
                queue: desired.iter().copied().collect(),
                epoch,
                refilling,
            },
        );
    }

    /// Seeds the pool only when it has no stamp yet or its stamp predates
    /// `epoch`. Returns true when a reseed happened. A queue emptied by
    /// draws under the current epoch stays empty.
    pub fn reseed_if_stale(&self, bag: &Value, desired: &[TileCode], epoch: u64) -> bool {
        let key = match bag.obj_key() {
            Some(k) => k,
            None => return false,
        };
        {
            let bags = self.bags.borrow();
            if let Some(state) = bags.get(&key) {
                if state.is_live() && state.epoch == epoch {
                    return false;
                }
            }
        }
        self.seed(bag, desired, epoch);
        true
    }

    pub fn pop_desired(&self, bag: &Value) -> Option<TileCode> {
        let key = bag.obj_key()?;
        let mut bags = self.bags.borrow_mut();
        let state = bags.get_mut(&key)?;
        if !state.is_live() {
            return None;
        }
        state.queue.pop_front()
    }

    /// True when the pool has no pending desired identifiers, including
    /// when the pool was never seeded.
    pub fn queue_is_empty(&self, bag: &Value) -> bool {
        let key = match bag.obj_key() {
            Some(k) => k,
            None => return true,
        };
        let bags = self.bags.borrow();
        match bags.get(&key) {
            Some(state) if state.is_live() => state.queue.is_empty(),
            _ => true,
        }
    }

    pub fn queue_snapshot(&self, bag: &Value) -> Vec<TileCode> {
        let key = match bag.obj_key() {
            Some(k) => k,
            None => return Vec::new(),
        };
        let bags = self.bags.borrow();
        match bags.get(&key) {
            Some(state) if state.is_live() => state.queue.iter().copied().collect(),
            _ => Vec::new(),
        }
    }

    /// Marks or unmarks an active replenish on the pool. Setting the flag
    /// on an unknown pool is a no-op; the wrappers always seed first.
    pub fn set_refilling(&self, bag: &Value, on: bool) {
        let key = match bag.obj_key() {
            Some(k) => k,
            None => return,
        };
        let mut bags = self.bags.borrow_mut();
        if let Some(state) = bags.get_mut(&key) {
            if state.is_live() {
                state.refilling = on;
            }
        }
    }

    pub fn is_refilling(&self, bag: &Value) -> bool {
        let key = match bag.obj_key() {
            Some(k) => k,
            None => return false,
        };
        let bags = self.bags.borrow();
        match bags.get(&key) {
            Some(state) if state.is_live() => state.refilling,
            _ => false,
        }
    }

    /// Number of live entries currently tracked.
    pub fn tracked(&self) -> usize {
        self.bags
            .borrow()
            .values()
            .filter(|state| state.is_live())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(s: &str) -> Vec<TileCode> {
        s.chars().map(|c| c as TileCode).collect()
    }

    #[test]
    fn queue_is_fifo_per_pool() {
        let store = StateStore::new();
        let bag = Value::object();
        store.seed(&bag, &codes("ABC"), 1);
        assert_eq!(store.pop_desired(&bag), Some(b'A' as TileCode));
        assert_eq!(store.pop_desired(&bag), Some(b'B' as TileCode));
        assert_eq!(store.pop_desired(&bag), Some(b'C' as TileCode));
        assert_eq!(store.pop_desired(&bag), None);
        assert!(store.queue_is_empty(&bag));
    }

    #[test]
    fn pools_are_tracked_independently() {
        let store = StateStore::new();
        let a = Value::object();
        let b = Value::object();
        store.seed(&a, &codes("X"), 1);
        store.seed(&b, &codes("Y"), 1);
        assert_eq!(store.pop_desired(&b), Some(b'Y' as TileCode));
        assert_eq!(store.pop_desired(&a), Some(b'X' as TileCode));
    }

    #[test]
    fn matching_epoch_does_not_reseed() {
        let store = StateStore::new();
        let bag = Value::object();
        assert!(store.reseed_if_stale(&bag, &codes("AB"), 3));
        assert_eq!(store.pop_desired(&bag), Some(b'A' as TileCode));
        assert!(!store.reseed_if_stale(&bag, &codes("AB"), 3));
        assert_eq!(store.pop_desired(&bag), Some(b'B' as TileCode));
    }

    #[test]
    fn stale_epoch_replaces_the_queue_wholesale() {
        let store = StateStore::new();
        let bag = Value::object();
        store.seed(&bag, &codes("AB"), 1);
        assert!(store.reseed_if_stale(&bag, &codes("QQ"), 2));
        assert_eq!(store.pop_desired(&bag), Some(b'Q' as TileCode));
    }

    #[test]
    fn drained_queue_stays_empty_within_an_epoch() {
        let store = StateStore::new();
        let bag = Value::object();
        store.seed(&bag, &codes("A"), 5);
        assert_eq!(store.pop_desired(&bag), Some(b'A' as TileCode));
        assert!(!store.reseed_if_stale(&bag, &codes("A"), 5));
        assert_eq!(store.pop_desired(&bag), None);
    }

    #[test]
    fn refill_flag_survives_a_reseed() {
        let store = StateStore::new();
        let bag = Value::object();
        store.seed(&bag, &codes("A"), 1);
        store.set_refilling(&bag, true);
        store.seed(&bag, &codes("B"), 2);
        assert!(store.is_refilling(&bag));
        store.set_refilling(&bag, false);
        assert!(!store.is_refilling(&bag));
    }

    #[test]
    fn unknown_pools_read_as_inactive_and_empty() {
        let store = StateStore::new();
        let bag = Value::object();
        assert!(!store.is_refilling(&bag));
        assert!(store.queue_is_empty(&bag));
        assert_eq!(store.pop_desired(&bag), None);
        assert!(store.queue_snapshot(&bag).is_empty());
        store.set_refilling(&bag, true);
        assert!(!store.is_refilling(&bag));
    }

    #[test]
    fn non_objects_are_never_tracked() {
        let store = StateStore::new();
        store.seed(&Value::Num(1.0), &codes("A"), 1);
        assert_eq!(store.tracked(), 0);
        assert_eq!(store.pop_desired(&Value::Null), None);
    }

    #[test]
    fn dead_pools_are_swept_on_the_next_seed() {
        let store = StateStore::new();
        {
            let dead = Value::object();
            store.seed(&dead, &codes("AB"), 1);
            assert_eq!(store.tracked(), 1);
        }
        assert_eq!(store.tracked(), 0);
        let live = Value::object();
        store.seed(&live, &codes("C"), 1);
        assert_eq!(store.tracked(), 1);
    }

    #[test]
    fn queue_snapshot_leaves_the_queue_intact() {
        let store = StateStore::new();
        let bag = Value::object();
        store.seed(&bag, &codes("AB"), 1);
        assert_eq!(store.queue_snapshot(&bag), codes("AB"));
        assert_eq!(store.queue_snapshot(&bag), codes("AB"));
        assert_eq!(store.pop_desired(&bag), Some(b'A' as TileCode));
    }
}
