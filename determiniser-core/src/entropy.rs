use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use log::warn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

struct SlotState {
    forced: Option<VecDeque<f64>>,
    rng: StdRng,
}

/// The ambient uniform generator the host consumes. Cloning the slot hands
/// out another handle to the same underlying state, so a value forced
/// through one handle is observed through all of them.
#[derive(Clone)]
pub struct EntropySlot {
    inner: Rc<RefCell<SlotState>>,
}

impl EntropySlot {
    pub fn new(seed: Option<u64>) -> EntropySlot {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        EntropySlot {
            inner: Rc::new(RefCell::new(SlotState { forced: None, rng })),
        }
    }

    /// Next value in [0, 1). While an override is installed its values are
    /// handed out in order; an exhausted override delegates to the real
    /// generator without uninstalling itself.
    pub fn next(&self) -> f64 {
        let mut state = self.inner.borrow_mut();
        if let Some(queue) = state.forced.as_mut() {
            if let Some(v) = queue.pop_front() {
                return v;
            }
        }
        state.rng.gen::<f64>()
    }

    pub fn is_overridden(&self) -> bool {
        self.inner.borrow().forced.is_some()
    }

    fn install(&self, seq: Vec<f64>) {
        let mut state = self.inner.borrow_mut();
        if state.forced.is_some() {
            warn!("entropy override installed while another was active; replacing it");
        }
        state.forced = Some(seq.into());
    }

    fn clear(&self) {
        self.inner.borrow_mut().forced = None;
    }
}

/// Scoped substitution of the entropy source.
///
/// Installing an empty sequence leaves the slot untouched, so unrelated
/// draws inside the wrapped call still see true randomness. Overrides do
/// not nest: at most one is active per slot, installing over an active one
/// replaces its remaining values, and whichever guard drops first clears
/// the slot entirely.
pub struct SequenceOverride {
    slot: Option<EntropySlot>,
}

impl SequenceOverride {
    pub fn install(slot: &EntropySlot, seq: Vec<f64>) -> SequenceOverride {
        if seq.is_empty() {
            return SequenceOverride { slot: None };
        }
        slot.install(seq);
        SequenceOverride { slot: Some(slot.clone()) }
    }

    pub fn is_active(&self) -> bool {
        self.slot.is_some()
    }
}

impl Drop for SequenceOverride {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_values_come_out_in_order() {
        let slot = EntropySlot::new(Some(7));
        let guard = SequenceOverride::install(&slot, vec![0.25, 0.5, 0.75]);
        assert!(guard.is_active());
        assert_eq!(slot.next(), 0.25);
        assert_eq!(slot.next(), 0.5);
        assert_eq!(slot.next(), 0.75);
    }

    #[test]
    fn exhausted_override_delegates_without_uninstalling() {
        let slot = EntropySlot::new(Some(7));
        let _guard = SequenceOverride::install(&slot, vec![0.25]);
        assert_eq!(slot.next(), 0.25);
        let v = slot.next();
        assert!((0.0..1.0).contains(&v));
        assert!(slot.is_overridden());
    }

    #[test]
    fn empty_sequence_is_inert() {
        let slot = EntropySlot::new(Some(7));
        let guard = SequenceOverride::install(&slot, vec![]);
        assert!(!guard.is_active());
        assert!(!slot.is_overridden());
        let v = slot.next();
        assert!((0.0..1.0).contains(&v));
    }

    #[test]
    fn drop_restores_the_slot() {
        let slot = EntropySlot::new(Some(7));
        {
            let _guard = SequenceOverride::install(&slot, vec![0.25, 0.5]);
            assert_eq!(slot.next(), 0.25);
        }
        assert!(!slot.is_overridden());
    }

    #[test]
    fn guard_restores_across_an_early_return() {
        fn run(slot: &EntropySlot) -> Result<(), ()> {
            let _guard = SequenceOverride::install(slot, vec![0.25]);
            Err(())
        }
        let slot = EntropySlot::new(Some(7));
        assert!(run(&slot).is_err());
        assert!(!slot.is_overridden());
    }

    #[test]
    fn overrides_do_not_compose() {
        // The later install replaces the active sequence, and whichever
        // guard drops first clears the slot. Callers are expected not to
        // nest; this pins the behaviour if they do.
        let slot = EntropySlot::new(Some(7));
        let outer = SequenceOverride::install(&slot, vec![0.1, 0.2]);
        {
            let _inner = SequenceOverride::install(&slot, vec![0.9]);
            assert_eq!(slot.next(), 0.9);
        }
        assert!(!slot.is_overridden());
        drop(outer);
        assert!(!slot.is_overridden());
    }

    #[test]
    fn seeded_slots_replay_identically() {
        let a = EntropySlot::new(Some(42));
        let b = EntropySlot::new(Some(42));
        for _ in 0..8 {
            assert_eq!(a.next(), b.next());
        }
    }
}
