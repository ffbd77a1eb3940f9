//! Thread-local handoff of freshly compiled rules
//!
//! When a guard hook finds its record already compiled it parks the record
//! here and fails the guard. The call site then rebinds on the same thread,
//! and the adapter picks the record back up instead of calling the binder.
//!
//! Guard evaluation and rebinding happen on one thread, so the slot needs no
//! synchronization. There is one slot per call-site signature; offering a
//! record overwrites whatever the slot held.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use super::adapter::SignatureId;
use super::record::PromotionRecord;
use super::strategy::BinderId;

thread_local! {
    static SLOTS: RefCell<HashMap<SignatureId, Arc<PromotionRecord>>> =
        RefCell::new(HashMap::new());
}

/// Outcome of looking up the handoff slot for a bind
#[derive(Debug)]
pub enum Pickup {
    /// Slot held a record for this binder; it has been removed
    Taken(Arc<PromotionRecord>),
    /// Slot held a record for a different binder; it has been dropped
    Foreign(BinderId),
    Empty,
}

/// Per-thread single-slot relay, keyed by signature
pub struct ThreadLocalHandoff;

impl ThreadLocalHandoff {
    /// Park `record` for the next bind on this thread
    pub fn offer(record: Arc<PromotionRecord>) {
        // Thread-local storage is gone only during thread teardown, when no
        // further bind can pick the record up anyway.
        let _ = SLOTS.try_with(|slots| {
            slots.borrow_mut().insert(record.signature(), record);
        });
    }

    /// Get-and-clear the slot for `signature` on behalf of `binder`
    ///
    /// A record parked by another binder with the same signature is never
    /// returned; it is dropped so it does not pin its compiled rule on this
    /// thread. The owning site re-parks it on its next guard evaluation.
    pub fn take(signature: SignatureId, binder: BinderId) -> Pickup {
        SLOTS
            .try_with(|slots| {
                let mut slots = slots.borrow_mut();
                match slots.remove(&signature) {
                    Some(record) if record.binder() == binder => Pickup::Taken(record),
                    Some(record) => Pickup::Foreign(record.binder()),
                    None => Pickup::Empty,
                }
            })
            .unwrap_or(Pickup::Empty)
    }

    /// Binder owning the record parked for `signature`, without consuming it
    pub fn peek(signature: SignatureId) -> Option<BinderId> {
        SLOTS
            .try_with(|slots| slots.borrow().get(&signature).map(|r| r.binder()))
            .ok()
            .flatten()
    }

    /// Number of occupied slots on this thread
    pub fn occupied() -> usize {
        SLOTS.try_with(|slots| slots.borrow().len()).unwrap_or(0)
    }

    /// Empty every slot on this thread
    pub fn clear() {
        let _ = SLOTS.try_with(|slots| slots.borrow_mut().clear());
    }
}
