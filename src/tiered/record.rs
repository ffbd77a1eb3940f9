//! Per-strategy promotion bookkeeping
//!
//! A [`PromotionRecord`] is created for every rule handed out on the
//! interpreted tier. It tracks how many more guard hits the rule may take
//! before compilation, owns the body waiting to be compiled, and receives the
//! compiled callable once the background compiler is done.
//!
//! All fields are lock-free:
//!
//! - `remaining_hits`: saturating atomic decrement, never incremented
//! - `pending_body`: atomic swap, claimed at most once
//! - `compiled`: `OnceLock`, set at most once, release/acquire published

use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicPtr, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use super::adapter::SignatureId;
use super::strategy::BinderId;
use crate::exec::Callable;
use crate::expr::{Body, Expr};

/// Promotion progress of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PromotionState {
    /// Counting guard hits on the interpreted tier
    Counting = 0,
    /// Pending body claimed and handed to the background compiler
    Compiling = 1,
    /// Compiled callable published
    Ready = 2,
    /// Compilation failed; the interpreted tier stays in use
    Failed = 3,
}

impl From<u8> for PromotionState {
    fn from(v: u8) -> Self {
        match v {
            0 => PromotionState::Counting,
            1 => PromotionState::Compiling,
            2 => PromotionState::Ready,
            3 => PromotionState::Failed,
            _ => PromotionState::Counting,
        }
    }
}

/// Mutable promotion state of one interpreted rule
pub struct PromotionRecord {
    binder: BinderId,
    signature: SignatureId,
    threshold: u32,

    /// Guard hits left before compilation is requested
    remaining_hits: AtomicI32,

    /// Body awaiting compilation, as a leaked `Arc<Expr>` (null once claimed)
    pending_body: AtomicPtr<Expr>,

    state: AtomicU8,

    compiled: OnceLock<Callable>,
}

impl PromotionRecord {
    /// Create a record that requests compilation after `threshold` hits
    ///
    /// A zero threshold behaves like one: the first hit requests compilation.
    pub fn new(binder: BinderId, signature: SignatureId, threshold: u32) -> Self {
        let threshold = threshold.clamp(1, i32::MAX as u32);
        Self {
            binder,
            signature,
            threshold,
            remaining_hits: AtomicI32::new(threshold as i32),
            pending_body: AtomicPtr::new(ptr::null_mut()),
            state: AtomicU8::new(PromotionState::Counting as u8),
            compiled: OnceLock::new(),
        }
    }

    #[inline]
    pub fn binder(&self) -> BinderId {
        self.binder
    }

    #[inline]
    pub fn signature(&self) -> SignatureId {
        self.signature
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn remaining_hits(&self) -> i32 {
        self.remaining_hits.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn state(&self) -> PromotionState {
        PromotionState::from(self.state.load(Ordering::Acquire))
    }

    /// Count one guard hit
    ///
    /// Returns true for exactly one caller: the one whose decrement moved the
    /// counter from 1 to 0. Once the counter is exhausted further hits leave it
    /// alone, so it cannot wrap however long the rule keeps running.
    #[inline]
    pub fn record_hit(&self) -> bool {
        self.remaining_hits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n > 0).then(|| n - 1)
            })
            .map_or(false, |previous| previous == 1)
    }

    /// Store the body to compile once the counter runs out
    pub fn install_body(&self, body: Body) {
        let raw = Arc::into_raw(body).cast_mut();
        let previous = self.pending_body.swap(raw, Ordering::AcqRel);
        debug_assert!(previous.is_null(), "pending body installed twice");
        if !previous.is_null() {
            // SAFETY: non-null values in `pending_body` always come from
            // `Arc::into_raw` above, and the swap gave us sole ownership.
            drop(unsafe { Arc::from_raw(previous) });
        }
    }

    /// Take the pending body
    ///
    /// At most one caller ever receives `Some`; that caller owns the
    /// obligation to schedule compilation.
    pub fn claim_pending(&self) -> Option<Body> {
        let raw = self.pending_body.swap(ptr::null_mut(), Ordering::AcqRel);
        if raw.is_null() {
            return None;
        }
        // SAFETY: see `install_body`; the swap transferred the reference to us.
        let body = unsafe { Arc::from_raw(raw) };
        self.state
            .store(PromotionState::Compiling as u8, Ordering::Release);
        Some(body)
    }

    /// Whether a body is still waiting to be claimed
    pub fn has_pending(&self) -> bool {
        !self.pending_body.load(Ordering::Acquire).is_null()
    }

    /// Compiled callable, once published
    #[inline]
    pub fn compiled(&self) -> Option<&Callable> {
        self.compiled.get()
    }

    #[inline]
    pub fn is_compiled(&self) -> bool {
        self.compiled.get().is_some()
    }

    /// Publish the compiled callable
    ///
    /// Returns false if one was already published; the first value is kept.
    pub fn publish(&self, callable: Callable) -> bool {
        let stored = self.compiled.set(callable).is_ok();
        if stored {
            self.state
                .store(PromotionState::Ready as u8, Ordering::Release);
        }
        stored
    }

    /// Record that compilation failed
    pub fn mark_failed(&self) {
        self.state
            .store(PromotionState::Failed as u8, Ordering::Release);
    }
}

impl Drop for PromotionRecord {
    fn drop(&mut self) {
        let raw = *self.pending_body.get_mut();
        if !raw.is_null() {
            // SAFETY: see `install_body`; `&mut self` means no other thread can
            // claim it concurrently.
            drop(unsafe { Arc::from_raw(raw) });
        }
    }
}

impl fmt::Debug for PromotionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromotionRecord")
            .field("binder", &self.binder)
            .field("signature", &self.signature)
            .field("threshold", &self.threshold)
            .field("remaining_hits", &self.remaining_hits())
            .field("state", &self.state())
            .field("has_pending", &self.has_pending())
            .finish()
    }
}
