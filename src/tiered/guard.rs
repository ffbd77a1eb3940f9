//! Guard augmentation
//!
//! The augmented guard of an interpreted rule is
//!
//! ```text
//! original(args) AND promotion-check(record)
//! ```
//!
//! The conjunction short-circuits, so the check only runs (and only counts a
//! hit) when the binder's own guard accepted the operands.

use std::fmt;
use std::sync::{Arc, Weak};

use tracing::trace;

use super::compiler::BackgroundCompiler;
use super::handoff::ThreadLocalHandoff;
use super::record::PromotionRecord;
use crate::expr::{Body, Expr};

/// Side-effecting guard term attached to every interpreted rule
///
/// Holds the record weakly: the record owns the pending body, which contains
/// this check, and the rule handed to the call site owns the record.
#[derive(Clone)]
pub struct PromotionCheck {
    record: Weak<PromotionRecord>,
    compiler: BackgroundCompiler,
}

impl PromotionCheck {
    pub fn new(record: &Arc<PromotionRecord>, compiler: BackgroundCompiler) -> Self {
        Self {
            record: Arc::downgrade(record),
            compiler,
        }
    }

    /// Evaluate the check for one guard invocation
    ///
    /// Returns false only when the record already has a compiled callable.
    /// In that case the record is parked in this thread's handoff slot so the
    /// rebind that follows picks it up instead of calling the binder.
    pub fn evaluate(&self) -> bool {
        let Some(record) = self.record.upgrade() else {
            return true;
        };

        if record.is_compiled() {
            trace!(
                target: "sitetier::tiered::guard",
                binder = %record.binder(),
                "Compiled rule ready; failing guard"
            );
            self.compiler.stats().promotion_observed();
            ThreadLocalHandoff::offer(record);
            return false;
        }

        if record.record_hit() {
            if let Some(body) = record.claim_pending() {
                self.compiler.schedule(body, record);
            }
        }
        true
    }

    /// Whether the record this check reports to is still alive
    pub fn is_attached(&self) -> bool {
        self.record.strong_count() > 0
    }
}

impl fmt::Debug for PromotionCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromotionCheck")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Builds promotion-aware rule bodies
pub struct GuardAugmenter;

impl GuardAugmenter {
    /// `guard AND check`
    pub fn augment(guard: Expr, check: PromotionCheck) -> Expr {
        Expr::and(guard, Expr::Promotion(check))
    }

    /// `If(guard AND check, action, fallback)`
    pub fn assemble(guard: Expr, check: PromotionCheck, action: Expr, fallback: Expr) -> Body {
        Arc::new(Expr::if_else(
            Self::augment(guard, check),
            action,
            fallback,
        ))
    }
}
