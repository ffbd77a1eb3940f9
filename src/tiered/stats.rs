//! Tiering statistics (lock-free counters)

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the adapter, guard hooks and background compiler
#[derive(Debug, Default)]
pub struct TieringStats {
    binds: AtomicU64,
    binder_calls: AtomicU64,
    handoff_hits: AtomicU64,
    handoff_foreign: AtomicU64,
    promotions_observed: AtomicU64,
    compilations_scheduled: AtomicU64,
    compilations_completed: AtomicU64,
    compilations_failed: AtomicU64,
}

/// Point-in-time copy of [`TieringStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TieringStatsSnapshot {
    /// Calls to `bind`
    pub binds: u64,

    /// Calls that reached the binder
    pub binder_calls: u64,

    /// Binds answered from the thread-local handoff
    pub handoff_hits: u64,

    /// Handoff entries dropped because they belonged to another binder
    pub handoff_foreign: u64,

    /// Guard evaluations that found a compiled callable and forced a rebind
    pub promotions_observed: u64,

    pub compilations_scheduled: u64,
    pub compilations_completed: u64,
    pub compilations_failed: u64,
}

impl TieringStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bind(&self) {
        self.binds.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn binder_call(&self) {
        self.binder_calls.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn handoff_hit(&self) {
        self.handoff_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn handoff_foreign(&self) {
        self.handoff_foreign.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn promotion_observed(&self) {
        self.promotions_observed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn compilation_scheduled(&self) {
        self.compilations_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn compilation_completed(&self) {
        self.compilations_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn compilation_failed(&self) {
        self.compilations_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TieringStatsSnapshot {
        TieringStatsSnapshot {
            binds: self.binds.load(Ordering::Relaxed),
            binder_calls: self.binder_calls.load(Ordering::Relaxed),
            handoff_hits: self.handoff_hits.load(Ordering::Relaxed),
            handoff_foreign: self.handoff_foreign.load(Ordering::Relaxed),
            promotions_observed: self.promotions_observed.load(Ordering::Relaxed),
            compilations_scheduled: self.compilations_scheduled.load(Ordering::Relaxed),
            compilations_completed: self.compilations_completed.load(Ordering::Relaxed),
            compilations_failed: self.compilations_failed.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.binds.store(0, Ordering::Relaxed);
        self.binder_calls.store(0, Ordering::Relaxed);
        self.handoff_hits.store(0, Ordering::Relaxed);
        self.handoff_foreign.store(0, Ordering::Relaxed);
        self.promotions_observed.store(0, Ordering::Relaxed);
        self.compilations_scheduled.store(0, Ordering::Relaxed);
        self.compilations_completed.store(0, Ordering::Relaxed);
        self.compilations_failed.store(0, Ordering::Relaxed);
    }
}

impl TieringStatsSnapshot {
    /// Compilations scheduled but not yet finished either way
    pub fn compilations_in_flight(&self) -> u64 {
        self.compilations_scheduled
            .saturating_sub(self.compilations_completed + self.compilations_failed)
    }
}
