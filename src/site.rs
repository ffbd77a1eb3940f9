//! Reference call site
//!
//! A [`CallSite`] keeps a small most-recently-bound list of rules. An
//! invocation tries them front to back; when every rule misses, the site
//! rebinds through its [`BinderAdapter`] and puts the new rule in front,
//! evicting the oldest rule once the list is full.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;
use tracing::trace;

use crate::error::{SiteError, SiteResult};
use crate::exec::{Callable, Dispatch, Tier};
use crate::tiered::{BinderAdapter, BinderRef, SiteSignature, Tiering};
use crate::value::Value;

type RuleSnapshot = SmallVec<[Callable; 4]>;

/// Dispatch counters of one call site
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallSiteStats {
    /// Invocations answered by a cached rule
    pub hits: u64,
    /// Cached rules that reported a miss
    pub misses: u64,
    /// Rules bound through the adapter
    pub rebinds: u64,
}

/// Dynamic operation site with a per-site rule cache
pub struct CallSite {
    adapter: Arc<BinderAdapter>,
    binder: BinderRef,
    threshold: i32,
    capacity: usize,
    max_rebinds: usize,
    rules: RwLock<Vec<Callable>>,
    hits: AtomicU64,
    misses: AtomicU64,
    rebinds: AtomicU64,
}

impl CallSite {
    /// Site for `signature` dispatching through `binder`
    ///
    /// Cache capacity and rebind rounds come from the runtime's configuration;
    /// the compilation threshold is the runtime default.
    pub fn new(tiering: &Tiering, signature: &SiteSignature, binder: BinderRef) -> Self {
        let config = tiering.config();
        Self::with_adapter(
            tiering.adapter(signature),
            binder,
            config.rule_cache_capacity,
            config.max_rebinds,
        )
    }

    pub fn with_adapter(
        adapter: Arc<BinderAdapter>,
        binder: BinderRef,
        capacity: usize,
        max_rebinds: usize,
    ) -> Self {
        Self {
            adapter,
            binder,
            threshold: -1,
            capacity: capacity.max(1),
            max_rebinds: max_rebinds.max(1),
            rules: RwLock::new(Vec::with_capacity(capacity.max(1))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            rebinds: AtomicU64::new(0),
        }
    }

    /// Compilation threshold passed on every rebind (negative for default)
    pub fn with_threshold(mut self, threshold: i32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn binder(&self) -> &BinderRef {
        &self.binder
    }

    /// Run the operation on `args`
    pub fn invoke(&self, args: &[Value]) -> SiteResult<Value> {
        // Snapshot so rule evaluation never runs under the lock
        let snapshot: RuleSnapshot = self.rules.read().iter().cloned().collect();
        for rule in &snapshot {
            match rule.invoke(args)? {
                Dispatch::Hit(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Dispatch::Miss => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        drop(snapshot);

        for round in 1..=self.max_rebinds {
            let rule = self.rebind(args)?;
            match rule.invoke(args)? {
                Dispatch::Hit(value) => return Ok(value),
                Dispatch::Miss => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    trace!(
                        target: "sitetier::site",
                        binder = %self.binder.id(),
                        round,
                        "Fresh rule missed; rebinding again"
                    );
                }
            }
        }

        Err(SiteError::Unbound {
            rebinds: self.max_rebinds,
        })
    }

    fn rebind(&self, args: &[Value]) -> SiteResult<Callable> {
        self.rebinds.fetch_add(1, Ordering::Relaxed);
        let rule = self.adapter.bind(&self.binder, args, self.threshold)?;

        let mut rules = self.rules.write();
        // Threads that missed together can pick up the same compiled rule
        if let Some(pos) = rules.iter().position(|r| Arc::ptr_eq(r, &rule)) {
            let cached = rules.remove(pos);
            rules.insert(0, cached);
            return Ok(rule);
        }
        if rules.len() >= self.capacity {
            rules.pop();
        }
        rules.insert(0, Arc::clone(&rule));
        Ok(rule)
    }

    /// Tiers of the cached rules, most recent first
    pub fn tiers(&self) -> Vec<Tier> {
        self.rules.read().iter().map(|r| r.tier()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    /// Drop every cached rule
    pub fn clear(&self) {
        self.rules.write().clear();
    }

    pub fn stats(&self) -> CallSiteStats {
        CallSiteStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            rebinds: self.rebinds.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSite")
            .field("signature", self.adapter.signature())
            .field("binder", &self.binder)
            .field("tiers", &self.tiers())
            .field("stats", &self.stats())
            .finish()
    }
}
