//! Per-signature binder adapter
//!
//! One [`BinderAdapter`] exists per call-site signature. It sits between the
//! call site and the binder: on a rebind it first checks whether this thread
//! was handed a freshly compiled rule for the same binder, and otherwise asks
//! the binder for a strategy and wraps it in a promotion-aware interpreted
//! rule.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::compiler::BackgroundCompiler;
use super::guard::{GuardAugmenter, PromotionCheck};
use super::handoff::{Pickup, ThreadLocalHandoff};
use super::record::PromotionRecord;
use super::stats::TieringStats;
use super::strategy::{BinderRef, ParamRef};
use crate::error::{BindError, BindResult, SiteResult};
use crate::exec::{Backend, Callable, Dispatch, SiteCallable, Tier};
use crate::expr::Expr;
use crate::value::{Value, ValueKind};

/// Interned call-site signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignatureId(u32);

impl SignatureId {
    pub fn from_raw(raw: u32) -> Self {
        SignatureId(raw)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

/// Operand and result kinds of a call site
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SiteSignature {
    pub params: SmallVec<[ValueKind; 4]>,
    pub result: ValueKind,
}

impl SiteSignature {
    pub fn new(params: impl IntoIterator<Item = ValueKind>, result: ValueKind) -> Self {
        Self {
            params: params.into_iter().collect(),
            result,
        }
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Check `args` against the parameter kinds
    pub fn check(&self, args: &[Value]) -> BindResult<()> {
        if args.len() != self.arity() {
            return Err(BindError::Signature {
                expected: self.arity(),
                got: args.len(),
                detail: "wrong operand count".to_string(),
            });
        }
        for (index, (kind, arg)) in self.params.iter().zip(args).enumerate() {
            if !kind.accepts(arg) {
                return Err(BindError::Signature {
                    expected: self.arity(),
                    got: args.len(),
                    detail: format!("operand {} is {}, expected {}", index, arg.kind(), kind),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for SiteSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, kind) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", kind)?;
        }
        write!(f, ") -> {}", self.result)
    }
}

/// Interpreted rule together with the record that promotes it
///
/// Owning the record here ties its lifetime to the rule: once every call
/// site drops the rule, the record and its pending body go with it.
struct TierZeroRule {
    inner: Callable,
    record: Arc<PromotionRecord>,
}

impl SiteCallable for TierZeroRule {
    #[inline]
    fn invoke(&self, args: &[Value]) -> SiteResult<Dispatch> {
        self.inner.invoke(args)
    }

    fn tier(&self) -> Tier {
        self.inner.tier()
    }
}

impl fmt::Debug for TierZeroRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TierZeroRule")
            .field("record", &self.record)
            .finish()
    }
}

/// Binds call sites of one signature, producing promotion-aware rules
pub struct BinderAdapter {
    id: SignatureId,
    signature: SiteSignature,
    params: Vec<ParamRef>,
    fallback: Expr,
    backend: Arc<dyn Backend>,
    compiler: BackgroundCompiler,
    default_threshold: u32,
}

impl BinderAdapter {
    pub fn new(
        id: SignatureId,
        signature: SiteSignature,
        backend: Arc<dyn Backend>,
        compiler: BackgroundCompiler,
        default_threshold: u32,
    ) -> Self {
        let params = signature
            .params
            .iter()
            .enumerate()
            .map(|(index, &kind)| ParamRef { index, kind })
            .collect();
        Self {
            id,
            signature,
            params,
            fallback: Expr::Rebind,
            backend,
            compiler,
            default_threshold,
        }
    }

    pub fn id(&self) -> SignatureId {
        self.id
    }

    pub fn signature(&self) -> &SiteSignature {
        &self.signature
    }

    pub fn params(&self) -> &[ParamRef] {
        &self.params
    }

    pub fn default_threshold(&self) -> u32 {
        self.default_threshold
    }

    fn stats(&self) -> &TieringStats {
        self.compiler.stats()
    }

    /// Produce the rule to install at a call site
    ///
    /// A compiled rule parked on this thread for `binder` is returned without
    /// consulting the binder. Otherwise the binder's strategy is wrapped in an
    /// interpreted rule that requests compilation after `threshold` guard
    /// hits; a negative threshold selects the configured default.
    pub fn bind(&self, binder: &BinderRef, args: &[Value], threshold: i32) -> BindResult<Callable> {
        self.stats().bind();

        match ThreadLocalHandoff::take(self.id, binder.id()) {
            Pickup::Taken(record) => {
                if let Some(compiled) = record.compiled() {
                    self.stats().handoff_hit();
                    trace!(
                        target: "sitetier::tiered::handoff",
                        binder = %binder.id(),
                        signature = %self.signature,
                        "Installing compiled rule from handoff"
                    );
                    return Ok(Arc::clone(compiled));
                }
            }
            Pickup::Foreign(owner) => {
                self.stats().handoff_foreign();
                trace!(
                    target: "sitetier::tiered::handoff",
                    binder = %binder.id(),
                    owner = %owner,
                    "Dropped handoff entry of another binder"
                );
            }
            Pickup::Empty => {}
        }

        self.signature.check(args)?;

        let threshold = self.resolve_threshold(threshold);
        let record = Arc::new(PromotionRecord::new(binder.id(), self.id, threshold));

        self.stats().binder_call();
        let strategy = binder.bind(args, &self.params)?;

        if let Some(param) = strategy.max_param() {
            if param >= self.signature.arity() {
                return Err(BindError::Malformed {
                    param,
                    arity: self.signature.arity(),
                });
            }
        }

        let (guard, action) = strategy.into_parts();
        let check = PromotionCheck::new(&record, self.compiler.clone());
        let body = GuardAugmenter::assemble(guard, check, action, self.fallback.clone());
        record.install_body(Arc::clone(&body));

        debug!(
            target: "sitetier::tiered::adapter",
            binder = %binder.id(),
            name = binder.name(),
            signature = %self.signature,
            threshold,
            "Bound interpreted rule"
        );

        Ok(Arc::new(TierZeroRule {
            inner: self.backend.interpret(&body),
            record,
        }))
    }

    fn resolve_threshold(&self, threshold: i32) -> u32 {
        u32::try_from(threshold).unwrap_or(self.default_threshold)
    }
}

impl fmt::Debug for BinderAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinderAdapter")
            .field("id", &self.id)
            .field("signature", &self.signature)
            .field("default_threshold", &self.default_threshold)
            .finish()
    }
}

/// Interns signatures and caches one adapter per signature
pub struct AdapterRegistry {
    adapters: DashMap<SiteSignature, Arc<BinderAdapter>>,
    next_id: AtomicU32,
    backend: Arc<dyn Backend>,
    compiler: BackgroundCompiler,
    default_threshold: u32,
}

impl AdapterRegistry {
    pub fn new(backend: Arc<dyn Backend>, compiler: BackgroundCompiler, default_threshold: u32) -> Self {
        Self {
            adapters: DashMap::new(),
            next_id: AtomicU32::new(0),
            backend,
            compiler,
            default_threshold,
        }
    }

    /// Adapter for `signature`, created on first request
    pub fn adapter(&self, signature: &SiteSignature) -> Arc<BinderAdapter> {
        if let Some(existing) = self.adapters.get(signature) {
            return Arc::clone(existing.value());
        }
        let entry = self.adapters.entry(signature.clone()).or_insert_with(|| {
            let id = SignatureId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
            Arc::new(BinderAdapter::new(
                id,
                signature.clone(),
                Arc::clone(&self.backend),
                self.compiler.clone(),
                self.default_threshold,
            ))
        });
        Arc::clone(entry.value())
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.adapters.len())
            .field("default_threshold", &self.default_threshold)
            .finish()
    }
}
