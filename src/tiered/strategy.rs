//! Binders and the strategies they produce.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::BindResult;
use crate::expr::Expr;
use crate::value::{Value, ValueKind};

/// Guard/action pair produced by a binder for one operand shape
///
/// The guard decides whether the strategy still applies to a later
/// invocation; the action computes the result when it does.
#[derive(Debug, Clone)]
pub struct ExecutionStrategy {
    guard: Expr,
    action: Expr,
}

impl ExecutionStrategy {
    pub fn new(guard: Expr, action: Expr) -> Self {
        Self { guard, action }
    }

    pub fn guard(&self) -> &Expr {
        &self.guard
    }

    pub fn action(&self) -> &Expr {
        &self.action
    }

    pub fn into_parts(self) -> (Expr, Expr) {
        (self.guard, self.action)
    }

    /// Highest operand index referenced by guard or action
    pub fn max_param(&self) -> Option<usize> {
        match (self.guard.max_param(), self.action.max_param()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Operand slot of a call-site signature, handed to binders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamRef {
    pub index: usize,
    pub kind: ValueKind,
}

impl ParamRef {
    /// Expression reading this operand
    pub fn expr(&self) -> Expr {
        Expr::Param(self.index)
    }

    /// Guard testing the operand has `kind`
    pub fn is(&self, kind: ValueKind) -> Expr {
        Expr::KindIs(self.index, kind)
    }
}

/// Semantic analyzer producing strategies from concrete operands
pub trait Binder: Send + Sync {
    /// Produce a strategy for `operands`, referring to them through `params`
    fn bind(&self, operands: &[Value], params: &[ParamRef]) -> BindResult<ExecutionStrategy>;

    /// Name used in log output
    fn name(&self) -> &str {
        "binder"
    }
}

static NEXT_BINDER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a binder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BinderId(u64);

impl BinderId {
    fn fresh() -> Self {
        BinderId(NEXT_BINDER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::fresh()
    }
}

impl fmt::Display for BinderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "binder#{}", self.0)
    }
}

/// Binder handle carrying its identity
///
/// Two handles are the same binder exactly when their ids are equal; clones
/// share the id, separately constructed handles never do.
#[derive(Clone)]
pub struct BinderRef {
    id: BinderId,
    binder: Arc<dyn Binder>,
}

impl BinderRef {
    pub fn new(binder: impl Binder + 'static) -> Self {
        Self::from_arc(Arc::new(binder))
    }

    pub fn from_arc(binder: Arc<dyn Binder>) -> Self {
        Self {
            id: BinderId::fresh(),
            binder,
        }
    }

    #[inline]
    pub fn id(&self) -> BinderId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.binder.name()
    }

    pub fn bind(&self, operands: &[Value], params: &[ParamRef]) -> BindResult<ExecutionStrategy> {
        self.binder.bind(operands, params)
    }
}

impl PartialEq for BinderRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BinderRef {}

impl fmt::Debug for BinderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinderRef")
            .field("id", &self.id)
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BindError;

    struct Reject;

    impl Binder for Reject {
        fn bind(&self, _: &[Value], _: &[ParamRef]) -> BindResult<ExecutionStrategy> {
            Err(BindError::NoMatch("never".to_string()))
        }
    }

    #[test]
    fn test_binder_identity() {
        let a = BinderRef::new(Reject);
        let b = BinderRef::new(Reject);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn test_strategy_max_param() {
        let strategy = ExecutionStrategy::new(Expr::kind_is(1, ValueKind::Int), Expr::param(0));
        assert_eq!(strategy.max_param(), Some(1));
        let constant = ExecutionStrategy::new(Expr::constant(true), Expr::constant(1i64));
        assert_eq!(constant.max_param(), None);
    }

    #[test]
    fn test_param_ref_helpers() {
        let p = ParamRef {
            index: 2,
            kind: ValueKind::Any,
        };
        assert!(matches!(p.expr(), Expr::Param(2)));
        assert!(matches!(p.is(ValueKind::Str), Expr::KindIs(2, ValueKind::Str)));
    }
}
