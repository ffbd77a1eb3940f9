//! Action bodies
//!
//! A binder expresses both the guard and the action of a strategy as an
//! [`Expr`] tree over the call-site operands. The adapter then assembles the
//! rule body
//!
//! ```text
//! If(guard AND Promotion(record), action, Rebind)
//! ```
//!
//! which is what the backends interpret or compile.

use std::fmt;
use std::sync::Arc;

use crate::error::{SiteError, SiteResult};
use crate::tiered::guard::PromotionCheck;
use crate::value::{Value, ValueKind};

/// Shared, immutable rule body
pub type Body = Arc<Expr>;

/// Host function callable from an action body
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Concat,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Concat => "++",
        }
    }

    /// Apply the operator to two evaluated operands
    ///
    /// Shared by every backend so both tiers agree on semantics.
    pub fn apply(self, lhs: &Value, rhs: &Value) -> SiteResult<Value> {
        let type_error = || SiteError::Type {
            op: self.symbol(),
            left: lhs.kind(),
            right: rhs.kind(),
        };

        match self {
            BinOp::Eq => Ok(Value::Bool(lhs == rhs)),
            BinOp::Ne => Ok(Value::Bool(lhs != rhs)),
            BinOp::Concat => match (lhs, rhs) {
                (Value::Str(a), Value::Str(b)) => {
                    let mut s = String::with_capacity(a.len() + b.len());
                    s.push_str(a);
                    s.push_str(b);
                    Ok(Value::Str(Arc::from(s)))
                }
                _ => Err(type_error()),
            },
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
                match (lhs, rhs) {
                    (Value::Int(a), Value::Int(b)) => int_arith(self, *a, *b).map(Value::Int),
                    (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                        let (a, b) = match (lhs.as_float(), rhs.as_float()) {
                            (Some(a), Some(b)) => (a, b),
                            _ => return Err(type_error()),
                        };
                        Ok(Value::Float(float_arith(self, a, b)))
                    }
                    _ => Err(type_error()),
                }
            }
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let ordering = match (lhs, rhs) {
                    (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
                    (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
                    (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
                    (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                        match (lhs.as_float(), rhs.as_float()) {
                            (Some(a), Some(b)) => a.partial_cmp(&b),
                            _ => None,
                        }
                    }
                    _ => return Err(type_error()),
                };
                // NaN compares false under every ordering operator
                let result = ordering.is_some_and(|ord| match self {
                    BinOp::Lt => ord.is_lt(),
                    BinOp::Le => ord.is_le(),
                    BinOp::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                });
                Ok(Value::Bool(result))
            }
        }
    }
}

fn int_arith(op: BinOp, a: i64, b: i64) -> SiteResult<i64> {
    let result = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div | BinOp::Rem if b == 0 => return Err(SiteError::DivisionByZero),
        BinOp::Div => a.checked_div(b),
        BinOp::Rem => a.checked_rem(b),
        _ => unreachable!("int_arith called with non-arithmetic operator"),
    };
    result.ok_or(SiteError::Overflow(op.symbol()))
}

fn float_arith(op: BinOp, a: f64, b: f64) -> f64 {
    match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Rem => a % b,
        _ => unreachable!("float_arith called with non-arithmetic operator"),
    }
}

/// Expression node of a rule body
#[derive(Clone)]
pub enum Expr {
    /// Operand at the given position
    Param(usize),

    /// Literal value
    Const(Value),

    /// True when the operand at `index` has the given kind
    KindIs(usize, ValueKind),

    /// Boolean negation
    Not(Box<Expr>),

    Binary(BinOp, Box<Expr>, Box<Expr>),

    /// Short-circuit conjunction
    And(Box<Expr>, Box<Expr>),

    /// Short-circuit disjunction
    Or(Box<Expr>, Box<Expr>),

    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },

    /// Call into the host
    Native {
        name: Arc<str>,
        func: NativeFn,
        args: Vec<Expr>,
    },

    /// Hit counting and promotion detection attached by the guard augmenter
    Promotion(PromotionCheck),

    /// Abandon this rule and make the call site rebind
    Rebind,
}

impl Expr {
    pub fn param(index: usize) -> Self {
        Expr::Param(index)
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        Expr::Const(value.into())
    }

    pub fn kind_is(index: usize, kind: ValueKind) -> Self {
        Expr::KindIs(index, kind)
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn and(lhs: Expr, rhs: Expr) -> Self {
        Expr::And(Box::new(lhs), Box::new(rhs))
    }

    pub fn or(lhs: Expr, rhs: Expr) -> Self {
        Expr::Or(Box::new(lhs), Box::new(rhs))
    }

    pub fn not(inner: Expr) -> Self {
        Expr::Not(Box::new(inner))
    }

    pub fn if_else(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::If {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn native(name: &str, func: NativeFn, args: Vec<Expr>) -> Self {
        Expr::Native {
            name: Arc::from(name),
            func,
            args,
        }
    }

    /// Highest operand index referenced, if any
    pub fn max_param(&self) -> Option<usize> {
        let mut max = None;
        self.walk(&mut |e| {
            let index = match e {
                Expr::Param(i) | Expr::KindIs(i, _) => *i,
                _ => return,
            };
            max = Some(max.map_or(index, |m: usize| m.max(index)));
        });
        max
    }

    /// Number of nodes in the tree
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_| count += 1);
        count
    }

    /// Whether the tree carries a promotion hook
    pub fn has_promotion(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| found |= matches!(e, Expr::Promotion(_)));
        found
    }

    /// Copy of this tree with every promotion hook replaced by `true`
    ///
    /// Compiled rules are the last tier, so they must not count hits or
    /// report promotion misses.
    pub fn strip_promotion(&self) -> Expr {
        let strip = |e: &Expr| Box::new(e.strip_promotion());
        match self {
            Expr::Promotion(_) => Expr::Const(Value::Bool(true)),
            Expr::Not(inner) => Expr::Not(strip(inner)),
            Expr::Binary(op, l, r) => Expr::Binary(*op, strip(l), strip(r)),
            Expr::And(l, r) => Expr::And(strip(l), strip(r)),
            Expr::Or(l, r) => Expr::Or(strip(l), strip(r)),
            Expr::If {
                cond,
                then,
                otherwise,
            } => Expr::If {
                cond: strip(cond),
                then: strip(then),
                otherwise: strip(otherwise),
            },
            Expr::Native { name, func, args } => Expr::Native {
                name: Arc::clone(name),
                func: Arc::clone(func),
                args: args.iter().map(Expr::strip_promotion).collect(),
            },
            Expr::Param(_) | Expr::Const(_) | Expr::KindIs(..) | Expr::Rebind => self.clone(),
        }
    }

    fn walk(&self, visit: &mut dyn FnMut(&Expr)) {
        visit(self);
        match self {
            Expr::Not(inner) => inner.walk(visit),
            Expr::Binary(_, l, r) | Expr::And(l, r) | Expr::Or(l, r) => {
                l.walk(visit);
                r.walk(visit);
            }
            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                cond.walk(visit);
                then.walk(visit);
                otherwise.walk(visit);
            }
            Expr::Native { args, .. } => args.iter().for_each(|a| a.walk(visit)),
            Expr::Param(_)
            | Expr::Const(_)
            | Expr::KindIs(..)
            | Expr::Promotion(_)
            | Expr::Rebind => {}
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Param(i) => write!(f, "${}", i),
            Expr::Const(v) => write!(f, "{}", v),
            Expr::KindIs(i, k) => write!(f, "(is ${} {})", i, k),
            Expr::Not(inner) => write!(f, "(not {:?})", inner),
            Expr::Binary(op, l, r) => write!(f, "({} {:?} {:?})", op.symbol(), l, r),
            Expr::And(l, r) => write!(f, "(and {:?} {:?})", l, r),
            Expr::Or(l, r) => write!(f, "(or {:?} {:?})", l, r),
            Expr::If {
                cond,
                then,
                otherwise,
            } => write!(f, "(if {:?} {:?} {:?})", cond, then, otherwise),
            Expr::Native { name, args, .. } => {
                write!(f, "({}", name)?;
                for arg in args {
                    write!(f, " {:?}", arg)?;
                }
                write!(f, ")")
            }
            Expr::Promotion(_) => write!(f, "(promotion)"),
            Expr::Rebind => write!(f, "(rebind)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_arithmetic_is_checked() {
        assert_eq!(
            BinOp::Add.apply(&Value::Int(2), &Value::Int(3)),
            Ok(Value::Int(5))
        );
        assert_eq!(
            BinOp::Add.apply(&Value::Int(i64::MAX), &Value::Int(1)),
            Err(SiteError::Overflow("+"))
        );
        assert_eq!(
            BinOp::Div.apply(&Value::Int(1), &Value::Int(0)),
            Err(SiteError::DivisionByZero)
        );
    }

    #[test]
    fn test_mixed_arithmetic_widens() {
        assert_eq!(
            BinOp::Mul.apply(&Value::Int(2), &Value::Float(1.5)),
            Ok(Value::Float(3.0))
        );
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(
            BinOp::Lt.apply(&Value::str("a"), &Value::str("b")),
            Ok(Value::Bool(true))
        );
        assert_eq!(
            BinOp::Ge.apply(&Value::Float(f64::NAN), &Value::Float(1.0)),
            Ok(Value::Bool(false))
        );
        assert!(BinOp::Lt.apply(&Value::Nil, &Value::Int(1)).is_err());
    }

    #[test]
    fn test_concat_requires_strings() {
        assert_eq!(
            BinOp::Concat.apply(&Value::str("ab"), &Value::str("cd")),
            Ok(Value::str("abcd"))
        );
        assert!(BinOp::Concat.apply(&Value::str("ab"), &Value::Int(1)).is_err());
    }

    #[test]
    fn test_max_param_and_node_count() {
        let e = Expr::and(
            Expr::kind_is(0, ValueKind::Int),
            Expr::binary(BinOp::Lt, Expr::param(2), Expr::constant(10i64)),
        );
        assert_eq!(e.max_param(), Some(2));
        assert_eq!(e.node_count(), 5);
        assert_eq!(Expr::constant(1i64).max_param(), None);
    }

    #[test]
    fn test_strip_promotion_without_hooks_is_identity_shaped() {
        let e = Expr::if_else(Expr::constant(true), Expr::param(0), Expr::Rebind);
        let stripped = e.strip_promotion();
        assert_eq!(format!("{:?}", stripped), format!("{:?}", e));
        assert!(!stripped.has_promotion());
    }
}
