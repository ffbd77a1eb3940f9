//! Closure compiler for rule bodies
//!
//! Lowers an [`Expr`] tree once into nested closures. Compared to the tree
//! walker this removes the per-node `match` dispatch, evaluates conditions
//! straight to `bool`, and reads operands by reference instead of cloning
//! them where an operator takes a parameter directly.

use std::sync::Arc;

use smallvec::SmallVec;

use super::{finish, operand, Callable, Dispatch, Exit, SiteCallable, Tier};
use crate::error::{CompileError, CompileResult, SiteError, SiteResult};
use crate::expr::{BinOp, Body, Expr};
use crate::value::Value;

type ValueFn = Box<dyn Fn(&[Value]) -> Result<Value, Exit> + Send + Sync>;
type CondFn = Box<dyn Fn(&[Value]) -> Result<bool, Exit> + Send + Sync>;

/// Compiled-tier backend
#[derive(Debug, Clone, Default)]
pub struct ClosureCompiler {
    /// Bodies with more nodes than this are rejected
    max_nodes: Option<usize>,
}

impl ClosureCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node_limit(max_nodes: usize) -> Self {
        Self {
            max_nodes: Some(max_nodes),
        }
    }

    pub fn compile(&self, body: &Body) -> CompileResult<Callable> {
        let nodes = body.node_count();
        if let Some(limit) = self.max_nodes {
            if nodes > limit {
                return Err(CompileError::Unsupported(format!(
                    "body has {} nodes, limit is {}",
                    nodes, limit
                )));
            }
        }
        let entry = lower(body)?;
        Ok(Arc::new(CompiledRule { entry }))
    }
}

struct CompiledRule {
    entry: ValueFn,
}

impl SiteCallable for CompiledRule {
    fn invoke(&self, args: &[Value]) -> SiteResult<Dispatch> {
        finish((self.entry)(args))
    }

    fn tier(&self) -> Tier {
        Tier::Compiled
    }
}

fn value_fn(f: impl Fn(&[Value]) -> Result<Value, Exit> + Send + Sync + 'static) -> ValueFn {
    Box::new(f)
}

fn cond_fn(f: impl Fn(&[Value]) -> Result<bool, Exit> + Send + Sync + 'static) -> CondFn {
    Box::new(f)
}

fn lower(expr: &Expr) -> CompileResult<ValueFn> {
    Ok(match expr {
        Expr::Param(i) => {
            let i = *i;
            value_fn(move |args| operand(args, i).cloned())
        }
        Expr::Const(v) => {
            let v = v.clone();
            value_fn(move |_| Ok(v.clone()))
        }
        Expr::Binary(op, l, r) => lower_binary(*op, l, r)?,
        Expr::If {
            cond,
            then,
            otherwise,
        } => {
            let cond = lower_cond(cond)?;
            let then = lower(then)?;
            let otherwise = lower(otherwise)?;
            value_fn(move |args| {
                if cond(args)? {
                    then(args)
                } else {
                    otherwise(args)
                }
            })
        }
        Expr::Native { name, func, args } => {
            let name = Arc::clone(name);
            let func = Arc::clone(func);
            let params = args.iter().map(lower).collect::<CompileResult<Vec<_>>>()?;
            value_fn(move |args| {
                let values = params
                    .iter()
                    .map(|p| p(args))
                    .collect::<Result<SmallVec<[Value; 4]>, Exit>>()?;
                func(&values).map_err(|message| {
                    Exit::Fault(SiteError::Native {
                        name: name.to_string(),
                        message,
                    })
                })
            })
        }
        Expr::Rebind => value_fn(|_| Err(Exit::Rebind)),
        Expr::Promotion(_) => {
            return Err(CompileError::Unsupported(
                "promotion hook in compiled body".to_string(),
            ))
        }
        Expr::KindIs(..) | Expr::Not(_) | Expr::And(..) | Expr::Or(..) => {
            let cond = lower_cond(expr)?;
            value_fn(move |args| cond(args).map(Value::Bool))
        }
    })
}

/// Lower an expression used in boolean position
fn lower_cond(expr: &Expr) -> CompileResult<CondFn> {
    Ok(match expr {
        Expr::KindIs(i, kind) => {
            let (i, kind) = (*i, *kind);
            cond_fn(move |args| Ok(kind.accepts(operand(args, i)?)))
        }
        Expr::Const(v) => {
            let b = v.is_true();
            cond_fn(move |_| Ok(b))
        }
        Expr::Not(inner) => {
            let inner = lower_cond(inner)?;
            cond_fn(move |args| inner(args).map(|b| !b))
        }
        Expr::And(l, r) => {
            let l = lower_cond(l)?;
            let r = lower_cond(r)?;
            cond_fn(move |args| Ok(l(args)? && r(args)?))
        }
        Expr::Or(l, r) => {
            let l = lower_cond(l)?;
            let r = lower_cond(r)?;
            cond_fn(move |args| Ok(l(args)? || r(args)?))
        }
        _ => {
            let value = lower(expr)?;
            cond_fn(move |args| value(args).map(|v| v.is_true()))
        }
    })
}

/// Binary operators read parameter operands in place
fn lower_binary(op: BinOp, l: &Expr, r: &Expr) -> CompileResult<ValueFn> {
    Ok(match (l, r) {
        (Expr::Param(a), Expr::Param(b)) => {
            let (a, b) = (*a, *b);
            value_fn(move |args| Ok(op.apply(operand(args, a)?, operand(args, b)?)?))
        }
        (Expr::Param(a), Expr::Const(c)) => {
            let (a, c) = (*a, c.clone());
            value_fn(move |args| Ok(op.apply(operand(args, a)?, &c)?))
        }
        (Expr::Const(c), Expr::Param(b)) => {
            let (c, b) = (c.clone(), *b);
            value_fn(move |args| Ok(op.apply(&c, operand(args, b)?)?))
        }
        _ => {
            let l = lower(l)?;
            let r = lower(r)?;
            value_fn(move |args| {
                let lhs = l(args)?;
                let rhs = r(args)?;
                Ok(op.apply(&lhs, &rhs)?)
            })
        }
    })
}
