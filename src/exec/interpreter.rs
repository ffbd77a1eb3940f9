//! Tree-walking interpreter for rule bodies.

use std::sync::Arc;

use smallvec::SmallVec;

use super::{finish, operand, Callable, Dispatch, Exit, SiteCallable, Tier};
use crate::error::{SiteError, SiteResult};
use crate::expr::{Body, Expr};
use crate::value::Value;

/// Interpreted-tier backend
///
/// Building a callable only clones the body handle, which is why the
/// interpreted tier is the one handed out on every fresh bind.
pub struct TreeWalker;

impl TreeWalker {
    pub fn interpret(body: &Body) -> Callable {
        Arc::new(InterpretedRule {
            body: Arc::clone(body),
        })
    }
}

struct InterpretedRule {
    body: Body,
}

impl SiteCallable for InterpretedRule {
    fn invoke(&self, args: &[Value]) -> SiteResult<Dispatch> {
        finish(eval(&self.body, args))
    }

    fn tier(&self) -> Tier {
        Tier::Interpreted
    }
}

pub(crate) fn eval(expr: &Expr, args: &[Value]) -> Result<Value, Exit> {
    match expr {
        Expr::Param(i) => operand(args, *i).cloned(),
        Expr::Const(v) => Ok(v.clone()),
        Expr::KindIs(i, kind) => Ok(Value::Bool(kind.accepts(operand(args, *i)?))),
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner, args)?.is_true())),
        Expr::Binary(op, l, r) => {
            let lhs = eval(l, args)?;
            let rhs = eval(r, args)?;
            Ok(op.apply(&lhs, &rhs)?)
        }
        Expr::And(l, r) => {
            if !eval(l, args)?.is_true() {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval(r, args)?.is_true()))
        }
        Expr::Or(l, r) => {
            if eval(l, args)?.is_true() {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval(r, args)?.is_true()))
        }
        Expr::If {
            cond,
            then,
            otherwise,
        } => {
            if eval(cond, args)?.is_true() {
                eval(then, args)
            } else {
                eval(otherwise, args)
            }
        }
        Expr::Native { name, func, args: params } => {
            let values = params
                .iter()
                .map(|p| eval(p, args))
                .collect::<Result<SmallVec<[Value; 4]>, Exit>>()?;
            func(&values).map_err(|message| {
                Exit::Fault(SiteError::Native {
                    name: name.to_string(),
                    message,
                })
            })
        }
        Expr::Promotion(check) => Ok(Value::Bool(check.evaluate())),
        Expr::Rebind => Err(Exit::Rebind),
    }
}
