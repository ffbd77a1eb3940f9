//! Execution backends for rule bodies
//!
//! Two tiers are provided:
//!
//! ```text
//! Interpreted: tree-walking evaluation of the body (cheap to build, slower to run)
//! Compiled:    body lowered once into nested closures (costly to build, fast to run)
//! ```
//!
//! The tiering machinery only sees the [`Backend`] trait, so embedders can
//! plug in a different interpreter or a native code generator.

pub mod closure;
pub mod interpreter;

use std::fmt;
use std::sync::Arc;

use crate::error::{CompileResult, SiteError, SiteResult};
use crate::expr::Body;
use crate::value::Value;

pub use closure::ClosureCompiler;
pub use interpreter::TreeWalker;

/// Result of invoking a rule
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Guard held and the action produced a value
    Hit(Value),
    /// Guard failed; the call site must try another rule or rebind
    Miss,
}

impl Dispatch {
    pub fn is_hit(&self) -> bool {
        matches!(self, Dispatch::Hit(_))
    }
}

/// Execution tier of a callable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Tier {
    Interpreted = 0,
    Compiled = 1,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Interpreted => f.write_str("interpreted"),
            Tier::Compiled => f.write_str("compiled"),
        }
    }
}

/// A rule installed in a call site's cache
pub trait SiteCallable: Send + Sync {
    /// Run the rule against the operands
    fn invoke(&self, args: &[Value]) -> SiteResult<Dispatch>;

    /// Tier the rule executes at
    fn tier(&self) -> Tier;
}

/// Shared handle to a rule
pub type Callable = Arc<dyn SiteCallable>;

/// Compilation backend consumed by the tiering layer
///
/// `interpret` must be cheap and infallible; `compile` runs on a background
/// executor and may fail.
pub trait Backend: Send + Sync {
    fn interpret(&self, body: &Body) -> Callable;

    fn compile(&self, body: &Body) -> CompileResult<Callable>;
}

/// Non-local exits out of body evaluation
#[derive(Debug)]
pub(crate) enum Exit {
    /// Evaluation reached the fallback fragment
    Rebind,
    Fault(SiteError),
}

impl From<SiteError> for Exit {
    fn from(err: SiteError) -> Self {
        Exit::Fault(err)
    }
}

pub(crate) fn finish(result: Result<Value, Exit>) -> SiteResult<Dispatch> {
    match result {
        Ok(value) => Ok(Dispatch::Hit(value)),
        Err(Exit::Rebind) => Ok(Dispatch::Miss),
        Err(Exit::Fault(err)) => Err(err),
    }
}

pub(crate) fn operand(args: &[Value], index: usize) -> Result<&Value, Exit> {
    args.get(index).ok_or(Exit::Fault(SiteError::Arity {
        index,
        len: args.len(),
    }))
}

/// Default backend pairing the tree walker with the closure compiler
#[derive(Debug, Clone, Default)]
pub struct StandardBackend {
    compiler: ClosureCompiler,
}

impl StandardBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a compiler that rejects bodies larger than `max_nodes`
    pub fn with_node_limit(max_nodes: usize) -> Self {
        Self {
            compiler: ClosureCompiler::with_node_limit(max_nodes),
        }
    }
}

impl Backend for StandardBackend {
    fn interpret(&self, body: &Body) -> Callable {
        TreeWalker::interpret(body)
    }

    fn compile(&self, body: &Body) -> CompileResult<Callable> {
        self.compiler.compile(body)
    }
}
