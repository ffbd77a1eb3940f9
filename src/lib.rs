//! sitetier - Per-Call-Site Tiered Binding
//!
//! This library resolves the code behind a dynamic operation separately at
//! every call site, and transparently moves hot sites from an interpreted
//! tier to a compiled tier without ever stalling the calling thread.
//!
//! # Architecture
//!
//! 1. **Binding** (`tiered` module)
//!    - A [`Binder`](tiered::Binder) inspects concrete operands and returns an
//!      [`ExecutionStrategy`](tiered::ExecutionStrategy): a guard plus an action
//!    - The per-signature [`BinderAdapter`](tiered::BinderAdapter) wraps the
//!      strategy in an interpreted rule whose guard also counts hits
//!    - Once a rule crosses its compilation threshold the body is compiled on a
//!      background executor
//!    - The next guard evaluation fails, the site rebinds, and the adapter hands
//!      back the compiled rule through a thread-local slot
//!
//! 2. **Execution** (`exec` module)
//!    - Tree-walking interpreter for freshly bound rules
//!    - Closure compiler for promoted rules
//!
//! 3. **Call sites** (`site` module)
//!    - Small per-site rule cache that rebinds on a miss
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use sitetier::error::BindResult;
//! use sitetier::expr::{BinOp, Expr};
//! use sitetier::site::CallSite;
//! use sitetier::tiered::*;
//! use sitetier::value::{Value, ValueKind};
//!
//! struct Inc;
//!
//! impl Binder for Inc {
//!     fn bind(&self, _: &[Value], params: &[ParamRef]) -> BindResult<ExecutionStrategy> {
//!         Ok(ExecutionStrategy::new(
//!             params[0].is(ValueKind::Int),
//!             Expr::binary(BinOp::Add, params[0].expr(), Expr::constant(1i64)),
//!         ))
//!     }
//! }
//!
//! let tiering = Tiering::builder()
//!     .executor(Arc::new(InlineExecutor))
//!     .threshold(2)
//!     .build()
//!     .unwrap();
//! let sig = SiteSignature::new([ValueKind::Int], ValueKind::Int);
//! let site = CallSite::new(&tiering, &sig, BinderRef::new(Inc));
//!
//! for i in 0..10 {
//!     assert_eq!(site.invoke(&[Value::Int(i)]).unwrap(), Value::Int(i + 1));
//! }
//! assert_eq!(tiering.stats().binder_calls, 1);
//! ```

pub mod config;
pub mod error;
pub mod exec;
pub mod expr;
pub mod site;
pub mod tiered;
pub mod value;

pub use config::{ConfigError, ExecutorKind, TieringConfig};
pub use error::{BindError, BindResult, CompileError, CompileResult, SiteError, SiteResult};
pub use exec::{Backend, Callable, Dispatch, SiteCallable, StandardBackend, Tier};
pub use expr::{BinOp, Body, Expr};
pub use site::{CallSite, CallSiteStats};
pub use tiered::{
    Binder, BinderAdapter, BinderId, BinderRef, ExecutionStrategy, ParamRef, SiteSignature,
    Tiering, TieringStatsSnapshot,
};
pub use value::{Value, ValueKind};
