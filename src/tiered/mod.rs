//! Tiered binding: promoting hot call-site rules from interpreted to compiled
//!
//! # Flow
//!
//! ```text
//! call site miss ──► BinderAdapter::bind
//!                      │ handoff slot holds a compiled rule for this binder?
//!                      ├── yes ─► return it (binder not called)
//!                      └── no ──► Binder::bind ─► ExecutionStrategy {guard, action}
//!                                   └─► If(guard AND promotion-check, action, Rebind)
//!                                         └─► interpreted rule + PromotionRecord
//!
//! guard hit ──► promotion-check
//!                 ├── compiled? ─► park record in handoff, fail guard (call site rebinds)
//!                 └── count hit; on the threshold-crossing hit claim the pending
//!                     body and hand it to the BackgroundCompiler
//! ```
//!
//! Promotion is visible to the call site only as a guard failure. Nothing on
//! the dispatch path takes a lock or waits for compilation.

pub mod adapter;
pub mod compiler;
pub mod guard;
pub mod handoff;
pub mod record;
pub mod stats;
pub mod strategy;

use std::fmt;
use std::sync::Arc;

use tracing::info;

pub use adapter::{AdapterRegistry, BinderAdapter, SignatureId, SiteSignature};
pub use compiler::{BackgroundCompiler, CompilePool, Executor, InlineExecutor, Job, RayonExecutor};
pub use guard::{GuardAugmenter, PromotionCheck};
pub use handoff::{Pickup, ThreadLocalHandoff};
pub use record::{PromotionRecord, PromotionState};
pub use stats::{TieringStats, TieringStatsSnapshot};
pub use strategy::{Binder, BinderId, BinderRef, ExecutionStrategy, ParamRef};

use crate::config::{ConfigError, ExecutorKind, TieringConfig};
use crate::error::BindResult;
use crate::exec::{Backend, Callable, StandardBackend};
use crate::value::Value;

/// Guard hits before compilation when a bind asks for the default threshold
pub const DEFAULT_COMPILATION_THRESHOLD: u32 = 32;

/// Tiering runtime: adapters, background compiler and statistics
///
/// Cheap to share behind an `Arc`; call sites hold one and rebind through it.
pub struct Tiering {
    config: TieringConfig,
    registry: AdapterRegistry,
    compiler: BackgroundCompiler,
    stats: Arc<TieringStats>,
}

impl Tiering {
    /// Runtime with the standard backend and the executor named in `config`
    pub fn new(config: TieringConfig) -> Result<Self, ConfigError> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> TieringBuilder {
        TieringBuilder::default()
    }

    pub fn config(&self) -> &TieringConfig {
        &self.config
    }

    /// Adapter for `signature`, created on first use
    pub fn adapter(&self, signature: &SiteSignature) -> Arc<BinderAdapter> {
        self.registry.adapter(signature)
    }

    /// Bind through the adapter for `signature`
    pub fn bind(
        &self,
        signature: &SiteSignature,
        binder: &BinderRef,
        args: &[Value],
        threshold: i32,
    ) -> BindResult<Callable> {
        self.adapter(signature).bind(binder, args, threshold)
    }

    pub fn stats(&self) -> TieringStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    pub fn executor_name(&self) -> &'static str {
        self.compiler.executor_name()
    }
}

impl fmt::Debug for Tiering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tiering")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("compiler", &self.compiler)
            .finish()
    }
}

/// Builder for [`Tiering`] with injectable backend and executor
#[derive(Default)]
pub struct TieringBuilder {
    config: TieringConfig,
    backend: Option<Arc<dyn Backend>>,
    executor: Option<Arc<dyn Executor>>,
}

impl TieringBuilder {
    pub fn config(mut self, config: TieringConfig) -> Self {
        self.config = config;
        self
    }

    pub fn threshold(mut self, threshold: u32) -> Self {
        self.config.default_threshold = threshold;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use `executor` instead of the one selected by the configuration
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> Result<Tiering, ConfigError> {
        self.config.validate()?;

        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(StandardBackend::new()));
        let executor = self
            .executor
            .unwrap_or_else(|| executor_for(&self.config));
        let stats = Arc::new(TieringStats::new());
        let compiler = BackgroundCompiler::new(
            Arc::clone(&backend),
            executor,
            Arc::clone(&stats),
            self.config.log_compile_failures,
        );

        info!(
            target: "sitetier::tiered",
            threshold = self.config.default_threshold,
            executor = compiler.executor_name(),
            "Tiering runtime ready"
        );

        Ok(Tiering {
            registry: AdapterRegistry::new(
                backend,
                compiler.clone(),
                self.config.default_threshold,
            ),
            compiler,
            stats,
            config: self.config,
        })
    }
}

fn executor_for(config: &TieringConfig) -> Arc<dyn Executor> {
    match config.executor {
        ExecutorKind::Rayon => Arc::new(RayonExecutor),
        ExecutorKind::Pool => Arc::new(CompilePool::new(config.resolved_compile_threads())),
        ExecutorKind::Inline => Arc::new(InlineExecutor),
    }
}
