//! Background compilation of claimed rule bodies
//!
//! The guard hook that wins the claim on a record's pending body hands it to
//! [`BackgroundCompiler::schedule`], which submits a job to an injected
//! [`Executor`] and returns immediately. The job compiles the body and
//! publishes the result into the record. A failed or panicking compile is
//! logged and leaves the record on the interpreted tier for good.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, trace, warn};

use super::record::PromotionRecord;
use super::stats::TieringStats;
use crate::error::CompileError;
use crate::exec::Backend;
use crate::expr::Body;

/// Unit of background work
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Where background compilation runs
pub trait Executor: Send + Sync {
    fn submit(&self, job: Job);

    fn name(&self) -> &'static str;
}

/// Runs jobs on the global rayon pool
#[derive(Debug, Default, Clone, Copy)]
pub struct RayonExecutor;

impl Executor for RayonExecutor {
    fn submit(&self, job: Job) {
        rayon::spawn(job);
    }

    fn name(&self) -> &'static str {
        "rayon"
    }
}

/// Runs jobs synchronously on the submitting thread
///
/// Deterministic; intended for tests and single-threaded embedders.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn submit(&self, job: Job) {
        job();
    }

    fn name(&self) -> &'static str {
        "inline"
    }
}

/// Dedicated compile threads fed through a channel
///
/// Workers exit once the pool is dropped and the queue drains; drop joins them.
pub struct CompilePool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl CompilePool {
    /// Spawn `num_threads` workers (at least one)
    pub fn new(num_threads: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();

        let workers = (0..num_threads.max(1))
            .map(|id| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("sitetier-compile-{}", id))
                    .spawn(move || compile_worker_loop(receiver))
                    .expect("failed to spawn compile worker thread")
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Pool sized to the number of logical CPUs
    pub fn with_default_threads() -> Self {
        Self::new(num_cpus::get())
    }

    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }
}

fn compile_worker_loop(receiver: Receiver<Job>) {
    // recv fails once every sender is gone and the queue is empty
    while let Ok(job) = receiver.recv() {
        job();
    }
}

impl Executor for CompilePool {
    fn submit(&self, job: Job) {
        let Some(sender) = self.sender.as_ref() else {
            return;
        };
        if sender.send(job).is_err() {
            warn!(target: "sitetier::tiered::compile", "Compile pool is shut down; dropping job");
        }
    }

    fn name(&self) -> &'static str {
        "pool"
    }
}

impl Drop for CompilePool {
    fn drop(&mut self) {
        drop(self.sender.take());
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            // The last handle may be released by a job on one of our own workers
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
    }
}

impl fmt::Debug for CompilePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilePool")
            .field("num_threads", &self.num_threads())
            .finish()
    }
}

struct CompilerInner {
    backend: Arc<dyn Backend>,
    executor: Arc<dyn Executor>,
    stats: Arc<TieringStats>,
    log_failures: bool,
}

/// Schedules compilation of claimed bodies off the calling thread
#[derive(Clone)]
pub struct BackgroundCompiler {
    inner: Arc<CompilerInner>,
}

impl BackgroundCompiler {
    pub fn new(
        backend: Arc<dyn Backend>,
        executor: Arc<dyn Executor>,
        stats: Arc<TieringStats>,
        log_failures: bool,
    ) -> Self {
        Self {
            inner: Arc::new(CompilerInner {
                backend,
                executor,
                stats,
                log_failures,
            }),
        }
    }

    pub fn stats(&self) -> &Arc<TieringStats> {
        &self.inner.stats
    }

    pub fn executor_name(&self) -> &'static str {
        self.inner.executor.name()
    }

    /// Submit `body` for compilation on behalf of `record`
    ///
    /// The caller must be the thread that claimed `body` from `record`.
    pub fn schedule(&self, body: Body, record: Arc<PromotionRecord>) {
        self.inner.stats.compilation_scheduled();
        debug!(
            target: "sitetier::tiered::compile",
            binder = %record.binder(),
            signature = ?record.signature(),
            executor = self.inner.executor.name(),
            "Scheduling background compilation"
        );

        let inner = Arc::clone(&self.inner);
        self.inner
            .executor
            .submit(Box::new(move || inner.run(body, &record)));
    }
}

impl CompilerInner {
    fn run(&self, body: Body, record: &PromotionRecord) {
        // The compiled rule is the final tier: drop the hit-counting hook
        // and with it the body's only route back to the record.
        let stripped: Body = Arc::new(body.strip_promotion());
        drop(body);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.backend.compile(&stripped)))
            .unwrap_or_else(|payload| Err(CompileError::Panicked(panic_message(payload.as_ref()))));

        match outcome {
            Ok(callable) => {
                if record.publish(callable) {
                    self.stats.compilation_completed();
                    trace!(
                        target: "sitetier::tiered::compile",
                        binder = %record.binder(),
                        "Published compiled rule"
                    );
                }
            }
            Err(err) => {
                record.mark_failed();
                self.stats.compilation_failed();
                if self.log_failures {
                    warn!(
                        target: "sitetier::tiered::compile",
                        binder = %record.binder(),
                        error = %err,
                        "Background compilation failed; staying interpreted"
                    );
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl fmt::Debug for BackgroundCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundCompiler")
            .field("executor", &self.inner.executor.name())
            .field("log_failures", &self.inner.log_failures)
            .finish()
    }
}
