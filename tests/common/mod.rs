//! Test utilities for tiering integration tests
//!
//! This module provides:
//! - A deferred executor whose queued compile jobs run only when asked
//! - Backends that count, fail or delay compilation
//! - Binders that count how often they are consulted

#![allow(dead_code)]

use parking_lot::Mutex;
use sitetier::error::{BindError, BindResult, CompileError, CompileResult};
use sitetier::exec::{Backend, Callable, StandardBackend};
use sitetier::expr::{BinOp, Body, Expr};
use sitetier::tiered::{Binder, BinderRef, ExecutionStrategy, Executor, Job, ParamRef, Tiering};
use sitetier::value::{Value, ValueKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Executor that queues jobs until [`ManualExecutor::run_pending`] is called
#[derive(Default)]
pub struct ManualExecutor {
    queue: Mutex<Vec<Job>>,
    submitted: AtomicUsize,
}

impl ManualExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run every queued job on the calling thread; returns how many ran
    pub fn run_pending(&self) -> usize {
        let jobs: Vec<Job> = std::mem::take(&mut *self.queue.lock());
        let count = jobs.len();
        for job in jobs {
            job();
        }
        count
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }
}

impl Executor for ManualExecutor {
    fn submit(&self, job: Job) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.queue.lock().push(job);
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}

/// Standard backend that counts `compile` calls and can be told to fail
pub struct CountingBackend {
    inner: StandardBackend,
    compiles: AtomicUsize,
    fail: bool,
    delay: Option<Duration>,
}

impl CountingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: StandardBackend::new(),
            compiles: AtomicUsize::new(0),
            fail: false,
            delay: None,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            inner: StandardBackend::new(),
            compiles: AtomicUsize::new(0),
            fail: true,
            delay: None,
        })
    }

    /// Compiles succeed after sleeping for `delay`
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: StandardBackend::new(),
            compiles: AtomicUsize::new(0),
            fail: false,
            delay: Some(delay),
        })
    }

    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

impl Backend for CountingBackend {
    fn interpret(&self, body: &Body) -> Callable {
        self.inner.interpret(body)
    }

    fn compile(&self, body: &Body) -> CompileResult<Callable> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if self.fail {
            return Err(CompileError::Backend("injected failure".to_string()));
        }
        self.inner.compile(body)
    }
}

/// Integer addition binder that counts its invocations
pub struct CountingAdd {
    calls: Arc<AtomicUsize>,
}

impl CountingAdd {
    /// Binder handle plus its shared call counter
    pub fn binder() -> (BinderRef, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let binder = BinderRef::new(CountingAdd {
            calls: Arc::clone(&calls),
        });
        (binder, calls)
    }
}

impl Binder for CountingAdd {
    fn bind(&self, operands: &[Value], params: &[ParamRef]) -> BindResult<ExecutionStrategy> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !operands.iter().all(|v| matches!(v, Value::Int(_))) {
            return Err(BindError::NoMatch("int + int only".to_string()));
        }
        Ok(ExecutionStrategy::new(
            Expr::and(params[0].is(ValueKind::Int), params[1].is(ValueKind::Int)),
            Expr::binary(BinOp::Add, params[0].expr(), params[1].expr()),
        ))
    }

    fn name(&self) -> &str {
        "counting-add"
    }
}

/// Integer multiplication binder, used as a second binder on the same signature
pub struct Mul;

impl Binder for Mul {
    fn bind(&self, _: &[Value], params: &[ParamRef]) -> BindResult<ExecutionStrategy> {
        Ok(ExecutionStrategy::new(
            Expr::and(params[0].is(ValueKind::Int), params[1].is(ValueKind::Int)),
            Expr::binary(BinOp::Mul, params[0].expr(), params[1].expr()),
        ))
    }

    fn name(&self) -> &str {
        "mul"
    }
}

/// Runtime with the given backend and executor
pub fn tiering(backend: Arc<dyn Backend>, executor: Arc<dyn Executor>, threshold: u32) -> Tiering {
    Tiering::builder()
        .backend(backend)
        .executor(executor)
        .threshold(threshold)
        .build()
        .expect("valid test configuration")
}

pub fn ints(a: i64, b: i64) -> [Value; 2] {
    [Value::Int(a), Value::Int(b)]
}
