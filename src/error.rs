//! Error types for binding, dispatch and compilation.
//!
//! This module defines [`BindError`], [`SiteError`] and [`CompileError`]
//! together with their `Result` aliases.

use std::fmt;

use crate::value::ValueKind;

// =============================================================================
// BindError
// =============================================================================

/// Errors raised while producing a rule for a call site
///
/// Errors returned by a [`Binder`](crate::tiered::Binder) pass through
/// [`BinderAdapter::bind`](crate::tiered::BinderAdapter::bind) unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum BindError {
    /// The binder failed to produce a strategy
    Failed(String),

    /// The binder has no strategy for these operand shapes
    NoMatch(String),

    /// Operands do not fit the call-site signature
    Signature {
        expected: usize,
        got: usize,
        detail: String,
    },

    /// Strategy references an operand the signature does not have
    Malformed { param: usize, arity: usize },
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindError::Failed(msg) => write!(f, "Binder failed: {}", msg),
            BindError::NoMatch(msg) => write!(f, "No applicable strategy: {}", msg),
            BindError::Signature {
                expected,
                got,
                detail,
            } => write!(
                f,
                "Signature mismatch: expected {} operands, got {} ({})",
                expected, got, detail
            ),
            BindError::Malformed { param, arity } => write!(
                f,
                "Strategy references parameter {} but the site has arity {}",
                param, arity
            ),
        }
    }
}

impl std::error::Error for BindError {}

/// Result type for binding
pub type BindResult<T> = Result<T, BindError>;

// =============================================================================
// SiteError
// =============================================================================

/// Errors raised while evaluating a rule or dispatching through a call site
#[derive(Debug, Clone, PartialEq)]
pub enum SiteError {
    /// Operand index outside the argument list
    Arity { index: usize, len: usize },

    /// Operation applied to values of the wrong kind
    Type {
        op: &'static str,
        left: ValueKind,
        right: ValueKind,
    },

    /// Integer division or remainder by zero
    DivisionByZero,

    /// Checked integer arithmetic overflowed
    Overflow(&'static str),

    /// Host function reported an error
    Native { name: String, message: String },

    /// Rebinding the site failed
    Bind(BindError),

    /// The site kept missing after rebinding
    Unbound { rebinds: usize },
}

impl fmt::Display for SiteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteError::Arity { index, len } => {
                write!(f, "Operand {} out of range for {} arguments", index, len)
            }
            SiteError::Type { op, left, right } => {
                write!(f, "Type error: cannot apply {} to {} and {}", op, left, right)
            }
            SiteError::DivisionByZero => write!(f, "Division by zero"),
            SiteError::Overflow(op) => write!(f, "Integer overflow in {}", op),
            SiteError::Native { name, message } => {
                write!(f, "Native function {} failed: {}", name, message)
            }
            SiteError::Bind(err) => write!(f, "{}", err),
            SiteError::Unbound { rebinds } => {
                write!(f, "Call site still unbound after {} rebinds", rebinds)
            }
        }
    }
}

impl std::error::Error for SiteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SiteError::Bind(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BindError> for SiteError {
    fn from(err: BindError) -> Self {
        SiteError::Bind(err)
    }
}

/// Result type for call-site dispatch
pub type SiteResult<T> = Result<T, SiteError>;

// =============================================================================
// CompileError
// =============================================================================

/// Errors raised by a compilation backend
///
/// These never escape to callers: the background compiler logs them and
/// leaves the rule on the interpreted tier.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    /// Body contains a construct the backend cannot compile
    Unsupported(String),

    /// Backend-specific failure
    Backend(String),

    /// Backend panicked while compiling
    Panicked(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Unsupported(msg) => write!(f, "Not compilable: {}", msg),
            CompileError::Backend(msg) => write!(f, "Compilation error: {}", msg),
            CompileError::Panicked(msg) => write!(f, "Compiler panicked: {}", msg),
        }
    }
}

impl std::error::Error for CompileError {}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;
