//! Tiering configuration
//!
//! Configuration comes from three places, later ones overriding earlier:
//!
//! 1. [`TieringConfig::default`]
//! 2. a TOML file ([`TieringConfig::load`] / [`TieringConfig::from_toml_str`])
//! 3. `SITETIER_*` environment variables ([`TieringConfig::with_env`])
//!
//! ```toml
//! default_threshold = 64
//! rule_cache_capacity = 4
//! max_rebinds = 3
//! executor = "pool"
//! compile_threads = 2
//! log_compile_failures = true
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use tracing::warn;

use crate::tiered::DEFAULT_COMPILATION_THRESHOLD;

/// Rules kept per call site unless configured otherwise
pub const DEFAULT_RULE_CACHE_CAPACITY: usize = 4;

/// Consecutive rebinds a call site attempts before giving up on an invocation
pub const DEFAULT_MAX_REBINDS: usize = 3;

/// Which executor runs background compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    /// Global rayon pool
    #[default]
    Rayon,
    /// Dedicated compile threads
    Pool,
    /// Compile synchronously on the thread that crossed the threshold
    Inline,
}

impl ExecutorKind {
    pub fn name(self) -> &'static str {
        match self {
            ExecutorKind::Rayon => "rayon",
            ExecutorKind::Pool => "pool",
            ExecutorKind::Inline => "inline",
        }
    }
}

impl FromStr for ExecutorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rayon" => Ok(ExecutorKind::Rayon),
            "pool" => Ok(ExecutorKind::Pool),
            "inline" => Ok(ExecutorKind::Inline),
            other => Err(ConfigError::Invalid(format!(
                "unknown executor '{}' (expected rayon, pool or inline)",
                other
            ))),
        }
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors raised while loading configuration
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The configuration file could not be read
    Io(String),
    /// The configuration text is not valid TOML for this schema
    Parse(String),
    /// A value is out of range
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Failed to read configuration: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Invalid configuration syntax: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Runtime configuration for [`Tiering`](crate::tiered::Tiering) and call sites
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TieringConfig {
    /// Guard hits before compilation is requested, used when a bind passes a
    /// negative threshold
    pub default_threshold: u32,

    /// Rules cached per call site
    pub rule_cache_capacity: usize,

    /// Rebind rounds per invocation before the site reports it is unbound
    pub max_rebinds: usize,

    pub executor: ExecutorKind,

    /// Worker count for [`ExecutorKind::Pool`]; `None` means one per CPU
    pub compile_threads: Option<usize>,

    /// Emit a warning when a background compilation fails
    pub log_compile_failures: bool,
}

impl Default for TieringConfig {
    fn default() -> Self {
        Self {
            default_threshold: DEFAULT_COMPILATION_THRESHOLD,
            rule_cache_capacity: DEFAULT_RULE_CACHE_CAPACITY,
            max_rebinds: DEFAULT_MAX_REBINDS,
            executor: ExecutorKind::default(),
            compile_threads: None,
            log_compile_failures: true,
        }
    }
}

impl TieringConfig {
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.default_threshold = threshold;
        self
    }

    pub fn with_rule_cache_capacity(mut self, capacity: usize) -> Self {
        self.rule_cache_capacity = capacity;
        self
    }

    pub fn with_max_rebinds(mut self, rounds: usize) -> Self {
        self.max_rebinds = rounds;
        self
    }

    pub fn with_executor(mut self, executor: ExecutorKind) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_compile_threads(mut self, threads: usize) -> Self {
        self.compile_threads = Some(threads);
        self
    }

    pub fn with_compile_failure_logging(mut self, enabled: bool) -> Self {
        self.log_compile_failures = enabled;
        self
    }

    /// Defaults overridden by `SITETIER_*` environment variables
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Apply `SITETIER_*` environment overrides
    ///
    /// Unparsable values are ignored with a warning.
    pub fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = parse_var(&lookup, "SITETIER_THRESHOLD") {
            self.default_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "SITETIER_RULE_CACHE") {
            self.rule_cache_capacity = v;
        }
        if let Some(v) = parse_var(&lookup, "SITETIER_EXECUTOR") {
            self.executor = v;
        }
        if let Some(v) = parse_var(&lookup, "SITETIER_COMPILE_THREADS") {
            self.compile_threads = Some(v);
        }
        self
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Reject values no call site can work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rule_cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "rule_cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_rebinds == 0 {
            return Err(ConfigError::Invalid(
                "max_rebinds must be at least 1".to_string(),
            ));
        }
        if self.default_threshold > i32::MAX as u32 {
            return Err(ConfigError::Invalid(format!(
                "default_threshold must not exceed {}",
                i32::MAX
            )));
        }
        if self.compile_threads == Some(0) {
            return Err(ConfigError::Invalid(
                "compile_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Worker count for the dedicated compile pool
    pub fn resolved_compile_threads(&self) -> usize {
        self.compile_threads.unwrap_or_else(num_cpus::get).max(1)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(target: "sitetier::config", key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}
