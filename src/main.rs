/// sitetier - call-site tiering demo
///
/// Drives one shared `add` call site from several threads and reports how
/// its rules moved from the interpreted to the compiled tier.
use sitetier::config::{ExecutorKind, TieringConfig};
use sitetier::error::{BindError, BindResult};
use sitetier::expr::{BinOp, Expr};
use sitetier::site::CallSite;
use sitetier::tiered::{Binder, BinderRef, ExecutionStrategy, ParamRef, SiteSignature, Tiering};
use sitetier::value::{Value, ValueKind};
use std::env;
use std::path::Path;
use std::process;
use std::thread;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage() {
    eprintln!("sitetier v{}", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    sitetier [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -h, --help              Print this help message");
    eprintln!("    -v, --version           Print version information");
    eprintln!("    --threads <N>           Calling threads (default: 4)");
    eprintln!("    --calls <N>             Calls per thread (default: 10000)");
    eprintln!("    --threshold <N>         Guard hits before compilation");
    eprintln!("    --executor <KIND>       rayon, pool or inline");
    eprintln!("    --config <FILE>         Load a TOML configuration file");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    SITETIER_LOG            Log filter (default: info)");
    eprintln!("    SITETIER_THRESHOLD, SITETIER_RULE_CACHE,");
    eprintln!("    SITETIER_EXECUTOR, SITETIER_COMPILE_THREADS");
    eprintln!();
    eprintln!("EXAMPLES:");
    eprintln!("    sitetier --threads 8 --threshold 100");
    eprintln!("    SITETIER_LOG=sitetier=debug sitetier --executor pool");
}

fn print_version() {
    println!("sitetier {}", VERSION);
}

struct Options {
    threads: usize,
    calls: usize,
    threshold: Option<u32>,
    executor: Option<ExecutorKind>,
    config: Option<String>,
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> Result<T, String> {
    let raw = args
        .get(i)
        .ok_or_else(|| format!("Missing value after {}", flag))?;
    raw.parse()
        .map_err(|_| format!("Invalid value for {}: {}", flag, raw))
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();

    let mut options = Options {
        threads: 4,
        calls: 10_000,
        threshold: None,
        executor: None,
        config: None,
    };
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                process::exit(0);
            }
            "--threads" => {
                i += 1;
                options.threads = parse_value(&args, i, "--threads")?;
            }
            "--calls" => {
                i += 1;
                options.calls = parse_value(&args, i, "--calls")?;
            }
            "--threshold" => {
                i += 1;
                options.threshold = Some(parse_value(&args, i, "--threshold")?);
            }
            "--executor" => {
                i += 1;
                let raw: String = parse_value(&args, i, "--executor")?;
                options.executor = Some(raw.parse().map_err(|e| format!("{}", e))?);
            }
            "--config" => {
                i += 1;
                options.config = Some(parse_value(&args, i, "--config")?);
            }
            arg => {
                return Err(format!("Unknown option: {}", arg));
            }
        }
        i += 1;
    }

    Ok(options)
}

/// `+` specialized on the operand kinds seen at bind time
struct AddBinder;

impl Binder for AddBinder {
    fn bind(&self, operands: &[Value], params: &[ParamRef]) -> BindResult<ExecutionStrategy> {
        let (lhs, rhs) = (operands[0].kind(), operands[1].kind());
        let op = match (lhs, rhs) {
            (ValueKind::Int | ValueKind::Float, ValueKind::Int | ValueKind::Float) => BinOp::Add,
            (ValueKind::Str, ValueKind::Str) => BinOp::Concat,
            _ => {
                return Err(BindError::NoMatch(format!("cannot add {} and {}", lhs, rhs)));
            }
        };
        Ok(ExecutionStrategy::new(
            Expr::and(params[0].is(lhs), params[1].is(rhs)),
            Expr::binary(op, params[0].expr(), params[1].expr()),
        ))
    }

    fn name(&self) -> &str {
        "add"
    }
}

fn operands(thread: usize, call: usize) -> [Value; 2] {
    match call % 16 {
        15 => [Value::str("t"), Value::str(&thread.to_string())],
        7 => [Value::Float(call as f64), Value::Int(1)],
        _ => [Value::Int(call as i64), Value::Int(thread as i64)],
    }
}

fn load_config(options: &Options) -> Result<TieringConfig, String> {
    let mut config = match &options.config {
        Some(path) => TieringConfig::load(Path::new(path)).map_err(|e| e.to_string())?,
        None => TieringConfig::default(),
    }
    .with_env();

    if let Some(threshold) = options.threshold {
        config = config.with_threshold(threshold);
    }
    if let Some(executor) = options.executor {
        config = config.with_executor(executor);
    }
    Ok(config)
}

fn run(options: &Options) -> Result<(), String> {
    let config = load_config(options)?;
    let tiering = Tiering::new(config).map_err(|e| e.to_string())?;

    let signature = SiteSignature::new([ValueKind::Any, ValueKind::Any], ValueKind::Any);
    let site = CallSite::new(&tiering, &signature, BinderRef::new(AddBinder));

    let start = Instant::now();
    thread::scope(|scope| -> Result<(), String> {
        let workers: Vec<_> = (0..options.threads.max(1))
            .map(|t| {
                let site = &site;
                scope.spawn(move || -> Result<(), String> {
                    for call in 0..options.calls {
                        site.invoke(&operands(t, call)).map_err(|e| e.to_string())?;
                    }
                    Ok(())
                })
            })
            .collect();
        for worker in workers {
            worker
                .join()
                .map_err(|_| "calling thread panicked".to_string())??;
        }
        Ok(())
    })?;
    let elapsed = start.elapsed();

    let stats = tiering.stats();
    let site_stats = site.stats();
    println!("threads:      {}", options.threads.max(1));
    println!("calls:        {}", options.threads.max(1) * options.calls);
    println!("elapsed:      {:.2?}", elapsed);
    println!("executor:     {}", tiering.executor_name());
    println!("threshold:    {}", tiering.config().default_threshold);
    println!();
    println!("site hits:    {}", site_stats.hits);
    println!("site misses:  {}", site_stats.misses);
    println!("site rebinds: {}", site_stats.rebinds);
    println!("site tiers:   {:?}", site.tiers());
    println!();
    println!("binder calls: {}", stats.binder_calls);
    println!("handoffs:     {}", stats.handoff_hits);
    println!("compiled:     {}", stats.compilations_completed);
    println!("failed:       {}", stats.compilations_failed);
    println!("in flight:    {}", stats.compilations_in_flight());
    Ok(())
}

fn main() {
    let filter = EnvFilter::try_from_env("SITETIER_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let options = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = run(&options) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
