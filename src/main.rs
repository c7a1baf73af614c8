/// nativebridge - compile, call, benchmark and test C functions from the command line
use nativebridge::bench::{self, BenchOptions, KernelInputs};
use nativebridge::compiler::{ArtifactCache, Toolchain};
use nativebridge::config::{BridgeConfig, Isolation};
use nativebridge::dispatch::Value;
use nativebridge::harness::TestRunner;
use nativebridge::Bridge;
use std::env;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage() {
    eprintln!("nativebridge v{}", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    nativebridge [OPTIONS] <COMMAND>");
    eprintln!();
    eprintln!("COMMANDS:");
    eprintln!("    bench <FILE> <FUNCTION> [ARG...]   Benchmark one function");
    eprintln!("    test <DIR|FILE>                    Run native test_* functions");
    eprintln!("    doctor                             Check the C toolchain");
    eprintln!("    cache status                       Show artifact cache usage");
    eprintln!("    cache clean                        Remove cached artifacts");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -h, --help           Print this help message");
    eprintln!("    -V, --version        Print version information");
    eprintln!("    --verbose            Debug logging (overrides RUST_LOG)");
    eprintln!("    --iterations <N>     bench: measured iterations");
    eprintln!("    --warmup <N>         bench: discarded warmup iterations");
    eprintln!("    --traditional        bench: compare against the built-in Rust baseline");
    eprintln!("    --async              bench: compare sync and worker-pool dispatch");
    eprintln!("    --in-process         test: call tests directly instead of forking");
    eprintln!();
    eprintln!("EXAMPLES:");
    eprintln!("    nativebridge bench fixtures/loop.c loop_sum");
    eprintln!("    nativebridge bench fixtures/echo.c twice 21 --iterations 100");
    eprintln!("    nativebridge bench fixtures/buffer.c sum_u8 --traditional");
    eprintln!("    nativebridge test fixtures/harness");
}

fn print_version() {
    println!("nativebridge {}", VERSION);
}

enum Command {
    Bench {
        source: PathBuf,
        function: String,
        args: Vec<String>,
    },
    Test {
        path: PathBuf,
    },
    Doctor,
    CacheStatus,
    CacheClean,
}

struct Options {
    command: Command,
    verbose: bool,
    iterations: Option<usize>,
    warmup: Option<usize>,
    traditional: bool,
    compare_async: bool,
    in_process: bool,
}

fn parse_count(args: &[String], i: usize, flag: &str) -> Result<usize, String> {
    let value = args
        .get(i)
        .ok_or_else(|| format!("Missing value after {}", flag))?;
    value
        .parse()
        .map_err(|_| format!("Invalid value for {}: {}", flag, value))
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();

    let mut positional = Vec::new();
    let mut verbose = false;
    let mut iterations = None;
    let mut warmup = None;
    let mut traditional = false;
    let mut compare_async = false;
    let mut in_process = false;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "-V" | "--version" => {
                print_version();
                process::exit(0);
            }
            "--verbose" => verbose = true,
            "--iterations" => {
                i += 1;
                iterations = Some(parse_count(&args, i, "--iterations")?);
            }
            "--warmup" => {
                i += 1;
                warmup = Some(parse_count(&args, i, "--warmup")?);
            }
            "--traditional" => traditional = true,
            "--async" => compare_async = true,
            "--in-process" => in_process = true,
            // Single-dash words are left alone so negative numbers work as ARGs
            arg if arg.starts_with("--") => {
                return Err(format!("Unknown option: {}", arg));
            }
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("bench") => {
            let source = positional.next().ok_or("bench needs a source file")?;
            let function = positional.next().ok_or("bench needs a function name")?;
            Command::Bench {
                source: PathBuf::from(source),
                function,
                args: positional.by_ref().collect(),
            }
        }
        Some("test") => {
            let path = positional.next().ok_or("test needs a directory or file")?;
            Command::Test {
                path: PathBuf::from(path),
            }
        }
        Some("doctor") => Command::Doctor,
        Some("cache") => match positional.next().as_deref() {
            Some("status") => Command::CacheStatus,
            Some("clean") => Command::CacheClean,
            Some(other) => return Err(format!("Unknown cache command: {}", other)),
            None => return Err("cache needs 'status' or 'clean'".to_string()),
        },
        Some(other) => return Err(format!("Unknown command: {}", other)),
        None => return Err("No command given".to_string()),
    };
    if let Some(extra) = positional.next() {
        return Err(format!("Unexpected argument: {}", extra));
    }

    Ok(Options {
        command,
        verbose,
        iterations,
        warmup,
        traditional,
        compare_async,
        in_process,
    })
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_from_env("NATIVEBRIDGE_LOG"))
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_bench(
    config: BridgeConfig,
    source: &Path,
    function: &str,
    args: &[String],
    options: &Options,
) -> Result<i32, String> {
    let bridge = Bridge::new(config).map_err(|e| e.to_string())?;
    let module = bridge.load(source).map_err(|e| e.to_string())?;
    let binding = module.binding(function).map_err(|e| e.to_string())?;
    let defaults = bridge.config().bench.clone();
    let bench_options = BenchOptions {
        iterations: options.iterations,
        warmup: options.warmup,
    };

    // Explicit arguments, or built-in inputs for known kernels
    let inputs = if args.is_empty() && binding.arity() > 0 {
        Some(KernelInputs::for_function(function).ok_or_else(|| {
            format!(
                "{} takes {} argument(s) and has no built-in inputs; pass them after the function name",
                function,
                binding.arity()
            )
        })?)
    } else {
        None
    };
    let values: Vec<Value> = match &inputs {
        Some(inputs) => inputs.args().to_vec(),
        None => {
            let params = binding.descriptor().params();
            if args.len() != params.len() {
                return Err(format!(
                    "{} expects {} argument(s), got {}",
                    function,
                    params.len(),
                    args.len()
                ));
            }
            args.iter()
                .zip(params)
                .map(|(text, ty)| Value::parse_as(text, ty))
                .collect::<Result<_, _>>()?
        }
    };

    if options.traditional && inputs.is_none() && !args.is_empty() {
        return Err("--traditional runs on built-in inputs; drop the explicit arguments".to_string());
    }

    let has_baseline = inputs.as_ref().is_some_and(KernelInputs::has_baseline);
    if options.traditional && !has_baseline {
        eprintln!("No built-in baseline for {}", function);
    }
    let plan = BenchPlan::new(options.compare_async, options.traditional, has_baseline);

    println!("{}", binding.descriptor());
    if plan.sync_async {
        let cmp = bench::compare_sync_async(binding, &values, &bench_options, &defaults)
            .map_err(|e| e.to_string())?;
        println!("{}", cmp);
    }
    if let (true, Some(inputs)) = (plan.baseline, &inputs) {
        if let Some(cmp) = bench::compare_with_baseline(binding, inputs, &bench_options, &defaults)
            .map_err(|e| e.to_string())?
        {
            println!("{}", cmp);
        }
    }
    if plan.plain {
        let result =
            bench::run(binding, &values, &bench_options, &defaults).map_err(|e| e.to_string())?;
        println!("{}", result);
    }
    Ok(0)
}

/// Which measurements `bench` prints. The native run is measured once: the
/// baseline and sync/async comparisons already include it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BenchPlan {
    sync_async: bool,
    baseline: bool,
    plain: bool,
}

impl BenchPlan {
    fn new(compare_async: bool, traditional: bool, has_baseline: bool) -> Self {
        let baseline = traditional && has_baseline;
        BenchPlan {
            sync_async: compare_async,
            baseline,
            plain: !compare_async && !baseline,
        }
    }
}

fn run_tests(config: BridgeConfig, path: &Path, in_process: bool) -> Result<i32, String> {
    let isolation = if in_process || cfg!(not(unix)) {
        Isolation::InProcess
    } else {
        Isolation::Fork
    };
    let bridge = Bridge::new(config).map_err(|e| e.to_string())?;
    let report = TestRunner::new(&bridge)
        .with_isolation(isolation)
        .run_path(path)
        .map_err(|e| e.to_string())?;
    println!("{}", report);
    Ok(report.exit_code())
}

fn run_doctor(config: BridgeConfig) -> Result<i32, String> {
    let toolchain = Toolchain::detect(config.compiler.as_deref()).map_err(|e| e.to_string())?;
    println!("compiler:  {} ({})", toolchain.path().display(), toolchain.vendor());
    println!("version:   {}", toolchain.version());
    println!("platform:  {}", nativebridge::compiler::platform());
    println!("cflags:    {}", config.cflags.join(" "));
    println!("cache:     {}", config.cache_dir.display());
    println!("workers:   {}", config.worker_threads);

    let scratch = config.cache_dir.join("doctor");
    match toolchain.sanity_check(&scratch) {
        Ok(()) => {
            println!("toolchain: ok");
            Ok(0)
        }
        Err(e) => {
            println!("toolchain: FAILED\n{}", e);
            Ok(1)
        }
    }
}

fn run(options: Options) -> Result<i32, String> {
    let config = BridgeConfig::load().map_err(|e| e.to_string())?;

    match &options.command {
        Command::Bench {
            source,
            function,
            args,
        } => run_bench(config, source, function, args, &options),
        Command::Test { path } => run_tests(config, path, options.in_process),
        Command::Doctor => run_doctor(config),
        Command::CacheStatus => {
            let status = ArtifactCache::new(&config.cache_dir)
                .status()
                .map_err(|e| e.to_string())?;
            println!("{}", config.cache_dir.display());
            println!("{} entries, {} bytes", status.entries, status.total_bytes);
            Ok(0)
        }
        Command::CacheClean => {
            let removed = ArtifactCache::new(&config.cache_dir)
                .clean()
                .map_err(|e| e.to_string())?;
            println!("Removed {} cache entries", removed);
            Ok(0)
        }
    }
}

fn main() {
    let options = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            process::exit(2);
        }
    };

    init_logging(options.verbose);

    match run(options) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
