//! Benchmark harness.
//!
//! Runs `warmup` discarded calls followed by `iterations` measured calls, timing
//! each measured call individually. Counts not supplied by the caller are
//! derived from the function's cost hint so that cheap and expensive functions
//! take roughly comparable wall-clock time.

pub mod baseline;

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::BenchDefaults;
use crate::dispatch::{CallBinding, Value};
use crate::error::{BridgeError, BridgeResult};
use crate::parser::{CostHint, SyncPolicy};

pub use baseline::KernelInputs;

/// Caller overrides; `None` falls back to cost-hint defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BenchOptions {
    pub iterations: Option<usize>,
    pub warmup: Option<usize>,
}

impl BenchOptions {
    pub fn new(iterations: usize, warmup: usize) -> Self {
        BenchOptions {
            iterations: Some(iterations),
            warmup: Some(warmup),
        }
    }
}

/// Timing statistics over the measured calls only
#[derive(Debug, Clone, PartialEq)]
pub struct BenchResult {
    pub function: String,
    pub iterations: usize,
    pub warmup: usize,
    pub samples: Vec<Duration>,
    pub min: Duration,
    pub mean: Duration,
    pub max: Duration,
    /// Sum of the measured samples
    pub total: Duration,
}

impl BenchResult {
    fn from_samples(function: &str, warmup: usize, samples: Vec<Duration>) -> Self {
        let total: Duration = samples.iter().sum();
        let min = samples.iter().min().copied().unwrap_or_default();
        let max = samples.iter().max().copied().unwrap_or_default();
        let mean = if samples.is_empty() {
            Duration::ZERO
        } else {
            let nanos = total.as_nanos() / samples.len() as u128;
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        };
        BenchResult {
            function: function.to_string(),
            iterations: samples.len(),
            warmup,
            samples,
            min,
            mean,
            max,
            total,
        }
    }

    pub fn calls_per_sec(&self) -> f64 {
        let secs = self.total.as_secs_f64();
        if secs > 0.0 {
            self.iterations as f64 / secs
        } else {
            f64::INFINITY
        }
    }
}

impl fmt::Display for BenchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} iterations ({} warmup)",
            self.function, self.iterations, self.warmup
        )?;
        writeln!(
            f,
            "  mean {:?}  min {:?}  max {:?}  total {:?}",
            self.mean, self.min, self.max, self.total
        )?;
        write!(f, "  {:.1} calls/sec", self.calls_per_sec())
    }
}

/// Resolve iteration and warmup counts.
///
/// Explicit counts win over cost-hint defaults. Zero iterations, or more than
/// `max_iterations`, is an `Argument` error.
pub fn resolve_counts(
    function: &str,
    cost: CostHint,
    options: &BenchOptions,
    defaults: &BenchDefaults,
) -> BridgeResult<(usize, usize)> {
    let iterations = options.iterations.unwrap_or(match cost {
        CostHint::High => defaults.high_cost_iterations,
        CostHint::Low | CostHint::Unspecified => defaults.low_cost_iterations,
    });
    if iterations == 0 {
        return Err(BridgeError::Argument {
            function: function.to_string(),
            message: "benchmark needs at least one measured iteration".to_string(),
        });
    }
    if iterations > defaults.max_iterations {
        return Err(BridgeError::Argument {
            function: function.to_string(),
            message: format!(
                "refusing to run {} iterations (cap {})",
                iterations, defaults.max_iterations
            ),
        });
    }
    let warmup = options.warmup.unwrap_or_else(|| {
        let scaled = (iterations as f64 * defaults.warmup_fraction).floor() as usize;
        scaled.max(defaults.min_warmup)
    });
    Ok((iterations, warmup))
}

/// Time an arbitrary callable. The first error aborts the run.
pub fn run_with<F>(
    function: &str,
    iterations: usize,
    warmup: usize,
    mut call: F,
) -> BridgeResult<BenchResult>
where
    F: FnMut() -> BridgeResult<()>,
{
    for _ in 0..warmup {
        call()?;
    }
    let mut samples = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let start = Instant::now();
        call()?;
        samples.push(start.elapsed());
    }
    let result = BenchResult::from_samples(function, warmup, samples);
    debug!(
        target: "nativebridge::bench",
        function,
        iterations,
        warmup,
        mean_ns = result.mean.as_nanos() as u64,
        "Benchmark finished"
    );
    Ok(result)
}

/// Benchmark a binding with its own execution policy
pub fn run(
    binding: &CallBinding,
    args: &[Value],
    options: &BenchOptions,
    defaults: &BenchDefaults,
) -> BridgeResult<BenchResult> {
    let (iterations, warmup) =
        resolve_counts(binding.name(), binding.descriptor().cost(), options, defaults)?;
    info!(
        target: "nativebridge::bench",
        function = binding.name(),
        iterations,
        warmup,
        policy = %binding.policy(),
        "Benchmarking"
    );
    run_with(binding.name(), iterations, warmup, || {
        std::hint::black_box(binding.call(args)?);
        Ok(())
    })
}

/// Same function measured inline and through the worker pool
#[derive(Debug, Clone)]
pub struct SyncAsyncComparison {
    pub sync: BenchResult,
    pub async_: BenchResult,
}

impl SyncAsyncComparison {
    /// Mean async latency over mean sync latency (dispatch overhead factor)
    pub fn overhead(&self) -> f64 {
        ratio(self.async_.mean, self.sync.mean)
    }
}

impl fmt::Display for SyncAsyncComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[sync]\n{}", self.sync)?;
        writeln!(f, "[async]\n{}", self.async_)?;
        write!(f, "async/sync mean latency: {:.2}x", self.overhead())
    }
}

pub fn compare_sync_async(
    binding: &CallBinding,
    args: &[Value],
    options: &BenchOptions,
    defaults: &BenchDefaults,
) -> BridgeResult<SyncAsyncComparison> {
    let sync = binding.clone().with_policy(SyncPolicy::Sync);
    let async_ = binding.clone().with_policy(SyncPolicy::Async);
    Ok(SyncAsyncComparison {
        sync: run(&sync, args, options, defaults)?,
        async_: run(&async_, args, options, defaults)?,
    })
}

/// Native kernel against its host re-implementation on the same inputs
#[derive(Debug, Clone)]
pub struct BaselineComparison {
    pub native: BenchResult,
    pub baseline: BenchResult,
}

impl BaselineComparison {
    /// How many times faster the native call is (mean latency ratio)
    pub fn speedup(&self) -> f64 {
        ratio(self.baseline.mean, self.native.mean)
    }
}

impl fmt::Display for BaselineComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[native]\n{}", self.native)?;
        writeln!(f, "[baseline]\n{}", self.baseline)?;
        write!(f, "speedup: {:.2}x", self.speedup())
    }
}

/// Benchmark `binding` and the built-in host baseline on `inputs`.
/// `Ok(None)` when the function has no baseline.
pub fn compare_with_baseline(
    binding: &CallBinding,
    inputs: &KernelInputs,
    options: &BenchOptions,
    defaults: &BenchDefaults,
) -> BridgeResult<Option<BaselineComparison>> {
    if !inputs.has_baseline() {
        return Ok(None);
    }
    let native = run(binding, inputs.args(), options, defaults)?;
    let baseline = run_with(
        &format!("{} (baseline)", binding.name()),
        native.iterations,
        native.warmup,
        || {
            std::hint::black_box(inputs.run_baseline());
            Ok(())
        },
    )?;
    Ok(Some(BaselineComparison { native, baseline }))
}

fn ratio(num: Duration, den: Duration) -> f64 {
    let den = den.as_secs_f64();
    if den > 0.0 {
        num.as_secs_f64() / den
    } else {
        f64::INFINITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_hint_defaults() {
        let d = BenchDefaults::default();
        let none = BenchOptions::default();
        assert_eq!(resolve_counts("f", CostHint::High, &none, &d).unwrap(), (20, 1));
        assert_eq!(resolve_counts("f", CostHint::Low, &none, &d).unwrap(), (2000, 100));
        assert_eq!(
            resolve_counts("f", CostHint::Unspecified, &none, &d).unwrap(),
            (2000, 100)
        );
    }

    #[test]
    fn test_explicit_counts_win() {
        let d = BenchDefaults::default();
        let opts = BenchOptions::new(5, 1);
        assert_eq!(resolve_counts("f", CostHint::High, &opts, &d).unwrap(), (5, 1));
        let only_iter = BenchOptions {
            iterations: Some(40),
            warmup: None,
        };
        assert_eq!(resolve_counts("f", CostHint::Low, &only_iter, &d).unwrap(), (40, 2));
    }

    #[test]
    fn test_iteration_limits() {
        let d = BenchDefaults::default();
        assert!(resolve_counts("f", CostHint::Low, &BenchOptions::new(0, 0), &d).is_err());
        let huge = BenchOptions::new(d.max_iterations + 1, 0);
        let err = resolve_counts("f", CostHint::Low, &huge, &d).unwrap_err();
        assert!(matches!(err, BridgeError::Argument { .. }));
    }

    #[test]
    fn test_run_with_counts_calls_and_samples() {
        let mut calls = 0;
        let result = run_with("counter", 5, 1, || {
            calls += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(calls, 6);
        assert_eq!(result.iterations, 5);
        assert_eq!(result.samples.len(), 5);
        assert_eq!(result.warmup, 1);
        assert!(result.min <= result.mean && result.mean <= result.max);
        assert_eq!(result.total, result.samples.iter().sum::<Duration>());
    }

    #[test]
    fn test_run_with_stops_on_error() {
        let mut calls = 0;
        let err = run_with("f", 10, 0, || {
            calls += 1;
            if calls == 3 {
                Err(BridgeError::Argument {
                    function: "f".to_string(),
                    message: "bad".to_string(),
                })
            } else {
                Ok(())
            }
        })
        .unwrap_err();
        assert_eq!(calls, 3);
        assert!(matches!(err, BridgeError::Argument { .. }));
    }

    #[test]
    fn test_mean_over_samples() {
        let samples = [1, 2, 6].map(Duration::from_millis).to_vec();
        let result = BenchResult::from_samples("f", 0, samples);
        assert_eq!(result.mean, Duration::from_millis(3));
        assert_eq!(result.total, Duration::from_millis(9));
        assert_eq!(result.min, Duration::from_millis(1));
        assert_eq!(result.max, Duration::from_millis(6));

        let empty = BenchResult::from_samples("f", 0, Vec::new());
        assert_eq!(empty.mean, Duration::ZERO);
    }

    #[test]
    fn test_ratio_and_display() {
        let fast = BenchResult::from_samples("fast", 0, vec![Duration::from_micros(1); 4]);
        let slow = BenchResult::from_samples("slow", 0, vec![Duration::from_micros(4); 4]);
        let cmp = BaselineComparison {
            native: fast,
            baseline: slow,
        };
        assert!((cmp.speedup() - 4.0).abs() < 1e-9);
        assert!(cmp.to_string().contains("speedup: 4.00x"));
        assert!((cmp.native.calls_per_sec() - 1_000_000.0).abs() < 1.0);
    }
}
