//! Dispatch Overhead Benchmarks
//!
//! Measures what the bridge adds on top of the native work:
//! - Sync dispatch of a trivial function (argument checks + thunk call)
//! - Async dispatch of the same function through the worker pool
//! - A buffer kernel against its host baseline on identical inputs
//!
//! Run with:
//!   cargo bench --bench dispatch_overhead
//!
//! Skips everything when no C compiler is available.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nativebridge::bench::KernelInputs;
use nativebridge::{Bridge, BridgeConfig, SyncPolicy, Value};
use std::path::Path;

fn bridge() -> Option<Bridge> {
    let config = BridgeConfig::default()
        .with_cache_dir(std::env::temp_dir().join("nativebridge-bench-cache"))
        .with_worker_threads(2);
    match Bridge::new(config) {
        Ok(bridge) => Some(bridge),
        Err(e) => {
            eprintln!("skipping dispatch benchmarks: {}", e);
            None
        }
    }
}

fn fixture(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures").join(name)
}

fn bench_dispatch(c: &mut Criterion) {
    let Some(bridge) = bridge() else { return };
    let module = bridge
        .load(&fixture("echo.c"))
        .expect("echo.c should build");
    let echo = module.binding("echo_i32").expect("echo_i32 is exported");
    let mix = module.binding("mix_args").expect("mix_args is exported");
    let e = nativebridge::NativeBuffer::from_bytes(&[1]);
    let mix_args = [
        Value::I32(1),
        Value::F64(2.0),
        Value::F32(3.0),
        Value::I64(4),
        e.value(),
    ];

    let mut group = c.benchmark_group("dispatch");
    group.bench_function("sync_echo_i32", |b| {
        b.iter(|| echo.call_sync(black_box(&[Value::I32(7)])).unwrap())
    });
    group.bench_function("sync_mix_args", |b| {
        b.iter(|| mix.call_sync(black_box(&mix_args)).unwrap())
    });
    let async_echo = echo.clone().with_policy(SyncPolicy::Async);
    group.bench_function("async_echo_i32", |b| {
        b.iter(|| async_echo.call(black_box(&[Value::I32(7)])).unwrap())
    });
    group.finish();
}

fn bench_kernels(c: &mut Criterion) {
    let Some(bridge) = bridge() else { return };
    let module = bridge
        .load(&fixture("buffer.c"))
        .expect("buffer.c should build");
    let sum = module.binding("sum_u8").expect("sum_u8 is exported");
    let inputs = KernelInputs::for_function("sum_u8").expect("built-in inputs");

    let mut group = c.benchmark_group("sum_u8");
    group.sample_size(20);
    group.bench_with_input(BenchmarkId::new("native", "1MiB"), &inputs, |b, inputs| {
        b.iter(|| sum.call_sync(inputs.args()).unwrap())
    });
    group.bench_with_input(BenchmarkId::new("baseline", "1MiB"), &inputs, |b, inputs| {
        b.iter(|| black_box(inputs.run_baseline()))
    });
    group.finish();
}

criterion_group!(benches, bench_dispatch, bench_kernels);
criterion_main!(benches);
