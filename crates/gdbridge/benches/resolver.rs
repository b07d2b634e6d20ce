// Method resolution benchmarks
//
// This benchmark suite measures:
// - Cached bind lookup
// - Class tag lookup
// - Lookup contention across threads

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use gdbridge::runtime::{self, Runtime};
use gdbridge::{Config, MethodSpec, Param, Signature, VariantType};
use gdbridge_headless::fixture;
use gdbridge_log::Level;
use std::sync::Arc;
use std::thread;

static ECHO_STRING: MethodSpec = MethodSpec::new(
    "Fixture",
    "echo_string",
    fixture::ECHO_STRING,
    Signature::new(
        &[Param::Typed(VariantType::String)],
        Some(Param::Typed(VariantType::String)),
    ),
);

static FAIL_WITH: MethodSpec = MethodSpec::new(
    "Fixture",
    "fail_with",
    fixture::FAIL_WITH,
    Signature::new(
        &[Param::Typed(VariantType::Int)],
        Some(Param::Typed(VariantType::Int)),
    ),
);

fn setup() -> Arc<Runtime> {
    if !runtime::is_initialized() {
        let config = Config::default().with_log_level(Level::Error);
        unsafe {
            runtime::init(gdbridge_headless::get_proc_address, gdbridge_headless::library(), config)
        }
        .unwrap();
    }
    runtime::get().unwrap()
}

/// Benchmark a cached resolve of a known method
fn bench_cached_resolve(c: &mut Criterion) {
    let runtime = setup();
    runtime.resolve(&ECHO_STRING).unwrap();

    c.bench_function("cached_resolve", |b| {
        b.iter(|| black_box(runtime.resolve(black_box(&ECHO_STRING)).unwrap()))
    });
}

/// Benchmark class tag lookup through the class cache
fn bench_class_tag(c: &mut Criterion) {
    let runtime = setup();
    runtime.class_tag("Fixture").unwrap();

    c.bench_function("class_tag", |b| {
        b.iter(|| black_box(runtime.class_tag(black_box("Fixture")).unwrap()))
    });
}

/// Benchmark cached resolves from several threads at once
fn bench_contended_resolve(c: &mut Criterion) {
    let runtime = setup();
    runtime.resolve(&ECHO_STRING).unwrap();
    runtime.resolve(&FAIL_WITH).unwrap();

    const PER_THREAD: usize = 1_000;
    let mut group = c.benchmark_group("contended_resolve");
    for threads in [1usize, 2, 4, 8] {
        group.throughput(Throughput::Elements((threads * PER_THREAD) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter(|| {
                thread::scope(|scope| {
                    for t in 0..threads {
                        let runtime = &runtime;
                        scope.spawn(move || {
                            let spec = if t % 2 == 0 { &ECHO_STRING } else { &FAIL_WITH };
                            for _ in 0..PER_THREAD {
                                black_box(runtime.resolve(spec).unwrap());
                            }
                        });
                    }
                });
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_cached_resolve,
    bench_class_tag,
    bench_contended_resolve
);
criterion_main!(benches);
