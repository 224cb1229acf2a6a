use kiln::asm::assemble;
use kiln::config::RuntimeConfig;
use kiln::platform::MemoryPlatform;
use kiln::vm::{Assembly, Value, Vm};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

#[derive(Serialize)]
struct BenchmarkResult {
    name: String,
    kiln_secs: f64,
    rust_time_secs: f64,
    result: String,
}

#[derive(Serialize)]
struct BenchmarkOutput {
    results: Vec<BenchmarkResult>,
}

// Rust reference implementations

fn rust_sum_loop() -> i64 {
    let mut sum: i64 = 0;
    for i in 1..=1_000_000 {
        sum += i;
    }
    sum
}

fn rust_fibonacci(n: i32) -> i32 {
    if n < 2 {
        n
    } else {
        rust_fibonacci(n - 1) + rust_fibonacci(n - 2)
    }
}

fn rust_countdown(mut n: i32) -> i32 {
    while n != 0 {
        n -= 1;
    }
    n
}

fn rust_fork_fanout() -> i64 {
    let workers: Vec<_> = (0..4)
        .map(|_| std::thread::spawn(|| (1..=200_000i64).sum::<i64>()))
        .collect();
    workers.into_iter().map(|w| w.join().unwrap_or(0)).sum()
}

fn time_rust<T: ToString>(f: impl FnOnce() -> T) -> (f64, String) {
    let start = Instant::now();
    let result = std::hint::black_box(f());
    (start.elapsed().as_secs_f64(), result.to_string())
}

fn load_benchmark(name: &str) -> Arc<Assembly> {
    let path = format!(
        "{}/bench/kasm/{}.kasm",
        env!("CARGO_MANIFEST_DIR").trim_end_matches("/bench"),
        name
    );
    let source = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", path, e));
    let assembly = assemble(&source).unwrap_or_else(|e| panic!("{}: {}", path, e));
    Arc::new(assembly)
}

fn run_kiln_benchmark(name: &str) -> (f64, String) {
    let assembly = load_benchmark(name);
    let vm = Vm::new(RuntimeConfig::default(), Arc::new(MemoryPlatform::new()));

    let start = Instant::now();
    let outcome = vm.run(&assembly);
    let elapsed = start.elapsed().as_secs_f64();

    let result = match (outcome.code, outcome.value) {
        (_, Some(value)) => value.to_string(),
        (code, None) => {
            eprintln!(
                "kiln benchmark {} failed: {}: {}",
                name,
                code,
                outcome.message.unwrap_or_default()
            );
            Value::UNIT.to_string()
        }
    };
    (elapsed, result)
}

fn bench(name: &str, rust: (f64, String)) -> BenchmarkResult {
    let (kiln_secs, result) = run_kiln_benchmark(name);
    let (rust_time_secs, expected) = rust;
    if result != expected {
        eprintln!(
            "kiln benchmark {} returned {}, expected {}",
            name, result, expected
        );
    }
    BenchmarkResult {
        name: name.to_string(),
        kiln_secs,
        rust_time_secs,
        result,
    }
}

fn main() {
    let results = vec![
        bench("sum_loop", time_rust(rust_sum_loop)),
        bench("fibonacci", time_rust(|| rust_fibonacci(25))),
        bench("countdown", time_rust(|| rust_countdown(1_000_000))),
        bench("fork_fanout", time_rust(rust_fork_fanout)),
    ];

    let output = BenchmarkOutput { results };
    println!("{}", serde_json::to_string_pretty(&output).unwrap());
}
