//! Benchmarks for the grading engine.
//!
//! Run with: cargo bench
//!
//! The wasm benchmarks need rustpython.wasm at assets/rustpython.wasm and are
//! skipped without it.

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;
use wasm_python_grader::prelude::*;
use wasm_python_grader::runtime::ScriptedInterpreter;
use wasm_python_grader::verify::normalize_output;

/// Get the path to the interpreter, checking if it exists.
fn get_interpreter_path() -> Option<std::path::PathBuf> {
    let path = std::path::PathBuf::from("assets/rustpython.wasm");
    path.exists().then_some(path)
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize_output");
    for lines in [1usize, 100, 10_000] {
        let text = "  value with trailing spaces   \r\n".repeat(lines);
        group.bench_with_input(BenchmarkId::from_parameter(lines), &text, |b, text| {
            b.iter(|| normalize_output(black_box(text)))
        });
    }
    group.finish();
}

fn bench_repr(c: &mut Criterion) {
    let value = Value::List(vec![
        Value::from(1),
        Value::from(2.5),
        Value::from("it's"),
        Value::None,
        Value::from(vec![true, false]),
    ]);
    c.bench_function("value_to_repr", |b| b.iter(|| black_box(&value).to_repr()));
}

/// Engine overhead without an interpreter behind it.
fn bench_scripted_execution(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let interpreter = Arc::new(ScriptedInterpreter::new(|ctx| {
        ctx.print("42");
        Ok(())
    }));
    let sandbox = PythonSandbox::with_loader(
        SandboxConfig::default(),
        ScriptedInterpreter::loader(&interpreter),
    );
    rt.block_on(sandbox.ensure_ready()).unwrap();

    c.bench_function("scripted_execute", |b| {
        b.iter(|| rt.block_on(sandbox.execute(black_box("print(42)"))))
    });

    let specs: Vec<ExpressionTest> = (0..10).map(|_| ExpressionTest::new("42", "42")).collect();
    c.bench_function("scripted_suite_10", |b| {
        b.iter(|| rt.block_on(sandbox.run_expression_tests("", black_box(&specs))))
    });
}

/// Warm execution against the real interpreter.
fn bench_wasm_execution(c: &mut Criterion) {
    let Some(interpreter_path) = get_interpreter_path() else {
        eprintln!("Skipping wasm benchmarks: rustpython.wasm not found");
        return;
    };

    let rt = Runtime::new().unwrap();
    let config = SandboxConfig::builder()
        .interpreter_path(interpreter_path)
        .timeout(Duration::from_secs(30))
        .build();
    let sandbox = PythonSandbox::new(config);
    rt.block_on(sandbox.ensure_ready()).unwrap();

    let mut group = c.benchmark_group("wasm");
    group.sample_size(10);
    group.bench_function("print", |b| {
        b.iter(|| rt.block_on(sandbox.execute(black_box("print(1 + 1)"))))
    });
    group.bench_function("function_suite", |b| {
        let code = "def add(a, b):\n    return a + b\n";
        let specs = [FunctionTest::new(vec![2.into(), 3.into()], 5)];
        b.iter(|| rt.block_on(sandbox.run_function_tests(code, "add", &specs)))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_normalize,
    bench_repr,
    bench_scripted_execution,
    bench_wasm_execution
);
criterion_main!(benches);
