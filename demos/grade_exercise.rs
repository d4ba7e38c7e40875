//! Grade a small exercise end to end.
//!
//! Run with: cargo run --example grade_exercise
//!
//! Note: Requires rustpython.wasm to be present in assets/

use std::time::Duration;

use tracing_subscriber::EnvFilter;
use wasm_python_grader::prelude::*;

const SOLUTION: &str = r#"
def fizzbuzz(n):
    if n % 15 == 0:
        return "FizzBuzz"
    if n % 3 == 0:
        return "Fizz"
    if n % 5 == 0:
        return "Buzz"
    return n
"#;

fn print_suite(title: &str, suite: &TestSuiteResult) {
    println!("{title}: {}/{} passed (score {})", suite.passed, suite.total, suite.score);
    for result in &suite.results {
        let mark = if result.passed { "PASS" } else { "FAIL" };
        println!("  [{mark}] {} => {}", result.input, result.actual);
        if !result.passed {
            println!("         expected: {}", result.expected);
        }
        if let Some(error) = &result.error {
            println!("         error: {error}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = SandboxConfig::builder()
        .timeout(Duration::from_secs(5))
        .interpreter_path("assets/rustpython.wasm")
        .build();
    let sandbox = PythonSandbox::new(config);

    sandbox.ensure_ready().await?;
    println!("Interpreter ready\n");

    let result = sandbox.execute("for i in range(3):\n    print('line', i)").await;
    println!("Output ({:.1} ms):\n{}", result.execution_time_ms, result.output);

    let suite = sandbox
        .run_function_tests(
            SOLUTION,
            "fizzbuzz",
            &[
                FunctionTest::new(vec![3.into()], "Fizz"),
                FunctionTest::new(vec![10.into()], "Buzz"),
                FunctionTest::new(vec![30.into()], "FizzBuzz"),
                FunctionTest::new(vec![7.into()], 7),
            ],
        )
        .await?;
    print_suite("fizzbuzz", &suite);

    let suite = sandbox
        .run_expression_tests(
            SOLUTION,
            &[
                ExpressionTest::new("[fizzbuzz(i) for i in range(1, 6)]", "[1, 2, 'Fizz', 4, 'Buzz']"),
                ExpressionTest::new("fizzbuzz('x')", "").with_description("rejects strings"),
            ],
        )
        .await?;
    print_suite("expressions", &suite);

    let timeout = sandbox
        .execute_with_timeout("while True: pass", Duration::from_millis(200))
        .await;
    println!("\nInfinite loop: {}", timeout.error.unwrap_or_default());

    Ok(())
}
