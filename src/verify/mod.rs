//! Grades user code against batches of test specs.
//!
//! Specs in a batch run strictly one after another through the
//! [`Executor`], because every run shares the runtime's output capture.
//! A failing spec never stops the batch.

pub mod normalize;
pub mod program;
pub mod value;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SandboxError};
use crate::execution::{ExecutionRequest, ExecutionResult, Executor};

pub use normalize::{normalize_output, outputs_match};
pub use value::Value;

/// Print `input` after the user's code and compare the printed text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionTest {
    /// Python expression to evaluate.
    pub input: String,
    /// Expected printed output.
    pub expected: String,
    /// Human-readable label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ExpressionTest {
    /// Create a spec.
    pub fn new(input: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected: expected.into(),
            description: None,
        }
    }

    /// Attach a label.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Call the function under test with `args` and compare its `repr`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionTest {
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Expected return value.
    pub expected: Value,
    /// Human-readable label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FunctionTest {
    /// Create a spec.
    pub fn new(args: Vec<Value>, expected: impl Into<Value>) -> Self {
        Self {
            args,
            expected: expected.into(),
            description: None,
        }
    }

    /// Attach a label.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Feed `input` on stdin and compare everything the program prints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StdinTest {
    /// Text given to the program on standard input.
    pub input: String,
    /// Expected printed output.
    pub expected: String,
    /// Human-readable label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StdinTest {
    /// Create a spec.
    pub fn new(input: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected: expected.into(),
            description: None,
        }
    }

    /// Attach a label.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Outcome of one spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// What was run: the expression, the call text or the stdin text.
    pub input: String,
    /// Expected text as compared (or displayed).
    pub expected: String,
    /// Actual text; empty when the run failed.
    pub actual: String,
    /// Whether the spec passed.
    pub passed: bool,
    /// The spec's label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Execution failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a batch, in spec order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuiteResult {
    /// Specs that passed.
    pub passed: usize,
    /// Specs that failed.
    pub failed: usize,
    /// Specs run.
    pub total: usize,
    /// `round(100 * passed / total)`.
    pub score: u32,
    /// Per-spec outcomes.
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    /// Tally a non-empty list of results.
    pub fn from_results(results: Vec<TestResult>) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let score = if total == 0 {
            0
        } else {
            (passed as f64 * 100.0 / total as f64).round() as u32
        };

        Self {
            passed,
            failed: total - passed,
            total,
            score,
            results,
        }
    }

    /// Whether every spec passed.
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Runs test batches through an [`Executor`].
#[derive(Debug, Clone)]
pub struct Verifier {
    executor: Executor,
}

impl Verifier {
    /// Create a verifier on top of `executor`. Each spec gets the executor's
    /// default time budget.
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    /// The executor specs run through.
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Run expression specs: print each `input` after `code` and compare the
    /// normalized output with the normalized `expected`.
    pub async fn run_expression_tests(
        &self,
        code: &str,
        specs: &[ExpressionTest],
    ) -> Result<TestSuiteResult> {
        self.prepare(specs.len()).await?;

        let mut results = Vec::with_capacity(specs.len());
        for spec in specs {
            let execution = self
                .executor
                .execute(&program::expression_program(code, &spec.input))
                .await;
            results.push(grade_output(
                &spec.input,
                &spec.expected,
                spec.description.clone(),
                execution,
            ));
        }

        Ok(finish("expression", results))
    }

    /// Run function specs: call `function_name` with each spec's arguments
    /// and compare the printed `repr` of the return value.
    ///
    /// A spec passes when the output equals either the `repr` or the plain
    /// string form of the expected value, so `True` and `true` both match
    /// an expected `true`.
    pub async fn run_function_tests(
        &self,
        code: &str,
        function_name: &str,
        specs: &[FunctionTest],
    ) -> Result<TestSuiteResult> {
        program::validate_function_name(function_name)?;
        self.prepare(specs.len()).await?;

        let mut results = Vec::with_capacity(specs.len());
        for spec in specs {
            let call = program::call_expression(function_name, &spec.args);
            let execution = self
                .executor
                .execute(&program::function_call_program(code, &call))
                .await;

            let expected_plain = spec.expected.to_plain_string();
            let result = if execution.success {
                let actual = execution.output.trim().to_string();
                let passed = actual == spec.expected.to_repr() || actual == expected_plain;
                TestResult {
                    input: call,
                    expected: expected_plain,
                    actual,
                    passed,
                    description: spec.description.clone(),
                    error: None,
                }
            } else {
                TestResult {
                    input: call,
                    expected: expected_plain,
                    actual: String::new(),
                    passed: false,
                    description: spec.description.clone(),
                    error: execution.error,
                }
            };
            debug!(input = %result.input, passed = result.passed, "function spec graded");
            results.push(result);
        }

        Ok(finish("function", results))
    }

    /// Run stdin specs: feed each `input` to `code` on standard input and
    /// compare the normalized output with the normalized `expected`.
    pub async fn run_stdin_tests(&self, code: &str, specs: &[StdinTest]) -> Result<TestSuiteResult> {
        self.prepare(specs.len()).await?;

        let timeout = self.executor.default_timeout();
        let mut results = Vec::with_capacity(specs.len());
        for spec in specs {
            let request = ExecutionRequest::new(code, timeout).with_stdin(spec.input.as_str());
            let execution = self.executor.execute_request(request).await;
            results.push(grade_output(
                &spec.input,
                &spec.expected,
                spec.description.clone(),
                execution,
            ));
        }

        Ok(finish("stdin", results))
    }

    /// Reject empty batches and make sure the runtime is up before any spec runs.
    async fn prepare(&self, spec_count: usize) -> Result<()> {
        if spec_count == 0 {
            return Err(SandboxError::EmptySuite);
        }
        self.executor.runtime().ensure_ready().await?;
        Ok(())
    }
}

fn grade_output(
    input: &str,
    expected: &str,
    description: Option<String>,
    execution: ExecutionResult,
) -> TestResult {
    let expected = normalize_output(expected);
    let result = if execution.success {
        let actual = normalize_output(&execution.output);
        TestResult {
            input: input.to_string(),
            passed: actual == expected,
            expected,
            actual,
            description,
            error: None,
        }
    } else {
        TestResult {
            input: input.to_string(),
            expected,
            actual: String::new(),
            passed: false,
            description,
            error: execution.error,
        }
    };
    debug!(input, passed = result.passed, "output spec graded");
    result
}

fn finish(form: &'static str, results: Vec<TestResult>) -> TestSuiteResult {
    let suite = TestSuiteResult::from_results(results);
    info!(
        form,
        passed = suite.passed,
        total = suite.total,
        score = suite.score,
        "test suite finished"
    );
    suite
}
