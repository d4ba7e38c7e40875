//! One object bundling the runtime, the executor and the verifier.

use std::sync::Arc;
use std::time::Duration;

use crate::config::SandboxConfig;
use crate::error::Result;
use crate::execution::{ExecutionRequest, ExecutionResult, Executor};
use crate::runtime::{InterpreterLoader, RuntimeHandle, RuntimeManager, RuntimeState, WasmLoader};
use crate::verify::{ExpressionTest, FunctionTest, StdinTest, TestSuiteResult, Verifier};

/// The grading engine.
///
/// Construct one per application and share it; all clones drive the same
/// interpreter. Nothing is loaded until the first call that needs it.
#[derive(Debug, Clone)]
pub struct PythonSandbox {
    config: SandboxConfig,
    verifier: Verifier,
}

impl PythonSandbox {
    /// Create an engine backed by the RustPython wasm interpreter.
    pub fn new(config: SandboxConfig) -> Self {
        let loader = WasmLoader::new(config.clone());
        Self::with_loader(config, loader)
    }

    /// Create an engine backed by any interpreter.
    pub fn with_loader(config: SandboxConfig, loader: impl InterpreterLoader) -> Self {
        let runtime = Arc::new(RuntimeManager::new(loader));
        let executor = Executor::new(runtime, config.timeout);
        Self {
            config,
            verifier: Verifier::new(executor),
        }
    }

    /// The configuration in use.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn executor(&self) -> &Executor {
        self.verifier.executor()
    }

    /// Load the interpreter now instead of on first use.
    pub async fn ensure_ready(&self) -> Result<Arc<RuntimeHandle>> {
        self.executor().runtime().ensure_ready().await
    }

    /// Lifecycle snapshot.
    pub fn state(&self) -> RuntimeState {
        self.executor().runtime().state()
    }

    /// Whether the interpreter is loaded.
    pub fn is_ready(&self) -> bool {
        self.state().ready
    }

    /// Whether the interpreter is being loaded.
    pub fn is_loading(&self) -> bool {
        self.state().loading
    }

    /// Run `code` with the configured timeout.
    pub async fn execute(&self, code: &str) -> ExecutionResult {
        self.executor().execute(code).await
    }

    /// Run `code` with an explicit timeout.
    pub async fn execute_with_timeout(&self, code: &str, timeout: Duration) -> ExecutionResult {
        self.execute_request(ExecutionRequest::new(code, timeout))
            .await
    }

    /// Run a prepared request.
    pub async fn execute_request(&self, request: ExecutionRequest) -> ExecutionResult {
        self.executor().execute_request(request).await
    }

    /// See [`Verifier::run_expression_tests`].
    pub async fn run_expression_tests(
        &self,
        code: &str,
        specs: &[ExpressionTest],
    ) -> Result<TestSuiteResult> {
        self.verifier.run_expression_tests(code, specs).await
    }

    /// See [`Verifier::run_function_tests`].
    pub async fn run_function_tests(
        &self,
        code: &str,
        function_name: &str,
        specs: &[FunctionTest],
    ) -> Result<TestSuiteResult> {
        self.verifier
            .run_function_tests(code, function_name, specs)
            .await
    }

    /// See [`Verifier::run_stdin_tests`].
    pub async fn run_stdin_tests(&self, code: &str, specs: &[StdinTest]) -> Result<TestSuiteResult> {
        self.verifier.run_stdin_tests(code, specs).await
    }
}
