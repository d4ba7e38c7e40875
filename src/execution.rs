//! Runs one program against the shared runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{clean_error_message, SandboxError};
use crate::runtime::{InterpreterFault, RunId, RuntimeHandle, RuntimeManager};

/// One program to run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    code: String,
    timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stdin: Option<String>,
}

impl ExecutionRequest {
    /// Run `code` with a budget of `timeout`.
    pub fn new(code: impl Into<String>, timeout: Duration) -> Self {
        Self {
            code: code.into(),
            timeout_ms: timeout.as_millis() as u64,
            stdin: None,
        }
    }

    /// Feed `input` to the program's standard input.
    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// The program text.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The time budget.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Standard input, if any.
    pub fn stdin(&self) -> Option<&str> {
        self.stdin.as_deref()
    }
}

/// Why an execution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// The interpreter could not be loaded.
    RuntimeInit,
    /// The time budget ran out.
    Timeout,
    /// The submitted code raised an exception.
    UserCode,
    /// The interpreter failed on its own (resource limit, crash).
    Internal,
}

/// Outcome of one execution.
///
/// On success `error` is `None`; on failure `output` is empty and `error`
/// holds a readable message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Whether the program ran to completion.
    pub success: bool,
    /// Captured stdout.
    pub output: String,
    /// Failure message.
    pub error: Option<String>,
    /// Wall-clock time spent, in milliseconds.
    pub execution_time_ms: f64,
    /// Failure classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Python exception type of a user-code failure, e.g. `ValueError`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_type: Option<String>,
}

impl ExecutionResult {
    fn success(output: String, elapsed: Duration) -> Self {
        Self {
            success: true,
            output,
            error: None,
            execution_time_ms: as_millis_f64(elapsed),
            failure: None,
            exception_type: None,
        }
    }

    fn failure(kind: FailureKind, message: String, elapsed: Duration) -> Self {
        let exception_type = match kind {
            FailureKind::UserCode => match SandboxError::from_python_stderr(&message) {
                Some(SandboxError::PythonException { exception_type, .. }) => Some(exception_type),
                _ => None,
            },
            _ => None,
        };

        Self {
            success: false,
            output: String::new(),
            error: Some(message),
            execution_time_ms: as_millis_f64(elapsed),
            failure: Some(kind),
            exception_type,
        }
    }

    /// Check if the execution completed normally.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Check if the execution ran out of time.
    pub fn is_timeout(&self) -> bool {
        self.failure == Some(FailureKind::Timeout)
    }
}

fn as_millis_f64(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

fn timeout_message(timeout: Duration) -> String {
    format!("Execution timed out ({} ms limit)", timeout.as_millis())
}

/// Runs programs one at a time through the [`RuntimeManager`].
#[derive(Debug, Clone)]
pub struct Executor {
    runtime: Arc<RuntimeManager>,
    default_timeout: Duration,
}

impl Executor {
    /// Create an executor using `default_timeout` when none is given.
    pub fn new(runtime: Arc<RuntimeManager>, default_timeout: Duration) -> Self {
        Self {
            runtime,
            default_timeout,
        }
    }

    /// The runtime this executor drives.
    pub fn runtime(&self) -> &Arc<RuntimeManager> {
        &self.runtime
    }

    /// The budget used by [`execute`](Self::execute).
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run `code` with the default budget.
    pub async fn execute(&self, code: &str) -> ExecutionResult {
        self.execute_request(ExecutionRequest::new(code, self.default_timeout))
            .await
    }

    /// Run a request. Every outcome, including a runtime that fails to load,
    /// comes back as an [`ExecutionResult`].
    ///
    /// The deadline covers waiting for the runtime to be free as well as the
    /// run itself. When it passes, the run is asked to stop; whether it
    /// actually stops depends on the interpreter (the wasm backend does).
    pub async fn execute_request(&self, request: ExecutionRequest) -> ExecutionResult {
        let called = Instant::now();

        if request.code().trim().is_empty() {
            return ExecutionResult::success(String::new(), called.elapsed());
        }

        let handle = match self.runtime.ensure_ready().await {
            Ok(handle) => handle,
            Err(e) => {
                return ExecutionResult::failure(
                    FailureKind::RuntimeInit,
                    e.to_string(),
                    called.elapsed(),
                )
            }
        };

        let timeout = request.timeout();
        let run = handle.next_run_id();
        let interrupted = Arc::new(AtomicBool::new(false));

        debug!(code_len = request.code().len(), timeout_ms = timeout.as_millis() as u64, "executing");
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            timeout,
            run_exclusive(Arc::clone(&handle), run, &request, Arc::clone(&interrupted)),
        )
        .await;
        let elapsed = started.elapsed();

        let result = match outcome {
            Err(_) => {
                // Raise the flag first: a run that has not armed its deadline
                // yet sees the flag instead of the interrupt.
                interrupted.store(true, Ordering::SeqCst);
                let was_running = handle.interrupt(run);
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    was_running,
                    "execution timed out"
                );
                ExecutionResult::failure(FailureKind::Timeout, timeout_message(timeout), elapsed)
            }
            Ok(Ok(output)) => ExecutionResult::success(output, elapsed),
            Ok(Err(InterpreterFault::Exception(raw))) => {
                ExecutionResult::failure(FailureKind::UserCode, clean_error_message(&raw), elapsed)
            }
            Ok(Err(InterpreterFault::Interrupted)) => {
                ExecutionResult::failure(FailureKind::Timeout, timeout_message(timeout), elapsed)
            }
            Ok(Err(InterpreterFault::Internal(message))) => {
                warn!(%message, "interpreter failure");
                ExecutionResult::failure(FailureKind::Internal, message, elapsed)
            }
        };

        debug!(
            success = result.success,
            elapsed_ms = result.execution_time_ms,
            "execution finished"
        );
        result
    }
}

/// Wait for the runtime, then run the program on a blocking thread.
///
/// Everything from redirecting the streams to restoring them happens inside
/// the blocking task while it holds the execution lock. If this future is
/// dropped on timeout the task still finishes on its own, and its output is
/// thrown away with it.
async fn run_exclusive(
    handle: Arc<RuntimeHandle>,
    run: RunId,
    request: &ExecutionRequest,
    interrupted: Arc<AtomicBool>,
) -> Result<String, InterpreterFault> {
    let lock = handle.lock_exclusive().await;

    let code = request.code().to_owned();
    let stdin = request.stdin().map(str::to_owned);
    let task = tokio::task::spawn_blocking(move || {
        handle.run_captured(lock, run, &code, stdin.as_deref(), &interrupted)
    });

    task.await
        .map_err(|e| InterpreterFault::Internal(format!("interpreter task failed: {e}")))?
}
