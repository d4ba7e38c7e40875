//! # Python Grader
//!
//! Runs short Python snippets in an isolated interpreter, captures what they
//! print and grades them against expected answers.
//!
//! The engine has three layers:
//!
//! - **Runtime**: owns the one interpreter instance, loads it lazily and
//!   exactly once, and captures its stdout/stderr
//!   ([`RuntimeManager`], [`runtime`]).
//! - **Execution**: runs one program at a time under a time budget and turns
//!   every outcome into an [`ExecutionResult`] ([`Executor`]).
//! - **Verification**: runs a batch of test specs in order and scores it
//!   ([`Verifier`], [`TestSuiteResult`]).
//!
//! The default interpreter is RustPython compiled to WebAssembly, run under
//! Wasmtime with no filesystem, network or environment access. Timeouts are
//! enforced with epoch interruption, so even a tight `while True: pass`
//! is stopped.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wasm_python_grader::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = SandboxConfig::builder()
//!         .timeout(Duration::from_secs(2))
//!         .interpreter_path("assets/rustpython.wasm")
//!         .build();
//!     let sandbox = PythonSandbox::new(config);
//!
//!     let result = sandbox.execute("print(1 + 1)").await;
//!     assert_eq!(result.output, "2\n");
//!
//!     let code = "def add(a, b):\n    return a + b\n";
//!     let suite = sandbox
//!         .run_function_tests(code, "add", &[FunctionTest::new(vec![2.into(), 3.into()], 5)])
//!         .await?;
//!     assert_eq!(suite.score, 100);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod prelude;
pub mod runtime;
pub mod sandbox;
pub mod verify;

// Re-export main types at crate root for convenience
pub use config::{SandboxConfig, SandboxConfigBuilder};
pub use error::{Result, SandboxError};
pub use execution::{ExecutionRequest, ExecutionResult, Executor, FailureKind};
pub use runtime::{RuntimeHandle, RuntimeManager, RuntimeState};
pub use sandbox::PythonSandbox;
pub use verify::{
    ExpressionTest, FunctionTest, StdinTest, TestResult, TestSuiteResult, Value, Verifier,
};
