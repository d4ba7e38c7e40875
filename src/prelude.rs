//! Prelude module for convenient imports.

pub use crate::config::SandboxConfig;
pub use crate::error::{Result, SandboxError};
pub use crate::execution::{ExecutionRequest, ExecutionResult, FailureKind};
pub use crate::sandbox::PythonSandbox;
pub use crate::verify::{ExpressionTest, FunctionTest, StdinTest, TestResult, TestSuiteResult, Value};
