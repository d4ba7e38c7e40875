//! Engine configuration with builder pattern.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SandboxError};

/// Size of one WebAssembly memory page.
const WASM_PAGE_BYTES: u64 = 64 * 1024;

/// Configuration for the grading engine.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Default time budget for a single execution and for each test spec.
    pub timeout: Duration,
    /// Maximum guest memory in bytes.
    pub max_memory: u64,
    /// Maximum fuel (instruction count limit).
    pub max_fuel: Option<u64>,
    /// Path to the RustPython wasm file.
    pub interpreter_path: PathBuf,
    /// Per-run cap on captured bytes for each of stdout and stderr.
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            max_memory: 64 * 1024 * 1024, // 64MB
            max_fuel: None,
            interpreter_path: PathBuf::from("assets/rustpython.wasm"),
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl SandboxConfig {
    /// Create a new builder for SandboxConfig.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Reject values no run could succeed with.
    ///
    /// Checked when the interpreter is loaded, so a bad config surfaces as a
    /// runtime initialization failure rather than as every run failing.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(SandboxError::Config(
                "timeout must be greater than zero".into(),
            ));
        }
        if self.max_memory < WASM_PAGE_BYTES {
            return Err(SandboxError::Config(format!(
                "max_memory must be at least one wasm page ({WASM_PAGE_BYTES} bytes), got {}",
                self.max_memory
            )));
        }
        if self.max_fuel == Some(0) {
            return Err(SandboxError::Config(
                "max_fuel must be greater than zero when set".into(),
            ));
        }
        if self.max_output_bytes == 0 {
            return Err(SandboxError::Config(
                "max_output_bytes must be greater than zero".into(),
            ));
        }
        if self.interpreter_path.as_os_str().is_empty() {
            return Err(SandboxError::Config("interpreter_path is empty".into()));
        }
        Ok(())
    }
}

/// Builder for creating SandboxConfig instances.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfigBuilder {
    timeout: Option<Duration>,
    max_memory: Option<u64>,
    max_fuel: Option<u64>,
    interpreter_path: Option<PathBuf>,
    max_output_bytes: Option<usize>,
}

impl SandboxConfigBuilder {
    /// Set the default execution timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the maximum memory limit in bytes.
    pub fn max_memory(mut self, bytes: u64) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    /// Set the maximum fuel (instruction count).
    pub fn max_fuel(mut self, fuel: u64) -> Self {
        self.max_fuel = Some(fuel);
        self
    }

    /// Set the path to the RustPython wasm interpreter.
    pub fn interpreter_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.interpreter_path = Some(path.into());
        self
    }

    /// Set how many bytes of stdout/stderr a single run may produce.
    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = Some(bytes);
        self
    }

    /// Build the SandboxConfig.
    pub fn build(self) -> SandboxConfig {
        let default = SandboxConfig::default();
        SandboxConfig {
            timeout: self.timeout.unwrap_or(default.timeout),
            max_memory: self.max_memory.unwrap_or(default.max_memory),
            max_fuel: self.max_fuel.or(default.max_fuel),
            interpreter_path: self.interpreter_path.unwrap_or(default.interpreter_path),
            max_output_bytes: self.max_output_bytes.unwrap_or(default.max_output_bytes),
        }
    }
}
