//! Error types for the grading engine.

use thiserror::Error;

/// Marker the interpreter runtime puts in front of the human-readable part
/// of an error message.
pub const WRAPPER_MARKERS: &[&str] = &["PythonError:"];

/// Errors surfaced by the grading engine.
///
/// Only setup and batch-level problems are reported through this type;
/// individual executions always come back as an
/// [`ExecutionResult`](crate::execution::ExecutionResult).
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The execution exceeded memory limits.
    #[error("memory limit exceeded: {0}")]
    MemoryLimitExceeded(String),

    /// The interpreter runtime could not be brought up.
    #[error("failed to initialize runtime: {0}")]
    RuntimeInit(String),

    /// Failed to compile or instantiate the Python interpreter module.
    #[error("failed to load Python interpreter: {0}")]
    ModuleLoad(#[source] anyhow::Error),

    /// The run failed for a reason other than a Python exception.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// A Python exception was raised during execution.
    #[error("Python {exception_type}: {message}")]
    PythonException {
        /// The type of Python exception (e.g., "ValueError", "TypeError").
        exception_type: String,
        /// The exception message.
        message: String,
        /// The full Python traceback, if available.
        traceback: Option<String>,
    },

    /// I/O error while loading the interpreter.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration has a value the engine cannot run with.
    #[error("configuration error: {0}")]
    Config(String),

    /// The interpreter wasm file was not found.
    #[error("Python interpreter wasm not found at: {0}")]
    InterpreterNotFound(String),

    /// Execution ran out of fuel (instruction limit).
    #[error("execution ran out of fuel after {consumed:?} instructions")]
    OutOfFuel {
        /// Number of instructions consumed before running out.
        consumed: Option<u64>,
    },

    /// A test batch was submitted without any test specs.
    #[error("a test suite needs at least one test spec")]
    EmptySuite,

    /// The function under test is not a valid Python identifier.
    #[error("invalid function name: {0:?}")]
    InvalidFunctionName(String),
}

impl SandboxError {
    /// Create a Python exception error from stderr output.
    pub fn from_python_stderr(stderr: &str) -> Option<Self> {
        parse_python_exception(stderr)
    }

    /// Check if this error represents a runtime initialization failure.
    pub fn is_runtime_init(&self) -> bool {
        matches!(self, SandboxError::RuntimeInit(_))
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Drop everything up to and including a runtime wrapper marker, so only the
/// substantive error text remains.
pub fn clean_error_message(raw: &str) -> String {
    for marker in WRAPPER_MARKERS {
        if let Some((_, rest)) = raw.split_once(marker) {
            let rest = rest.trim();
            if !rest.is_empty() {
                return rest.to_string();
            }
        }
    }
    raw.trim().to_string()
}

/// Parse Python stderr output into a [`SandboxError::PythonException`].
///
/// The exception line is the last unindented line that looks like
/// `SomeError: message` (or a bare exception name). A traceback, when
/// present, runs from the `Traceback` header through that line.
pub fn parse_python_exception(stderr: &str) -> Option<SandboxError> {
    let lines: Vec<&str> = stderr.lines().collect();

    let (line_idx, exception_line) = lines
        .iter()
        .enumerate()
        .rev()
        .find(|(_, line)| !line.starts_with(' ') && looks_like_exception(line))
        .map(|(i, line)| (i, line.trim()))?;

    let (exception_type, message) = match exception_line.split_once(':') {
        Some((ty, msg)) => (ty.trim().to_string(), msg.trim().to_string()),
        None => (exception_line.to_string(), String::new()),
    };

    let traceback = lines[..line_idx]
        .iter()
        .rposition(|line| line.starts_with("Traceback (most recent call last):"))
        .map(|start| lines[start..=line_idx].join("\n"));

    Some(SandboxError::PythonException {
        exception_type,
        message,
        traceback,
    })
}

/// Check if a line looks like a Python exception.
fn looks_like_exception(line: &str) -> bool {
    const SUFFIXES: [&str; 3] = ["Error", "Exception", "Warning"];
    const STANDALONE: [&str; 4] = [
        "KeyboardInterrupt",
        "SystemExit",
        "StopIteration",
        "GeneratorExit",
    ];

    if !line.starts_with(|c: char| c.is_ascii_uppercase()) {
        return false;
    }

    // The exception name is the leading dotted identifier, e.g. `json.JSONDecodeError`.
    let name_end = line
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
        .unwrap_or(line.len());
    let name = &line[..name_end];
    let rest = &line[name_end..];
    if !(rest.is_empty() || rest.starts_with(':')) {
        return false;
    }

    let short = name.rsplit('.').next().unwrap_or(name);
    SUFFIXES.iter().any(|s| short.ends_with(s)) || STANDALONE.contains(&short)
}
