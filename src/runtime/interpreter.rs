//! The seam between the engine and a concrete Python interpreter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::error::Result;
use crate::runtime::io::OutputStreams;

/// Why a single run did not complete normally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterpreterFault {
    /// The submitted code raised an exception. Holds the raw message,
    /// possibly still carrying a runtime wrapper prefix.
    #[error("{0}")]
    Exception(String),

    /// The run was stopped because its deadline passed.
    #[error("execution interrupted")]
    Interrupted,

    /// The interpreter itself failed (resource limit, trap, panic).
    #[error("{0}")]
    Internal(String),
}

/// Everything one run gets to see.
pub struct RunContext<'a> {
    code: &'a str,
    stdin: Option<&'a str>,
    streams: &'a OutputStreams,
    interrupted: &'a AtomicBool,
}

impl<'a> RunContext<'a> {
    /// Bundle the inputs of a run.
    pub fn new(
        code: &'a str,
        stdin: Option<&'a str>,
        streams: &'a OutputStreams,
        interrupted: &'a AtomicBool,
    ) -> Self {
        Self {
            code,
            stdin,
            streams,
            interrupted,
        }
    }

    /// The program text.
    pub fn code(&self) -> &'a str {
        self.code
    }

    /// The whole standard input of the program, if any.
    pub fn stdin(&self) -> Option<&'a str> {
        self.stdin
    }

    /// The runtime's output streams.
    pub fn streams(&self) -> &'a OutputStreams {
        self.streams
    }

    /// Whether the engine has given up on this run.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Write `text` plus a newline to stdout, like Python's `print`.
    pub fn print(&self, text: impl AsRef<str>) {
        let mut line = text.as_ref().to_owned();
        line.push('\n');
        self.streams.write_stdout(line.as_bytes());
    }

    /// Write raw text to stderr.
    pub fn eprint(&self, text: impl AsRef<str>) {
        self.streams.write_stderr(text.as_ref().as_bytes());
    }

    /// Sleep for `duration`, waking early with [`InterpreterFault::Interrupted`]
    /// if the run is interrupted meanwhile.
    pub fn sleep(&self, duration: Duration) -> std::result::Result<(), InterpreterFault> {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_interrupted() {
                return Err(InterpreterFault::Interrupted);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(5)));
        }
    }
}

/// A loaded Python interpreter.
///
/// Runs are blocking and are always serialized by the engine, so an
/// implementation never sees two overlapping calls to [`run`](Self::run).
pub trait Interpreter: Send + Sync + 'static {
    /// Run the program in `ctx` to completion, writing its output to
    /// `ctx.streams()`.
    fn run(&self, ctx: &RunContext<'_>) -> std::result::Result<(), InterpreterFault>;

    /// Wake an in-flight run whose interrupt flag was just raised.
    ///
    /// Called from another thread after [`RunContext::is_interrupted`] starts
    /// returning `true`. Interpreters that only poll the flag need nothing here.
    fn interrupt(&self) {}
}

/// Performs the expensive, one-time interpreter load.
pub trait InterpreterLoader: Send + Sync + 'static {
    /// Load the interpreter. Called on a blocking thread.
    fn load(&self) -> Result<Arc<dyn Interpreter>>;
}

impl<F> InterpreterLoader for F
where
    F: Fn() -> Result<Arc<dyn Interpreter>> + Send + Sync + 'static,
{
    fn load(&self) -> Result<Arc<dyn Interpreter>> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::io::CaptureSession;

    #[test]
    fn test_print_appends_newline() {
        let streams = OutputStreams::new();
        let flag = AtomicBool::new(false);
        let session = CaptureSession::open(&streams);
        let ctx = RunContext::new("", None, &streams, &flag);
        ctx.print("hi");
        ctx.eprint("oops");
        assert_eq!(session.stdout(), "hi\n");
        assert_eq!(session.stderr(), "oops");
    }

    #[test]
    fn test_sleep_observes_interrupt() {
        let streams = OutputStreams::new();
        let flag = AtomicBool::new(true);
        let ctx = RunContext::new("", None, &streams, &flag);
        assert_eq!(
            ctx.sleep(Duration::from_secs(10)),
            Err(InterpreterFault::Interrupted)
        );

        flag.store(false, Ordering::SeqCst);
        assert_eq!(ctx.sleep(Duration::from_millis(1)), Ok(()));
    }
}
