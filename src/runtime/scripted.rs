//! An in-process interpreter driven by a Rust closure.
//!
//! Useful for exercising the engine without the wasm interpreter. It is
//! cooperative: a script that never checks [`RunContext::is_interrupted`]
//! keeps running after its deadline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::runtime::interpreter::{Interpreter, InterpreterFault, InterpreterLoader, RunContext};

type Script = dyn Fn(&RunContext<'_>) -> Result<(), InterpreterFault> + Send + Sync;

/// Interpreter whose behavior is a closure over the run context.
pub struct ScriptedInterpreter {
    script: Box<Script>,
    runs: AtomicUsize,
    interrupts: AtomicUsize,
}

impl std::fmt::Debug for ScriptedInterpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedInterpreter")
            .field("runs", &self.runs())
            .field("interrupts", &self.interrupts())
            .finish()
    }
}

impl ScriptedInterpreter {
    /// Wrap `script`.
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&RunContext<'_>) -> Result<(), InterpreterFault> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            runs: AtomicUsize::new(0),
            interrupts: AtomicUsize::new(0),
        }
    }

    /// A loader that hands out this interpreter.
    pub fn loader(interpreter: &Arc<Self>) -> impl InterpreterLoader {
        let interpreter: Arc<dyn Interpreter> = Arc::clone(interpreter) as Arc<dyn Interpreter>;
        move || -> crate::error::Result<Arc<dyn Interpreter>> { Ok(Arc::clone(&interpreter)) }
    }

    /// How many runs have started.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// How many times the engine asked a run to stop.
    pub fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }
}

impl Interpreter for ScriptedInterpreter {
    fn run(&self, ctx: &RunContext<'_>) -> Result<(), InterpreterFault> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        (self.script)(ctx)
    }

    fn interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
    }
}
