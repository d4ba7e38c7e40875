//! RustPython compiled to WebAssembly, run under Wasmtime.
//!
//! Loading compiles the interpreter module once. Every run instantiates it in
//! a fresh store whose WASI context has no preopened directories, no
//! environment and no network, with stdout/stderr collected in memory.

use std::sync::Arc;

use tracing::debug;
use wasmtime::{Engine, Linker, Module, Store, Trap};
use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::preview1;
use wasmtime_wasi::{I32Exit, WasiCtxBuilder};

use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError};
use crate::runtime::interpreter::{Interpreter, InterpreterFault, InterpreterLoader, RunContext};
use crate::runtime::limits::{RunState, StoreLimiterExt};

/// Loads [`WasmInterpreter`] from the configured wasm file.
#[derive(Debug, Clone)]
pub struct WasmLoader {
    config: SandboxConfig,
}

impl WasmLoader {
    /// Create a loader for `config.interpreter_path`.
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }
}

impl InterpreterLoader for WasmLoader {
    fn load(&self) -> Result<Arc<dyn Interpreter>> {
        Ok(Arc::new(WasmInterpreter::load(&self.config)?))
    }
}

/// A compiled RustPython module ready to be instantiated per run.
pub struct WasmInterpreter {
    engine: Engine,
    module: Module,
    max_memory: u64,
    max_fuel: Option<u64>,
    max_output_bytes: usize,
}

impl std::fmt::Debug for WasmInterpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmInterpreter")
            .field("max_memory", &self.max_memory)
            .field("max_fuel", &self.max_fuel)
            .field("max_output_bytes", &self.max_output_bytes)
            .finish_non_exhaustive()
    }
}

impl WasmInterpreter {
    /// Create the engine and compile the interpreter module.
    pub fn load(config: &SandboxConfig) -> Result<Self> {
        config.validate()?;

        // Epoch interruption lets the engine stop a run from another thread.
        let mut engine_config = wasmtime::Config::new();
        engine_config.epoch_interruption(true);
        engine_config.consume_fuel(config.max_fuel.is_some());

        let engine = Engine::new(&engine_config).map_err(|e| {
            SandboxError::RuntimeInit(format!("failed to create engine: {e}"))
        })?;

        let wasm_bytes = std::fs::read(&config.interpreter_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SandboxError::InterpreterNotFound(config.interpreter_path.display().to_string())
            } else {
                SandboxError::Io(e)
            }
        })?;

        let module = Module::new(&engine, &wasm_bytes).map_err(|e| {
            SandboxError::ModuleLoad(anyhow::anyhow!("failed to compile module: {}", e))
        })?;

        debug!(
            path = %config.interpreter_path.display(),
            bytes = wasm_bytes.len(),
            "compiled interpreter module"
        );

        Ok(Self {
            engine,
            module,
            max_memory: config.max_memory,
            max_fuel: config.max_fuel,
            max_output_bytes: config.max_output_bytes,
        })
    }

    fn new_store(
        &self,
        ctx: &RunContext<'_>,
        stdout: &MemoryOutputPipe,
        stderr: &MemoryOutputPipe,
    ) -> Store<RunState> {
        let mut builder = WasiCtxBuilder::new();
        builder
            .args(&["python", "-c", ctx.code()])
            .stdout(stdout.clone())
            .stderr(stderr.clone());
        if let Some(input) = ctx.stdin() {
            builder.stdin(MemoryInputPipe::new(input.to_owned()));
        }

        let state = RunState::new(self.max_memory, builder.build_p1());
        let mut store = Store::new(&self.engine, state);
        store.configure_limiter();
        // Trap on the next epoch tick, which only `interrupt` produces.
        store.epoch_deadline_trap();
        store.set_epoch_deadline(1);
        store
    }

    fn classify(
        &self,
        store: &Store<RunState>,
        error: anyhow::Error,
        stderr: &str,
    ) -> std::result::Result<(), InterpreterFault> {
        if let Some(violation) = store.data().limiter.violation() {
            return Err(InterpreterFault::Internal(
                SandboxError::MemoryLimitExceeded(violation.to_string()).to_string(),
            ));
        }

        if let Some(exit) = error.downcast_ref::<I32Exit>() {
            return match exit.0 {
                0 => Ok(()),
                code if stderr.trim().is_empty() => Err(InterpreterFault::Exception(format!(
                    "process exited with status {code}"
                ))),
                _ => Err(InterpreterFault::Exception(stderr.to_string())),
            };
        }

        match error.downcast_ref::<Trap>() {
            Some(Trap::Interrupt) => Err(InterpreterFault::Interrupted),
            Some(Trap::OutOfFuel) => {
                let consumed = self
                    .max_fuel
                    .zip(store.get_fuel().ok())
                    .map(|(max, left)| max.saturating_sub(left));
                Err(InterpreterFault::Internal(
                    SandboxError::OutOfFuel { consumed }.to_string(),
                ))
            }
            _ => Err(InterpreterFault::Internal(
                SandboxError::ExecutionFailed(format!("{error:#}")).to_string(),
            )),
        }
    }
}

impl Interpreter for WasmInterpreter {
    fn run(&self, ctx: &RunContext<'_>) -> std::result::Result<(), InterpreterFault> {
        let stdout = MemoryOutputPipe::new(self.max_output_bytes);
        let stderr = MemoryOutputPipe::new(self.max_output_bytes);
        let mut store = self.new_store(ctx, &stdout, &stderr);

        if let Some(fuel) = self.max_fuel {
            store
                .set_fuel(fuel)
                .map_err(|e| InterpreterFault::Internal(format!("failed to set fuel: {e}")))?;
        }

        // The deadline is armed now, so an interrupt raised from here on traps.
        if ctx.is_interrupted() {
            return Err(InterpreterFault::Interrupted);
        }

        let mut linker = Linker::new(&self.engine);
        preview1::add_to_linker_sync(&mut linker, |state: &mut RunState| &mut state.wasi)
            .map_err(|e| InterpreterFault::Internal(format!("failed to link WASI: {e}")))?;

        let outcome = linker
            .instantiate(&mut store, &self.module)
            .and_then(|instance| instance.get_typed_func::<(), ()>(&mut store, "_start"))
            .and_then(|start| start.call(&mut store, ()));

        let stdout = stdout.contents();
        let stderr = stderr.contents();
        ctx.streams().write_stdout(&stdout);
        ctx.streams().write_stderr(&stderr);
        debug!(
            peak_memory = store.data().limiter.peak_memory(),
            "interpreter run finished"
        );

        match outcome {
            Ok(()) => Ok(()),
            Err(error) => self.classify(&store, error, &String::from_utf8_lossy(&stderr)),
        }
    }

    fn interrupt(&self) {
        self.engine.increment_epoch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::io::{CaptureSession, OutputStreams};
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_missing_interpreter_file() {
        let config = SandboxConfig::builder()
            .interpreter_path("does/not/exist.wasm")
            .build();

        let err = WasmInterpreter::load(&config).unwrap_err();
        assert!(matches!(err, SandboxError::InterpreterNotFound(ref p) if p.contains("exist.wasm")));
    }

    #[test]
    fn test_invalid_config_fails_before_reading_module() {
        let config = SandboxConfig::builder()
            .interpreter_path("does/not/exist.wasm")
            .max_output_bytes(0)
            .build();

        let err = WasmInterpreter::load(&config).unwrap_err();
        assert!(matches!(err, SandboxError::Config(ref m) if m.contains("max_output_bytes")));
    }

    #[test]
    #[ignore = "requires rustpython.wasm"]
    fn test_simple_run() {
        let interpreter = WasmInterpreter::load(&SandboxConfig::default()).unwrap();
        let streams = OutputStreams::new();
        let flag = AtomicBool::new(false);
        let session = CaptureSession::open(&streams);

        interpreter
            .run(&RunContext::new("print(1 + 1)", None, &streams, &flag))
            .unwrap();
        assert_eq!(session.stdout(), "2\n");
    }

    #[test]
    #[ignore = "requires rustpython.wasm"]
    fn test_exception_reports_traceback() {
        let interpreter = WasmInterpreter::load(&SandboxConfig::default()).unwrap();
        let streams = OutputStreams::new();
        let flag = AtomicBool::new(false);
        let _session = CaptureSession::open(&streams);

        let fault = interpreter
            .run(&RunContext::new("1 / 0", None, &streams, &flag))
            .unwrap_err();
        match fault {
            InterpreterFault::Exception(message) => {
                assert!(message.contains("ZeroDivisionError"))
            }
            other => panic!("unexpected fault: {other:?}"),
        }
    }
}
