//! The shared interpreter runtime: loading, output capture and backends.

pub mod interpreter;
pub mod io;
pub mod limits;
pub mod manager;
pub mod scripted;
pub mod wasm;

pub use interpreter::{Interpreter, InterpreterFault, InterpreterLoader, RunContext};
pub use io::{CaptureSession, CapturedOutput, OutputStreams, StreamTarget};
pub use manager::{RunId, RuntimeHandle, RuntimeManager, RuntimeState};
pub use scripted::ScriptedInterpreter;
pub use wasm::{WasmInterpreter, WasmLoader};
