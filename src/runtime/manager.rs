//! Lazy, single-flight initialization of the shared interpreter.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{watch, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::error::{Result, SandboxError};
use crate::runtime::interpreter::{Interpreter, InterpreterFault, InterpreterLoader, RunContext};
use crate::runtime::io::{CaptureSession, OutputStreams};

/// Identifies one run on a [`RuntimeHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(u64);

/// The one live interpreter together with its output streams.
///
/// Executions borrow the handle for a single run and serialize on its
/// execution lock, because the streams are shared by every run.
pub struct RuntimeHandle {
    interpreter: Arc<dyn Interpreter>,
    streams: OutputStreams,
    exec_lock: Arc<tokio::sync::Mutex<()>>,
    next_run: AtomicU64,
    active_run: Mutex<Option<RunId>>,
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("streams", &self.streams)
            .field("active_run", &*self.active_run.lock())
            .finish_non_exhaustive()
    }
}

impl RuntimeHandle {
    /// Wrap a freshly loaded interpreter.
    pub fn new(interpreter: Arc<dyn Interpreter>) -> Self {
        Self {
            interpreter,
            streams: OutputStreams::new(),
            exec_lock: Arc::new(tokio::sync::Mutex::new(())),
            next_run: AtomicU64::new(1),
            active_run: Mutex::new(None),
        }
    }

    /// The interpreter.
    pub fn interpreter(&self) -> &Arc<dyn Interpreter> {
        &self.interpreter
    }

    /// The interpreter's stdout/stderr.
    pub fn streams(&self) -> &OutputStreams {
        &self.streams
    }

    /// Wait for exclusive use of the interpreter.
    pub async fn lock_exclusive(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.exec_lock).lock_owned().await
    }

    /// Reserve an id for a run that has not started yet.
    pub fn next_run_id(&self) -> RunId {
        RunId(self.next_run.fetch_add(1, Ordering::Relaxed))
    }

    /// Run `code` to completion and return what it printed.
    ///
    /// Takes the execution lock by value and releases it only on return, so
    /// redirecting the streams, running, reading stdout and restoring the
    /// streams all happen before the next run can start. A run whose
    /// `interrupted` flag is already set is not started.
    pub fn run_captured(
        &self,
        _lock: OwnedMutexGuard<()>,
        run: RunId,
        code: &str,
        stdin: Option<&str>,
        interrupted: &AtomicBool,
    ) -> std::result::Result<String, InterpreterFault> {
        let _active = ActiveRun::enter(&self.active_run, run);
        if interrupted.load(Ordering::SeqCst) {
            debug!(?run, "run cancelled before it started");
            return Err(InterpreterFault::Interrupted);
        }

        let session = CaptureSession::open(&self.streams);
        let ctx = RunContext::new(code, stdin, &self.streams, interrupted);
        self.interpreter.run(&ctx)?;
        Ok(session.stdout())
    }

    /// Ask `run` to stop. Does nothing, and returns `false`, once that run
    /// has returned, so a late interrupt never reaches a later run.
    pub fn interrupt(&self, run: RunId) -> bool {
        let active = self.active_run.lock();
        if *active == Some(run) {
            self.interpreter.interrupt();
            true
        } else {
            false
        }
    }
}

/// Marks a run as the one [`RuntimeHandle::interrupt`] may target.
struct ActiveRun<'a> {
    slot: &'a Mutex<Option<RunId>>,
}

impl<'a> ActiveRun<'a> {
    fn enter(slot: &'a Mutex<Option<RunId>>, run: RunId) -> Self {
        *slot.lock() = Some(run);
        Self { slot }
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

/// Snapshot of the manager's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeState {
    /// A handle is available.
    pub ready: bool,
    /// A load is in flight.
    pub loading: bool,
}

type InitOutcome = std::result::Result<Arc<RuntimeHandle>, String>;

enum InitState {
    Idle,
    Loading {
        attempt: u64,
        rx: watch::Receiver<Option<InitOutcome>>,
    },
    Ready(Arc<RuntimeHandle>),
}

enum Join {
    Ready(Arc<RuntimeHandle>),
    Wait {
        attempt: u64,
        rx: watch::Receiver<Option<InitOutcome>>,
    },
}

/// Put a load that never published its outcome back to idle. Returns whether
/// `attempt` was still the current load.
fn forget_attempt(state: &Mutex<InitState>, attempt: u64) -> bool {
    let mut state = state.lock();
    match &*state {
        InitState::Loading { attempt: current, .. } if *current == attempt => {
            *state = InitState::Idle;
            true
        }
        _ => false,
    }
}

/// Lives inside the load task. If the task is dropped before finishing, for
/// example because its runtime shut down, the manager goes back to idle.
struct LoadGuard {
    state: Arc<Mutex<InitState>>,
    attempt: u64,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        if forget_attempt(&self.state, self.attempt) {
            warn!(attempt = self.attempt, "interpreter load dropped before finishing");
        }
    }
}

/// Owns the interpreter and brings it up exactly once.
///
/// Concurrent first callers all wait on the same load. A failed or abandoned
/// load is reported to everyone waiting on it and then forgotten, so the next
/// call starts a new attempt.
pub struct RuntimeManager {
    loader: Arc<dyn InterpreterLoader>,
    state: Arc<Mutex<InitState>>,
    attempts: AtomicU64,
}

impl std::fmt::Debug for RuntimeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeManager")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RuntimeManager {
    /// Create a manager that loads its interpreter with `loader` on first use.
    pub fn new(loader: impl InterpreterLoader) -> Self {
        Self {
            loader: Arc::new(loader),
            state: Arc::new(Mutex::new(InitState::Idle)),
            attempts: AtomicU64::new(0),
        }
    }

    /// Return the handle, loading the interpreter if nobody has yet.
    ///
    /// Must be called from within a tokio runtime. If the load being waited
    /// on is dropped without a result, one fresh attempt is started from
    /// this caller's runtime.
    pub async fn ensure_ready(&self) -> Result<Arc<RuntimeHandle>> {
        let mut retried = false;
        loop {
            let (attempt, mut rx) = match self.join_load() {
                Join::Ready(handle) => return Ok(handle),
                Join::Wait { attempt, rx } => (attempt, rx),
            };

            let waited = rx
                .wait_for(Option::is_some)
                .await
                .map(|outcome| (*outcome).clone());

            match waited {
                Ok(Some(Ok(handle))) => return Ok(handle),
                Ok(Some(Err(message))) => return Err(SandboxError::RuntimeInit(message)),
                Ok(None) => {
                    return Err(SandboxError::RuntimeInit(
                        "initialization finished without a result".into(),
                    ))
                }
                Err(_) => {
                    forget_attempt(&self.state, attempt);
                    if retried {
                        return Err(SandboxError::RuntimeInit(
                            "initialization was abandoned".into(),
                        ));
                    }
                    warn!(attempt, "interpreter load was abandoned, retrying");
                    retried = true;
                }
            }
        }
    }

    /// Observe the lifecycle without side effects.
    pub fn state(&self) -> RuntimeState {
        match &*self.state.lock() {
            InitState::Idle => RuntimeState {
                ready: false,
                loading: false,
            },
            InitState::Loading { .. } => RuntimeState {
                ready: false,
                loading: true,
            },
            InitState::Ready(_) => RuntimeState {
                ready: true,
                loading: false,
            },
        }
    }

    /// Whether a handle is available.
    pub fn is_ready(&self) -> bool {
        self.state().ready
    }

    /// Whether a load is in flight.
    pub fn is_loading(&self) -> bool {
        self.state().loading
    }

    /// Join the load in flight, or register a new one and spawn it.
    fn join_load(&self) -> Join {
        let (attempt, tx, rx) = {
            let mut state = self.state.lock();
            match &*state {
                InitState::Ready(handle) => return Join::Ready(Arc::clone(handle)),
                InitState::Loading { attempt, rx } => {
                    return Join::Wait {
                        attempt: *attempt,
                        rx: rx.clone(),
                    }
                }
                InitState::Idle => {}
            }

            let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
            let (tx, rx) = watch::channel(None);
            *state = InitState::Loading {
                attempt,
                rx: rx.clone(),
            };
            (attempt, tx, rx)
        };

        // Spawned with the state lock released: the task's guard takes it.
        self.spawn_load(attempt, tx);
        Join::Wait { attempt, rx }
    }

    /// Spawn the load. It runs detached, so a caller that stops waiting does
    /// not cancel it for the others.
    fn spawn_load(&self, attempt: u64, tx: watch::Sender<Option<InitOutcome>>) {
        let loader = Arc::clone(&self.loader);
        let guard = LoadGuard {
            state: Arc::clone(&self.state),
            attempt,
        };

        info!(attempt, "loading interpreter runtime");
        tokio::spawn(async move {
            let started = Instant::now();
            let outcome: InitOutcome = match tokio::task::spawn_blocking(move || loader.load()).await
            {
                Ok(Ok(interpreter)) => Ok(Arc::new(RuntimeHandle::new(interpreter))),
                Ok(Err(SandboxError::RuntimeInit(message))) => Err(message),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(format!("interpreter loader panicked: {e}")),
            };

            // Publish the final state before waking waiters.
            *guard.state.lock() = match &outcome {
                Ok(handle) => InitState::Ready(Arc::clone(handle)),
                Err(_) => InitState::Idle,
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &outcome {
                Ok(_) => info!(elapsed_ms, "interpreter runtime ready"),
                Err(error) => warn!(elapsed_ms, %error, "interpreter runtime failed to load"),
            }

            tx.send_replace(Some(outcome));
            drop(guard);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::io::StreamTarget;
    use crate::runtime::scripted::ScriptedInterpreter;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn noop() -> Arc<dyn Interpreter> {
        Arc::new(ScriptedInterpreter::new(|_| Ok(())))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_load() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let manager = Arc::new(RuntimeManager::new(move || -> Result<Arc<dyn Interpreter>> {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            Ok(noop())
        }));

        let callers: Vec<_> = (0..16)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.ensure_ready().await })
            })
            .collect();

        let mut handles = Vec::new();
        for caller in callers {
            handles.push(caller.await.unwrap().unwrap());
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));

        // Later calls reuse the same handle without loading again.
        let again = manager.ensure_ready().await.unwrap();
        assert!(Arc::ptr_eq(&again, &handles[0]));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_state_transitions() {
        let manager = Arc::new(RuntimeManager::new(|| -> Result<Arc<dyn Interpreter>> {
            std::thread::sleep(Duration::from_millis(150));
            Ok(noop())
        }));
        assert_eq!(
            manager.state(),
            RuntimeState {
                ready: false,
                loading: false
            }
        );

        let waiter = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.ensure_ready().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(manager.is_loading());
        assert!(!manager.is_ready());

        assert_ok!(waiter.await.unwrap());
        assert!(manager.is_ready());
        assert!(!manager.is_loading());
    }

    #[tokio::test]
    async fn test_failure_is_shared_then_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let manager = RuntimeManager::new(move || -> Result<Arc<dyn Interpreter>> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SandboxError::InterpreterNotFound("assets/missing.wasm".into()))
            } else {
                Ok(noop())
            }
        });

        let (first, second) = tokio::join!(manager.ensure_ready(), manager.ensure_ready());
        let first = assert_err!(first);
        assert_err!(second);
        assert!(first.is_runtime_init());
        assert!(first.to_string().contains("assets/missing.wasm"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(!manager.is_ready() && !manager.is_loading());

        assert_ok!(manager.ensure_ready().await);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(manager.is_ready());
    }

    #[test]
    fn test_load_dropped_with_its_runtime_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let manager = Arc::new(RuntimeManager::new(move || -> Result<Arc<dyn Interpreter>> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                std::thread::sleep(Duration::from_millis(200));
            }
            Ok(noop())
        }));

        let first = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        first.block_on(async {
            let waiter = Arc::clone(&manager);
            tokio::spawn(async move { waiter.ensure_ready().await });
            while attempts.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            assert!(manager.is_loading());
        });
        first.shutdown_background();
        assert!(!manager.is_loading());

        let second = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        assert_ok!(second.block_on(manager.ensure_ready()));
        assert!(manager.is_ready());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    fn echo() -> Arc<ScriptedInterpreter> {
        Arc::new(ScriptedInterpreter::new(|ctx| {
            ctx.print(ctx.code());
            Ok(())
        }))
    }

    #[tokio::test]
    async fn test_run_captured_restores_streams_before_unlocking() {
        let interpreter = echo();
        let handle = RuntimeHandle::new(Arc::clone(&interpreter) as Arc<dyn Interpreter>);
        let flag = AtomicBool::new(false);

        let run = handle.next_run_id();
        let lock = handle.lock_exclusive().await;
        let output = handle.run_captured(lock, run, "one", None, &flag).unwrap();

        assert_eq!(output, "one\n");
        assert_eq!(handle.streams().target(), StreamTarget::Host);
        // The lock came back with the call.
        drop(handle.lock_exclusive().await);
    }

    #[tokio::test]
    async fn test_interrupt_after_run_returned_is_ignored() {
        let interpreter = echo();
        let handle = RuntimeHandle::new(Arc::clone(&interpreter) as Arc<dyn Interpreter>);
        let flag = AtomicBool::new(false);

        let first = handle.next_run_id();
        let lock = handle.lock_exclusive().await;
        handle.run_captured(lock, first, "one", None, &flag).unwrap();

        assert!(!handle.interrupt(first));
        assert_eq!(interpreter.interrupts(), 0);

        let second = handle.next_run_id();
        assert_ne!(first, second);
        let lock = handle.lock_exclusive().await;
        assert_eq!(
            handle.run_captured(lock, second, "two", None, &flag).unwrap(),
            "two\n"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interrupt_reaches_the_active_run() {
        let interpreter = Arc::new(ScriptedInterpreter::new(|ctx| loop {
            ctx.sleep(Duration::from_millis(2))?;
        }));
        let handle = Arc::new(RuntimeHandle::new(
            Arc::clone(&interpreter) as Arc<dyn Interpreter>
        ));
        let flag = Arc::new(AtomicBool::new(false));

        let run = handle.next_run_id();
        let lock = handle.lock_exclusive().await;
        let task = {
            let handle = Arc::clone(&handle);
            let flag = Arc::clone(&flag);
            tokio::task::spawn_blocking(move || handle.run_captured(lock, run, "loop", None, &flag))
        };

        while !handle.interrupt(run) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        flag.store(true, Ordering::SeqCst);

        assert_eq!(task.await.unwrap(), Err(InterpreterFault::Interrupted));
        assert_eq!(interpreter.interrupts(), 1);
        assert!(!handle.interrupt(run));
    }

    #[tokio::test]
    async fn test_cancelled_run_never_starts() {
        let interpreter = echo();
        let handle = RuntimeHandle::new(Arc::clone(&interpreter) as Arc<dyn Interpreter>);
        let flag = AtomicBool::new(true);

        let run = handle.next_run_id();
        let lock = handle.lock_exclusive().await;
        let outcome = handle.run_captured(lock, run, "one", None, &flag);

        assert_eq!(outcome, Err(InterpreterFault::Interrupted));
        assert_eq!(interpreter.runs(), 0);
    }
}
