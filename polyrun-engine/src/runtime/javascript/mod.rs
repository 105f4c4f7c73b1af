//! V8 JavaScript runtime using deno_core
//!
//! Every execution gets a brand-new isolate on its own OS thread. The
//! isolate's thread-safe handle comes back to the async side so that
//! dropping the run future (timeout or stop) can terminate it, which also
//! interrupts synchronous infinite loops.

mod scope;

use super::{Job, RunOutcome};
use crate::capture::{CaptureShim, OutputStream};
use crate::error::EngineError;
use crate::limits::ResourceLimits;
use crate::Result;
use async_trait::async_trait;
use deno_core::{op2, v8, Extension, JsRuntime, OpState, PollEventLoopOptions, RuntimeOptions};
use polyrun_common::Language;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

const NAME: &str = "javascript";

/// Write one captured line
#[op2(nofast)]
fn op_capture_write(state: &mut OpState, is_error: bool, #[string] line: String) {
    let stream = if is_error {
        OutputStream::Stderr
    } else {
        OutputStream::Stdout
    };
    state.borrow::<CaptureShim>().write(stream, line);
}

fn capture_extension() -> Extension {
    let ops = vec![op_capture_write()];

    Extension {
        name: "polyrun_capture",
        ops: std::borrow::Cow::Owned(ops),
        ..Default::default()
    }
}

/// V8 JavaScript runtime
#[derive(Debug, Clone, Default)]
pub struct JavaScriptRuntime {
    /// Resource limits for execution
    limits: ResourceLimits,
}

impl JavaScriptRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create V8 runtime with custom resource limits
    pub fn with_limits(limits: ResourceLimits) -> Self {
        Self { limits }
    }
}

#[async_trait]
impl super::Runtime for JavaScriptRuntime {
    async fn run(&self, job: Job) -> Result<RunOutcome> {
        let script = scope::wrap(&job.code, &job.input, &job.args)?;
        let (handle_tx, handle_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let limits = self.limits.clone();
        let shim = job.shim;

        std::thread::Builder::new()
            .name("polyrun-js".to_string())
            .spawn(move || {
                let outcome = run_isolate(script, shim, limits, handle_tx);
                let _ = done_tx.send(outcome);
            })?;

        let isolate = match handle_rx.await {
            Ok(isolate) => isolate,
            // Isolate never came up; the thread reports why
            Err(_) => {
                return done_rx
                    .await
                    .unwrap_or_else(|_| Err(EngineError::runtime(NAME, "isolate thread exited")))
            }
        };

        let guard = TerminateOnDrop(Some(isolate));
        let outcome = done_rx
            .await
            .map_err(|_| EngineError::runtime(NAME, "isolate thread exited"))?;
        guard.disarm();
        outcome
    }

    fn name(&self) -> &str {
        "v8"
    }

    fn language(&self) -> Language {
        Language::JavaScript
    }
}

/// Terminates the isolate unless the run finished on its own
struct TerminateOnDrop(Option<v8::IsolateHandle>);

impl TerminateOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for TerminateOnDrop {
    fn drop(&mut self) {
        if let Some(isolate) = self.0.take() {
            tracing::debug!("Terminating abandoned V8 isolate");
            isolate.terminate_execution();
        }
    }
}

fn run_isolate(
    script: String,
    shim: CaptureShim,
    limits: ResourceLimits,
    handle_tx: oneshot::Sender<v8::IsolateHandle>,
) -> Result<RunOutcome> {
    let event_loop = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| EngineError::init(NAME, e))?;

    let mut options = RuntimeOptions {
        extensions: vec![capture_extension()],
        ..Default::default()
    };

    // Set heap limits if specified
    if let Some(max_bytes) = limits.max_memory_bytes {
        // Set initial to 10MB or 10% of max, whichever is smaller
        let initial_bytes = (max_bytes / 10).min(10 * 1024 * 1024);
        options.create_params =
            Some(v8::CreateParams::default().heap_limits(initial_bytes, max_bytes));
    }

    let mut runtime = JsRuntime::new(options);
    runtime.op_state().borrow_mut().put(shim);

    let isolate = runtime.v8_isolate().thread_safe_handle();
    let heap_exhausted = Arc::new(AtomicBool::new(false));
    {
        let isolate = isolate.clone();
        let heap_exhausted = heap_exhausted.clone();
        runtime.add_near_heap_limit_callback(move |current, _initial| {
            heap_exhausted.store(true, Ordering::SeqCst);
            isolate.terminate_execution();
            // Headroom so V8 can unwind instead of aborting the process
            current * 2
        });
    }

    if handle_tx.send(isolate).is_err() {
        return Err(EngineError::runtime(NAME, "execution abandoned before start"));
    }

    let outcome = event_loop.block_on(evaluate(&mut runtime, script));
    if heap_exhausted.load(Ordering::SeqCst) {
        return Ok(RunOutcome::RuntimeError(
            "JavaScript heap limit exceeded".to_string(),
        ));
    }
    Ok(outcome)
}

async fn evaluate(runtime: &mut JsRuntime, script: String) -> RunOutcome {
    let promise = match runtime.execute_script(scope::SCRIPT_NAME, script) {
        Ok(promise) => promise,
        Err(e) => return RunOutcome::RuntimeError(scope::describe_error(&e.to_string())),
    };

    let resolve = runtime.resolve(promise);
    let settled = match runtime
        .with_event_loop_promise(resolve, PollEventLoopOptions::default())
        .await
    {
        Ok(settled) => settled,
        Err(e) => return RunOutcome::RuntimeError(scope::describe_error(&e.to_string())),
    };

    // The wrapper settles to null on success and to the message on failure
    let scope = &mut runtime.handle_scope();
    let value = v8::Local::new(scope, settled);
    if value.is_string() {
        RunOutcome::RuntimeError(value.to_rust_string_lossy(scope))
    } else {
        RunOutcome::Completed
    }
}
