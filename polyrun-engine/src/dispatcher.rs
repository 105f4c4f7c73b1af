//! Single-flight execution dispatcher
//!
//! At most one execution is in flight. A request that arrives while another
//! one runs is rejected with a `Busy` result; nothing is queued. The running
//! execution lives in a spawned task racing the runtime against the
//! configured timeout, and reports back through a completion channel. The
//! owner of the dispatcher feeds those completions into
//! [`Dispatcher::complete`], which is the only place a result for a running
//! execution is produced besides [`Dispatcher::stop`].
//!
//! Request ids come from callers and may repeat, so every accepted execution
//! also gets a generation number. A completion counts only when its
//! generation matches the running execution.

use crate::capture::CaptureShim;
use crate::limits::ResourceLimits;
use crate::registry::RuntimeRegistry;
use crate::runtime::{Job, RunOutcome};
use crate::Result;
use polyrun_common::{
    EngineMessage, ErrorKind, ExecutionRequest, ExecutionResult, Language, RequestId,
};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Message from an execution task back to the dispatcher
#[derive(Debug)]
pub struct Completion {
    pub request_id: RequestId,
    generation: u64,
    outcome: CompletionOutcome,
}

#[derive(Debug)]
enum CompletionOutcome {
    Finished(Result<RunOutcome>),
    TimedOut,
}

#[derive(Debug)]
struct RunningExecution {
    request_id: RequestId,
    generation: u64,
    language: Language,
    started: Instant,
    shim: CaptureShim,
    task: JoinHandle<()>,
}

#[derive(Debug, Default)]
enum ExecutionState {
    #[default]
    Idle,
    Running(RunningExecution),
    /// Transient while a stop tears the running execution down
    Cancelling,
}

pub struct Dispatcher {
    registry: RuntimeRegistry,
    limits: ResourceLimits,
    /// Streams output events when set
    events: Option<mpsc::UnboundedSender<EngineMessage>>,
    completions: mpsc::UnboundedSender<Completion>,
    state: ExecutionState,
    /// Generation handed to the next accepted execution
    next_generation: u64,
}

impl Dispatcher {
    /// Create a dispatcher and the channel its execution tasks report on
    pub fn new(
        registry: RuntimeRegistry,
        limits: ResourceLimits,
        events: Option<mpsc::UnboundedSender<EngineMessage>>,
    ) -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let (completions, completions_rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            registry,
            limits,
            events,
            completions,
            state: ExecutionState::Idle,
            next_generation: 0,
        };
        (dispatcher, completions_rx)
    }

    pub fn registry(&self) -> &RuntimeRegistry {
        &self.registry
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, ExecutionState::Idle)
    }

    /// Start an execution.
    ///
    /// Returns a result right away when the request is rejected; otherwise
    /// the result arrives later through [`Dispatcher::complete`].
    pub fn submit(&mut self, request: ExecutionRequest) -> Option<ExecutionResult> {
        if !self.is_idle() {
            tracing::info!(request_id = %request.request_id, "Rejecting request: engine busy");
            return Some(ExecutionResult::rejected(request.request_id, ErrorKind::Busy));
        }

        let Some(runtime) = self.registry.get(&request.language) else {
            tracing::info!(
                request_id = %request.request_id,
                language = %request.language,
                "Rejecting request: unsupported language"
            );
            return Some(ExecutionResult::rejected(
                request.request_id,
                ErrorKind::UnsupportedLanguage,
            ));
        };

        let mut shim = CaptureShim::new(request.request_id.clone(), self.limits.max_output_lines);
        if let Some(events) = &self.events {
            shim = shim.streaming(events.clone());
        }

        tracing::info!(
            request_id = %request.request_id,
            language = %request.language,
            runtime = runtime.name(),
            code_len = request.code.len(),
            "Executing code"
        );

        let generation = self.next_generation;
        self.next_generation += 1;
        let job = Job::new(&request, shim.clone());
        let timeout = self.limits.timeout;
        let completions = self.completions.clone();
        let request_id = request.request_id.clone();
        let task = tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, runtime.run(job)).await {
                Ok(finished) => CompletionOutcome::Finished(finished),
                Err(_) => CompletionOutcome::TimedOut,
            };
            let _ = completions.send(Completion {
                request_id,
                generation,
                outcome,
            });
        });

        self.state = ExecutionState::Running(RunningExecution {
            request_id: request.request_id,
            generation,
            language: request.language,
            started: Instant::now(),
            shim,
            task,
        });
        None
    }

    /// Turn a task's completion into the request's result.
    ///
    /// Completions for anything but the running execution are late results
    /// of an abandoned one and are dropped, even when the request id repeats.
    pub fn complete(&mut self, completion: Completion) -> Option<ExecutionResult> {
        let running = match std::mem::take(&mut self.state) {
            ExecutionState::Running(running) if running.generation == completion.generation => {
                running
            }
            other => {
                tracing::debug!(
                    request_id = %completion.request_id,
                    generation = completion.generation,
                    "Discarding late result"
                );
                self.state = other;
                return None;
            }
        };

        let failure = match completion.outcome {
            CompletionOutcome::Finished(Ok(RunOutcome::Completed)) => None,
            CompletionOutcome::Finished(Ok(RunOutcome::CompileError(message))) => {
                Some((ErrorKind::CompileError, message))
            }
            CompletionOutcome::Finished(Ok(RunOutcome::RuntimeError(message))) => {
                Some((ErrorKind::RuntimeError, message))
            }
            CompletionOutcome::Finished(Err(e)) => {
                tracing::warn!(request_id = %running.request_id, error = %e, "Runtime failed");
                Some((ErrorKind::RuntimeError, e.to_string()))
            }
            CompletionOutcome::TimedOut => {
                tracing::warn!(
                    request_id = %running.request_id,
                    timeout_ms = self.limits.timeout.as_millis() as u64,
                    "Execution timed out"
                );
                Some((ErrorKind::Timeout, ErrorKind::Timeout.default_message().to_string()))
            }
        };
        Some(finish(running, failure))
    }

    /// Cancel the running execution. A no-op when idle.
    pub fn stop(&mut self) -> Option<ExecutionResult> {
        let running = match std::mem::replace(&mut self.state, ExecutionState::Cancelling) {
            ExecutionState::Running(running) => running,
            other => {
                self.state = other;
                return None;
            }
        };

        tracing::info!(request_id = %running.request_id, "Cancelling execution");
        running.task.abort();
        let result = finish(
            running,
            Some((
                ErrorKind::Cancelled,
                ErrorKind::Cancelled.default_message().to_string(),
            )),
        );
        self.state = ExecutionState::Idle;
        Some(result)
    }
}

/// Seal the capture and build the result
fn finish(running: RunningExecution, failure: Option<(ErrorKind, String)>) -> ExecutionResult {
    let captured = running.shim.seal();
    let elapsed_ms = running.started.elapsed().as_millis() as u64;
    let (error_kind, error) = match failure {
        Some((kind, message)) => (Some(kind), Some(message)),
        None => (None, None),
    };

    tracing::info!(
        request_id = %running.request_id,
        language = %running.language,
        elapsed_ms,
        error_kind = ?error_kind,
        lines = captured.stdout.len(),
        "Execution finished"
    );

    ExecutionResult {
        request_id: running.request_id,
        output: captured.stdout,
        stderr: captured.stderr,
        error,
        error_kind,
        execution_time_ms: elapsed_ms,
        truncated: captured.truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::runtime::Runtime;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    /// Writes its lines, waits, then reports a fixed outcome
    struct ScriptedRuntime {
        lines: Vec<&'static str>,
        delay: Duration,
        outcome: std::result::Result<RunOutcome, &'static str>,
    }

    impl ScriptedRuntime {
        fn completing(lines: Vec<&'static str>) -> Self {
            Self {
                lines,
                delay: Duration::ZERO,
                outcome: Ok(RunOutcome::Completed),
            }
        }

        fn hanging(lines: Vec<&'static str>) -> Self {
            Self {
                lines,
                delay: Duration::from_secs(3600),
                outcome: Ok(RunOutcome::Completed),
            }
        }
    }

    #[async_trait]
    impl Runtime for ScriptedRuntime {
        async fn run(&self, job: Job) -> Result<RunOutcome> {
            for line in &self.lines {
                job.shim.stdout(*line);
            }
            tokio::time::sleep(self.delay).await;
            self.outcome
                .clone()
                .map_err(|reason| EngineError::runtime("scripted", reason))
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn language(&self) -> Language {
            Language::JavaScript
        }
    }

    fn dispatcher(
        runtime: ScriptedRuntime,
        limits: ResourceLimits,
    ) -> (Dispatcher, mpsc::UnboundedReceiver<Completion>) {
        let mut registry = RuntimeRegistry::new();
        registry.register(Arc::new(runtime));
        Dispatcher::new(registry, limits, None)
    }

    async fn next_result(
        dispatcher: &mut Dispatcher,
        completions: &mut mpsc::UnboundedReceiver<Completion>,
    ) -> ExecutionResult {
        loop {
            let completion = completions.recv().await.unwrap();
            if let Some(result) = dispatcher.complete(completion) {
                return result;
            }
        }
    }

    #[tokio::test]
    async fn test_completed_execution() {
        let (mut dispatcher, mut completions) = dispatcher(
            ScriptedRuntime::completing(vec!["Hello", "World"]),
            ResourceLimits::default(),
        );

        let request = ExecutionRequest::new("ignored", "javascript").with_id("r1");
        assert!(dispatcher.submit(request).is_none());
        assert!(!dispatcher.is_idle());

        let result = next_result(&mut dispatcher, &mut completions).await;
        assert_eq!(result.request_id.as_str(), "r1");
        assert_eq!(result.output, vec!["Hello", "World"]);
        assert!(result.success());
        assert!(dispatcher.is_idle());
    }

    #[tokio::test]
    async fn test_busy_rejects_without_touching_running() {
        let (mut dispatcher, _completions) = dispatcher(
            ScriptedRuntime::hanging(vec!["first"]),
            ResourceLimits::default(),
        );

        assert!(dispatcher
            .submit(ExecutionRequest::new("a", "javascript").with_id("a"))
            .is_none());
        let busy = dispatcher
            .submit(ExecutionRequest::new("b", "javascript").with_id("b"))
            .unwrap();

        assert_eq!(busy.request_id.as_str(), "b");
        assert_eq!(busy.error_kind, Some(ErrorKind::Busy));
        assert_eq!(busy.error.as_deref(), Some("Engine busy"));
        assert!(busy.output.is_empty());
        assert!(!dispatcher.is_idle());
    }

    #[tokio::test]
    async fn test_unsupported_language_is_immediate() {
        let (mut dispatcher, _completions) =
            dispatcher(ScriptedRuntime::completing(vec![]), ResourceLimits::default());

        let result = dispatcher
            .submit(ExecutionRequest::new("puts 1", "ruby").with_id("x"))
            .unwrap();
        assert_eq!(result.error.as_deref(), Some("Unsupported language"));
        assert_eq!(result.error_kind, Some(ErrorKind::UnsupportedLanguage));
        assert_eq!(result.execution_time_ms, 0);
        assert!(dispatcher.is_idle());
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let limits = ResourceLimits::default().with_timeout(Duration::from_millis(50));
        let (mut dispatcher, mut completions) =
            dispatcher(ScriptedRuntime::hanging(vec!["partial"]), limits);

        dispatcher.submit(ExecutionRequest::new("loop", "javascript"));
        let result = next_result(&mut dispatcher, &mut completions).await;

        assert_eq!(result.error.as_deref(), Some("Execution timeout"));
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(result.output, vec!["partial"]);
        assert!(result.execution_time_ms >= 50);
        assert!(dispatcher.is_idle());
    }

    #[tokio::test]
    async fn test_stop_cancels_and_discards_late_result() {
        let (mut dispatcher, _completions) = dispatcher(
            ScriptedRuntime::hanging(vec!["started"]),
            ResourceLimits::default(),
        );

        dispatcher.submit(ExecutionRequest::new("loop", "javascript").with_id("s1"));
        tokio::task::yield_now().await;

        let cancelled = dispatcher.stop().unwrap();
        assert_eq!(cancelled.request_id.as_str(), "s1");
        assert_eq!(cancelled.error_kind, Some(ErrorKind::Cancelled));
        assert_eq!(cancelled.error.as_deref(), Some("Execution cancelled"));
        assert!(dispatcher.is_idle());

        let late = Completion {
            request_id: RequestId::from("s1"),
            generation: 0,
            outcome: CompletionOutcome::Finished(Ok(RunOutcome::Completed)),
        };
        assert!(dispatcher.complete(late).is_none());
        assert!(dispatcher.is_idle());
    }

    #[tokio::test]
    async fn test_late_result_never_reaches_a_reused_request_id() {
        let (mut dispatcher, mut completions) = dispatcher(
            ScriptedRuntime::completing(vec!["ran"]),
            ResourceLimits::default(),
        );

        dispatcher.submit(ExecutionRequest::new("first", "javascript").with_id("x"));
        // Let the first run finish so its completion is already queued
        let queued = completions.recv().await.unwrap();

        let cancelled = dispatcher.stop().unwrap();
        assert_eq!(cancelled.error_kind, Some(ErrorKind::Cancelled));

        assert!(dispatcher
            .submit(ExecutionRequest::new("second", "javascript").with_id("x"))
            .is_none());
        assert!(dispatcher.complete(queued).is_none());
        assert!(!dispatcher.is_idle());

        let result = next_result(&mut dispatcher, &mut completions).await;
        assert_eq!(result.request_id.as_str(), "x");
        assert_eq!(result.output, vec!["ran"]);
        assert!(result.success());
        assert!(dispatcher.is_idle());
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let (mut dispatcher, _completions) =
            dispatcher(ScriptedRuntime::completing(vec![]), ResourceLimits::default());
        assert!(dispatcher.stop().is_none());
        assert!(dispatcher.is_idle());
    }

    #[tokio::test]
    async fn test_runtime_failure_becomes_runtime_error() {
        let runtime = ScriptedRuntime {
            lines: vec![],
            delay: Duration::ZERO,
            outcome: Err("interpreter missing"),
        };
        let (mut dispatcher, mut completions) = dispatcher(runtime, ResourceLimits::default());

        dispatcher.submit(ExecutionRequest::new("x", "javascript"));
        let result = next_result(&mut dispatcher, &mut completions).await;
        assert_eq!(result.error_kind, Some(ErrorKind::RuntimeError));
        assert_matches!(result.error, Some(ref e) if e.contains("interpreter missing"));
    }

    #[tokio::test]
    async fn test_output_streams_while_running() {
        let (events, mut events_rx) = mpsc::unbounded_channel();
        let mut registry = RuntimeRegistry::new();
        registry.register(Arc::new(ScriptedRuntime::completing(vec!["live"])));
        let (mut dispatcher, mut completions) =
            Dispatcher::new(registry, ResourceLimits::default(), Some(events));

        dispatcher.submit(ExecutionRequest::new("x", "javascript").with_id("st"));
        next_result(&mut dispatcher, &mut completions).await;

        assert_matches!(
            events_rx.try_recv(),
            Ok(EngineMessage::Output { data, request_id: Some(id) }) if data == "live" && id.as_str() == "st"
        );
    }
}
