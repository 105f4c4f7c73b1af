//! Engine startup and the caller-side handle
//!
//! [`Engine::spawn`] starts the worker on its own OS thread with its own
//! Tokio runtime, so a busy execution can never stall the caller's runtime.
//! Callers hold an [`EngineHandle`]; dropping the last one shuts the worker
//! down.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::limits::ResourceLimits;
use crate::registry::RuntimeRegistry;
use crate::worker::{warmup_failure_prefix, Worker, PACKAGES_FAILURE_PREFIX};
use polyrun_common::{
    EngineMessage, ExecutionRequest, ExecutionResult, Language, PackageInfo, RequestId,
    WarmupPayload, WorkerMessage,
};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};

/// Events kept for slow subscribers before they start lagging
const EVENT_CAPACITY: usize = 1024;

/// Time the worker runtime gets to wind down once the last handle is gone
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type PendingResults = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ExecutionResult>>>>;

pub struct Engine;

impl Engine {
    /// Start an engine with every runtime compiled into this build
    pub fn spawn(config: EngineConfig) -> Result<EngineHandle> {
        config.validate()?;
        let registry = RuntimeRegistry::from_config(&config);
        Self::with_registry(registry, config.limits, config.stream_output)
    }

    /// Start an engine with an explicit set of runtimes
    pub fn with_registry(
        registry: RuntimeRegistry,
        limits: ResourceLimits,
        stream_output: bool,
    ) -> Result<EngineHandle> {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = broadcast::channel(EVENT_CAPACITY);
        let pending: PendingResults = Arc::new(Mutex::new(HashMap::new()));

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("polyrun-engine")
            .enable_all()
            .build()?;

        let router_pending = pending.clone();
        std::thread::Builder::new()
            .name("polyrun-worker".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let router = tokio::spawn(route(outbox_rx, events_tx, router_pending));
                    Worker::new(registry, limits, stream_output, inbox_rx, outbox_tx)
                        .run()
                        .await;
                    // The router ends once the last outbox sender is gone
                    let _ = tokio::time::timeout(SHUTDOWN_GRACE, router).await;
                });
                runtime.shutdown_timeout(SHUTDOWN_GRACE);
            })?;

        Ok(EngineHandle {
            inner: Arc::new(HandleInner {
                inbox: inbox_tx,
                pending,
                events: events_rx,
            }),
        })
    }
}

/// Forward worker output to subscribers and resolve waiting callers
async fn route(
    mut outbox: mpsc::UnboundedReceiver<EngineMessage>,
    events: broadcast::Sender<EngineMessage>,
    pending: PendingResults,
) {
    while let Some(message) = outbox.recv().await {
        // Fails only when nobody subscribed
        let _ = events.send(message.clone());

        if let EngineMessage::ExecutionComplete { request_id, data } = message {
            if let Some(responder) = pending.lock().await.remove(&request_id) {
                let _ = responder.send(data);
            }
        }
    }

    // Wake callers still waiting on a result that will never come
    pending.lock().await.clear();
}

struct HandleInner {
    inbox: mpsc::UnboundedSender<WorkerMessage>,
    pending: PendingResults,
    /// Template receiver; subscribers resubscribe from it
    events: broadcast::Receiver<EngineMessage>,
}

/// Cloneable caller-side handle to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<HandleInner>,
}

impl EngineHandle {
    /// Run `code` with a fresh request id and wait for its result
    pub async fn execute(
        &self,
        code: impl Into<String>,
        language: impl Into<Language>,
    ) -> Result<ExecutionResult> {
        self.submit(ExecutionRequest::new(code, language)).await
    }

    /// Submit a request and wait for its result.
    ///
    /// Always resolves with exactly one result for the request, including
    /// `Busy`, `Timeout` and `Cancelled` outcomes. A request whose id is
    /// still waiting for its result is refused without reaching the worker.
    pub async fn submit(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let request_id = request.request_id.clone();
        let (responder, result) = oneshot::channel();
        match self.inner.pending.lock().await.entry(request_id.clone()) {
            Entry::Occupied(_) => return Err(EngineError::DuplicateRequest(request_id)),
            Entry::Vacant(slot) => {
                slot.insert(responder);
            }
        }

        if let Err(e) = self.post(WorkerMessage::execute(request)) {
            self.inner.pending.lock().await.remove(&request_id);
            return Err(e);
        }
        result.await.map_err(|_| EngineError::WorkerGone)
    }

    /// Cancel the running execution, if any. Its waiter gets a `Cancelled` result.
    pub fn stop(&self) -> Result<()> {
        self.post(WorkerMessage::Stop)
    }

    /// Initialize a runtime ahead of the first execution; returns the init time in ms
    pub async fn warm_up(&self, language: impl Into<Language>) -> Result<u64> {
        let language = language.into();
        let failure_prefix = warmup_failure_prefix(&language);
        let message = WorkerMessage::Warmup {
            data: WarmupPayload {
                language: language.clone(),
            },
        };

        self.request(message, |event| match event {
            EngineMessage::Ready { data } if data.language == language => Some(Ok(data.init_ms)),
            EngineMessage::Error {
                data,
                request_id: None,
            } if data.starts_with(&failure_prefix) => {
                Some(Err(EngineError::init(language_label(&language), data)))
            }
            _ => None,
        })
        .await
    }

    /// Preloaded Python packages and whether each one imports cleanly
    pub async fn packages(&self) -> Result<Vec<PackageInfo>> {
        self.request(WorkerMessage::Packages, |event| match event {
            EngineMessage::Packages { data } => Some(Ok(data)),
            EngineMessage::Error {
                data,
                request_id: None,
            } if data.starts_with(PACKAGES_FAILURE_PREFIX) => {
                Some(Err(EngineError::runtime("python", data)))
            }
            _ => None,
        })
        .await
    }

    /// Drop cached runtime sessions
    pub async fn reset(&self) -> Result<()> {
        self.request(WorkerMessage::Reset, |event| {
            matches!(event, EngineMessage::Reset).then_some(Ok(()))
        })
        .await
    }

    /// Send a raw message to the worker
    pub fn post(&self, message: WorkerMessage) -> Result<()> {
        self.inner
            .inbox
            .send(message)
            .map_err(|_| EngineError::WorkerGone)
    }

    /// Every message the engine emits from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EngineMessage> {
        self.inner.events.resubscribe()
    }

    async fn request<T, F>(&self, message: WorkerMessage, mut pick: F) -> Result<T>
    where
        F: FnMut(EngineMessage) -> Option<Result<T>>,
    {
        let mut events = self.subscribe();
        self.post(message)?;
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(outcome) = pick(event) {
                        return outcome;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Engine event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(EngineError::WorkerGone),
            }
        }
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("closed", &self.inner.inbox.is_closed())
            .finish()
    }
}

fn language_label(language: &Language) -> &'static str {
    match language {
        Language::JavaScript => "javascript",
        Language::TypeScript => "typescript",
        Language::Python => "python",
        Language::Other(_) => "unknown",
    }
}
