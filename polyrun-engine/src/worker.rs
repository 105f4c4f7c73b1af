//! Worker side of the isolation boundary
//!
//! The worker owns the dispatcher and talks to the outside world only
//! through messages: [`WorkerMessage`]s in, [`EngineMessage`]s out.

use crate::dispatcher::{Completion, Dispatcher};
use crate::limits::ResourceLimits;
use crate::registry::RuntimeRegistry;
use polyrun_common::{EngineMessage, Language, ReadyPayload, WorkerMessage};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Prefix of the error event sent when a warmup fails
pub(crate) fn warmup_failure_prefix(language: &Language) -> String {
    format!("Failed to warm up {}", language)
}

pub(crate) const PACKAGES_FAILURE_PREFIX: &str = "Failed to list packages";

pub struct Worker {
    dispatcher: Dispatcher,
    completions: mpsc::UnboundedReceiver<Completion>,
    inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    outbox: mpsc::UnboundedSender<EngineMessage>,
}

impl Worker {
    pub fn new(
        registry: RuntimeRegistry,
        limits: ResourceLimits,
        stream_output: bool,
        inbox: mpsc::UnboundedReceiver<WorkerMessage>,
        outbox: mpsc::UnboundedSender<EngineMessage>,
    ) -> Self {
        let events = stream_output.then(|| outbox.clone());
        let (dispatcher, completions) = Dispatcher::new(registry, limits, events);
        Self {
            dispatcher,
            completions,
            inbox,
            outbox,
        }
    }

    /// Process messages until every sender of the inbox is gone
    pub async fn run(mut self) {
        info!(languages = ?self.dispatcher.registry().languages(), "Engine worker started");

        loop {
            tokio::select! {
                message = self.inbox.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
                Some(completion) = self.completions.recv() => {
                    if let Some(result) = self.dispatcher.complete(completion) {
                        self.emit(EngineMessage::complete(result));
                    }
                }
            }
        }

        if let Some(result) = self.dispatcher.stop() {
            self.emit(EngineMessage::complete(result));
        }
        info!("Engine worker stopped");
    }

    fn handle(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Execute { data } => {
                if let Some(result) = self.dispatcher.submit(data.into_request()) {
                    self.emit(EngineMessage::complete(result));
                }
            }
            WorkerMessage::Stop => match self.dispatcher.stop() {
                Some(result) => self.emit(EngineMessage::complete(result)),
                None => debug!("Stop requested with nothing running"),
            },
            WorkerMessage::Warmup { data } => self.warm_up(data.language),
            WorkerMessage::Packages => self.packages(),
            WorkerMessage::Reset => self.reset(),
        }
    }

    fn warm_up(&self, language: Language) {
        let Some(runtime) = self.dispatcher.registry().get(&language) else {
            self.emit(EngineMessage::failure(format!(
                "{}: Unsupported language",
                warmup_failure_prefix(&language)
            )));
            return;
        };

        let outbox = self.outbox.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let message = match runtime.warm_up().await {
                Ok(()) => {
                    let init_ms = started.elapsed().as_millis() as u64;
                    info!(language = %language, init_ms, "Runtime ready");
                    EngineMessage::Ready {
                        data: ReadyPayload { language, init_ms },
                    }
                }
                Err(e) => {
                    warn!(language = %language, error = %e, "Warmup failed");
                    EngineMessage::failure(format!("{}: {}", warmup_failure_prefix(&language), e))
                }
            };
            let _ = outbox.send(message);
        });
    }

    fn packages(&self) {
        let Some(runtime) = self.dispatcher.registry().get(&Language::Python) else {
            self.emit(EngineMessage::Packages { data: Vec::new() });
            return;
        };

        let outbox = self.outbox.clone();
        tokio::spawn(async move {
            let message = match runtime.packages().await {
                Ok(data) => EngineMessage::Packages { data },
                Err(e) => EngineMessage::failure(format!("{}: {}", PACKAGES_FAILURE_PREFIX, e)),
            };
            let _ = outbox.send(message);
        });
    }

    fn reset(&self) {
        let registry = self.dispatcher.registry().clone();
        let outbox = self.outbox.clone();
        tokio::spawn(async move {
            for runtime in registry.runtimes() {
                runtime.reset().await;
            }
            info!("Runtime sessions reset");
            let _ = outbox.send(EngineMessage::Reset);
        });
    }

    fn emit(&self, message: EngineMessage) {
        if self.outbox.send(message).is_err() {
            debug!("Dropping engine message: no receiver");
        }
    }
}
