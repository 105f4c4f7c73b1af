//! Python runtime: WASI CPython under wasmtime

mod imports;
mod records;
mod session;

pub use imports::referenced_modules;
pub use session::PythonSession;

use super::{Job, RunOutcome};
use crate::config::PythonConfig;
use crate::limits::ResourceLimits;
use crate::Result;
use async_trait::async_trait;
use polyrun_common::{Language, PackageInfo};
use records::DriverJob;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

const NAME: &str = "python";

/// Python runtime backed by a lazily started [`PythonSession`]
pub struct PythonRuntime {
    config: PythonConfig,
    limits: ResourceLimits,
    session: Mutex<Option<Arc<PythonSession>>>,
}

impl PythonRuntime {
    pub fn new(config: PythonConfig, limits: ResourceLimits) -> Self {
        Self {
            config,
            limits,
            session: Mutex::new(None),
        }
    }

    /// Current session, starting one if needed
    pub async fn session(&self) -> Result<Arc<PythonSession>> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }

        let started = Instant::now();
        let session = Arc::new(PythonSession::start(&self.config, self.limits.max_memory_bytes).await?);
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            packages = session.available_packages().len(),
            "Python session ready"
        );
        *slot = Some(session.clone());
        Ok(session)
    }
}

#[async_trait]
impl super::Runtime for PythonRuntime {
    async fn run(&self, job: Job) -> Result<RunOutcome> {
        let session = self.session().await?;
        let driver_job = DriverJob::Run {
            code: &job.code,
            input: &job.input,
            args: &job.args,
            imports: referenced_modules(&job.code),
        };

        let report = session.invoke(&driver_job, Some(job.shim.clone())).await?;
        Ok(if !report.done {
            RunOutcome::RuntimeError(report.failure_message())
        } else if let Some(error) = report.error {
            RunOutcome::RuntimeError(error)
        } else {
            RunOutcome::Completed
        })
    }

    fn name(&self) -> &str {
        "cpython-wasi"
    }

    fn language(&self) -> Language {
        Language::Python
    }

    async fn warm_up(&self) -> Result<()> {
        self.session().await.map(|_| ())
    }

    async fn reset(&self) {
        if self.session.lock().await.take().is_some() {
            tracing::info!("Python session discarded");
        }
    }

    async fn packages(&self) -> Result<Vec<PackageInfo>> {
        Ok(self.session().await?.packages())
    }
}

impl std::fmt::Debug for PythonRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PythonRuntime")
            .field("config", &self.config)
            .field("limits", &self.limits)
            .finish()
    }
}
