//! Runtime trait and implementations

#[cfg(feature = "javascript")]
mod javascript;
#[cfg(feature = "python")]
mod python;
#[cfg(feature = "typescript")]
mod typescript;

use crate::capture::CaptureShim;
use crate::Result;
use async_trait::async_trait;
use polyrun_common::{ExecutionRequest, Language, PackageInfo, RequestId};

#[cfg(feature = "javascript")]
pub use javascript::JavaScriptRuntime;
#[cfg(feature = "python")]
pub use python::{PythonRuntime, PythonSession};
#[cfg(feature = "typescript")]
pub use typescript::TypeScriptRuntime;

/// One unit of work handed to a runtime
#[derive(Debug, Clone)]
pub struct Job {
    pub request_id: RequestId,
    pub code: String,
    pub input: String,
    pub args: Vec<String>,
    /// Output capability for this execution only
    pub shim: CaptureShim,
}

impl Job {
    pub fn new(request: &ExecutionRequest, shim: CaptureShim) -> Self {
        Self {
            request_id: request.request_id.clone(),
            code: request.code.clone(),
            input: request.input.clone(),
            args: request.args.clone(),
            shim,
        }
    }
}

/// How user code ended. Output travels through the job's shim, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Source could not be transpiled
    CompileError(String),
    /// User code raised
    RuntimeError(String),
}

/// Runtime abstraction for executing code
///
/// Dropping the future returned by [`Runtime::run`] abandons the execution;
/// implementations make a best effort to stop the underlying engine when
/// that happens.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Execute one job
    async fn run(&self, job: Job) -> Result<RunOutcome>;

    /// Get runtime name
    fn name(&self) -> &str;

    fn language(&self) -> Language;

    /// Prepare any expensive session state ahead of the first run
    async fn warm_up(&self) -> Result<()> {
        Ok(())
    }

    /// Drop cached session state
    async fn reset(&self) {}

    /// Packages this runtime preloads
    async fn packages(&self) -> Result<Vec<PackageInfo>> {
        Ok(Vec::new())
    }
}
