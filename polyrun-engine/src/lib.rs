//! Polyrun engine - single-flight multi-language code execution
//!
//! Runs untrusted JavaScript, TypeScript and Python snippets one at a time
//! behind a message boundary, capturing their output line by line.
//! Runtimes are pluggable through the [`Runtime`] trait.

mod capture;
mod config;
mod dispatcher;
mod engine;
mod error;
mod limits;
mod registry;
mod runtime;
mod worker;

pub mod transport;

pub use capture::{CaptureShim, CapturedOutput, OutputStream};
pub use config::{EngineConfig, PythonConfig};
pub use dispatcher::{Completion, Dispatcher};
pub use engine::{Engine, EngineHandle};
pub use error::{EngineError, Result};
pub use limits::ResourceLimits;
pub use registry::RuntimeRegistry;
#[cfg(feature = "javascript")]
pub use runtime::JavaScriptRuntime;
#[cfg(feature = "typescript")]
pub use runtime::TypeScriptRuntime;
pub use runtime::{Job, RunOutcome, Runtime};
#[cfg(feature = "python")]
pub use runtime::{PythonRuntime, PythonSession};
pub use worker::Worker;

pub use polyrun_common as common;
