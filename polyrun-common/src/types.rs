//! Request and result types exchanged with the engine

use crate::language::Language;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque request token. Callers may supply their own; otherwise a UUID is used.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Request to execute code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub request_id: RequestId,

    /// The code to execute
    pub code: String,

    pub language: Language,

    /// stdin-like text made available to the program
    #[serde(default)]
    pub input: String,

    /// Program arguments, in order
    #[serde(default)]
    pub args: Vec<String>,
}

impl ExecutionRequest {
    /// Create a request with a fresh id and no input
    pub fn new(code: impl Into<String>, language: impl Into<Language>) -> Self {
        Self {
            request_id: RequestId::new(),
            code: code.into(),
            language: language.into(),
            input: String::new(),
            args: Vec::new(),
        }
    }

    pub fn with_id(mut self, request_id: impl Into<RequestId>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = input.into();
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Why an execution did not complete normally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Source failed to transpile
    CompileError,
    /// User code raised
    RuntimeError,
    UnsupportedLanguage,
    /// Another execution was already running
    Busy,
    Timeout,
    Cancelled,
}

impl ErrorKind {
    /// Fixed message for kinds that do not carry runtime detail
    pub fn default_message(self) -> &'static str {
        match self {
            ErrorKind::CompileError => "Compile error",
            ErrorKind::RuntimeError => "Runtime error",
            ErrorKind::UnsupportedLanguage => "Unsupported language",
            ErrorKind::Busy => "Engine busy",
            ErrorKind::Timeout => "Execution timeout",
            ErrorKind::Cancelled => "Execution cancelled",
        }
    }
}

/// Result of code execution. Produced exactly once per accepted request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub request_id: RequestId,

    /// Captured stdout lines, in order
    pub output: Vec<String>,

    /// Captured stderr lines (console.warn/error, Python stderr)
    #[serde(default)]
    pub stderr: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Wall-clock time since the request was accepted
    pub execution_time_ms: u64,

    /// Whether the output cap dropped lines
    #[serde(default)]
    pub truncated: bool,
}

impl ExecutionResult {
    /// Result that failed before producing any output
    pub fn rejected(request_id: RequestId, kind: ErrorKind) -> Self {
        Self {
            request_id,
            output: Vec::new(),
            stderr: Vec::new(),
            error: Some(kind.default_message().to_string()),
            error_kind: Some(kind),
            execution_time_ms: 0,
            truncated: false,
        }
    }

    /// Check if execution succeeded
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Availability of a preloaded package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}
