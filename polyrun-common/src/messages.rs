//! Messages crossing the isolation boundary
//!
//! Both directions are internally tagged on `type`, which gives the JSON
//! shape callers already speak:
//!
//! ```json
//! {"type": "execute", "data": {"code": "console.log(1)", "language": "javascript"}}
//! {"type": "executionComplete", "data": {...}, "requestId": "..."}
//! ```

use crate::language::Language;
use crate::types::{ExecutionRequest, ExecutionResult, PackageInfo, RequestId};
use serde::{Deserialize, Serialize};

/// Caller -> engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerMessage {
    Execute { data: ExecutePayload },
    Stop,
    /// Initialize a runtime session before the first execution
    Warmup { data: WarmupPayload },
    /// List preloaded packages
    Packages,
    /// Drop cached runtime sessions
    Reset,
}

impl WorkerMessage {
    pub fn execute(request: ExecutionRequest) -> Self {
        WorkerMessage::Execute {
            data: ExecutePayload::from(request),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutePayload {
    pub code: String,
    pub language: Language,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
}

impl ExecutePayload {
    /// Build the immutable request, assigning an id if the caller sent none
    pub fn into_request(self) -> ExecutionRequest {
        ExecutionRequest {
            request_id: self.request_id.unwrap_or_default(),
            code: self.code,
            language: self.language,
            input: self.input.unwrap_or_default(),
            args: self.args.unwrap_or_default(),
        }
    }
}

impl From<ExecutionRequest> for ExecutePayload {
    fn from(request: ExecutionRequest) -> Self {
        Self {
            code: request.code,
            language: request.language,
            request_id: Some(request.request_id),
            input: Some(request.input),
            args: Some(request.args),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmupPayload {
    pub language: Language,
}

/// Engine -> caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineMessage {
    /// One stdout line, streamed while the execution runs
    Output {
        data: String,
        #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<RequestId>,
    },
    /// One stderr line, or an engine-level problem when `request_id` is absent
    Error {
        data: String,
        #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<RequestId>,
    },
    /// Terminal message for a request
    #[serde(alias = "executionResult")]
    ExecutionComplete {
        data: ExecutionResult,
        #[serde(rename = "requestId")]
        request_id: RequestId,
    },
    Ready { data: ReadyPayload },
    Packages { data: Vec<PackageInfo> },
    Reset,
}

impl EngineMessage {
    pub fn complete(result: ExecutionResult) -> Self {
        EngineMessage::ExecutionComplete {
            request_id: result.request_id.clone(),
            data: result,
        }
    }

    /// Engine-level error not tied to a request
    pub fn failure(message: impl Into<String>) -> Self {
        EngineMessage::Error {
            data: message.into(),
            request_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyPayload {
    pub language: Language,
    pub init_ms: u64,
}
