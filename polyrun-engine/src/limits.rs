//! Resource limits applied to every execution

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resource limits for code execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Wall-clock deadline measured from submit
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Heap cap for V8 isolates and linear-memory cap for the Python store
    pub max_memory_bytes: Option<usize>,

    /// Lines kept per execution; older lines are dropped past this
    pub max_output_lines: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_memory_bytes: Some(256 * 1024 * 1024), // 256 MB default
            max_output_lines: 10_000,
        }
    }
}

impl ResourceLimits {
    /// Create strict limits for untrusted code
    pub fn strict() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_memory_bytes: Some(64 * 1024 * 1024),
            max_output_lines: 1_000,
        }
    }

    /// Create permissive limits for trusted code
    pub fn permissive() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            max_memory_bytes: Some(1024 * 1024 * 1024),
            max_output_lines: 100_000,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
