//! Capture shim: the only output channel a running program gets
//!
//! A fresh [`CaptureShim`] is created for every execution and handed to the
//! runtime explicitly. Lines are buffered for the final result and, when
//! streaming is enabled, forwarded as `output`/`error` events. Sealing the
//! shim when the execution ends (normally, on timeout or on stop) makes any
//! later write from an abandoned runtime a no-op, so nothing leaks into the
//! next execution.

use polyrun_common::{EngineMessage, RequestId};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Everything captured for one execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub truncated: bool,
}

#[derive(Debug)]
struct CaptureBuffer {
    lines: VecDeque<(OutputStream, String)>,
    max_lines: usize,
    dropped: usize,
    sealed: bool,
}

#[derive(Clone)]
pub struct CaptureShim {
    request_id: RequestId,
    inner: Arc<Mutex<CaptureBuffer>>,
    events: Option<mpsc::UnboundedSender<EngineMessage>>,
}

impl CaptureShim {
    pub fn new(request_id: RequestId, max_lines: usize) -> Self {
        Self {
            request_id,
            inner: Arc::new(Mutex::new(CaptureBuffer {
                lines: VecDeque::new(),
                max_lines: max_lines.max(1),
                dropped: 0,
                sealed: false,
            })),
            events: None,
        }
    }

    /// Also forward every line as an incremental event
    pub fn streaming(mut self, events: mpsc::UnboundedSender<EngineMessage>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Record one line
    pub fn write(&self, stream: OutputStream, line: impl Into<String>) {
        let line = line.into();
        let mut buffer = self.lock();
        if buffer.sealed {
            return;
        }

        // Forward under the lock so no event can follow the seal
        if let Some(events) = &self.events {
            let request_id = Some(self.request_id.clone());
            let data = line.clone();
            let _ = events.send(match stream {
                OutputStream::Stdout => EngineMessage::Output { data, request_id },
                OutputStream::Stderr => EngineMessage::Error { data, request_id },
            });
        }

        if buffer.lines.len() >= buffer.max_lines {
            buffer.lines.pop_front();
            buffer.dropped += 1;
        }
        buffer.lines.push_back((stream, line));
    }

    pub fn stdout(&self, line: impl Into<String>) {
        self.write(OutputStream::Stdout, line);
    }

    pub fn stderr(&self, line: impl Into<String>) {
        self.write(OutputStream::Stderr, line);
    }

    /// Stop accepting writes and return what was captured
    pub fn seal(&self) -> CapturedOutput {
        let mut buffer = self.lock();
        buffer.sealed = true;
        Self::collect(&buffer)
    }

    pub fn snapshot(&self) -> CapturedOutput {
        Self::collect(&self.lock())
    }

    fn collect(buffer: &CaptureBuffer) -> CapturedOutput {
        let mut output = CapturedOutput {
            truncated: buffer.dropped > 0,
            ..Default::default()
        };
        for (stream, line) in &buffer.lines {
            match stream {
                OutputStream::Stdout => output.stdout.push(line.clone()),
                OutputStream::Stderr => output.stderr.push(line.clone()),
            }
        }
        output
    }

    fn lock(&self) -> MutexGuard<'_, CaptureBuffer> {
        // A panic while holding the lock leaves the buffer usable
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for CaptureShim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureShim")
            .field("request_id", &self.request_id)
            .field("streaming", &self.events.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_lines_are_split_by_stream_in_order() {
        let shim = CaptureShim::new(RequestId::from("r"), 100);
        shim.stdout("one");
        shim.stderr("oops");
        shim.stdout("two");

        let captured = shim.snapshot();
        assert_eq!(captured.stdout, vec!["one", "two"]);
        assert_eq!(captured.stderr, vec!["oops"]);
        assert!(!captured.truncated);
    }

    #[test]
    fn test_sealed_shim_ignores_late_writes() {
        let shim = CaptureShim::new(RequestId::from("r"), 100);
        shim.stdout("before");
        let sealed = shim.seal();
        shim.stdout("after");

        assert_eq!(sealed.stdout, vec!["before"]);
        assert_eq!(shim.snapshot().stdout, vec!["before"]);
    }

    #[test]
    fn test_cap_drops_oldest_lines() {
        let shim = CaptureShim::new(RequestId::from("r"), 2);
        for line in ["a", "b", "c"] {
            shim.write(OutputStream::Stdout, line);
        }

        let captured = shim.snapshot();
        assert_eq!(captured.stdout, vec!["b", "c"]);
        assert!(captured.truncated);
    }

    #[test]
    fn test_streaming_forwards_tagged_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shim = CaptureShim::new(RequestId::from("r7"), 10).streaming(tx);
        shim.stdout("hi");
        shim.stderr("bad");
        shim.seal();
        shim.stdout("dropped");

        assert_matches!(
            rx.try_recv(),
            Ok(EngineMessage::Output { data, request_id: Some(id) }) if data == "hi" && id.as_str() == "r7"
        );
        assert_matches!(rx.try_recv(), Ok(EngineMessage::Error { data, .. }) if data == "bad");
        assert!(rx.try_recv().is_err());
    }
}
