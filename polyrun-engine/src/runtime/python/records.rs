//! JSON-lines protocol between the host and the embedded driver program

use crate::capture::{CaptureShim, OutputStream};
use serde::{Deserialize, Serialize};

/// Job written to the interpreter's stdin
#[derive(Debug, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub(super) enum DriverJob<'a> {
    /// Report which of `packages` import cleanly
    Probe { packages: &'a [String] },
    Run {
        code: &'a str,
        input: &'a str,
        args: &'a [String],
        imports: Vec<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Record {
    Line { stream: StreamName, line: String },
    Done { done: bool, error: Option<String> },
    Available { available: Vec<ProbedPackage> },
}

/// A preload package that imported cleanly
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(super) struct ProbedPackage {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum StreamName {
    Stdout,
    Stderr,
}

impl From<StreamName> for OutputStream {
    fn from(name: StreamName) -> Self {
        match name {
            StreamName::Stdout => OutputStream::Stdout,
            StreamName::Stderr => OutputStream::Stderr,
        }
    }
}

/// What the driver reported about one invocation
#[derive(Debug, Default, PartialEq)]
pub(super) struct DriverReport {
    /// The driver reached its final record
    pub done: bool,
    /// Exception raised by user code
    pub error: Option<String>,
    pub available: Option<Vec<ProbedPackage>>,
    /// Trap or non-zero exit of the interpreter itself
    pub abort: Option<String>,
    /// Interpreter stderr, kept for diagnostics
    pub diagnostics: Vec<String>,
}

impl DriverReport {
    /// Message for a run that never reached the final record
    pub fn failure_message(&self) -> String {
        let reason = self
            .abort
            .clone()
            .unwrap_or_else(|| "Python interpreter exited before finishing".to_string());
        match self.diagnostics.last() {
            Some(detail) => format!("{}: {}", reason, detail),
            None => reason,
        }
    }
}

const MAX_DIAGNOSTICS: usize = 20;

/// Routes driver records to the capture shim and collects the report
pub(super) struct RecordSink {
    shim: Option<CaptureShim>,
    report: DriverReport,
}

impl RecordSink {
    pub fn new(shim: Option<CaptureShim>) -> Self {
        Self {
            shim,
            report: DriverReport::default(),
        }
    }

    /// One line the driver wrote to the real stdout
    pub fn driver_line(&mut self, line: &str) {
        match serde_json::from_str::<Record>(line) {
            Ok(Record::Line { stream, line }) => {
                if let Some(shim) = &self.shim {
                    shim.write(stream.into(), line);
                }
            }
            Ok(Record::Done { done, error }) => {
                self.report.done = done;
                self.report.error = error;
            }
            Ok(Record::Available { available }) => {
                self.report.available = Some(available);
            }
            // Anything else came from the interpreter, not the driver
            Err(_) => self.interpreter_line(line),
        }
    }

    /// One line the interpreter wrote to its own stderr
    pub fn interpreter_line(&mut self, line: &str) {
        tracing::debug!(line, "Python interpreter output");
        if let Some(shim) = &self.shim {
            shim.stderr(line);
        }
        if self.report.diagnostics.len() == MAX_DIAGNOSTICS {
            self.report.diagnostics.remove(0);
        }
        self.report.diagnostics.push(line.to_string());
    }

    pub fn abort(&mut self, reason: impl Into<String>) {
        self.report.abort = Some(reason.into());
    }

    pub fn take_report(&mut self) -> DriverReport {
        std::mem::take(&mut self.report)
    }
}

/// Splits an append-only byte buffer into complete lines
#[derive(Debug, Default)]
pub(super) struct LineBuffer {
    offset: usize,
    partial: Vec<u8>,
}

impl LineBuffer {
    /// Lines completed since the last call. `contents` is the whole buffer so far.
    pub fn feed(&mut self, contents: &[u8]) -> Vec<String> {
        if contents.len() <= self.offset {
            return Vec::new();
        }
        self.partial.extend_from_slice(&contents[self.offset..]);
        self.offset = contents.len();

        let mut lines = Vec::new();
        while let Some(end) = self.partial.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.partial.drain(..=end).collect();
            let text = String::from_utf8_lossy(&raw[..end]);
            lines.push(text.trim_end_matches('\r').to_string());
        }
        lines
    }

    /// Whatever is left without a trailing newline
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.partial);
        Some(String::from_utf8_lossy(&raw).into_owned())
    }
}
