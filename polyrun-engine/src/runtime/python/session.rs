//! Long-lived interpreter session
//!
//! Compiling the CPython module dominates startup, so the compiled module and
//! a pre-linked [`InstancePre`] are kept for the lifetime of the session.
//! Every invocation still gets a fresh store and instance, so no Python state
//! survives between runs.

use super::records::{DriverJob, DriverReport, LineBuffer, ProbedPackage, RecordSink};
use super::NAME;
use crate::capture::CaptureShim;
use crate::config::PythonConfig;
use crate::error::{EngineError, Result};
use polyrun_common::PackageInfo;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wasmtime::*;
use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::preview1::{add_to_linker_async, WasiP1Ctx};
use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

const DRIVER: &str = include_str!("driver.py");

const HOME_GUEST_PATH: &str = "/usr/local";
const SITE_PACKAGES_GUEST_PATH: &str = "/site-packages";

/// Guest yields back to the host once per tick
const EPOCH_TICK: Duration = Duration::from_millis(10);

const DRAIN_INTERVAL: Duration = Duration::from_millis(25);

const PIPE_CAPACITY: usize = 16 * 1024 * 1024;

pub(super) struct GuestState {
    wasi: WasiP1Ctx,
    limits: StoreLimits,
}

/// Compiled interpreter plus the packages it was able to preload
pub struct PythonSession {
    engine: Engine,
    instance_pre: InstancePre<GuestState>,
    home: PathBuf,
    site_packages: Option<PathBuf>,
    max_memory_bytes: Option<usize>,
    preload: Vec<String>,
    available: Vec<ProbedPackage>,
    ticker_stop: Arc<AtomicBool>,
}

impl PythonSession {
    /// Compile the interpreter and probe the preload packages
    pub async fn start(config: &PythonConfig, max_memory_bytes: Option<usize>) -> Result<Self> {
        let wasm_path = config.wasm_path()?.ok_or_else(|| {
            EngineError::init(
                NAME,
                "no interpreter configured (set python.wasm_path or POLYRUN_PYTHON_WASM)",
            )
        })?;
        // Default to the layout of the python-wasi release archives
        let home = match config.home()? {
            Some(home) => home,
            None => wasm_path
                .parent()
                .map(|dir| dir.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        let mut wasm_config = Config::new();
        wasm_config.wasm_backtrace_details(WasmBacktraceDetails::Enable);
        wasm_config.async_support(true);
        wasm_config.epoch_interruption(true);
        let engine = Engine::new(&wasm_config).map_err(|e| EngineError::init(NAME, e))?;

        tracing::info!(path = %wasm_path.display(), "Compiling Python interpreter");
        let module = {
            let engine = engine.clone();
            let path = wasm_path.clone();
            tokio::task::spawn_blocking(move || Module::from_file(&engine, &path))
                .await
                .map_err(|e| EngineError::init(NAME, e))?
                .map_err(|e| {
                    EngineError::init(NAME, format!("{}: {}", wasm_path.display(), e))
                })?
        };

        let mut linker: Linker<GuestState> = Linker::new(&engine);
        add_to_linker_async(&mut linker, |s: &mut GuestState| &mut s.wasi)
            .map_err(|e| EngineError::init(NAME, e))?;
        let instance_pre = linker
            .instantiate_pre(&module)
            .map_err(|e| EngineError::init(NAME, e))?;

        let ticker_stop = spawn_epoch_ticker(engine.clone())?;

        let mut session = Self {
            engine,
            instance_pre,
            home,
            site_packages: config.site_packages()?,
            max_memory_bytes,
            preload: config.preload_packages.clone(),
            available: Vec::new(),
            ticker_stop,
        };

        let report = session
            .invoke(&DriverJob::Probe { packages: &session.preload }, None)
            .await?;
        session.available = report
            .available
            .clone()
            .ok_or_else(|| EngineError::init(NAME, report.failure_message()))?;

        tracing::debug!(available = ?session.available, "Python packages probed");
        Ok(session)
    }

    pub fn available_packages(&self) -> &[ProbedPackage] {
        &self.available
    }

    /// Availability and version of every configured preload package
    pub fn packages(&self) -> Vec<PackageInfo> {
        self.preload
            .iter()
            .map(|name| {
                let probed = self.available.iter().find(|p| &p.name == name);
                PackageInfo {
                    name: name.clone(),
                    available: probed.is_some(),
                    version: probed.and_then(|p| p.version.clone()),
                }
            })
            .collect()
    }

    /// Run the driver once in a fresh instance
    ///
    /// Lines reach `shim` while the guest runs. If this future is dropped
    /// mid-run, whatever the guest already wrote is still delivered.
    pub(super) async fn invoke(
        &self,
        job: &DriverJob<'_>,
        shim: Option<CaptureShim>,
    ) -> Result<DriverReport> {
        let stdin = MemoryInputPipe::new(serde_json::to_vec(job)?);
        let stdout = MemoryOutputPipe::new(PIPE_CAPACITY);
        let stderr = MemoryOutputPipe::new(PIPE_CAPACITY);

        let mut builder = WasiCtxBuilder::new();
        builder
            .stdin(stdin)
            .stdout(stdout.clone())
            .stderr(stderr.clone())
            .args(&["python", "-c", DRIVER])
            .env("PYTHONHOME", HOME_GUEST_PATH)
            .env("PYTHONDONTWRITEBYTECODE", "1");
        builder
            .preopened_dir(&self.home, HOME_GUEST_PATH, DirPerms::READ, FilePerms::READ)
            .map_err(|e| EngineError::runtime(NAME, format!("{}: {}", self.home.display(), e)))?;
        if let Some(site_packages) = &self.site_packages {
            builder.env("PYTHONPATH", SITE_PACKAGES_GUEST_PATH);
            builder
                .preopened_dir(
                    site_packages,
                    SITE_PACKAGES_GUEST_PATH,
                    DirPerms::READ,
                    FilePerms::READ,
                )
                .map_err(|e| {
                    EngineError::runtime(NAME, format!("{}: {}", site_packages.display(), e))
                })?;
        }

        let mut limits = StoreLimitsBuilder::new();
        if let Some(max) = self.max_memory_bytes {
            limits = limits.memory_size(max);
        }
        let state = GuestState {
            wasi: builder.build_p1(),
            limits: limits.build(),
        };
        let mut store = Store::new(&self.engine, state);
        store.limiter(|s| &mut s.limits);
        store.set_epoch_deadline(1);
        store.epoch_deadline_async_yield_and_update(1);

        let mut drain = PipeDrain::new(stdout, stderr, RecordSink::new(shim));

        let instance = self
            .instance_pre
            .instantiate_async(&mut store)
            .await
            .map_err(|e| EngineError::runtime(NAME, e))?;
        let start = instance
            .get_typed_func::<(), ()>(&mut store, "_start")
            .map_err(|e| EngineError::runtime(NAME, e))?;

        let call = start.call_async(&mut store, ());
        tokio::pin!(call);
        let mut ticks = tokio::time::interval(DRAIN_INTERVAL);
        let outcome = loop {
            tokio::select! {
                outcome = &mut call => break outcome,
                _ = ticks.tick() => drain.pump(),
            }
        };

        if let Err(e) = outcome {
            match e.downcast_ref::<wasmtime_wasi::I32Exit>() {
                Some(exit) if exit.0 == 0 => {}
                Some(exit) => drain
                    .sink
                    .abort(format!("Python interpreter exited with code {}", exit.0)),
                None => drain.sink.abort(format!("Python interpreter trapped: {}", e)),
            }
        }
        Ok(drain.finish())
    }
}

impl Drop for PythonSession {
    fn drop(&mut self) {
        self.ticker_stop.store(true, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for PythonSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PythonSession")
            .field("home", &self.home)
            .field("site_packages", &self.site_packages)
            .field("available", &self.available)
            .finish()
    }
}

fn spawn_epoch_ticker(engine: Engine) -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    std::thread::Builder::new()
        .name("polyrun-epoch".to_string())
        .spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                std::thread::sleep(EPOCH_TICK);
                engine.increment_epoch();
            }
        })?;
    Ok(stop)
}

/// Moves guest output from the WASI pipes into the record sink
struct PipeDrain {
    stdout: MemoryOutputPipe,
    stderr: MemoryOutputPipe,
    stdout_lines: LineBuffer,
    stderr_lines: LineBuffer,
    sink: RecordSink,
    finished: bool,
}

impl PipeDrain {
    fn new(stdout: MemoryOutputPipe, stderr: MemoryOutputPipe, sink: RecordSink) -> Self {
        Self {
            stdout,
            stderr,
            stdout_lines: LineBuffer::default(),
            stderr_lines: LineBuffer::default(),
            sink,
            finished: false,
        }
    }

    fn pump(&mut self) {
        for line in self.stdout_lines.feed(&self.stdout.contents()) {
            self.sink.driver_line(&line);
        }
        for line in self.stderr_lines.feed(&self.stderr.contents()) {
            self.sink.interpreter_line(&line);
        }
    }

    fn flush(&mut self) {
        self.pump();
        if let Some(rest) = self.stdout_lines.finish() {
            self.sink.driver_line(&rest);
        }
        if let Some(rest) = self.stderr_lines.finish() {
            self.sink.interpreter_line(&rest);
        }
    }

    fn finish(mut self) -> DriverReport {
        self.flush();
        self.finished = true;
        self.sink.take_report()
    }
}

impl Drop for PipeDrain {
    fn drop(&mut self) {
        // Abandoned mid-run: deliver what the guest already wrote
        if !self.finished {
            self.flush();
        }
    }
}
