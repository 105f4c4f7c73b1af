//! Common test utilities shared across integration and E2E tests

use polyrun_engine::{Engine, EngineConfig, EngineHandle, ResourceLimits};
use std::time::Duration;

/// Timeout used by scenarios that exercise the deadline
pub const TEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("polyrun_engine=debug")
        .with_test_writer()
        .try_init();
}

/// Engine with every compiled-in runtime and the given timeout
pub fn start_engine(timeout: Duration) -> EngineHandle {
    let mut config = EngineConfig::default();
    config.limits = ResourceLimits::default().with_timeout(timeout);
    config.stream_output = true;
    Engine::spawn(config).expect("Failed to start engine")
}

/// Engine configured from the `POLYRUN_*` environment, or `None` when no
/// Python interpreter is available on this machine
pub fn start_python_engine(timeout: Duration) -> Option<EngineHandle> {
    std::env::var_os("POLYRUN_PYTHON_WASM")?;
    let mut config = EngineConfig::default();
    config
        .apply_env_overrides(|key| std::env::var(key).ok())
        .expect("Invalid POLYRUN_* environment");
    config.limits = config.limits.with_timeout(timeout);
    Some(Engine::spawn(config).expect("Failed to start engine"))
}
