//! Python runtime tests
//!
//! These need a WASI CPython build. Point `POLYRUN_PYTHON_WASM` (and
//! `POLYRUN_PYTHON_HOME` if the standard library is not next to it) at one;
//! otherwise every test returns early.

use polyrun_common::{ErrorKind, ExecutionRequest};
use polyrun_tests::common::{setup_test_logging, start_python_engine, TEST_TIMEOUT};
use std::time::{Duration, Instant};

/// Generous enough to cover compiling the interpreter on a cold run
const PYTHON_TIMEOUT: Duration = Duration::from_secs(20);

#[tokio::test]
async fn test_print_after_warm_session() {
    setup_test_logging();
    let Some(engine) = start_python_engine(PYTHON_TIMEOUT) else {
        return;
    };

    engine.warm_up("python").await.unwrap();
    let result = engine.execute("print('hi')", "python").await.unwrap();
    assert_eq!(result.output, vec!["hi"]);
    assert_eq!(result.error, None);
}

#[tokio::test]
async fn test_exception_and_partial_output() {
    setup_test_logging();
    let Some(engine) = start_python_engine(PYTHON_TIMEOUT) else {
        return;
    };

    let result = engine
        .execute("print('before')\nraise ValueError('bad value')", "python")
        .await
        .unwrap();
    assert_eq!(result.output, vec!["before"]);
    assert_eq!(result.error_kind, Some(ErrorKind::RuntimeError));
    assert_eq!(result.error.as_deref(), Some("ValueError: bad value"));
}

#[tokio::test]
async fn test_input_args_and_stderr() {
    setup_test_logging();
    let Some(engine) = start_python_engine(PYTHON_TIMEOUT) else {
        return;
    };

    let code = "import sys\nline = input()\nprint(line.upper(), args)\nprint('note', file=sys.stderr)";
    let request = ExecutionRequest::new(code, "py")
        .with_input("hello\n")
        .with_arg("x");
    let result = engine.submit(request).await.unwrap();
    assert_eq!(result.output, vec!["HELLO ['x']"]);
    assert_eq!(result.stderr, vec!["note"]);
}

#[tokio::test]
async fn test_state_does_not_leak_and_packages_listed() {
    setup_test_logging();
    let Some(engine) = start_python_engine(PYTHON_TIMEOUT) else {
        return;
    };

    engine.execute("leaked = 1", "python").await.unwrap();
    let result = engine.execute("print('leaked' in globals())", "python").await.unwrap();
    assert_eq!(result.output, vec!["False"]);

    let packages = engine.packages().await.unwrap();
    assert!(packages.iter().any(|p| p.name == "json" && p.available));

    engine.reset().await.unwrap();
    let after_reset = engine.execute("import json; print(json.dumps([1]))", "python").await.unwrap();
    assert_eq!(after_reset.output, vec!["[1]"]);
}

#[tokio::test]
async fn test_second_run_skips_initialization() {
    setup_test_logging();
    let Some(engine) = start_python_engine(PYTHON_TIMEOUT) else {
        return;
    };

    let first = engine.execute("print(1)", "python").await.unwrap();
    let second = engine.execute("print(2)", "python").await.unwrap();
    assert_eq!(first.output, vec!["1"]);
    assert_eq!(second.output, vec!["2"]);
    assert!(
        second.execution_time_ms < first.execution_time_ms,
        "first {}ms, second {}ms",
        first.execution_time_ms,
        second.execution_time_ms
    );
}

#[tokio::test]
async fn test_busy_loop_times_out_with_partial_output() {
    setup_test_logging();
    let Some(engine) = start_python_engine(TEST_TIMEOUT) else {
        return;
    };
    engine.warm_up("python").await.unwrap();

    let started = Instant::now();
    let result = engine
        .execute("print('before', flush=True)\nwhile True:\n    pass", "python")
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.error.as_deref(), Some("Execution timeout"));
    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    assert_eq!(result.output, vec!["before"]);
    assert!(elapsed < TEST_TIMEOUT + Duration::from_secs(2), "took {:?}", elapsed);

    let next = engine.execute("print('after')", "python").await.unwrap();
    assert_eq!(next.output, vec!["after"]);
}

#[tokio::test]
async fn test_import_side_effects_reach_output() {
    setup_test_logging();
    let Some(engine) = start_python_engine(PYTHON_TIMEOUT) else {
        return;
    };

    let result = engine
        .execute("print('first')\nimport this\nprint('last')", "python")
        .await
        .unwrap();
    assert_eq!(result.error, None);
    assert_eq!(result.output.first().map(String::as_str), Some("first"));
    assert_eq!(result.output.get(1).map(String::as_str), Some("The Zen of Python, by Tim Peters"));
    assert_eq!(result.output.last().map(String::as_str), Some("last"));
    assert!(result.stderr.is_empty(), "stderr: {:?}", result.stderr);
}
