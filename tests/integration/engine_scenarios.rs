//! End-to-end behaviour of the engine for JavaScript and TypeScript

use assert_matches::assert_matches;
use polyrun_common::{EngineMessage, ErrorKind, ExecutionRequest};
use polyrun_tests::common::{setup_test_logging, start_engine, TEST_TIMEOUT};
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_console_log_is_captured() {
    setup_test_logging();
    let engine = start_engine(TEST_TIMEOUT);

    let result = engine
        .execute("console.log('hi')", "javascript")
        .await
        .unwrap();
    assert_eq!(result.output, vec!["hi"]);
    assert_eq!(result.error, None);
    assert!(result.success());
}

#[tokio::test]
async fn test_thrown_error_message_is_reported() {
    setup_test_logging();
    let engine = start_engine(TEST_TIMEOUT);

    let result = engine
        .execute("throw new Error('boom')", "javascript")
        .await
        .unwrap();
    assert!(result.output.is_empty());
    assert_eq!(result.error.as_deref(), Some("boom"));
    assert_eq!(result.error_kind, Some(ErrorKind::RuntimeError));
}

#[tokio::test]
async fn test_infinite_loop_times_out() {
    setup_test_logging();
    let engine = start_engine(TEST_TIMEOUT);

    let started = Instant::now();
    let result = engine.execute("while(true){}", "javascript").await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.error.as_deref(), Some("Execution timeout"));
    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    assert!(elapsed >= TEST_TIMEOUT);
    assert!(elapsed < TEST_TIMEOUT + Duration::from_secs(2), "took {:?}", elapsed);

    // The engine is usable again right away
    let next = engine.execute("console.log('after')", "js").await.unwrap();
    assert_eq!(next.output, vec!["after"]);
}

#[tokio::test]
async fn test_unsupported_language_is_immediate() {
    setup_test_logging();
    let engine = start_engine(TEST_TIMEOUT);

    let result = engine.execute("code", "ruby").await.unwrap();
    assert_eq!(result.error.as_deref(), Some("Unsupported language"));
    assert_eq!(result.execution_time_ms, 0);
    assert!(result.output.is_empty());
}

#[tokio::test]
async fn test_outputs_are_ordered_and_isolated_between_runs() {
    setup_test_logging();
    let engine = start_engine(TEST_TIMEOUT);

    let first = engine
        .execute(
            "globalThis.leaked = 1; for (let i = 0; i < 3; i++) console.log(i)",
            "javascript",
        )
        .await
        .unwrap();
    assert_eq!(first.output, vec!["0", "1", "2"]);

    let second = engine
        .execute("console.log(typeof globalThis.leaked)", "javascript")
        .await
        .unwrap();
    assert_eq!(second.output, vec!["undefined"]);
}

#[tokio::test]
async fn test_input_and_args_reach_the_program() {
    setup_test_logging();
    let engine = start_engine(TEST_TIMEOUT);

    let request = ExecutionRequest::new("console.log(input.trim(), args.join('+'))", "javascript")
        .with_input("  data\n")
        .with_arg("a")
        .with_arg("b");
    let result = engine.submit(request).await.unwrap();
    assert_eq!(result.output, vec!["data a+b"]);
}

#[tokio::test]
async fn test_typescript_runs_and_reports_compile_errors() {
    setup_test_logging();
    let engine = start_engine(TEST_TIMEOUT);

    let ok = engine
        .execute(
            "const greet = (name: string): string => `hello ${name}`; console.log(greet('ts'));",
            "typescript",
        )
        .await
        .unwrap();
    assert_eq!(ok.output, vec!["hello ts"]);

    let broken = engine.execute("let x: = 1;", "ts").await.unwrap();
    assert_eq!(broken.error_kind, Some(ErrorKind::CompileError));
    assert_matches!(broken.error, Some(ref e) if e.starts_with("Compile error: "));
}

#[tokio::test]
async fn test_busy_then_stop() {
    setup_test_logging();
    let engine = start_engine(Duration::from_secs(30));
    let mut events = engine.subscribe();

    let running = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .execute("console.log('started'); while(true){}", "javascript")
                .await
        })
    };

    // Wait for the first line so the loop is known to be running
    loop {
        if let EngineMessage::Output { data, .. } = events.recv().await.unwrap() {
            if data == "started" {
                break;
            }
        }
    }

    let busy = engine.execute("console.log('no')", "javascript").await.unwrap();
    assert_eq!(busy.error.as_deref(), Some("Engine busy"));

    engine.stop().unwrap();
    let cancelled = running.await.unwrap().unwrap();
    assert_eq!(cancelled.error.as_deref(), Some("Execution cancelled"));
    assert_eq!(cancelled.output, vec!["started"]);

    let after = engine.execute("console.log('fresh')", "javascript").await.unwrap();
    assert_eq!(after.output, vec!["fresh"]);
}
