//! The JSON-lines protocol over an in-memory pipe

use polyrun_engine::transport;
use polyrun_tests::common::{setup_test_logging, start_engine, TEST_TIMEOUT};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

async fn exchange(input: &str) -> Vec<Value> {
    let engine = start_engine(TEST_TIMEOUT);
    let (client, server) = tokio::io::duplex(1024 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    let (mut client_read, mut client_write) = tokio::io::split(client);

    client_write.write_all(input.as_bytes()).await.unwrap();
    client_write.shutdown().await.unwrap();
    transport::serve(engine, server_read, server_write)
        .await
        .unwrap();

    let mut output = String::new();
    client_read.read_to_string(&mut output).await.unwrap();
    output
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_execute_streams_output_then_completes() {
    setup_test_logging();
    let messages = exchange(concat!(
        r#"{"type":"execute","data":{"code":"console.log('one'); console.error('two')","language":"javascript","requestId":"req-1"}}"#,
        "\n",
    ))
    .await;

    let types: Vec<&str> = messages
        .iter()
        .map(|m| m["type"].as_str().unwrap())
        .collect();
    assert_eq!(types, vec!["output", "error", "executionComplete"]);

    assert_eq!(messages[0]["data"], "one");
    assert_eq!(messages[0]["requestId"], "req-1");
    assert_eq!(messages[1]["data"], "two");

    let complete = &messages[2];
    assert_eq!(complete["requestId"], "req-1");
    assert_eq!(complete["data"]["output"], serde_json::json!(["one"]));
    assert_eq!(complete["data"]["stderr"], serde_json::json!(["two"]));
    assert!(complete["data"].get("error").is_none());
}

#[tokio::test]
async fn test_error_result_and_malformed_line() {
    setup_test_logging();
    let messages = exchange(concat!(
        "{\"type\":\"nonsense\"}\n",
        r#"{"type":"execute","data":{"code":"throw new Error('boom')","language":"js","requestId":"req-2"}}"#,
        "\n",
    ))
    .await;

    let invalid = messages
        .iter()
        .find(|m| m["type"] == "error" && m.get("requestId").is_none())
        .unwrap();
    assert!(invalid["data"]
        .as_str()
        .unwrap()
        .starts_with("invalid message"));

    let complete = messages
        .iter()
        .find(|m| m["type"] == "executionComplete")
        .unwrap();
    assert_eq!(complete["data"]["error"], "boom");
    assert_eq!(complete["data"]["errorKind"], "runtimeError");
    assert_eq!(complete["data"]["output"], serde_json::json!([]));
}

#[tokio::test]
async fn test_reset_is_acknowledged() {
    setup_test_logging();
    let engine = start_engine(TEST_TIMEOUT);
    let mut events = engine.subscribe();
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    let (_client_read, mut client_write) = tokio::io::split(client);

    let serving = tokio::spawn(transport::serve(engine, server_read, server_write));
    client_write
        .write_all(b"{\"type\":\"reset\"}\n")
        .await
        .unwrap();

    let ack = events.recv().await.unwrap();
    assert_eq!(ack, polyrun_common::EngineMessage::Reset);

    client_write.shutdown().await.unwrap();
    serving.await.unwrap().unwrap();
}
