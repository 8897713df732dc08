//! 服务器生命周期与传输集成测试

use std::sync::Arc;
use std::time::Duration;

use mcp_shared::config::{TransportConfig, TransportKind};
use rule_engine::CachedRuleEngine;
use rule_mcp::{McpServer, MemoryRulesetStore, RuleOrchestrator, ServerError, ServerState};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

const DISCOUNT: &str = r#"{"rules":[{"name":"apply_discount","when":{"type":"condition","field":"amount","operator":"gt","value":100},"then":[{"action":"set","field":"applied","value":true}]}]}"#;

fn server() -> McpServer {
    McpServer::new(RuleOrchestrator::new(
        Arc::new(MemoryRulesetStore::new()),
        Arc::new(CachedRuleEngine::default()),
    ))
    .with_shutdown_grace(Duration::from_secs(2))
}

fn signal() -> (oneshot::Sender<()>, impl Future<Output = ()> + Send) {
    let (tx, rx) = oneshot::channel::<()>();
    (tx, async move {
        let _ = rx.await;
    })
}

fn tool_call(id: u64, name: &str, arguments: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": { "name": name, "arguments": arguments }
    })
}

#[tokio::test]
async fn test_stdio_session_and_forced_close() {
    let mut server = server();
    server.register_tools().unwrap();

    let (mut client_in, server_in) = tokio::io::duplex(8192);
    let (server_out, client_out) = tokio::io::duplex(8192);
    let (stop, shutdown) = signal();

    let running = tokio::spawn(async move {
        let result = server.run_pipe_until(server_in, server_out, shutdown).await;
        (result, server.state())
    });

    let mut lines = BufReader::new(client_out).lines();
    for message in [
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {"protocolVersion": "2024-11-05"}}),
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        tool_call(2, "create", json!({"name": "discount", "grl": DISCOUNT})),
    ] {
        client_in
            .write_all(format!("{message}\n").as_bytes())
            .await
            .unwrap();
    }

    // 请求并发处理，响应顺序不固定
    let mut responses = Vec::new();
    for _ in 0..2 {
        let line = lines.next_line().await.unwrap().unwrap();
        responses.push(serde_json::from_str::<Value>(&line).unwrap());
    }
    responses.sort_by_key(|r| r["id"].as_u64());

    assert_eq!(responses[0]["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(responses[1]["id"], 2);
    assert_eq!(responses[1]["result"]["isError"], false);

    client_in
        .write_all(
            format!(
                "{}\n",
                tool_call(3, "evaluate", json!({"facts": {"amount": 150}, "rule_name": "discount"}))
            )
            .as_bytes(),
        )
        .await
        .unwrap();
    let evaluated: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(evaluated["result"]["structuredContent"]["modified_facts"]["applied"], true);

    // 客户端保持输入流打开，只能依靠关闭信号结束读取
    stop.send(()).unwrap();
    let (result, state) = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("stdio transport should stop after the signal")
        .unwrap();

    result.unwrap();
    assert_eq!(state, ServerState::Stopped);
    drop(client_in);
}

#[tokio::test]
async fn test_streamable_http_live_run() {
    let mut server = server();
    server.register_tools().unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, shutdown) = signal();
    let mut states = server.subscribe();

    let running = tokio::spawn(async move {
        let result = server
            .run_http_until(listener, TransportKind::StreamableHttp, shutdown)
            .await;
        (result, server.state())
    });
    states
        .wait_for(|state| *state == ServerState::Running)
        .await
        .unwrap();

    let client = reqwest::Client::new();
    let url = format!("http://{addr}/mcp");

    let health = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);

    let init = client
        .post(&url)
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(init.status(), reqwest::StatusCode::OK);
    let session = init.headers()["mcp-session-id"].to_str().unwrap().to_string();

    let created: Value = client
        .post(&url)
        .header("mcp-session-id", &session)
        .json(&tool_call(2, "create", json!({"name": "discount", "grl": DISCOUNT})))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(created["result"]["isError"], false);

    let listed: Value = client
        .post(&url)
        .header("mcp-session-id", &session)
        .json(&tool_call(3, "list", json!({})))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let rulesets = listed["result"]["structuredContent"]["rulesets"].as_array().unwrap();
    assert_eq!(rulesets.len(), 1);
    assert_eq!(rulesets[0]["name"], "discount");

    let missing: Value = client
        .post(&url)
        .header("mcp-session-id", &session)
        .json(&tool_call(4, "delete", json!({"name": "ghost"})))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(missing["result"]["isError"], true);

    drop(client);
    stop.send(()).unwrap();
    let (result, state) = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("http transport should stop within the grace period")
        .unwrap();

    result.unwrap();
    assert_eq!(state, ServerState::Stopped);
}

#[tokio::test]
async fn test_sse_stream_ends_on_shutdown() {
    let mut server = server();
    server.register_tools().unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, shutdown) = signal();
    let mut states = server.subscribe();

    let running = tokio::spawn(async move {
        let result = server.run_http_until(listener, TransportKind::Sse, shutdown).await;
        (result, server.state())
    });
    states
        .wait_for(|state| *state == ServerState::Running)
        .await
        .unwrap();

    let mut stream = reqwest::get(format!("http://{addr}/sse")).await.unwrap();
    assert_eq!(stream.status(), reqwest::StatusCode::OK);
    let first = stream.chunk().await.unwrap().unwrap();
    let text = String::from_utf8(first.to_vec()).unwrap();
    assert!(text.contains("event: endpoint"));

    stop.send(()).unwrap();
    let (result, state) = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("sse transport should stop while a stream is open")
        .unwrap();

    result.unwrap();
    assert_eq!(state, ServerState::Stopped);
}

#[tokio::test]
async fn test_grace_expiry_still_stops_cleanly() {
    let grace = Duration::from_millis(100);
    let mut server = server().with_shutdown_grace(grace);
    server.register_tools().unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, shutdown) = signal();
    let mut states = server.subscribe();

    let running = tokio::spawn(async move {
        let result = server
            .run_http_until(listener, TransportKind::StreamableHttp, shutdown)
            .await;
        (result, server.state())
    });
    states
        .wait_for(|state| *state == ServerState::Running)
        .await
        .unwrap();

    // 请求体只发送一部分，请求一直处于进行中
    let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
    client
        .write_all(
            b"POST /mcp HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: 64\r\n\r\n{\"jsonrpc\"",
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = tokio::time::Instant::now();
    stop.send(()).unwrap();
    let (result, state) = tokio::time::timeout(Duration::from_secs(3), running)
        .await
        .expect("server should stop once the grace period expires")
        .unwrap();

    result.unwrap();
    assert_eq!(state, ServerState::Stopped);
    assert!(started.elapsed() >= grace);
}

#[tokio::test]
async fn test_run_before_register_tools() {
    let mut server = server();
    let config = TransportConfig {
        kind: TransportKind::StreamableHttp,
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };

    let err = server
        .run_until(&config, std::future::pending())
        .await
        .unwrap_err();

    assert!(matches!(err, ServerError::InvalidState { .. }));
    assert_eq!(server.state(), ServerState::Created);
}

#[tokio::test]
async fn test_bind_failure_marks_failed() {
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = occupied.local_addr().unwrap().port();

    let mut server = server();
    server.register_tools().unwrap();
    let config = TransportConfig {
        kind: TransportKind::Sse,
        host: "127.0.0.1".to_string(),
        port,
        ..Default::default()
    };

    let err = server
        .run_until(&config, std::future::pending())
        .await
        .unwrap_err();

    assert!(matches!(err, ServerError::Bind { .. }));
    assert_eq!(server.state(), ServerState::Failed);
}
