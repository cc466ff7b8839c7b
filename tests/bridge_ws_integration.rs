//! Integration tests for the worker WebSocket + control API.
//!
//! Each test spins up the control router on a random port, connects fake
//! workers via tokio-tungstenite, and drives tasks through the REST API.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use bridge_server::api::{control_routes, metrics_routes};
use bridge_server::bridge::Bridge;
use bridge_server::config::BridgeConfig;
use bridge_server::notify::CentralNotifier;
use bridge_server::store::LibSqlQueueStore;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start the control API on a random port, return (base url, bridge).
async fn start_server() -> (String, Arc<Bridge>) {
    let store = Arc::new(LibSqlQueueStore::new_memory().await.unwrap());
    let bridge = Bridge::new(BridgeConfig::default(), store, CentralNotifier::disabled());
    let app = control_routes(Arc::clone(&bridge));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("127.0.0.1:{port}"), bridge)
}

/// Connect a worker and register it with the given languages.
async fn connect_worker(addr: &str, id: &str, languages: &[&str]) -> Ws {
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("WS connect failed");
    send_json(
        &mut ws,
        json!({
            "type": "register",
            "containerId": id,
            "languageType": languages[0],
            "capabilities": {"languages": languages, "buildTools": [], "testFrameworks": []},
        }),
    )
    .await;
    ws
}

async fn send_json(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Next text frame as JSON.
async fn next_json(ws: &mut Ws) -> Value {
    loop {
        match ws.next().await.expect("socket closed").unwrap() {
            Message::Text(txt) => return serde_json::from_str(&txt).expect("invalid JSON"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected Text frame, got {other:?}"),
        }
    }
}

async fn submit(client: &reqwest::Client, addr: &str, body: Value) -> String {
    let resp = client
        .post(format!("http://{addr}/task"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    body["taskId"].as_str().unwrap().to_string()
}

async fn get_task(client: &reqwest::Client, addr: &str, id: &str) -> Value {
    client
        .get(format!("http://{addr}/task/{id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

/// Poll until the worker list has `count` entries.
async fn wait_for_workers(bridge: &Bridge, count: usize) {
    while bridge.workers().await.len() != count {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ── Task lifecycle ───────────────────────────────────────────────────

#[tokio::test]
async fn task_runs_to_completion() {
    timeout(TEST_TIMEOUT, async {
        let (addr, bridge) = start_server().await;
        let client = reqwest::Client::new();

        let mut ws = connect_worker(&addr, "w1", &["python"]).await;
        wait_for_workers(&bridge, 1).await;

        let task_id = submit(
            &client,
            &addr,
            json!({"type": "test", "language": "python", "data": {"suite": "unit"}}),
        )
        .await;

        let msg = next_json(&mut ws).await;
        assert_eq!(msg["type"], "task");
        assert_eq!(msg["task"]["id"], task_id.as_str());
        assert_eq!(msg["task"]["type"], "test");
        assert_eq!(msg["task"]["data"]["suite"], "unit");

        send_json(
            &mut ws,
            json!({"type": "task_started", "taskId": task_id, "containerId": "w1"}),
        )
        .await;
        send_json(
            &mut ws,
            json!({"type": "task_completed", "taskId": task_id, "containerId": "w1", "result": {"passed": 12}}),
        )
        .await;

        loop {
            let task = get_task(&client, &addr, &task_id).await;
            if task["status"] == "completed" {
                assert_eq!(task["result"]["passed"], 12);
                assert!(task["completedAt"].is_string());
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let containers: Value = client
            .get(format!("http://{addr}/containers"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(containers[0]["id"], "w1");
        assert_eq!(containers[0]["status"], "idle");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn higher_priority_task_is_assigned_first() {
    timeout(TEST_TIMEOUT, async {
        let (addr, bridge) = start_server().await;
        let client = reqwest::Client::new();

        let _low = submit(&client, &addr, json!({"type": "lint", "language": "go", "priority": 1})).await;
        let high = submit(&client, &addr, json!({"type": "test", "language": "go", "priority": 10})).await;

        let mut ws = connect_worker(&addr, "w1", &["go"]).await;
        wait_for_workers(&bridge, 1).await;

        let msg = next_json(&mut ws).await;
        assert_eq!(msg["task"]["id"], high.as_str());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn javascript_task_goes_to_typescript_worker() {
    timeout(TEST_TIMEOUT, async {
        let (addr, bridge) = start_server().await;
        let client = reqwest::Client::new();

        let _py = connect_worker(&addr, "py", &["python"]).await;
        let mut ts = connect_worker(&addr, "ts", &["typescript"]).await;
        wait_for_workers(&bridge, 2).await;

        let task_id = submit(&client, &addr, json!({"type": "build", "language": "javascript"})).await;
        let msg = next_json(&mut ts).await;
        assert_eq!(msg["task"]["id"], task_id.as_str());

        let task = get_task(&client, &addr, &task_id).await;
        assert_eq!(task["containerId"], "ts");
    })
    .await
    .expect("test timed out");
}

// ── Worker loss ──────────────────────────────────────────────────────

#[tokio::test]
async fn disconnect_requeues_task_to_next_worker() {
    timeout(TEST_TIMEOUT, async {
        let (addr, bridge) = start_server().await;
        let client = reqwest::Client::new();

        let mut first = connect_worker(&addr, "w1", &["rust"]).await;
        wait_for_workers(&bridge, 1).await;
        let task_id = submit(&client, &addr, json!({"type": "test", "language": "rust"})).await;
        assert_eq!(next_json(&mut first).await["task"]["id"], task_id.as_str());

        first.close(None).await.unwrap();
        wait_for_workers(&bridge, 0).await;

        let task = get_task(&client, &addr, &task_id).await;
        assert_eq!(task["status"], "pending");

        let mut second = connect_worker(&addr, "w2", &["rust"]).await;
        let msg = next_json(&mut second).await;
        assert_eq!(msg["task"]["id"], task_id.as_str());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn malformed_frames_keep_connection_open() {
    timeout(TEST_TIMEOUT, async {
        let (addr, bridge) = start_server().await;
        let client = reqwest::Client::new();

        let mut ws = connect_worker(&addr, "w1", &["python"]).await;
        wait_for_workers(&bridge, 1).await;

        ws.send(Message::Text("this is not json".into())).await.unwrap();
        send_json(&mut ws, json!({"type": "teleport", "containerId": "w1"})).await;

        let task_id = submit(&client, &addr, json!({"type": "test", "language": "python"})).await;
        assert_eq!(next_json(&mut ws).await["task"]["id"], task_id.as_str());
    })
    .await
    .expect("test timed out");
}

// ── Control API ──────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_request_reaches_worker() {
    timeout(TEST_TIMEOUT, async {
        let (addr, bridge) = start_server().await;
        let client = reqwest::Client::new();

        let mut ws = connect_worker(&addr, "w1", &["python"]).await;
        wait_for_workers(&bridge, 1).await;

        let resp = client
            .post(format!("http://{addr}/containers/w1/shutdown"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(next_json(&mut ws).await["type"], "shutdown");

        let resp = client
            .post(format!("http://{addr}/containers/nobody/shutdown"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn health_counts_workers_and_tasks() {
    timeout(TEST_TIMEOUT, async {
        let (addr, bridge) = start_server().await;
        let client = reqwest::Client::new();

        let mut ws = connect_worker(&addr, "w1", &["python"]).await;
        wait_for_workers(&bridge, 1).await;
        submit(&client, &addr, json!({"type": "test", "language": "python"})).await;
        submit(&client, &addr, json!({"type": "test", "language": "elixir"})).await;
        let _ = next_json(&mut ws).await;

        let health: Value = client
            .get(format!("http://{addr}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["containers"], 1);
        assert_eq!(health["activeTasks"], 1);
        assert_eq!(health["pendingTasks"], 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn metrics_port_serves_prometheus_text() {
    timeout(TEST_TIMEOUT, async {
        let (_addr, bridge) = start_server().await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let app = metrics_routes(Arc::clone(&bridge));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let text = reqwest::get(format!("http://127.0.0.1:{port}/metrics"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(text.contains("bridge_workers"));
        assert!(text.contains("bridge_queue_depth"));
    })
    .await
    .expect("test timed out");
}
