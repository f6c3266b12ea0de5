//! Scripted in-process app-server for integration tests.
//!
//! The client side is a real [`Client`] over [`Transport::from_io`]; the
//! server side reads and writes raw JSON lines so each test controls exactly
//! what goes over the wire and in which order.

#![allow(dead_code)]

use codex_app_server_client::{Client, ClientConfig, Transport};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
};

/// Upper bound for any single wait on the mock side.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MockServer {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A client wired to a fresh mock server.
pub fn connect(turn_timeout: Duration) -> (Client, MockServer) {
    connect_with(ClientConfig::new().turn_timeout(turn_timeout))
}

pub fn connect_with(config: ClientConfig) -> (Client, MockServer) {
    init_logging();
    let (client_io, server_io) = tokio::io::duplex(1024 * 1024);
    let (client_read, client_write) = tokio::io::split(client_io);
    let client = Client::connect(Transport::from_io(client_read, client_write), config);

    let (server_read, server_write) = tokio::io::split(server_io);
    let server = MockServer {
        lines: BufReader::new(server_read).lines(),
        writer: server_write,
    };
    (client, server)
}

impl MockServer {
    /// Next frame from the client, as JSON. `None` once the client closed.
    pub async fn try_recv(&mut self) -> Option<Value> {
        let line = tokio::time::timeout(RECV_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a client frame")
            .expect("mock server read failed")?;
        Some(serde_json::from_str(&line).expect("client sent invalid JSON"))
    }

    pub async fn recv(&mut self) -> Value {
        self.try_recv().await.expect("client closed the connection")
    }

    /// Read the next frame and check it is a request for `method`.
    pub async fn expect_request(&mut self, method: &str) -> Value {
        let frame = self.recv().await;
        assert_eq!(frame["method"], method, "unexpected frame: {}", frame);
        assert!(frame.get("id").is_some(), "expected a request: {}", frame);
        assert!(frame.get("jsonrpc").is_none());
        frame
    }

    pub async fn expect_notification(&mut self, method: &str) -> Value {
        let frame = self.recv().await;
        assert_eq!(frame["method"], method, "unexpected frame: {}", frame);
        assert!(frame.get("id").is_none(), "expected a notification: {}", frame);
        frame
    }

    pub async fn send_raw(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .expect("mock server write failed");
    }

    /// Write raw bytes, which need not be UTF-8.
    pub async fn send_bytes(&mut self, bytes: &[u8]) {
        self.writer
            .write_all(bytes)
            .await
            .expect("mock server write failed");
    }

    pub async fn send(&mut self, frame: Value) {
        self.send_raw(&frame.to_string()).await;
    }

    pub async fn respond(&mut self, request: &Value, result: Value) {
        self.send(json!({"id": request["id"], "result": result})).await;
    }

    pub async fn respond_error(&mut self, request: &Value, code: i64, message: &str) {
        self.send(json!({"id": request["id"], "error": {"code": code, "message": message}}))
            .await;
    }

    pub async fn notify(&mut self, method: &str, params: Value) {
        self.send(json!({"method": method, "params": params})).await;
    }

    /// Answer `initialize` and swallow `initialized`.
    pub async fn handshake(&mut self) {
        let req = self.expect_request("initialize").await;
        self.respond(
            &req,
            json!({"userAgent": "codex_cli_rs/0.104.0 (Linux; x86_64) mock"}),
        )
        .await;
        self.expect_notification("initialized").await;
    }

    /// Answer the next `thread/start` with `thread_id`; returns the request.
    pub async fn accept_thread(&mut self, thread_id: &str) -> Value {
        let req = self.expect_request("thread/start").await;
        self.respond(&req, json!({"thread": {"id": thread_id, "preview": ""}}))
            .await;
        req
    }

    /// Answer the next `turn/start` with `turn_id`; returns the request.
    pub async fn accept_turn(&mut self, turn_id: &str) -> Value {
        let req = self.expect_request("turn/start").await;
        self.respond(&req, turn_json(turn_id, "inProgress")).await;
        req
    }

    /// Emit a complete successful turn that answers with `text`.
    pub async fn play_turn(&mut self, thread_id: &str, turn_id: &str, text: &str) {
        self.notify(
            "turn/started",
            json!({"threadId": thread_id, "turn": turn_json(turn_id, "inProgress")["turn"]}),
        )
        .await;
        self.notify(
            "item/completed",
            json!({
                "threadId": thread_id,
                "turnId": turn_id,
                "item": {"type": "userMessage", "id": "u_1", "content": [{"type": "text", "text": "hi"}]}
            }),
        )
        .await;
        self.notify(
            "item/started",
            json!({
                "threadId": thread_id,
                "turnId": turn_id,
                "item": {"type": "agentMessage", "id": "msg_1", "text": ""}
            }),
        )
        .await;
        let (head, tail) = text.split_at(text.len() / 2);
        for delta in [head, tail] {
            self.notify(
                "item/agentMessage/delta",
                json!({"threadId": thread_id, "turnId": turn_id, "itemId": "msg_1", "delta": delta}),
            )
            .await;
        }
        self.complete_message(thread_id, turn_id, "msg_1", text).await;
        self.complete_turn(thread_id, turn_id, "completed").await;
    }

    pub async fn complete_message(&mut self, thread_id: &str, turn_id: &str, item_id: &str, text: &str) {
        self.notify(
            "item/completed",
            json!({
                "threadId": thread_id,
                "turnId": turn_id,
                "item": {"type": "agentMessage", "id": item_id, "text": text}
            }),
        )
        .await;
    }

    pub async fn complete_turn(&mut self, thread_id: &str, turn_id: &str, status: &str) {
        self.notify(
            "turn/completed",
            json!({"threadId": thread_id, "turn": turn_json(turn_id, status)["turn"]}),
        )
        .await;
    }
}

/// `{"turn": {...}}` as returned by `turn/start`.
pub fn turn_json(turn_id: &str, status: &str) -> Value {
    json!({"turn": {"id": turn_id, "items": [], "status": status}})
}
