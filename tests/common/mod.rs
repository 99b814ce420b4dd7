//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use rpc_gateway::config::{BackendConfig, BackendGroupConfig, ProxyConfig};

/// A request as the mock backend saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// What the mock backend answers with.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: u16,
    pub body: String,
    pub delay: Duration,
}

impl MockReply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: "{}".into(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Programmable raw-TCP JSON-RPC backend on an ephemeral port.
pub struct MockBackend {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockBackend {
    pub async fn start<F, Fut>(handler: F) -> Self
    where
        F: Fn(RecordedRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MockReply> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(handler);

        let recorded = requests.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let handler = handler.clone();
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let _ = serve_one(socket, handler.as_ref(), recorded).await;
                });
            }
        });

        Self { addr, requests }
    }

    /// Answers every call with `result`, echoing ids. Batches get arrays.
    pub async fn echo(result: Value) -> Self {
        Self::start(move |req| {
            let result = result.clone();
            async move { MockReply::ok(answer(&req.body, |_| result.clone()).to_string()) }
        })
        .await
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

/// Build a JSON-RPC answer for `body`, one result per call.
pub fn answer(body: &Value, result: impl Fn(&Value) -> Value) -> Value {
    let one = |call: &Value| json!({"jsonrpc": "2.0", "id": call["id"].clone(), "result": result(call)});
    match body {
        Value::Array(calls) => Value::Array(calls.iter().map(one).collect()),
        call => one(call),
    }
}

async fn serve_one<F, Fut>(
    mut socket: TcpStream,
    handler: &F,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
) -> std::io::Result<()>
where
    F: Fn(RecordedRequest) -> Fut,
    Fut: Future<Output = MockReply>,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let headers: HashMap<String, String> = head
        .lines()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body = serde_json::from_slice(&buf[header_end..]).unwrap_or(Value::Null);
    let request = RecordedRequest { headers, body };
    recorded.lock().unwrap().push(request.clone());

    let reply = handler(request).await;
    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }

    let response = format!(
        "HTTP/1.1 {} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        reply.status,
        reply.body.len(),
        reply.body
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}

/// An unused local port. Racy, but good enough for tests.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// One backend, one group "main", the given methods mapped to it, RPC
/// listener on a free local port.
pub fn gateway_config(backend_url: &str, methods: &[&str]) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.server.rpc_host = "127.0.0.1".into();
    config.server.rpc_port = free_port();
    config.server.listener_grace_period_ms = 50;
    config.server.shutdown_drain_seconds = 2;

    config.backends = BTreeMap::from([(
        "node".to_string(),
        BackendConfig {
            rpc_url: backend_url.to_string(),
            ws_url: "ws://127.0.0.1:1".to_string(),
            ..Default::default()
        },
    )]);
    config.backend_groups = BTreeMap::from([(
        "main".to_string(),
        BackendGroupConfig {
            backends: vec!["node".to_string()],
        },
    )]);
    config.rpc_method_mappings = methods
        .iter()
        .map(|m| (m.to_string(), "main".to_string()))
        .collect();
    config
}

pub fn rpc_url(config: &ProxyConfig) -> String {
    format!("http://127.0.0.1:{}", config.server.rpc_port)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
