#![allow(dead_code, reason = "Each test binary uses a subset of the harness.")]
#![allow(clippy::expect_used, reason = "Harness failures should abort the test.")]

//! Shared harness: a real server on an ephemeral loopback port with
//! deterministic stand-ins for the diagnostic tools.
//!
//! - `ping` is `echo`, so `ping -c N host` prints `-c N host` and exits 0.
//! - `traceroute` is a shell script that prints one line, records its pid
//!   under `pids/<host>` and then sleeps until killed.
//! - `nslookup` is a shell script that prints `<host> 1` .. `<host> 5`, one
//!   line every 50ms, then exits 0.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use futures_util::SinkExt;
use futures_util::StreamExt;
use netdiag::app::server::ServerHandle;
use netdiag::app::server::start_server;
use netdiag::domain::ToolPaths;
use netdiag::infra::ServerConfig;
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const FRAME_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TestServer {
    handle: Option<ServerHandle>,
    shutdown: watch::Sender<bool>,
    dir: TempDir,
    ws_url: String,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|config| config).await
    }

    pub async fn start_with(customize: impl FnOnce(ServerConfig) -> ServerConfig) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let tools = ToolPaths {
            ping: "echo".to_string(),
            traceroute: write_trace_script(dir.path()).display().to_string(),
            nslookup: write_lookup_script(dir.path()).display().to_string(),
        };
        let config = ServerConfig::from_env()
            .with_listen("127.0.0.1:0")
            .with_allow_remote(false)
            .with_max_connections(16)
            .with_tools(tools);
        let config = customize(config);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = start_server(config, shutdown_rx)
            .await
            .expect("start server");
        let ws_url = handle.ws_url();

        Self {
            handle: Some(handle),
            shutdown,
            dir,
            ws_url,
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn addr(&self) -> std::net::SocketAddr {
        self.handle.as_ref().expect("server running").local_addr()
    }

    pub async fn connect(&self) -> Client {
        connect_to(&self.ws_url).await
    }

    /// Pid recorded by the traceroute stand-in for `host`, once it exists.
    pub async fn trace_pid(&self, host: &str) -> u32 {
        let path = self.dir.path().join("pids").join(host);
        let deadline = tokio::time::Instant::now() + FRAME_TIMEOUT;
        loop {
            if let Ok(text) = std::fs::read_to_string(&path) {
                if let Ok(pid) = text.trim().parse() {
                    return pid;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "no pid recorded for {host}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            tokio::time::timeout(FRAME_TIMEOUT, handle.wait())
                .await
                .expect("server stops in time")
                .expect("server task joins");
        }
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

fn write_trace_script(dir: &Path) -> PathBuf {
    let pids = dir.join("pids");
    std::fs::create_dir_all(&pids).expect("create pid dir");
    // argv: -m 15 HOST
    let body = format!(
        "#!/bin/sh\necho $$ > '{}/'\"$3\"\necho \"traceroute to $3\"\nexec sleep 30\n",
        pids.display()
    );
    write_script(&dir.join("fake-traceroute"), &body)
}

fn write_lookup_script(dir: &Path) -> PathBuf {
    // argv: HOST
    let body = "#!/bin/sh\nfor i in 1 2 3 4 5; do echo \"$1 $i\"; sleep 0.05; done\n";
    write_script(&dir.join("fake-nslookup"), body)
}

fn write_script(script: &Path, body: &str) -> PathBuf {
    std::fs::write(script, body).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
    }
    script.to_path_buf()
}

/// Connects and consumes the `connected` greeting.
pub async fn connect_to(url: &str) -> Client {
    let (mut ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("connect");
    let greeting = next_frame(&mut ws).await;
    assert_eq!(greeting["type"], "connected", "{greeting}");
    ws
}

pub async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string()))
        .await
        .expect("send frame");
}

pub async fn send_text(ws: &mut Client, text: &str) {
    ws.send(Message::Text(text.to_string()))
        .await
        .expect("send text");
}

/// Next message that is not a ping/pong.
pub async fn next_message(ws: &mut Client) -> Message {
    loop {
        let msg = tokio::time::timeout(FRAME_TIMEOUT, ws.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("valid message");
        match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

pub async fn next_frame(ws: &mut Client) -> Value {
    match next_message(ws).await {
        Message::Text(text) => serde_json::from_str(&text).expect("JSON frame"),
        other => panic!("expected text frame, got {other:?}"),
    }
}

pub fn is_terminal(frame: &Value) -> bool {
    match frame["type"].as_str() {
        Some("complete" | "cancelled") => true,
        Some("error") => frame["complete"] == Value::Bool(true),
        _ => false,
    }
}

/// Collects frames for `id` up to and including its terminal frame.
pub async fn frames_until_terminal(ws: &mut Client, id: &str) -> Vec<Value> {
    let mut frames = Vec::new();
    loop {
        let frame = next_frame(ws).await;
        if frame["id"] != id {
            continue;
        }
        let done = is_terminal(&frame);
        frames.push(frame);
        if done {
            return frames;
        }
    }
}

/// Sends an echo sentinel and returns every frame received before it.
pub async fn frames_before_sentinel(ws: &mut Client, sentinel: &str) -> Vec<Value> {
    send_json(
        ws,
        serde_json::json!({"type": "echo", "data": sentinel}),
    )
    .await;
    let mut frames = Vec::new();
    loop {
        let frame = next_frame(ws).await;
        if frame["type"] == "echo" && frame["data"] == sentinel {
            return frames;
        }
        frames.push(frame);
    }
}

#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(unix)]
pub async fn wait_for_exit(pid: u32) {
    let deadline = tokio::time::Instant::now() + FRAME_TIMEOUT;
    while process_alive(pid) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "process {pid} still alive"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
