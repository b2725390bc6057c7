//! IPC between CLI and daemon
//!
//! Newline-delimited JSON over a Unix socket: one request line, one response
//! line. A connection may carry any number of exchanges.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use settle_core::{Watcher, WatcherId};
use settle_watcher::WatcherStatus;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Status,
    RunNow { id: WatcherId },
    /// Create or replace
    Upsert { watcher: Watcher },
    Delete { id: WatcherId },
    SetEnabled { id: WatcherId, enabled: bool },
    /// Re-read the watcher store
    Reload,
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Status(DaemonStatus),
    Started { started: bool },
    Watcher { watcher: Watcher },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub active_executions: usize,
    pub watchers: Vec<WatcherStatus>,
}

/// IPC client for communicating with the daemon
pub struct IpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl IpcClient {
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .with_context(|| format!("Failed to connect to daemon at {}", socket_path.display()))?;
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer: write,
        })
    }

    pub async fn request(&mut self, request: &Request) -> Result<Response> {
        let mut line = serde_json::to_string(request).context("Failed to encode request")?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;

        let mut reply = String::new();
        if self.reader.read_line(&mut reply).await? == 0 {
            bail!("Daemon closed the connection");
        }
        serde_json::from_str(reply.trim_end()).context("Failed to decode daemon response")
    }

    /// Send a request and turn `Response::Error` into an error
    pub async fn call(&mut self, request: &Request) -> Result<Response> {
        match self.request(request).await? {
            Response::Error { message } => bail!("Daemon error: {}", message),
            response => Ok(response),
        }
    }
}

/// Bind the daemon socket, replacing a leftover socket file
pub fn bind(socket_path: &Path) -> Result<UnixListener> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path).with_context(|| {
            format!("Failed to remove stale socket {}", socket_path.display())
        })?;
    }
    UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind {}", socket_path.display()))
}

/// Answer requests on one connection until the client hangs up
pub async fn serve_connection<F>(stream: UnixStream, mut handle: F) -> Result<()>
where
    F: FnMut(Request) -> Response,
{
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle(request),
            Err(e) => Response::Error {
                message: format!("malformed request: {}", e),
            },
        };

        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        write.write_all(encoded.as_bytes()).await?;
    }
    Ok(())
}
