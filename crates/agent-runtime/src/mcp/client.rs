//! Stdio MCP server connection
//!
//! One writer task owns the server's stdin and one reader task owns its stdout.
//! Requests register a oneshot slot under their JSON-RPC id and the reader routes
//! each response to its slot, so concurrent calls share the channel and a caller
//! that gives up never leaves a half-written or unread message behind.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::McpError;
use super::protocol::{
    Incoming, InitializeParams, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    McpToolDefinition, ToolCallParams, ToolCallResult, parse_line,
};

/// Environment variables a child server inherits from this process
const INHERITED_ENV: &[&str] = &["PATH", "HOME", "USER", "LANG", "TERM"];

/// Response slots by request id. `closed` is set once the reader has exited.
#[derive(Default)]
struct Pending {
    slots: HashMap<u64, oneshot::Sender<JsonRpcResponse>>,
    closed: bool,
}

type PendingMap = Arc<Mutex<Pending>>;

/// Talks to one MCP server
#[async_trait]
pub trait McpClient: Send + Sync {
    fn server_id(&self) -> &str;

    /// Tools the server advertises
    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError>;

    /// Invoke a tool. `Ok` carries the result even when the server flags it
    /// as an error.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError>;

    /// Stop the server
    async fn shutdown(&self) -> Result<(), McpError>;
}

/// Removes a request's slot when its caller stops waiting
struct SlotGuard {
    pending: PendingMap,
    id: u64,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .remove(&self.id);
    }
}

/// MCP server reached over a line-oriented byte stream
pub struct StdioMcpServer {
    server_id: String,
    next_id: AtomicU64,
    outbound: mpsc::UnboundedSender<String>,
    pending: PendingMap,
    request_timeout: Duration,
    child: tokio::sync::Mutex<Option<Child>>,
}

impl StdioMcpServer {
    /// Spawn a child process server and perform the initialize handshake.
    ///
    /// The child's environment is cleared except for a few system variables
    /// and the explicitly configured `env`.
    pub async fn spawn(
        server_id: &str,
        command: &[String],
        env: &HashMap<String, String>,
        request_timeout: Duration,
    ) -> Result<Self, McpError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| McpError::SpawnFailed("empty command".into()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        cmd.env_clear();
        for key in INHERITED_ENV {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        cmd.envs(env);

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::SpawnFailed(format!("failed to spawn '{program}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::SpawnFailed("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::SpawnFailed("failed to capture stdout".into()))?;

        if let Some(stderr) = child.stderr.take() {
            let id = server_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server_id = %id, "{line}");
                }
            });
        }

        let server = Self::connect(server_id, stdout, stdin, request_timeout);
        *server.child.lock().await = Some(child);

        server.initialize().await?;
        Ok(server)
    }

    /// Wrap an already open transport. Does not perform the handshake.
    pub fn connect<R, W>(server_id: &str, reader: R, writer: W, request_timeout: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending: PendingMap = Arc::default();
        let (outbound, rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(server_id.to_string(), writer, rx));
        tokio::spawn(read_loop(server_id.to_string(), reader, pending.clone()));

        Self {
            server_id: server_id.to_string(),
            next_id: AtomicU64::new(1),
            outbound,
            pending,
            request_timeout,
            child: tokio::sync::Mutex::new(None),
        }
    }

    /// Perform the MCP initialize handshake
    pub async fn initialize(&self) -> Result<(), McpError> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let response = self.send_request("initialize", Some(params)).await?;
        let server_info = response.get("serverInfo").cloned().unwrap_or_default();
        debug!(
            server_id = %self.server_id,
            server_info = %server_info,
            "MCP server initialized"
        );

        self.send_notification("notifications/initialized", None)
    }

    /// Send a request and wait for its response
    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if pending.closed {
                return Err(self.stdout_closed());
            }
            pending.slots.insert(id, tx);
        }
        let _slot = SlotGuard {
            pending: self.pending.clone(),
            id,
        };

        self.outbound
            .send(line)
            .map_err(|_| McpError::Transport(format!("server '{}' stdin closed", self.server_id)))?;

        let response = tokio::time::timeout(self.request_timeout, rx)
            .await
            .map_err(|_| McpError::Timeout)?
            .map_err(|_| self.stdout_closed())?;

        response.into_result()
    }

    fn stdout_closed(&self) -> McpError {
        McpError::Transport(format!("server '{}' closed stdout", self.server_id))
    }

    fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let mut line = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        line.push('\n');
        self.outbound
            .send(line)
            .map_err(|_| McpError::Transport(format!("server '{}' stdin closed", self.server_id)))
    }

    /// Requests still waiting for a response
    pub fn in_flight(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .len()
    }
}

async fn write_loop<W>(server_id: String, mut writer: W, mut rx: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!(server_id = %server_id, error = %e, "MCP server stdin write failed");
            break;
        }
    }
}

async fn read_loop<R>(server_id: String, reader: R, pending: PendingMap)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(server_id = %server_id, error = %e, "MCP server stdout read failed");
                break;
            }
        };

        match parse_line(&line) {
            Some(Incoming::Response(resp)) => {
                let slot = resp.id.and_then(|id| {
                    pending
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .slots
                        .remove(&id)
                });
                match slot {
                    Some(tx) => {
                        let _ = tx.send(resp);
                    }
                    None => debug!(server_id = %server_id, id = ?resp.id, "response with no waiting caller"),
                }
            }
            Some(Incoming::ServerMessage(method)) => {
                debug!(server_id = %server_id, method = %method, "ignoring server-initiated message");
            }
            None => debug!(server_id = %server_id, line = %line.trim(), "ignoring non-JSON-RPC line"),
        }
    }

    debug!(server_id = %server_id, "MCP server stdout closed");
    // Dropping the senders wakes every waiting caller with a transport error
    let mut pending = pending.lock().unwrap_or_else(PoisonError::into_inner);
    pending.closed = true;
    pending.slots.clear();
}

#[async_trait]
impl McpClient for StdioMcpServer {
    fn server_id(&self) -> &str {
        &self.server_id
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        let result = self.send_request("tools/list", None).await?;
        let tools = result.get("tools").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(tools)
            .map_err(|e| McpError::Protocol(format!("failed to parse tools list: {e}")))
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
        };
        let result = self
            .send_request("tools/call", Some(serde_json::to_value(&params)?))
            .await?;
        serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("malformed tools/call result: {e}")))
    }

    async fn shutdown(&self) -> Result<(), McpError> {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    /// The server side of an in-memory transport
    struct FakeServer {
        lines: tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>,
        out: WriteHalf<DuplexStream>,
    }

    impl FakeServer {
        async fn next_request(&mut self) -> Value {
            let line = self.lines.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn reply(&mut self, id: &Value, result: Value) {
            let msg = json!({"jsonrpc": "2.0", "id": id, "result": result});
            self.out.write_all(format!("{msg}\n").as_bytes()).await.unwrap();
        }
    }

    fn pair(timeout: Duration) -> (StdioMcpServer, FakeServer) {
        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_end);
        let (server_read, server_write) = tokio::io::split(server_end);
        let client = StdioMcpServer::connect("fake", client_read, client_write, timeout);
        let server = FakeServer {
            lines: BufReader::new(server_read).lines(),
            out: server_write,
        };
        (client, server)
    }

    #[tokio::test]
    async fn handshake_sends_initialize_then_initialized() {
        let (client, mut server) = pair(Duration::from_secs(5));

        let handshake = tokio::spawn(async move {
            client.initialize().await.unwrap();
            client
        });

        let init = server.next_request().await;
        assert_eq!(init["method"], "initialize");
        assert_eq!(init["params"]["protocolVersion"], "2024-11-05");
        server.reply(&init["id"], json!({"serverInfo": {"name": "fake"}})).await;

        let notif = server.next_request().await;
        assert_eq!(notif["method"], "notifications/initialized");
        assert!(notif.get("id").is_none());

        handshake.await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_calls_are_routed_by_id() {
        let (client, mut server) = pair(Duration::from_secs(5));
        let client = Arc::new(client);

        let a = {
            let c = client.clone();
            tokio::spawn(async move { c.call_tool("firecrawl_search", json!({"query": "a"})).await })
        };
        let first = server.next_request().await;
        let b = {
            let c = client.clone();
            tokio::spawn(async move { c.call_tool("firecrawl_search", json!({"query": "b"})).await })
        };
        let second = server.next_request().await;

        // Answer out of order
        server
            .reply(&second["id"], json!({"content": [{"type": "text", "text": "for b"}]}))
            .await;
        server
            .reply(&first["id"], json!({"content": [{"type": "text", "text": "for a"}]}))
            .await;

        assert_eq!(a.await.unwrap().unwrap().text(), "for a");
        assert_eq!(b.await.unwrap().unwrap().text(), "for b");
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn abandoned_call_leaves_channel_usable() {
        let (client, mut server) = pair(Duration::from_secs(5));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            client.call_tool("firecrawl_scrape", json!({"url": "https://example.com"})),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(client.in_flight(), 0);

        let stale = server.next_request().await;
        server.reply(&stale["id"], json!({"content": []})).await;

        let (res, _) = tokio::join!(client.list_tools(), async {
            let req = server.next_request().await;
            assert_eq!(req["method"], "tools/list");
            server
                .reply(&req["id"], json!({"tools": [{"name": "firecrawl_search", "inputSchema": {"type": "object"}}]}))
                .await;
        });
        assert_eq!(res.unwrap()[0].name, "firecrawl_search");
    }

    #[tokio::test]
    async fn closed_stdout_fails_waiting_calls() {
        let (client, server) = pair(Duration::from_secs(5));
        let call = tokio::spawn(async move { client.list_tools().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(server);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, McpError::Transport(_)));
    }

    #[tokio::test]
    async fn requests_after_stdout_closed_fail_fast() {
        let (client, server) = pair(Duration::from_secs(30));
        drop(server);
        while !client.pending.lock().unwrap().closed {
            tokio::task::yield_now().await;
        }

        let started = std::time::Instant::now();
        let err = client.call_tool("firecrawl_search", json!({"query": "x"})).await.unwrap_err();
        assert!(matches!(err, McpError::Transport(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (client, _server) = pair(Duration::from_millis(30));
        assert!(matches!(client.list_tools().await, Err(McpError::Timeout)));
    }

    #[tokio::test]
    async fn spawn_rejects_empty_command() {
        let err = StdioMcpServer::spawn("x", &[], &HashMap::new(), Duration::from_secs(1))
            .await
            .err();
        assert!(matches!(err, Some(McpError::SpawnFailed(_))));
    }
}
