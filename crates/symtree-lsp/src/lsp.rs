use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LspPosition {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LspRange {
    pub start: LspPosition,
    pub end: LspPosition,
}

impl LspRange {
    pub fn contains(&self, pos: LspPosition) -> bool {
        let after_start = (pos.line, pos.character) >= (self.start.line, self.start.character);
        let before_end = (pos.line, pos.character) <= (self.end.line, self.end.character);
        after_start && before_end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LspLocation {
    pub uri: String,
    pub range: LspRange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LspTextDocumentItem {
    pub uri: String,
    pub language_id: String,
    pub version: i32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LspTextDocumentIdentifier {
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LspDidOpenTextDocumentParams {
    pub text_document: LspTextDocumentItem,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LspVersionedTextDocumentIdentifier {
    pub uri: String,
    pub version: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LspTextDocumentContentChangeEvent {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LspDidChangeTextDocumentParams {
    pub text_document: LspVersionedTextDocumentIdentifier,
    pub content_changes: Vec<LspTextDocumentContentChangeEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LspTextDocumentPositionParams {
    pub text_document: LspTextDocumentIdentifier,
    pub position: LspPosition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LspDocumentSymbolParams {
    pub text_document: LspTextDocumentIdentifier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LspSymbolInformation {
    pub name: String,
    pub kind: u32,
    pub location: LspLocation,
    #[serde(default, rename = "containerName")]
    pub container_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LspDocumentSymbol {
    pub name: String,
    pub kind: u32,
    #[serde(default)]
    pub detail: Option<String>,
    pub range: LspRange,
    pub selection_range: LspRange,
    #[serde(default)]
    pub children: Vec<LspDocumentSymbol>,
}

#[derive(Debug)]
pub struct LspClientOptions {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub initialize_timeout: Duration,
    pub request_timeout: Duration,
    pub initialize_options: Option<Value>,
}

#[derive(Debug)]
struct LspState {
    next_id: i64,
    pending: HashMap<i64, oneshot::Sender<Value>>,
}

pub struct LspClient {
    stdin: Arc<Mutex<ChildStdin>>,
    state: Arc<Mutex<LspState>>,
    child: Child,
    root_uri: String,
    default_request_timeout: Duration,
}

impl LspClient {
    pub async fn start(options: LspClientOptions) -> Result<Self> {
        let mut command = Command::new(&options.command);
        command
            .args(&options.args)
            .current_dir(&options.cwd)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn LSP server: {}", options.command))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to capture LSP stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture LSP stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("failed to capture LSP stderr"))?;

        let client = Self {
            stdin: Arc::new(Mutex::new(stdin)),
            state: Arc::new(Mutex::new(LspState {
                next_id: 1,
                pending: HashMap::new(),
            })),
            child,
            root_uri: Url::from_directory_path(&options.cwd)
                .map_err(|_| anyhow!("failed to build rootUri for {:?}", options.cwd))?
                .to_string(),
            default_request_timeout: options.request_timeout,
        };

        client.spawn_stdout_reader(stdout);
        spawn_stderr_logger(stderr);

        client
            .initialize(options.initialize_timeout, options.initialize_options)
            .await
            .context("failed to initialize LSP server")?;

        Ok(client)
    }

    pub fn root_uri(&self) -> &str {
        &self.root_uri
    }

    pub async fn did_open(
        &self,
        path: &Path,
        language_id: &str,
        version: i32,
        text: String,
    ) -> Result<()> {
        let uri = path_to_uri(path)?;
        let params = LspDidOpenTextDocumentParams {
            text_document: LspTextDocumentItem {
                uri,
                language_id: language_id.to_string(),
                version,
                text,
            },
        };
        self.send_notification("textDocument/didOpen", &params)
            .await
    }

    pub async fn did_change(&self, path: &Path, version: i32, text: String) -> Result<()> {
        let uri = path_to_uri(path)?;
        let params = LspDidChangeTextDocumentParams {
            text_document: LspVersionedTextDocumentIdentifier { uri, version },
            content_changes: vec![LspTextDocumentContentChangeEvent { text }],
        };
        self.send_notification("textDocument/didChange", &params)
            .await
    }

    pub async fn document_symbols(&self, path: &Path) -> Result<Value> {
        let uri = path_to_uri(path)?;
        let params = LspDocumentSymbolParams {
            text_document: LspTextDocumentIdentifier { uri },
        };
        self.send_request("textDocument/documentSymbol", &params, None)
            .await
    }

    pub async fn hover(&self, uri: &str, position: LspPosition) -> Result<Value> {
        let params = LspTextDocumentPositionParams {
            text_document: LspTextDocumentIdentifier {
                uri: uri.to_string(),
            },
            position,
        };
        self.send_request("textDocument/hover", &params, None).await
    }

    pub async fn prepare_call_hierarchy(&self, path: &Path, position: LspPosition) -> Result<Value> {
        let uri = path_to_uri(path)?;
        let params = LspTextDocumentPositionParams {
            text_document: LspTextDocumentIdentifier { uri },
            position,
        };
        self.send_request("textDocument/prepareCallHierarchy", &params, None)
            .await
    }

    /// `item` must be the CallHierarchyItem exactly as the server produced it,
    /// including any opaque `data` field.
    pub async fn call_hierarchy_incoming_calls(&self, item: &Value) -> Result<Value> {
        let params = serde_json::json!({ "item": item });
        self.send_request("callHierarchy/incomingCalls", &params, None)
            .await
    }

    pub async fn call_hierarchy_outgoing_calls(&self, item: &Value) -> Result<Value> {
        let params = serde_json::json!({ "item": item });
        self.send_request("callHierarchy/outgoingCalls", &params, None)
            .await
    }

    pub async fn workspace_symbols(&self, query: &str) -> Result<Value> {
        let params = serde_json::json!({ "query": query });
        self.send_request("workspace/symbol", &params, None).await
    }

    pub async fn send_request<T: Serialize>(
        &self,
        method: &str,
        params: &T,
        request_timeout: Option<Duration>,
    ) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut state = self.state.lock().await;
            let id = state.next_id;
            state.next_id += 1;
            state.pending.insert(id, tx);
            id
        };

        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!("-> {method} id={id}");
        write_message(&self.stdin, &request).await?;

        let wait = request_timeout.unwrap_or(self.default_request_timeout);
        let response_value = match timeout(wait, rx).await {
            Ok(Ok(value)) => value,
            Ok(Err(_)) => return Err(anyhow!("LSP response channel closed: {method}")),
            Err(_) => {
                self.state.lock().await.pending.remove(&id);
                return Err(anyhow!("LSP request timed out: {method}"));
            }
        };

        if let Some(error) = response_value.get("error") {
            return Err(anyhow!("LSP error for {method}: {error}"));
        }

        Ok(response_value.get("result").cloned().unwrap_or(Value::Null))
    }

    pub async fn send_notification<T: Serialize>(&self, method: &str, params: &T) -> Result<()> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        write_message(&self.stdin, &request).await
    }

    pub async fn shutdown(mut self) -> Result<()> {
        // Best-effort graceful shutdown, then kill as fallback.
        let _ = self
            .send_request("shutdown", &Value::Null, Some(Duration::from_secs(2)))
            .await;
        let _ = self.send_notification("exit", &Value::Null).await;

        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
        Ok(())
    }

    async fn initialize(
        &self,
        initialize_timeout: Duration,
        initialize_options: Option<Value>,
    ) -> Result<()> {
        let mut params = serde_json::json!({
            "processId": std::process::id(),
            "rootUri": self.root_uri,
            "capabilities": {
                "textDocument": {
                    "documentSymbol": {
                        "hierarchicalDocumentSymbolSupport": true
                    },
                    "callHierarchy": {
                        "dynamicRegistration": false
                    },
                    "hover": {
                        "contentFormat": ["plaintext", "markdown"]
                    }
                },
                "workspace": {
                    "symbol": {
                        "dynamicRegistration": false
                    }
                }
            },
            "workspaceFolders": [
                { "uri": self.root_uri, "name": "workspace" }
            ]
        });
        if let Some(options) = initialize_options
            && let Some(obj) = params.as_object_mut()
        {
            obj.insert("initializationOptions".to_string(), options);
        }

        let _ = self
            .send_request("initialize", &params, Some(initialize_timeout))
            .await?;
        self.send_notification("initialized", &serde_json::json!({}))
            .await?;
        Ok(())
    }

    fn spawn_stdout_reader(&self, stdout: ChildStdout) {
        let pending = self.state.clone();
        let stdin = self.stdin.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            loop {
                match read_lsp_message(&mut reader).await {
                    Ok(Some(message)) => {
                        handle_lsp_message(message, pending.clone(), &stdin).await;
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!("failed to read LSP message: {err:#}");
                        break;
                    }
                }
            }
            // Server went away: fail every outstanding request instead of
            // letting callers wait for their timeouts.
            pending.lock().await.pending.clear();
        });
    }
}

async fn write_message(stdin: &Mutex<ChildStdin>, value: &Value) -> Result<()> {
    let body = serde_json::to_vec(value)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut stdin = stdin.lock().await;
    stdin.write_all(header.as_bytes()).await?;
    stdin.write_all(&body).await?;
    stdin.flush().await?;
    Ok(())
}

async fn handle_lsp_message(message: Value, state: Arc<Mutex<LspState>>, stdin: &Mutex<ChildStdin>) {
    if let Some(method) = message.get("method").and_then(|m| m.as_str()) {
        // Server-initiated request (registerCapability, workDoneProgress/create,
        // workspace/configuration, ...). Acknowledge with a null result.
        if let Some(id) = message.get("id") {
            let response = server_request_response(method, id.clone(), message.get("params"));
            if let Err(err) = write_message(stdin, &response).await {
                warn!("failed to answer server request {method}: {err:#}");
            }
        } else {
            debug!("<- notification {method}");
        }
        return;
    }

    let id = match message.get("id") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse::<i64>().ok(),
        _ => None,
    };

    if let Some(id) = id {
        let tx = {
            let mut guard = state.lock().await;
            guard.pending.remove(&id)
        };
        if let Some(tx) = tx {
            let _ = tx.send(message);
        } else {
            debug!("received response for unknown id: {id}");
        }
    }
}

fn server_request_response(method: &str, id: Value, params: Option<&Value>) -> Value {
    let result = if method == "workspace/configuration" {
        let count = params
            .and_then(|p| p.get("items"))
            .and_then(|items| items.as_array())
            .map(|items| items.len())
            .unwrap_or(0);
        Value::Array(vec![Value::Null; count])
    } else {
        Value::Null
    };
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

pub(crate) async fn read_lsp_message<R>(reader: &mut R) -> Result<Option<Value>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let line_trimmed = line.trim_end_matches(['\r', '\n']);
        if line_trimmed.is_empty() {
            break;
        }

        if let Some(value) = line_trimmed.strip_prefix("Content-Length:") {
            content_length = value.trim().parse::<usize>().ok();
        }
    }

    let Some(len) = content_length else {
        return Err(anyhow!("missing Content-Length header"));
    };

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    let value: Value = serde_json::from_slice(&buf)?;
    Ok(Some(value))
}

fn spawn_stderr_logger(stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => debug!(target: "lsp.stderr", "{}", line.trim_end()),
                Err(_) => break,
            }
        }
    });
}

pub fn path_to_uri(path: &Path) -> Result<String> {
    Url::from_file_path(path)
        .map_err(|_| anyhow!("failed to convert path to file URI: {path:?}"))
        .map(|u| u.to_string())
}

pub fn uri_to_path(uri: &str) -> Result<PathBuf> {
    let url = Url::parse(uri).with_context(|| format!("invalid URI: {uri}"))?;
    if url.scheme() != "file" {
        return Err(anyhow!("unsupported URI scheme: {}", url.scheme()));
    }
    url.to_file_path()
        .map_err(|_| anyhow!("failed to convert URI to path: {uri}"))
}
