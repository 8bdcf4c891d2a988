use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use symtree_core::config::{ResolvedServerConfig, language_id_for_path};
use symtree_core::hashing::sha256_hex;
use tokio::fs;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::debug;

use crate::lsp::{LspClient, LspClientOptions, LspPosition, path_to_uri};
use crate::symbol::{
    CallHierarchyItem, CallMatch, OutlineSymbol, WorkspaceSymbolMatch, hover_to_text,
    parse_document_symbols, parse_incoming_calls, parse_outgoing_calls, parse_prepared_items,
    parse_workspace_symbols,
};

#[derive(Debug, Clone)]
pub struct SymbolClientOptions {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub language_id: Option<String>,
    pub initialize_timeout: Duration,
    pub request_timeout: Duration,
    pub warmup_delay: Duration,
    pub initialize_options: Option<Value>,
}

impl From<&ResolvedServerConfig> for SymbolClientOptions {
    fn from(server: &ResolvedServerConfig) -> Self {
        Self {
            command: server.command.clone(),
            args: server.args.clone(),
            cwd: server.root_dir.clone(),
            language_id: server.language_id.clone(),
            initialize_timeout: Duration::from_millis(server.initialize_timeout_ms),
            request_timeout: Duration::from_millis(server.request_timeout_ms),
            warmup_delay: Duration::from_millis(server.warmup_delay_ms),
            initialize_options: server.initialize_options.clone(),
        }
    }
}

/// Language server client specialised to the requests a symbol tree needs.
///
/// Files are opened (or re-synced when their content hash changes) before
/// every file-scoped request.
pub struct SymbolClient {
    lsp: LspClient,
    open_files: Mutex<HashMap<PathBuf, OpenFileState>>,
    language_id: Option<String>,
    warmup_delay: Duration,
}

#[derive(Debug, Clone)]
struct OpenFileState {
    version: i32,
    last_sha256: String,
}

impl SymbolClient {
    pub async fn start(options: SymbolClientOptions) -> Result<Self> {
        if options.command.trim().is_empty() {
            return Err(anyhow!("LSP command must not be empty"));
        }

        let lsp = LspClient::start(LspClientOptions {
            command: options.command,
            args: options.args,
            cwd: options.cwd,
            initialize_timeout: options.initialize_timeout,
            request_timeout: options.request_timeout,
            initialize_options: options.initialize_options,
        })
        .await?;

        Ok(Self {
            lsp,
            open_files: Mutex::new(HashMap::new()),
            language_id: options.language_id,
            warmup_delay: options.warmup_delay,
        })
    }

    pub async fn shutdown(self) -> Result<()> {
        self.lsp.shutdown().await
    }

    pub fn root_uri(&self) -> &str {
        self.lsp.root_uri()
    }

    pub async fn prepare_call_hierarchy(
        &self,
        file_path: &Path,
        position: LspPosition,
    ) -> Result<Vec<CallHierarchyItem>> {
        let abs = self.open_or_sync(file_path).await?;
        let raw = self.prepare_call_hierarchy_with_retry(&abs, position).await?;
        parse_prepared_items(raw)
    }

    pub async fn incoming_calls(&self, item: &CallHierarchyItem) -> Result<Vec<CallMatch>> {
        let raw = self.lsp.call_hierarchy_incoming_calls(&item.raw).await?;
        parse_incoming_calls(raw)
    }

    pub async fn outgoing_calls(&self, item: &CallHierarchyItem) -> Result<Vec<CallMatch>> {
        let raw = self.lsp.call_hierarchy_outgoing_calls(&item.raw).await?;
        parse_outgoing_calls(raw)
    }

    pub async fn document_symbols(&self, file_path: &Path) -> Result<Vec<OutlineSymbol>> {
        let abs = self.open_or_sync(file_path).await?;
        self.document_symbols_with_retry(&abs).await
    }

    pub async fn workspace_symbols(&self, query: &str) -> Result<Vec<WorkspaceSymbolMatch>> {
        let raw = self.lsp.workspace_symbols(query).await?;
        parse_workspace_symbols(raw)
    }

    pub async fn hover(&self, uri: &str, position: LspPosition) -> Result<Option<String>> {
        let raw = self.lsp.hover(uri, position).await?;
        Ok(hover_to_text(&raw))
    }

    async fn open_or_sync(&self, file_path: &Path) -> Result<PathBuf> {
        let abs = file_path
            .canonicalize()
            .with_context(|| format!("failed to canonicalize file path: {file_path:?}"))?;
        let content = fs::read(&abs)
            .await
            .with_context(|| format!("failed to read file: {abs:?}"))?;
        let hash = sha256_hex(&content);
        let text = String::from_utf8(content).context("file is not valid UTF-8")?;

        let mut open = self.open_files.lock().await;
        match open.get_mut(&abs) {
            None => {
                let language_id = self
                    .language_id
                    .clone()
                    .unwrap_or_else(|| language_id_for_path(&abs).to_string());
                debug!("didOpen {:?} languageId={}", abs, language_id);
                self.lsp.did_open(&abs, &language_id, 1, text).await?;
                open.insert(
                    abs.clone(),
                    OpenFileState {
                        version: 1,
                        last_sha256: hash,
                    },
                );
                if !self.warmup_delay.is_zero() {
                    tokio::time::sleep(self.warmup_delay).await;
                }
            }
            Some(state) => {
                if state.last_sha256 != hash {
                    state.version += 1;
                    state.last_sha256 = hash;
                    debug!("didChange {:?} version={}", abs, state.version);
                    self.lsp.did_change(&abs, state.version, text).await?;
                }
            }
        }
        Ok(abs)
    }

    async fn document_symbols_with_retry(&self, file_path: &Path) -> Result<Vec<OutlineSymbol>> {
        let uri = path_to_uri(file_path)?;
        let mut last_err: Option<anyhow::Error> = None;
        let mut delay_ms = 200u64;
        for _ in 0..5 {
            match self.lsp.document_symbols(file_path).await {
                Ok(value) => match parse_document_symbols(value, &uri) {
                    Ok(symbols) if !symbols.is_empty() => return Ok(symbols),
                    // Servers that are still indexing answer with an empty list.
                    Ok(_) => {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms = (delay_ms + 200).min(1_000);
                    }
                    Err(e) => last_err = Some(e),
                },
                Err(e) => last_err = Some(e),
            }
        }

        if let Some(err) = last_err {
            return Err(err);
        }
        Ok(Vec::new())
    }

    async fn prepare_call_hierarchy_with_retry(
        &self,
        file_path: &Path,
        position: LspPosition,
    ) -> Result<Value> {
        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..3 {
            match self.lsp.prepare_call_hierarchy(file_path, position).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(200 * (attempt + 1) as u64)).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("prepareCallHierarchy failed")))
    }
}
