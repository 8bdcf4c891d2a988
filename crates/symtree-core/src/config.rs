use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const DEFAULT_EXPANDED_GLYPH: char = '▼';
pub const DEFAULT_COLLAPSED_GLYPH: char = '▶';
pub const DEFAULT_GUIDE_GLYPH: char = '│';

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct SymtreeConfig {
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    #[serde(default)]
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub tree: Option<TreeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Command to start the language server.
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments passed to the server (include `--stdio` if the server needs it).
    #[serde(default)]
    pub args: Option<Vec<String>>,
    /// languageId used for textDocument/didOpen.
    /// If omitted, symtree guesses from the file extension.
    #[serde(default)]
    #[serde(alias = "languageId")]
    pub language_id: Option<String>,
    /// Optional root directory for the server (absolute or relative to `workspace_root`).
    #[serde(default)]
    #[serde(alias = "rootDir")]
    pub root_dir: Option<PathBuf>,
    #[serde(default)]
    pub initialize_timeout_ms: Option<u64>,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    /// Delay after didOpen before the first query; some servers index lazily.
    #[serde(default)]
    pub warmup_delay_ms: Option<u64>,
    /// Optional `initializationOptions` passed to the `initialize` request.
    #[serde(default)]
    #[serde(alias = "initializeOptions")]
    pub initialize_options: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct TreeConfig {
    /// Draw vertical guides for nested levels (default: true).
    #[serde(default)]
    #[serde(alias = "indentGuides")]
    pub indent_guides: Option<bool>,
    /// Icon set: `none`, `codicon` or `nerd` (default: `none`).
    #[serde(default)]
    pub icons: Option<String>,
    /// Disambiguate call hierarchy children through workspace/symbol.
    #[serde(default)]
    #[serde(alias = "resolveSymbols")]
    pub resolve_symbols: Option<bool>,
    #[serde(default)]
    pub expanded_glyph: Option<String>,
    #[serde(default)]
    pub collapsed_glyph: Option<String>,
    #[serde(default)]
    pub guide_glyph: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IconStyle {
    #[default]
    None,
    Codicon,
    Nerd,
}

pub fn icon_style_from_name(name: &str) -> Option<IconStyle> {
    let normalized = name.trim().to_ascii_lowercase().replace(['-', '_'], "");
    match normalized.as_str() {
        "" | "none" | "off" => Some(IconStyle::None),
        "codicon" | "codicons" => Some(IconStyle::Codicon),
        "nerd" | "nerdfont" | "nerdfonts" => Some(IconStyle::Nerd),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: SymtreeConfig,
    pub workspace_root: PathBuf,
    pub source: ConfigSource,
}

#[derive(Debug, Clone)]
pub enum ConfigSource {
    None,
    Path(PathBuf),
    Env(PathBuf),
    Workspace(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ResolvedServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub language_id: Option<String>,
    pub root_dir: PathBuf,
    pub initialize_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub warmup_delay_ms: u64,
    pub initialize_options: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTreeConfig {
    pub indent_guides: bool,
    pub icons: IconStyle,
    pub resolve_symbols: bool,
    pub expanded_glyph: char,
    pub collapsed_glyph: char,
    pub guide_glyph: char,
}

impl Default for ResolvedTreeConfig {
    fn default() -> Self {
        Self {
            indent_guides: true,
            icons: IconStyle::None,
            resolve_symbols: false,
            expanded_glyph: DEFAULT_EXPANDED_GLYPH,
            collapsed_glyph: DEFAULT_COLLAPSED_GLYPH,
            guide_glyph: DEFAULT_GUIDE_GLYPH,
        }
    }
}

pub fn load_config(
    cli_config_path: Option<&Path>,
    cli_workspace_root: Option<&Path>,
) -> Result<LoadedConfig> {
    if let Some(path) = cli_config_path {
        let config = read_config_file(path)?;
        let workspace_root =
            resolve_workspace_root(cli_workspace_root, config.workspace_root.as_deref())?;
        return Ok(LoadedConfig {
            config,
            workspace_root,
            source: ConfigSource::Path(path.to_path_buf()),
        });
    }

    if let Ok(path) = std::env::var("SYMTREE_CONFIG_PATH")
        && !path.trim().is_empty()
    {
        let path = PathBuf::from(path);
        let config = read_config_file(&path)?;
        let workspace_root =
            resolve_workspace_root(cli_workspace_root, config.workspace_root.as_deref())?;
        return Ok(LoadedConfig {
            config,
            workspace_root,
            source: ConfigSource::Env(path),
        });
    }

    let fallback_root = cli_workspace_root
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let workspace_root = fallback_root
        .canonicalize()
        .unwrap_or(fallback_root.clone());

    for candidate in workspace_config_candidates(&workspace_root) {
        if candidate.exists() {
            let config = read_config_file(&candidate)?;
            let effective_root =
                resolve_workspace_root(Some(&workspace_root), config.workspace_root.as_deref())?;
            return Ok(LoadedConfig {
                config,
                workspace_root: effective_root,
                source: ConfigSource::Workspace(candidate),
            });
        }
    }

    Ok(LoadedConfig {
        config: SymtreeConfig::default(),
        workspace_root,
        source: ConfigSource::None,
    })
}

fn resolve_workspace_root(cli: Option<&Path>, from_config: Option<&Path>) -> Result<PathBuf> {
    if let Some(cli) = cli {
        return cli
            .canonicalize()
            .with_context(|| format!("failed to canonicalize workspace_root: {cli:?}"));
    }
    if let Some(cfg) = from_config {
        return cfg
            .canonicalize()
            .with_context(|| format!("failed to canonicalize workspace_root: {cfg:?}"));
    }
    let cwd = std::env::current_dir().context("failed to get current_dir")?;
    Ok(cwd.canonicalize().unwrap_or(cwd))
}

fn workspace_config_candidates(workspace_root: &Path) -> Vec<PathBuf> {
    vec![
        workspace_root.join(".symtree").join("config.toml"),
        workspace_root.join(".symtree").join("config.json"),
        workspace_root.join("symtree.toml"),
        workspace_root.join("symtree.json"),
    ]
}

fn read_config_file(path: &Path) -> Result<SymtreeConfig> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read config file: {path:?}"))?;
    let ext = path.extension().and_then(OsStr::to_str).unwrap_or("");

    if ext.eq_ignore_ascii_case("toml") {
        let s = String::from_utf8(bytes).context("config file is not valid UTF-8")?;
        let cfg: SymtreeConfig = toml::from_str(&s).context("failed to parse TOML config")?;
        return Ok(cfg);
    }
    if ext.eq_ignore_ascii_case("json") {
        let cfg: SymtreeConfig =
            serde_json::from_slice(&bytes).context("failed to parse JSON config")?;
        return Ok(cfg);
    }

    Err(anyhow!(
        "unsupported config extension (expected .toml or .json): {path:?}"
    ))
}

pub fn resolve_server_config(config: &SymtreeConfig, workspace_root: &Path) -> ResolvedServerConfig {
    let server = config.server.clone().unwrap_or_default();
    let workspace_root = workspace_root
        .canonicalize()
        .unwrap_or_else(|_| workspace_root.to_path_buf());

    ResolvedServerConfig {
        command: server
            .command
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "rust-analyzer".to_string()),
        args: server.args.unwrap_or_default(),
        language_id: server
            .language_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        root_dir: resolve_root_dir(&workspace_root, server.root_dir.as_deref()),
        initialize_timeout_ms: server.initialize_timeout_ms.unwrap_or(10_000),
        request_timeout_ms: server.request_timeout_ms.unwrap_or(30_000),
        warmup_delay_ms: server.warmup_delay_ms.unwrap_or(0),
        initialize_options: server.initialize_options,
    }
}

pub fn resolve_tree_config(config: &SymtreeConfig) -> Result<ResolvedTreeConfig> {
    let tree = config.tree.clone().unwrap_or_default();
    let defaults = ResolvedTreeConfig::default();

    let icons = match tree.icons.as_deref() {
        None => defaults.icons,
        Some(name) => icon_style_from_name(name)
            .ok_or_else(|| anyhow!("unknown icon style: {name:?} (expected none, codicon or nerd)"))?,
    };

    Ok(ResolvedTreeConfig {
        indent_guides: tree.indent_guides.unwrap_or(defaults.indent_guides),
        icons,
        resolve_symbols: tree.resolve_symbols.unwrap_or(defaults.resolve_symbols),
        expanded_glyph: parse_glyph("expanded_glyph", tree.expanded_glyph.as_deref())?
            .unwrap_or(defaults.expanded_glyph),
        collapsed_glyph: parse_glyph("collapsed_glyph", tree.collapsed_glyph.as_deref())?
            .unwrap_or(defaults.collapsed_glyph),
        guide_glyph: parse_glyph("guide_glyph", tree.guide_glyph.as_deref())?
            .unwrap_or(defaults.guide_glyph),
    })
}

// Glyphs occupy exactly one column so indent units stay two columns wide.
fn parse_glyph(field: &str, value: Option<&str>) -> Result<Option<char>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if !c.is_whitespace() => Ok(Some(c)),
        _ => Err(anyhow!(
            "{field} must be a single non-whitespace character, got {value:?}"
        )),
    }
}

fn resolve_root_dir(workspace_root: &Path, root_dir: Option<&Path>) -> PathBuf {
    let resolved = match root_dir {
        None => workspace_root.to_path_buf(),
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => workspace_root.join(p),
    };
    resolved.canonicalize().unwrap_or(resolved)
}

/// Best-effort languageId for didOpen when the config does not name one.
pub fn language_id_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(OsStr::to_str)
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "rs" => "rust",
        "py" | "pyi" => "python",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "go" => "go",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => "cpp",
        "cs" => "csharp",
        "java" => "java",
        "lua" => "lua",
        "rb" => "ruby",
        "zig" => "zig",
        _ => "plaintext",
    }
}
