use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use symtree_core::config::{
    LoadedConfig, ResolvedServerConfig, ResolvedTreeConfig, load_config, resolve_server_config,
    resolve_tree_config,
};
use symtree_lsp::{LspPosition, SymbolClient, SymbolClientOptions};
use symtree_tree::{
    Direction, Level, MemoryBuffer, Notifier, Session, SessionOptions, TreeHandle, TreeKind,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tracing::{debug, warn};

#[derive(Debug, Parser)]
#[command(name = "symtree")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, clap::Args)]
struct CommonArgs {
    /// Optional path to a `symtree` config file (.toml or .json)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override workspace root (defaults to config or current directory)
    #[arg(long)]
    workspace_root: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the call hierarchy of the symbol at a position
    Calls {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long)]
        file: PathBuf,
        /// 1-based line of the symbol
        #[arg(long)]
        line: u32,
        /// 1-based column of the symbol
        #[arg(long)]
        character: u32,
        #[arg(long, value_enum, default_value = "incoming")]
        direction: CallDirection,
        /// Levels below the root to resolve
        #[arg(long, default_value_t = 1)]
        depth: usize,
    },
    /// Print the document symbol outline of a file
    Outline {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long)]
        file: PathBuf,
        /// Expand every branch instead of only the first level
        #[arg(long)]
        expand_all: bool,
    },
    /// Browse trees with line-oriented commands read from stdin
    Interactive {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long)]
        file: PathBuf,
        /// Start from the call hierarchy at this 1-based line (outline otherwise)
        #[arg(long, requires = "character")]
        line: Option<u32>,
        #[arg(long, requires = "line")]
        character: Option<u32>,
    },
    /// Print resolved configuration and check the language server command
    Doctor {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CallDirection {
    Incoming,
    Outgoing,
}

impl From<CallDirection> for Direction {
    fn from(direction: CallDirection) -> Self {
        match direction {
            CallDirection::Incoming => Direction::Incoming,
            CallDirection::Outgoing => Direction::Outgoing,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Calls {
            common,
            file,
            line,
            character,
            direction,
            depth,
        } => {
            let workspace = Workspace::load(&common)?;
            let position = one_based_position(line, character)?;
            let mut app = App::start(&workspace).await?;
            let result = async {
                let handle = app
                    .session
                    .open_call_tree(&file, position, direction.into())
                    .await?;
                app.session.expand_levels(handle, depth).await?;
                app.print(handle);
                Ok::<_, anyhow::Error>(())
            }
            .await;
            app.shutdown().await;
            result
        }
        Command::Outline {
            common,
            file,
            expand_all,
        } => {
            let workspace = Workspace::load(&common)?;
            let mut app = App::start(&workspace).await?;
            let result = async {
                let handle = app.session.open_outline(&file).await?;
                if expand_all {
                    app.session.expand_levels(handle, usize::MAX).await?;
                }
                app.print(handle);
                Ok::<_, anyhow::Error>(())
            }
            .await;
            app.shutdown().await;
            result
        }
        Command::Interactive {
            common,
            file,
            line,
            character,
        } => {
            let workspace = Workspace::load(&common)?;
            let start = match (line, character) {
                (Some(line), Some(character)) => Some(one_based_position(line, character)?),
                _ => None,
            };
            let mut app = App::start(&workspace).await?;
            let result = interactive(&mut app, &file, start).await;
            app.shutdown().await;
            result
        }
        Command::Doctor { common } => doctor(&common).await,
    }
}

struct Workspace {
    loaded: LoadedConfig,
    server: ResolvedServerConfig,
    tree: ResolvedTreeConfig,
}

impl Workspace {
    fn load(common: &CommonArgs) -> Result<Self> {
        let loaded = load_config(common.config.as_deref(), common.workspace_root.as_deref())?;
        let server = resolve_server_config(&loaded.config, &loaded.workspace_root);
        let tree = resolve_tree_config(&loaded.config)?;
        Ok(Self {
            loaded,
            server,
            tree,
        })
    }
}

struct App {
    session: Session,
    client: Arc<SymbolClient>,
    buffer: MemoryBuffer,
}

impl App {
    async fn start(workspace: &Workspace) -> Result<Self> {
        let client = SymbolClient::start(SymbolClientOptions::from(&workspace.server))
            .await
            .with_context(|| format!("failed to start `{}`", workspace.server.command))?;
        let client = Arc::new(client);
        let buffer = MemoryBuffer::new();

        let mut options = SessionOptions::from(&workspace.tree);
        options.render.workspace_root = Some(workspace.loaded.workspace_root.clone());
        let session = Session::new(
            client.clone(),
            Box::new(buffer.clone()),
            Box::new(StderrNotifier),
            options,
        );
        Ok(Self {
            session,
            client,
            buffer,
        })
    }

    fn print(&self, handle: TreeHandle) {
        match self.buffer.text(handle) {
            Some(text) => print!("{text}"),
            None => println!("(tree {handle} is hidden)"),
        }
    }

    async fn shutdown(self) {
        let App {
            session, client, ..
        } = self;
        drop(session);
        match Arc::try_unwrap(client) {
            Ok(client) => {
                if let Err(err) = client.shutdown().await {
                    warn!("language server shutdown failed: {err:#}");
                }
            }
            Err(_) => debug!("language server still referenced by in-flight requests"),
        }
    }
}

struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&mut self, level: Level, message: &str) {
        eprintln!("{level}: {message}");
    }
}

fn one_based_position(line: u32, character: u32) -> Result<LspPosition> {
    let line = line
        .checked_sub(1)
        .ok_or_else(|| anyhow!("--line is 1-based and must be at least 1"))?;
    let character = character
        .checked_sub(1)
        .ok_or_else(|| anyhow!("--character is 1-based and must be at least 1"))?;
    Ok(LspPosition { line, character })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplCommand {
    Expand(usize),
    Collapse(usize),
    Toggle(usize),
    Focus(usize),
    Switch,
    Jump(usize),
    Details(usize),
    Hover(usize),
    Outline,
    Hide,
    Show,
    Close,
    Dump,
    Help,
    Quit,
}

impl ReplCommand {
    fn parse(input: &str) -> Result<Option<Self>, String> {
        let words: Vec<&str> = input.split_whitespace().collect();
        let line = |arg: Option<&&str>| -> Result<usize, String> {
            let arg = arg.ok_or_else(|| "expected a line number".to_string())?;
            arg.parse::<usize>()
                .map_err(|_| format!("`{arg}` is not a line number"))
        };
        let command = match words.first().copied() {
            None => return Ok(None),
            Some("expand" | "e") => ReplCommand::Expand(line(words.get(1))?),
            Some("collapse" | "c") => ReplCommand::Collapse(line(words.get(1))?),
            Some("toggle" | "t") => ReplCommand::Toggle(line(words.get(1))?),
            Some("focus" | "f") => ReplCommand::Focus(line(words.get(1))?),
            Some("switch" | "s") => ReplCommand::Switch,
            Some("jump" | "j") => ReplCommand::Jump(line(words.get(1))?),
            Some("details" | "d") => ReplCommand::Details(line(words.get(1))?),
            Some("hover" | "k") => ReplCommand::Hover(line(words.get(1))?),
            Some("outline" | "o") => ReplCommand::Outline,
            Some("hide") => ReplCommand::Hide,
            Some("show") => ReplCommand::Show,
            Some("close") => ReplCommand::Close,
            Some("dump") => ReplCommand::Dump,
            Some("help" | "?") => ReplCommand::Help,
            Some("quit" | "q" | "exit") => ReplCommand::Quit,
            Some(other) => return Err(format!("unknown command `{other}` (try `help`)")),
        };
        Ok(Some(command))
    }
}

const HELP: &str = "\
commands:
  expand N | collapse N | toggle N   change the node on line N
  focus N                            open a new tree rooted at line N
  switch                             flip incoming/outgoing calls
  jump N | details N | hover N       inspect the symbol on line N
  outline                            open the outline of the file
  hide | show | close                manage the current tree
  dump                               print the node graph as JSON
  quit";

async fn interactive(app: &mut App, file: &Path, start: Option<LspPosition>) -> Result<()> {
    let mut current = match start {
        Some(position) => {
            app.session
                .open_call_tree(file, position, Direction::Incoming)
                .await?
        }
        None => app.session.open_outline(file).await?,
    };
    app.session.run_until_idle().await;
    app.print(current);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{current}> ");
        io::stdout().flush()?;
        let Some(input) = lines.next_line().await? else {
            break;
        };
        app.session.drain();

        let command = match ReplCommand::parse(&input) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                eprintln!("{message}");
                continue;
            }
        };

        // Failed operations are already reported through the notifier.
        let mut reprint = true;
        match command {
            ReplCommand::Expand(line) => {
                let _ = app.session.expand(current, line);
            }
            ReplCommand::Collapse(line) => {
                let _ = app.session.collapse(current, line);
            }
            ReplCommand::Toggle(line) => {
                let _ = app.session.toggle(current, line);
            }
            ReplCommand::Focus(line) => {
                if let Ok(handle) = app.session.focus(current, line) {
                    current = handle;
                }
            }
            ReplCommand::Switch => {
                if let Ok(direction) = app.session.switch_direction(current) {
                    println!("direction: {direction}");
                }
            }
            ReplCommand::Jump(line) => {
                reprint = false;
                if let Ok(location) = app.session.jump(current, line) {
                    println!(
                        "{}:{}:{}",
                        location.file_path,
                        location.range.start.line + 1,
                        location.range.start.character + 1
                    );
                }
            }
            ReplCommand::Details(line) => {
                reprint = false;
                if let Ok(details) = app.session.details(current, line) {
                    print!("{details}");
                }
            }
            ReplCommand::Hover(line) => {
                reprint = false;
                match app.session.hover(current, line).await {
                    Ok(Some(text)) => println!("{text}"),
                    Ok(None) => println!("(no hover)"),
                    Err(_) => {}
                }
            }
            ReplCommand::Outline => {
                if let Ok(handle) = app.session.open_outline(file).await {
                    current = handle;
                }
            }
            ReplCommand::Hide => {
                reprint = false;
                let _ = app.session.set_hidden(current, true);
            }
            ReplCommand::Show => {
                let _ = app.session.set_hidden(current, false);
            }
            ReplCommand::Close => {
                if app.session.close(current).is_ok() {
                    let next = app
                        .session
                        .current(TreeKind::Call)
                        .or_else(|| app.session.current(TreeKind::Outline));
                    match next {
                        Some(handle) => current = handle,
                        None => {
                            println!("no open trees");
                            break;
                        }
                    }
                }
            }
            ReplCommand::Dump => {
                reprint = false;
                if let Ok(dump) = app.session.dump(current) {
                    println!("{}", serde_json::to_string_pretty(&dump)?);
                }
            }
            ReplCommand::Help => {
                reprint = false;
                println!("{HELP}");
            }
            ReplCommand::Quit => break,
        }

        app.session.run_until_idle().await;
        if reprint {
            app.print(current);
        }
    }
    Ok(())
}

async fn doctor(common: &CommonArgs) -> Result<()> {
    let workspace = Workspace::load(common)?;
    let loaded = &workspace.loaded;
    let server = &workspace.server;
    let tree = &workspace.tree;

    println!("config_source: {:?}", loaded.source);
    println!("workspace_root: {}", loaded.workspace_root.display());
    println!("server.command: {}", server.command);
    println!("server.args: {:?}", server.args);
    println!("server.root_dir: {}", server.root_dir.display());
    println!("server.language_id: {:?}", server.language_id);
    println!(
        "server.timeouts_ms: initialize={} request={} warmup_delay={}",
        server.initialize_timeout_ms, server.request_timeout_ms, server.warmup_delay_ms
    );
    println!("tree.indent_guides: {}", tree.indent_guides);
    println!("tree.icons: {:?}", tree.icons);
    println!("tree.resolve_symbols: {}", tree.resolve_symbols);
    println!(
        "tree.glyphs: expanded={} collapsed={} guide={}",
        tree.expanded_glyph, tree.collapsed_glyph, tree.guide_glyph
    );

    println!("server_preflight: command={}", server.command);
    match TokioCommand::new(&server.command)
        .arg("--version")
        .output()
        .await
    {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if !stdout.is_empty() {
                println!("server_version: {stdout}");
            } else if !stderr.is_empty() {
                println!("server_version: {stderr}");
            } else {
                println!("server_version: <unknown>");
            }
            Ok(())
        }
        Err(err) => {
            eprintln!("doctor_error: command={} error={err}", server.command);
            eprintln!(
                "doctor_hint: Install the language server and ensure it is on PATH, or set server.command in .symtree/config.toml."
            );
            anyhow::bail!("language server command `{}` could not be run", server.command)
        }
    }
}
