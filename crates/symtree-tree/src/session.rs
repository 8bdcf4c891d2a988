use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};
use symtree_core::config::ResolvedTreeConfig;
use symtree_lsp::{
    DocumentSymbolItem, LspPosition, LspRange, ResolvedLocation, symbol_kind_name, uri_to_path,
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::TreeError;
use crate::marshal::{FILE_KIND, RenderOptions, Rendered, render};
use crate::node::{Direction, Node, NodePath, SymbolPayload, TreeKind};
use crate::registry::Registry;
use crate::resolver::{HierarchySource, check_direction, resolve_children};
use crate::sink::{BufferSink, Level, Notifier};
use crate::tree::{SourceLine, Tree, TreeHandle};

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub render: RenderOptions,
    /// Run the `workspace/symbol` disambiguation pass on resolved children.
    pub resolve_symbols: bool,
}

impl From<&ResolvedTreeConfig> for SessionOptions {
    fn from(config: &ResolvedTreeConfig) -> Self {
        Self {
            render: RenderOptions::from(config),
            resolve_symbols: config.resolve_symbols,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandOutcome {
    /// Cached children were shown again; no request was sent.
    Expanded,
    AlreadyExpanded,
    /// A resolution request was issued.
    Requested,
    /// A request for this node is already in flight.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Grafted,
    Failed,
    /// The tree, node or request it was issued for is gone.
    Stale,
}

/// Everything an in-flight resolution is bound to.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub id: u64,
    pub handle: TreeHandle,
    pub generation: u64,
    pub path: NodePath,
    pub payload: SymbolPayload,
    pub depth: usize,
    pub direction: Direction,
}

#[derive(Debug)]
pub struct Completion {
    pub ticket: Ticket,
    pub result: Result<Vec<Node>, TreeError>,
}

/// Owns every tree and applies resolved children back onto them.
///
/// All mutation goes through `&mut self`. Server requests run on spawned
/// tasks and come back as [`Completion`]s, which are grafted only if the
/// node they were issued for is still the same node in the same tree.
pub struct Session {
    registry: Registry,
    source: Arc<dyn HierarchySource>,
    sink: Box<dyn BufferSink>,
    notifier: Box<dyn Notifier>,
    options: SessionOptions,
    pending: HashMap<(TreeHandle, NodePath), u64>,
    next_ticket: u64,
    in_flight: usize,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

impl Session {
    pub fn new(
        source: Arc<dyn HierarchySource>,
        sink: Box<dyn BufferSink>,
        notifier: Box<dyn Notifier>,
        options: SessionOptions,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            registry: Registry::new(),
            source,
            sink,
            notifier,
            options,
            pending: HashMap::new(),
            next_ticket: 0,
            in_flight: 0,
            completions_tx,
            completions_rx,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn tree(&self, handle: TreeHandle) -> Option<&Tree> {
        self.registry.tree(handle)
    }

    pub fn current(&self, kind: TreeKind) -> Option<TreeHandle> {
        self.registry.get(kind)
    }

    /// Number of nodes waiting on a server response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Seeds a call tree from the first prepared item at `position` and
    /// requests the root's children.
    pub async fn open_call_tree(
        &mut self,
        file_path: &Path,
        position: LspPosition,
        direction: Direction,
    ) -> Result<TreeHandle, TreeError> {
        let result = self.open_call_tree_inner(file_path, position, direction).await;
        self.reported(result)
    }

    async fn open_call_tree_inner(
        &mut self,
        file_path: &Path,
        position: LspPosition,
        direction: Direction,
    ) -> Result<TreeHandle, TreeError> {
        if direction.kind() != TreeKind::Call {
            return Err(TreeError::InvalidOperation(format!(
                "{direction} is not a call hierarchy direction"
            )));
        }
        let source = Arc::clone(&self.source);
        let items = source
            .prepare_call_hierarchy(file_path, position)
            .await
            .map_err(|err| TreeError::Resolution {
                symbol: format!(
                    "{}:{}:{}",
                    file_path.display(),
                    position.line + 1,
                    position.character + 1
                ),
                direction,
                message: format!("{err:#}"),
            })?;
        let Some(item) = items.into_iter().next() else {
            return Err(TreeError::NotFound(format!(
                "no call hierarchy item at {}:{}:{}",
                file_path.display(),
                position.line + 1,
                position.character + 1
            )));
        };

        debug!("opening {direction} call tree for `{}`", item.name);
        let root = Node::new(SymbolPayload::Call(item), 0);
        let handle = self.registry.put(Tree::new(root, direction));
        self.commit(handle);
        self.request(handle, Vec::new())?;
        Ok(handle)
    }

    /// Builds a whole outline tree from one `textDocument/documentSymbol`
    /// response, under a synthetic `File` root.
    pub async fn open_outline(&mut self, file_path: &Path) -> Result<TreeHandle, TreeError> {
        let result = self.open_outline_inner(file_path).await;
        self.reported(result)
    }

    async fn open_outline_inner(&mut self, file_path: &Path) -> Result<TreeHandle, TreeError> {
        let source = Arc::clone(&self.source);
        let symbols = source
            .document_symbols(file_path)
            .await
            .map_err(|err| TreeError::Resolution {
                symbol: file_path.display().to_string(),
                direction: Direction::Outline,
                message: format!("{err:#}"),
            })?;
        let (Some(first), Some(last)) = (symbols.first(), symbols.last()) else {
            return Err(TreeError::NotFound(format!(
                "no document symbols in {}",
                file_path.display()
            )));
        };

        let span = LspRange {
            start: first.item.range.start,
            end: last.item.range.end,
        };
        let file_item = DocumentSymbolItem {
            name: file_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file_path.display().to_string()),
            kind: FILE_KIND,
            detail: None,
            uri: first.item.uri.clone(),
            range: span,
            selection_range: span,
        };

        let children = symbols
            .into_iter()
            .map(|symbol| Node::from_outline(symbol, 1))
            .collect();
        let mut root = Node::new(SymbolPayload::Document(file_item), 0);
        root.graft(children);

        let handle = self.registry.put(Tree::new(root, Direction::Outline));
        self.commit(handle);
        Ok(handle)
    }

    /// Shows the most recent tree of `kind` again.
    pub fn reopen(&mut self, kind: TreeKind) -> Result<TreeHandle, TreeError> {
        let result = self
            .registry
            .get(kind)
            .ok_or_else(|| TreeError::NotFound(format!("no open {kind:?} tree")))
            .and_then(|handle| self.set_hidden_inner(handle, false).map(|()| handle));
        self.reported(result)
    }

    pub fn expand(&mut self, handle: TreeHandle, line: usize) -> Result<ExpandOutcome, TreeError> {
        let result = self
            .path_for(handle, line)
            .and_then(|path| self.expand_path(handle, path));
        self.reported(result)
    }

    fn expand_path(
        &mut self,
        handle: TreeHandle,
        path: NodePath,
    ) -> Result<ExpandOutcome, TreeError> {
        if self.pending.contains_key(&(handle, path.clone())) {
            return Ok(ExpandOutcome::Pending);
        }
        let node = self.node_mut(handle, &path)?;
        if node.is_expanded() {
            return Ok(ExpandOutcome::AlreadyExpanded);
        }
        if node.expand_cached() {
            self.commit(handle);
            return Ok(ExpandOutcome::Expanded);
        }
        self.request(handle, path)?;
        Ok(ExpandOutcome::Requested)
    }

    /// Hides a node's children without dropping them. Collapsing a node
    /// with a request in flight cancels the request instead.
    pub fn collapse(&mut self, handle: TreeHandle, line: usize) -> Result<bool, TreeError> {
        let result = self.path_for(handle, line).and_then(|path| {
            if self.pending.remove(&(handle, path.clone())).is_some() {
                debug!("cancelled pending resolution for {handle} {path:?}");
                return Ok(false);
            }
            let node = self.node_mut(handle, &path)?;
            // Resolved leaves have nothing to hide and could not be re-expanded.
            if !node.is_expanded() || node.is_resolved_leaf() {
                return Ok(false);
            }
            node.collapse();
            self.commit(handle);
            Ok(true)
        });
        self.reported(result)
    }

    pub fn toggle(&mut self, handle: TreeHandle, line: usize) -> Result<(), TreeError> {
        let expanded = self
            .path_for(handle, line)
            .and_then(|path| self.node_mut(handle, &path).map(|node| node.is_expanded()));
        if self.reported(expanded)? {
            self.collapse(handle, line).map(|_| ())
        } else {
            self.expand(handle, line).map(|_| ())
        }
    }

    /// Opens a new tree rooted at a copy of the node on `line`. The source
    /// tree is left untouched.
    pub fn focus(&mut self, handle: TreeHandle, line: usize) -> Result<TreeHandle, TreeError> {
        let result = self.focus_inner(handle, line);
        self.reported(result)
    }

    fn focus_inner(&mut self, handle: TreeHandle, line: usize) -> Result<TreeHandle, TreeError> {
        let path = self.path_for(handle, line)?;
        let tree = self.tree_ref(handle)?;
        let direction = tree.direction();
        let root = tree
            .node(&path)
            .ok_or_else(|| TreeError::NotFound(format!("node {path:?} in tree {handle}")))?
            .rerooted();
        let needs_children = !root.is_expanded() && root.is_leaf();

        let focused = self.registry.put(Tree::new(root, direction));
        self.commit(focused);
        if needs_children && direction.kind() == TreeKind::Call {
            self.request(focused, Vec::new())?;
        }
        Ok(focused)
    }

    /// Flips a call tree between incoming and outgoing, starting over from
    /// its root.
    pub fn switch_direction(&mut self, handle: TreeHandle) -> Result<Direction, TreeError> {
        let result = self.switch_direction_inner(handle);
        self.reported(result)
    }

    fn switch_direction_inner(&mut self, handle: TreeHandle) -> Result<Direction, TreeError> {
        let tree = self
            .registry
            .tree_mut(handle)
            .ok_or_else(|| TreeError::NotFound(format!("tree {handle}")))?;
        let Some(direction) = tree.switch_direction() else {
            return Err(TreeError::InvalidOperation(format!(
                "tree {handle} is an outline and has no call direction"
            )));
        };
        self.pending.retain(|(h, _), _| *h != handle);
        self.commit(handle);
        self.request(handle, Vec::new())?;
        Ok(direction)
    }

    pub fn close(&mut self, handle: TreeHandle) -> Result<(), TreeError> {
        let result = self.registry.close(handle).map(|_| ());
        if result.is_ok() {
            self.pending.retain(|(h, _), _| *h != handle);
            self.sink.clear(handle);
        }
        self.reported(result)
    }

    pub fn set_hidden(&mut self, handle: TreeHandle, hidden: bool) -> Result<(), TreeError> {
        let result = self.set_hidden_inner(handle, hidden);
        self.reported(result)
    }

    fn set_hidden_inner(&mut self, handle: TreeHandle, hidden: bool) -> Result<(), TreeError> {
        self.registry.set_hidden(handle, hidden)?;
        if hidden {
            self.sink.clear(handle);
        } else {
            self.commit(handle);
        }
        Ok(())
    }

    pub fn node_at(&self, handle: TreeHandle, line: usize) -> Option<&Node> {
        self.registry.tree(handle)?.node_at(line)
    }

    pub fn source_line_lookup(&self, handle: TreeHandle, file_line: u32) -> Option<&SourceLine> {
        self.registry.tree(handle)?.source_line_lookup(file_line)
    }

    /// The current render of a tree, without committing it anywhere.
    pub fn rendered(&self, handle: TreeHandle) -> Option<Rendered> {
        self.registry
            .tree(handle)
            .map(|tree| render(tree, &self.options.render))
    }

    /// Where the symbol on `line` is declared.
    pub fn jump(
        &mut self,
        handle: TreeHandle,
        line: usize,
    ) -> Result<ResolvedLocation, TreeError> {
        let result = self.node_on(handle, line).and_then(|node| {
            let payload = node.payload();
            let location = payload.location();
            let file_path = uri_to_path(&location.uri).map_err(|err| {
                TreeError::InvalidOperation(format!(
                    "`{}` has no file location: {err}",
                    payload.name()
                ))
            })?;
            Ok(ResolvedLocation {
                file_path: file_path.to_string_lossy().into_owned(),
                uri: location.uri,
                range: location.range,
            })
        });
        self.reported(result)
    }

    pub fn details(&mut self, handle: TreeHandle, line: usize) -> Result<String, TreeError> {
        let result = self.node_on(handle, line).map(describe);
        self.reported(result)
    }

    /// `textDocument/hover` at the selection start of the symbol on `line`.
    pub async fn hover(
        &mut self,
        handle: TreeHandle,
        line: usize,
    ) -> Result<Option<String>, TreeError> {
        let target = self.node_on(handle, line).map(|node| {
            let payload = node.payload();
            (payload.uri().to_string(), payload.selection_range().start)
        });
        let (uri, position) = self.reported(target)?;
        let source = Arc::clone(&self.source);
        let result = source
            .hover(&uri, position)
            .await
            .map_err(|err| TreeError::NotFound(format!("hover failed: {err:#}")));
        self.reported(result)
    }

    /// Debug snapshot of a tree's node graph.
    pub fn dump(&mut self, handle: TreeHandle) -> Result<Value, TreeError> {
        let result = self.tree_ref(handle).map(|tree| {
            json!({
                "handle": tree.handle().get(),
                "direction": tree.direction(),
                "generation": tree.generation(),
                "hidden": tree.is_hidden(),
                "lines": tree.line_count(),
                "root": serde_json::to_value(tree.root()).unwrap_or_default(),
            })
        });
        self.reported(result)
    }

    /// Expands every visible node down to `levels` levels below the root,
    /// waiting for each level to resolve before starting the next.
    pub async fn expand_levels(
        &mut self,
        handle: TreeHandle,
        levels: usize,
    ) -> Result<(), TreeError> {
        self.run_until_idle().await;
        for depth in 1..levels {
            let tree = self.tree_ref(handle)?;
            let paths: Vec<NodePath> = tree
                .line_map()
                .iter()
                .filter(|path| {
                    tree.node(path)
                        .is_some_and(|node| node.depth() == depth && !node.is_expanded())
                })
                .cloned()
                .collect();
            if paths.is_empty() {
                break;
            }
            for path in paths {
                let result = self.expand_path(handle, path);
                // Failures are reported; the remaining nodes still expand.
                let _ = self.reported(result);
            }
            self.run_until_idle().await;
        }
        Ok(())
    }

    /// Waits for the next finished resolution. `None` once nothing is in flight.
    pub async fn next_completion(&mut self) -> Option<Completion> {
        if self.in_flight == 0 {
            return None;
        }
        let completion = self.completions_rx.recv().await?;
        self.in_flight -= 1;
        Some(completion)
    }

    /// Grafts a finished resolution if its node is still live.
    pub fn apply(&mut self, completion: Completion) -> ApplyOutcome {
        let Completion { ticket, result } = completion;
        let key = (ticket.handle, ticket.path.clone());
        if self.pending.get(&key) != Some(&ticket.id) {
            debug!(
                "dropping superseded resolution #{} for {}",
                ticket.id, ticket.handle
            );
            return ApplyOutcome::Stale;
        }
        self.pending.remove(&key);

        let Some(tree) = self.registry.tree_mut(ticket.handle) else {
            return ApplyOutcome::Stale;
        };
        if tree.generation() != ticket.generation {
            return ApplyOutcome::Stale;
        }
        let Some(node) = tree.node_mut(&ticket.path) else {
            return ApplyOutcome::Stale;
        };
        if node.payload() != &ticket.payload || node.is_expanded() {
            return ApplyOutcome::Stale;
        }

        match result {
            Ok(children) => {
                node.graft(children);
                self.commit(ticket.handle);
                ApplyOutcome::Grafted
            }
            Err(err) => {
                self.report(&err);
                ApplyOutcome::Failed
            }
        }
    }

    /// Applies every completion that has already arrived, without waiting.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completions_rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            self.apply(completion);
            applied += 1;
        }
        applied
    }

    pub async fn run_until_idle(&mut self) {
        while let Some(completion) = self.next_completion().await {
            self.apply(completion);
        }
    }

    fn request(&mut self, handle: TreeHandle, path: NodePath) -> Result<(), TreeError> {
        let tree = self.tree_ref(handle)?;
        let direction = tree.direction();
        let generation = tree.generation();
        let node = tree
            .node(&path)
            .ok_or_else(|| TreeError::NotFound(format!("node {path:?} in tree {handle}")))?;
        check_direction(node.payload(), direction)?;
        let payload = node.payload().clone();
        let depth = node.depth();

        self.next_ticket += 1;
        let ticket = Ticket {
            id: self.next_ticket,
            handle,
            generation,
            path: path.clone(),
            payload,
            depth,
            direction,
        };
        debug!(
            "requesting {direction} children of `{}` ({handle} {path:?}, ticket #{})",
            ticket.payload.name(),
            ticket.id
        );
        self.pending.insert((handle, path), ticket.id);
        self.in_flight += 1;

        let source = Arc::clone(&self.source);
        let tx = self.completions_tx.clone();
        let resolve_symbols = self.options.resolve_symbols;
        tokio::spawn(async move {
            let result = resolve_children(
                source.as_ref(),
                &ticket.payload,
                ticket.depth,
                ticket.direction,
                resolve_symbols,
            )
            .await;
            // The receiver lives as long as the session.
            let _ = tx.send(Completion { ticket, result });
        });
        Ok(())
    }

    /// Renders a tree, replaces its buffer and its line maps in one step.
    fn commit(&mut self, handle: TreeHandle) {
        let Some(tree) = self.registry.tree(handle) else {
            return;
        };
        let rendered = render(tree, &self.options.render);
        if !tree.is_hidden() {
            self.sink.replace(handle, &rendered.lines, &rendered.annotations);
        }
        if let Some(tree) = self.registry.tree_mut(handle) {
            tree.commit_maps(rendered.line_map, rendered.source_lines);
        }
    }

    fn tree_ref(&self, handle: TreeHandle) -> Result<&Tree, TreeError> {
        self.registry
            .tree(handle)
            .ok_or_else(|| TreeError::NotFound(format!("tree {handle}")))
    }

    fn path_for(&self, handle: TreeHandle, line: usize) -> Result<NodePath, TreeError> {
        self.tree_ref(handle)?
            .path_at(line)
            .cloned()
            .ok_or_else(|| TreeError::NotFound(format!("line {line} in tree {handle}")))
    }

    fn node_on(&self, handle: TreeHandle, line: usize) -> Result<&Node, TreeError> {
        self.tree_ref(handle)?
            .node_at(line)
            .ok_or_else(|| TreeError::NotFound(format!("line {line} in tree {handle}")))
    }

    fn node_mut(&mut self, handle: TreeHandle, path: &[usize]) -> Result<&mut Node, TreeError> {
        self.registry
            .tree_mut(handle)
            .and_then(|tree| tree.node_mut(path))
            .ok_or_else(|| TreeError::NotFound(format!("node {path:?} in tree {handle}")))
    }

    fn report(&mut self, err: &TreeError) {
        let level = match err {
            TreeError::Resolution { .. } => Level::Error,
            TreeError::InvalidOperation(_) | TreeError::NotFound(_) => Level::Warn,
        };
        self.notifier.notify(level, &err.to_string());
    }

    fn reported<T>(&mut self, result: Result<T, TreeError>) -> Result<T, TreeError> {
        if let Err(err) = &result {
            self.report(err);
        }
        result
    }
}

fn describe(node: &Node) -> String {
    let payload = node.payload();
    let range = payload.selection_range();
    let file = uri_to_path(payload.uri())
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| payload.uri().to_string());
    let mut out = format!(
        "name: {}\nkind: {}\n",
        payload.name(),
        symbol_kind_name(payload.kind())
    );
    if let Some(detail) = payload.detail() {
        out.push_str(&format!("detail: {detail}\n"));
    }
    out.push_str(&format!(
        "file: {file}\nrange: {}:{}-{}:{}\n",
        range.start.line + 1,
        range.start.character + 1,
        range.end.line + 1,
        range.end.character + 1
    ));
    if let SymbolPayload::Resolved(resolved) = payload
        && let Some(container) = &resolved.symbol.container_name
    {
        out.push_str(&format!("container: {container}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::node::tests::call_item;
    use crate::resolver::tests::{FILE_URI, FakeSource, outline_symbol};
    use crate::sink::{MemoryBuffer, RecordingNotifier};

    struct Harness {
        session: Session,
        source: Arc<FakeSource>,
        buffer: MemoryBuffer,
        notifier: RecordingNotifier,
    }

    fn harness(source: FakeSource) -> Harness {
        let source = Arc::new(FakeSource {
            prepared: vec![call_item("root", FILE_URI, 0)],
            ..source
        });
        let buffer = MemoryBuffer::new();
        let notifier = RecordingNotifier::new();
        let session = Session::new(
            source.clone(),
            Box::new(buffer.clone()),
            Box::new(notifier.clone()),
            SessionOptions::default(),
        );
        Harness {
            session,
            source,
            buffer,
            notifier,
        }
    }

    fn file() -> PathBuf {
        PathBuf::from("/ws/src/lib.rs")
    }

    fn origin() -> LspPosition {
        LspPosition {
            line: 0,
            character: 3,
        }
    }

    fn names(session: &Session, handle: TreeHandle) -> Vec<String> {
        let tree = session.tree(handle).unwrap();
        (1..=tree.line_count())
            .map(|line| tree.node_at(line).unwrap().payload().name().to_string())
            .collect()
    }

    async fn open_incoming(h: &mut Harness) -> TreeHandle {
        let handle = h
            .session
            .open_call_tree(&file(), origin(), Direction::Incoming)
            .await
            .unwrap();
        h.session.run_until_idle().await;
        handle
    }

    #[tokio::test]
    async fn root_resolution_renders_children_in_order() {
        let mut h = harness(FakeSource::default().with_incoming("root", &["A", "B", "C"]));
        let handle = open_incoming(&mut h).await;

        assert_eq!(names(&h.session, handle), vec!["root", "A", "B", "C"]);
        let tree = h.session.tree(handle).unwrap();
        let depths: Vec<usize> = (1..=4).map(|l| tree.node_at(l).unwrap().depth()).collect();
        assert_eq!(depths, vec![0, 1, 1, 1]);
        let content = h.buffer.content(handle).unwrap();
        assert_eq!(content.lines.len(), tree.line_count());
        assert_eq!(h.source.requests(), 1);
    }

    #[tokio::test]
    async fn second_expand_while_pending_sends_nothing() {
        let mut h = harness(
            FakeSource::default()
                .with_incoming("root", &["A"])
                .with_incoming("A", &["A1"]),
        );
        let handle = open_incoming(&mut h).await;

        assert_eq!(h.session.expand(handle, 2), Ok(ExpandOutcome::Requested));
        assert_eq!(h.session.expand(handle, 2), Ok(ExpandOutcome::Pending));
        h.session.run_until_idle().await;
        assert_eq!(h.session.expand(handle, 2), Ok(ExpandOutcome::AlreadyExpanded));
        assert_eq!(h.source.requests(), 2);
        assert_eq!(names(&h.session, handle), vec!["root", "A", "A1"]);
    }

    #[tokio::test]
    async fn collapse_then_expand_restores_children_without_requery() {
        let mut h = harness(
            FakeSource::default()
                .with_incoming("root", &["A", "B"])
                .with_incoming("A", &["x", "y", "z"]),
        );
        let handle = open_incoming(&mut h).await;
        h.session.expand(handle, 2).unwrap();
        h.session.run_until_idle().await;
        let before = h.session.tree(handle).unwrap().node(&[0]).unwrap().clone();

        assert_eq!(h.session.collapse(handle, 2), Ok(true));
        assert_eq!(names(&h.session, handle), vec!["root", "A", "B"]);
        assert_eq!(h.session.expand(handle, 2), Ok(ExpandOutcome::Expanded));

        let after = h.session.tree(handle).unwrap().node(&[0]).unwrap();
        assert_eq!(after, &before);
        assert_eq!(h.source.requests(), 2);
        assert_eq!(
            names(&h.session, handle),
            vec!["root", "A", "x", "y", "z", "B"]
        );
    }

    #[tokio::test]
    async fn collapsing_a_child_keeps_the_root_line() {
        let mut h = harness(
            FakeSource::default()
                .with_incoming("root", &["A"])
                .with_incoming("A", &["x", "y"]),
        );
        let handle = open_incoming(&mut h).await;
        h.session.expand(handle, 2).unwrap();
        h.session.run_until_idle().await;
        let before = h.session.rendered(handle).unwrap();

        h.session.collapse(handle, 2).unwrap();
        let after = h.buffer.content(handle).unwrap();
        assert_eq!(after.lines.len(), before.lines.len() - 2);
        assert_eq!(after.lines[0], before.lines[0]);
        assert_eq!(h.session.tree(handle).unwrap().path_at(1), Some(&vec![]));
    }

    #[tokio::test]
    async fn focus_copies_the_node_and_leaves_the_source_alone() {
        let mut h = harness(
            FakeSource::default()
                .with_incoming("root", &["A", "B"])
                .with_incoming("B", &["b1"]),
        );
        let handle = open_incoming(&mut h).await;
        let original = h.session.tree(handle).unwrap().root().clone();
        let focused_payload = h.session.node_at(handle, 3).unwrap().payload().clone();

        let focused = h.session.focus(handle, 3).unwrap();
        assert_ne!(focused, handle);
        assert_eq!(h.session.current(TreeKind::Call), Some(focused));
        let tree = h.session.tree(focused).unwrap();
        assert_eq!(tree.root().depth(), 0);
        assert_eq!(tree.root().payload(), &focused_payload);
        assert_eq!(tree.direction(), Direction::Incoming);

        h.session.run_until_idle().await;
        assert_eq!(names(&h.session, focused), vec!["B", "b1"]);
        assert_eq!(h.session.tree(handle).unwrap().root(), &original);
    }

    #[tokio::test]
    async fn switch_direction_starts_over_with_one_request() {
        let mut h = harness(
            FakeSource::default()
                .with_incoming("root", &["caller"])
                .with_outgoing("root", &["callee_a", "callee_b"]),
        );
        let handle = open_incoming(&mut h).await;
        assert_eq!(h.source.requests(), 1);

        assert_eq!(h.session.switch_direction(handle), Ok(Direction::Outgoing));
        assert_eq!(h.source.requests(), 2);
        assert_eq!(names(&h.session, handle), vec!["root"]);

        h.session.run_until_idle().await;
        assert_eq!(
            names(&h.session, handle),
            vec!["root", "callee_a", "callee_b"]
        );
        assert_eq!(h.source.requests(), 2);
    }

    #[tokio::test]
    async fn response_for_the_old_direction_is_dropped() {
        let mut h = harness(
            FakeSource::default()
                .with_incoming("root", &["caller"])
                .with_outgoing("root", &["callee"]),
        );
        let handle = h
            .session
            .open_call_tree(&file(), origin(), Direction::Incoming)
            .await
            .unwrap();
        h.session.switch_direction(handle).unwrap();

        let mut outcomes = Vec::new();
        while let Some(completion) = h.session.next_completion().await {
            let direction = completion.ticket.direction;
            outcomes.push((direction, h.session.apply(completion)));
        }
        assert!(outcomes.contains(&(Direction::Incoming, ApplyOutcome::Stale)));
        assert!(outcomes.contains(&(Direction::Outgoing, ApplyOutcome::Grafted)));
        assert_eq!(names(&h.session, handle), vec!["root", "callee"]);
    }

    #[tokio::test]
    async fn closing_a_tree_turns_its_responses_into_no_ops() {
        let mut h = harness(FakeSource::default().with_incoming("root", &["A"]));
        let handle = h
            .session
            .open_call_tree(&file(), origin(), Direction::Incoming)
            .await
            .unwrap();
        h.session.close(handle).unwrap();

        let completion = h.session.next_completion().await.unwrap();
        assert_eq!(h.session.apply(completion), ApplyOutcome::Stale);
        assert!(h.session.tree(handle).is_none());
        assert!(h.buffer.content(handle).is_none());
        assert_eq!(h.session.current(TreeKind::Call), None);
    }

    #[tokio::test]
    async fn collapsing_a_pending_node_cancels_it() {
        let mut h = harness(
            FakeSource::default()
                .with_incoming("root", &["A"])
                .with_incoming("A", &["A1"]),
        );
        let handle = open_incoming(&mut h).await;
        h.session.expand(handle, 2).unwrap();
        assert_eq!(h.session.collapse(handle, 2), Ok(false));
        assert_eq!(h.session.pending_count(), 0);

        h.session.run_until_idle().await;
        let node = h.session.tree(handle).unwrap().node(&[0]).unwrap();
        assert!(!node.is_expanded());
        assert!(node.children().is_empty());
    }

    #[tokio::test]
    async fn concurrent_expands_land_on_their_own_nodes() {
        let mut h = harness(
            FakeSource::default()
                .with_incoming("root", &["A", "B"])
                .with_incoming("A", &["a1", "a2"])
                .with_incoming("B", &["b1"]),
        );
        let handle = open_incoming(&mut h).await;
        assert_eq!(h.session.expand(handle, 2), Ok(ExpandOutcome::Requested));
        assert_eq!(h.session.expand(handle, 3), Ok(ExpandOutcome::Requested));
        assert_eq!(h.session.pending_count(), 2);
        h.session.run_until_idle().await;

        assert_eq!(
            names(&h.session, handle),
            vec!["root", "A", "a1", "a2", "B", "b1"]
        );
        let tree = h.session.tree(handle).unwrap();
        assert_eq!(tree.node(&[1, 0]).unwrap().payload().name(), "b1");
        assert_eq!(tree.node(&[1, 0]).unwrap().depth(), 2);
    }

    #[tokio::test]
    async fn failed_resolution_is_reported_and_leaves_node_collapsed() {
        let mut h = harness(FakeSource::default().with_incoming("root", &["A", "B"]));
        let handle = open_incoming(&mut h).await;
        h.notifier.take();

        // `A` has no callers: an empty answer.
        h.session.expand(handle, 2).unwrap();
        h.session.run_until_idle().await;
        let node = h.session.tree(handle).unwrap().node(&[0]).unwrap();
        assert!(!node.is_expanded());
        let messages = h.notifier.take();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, Level::Error);
        assert!(messages[0].1.contains("`A`"));
    }

    #[tokio::test]
    async fn unknown_lines_and_trees_are_not_found() {
        let mut h = harness(FakeSource::default().with_incoming("root", &["A"]));
        let handle = open_incoming(&mut h).await;

        assert!(matches!(h.session.expand(handle, 99), Err(TreeError::NotFound(_))));
        assert!(matches!(h.session.expand(handle, 0), Err(TreeError::NotFound(_))));
        h.session.close(handle).unwrap();
        assert!(matches!(h.session.close(handle), Err(TreeError::NotFound(_))));
        assert!(matches!(h.session.focus(handle, 1), Err(TreeError::NotFound(_))));
        assert!(h.session.node_at(handle, 1).is_none());
        assert_eq!(h.notifier.take().len(), 4);
    }

    fn outline_source() -> FakeSource {
        FakeSource {
            outline: vec![
                outline_symbol(
                    "Config",
                    23,
                    1,
                    vec![outline_symbol("verbose", 8, 2, Vec::new())],
                ),
                outline_symbol("main", 12, 5, Vec::new()),
            ],
            ..FakeSource::default()
        }
    }

    #[tokio::test]
    async fn outline_is_built_in_one_pass() {
        let mut h = harness(outline_source());
        let handle = h.session.open_outline(&file()).await.unwrap();

        let content = h.buffer.content(handle).unwrap();
        assert_eq!(
            content.lines,
            vec![
                "▼ [File] lib.rs",
                "  ▶ [Struct] Config",
                "    [Function] main",
            ]
        );
        assert_eq!(h.session.expand(handle, 2), Ok(ExpandOutcome::Expanded));
        assert_eq!(
            names(&h.session, handle),
            vec!["lib.rs", "Config", "verbose", "main"]
        );
        assert_eq!(h.source.requests(), 0);
        assert_eq!(h.session.pending_count(), 0);
    }

    #[tokio::test]
    async fn collapsing_an_outline_leaf_is_a_no_op() {
        let mut h = harness(outline_source());
        let handle = h.session.open_outline(&file()).await.unwrap();
        let before = h.buffer.content(handle).unwrap();

        assert_eq!(h.session.collapse(handle, 3), Ok(false));
        assert_eq!(h.session.toggle(handle, 3), Ok(()));
        assert_eq!(
            h.session.expand(handle, 3),
            Ok(ExpandOutcome::AlreadyExpanded)
        );

        let after = h.buffer.content(handle).unwrap();
        assert_eq!(after.lines, before.lines);
        assert_eq!(after.lines[2], "    [Function] main");
        let leaf = h.session.tree(handle).unwrap().node_at(3).unwrap();
        assert!(leaf.is_resolved_leaf());
        assert!(h.notifier.messages().is_empty());
        assert_eq!(h.source.requests(), 0);
    }

    #[tokio::test]
    async fn outline_rejects_direction_switch() {
        let mut h = harness(outline_source());
        let handle = h.session.open_outline(&file()).await.unwrap();
        let before = h.session.tree(handle).unwrap().root().clone();

        assert!(matches!(
            h.session.switch_direction(handle),
            Err(TreeError::InvalidOperation(_))
        ));
        assert_eq!(h.session.tree(handle).unwrap().root(), &before);
        assert_eq!(h.notifier.take()[0].0, Level::Warn);
    }

    #[tokio::test]
    async fn outline_and_call_trees_keep_separate_slots() {
        let mut h = harness(FakeSource {
            incoming: [("root".to_string(), crate::resolver::tests::items(&["A"]))].into(),
            ..outline_source()
        });
        let call = open_incoming(&mut h).await;
        let outline = h.session.open_outline(&file()).await.unwrap();
        assert_eq!(h.session.current(TreeKind::Call), Some(call));
        assert_eq!(h.session.current(TreeKind::Outline), Some(outline));

        h.session.set_hidden(call, true).unwrap();
        assert!(h.buffer.content(call).is_none());
        assert_eq!(h.session.reopen(TreeKind::Call), Ok(call));
        assert_eq!(h.buffer.content(call).unwrap().lines.len(), 2);
    }

    #[tokio::test]
    async fn source_lines_map_declarations_to_rendered_lines() {
        let mut h = harness(outline_source());
        let handle = h.session.open_outline(&file()).await.unwrap();

        // `Config` is declared on file line 2, `main` on line 6.
        let config = h.session.source_line_lookup(handle, 2).unwrap();
        assert_eq!(config.rendered_line, 2);
        assert_eq!(config.uri, FILE_URI);
        assert_eq!(h.session.source_line_lookup(handle, 6).unwrap().rendered_line, 3);
        assert!(h.session.source_line_lookup(handle, 3).is_none());

        h.session.expand(handle, 2).unwrap();
        assert_eq!(h.session.source_line_lookup(handle, 3).unwrap().rendered_line, 3);
        assert_eq!(h.session.source_line_lookup(handle, 6).unwrap().rendered_line, 4);
    }

    #[tokio::test]
    async fn jump_and_details_describe_the_node() {
        let mut h = harness(FakeSource::default().with_incoming("root", &["helper"]));
        let handle = open_incoming(&mut h).await;

        let location = h.session.jump(handle, 2).unwrap();
        assert_eq!(location.file_path, "/ws/src/lib.rs");
        assert_eq!(location.range.start.line, 10);

        let details = h.session.details(handle, 2).unwrap();
        assert!(details.contains("name: helper"));
        assert!(details.contains("kind: Function"));
        assert!(details.contains("range: 11:1-12:1"));

        let hover = h.session.hover(handle, 2).await.unwrap();
        assert_eq!(hover.as_deref(), Some("hover at 10:0"));
    }

    #[tokio::test]
    async fn jump_without_file_location_is_invalid() {
        let item = call_item("remote", "untitled:Untitled-1", 0);
        let source = Arc::new(FakeSource {
            prepared: vec![item],
            ..FakeSource::default()
        });
        let mut session = Session::new(
            source,
            Box::new(MemoryBuffer::new()),
            Box::new(RecordingNotifier::new()),
            SessionOptions::default(),
        );
        let handle = session
            .open_call_tree(&file(), origin(), Direction::Outgoing)
            .await
            .unwrap();
        assert!(matches!(
            session.jump(handle, 1),
            Err(TreeError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn expand_levels_resolves_breadth_first() {
        let mut h = harness(
            FakeSource::default()
                .with_incoming("root", &["A", "B"])
                .with_incoming("A", &["a1"])
                .with_incoming("B", &["b1"])
                .with_incoming("a1", &["deep"]),
        );
        let handle = h
            .session
            .open_call_tree(&file(), origin(), Direction::Incoming)
            .await
            .unwrap();
        h.session.expand_levels(handle, 2).await.unwrap();
        assert_eq!(
            names(&h.session, handle),
            vec!["root", "A", "a1", "B", "b1"]
        );
        assert_eq!(h.source.requests(), 3);
    }

    #[tokio::test]
    async fn dump_reports_tree_state() {
        let mut h = harness(FakeSource::default().with_incoming("root", &["A"]));
        let handle = open_incoming(&mut h).await;
        let dump = h.session.dump(handle).unwrap();
        assert_eq!(dump["direction"], "incoming");
        assert_eq!(dump["lines"], 2);
        assert_eq!(dump["root"]["children"][0]["payload"]["name"], "A");
    }
}
