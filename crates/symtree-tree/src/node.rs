use std::fmt;

use serde::Serialize;
use symtree_lsp::{
    CallHierarchyItem, DocumentSymbolItem, LspLocation, LspRange, OutlineSymbol,
    WorkspaceSymbolMatch, symbol_kind_name,
};

/// Index path from a tree's root to a node; the root is `[]`.
pub type NodePath = Vec<usize>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
    Outline,
}

impl Direction {
    pub fn kind(self) -> TreeKind {
        match self {
            Direction::Incoming | Direction::Outgoing => TreeKind::Call,
            Direction::Outline => TreeKind::Outline,
        }
    }

    /// The opposite call direction; outlines have none.
    pub fn flipped(self) -> Option<Direction> {
        match self {
            Direction::Incoming => Some(Direction::Outgoing),
            Direction::Outgoing => Some(Direction::Incoming),
            Direction::Outline => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
            Direction::Outline => "outline",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn direction_from_name(name: &str) -> Option<Direction> {
    match name.trim().to_ascii_lowercase().as_str() {
        "incoming" | "in" | "callers" => Some(Direction::Incoming),
        "outgoing" | "out" | "callees" => Some(Direction::Outgoing),
        "outline" | "symbols" => Some(Direction::Outline),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeKind {
    Call,
    Outline,
}

/// A call hierarchy item whose identity was disambiguated through
/// `workspace/symbol`. The item is kept so the node stays expandable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedCall {
    pub item: CallHierarchyItem,
    pub symbol: WorkspaceSymbolMatch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum SymbolPayload {
    Call(CallHierarchyItem),
    Document(DocumentSymbolItem),
    Resolved(ResolvedCall),
}

impl SymbolPayload {
    pub fn name(&self) -> &str {
        match self {
            SymbolPayload::Call(item) => &item.name,
            SymbolPayload::Document(sym) => &sym.name,
            SymbolPayload::Resolved(resolved) => &resolved.symbol.name,
        }
    }

    pub fn kind(&self) -> u32 {
        match self {
            SymbolPayload::Call(item) => item.kind,
            SymbolPayload::Document(sym) => sym.kind,
            SymbolPayload::Resolved(resolved) => resolved.symbol.kind,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        symbol_kind_name(self.kind())
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            SymbolPayload::Call(item) => item.detail.as_deref(),
            SymbolPayload::Document(sym) => sym.detail.as_deref(),
            SymbolPayload::Resolved(resolved) => resolved
                .symbol
                .container_name
                .as_deref()
                .or(resolved.item.detail.as_deref()),
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            SymbolPayload::Call(item) => &item.uri,
            SymbolPayload::Document(sym) => &sym.uri,
            SymbolPayload::Resolved(resolved) => &resolved.symbol.location.uri,
        }
    }

    pub fn selection_range(&self) -> LspRange {
        match self {
            SymbolPayload::Call(item) => item.selection_range,
            SymbolPayload::Document(sym) => sym.selection_range,
            SymbolPayload::Resolved(resolved) => resolved.item.selection_range,
        }
    }

    pub fn location(&self) -> LspLocation {
        LspLocation {
            uri: self.uri().to_string(),
            range: self.selection_range(),
        }
    }

    /// The item to send back for call hierarchy expansion, if this payload has one.
    pub fn call_item(&self) -> Option<&CallHierarchyItem> {
        match self {
            SymbolPayload::Call(item) => Some(item),
            SymbolPayload::Resolved(resolved) => Some(&resolved.item),
            SymbolPayload::Document(_) => None,
        }
    }
}

/// One symbol occurrence in a tree.
///
/// `expanded` and `children` only change together through [`Node::graft`]
/// or the explicit cached toggles, so an expanded node never waits on
/// unresolved children.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    payload: SymbolPayload,
    depth: usize,
    expanded: bool,
    children: Vec<Node>,
}

impl Node {
    pub fn new(payload: SymbolPayload, depth: usize) -> Self {
        Self {
            payload,
            depth,
            expanded: false,
            children: Vec::new(),
        }
    }

    /// Builds an outline subtree in one pass. Leaves are marked as resolved
    /// (expanded with no children); branches start collapsed.
    pub fn from_outline(symbol: OutlineSymbol, depth: usize) -> Self {
        let children: Vec<Node> = symbol
            .children
            .into_iter()
            .map(|child| Node::from_outline(child, depth + 1))
            .collect();
        Self {
            payload: SymbolPayload::Document(symbol.item),
            depth,
            expanded: children.is_empty(),
            children,
        }
    }

    pub fn payload(&self) -> &SymbolPayload {
        &self.payload
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Expanded with nothing underneath: resolution finished and found no children.
    pub fn is_resolved_leaf(&self) -> bool {
        self.expanded && self.children.is_empty()
    }

    /// Installs resolved children and flips `expanded` in the same step.
    /// Child depths are renormalized to `self.depth + 1`.
    pub fn graft(&mut self, children: Vec<Node>) {
        let depth = self.depth + 1;
        self.children = children
            .into_iter()
            .map(|mut child| {
                child.set_depth(depth);
                child
            })
            .collect();
        self.expanded = true;
    }

    /// Re-expands a node whose children are already populated. Returns false
    /// when there is nothing cached to show.
    pub(crate) fn expand_cached(&mut self) -> bool {
        if self.children.is_empty() {
            return false;
        }
        self.expanded = true;
        true
    }

    pub(crate) fn collapse(&mut self) {
        self.expanded = false;
    }

    /// Drops every descendant and returns the node to its unresolved state.
    pub(crate) fn discard_children(&mut self) {
        self.children.clear();
        self.expanded = false;
    }

    /// Deep copy of this subtree rooted at depth 0.
    pub fn rerooted(&self) -> Node {
        let mut copy = self.clone();
        copy.set_depth(0);
        copy
    }

    fn set_depth(&mut self, depth: usize) {
        self.depth = depth;
        for child in &mut self.children {
            child.set_depth(depth + 1);
        }
    }

    pub fn get(&self, path: &[usize]) -> Option<&Node> {
        let mut node = self;
        for &idx in path {
            node = node.children.get(idx)?;
        }
        Some(node)
    }

    pub(crate) fn get_mut(&mut self, path: &[usize]) -> Option<&mut Node> {
        let mut node = self;
        for &idx in path {
            node = node.children.get_mut(idx)?;
        }
        Some(node)
    }

    /// Number of rows this subtree occupies when rendered as a root.
    pub fn visible_count(&self) -> usize {
        fn count(node: &Node, is_root: bool) -> usize {
            let mut total = 1;
            if node.expanded || is_root {
                total += node.children.iter().map(|c| count(c, false)).sum::<usize>();
            }
            total
        }
        count(self, self.depth == 0)
    }
}
