use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::node::{Direction, Node, NodePath, TreeKind};

/// Opaque, monotonically assigned tree identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TreeHandle(pub(crate) u64);

impl TreeHandle {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TreeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a source file line landed in the last render.
///
/// Keyed by line number alone. When call-tree nodes from different files
/// share a line, only the first in pre-order is kept; `uri` tells which file
/// the entry belongs to, so hosts compare it with the file they display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLine {
    pub rendered_line: usize,
    pub uri: String,
}

#[derive(Debug, Clone)]
pub struct Tree {
    handle: TreeHandle,
    root: Node,
    direction: Direction,
    hidden: bool,
    generation: u64,
    line_map: Vec<NodePath>,
    source_lines: HashMap<u32, SourceLine>,
}

impl Tree {
    /// A tree that is not registered yet; [`crate::Registry::put`] assigns its handle.
    pub fn new(root: Node, direction: Direction) -> Self {
        Self {
            handle: TreeHandle(0),
            root: root.rerooted(),
            direction,
            hidden: false,
            generation: 0,
            line_map: Vec::new(),
            source_lines: HashMap::new(),
        }
    }

    pub fn handle(&self) -> TreeHandle {
        self.handle
    }

    pub(crate) fn set_handle(&mut self, handle: TreeHandle) {
        self.handle = handle;
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn kind(&self) -> TreeKind {
        self.direction.kind()
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub(crate) fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    /// Bumped every time the node graph below the root is thrown away, so
    /// responses computed against the old graph can be recognized.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn node(&self, path: &[usize]) -> Option<&Node> {
        self.root.get(path)
    }

    pub(crate) fn node_mut(&mut self, path: &[usize]) -> Option<&mut Node> {
        self.root.get_mut(path)
    }

    /// Path of the node on a rendered line (1-based).
    pub fn path_at(&self, line: usize) -> Option<&NodePath> {
        line.checked_sub(1).and_then(|idx| self.line_map.get(idx))
    }

    pub fn node_at(&self, line: usize) -> Option<&Node> {
        self.path_at(line).and_then(|path| self.root.get(path))
    }

    pub fn source_line_lookup(&self, file_line: u32) -> Option<&SourceLine> {
        self.source_lines.get(&file_line)
    }

    /// Number of lines in the last committed render.
    pub fn line_count(&self) -> usize {
        self.line_map.len()
    }

    pub(crate) fn line_map(&self) -> &[NodePath] {
        &self.line_map
    }

    /// Replaces both line indices wholesale.
    pub(crate) fn commit_maps(
        &mut self,
        line_map: Vec<NodePath>,
        source_lines: HashMap<u32, SourceLine>,
    ) {
        self.line_map = line_map;
        self.source_lines = source_lines;
    }

    /// Flips a call tree's direction and discards everything below the root.
    pub(crate) fn switch_direction(&mut self) -> Option<Direction> {
        let flipped = self.direction.flipped()?;
        self.direction = flipped;
        self.root.discard_children();
        self.generation += 1;
        Some(flipped)
    }
}
