use std::collections::BTreeMap;

use tracing::debug;

use crate::error::TreeError;
use crate::node::TreeKind;
use crate::tree::{Tree, TreeHandle};

/// Owns every live tree and remembers the most recent one per kind.
#[derive(Debug, Default)]
pub struct Registry {
    trees: BTreeMap<TreeHandle, Tree>,
    next_handle: u64,
    last_call: Option<TreeHandle>,
    last_outline: Option<TreeHandle>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tree under a fresh handle and makes it the most recent of its kind.
    pub fn put(&mut self, mut tree: Tree) -> TreeHandle {
        self.next_handle += 1;
        let handle = TreeHandle(self.next_handle);
        tree.set_handle(handle);
        *self.slot_mut(tree.kind()) = Some(handle);
        debug!("registered {:?} tree {handle}", tree.kind());
        self.trees.insert(handle, tree);
        handle
    }

    pub fn get(&self, kind: TreeKind) -> Option<TreeHandle> {
        match kind {
            TreeKind::Call => self.last_call,
            TreeKind::Outline => self.last_outline,
        }
    }

    pub fn tree(&self, handle: TreeHandle) -> Option<&Tree> {
        self.trees.get(&handle)
    }

    pub(crate) fn tree_mut(&mut self, handle: TreeHandle) -> Option<&mut Tree> {
        self.trees.get_mut(&handle)
    }

    pub fn close(&mut self, handle: TreeHandle) -> Result<Tree, TreeError> {
        let tree = self
            .trees
            .remove(&handle)
            .ok_or_else(|| TreeError::NotFound(format!("tree {handle}")))?;
        let slot = self.slot_mut(tree.kind());
        if *slot == Some(handle) {
            *slot = None;
        }
        debug!("closed tree {handle}");
        Ok(tree)
    }

    pub fn set_hidden(&mut self, handle: TreeHandle, hidden: bool) -> Result<(), TreeError> {
        let tree = self
            .trees
            .get_mut(&handle)
            .ok_or_else(|| TreeError::NotFound(format!("tree {handle}")))?;
        tree.set_hidden(hidden);
        Ok(())
    }

    pub fn handles(&self) -> impl Iterator<Item = TreeHandle> + '_ {
        self.trees.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    fn slot_mut(&mut self, kind: TreeKind) -> &mut Option<TreeHandle> {
        match kind {
            TreeKind::Call => &mut self.last_call,
            TreeKind::Outline => &mut self.last_outline,
        }
    }
}
