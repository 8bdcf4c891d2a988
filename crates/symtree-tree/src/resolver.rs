use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use symtree_lsp::{
    CallHierarchyItem, CallMatch, LspPosition, OutlineSymbol, SymbolClient, WorkspaceSymbolMatch,
};
use tracing::{debug, warn};

use crate::error::TreeError;
use crate::node::{Direction, Node, ResolvedCall, SymbolPayload};

/// The language-server requests a symbol tree is built from.
#[async_trait]
pub trait HierarchySource: Send + Sync {
    async fn prepare_call_hierarchy(
        &self,
        file_path: &Path,
        position: LspPosition,
    ) -> Result<Vec<CallHierarchyItem>>;

    async fn incoming_calls(&self, item: &CallHierarchyItem) -> Result<Vec<CallMatch>>;

    async fn outgoing_calls(&self, item: &CallHierarchyItem) -> Result<Vec<CallMatch>>;

    async fn workspace_symbols(&self, query: &str) -> Result<Vec<WorkspaceSymbolMatch>>;

    async fn document_symbols(&self, file_path: &Path) -> Result<Vec<OutlineSymbol>>;

    async fn hover(&self, uri: &str, position: LspPosition) -> Result<Option<String>>;
}

#[async_trait]
impl HierarchySource for SymbolClient {
    async fn prepare_call_hierarchy(
        &self,
        file_path: &Path,
        position: LspPosition,
    ) -> Result<Vec<CallHierarchyItem>> {
        SymbolClient::prepare_call_hierarchy(self, file_path, position).await
    }

    async fn incoming_calls(&self, item: &CallHierarchyItem) -> Result<Vec<CallMatch>> {
        SymbolClient::incoming_calls(self, item).await
    }

    async fn outgoing_calls(&self, item: &CallHierarchyItem) -> Result<Vec<CallMatch>> {
        SymbolClient::outgoing_calls(self, item).await
    }

    async fn workspace_symbols(&self, query: &str) -> Result<Vec<WorkspaceSymbolMatch>> {
        SymbolClient::workspace_symbols(self, query).await
    }

    async fn document_symbols(&self, file_path: &Path) -> Result<Vec<OutlineSymbol>> {
        SymbolClient::document_symbols(self, file_path).await
    }

    async fn hover(&self, uri: &str, position: LspPosition) -> Result<Option<String>> {
        SymbolClient::hover(self, uri, position).await
    }
}

/// Rejects queries a payload cannot answer, before anything is sent.
pub fn check_direction(payload: &SymbolPayload, direction: Direction) -> Result<(), TreeError> {
    match (payload.call_item(), direction) {
        (Some(_), Direction::Incoming | Direction::Outgoing) => Ok(()),
        (None, Direction::Incoming | Direction::Outgoing) => Err(TreeError::InvalidOperation(
            format!("`{}` is a document symbol and has no call hierarchy", payload.name()),
        )),
        (_, Direction::Outline) => Err(TreeError::InvalidOperation(format!(
            "outline symbols are resolved in one pass; `{}` has no pending children",
            payload.name()
        ))),
    }
}

/// Resolves the children of one node with a single hierarchy request.
///
/// Children come back in server order at `depth + 1`, collapsed and
/// unresolved. An empty answer is reported as a failure so the node stays
/// collapsed. With `resolve_symbols`, each child is looked up through
/// `workspace/symbol`; lookups only ever swap payloads, never add or drop
/// children.
pub async fn resolve_children(
    source: &dyn HierarchySource,
    payload: &SymbolPayload,
    depth: usize,
    direction: Direction,
    resolve_symbols: bool,
) -> Result<Vec<Node>, TreeError> {
    check_direction(payload, direction)?;
    let Some(item) = payload.call_item() else {
        return Err(TreeError::InvalidOperation(format!(
            "`{}` has no call hierarchy item",
            payload.name()
        )));
    };

    let failure = |message: String| TreeError::Resolution {
        symbol: payload.name().to_string(),
        direction,
        message,
    };

    let response = match direction {
        Direction::Incoming => source.incoming_calls(item).await,
        _ => source.outgoing_calls(item).await,
    }
    .map_err(|err| failure(format!("{err:#}")))?;

    if response.is_empty() {
        return Err(failure(format!("no {direction} calls")));
    }
    debug!(
        "resolved {} {direction} calls for `{}`",
        response.len(),
        payload.name()
    );

    let mut children = Vec::with_capacity(response.len());
    for call in response {
        let child_payload = if resolve_symbols {
            enhance(source, call.item).await
        } else {
            SymbolPayload::Call(call.item)
        };
        children.push(Node::new(child_payload, depth + 1));
    }
    Ok(children)
}

async fn enhance(source: &dyn HierarchySource, item: CallHierarchyItem) -> SymbolPayload {
    match source.workspace_symbols(&item.name).await {
        Ok(candidates) => match disambiguate(&item, &candidates) {
            Some(symbol) => SymbolPayload::Resolved(ResolvedCall {
                item,
                symbol: symbol.clone(),
            }),
            None => SymbolPayload::Call(item),
        },
        Err(err) => {
            warn!("workspace/symbol lookup for `{}` failed: {err:#}", item.name);
            SymbolPayload::Call(item)
        }
    }
}

/// Picks the workspace symbol that denotes the same declaration as `item`:
/// same name, same document, and a range that contains the item's
/// selection start. The first such candidate wins.
pub fn disambiguate<'a>(
    item: &CallHierarchyItem,
    candidates: &'a [WorkspaceSymbolMatch],
) -> Option<&'a WorkspaceSymbolMatch> {
    candidates.iter().find(|candidate| {
        candidate.name == item.name
            && candidate.location.uri == item.uri
            && candidate
                .location
                .range
                .contains(item.selection_range.start)
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use symtree_lsp::{DocumentSymbolItem, LspRange, ResolvedLocation};

    use super::*;
    use crate::node::tests::{call_item, range};

    pub(crate) const FILE_URI: &str = "file:///ws/src/lib.rs";

    /// Answers hierarchy requests from canned tables and counts them.
    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub(crate) prepared: Vec<CallHierarchyItem>,
        pub(crate) incoming: HashMap<String, Vec<CallHierarchyItem>>,
        pub(crate) outgoing: HashMap<String, Vec<CallHierarchyItem>>,
        pub(crate) symbols: HashMap<String, Vec<WorkspaceSymbolMatch>>,
        pub(crate) outline: Vec<OutlineSymbol>,
        pub(crate) failing: Vec<String>,
        pub(crate) hierarchy_requests: AtomicUsize,
        pub(crate) symbol_requests: AtomicUsize,
    }

    impl FakeSource {
        pub(crate) fn with_incoming(mut self, name: &str, children: &[&str]) -> Self {
            self.incoming.insert(name.to_string(), items(children));
            self
        }

        pub(crate) fn with_outgoing(mut self, name: &str, children: &[&str]) -> Self {
            self.outgoing.insert(name.to_string(), items(children));
            self
        }

        pub(crate) fn requests(&self) -> usize {
            self.hierarchy_requests.load(Ordering::SeqCst)
        }

        fn answer(
            &self,
            table: &HashMap<String, Vec<CallHierarchyItem>>,
            item: &CallHierarchyItem,
        ) -> Result<Vec<CallMatch>> {
            self.hierarchy_requests.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(&item.name) {
                return Err(anyhow!("request timed out"));
            }
            Ok(table
                .get(&item.name)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|item| CallMatch {
                    item,
                    from_ranges: Vec::new(),
                })
                .collect())
        }
    }

    pub(crate) fn items(names: &[&str]) -> Vec<CallHierarchyItem> {
        names
            .iter()
            .enumerate()
            .map(|(idx, name)| call_item(name, FILE_URI, 10 + idx as u32))
            .collect()
    }

    pub(crate) fn outline_symbol(
        name: &str,
        kind: u32,
        line: u32,
        children: Vec<OutlineSymbol>,
    ) -> OutlineSymbol {
        OutlineSymbol {
            item: DocumentSymbolItem {
                name: name.to_string(),
                kind,
                detail: None,
                uri: FILE_URI.to_string(),
                range: range(line),
                selection_range: range(line),
            },
            children,
        }
    }

    #[async_trait]
    impl HierarchySource for FakeSource {
        async fn prepare_call_hierarchy(
            &self,
            _file_path: &Path,
            _position: LspPosition,
        ) -> Result<Vec<CallHierarchyItem>> {
            Ok(self.prepared.clone())
        }

        async fn incoming_calls(&self, item: &CallHierarchyItem) -> Result<Vec<CallMatch>> {
            self.answer(&self.incoming, item)
        }

        async fn outgoing_calls(&self, item: &CallHierarchyItem) -> Result<Vec<CallMatch>> {
            self.answer(&self.outgoing, item)
        }

        async fn workspace_symbols(&self, query: &str) -> Result<Vec<WorkspaceSymbolMatch>> {
            self.symbol_requests.fetch_add(1, Ordering::SeqCst);
            if self.failing.iter().any(|name| name == query) {
                return Err(anyhow!("workspace/symbol unsupported"));
            }
            Ok(self.symbols.get(query).cloned().unwrap_or_default())
        }

        async fn document_symbols(&self, _file_path: &Path) -> Result<Vec<OutlineSymbol>> {
            Ok(self.outline.clone())
        }

        async fn hover(&self, _uri: &str, position: LspPosition) -> Result<Option<String>> {
            Ok(Some(format!("hover at {}:{}", position.line, position.character)))
        }
    }

    fn symbol(name: &str, uri: &str, range: LspRange) -> WorkspaceSymbolMatch {
        WorkspaceSymbolMatch {
            name: name.to_string(),
            kind: 12,
            container_name: Some("crate::module".to_string()),
            location: ResolvedLocation {
                file_path: uri.trim_start_matches("file://").to_string(),
                uri: uri.to_string(),
                range,
            },
        }
    }

    fn root_payload() -> SymbolPayload {
        SymbolPayload::Call(call_item("root", FILE_URI, 0))
    }

    #[tokio::test]
    async fn children_follow_server_order_one_level_down() {
        let source = FakeSource::default().with_outgoing("root", &["c", "a", "b"]);
        let children = resolve_children(&source, &root_payload(), 2, Direction::Outgoing, false)
            .await
            .unwrap();
        let names: Vec<&str> = children.iter().map(|c| c.payload().name()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        assert!(children.iter().all(|c| c.depth() == 3 && !c.is_expanded()));
        assert_eq!(source.requests(), 1);
    }

    #[tokio::test]
    async fn empty_answer_is_a_resolution_failure() {
        let source = FakeSource::default();
        let err = resolve_children(&source, &root_payload(), 0, Direction::Incoming, false)
            .await
            .unwrap_err();
        assert!(matches!(err, TreeError::Resolution { .. }));
    }

    #[tokio::test]
    async fn server_errors_become_resolution_failures() {
        let source = FakeSource {
            failing: vec!["root".to_string()],
            ..FakeSource::default()
        };
        let err = resolve_children(&source, &root_payload(), 0, Direction::Incoming, false)
            .await
            .unwrap_err();
        assert_eq!(err.kind_name(), "resolution_failure");
        assert!(err.to_string().contains("request timed out"));
    }

    #[tokio::test]
    async fn document_payloads_reject_call_queries_without_a_request() {
        let source = FakeSource::default();
        let payload = SymbolPayload::Document(outline_symbol("x", 13, 0, Vec::new()).item);
        let err = resolve_children(&source, &payload, 0, Direction::Outgoing, false)
            .await
            .unwrap_err();
        assert!(matches!(err, TreeError::InvalidOperation(_)));
        assert_eq!(source.requests(), 0);
    }

    #[tokio::test]
    async fn enhancement_swaps_payloads_but_keeps_count_and_order() {
        let mut source = FakeSource::default().with_incoming("root", &["a", "b", "c"]);
        // `a` (line 10) has a matching declaration; `b` only a same-named symbol
        // elsewhere; `c` fails its lookup.
        source
            .symbols
            .insert("a".to_string(), vec![symbol("a", FILE_URI, range(10))]);
        source.symbols.insert(
            "b".to_string(),
            vec![symbol("b", "file:///ws/src/other.rs", range(11))],
        );
        source.failing.push("c".to_string());

        let children = resolve_children(&source, &root_payload(), 0, Direction::Incoming, true)
            .await
            .unwrap();
        assert_eq!(children.len(), 3);
        assert!(matches!(children[0].payload(), SymbolPayload::Resolved(_)));
        assert!(matches!(children[1].payload(), SymbolPayload::Call(_)));
        assert!(matches!(children[2].payload(), SymbolPayload::Call(_)));
        let names: Vec<&str> = children.iter().map(|c| c.payload().name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(source.symbol_requests.load(Ordering::SeqCst), 3);
        assert!(children[0].payload().call_item().is_some());
    }

    #[test]
    fn disambiguate_requires_containing_range_in_same_document() {
        let item = call_item("run", FILE_URI, 5);
        let wide = LspRange {
            start: LspPosition {
                line: 4,
                character: 0,
            },
            end: LspPosition {
                line: 9,
                character: 1,
            },
        };
        let candidates = vec![
            symbol("run", "file:///ws/src/other.rs", wide),
            symbol("run", FILE_URI, range(20)),
            symbol("runner", FILE_URI, wide),
            symbol("run", FILE_URI, wide),
        ];
        let picked = disambiguate(&item, &candidates).unwrap();
        assert_eq!(picked.location.range, wide);
        assert_eq!(picked.location.uri, FILE_URI);
        assert!(disambiguate(&item, &candidates[..3]).is_none());
    }
}
