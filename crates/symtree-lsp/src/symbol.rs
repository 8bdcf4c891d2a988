use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::lsp::{LspDocumentSymbol, LspLocation, LspRange, LspSymbolInformation, uri_to_path};

/// A call hierarchy item as reported by the server.
///
/// `raw` keeps the item exactly as received so it can be echoed back in
/// `callHierarchy/incomingCalls` and `callHierarchy/outgoingCalls`;
/// servers stash resolution state in the opaque `data` field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallHierarchyItem {
    pub name: String,
    pub kind: u32,
    pub detail: Option<String>,
    pub uri: String,
    pub range: LspRange,
    pub selection_range: LspRange,
    #[serde(skip)]
    pub raw: Value,
}

impl CallHierarchyItem {
    pub fn location(&self) -> LspLocation {
        LspLocation {
            uri: self.uri.clone(),
            range: self.selection_range,
        }
    }

    fn same_symbol(&self, other: &CallHierarchyItem) -> bool {
        self.name == other.name
            && self.uri == other.uri
            && self.selection_range == other.selection_range
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCallHierarchyItem {
    name: String,
    kind: u32,
    #[serde(default)]
    detail: Option<String>,
    uri: String,
    range: LspRange,
    selection_range: LspRange,
}

/// One entry of an incoming/outgoing calls response: the peer symbol and
/// the ranges of the call expressions.
#[derive(Debug, Clone)]
pub struct CallMatch {
    pub item: CallHierarchyItem,
    pub from_ranges: Vec<LspRange>,
}

/// A document symbol without its children; nesting lives in [`OutlineSymbol`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSymbolItem {
    pub name: String,
    pub kind: u32,
    pub detail: Option<String>,
    pub uri: String,
    pub range: LspRange,
    pub selection_range: LspRange,
}

#[derive(Debug, Clone)]
pub struct OutlineSymbol {
    pub item: DocumentSymbolItem,
    pub children: Vec<OutlineSymbol>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedLocation {
    pub file_path: String,
    pub uri: String,
    pub range: LspRange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkspaceSymbolMatch {
    pub name: String,
    pub kind: u32,
    pub container_name: Option<String>,
    pub location: ResolvedLocation,
}

pub fn parse_call_hierarchy_item(value: &Value) -> Result<CallHierarchyItem> {
    let wire: WireCallHierarchyItem =
        serde_json::from_value(value.clone()).context("failed to parse CallHierarchyItem")?;
    Ok(CallHierarchyItem {
        name: wire.name,
        kind: wire.kind,
        detail: wire.detail,
        uri: wire.uri,
        range: wire.range,
        selection_range: wire.selection_range,
        raw: value.clone(),
    })
}

pub fn parse_prepared_items(value: Value) -> Result<Vec<CallHierarchyItem>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    let Some(arr) = value.as_array() else {
        return Err(anyhow!("prepareCallHierarchy response is not an array"));
    };
    arr.iter().map(parse_call_hierarchy_item).collect()
}

pub fn parse_incoming_calls(value: Value) -> Result<Vec<CallMatch>> {
    parse_calls(value, "from", "incomingCalls")
}

pub fn parse_outgoing_calls(value: Value) -> Result<Vec<CallMatch>> {
    parse_calls(value, "to", "outgoingCalls")
}

// Duplicate peers merge into their first occurrence, which keeps its position.
fn parse_calls(value: Value, peer_field: &str, method: &str) -> Result<Vec<CallMatch>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    let Some(arr) = value.as_array() else {
        return Err(anyhow!("{method} response is not an array"));
    };

    let mut out: Vec<CallMatch> = Vec::with_capacity(arr.len());
    for call in arr {
        let Some(peer) = call.get(peer_field) else {
            return Err(anyhow!("{method} entry is missing `{peer_field}`"));
        };
        let item = parse_call_hierarchy_item(peer)?;
        let from_ranges: Vec<LspRange> = match call.get("fromRanges") {
            Some(v) => serde_json::from_value(v.clone())
                .with_context(|| format!("failed to parse {method} fromRanges"))?,
            None => Vec::new(),
        };

        if let Some(existing) = out.iter_mut().find(|m| m.item.same_symbol(&item)) {
            existing.from_ranges.extend(from_ranges);
            continue;
        }
        out.push(CallMatch { item, from_ranges });
    }
    Ok(out)
}

/// Parses a `textDocument/documentSymbol` response into a nested outline.
///
/// Servers may answer with `DocumentSymbol[]` (nested) or the older
/// `SymbolInformation[]` (flat); the latter yields top-level symbols only.
pub fn parse_document_symbols(value: Value, uri: &str) -> Result<Vec<OutlineSymbol>> {
    if value.is_null() {
        return Ok(Vec::new());
    }

    let Some(arr) = value.as_array() else {
        return Err(anyhow!("documentSymbol response is not an array"));
    };
    let Some(first) = arr.first() else {
        return Ok(Vec::new());
    };

    // Heuristic: detect DocumentSymbol by presence of "selectionRange".
    if first.get("selectionRange").is_some() {
        let roots: Vec<LspDocumentSymbol> =
            serde_json::from_value(value).context("failed to parse DocumentSymbol[]")?;
        return Ok(roots
            .into_iter()
            .map(|root| outline_from_document_symbol(root, uri))
            .collect());
    }

    let infos: Vec<LspSymbolInformation> =
        serde_json::from_value(value).context("failed to parse SymbolInformation[]")?;
    Ok(infos
        .into_iter()
        .map(|info| OutlineSymbol {
            item: DocumentSymbolItem {
                name: info.name,
                kind: info.kind,
                detail: info.container_name,
                uri: info.location.uri,
                range: info.location.range,
                selection_range: info.location.range,
            },
            children: Vec::new(),
        })
        .collect())
}

fn outline_from_document_symbol(sym: LspDocumentSymbol, uri: &str) -> OutlineSymbol {
    OutlineSymbol {
        item: DocumentSymbolItem {
            name: sym.name,
            kind: sym.kind,
            detail: sym.detail.filter(|d| !d.trim().is_empty()),
            uri: uri.to_string(),
            range: sym.range,
            selection_range: sym.selection_range,
        },
        children: sym
            .children
            .into_iter()
            .map(|child| outline_from_document_symbol(child, uri))
            .collect(),
    }
}

pub fn parse_workspace_symbols(value: Value) -> Result<Vec<WorkspaceSymbolMatch>> {
    if value.is_null() {
        return Ok(Vec::new());
    }

    let Some(arr) = value.as_array() else {
        return Err(anyhow!("workspace/symbol response is not an array"));
    };

    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let Some(obj) = item.as_object() else {
            continue;
        };
        let Some(name) = obj.get("name").and_then(|v| v.as_str()) else {
            continue;
        };
        let Some(kind) = obj.get("kind").and_then(|v| v.as_u64()) else {
            continue;
        };
        // WorkspaceSymbol may carry a location without a range (`{ uri }`);
        // those cannot be matched against a call item and are skipped.
        let Some(loc_val) = obj.get("location") else {
            continue;
        };
        let Ok(loc) = serde_json::from_value::<LspLocation>(loc_val.clone()) else {
            continue;
        };
        if let Ok(location) = to_resolved_location(&loc) {
            out.push(WorkspaceSymbolMatch {
                name: name.to_string(),
                kind: kind as u32,
                container_name: obj
                    .get("containerName")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .filter(|s| !s.is_empty()),
                location,
            });
        }
    }
    Ok(out)
}

pub fn to_resolved_location(loc: &LspLocation) -> Result<ResolvedLocation> {
    let path: PathBuf = uri_to_path(&loc.uri)?;
    Ok(ResolvedLocation {
        file_path: path.to_string_lossy().to_string(),
        uri: loc.uri.clone(),
        range: loc.range,
    })
}

pub fn hover_to_text(value: &Value) -> Option<String> {
    if value.is_null() {
        return None;
    }
    if let Some(s) = value.as_str() {
        return Some(s.to_string());
    }

    let contents = value.get("contents")?;
    match contents {
        Value::String(s) => Some(s.clone()),
        Value::Array(arr) => {
            let parts: Vec<String> = arr
                .iter()
                .filter_map(hover_content_item_to_text)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n\n"))
            }
        }
        Value::Object(_) => hover_content_item_to_text(contents),
        _ => None,
    }
}

fn hover_content_item_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        // MarkupContent { kind, value } and MarkedString { language, value }.
        Value::Object(obj) => obj.get("value").and_then(|v| v.as_str()).map(|s| s.to_string()),
        _ => None,
    }
}

pub fn parse_symbol_kind(kind: &str) -> Option<u32> {
    // LSP SymbolKind numbers:
    // https://microsoft.github.io/language-server-protocol/specifications/lsp/3.17/specification/#symbolKind
    match kind.to_ascii_lowercase().as_str() {
        "file" => Some(1),
        "module" => Some(2),
        "namespace" => Some(3),
        "package" => Some(4),
        "class" => Some(5),
        "method" => Some(6),
        "property" => Some(7),
        "field" => Some(8),
        "constructor" => Some(9),
        "enum" => Some(10),
        "interface" => Some(11),
        "function" => Some(12),
        "variable" => Some(13),
        "constant" => Some(14),
        "string" => Some(15),
        "number" => Some(16),
        "boolean" => Some(17),
        "array" => Some(18),
        "object" => Some(19),
        "key" => Some(20),
        "null" => Some(21),
        "enummember" | "enum_member" => Some(22),
        "struct" => Some(23),
        "event" => Some(24),
        "operator" => Some(25),
        "typeparameter" | "type_parameter" => Some(26),
        _ => None,
    }
}

pub fn symbol_kind_name(kind: u32) -> &'static str {
    match kind {
        1 => "File",
        2 => "Module",
        3 => "Namespace",
        4 => "Package",
        5 => "Class",
        6 => "Method",
        7 => "Property",
        8 => "Field",
        9 => "Constructor",
        10 => "Enum",
        11 => "Interface",
        12 => "Function",
        13 => "Variable",
        14 => "Constant",
        15 => "String",
        16 => "Number",
        17 => "Boolean",
        18 => "Array",
        19 => "Object",
        20 => "Key",
        21 => "Null",
        22 => "EnumMember",
        23 => "Struct",
        24 => "Event",
        25 => "Operator",
        26 => "TypeParameter",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(name: &str, line: u32) -> Value {
        json!({
            "name": name,
            "kind": 12,
            "uri": "file:///tmp/src/lib.rs",
            "range": { "start": { "line": line, "character": 0 }, "end": { "line": line + 3, "character": 1 } },
            "selectionRange": { "start": { "line": line, "character": 3 }, "end": { "line": line, "character": 8 } },
            "data": { "opaque": line }
        })
    }

    #[test]
    fn call_hierarchy_item_keeps_raw_value() {
        let value = item("alpha", 4);
        let parsed = parse_call_hierarchy_item(&value).unwrap();
        assert_eq!(parsed.name, "alpha");
        assert_eq!(parsed.selection_range.start.character, 3);
        assert_eq!(parsed.raw["data"]["opaque"], json!(4));
    }

    #[test]
    fn incoming_calls_preserve_server_order_and_merge_duplicates() {
        let response = json!([
            { "from": item("c", 30), "fromRanges": [] },
            { "from": item("a", 10), "fromRanges": [] },
            { "from": item("c", 30), "fromRanges": [
                { "start": { "line": 31, "character": 4 }, "end": { "line": 31, "character": 9 } }
            ] },
            { "from": item("b", 20) }
        ]);
        let calls = parse_incoming_calls(response).unwrap();
        let names: Vec<&str> = calls.iter().map(|c| c.item.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        assert_eq!(calls[0].from_ranges.len(), 1);
    }

    #[test]
    fn outgoing_calls_read_the_to_field() {
        let response = json!([{ "to": item("callee", 2), "fromRanges": [] }]);
        let calls = parse_outgoing_calls(response).unwrap();
        assert_eq!(calls[0].item.name, "callee");
        assert!(parse_incoming_calls(json!([{ "to": item("x", 1) }])).is_err());
    }

    #[test]
    fn null_responses_are_empty() {
        assert!(parse_prepared_items(Value::Null).unwrap().is_empty());
        assert!(parse_incoming_calls(Value::Null).unwrap().is_empty());
        assert!(parse_document_symbols(Value::Null, "file:///a.rs").unwrap().is_empty());
        assert!(parse_workspace_symbols(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn document_symbols_keep_nesting_and_uri() {
        let response = json!([
            {
                "name": "Config", "kind": 23, "detail": "",
                "range": { "start": { "line": 0, "character": 0 }, "end": { "line": 9, "character": 1 } },
                "selectionRange": { "start": { "line": 0, "character": 11 }, "end": { "line": 0, "character": 17 } },
                "children": [
                    {
                        "name": "path", "kind": 8, "detail": "PathBuf",
                        "range": { "start": { "line": 1, "character": 4 }, "end": { "line": 1, "character": 20 } },
                        "selectionRange": { "start": { "line": 1, "character": 8 }, "end": { "line": 1, "character": 12 } }
                    }
                ]
            }
        ]);
        let outline = parse_document_symbols(response, "file:///tmp/config.rs").unwrap();
        assert_eq!(outline.len(), 1);
        assert_eq!(outline[0].item.detail, None);
        assert_eq!(outline[0].children[0].item.name, "path");
        assert_eq!(outline[0].children[0].item.detail.as_deref(), Some("PathBuf"));
        assert_eq!(outline[0].children[0].item.uri, "file:///tmp/config.rs");
    }

    #[test]
    fn symbol_information_fallback_is_flat() {
        let response = json!([
            {
                "name": "main", "kind": 12, "containerName": "bin",
                "location": {
                    "uri": "file:///tmp/main.rs",
                    "range": { "start": { "line": 3, "character": 0 }, "end": { "line": 5, "character": 1 } }
                }
            }
        ]);
        let outline = parse_document_symbols(response, "file:///tmp/main.rs").unwrap();
        assert_eq!(outline.len(), 1);
        assert!(outline[0].children.is_empty());
        assert_eq!(outline[0].item.detail.as_deref(), Some("bin"));
    }

    #[test]
    fn workspace_symbols_skip_rangeless_locations() {
        let response = json!([
            { "name": "a", "kind": 12, "location": { "uri": "file:///tmp/a.rs" } },
            {
                "name": "b", "kind": 6, "containerName": "Impl",
                "location": {
                    "uri": "file:///tmp/b.rs",
                    "range": { "start": { "line": 1, "character": 0 }, "end": { "line": 2, "character": 0 } }
                }
            }
        ]);
        let matches = parse_workspace_symbols(response).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "b");
        assert_eq!(matches[0].container_name.as_deref(), Some("Impl"));
    }

    #[test]
    fn hover_to_text_joins_marked_strings() {
        let value = json!({ "contents": [{ "language": "rust", "value": "fn a()" }, "docs", ""] });
        assert_eq!(hover_to_text(&value).as_deref(), Some("fn a()\n\ndocs"));
        let markup = json!({ "contents": { "kind": "markdown", "value": "**x**" } });
        assert_eq!(hover_to_text(&markup).as_deref(), Some("**x**"));
        assert_eq!(hover_to_text(&Value::Null), None);
    }

    #[test]
    fn symbol_kind_names_follow_lsp_table() {
        assert_eq!(symbol_kind_name(12), "Function");
        assert_eq!(parse_symbol_kind("EnumMember"), Some(22));
        assert_eq!(symbol_kind_name(0), "Unknown");
    }
}
