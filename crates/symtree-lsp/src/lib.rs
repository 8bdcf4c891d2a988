mod client;
mod lsp;
mod symbol;

pub use client::{SymbolClient, SymbolClientOptions};

pub use lsp::{LspLocation, LspPosition, LspRange, path_to_uri, uri_to_path};

pub use symbol::{
    CallHierarchyItem, CallMatch, DocumentSymbolItem, OutlineSymbol, ResolvedLocation,
    WorkspaceSymbolMatch, hover_to_text, parse_call_hierarchy_item, parse_document_symbols,
    parse_incoming_calls, parse_outgoing_calls, parse_prepared_items, parse_symbol_kind,
    parse_workspace_symbols, symbol_kind_name,
};
