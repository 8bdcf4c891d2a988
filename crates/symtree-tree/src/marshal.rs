//! Flattens a [`Tree`] into display lines.
//!
//! Rendering is a pure function of the tree: the same tree and options
//! always produce the same lines, annotations and line indices. Committing
//! the result (to a sink and to the tree's own maps) is the session's job.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use symtree_core::config::{
    DEFAULT_COLLAPSED_GLYPH, DEFAULT_EXPANDED_GLYPH, DEFAULT_GUIDE_GLYPH, IconStyle,
    ResolvedTreeConfig,
};
use symtree_lsp::uri_to_path;

use crate::icons::icon_for;
use crate::node::{Node, NodePath, SymbolPayload};
use crate::tree::{SourceLine, Tree};

/// Columns per indent unit.
pub const INDENT_WIDTH: usize = 2;

/// LSP `SymbolKind.File`.
pub const FILE_KIND: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub indent_guides: bool,
    pub icons: IconStyle,
    pub expanded_glyph: char,
    pub collapsed_glyph: char,
    pub guide_glyph: char,
    /// Call-tree annotations are shown relative to this directory.
    pub workspace_root: Option<PathBuf>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            indent_guides: true,
            icons: IconStyle::None,
            expanded_glyph: DEFAULT_EXPANDED_GLYPH,
            collapsed_glyph: DEFAULT_COLLAPSED_GLYPH,
            guide_glyph: DEFAULT_GUIDE_GLYPH,
            workspace_root: None,
        }
    }
}

impl From<&ResolvedTreeConfig> for RenderOptions {
    fn from(config: &ResolvedTreeConfig) -> Self {
        Self {
            indent_guides: config.indent_guides,
            icons: config.icons,
            expanded_glyph: config.expanded_glyph,
            collapsed_glyph: config.collapsed_glyph,
            guide_glyph: config.guide_glyph,
            workspace_root: None,
        }
    }
}

impl RenderOptions {
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }
}

/// Trailing display text bound to a rendered line (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Annotation {
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Rendered {
    pub lines: Vec<String>,
    pub annotations: Vec<Annotation>,
    /// `line_map[i]` is the node on line `i + 1`.
    pub line_map: Vec<NodePath>,
    /// Source file line (1-based) to the first rendered line showing a
    /// symbol declared there.
    pub source_lines: HashMap<u32, SourceLine>,
}

impl Rendered {
    pub fn text(&self) -> String {
        let mut out = String::new();
        let mut annotations = self.annotations.iter().peekable();
        for (idx, line) in self.lines.iter().enumerate() {
            out.push_str(line);
            if let Some(annotation) = annotations.next_if(|a| a.line == idx + 1) {
                out.push_str("  ");
                out.push_str(&annotation.text);
            }
            out.push('\n');
        }
        out
    }
}

pub fn render(tree: &Tree, options: &RenderOptions) -> Rendered {
    let mut rendered = Rendered::default();
    let mut path = Vec::new();
    visit(tree.root(), &mut path, options, &mut rendered);
    rendered
}

fn visit(node: &Node, path: &mut NodePath, options: &RenderOptions, out: &mut Rendered) {
    let line_no = out.lines.len() + 1;
    out.lines.push(format_line(node, options));
    out.line_map.push(path.clone());

    if let Some(text) = annotation_text(node.payload(), options) {
        out.annotations.push(Annotation {
            line: line_no,
            text,
        });
    }

    // A file symbol spans its document rather than being declared on a line.
    let payload = node.payload();
    if !matches!(payload, SymbolPayload::Document(item) if item.kind == FILE_KIND) {
        let file_line = payload.selection_range().start.line + 1;
        out.source_lines
            .entry(file_line)
            .or_insert_with(|| SourceLine {
                rendered_line: line_no,
                uri: payload.uri().to_string(),
            });
    }

    if node.is_expanded() || node.depth() == 0 {
        for (idx, child) in node.children().iter().enumerate() {
            path.push(idx);
            visit(child, path, options, out);
            path.pop();
        }
    }
}

fn format_line(node: &Node, options: &RenderOptions) -> String {
    let mut line = indent(node.depth(), options);
    let glyph = if node.is_resolved_leaf() {
        ' '
    } else if node.is_expanded() {
        options.expanded_glyph
    } else {
        options.collapsed_glyph
    };
    line.push(glyph);
    line.push(' ');

    let payload = node.payload();
    match icon_for(options.icons, payload.kind()) {
        Some(icon) => {
            line.push_str(icon);
            line.push(' ');
        }
        None => {
            line.push('[');
            line.push_str(payload.kind_name());
            line.push_str("] ");
        }
    }
    line.push_str(payload.name());
    line
}

fn indent(depth: usize, options: &RenderOptions) -> String {
    let mut out = String::with_capacity(depth * INDENT_WIDTH);
    for level in 1..=depth {
        if options.indent_guides && level > 1 {
            out.push(options.guide_glyph);
            out.push(' ');
        } else {
            out.push_str("  ");
        }
    }
    out
}

fn annotation_text(payload: &SymbolPayload, options: &RenderOptions) -> Option<String> {
    match payload {
        SymbolPayload::Document(_) => payload.detail().map(str::to_string),
        SymbolPayload::Call(_) | SymbolPayload::Resolved(_) => options
            .workspace_root
            .as_deref()
            .and_then(|root| relative_path(payload.uri(), root))
            .or_else(|| payload.detail().map(str::to_string)),
    }
}

fn relative_path(uri: &str, root: &Path) -> Option<String> {
    let path = uri_to_path(uri).ok()?;
    let rel = path.strip_prefix(root).ok()?;
    let text = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    (!text.is_empty()).then_some(text)
}
