mod error;
mod icons;
mod marshal;
mod node;
mod registry;
mod resolver;
mod session;
mod sink;
mod tree;

pub use error::TreeError;

pub use icons::icon_for;

pub use marshal::{Annotation, FILE_KIND, INDENT_WIDTH, RenderOptions, Rendered, render};

pub use node::{
    Direction, Node, NodePath, ResolvedCall, SymbolPayload, TreeKind, direction_from_name,
};

pub use registry::Registry;

pub use resolver::{HierarchySource, check_direction, disambiguate, resolve_children};

pub use session::{ApplyOutcome, Completion, ExpandOutcome, Session, SessionOptions, Ticket};

pub use sink::{
    BufferContent, BufferSink, Level, MemoryBuffer, Notifier, RecordingNotifier, TracingNotifier,
};

pub use tree::{SourceLine, Tree, TreeHandle};
