use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, info, warn};

use crate::marshal::{Annotation, Rendered};
use crate::tree::TreeHandle;

/// Display target for rendered trees. Each `replace` swaps the whole
/// content of one tree's buffer.
pub trait BufferSink {
    fn replace(&mut self, handle: TreeHandle, lines: &[String], annotations: &[Annotation]);

    fn clear(&mut self, handle: TreeHandle);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferContent {
    pub lines: Vec<String>,
    pub annotations: Vec<Annotation>,
    /// Number of `replace` calls seen for this buffer.
    pub commits: usize,
}

/// In-memory buffers, shareable between the session and whoever displays them.
#[derive(Debug, Clone, Default)]
pub struct MemoryBuffer {
    buffers: Arc<Mutex<BTreeMap<TreeHandle, BufferContent>>>,
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&self, handle: TreeHandle) -> Option<BufferContent> {
        self.lock().get(&handle).cloned()
    }

    /// The buffer as plain text, annotations appended after two spaces.
    pub fn text(&self, handle: TreeHandle) -> Option<String> {
        let content = self.content(handle)?;
        let rendered = Rendered {
            lines: content.lines,
            annotations: content.annotations,
            ..Rendered::default()
        };
        Some(rendered.text())
    }

    pub fn handles(&self) -> Vec<TreeHandle> {
        self.lock().keys().copied().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<TreeHandle, BufferContent>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BufferSink for MemoryBuffer {
    fn replace(&mut self, handle: TreeHandle, lines: &[String], annotations: &[Annotation]) {
        let mut buffers = self.lock();
        let entry = buffers.entry(handle).or_default();
        entry.lines = lines.to_vec();
        entry.annotations = annotations.to_vec();
        entry.commits += 1;
    }

    fn clear(&mut self, handle: TreeHandle) {
        self.lock().remove(&handle);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        })
    }
}

/// Transient user-facing messages.
pub trait Notifier {
    fn notify(&mut self, level: Level, message: &str);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&mut self, level: Level, message: &str) {
        match level {
            Level::Info => info!("{message}"),
            Level::Warn => warn!("{message}"),
            Level::Error => error!("{message}"),
        }
    }
}

/// Keeps every message; handy for hosts that batch notifications.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    messages: Arc<Mutex<Vec<(Level, String)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(Level, String)> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn take(&self) -> Vec<(Level, String)> {
        std::mem::take(&mut *self.messages.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&mut self, level: Level, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((level, message.to_string()));
    }
}
