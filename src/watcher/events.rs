//! Operation kinds and classification of raw notify events.

use std::fmt;
use std::path::PathBuf;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind};
use serde::Serialize;

/// The five operations a session dispatches callbacks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    /// Entry was created or moved into a watched directory.
    Create,
    /// File contents changed.
    Write,
    /// Entry was deleted.
    Remove,
    /// Entry was renamed or moved away.
    Rename,
    /// Permissions or other metadata changed.
    Chmod,
}

impl Op {
    /// Classify a notify event kind into exactly one operation.
    ///
    /// Returns `None` for kinds that have no callback slot: access
    /// notifications, the combined `Name(Both)` event emitted after a
    /// `From`/`To` pair, and unknown kinds.
    #[must_use]
    pub const fn classify(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                Some(Self::Create)
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => None,
            EventKind::Modify(ModifyKind::Name(_)) => Some(Self::Rename),
            EventKind::Modify(ModifyKind::Metadata(_)) => Some(Self::Chmod),
            EventKind::Modify(_) => Some(Self::Write),
            EventKind::Remove(_) => Some(Self::Remove),
            EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
        }
    }

    /// Lowercase name of the operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Write => "write",
            Self::Remove => "remove",
            Self::Rename => "rename",
            Self::Chmod => "chmod",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable summary of a dispatched event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub op: Op,
    pub paths: Vec<PathBuf>,
}

impl EventRecord {
    /// Summarize `event`, or `None` if it does not classify.
    #[must_use]
    pub fn from_event(event: &Event) -> Option<Self> {
        Op::classify(&event.kind).map(|op| Self {
            op,
            paths: event.paths.clone(),
        })
    }
}

impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        for path in &self.paths {
            write!(f, " {}", path.display())?;
        }
        Ok(())
    }
}
