//! Context Hierarchy
//!
//! Four scopes over one store: `root` is bound to the coordinator, `main` is its
//! child, and `read` and `write` are children of `main`. Reads and writes each run
//! on their own serial sequence. Writes are promoted `write → main → root` by a
//! commit cascade that either lands completely or leaves nothing behind.

pub mod changeset;
pub mod hierarchy;
pub mod sequence;

pub use changeset::ChangeSet;
pub use hierarchy::{ContextHierarchy, Scope};
pub use sequence::{OperationHandle, Sequence, SequenceHandle};

/// Position of a context in the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextRole {
    Root,
    Main,
    Read,
    Write,
}

impl ContextRole {
    pub fn parent(&self) -> Option<ContextRole> {
        match self {
            ContextRole::Root => None,
            ContextRole::Main => Some(ContextRole::Root),
            ContextRole::Read | ContextRole::Write => Some(ContextRole::Main),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ContextRole::Root => "root",
            ContextRole::Main => "main",
            ContextRole::Read => "read",
            ContextRole::Write => "write",
        }
    }
}

/// A role and the changes staged in it
#[derive(Debug, Clone)]
pub struct Context {
    pub role: ContextRole,
    pub pending: ChangeSet,
}

impl Context {
    pub fn new(role: ContextRole) -> Self {
        Self {
            role,
            pending: ChangeSet::new(),
        }
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
