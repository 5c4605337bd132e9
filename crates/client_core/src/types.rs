use std::fmt;

use shared::domain::{Item, ItemId};

use crate::error::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        })
    }
}

/// Bookkeeping for the one in-flight mutation an identifier may have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    pub kind: MutationKind,
    /// What the mirror entry goes back to if this mutation fails. `None`
    /// means the entry is removed.
    pub rollback: Option<Item>,
    pub(crate) token: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationEvent {
    Applied {
        kind: MutationKind,
        id: ItemId,
    },
    /// `id` is the identifier the mutation was submitted under; for a create
    /// that is the temporary id and `item` carries the server id.
    Confirmed {
        kind: MutationKind,
        id: ItemId,
        item: Option<Item>,
    },
    RolledBack {
        kind: MutationKind,
        id: ItemId,
        error: RemoteError,
    },
    Superseded {
        previous: MutationKind,
        next: MutationKind,
        id: ItemId,
    },
}
