use std::collections::BTreeMap;

use crate::protocol::{CommandKind, MessageId, Request};

/// Newest not-yet-executed request per command kind.
#[derive(Debug, Default)]
pub struct PendingTable {
    inner: BTreeMap<CommandKind, Request>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `request` the pending one for its kind, returning whichever
    /// request it replaced.
    pub fn supersede(&mut self, request: Request) -> Option<Request> {
        self.inner.insert(request.kind(), request)
    }

    pub fn pending_id(&self, kind: CommandKind) -> Option<MessageId> {
        self.inner.get(&kind).map(|request| request.id)
    }

    /// Empties the table, yielding requests in `CommandKind` order.
    pub fn take_all(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.inner).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
