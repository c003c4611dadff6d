//! Per-connection table of event handlers.
//!
//! Handlers are keyed by [`EventKind`] and fire in registration order. A
//! dispatch iterates a snapshot of the table taken before the first handler
//! runs, so handlers may register or unregister freely (including themselves)
//! without disturbing the dispatch in progress. No lock is held while a
//! handler runs.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::event::{Event, EventKind};

/// A registered callback.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Groups registrations so an owner can drop all of them at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Scope of registrations made through [`EventRouter::register`].
    pub const GLOBAL: ScopeId = ScopeId(0);
}

/// Identifies one registration. Unregistering it more than once is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationHandle {
    id: u64,
    kind: EventKind,
    scope: ScopeId,
}

impl RegistrationHandle {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }
}

struct Registration {
    id: u64,
    scope: ScopeId,
    handler: Handler,
}

#[derive(Default)]
struct Table {
    next_id: u64,
    next_scope: u64,
    by_kind: HashMap<EventKind, Vec<Registration>>,
}

/// Shared handle to a connection's handler table. Clones share the table.
#[derive(Clone, Default)]
pub struct EventRouter {
    table: Arc<Mutex<Table>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh scope for a group of registrations.
    pub fn new_scope(&self) -> ScopeId {
        let mut table = self.lock();
        table.next_scope += 1;
        ScopeId(table.next_scope)
    }

    /// Register a handler that lives until explicitly unregistered.
    pub fn register<F>(&self, kind: EventKind, handler: F) -> RegistrationHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register_scoped(ScopeId::GLOBAL, kind, handler)
    }

    /// Register a handler owned by `scope`.
    pub fn register_scoped<F>(&self, scope: ScopeId, kind: EventKind, handler: F) -> RegistrationHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut table = self.lock();
        table.next_id += 1;
        let id = table.next_id;
        table.by_kind.entry(kind).or_default().push(Registration {
            id,
            scope,
            handler: Arc::new(handler),
        });
        tracing::trace!(%kind, id, scope = scope.0, "Handler registered");
        RegistrationHandle { id, kind, scope }
    }

    /// Remove one registration. Returns false if it was already gone.
    pub fn unregister(&self, handle: &RegistrationHandle) -> bool {
        let mut table = self.lock();
        let Some(list) = table.by_kind.get_mut(&handle.kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| r.id != handle.id);
        let removed = list.len() != before;
        if list.is_empty() {
            table.by_kind.remove(&handle.kind);
        }
        if removed {
            tracing::trace!(kind = %handle.kind, id = handle.id, "Handler unregistered");
        }
        removed
    }

    /// Remove every registration owned by `scope`. Returns how many were removed.
    pub fn unregister_scope(&self, scope: ScopeId) -> usize {
        let mut table = self.lock();
        let mut removed = 0;
        table.by_kind.retain(|_, list| {
            let before = list.len();
            list.retain(|r| r.scope != scope);
            removed += before - list.len();
            !list.is_empty()
        });
        if removed > 0 {
            tracing::debug!(scope = scope.0, removed, "Scope unregistered");
        }
        removed
    }

    /// Invoke every handler registered for the event's kind, in registration
    /// order. Returns the number of handlers invoked.
    pub fn dispatch(&self, event: &Event) -> usize {
        let kind = event.kind();
        let snapshot: Vec<Handler> = {
            let table = self.lock();
            match table.by_kind.get(&kind) {
                Some(list) => list.iter().map(|r| Arc::clone(&r.handler)).collect(),
                None => Vec::new(),
            }
        };
        tracing::trace!(%kind, handlers = snapshot.len(), "Dispatching");
        for handler in &snapshot {
            handler(event);
        }
        snapshot.len()
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.lock().by_kind.get(&kind).map_or(0, Vec::len)
    }

    pub fn scope_count(&self, scope: ScopeId) -> usize {
        self.lock()
            .by_kind
            .values()
            .flat_map(|list| list.iter())
            .filter(|r| r.scope == scope)
            .count()
    }

    /// Total number of live registrations.
    pub fn len(&self) -> usize {
        self.lock().by_kind.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("registrations", &self.len())
            .finish()
    }
}
