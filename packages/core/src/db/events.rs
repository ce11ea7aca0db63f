//! Page lifecycle events
//!
//! Every structural operation of the repository announces itself through an
//! [`EventHub`]. Listeners registered for an event kind run synchronously, in
//! registration order, before the operation returns. Each event is then also
//! forwarded on a tokio broadcast channel for asynchronous observers.
//!
//! # Event Flow
//!
//! 1. A repository operation (save, trash, delete, ...) reaches a lifecycle point
//! 2. `EventHub::emit` calls the listeners registered for that kind, in order
//! 3. The event is sent to every broadcast subscriber
//!
//! Listeners receive snapshots of the affected pages and must not assume they
//! can call back into the repository synchronously.

use crate::models::{Page, PageId};
use libsql::Value;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Named lifecycle points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PageEventKind {
    SaveReady,
    Saved,
    Added,
    Moved,
    Renamed,
    TemplateChanged,
    Trashed,
    Restored,
    DeleteReady,
    Deleted,
    CloneReady,
    Cloned,
    StatusChangeReady,
    StatusChanged,
    Published,
    Unpublished,
    FoundResults,
}

impl PageEventKind {
    /// Event name as exposed to listeners and logs
    pub fn name(&self) -> &'static str {
        match self {
            PageEventKind::SaveReady => "saveReady",
            PageEventKind::Saved => "saved",
            PageEventKind::Added => "added",
            PageEventKind::Moved => "moved",
            PageEventKind::Renamed => "renamed",
            PageEventKind::TemplateChanged => "templateChanged",
            PageEventKind::Trashed => "trashed",
            PageEventKind::Restored => "restored",
            PageEventKind::DeleteReady => "deleteReady",
            PageEventKind::Deleted => "deleted",
            PageEventKind::CloneReady => "cloneReady",
            PageEventKind::Cloned => "cloned",
            PageEventKind::StatusChangeReady => "statusChangeReady",
            PageEventKind::StatusChanged => "statusChanged",
            PageEventKind::Published => "published",
            PageEventKind::Unpublished => "unpublished",
            PageEventKind::FoundResults => "foundResults",
        }
    }
}

/// One lifecycle notification
#[derive(Debug, Clone)]
pub struct PageEvent {
    pub kind: PageEventKind,
    /// Affected pages. `cloned` carries `[original, copy]`, `foundResults`
    /// carries the result set.
    pub pages: Vec<Page>,
    /// Changed attributes/fields where applicable
    pub changes: Vec<String>,
    /// Canonical selector for `foundResults`
    pub selector: Option<String>,
}

impl PageEvent {
    pub fn new(kind: PageEventKind, page: &Page) -> Self {
        Self {
            kind,
            pages: vec![page.clone()],
            changes: Vec::new(),
            selector: None,
        }
    }

    pub fn with_changes(mut self, changes: Vec<String>) -> Self {
        self.changes = changes;
        self
    }

    pub fn page(&self) -> Option<&Page> {
        self.pages.first()
    }

    pub fn page_ids(&self) -> Vec<PageId> {
        self.pages.iter().map(Page::id).collect()
    }
}

pub type PageListener = Arc<dyn Fn(&PageEvent) + Send + Sync>;

/// Contributes extra `pages` columns to the core-row write
pub type SaveColumnsHook = Arc<dyn Fn(&Page) -> Vec<(String, Value)> + Send + Sync>;

/// Ordered listener registry plus broadcast fan-out
pub struct EventHub {
    listeners: RwLock<HashMap<PageEventKind, Vec<PageListener>>>,
    save_column_hooks: RwLock<Vec<SaveColumnsHook>>,
    event_tx: broadcast::Sender<PageEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("listener_kinds", &self.listeners.read().len())
            .field("subscribers", &self.event_tx.receiver_count())
            .finish()
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: RwLock::new(HashMap::new()),
            save_column_hooks: RwLock::new(Vec::new()),
            event_tx,
        }
    }

    /// Register a listener for `kind`; listeners run in registration order
    pub fn on<F>(&self, kind: PageEventKind, listener: F)
    where
        F: Fn(&PageEvent) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .entry(kind)
            .or_default()
            .push(Arc::new(listener));
    }

    pub fn listener_count(&self, kind: PageEventKind) -> usize {
        self.listeners.read().get(&kind).map_or(0, Vec::len)
    }

    /// Register a hook adding columns to every core-row write
    pub fn add_save_columns_hook<F>(&self, hook: F)
    where
        F: Fn(&Page) -> Vec<(String, Value)> + Send + Sync + 'static,
    {
        self.save_column_hooks.write().push(Arc::new(hook));
    }

    /// Collect extra columns from every registered hook, in order
    pub fn save_columns(&self, page: &Page) -> Vec<(String, Value)> {
        let hooks = self.save_column_hooks.read().clone();
        hooks.iter().flat_map(|hook| hook(page)).collect()
    }

    /// Subscribe to the broadcast stream of every event
    pub fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.event_tx.subscribe()
    }

    /// Dispatch to listeners, then broadcast
    ///
    /// The listener list is snapshotted before dispatch so a listener may
    /// register further listeners without deadlocking.
    pub fn emit(&self, event: PageEvent) {
        let listeners = self
            .listeners
            .read()
            .get(&event.kind)
            .cloned()
            .unwrap_or_default();
        for listener in &listeners {
            listener(&event);
        }
        // No subscribers is not an error
        let _ = self.event_tx.send(event);
    }
}
