//! Change watcher: the single source of tree-change events.
//!
//! Raw mutation records accumulate on the document; the watcher schedules a
//! coalesced flush and condenses a batch into two semantic facts: which
//! element nodes were added, and whether any removal occurred. Attribute
//! changes are carried alongside for the components that registered watches.
//!
//! Two states: *idle* (no observation; whitelisted page or torn down) and
//! *watching*. The first listener registered after the document is ready
//! starts observation; the last one leaving stops it.

use crate::dom::{Dom, MutationRecord, NodeId};
use crate::scheduler::{Job, Scheduler};

/// Non-content tags excluded from added-node reporting.
const IGNORE_TAGS: &[&str] = &["br", "head", "link", "meta", "script", "style"];

/// A burst larger than this defers the flush by one macro step instead of
/// running at the next idle opportunity.
const LARGE_BURST: usize = 1000;
const MACRO_STEP_MS: u64 = 1;

/// Identifies a registered listener. Dispatch iterates a snapshot of the
/// registry, so register/unregister during dispatch only affects the next
/// batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKey {
    Runtime,
    Surveyor,
    Collapser,
}

/// One coalesced change batch.
#[derive(Debug, Default)]
pub struct DomChange {
    /// Added element nodes: attached, content-bearing tags only.
    pub added: Vec<NodeId>,
    /// Whether any node left the tree. Identities are not reported;
    /// consumers only need "re-evaluate".
    pub removed: bool,
    /// Attribute changes, routed to watch registrations.
    pub attr_changes: Vec<(NodeId, String)>,
}

impl DomChange {
    /// Whether the batch warrants an `on_dom_changed` dispatch.
    pub fn reportable(&self) -> bool {
        !self.added.is_empty() || self.removed
    }
}

/// The watcher state machine.
#[derive(Debug, Default)]
pub struct DomWatcher {
    listeners: Vec<ListenerKey>,
    watching: bool,
    ready: bool,
}

impl DomWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_watching(&self) -> bool {
        self.watching
    }

    /// Register a listener. Returns true if the document is already ready,
    /// in which case the caller must deliver an immediate `on_dom_created`
    /// so the listener can bootstrap against current state.
    pub fn register(&mut self, key: ListenerKey, dom: &mut Dom) -> bool {
        if !self.listeners.contains(&key) {
            self.listeners.push(key);
        }
        if self.ready && !self.watching {
            self.start(dom);
        }
        self.ready
    }

    /// Unregister a listener; observation stops when the last one leaves.
    pub fn unregister(&mut self, key: ListenerKey, dom: &mut Dom) {
        self.listeners.retain(|k| *k != key);
        if self.listeners.is_empty() && self.watching {
            self.stop(dom);
        }
    }

    /// The document reached ready state.
    pub fn document_ready(&mut self, dom: &mut Dom) {
        self.ready = true;
        if !self.listeners.is_empty() && !self.watching {
            self.start(dom);
        }
    }

    /// Stop observing entirely (page whitelisted or content script torn
    /// down). Listener registrations survive a restart via `document_ready`.
    pub fn shutdown(&mut self, dom: &mut Dom) {
        if self.watching {
            self.stop(dom);
        }
        self.listeners.clear();
    }

    fn start(&mut self, dom: &mut Dom) {
        self.watching = true;
        dom.set_recording(true);
    }

    fn stop(&mut self, dom: &mut Dom) {
        self.watching = false;
        dom.set_recording(false);
    }

    /// Immutable snapshot of the registry for one dispatch.
    pub fn snapshot_listeners(&self) -> Vec<ListenerKey> {
        self.listeners.clone()
    }

    /// Schedule a coalesced flush for the document's accumulated batch.
    pub fn schedule_flush(&self, dom: &Dom, sched: &mut Scheduler) {
        if !self.watching || dom.pending_mutation_count() == 0 {
            return;
        }
        if dom.pending_mutation_count() > LARGE_BURST {
            // Give the host a macro step before we touch a huge batch.
            sched.defer_after(Job::FlushMutations, MACRO_STEP_MS);
        } else {
            sched.defer_idle(Job::FlushMutations);
        }
    }

    /// Condense the accumulated raw batch. Returns `None` when there is
    /// nothing at all to route.
    pub fn flush(&mut self, dom: &mut Dom) -> Option<DomChange> {
        if !self.watching {
            dom.take_mutations();
            return None;
        }
        let records = dom.take_mutations();
        if records.is_empty() {
            return None;
        }

        let mut change = DomChange::default();
        for record in records {
            match record {
                MutationRecord::ChildAdded(node) => {
                    if !dom.is_element(node) || !dom.is_attached(node) {
                        continue;
                    }
                    let tag = dom.as_element(node).map(|e| e.tag.as_str()).unwrap_or("");
                    if IGNORE_TAGS.contains(&tag) {
                        continue;
                    }
                    if !change.added.contains(&node) {
                        change.added.push(node);
                    }
                }
                MutationRecord::ChildRemoved(_) => {
                    change.removed = true;
                }
                MutationRecord::AttrChanged { node, name } => {
                    change.attr_changes.push((node, name));
                }
            }
        }

        if change.reportable() || !change.attr_changes.is_empty() {
            log::debug!(
                "dom flush: {} added, removed={}, {} attr changes",
                change.added.len(),
                change.removed,
                change.attr_changes.len()
            );
            Some(change)
        } else {
            None
        }
    }
}
