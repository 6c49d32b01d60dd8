//! Surveyor: harvests id/class tokens from the tree in bounded chunks and
//! asks the background lookup service which generic selectors apply here.
//!
//! Keeps the local selector set small: only selectors relevant to tokens
//! actually present on the page ever reach the filtering runtime. Shuts
//! itself down for the page's lifetime once lookups stop yielding anything.

use std::collections::{BTreeSet, HashSet};

use crate::dom::{Dom, NodeId};
use crate::scheduler::{Job, Scheduler};
use crate::transport::{Request, SelectorLookupRequest, SelectorLookupResponse, Transport};

/// Nodes inspected per pass.
pub const CHUNK_SIZE: usize = 1000;
/// Consecutive miss passes before shutdown is considered.
const MISS_LIMIT: u32 = 64;
/// Minimum quiet time since the last hit before shutdown.
const QUIET_MS: u64 = 60_000;

pub struct Surveyor {
    hostname: String,
    /// Not-yet-inspected nodes, by token kind.
    pending_ids: Vec<NodeId>,
    pending_classes: Vec<NodeId>,
    /// Tokens already sent to the lookup service; never re-sent.
    sent_ids: HashSet<String>,
    sent_classes: HashSet<String>,
    miss_count: u32,
    last_hit_ms: u64,
    dead: bool,
}

impl Surveyor {
    pub fn new(hostname: &str, now_ms: u64) -> Self {
        Self {
            hostname: hostname.to_string(),
            pending_ids: Vec::new(),
            pending_classes: Vec::new(),
            sent_ids: HashSet::new(),
            sent_classes: HashSet::new(),
            miss_count: 0,
            last_hit_ms: now_ms,
            dead: false,
        }
    }

    /// Permanently disabled: further tree growth is assumed unlikely to
    /// yield new generic hits.
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    /// Bootstrap against current document state.
    pub fn on_dom_created(&mut self, dom: &Dom, sched: &mut Scheduler) {
        self.enqueue_subtree(dom, dom.root(), sched);
    }

    /// New subtree roots arrived.
    pub fn on_dom_changed(&mut self, dom: &Dom, added: &[NodeId], sched: &mut Scheduler) {
        for &node in added {
            self.enqueue_subtree(dom, node, sched);
        }
    }

    fn enqueue_subtree(&mut self, dom: &Dom, root: NodeId, sched: &mut Scheduler) {
        if self.dead {
            return;
        }
        let mut queued = false;
        let nodes = if dom.is_element(root) {
            let mut v = vec![root];
            v.extend(dom.element_descendants(root));
            v
        } else {
            dom.element_descendants(root)
        };
        for node in nodes {
            let el = match dom.as_element(node) {
                Some(el) => el,
                None => continue,
            };
            if el.id.is_some() {
                self.pending_ids.push(node);
                queued = true;
            }
            if !el.classes.is_empty() {
                self.pending_classes.push(node);
                queued = true;
            }
        }
        if queued {
            sched.defer_idle(Job::SurveyPass);
        }
    }

    /// Drain one bounded chunk and fire a lookup if it yields unseen tokens.
    /// Leftover work re-schedules itself.
    pub fn pass(
        &mut self,
        dom: &Dom,
        exceptions: &[String],
        transport: &mut dyn Transport,
        sched: &mut Scheduler,
    ) {
        if self.dead {
            self.pending_ids.clear();
            self.pending_classes.clear();
            return;
        }

        let mut budget = CHUNK_SIZE;
        let mut id_tokens: BTreeSet<String> = BTreeSet::new();
        let mut class_tokens: BTreeSet<String> = BTreeSet::new();

        while budget > 0 {
            let node = match self.pending_ids.pop() {
                Some(n) => n,
                None => break,
            };
            budget -= 1;
            if let Some(id) = dom.as_element(node).and_then(|el| el.id.clone()) {
                if self.sent_ids.insert(id.clone()) {
                    id_tokens.insert(id);
                }
            }
        }
        while budget > 0 {
            let node = match self.pending_classes.pop() {
                Some(n) => n,
                None => break,
            };
            budget -= 1;
            if let Some(el) = dom.as_element(node) {
                for class in &el.classes {
                    if self.sent_classes.insert(class.clone()) {
                        class_tokens.insert(class.clone());
                    }
                }
            }
        }

        if !self.pending_ids.is_empty() || !self.pending_classes.is_empty() {
            sched.defer_idle(Job::SurveyPass);
        }

        if id_tokens.is_empty() && class_tokens.is_empty() {
            return;
        }

        transport.send(Request::SelectorLookup(SelectorLookupRequest {
            hostname: self.hostname.clone(),
            id_tokens: id_tokens.into_iter().collect(),
            class_tokens: class_tokens.into_iter().collect(),
            exception_selectors: exceptions.to_vec(),
        }));
    }

    /// Process a lookup round trip; returns whether it was a hit.
    pub fn on_lookup_response(&mut self, response: &SelectorLookupResponse, now_ms: u64) -> bool {
        if response.is_miss() {
            self.miss_count += 1;
            if self.miss_count >= MISS_LIMIT
                && now_ms.saturating_sub(self.last_hit_ms) >= QUIET_MS
            {
                self.dead = true;
                self.pending_ids.clear();
                self.pending_classes.clear();
                log::debug!("surveyor shut down after {} misses", self.miss_count);
            }
            false
        } else {
            self.miss_count = 0;
            self.last_hit_ms = now_ms;
            true
        }
    }
}
