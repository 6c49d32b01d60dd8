//! Filtering runtime: owns the active descriptor set for one page and keeps
//! the applied hide/remove actions consistent as the tree changes shape.
//!
//! This is the explicit per-page context object: descriptor map, hidden-node
//! set, budgets and attribute watches all live here and are torn down with
//! the page. Nothing is shared across pages or sessions.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Instant;

use crate::budget::SelectorBudget;
use crate::dom::{Dom, NodeFlags, NodeId};
use crate::pipeline::{self, ExecEnv};
use crate::scheduler::{Job, Scheduler};
use crate::selector::{Action, Descriptor};

struct Entry {
    desc: Descriptor,
    budget: SelectorBudget,
    /// Diagnostic for a disabled descriptor is surfaced once.
    announced: bool,
}

/// Per-page filtering state.
pub struct FilteringContext {
    /// Canonical raw selector -> procedural entry.
    procedural: BTreeMap<String, Entry>,
    /// Plain CSS selectors applied via a stylesheet rule, not the pipeline.
    stylesheet: BTreeSet<String>,
    /// Raw forms suppressed by exception filters.
    exceptions: Vec<String>,
    /// Nodes currently hidden by procedural evaluation.
    hidden: HashSet<NodeId>,
    env: ExecEnv,
    dirty: bool,
}

impl FilteringContext {
    pub fn new() -> Self {
        Self {
            procedural: BTreeMap::new(),
            stylesheet: BTreeSet::new(),
            exceptions: Vec::new(),
            hidden: HashSet::new(),
            env: ExecEnv::default(),
            dirty: false,
        }
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Activate a descriptor. Plain CSS goes to the stylesheet set; anything
    /// with tasks or an action is evaluated through the pipeline.
    pub fn register(&mut self, desc: Descriptor, now_ms: u64) {
        if self.exceptions.iter().any(|e| *e == desc.raw) {
            return;
        }
        if desc.is_plain_css() {
            self.stylesheet.insert(desc.selector);
        } else {
            let raw = desc.raw.clone();
            self.procedural.entry(raw).or_insert_with(|| Entry {
                desc,
                budget: SelectorBudget::new(now_ms),
                announced: false,
            });
        }
        self.dirty = true;
    }

    /// Apply an exception filter: deactivate by canonical raw form and keep
    /// suppressing future registrations of the same form.
    pub fn register_exception(&mut self, raw: &str) {
        self.procedural.remove(raw);
        self.stylesheet.remove(raw);
        if !self.exceptions.iter().any(|e| e == raw) {
            self.exceptions.push(raw.to_string());
        }
    }

    pub fn exceptions(&self) -> &[String] {
        &self.exceptions
    }

    pub fn procedural_count(&self) -> usize {
        self.procedural.len()
    }

    pub fn disabled_count(&self) -> usize {
        self.procedural
            .values()
            .filter(|e| e.budget.is_disabled())
            .count()
    }

    /// Selectors for the stylesheet rule the embedder injects.
    pub fn stylesheet_selectors(&self) -> Vec<&str> {
        self.stylesheet.iter().map(String::as_str).collect()
    }

    pub fn is_hidden(&self, node: NodeId) -> bool {
        self.hidden.contains(&node)
    }

    /// Whether a re-evaluation is due.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    // -------------------------------------------------------------------------
    // Change notifications
    // -------------------------------------------------------------------------

    /// A coalesced tree-change batch arrived.
    pub fn on_dom_changed(&mut self, sched: &mut Scheduler) {
        if self.procedural.is_empty() {
            return;
        }
        self.dirty = true;
        sched.defer_idle(Job::Reevaluate);
    }

    /// An attribute changed; re-evaluate only if a `watch-attr` task
    /// registered interest in it.
    pub fn on_attr_changed(&mut self, node: NodeId, attr: &str, sched: &mut Scheduler) {
        if self.env.attr_watches.is_watched(node, attr) {
            self.dirty = true;
            sched.defer_idle(Job::Reevaluate);
        }
    }

    // -------------------------------------------------------------------------
    // Evaluation
    // -------------------------------------------------------------------------

    /// Run one re-evaluation pass over every descriptor with remaining
    /// budget, then reconcile the hidden-node set.
    pub fn revaluate(&mut self, dom: &mut Dom, now_ms: u64) {
        self.dirty = false;
        let mut new_hidden: HashSet<NodeId> = HashSet::new();
        let mut removals: Vec<NodeId> = Vec::new();

        for (raw, entry) in self.procedural.iter_mut() {
            entry.budget.replenish(now_ms);
            if !entry.budget.has_allowance() {
                if entry.budget.is_disabled() && !entry.announced {
                    entry.announced = true;
                    log::info!("procedural selector disabled (budget exhausted): {raw}");
                }
                continue;
            }

            let started = Instant::now();
            self.env.fault = None;
            let nodes = pipeline::exec(dom, &entry.desc, None, &mut self.env);
            let cost_ms = started.elapsed().as_secs_f64() * 1000.0;
            entry.budget.charge(cost_ms);
            if entry.budget.is_disabled() && !entry.announced {
                entry.announced = true;
                log::info!("procedural selector disabled (budget exhausted): {raw}");
            }

            if let Some(fault) = self.env.fault.take() {
                // Contained: matches nothing this pass, no retry acceleration.
                log::warn!("evaluation fault in '{raw}': {fault}");
                continue;
            }

            match &entry.desc.action {
                Some(Action::Remove) => removals.extend(nodes),
                _ => {
                    for node in nodes {
                        dom.set_hidden(node, NodeFlags::HIDDEN_BY_FILTER, true);
                        new_hidden.insert(node);
                    }
                }
            }
        }

        for node in removals {
            dom.detach(node);
            dom.clear_text(node);
        }

        // Anything hidden last pass but unmatched now is revealed again.
        for stale in self.hidden.difference(&new_hidden) {
            dom.set_hidden(*stale, NodeFlags::HIDDEN_BY_FILTER, false);
        }
        self.hidden = new_hidden;
    }

    /// Deduct synthetic cost from a descriptor's budget. Lets an embedder
    /// account for time spent outside `revaluate` (and tests exercise the
    /// disable floor deterministically).
    pub fn charge_cost(&mut self, raw: &str, cost_ms: f64) {
        if let Some(entry) = self.procedural.get_mut(raw) {
            entry.budget.charge(cost_ms);
        }
    }

    /// Tear down all page state, revealing everything we hid.
    pub fn teardown(&mut self, dom: &mut Dom) {
        for node in self.hidden.drain() {
            dom.set_hidden(node, NodeFlags::HIDDEN_BY_FILTER, false);
        }
        self.procedural.clear();
        self.stylesheet.clear();
        self.exceptions.clear();
        self.env.attr_watches.clear();
        self.dirty = false;
    }
}

impl Default for FilteringContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{ALLOWANCE_MS, DISABLE_FLOOR_MS};
    use crate::selector::{Pattern, TaskSpec};

    fn has_text_descriptor(selector: &str, text: &str) -> Descriptor {
        let mut d = Descriptor {
            selector: selector.to_string(),
            tasks: vec![TaskSpec::HasText(Pattern::new(text).unwrap())],
            action: None,
            raw: String::new(),
        };
        d.rebuild_raw();
        d
    }

    #[test]
    fn test_hide_then_unhide_when_no_longer_matched() {
        let mut dom = Dom::new();
        let body = dom.elem(dom.root(), "body");
        let ad = dom.elem(body, "div");
        dom.set_attr(ad, "class", "ad");
        let label = dom.text(ad, "Sponsored");

        let mut ctx = FilteringContext::new();
        ctx.register(has_text_descriptor(".ad", "Sponsored"), 0);
        ctx.revaluate(&mut dom, 0);
        assert!(ctx.is_hidden(ad));
        assert!(dom.is_hidden(ad));

        // Pass N+1: the text no longer matches, the node is revealed.
        dom.set_text(label, "organic");
        ctx.revaluate(&mut dom, 16);
        assert!(!ctx.is_hidden(ad));
        assert!(!dom.is_hidden(ad));
    }

    #[test]
    fn test_remove_action_detaches_and_clears() {
        let mut dom = Dom::new();
        let body = dom.elem(dom.root(), "body");
        let ad = dom.elem(body, "div");
        dom.set_attr(ad, "class", "ad");
        dom.text(ad, "Sponsored");

        let mut desc = has_text_descriptor(".ad", "Sponsored");
        desc.action = Some(Action::Remove);
        desc.rebuild_raw();

        let mut ctx = FilteringContext::new();
        ctx.register(desc, 0);
        ctx.revaluate(&mut dom, 0);
        assert!(!dom.is_attached(ad));
        assert_eq!(dom.text_content(ad), "");
    }

    #[test]
    fn test_budget_exhaustion_disables_permanently() {
        let mut dom = Dom::new();
        let body = dom.elem(dom.root(), "body");

        let desc = has_text_descriptor(".ad", "x");
        let raw = desc.raw.clone();
        let mut ctx = FilteringContext::new();
        ctx.register(desc, 0);
        ctx.charge_cost(&raw, ALLOWANCE_MS - DISABLE_FLOOR_MS + 1.0);
        assert_eq!(ctx.disabled_count(), 1);

        // A matching node appears, but the descriptor is never evaluated
        // again, even long after (replenishment cannot resurrect it).
        let ad = dom.elem(body, "div");
        dom.set_attr(ad, "class", "ad");
        dom.text(ad, "x");
        ctx.revaluate(&mut dom, 600_000);
        assert!(!ctx.is_hidden(ad));
        assert_eq!(ctx.disabled_count(), 1);
    }

    #[test]
    fn test_exception_suppresses_registration() {
        let desc = has_text_descriptor(".ad", "x");
        let raw = desc.raw.clone();
        let mut ctx = FilteringContext::new();
        ctx.register(desc.clone(), 0);
        assert_eq!(ctx.procedural_count(), 1);

        ctx.register_exception(&raw);
        assert_eq!(ctx.procedural_count(), 0);
        // Late re-registration of the same form stays suppressed.
        ctx.register(desc, 0);
        assert_eq!(ctx.procedural_count(), 0);
    }

    #[test]
    fn test_plain_css_goes_to_stylesheet() {
        let mut ctx = FilteringContext::new();
        ctx.register(Descriptor::plain("div.ad"), 0);
        assert_eq!(ctx.procedural_count(), 0);
        assert_eq!(ctx.stylesheet_selectors(), vec!["div.ad"]);
    }

    #[test]
    fn test_dirty_only_with_active_procedural() {
        let mut sched = Scheduler::new();
        let mut ctx = FilteringContext::new();
        ctx.on_dom_changed(&mut sched);
        assert!(!sched.has_pending());

        ctx.register(has_text_descriptor(".ad", "x"), 0);
        sched.take_due();
        ctx.on_dom_changed(&mut sched);
        assert_eq!(sched.take_due(), vec![Job::Reevaluate]);
    }
}
