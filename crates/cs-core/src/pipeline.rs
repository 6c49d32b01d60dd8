//! Task pipeline: executes a compiled descriptor against the document tree.
//!
//! Each task maps one input node to zero or more output nodes; the pipeline
//! threads the output of each task into the next, in declaration order,
//! stopping early once the working set is empty. Stateless between
//! evaluations except for attribute-watch registrations and the fault flag,
//! both carried in [`ExecEnv`].

use std::collections::HashSet;

use crate::css;
use crate::dom::{Dom, NodeId};
use crate::selector::{Descriptor, TaskSpec, UpwardArg};
use crate::xpath;

// =============================================================================
// Execution environment
// =============================================================================

/// Attribute watches registered by `watch-attr` tasks. Owned by the caller
/// and consulted when routing attribute mutations.
#[derive(Debug, Default)]
pub struct AttrWatchSet {
    watches: Vec<(NodeId, Vec<String>)>,
}

impl AttrWatchSet {
    pub fn register(&mut self, node: NodeId, attrs: &[String]) {
        match self.watches.iter_mut().find(|(n, _)| *n == node) {
            Some((_, existing)) => {
                for a in attrs {
                    if !existing.contains(a) {
                        existing.push(a.clone());
                    }
                }
            }
            None => self.watches.push((node, attrs.to_vec())),
        }
    }

    /// True if an attribute change on this node must force re-evaluation.
    pub fn is_watched(&self, node: NodeId, attr: &str) -> bool {
        self.watches.iter().any(|(n, attrs)| {
            *n == node && (attrs.is_empty() || attrs.iter().any(|a| a.eq_ignore_ascii_case(attr)))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    pub fn clear(&mut self) {
        self.watches.clear();
    }
}

/// Per-pass execution state.
#[derive(Debug, Default)]
pub struct ExecEnv {
    pub attr_watches: AttrWatchSet,
    /// First fault encountered this pass, if any. A faulted descriptor
    /// matches nothing; the fault never propagates to the embedder.
    pub fault: Option<String>,
}

impl ExecEnv {
    fn faulted(&mut self, msg: String) {
        if self.fault.is_none() {
            self.fault = Some(msg);
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Evaluate a descriptor, collecting all matched nodes.
pub fn exec(dom: &Dom, desc: &Descriptor, root: Option<NodeId>, env: &mut ExecEnv) -> Vec<NodeId> {
    let mut set = match prime(dom, desc, root, env) {
        Some(set) => set,
        None => return Vec::new(),
    };

    for task in &desc.tasks {
        let mut out = Vec::new();
        for &node in &set {
            transpose(dom, task, node, &mut out, env);
            if env.fault.is_some() {
                return Vec::new();
            }
        }
        set = dedupe(out);
        if set.is_empty() {
            break;
        }
    }
    set
}

/// Short-circuiting existence check: true as soon as one node survives the
/// full chain. Required for correct `has`/`if-not` guard semantics.
pub fn test(dom: &Dom, desc: &Descriptor, root: Option<NodeId>, env: &mut ExecEnv) -> bool {
    let set = match prime(dom, desc, root, env) {
        Some(set) => set,
        None => return false,
    };
    set.into_iter()
        .any(|node| survives(dom, &desc.tasks, node, env))
}

fn survives(dom: &Dom, tasks: &[TaskSpec], node: NodeId, env: &mut ExecEnv) -> bool {
    let task = match tasks.first() {
        Some(t) => t,
        None => return true,
    };
    let mut out = Vec::new();
    transpose(dom, task, node, &mut out, env);
    if env.fault.is_some() {
        return false;
    }
    out.into_iter().any(|n| survives(dom, &tasks[1..], n, env))
}

/// Initial working set: the CSS prefix queried under the root, or the root
/// itself when the prefix is empty.
fn prime(
    dom: &Dom,
    desc: &Descriptor,
    root: Option<NodeId>,
    env: &mut ExecEnv,
) -> Option<Vec<NodeId>> {
    let scope = root.unwrap_or_else(|| dom.root());
    if desc.selector.is_empty() {
        return Some(vec![scope]);
    }
    match css::parse_selector_list(&desc.selector) {
        Ok(list) => {
            let scope = if scope == dom.root() { None } else { Some(scope) };
            Some(list.query_all(dom, scope))
        }
        Err(e) => {
            env.faulted(format!("selector '{}': {}", desc.selector, e));
            None
        }
    }
}

/// Map one input node to its outputs for a single task.
fn transpose(dom: &Dom, task: &TaskSpec, node: NodeId, out: &mut Vec<NodeId>, env: &mut ExecEnv) {
    match task {
        TaskSpec::Has { hold, inner } => {
            if test(dom, inner, Some(node), env) == *hold {
                out.push(node);
            }
        }
        TaskSpec::HasText(pattern) => {
            if pattern.is_match(&dom.text_content(node)) {
                out.push(node);
            }
        }
        TaskSpec::MatchesCss {
            pseudo,
            prop,
            value,
        } => {
            if let Some(actual) = dom.computed_style(node, *pseudo, prop) {
                if value.is_match(actual) {
                    out.push(node);
                }
            }
        }
        TaskSpec::MinTextLength(min) => {
            if dom.text_content(node).chars().count() >= *min as usize {
                out.push(node);
            }
        }
        TaskSpec::Upward(UpwardArg::Levels(levels)) => {
            let mut cur = node;
            for _ in 0..*levels {
                match dom.parent(cur) {
                    Some(p) if dom.is_element(p) => cur = p,
                    _ => return,
                }
            }
            out.push(cur);
        }
        TaskSpec::Upward(UpwardArg::Selector(selector)) => {
            let list = match css::parse_selector_list(selector) {
                Ok(list) => list,
                Err(e) => {
                    env.faulted(format!("upward '{selector}': {e}"));
                    return;
                }
            };
            let mut cur = dom.parent(node);
            while let Some(p) = cur {
                if dom.is_element(p) && list.matches(dom, p) {
                    out.push(p);
                    return;
                }
                cur = dom.parent(p);
            }
        }
        TaskSpec::Spath(spath) => {
            let list = match css::parse_selector_list(spath) {
                Ok(list) => list,
                Err(e) => {
                    env.faulted(format!("spath '{spath}': {e}"));
                    return;
                }
            };
            out.extend(list.query_all(dom, Some(node)));
        }
        TaskSpec::WatchAttr(attrs) => {
            env.attr_watches.register(node, attrs);
            out.push(node);
        }
        TaskSpec::Xpath(expr) => {
            let compiled = match xpath::parse(expr) {
                Ok(c) => c,
                Err(e) => {
                    env.faulted(format!("xpath '{expr}': {e}"));
                    return;
                }
            };
            out.extend(compiled.evaluate(dom, node));
        }
    }
}

fn dedupe(nodes: Vec<NodeId>) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    nodes.into_iter().filter(|n| seen.insert(*n)).collect()
}
