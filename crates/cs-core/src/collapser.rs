//! Collapser: hides elements whose external resources were blocked by the
//! network filter.
//!
//! Resource-bearing elements are batched and checked against the network
//! filter over the transport. Confirmed-blocked elements are hidden, never
//! detached (detaching could break page layout assumptions). Frame `src`
//! mutations are watched continuously, since blocked-then-redirected frames
//! commonly get their source rewritten after the initial collapse decision.

use std::collections::HashMap;

use crate::dom::{Dom, NodeFlags, NodeId};
use crate::scheduler::{Job, Scheduler};
use crate::transport::{CollapseCandidate, CollapseRequest, CollapseResponse, Request, Transport};

/// Response cache lifetime.
const CACHE_TTL_MS: u64 = 10_000;
/// Default cap on derived attribute selectors per page.
pub const DEFAULT_MAX_DERIVED: usize = 5;

/// The resource attribute for a collapsible tag, if any.
fn resource_attr(tag: &str) -> Option<&'static str> {
    match tag {
        "img" | "iframe" | "frame" | "embed" => Some("src"),
        "object" => Some("data"),
        _ => None,
    }
}

struct Candidate {
    node: NodeId,
    url: String,
    tag: String,
    attr: &'static str,
}

pub struct Collapser {
    frame_url: String,
    pending: Vec<NodeId>,
    inflight: HashMap<u64, Vec<Candidate>>,
    cache: HashMap<u64, (u64, Vec<String>)>,
    derived_emitted: usize,
    max_derived: usize,
}

impl Collapser {
    pub fn new(frame_url: &str, max_derived: usize) -> Self {
        Self {
            frame_url: frame_url.to_string(),
            pending: Vec::new(),
            inflight: HashMap::new(),
            cache: HashMap::new(),
            derived_emitted: 0,
            max_derived,
        }
    }

    /// Bootstrap: scan the whole document for resource elements.
    pub fn on_dom_created(&mut self, dom: &Dom, sched: &mut Scheduler) {
        self.scan(dom, dom.root(), sched);
    }

    pub fn on_dom_changed(&mut self, dom: &Dom, added: &[NodeId], sched: &mut Scheduler) {
        for &node in added {
            self.scan(dom, node, sched);
        }
    }

    /// Frame source rewrites re-enter the candidate queue.
    pub fn on_attr_changed(&mut self, dom: &Dom, node: NodeId, attr: &str, sched: &mut Scheduler) {
        let tag = match dom.as_element(node) {
            Some(el) => el.tag.as_str(),
            None => return,
        };
        if !matches!(tag, "iframe" | "frame") || !attr.eq_ignore_ascii_case("src") {
            return;
        }
        if !self.pending.contains(&node) {
            self.pending.push(node);
            sched.defer_idle(Job::CollapseQuery);
        }
    }

    fn scan(&mut self, dom: &Dom, root: NodeId, sched: &mut Scheduler) {
        let mut queued = false;
        let mut nodes = if dom.is_element(root) {
            vec![root]
        } else {
            Vec::new()
        };
        nodes.extend(dom.element_descendants(root));
        for node in nodes {
            let el = match dom.as_element(node) {
                Some(el) => el,
                None => continue,
            };
            if resource_attr(&el.tag).is_none() {
                continue;
            }
            if !self.pending.contains(&node) {
                self.pending.push(node);
                queued = true;
            }
        }
        if queued {
            sched.defer_idle(Job::CollapseQuery);
        }
    }

    /// Send one batched blocked-resource query for the pending candidates.
    /// A fresh cached response for the identical batch short-circuits the
    /// round trip.
    pub fn query(
        &mut self,
        dom: &mut Dom,
        transport: &mut dyn Transport,
        now_ms: u64,
    ) -> Vec<String> {
        let mut candidates = Vec::new();
        for node in std::mem::take(&mut self.pending) {
            let el = match dom.as_element(node) {
                Some(el) => el,
                None => continue,
            };
            let attr = match resource_attr(&el.tag) {
                Some(a) => a,
                None => continue,
            };
            let url = match dom.attr(node, attr) {
                Some(u) if !u.is_empty() => u.to_string(),
                _ => continue,
            };
            candidates.push(Candidate {
                node,
                url,
                tag: el.tag.clone(),
                attr,
            });
        }
        if candidates.is_empty() {
            return Vec::new();
        }

        let hash = batch_hash(&candidates);
        self.cache.retain(|_, (at, _)| now_ms.saturating_sub(*at) < CACHE_TTL_MS);
        if let Some((_, blocked)) = self.cache.get(&hash) {
            let blocked = blocked.clone();
            return self.apply(dom, candidates, &blocked);
        }

        let request = CollapseRequest {
            frame_url: self.frame_url.clone(),
            candidates: candidates
                .iter()
                .map(|c| CollapseCandidate {
                    url: c.url.clone(),
                    tag: c.tag.clone(),
                })
                .collect(),
            cache_hash: hash,
        };
        self.inflight.insert(hash, candidates);
        transport.send(Request::BlockedResources(request));
        Vec::new()
    }

    /// Apply a round-trip result; returns derived plain-CSS selectors the
    /// caller should register so future identical elements are hidden
    /// locally.
    pub fn on_response(
        &mut self,
        dom: &mut Dom,
        response: &CollapseResponse,
        now_ms: u64,
    ) -> Vec<String> {
        let candidates = match self.inflight.remove(&response.cache_hash) {
            Some(c) => c,
            None => return Vec::new(),
        };
        self.cache
            .insert(response.cache_hash, (now_ms, response.blocked.clone()));
        self.apply(dom, candidates, &response.blocked)
    }

    fn apply(&mut self, dom: &mut Dom, candidates: Vec<Candidate>, blocked: &[String]) -> Vec<String> {
        let mut derived = Vec::new();
        for candidate in candidates {
            if !blocked.iter().any(|b| *b == candidate.url) {
                continue;
            }
            dom.set_hidden(candidate.node, NodeFlags::HIDDEN_BY_COLLAPSE, true);
            if self.derived_emitted < self.max_derived {
                self.derived_emitted += 1;
                derived.push(format!(
                    "{}[{}=\"{}\"]",
                    candidate.tag, candidate.attr, candidate.url
                ));
            }
        }
        derived
    }
}

/// Order-independent fingerprint of a candidate batch (FNV-1a over sorted
/// URLs).
fn batch_hash(candidates: &[Candidate]) -> u64 {
    let mut urls: Vec<&str> = candidates.iter().map(|c| c.url.as_str()).collect();
    urls.sort_unstable();
    urls.dedup();
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for url in urls {
        for b in url.bytes() {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash ^= 0xff;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LoopbackTransport, Response};

    fn blocked_transport(urls: &[&str]) -> LoopbackTransport {
        let mut t = LoopbackTransport::new();
        for url in urls {
            t.blocked_urls.insert(url.to_string());
        }
        t
    }

    fn drive(
        collapser: &mut Collapser,
        dom: &mut Dom,
        transport: &mut LoopbackTransport,
        now_ms: u64,
    ) -> Vec<String> {
        let mut derived = collapser.query(dom, transport, now_ms);
        for response in transport.poll() {
            if let Response::BlockedResources(r) = response {
                derived.extend(collapser.on_response(dom, &r, now_ms));
            }
        }
        derived
    }

    #[test]
    fn test_blocked_image_is_hidden_not_detached() {
        let mut dom = Dom::new();
        let body = dom.elem(dom.root(), "body");
        let img = dom.elem(body, "img");
        dom.set_attr(img, "src", "https://ads.example/banner.png");
        let clean = dom.elem(body, "img");
        dom.set_attr(clean, "src", "https://cdn.example/logo.png");

        let mut collapser = Collapser::new("https://example.com/", DEFAULT_MAX_DERIVED);
        let mut sched = Scheduler::new();
        let mut transport = blocked_transport(&["https://ads.example/banner.png"]);

        collapser.on_dom_created(&dom, &mut sched);
        assert_eq!(sched.take_due(), vec![Job::CollapseQuery]);
        let derived = drive(&mut collapser, &mut dom, &mut transport, 0);

        assert!(dom.is_hidden(img));
        assert!(dom.is_attached(img));
        assert!(!dom.is_hidden(clean));
        assert_eq!(derived, vec!["img[src=\"https://ads.example/banner.png\"]"]);
    }

    #[test]
    fn test_derived_selector_cap() {
        let mut dom = Dom::new();
        let body = dom.elem(dom.root(), "body");
        let mut urls = Vec::new();
        for i in 0..4 {
            let img = dom.elem(body, "img");
            let url = format!("https://ads.example/{i}.png");
            dom.set_attr(img, "src", &url);
            urls.push(url);
        }
        let mut transport = blocked_transport(&urls.iter().map(String::as_str).collect::<Vec<_>>());
        let mut collapser = Collapser::new("https://example.com/", 2);
        let mut sched = Scheduler::new();
        collapser.on_dom_created(&dom, &mut sched);
        let derived = drive(&mut collapser, &mut dom, &mut transport, 0);
        assert_eq!(derived.len(), 2);
    }

    #[test]
    fn test_cached_response_skips_round_trip() {
        let mut dom = Dom::new();
        let body = dom.elem(dom.root(), "body");
        let frame = dom.elem(body, "iframe");
        dom.set_attr(frame, "src", "https://ads.example/f.html");

        let mut collapser = Collapser::new("https://example.com/", DEFAULT_MAX_DERIVED);
        let mut sched = Scheduler::new();
        let mut transport = blocked_transport(&["https://ads.example/f.html"]);
        collapser.on_dom_created(&dom, &mut sched);
        drive(&mut collapser, &mut dom, &mut transport, 0);
        let sent_before = transport.sent.len();

        // Same frame re-queued by a src rewrite back to the same URL within
        // the cache window: answered locally.
        dom.set_hidden(frame, NodeFlags::HIDDEN_BY_COLLAPSE, false);
        collapser.on_attr_changed(&dom, frame, "src", &mut sched);
        drive(&mut collapser, &mut dom, &mut transport, 5_000);
        assert_eq!(transport.sent.len(), sent_before);
        assert!(dom.is_hidden(frame));
    }

    #[test]
    fn test_frame_src_rewrite_requeues() {
        let mut dom = Dom::new();
        let body = dom.elem(dom.root(), "body");
        let frame = dom.elem(body, "iframe");
        dom.set_attr(frame, "src", "https://ok.example/a.html");

        let mut collapser = Collapser::new("https://example.com/", DEFAULT_MAX_DERIVED);
        let mut sched = Scheduler::new();
        let mut transport = blocked_transport(&["https://ads.example/b.html"]);
        collapser.on_dom_created(&dom, &mut sched);
        drive(&mut collapser, &mut dom, &mut transport, 0);
        assert!(!dom.is_hidden(frame));

        dom.set_attr(frame, "src", "https://ads.example/b.html");
        collapser.on_attr_changed(&dom, frame, "src", &mut sched);
        assert_eq!(sched.take_due(), vec![Job::CollapseQuery]);
        drive(&mut collapser, &mut dom, &mut transport, 100);
        assert!(dom.is_hidden(frame));
    }
}
