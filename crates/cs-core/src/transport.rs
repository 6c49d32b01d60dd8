//! Channel to the background process.
//!
//! The transport is an opaque asynchronous request/response channel:
//! `send` is fire-and-forget, responses surface later via `poll` when the
//! session pumps. A round trip that fails or times out simply never
//! delivers — callers treat that as "no additional selectors this round".

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

// =============================================================================
// Messages
// =============================================================================

/// Surveyor -> background lookup service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorLookupRequest {
    pub hostname: String,
    pub id_tokens: Vec<String>,
    pub class_tokens: Vec<String>,
    pub exception_selectors: Vec<String>,
}

/// Background lookup service -> surveyor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorLookupResponse {
    pub simple_selectors: Vec<String>,
    pub complex_selectors: Vec<String>,
    pub injected_selectors_text: String,
}

impl SelectorLookupResponse {
    pub fn is_miss(&self) -> bool {
        self.simple_selectors.is_empty()
            && self.complex_selectors.is_empty()
            && self.injected_selectors_text.is_empty()
    }
}

/// One resource-fetching element observed by the collapser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollapseCandidate {
    pub url: String,
    pub tag: String,
}

/// Collapser -> background network-filter service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollapseRequest {
    pub frame_url: String,
    pub candidates: Vec<CollapseCandidate>,
    /// Batch fingerprint, echoed back for response caching.
    pub cache_hash: u64,
}

/// Background network-filter service -> collapser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollapseResponse {
    pub blocked: Vec<String>,
    pub cache_hash: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    SelectorLookup(SelectorLookupRequest),
    BlockedResources(CollapseRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    SelectorLookup(SelectorLookupResponse),
    BlockedResources(CollapseResponse),
}

// =============================================================================
// Transport trait
// =============================================================================

pub trait Transport {
    /// Fire-and-forget send; must never block.
    fn send(&mut self, request: Request);
    /// Drain responses that have arrived since the last poll.
    fn poll(&mut self) -> Vec<Response>;
}

// =============================================================================
// Loopback transport
// =============================================================================

/// In-memory transport answering from static indices. Used by tests and the
/// CLI; a real embedder implements [`Transport`] over extension messaging.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    /// id token -> generic selectors.
    pub id_index: HashMap<String, Vec<String>>,
    /// class token -> generic selectors.
    pub class_index: HashMap<String, Vec<String>>,
    /// URLs the network filter blocks.
    pub blocked_urls: HashSet<String>,
    /// Simulate a transport failure: requests vanish.
    pub drop_requests: bool,
    pending: Vec<Response>,
    pub sent: Vec<Request>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for LoopbackTransport {
    fn send(&mut self, request: Request) {
        self.sent.push(request.clone());
        if self.drop_requests {
            return;
        }
        let response = match request {
            Request::SelectorLookup(req) => {
                let mut response = SelectorLookupResponse::default();
                for token in &req.id_tokens {
                    if let Some(selectors) = self.id_index.get(token) {
                        response.simple_selectors.extend(selectors.iter().cloned());
                    }
                }
                for token in &req.class_tokens {
                    if let Some(selectors) = self.class_index.get(token) {
                        response.simple_selectors.extend(selectors.iter().cloned());
                    }
                }
                Response::SelectorLookup(response)
            }
            Request::BlockedResources(req) => {
                let blocked = req
                    .candidates
                    .iter()
                    .filter(|c| self.blocked_urls.contains(&c.url))
                    .map(|c| c.url.clone())
                    .collect();
                Response::BlockedResources(CollapseResponse {
                    blocked,
                    cache_hash: req.cache_hash,
                })
            }
        };
        self.pending.push(response);
    }

    fn poll(&mut self) -> Vec<Response> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_lookup() {
        let mut t = LoopbackTransport::new();
        t.id_index
            .insert("banner".to_string(), vec!["#banner".to_string()]);
        t.send(Request::SelectorLookup(SelectorLookupRequest {
            hostname: "example.com".to_string(),
            id_tokens: vec!["banner".to_string(), "other".to_string()],
            class_tokens: Vec::new(),
            exception_selectors: Vec::new(),
        }));
        let responses = t.poll();
        assert_eq!(responses.len(), 1);
        match &responses[0] {
            Response::SelectorLookup(r) => {
                assert_eq!(r.simple_selectors, vec!["#banner"]);
            }
            other => panic!("unexpected response: {other:?}"),
        }
        assert!(t.poll().is_empty());
    }

    #[test]
    fn test_dropped_request_never_delivers() {
        let mut t = LoopbackTransport::new();
        t.drop_requests = true;
        t.send(Request::BlockedResources(CollapseRequest {
            frame_url: "https://example.com/".to_string(),
            candidates: Vec::new(),
            cache_hash: 0,
        }));
        assert!(t.poll().is_empty());
        assert_eq!(t.sent.len(), 1);
    }
}
