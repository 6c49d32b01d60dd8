//! Page session: wires the watcher, runtime, surveyor and collapser to one
//! document and one transport, and drives the cooperative job loop.
//!
//! The embedder owns the clock: mutate the document, `advance` virtual time
//! as needed, then `pump` until quiescent. Everything in between is the
//! deferred-job machinery doing its coalesced work.

use crate::collapser::{Collapser, DEFAULT_MAX_DERIVED};
use crate::dom::Dom;
use crate::runtime::FilteringContext;
use crate::scheduler::{Job, Scheduler};
use crate::selector::Descriptor;
use crate::surveyor::Surveyor;
use crate::transport::{Response, Transport};
use crate::watcher::{DomWatcher, ListenerKey};

/// Safety stop for one pump call. A healthy session settles in a handful of
/// iterations; hitting the cap means a job keeps rescheduling itself without
/// the clock moving.
const MAX_PUMP_ROUNDS: usize = 64;

pub struct PageSession<T: Transport> {
    dom: Dom,
    sched: Scheduler,
    watcher: DomWatcher,
    runtime: FilteringContext,
    surveyor: Option<Surveyor>,
    collapser: Collapser,
    transport: T,
    /// Stylesheet text pushed by the background service, verbatim.
    injected_css: String,
}

impl<T: Transport> PageSession<T> {
    pub fn new(hostname: &str, frame_url: &str, transport: T) -> Self {
        Self {
            dom: Dom::new(),
            sched: Scheduler::new(),
            watcher: DomWatcher::new(),
            runtime: FilteringContext::new(),
            surveyor: Some(Surveyor::new(hostname, 0)),
            collapser: Collapser::new(frame_url, DEFAULT_MAX_DERIVED),
            transport,
            injected_css: String::new(),
        }
    }

    pub fn dom(&self) -> &Dom {
        &self.dom
    }

    /// Mutable document access. Changes made here are picked up by the next
    /// `pump` through the watcher.
    pub fn dom_mut(&mut self) -> &mut Dom {
        &mut self.dom
    }

    pub fn context(&self) -> &FilteringContext {
        &self.runtime
    }

    pub fn injected_css(&self) -> &str {
        &self.injected_css
    }

    /// The document reached ready state: start observation and bootstrap
    /// every component against current content.
    pub fn document_ready(&mut self) {
        self.watcher.document_ready(&mut self.dom);
        for key in [ListenerKey::Runtime, ListenerKey::Surveyor, ListenerKey::Collapser] {
            if !self.watcher.register(key, &mut self.dom) {
                continue;
            }
            match key {
                ListenerKey::Runtime => self.runtime.on_dom_changed(&mut self.sched),
                ListenerKey::Surveyor => {
                    if let Some(surveyor) = self.surveyor.as_mut() {
                        surveyor.on_dom_created(&self.dom, &mut self.sched);
                    }
                }
                ListenerKey::Collapser => {
                    self.collapser.on_dom_created(&self.dom, &mut self.sched)
                }
            }
        }
    }

    pub fn register_descriptor(&mut self, desc: Descriptor) {
        self.runtime.register(desc, self.sched.now());
        self.sched.defer_idle(Job::Reevaluate);
    }

    pub fn register_exception(&mut self, raw: &str) {
        self.runtime.register_exception(raw);
        self.sched.defer_idle(Job::Reevaluate);
    }

    /// Move the virtual clock.
    pub fn advance(&mut self, dt_ms: u64) {
        self.sched.advance(dt_ms);
    }

    /// Drain transport responses and run due jobs until the session is
    /// quiescent at the current clock.
    pub fn pump(&mut self) {
        for _ in 0..MAX_PUMP_ROUNDS {
            let responses = self.transport.poll();
            for response in responses {
                self.dispatch_response(response);
            }

            self.watcher.schedule_flush(&self.dom, &mut self.sched);
            let jobs = self.sched.take_due();
            if jobs.is_empty() {
                return;
            }
            for job in jobs {
                self.run_job(job);
            }
        }
        log::warn!("pump did not settle after {MAX_PUMP_ROUNDS} rounds");
    }

    fn run_job(&mut self, job: Job) {
        match job {
            Job::FlushMutations => {
                let change = match self.watcher.flush(&mut self.dom) {
                    Some(c) => c,
                    None => return,
                };
                for key in self.watcher.snapshot_listeners() {
                    match key {
                        ListenerKey::Runtime => {
                            if change.reportable() {
                                self.runtime.on_dom_changed(&mut self.sched);
                            }
                        }
                        ListenerKey::Surveyor => {
                            if let Some(surveyor) = self.surveyor.as_mut() {
                                surveyor.on_dom_changed(&self.dom, &change.added, &mut self.sched);
                            }
                        }
                        ListenerKey::Collapser => {
                            self.collapser
                                .on_dom_changed(&self.dom, &change.added, &mut self.sched)
                        }
                    }
                }
                for (node, name) in &change.attr_changes {
                    self.runtime.on_attr_changed(*node, name, &mut self.sched);
                    self.collapser
                        .on_attr_changed(&self.dom, *node, name, &mut self.sched);
                }
            }
            Job::Reevaluate => {
                self.runtime.revaluate(&mut self.dom, self.sched.now());
            }
            Job::SurveyPass => {
                if let Some(surveyor) = self.surveyor.as_mut() {
                    let exceptions = self.runtime.exceptions().to_vec();
                    surveyor.pass(&self.dom, &exceptions, &mut self.transport, &mut self.sched);
                }
            }
            Job::CollapseQuery => {
                let derived =
                    self.collapser
                        .query(&mut self.dom, &mut self.transport, self.sched.now());
                self.adopt_derived(derived);
            }
        }
    }

    fn dispatch_response(&mut self, response: Response) {
        let now = self.sched.now();
        match response {
            Response::SelectorLookup(r) => {
                let dead = match self.surveyor.as_mut() {
                    Some(surveyor) => {
                        surveyor.on_lookup_response(&r, now);
                        surveyor.is_dead()
                    }
                    None => return,
                };
                for selector in r.simple_selectors.iter().chain(&r.complex_selectors) {
                    self.runtime.register(Descriptor::plain(selector), now);
                }
                if !r.injected_selectors_text.is_empty() {
                    if !self.injected_css.is_empty() {
                        self.injected_css.push('\n');
                    }
                    self.injected_css.push_str(&r.injected_selectors_text);
                }
                if dead {
                    self.watcher.unregister(ListenerKey::Surveyor, &mut self.dom);
                    self.surveyor = None;
                }
            }
            Response::BlockedResources(r) => {
                let derived = self.collapser.on_response(&mut self.dom, &r, now);
                self.adopt_derived(derived);
            }
        }
    }

    /// Derived attribute selectors from the collapser join the stylesheet so
    /// future identical elements are hidden without a round trip.
    fn adopt_derived(&mut self, derived: Vec<String>) {
        let now = self.sched.now();
        for selector in derived {
            self.runtime.register(Descriptor::plain(&selector), now);
        }
    }

    /// Revert everything and stop observing.
    pub fn teardown(&mut self) {
        self.runtime.teardown(&mut self.dom);
        self.watcher.shutdown(&mut self.dom);
        self.surveyor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::{Pattern, TaskSpec};
    use crate::transport::LoopbackTransport;

    fn sponsored_descriptor() -> Descriptor {
        let mut inner = Descriptor {
            selector: "span".to_string(),
            tasks: vec![TaskSpec::HasText(Pattern::new("Sponsored").unwrap())],
            action: None,
            raw: String::new(),
        };
        inner.rebuild_raw();
        let mut d = Descriptor {
            selector: ".ad".to_string(),
            tasks: vec![TaskSpec::Has {
                hold: true,
                inner: Box::new(inner),
            }],
            action: None,
            raw: String::new(),
        };
        d.rebuild_raw();
        d
    }

    #[test]
    fn test_hide_then_unhide_on_text_change() {
        let mut session = PageSession::new(
            "example.com",
            "https://example.com/",
            LoopbackTransport::new(),
        );
        let (ad, label) = {
            let dom = session.dom_mut();
            let body = dom.elem(dom.root(), "body");
            let ad = dom.elem(body, "div");
            dom.set_attr(ad, "class", "ad");
            let span = dom.elem(ad, "span");
            let label = dom.text(span, "Sponsored content");
            (ad, label)
        };
        session.document_ready();
        session.register_descriptor(sponsored_descriptor());
        session.pump();
        assert!(session.dom().is_hidden(ad));

        // Removing the trigger word reveals the element on the next batch.
        session.dom_mut().set_text(label, "Editorial content");
        session.pump();
        assert!(!session.dom().is_hidden(ad));
    }

    #[test]
    fn test_late_insertion_is_caught() {
        let mut session = PageSession::new(
            "example.com",
            "https://example.com/",
            LoopbackTransport::new(),
        );
        let body = {
            let dom = session.dom_mut();
            dom.elem(dom.root(), "body")
        };
        session.document_ready();
        session.register_descriptor(sponsored_descriptor());
        session.pump();

        let ad = {
            let dom = session.dom_mut();
            let ad = dom.elem(body, "div");
            dom.set_attr(ad, "class", "ad");
            let span = dom.elem(ad, "span");
            dom.text(span, "Sponsored");
            ad
        };
        session.pump();
        assert!(session.dom().is_hidden(ad));
    }

    #[test]
    fn test_survey_lookup_feeds_stylesheet() {
        let mut transport = LoopbackTransport::new();
        transport
            .id_index
            .insert("banner".to_string(), vec!["#banner".to_string()]);
        let mut session = PageSession::new("example.com", "https://example.com/", transport);
        {
            let dom = session.dom_mut();
            let body = dom.elem(dom.root(), "body");
            let div = dom.elem(body, "div");
            dom.set_attr(div, "id", "banner");
        }
        session.document_ready();
        session.pump();
        assert_eq!(session.context().stylesheet_selectors(), vec!["#banner"]);
    }

    #[test]
    fn test_collapse_and_derived_selector() {
        let mut transport = LoopbackTransport::new();
        transport
            .blocked_urls
            .insert("https://ads.example/banner.png".to_string());
        let mut session = PageSession::new("example.com", "https://example.com/", transport);
        let img = {
            let dom = session.dom_mut();
            let body = dom.elem(dom.root(), "body");
            let img = dom.elem(body, "img");
            dom.set_attr(img, "src", "https://ads.example/banner.png");
            img
        };
        session.document_ready();
        session.pump();
        assert!(session.dom().is_hidden(img));
        assert!(session.dom().is_attached(img));
        assert_eq!(
            session.context().stylesheet_selectors(),
            vec!["img[src=\"https://ads.example/banner.png\"]"]
        );
    }

    #[test]
    fn test_exception_reveals_applied_descriptor() {
        let mut session = PageSession::new(
            "example.com",
            "https://example.com/",
            LoopbackTransport::new(),
        );
        let ad = {
            let dom = session.dom_mut();
            let body = dom.elem(dom.root(), "body");
            let ad = dom.elem(body, "div");
            dom.set_attr(ad, "class", "ad");
            let span = dom.elem(ad, "span");
            dom.text(span, "Sponsored");
            ad
        };
        session.document_ready();
        let desc = sponsored_descriptor();
        let raw = desc.raw.clone();
        session.register_descriptor(desc);
        session.pump();
        assert!(session.dom().is_hidden(ad));

        session.register_exception(&raw);
        session.pump();
        assert!(!session.dom().is_hidden(ad));
    }

    #[test]
    fn test_teardown_reveals_everything() {
        let mut session = PageSession::new(
            "example.com",
            "https://example.com/",
            LoopbackTransport::new(),
        );
        let ad = {
            let dom = session.dom_mut();
            let body = dom.elem(dom.root(), "body");
            let ad = dom.elem(body, "div");
            dom.set_attr(ad, "class", "ad");
            let span = dom.elem(ad, "span");
            dom.text(span, "Sponsored");
            ad
        };
        session.document_ready();
        session.register_descriptor(sponsored_descriptor());
        session.pump();
        assert!(session.dom().is_hidden(ad));

        session.teardown();
        assert!(!session.dom().is_hidden(ad));
        // Post-teardown mutations are inert.
        let dom = session.dom_mut();
        let body = dom.parent(ad).unwrap();
        dom.elem(body, "div");
        session.pump();
        assert_eq!(session.context().procedural_count(), 0);
    }
}
