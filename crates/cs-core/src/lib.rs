//! CleanSlate Core Library
//!
//! This crate provides the per-page cosmetic filtering engine for the
//! CleanSlate content blocker: procedural selector evaluation against a
//! document tree, change-driven re-evaluation, and the supporting machinery
//! (budgets, scheduling, background round trips).
//!
//! # Architecture
//!
//! A [`session::PageSession`] wires everything to one document: the change
//! watcher coalesces raw mutation records into batches, the filtering
//! runtime re-evaluates active descriptors under per-descriptor time
//! budgets, the surveyor harvests id/class tokens to pull relevant generic
//! selectors from the background service, and the collapser hides elements
//! whose resources the network filter blocked. All coordination is
//! cooperative, single-threaded deferred jobs on a virtual clock.
//!
//! # Modules
//!
//! - `dom`: Arena document tree with a mutation record log
//! - `css`: CSS selector parsing and scope-aware matching
//! - `xpath`: The XPath subset accepted by `xpath` tasks
//! - `selector`: Compiled descriptor model and canonical text form
//! - `pipeline`: Task pipeline execution (prime, transpose, dedupe)
//! - `budget`: Per-descriptor evaluation budget
//! - `scheduler`: Cooperative deferred-job scheduling
//! - `watcher`: Coalesced tree-change observation
//! - `runtime`: Per-page filtering context
//! - `surveyor`: Chunked id/class token harvesting
//! - `collapser`: Blocked-resource element hiding
//! - `transport`: Background channel messages and trait
//! - `session`: Per-page orchestration

pub mod budget;
pub mod collapser;
pub mod css;
pub mod dom;
pub mod pipeline;
pub mod runtime;
pub mod scheduler;
pub mod selector;
pub mod session;
pub mod surveyor;
pub mod transport;
pub mod watcher;
pub mod xpath;

// Re-export commonly used types
pub use dom::{Dom, NodeFlags, NodeId};
pub use runtime::FilteringContext;
pub use selector::{Action, Descriptor, Pattern, TaskSpec, UpwardArg};
pub use session::PageSession;
pub use transport::{LoopbackTransport, Request, Response, Transport};
