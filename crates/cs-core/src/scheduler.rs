//! Cooperative job scheduling.
//!
//! Single-threaded, no parallelism: all coordination is deferred callbacks
//! expressed as jobs from a closed set. Two primitives, composed per the
//! "don't block the host, but don't starve either" contract:
//!
//! - `defer_idle`: run at the next opportunity the host considers idle
//!   (the next pump).
//! - `defer_after`: run no earlier than a delay, then at the next idle
//!   opportunity past that point.
//!
//! Scheduling an already-pending job coalesces: the earlier opportunity wins.

/// The closed set of deferrable jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    /// Flush the change watcher's accumulated mutation batch.
    FlushMutations,
    /// Re-evaluate active descriptors.
    Reevaluate,
    /// Run one surveyor chunk pass.
    SurveyPass,
    /// Send a collapser blocked-resource query.
    CollapseQuery,
}

/// Virtual-clock scheduler. The embedder advances the clock and pumps due
/// jobs; nothing here blocks or spawns.
#[derive(Debug, Default)]
pub struct Scheduler {
    now_ms: u64,
    idle: Vec<Job>,
    timed: Vec<(u64, Job)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn now(&self) -> u64 {
        self.now_ms
    }

    /// Defer to the next idle opportunity.
    pub fn defer_idle(&mut self, job: Job) {
        // Idle is sooner than any timed deadline; collapse into it.
        self.timed.retain(|(_, j)| *j != job);
        if !self.idle.contains(&job) {
            self.idle.push(job);
        }
    }

    /// Defer until at least `delay_ms` has elapsed.
    pub fn defer_after(&mut self, job: Job, delay_ms: u64) {
        if self.idle.contains(&job) {
            return;
        }
        let due = self.now_ms + delay_ms;
        match self.timed.iter_mut().find(|(_, j)| *j == job) {
            Some(entry) => entry.0 = entry.0.min(due),
            None => self.timed.push((due, job)),
        }
    }

    pub fn is_pending(&self, job: Job) -> bool {
        self.idle.contains(&job) || self.timed.iter().any(|(_, j)| *j == job)
    }

    pub fn has_pending(&self) -> bool {
        !self.idle.is_empty() || !self.timed.is_empty()
    }

    /// Move the clock forward.
    pub fn advance(&mut self, dt_ms: u64) {
        self.now_ms += dt_ms;
    }

    /// Drain every job runnable now: expired timed jobs (in due order), then
    /// idle jobs in registration order.
    pub fn take_due(&mut self) -> Vec<Job> {
        let mut due: Vec<(u64, Job)> = Vec::new();
        self.timed.retain(|(at, job)| {
            if *at <= self.now_ms {
                due.push((*at, *job));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(at, _)| *at);

        let mut out: Vec<Job> = due.into_iter().map(|(_, j)| j).collect();
        for job in std::mem::take(&mut self.idle) {
            if !out.contains(&job) {
                out.push(job);
            }
        }
        out
    }
}
