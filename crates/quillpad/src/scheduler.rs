//! Repeating timers as an injectable dependency. The controller only
//! registers jobs; whoever owns the event loop asks the scheduler which
//! job is due and hands it back to the controller.

use std::time::Duration;
use tokio::time::Instant;

/// Longest period a job may repeat at.
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Work the controller knows how to run when a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    AutoSave,
    MemoryCheck,
}

pub trait Scheduler {
    /// Registers `job` to fire every `interval`, replacing any earlier
    /// registration of the same job.
    fn schedule_repeating(&mut self, interval: Duration, job: Job);

    fn cancel(&mut self, job: Job);

    fn is_scheduled(&self, job: Job) -> bool;
}

#[derive(Debug, Clone)]
struct Entry<T> {
    job: Job,
    interval: Duration,
    next_due: T,
}

fn upsert<T>(entries: &mut Vec<Entry<T>>, entry: Entry<T>) {
    match entries.iter_mut().find(|e| e.job == entry.job) {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
    }
}

/// Virtual-time scheduler. Time only moves when [`ManualScheduler::advance`]
/// is called, so tests fire ticks without waiting.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    now: Duration,
    entries: Vec<Entry<Duration>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elapsed(&self) -> Duration {
        self.now
    }

    /// Moves virtual time forward and returns every firing in order.
    /// A job due several times within the window fires several times.
    pub fn advance(&mut self, by: Duration) -> Vec<Job> {
        let target = self.now + by;
        let mut fired = Vec::new();

        loop {
            let next = self
                .entries
                .iter_mut()
                .filter(|e| e.next_due <= target)
                .min_by_key(|e| e.next_due);
            let Some(entry) = next else {
                break;
            };
            self.now = entry.next_due;
            entry.next_due += entry.interval;
            fired.push(entry.job);
        }

        self.now = target;
        fired
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_repeating(&mut self, interval: Duration, job: Job) {
        let interval = interval.clamp(Duration::from_millis(1), MAX_INTERVAL);
        upsert(
            &mut self.entries,
            Entry {
                job,
                interval,
                next_due: self.now + interval,
            },
        );
    }

    fn cancel(&mut self, job: Job) {
        self.entries.retain(|e| e.job != job);
    }

    fn is_scheduled(&self, job: Job) -> bool {
        self.entries.iter().any(|e| e.job == job)
    }
}

/// Wall-clock scheduler on tokio time.
#[derive(Debug, Default)]
pub struct IntervalScheduler {
    entries: Vec<Entry<Instant>>,
}

impl IntervalScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the next due job. Pends forever when nothing is
    /// scheduled, which suits use inside `tokio::select!`.
    pub async fn next_due(&mut self) -> Job {
        let Some(entry) = self.entries.iter_mut().min_by_key(|e| e.next_due) else {
            return std::future::pending().await;
        };
        tokio::time::sleep_until(entry.next_due).await;

        // Skip missed periods instead of bursting.
        let now = Instant::now();
        entry.next_due += entry.interval;
        if entry.next_due <= now {
            entry.next_due = now + entry.interval;
        }
        entry.job
    }
}

impl Scheduler for IntervalScheduler {
    fn schedule_repeating(&mut self, interval: Duration, job: Job) {
        let interval = interval.clamp(Duration::from_millis(1), MAX_INTERVAL);
        upsert(
            &mut self.entries,
            Entry {
                job,
                interval,
                next_due: Instant::now() + interval,
            },
        );
    }

    fn cancel(&mut self, job: Job) {
        self.entries.retain(|e| e.job != job);
    }

    fn is_scheduled(&self, job: Job) -> bool {
        self.entries.iter().any(|e| e.job == job)
    }
}
