//! Job model and per-job state for WebP conversion requests.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Job identifier, used only for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out monotonically increasing [`JobId`]s, starting at 1.
#[derive(Debug, Default)]
pub struct JobIdAllocator {
    last: AtomicU64,
}

impl JobIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> JobId {
        JobId(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    Authorizing,
    Queued,
    Reading,
    Converting,
    Responding,
    Done,
    Failed,
}

impl JobState {
    /// `true` while the job holds an admission slot.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            JobState::Reading | JobState::Converting | JobState::Responding
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Received => write!(f, "received"),
            JobState::Authorizing => write!(f, "authorizing"),
            JobState::Queued => write!(f, "queued"),
            JobState::Reading => write!(f, "reading"),
            JobState::Converting => write!(f, "converting"),
            JobState::Responding => write!(f, "responding"),
            JobState::Done => write!(f, "done"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// Phase durations, filled in as the job progresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobTimings {
    pub queue_wait: Option<Duration>,
    pub conversion: Option<Duration>,
    pub total: Option<Duration>,
}

/// One request's conversion lifecycle, from acceptance to terminal response.
#[derive(Debug)]
pub struct ConversionJob {
    pub id: JobId,
    pub received_at: DateTime<Utc>,
    pub state: JobState,
    pub filename: Option<String>,
    pub input_bytes: Option<u64>,
    pub output_bytes: Option<u64>,
    pub timings: JobTimings,
    pub error: Option<String>,
    arrived: Instant,
    conversion_started: Option<Instant>,
}

impl ConversionJob {
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            received_at: Utc::now(),
            state: JobState::Received,
            filename: None,
            input_bytes: None,
            output_bytes: None,
            timings: JobTimings::default(),
            error: None,
            arrived: Instant::now(),
            conversion_started: None,
        }
    }

    /// Time since the request was accepted.
    pub fn elapsed(&self) -> Duration {
        self.arrived.elapsed()
    }

    pub fn start_authorizing(&mut self) {
        self.state = JobState::Authorizing;
    }

    pub fn enqueue(&mut self) {
        self.state = JobState::Queued;
    }

    /// Records the queue wait and moves the job into `Reading`.
    pub fn slot_acquired(&mut self) -> Duration {
        let waited = self.elapsed();
        self.timings.queue_wait = Some(waited);
        self.state = JobState::Reading;
        waited
    }

    pub fn start_converting(&mut self) {
        self.state = JobState::Converting;
        self.conversion_started = Some(Instant::now());
    }

    /// Records the tool run time and moves the job into `Responding`.
    pub fn finish_converting(&mut self) -> Duration {
        let took = self
            .conversion_started
            .map(|started| started.elapsed())
            .unwrap_or_default();
        self.timings.conversion = Some(took);
        self.state = JobState::Responding;
        took
    }

    pub fn mark_done(&mut self) {
        self.state = JobState::Done;
        self.timings.total = Some(self.elapsed());
        self.error = None;
    }

    pub fn mark_failed(&mut self, error: String) {
        if self.conversion_started.is_some() && self.timings.conversion.is_none() {
            self.timings.conversion = self.conversion_started.map(|started| started.elapsed());
        }
        self.state = JobState::Failed;
        self.timings.total = Some(self.elapsed());
        self.error = Some(error);
    }
}
