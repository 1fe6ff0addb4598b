//! Diagnostics: free-running counters, a bounded trace ring, and idle
//! detection, exportable as a point-in-time [`DiagSnapshot`] (§6.2, §9
//! "observability without a heap").

use crate::types::TimeMs;

/// A single diagnostic trace entry. Kept intentionally small (one word of
/// tag plus a `u32` payload) so the ring can hold a useful history without
/// costing meaningful RAM on a microcontroller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEvent {
    pub at_ms: TimeMs,
    pub tag: TraceTag,
    pub detail: u32,
}

/// Coarse categories for trace events; kept small and stable since they may
/// be logged via `tracing`/`defmt` and reviewed off-device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceTag {
    RequestSubmitted,
    RequestCompleted,
    RequestTimedOut,
    RequestRetried,
    FrameRejected,
    ResyncRecovered,
    ServerDispatch,
    ServerException,
    DuplicateSuppressed,
    Filtered,
}

/// Free-running counters and a bounded trace ring, shared by client and
/// server FSMs. `N` bounds the trace ring's memory footprint.
pub struct Diagnostics<const N: usize> {
    trace: heapless::Deque<TraceEvent, N>,
    pub requests_submitted: u64,
    pub requests_completed: u64,
    pub requests_timed_out: u64,
    pub requests_retried: u64,
    pub frames_rejected: u64,
    pub exceptions_returned: u64,
    pub duplicates_suppressed: u64,
    pub filtered: u64,
    last_activity_ms: TimeMs,
}

impl<const N: usize> Diagnostics<N> {
    pub fn new() -> Self {
        Self {
            trace: heapless::Deque::new(),
            requests_submitted: 0,
            requests_completed: 0,
            requests_timed_out: 0,
            requests_retried: 0,
            frames_rejected: 0,
            exceptions_returned: 0,
            duplicates_suppressed: 0,
            filtered: 0,
            last_activity_ms: 0,
        }
    }

    /// Records an event: bumps the matching counter, pushes it onto the
    /// trace ring (evicting the oldest entry if full), and notes the
    /// activity time for idle detection.
    pub fn record(&mut self, at_ms: TimeMs, tag: TraceTag, detail: u32) {
        match tag {
            TraceTag::RequestSubmitted => self.requests_submitted += 1,
            TraceTag::RequestCompleted => self.requests_completed += 1,
            TraceTag::RequestTimedOut => self.requests_timed_out += 1,
            TraceTag::RequestRetried => self.requests_retried += 1,
            TraceTag::FrameRejected => self.frames_rejected += 1,
            TraceTag::ServerException => self.exceptions_returned += 1,
            TraceTag::DuplicateSuppressed => self.duplicates_suppressed += 1,
            TraceTag::Filtered => self.filtered += 1,
            TraceTag::ResyncRecovered | TraceTag::ServerDispatch => {}
        }
        self.last_activity_ms = at_ms;
        if self.trace.is_full() {
            self.trace.pop_front();
        }
        let _ = self.trace.push_back(TraceEvent { at_ms, tag, detail });
    }

    /// True if no event has been recorded for at least `idle_ms`.
    pub fn is_idle(&self, now_ms: TimeMs, idle_ms: TimeMs) -> bool {
        now_ms.saturating_sub(self.last_activity_ms) >= idle_ms
    }

    pub fn trace_len(&self) -> usize {
        self.trace.len()
    }

    /// Iterates the trace ring oldest-first.
    pub fn trace_iter(&self) -> impl Iterator<Item = &TraceEvent> {
        self.trace.iter()
    }

    /// A point-in-time snapshot of the counters, suitable for sending over
    /// a diagnostics channel without borrowing the live engine.
    pub fn snapshot(&self) -> DiagSnapshot {
        DiagSnapshot {
            requests_submitted: self.requests_submitted,
            requests_completed: self.requests_completed,
            requests_timed_out: self.requests_timed_out,
            requests_retried: self.requests_retried,
            frames_rejected: self.frames_rejected,
            exceptions_returned: self.exceptions_returned,
            duplicates_suppressed: self.duplicates_suppressed,
            filtered: self.filtered,
            last_activity_ms: self.last_activity_ms,
        }
    }
}

impl<const N: usize> Default for Diagnostics<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Owned, `Copy` snapshot of the engine's counters for external export
/// (diagnostics endpoints, periodic logging, a CLI `status` command).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiagSnapshot {
    pub requests_submitted: u64,
    pub requests_completed: u64,
    pub requests_timed_out: u64,
    pub requests_retried: u64,
    pub frames_rejected: u64,
    pub exceptions_returned: u64,
    pub duplicates_suppressed: u64,
    pub filtered: u64,
    pub last_activity_ms: TimeMs,
}
