use std::time::{Duration, Instant};

/// Send timeline of one target.
///
/// In strict mode the n-th request (counting from zero) is due at
/// `start + n * interval` whatever happens to earlier requests, with at most
/// `max_in_flight` outstanding; a request held back by that bound goes out
/// as soon as a slot frees. Otherwise a request is due `interval` after the
/// previous one resolved, so at most one is in flight.
#[derive(Debug, Clone)]
pub struct Scheduler {
    count: usize,
    interval: Duration,
    strict: bool,
    max_in_flight: usize,
    start: Instant,
    issued: usize,
    resolved: usize,
    in_flight: usize,
    last_resolved_at: Option<Instant>,
}

impl Scheduler {
    pub fn new(
        count: usize,
        interval: Duration,
        strict: bool,
        max_in_flight: usize,
        start: Instant,
    ) -> Self {
        Scheduler {
            count,
            interval,
            strict,
            max_in_flight: if strict { max_in_flight.max(1) } else { 1 },
            start,
            issued: 0,
            resolved: 0,
            in_flight: 0,
            last_resolved_at: None,
        }
    }

    /// When the next request may go out, or `None` if the schedule is
    /// exhausted or waiting for an outstanding request to resolve.
    pub fn next_due(&self) -> Option<Instant> {
        if self.issued >= self.count || self.in_flight >= self.max_in_flight {
            return None;
        }
        if self.strict {
            return Some(self.start + self.interval * self.issued as u32);
        }
        match self.last_resolved_at {
            Some(resolved_at) => Some(resolved_at + self.interval),
            None => Some(self.start),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_due(&self, now: Instant) -> bool {
        self.next_due().map_or(false, |due| due <= now)
    }

    /// Records a send and returns its sequence number, starting at 1.
    pub fn record_sent(&mut self) -> u16 {
        self.issued += 1;
        self.in_flight += 1;
        self.issued as u16
    }

    /// Records that an outstanding request got its outcome at `at`.
    pub fn record_resolved(&mut self, at: Instant) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.resolved += 1;
        self.last_resolved_at = Some(match self.last_resolved_at {
            Some(prev) if prev > at => prev,
            _ => at,
        });
    }

    pub fn issued(&self) -> usize {
        self.issued
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// All requests sent.
    pub fn is_exhausted(&self) -> bool {
        self.issued >= self.count
    }

    /// All requests sent and resolved.
    pub fn is_done(&self) -> bool {
        self.resolved >= self.count
    }
}
