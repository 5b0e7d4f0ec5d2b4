mod blocking;
mod nonblocking;
mod outcome;
mod pinger;
mod scheduler;
mod session;
mod stats;
mod table;

#[cfg(test)]
pub(crate) mod loopback;

pub use blocking::PingSession;
pub use nonblocking::AsyncPingSession;
pub use outcome::{ErrorReason, IcmpErrorKind, PingOutcome};
pub use pinger::*;
pub use scheduler::Scheduler;
pub use session::TargetProgress;
pub use stats::{HostStats, PingStats, StatsIter};
pub use table::{CorrelationKey, Request, RequestTable, TargetId};

use std::time::Duration;

/// Result of a complete ping run
#[derive(Clone, Debug)]
pub struct PingResult {
    /// Every outcome, in the order it was produced
    pub outcomes: Vec<PingOutcome>,
    /// Per-target statistics
    pub stats: PingStats,
    /// The entire ping probe time
    pub probe_time: Duration,
}

impl PingResult {
    /// Outcomes of one target, in sequence order.
    pub fn outcomes_for(&self, target: std::net::IpAddr) -> impl Iterator<Item = &PingOutcome> {
        self.outcomes.iter().filter(move |o| o.target() == target)
    }
}
