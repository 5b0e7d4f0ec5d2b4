use super::PingOutcome;
use crate::error::Result;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// Summary of all outcomes for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostStats {
    pub target: IpAddr,
    pub transmitted: usize,
    pub received: usize,
    pub timeouts: usize,
    pub errors: usize,
    pub min_rtt: Option<Duration>,
    pub max_rtt: Option<Duration>,
    total_rtt: Duration,
}

impl HostStats {
    pub fn new(target: IpAddr) -> Self {
        HostStats {
            target,
            transmitted: 0,
            received: 0,
            timeouts: 0,
            errors: 0,
            min_rtt: None,
            max_rtt: None,
            total_rtt: Duration::ZERO,
        }
    }

    fn record(&mut self, outcome: &PingOutcome) {
        self.transmitted += 1;
        match outcome {
            PingOutcome::Reply { rtt, .. } => {
                self.received += 1;
                self.total_rtt += *rtt;
                self.min_rtt = Some(self.min_rtt.map_or(*rtt, |min| min.min(*rtt)));
                self.max_rtt = Some(self.max_rtt.map_or(*rtt, |max| max.max(*rtt)));
            }
            PingOutcome::Timeout { .. } => self.timeouts += 1,
            PingOutcome::Error { .. } => self.errors += 1,
        }
    }

    pub fn avg_rtt(&self) -> Option<Duration> {
        if self.received == 0 {
            return None;
        }
        Some(self.total_rtt / self.received as u32)
    }

    /// Fraction of requests without a reply, in `0.0..=1.0`.
    pub fn loss(&self) -> f64 {
        if self.transmitted == 0 {
            return 0.0;
        }
        (self.transmitted - self.received) as f64 / self.transmitted as f64
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl fmt::Display for HostStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} transmitted, {} received, {:.1}% loss",
            self.target,
            self.transmitted,
            self.received,
            self.loss() * 100.0
        )?;
        if self.errors > 0 {
            write!(f, ", {} errors", self.errors)?;
        }
        if let (Some(min), Some(avg), Some(max)) = (self.min_rtt, self.avg_rtt(), self.max_rtt) {
            write!(
                f,
                ", rtt min/avg/max = {:.3}/{:.3}/{:.3} ms",
                millis(min),
                millis(avg),
                millis(max)
            )?;
        }
        Ok(())
    }
}

/// Per-target statistics, kept in the order targets first appear.
#[derive(Debug, Clone, Default)]
pub struct PingStats {
    hosts: Vec<HostStats>,
    index: HashMap<IpAddr, usize>,
}

impl PingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: &PingOutcome) {
        let target = outcome.target();
        let idx = match self.index.get(&target) {
            Some(idx) => *idx,
            None => {
                self.hosts.push(HostStats::new(target));
                self.index.insert(target, self.hosts.len() - 1);
                self.hosts.len() - 1
            }
        };
        self.hosts[idx].record(outcome);
    }

    pub fn get(&self, target: &IpAddr) -> Option<&HostStats> {
        self.index.get(target).map(|idx| &self.hosts[*idx])
    }

    pub fn hosts(&self) -> &[HostStats] {
        &self.hosts
    }

    pub fn transmitted(&self) -> usize {
        self.hosts.iter().map(|h| h.transmitted).sum()
    }

    pub fn received(&self) -> usize {
        self.hosts.iter().map(|h| h.received).sum()
    }
}

impl<'a> FromIterator<&'a PingOutcome> for PingStats {
    fn from_iter<T: IntoIterator<Item = &'a PingOutcome>>(iter: T) -> Self {
        let mut stats = PingStats::new();
        for outcome in iter {
            stats.record(outcome);
        }
        stats
    }
}

impl fmt::Display for PingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for host in &self.hosts {
            writeln!(f, "{}", host)?;
        }
        Ok(())
    }
}

/// Passes outcomes through while keeping statistics on them.
#[derive(Debug)]
pub struct StatsIter<I> {
    inner: I,
    stats: PingStats,
}

impl<I> StatsIter<I> {
    pub fn new(inner: I) -> Self {
        StatsIter {
            inner,
            stats: PingStats::new(),
        }
    }

    pub fn stats(&self) -> &PingStats {
        &self.stats
    }

    pub fn into_stats(self) -> PingStats {
        self.stats
    }
}

impl<I> Iterator for StatsIter<I>
where
    I: Iterator<Item = Result<PingOutcome>>,
{
    type Item = Result<PingOutcome>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        if let Ok(outcome) = &item {
            self.stats.record(outcome);
        }
        Some(item)
    }
}
