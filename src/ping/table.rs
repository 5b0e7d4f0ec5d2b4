//! Outstanding echo requests.
//!
//! The receive path resolves entries by correlation key while the timer path
//! sweeps expired ones. Both go through one lock that covers the key map and
//! the deadline index together, so an entry is handed out exactly once.

use crate::error::{Error, Result};
use crate::socket::SocketFamily;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Index of a target within its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetId(pub usize);

/// Identifies which outstanding request a reply belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CorrelationKey {
    pub identifier: u16,
    pub sequence: u16,
    pub family: SocketFamily,
    pub address: IpAddr,
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} id={} seq={}", self.address, self.identifier, self.sequence)
    }
}

/// One echo request in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub key: CorrelationKey,
    pub target: TargetId,
    pub sent_at: Instant,
    pub deadline: Instant,
}

impl Request {
    pub fn new(key: CorrelationKey, target: TargetId, sent_at: Instant, timeout: Duration) -> Self {
        Request {
            key,
            target,
            sent_at,
            deadline: sent_at + timeout,
        }
    }
}

#[derive(Debug, Default)]
struct TableInner {
    requests: HashMap<CorrelationKey, Request>,
    deadlines: BTreeSet<(Instant, CorrelationKey)>,
}

/// Shared table of outstanding requests. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct RequestTable {
    inner: Arc<Mutex<TableInner>>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request. A key that is already live is an invariant
    /// violation and is reported as [`Error::DuplicateKey`].
    pub fn insert(&self, request: Request) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.requests.contains_key(&request.key) {
            return Err(Error::DuplicateKey(request.key));
        }
        inner.deadlines.insert((request.deadline, request.key));
        inner.requests.insert(request.key, request);
        Ok(())
    }

    /// Removes and returns the request for `key`. `None` means the packet
    /// was foreign, late, or a duplicate.
    pub fn resolve(&self, key: &CorrelationKey) -> Option<Request> {
        let mut inner = self.inner.lock();
        let request = inner.requests.remove(key)?;
        inner.deadlines.remove(&(request.deadline, request.key));
        Some(request)
    }

    /// Removes and returns every request whose deadline is at or before
    /// `now`, earliest deadline first.
    pub fn sweep(&self, now: Instant) -> Vec<Request> {
        let mut inner = self.inner.lock();
        let mut expired = Vec::new();
        while let Some(&(deadline, key)) = inner.deadlines.first() {
            if deadline > now {
                break;
            }
            inner.deadlines.pop_first();
            if let Some(request) = inner.requests.remove(&key) {
                expired.push(request);
            }
        }
        expired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.lock().deadlines.first().map(|(deadline, _)| *deadline)
    }

    /// Drops every outstanding request and returns how many there were.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.deadlines.clear();
        let count = inner.requests.len();
        inner.requests.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
