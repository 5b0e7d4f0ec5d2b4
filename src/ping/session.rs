//! Transport-free session state.
//!
//! [`SessionState`] owns the targets, their schedulers and the request
//! table. The blocking and async drivers feed it the current time and
//! received datagrams and send whatever it asks them to; neither driver
//! contains any matching or scheduling logic of its own.

use super::outcome::{ErrorReason, IcmpErrorKind, PingOutcome};
use super::scheduler::Scheduler;
use super::table::{CorrelationKey, Request, RequestTable, TargetId};
use super::Pinger;
use crate::error::{Error, Result};
use crate::packet::{self, DecodeContext, ParsedMessage, QuotedEcho, ICMP_HEADER_LEN};
use crate::socket::SocketFamily;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Upper bound on a single wait, so a driver never sleeps unbounded.
pub(crate) const IDLE_WAIT: Duration = Duration::from_secs(1);
/// Datagrams taken off a channel per wake-up before timers get a turn.
pub(crate) const MAX_DRAIN_BATCH: usize = 100;
/// Receive buffer size; large enough for any reply to a maximal request.
pub(crate) const RECV_BUFFER_SIZE: usize = 65_536;

/// Progress of one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetProgress {
    pub address: IpAddr,
    pub created_at: Instant,
    pub sent: usize,
    pub received: usize,
    pub outstanding: usize,
    /// Outcomes handed to the caller so far.
    pub completed: usize,
    /// Every request has been sent.
    pub all_sent: bool,
    /// Every request has been sent and resolved.
    pub finished: bool,
}

#[derive(Debug)]
struct TargetState {
    address: IpAddr,
    family: SocketFamily,
    created_at: Instant,
    scheduler: Scheduler,
    received: usize,
    /// Next sequence number to release to the caller.
    next_release: u32,
    /// Resolved outcomes waiting for an earlier sequence to resolve.
    held: BTreeMap<u16, PingOutcome>,
}

/// Echo request the state machine wants sent.
#[derive(Debug, Clone)]
pub(crate) struct Transmit {
    pub family: SocketFamily,
    pub destination: IpAddr,
    pub packet: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct FamilyContext {
    identifier: u16,
    decode: DecodeContext,
    /// Source address for the ICMPv6 pseudo-header.
    pseudo_source: Option<IpAddr>,
}

#[derive(Debug)]
pub(crate) struct SessionState {
    targets: Vec<TargetState>,
    table: RequestTable,
    families: [FamilyContext; 2],
    timeout: Duration,
    payload_size: usize,
    ready: VecDeque<PingOutcome>,
    released: usize,
    expected: usize,
}

impl SessionState {
    /// Validates the configuration and lays out one timeline per target.
    pub fn new(pinger: &Pinger, start: Instant) -> Result<Self> {
        pinger.validate()?;

        let mut seen = HashSet::new();
        for addr in &pinger.targets {
            if !seen.insert(*addr) {
                return Err(Error::DuplicateTarget(*addr));
            }
        }

        let targets: Vec<TargetState> = pinger
            .targets
            .iter()
            .map(|addr| TargetState {
                address: *addr,
                family: SocketFamily::from_ip(addr),
                created_at: start,
                scheduler: Scheduler::new(
                    pinger.count,
                    pinger.interval,
                    pinger.strict_interval,
                    pinger.max_in_flight,
                    start,
                ),
                received: 0,
                next_release: 1,
                held: BTreeMap::new(),
            })
            .collect();

        let context =
            |family: SocketFamily, local: Option<IpAddr>, pseudo: Option<IpAddr>| FamilyContext {
                identifier: pinger.identifier,
                decode: DecodeContext {
                    family,
                    has_ip_header: family.is_v4(),
                    local_addr: local,
                },
                pseudo_source: pseudo.or(local),
            };
        let v6_pseudo = pinger.pseudo_source_v6().map(IpAddr::V6);

        Ok(SessionState {
            expected: targets.len() * pinger.count,
            targets,
            table: RequestTable::new(),
            families: [
                context(SocketFamily::Ipv4, pinger.src_v4.map(IpAddr::V4), None),
                context(SocketFamily::Ipv6, pinger.src_v6.map(IpAddr::V6), v6_pseudo),
            ],
            timeout: pinger.timeout,
            payload_size: pinger.payload_size,
            ready: VecDeque::new(),
            released: 0,
        })
    }

    /// Families that have at least one target.
    pub fn families(&self) -> Vec<SocketFamily> {
        let mut families: Vec<SocketFamily> = self.targets.iter().map(|t| t.family).collect();
        families.sort();
        families.dedup();
        families
    }

    /// Adopts what an opened channel says about itself.
    pub fn attach_channel(
        &mut self,
        family: SocketFamily,
        has_ip_header: bool,
        identifier_override: Option<u16>,
    ) {
        let ctx = &mut self.families[family.index()];
        ctx.decode.has_ip_header = has_ip_header;
        if let Some(identifier) = identifier_override {
            tracing::debug!(?family, identifier, "kernel assigns echo identifier");
            ctx.identifier = identifier;
        }
    }

    pub fn identifier(&self, family: SocketFamily) -> u16 {
        self.families[family.index()].identifier
    }

    /// Registers and encodes the next due request, if any.
    ///
    /// The request is in the table before it is handed out, so a reply
    /// can never race ahead of its registration. `now` is taken as the
    /// send time.
    pub fn poll_transmit(&mut self, now: Instant) -> Result<Option<Transmit>> {
        let next = self
            .targets
            .iter()
            .enumerate()
            .filter_map(|(idx, t)| t.scheduler.next_due().map(|due| (due, idx)))
            .filter(|(due, _)| *due <= now)
            .min();
        let Some((_, idx)) = next else {
            return Ok(None);
        };

        let target = &mut self.targets[idx];
        let ctx = self.families[target.family.index()];
        let sequence = target.scheduler.record_sent();
        let key = CorrelationKey {
            identifier: ctx.identifier,
            sequence,
            family: target.family,
            address: target.address,
        };
        let payload = packet::build_payload(ctx.identifier, sequence, self.payload_size);
        let pseudo_header = ctx.pseudo_source.map(|src| (src, target.address));
        let encoded = packet::encode_echo_request(
            ctx.identifier,
            sequence,
            &payload,
            target.family,
            pseudo_header,
        )?;

        self.table.insert(Request::new(key, TargetId(idx), now, self.timeout))?;
        tracing::trace!(%key, "echo request due");
        Ok(Some(Transmit {
            family: target.family,
            destination: target.address,
            packet: encoded,
        }))
    }

    /// Matches one received datagram. Anything that does not resolve an
    /// outstanding request is dropped.
    pub fn on_datagram(
        &mut self,
        family: SocketFamily,
        raw: &[u8],
        peer: IpAddr,
        received_at: Instant,
    ) {
        let ctx = self.families[family.index()];
        match packet::decode_incoming(raw, peer, &ctx.decode) {
            ParsedMessage::EchoReply {
                identifier,
                sequence,
                payload,
                ttl,
            } => {
                let key = CorrelationKey {
                    identifier,
                    sequence,
                    family,
                    address: peer,
                };
                let Some(request) = self.table.resolve(&key) else {
                    tracing::trace!(%key, "unmatched echo reply");
                    return;
                };
                let outcome = PingOutcome::Reply {
                    target: request.key.address,
                    sequence,
                    rtt: received_at.saturating_duration_since(request.sent_at),
                    peer,
                    ttl,
                    size: ICMP_HEADER_LEN + payload.len(),
                };
                self.complete(request, outcome, received_at);
            }
            ParsedMessage::Unreachable {
                code,
                original: Some(quote),
            } => self.on_icmp_error(
                family,
                IcmpErrorKind::DestinationUnreachable,
                code,
                quote,
                peer,
                received_at,
            ),
            ParsedMessage::TimeExceeded {
                code,
                original: Some(quote),
            } => self.on_icmp_error(
                family,
                IcmpErrorKind::TimeExceeded,
                code,
                quote,
                peer,
                received_at,
            ),
            ParsedMessage::Malformed => {
                tracing::trace!(%peer, len = raw.len(), "malformed datagram")
            }
            other => tracing::trace!(%peer, ?other, "ignoring icmp message"),
        }
    }

    fn on_icmp_error(
        &mut self,
        family: SocketFamily,
        kind: IcmpErrorKind,
        code: u8,
        quote: QuotedEcho,
        reporter: IpAddr,
        received_at: Instant,
    ) {
        let key = CorrelationKey {
            identifier: quote.identifier,
            sequence: quote.sequence,
            family,
            address: quote.destination,
        };
        let Some(request) = self.table.resolve(&key) else {
            tracing::trace!(%key, %reporter, "unmatched icmp error");
            return;
        };
        let outcome = PingOutcome::Error {
            target: request.key.address,
            sequence: quote.sequence,
            reason: ErrorReason { kind, code, reporter },
        };
        self.complete(request, outcome, received_at);
    }

    /// Turns every request past its deadline into a timeout.
    pub fn expire(&mut self, now: Instant) {
        for request in self.table.sweep(now) {
            let outcome = PingOutcome::Timeout {
                target: request.key.address,
                sequence: request.key.sequence,
            };
            self.complete(request, outcome, now);
        }
    }

    fn complete(&mut self, request: Request, outcome: PingOutcome, at: Instant) {
        let target = &mut self.targets[request.target.0];
        target.scheduler.record_resolved(at);
        if outcome.is_reply() {
            target.received += 1;
        }
        target.held.insert(request.key.sequence, outcome);

        // Release in sequence order; a later reply waits for earlier ones.
        while let Some(outcome) = u16::try_from(target.next_release)
            .ok()
            .and_then(|seq| target.held.remove(&seq))
        {
            self.ready.push_back(outcome);
            target.next_release += 1;
        }
    }

    pub fn pop_outcome(&mut self) -> Option<PingOutcome> {
        let outcome = self.ready.pop_front()?;
        self.released += 1;
        Some(outcome)
    }

    /// Every outcome produced and handed out.
    pub fn is_complete(&self) -> bool {
        self.released >= self.expected && self.ready.is_empty()
    }

    /// Earliest instant at which a send or a deadline is due.
    pub fn next_wakeup(&self) -> Option<Instant> {
        let next_send = self.targets.iter().filter_map(|t| t.scheduler.next_due()).min();
        match (next_send, self.table.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// How long a driver may wait for traffic before it must act again.
    pub fn wait_time(&self, now: Instant) -> Duration {
        match self.next_wakeup() {
            Some(at) => at.saturating_duration_since(now).min(IDLE_WAIT),
            None => IDLE_WAIT,
        }
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn outstanding(&self) -> usize {
        self.table.len()
    }

    pub fn progress(&self) -> Vec<TargetProgress> {
        self.targets
            .iter()
            .map(|t| TargetProgress {
                address: t.address,
                created_at: t.created_at,
                sent: t.scheduler.issued(),
                received: t.received,
                outstanding: t.scheduler.in_flight(),
                completed: (t.next_release - 1) as usize,
                all_sent: t.scheduler.is_exhausted(),
                finished: t.scheduler.is_done(),
            })
            .collect()
    }

    /// Drops every outstanding request. Late replies to them are then
    /// foreign.
    pub fn abort(&mut self) -> usize {
        self.ready.clear();
        self.table.clear()
    }
}
