use super::session::{SessionState, TargetProgress, MAX_DRAIN_BATCH, RECV_BUFFER_SIZE};
use super::{PingOutcome, Pinger, StatsIter};
use crate::error::{Error, Result};
use crate::socket::{is_transient, IcmpChannel, IcmpSocket, SocketFamily};
use std::io;
use std::iter::FusedIterator;
use std::time::{Duration, Instant};

/// Longest a blocking wait stays on one socket while another family's
/// socket is also open.
const DUAL_STACK_SLICE: Duration = Duration::from_millis(1);

/// A ping run driven from the calling thread.
///
/// Each call to [`Iterator::next`] blocks until the next outcome is ready.
/// Outcomes of one target come out in sequence order; across targets they
/// interleave as they resolve. A fatal socket error is yielded once, after
/// which the iterator is exhausted. Dropping the session closes its sockets
/// and forgets every outstanding request.
///
/// With targets in both address families the thread cannot block on the two
/// sockets at once, so it alternates between them in 1 ms waits. That costs
/// up to a thousand wake-ups per second for the whole run and adds up to
/// 1 ms to measured round trips. Single-family sessions block for the full
/// wait, and [`AsyncPingSession`](super::AsyncPingSession) waits on both
/// sockets without slicing.
pub struct PingSession<C: IcmpChannel = IcmpSocket> {
    state: SessionState,
    channels: [Option<C>; 2],
    buf: Vec<u8>,
    finished: bool,
}

impl PingSession<IcmpSocket> {
    pub(crate) fn open(pinger: &Pinger) -> Result<Self> {
        let state = SessionState::new(pinger, Instant::now())?;
        let mut channels = Vec::new();
        for family in state.families() {
            let socket = IcmpSocket::new(&pinger.icmp_config(family))
                .map_err(|source| Error::Socket { family, source })?;
            tracing::debug!(?family, kind = ?socket.socket_type(), "socket ready");
            channels.push(socket);
        }
        Self::from_parts(state, channels)
    }
}

impl<C: IcmpChannel> PingSession<C> {
    /// Runs `pinger` over caller-supplied channels, one per address family
    /// among the targets.
    pub fn with_channels(pinger: &Pinger, channels: Vec<C>) -> Result<Self> {
        let state = SessionState::new(pinger, Instant::now())?;
        Self::from_parts(state, channels)
    }

    fn from_parts(mut state: SessionState, channels: Vec<C>) -> Result<Self> {
        let mut slots: [Option<C>; 2] = [None, None];
        for channel in channels {
            let family = channel.family();
            state.attach_channel(family, channel.has_ip_header(), channel.identifier_override());
            slots[family.index()] = Some(channel);
        }
        for family in state.families() {
            if slots[family.index()].is_none() {
                return Err(missing_channel(family));
            }
        }
        Ok(PingSession {
            state,
            channels: slots,
            buf: vec![0u8; RECV_BUFFER_SIZE],
            finished: false,
        })
    }

    /// Per-target counters at this point of the run.
    pub fn progress(&self) -> Vec<TargetProgress> {
        self.state.progress()
    }

    /// Wraps the session so statistics are gathered while iterating.
    pub fn with_stats(self) -> StatsIter<Self> {
        StatsIter::new(self)
    }

    fn advance(&mut self) -> Result<Option<PingOutcome>> {
        loop {
            if let Some(outcome) = self.state.pop_outcome() {
                return Ok(Some(outcome));
            }
            if self.state.is_complete() {
                return Ok(None);
            }
            self.state.expire(Instant::now());
            if self.state.has_ready() {
                continue;
            }
            self.flush_transmits()?;
            let wait = self.state.wait_time(Instant::now());
            self.receive(wait)?;
        }
    }

    fn flush_transmits(&mut self) -> Result<()> {
        while let Some(tx) = self.state.poll_transmit(Instant::now())? {
            let channel = self.channels[tx.family.index()]
                .as_mut()
                .ok_or_else(|| missing_channel(tx.family))?;
            channel
                .send_to(&tx.packet, tx.destination)
                .map_err(|source| Error::Send {
                    addr: tx.destination,
                    source,
                })?;
        }
        Ok(())
    }

    /// Waits up to `wait` for traffic and drains what has arrived.
    fn receive(&mut self, wait: Duration) -> Result<()> {
        let open = self.channels.iter().flatten().count();
        let slice = if open > 1 { wait.min(DUAL_STACK_SLICE) } else { wait };

        let PingSession {
            state, channels, buf, ..
        } = self;
        for channel in channels.iter_mut().flatten() {
            let family = channel.family();
            let mut max_wait = slice;
            for _ in 0..MAX_DRAIN_BATCH {
                match channel.poll_receive(buf, max_wait) {
                    Ok(Some(rx)) => {
                        state.on_datagram(family, &buf[..rx.len], rx.peer, rx.received_at)
                    }
                    Ok(None) => break,
                    Err(e) if is_transient(&e) => break,
                    Err(e) => return Err(Error::Receive(e)),
                }
                max_wait = Duration::ZERO;
            }
        }
        Ok(())
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let abandoned = self.state.abort();
        self.channels = [None, None];
        tracing::debug!(abandoned, "ping session closed");
    }
}

impl<C: IcmpChannel> Iterator for PingSession<C> {
    type Item = Result<PingOutcome>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.advance() {
            Ok(Some(outcome)) => Some(Ok(outcome)),
            Ok(None) => {
                self.finish();
                None
            }
            Err(e) => {
                tracing::warn!("ping session aborted: {}", e);
                self.finish();
                Some(Err(e))
            }
        }
    }
}

impl<C: IcmpChannel> FusedIterator for PingSession<C> {}

impl<C: IcmpChannel> Drop for PingSession<C> {
    fn drop(&mut self) {
        self.finish();
    }
}

pub(crate) fn missing_channel(family: SocketFamily) -> Error {
    Error::Socket {
        family,
        source: io::Error::new(io::ErrorKind::NotFound, "no channel for address family"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ping::loopback::Loopback;
    use crate::ping::{IcmpErrorKind, MAX_WAIT};
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    fn v4(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, last))
    }

    fn pinger(targets: Vec<IpAddr>, count: usize) -> Pinger {
        let mut pinger = Pinger::new(targets);
        pinger.count = count;
        pinger.identifier = 0x4d4d;
        pinger.interval = Duration::from_millis(20);
        pinger.timeout = Duration::from_millis(200);
        pinger
    }

    fn run(pinger: &Pinger, channels: Vec<Loopback>) -> Vec<PingOutcome> {
        PingSession::with_channels(pinger, channels)
            .unwrap()
            .map(|item| item.unwrap())
            .collect()
    }

    fn sequences(outcomes: &[PingOutcome], target: IpAddr) -> Vec<u16> {
        outcomes
            .iter()
            .filter(|o| o.target() == target)
            .map(|o| o.sequence())
            .collect()
    }

    #[test]
    fn test_all_targets_reply() {
        let delay = Duration::from_millis(5);
        let channel = Loopback::new(SocketFamily::Ipv4).reply(v4(1), delay).reply(v4(2), delay);
        let outcomes = run(&pinger(vec![v4(1), v4(2)], 3), vec![channel]);

        assert_eq!(outcomes.len(), 6);
        assert!(outcomes.iter().all(|o| o.is_reply()));
        assert!(outcomes.iter().all(|o| o.rtt().unwrap() >= delay));
        assert_eq!(sequences(&outcomes, v4(1)), vec![1, 2, 3]);
        assert_eq!(sequences(&outcomes, v4(2)), vec![1, 2, 3]);
    }

    #[test]
    fn test_silent_target_times_out() {
        let mut p = pinger(vec![v4(1), v4(2)], 2);
        p.timeout = Duration::from_millis(50);
        let channel = Loopback::new(SocketFamily::Ipv4).reply(v4(2), Duration::from_millis(2));
        let outcomes = run(&p, vec![channel]);

        assert_eq!(outcomes.len(), 4);
        let silent: Vec<&PingOutcome> = outcomes.iter().filter(|o| o.target() == v4(1)).collect();
        assert_eq!(
            silent,
            vec![
                &PingOutcome::Timeout {
                    target: v4(1),
                    sequence: 1
                },
                &PingOutcome::Timeout {
                    target: v4(1),
                    sequence: 2
                },
            ]
        );
        assert!(outcomes.iter().filter(|o| o.target() == v4(2)).all(|o| o.is_reply()));
    }

    #[test]
    fn test_foreign_traffic_ignored() {
        let channel = Loopback::new(SocketFamily::Ipv4)
            .reply(v4(1), Duration::from_millis(3))
            .with_foreign_noise();
        let outcomes = run(&pinger(vec![v4(1)], 3), vec![channel]);
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.is_reply()));
        assert_eq!(sequences(&outcomes, v4(1)), vec![1, 2, 3]);
    }

    #[test]
    fn test_unreachable_reported() {
        let router = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 1));
        let channel = Loopback::new(SocketFamily::Ipv4).unreachable(v4(9), router, 1);
        let outcomes = run(&pinger(vec![v4(9)], 2), vec![channel]);

        assert_eq!(outcomes.len(), 2);
        for (outcome, seq) in outcomes.iter().zip(1u16..) {
            match outcome {
                PingOutcome::Error {
                    target,
                    sequence,
                    reason,
                } => {
                    assert_eq!(*target, v4(9));
                    assert_eq!(*sequence, seq);
                    assert_eq!(reason.kind, IcmpErrorKind::DestinationUnreachable);
                    assert_eq!(reason.code, 1);
                    assert_eq!(reason.reporter, router);
                }
                other => panic!("unexpected outcome {:?}", other),
            }
        }
    }

    #[test]
    fn test_strict_interval_keeps_cadence() {
        let mut p = pinger(vec![v4(1)], 4);
        p.strict_interval = true;
        p.timeout = Duration::from_millis(500);
        let channel = Loopback::new(SocketFamily::Ipv4).reply(v4(1), Duration::from_millis(60));
        let log = channel.log();
        let outcomes = run(&p, vec![channel]);

        assert_eq!(outcomes.len(), 4);
        let sent = log.sent_to(v4(1));
        assert_eq!(sent.len(), 4);
        let span = sent[3].at - sent[0].at;
        // Waiting for each reply would take at least 3 * (60 + 20) ms.
        assert!(span >= Duration::from_millis(50), "span {:?}", span);
        assert!(span < Duration::from_millis(200), "span {:?}", span);
    }

    #[test]
    fn test_non_strict_waits_for_outcome() {
        let channel = Loopback::new(SocketFamily::Ipv4).reply(v4(1), Duration::from_millis(30));
        let log = channel.log();
        let outcomes = run(&pinger(vec![v4(1)], 3), vec![channel]);

        assert_eq!(outcomes.len(), 3);
        let sent = log.sent_to(v4(1));
        for pair in sent.windows(2) {
            assert!(pair[1].at - pair[0].at >= Duration::from_millis(50));
        }
    }

    #[test]
    fn test_identifier_override_followed() {
        let channel = Loopback::new(SocketFamily::Ipv4)
            .reply(v4(1), Duration::from_millis(1))
            .with_identifier_override(0x5151);
        let log = channel.log();
        let outcomes = run(&pinger(vec![v4(1)], 2), vec![channel]);

        assert!(outcomes.iter().all(|o| o.is_reply()));
        assert!(log.sent_to(v4(1)).iter().all(|s| s.identifier == 0x5151));
    }

    #[test]
    fn test_dual_stack() {
        let v6 = IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1));
        let channels = vec![
            Loopback::new(SocketFamily::Ipv6).reply(v6, Duration::from_millis(2)),
            Loopback::new(SocketFamily::Ipv4).reply(v4(1), Duration::from_millis(2)),
        ];
        let outcomes = run(&pinger(vec![v4(1), v6], 2), channels);
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(|o| o.is_reply()));
        assert_eq!(sequences(&outcomes, v6), vec![1, 2]);
    }

    #[test]
    fn test_dual_stack_reply_not_held_by_other_socket() {
        let v6 = IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1));
        let delay = Duration::from_millis(30);
        let mut p = pinger(vec![v4(1), v6], 1);
        p.timeout = Duration::from_millis(150);
        let v6_channel = Loopback::new(SocketFamily::Ipv6);
        let v6_log = v6_channel.log();
        let channels = vec![v6_channel, Loopback::new(SocketFamily::Ipv4).reply(v4(1), delay)];
        let outcomes = run(&p, channels);

        let reply = outcomes.iter().find(|o| o.target() == v4(1)).unwrap();
        assert!(reply.rtt().unwrap() < delay + Duration::from_millis(15));
        assert!(outcomes.iter().any(|o| o.target() == v6 && !o.is_reply()));
        // The silent socket was waited on in short slices throughout.
        assert!(v6_log.polls() > 20, "polls {}", v6_log.polls());
    }

    #[test]
    fn test_single_stack_blocks_for_full_wait() {
        let mut p = pinger(vec![v4(1)], 1);
        p.timeout = Duration::from_millis(100);
        let channel = Loopback::new(SocketFamily::Ipv4);
        let log = channel.log();
        let outcomes = run(&p, vec![channel]);

        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].is_reply());
        assert!(log.polls() < 10, "polls {}", log.polls());
    }

    #[test]
    fn test_send_failure_is_fatal() {
        let channel = Loopback::new(SocketFamily::Ipv4).failing_sends();
        let log = channel.log();
        let mut session =
            PingSession::with_channels(&pinger(vec![v4(1)], 3), vec![channel]).unwrap();

        assert!(matches!(session.next(), Some(Err(Error::Send { addr, .. })) if addr == v4(1)));
        assert!(log.is_closed());
        assert!(session.next().is_none());
    }

    #[test]
    fn test_early_drop_releases_channel() {
        let channel = Loopback::new(SocketFamily::Ipv4).reply(v4(1), Duration::from_millis(1));
        let log = channel.log();
        let mut session =
            PingSession::with_channels(&pinger(vec![v4(1)], 5), vec![channel]).unwrap();

        assert!(session.next().unwrap().unwrap().is_reply());
        let progress = session.progress();
        assert_eq!(progress[0].completed, 1);
        assert!(progress[0].sent >= 1);
        assert!(!log.is_closed());

        drop(session);
        assert!(log.is_closed());
    }

    #[test]
    fn test_unbounded_waits_rejected() {
        let mut p = pinger(vec![v4(1)], 1);
        p.timeout = Duration::MAX;
        let channel = Loopback::new(SocketFamily::Ipv4).reply(v4(1), Duration::from_millis(1));
        let result = PingSession::with_channels(&p, vec![channel]);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));

        let mut p = pinger(vec![v4(1)], 3);
        p.strict_interval = true;
        p.interval = Duration::from_secs(u64::MAX / 2);
        let channel = Loopback::new(SocketFamily::Ipv4).reply(v4(1), Duration::from_millis(1));
        let result = PingSession::with_channels(&p, vec![channel]);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_longest_accepted_waits_run() {
        let mut p = pinger(vec![v4(1)], 3);
        p.strict_interval = true;
        p.interval = MAX_WAIT;
        p.timeout = MAX_WAIT;
        let channel = Loopback::new(SocketFamily::Ipv4).reply(v4(1), Duration::from_millis(1));
        let mut session = PingSession::with_channels(&p, vec![channel]).unwrap();
        assert!(session.next().unwrap().unwrap().is_reply());
    }

    #[test]
    fn test_empty_target_list() {
        let mut session =
            PingSession::<Loopback>::with_channels(&pinger(vec![], 3), vec![]).unwrap();
        assert!(session.next().is_none());
    }

    #[test]
    fn test_missing_channel_rejected() {
        let result = PingSession::<Loopback>::with_channels(&pinger(vec![v4(1)], 1), vec![]);
        assert!(matches!(result, Err(Error::Socket { family: SocketFamily::Ipv4, .. })));
    }

    #[test]
    fn test_with_stats() {
        let channel = Loopback::new(SocketFamily::Ipv4).reply(v4(1), Duration::from_millis(1));
        let mut iter = PingSession::with_channels(&pinger(vec![v4(1)], 2), vec![channel])
            .unwrap()
            .with_stats();
        assert_eq!(iter.by_ref().count(), 2);
        let host = iter.stats().get(&v4(1)).unwrap();
        assert_eq!(host.received, 2);
        assert_eq!(host.loss(), 0.0);
    }

    #[test]
    #[ignore = "needs CAP_NET_RAW or ping_group_range"]
    fn test_ping_localhost() {
        let mut p = Pinger::new(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
        p.count = 2;
        p.interval = Duration::from_millis(100);
        let result = p.ping().unwrap();
        assert_eq!(result.outcomes.len(), 2);
        assert!(result.outcomes.iter().all(|o| o.is_reply()));
    }
}
