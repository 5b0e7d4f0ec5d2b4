//! In-memory ICMP channel that answers echo requests from a script.

use crate::packet::{build_ipv4_packet, encode_echo_reply, icmp_checksum, read_u16, ICMP_HEADER_LEN};
use crate::socket::{AsyncIcmpChannel, IcmpChannel, Received, SocketFamily};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub(crate) enum Behavior {
    Reply { delay: Duration },
    Unreachable { reporter: IpAddr, code: u8 },
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SentEcho {
    pub at: Instant,
    pub destination: IpAddr,
    pub identifier: u16,
    pub sequence: u16,
}

#[derive(Debug, Default)]
pub(crate) struct LoopbackLog {
    pub sent: Mutex<Vec<SentEcho>>,
    pub closed: AtomicBool,
    /// Blocking receive calls made so far.
    pub polls: AtomicUsize,
}

impl LoopbackLog {
    pub fn sent_to(&self, destination: IpAddr) -> Vec<SentEcho> {
        self.sent
            .lock()
            .iter()
            .filter(|s| s.destination == destination)
            .copied()
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

struct Delivery {
    at: Instant,
    peer: IpAddr,
    bytes: Vec<u8>,
}

/// Targets without a behavior never answer.
pub(crate) struct Loopback {
    family: SocketFamily,
    behaviors: HashMap<IpAddr, Behavior>,
    foreign_noise: bool,
    fail_sends: bool,
    identifier_override: Option<u16>,
    inbox: Vec<Delivery>,
    log: Arc<LoopbackLog>,
    timer: Option<Pin<Box<tokio::time::Sleep>>>,
}

impl Loopback {
    pub fn new(family: SocketFamily) -> Self {
        Loopback {
            family,
            behaviors: HashMap::new(),
            foreign_noise: false,
            fail_sends: false,
            identifier_override: None,
            inbox: Vec::new(),
            log: Arc::new(LoopbackLog::default()),
            timer: None,
        }
    }

    pub fn reply(mut self, target: IpAddr, delay: Duration) -> Self {
        self.behaviors.insert(target, Behavior::Reply { delay });
        self
    }

    pub fn unreachable(mut self, target: IpAddr, reporter: IpAddr, code: u8) -> Self {
        self.behaviors.insert(target, Behavior::Unreachable { reporter, code });
        self
    }

    /// Every request also triggers a reply carrying someone else's
    /// identifier, a looped-back copy of the request and a runt datagram.
    pub fn with_foreign_noise(mut self) -> Self {
        self.foreign_noise = true;
        self
    }

    pub fn failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    pub fn with_identifier_override(mut self, identifier: u16) -> Self {
        self.identifier_override = Some(identifier);
        self
    }

    pub fn log(&self) -> Arc<LoopbackLog> {
        self.log.clone()
    }

    fn answer(&mut self, request: &[u8], destination: IpAddr) -> io::Result<usize> {
        if self.fail_sends {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "send refused"));
        }
        let now = Instant::now();
        let (identifier, sequence) = match (read_u16(request, 4), read_u16(request, 6)) {
            (Some(identifier), Some(sequence)) => (identifier, sequence),
            _ => return Err(io::Error::new(io::ErrorKind::InvalidInput, "short echo request")),
        };
        let payload = &request[ICMP_HEADER_LEN..];
        self.log.sent.lock().push(SentEcho {
            at: now,
            destination,
            identifier,
            sequence,
        });

        if self.foreign_noise {
            let foreign = encode_echo_reply(
                identifier.wrapping_add(1),
                sequence,
                payload,
                self.family,
                None,
            )
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            self.push(now, destination, foreign);
            self.push(now, destination, request.to_vec());
            self.push(now, destination, vec![0u8; 3]);
        }

        match self.behaviors.get(&destination).copied() {
            Some(Behavior::Reply { delay }) => {
                let reply = encode_echo_reply(identifier, sequence, payload, self.family, None)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                self.push(now + delay, destination, reply);
            }
            Some(Behavior::Unreachable { reporter, code }) => {
                if let IpAddr::V4(dst) = destination {
                    self.push(now, reporter, unreachable_v4(code, dst, request));
                }
            }
            None => {}
        }
        Ok(request.len())
    }

    fn push(&mut self, at: Instant, peer: IpAddr, bytes: Vec<u8>) {
        self.inbox.push(Delivery { at, peer, bytes });
    }

    fn next_at(&self) -> Option<Instant> {
        self.inbox.iter().map(|d| d.at).min()
    }

    fn take_due(&mut self, now: Instant, buf: &mut [u8]) -> Option<Received> {
        let idx = self
            .inbox
            .iter()
            .enumerate()
            .filter(|(_, d)| d.at <= now)
            .min_by_key(|(_, d)| d.at)
            .map(|(idx, _)| idx)?;
        let delivery = self.inbox.remove(idx);
        let len = delivery.bytes.len().min(buf.len());
        buf[..len].copy_from_slice(&delivery.bytes[..len]);
        Some(Received {
            len,
            peer: delivery.peer,
            received_at: Instant::now(),
        })
    }
}

/// Destination unreachable quoting the IPv4 header and first eight bytes
/// of `request`.
fn unreachable_v4(code: u8, destination: Ipv4Addr, request: &[u8]) -> Vec<u8> {
    let quoted = build_ipv4_packet(
        Ipv4Addr::new(192, 0, 2, 100),
        destination,
        64,
        &request[..ICMP_HEADER_LEN],
    );
    let mut buf = vec![0u8; ICMP_HEADER_LEN + quoted.len()];
    buf[0] = 3;
    buf[1] = code;
    buf[ICMP_HEADER_LEN..].copy_from_slice(&quoted);
    let checksum = icmp_checksum(&buf);
    buf[2..4].copy_from_slice(&checksum.to_be_bytes());
    buf
}

impl Drop for Loopback {
    fn drop(&mut self) {
        self.log.closed.store(true, Ordering::SeqCst);
    }
}

impl IcmpChannel for Loopback {
    fn family(&self) -> SocketFamily {
        self.family
    }

    fn has_ip_header(&self) -> bool {
        false
    }

    fn identifier_override(&self) -> Option<u16> {
        self.identifier_override
    }

    fn send_to(&mut self, buf: &[u8], dest: IpAddr) -> io::Result<usize> {
        self.answer(buf, dest)
    }

    fn poll_receive(&mut self, buf: &mut [u8], max_wait: Duration) -> io::Result<Option<Received>> {
        self.log.polls.fetch_add(1, Ordering::SeqCst);
        let deadline = Instant::now() + max_wait;
        loop {
            let now = Instant::now();
            if let Some(received) = self.take_due(now, buf) {
                return Ok(Some(received));
            }
            if now >= deadline {
                return Ok(None);
            }
            let until = self.next_at().map_or(deadline, |at| at.min(deadline));
            std::thread::sleep(until.saturating_duration_since(now));
        }
    }
}

impl AsyncIcmpChannel for Loopback {
    fn family(&self) -> SocketFamily {
        self.family
    }

    fn has_ip_header(&self) -> bool {
        false
    }

    fn identifier_override(&self) -> Option<u16> {
        self.identifier_override
    }

    fn poll_send_to(
        &mut self,
        _cx: &mut Context<'_>,
        buf: &[u8],
        dest: IpAddr,
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(self.answer(buf, dest))
    }

    fn poll_receive(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<Received>> {
        loop {
            if let Some(received) = self.take_due(Instant::now(), buf) {
                return Poll::Ready(Ok(received));
            }
            let Some(at) = self.next_at() else {
                return Poll::Pending;
            };
            let deadline = tokio::time::Instant::from_std(at);
            let timer = self
                .timer
                .get_or_insert_with(|| Box::pin(tokio::time::sleep_until(deadline)));
            timer.as_mut().reset(deadline);
            if timer.as_mut().poll(cx).is_pending() {
                return Poll::Pending;
            }
        }
    }
}
