use super::blocking::missing_channel;
use super::session::{SessionState, TargetProgress, Transmit, MAX_DRAIN_BATCH, RECV_BUFFER_SIZE};
use super::{PingOutcome, Pinger};
use crate::error::{Error, Result};
use crate::socket::{is_transient, AsyncIcmpChannel, AsyncIcmpSocket};
use futures::future::poll_fn;
use futures::stream::{self, Stream};
use std::future::Future;
use std::task::Poll;
use std::time::Instant;

/// A ping run polled from an async task.
///
/// Behaves exactly like [`PingSession`](super::PingSession): same
/// ordering, same fatal-error handling, same cleanup on drop. Dropping a
/// pending [`next`](AsyncPingSession::next) future is safe; a request that
/// was about to go out is sent on the following call.
pub struct AsyncPingSession<C: AsyncIcmpChannel = AsyncIcmpSocket> {
    state: SessionState,
    channels: [Option<C>; 2],
    buf: Vec<u8>,
    pending: Option<Transmit>,
    finished: bool,
}

impl AsyncPingSession<AsyncIcmpSocket> {
    pub(crate) fn open(pinger: &Pinger) -> Result<Self> {
        let state = SessionState::new(pinger, Instant::now())?;
        let mut channels = Vec::new();
        for family in state.families() {
            let socket = AsyncIcmpSocket::new(&pinger.icmp_config(family))
                .map_err(|source| Error::Socket { family, source })?;
            tracing::debug!(?family, kind = ?socket.socket_type(), "socket ready");
            channels.push(socket);
        }
        Self::from_parts(state, channels)
    }
}

impl<C: AsyncIcmpChannel> AsyncPingSession<C> {
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
        Ok(AsyncPingSession {
            state,
            channels: slots,
            buf: vec![0u8; RECV_BUFFER_SIZE],
            pending: None,
            finished: false,
        })
    }

    pub fn progress(&self) -> Vec<TargetProgress> {
        self.state.progress()
    }

    /// Waits for the next outcome. `None` once every target is done or
    /// after a fatal error has been returned.
    pub async fn next(&mut self) -> Option<Result<PingOutcome>> {
        if self.finished {
            return None;
        }
        match self.advance().await {
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

    /// Turns the session into a stream of outcomes.
    pub fn into_stream(self) -> impl Stream<Item = Result<PingOutcome>> {
        stream::unfold(self, |mut session| async move {
            let item = session.next().await?;
            Some((item, session))
        })
    }

    async fn advance(&mut self) -> Result<Option<PingOutcome>> {
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
            self.flush_transmits().await?;
            self.receive().await?;
        }
    }

    async fn flush_transmits(&mut self) -> Result<()> {
        loop {
            if self.pending.is_none() {
                self.pending = self.state.poll_transmit(Instant::now())?;
            }
            let Some(tx) = self.pending.as_ref() else {
                return Ok(());
            };
            let channel = self.channels[tx.family.index()]
                .as_mut()
                .ok_or_else(|| missing_channel(tx.family))?;
            poll_fn(|cx| channel.poll_send_to(cx, &tx.packet, tx.destination))
                .await
                .map_err(|source| Error::Send {
                    addr: tx.destination,
                    source,
                })?;
            self.pending = None;
        }
    }

    /// Waits until traffic arrives or the next send or deadline is due,
    /// draining whatever is readable.
    async fn receive(&mut self) -> Result<()> {
        let wake_at = Instant::now() + self.state.wait_time(Instant::now());
        let sleep = tokio::time::sleep_until(tokio::time::Instant::from_std(wake_at));
        tokio::pin!(sleep);

        let AsyncPingSession {
            state, channels, buf, ..
        } = self;
        poll_fn(|cx| {
            let mut progressed = false;
            for channel in channels.iter_mut().flatten() {
                let family = channel.family();
                for _ in 0..MAX_DRAIN_BATCH {
                    match channel.poll_receive(cx, buf) {
                        Poll::Ready(Ok(rx)) => {
                            state.on_datagram(family, &buf[..rx.len], rx.peer, rx.received_at);
                            progressed = true;
                        }
                        Poll::Ready(Err(e)) if is_transient(&e) => {
                            progressed = true;
                            break;
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(Error::Receive(e))),
                        Poll::Pending => break,
                    }
                }
            }
            if progressed || sleep.as_mut().poll(cx).is_ready() {
                return Poll::Ready(Ok(()));
            }
            Poll::Pending
        })
        .await
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.pending = None;
        let abandoned = self.state.abort();
        self.channels = [None, None];
        tracing::debug!(abandoned, "ping session closed");
    }
}

impl<C: AsyncIcmpChannel> Drop for AsyncPingSession<C> {
    fn drop(&mut self) {
        self.finish();
    }
}
