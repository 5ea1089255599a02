// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Connection runtime (spec C5): owns one connection's parser buffer, send
//! queue, and keep-alive deadline, shuttling bytes between a
//! [`crate::transport::Transport`] and the codec. Mirrors the `run_loop`
//! shape of `hebo::session::Session`, but drives an explicit keep-alive
//! timer instead of polling elapsed time once per iteration, since a client
//! that falls silent for good must still be caught without the loop ever
//! waking up on its own.

use std::time::Duration;

use codec::{decode, Decoded, Packet};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{Error, ErrorKind};
use crate::transport::Transport;

/// Which side of the handshake this connection plays: a broker accepting a
/// client (spec §4.5, dispatching to C4), or a client talking to a broker
/// (integrator, bridge, publisher, subscriber; dispatching to a callback
/// table owned by the caller).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    Server,
    Client,
}

/// One and a half times the negotiated keep-alive, per MQTT-3.1.2-24. Zero
/// disables the mechanism entirely.
#[derive(Debug)]
struct KeepAlive {
    interval: Option<Duration>,
    deadline: Instant,
}

impl KeepAlive {
    fn new(keep_alive_secs: u16) -> Self {
        let interval = if keep_alive_secs == 0 {
            None
        } else {
            Some(Duration::from_millis(u64::from(keep_alive_secs) * 1500))
        };
        Self {
            interval,
            deadline: Instant::now() + interval.unwrap_or(Duration::from_secs(3600)),
        }
    }

    fn reset(&mut self) {
        if let Some(interval) = self.interval {
            self.deadline = Instant::now() + interval;
        }
    }
}

/// A decoded packet the runtime could not interpret itself, forwarded
/// upward for [`crate::broker::Broker`] (server role) or a client's
/// callback table (client role) to act on. PINGREQ/PINGRESP/DISCONNECT are
/// handled inline and never reach this table.
pub enum Inbound {
    Packet(Packet),
    /// Ungraceful close: no DISCONNECT was received (decode error,
    /// keep-alive expiry, EOF, or a protocol violation).
    Closed { graceful: bool },
}

/// Cheaply cloneable write handle for a connection, handed to whatever owns
/// dispatch (the broker core, or a client's request/response bookkeeping)
/// so it can push packets back without holding the connection itself.
#[derive(Clone)]
pub struct OutboundHandle(mpsc::UnboundedSender<Packet>);

impl OutboundHandle {
    #[cfg(test)]
    pub(crate) fn new_for_test(tx: mpsc::UnboundedSender<Packet>) -> Self {
        Self(tx)
    }

    /// # Errors
    ///
    /// Returns an error if the connection's runtime has already stopped.
    pub fn send(&self, packet: Packet) -> Result<(), Error> {
        self.0
            .send(packet)
            .map_err(|_| Error::new(ErrorKind::SendError, "connection runtime has stopped"))
    }
}

impl crate::broker::Outbound for OutboundHandle {
    fn send(&self, packet: Packet) -> Result<(), Error> {
        OutboundHandle::send(self, packet)
    }
}

const READ_CHUNK: usize = 4096;

/// Drives one connection: reads bytes from `transport`, pull-parses them
/// with [`codec::decode`], forwards complete packets to `inbound`, and
/// writes back anything submitted through the paired [`OutboundHandle`].
pub struct Connection<T> {
    transport: T,
    role: Role,
    recv_buf: Vec<u8>,
    keep_alive: KeepAlive,
    inbound: mpsc::Sender<Inbound>,
    outbound_rx: mpsc::UnboundedReceiver<Packet>,
    connect_seen: bool,
}

impl<T: Transport> Connection<T> {
    #[must_use]
    pub fn new(
        transport: T,
        role: Role,
        keep_alive_secs: u16,
        inbound: mpsc::Sender<Inbound>,
    ) -> (Self, OutboundHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Self {
            transport,
            role,
            recv_buf: Vec::with_capacity(1024),
            keep_alive: KeepAlive::new(keep_alive_secs),
            inbound,
            outbound_rx: rx,
            connect_seen: false,
        };
        (conn, OutboundHandle(tx))
    }

    /// Rearm the keep-alive timer once a real keep-alive has been
    /// negotiated (server role only learns this after decoding CONNECT).
    pub fn set_keep_alive(&mut self, keep_alive_secs: u16) {
        self.keep_alive = KeepAlive::new(keep_alive_secs);
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Run until the connection closes. Never returns `Err` for a clean or
    /// protocol-driven close; those are reported through `inbound` as
    /// [`Inbound::Closed`] so the caller can decide whether to publish a
    /// will message.
    pub async fn run(mut self) -> Result<(), Error> {
        let mut read_buf = vec![0u8; READ_CHUNK];
        loop {
            let sleep = tokio::time::sleep_until(self.keep_alive.deadline);
            tokio::select! {
                biased;

                result = self.transport.read(&mut read_buf) => {
                    match result {
                        Ok(0) => {
                            let _ = self.inbound.send(Inbound::Closed { graceful: false }).await;
                            return Ok(());
                        }
                        Ok(n) => {
                            self.keep_alive.reset();
                            self.recv_buf.extend_from_slice(&read_buf[..n]);
                            if !self.pump_decode().await? {
                                return Ok(());
                            }
                        }
                        Err(err) => {
                            let _ = self.inbound.send(Inbound::Closed { graceful: false }).await;
                            return Err(err.into());
                        }
                    }
                }

                Some(packet) = self.outbound_rx.recv() => {
                    let graceful = matches!(packet, Packet::Disconnect(_));
                    let bytes = packet.encode().map_err(Error::from)?;
                    self.transport.write_all(&bytes).await?;
                    if graceful {
                        let _ = self.transport.shutdown().await;
                        let _ = self.inbound.send(Inbound::Closed { graceful: true }).await;
                        return Ok(());
                    }
                }

                () = sleep, if self.keep_alive.interval.is_some() => {
                    let _ = self.inbound.send(Inbound::Closed { graceful: false }).await;
                    return Err(Error::new(ErrorKind::ProtocolViolation, "keep-alive expired"));
                }
            }
        }
    }

    /// Drain every complete packet currently buffered. Returns `Ok(false)`
    /// when the connection must close (decode error, or the caller received
    /// `Inbound::Closed` upstream and can no longer accept more).
    async fn pump_decode(&mut self) -> Result<bool, Error> {
        loop {
            match decode(&self.recv_buf) {
                Decoded::NeedMore => return Ok(true),
                Decoded::Malformed(err) => {
                    let _ = self.inbound.send(Inbound::Closed { graceful: false }).await;
                    return Err(err.into());
                }
                Decoded::Packet(packet, consumed) => {
                    self.recv_buf.drain(..consumed);
                    if matches!(packet, Packet::Connect(_)) {
                        if self.connect_seen {
                            // MQTT-3.1.0-2: a second CONNECT on one connection
                            // is a protocol violation.
                            let _ = self.inbound.send(Inbound::Closed { graceful: false }).await;
                            return Err(Error::new(
                                ErrorKind::ProtocolViolation,
                                "second CONNECT on one connection",
                            ));
                        }
                        self.connect_seen = true;
                    }
                    let is_disconnect = matches!(packet, Packet::Disconnect(_));
                    if self.inbound.send(Inbound::Packet(packet)).await.is_err() {
                        return Ok(false);
                    }
                    if is_disconnect {
                        let _ = self.inbound.send(Inbound::Closed { graceful: true }).await;
                        return Ok(false);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    struct MockTransport {
        inbound: std::collections::VecDeque<u8>,
        outbound: Vec<u8>,
    }

    impl tokio::io::AsyncRead for MockTransport {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let n = std::cmp::min(buf.remaining(), self.inbound.len());
            for _ in 0..n {
                let byte = self.inbound.pop_front().unwrap();
                buf.put_slice(&[byte]);
            }
            Poll::Ready(Ok(()))
        }
    }

    impl tokio::io::AsyncWrite for MockTransport {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.outbound.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn decodes_a_pingreq_and_forwards_it() {
        use codec::PingRequestPacket;

        let bytes = Packet::PingRequest(PingRequestPacket::new()).encode().unwrap();
        let transport = MockTransport {
            inbound: bytes.into_iter().collect(),
            outbound: Vec::new(),
        };
        let (tx, mut rx) = mpsc::channel(8);
        let (conn, _outbound) = Connection::new(transport, Role::Server, 0, tx);
        tokio::spawn(conn.run());

        match rx.recv().await {
            Some(Inbound::Packet(Packet::PingRequest(_))) => {}
            other => panic!("unexpected: {:?}", matches!(other, Some(Inbound::Closed { .. }))),
        }
    }
}
