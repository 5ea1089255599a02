// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Plain-TCP bring-up for a [`mqttsuite_core::client::Client`], shared by
//! every role binary that speaks to a broker rather than accepting
//! connections (integrator, bridge, `mqtt-pub`, `mqtt-sub`). TLS/WebSocket
//! adapters are out of scope for this workspace (spec C11's "other
//! collaborator"); any `Transport` works here, so adding one later is a
//! matter of swapping `TcpStream::connect` for another constructor.

use mqttsuite_core::{Client, ClientEvent, ClientOptions, Connection, Inbound, OutboundHandle, Role};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::{Error, ErrorKind};

const INBOUND_CHANNEL: usize = 64;

/// Open a TCP connection to `host:port`, spawn its [`Connection::run`] loop
/// and send the opening CONNECT. The caller drives `inbound` (typically via
/// [`await_connack`] first, then its own receive loop) for everything after.
///
/// # Errors
///
/// Returns an error if the TCP connect fails or the CONNECT packet cannot
/// be encoded.
pub async fn connect(host: &str, port: u16, options: ClientOptions) -> Result<(Client, mpsc::Receiver<Inbound>), Error> {
    let (client, _outbound, inbound_rx) = connect_with_outbound(host, port, options).await?;
    Ok((client, inbound_rx))
}

/// As [`connect`], but also hands back the raw [`OutboundHandle`] — needed
/// by callers (the bridge binary) that register a connection's write side
/// directly with something other than the [`Client`] that owns it, such as
/// [`mqttsuite_bridge::Bridge`].
///
/// # Errors
///
/// Returns an error if the TCP connect fails or the CONNECT packet cannot
/// be encoded.
pub async fn connect_with_outbound(
    host: &str,
    port: u16,
    options: ClientOptions,
) -> Result<(Client, OutboundHandle, mpsc::Receiver<Inbound>), Error> {
    let keep_alive = options.keep_alive;
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|err| Error::new(ErrorKind::IoError, format!("failed to connect to {host}:{port}: {err}")))?;

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL);
    let (conn, outbound) = Connection::new(stream, Role::Client, keep_alive, inbound_tx);
    tokio::spawn(conn.run());

    let mut client = Client::new(outbound.clone());
    client.connect(options)?;
    Ok((client, outbound, inbound_rx))
}

/// Drive `inbound` until the broker's CONNACK arrives, returning whether it
/// resumed a previous session.
///
/// # Errors
///
/// Returns an error if the broker rejects the CONNECT or the connection
/// closes before a CONNACK is received.
pub async fn await_connack(client: &mut Client, inbound: &mut mpsc::Receiver<Inbound>) -> Result<bool, Error> {
    loop {
        match inbound.recv().await {
            Some(Inbound::Packet(packet)) => {
                if let Some(event) = client.handle_inbound(packet)? {
                    match event {
                        ClientEvent::ConnectAccepted { session_present } => return Ok(session_present),
                        ClientEvent::ConnectRejected(code) => {
                            return Err(Error::new(ErrorKind::IoError, format!("broker rejected CONNECT: {code:?}")));
                        }
                        _ => {}
                    }
                }
            }
            Some(Inbound::Closed { .. }) | None => {
                return Err(Error::new(ErrorKind::IoError, "connection closed before CONNACK was received"));
            }
        }
    }
}
