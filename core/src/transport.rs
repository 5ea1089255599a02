// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Transport adapters (spec C11) are out of scope here: TCP/TLS handshakes,
//! Unix-domain framing and WebSocket upgrades are external collaborators
//! that feed bytes into [`crate::conn`]. This module specifies only the
//! interface the connection runtime consumes, the same split `hebo`'s
//! `listener::protocol::Protocol` enum draws between "which socket kind"
//! and "how bytes move": any `AsyncRead + AsyncWrite` stream works, and the
//! adapter only needs to report which kind of socket it came from.

use tokio::io::{AsyncRead, AsyncWrite};

/// A byte-stream connection, after any TLS/WebSocket framing has already
/// been peeled off by whichever adapter accepted it. Blanket-implemented
/// for anything Tokio can already read and write, so a `TcpStream`,
/// `TlsStream<TcpStream>`, `UnixStream` or `WebSocketStream` adapter all
/// satisfy it without a dedicated wrapper type.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Which kind of socket produced a [`Transport`], kept for logging and
/// `$SYS` listener stats, mirroring `hebo::listener::protocol::Protocol`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportKind {
    Tcp,
    Tls,
    Unix,
    WebSocket,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Tls => "tls",
            TransportKind::Unix => "unix",
            TransportKind::WebSocket => "ws",
        };
        write!(f, "{name}")
    }
}
