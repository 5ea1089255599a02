// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! One pool slot's state machine (spec §4.10): `Disconnected -> Connecting
//! -> Connected -> Sending -> Flushing -> Reading -> Connected ...`.
//! `tokio-postgres` already drives its connection socket on the reactor
//! internally (the spawned `Connection` future owns the readable/writable
//! edges `AsyncPostgresConnection.cpp`'s hand-rolled poll loop tracked
//! explicitly), so this module's job is to make those same states
//! observable and to give each slot its own query FIFO plus
//! submission-order callback delivery.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::NoTls;

use crate::config::PgSinkConfig;
use crate::error::{Error, ErrorKind};
use crate::value::{decode_row, TypedRow};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Sending = 3,
    Flushing = 4,
    Reading = 5,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Sending,
            4 => Self::Flushing,
            5 => Self::Reading,
            _ => Self::Disconnected,
        }
    }
}

#[derive(Clone, Debug)]
pub enum PgParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ToSql for PgParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            PgParam::Null => Ok(IsNull::Yes),
            PgParam::Bool(v) => v.to_sql(ty, out),
            PgParam::Int(v) => v.to_sql(ty, out),
            PgParam::Float(v) => v.to_sql(ty, out),
            PgParam::Text(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(ty: &Type) -> bool {
        <bool as ToSql>::accepts(ty)
            || <i64 as ToSql>::accepts(ty)
            || <f64 as ToSql>::accepts(ty)
            || <String as ToSql>::accepts(ty)
    }

    to_sql_checked!();
}

pub struct Query {
    pub sql: String,
    pub params: Vec<PgParam>,
    pub respond: oneshot::Sender<Result<Vec<TypedRow>, Error>>,
}

#[derive(Clone)]
pub struct ConnectionHandle {
    state: Arc<AtomicU8>,
    sender: mpsc::UnboundedSender<Query>,
}

impl ConnectionHandle {
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Queues onto this connection's own FIFO; errs only once the
    /// connection task has exited for good.
    pub fn try_submit(&self, query: Query) -> Result<(), Query> {
        self.sender.send(query).map_err(|err| err.0)
    }
}

pub type PoolQueue = Arc<Mutex<VecDeque<Query>>>;

/// Connects (retrying with exponential backoff on failure) and runs the
/// connection's serving loop for as long as the pool holds its handle.
/// `pool_queue`/`pool_notify` are shared across every connection in the
/// pool: an idle connection drains its own FIFO first, then the pool-wide
/// FIFO, per spec §4.10's "pulls from the pool FIFO on `CONNECTED`
/// re-entry".
pub fn spawn(config: PgSinkConfig, pool_queue: PoolQueue, pool_notify: Arc<Notify>) -> ConnectionHandle {
    let (sender, mut receiver) = mpsc::unbounded_channel::<Query>();
    let state = Arc::new(AtomicU8::new(ConnectionState::Disconnected as u8));
    let handle = ConnectionHandle { state: Arc::clone(&state), sender };

    tokio::spawn(async move {
        let mut backoff = config.backoff_base();
        loop {
            state.store(ConnectionState::Connecting as u8, Ordering::Release);
            let client = match connect(&config).await {
                Ok(client) => client,
                Err(err) => {
                    log::warn!("pgsink connection failed: {err}");
                    state.store(ConnectionState::Disconnected as u8, Ordering::Release);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(config.backoff_max());
                    continue;
                }
            };
            backoff = config.backoff_base();
            state.store(ConnectionState::Connected as u8, Ordering::Release);

            loop {
                let query = match receiver.try_recv() {
                    Ok(query) => query,
                    Err(_) => {
                        let popped = pool_queue.lock().unwrap().pop_front();
                        match popped {
                        Some(query) => query,
                        None => {
                            state.store(ConnectionState::Connected as u8, Ordering::Release);
                            tokio::select! {
                                maybe = receiver.recv() => match maybe {
                                    Some(query) => query,
                                    None => return,
                                },
                                () = pool_notify.notified() => continue,
                            }
                        }
                        }
                    },
                };

                state.store(ConnectionState::Sending as u8, Ordering::Release);
                state.store(ConnectionState::Flushing as u8, Ordering::Release);
                let params: Vec<&(dyn ToSql + Sync)> = query.params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
                state.store(ConnectionState::Reading as u8, Ordering::Release);
                let result = client.query(query.sql.as_str(), &params).await;
                state.store(ConnectionState::Connected as u8, Ordering::Release);

                let outcome = match result {
                    Ok(rows) => rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>(),
                    Err(err) => Err(Error::from(err)),
                };
                let _ = query.respond.send(outcome);

                if client.is_closed() {
                    break;
                }
            }

            state.store(ConnectionState::Disconnected as u8, Ordering::Release);
            drain(&mut receiver, Error::new(ErrorKind::Cancelled, "connection lost"));
        }
    });

    handle
}

async fn connect(config: &PgSinkConfig) -> Result<tokio_postgres::Client, Error> {
    let (client, connection) =
        config.libpq_config().connect(NoTls).await.map_err(|err| Error::new(ErrorKind::ConnectFailed, err.to_string()))?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            log::error!("pgsink connection task exited: {err}");
        }
    });
    Ok(client)
}

fn drain(receiver: &mut mpsc::UnboundedReceiver<Query>, error: Error) {
    while let Ok(query) = receiver.try_recv() {
        let _ = query.respond.send(Err(error.clone()));
    }
}
