// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! A fixed-size vector of connections (spec §4.10): `exec` hands a query to
//! the first idle connection it finds, or enqueues it on the pool-wide FIFO
//! for whichever connection goes idle next.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, Notify};

use crate::config::PgSinkConfig;
use crate::connection::{self, ConnectionHandle, PgParam, Query};
use crate::error::{Error, ErrorKind};
use crate::value::TypedRow;

pub struct PgPool {
    connections: Vec<ConnectionHandle>,
    queue: Arc<Mutex<VecDeque<Query>>>,
    notify: Arc<Notify>,
}

impl PgPool {
    #[must_use]
    pub fn new(config: PgSinkConfig) -> Self {
        let queue: Arc<Mutex<VecDeque<Query>>> = Arc::new(Mutex::new(VecDeque::new()));
        let notify = Arc::new(Notify::new());
        let connections = (0..config.pool_size)
            .map(|_| connection::spawn(config.clone(), Arc::clone(&queue), Arc::clone(&notify)))
            .collect();
        Self { connections, queue, notify }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.connections.len()
    }

    /// At most `pool_size` sends outstanding at once (one per connection);
    /// anything beyond that waits in the pool-wide FIFO.
    pub async fn exec(&self, sql: impl Into<String>, params: Vec<PgParam>) -> Result<Vec<TypedRow>, Error> {
        let (respond, receiver) = oneshot::channel();
        let query = Query { sql: sql.into(), params, respond };

        let mut remaining = query;
        for connection in &self.connections {
            if connection.is_idle() {
                match connection.try_submit(remaining) {
                    Ok(()) => {
                        return receiver.await.map_err(|_| Error::cancelled())?;
                    }
                    Err(rejected) => remaining = rejected,
                }
            }
        }

        self.queue.lock().unwrap().push_back(remaining);
        self.notify.notify_one();
        receiver.await.map_err(|_| Error::cancelled())?
    }

    /// Drops every connection and fails anything still queued, matching
    /// spec §4.10's cancellation contract for a reactor that stops watching
    /// the fd.
    pub fn shutdown(self) {
        let mut queue = self.queue.lock().unwrap();
        while let Some(query) = queue.pop_front() {
            let _ = query.respond.send(Err(Error::new(ErrorKind::PoolClosed, "pool shut down")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_size_matches_configured_connection_count() {
        // Construction spawns background tasks that dial a real database;
        // exercised here only for the synchronous bookkeeping (size(),
        // not exec()), which needs no live server.
        let config = PgSinkConfig { pool_size: 3, ..PgSinkConfig::default() };
        let pool = PgPool::new(config);
        assert_eq!(pool.size(), 3);
        pool.shutdown();
    }
}
