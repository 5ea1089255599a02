// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Mapping-config HTTP admin API (spec C8) and SSE lifecycle event
//! distributor (spec C9).

pub mod auth;
pub mod config_store;
pub mod error;
pub mod routes;
pub mod sse;

use warp::Filter;

pub use auth::Credentials;
pub use config_store::{ConfigStore, HistoryEntry, ReloadCallback};
pub use error::{Error, ErrorKind};
pub use sse::{EventDistributor, SharedEventDistributor};

use std::net::SocketAddr;
use std::sync::Arc;

/// Serve the admin API and SSE stream on `addr` until the process is
/// terminated. Mirrors `hebo`'s dashboard server entry point in shape
/// (build the filter, `warp::serve`), generalized to this crate's own
/// routes and rejection handler.
pub async fn serve(addr: SocketAddr, store: Arc<ConfigStore>, events: SharedEventDistributor, credentials: Credentials) {
    let routes = routes::init(store, events, credentials).recover(auth::handle_rejection);
    warp::serve(routes).run(addr).await;
}
