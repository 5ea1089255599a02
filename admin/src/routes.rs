// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The admin API's 7 HTTP endpoints plus `GET /events`, wired as `warp`
//! filter combinators the way `hebo/src/dashboard/routes.rs` composes its
//! own (smaller) endpoint set.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::auth::{self, Credentials};
use crate::config_store::ConfigStore;
use crate::sse::SharedEventDistributor;

pub fn init(
    store: Arc<ConfigStore>,
    events: SharedEventDistributor,
    credentials: Credentials,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let store_filter = warp::any().map(move || Arc::clone(&store));
    let events_filter = warp::any().map(move || Arc::clone(&events));
    let auth_filter = auth::require_basic_auth(credentials);

    let get_schema = warp::get()
        .and(warp::path("schema"))
        .and(warp::path::end())
        .and_then(get_schema);

    let get_config = warp::get()
        .and(warp::path("config"))
        .and(warp::path::end())
        .and(store_filter.clone())
        .and_then(get_config);

    let patch_config = warp::patch()
        .and(warp::path("config"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and(store_filter.clone())
        .and_then(patch_config);

    let validate_config = warp::post()
        .and(warp::path("config"))
        .and(warp::path("validate"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and(store_filter.clone())
        .and_then(validate_config);

    let deploy_config = warp::post()
        .and(warp::path("config"))
        .and(warp::path("deploy"))
        .and(warp::path::end())
        .and(store_filter.clone())
        .and_then(deploy_config);

    let rollback_config = warp::post()
        .and(warp::path("config"))
        .and(warp::path("rollback"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and(store_filter.clone())
        .and_then(rollback_config);

    let get_history = warp::get()
        .and(warp::path("config"))
        .and(warp::path("history"))
        .and(warp::path::end())
        .and(store_filter)
        .and_then(get_history);

    let get_events = warp::get()
        .and(warp::path("events"))
        .and(warp::path::end())
        .and(events_filter)
        .map(get_events);

    auth_filter.and(
        get_schema
            .or(get_config)
            .or(patch_config)
            .or(validate_config)
            .or(deploy_config)
            .or(rollback_config)
            .or(get_history)
            .or(get_events),
    )
}

#[derive(Deserialize)]
struct RollbackRequest {
    version_id: String,
}

async fn get_schema() -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&mqttsuite_mapping::document_schema_value()))
}

async fn get_config(store: Arc<ConfigStore>) -> Result<impl Reply, Rejection> {
    match store.read_draft_or_active().await {
        Ok(document) => Ok(warp::reply::with_status(warp::reply::json(&document), StatusCode::OK)),
        Err(err) => Ok(error_reply(&err)),
    }
}

async fn patch_config(body: Value, store: Arc<ConfigStore>) -> Result<impl Reply, Rejection> {
    let patch: json_patch::Patch = match serde_json::from_value(body) {
        Ok(patch) => patch,
        Err(err) => return Ok(bad_request(&err.to_string())),
    };
    match store.apply_patch(&patch).await {
        Ok(_document) => Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({"status": "patched", "path": store.active_path().display().to_string()})),
            StatusCode::OK,
        )),
        Err(err) => Ok(error_reply(&err)),
    }
}

async fn validate_config(body: Value, store: Arc<ConfigStore>) -> Result<impl Reply, Rejection> {
    match store.validate(&body) {
        Ok(()) => Ok(warp::reply::with_status(warp::reply::json(&serde_json::json!({"valid": true})), StatusCode::OK)),
        Err(err) => Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({"valid": false, "error": err.to_string()})),
            StatusCode::UNPROCESSABLE_ENTITY,
        )),
    }
}

async fn deploy_config(store: Arc<ConfigStore>) -> Result<impl Reply, Rejection> {
    match store.deploy().await {
        Ok(()) => Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({"status": "deploy-ack", "note": "hot-reload triggered"})),
            StatusCode::OK,
        )),
        Err(err) => Ok(error_reply(&err)),
    }
}

async fn rollback_config(body: RollbackRequest, store: Arc<ConfigStore>) -> Result<impl Reply, Rejection> {
    match store.rollback(&body.version_id).await {
        Ok(()) => Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({"status": "rolled_back", "version": body.version_id})),
            StatusCode::OK,
        )),
        Err(err) => Ok(error_reply(&err)),
    }
}

async fn get_history(store: Arc<ConfigStore>) -> Result<impl Reply, Rejection> {
    match store.history().await {
        Ok(entries) => Ok(warp::reply::with_status(warp::reply::json(&entries), StatusCode::OK)),
        Err(err) => Ok(error_reply(&err)),
    }
}

fn get_events(events: SharedEventDistributor) -> impl Reply {
    warp::sse::reply(warp::sse::keep_alive().stream(events.subscribe()))
}

fn error_reply(err: &crate::error::Error) -> warp::reply::WithStatus<warp::reply::Json> {
    use crate::error::ErrorKind;
    let status = match err.kind() {
        ErrorKind::VersionNotFound => StatusCode::BAD_REQUEST,
        ErrorKind::SchemaInvalid | ErrorKind::PatchFailed => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::MalformedDocument => StatusCode::BAD_REQUEST,
        ErrorKind::IoError => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warp::reply::with_status(warp::reply::json(&serde_json::json!({"error": err.to_string()})), status)
}

fn bad_request(message: &str) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(&serde_json::json!({"error": message})), StatusCode::BAD_REQUEST)
}
