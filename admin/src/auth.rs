// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! HTTP Basic authentication for the admin API, grounded on
//! `original_source/lib/MappingAdminRouter.cpp`'s `BasicAuthentication`
//! middleware.

use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug)]
struct Unauthorized;

impl warp::reject::Reject for Unauthorized {}

/// Rejects anything but a matching `Authorization: Basic <base64(user:pass)>`
/// header. The realm is fixed at `mqttsuite-admin`, matching the original's
/// single hard-coded realm.
pub fn require_basic_auth(credentials: Credentials) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and_then(move |header: Option<String>| {
            let credentials = credentials.clone();
            async move {
                match header.and_then(|value| decode(&value)) {
                    Some((user, pass)) if user == credentials.username && pass == credentials.password => Ok(()),
                    _ => Err(warp::reject::custom(Unauthorized)),
                }
            }
        })
        .untuple_one()
}

fn decode(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, std::convert::Infallible> {
    if err.find::<Unauthorized>().is_some() {
        let reply = warp::reply::with_header(
            warp::reply::with_status("unauthorized", StatusCode::UNAUTHORIZED),
            "WWW-Authenticate",
            "Basic realm=\"mqttsuite-admin\"",
        );
        return Ok(Box::new(reply) as Box<dyn Reply>);
    }
    Ok(Box::new(warp::reply::with_status("not found", StatusCode::NOT_FOUND)) as Box<dyn Reply>)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepts_the_configured_username_and_password() {
        let credentials = Credentials { username: "admin".to_string(), password: "secret".to_string() };
        let filter = require_basic_auth(credentials);
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"admin:secret");
        let result = warp::test::request()
            .header("authorization", format!("Basic {encoded}"))
            .filter(&filter)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn rejects_a_wrong_password() {
        let credentials = Credentials { username: "admin".to_string(), password: "secret".to_string() };
        let filter = require_basic_auth(credentials);
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"admin:wrong");
        let result = warp::test::request()
            .header("authorization", format!("Basic {encoded}"))
            .filter(&filter)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rejects_a_missing_header() {
        let credentials = Credentials { username: "admin".to_string(), password: "secret".to_string() };
        let filter = require_basic_auth(credentials);
        let result = warp::test::request().filter(&filter).await;
        assert!(result.is_err());
    }
}
