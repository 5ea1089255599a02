// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::time::Duration;

use serde::Deserialize;
use tokio_postgres::config::{Config, SslMode};

/// Pool-wide connection settings; adapted from `PgSQLConnConfig` to add the
/// pool size and reconnect-backoff fields spec §4.10/§5 call for.
#[derive(Debug, Deserialize, Clone)]
pub struct PgSinkConfig {
    /// Use a Unix domain socket instead of TCP. Default false.
    #[serde(default = "PgSinkConfig::default_use_uds")]
    pub use_uds: bool,

    /// Socket path when `use_uds` is set.
    #[serde(default = "PgSinkConfig::default_socket")]
    pub socket: String,

    /// Numeric host address. Spec §5 requires `hostaddr`, not a hostname, to
    /// avoid blocking DNS resolution inside the reactor.
    #[serde(default = "PgSinkConfig::default_host")]
    pub host: String,

    #[serde(default = "PgSinkConfig::default_port")]
    pub port: u16,

    #[serde(default = "PgSinkConfig::default_database")]
    pub database: String,

    #[serde(default = "PgSinkConfig::default_username")]
    pub username: String,

    #[serde(default = "PgSinkConfig::default_password")]
    pub password: String,

    /// Number of connections held open by the pool. Default 4.
    #[serde(default = "PgSinkConfig::default_pool_size")]
    pub pool_size: usize,

    /// Connection/query timeout in seconds. Default 5s.
    #[serde(default = "PgSinkConfig::default_query_timeout")]
    pub query_timeout: u32,

    /// Reconnect backoff base, in milliseconds. Default 500ms.
    #[serde(default = "PgSinkConfig::default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Reconnect backoff ceiling, in milliseconds. Default 30s.
    #[serde(default = "PgSinkConfig::default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl PgSinkConfig {
    const fn default_use_uds() -> bool {
        false
    }

    fn default_socket() -> String {
        String::new()
    }

    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    const fn default_port() -> u16 {
        5432
    }

    fn default_username() -> String {
        "postgres".to_string()
    }

    fn default_password() -> String {
        String::new()
    }

    fn default_database() -> String {
        "mqttsuite".to_string()
    }

    const fn default_pool_size() -> usize {
        4
    }

    const fn default_query_timeout() -> u32 {
        5
    }

    const fn default_backoff_base_ms() -> u64 {
        500
    }

    const fn default_backoff_max_ms() -> u64 {
        30_000
    }
}

impl Default for PgSinkConfig {
    fn default() -> Self {
        Self {
            use_uds: Self::default_use_uds(),
            socket: Self::default_socket(),
            host: Self::default_host(),
            port: Self::default_port(),
            database: Self::default_database(),
            username: Self::default_username(),
            password: Self::default_password(),
            pool_size: Self::default_pool_size(),
            query_timeout: Self::default_query_timeout(),
            backoff_base_ms: Self::default_backoff_base_ms(),
            backoff_max_ms: Self::default_backoff_max_ms(),
        }
    }
}

impl PgSinkConfig {
    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.query_timeout))
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    #[must_use]
    pub fn libpq_config(&self) -> Config {
        let mut builder = Config::new();
        builder
            .user(&self.username)
            .password(self.password.as_bytes())
            .dbname(&self.database)
            .application_name("mqttsuite-pgsink")
            .ssl_mode(SslMode::Disable)
            .port(self.port)
            .connect_timeout(self.query_timeout());
        if self.use_uds {
            builder.host_path(&self.socket);
        } else {
            builder.host(&self.host);
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_sensible_defaults() {
        let config: PgSinkConfig = toml::from_str(
            r#"
            database = "sensors"
            username = "ingest"
            password = "secret"
            pool_size = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.database, "sensors");
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.backoff_base_ms, 500);
    }
}
