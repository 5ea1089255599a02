// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The `--client-id`/`--qos`/`--keep-alive`/`--will-*` flags shared by
//! `mqtt-pub` and `mqtt-sub`, grounded on `ruo::connect_options::ConnectOptions`'s
//! field set and `hebo::server::run_server`'s `clap::App` builder style.

use clap::{App, Arg, ArgMatches};
use codec::{LastWill, QoS};
use mqttsuite_core::ClientOptions;

use crate::error::{Error, ErrorKind};

/// Register the common connection flags on `app`. Callers add their own
/// role-specific flags (`--topic`, `--message`, ...) on top.
pub fn apply<'a, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
    app.arg(Arg::with_name("host").long("host").takes_value(true).default_value("127.0.0.1").help("Broker host"))
        .arg(Arg::with_name("port").long("port").takes_value(true).default_value("1883").help("Broker port"))
        .arg(
            Arg::with_name("client-id")
                .long("client-id")
                .takes_value(true)
                .help("MQTT client id, a random one is generated when absent"),
        )
        .arg(
            Arg::with_name("keep-alive")
                .long("keep-alive")
                .takes_value(true)
                .default_value("60")
                .help("Keep-alive interval in seconds, 0 disables it"),
        )
        .arg(
            Arg::with_name("retain-session")
                .long("retain-session")
                .help("Ask the broker to keep this session across reconnects (clean_session=false)"),
        )
        .arg(Arg::with_name("username").long("username").takes_value(true))
        .arg(Arg::with_name("password").long("password").takes_value(true))
        .arg(Arg::with_name("will-topic").long("will-topic").takes_value(true))
        .arg(Arg::with_name("will-message").long("will-message").takes_value(true).default_value(""))
        .arg(
            Arg::with_name("will-qos")
                .long("will-qos")
                .takes_value(true)
                .default_value("0")
                .possible_values(&["0", "1", "2"]),
        )
        .arg(Arg::with_name("will-retain").long("will-retain"))
}

pub fn host_port(matches: &ArgMatches) -> Result<(String, u16), Error> {
    let host = matches.value_of("host").unwrap_or("127.0.0.1").to_string();
    let port = matches
        .value_of("port")
        .unwrap_or("1883")
        .parse::<u16>()
        .map_err(|_| Error::new(ErrorKind::ParameterError, "--port must be a 16-bit integer"))?;
    Ok((host, port))
}

pub fn parse_qos(raw: &str) -> Result<QoS, Error> {
    match raw {
        "0" => Ok(QoS::AtMostOnce),
        "1" => Ok(QoS::AtLeastOnce),
        "2" => Ok(QoS::ExactlyOnce),
        other => Err(Error::new(ErrorKind::ParameterError, format!("invalid qos `{other}`, expected 0, 1 or 2"))),
    }
}

pub fn qos_from_u8(raw: u8) -> Result<QoS, Error> {
    QoS::try_from(raw).map_err(|_| Error::new(ErrorKind::ParameterError, format!("invalid qos `{raw}`, expected 0, 1 or 2")))
}

fn random_client_id(prefix: &str) -> String {
    format!("{prefix}-{:08x}", rand::random::<u32>())
}

/// Build [`ClientOptions`] from the flags [`apply`] registered.
///
/// # Errors
///
/// Returns an error if `--keep-alive`, `--will-qos` or the generated
/// defaults cannot be parsed.
pub fn client_options(matches: &ArgMatches, default_prefix: &str) -> Result<ClientOptions, Error> {
    let client_id = matches
        .value_of("client-id")
        .map(str::to_string)
        .unwrap_or_else(|| random_client_id(default_prefix));
    let keep_alive = matches
        .value_of("keep-alive")
        .unwrap_or("60")
        .parse::<u16>()
        .map_err(|_| Error::new(ErrorKind::ParameterError, "--keep-alive must be a 16-bit integer"))?;

    let mut options = ClientOptions::new(client_id, keep_alive);
    options.clean_session = !matches.is_present("retain-session");
    options.username = matches.value_of("username").map(str::to_string);
    options.password = matches.value_of("password").map(|p| p.as_bytes().to_vec());

    if let Some(topic) = matches.value_of("will-topic") {
        let message = matches.value_of("will-message").unwrap_or_default().as_bytes().to_vec();
        let qos = parse_qos(matches.value_of("will-qos").unwrap_or("0"))?;
        options.will = Some(LastWill { topic: topic.to_string(), message, qos, retain: matches.is_present("will-retain") });
    }

    Ok(options)
}
