// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The integrator role binary (spec §6, data flow C5 → C1 → C6 → C5 and
//! optionally → C10): subscribes to a remote broker, rewrites every message
//! through a mapping document, republishes the result, and optionally
//! inserts it into Postgres.

use std::collections::HashMap;
use std::fs;

use clap::{App, Arg};
use codec::{SubscribeTopic, TopicFilter};
use log::LevelFilter;
use mqttsuite_cli::{session_args, transport};
use mqttsuite_core::{ClientEvent, Inbound};
use mqttsuite_mapping::{Engine, MappingDocument};
use mqttsuite_pgsink::{PgParam, PgPool, PgSinkConfig};

#[tokio::main]
async fn main() {
    let matches = session_args::apply(
        App::new("mqttsuite-integrator")
            .about("Subscribe, rewrite through a mapping document, republish")
            .arg(
                Arg::with_name("mapping-file")
                    .long("mqtt-mapping-file")
                    .alias("mapping-file")
                    .takes_value(true)
                    .required(true),
            )
            .arg(Arg::with_name("pg-config").long("pg-config").takes_value(true).help(
                "Optional TOML PgSinkConfig; when given, every rewrite is also inserted into a \
                 `mqtt_messages(topic, payload)` table",
            ))
            .arg(Arg::with_name("log-file").long("log-file").takes_value(true)),
    )
    .get_matches();

    if let Err(err) = run(&matches).await {
        eprintln!("mqttsuite-integrator: {err}");
        std::process::exit(1);
    }
}

async fn run(matches: &clap::ArgMatches<'_>) -> Result<(), mqttsuite_cli::Error> {
    mqttsuite_cli::logging::init(LevelFilter::Info, matches.value_of("log-file").map(std::path::Path::new))?;

    let mapping_path = matches.value_of("mapping-file").expect("required");
    let raw = fs::read_to_string(mapping_path)?;
    let document = mqttsuite_mapping::parse_document(&raw).unwrap_or_else(|err| {
        log::warn!("mapping document `{mapping_path}` failed validation, falling back to an empty mapping: {err}");
        MappingDocument { plugins: Vec::new(), topic_level: None }
    });
    let engine = Engine::new(document, &HashMap::new())?;

    let pg_pool = match matches.value_of("pg-config") {
        Some(path) => {
            let raw = fs::read_to_string(path)?;
            let config: PgSinkConfig = toml::from_str(&raw)
                .map_err(|err| mqttsuite_cli::Error::new(mqttsuite_cli::ErrorKind::ConfigError, err.to_string()))?;
            Some(PgPool::new(config))
        }
        None => None,
    };

    let (host, port) = session_args::host_port(matches)?;
    let options = session_args::client_options(matches, "mqttsuite-integrator")?;
    let (mut client, mut inbound) = transport::connect(&host, port, options).await?;
    transport::await_connack(&mut client, &mut inbound).await?;

    let subscriptions = engine.subscriptions();
    let topics = subscriptions
        .iter()
        .map(|sub| {
            let filter = TopicFilter::parse(&sub.filter).map_err(|_| {
                mqttsuite_cli::Error::new(mqttsuite_cli::ErrorKind::ParameterError, format!("invalid subscription filter `{}`", sub.filter))
            })?;
            Ok(SubscribeTopic { filter, qos: session_args::qos_from_u8(sub.qos)? })
        })
        .collect::<Result<Vec<_>, mqttsuite_cli::Error>>()?;
    if !topics.is_empty() {
        client.subscribe(topics)?;
    }
    log::info!("connected to {host}:{port}, {} mapping subscription(s) active", subscriptions.len());

    while let Some(event) = inbound.recv().await {
        match event {
            Inbound::Packet(packet) => {
                if let Some(ClientEvent::Message { topic, payload, qos, .. }) = client.handle_inbound(packet)? {
                    for rewrite in engine.process(&topic, &payload, qos as u8) {
                        let rewrite_qos = session_args::qos_from_u8(rewrite.qos)?;
                        client.publish(&rewrite.topic, rewrite_qos, &rewrite.payload, rewrite.retain)?;
                        if let Some(pool) = &pg_pool {
                            let params = vec![
                                PgParam::Text(rewrite.topic.clone()),
                                PgParam::Text(String::from_utf8_lossy(&rewrite.payload).into_owned()),
                            ];
                            if let Err(err) =
                                pool.exec("INSERT INTO mqtt_messages (topic, payload) VALUES ($1, $2)", params).await
                            {
                                log::warn!("postgres insert failed: {err}");
                            }
                        }
                    }
                }
            }
            Inbound::Closed { graceful } => {
                log::info!("connection closed (graceful={graceful})");
                break;
            }
        }
    }

    Ok(())
}
