// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Subscribe to one or more topic filters and print incoming messages
//! (spec §6's `mqtt-sub`).

use clap::{App, Arg};
use codec::{SubscribeTopic, TopicFilter};
use log::LevelFilter;
use mqttsuite_cli::{session_args, transport};
use mqttsuite_core::{ClientEvent, Inbound};

#[tokio::main]
async fn main() {
    let matches = session_args::apply(
        App::new("mqtt-sub")
            .about("Subscribe to MQTT topics and print received messages")
            .arg(
                Arg::with_name("topic")
                    .long("topic")
                    .takes_value(true)
                    .multiple(true)
                    .number_of_values(1)
                    .required(true)
                    .help("Topic filter, may be repeated"),
            )
            .arg(Arg::with_name("qos").long("qos").takes_value(true).default_value("0").possible_values(&["0", "1", "2"])),
    )
    .get_matches();

    if let Err(err) = run(&matches).await {
        eprintln!("mqtt-sub: {err}");
        std::process::exit(1);
    }
}

async fn run(matches: &clap::ArgMatches<'_>) -> Result<(), mqttsuite_cli::Error> {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let (host, port) = session_args::host_port(matches)?;
    let options = session_args::client_options(matches, "mqtt-sub")?;
    let qos = session_args::parse_qos(matches.value_of("qos").unwrap_or("0"))?;
    let topics = matches
        .values_of("topic")
        .expect("required")
        .map(|topic| {
            TopicFilter::parse(topic)
                .map(|filter| SubscribeTopic { filter, qos })
                .map_err(|_| mqttsuite_cli::Error::new(mqttsuite_cli::ErrorKind::ParameterError, format!("invalid topic filter `{topic}`")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let (mut client, mut inbound) = transport::connect(&host, port, options).await?;
    transport::await_connack(&mut client, &mut inbound).await?;
    client.subscribe(topics)?;
    log::info!("connected to {host}:{port}, waiting for messages");

    while let Some(event) = inbound.recv().await {
        match event {
            Inbound::Packet(packet) => match client.handle_inbound(packet)? {
                Some(ClientEvent::Message { topic, payload, qos, retain }) => {
                    println!("{topic} (qos={}, retain={retain}) {}", qos as u8, String::from_utf8_lossy(&payload));
                }
                Some(ClientEvent::Subscribed { acks, .. }) => {
                    log::info!("subscribed: {acks:?}");
                }
                _ => {}
            },
            Inbound::Closed { graceful } => {
                log::info!("connection closed (graceful={graceful})");
                break;
            }
        }
    }

    Ok(())
}
