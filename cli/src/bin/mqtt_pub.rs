// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Publish a single message and disconnect (spec §6's `mqtt-pub`).

use clap::{App, Arg};
use log::LevelFilter;
use mqttsuite_cli::{session_args, transport};

#[tokio::main]
async fn main() {
    let matches = session_args::apply(
        App::new("mqtt-pub")
            .about("Publish one message to an MQTT broker and exit")
            .arg(Arg::with_name("topic").long("topic").takes_value(true).required(true))
            .arg(Arg::with_name("message").long("message").takes_value(true).required(true))
            .arg(Arg::with_name("qos").long("qos").takes_value(true).default_value("0").possible_values(&["0", "1", "2"]))
            .arg(Arg::with_name("retain").long("retain").help("Set the RETAIN flag on the published message")),
    )
    .get_matches();

    if let Err(err) = run(&matches).await {
        eprintln!("mqtt-pub: {err}");
        std::process::exit(1);
    }
}

async fn run(matches: &clap::ArgMatches<'_>) -> Result<(), mqttsuite_cli::Error> {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let (host, port) = session_args::host_port(matches)?;
    let options = session_args::client_options(matches, "mqtt-pub")?;
    let topic = matches.value_of("topic").expect("required");
    let message = matches.value_of("message").expect("required");
    let qos = session_args::parse_qos(matches.value_of("qos").unwrap_or("0"))?;
    let retain = matches.is_present("retain");

    let (mut client, mut inbound) = transport::connect(&host, port, options).await?;
    transport::await_connack(&mut client, &mut inbound).await?;
    log::info!("connected to {host}:{port}, publishing to {topic}");

    client.publish(topic, qos, message.as_bytes(), retain)?;

    if qos != codec::QoS::AtMostOnce {
        // Wait for the broker's PUBACK/PUBCOMP before disconnecting, so a
        // QoS 1/2 publish isn't lost to a race with the DISCONNECT.
        while let Some(mqttsuite_core::Inbound::Packet(packet)) = inbound.recv().await {
            if client.handle_inbound(packet)?.is_some() {
                break;
            }
        }
    }

    client.disconnect()?;
    Ok(())
}
