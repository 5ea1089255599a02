// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The bridge role binary (spec §4.7): one MQTT client connection per
//! configured broker endpoint, fanned into a [`Bridge`] per bridge identity
//! so a publish received on one endpoint is forwarded to every other
//! endpoint sharing that identity, excluding its origin.
//!
//! [`mqttsuite_bridge::store::BrokerDescriptor`] (spec C7's config shape)
//! carries `instance_name`/`protocol`/`encryption`/`transport` but no host
//! or port; this binary resolves addresses out of band via repeatable
//! `--broker-addr instance_name=host:port` flags, defaulting to
//! `127.0.0.1:1883` for any instance left unspecified.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use clap::{App, Arg};
use codec::{LastWill, PublishPacket, SubscribeTopic, TopicFilter};
use log::LevelFilter;
use mqttsuite_bridge::{Bridge, BridgeConnection, BridgeStore, BrokerDescriptor, ConnectionId};
use mqttsuite_cli::{session_args, transport};
use mqttsuite_core::{ClientEvent, ClientOptions, Inbound};
use tokio::sync::Mutex;

const DEFAULT_ADDR: (&str, u16) = ("127.0.0.1", 1883);

#[tokio::main]
async fn main() {
    let matches = App::new("mqttsuite-bridge")
        .about("Forward publishes between independently configured broker endpoints")
        .arg(
            Arg::with_name("bridge-config")
                .long("bridge-config")
                .alias("definition")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("broker-addr")
                .long("broker-addr")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .help("instance_name=host:port, may be repeated"),
        )
        .arg(Arg::with_name("log-file").long("log-file").takes_value(true))
        .get_matches();

    if let Err(err) = run(&matches).await {
        eprintln!("mqttsuite-bridge: {err}");
        std::process::exit(1);
    }
}

async fn run(matches: &clap::ArgMatches<'_>) -> Result<(), mqttsuite_cli::Error> {
    mqttsuite_cli::logging::init(LevelFilter::Info, matches.value_of("log-file").map(std::path::Path::new))?;

    let config_path = matches.value_of("bridge-config").expect("required");
    let raw = fs::read_to_string(config_path)?;
    let store = Arc::new(BridgeStore::load_and_validate(&raw)?);
    let addrs = parse_broker_addrs(matches)?;

    let mut bridges: HashMap<String, Arc<Mutex<Bridge<mqttsuite_core::OutboundHandle>>>> = HashMap::new();
    for descriptor in store.brokers() {
        let identity = store.bridge_identity(&descriptor.instance_name).unwrap_or(&descriptor.instance_name).to_string();
        bridges.entry(identity.clone()).or_insert_with(|| Arc::new(Mutex::new(Bridge::new(identity))));
    }

    let mut tasks = Vec::new();
    for (id, descriptor) in store.brokers().cloned().enumerate() {
        let identity = store.bridge_identity(&descriptor.instance_name).unwrap_or(&descriptor.instance_name).to_string();
        let bridge = Arc::clone(&bridges[&identity]);
        let connection = store.connection(&identity).cloned();
        let addr = addrs.get(&descriptor.instance_name).cloned().unwrap_or_else(|| (DEFAULT_ADDR.0.to_string(), DEFAULT_ADDR.1));
        tasks.push(tokio::spawn(async move {
            if let Err(err) = run_endpoint(id, descriptor, connection, addr, bridge).await {
                log::warn!("bridge endpoint ended: {err}");
            }
        }));
    }

    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

fn parse_broker_addrs(matches: &clap::ArgMatches<'_>) -> Result<HashMap<String, (String, u16)>, mqttsuite_cli::Error> {
    let mut out = HashMap::new();
    for raw in matches.values_of("broker-addr").into_iter().flatten() {
        let (instance, addr) = raw.split_once('=').ok_or_else(|| {
            mqttsuite_cli::Error::new(mqttsuite_cli::ErrorKind::ParameterError, format!("--broker-addr `{raw}` must be instance_name=host:port"))
        })?;
        let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
            mqttsuite_cli::Error::new(mqttsuite_cli::ErrorKind::ParameterError, format!("--broker-addr `{raw}` must be instance_name=host:port"))
        })?;
        let port: u16 = port
            .parse()
            .map_err(|_| mqttsuite_cli::Error::new(mqttsuite_cli::ErrorKind::ParameterError, format!("invalid port in --broker-addr `{raw}`")))?;
        out.insert(instance.to_string(), (host.to_string(), port));
    }
    Ok(out)
}

async fn run_endpoint(
    id: ConnectionId,
    descriptor: BrokerDescriptor,
    connection: Option<BridgeConnection>,
    addr: (String, u16),
    bridge: Arc<Mutex<Bridge<mqttsuite_core::OutboundHandle>>>,
) -> Result<(), mqttsuite_cli::Error> {
    let connection = connection.ok_or_else(|| {
        mqttsuite_cli::Error::new(mqttsuite_cli::ErrorKind::ConfigError, format!("no connection section for broker `{}`", descriptor.instance_name))
    })?;

    let mut options = ClientOptions::new(format!("{}-{}", connection.client_id, descriptor.instance_name), connection.keep_alive);
    options.clean_session = connection.clean_session;
    options.username = connection.username.clone();
    options.password = connection.password.clone().map(String::into_bytes);
    if let Some(topic) = &connection.will_topic {
        options.will = Some(LastWill {
            topic: topic.clone(),
            message: connection.will_message.clone().unwrap_or_default().into_bytes(),
            qos: session_args::qos_from_u8(connection.will_qos)?,
            retain: connection.will_retain,
        });
    }

    let (mut client, outbound, mut inbound) = transport::connect_with_outbound(&addr.0, addr.1, options).await?;
    transport::await_connack(&mut client, &mut inbound).await?;
    bridge.lock().await.attach(id, outbound);

    let topics = descriptor
        .topics
        .iter()
        .map(|topic| {
            let filter = TopicFilter::parse(&topic.topic).map_err(|_| {
                mqttsuite_cli::Error::new(mqttsuite_cli::ErrorKind::ParameterError, format!("invalid bridge topic `{}`", topic.topic))
            })?;
            Ok(SubscribeTopic { filter, qos: session_args::qos_from_u8(topic.qos)? })
        })
        .collect::<Result<Vec<_>, mqttsuite_cli::Error>>()?;
    if !topics.is_empty() {
        client.subscribe(topics)?;
    }
    log::info!("bridge endpoint `{}` connected to {}:{}", descriptor.instance_name, addr.0, addr.1);

    let result = loop {
        match inbound.recv().await {
            Some(Inbound::Packet(packet)) => match client.handle_inbound(packet) {
                Ok(Some(ClientEvent::Message { topic, payload, qos, retain })) => {
                    let mut publish = match PublishPacket::new(&topic, qos, &payload) {
                        Ok(publish) => publish,
                        Err(err) => {
                            log::warn!("dropping bridged message with unencodable topic `{topic}`: {err}");
                            continue;
                        }
                    };
                    publish.retain = retain;
                    if let Err(err) = bridge.lock().await.publish(id, &publish) {
                        log::warn!("forwarding to bridge `{}` failed: {err}", descriptor.instance_name);
                    }
                }
                Ok(_) => {}
                Err(err) => break Err(err.into()),
            },
            Some(Inbound::Closed { .. }) | None => break Ok(()),
        }
    };

    bridge.lock().await.detach(id);
    result
}
