// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The broker role binary (spec §6): accepts TCP connections, decodes MQTT
//! packets off each one, and dispatches them into one shared
//! [`mqttsuite_core::Broker`] instance behind a mutex — the actor-per-task
//! wiring `hebo::server::run_server` spreads across its `Dispatcher`, here
//! collapsed onto a single lock since [`Broker`] itself already does the
//! bookkeeping hebo spreads across dispatcher/listener/session actors.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use clap::{App, Arg};
use codec::{
    ConnectAckPacket, DisconnectPacket, Packet, PingResponsePacket, PublishAckPacket,
    PublishCompletePacket, PublishReceivedPacket, QoS, SubscribeAckPacket, UnsubscribeAckPacket,
};
use log::LevelFilter;
use mqttsuite_core::{
    Broker, ConnectOutcome, Inbound, OutboundHandle, Role, SessionGid, SessionStore,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};

const LISTENER_ID: u32 = 0;
const INBOUND_CHANNEL: usize = 64;

#[tokio::main]
async fn main() {
    let matches = App::new("mqttsuite-broker")
        .about("MQTT 3.1.1 broker")
        .arg(Arg::with_name("bind").long("bind").takes_value(true).default_value("0.0.0.0:1883"))
        .arg(Arg::with_name("session-store").long("mqtt-session-store").alias("session-store").takes_value(true).help(
            "Path to the session store file; omit for an in-memory store",
        ))
        .arg(Arg::with_name("max-retained").long("max-retained").takes_value(true))
        .arg(Arg::with_name("log-file").long("log-file").takes_value(true))
        .get_matches();

    if let Err(err) = run(&matches).await {
        eprintln!("mqttsuite-broker: {err}");
        std::process::exit(1);
    }
}

async fn run(matches: &clap::ArgMatches<'_>) -> Result<(), mqttsuite_cli::Error> {
    mqttsuite_cli::logging::init(LevelFilter::Info, matches.value_of("log-file").map(std::path::Path::new))?;

    let store = match matches.value_of("session-store") {
        Some(path) => SessionStore::open(Some(PathBuf::from(path))),
        None => SessionStore::in_memory(),
    };
    let mut broker = Broker::new(store);
    if let Some(raw) = matches.value_of("max-retained") {
        let max: usize = raw
            .parse()
            .map_err(|_| mqttsuite_cli::Error::new(mqttsuite_cli::ErrorKind::ParameterError, "--max-retained must be an integer"))?;
        broker = broker.with_max_retained(max);
    }
    let broker = Arc::new(Mutex::new(broker));

    let bind = matches.value_of("bind").unwrap_or("0.0.0.0:1883");
    let listener = TcpListener::bind(bind).await?;
    log::info!("mqttsuite-broker listening on {bind}");

    let next_session_id = AtomicU64::new(1);
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                log::warn!("accept failed: {err}");
                continue;
            }
        };
        let gid = SessionGid::new(LISTENER_ID, next_session_id.fetch_add(1, Ordering::Relaxed));
        let broker = Arc::clone(&broker);
        tokio::spawn(async move {
            if let Err(err) = serve_connection(stream, gid, broker).await {
                log::warn!("connection from {peer} ended: {err}");
            }
        });
    }
}

async fn serve_connection(
    stream: TcpStream,
    gid: SessionGid,
    broker: Arc<Mutex<Broker<OutboundHandle>>>,
) -> Result<(), mqttsuite_cli::Error> {
    let (inbound_tx, mut inbound_rx) = mpsc::channel(INBOUND_CHANNEL);
    let (conn, outbound) = mqttsuite_core::Connection::new(stream, Role::Server, 0, inbound_tx);
    tokio::spawn(conn.run());

    let mut client_id = String::new();
    let mut evict_rx: Option<oneshot::Receiver<()>> = None;

    loop {
        let evicted = async {
            match evict_rx.as_mut() {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            received = inbound_rx.recv() => match received {
                Some(Inbound::Packet(packet)) => {
                    handle_packet(packet, gid, &mut client_id, &outbound, &broker, &mut evict_rx).await?;
                }
                Some(Inbound::Closed { graceful }) => {
                    if !client_id.is_empty() {
                        broker.lock().await.disconnect(&client_id, !graceful);
                    }
                    return Ok(());
                }
                None => return Ok(()),
            },
            () = evicted => {
                if !client_id.is_empty() {
                    let mut guard = broker.lock().await;
                    // `attach` already replaced the live entry (and published
                    // our will) atomically before firing this channel; only
                    // disconnect if, against that, it's still ours to avoid
                    // tearing down the connection that evicted us.
                    if guard.session_gid(&client_id) == Some(gid) {
                        guard.disconnect(&client_id, true);
                    }
                }
                let _ = outbound.send(Packet::Disconnect(DisconnectPacket::new()));
                return Ok(());
            }
        }
    }
}

async fn handle_packet(
    packet: Packet,
    gid: SessionGid,
    client_id: &mut String,
    outbound: &OutboundHandle,
    broker: &Arc<Mutex<Broker<OutboundHandle>>>,
    evict_rx: &mut Option<oneshot::Receiver<()>>,
) -> Result<(), mqttsuite_cli::Error> {
    match packet {
        Packet::Connect(connect) => {
            let mut guard = broker.lock().await;
            let (outcome, session_present) = guard.connect(&connect);
            outbound.send(Packet::ConnectAck(ConnectAckPacket { session_present, return_code: outcome.into() }))?;
            if outcome == ConnectOutcome::Accepted {
                let (tx, rx) = oneshot::channel();
                guard.attach(gid, &connect, outbound.clone(), tx);
                *client_id = connect.client_id;
                *evict_rx = Some(rx);
            }
        }
        Packet::Publish(publish) => {
            let packet_id = publish.packet_id;
            let qos = publish.qos;
            broker.lock().await.publish(Some(client_id.as_str()), &publish)?;
            match qos {
                QoS::AtLeastOnce => {
                    let packet_id = packet_id
                        .ok_or_else(|| mqttsuite_cli::Error::new(mqttsuite_cli::ErrorKind::IoError, "QoS 1 PUBLISH missing packet id"))?;
                    outbound.send(Packet::PublishAck(PublishAckPacket::new(packet_id)))?;
                }
                QoS::ExactlyOnce => {
                    let packet_id = packet_id
                        .ok_or_else(|| mqttsuite_cli::Error::new(mqttsuite_cli::ErrorKind::IoError, "QoS 2 PUBLISH missing packet id"))?;
                    broker.lock().await.stage_inbound_qos2(
                        client_id,
                        packet_id,
                        mqttsuite_core::PendingPublish {
                            topic: publish.topic,
                            payload: publish.payload,
                            qos: publish.qos,
                            retain: publish.retain,
                        },
                    );
                    outbound.send(Packet::PublishReceived(PublishReceivedPacket::new(packet_id)))?;
                }
                QoS::AtMostOnce => {}
            }
        }
        Packet::PublishAck(ack) => broker.lock().await.handle_puback(client_id, &ack),
        Packet::PublishReceived(ack) => broker.lock().await.handle_pubrec(client_id, &ack),
        Packet::PublishRelease(release) => {
            broker.lock().await.release_inbound_qos2(client_id, release.packet_id)?;
            outbound.send(Packet::PublishComplete(PublishCompletePacket::new(release.packet_id)))?;
        }
        Packet::PublishComplete(ack) => broker.lock().await.handle_pubcomp(client_id, &ack),
        Packet::Subscribe(subscribe) => {
            let packet_id = subscribe.packet_id;
            let acks = broker.lock().await.subscribe(client_id, subscribe.topics);
            outbound.send(Packet::SubscribeAck(SubscribeAckPacket { packet_id, acks }))?;
        }
        Packet::Unsubscribe(unsubscribe) => {
            let packet_id = unsubscribe.packet_id;
            broker.lock().await.unsubscribe(client_id, &unsubscribe.filters);
            outbound.send(Packet::UnsubscribeAck(UnsubscribeAckPacket { packet_id }))?;
        }
        Packet::PingRequest(_) => outbound.send(Packet::PingResponse(PingResponsePacket::new()))?,
        Packet::Disconnect(_) => {}
        Packet::ConnectAck(_) | Packet::SubscribeAck(_) | Packet::UnsubscribeAck(_) | Packet::PingResponse(_) => {
            return Err(mqttsuite_cli::Error::new(mqttsuite_cli::ErrorKind::IoError, "client sent a server-only packet"));
        }
    }
    Ok(())
}
