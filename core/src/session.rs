// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Per-client session state (spec C2) and its on-disk persistence format
//! (spec §6): magic `MQSS\0` + version byte + length-prefixed records.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use codec::{PacketId, QoS, TopicFilter, TopicName};

use crate::error::{Error, ErrorKind};

const MAGIC: &[u8; 5] = b"MQSS\0";
const FORMAT_VERSION: u8 = 1;

/// A message the broker owes a client but has not finished delivering.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPublish {
    pub topic: TopicName,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Stage of the outbound (server-to-subscriber) QoS 1/2 handshake, per spec §4.4.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum OutboundStage {
    /// QoS 1: PUBLISH sent, awaiting PUBACK.
    AwaitingPubAck,
    /// QoS 2: PUBLISH sent, awaiting PUBREC.
    AwaitingPubRec,
    /// QoS 2: PUBREL sent, awaiting PUBCOMP.
    AwaitingPubComp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundInflight {
    pub message: PendingPublish,
    pub stage: OutboundStage,
    pub dup: bool,
}

/// An inbound (publisher-to-broker) QoS 2 message stored under its packet id
/// until PUBREL arrives, per spec §4.4: "store message under packet-id,
/// expect PUBREL, then forward to subscribers exactly once."
#[derive(Debug, Clone, PartialEq)]
pub struct InboundInflight {
    pub message: PendingPublish,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SubscriptionKey(pub String);

/// Persistent per-client state, resumed across reconnects when `clean_session`
/// is false (spec §3 Session lifecycle).
#[derive(Debug, Clone)]
pub struct Session {
    pub client_id: String,
    pub clean_session: bool,
    pub subscriptions: HashMap<String, (TopicFilter, QoS)>,
    pub outbound_inflight: HashMap<PacketId, OutboundInflight>,
    pub inbound_inflight: HashMap<PacketId, InboundInflight>,
    pub pending: VecDeque<PendingPublish>,
    pub will: Option<PendingPublish>,
    next_packet_id: PacketId,
}

impl Session {
    #[must_use]
    pub fn new(client_id: String, clean_session: bool) -> Self {
        Self {
            client_id,
            clean_session,
            subscriptions: HashMap::new(),
            outbound_inflight: HashMap::new(),
            inbound_inflight: HashMap::new(),
            pending: VecDeque::new(),
            will: None,
            next_packet_id: 1,
        }
    }

    /// Allocate the next outbound packet identifier, skipping 0 and wrapping
    /// past `u16::MAX` (spec §7: packet-id space exhaustion is a resource
    /// error the caller must police separately).
    pub fn next_packet_id(&mut self) -> PacketId {
        let id = self.next_packet_id;
        self.next_packet_id = if id == PacketId::MAX { 1 } else { id + 1 };
        id
    }

    #[must_use]
    pub fn has_dirty_state(&self) -> bool {
        !self.clean_session
    }
}

/// `open`/`persist`/`purge`/`enumerate` over a single session-store file
/// (spec C2). Writes are atomic: `path.tmp` is written, fsynced, then
/// renamed over `path`, so a reader/process-crash never observes a partial
/// file.
pub struct SessionStore {
    path: Option<PathBuf>,
    sessions: HashMap<String, Session>,
}

impl SessionStore {
    /// Open (or create) a session store backed by `path`. A truncated or
    /// corrupt file is logged and treated as an empty store (spec C2).
    #[must_use]
    pub fn open(path: Option<PathBuf>) -> Self {
        let mut sessions = HashMap::new();
        if let Some(path) = &path {
            match Self::load(path) {
                Ok(loaded) => sessions = loaded,
                Err(err) => {
                    log::warn!("session-store: discarding unreadable file {path:?}: {err}");
                }
            }
        }
        Self { path, sessions }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            sessions: HashMap::new(),
        }
    }

    /// Resume the session for `client_id` when `clean=false` and a prior
    /// entry exists, otherwise create a fresh one (spec C2/§3).
    ///
    /// Returns `(session, session_present)`.
    /// Whether a parked (non-clean, currently disconnected) session exists
    /// for `client_id`, without consuming it. Lets a caller compute the
    /// CONNACK session-present bit before actually taking ownership via
    /// [`SessionStore::open_session`].
    #[must_use]
    pub fn has_session(&self, client_id: &str) -> bool {
        self.sessions.contains_key(client_id)
    }

    pub fn open_session(&mut self, client_id: &str, clean: bool) -> (Session, bool) {
        if clean {
            self.sessions.remove(client_id);
            return (Session::new(client_id.to_string(), true), false);
        }
        match self.sessions.remove(client_id) {
            Some(session) => (session, true),
            None => (Session::new(client_id.to_string(), false), false),
        }
    }

    /// Persist `session`'s current state. A no-op when the store has no
    /// backing file (spec §5: single-writer, in-memory only).
    ///
    /// # Errors
    ///
    /// Returns an error if the atomic write/rename fails.
    pub fn persist(&mut self, session: Session) -> Result<(), Error> {
        let client_id = session.client_id.clone();
        let clean_session = session.clean_session;
        self.sessions.insert(client_id, session);
        if let Some(path) = self.path.clone() {
            if !clean_session {
                self.flush(&path)?;
            }
        }
        Ok(())
    }

    pub fn purge(&mut self, client_id: &str) {
        self.sessions.remove(client_id);
    }

    pub fn enumerate(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Append a message to an offline client's pending queue, for delivery
    /// on its next CONNECT. Returns `false` if `client_id` has no parked
    /// session (never connected, or connected with `clean_session`).
    ///
    /// # Errors
    ///
    /// Returns an error if the store is backed by a file and the flush
    /// fails.
    pub fn push_pending(&mut self, client_id: &str, message: PendingPublish) -> Result<bool, Error> {
        let Some(session) = self.sessions.get_mut(client_id) else {
            return Ok(false);
        };
        session.pending.push_back(message);
        if let Some(path) = self.path.clone() {
            self.flush(&path)?;
        }
        Ok(true)
    }

    fn flush(&self, path: &Path) -> Result<(), Error> {
        let tmp_path = path.with_extension("tmp");
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.push(FORMAT_VERSION);
        write_u32(&mut buf, self.sessions.len() as u32);
        for session in self.sessions.values() {
            if !session.clean_session {
                encode_session(&mut buf, session);
            }
        }

        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn load(path: &Path) -> Result<HashMap<String, Session>, Error> {
        let mut file = match fs::File::open(path) {
            Ok(f) => f,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(err) => return Err(err.into()),
        };
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        decode_store(&buf).map_err(|msg| Error::new(ErrorKind::StorageError, msg))
    }
}

fn write_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    write_u16(buf, s.len() as u16);
    buf.extend_from_slice(s.as_bytes());
}

fn write_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    write_u32(buf, data.len() as u32);
    buf.extend_from_slice(data);
}

fn write_message(buf: &mut Vec<u8>, msg: &PendingPublish) {
    write_str(buf, msg.topic.as_str());
    write_bytes(buf, &msg.payload);
    buf.push(msg.qos as u8);
    buf.push(u8::from(msg.retain));
}

fn encode_session(buf: &mut Vec<u8>, session: &Session) {
    write_str(buf, &session.client_id);

    write_u16(buf, session.subscriptions.len() as u16);
    for (filter, qos) in session.subscriptions.values() {
        write_str(buf, filter.as_str());
        buf.push(*qos as u8);
    }

    write_u16(buf, session.outbound_inflight.len() as u16);
    for (id, inflight) in &session.outbound_inflight {
        write_u16(buf, *id);
        write_message(buf, &inflight.message);
        buf.push(match inflight.stage {
            OutboundStage::AwaitingPubAck => 0,
            OutboundStage::AwaitingPubRec => 1,
            OutboundStage::AwaitingPubComp => 2,
        });
        buf.push(u8::from(inflight.dup));
    }

    write_u16(buf, session.inbound_inflight.len() as u16);
    for (id, inflight) in &session.inbound_inflight {
        write_u16(buf, *id);
        write_message(buf, &inflight.message);
    }

    write_u16(buf, session.pending.len() as u16);
    for msg in &session.pending {
        write_message(buf, msg);
    }
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> Result<u8, String> {
        let b = *self.data.get(self.offset).ok_or("truncated")?;
        self.offset += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16, String> {
        let bytes = self
            .data
            .get(self.offset..self.offset + 2)
            .ok_or("truncated")?;
        self.offset += 2;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, String> {
        let bytes = self
            .data
            .get(self.offset..self.offset + 4)
            .ok_or("truncated")?;
        self.offset += 4;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn string(&mut self) -> Result<String, String> {
        let len = self.u16()? as usize;
        let bytes = self
            .data
            .get(self.offset..self.offset + len)
            .ok_or("truncated")?;
        self.offset += len;
        String::from_utf8(bytes.to_vec()).map_err(|_| "invalid utf8".to_string())
    }

    fn bytes(&mut self) -> Result<Vec<u8>, String> {
        let len = self.u32()? as usize;
        let bytes = self
            .data
            .get(self.offset..self.offset + len)
            .ok_or("truncated")?;
        self.offset += len;
        Ok(bytes.to_vec())
    }

    fn qos(&mut self) -> Result<QoS, String> {
        match self.u8()? {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err("invalid qos".to_string()),
        }
    }

    fn message(&mut self) -> Result<PendingPublish, String> {
        let topic = TopicName::parse(&self.string()?).map_err(|_| "invalid topic".to_string())?;
        let payload = self.bytes()?;
        let qos = self.qos()?;
        let retain = self.u8()? != 0;
        Ok(PendingPublish {
            topic,
            payload,
            qos,
            retain,
        })
    }
}

fn decode_store(buf: &[u8]) -> Result<HashMap<String, Session>, String> {
    if buf.len() < MAGIC.len() + 1 || &buf[..MAGIC.len()] != MAGIC {
        return Err("bad magic".to_string());
    }
    let version = buf[MAGIC.len()];
    if version != FORMAT_VERSION {
        return Err(format!("unsupported version {version}"));
    }

    let mut r = Reader {
        data: buf,
        offset: MAGIC.len() + 1,
    };
    let count = r.u32()?;
    let mut sessions = HashMap::new();
    for _ in 0..count {
        let session = decode_session(&mut r)?;
        sessions.insert(session.client_id.clone(), session);
    }
    Ok(sessions)
}

fn decode_session(r: &mut Reader) -> Result<Session, String> {
    let client_id = r.string()?;
    let mut session = Session::new(client_id, false);

    let sub_count = r.u16()?;
    for _ in 0..sub_count {
        let filter_str = r.string()?;
        let qos = r.qos()?;
        let filter = TopicFilter::parse(&filter_str).map_err(|_| "invalid filter".to_string())?;
        session.subscriptions.insert(filter_str, (filter, qos));
    }

    let out_count = r.u16()?;
    for _ in 0..out_count {
        let id = r.u16()?;
        let message = r.message()?;
        let stage = match r.u8()? {
            0 => OutboundStage::AwaitingPubAck,
            1 => OutboundStage::AwaitingPubRec,
            2 => OutboundStage::AwaitingPubComp,
            _ => return Err("invalid outbound stage".to_string()),
        };
        let dup = r.u8()? != 0;
        session
            .outbound_inflight
            .insert(id, OutboundInflight { message, stage, dup });
    }

    let in_count = r.u16()?;
    for _ in 0..in_count {
        let id = r.u16()?;
        let message = r.message()?;
        session
            .inbound_inflight
            .insert(id, InboundInflight { message });
    }

    let pending_count = r.u16()?;
    for _ in 0..pending_count {
        session.pending.push_back(r.message()?);
    }

    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env::temp_dir;

    fn topic(s: &str) -> TopicName {
        TopicName::parse(s).unwrap()
    }

    #[test]
    fn resumes_a_non_clean_session_with_its_state() {
        let dir = temp_dir().join(format!("mqttsuite-session-store-test-{}", rand::random::<u64>()));
        let path = dir.join("sessions.bin");
        fs::create_dir_all(&dir).unwrap();

        let mut store = SessionStore::open(Some(path.clone()));
        let (mut session, present) = store.open_session("client-1", false);
        assert!(!present);
        session.subscriptions.insert(
            "a/+".to_string(),
            (TopicFilter::parse("a/+").unwrap(), QoS::AtLeastOnce),
        );
        session.pending.push_back(PendingPublish {
            topic: topic("a/b"),
            payload: b"hi".to_vec(),
            qos: QoS::AtLeastOnce,
            retain: false,
        });
        store.persist(session).unwrap();

        let mut reopened = SessionStore::open(Some(path.clone()));
        let (resumed, present) = reopened.open_session("client-1", false);
        assert!(present);
        assert_eq!(resumed.subscriptions.len(), 1);
        assert_eq!(resumed.pending.len(), 1);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn clean_session_never_persists() {
        let mut store = SessionStore::in_memory();
        let (session, present) = store.open_session("c", true);
        assert!(!present);
        store.persist(session).unwrap();
        let (_again, present) = store.open_session("c", false);
        assert!(!present);
    }

    #[test]
    fn corrupt_file_yields_empty_store() {
        let dir = temp_dir().join(format!("mqttsuite-session-store-corrupt-{}", rand::random::<u64>()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sessions.bin");
        fs::write(&path, b"not a session store").unwrap();

        let mut store = SessionStore::open(Some(path));
        let (_s, present) = store.open_session("client-1", false);
        assert!(!present);

        fs::remove_dir_all(&dir).ok();
    }
}
