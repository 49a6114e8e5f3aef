//! SDP profile sequencer (C15): resolves a UUID pattern to service record
//! handles, then pulls each record's full attribute map and post-processes
//! the well-known attributes (§3's SDP Service record model) into
//! structured fields.
use crate::channel::{Channel, Command, Socket};
use crate::error::Error;
use crate::sdp::payload::Payload;
use crate::sdp::{ServiceAttribute, ServiceSearch};
use crate::uuid::Uuid;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{instrument, warn};

/// Universal SDP attribute ids (§3), shared by every service class.
pub mod attribute {
    pub const SERVICE_RECORD_HANDLE: u16 = 0x0000;
    pub const SERVICE_CLASS_ID_LIST: u16 = 0x0001;
    pub const SERVICE_RECORD_STATE: u16 = 0x0002;
    pub const SERVICE_ID: u16 = 0x0003;
    pub const PROTOCOL_DESCRIPTOR_LIST: u16 = 0x0004;
    pub const BROWSE_GROUP_LIST: u16 = 0x0005;
    pub const LANGUAGE_BASE_ATTRIBUTE_ID_LIST: u16 = 0x0006;
    pub const SERVICE_INFO_TIME_TO_LIVE: u16 = 0x0007;
    pub const SERVICE_AVAILABILITY: u16 = 0x0008;
    pub const BLUETOOTH_PROFILE_DESCRIPTOR_LIST: u16 = 0x0009;
}

/// A `LanguageBaseAttributeIDList` base plus these offsets yields the
/// matching per-language field's attribute id.
pub const OFFSET_SERVICE_NAME: u16 = 0x00;
pub const OFFSET_SERVICE_DESCRIPTION: u16 = 0x01;
pub const OFFSET_PROVIDER_NAME: u16 = 0x02;

#[derive(Clone, Debug, Default)]
pub struct LanguageMetadata {
    pub language: [u8; 2],
    pub charset: u16,
    pub name: Option<Vec<u8>>,
    pub description: Option<Vec<u8>>,
    pub provider: Option<Vec<u8>>,
}

#[derive(Clone, Debug, Default)]
pub struct ServiceRecord {
    pub handle: u32,
    pub attributes: HashMap<u16, Vec<u8>>,
    pub class_ids: Vec<Uuid>,
    pub protocols: Vec<(Uuid, Vec<u8>)>,
    pub profiles: Vec<(Uuid, u16)>,
    pub metadata: Vec<LanguageMetadata>,
}

fn decode_uuid_list(bytes: &[u8]) -> Vec<Uuid> {
    let mut payload = Payload::from_filled(bytes);
    let mut uuids = Vec::new();
    while payload.available() > 0 {
        match payload.pop_uuid() {
            Ok(uuid) => uuids.push(uuid),
            Err(_) => break,
        }
    }
    uuids
}

fn decode_protocol_list(bytes: &[u8]) -> Vec<(Uuid, Vec<u8>)> {
    let mut payload = Payload::from_filled(bytes);
    let mut protocols = Vec::new();
    while payload.available() > 0 {
        let entry = payload.pop_sequence(|seq| {
            let uuid = seq.pop_uuid()?;
            let mut params = Vec::new();
            while seq.available() > 0 {
                params.extend(seq.pop_element_raw()?);
            }
            Ok((uuid, params))
        });
        match entry {
            Ok(entry) => protocols.push(entry),
            Err(_) => break,
        }
    }
    protocols
}

fn decode_profile_list(bytes: &[u8]) -> Vec<(Uuid, u16)> {
    let mut payload = Payload::from_filled(bytes);
    let mut profiles = Vec::new();
    while payload.available() > 0 {
        let entry = payload.pop_sequence(|seq| {
            let uuid = seq.pop_uuid()?;
            let version = seq.pop_uint32()? as u16;
            Ok((uuid, version))
        });
        match entry {
            Ok(entry) => profiles.push(entry),
            Err(_) => break,
        }
    }
    profiles
}

fn decode_language_bases(bytes: &[u8]) -> Vec<(u16, u16, u16)> {
    let mut payload = Payload::from_filled(bytes);
    let mut bases = Vec::new();
    loop {
        let Ok(language) = payload.pop_uint32() else { break };
        let Ok(charset) = payload.pop_uint32() else { break };
        let Ok(base) = payload.pop_uint32() else { break };
        bases.push((language as u16, charset as u16, base as u16));
    }
    bases
}

fn text_attribute(attributes: &HashMap<u16, Vec<u8>>, id: u16) -> Option<Vec<u8>> {
    let raw = attributes.get(&id)?;
    let mut payload = Payload::from_filled(raw);
    payload.pop_text().ok()
}

fn post_process(record: &mut ServiceRecord) {
    if let Some(raw) = record.attributes.get(&attribute::SERVICE_CLASS_ID_LIST) {
        record.class_ids = decode_uuid_list(raw);
    }
    if let Some(raw) = record.attributes.get(&attribute::PROTOCOL_DESCRIPTOR_LIST) {
        record.protocols = decode_protocol_list(raw);
    }
    if let Some(raw) = record
        .attributes
        .get(&attribute::BLUETOOTH_PROFILE_DESCRIPTOR_LIST)
    {
        record.profiles = decode_profile_list(raw);
    }
    if let Some(raw) = record
        .attributes
        .get(&attribute::LANGUAGE_BASE_ATTRIBUTE_ID_LIST)
    {
        record.metadata = decode_language_bases(raw)
            .into_iter()
            .map(|(language, charset, base)| LanguageMetadata {
                language: [(language >> 8) as u8, (language & 0xFF) as u8],
                charset,
                name: text_attribute(&record.attributes, base + OFFSET_SERVICE_NAME),
                description: text_attribute(&record.attributes, base + OFFSET_SERVICE_DESCRIPTION),
                provider: text_attribute(&record.attributes, base + OFFSET_PROVIDER_NAME),
            })
            .collect();
    }
}

pub struct SdpSequencer<S> {
    channel: Channel<S>,
    tid: AtomicU16,
    aborted: Arc<AtomicBool>,
}

impl<S: Socket> SdpSequencer<S> {
    pub fn new(channel: Channel<S>) -> Self {
        Self {
            channel,
            tid: AtomicU16::new(0),
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn next_tid(&self) -> u16 {
        self.tid.fetch_add(1, Ordering::SeqCst)
    }

    fn remaining(&self, deadline: Instant) -> Result<Duration, Error> {
        let now = Instant::now();
        if now >= deadline {
            return Err(Error::new(crate::error::ErrorKind::TimedOut));
        }
        Ok(deadline - now)
    }

    async fn run<C: Command>(&self, deadline: Instant, command: C) -> Result<C, Error> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(Error::new(crate::error::ErrorKind::AsyncAborted));
        }
        let wait = self.remaining(deadline)?;
        self.channel.execute(wait, command).await
    }

    /// Resolves `uuids` to service handles, then fetches and post-processes
    /// each distinct handle's full attribute range.
    #[instrument(level = "debug", skip(self, uuids))]
    pub async fn discover(&self, uuids: Vec<Uuid>, deadline: Instant) -> Result<Vec<ServiceRecord>, Error> {
        let search = ServiceSearch::new(self.next_tid(), uuids, 0xFFFF);
        let search = self.run(deadline, search).await?;

        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for handle in search.handles {
            if !seen.insert(handle) {
                warn!(handle, "duplicate service handle in search results, collapsing");
                continue;
            }
            records.push(ServiceRecord {
                handle,
                ..Default::default()
            });
        }

        for record in records.iter_mut() {
            let attrs = ServiceAttribute::new(self.next_tid(), record.handle, vec![(0x0000, 0xFFFF)]);
            let attrs = self.run(deadline, attrs).await?;
            record.attributes = attrs.into_attributes();
            post_process(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::fake::FakeSocket;
    use crate::sdp;

    fn header(pdu_id: u8, tid: u16, body: &[u8]) -> Vec<u8> {
        let mut out = vec![pdu_id];
        out.extend_from_slice(&tid.to_be_bytes());
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    #[tokio::test]
    async fn discovers_one_service_and_decodes_class_id_list() {
        let (socket, peer) = FakeSocket::pair();
        let channel = Channel::new(socket);
        let sequencer = SdpSequencer::new(channel);
        let deadline = Instant::now() + Duration::from_secs(5);

        let driver = tokio::spawn(async move {
            let _req = peer.sent().await;
            let mut body = Vec::new();
            body.extend_from_slice(&1u16.to_be_bytes());
            body.extend_from_slice(&1u16.to_be_bytes());
            body.extend_from_slice(&0x42u32.to_be_bytes());
            body.push(0);
            peer.deliver(&header(sdp::pdu::SERVICE_SEARCH_RESPONSE, 0, &body)).await;

            let _req = peer.sent().await;
            let mut attrs = Payload::with_capacity(64);
            attrs
                .push_sequence(64, |seq| {
                    seq.push_uint16(attribute::SERVICE_CLASS_ID_LIST)?;
                    seq.push_sequence(32, |inner| inner.push_uuid(&Uuid::from_short(0x1101)))?;
                    Ok(())
                })
                .unwrap();
            let attr_body = attrs.record().as_written().to_vec();
            let mut byte_counted = Vec::new();
            byte_counted.extend_from_slice(&(attr_body.len() as u16).to_be_bytes());
            byte_counted.extend_from_slice(&attr_body);
            byte_counted.push(0);
            peer.deliver(&header(sdp::pdu::SERVICE_ATTRIBUTE_RESPONSE, 1, &byte_counted))
                .await;
        });

        let records = sequencer
            .discover(vec![Uuid::from_short(0x1101)], deadline)
            .await
            .unwrap();
        driver.await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].handle, 0x42);
        assert_eq!(records[0].class_ids.len(), 1);
        assert_eq!(records[0].class_ids[0].short(), 0x1101);
    }

    #[tokio::test]
    async fn duplicate_handles_are_collapsed() {
        let (socket, peer) = FakeSocket::pair();
        let channel = Channel::new(socket);
        let sequencer = SdpSequencer::new(channel);
        let deadline = Instant::now() + Duration::from_secs(5);

        let driver = tokio::spawn(async move {
            let _req = peer.sent().await;
            let mut body = Vec::new();
            body.extend_from_slice(&2u16.to_be_bytes());
            body.extend_from_slice(&2u16.to_be_bytes());
            body.extend_from_slice(&1u32.to_be_bytes());
            body.extend_from_slice(&1u32.to_be_bytes());
            body.push(0);
            peer.deliver(&header(sdp::pdu::SERVICE_SEARCH_RESPONSE, 0, &body)).await;

            let _req = peer.sent().await;
            let mut byte_counted = Vec::new();
            byte_counted.extend_from_slice(&0u16.to_be_bytes());
            byte_counted.push(0);
            peer.deliver(&header(sdp::pdu::SERVICE_ATTRIBUTE_RESPONSE, 1, &byte_counted))
                .await;
        });

        let records = sequencer
            .discover(vec![Uuid::from_short(0x1101)], deadline)
            .await
            .unwrap();
        driver.await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn past_deadline_times_out_before_any_request() {
        let (socket, _peer) = FakeSocket::pair();
        let channel = Channel::new(socket);
        let sequencer = SdpSequencer::new(channel);
        let deadline = Instant::now() - Duration::from_millis(1);
        let err = sequencer
            .discover(vec![Uuid::from_short(0x1101)], deadline)
            .await
            .unwrap_err();
        assert!(matches!(err.kind, crate::error::ErrorKind::TimedOut));
    }
}
