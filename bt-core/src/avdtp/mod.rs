//! AVDTP command framing (C12): signal header (`label<<4|packet_type<<2|message_type`
//! plus an optional packet-count byte and the signal id), request builders
//! for the Discover/GetCapabilities/SetConfiguration family, and a response
//! parser that classifies by message type.
//!
//! One received L2CAP SDU carries one complete signal; AVDTP's
//! START/CONTINUE/END fragmentation exists for larger transmitted commands,
//! not for reassembling what this library receives, so [`on_inbound`] reads
//! a single packet and does not stitch CONTINUE/END packets together.
//!
//! [`on_inbound`]: AvdtpCommand::on_inbound
use crate::channel::{Command, Progress};
use crate::error::{Error, ErrorKind};
use std::sync::atomic::{AtomicU8, Ordering};

pub mod signal {
    pub const DISCOVER: u8 = 0x01;
    pub const GET_CAPABILITIES: u8 = 0x02;
    pub const SET_CONFIGURATION: u8 = 0x03;
    pub const GET_CONFIGURATION: u8 = 0x04;
    pub const RECONFIGURE: u8 = 0x05;
    pub const OPEN: u8 = 0x06;
    pub const START: u8 = 0x07;
    pub const CLOSE: u8 = 0x08;
    pub const SUSPEND: u8 = 0x09;
    pub const ABORT: u8 = 0x0A;
    pub const SECURITY_CONTROL: u8 = 0x0B;
    pub const GET_ALL_CAPABILITIES: u8 = 0x0C;
    pub const DELAY_REPORT: u8 = 0x0D;
}

pub mod packet_type {
    pub const SINGLE: u8 = 0x00;
    pub const START: u8 = 0x01;
    pub const CONTINUE: u8 = 0x02;
    pub const END: u8 = 0x03;
}

pub mod message_type {
    pub const COMMAND: u8 = 0x00;
    pub const GENERAL_REJECT: u8 = 0x01;
    pub const RESPONSE_ACCEPT: u8 = 0x02;
    pub const RESPONSE_REJECT: u8 = 0x03;
}

pub mod errorcode {
    pub const SUCCESS: u8 = 0x00;
    pub const BAD_HEADER_FORMAT: u8 = 0x01;
    pub const BAD_LENGTH: u8 = 0x11;
    pub const BAD_ACP_SEID: u8 = 0x12;
    pub const SEP_IN_USE: u8 = 0x13;
    pub const SEP_NOT_IN_USE: u8 = 0x14;
    pub const BAD_SERV_CATEGORY: u8 = 0x17;
    pub const BAD_PAYLOAD_FORMAT: u8 = 0x18;
    pub const NOT_SUPPORTED_COMMAND: u8 = 0x19;
    pub const INVALID_CAPABILITIES: u8 = 0x1A;
    pub const BAD_STATE: u8 = 0x31;
    pub const GENERAL_ERROR: u8 = 0xFF;
}

pub mod category {
    pub const MEDIA_TRANSPORT: u8 = 0x01;
    pub const REPORTING: u8 = 0x02;
    pub const RECOVERY: u8 = 0x03;
    pub const CONTENT_PROTECTION: u8 = 0x04;
    pub const HEADER_COMPRESSION: u8 = 0x05;
    pub const MULTIPLEXING: u8 = 0x06;
    pub const MEDIA_CODEC: u8 = 0x07;
    pub const DELAY_REPORTING: u8 = 0x08;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ServiceType {
    Source = 0x00,
    Sink = 0x01,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum MediaType {
    Audio = 0x00,
    Video = 0x01,
    Multimedia = 0x02,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum AvdtpError {
    Truncated,
}

pub type Result<T> = std::result::Result<T, AvdtpError>;

/// One discovered stream endpoint, decoded from its 2-byte SEP record.
#[derive(Clone, Debug)]
pub struct StreamEndpoint {
    pub seid: u8,
    pub in_use: bool,
    pub service_type: ServiceType,
    pub media_type: MediaType,
}

impl StreamEndpoint {
    pub fn from_bytes(record: [u8; 2]) -> Self {
        let seid = record[0] >> 2;
        let in_use = record[0] & 0x02 != 0;
        let media_type = match record[1] >> 4 {
            0x00 => MediaType::Audio,
            0x01 => MediaType::Video,
            _ => MediaType::Multimedia,
        };
        let service_type = if record[1] & 0x08 != 0 {
            ServiceType::Sink
        } else {
            ServiceType::Source
        };
        Self {
            seid,
            in_use,
            service_type,
            media_type,
        }
    }
}

/// Splits an accepted `Discover` payload into its 2-byte SEP records.
pub fn read_discovery(payload: &[u8]) -> Vec<StreamEndpoint> {
    payload
        .chunks_exact(2)
        .map(|c| StreamEndpoint::from_bytes([c[0], c[1]]))
        .collect()
}

/// Splits an accepted capabilities payload into `(category, value)`
/// triples, each wire-coded as `[category][length][value...]`.
pub fn read_configuration(payload: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 2 <= payload.len() {
        let category = payload[i];
        let len = payload[i + 1] as usize;
        i += 2;
        let value = payload.get(i..i + len).unwrap_or(&[]).to_vec();
        i += len;
        out.push((category, value));
    }
    out
}

/// Assigns AVDTP transaction labels in sequence, wrapping modulo 16, shared
/// across every command issued over one signaling channel.
pub struct LabelAllocator(AtomicU8);

impl LabelAllocator {
    pub fn new() -> Self {
        Self(AtomicU8::new(0x0F))
    }

    pub fn next(&self) -> u8 {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |l| Some((l + 1) & 0x0F))
            .unwrap();
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for LabelAllocator {
    fn default() -> Self {
        Self::new()
    }
}

fn needs_failing_seid(signal_id: u8) -> bool {
    matches!(
        signal_id,
        signal::SET_CONFIGURATION | signal::RECONFIGURE | signal::START | signal::SUSPEND
    )
}

/// One AVDTP signaling transaction: a label, a signal id, and a pre-built
/// request body (everything after the header).
pub struct AvdtpCommand {
    label: u8,
    signal_id: u8,
    body: Vec<u8>,
    sent: bool,
    pub status: u8,
    pub payload: Vec<u8>,
    pub failing_seid: Option<u8>,
}

impl AvdtpCommand {
    fn generic(allocator: &LabelAllocator, signal_id: u8, acp_seid: Option<u8>) -> Self {
        let mut body = Vec::new();
        if let Some(seid) = acp_seid {
            body.push(seid << 2);
        }
        Self {
            label: allocator.next(),
            signal_id,
            body,
            sent: false,
            status: errorcode::SUCCESS,
            payload: Vec::new(),
            failing_seid: None,
        }
    }

    fn configuration(
        allocator: &LabelAllocator,
        signal_id: u8,
        acp_seid: u8,
        int_seid: u8,
        caps: &[(u8, Vec<u8>)],
    ) -> Self {
        let mut cmd = Self::generic(allocator, signal_id, Some(acp_seid));
        cmd.body.push(int_seid << 2);
        for (cat, value) in caps {
            cmd.body.push(*cat);
            cmd.body.push(value.len() as u8);
            cmd.body.extend_from_slice(value);
        }
        cmd
    }

    pub fn discover(allocator: &LabelAllocator) -> Self {
        Self::generic(allocator, signal::DISCOVER, None)
    }

    pub fn get_capabilities(allocator: &LabelAllocator, acp_seid: u8) -> Self {
        Self::generic(allocator, signal::GET_CAPABILITIES, Some(acp_seid))
    }

    pub fn get_all_capabilities(allocator: &LabelAllocator, acp_seid: u8) -> Self {
        Self::generic(allocator, signal::GET_ALL_CAPABILITIES, Some(acp_seid))
    }

    pub fn get_configuration(allocator: &LabelAllocator, acp_seid: u8) -> Self {
        Self::generic(allocator, signal::GET_CONFIGURATION, Some(acp_seid))
    }

    pub fn set_configuration(
        allocator: &LabelAllocator,
        acp_seid: u8,
        int_seid: u8,
        caps: &[(u8, Vec<u8>)],
    ) -> Self {
        Self::configuration(allocator, signal::SET_CONFIGURATION, acp_seid, int_seid, caps)
    }

    pub fn reconfigure(
        allocator: &LabelAllocator,
        acp_seid: u8,
        int_seid: u8,
        caps: &[(u8, Vec<u8>)],
    ) -> Self {
        Self::configuration(allocator, signal::RECONFIGURE, acp_seid, int_seid, caps)
    }

    pub fn open(allocator: &LabelAllocator, acp_seid: u8) -> Self {
        Self::generic(allocator, signal::OPEN, Some(acp_seid))
    }

    pub fn start(allocator: &LabelAllocator, acp_seid: u8) -> Self {
        Self::generic(allocator, signal::START, Some(acp_seid))
    }

    pub fn suspend(allocator: &LabelAllocator, acp_seid: u8) -> Self {
        Self::generic(allocator, signal::SUSPEND, Some(acp_seid))
    }

    pub fn close(allocator: &LabelAllocator, acp_seid: u8) -> Self {
        Self::generic(allocator, signal::CLOSE, Some(acp_seid))
    }

    pub fn abort(allocator: &LabelAllocator, acp_seid: u8) -> Self {
        Self::generic(allocator, signal::ABORT, Some(acp_seid))
    }

    pub fn security_control(allocator: &LabelAllocator, acp_seid: u8, data: &[u8]) -> Self {
        let mut cmd = Self::generic(allocator, signal::SECURITY_CONTROL, Some(acp_seid));
        cmd.body.extend_from_slice(data);
        cmd
    }

    pub fn label(&self) -> u8 {
        self.label
    }
}

impl Command for AvdtpCommand {
    fn request_bytes(&mut self) -> std::result::Result<Vec<u8>, Error> {
        if self.sent {
            return Err(Error::new(ErrorKind::BadRequest));
        }
        self.sent = true;
        let mut out = Vec::with_capacity(2 + self.body.len());
        out.push((self.label << 4) | (packet_type::SINGLE << 2) | message_type::COMMAND);
        out.push(self.signal_id & 0x3F);
        out.extend_from_slice(&self.body);
        Ok(out)
    }

    fn on_inbound(&mut self, bytes: &[u8]) -> Progress {
        let Some(&first) = bytes.first() else {
            return Progress::NotMine;
        };
        let label = first >> 4;
        let msg_type = first & 0x3;
        let pkt_type = (first >> 2) & 0x3;
        if label != self.label {
            // Out-of-order signal for another transaction; leave it for
            // whatever command is actually waiting on it.
            return Progress::NotMine;
        }

        let mut idx = 1;
        if pkt_type == packet_type::START {
            idx += 1; // packet count; unused, we don't reassemble
        }
        let mut parsed_signal = self.signal_id;
        if pkt_type == packet_type::START || pkt_type == packet_type::SINGLE {
            parsed_signal = bytes.get(idx).copied().unwrap_or(self.signal_id) & 0x3F;
            idx += 1;
        }
        let rest = bytes.get(idx..).unwrap_or(&[]);

        match msg_type {
            message_type::RESPONSE_ACCEPT => {
                self.status = errorcode::SUCCESS;
                self.payload = rest.to_vec();
                Progress::Completed(Ok(()))
            }
            message_type::RESPONSE_REJECT => {
                let (failing, status) = if needs_failing_seid(parsed_signal) {
                    (
                        rest.first().copied(),
                        rest.get(1).copied().unwrap_or(errorcode::GENERAL_ERROR),
                    )
                } else {
                    (None, rest.first().copied().unwrap_or(errorcode::GENERAL_ERROR))
                };
                self.failing_seid = failing;
                self.status = status;
                Progress::Completed(Err(Error::new(ErrorKind::AsyncFailed { byte: status })))
            }
            _ => {
                self.status = errorcode::GENERAL_ERROR;
                Progress::Completed(Err(Error::new(ErrorKind::AsyncFailed {
                    byte: errorcode::GENERAL_ERROR,
                })))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(label: u8, pkt: u8, msg: u8) -> u8 {
        (label << 4) | (pkt << 2) | msg
    }

    #[test]
    fn label_allocator_wraps_modulo_sixteen() {
        let alloc = LabelAllocator::new();
        let labels: Vec<u8> = (0..18).map(|_| alloc.next()).collect();
        assert_eq!(&labels[..16], &(0u8..16).collect::<Vec<_>>()[..]);
        assert_eq!(labels[16], 0);
        assert_eq!(labels[17], 1);
    }

    #[test]
    fn discover_request_has_no_seid_byte() {
        let alloc = LabelAllocator::new();
        let mut cmd = AvdtpCommand::discover(&alloc);
        let bytes = cmd.request_bytes().unwrap();
        assert_eq!(bytes.len(), 2);
        assert_eq!(bytes[1] & 0x3F, signal::DISCOVER);
    }

    #[test]
    fn generic_request_shifts_seid_into_top_bits() {
        let alloc = LabelAllocator::new();
        let mut cmd = AvdtpCommand::get_capabilities(&alloc, 3);
        let bytes = cmd.request_bytes().unwrap();
        assert_eq!(bytes[2], 3 << 2);
    }

    #[test]
    fn response_accept_carries_payload() {
        let alloc = LabelAllocator::new();
        let mut cmd = AvdtpCommand::discover(&alloc);
        cmd.request_bytes().unwrap();
        let label = cmd.label();
        let event = [
            header(label, packet_type::SINGLE, message_type::RESPONSE_ACCEPT),
            signal::DISCOVER,
            0x04,
            0x00,
        ];
        assert!(matches!(cmd.on_inbound(&event), Progress::Completed(Ok(()))));
        assert_eq!(cmd.payload, vec![0x04, 0x00]);
    }

    #[test]
    fn response_reject_for_start_includes_failing_seid() {
        let alloc = LabelAllocator::new();
        let mut cmd = AvdtpCommand::start(&alloc, 1);
        cmd.request_bytes().unwrap();
        let label = cmd.label();
        let event = [
            header(label, packet_type::SINGLE, message_type::RESPONSE_REJECT),
            signal::START,
            0x04, // failing SEID
            errorcode::BAD_STATE,
        ];
        match cmd.on_inbound(&event) {
            Progress::Completed(Err(Error {
                kind: ErrorKind::AsyncFailed { byte },
                ..
            })) => assert_eq!(byte, errorcode::BAD_STATE),
            _ => panic!("expected async-failed"),
        }
        assert_eq!(cmd.failing_seid, Some(0x04));
    }

    #[test]
    fn response_reject_for_discover_has_no_failing_seid() {
        let alloc = LabelAllocator::new();
        let mut cmd = AvdtpCommand::discover(&alloc);
        cmd.request_bytes().unwrap();
        let label = cmd.label();
        let event = [
            header(label, packet_type::SINGLE, message_type::RESPONSE_REJECT),
            signal::DISCOVER,
            errorcode::NOT_SUPPORTED_COMMAND,
        ];
        match cmd.on_inbound(&event) {
            Progress::Completed(Err(Error {
                kind: ErrorKind::AsyncFailed { byte },
                ..
            })) => assert_eq!(byte, errorcode::NOT_SUPPORTED_COMMAND),
            _ => panic!("expected async-failed"),
        }
        assert_eq!(cmd.failing_seid, None);
    }

    #[test]
    fn mismatched_label_is_dropped() {
        let alloc = LabelAllocator::new();
        let mut cmd = AvdtpCommand::discover(&alloc);
        cmd.request_bytes().unwrap();
        let other_label = (cmd.label() + 1) & 0x0F;
        let event = [
            header(other_label, packet_type::SINGLE, message_type::RESPONSE_ACCEPT),
            signal::DISCOVER,
        ];
        assert!(matches!(cmd.on_inbound(&event), Progress::NotMine));
    }

    #[test]
    fn stream_endpoint_decodes_seid_and_flags() {
        let sep = StreamEndpoint::from_bytes([0x04, 0x00]);
        assert_eq!(sep.seid, 1);
        assert!(!sep.in_use);
        assert_eq!(sep.media_type, MediaType::Audio);
        assert_eq!(sep.service_type, ServiceType::Source);

        let sep2 = StreamEndpoint::from_bytes([0x08, 0x08]);
        assert_eq!(sep2.seid, 2);
        assert_eq!(sep2.media_type, MediaType::Audio);
        assert_eq!(sep2.service_type, ServiceType::Sink);
    }

    #[test]
    fn read_discovery_splits_two_byte_records() {
        let payload = [0x04u8, 0x00, 0x08, 0x08];
        let seps = read_discovery(&payload);
        assert_eq!(seps.len(), 2);
        assert_eq!(seps[0].seid, 1);
        assert_eq!(seps[1].seid, 2);
    }

    #[test]
    fn read_configuration_splits_category_length_value_triples() {
        let payload = [category::MEDIA_TRANSPORT, 0x00, category::MEDIA_CODEC, 0x02, 0xAA, 0xBB];
        let caps = read_configuration(&payload);
        assert_eq!(caps.len(), 2);
        assert_eq!(caps[0], (category::MEDIA_TRANSPORT, vec![]));
        assert_eq!(caps[1], (category::MEDIA_CODEC, vec![0xAA, 0xBB]));
    }
}
