//! SDP command framing (C11): the 5-byte PDU header, continuation-state
//! chaining (§4.9), and a minimal `ServiceSearchAttributeRequest` server
//! responder.
use crate::channel::{Command, Progress};
use crate::error::{Error, ErrorKind};
use crate::uuid::Uuid;
use std::collections::HashMap;

pub mod payload;

use payload::{Continuation, Payload};

pub mod pdu {
    pub const ERROR_RESPONSE: u8 = 0x01;
    pub const SERVICE_SEARCH_REQUEST: u8 = 0x02;
    pub const SERVICE_SEARCH_RESPONSE: u8 = 0x03;
    pub const SERVICE_ATTRIBUTE_REQUEST: u8 = 0x04;
    pub const SERVICE_ATTRIBUTE_RESPONSE: u8 = 0x05;
    pub const SERVICE_SEARCH_ATTRIBUTE_REQUEST: u8 = 0x06;
    pub const SERVICE_SEARCH_ATTRIBUTE_RESPONSE: u8 = 0x07;
}

const HEADER_SIZE: usize = 5;

#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum SdpError {
    Truncated,
    TransactionMismatch,
    InsufficientResources,
}

pub type Result<T> = std::result::Result<T, SdpError>;

fn header(pdu_id: u8, tid: u16, payload_len: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE);
    out.push(pdu_id);
    out.extend_from_slice(&tid.to_be_bytes());
    out.extend_from_slice(&payload_len.to_be_bytes());
    out
}

/// Splits `bytes` into `(pdu_id, tid, params)` if a full header is
/// present, checking the transaction id against `expected_tid`.
fn split_response(bytes: &[u8], expected_tid: u16) -> Option<(u8, &[u8])> {
    if bytes.len() < HEADER_SIZE {
        return None;
    }
    let tid = u16::from_be_bytes([bytes[1], bytes[2]]);
    if tid != expected_tid {
        return None;
    }
    let len = u16::from_be_bytes([bytes[3], bytes[4]]) as usize;
    let params = bytes.get(HEADER_SIZE..HEADER_SIZE + len)?;
    Some((bytes[0], params))
}

fn error_code(params: &[u8]) -> u8 {
    // ErrorResponse payload is a 16-bit error code; only the low byte is
    // kept, matching the single-byte status slot on [`Error`].
    params.get(1).copied().unwrap_or(0xFF)
}

/// `ServiceSearchRequest`/`Response`: resolves a UUID pattern to a list of
/// service record handles, chaining on continuation state.
pub struct ServiceSearch {
    tid: u16,
    uuids: Vec<Uuid>,
    max_results: u16,
    continuation: Continuation,
    accumulated: Vec<u8>,
    pub handles: Vec<u32>,
}

impl ServiceSearch {
    pub fn new(tid: u16, uuids: Vec<Uuid>, max_results: u16) -> Self {
        Self {
            tid,
            uuids,
            max_results: max_results.min(256),
            continuation: Continuation::absent(),
            accumulated: Vec::new(),
            handles: Vec::new(),
        }
    }

    fn encode(&self) -> std::result::Result<Vec<u8>, SdpError> {
        let mut payload = Payload::with_capacity(256);
        payload
            .push_sequence(128, |seq| {
                for uuid in &self.uuids {
                    seq.push_uuid(uuid)?;
                }
                Ok(())
            })
            .map_err(|_| SdpError::Truncated)?;
        payload
            .record_mut()
            .push_u16(self.max_results, crate::record::Endian::Big)
            .map_err(|_| SdpError::Truncated)?;
        payload
            .push_continuation(&self.continuation)
            .map_err(|_| SdpError::Truncated)?;
        let body = payload.record().as_written().to_vec();
        let mut out = header(pdu::SERVICE_SEARCH_REQUEST, self.tid, body.len() as u16);
        out.extend_from_slice(&body);
        Ok(out)
    }
}

impl Command for ServiceSearch {
    fn request_bytes(&mut self) -> std::result::Result<Vec<u8>, Error> {
        self.encode().map_err(|e| e.into())
    }

    fn on_inbound(&mut self, bytes: &[u8]) -> Progress {
        let Some((id, params)) = split_response(bytes, self.tid) else {
            return Progress::NotMine;
        };
        if id == pdu::ERROR_RESPONSE {
            return Progress::Completed(Err(Error::new(ErrorKind::AsyncFailed {
                byte: error_code(params),
            })));
        }
        if id != pdu::SERVICE_SEARCH_RESPONSE || params.len() < 4 {
            return Progress::NotMine;
        }
        let current = u16::from_be_bytes([params[2], params[3]]) as usize;
        let handle_bytes_len = current * 4;
        let Some(handle_bytes) = params.get(4..4 + handle_bytes_len) else {
            return Progress::Completed(Err(SdpError::Truncated.into()));
        };
        self.accumulated.extend_from_slice(handle_bytes);
        let cont_start = 4 + handle_bytes_len;
        let cont_len = *params.get(cont_start).unwrap_or(&0) as usize;
        let cont = params
            .get(cont_start + 1..cont_start + 1 + cont_len)
            .unwrap_or(&[]);
        self.continuation = Continuation(cont.to_vec());

        if self.continuation.is_absent() {
            self.handles = self
                .accumulated
                .chunks_exact(4)
                .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            Progress::Completed(Ok(()))
        } else {
            Progress::Resend
        }
    }
}

/// Shared chaining body for `ServiceAttributeRequest`/`ServiceSearchAttributeRequest`:
/// both carry a 16-bit byte count, that many payload bytes, then a
/// continuation blob.
fn accumulate_byte_counted(
    params: &[u8],
    accumulated: &mut Vec<u8>,
) -> std::result::Result<Continuation, SdpError> {
    if params.len() < 2 {
        return Err(SdpError::Truncated);
    }
    let count = u16::from_be_bytes([params[0], params[1]]) as usize;
    let data = params.get(2..2 + count).ok_or(SdpError::Truncated)?;
    accumulated.extend_from_slice(data);
    let cont_start = 2 + count;
    let cont_len = *params.get(cont_start).unwrap_or(&0) as usize;
    let cont = params
        .get(cont_start + 1..cont_start + 1 + cont_len)
        .unwrap_or(&[]);
    Ok(Continuation(cont.to_vec()))
}

/// Decodes a fully-reassembled attribute list (a `SEQ` of alternating
/// attribute-id/value pairs) into a map. Later values for the same id
/// overwrite earlier ones.
pub fn decode_attribute_list(bytes: &[u8]) -> HashMap<u16, Vec<u8>> {
    let mut map = HashMap::new();
    let mut payload = Payload::from_filled(bytes);
    let _ = payload.pop_sequence(|seq| {
        loop {
            let id = match seq.pop_uint32() {
                Ok(v) => v as u16,
                Err(_) => break,
            };
            let value = match seq.pop_element_raw() {
                Ok(v) => v,
                Err(_) => break,
            };
            map.insert(id, value);
        }
        Ok(())
    });
    map
}

pub struct ServiceAttribute {
    tid: u16,
    handle: u32,
    ranges: Vec<(u16, u16)>,
    continuation: Continuation,
    accumulated: Vec<u8>,
}

impl ServiceAttribute {
    pub fn new(tid: u16, handle: u32, ranges: Vec<(u16, u16)>) -> Self {
        Self {
            tid,
            handle,
            ranges,
            continuation: Continuation::absent(),
            accumulated: Vec::new(),
        }
    }

    pub fn into_attributes(self) -> HashMap<u16, Vec<u8>> {
        decode_attribute_list(&self.accumulated)
    }

    fn encode(&self) -> std::result::Result<Vec<u8>, SdpError> {
        let mut payload = Payload::with_capacity(256);
        payload
            .record_mut()
            .push_u32(self.handle, crate::record::Endian::Big)
            .map_err(|_| SdpError::Truncated)?;
        payload
            .record_mut()
            .push_u16(0xFFFF, crate::record::Endian::Big) // max attribute byte count
            .map_err(|_| SdpError::Truncated)?;
        payload
            .push_sequence(128, |seq| {
                for (lo, hi) in &self.ranges {
                    if lo == hi {
                        seq.push_uint16(*lo)?;
                    } else {
                        seq.push_uint32(((*lo as u32) << 16) | (*hi as u32))?;
                    }
                }
                Ok(())
            })
            .map_err(|_| SdpError::Truncated)?;
        payload
            .push_continuation(&self.continuation)
            .map_err(|_| SdpError::Truncated)?;
        let body = payload.record().as_written().to_vec();
        let mut out = header(pdu::SERVICE_ATTRIBUTE_REQUEST, self.tid, body.len() as u16);
        out.extend_from_slice(&body);
        Ok(out)
    }
}

impl Command for ServiceAttribute {
    fn request_bytes(&mut self) -> std::result::Result<Vec<u8>, Error> {
        self.encode().map_err(|e| e.into())
    }

    fn on_inbound(&mut self, bytes: &[u8]) -> Progress {
        let Some((id, params)) = split_response(bytes, self.tid) else {
            return Progress::NotMine;
        };
        if id == pdu::ERROR_RESPONSE {
            return Progress::Completed(Err(Error::new(ErrorKind::AsyncFailed {
                byte: error_code(params),
            })));
        }
        if id != pdu::SERVICE_ATTRIBUTE_RESPONSE {
            return Progress::NotMine;
        }
        match accumulate_byte_counted(params, &mut self.accumulated) {
            Ok(cont) => {
                self.continuation = cont;
                if self.continuation.is_absent() {
                    Progress::Completed(Ok(()))
                } else {
                    Progress::Resend
                }
            }
            Err(e) => Progress::Completed(Err(e.into())),
        }
    }
}

pub struct ServiceSearchAttribute {
    tid: u16,
    uuids: Vec<Uuid>,
    ranges: Vec<(u16, u16)>,
    continuation: Continuation,
    accumulated: Vec<u8>,
}

impl ServiceSearchAttribute {
    pub fn new(tid: u16, uuids: Vec<Uuid>, ranges: Vec<(u16, u16)>) -> Self {
        Self {
            tid,
            uuids,
            ranges,
            continuation: Continuation::absent(),
            accumulated: Vec::new(),
        }
    }

    pub fn into_attributes(self) -> HashMap<u16, Vec<u8>> {
        decode_attribute_list(&self.accumulated)
    }

    fn encode(&self) -> std::result::Result<Vec<u8>, SdpError> {
        let mut payload = Payload::with_capacity(256);
        payload
            .push_sequence(128, |seq| {
                for uuid in &self.uuids {
                    seq.push_uuid(uuid)?;
                }
                Ok(())
            })
            .map_err(|_| SdpError::Truncated)?;
        payload
            .record_mut()
            .push_u16(0xFFFF, crate::record::Endian::Big)
            .map_err(|_| SdpError::Truncated)?;
        payload
            .push_sequence(128, |seq| {
                for (lo, hi) in &self.ranges {
                    if lo == hi {
                        seq.push_uint16(*lo)?;
                    } else {
                        seq.push_uint32(((*lo as u32) << 16) | (*hi as u32))?;
                    }
                }
                Ok(())
            })
            .map_err(|_| SdpError::Truncated)?;
        payload
            .push_continuation(&self.continuation)
            .map_err(|_| SdpError::Truncated)?;
        let body = payload.record().as_written().to_vec();
        let mut out = header(
            pdu::SERVICE_SEARCH_ATTRIBUTE_REQUEST,
            self.tid,
            body.len() as u16,
        );
        out.extend_from_slice(&body);
        Ok(out)
    }
}

impl Command for ServiceSearchAttribute {
    fn request_bytes(&mut self) -> std::result::Result<Vec<u8>, Error> {
        self.encode().map_err(|e| e.into())
    }

    fn on_inbound(&mut self, bytes: &[u8]) -> Progress {
        let Some((id, params)) = split_response(bytes, self.tid) else {
            return Progress::NotMine;
        };
        if id == pdu::ERROR_RESPONSE {
            return Progress::Completed(Err(Error::new(ErrorKind::AsyncFailed {
                byte: error_code(params),
            })));
        }
        if id != pdu::SERVICE_SEARCH_ATTRIBUTE_RESPONSE {
            return Progress::NotMine;
        }
        match accumulate_byte_counted(params, &mut self.accumulated) {
            Ok(cont) => {
                self.continuation = cont;
                if self.continuation.is_absent() {
                    Progress::Completed(Ok(()))
                } else {
                    Progress::Resend
                }
            }
            Err(e) => Progress::Completed(Err(e.into())),
        }
    }
}

/// Application hooks for the minimal server responder: resolve a UUID
/// pattern to record handles, and serialize one record's requested
/// attribute ranges to `(id, value)` pairs.
pub trait ServiceDirectory: Send + Sync {
    fn search(&self, uuids: &[Uuid]) -> Vec<u32>;
    fn attributes(&self, handle: u32, ranges: &[(u16, u16)]) -> Vec<(u16, Vec<u8>)>;
}

/// Decodes a `ServiceSearchAttributeRequest` PDU and, on success, the
/// `(uuids, ranges, max_bytes)` it carried.
pub fn decode_service_search_attribute_request(
    params: &[u8],
) -> Result<(Vec<Uuid>, Vec<(u16, u16)>, u16)> {
    let mut payload = Payload::from_filled(params);
    let mut uuids = Vec::new();
    payload
        .pop_sequence(|seq| {
            while seq.available() > 0 {
                uuids.push(seq.pop_uuid()?);
            }
            Ok(())
        })
        .map_err(|_| SdpError::Truncated)?;
    let max_bytes = payload
        .record_mut()
        .pop_u16(crate::record::Endian::Big)
        .map_err(|_| SdpError::Truncated)?;
    let mut ranges = Vec::new();
    payload
        .pop_sequence(|seq| {
            while seq.available() > 0 {
                let v = seq.pop_uint32()?;
                if v <= u16::MAX as u32 {
                    ranges.push((v as u16, v as u16));
                } else {
                    ranges.push(((v >> 16) as u16, (v & 0xFFFF) as u16));
                }
            }
            Ok(())
        })
        .map_err(|_| SdpError::Truncated)?;
    Ok((uuids, ranges, max_bytes))
}

/// Builds a `ServiceSearchAttributeResponse` PDU: a `SEQ` of per-record
/// `SEQ`s of `(id, value)` pairs. Returns `INSUFFICIENT_RESOURCES` if the
/// encoded attribute lists exceed `max_bytes` (continuation is not
/// implemented on the server side).
pub fn build_service_search_attribute_response(
    tid: u16,
    records: &[Vec<(u16, Vec<u8>)>],
    max_bytes: u16,
) -> std::result::Result<Vec<u8>, SdpError> {
    let mut payload = Payload::with_capacity(4096);
    payload
        .push_sequence(4096, |outer| {
            for record in records {
                outer.push_sequence(1024, |inner| {
                    for (id, value) in record {
                        inner.push_uint16(*id)?;
                        inner.record_mut().push_bytes(value).map_err(payload::SdpPayloadError::from)?;
                    }
                    Ok(())
                })?;
            }
            Ok(())
        })
        .map_err(|_| SdpError::Truncated)?;
    let body = payload.record().as_written().to_vec();
    if body.len() > max_bytes as usize {
        let mut out = header(pdu::ERROR_RESPONSE, tid, 2);
        out.extend_from_slice(&0x0007u16.to_be_bytes()); // INSUFFICIENT_RESOURCES
        return Ok(out);
    }
    let mut byte_count = Vec::with_capacity(2 + body.len() + 1);
    byte_count.extend_from_slice(&(body.len() as u16).to_be_bytes());
    byte_count.extend_from_slice(&body);
    byte_count.push(0); // no continuation
    let mut out = header(
        pdu::SERVICE_SEARCH_ATTRIBUTE_RESPONSE,
        tid,
        byte_count.len() as u16,
    );
    out.extend_from_slice(&byte_count);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_search_single_round_decodes_handles() {
        let mut cmd = ServiceSearch::new(1, vec![Uuid::from_short(0x1101)], 10);
        cmd.request_bytes().unwrap();
        let mut body = Vec::new();
        body.extend_from_slice(&2u16.to_be_bytes()); // total
        body.extend_from_slice(&2u16.to_be_bytes()); // current
        body.extend_from_slice(&1u32.to_be_bytes());
        body.extend_from_slice(&2u32.to_be_bytes());
        body.push(0); // no continuation
        let mut event = header(pdu::SERVICE_SEARCH_RESPONSE, 1, body.len() as u16);
        event.extend_from_slice(&body);
        assert!(matches!(cmd.on_inbound(&event), Progress::Completed(Ok(()))));
        assert_eq!(cmd.handles, vec![1, 2]);
    }

    #[test]
    fn service_search_continuation_triggers_resend() {
        let mut cmd = ServiceSearch::new(1, vec![Uuid::from_short(0x1101)], 10);
        cmd.request_bytes().unwrap();
        let mut body = Vec::new();
        body.extend_from_slice(&2u16.to_be_bytes());
        body.extend_from_slice(&1u16.to_be_bytes());
        body.extend_from_slice(&1u32.to_be_bytes());
        body.push(2);
        body.extend_from_slice(&[0xAA, 0xBB]);
        let mut event = header(pdu::SERVICE_SEARCH_RESPONSE, 1, body.len() as u16);
        event.extend_from_slice(&body);
        assert!(matches!(cmd.on_inbound(&event), Progress::Resend));
        assert_eq!(cmd.continuation.0, vec![0xAA, 0xBB]);
        let resent = cmd.request_bytes().unwrap();
        assert_eq!(&resent[HEADER_SIZE..], {
            let mut expected = Payload::with_capacity(64);
            expected
                .push_sequence(32, |seq| seq.push_uuid(&Uuid::from_short(0x1101)))
                .unwrap();
            expected.record_mut().push_u16(10, crate::record::Endian::Big).unwrap();
            expected.push_continuation(&Continuation(vec![0xAA, 0xBB])).unwrap();
            expected.record().as_written()
        });
    }

    #[test]
    fn error_response_completes_with_status_byte() {
        let mut cmd = ServiceSearch::new(1, vec![Uuid::from_short(0x1101)], 10);
        cmd.request_bytes().unwrap();
        let body = [0x00u8, 0x0C];
        let mut event = header(pdu::ERROR_RESPONSE, 1, body.len() as u16);
        event.extend_from_slice(&body);
        match cmd.on_inbound(&event) {
            Progress::Completed(Err(Error {
                kind: ErrorKind::AsyncFailed { byte: 0x0C },
                ..
            })) => {}
            _ => panic!("expected async-failed"),
        }
    }

    #[test]
    fn attribute_list_decodes_id_value_pairs() {
        let mut payload = Payload::with_capacity(64);
        payload
            .push_sequence(64, |seq| {
                seq.push_uint16(0x0000)?;
                seq.push_uint32(0x0100)?;
                seq.push_uint16(0x0001)?;
                seq.push_text(b"svc")?;
                Ok(())
            })
            .unwrap();
        let bytes = payload.record().as_written().to_vec();
        let map = decode_attribute_list(&bytes);
        assert_eq!(map.len(), 2);
        assert!(map.contains_key(&0x0001));
    }

    #[test]
    fn oversized_response_yields_insufficient_resources() {
        let records = vec![vec![(0x0000u16, vec![0u8; 10])]];
        let out = build_service_search_attribute_response(1, &records, 2).unwrap();
        assert_eq!(out[0], pdu::ERROR_RESPONSE);
    }
}
