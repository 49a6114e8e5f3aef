//! ATT/GATT command framing (C10).
//!
//! Three request shapes share the range-walking contract of §4.8: a
//! [`RangeWalk`] command carries a `start..=end` frame and keeps re-issuing
//! itself at `last_handle + 1` until the walk reaches `end` or the peer
//! replies `ATTRIBUTE_NOT_FOUND`. [`ReadChain`] does the equivalent for
//! `READ`/`READ_BLOB`, chaining on MTU-sized responses. [`Write`] and
//! [`MtuNegotiation`] are one-shot.
use crate::channel::{Command, Progress};
use crate::error::{Error, ErrorKind};
use crate::uuid::Uuid;

pub mod opcode {
    pub const ERROR_RESP: u8 = 0x01;
    pub const MTU_REQ: u8 = 0x02;
    pub const MTU_RESP: u8 = 0x03;
    pub const FIND_INFO_REQ: u8 = 0x04;
    pub const FIND_INFO_RESP: u8 = 0x05;
    pub const FIND_BY_TYPE_VALUE_REQ: u8 = 0x06;
    pub const FIND_BY_TYPE_VALUE_RESP: u8 = 0x07;
    pub const READ_BY_TYPE_REQ: u8 = 0x08;
    pub const READ_BY_TYPE_RESP: u8 = 0x09;
    pub const READ_REQ: u8 = 0x0A;
    pub const READ_RESP: u8 = 0x0B;
    pub const READ_BLOB_REQ: u8 = 0x0C;
    pub const READ_BLOB_RESP: u8 = 0x0D;
    pub const READ_BY_GROUP_TYPE_REQ: u8 = 0x10;
    pub const READ_BY_GROUP_TYPE_RESP: u8 = 0x11;
    pub const WRITE_REQ: u8 = 0x12;
    pub const WRITE_RESP: u8 = 0x13;
    pub const HANDLE_VALUE_NOTIFICATION: u8 = 0x1B;
}

pub const ATTRIBUTE_NOT_FOUND: u8 = 0x0A;

#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum AttError {
    Truncated,
}

pub type Result<T> = std::result::Result<T, AttError>;

fn push_uuid_le(out: &mut Vec<u8>, uuid: &Uuid) {
    if uuid.has_short() {
        out.extend_from_slice(&uuid.short().to_le_bytes());
    } else {
        let mut bytes = *uuid.as_bytes();
        bytes.reverse();
        out.extend_from_slice(&bytes);
    }
}

/// One entry of a range-walked response: the attribute handle, an
/// optional group-end handle (`READ_BY_GROUP_TYPE_RESP` only), and the
/// entry's value bytes.
#[derive(Clone, Debug)]
pub struct Entry {
    pub handle: u16,
    pub group_end: u16,
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RangeOp {
    FindInformation,
    FindByType { value: Vec<u8> },
    ReadByType,
    ReadByGroupType,
}

impl RangeOp {
    fn request_opcode(&self) -> u8 {
        match self {
            RangeOp::FindInformation => opcode::FIND_INFO_REQ,
            RangeOp::FindByType { .. } => opcode::FIND_BY_TYPE_VALUE_REQ,
            RangeOp::ReadByType => opcode::READ_BY_TYPE_REQ,
            RangeOp::ReadByGroupType => opcode::READ_BY_GROUP_TYPE_REQ,
        }
    }

    fn response_opcode(&self) -> u8 {
        match self {
            RangeOp::FindInformation => opcode::FIND_INFO_RESP,
            RangeOp::FindByType { .. } => opcode::FIND_BY_TYPE_VALUE_RESP,
            RangeOp::ReadByType => opcode::READ_BY_TYPE_RESP,
            RangeOp::ReadByGroupType => opcode::READ_BY_GROUP_TYPE_RESP,
        }
    }
}

pub struct RangeWalk {
    op: RangeOp,
    type_uuid: Option<Uuid>,
    cursor: u16,
    end: u16,
    pub entries: Vec<Entry>,
}

impl RangeWalk {
    pub fn new(op: RangeOp, start: u16, end: u16, type_uuid: Option<Uuid>) -> Self {
        Self {
            op,
            type_uuid,
            cursor: start,
            end,
            entries: Vec::new(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.op.request_opcode()];
        out.extend_from_slice(&self.cursor.to_le_bytes());
        out.extend_from_slice(&self.end.to_le_bytes());
        if let Some(uuid) = &self.type_uuid {
            push_uuid_le(&mut out, uuid);
        }
        if let RangeOp::FindByType { value } = &self.op {
            out.extend_from_slice(value);
        }
        out
    }
}

impl Command for RangeWalk {
    fn request_bytes(&mut self) -> std::result::Result<Vec<u8>, Error> {
        if self.cursor > self.end {
            return Err(Error::new(ErrorKind::BadRequest));
        }
        Ok(self.encode())
    }

    fn on_inbound(&mut self, bytes: &[u8]) -> Progress {
        if bytes.is_empty() {
            return Progress::NotMine;
        }
        let op = bytes[0];

        if op == opcode::ERROR_RESP {
            if bytes.len() < 5 {
                return Progress::NotMine;
            }
            let ecode = bytes[4];
            if ecode == ATTRIBUTE_NOT_FOUND && self.end != 0 && !self.entries.is_empty() {
                return Progress::Completed(Ok(()));
            }
            return Progress::Completed(Err(Error::new(ErrorKind::AsyncFailed { byte: ecode })));
        }

        if op != self.op.response_opcode() {
            return Progress::NotMine;
        }
        if bytes.len() < 2 {
            return Progress::Completed(Err(Error::new(ErrorKind::General(crate::error::Internal::Att(
                AttError::Truncated,
            )))));
        }

        let mut last = 0u16;
        match &self.op {
            RangeOp::ReadByGroupType => {
                let stride = bytes[1] as usize;
                if stride < 4 {
                    return Progress::Completed(Err(Error::new(ErrorKind::BadRequest)));
                }
                let entries = (bytes.len().saturating_sub(2)) / stride;
                for i in 0..entries {
                    let off = 2 + i * stride;
                    let handle = u16::from_le_bytes([bytes[off], bytes[off + 1]]);
                    let group_end = u16::from_le_bytes([bytes[off + 2], bytes[off + 3]]);
                    let value = bytes[off + 4..off + stride].to_vec();
                    last = last.max(group_end);
                    self.entries.push(Entry { handle, group_end, value });
                }
            }
            RangeOp::FindByType { .. } => {
                // Reproduces the reference parser's indexing: entries are
                // fixed 4-byte (handle, group-end) pairs, but the offset
                // stride is taken from `bytes[1]` exactly as upstream does.
                let stride = bytes[1] as usize;
                let entries = (bytes.len().saturating_sub(1)) / 4;
                for i in 0..entries {
                    let off = 2 + i * stride.max(1);
                    if off + 4 > bytes.len() {
                        break;
                    }
                    let handle = u16::from_le_bytes([bytes[off], bytes[off + 1]]);
                    let group_end = u16::from_le_bytes([bytes[off + 2], bytes[off + 3]]);
                    last = last.max(group_end);
                    self.entries.push(Entry {
                        handle,
                        group_end,
                        value: Vec::new(),
                    });
                }
            }
            RangeOp::ReadByType => {
                let stride = bytes[1] as usize;
                if stride < 3 {
                    return Progress::Completed(Err(Error::new(ErrorKind::BadRequest)));
                }
                let entries = (bytes.len().saturating_sub(2)) / stride;
                for i in 0..entries {
                    let off = 2 + i * stride;
                    let handle = u16::from_le_bytes([bytes[off], bytes[off + 1]]);
                    let value = bytes[off + 2..off + stride].to_vec();
                    last = last.max(handle);
                    self.entries.push(Entry {
                        handle,
                        group_end: 0,
                        value,
                    });
                }
            }
            RangeOp::FindInformation => {
                let format = bytes[1];
                if format != 1 && format != 2 {
                    return Progress::Completed(Err(Error::new(ErrorKind::BadRequest)));
                }
                let step = if format == 1 { 2 } else { 16 };
                let entry_width = 2 + step;
                let entries = (bytes.len().saturating_sub(2)) / entry_width;
                for i in 0..entries {
                    let off = 2 + i * entry_width;
                    let handle = u16::from_le_bytes([bytes[off], bytes[off + 1]]);
                    let value = bytes[off + 2..off + entry_width].to_vec();
                    last = last.max(handle);
                    self.entries.push(Entry {
                        handle,
                        group_end: 0,
                        value,
                    });
                }
            }
        }

        if last >= self.end || last == 0 {
            Progress::Completed(Ok(()))
        } else {
            self.cursor = last + 1;
            Progress::Resend
        }
    }
}

pub struct ReadChain {
    handle: u16,
    mtu: usize,
    offset: usize,
    pub value: Vec<u8>,
}

impl ReadChain {
    pub fn new(handle: u16, mtu: usize) -> Self {
        Self {
            handle,
            mtu,
            offset: 0,
            value: Vec::new(),
        }
    }
}

impl Command for ReadChain {
    fn request_bytes(&mut self) -> std::result::Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        if self.offset == 0 {
            out.push(opcode::READ_REQ);
            out.extend_from_slice(&self.handle.to_le_bytes());
        } else {
            out.push(opcode::READ_BLOB_REQ);
            out.extend_from_slice(&self.handle.to_le_bytes());
            out.extend_from_slice(&(self.offset as u16).to_le_bytes());
        }
        Ok(out)
    }

    fn on_inbound(&mut self, bytes: &[u8]) -> Progress {
        if bytes.is_empty() {
            return Progress::NotMine;
        }
        let op = bytes[0];
        if op == opcode::ERROR_RESP {
            if bytes.len() < 5 {
                return Progress::NotMine;
            }
            return Progress::Completed(Err(Error::new(ErrorKind::AsyncFailed { byte: bytes[4] })));
        }
        let expected = if self.offset == 0 {
            opcode::READ_RESP
        } else {
            opcode::READ_BLOB_RESP
        };
        if op != expected {
            return Progress::NotMine;
        }
        self.value.extend_from_slice(&bytes[1..]);
        self.offset = self.value.len();
        if bytes.len() == self.mtu {
            Progress::Resend
        } else {
            Progress::Completed(Ok(()))
        }
    }
}

pub struct Write {
    handle: u16,
    value: Vec<u8>,
    sent: bool,
}

impl Write {
    pub fn new(handle: u16, value: Vec<u8>) -> Self {
        Self {
            handle,
            value,
            sent: false,
        }
    }
}

impl Command for Write {
    fn request_bytes(&mut self) -> std::result::Result<Vec<u8>, Error> {
        if self.sent {
            return Err(Error::new(ErrorKind::BadRequest));
        }
        self.sent = true;
        let mut out = vec![opcode::WRITE_REQ];
        out.extend_from_slice(&self.handle.to_le_bytes());
        out.extend_from_slice(&self.value);
        Ok(out)
    }

    fn on_inbound(&mut self, bytes: &[u8]) -> Progress {
        match bytes.first() {
            Some(&op) if op == opcode::WRITE_RESP => Progress::Completed(Ok(())),
            Some(&op) if op == opcode::ERROR_RESP && bytes.len() >= 5 => {
                Progress::Completed(Err(Error::new(ErrorKind::AsyncFailed { byte: bytes[4] })))
            }
            _ => Progress::NotMine,
        }
    }
}

pub struct MtuNegotiation {
    client_mtu: u16,
    sent: bool,
    pub negotiated: u16,
}

impl MtuNegotiation {
    pub fn new(client_mtu: u16) -> Self {
        Self {
            client_mtu,
            sent: false,
            negotiated: 0,
        }
    }
}

impl Command for MtuNegotiation {
    fn request_bytes(&mut self) -> std::result::Result<Vec<u8>, Error> {
        if self.sent {
            return Err(Error::new(ErrorKind::BadRequest));
        }
        self.sent = true;
        let mut out = vec![opcode::MTU_REQ];
        out.extend_from_slice(&self.client_mtu.to_le_bytes());
        Ok(out)
    }

    fn on_inbound(&mut self, bytes: &[u8]) -> Progress {
        if bytes.len() >= 3 && bytes[0] == opcode::MTU_RESP {
            let server_mtu = u16::from_le_bytes([bytes[1], bytes[2]]);
            self.negotiated = self.client_mtu.min(server_mtu);
            return Progress::Completed(Ok(()));
        }
        if bytes.len() >= 5 && bytes[0] == opcode::ERROR_RESP {
            return Progress::Completed(Err(Error::new(ErrorKind::AsyncFailed { byte: bytes[4] })));
        }
        Progress::NotMine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_by_group_type_walks_until_end_reached() {
        let mut cmd = RangeWalk::new(RangeOp::ReadByGroupType, 1, 0xFFFF, Some(Uuid::from_short(0x2800)));
        cmd.request_bytes().unwrap();
        let mut resp = vec![opcode::READ_BY_GROUP_TYPE_RESP, 6];
        resp.extend_from_slice(&1u16.to_le_bytes());
        resp.extend_from_slice(&5u16.to_le_bytes());
        resp.extend_from_slice(&0x1800u16.to_le_bytes());
        match cmd.on_inbound(&resp) {
            Progress::Resend => {}
            _ => panic!("expected resend, walk not complete"),
        }
        assert_eq!(cmd.entries.len(), 1);
        assert_eq!(cmd.entries[0].handle, 1);
        assert_eq!(cmd.entries[0].group_end, 5);
    }

    #[test]
    fn attribute_not_found_with_prior_entries_terminates_cleanly() {
        let mut cmd = RangeWalk::new(RangeOp::ReadByGroupType, 6, 0xFFFF, Some(Uuid::from_short(0x2800)));
        cmd.entries.push(Entry {
            handle: 1,
            group_end: 5,
            value: vec![],
        });
        let err = [opcode::ERROR_RESP, opcode::READ_BY_GROUP_TYPE_REQ, 0, 0, ATTRIBUTE_NOT_FOUND];
        assert!(matches!(cmd.on_inbound(&err), Progress::Completed(Ok(()))));
    }

    #[test]
    fn read_chain_resends_on_mtu_sized_response() {
        let mut cmd = ReadChain::new(0x10, 23);
        cmd.request_bytes().unwrap();
        let mut resp = vec![opcode::READ_RESP];
        resp.extend(std::iter::repeat(0xAA).take(22));
        assert!(matches!(cmd.on_inbound(&resp), Progress::Resend));
        assert_eq!(cmd.value.len(), 22);
        let next = cmd.request_bytes().unwrap();
        assert_eq!(next[0], opcode::READ_BLOB_REQ);
    }

    #[test]
    fn read_chain_completes_on_short_response() {
        let mut cmd = ReadChain::new(0x10, 23);
        cmd.request_bytes().unwrap();
        let resp = [opcode::READ_RESP, 0x01, 0x02];
        assert!(matches!(cmd.on_inbound(&resp), Progress::Completed(Ok(()))));
        assert_eq!(cmd.value, vec![0x01, 0x02]);
    }

    #[test]
    fn mtu_negotiation_takes_the_minimum() {
        let mut cmd = MtuNegotiation::new(512);
        cmd.request_bytes().unwrap();
        let resp = [opcode::MTU_RESP, 23, 0];
        assert!(matches!(cmd.on_inbound(&resp), Progress::Completed(Ok(()))));
        assert_eq!(cmd.negotiated, 23);
    }
}
