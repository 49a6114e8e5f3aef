//! MGMT command framing (C8): the kernel control channel's fixed 6-byte
//! header (opcode, adapter index, payload length, all little-endian)
//! followed by a command-specific payload.
//!
//! `MGMT_EV_CMD_STATUS` only ever terminates a command on its own when the
//! status is an error; a success status (`0`) instead leaves the command
//! pending for the later `MGMT_EV_CMD_COMPLETE` that carries the real
//! result — unless the command was built with
//! [`MgmtCommand::status_only`], for the handful of opcodes that never get
//! a `CMD_COMPLETE` at all. This mirrors the HCI framing's `Expect::None`
//! distinction in [`crate::hci`].
use crate::channel::{Command, Progress};
use crate::error::{Error, ErrorKind};

pub const MGMT_HDR_SIZE: usize = 6;
pub const MGMT_EV_CMD_COMPLETE: u16 = 0x0001;
pub const MGMT_EV_CMD_STATUS: u16 = 0x0002;

/// Adapter index meaning "the whole controller list", used by
/// index-agnostic commands like `Read Index List`.
pub const MGMT_INDEX_NONE: u16 = 0xFFFF;

/// Settings bitmask values returned by `Read Controller Information` and
/// accepted by the various `Set *` commands.
pub mod settings {
    pub const POWERED: u32 = 1 << 0;
    pub const CONNECTABLE: u32 = 1 << 1;
    pub const FAST_CONNECTABLE: u32 = 1 << 2;
    pub const DISCOVERABLE: u32 = 1 << 3;
    pub const BONDABLE: u32 = 1 << 4;
    pub const LINK_SECURITY: u32 = 1 << 5;
    pub const SSP: u32 = 1 << 6;
    pub const BREDR: u32 = 1 << 7;
    pub const HS: u32 = 1 << 8;
    pub const LE: u32 = 1 << 9;
    pub const ADVERTISING: u32 = 1 << 10;
    pub const SECURE_CONN: u32 = 1 << 11;
    pub const DEBUG_KEYS: u32 = 1 << 12;
    pub const PRIVACY: u32 = 1 << 13;
    pub const CONFIGURATION: u32 = 1 << 14;
    pub const STATIC_ADDRESS: u32 = 1 << 15;
}

pub mod opcode {
    pub const READ_VERSION: u16 = 0x0001;
    pub const READ_INDEX_LIST: u16 = 0x0003;
    pub const READ_INFO: u16 = 0x0004;
    pub const SET_POWERED: u16 = 0x0005;
    pub const SET_DISCOVERABLE: u16 = 0x0006;
    pub const SET_CONNECTABLE: u16 = 0x0007;
    pub const SET_BONDABLE: u16 = 0x0009;
    pub const SET_SSP: u16 = 0x000A;
    pub const SET_LE: u16 = 0x000D;
    pub const PAIR_DEVICE: u16 = 0x0019;
    pub const UNPAIR_DEVICE: u16 = 0x001A;
    pub const CANCEL_PAIR_DEVICE: u16 = 0x001B;
    pub const ADD_DEVICE: u16 = 0x001F;
    pub const REMOVE_DEVICE: u16 = 0x0020;
    pub const LOAD_LINK_KEYS: u16 = 0x0012;
    pub const LOAD_LONG_TERM_KEYS: u16 = 0x0013;
    pub const SET_ADVERTISING: u16 = 0x0029;
    pub const START_DISCOVERY: u16 = 0x0023;
    pub const STOP_DISCOVERY: u16 = 0x0024;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum MgmtError {
    Truncated,
    NotAnEvent,
}

pub type Result<T> = std::result::Result<T, MgmtError>;

pub struct MgmtCommand {
    opcode: u16,
    adapter_index: u16,
    payload: Vec<u8>,
    sent: bool,
    /// Whether a success `CMD_STATUS` still leaves this command waiting on
    /// `CMD_COMPLETE`, or is itself the whole answer.
    expects_complete: bool,
    pub status: u8,
    pub response: Vec<u8>,
}

impl MgmtCommand {
    /// Builds a command that waits for `MGMT_EV_CMD_COMPLETE` after a
    /// success `CMD_STATUS` — the common case, and the only safe default
    /// for anything that returns data or takes more than one step
    /// (`PAIR_DEVICE` and friends).
    pub fn new(opcode: u16, adapter_index: u16, payload: Vec<u8>) -> Self {
        Self::with_expectation(opcode, adapter_index, payload, true)
    }

    /// Builds a command whose `MGMT_EV_CMD_STATUS` is itself terminal on
    /// success, for the opcodes that never get a following `CMD_COMPLETE`.
    pub fn status_only(opcode: u16, adapter_index: u16, payload: Vec<u8>) -> Self {
        Self::with_expectation(opcode, adapter_index, payload, false)
    }

    fn with_expectation(
        opcode: u16,
        adapter_index: u16,
        payload: Vec<u8>,
        expects_complete: bool,
    ) -> Self {
        Self {
            opcode,
            adapter_index,
            payload,
            sent: false,
            expects_complete,
            status: 0,
            response: Vec::new(),
        }
    }

    fn header(event_bytes: &[u8]) -> Option<(u16, u16, u16)> {
        if event_bytes.len() < MGMT_HDR_SIZE {
            return None;
        }
        let ev = u16::from_le_bytes([event_bytes[0], event_bytes[1]]);
        let index = u16::from_le_bytes([event_bytes[2], event_bytes[3]]);
        let len = u16::from_le_bytes([event_bytes[4], event_bytes[5]]);
        Some((ev, index, len))
    }
}

impl Command for MgmtCommand {
    fn request_bytes(&mut self) -> std::result::Result<Vec<u8>, Error> {
        if self.sent {
            return Err(Error::new(ErrorKind::BadRequest));
        }
        self.sent = true;
        let mut out = Vec::with_capacity(MGMT_HDR_SIZE + self.payload.len());
        out.extend_from_slice(&self.opcode.to_le_bytes());
        out.extend_from_slice(&self.adapter_index.to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    fn on_inbound(&mut self, bytes: &[u8]) -> Progress {
        let Some((ev, _index, len)) = Self::header(bytes) else {
            return Progress::NotMine;
        };
        let body = &bytes[MGMT_HDR_SIZE..];

        if ev == MGMT_EV_CMD_STATUS {
            if body.len() < 3 {
                return Progress::NotMine;
            }
            let opcode = u16::from_le_bytes([body[0], body[1]]);
            if opcode != self.opcode {
                return Progress::NotMine;
            }
            self.status = body[2];
            if self.status != 0 {
                return Progress::Completed(complete_result(self.status));
            }
            if self.expects_complete {
                return Progress::InProgress;
            }
            return Progress::Completed(Ok(()));
        }

        if ev == MGMT_EV_CMD_COMPLETE {
            if body.len() < 3 {
                return Progress::NotMine;
            }
            let opcode = u16::from_le_bytes([body[0], body[1]]);
            if opcode != self.opcode {
                return Progress::NotMine;
            }
            self.status = body[2];
            let payload_len = (len as usize).saturating_sub(3);
            let available = body.len().saturating_sub(3).min(payload_len);
            self.response = body[3..3 + available].to_vec();
            return Progress::Completed(complete_result(self.status));
        }

        Progress::NotMine
    }
}

fn complete_result(status: u8) -> std::result::Result<(), Error> {
    if status == 0 {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::AsyncFailed { byte: status }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: u16, index: u16, opcode: u16, status: u8, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&index.to_le_bytes());
        out.extend_from_slice(&((3 + data.len()) as u16).to_le_bytes());
        out.extend_from_slice(&opcode.to_le_bytes());
        out.push(status);
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn request_bytes_encode_header_little_endian() {
        let mut cmd = MgmtCommand::new(opcode::SET_POWERED, 0, vec![0x01]);
        let bytes = cmd.request_bytes().unwrap();
        assert_eq!(&bytes[0..2], &opcode::SET_POWERED.to_le_bytes());
        assert_eq!(&bytes[2..4], &0u16.to_le_bytes());
        assert_eq!(&bytes[4..6], &1u16.to_le_bytes());
        assert_eq!(&bytes[6..], &[0x01]);
    }

    #[test]
    fn cmd_status_alone_completes_for_status_only_command() {
        let mut cmd = MgmtCommand::status_only(opcode::SET_POWERED, 0, vec![0x01]);
        cmd.request_bytes().unwrap();
        let ev = event(MGMT_EV_CMD_STATUS, 0, opcode::SET_POWERED, 0, &[]);
        assert!(matches!(cmd.on_inbound(&ev), Progress::Completed(Ok(()))));
    }

    #[test]
    fn cmd_status_success_stays_pending_for_cmd_complete() {
        let mut cmd = MgmtCommand::new(opcode::PAIR_DEVICE, 0, vec![]);
        cmd.request_bytes().unwrap();
        let status_ev = event(MGMT_EV_CMD_STATUS, 0, opcode::PAIR_DEVICE, 0, &[]);
        assert!(matches!(cmd.on_inbound(&status_ev), Progress::InProgress));
        let complete_ev = event(MGMT_EV_CMD_COMPLETE, 0, opcode::PAIR_DEVICE, 0, &[]);
        assert!(matches!(cmd.on_inbound(&complete_ev), Progress::Completed(Ok(()))));
    }

    #[test]
    fn cmd_complete_carries_response_payload() {
        let mut cmd = MgmtCommand::new(opcode::READ_INFO, 0, vec![]);
        cmd.request_bytes().unwrap();
        let ev = event(MGMT_EV_CMD_COMPLETE, 0, opcode::READ_INFO, 0, &[0xAA, 0xBB]);
        assert!(matches!(cmd.on_inbound(&ev), Progress::Completed(Ok(()))));
        assert_eq!(cmd.response, vec![0xAA, 0xBB]);
    }

    #[test]
    fn nonzero_status_fails_with_byte() {
        let mut cmd = MgmtCommand::new(opcode::PAIR_DEVICE, 0, vec![]);
        cmd.request_bytes().unwrap();
        let ev = event(MGMT_EV_CMD_STATUS, 0, opcode::PAIR_DEVICE, 0x04, &[]);
        match cmd.on_inbound(&ev) {
            Progress::Completed(Err(Error {
                kind: ErrorKind::AsyncFailed { byte: 0x04 },
                ..
            })) => {}
            _ => panic!("expected async-failed"),
        }
    }

    #[test]
    fn mismatched_opcode_is_not_mine() {
        let mut cmd = MgmtCommand::new(opcode::SET_POWERED, 0, vec![0x01]);
        cmd.request_bytes().unwrap();
        let ev = event(MGMT_EV_CMD_STATUS, 0, opcode::SET_BONDABLE, 0, &[]);
        assert!(matches!(cmd.on_inbound(&ev), Progress::NotMine));
    }
}
