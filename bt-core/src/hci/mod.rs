//! HCI command framing (C7).
//!
//! An HCI command is identified by a 16-bit opcode packed as `OGF:OCF`.
//! Response matching follows `spec.md` §4.6's four-step order: a matching
//! `EVT_CMD_STATUS`, a matching `EVT_CMD_COMPLETE`, a matching
//! `EVT_LE_META_EVENT` subevent, or a raw event-code match.
use crate::channel::{Command, Progress};
use crate::error::{Error, ErrorKind};

pub const HCI_COMMAND_PKT: u8 = 0x01;
pub const HCI_EVENT_PKT: u8 = 0x04;

pub const EVT_CMD_COMPLETE: u8 = 0x0E;
pub const EVT_CMD_STATUS: u8 = 0x0F;
pub const EVT_LE_META_EVENT: u8 = 0x3E;

/// Link control + host controller/baseband OGFs used by the scan state
/// machine (C13).
pub mod ogf {
    pub const LINK_CTL: u8 = 0x01;
    pub const LE_CTL: u8 = 0x08;
}

/// Concrete opcodes used to drive the scan state machine (C13).
pub mod opcode {
    use super::Opcode;
    pub const INQUIRY: Opcode = Opcode::new(super::ogf::LINK_CTL, 0x0001);
    pub const INQUIRY_CANCEL: Opcode = Opcode::new(super::ogf::LINK_CTL, 0x0002);
    pub const LE_SET_SCAN_PARAMETERS: Opcode = Opcode::new(super::ogf::LE_CTL, 0x000B);
    pub const LE_SET_SCAN_ENABLE: Opcode = Opcode::new(super::ogf::LE_CTL, 0x000C);
    pub const LE_SET_ADVERTISING_PARAMETERS: Opcode = Opcode::new(super::ogf::LE_CTL, 0x0006);
    pub const LE_SET_ADVERTISE_ENABLE: Opcode = Opcode::new(super::ogf::LE_CTL, 0x000A);
}

/// Event codes the scan state machine matches as "the response event" for
/// commands that report asynchronously (e.g. inquiry completion).
pub mod event {
    pub const EVT_INQUIRY_COMPLETE: u8 = 0x01;
    pub const EVT_INQUIRY_RESULT: u8 = 0x02;
    pub const EVT_LE_ADVERTISING_REPORT_SUBEVENT: u8 = 0x02;
    pub const EVT_INQUIRY_RESULT_WITH_RSSI: u8 = 0x22;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Opcode(pub u16);

impl Opcode {
    pub const fn new(ogf: u8, ocf: u16) -> Self {
        Self(((ogf as u16) << 10) | (ocf & 0x03FF))
    }

    pub fn ogf(&self) -> u8 {
        (self.0 >> 10) as u8
    }

    pub fn ocf(&self) -> u16 {
        self.0 & 0x03FF
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum HciError {
    Truncated,
    NotAnEvent,
}

pub type Result<T> = std::result::Result<T, HciError>;

/// What (if anything) besides `EVT_CMD_COMPLETE` completes this command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Expect {
    /// No specific response event: `EVT_CMD_STATUS` with status 0 alone
    /// completes the command.
    None,
    /// A raw HCI event code.
    Event(u8),
    /// An `EVT_LE_META_EVENT` subevent code.
    LeMetaSubevent(u8),
}

pub struct HciCommand {
    opcode: Opcode,
    payload: Vec<u8>,
    expect: Expect,
    sent: bool,
    pub response: Vec<u8>,
}

impl HciCommand {
    pub fn new(opcode: Opcode, payload: Vec<u8>, expect: Expect) -> Self {
        Self {
            opcode,
            payload,
            expect,
            sent: false,
            response: Vec::new(),
        }
    }

    fn matches_opcode(bytes: &[u8]) -> Option<Opcode> {
        if bytes.len() < 2 {
            return None;
        }
        Some(Opcode(u16::from_le_bytes([bytes[0], bytes[1]])))
    }
}

impl Command for HciCommand {
    fn request_bytes(&mut self) -> std::result::Result<Vec<u8>, Error> {
        if self.sent && matches!(self.expect, Expect::None) {
            return Err(Error::new(ErrorKind::BadRequest));
        }
        self.sent = true;
        let mut out = Vec::with_capacity(4 + self.payload.len());
        out.push(HCI_COMMAND_PKT);
        out.extend_from_slice(&self.opcode.0.to_le_bytes());
        out.push(self.payload.len() as u8);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    fn on_inbound(&mut self, bytes: &[u8]) -> Progress {
        if bytes.len() < 2 || bytes[0] != HCI_EVENT_PKT {
            return Progress::NotMine;
        }
        let evt = bytes[1];
        let plen = *bytes.get(2).unwrap_or(&0) as usize;
        let params = match bytes.get(3..3 + plen) {
            Some(p) => p,
            None => return Progress::NotMine,
        };

        if evt == EVT_CMD_STATUS {
            if params.len() < 4 {
                return Progress::NotMine;
            }
            let status = params[0];
            let opcode = Self::matches_opcode(&params[2..4]);
            if opcode != Some(self.opcode) {
                return Progress::NotMine;
            }
            if status != 0 {
                return Progress::Completed(Err(Error::new(ErrorKind::AsyncFailed { byte: status })));
            }
            return match self.expect {
                Expect::None => Progress::Completed(Ok(())),
                _ => Progress::InProgress,
            };
        }

        if evt == EVT_CMD_COMPLETE {
            if params.len() < 3 {
                return Progress::NotMine;
            }
            let opcode = Self::matches_opcode(&params[1..3]);
            if opcode != Some(self.opcode) {
                return Progress::NotMine;
            }
            self.response = params[3..].to_vec();
            return Progress::Completed(Ok(()));
        }

        if evt == EVT_LE_META_EVENT {
            if let Expect::LeMetaSubevent(code) = self.expect {
                if params.first() == Some(&code) {
                    self.response = params[1..].to_vec();
                    return Progress::Completed(Ok(()));
                }
            }
            return Progress::NotMine;
        }

        if let Expect::Event(code) = self.expect {
            if evt == code {
                self.response = params.to_vec();
                return Progress::Completed(Ok(()));
            }
        }

        Progress::NotMine
    }
}

/// Splits a raw event packet into `(event_code, params)`, used by the HCI
/// raw-socket filter's notification path for unsolicited events (scan
/// reports, inquiry results) that never pass through [`HciCommand`].
pub fn split_event(bytes: &[u8]) -> Result<(u8, &[u8])> {
    if bytes.len() < 3 || bytes[0] != HCI_EVENT_PKT {
        return Err(HciError::NotAnEvent);
    }
    let plen = bytes[2] as usize;
    let params = bytes.get(3..3 + plen).ok_or(HciError::Truncated)?;
    Ok((bytes[1], params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_packs_ogf_and_ocf() {
        let op = Opcode::new(0x08, 0x000C);
        assert_eq!(op.ogf(), 0x08);
        assert_eq!(op.ocf(), 0x000C);
    }

    #[test]
    fn cmd_status_with_no_declared_response_completes() {
        let mut cmd = HciCommand::new(opcode::INQUIRY_CANCEL, vec![], Expect::None);
        cmd.request_bytes().unwrap();
        let op = opcode::INQUIRY_CANCEL.0.to_le_bytes();
        let event = [HCI_EVENT_PKT, EVT_CMD_STATUS, 0x04, 0x00, 0x01, op[0], op[1]];
        match cmd.on_inbound(&event) {
            Progress::Completed(Ok(())) => {}
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn cmd_status_with_declared_response_stays_pending() {
        let mut cmd = HciCommand::new(
            opcode::INQUIRY,
            vec![],
            Expect::Event(crate::hci::event::EVT_INQUIRY_COMPLETE),
        );
        cmd.request_bytes().unwrap();
        let op = opcode::INQUIRY.0.to_le_bytes();
        let event = [HCI_EVENT_PKT, EVT_CMD_STATUS, 0x04, 0x00, 0x01, op[0], op[1]];
        match cmd.on_inbound(&event) {
            Progress::InProgress => {}
            _ => panic!("expected in-progress"),
        }
        let complete = [HCI_EVENT_PKT, crate::hci::event::EVT_INQUIRY_COMPLETE, 0x01, 0x00];
        match cmd.on_inbound(&complete) {
            Progress::Completed(Ok(())) => {}
            _ => panic!("expected completion on declared response event"),
        }
    }

    #[test]
    fn cmd_status_failure_status_fails_with_byte() {
        let mut cmd = HciCommand::new(opcode::INQUIRY_CANCEL, vec![], Expect::None);
        cmd.request_bytes().unwrap();
        let op = opcode::INQUIRY_CANCEL.0.to_le_bytes();
        let event = [HCI_EVENT_PKT, EVT_CMD_STATUS, 0x04, 0x0C, 0x01, op[0], op[1]];
        match cmd.on_inbound(&event) {
            Progress::Completed(Err(Error {
                kind: ErrorKind::AsyncFailed { byte: 0x0C },
                ..
            })) => {}
            _ => panic!("expected async-failed"),
        }
    }

    #[test]
    fn unrelated_event_never_completes_command() {
        let mut cmd = HciCommand::new(
            opcode::INQUIRY,
            vec![],
            Expect::Event(crate::hci::event::EVT_INQUIRY_COMPLETE),
        );
        cmd.request_bytes().unwrap();
        let unrelated = [HCI_EVENT_PKT, 0x05, 0x00];
        assert!(matches!(cmd.on_inbound(&unrelated), Progress::NotMine));
    }
}
