//! HCI scan state machine (C13).
//!
//! State is a bitmask shared across tasks, guarded by a lock/notify pair
//! standing in for the condition-variable the state machine is specified
//! against. Every low-level HCI command issued here goes through [C6's
//! `Channel`](crate::channel::Channel) with the 2-second HCI timeout.
use crate::addr::Address;
use crate::channel::{Channel, NotificationHandler};
use crate::error::{Error, ErrorKind};
use crate::hci::{self, Expect, HciCommand};
use crate::record::{Endian, Record};
use bt_shared::event::{Event, SubscriptionReq};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::instrument;

pub const HCI_COMMAND_TIMEOUT: Duration = Duration::from_millis(2000);

pub mod flag {
    pub const INQUIRING: u8 = 1 << 0;
    pub const SCANNING: u8 = 1 << 1;
    pub const DISCOVERING: u8 = 1 << 2;
    pub const ADVERTISING: u8 = 1 << 3;
    pub const ABORT_INQUIRING: u8 = 1 << 4;
    pub const ABORT_SCANNING: u8 = 1 << 5;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum ScanError {
    /// Requested transition is not allowed from the current bitmask.
    IllegalState,
}

struct State {
    bits: Mutex<u8>,
    notify: Notify,
}

impl State {
    fn new() -> Self {
        Self {
            bits: Mutex::new(0),
            notify: Notify::new(),
        }
    }

    async fn set(&self, mask: u8) {
        *self.bits.lock().await |= mask;
    }

    async fn clear(&self, mask: u8) {
        *self.bits.lock().await &= !mask;
        self.notify.notify_waiters();
    }

    async fn bits(&self) -> u8 {
        *self.bits.lock().await
    }
}

/// One BR/EDR inquiry result or LE advertising report, published as it
/// arrives rather than batched behind `inquiry`/`scan`'s return.
#[derive(Clone, Debug)]
pub struct DeviceReport {
    pub address: Address,
    pub rssi: Option<i8>,
}

/// Marker type for [`bt_shared::event::Event`]'s pub/sub fan-out of
/// [`DeviceReport`]s to however many subscribers are listening.
pub struct ScanEvents;

impl Event for ScanEvents {
    type EventItem = DeviceReport;
}

struct ReportHandler {
    tx: mpsc::Sender<DeviceReport>,
}

impl NotificationHandler for ReportHandler {
    fn on_notification(&self, bytes: &[u8]) {
        for report in parse_reports(bytes) {
            let _ = self.tx.try_send(report);
        }
    }
}

/// Decodes `EVT_INQUIRY_RESULT`/`EVT_INQUIRY_RESULT_WITH_RSSI` payloads:
/// a response count followed by fixed 14-byte entries (bdaddr, scan/class
/// fields, clock offset, and for the RSSI variant a trailing signed byte
/// in place of `pscan_mode`).
fn parse_reports(bytes: &[u8]) -> Vec<DeviceReport> {
    if bytes.len() < 3 || bytes[0] != hci::HCI_EVENT_PKT {
        return Vec::new();
    }
    let evt = bytes[1];
    let with_rssi = match evt {
        hci::event::EVT_INQUIRY_RESULT => false,
        hci::event::EVT_INQUIRY_RESULT_WITH_RSSI => true,
        _ => return Vec::new(),
    };
    let plen = bytes[2] as usize;
    let Some(params) = bytes.get(3..3 + plen) else {
        return Vec::new();
    };
    let Some(&count) = params.first() else {
        return Vec::new();
    };
    const ENTRY_LEN: usize = 14;
    let entries = &params[1..];
    (0..count as usize)
        .filter_map(|i| entries.get(i * ENTRY_LEN..(i + 1) * ENTRY_LEN))
        .map(|entry| {
            let mut addr = [0u8; 6];
            addr.copy_from_slice(&entry[0..6]);
            let rssi = if with_rssi { Some(entry[13] as i8) } else { None };
            DeviceReport {
                address: Address::new(addr),
                rssi,
            }
        })
        .collect()
}

/// Drives the HCI inquiry/scan/discovery/advertising state machine over a
/// single [`Channel`].
pub struct ScanController<S> {
    channel: Channel<S>,
    state: Arc<State>,
}

impl<S: crate::channel::Socket> ScanController<S> {
    pub fn new(channel: Channel<S>) -> Self {
        Self {
            channel,
            state: Arc::new(State::new()),
        }
    }

    /// Builds a controller whose channel forwards unsolicited inquiry/LE
    /// advertising reports to subscribers of the returned sender, instead
    /// of dropping them as [`Channel::new`] would.
    pub fn with_device_reports(socket: S) -> (Self, mpsc::Sender<SubscriptionReq<DeviceReport>>) {
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (sub_tx, sub_rx) = mpsc::channel(8);
        let _ = ScanEvents::handle_events(msg_rx, sub_rx);
        let channel = Channel::with_notification_handler(socket, ReportHandler { tx: msg_tx });
        (
            Self {
                channel,
                state: Arc::new(State::new()),
            },
            sub_tx,
        )
    }

    pub async fn bits(&self) -> u8 {
        self.state.bits().await
    }

    pub fn abort_inquiry(&self) {
        let state = self.state.clone();
        tokio::spawn(async move {
            state.set(flag::ABORT_INQUIRING).await;
            state.notify.notify_waiters();
        });
    }

    pub fn abort_scan(&self) {
        let state = self.state.clone();
        tokio::spawn(async move {
            state.set(flag::ABORT_SCANNING).await;
            state.notify.notify_waiters();
        });
    }

    async fn run_hci(&self, command: HciCommand) -> Result<(), Error> {
        self.channel
            .execute(HCI_COMMAND_TIMEOUT, command)
            .await
            .map(|_| ())
    }

    /// Classic inquiry, looping `Inquiry`/`InquiryCancel` rounds until
    /// `scan_time` has elapsed or [`flag::ABORT_INQUIRING`] is observed.
    #[instrument(level = "debug", skip(self))]
    pub async fn inquiry(&self, scan_time: Duration, _limited: bool) -> Result<(), Error> {
        {
            let bits = self.state.bits().await;
            if bits & !flag::SCANNING != 0 {
                return Err(Error::new(ErrorKind::IllegalState));
            }
        }
        self.state.set(flag::INQUIRING).await;

        let deadline = Instant::now() + scan_time;
        let mut payload = Record::with_capacity(5);
        let _ = payload.push_bytes(&[0x33, 0x8B, 0x9E]); // General/Unlimited Inquiry Access Code
        let _ = payload.push_u8(30); // ~35s inquiry length
        let _ = payload.push_u8(0); // unlimited number of responses

        let result = loop {
            if Instant::now() >= deadline {
                break Ok(());
            }
            if self.state.bits().await & flag::ABORT_INQUIRING != 0 {
                break Ok(());
            }
            let cmd = HciCommand::new(
                hci::opcode::INQUIRY,
                payload.as_written().to_vec(),
                Expect::Event(hci::event::EVT_INQUIRY_COMPLETE),
            );
            if let Err(err) = self.run_hci(cmd).await {
                break Err(err);
            }
            if Instant::now() >= deadline || self.state.bits().await & flag::ABORT_INQUIRING != 0 {
                let cancel = HciCommand::new(hci::opcode::INQUIRY_CANCEL, vec![], Expect::None);
                let _ = self.run_hci(cancel).await;
                break Ok(());
            }
        };

        self.state.clear(flag::INQUIRING | flag::ABORT_INQUIRING).await;
        result
    }

    /// LE active/passive scan for `scan_time`, or until
    /// [`flag::ABORT_SCANNING`] is observed.
    #[instrument(level = "debug", skip(self))]
    pub async fn scan(&self, scan_time: Duration, _limited: bool, passive: bool) -> Result<(), Error> {
        {
            let bits = self.state.bits().await;
            if bits & !flag::INQUIRING != 0 {
                return Err(Error::new(ErrorKind::IllegalState));
            }
        }
        self.state.set(flag::SCANNING).await;

        let scan_type = if passive { 0x00 } else { 0x01 };
        let mut params = Record::with_capacity(7);
        let _ = params.push_u8(scan_type);
        let _ = params.push_u16(0x0010, Endian::Little); // interval
        let _ = params.push_u16(0x0010, Endian::Little); // window
        let _ = params.push_u8(0x00); // own address type: public
        let _ = params.push_u8(0x00); // filter policy: accept all

        let set_params = HciCommand::new(
            hci::opcode::LE_SET_SCAN_PARAMETERS,
            params.as_written().to_vec(),
            Expect::None,
        );
        if let Err(err) = self.run_hci(set_params).await {
            self.state.clear(flag::SCANNING | flag::ABORT_SCANNING).await;
            return Err(err);
        }

        let enable = HciCommand::new(hci::opcode::LE_SET_SCAN_ENABLE, vec![0x01, 0x00], Expect::None);
        if let Err(err) = self.run_hci(enable).await {
            self.state.clear(flag::SCANNING | flag::ABORT_SCANNING).await;
            return Err(err);
        }

        tokio::select! {
            _ = tokio::time::sleep(scan_time) => {}
            _ = self.wait_for(flag::ABORT_SCANNING) => {}
        }

        let disable = HciCommand::new(hci::opcode::LE_SET_SCAN_ENABLE, vec![0x00, 0x00], Expect::None);
        let result = self.run_hci(disable).await;
        self.state.clear(flag::SCANNING | flag::ABORT_SCANNING).await;
        result
    }

    /// Passive background LE scan with longer intervals, left running
    /// until `discovery(false)`.
    #[instrument(level = "debug", skip(self))]
    pub async fn discovery(&self, on: bool) -> Result<(), Error> {
        if on {
            let bits = self.state.bits().await;
            if bits & (flag::INQUIRING | flag::SCANNING) != 0 {
                return Err(Error::new(ErrorKind::IllegalState));
            }
            self.state.set(flag::DISCOVERING).await;

            let mut params = Record::with_capacity(7);
            let _ = params.push_u8(0x00); // passive
            let _ = params.push_u16(0x0100, Endian::Little); // interval, longer than `scan`
            let _ = params.push_u16(0x0100, Endian::Little); // window
            let _ = params.push_u8(0x00);
            let _ = params.push_u8(0x00);
            let set_params = HciCommand::new(
                hci::opcode::LE_SET_SCAN_PARAMETERS,
                params.as_written().to_vec(),
                Expect::None,
            );
            self.run_hci(set_params).await?;
            let enable = HciCommand::new(hci::opcode::LE_SET_SCAN_ENABLE, vec![0x01, 0x00], Expect::None);
            self.run_hci(enable).await
        } else {
            let disable = HciCommand::new(hci::opcode::LE_SET_SCAN_ENABLE, vec![0x00, 0x00], Expect::None);
            let result = self.run_hci(disable).await;
            self.state.clear(flag::DISCOVERING).await;
            result
        }
    }

    /// Standalone LE advertising on/off.
    #[instrument(level = "debug", skip(self))]
    pub async fn advertising(&self, on: bool, mode: u8) -> Result<(), Error> {
        if on {
            let mut params = Record::with_capacity(15);
            let _ = params.push_u16(0x0800, Endian::Little); // min interval
            let _ = params.push_u16(0x0800, Endian::Little); // max interval
            let _ = params.push_u8(mode);
            let _ = params.push_u8(0x00); // own address type
            let _ = params.push_u8(0x00); // direct address type
            let _ = params.push_bytes(&[0u8; 6]); // direct address
            let _ = params.push_u8(0x07); // channel map: all three
            let _ = params.push_u8(0x00); // filter policy
            let set_params = HciCommand::new(
                hci::opcode::LE_SET_ADVERTISING_PARAMETERS,
                params.as_written().to_vec(),
                Expect::None,
            );
            self.run_hci(set_params).await?;
            let enable = HciCommand::new(
                hci::opcode::LE_SET_ADVERTISE_ENABLE,
                vec![0x01],
                Expect::None,
            );
            self.run_hci(enable).await?;
            self.state.set(flag::ADVERTISING).await;
            Ok(())
        } else {
            let disable = HciCommand::new(
                hci::opcode::LE_SET_ADVERTISE_ENABLE,
                vec![0x00],
                Expect::None,
            );
            let result = self.run_hci(disable).await;
            self.state.clear(flag::ADVERTISING).await;
            result
        }
    }

    async fn wait_for(&self, mask: u8) {
        loop {
            if self.state.bits().await & mask != 0 {
                return;
            }
            self.state.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::fake::FakeSocket;

    #[tokio::test]
    async fn inquiry_and_scan_are_mutually_exclusive_mid_flight() {
        let (socket, _peer) = FakeSocket::pair();
        let channel = Channel::new(socket);
        let controller = Arc::new(ScanController::new(channel));

        controller.state.set(flag::INQUIRING).await;
        let err = controller.scan(Duration::from_millis(10), false, true).await;
        assert!(matches!(
            err,
            Err(Error {
                kind: ErrorKind::IllegalState,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn inquiry_result_with_rssi_reaches_a_subscriber() {
        let (socket, peer) = FakeSocket::pair();
        let (controller, mut sub_tx) = ScanController::with_device_reports(socket);
        let mut events = ScanEvents::subscribe(&mut sub_tx).await.unwrap();

        let entry_addr = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
        let mut entry = Vec::with_capacity(14);
        entry.extend_from_slice(&entry_addr);
        entry.extend_from_slice(&[0, 0, 0, 0, 0]); // pscan_rep_mode, pscan_period_mode, dev_class[3]
        entry.extend_from_slice(&[0, 0]); // clock offset
        entry.push(0xCE); // rssi = -50
        let mut payload = vec![hci::HCI_EVENT_PKT, hci::event::EVT_INQUIRY_RESULT_WITH_RSSI, entry.len() as u8 + 1, 1];
        payload.extend_from_slice(&entry);
        peer.deliver(&payload).await;

        let report = tokio::time::timeout(Duration::from_millis(200), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.address, Address::new(entry_addr));
        assert_eq!(report.rssi, Some(-50));
        let _ = controller.bits().await;
    }

    #[tokio::test]
    async fn abort_scan_unblocks_wait_for() {
        let (socket, _peer) = FakeSocket::pair();
        let channel = Channel::new(socket);
        let controller = Arc::new(ScanController::new(channel));
        controller.state.set(flag::SCANNING).await;

        let waiter = controller.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_for(flag::ABORT_SCANNING).await;
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        controller.abort_scan();
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("abort should unblock wait_for")
            .unwrap();
    }
}
