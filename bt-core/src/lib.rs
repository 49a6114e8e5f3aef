//! OS-agnostic Bluetooth protocol engine: wire framing, command/response
//! matching and the multi-step discovery sequencers for HCI, MGMT, L2CAP's
//! upper layers (ATT/GATT, SDP, AVDTP). Nothing in this crate touches a
//! real socket — see `bt-sock` for that — so everything here is testable
//! against [`channel::fake::FakeSocket`].
pub mod record;
pub mod uuid;
pub mod addr;
pub mod keys;
pub mod channel;
pub mod error;
pub mod hci;
pub mod mgmt;
pub mod att;
pub mod sdp;
pub mod avdtp;
pub mod scan;
pub mod gatt;
pub mod sdp_sequencer;
pub mod avdtp_sequencer;

pub use addr::Address;
pub use error::{Error, ErrorKind, Result};
