//! Kernel socket layer for the Bluetooth host stack.
//!
//! This crate owns the concrete `AF_BLUETOOTH` socket plumbing (raw HCI,
//! the MGMT control channel, and L2CAP sequenced-packet sockets). Command
//! framing, response matching and protocol state live in `bt-core`; the
//! socket types here implement [`bt_core::channel::Socket`] so a
//! [`bt_core::channel::Channel`] can run directly on top of them.
pub mod sock;
pub mod transport;

pub use bt_core::Address;
