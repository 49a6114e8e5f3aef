//! Kernel MGMT control channel.
//!
//! The MGMT channel is a distinct channel of the same `BTPROTO_HCI`
//! protocol as raw HCI (§6): it is bound with [`HCI_DEV_NONE`] and
//! [`HCI_CHANNEL_CONTROL`] instead of a concrete adapter index, since MGMT
//! commands carry their own adapter index in their 6-byte header.
use crate::sock::{
    hci,
    sys::{HCI_CHANNEL_CONTROL, HCI_DEV_NONE},
};
use std::io::Result;

/// Opens the MGMT control channel. There is exactly one of these per
/// process; the kernel multiplexes all adapters' events over it.
pub async fn bind() -> Result<hci::Datagram> {
    hci::Datagram::bind(hci::SocketAddr::with_channel(
        HCI_DEV_NONE,
        HCI_CHANNEL_CONTROL,
    ))
    .await
}
