//! Adapters from the kernel socket types in [`crate::sock`] to
//! [`bt_core::channel::Socket`], so a [`bt_core::channel::Channel`] can run
//! directly over a real raw HCI socket, the MGMT control channel (both
//! `hci::Datagram`, since MGMT is just another HCI channel number — see
//! [`crate::sock::mgmt`]) or an L2CAP `SeqPacket` connection.
use crate::sock::{hci, l2cap};
use async_trait::async_trait;

#[async_trait]
impl bt_core::channel::Socket for hci::Datagram {
    async fn send(&self, buf: &[u8]) -> std::io::Result<()> {
        self.send(buf).await.map(|_| ())
    }

    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.recv(buf).await
    }
}

#[async_trait]
impl bt_core::channel::Socket for l2cap::SeqPacket {
    async fn send(&self, buf: &[u8]) -> std::io::Result<()> {
        self.send(buf).await.map(|_| ())
    }

    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.recv(buf).await
    }
}
