//! In-memory [`super::Socket`] used to unit-test C6 and the protocol
//! framing layers without a real kernel socket.
use super::Socket;
use tokio::sync::{mpsc, Mutex};

pub struct FakeSocket {
    outbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

/// The test's handle to the other end of a [`FakeSocket`] pair: send
/// bytes to the channel under test, observe what it sent out.
pub struct FakePeer {
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    outbound_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl FakeSocket {
    pub fn pair() -> (Self, FakePeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound_tx,
                inbound_rx: Mutex::new(inbound_rx),
            },
            FakePeer {
                inbound_tx,
                outbound_rx: Mutex::new(outbound_rx),
            },
        )
    }
}

impl FakePeer {
    pub async fn deliver(&self, bytes: &[u8]) {
        let _ = self.inbound_tx.send(bytes.to_vec());
    }

    pub async fn sent(&self) -> Vec<u8> {
        self.outbound_rx.lock().await.recv().await.unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Socket for FakeSocket {
    async fn send(&self, buf: &[u8]) -> std::io::Result<()> {
        let _ = self.outbound_tx.send(buf.to_vec());
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut rx = self.inbound_rx.lock().await;
        match rx.recv().await {
            Some(bytes) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }
}
