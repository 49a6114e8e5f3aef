//! AVDTP profile sequencer (C16): `Discover` for the peer's stream
//! endpoints, then `GetCapabilities` per SEID to fill each endpoint's
//! capability map. Same single-deadline/abort contract as [`crate::gatt`]
//! and [`crate::sdp_sequencer`].
use crate::avdtp::{self, AvdtpCommand, LabelAllocator, StreamEndpoint};
use crate::channel::{Channel, Socket};
use crate::error::{Error, ErrorKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

#[derive(Clone, Debug)]
pub struct Endpoint {
    pub endpoint: StreamEndpoint,
    pub capabilities: HashMap<u8, Vec<u8>>,
}

pub struct AvdtpSequencer<S> {
    channel: Channel<S>,
    labels: LabelAllocator,
    aborted: Arc<AtomicBool>,
}

impl<S: Socket> AvdtpSequencer<S> {
    pub fn new(channel: Channel<S>) -> Self {
        Self {
            channel,
            labels: LabelAllocator::new(),
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn remaining(&self, deadline: Instant) -> Result<Duration, Error> {
        let now = Instant::now();
        if now >= deadline {
            return Err(Error::new(ErrorKind::TimedOut));
        }
        Ok(deadline - now)
    }

    async fn run(&self, deadline: Instant, command: AvdtpCommand) -> Result<AvdtpCommand, Error> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::AsyncAborted));
        }
        let wait = self.remaining(deadline)?;
        self.channel.execute(wait, command).await
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn discover(&self, deadline: Instant) -> Result<Vec<Endpoint>, Error> {
        let discover = AvdtpCommand::discover(&self.labels);
        let discover = self.run(deadline, discover).await?;
        let endpoints = avdtp::read_discovery(&discover.payload);

        let mut out = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let capabilities = AvdtpCommand::get_capabilities(&self.labels, endpoint.seid);
            let capabilities = self.run(deadline, capabilities).await?;
            let capabilities = avdtp::read_configuration(&capabilities.payload).into_iter().collect();
            out.push(Endpoint {
                endpoint,
                capabilities,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avdtp::{category, errorcode, message_type, packet_type, signal};
    use crate::channel::fake::FakeSocket;

    fn header(label: u8, pkt: u8, msg: u8) -> u8 {
        (label << 4) | (pkt << 2) | msg
    }

    #[tokio::test]
    async fn discovers_one_endpoint_and_its_capabilities() {
        let (socket, peer) = FakeSocket::pair();
        let channel = Channel::new(socket);
        let sequencer = AvdtpSequencer::new(channel);
        let deadline = Instant::now() + Duration::from_secs(5);

        let driver = tokio::spawn(async move {
            let req = peer.sent().await;
            assert_eq!(req[1] & 0x3F, signal::DISCOVER);
            let label = req[0] >> 4;
            peer.deliver(&[
                header(label, packet_type::SINGLE, message_type::RESPONSE_ACCEPT),
                signal::DISCOVER,
                0x04,
                0x00,
            ])
            .await;

            let req = peer.sent().await;
            assert_eq!(req[1] & 0x3F, signal::GET_CAPABILITIES);
            assert_eq!(req[2], 1 << 2);
            let label = req[0] >> 4;
            let mut body = vec![
                header(label, packet_type::SINGLE, message_type::RESPONSE_ACCEPT),
                signal::GET_CAPABILITIES,
            ];
            body.push(category::MEDIA_TRANSPORT);
            body.push(0x00);
            body.push(category::MEDIA_CODEC);
            body.push(0x02);
            body.extend_from_slice(&[0xAA, 0xBB]);
            peer.deliver(&body).await;
        });

        let endpoints = sequencer.discover(deadline).await.unwrap();
        driver.await.unwrap();

        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].endpoint.seid, 1);
        assert_eq!(endpoints[0].capabilities.len(), 2);
        assert_eq!(
            endpoints[0].capabilities.get(&category::MEDIA_CODEC),
            Some(&vec![0xAA, 0xBB])
        );
    }

    #[tokio::test]
    async fn rejected_discover_aborts_before_any_capability_request() {
        let (socket, peer) = FakeSocket::pair();
        let channel = Channel::new(socket);
        let sequencer = AvdtpSequencer::new(channel);
        let deadline = Instant::now() + Duration::from_secs(5);

        let driver = tokio::spawn(async move {
            let req = peer.sent().await;
            let label = req[0] >> 4;
            peer.deliver(&[
                header(label, packet_type::SINGLE, message_type::RESPONSE_REJECT),
                signal::DISCOVER,
                errorcode::NOT_SUPPORTED_COMMAND,
            ])
            .await;
        });

        let err = sequencer.discover(deadline).await.unwrap_err();
        driver.await.unwrap();
        assert!(matches!(err.kind, ErrorKind::AsyncFailed { .. }));
    }

    #[tokio::test]
    async fn past_deadline_times_out_before_any_request() {
        let (socket, _peer) = FakeSocket::pair();
        let channel = Channel::new(socket);
        let sequencer = AvdtpSequencer::new(channel);
        let deadline = Instant::now() - Duration::from_millis(1);
        let err = sequencer.discover(deadline).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::TimedOut));
    }

    #[tokio::test]
    async fn abort_short_circuits_before_sending() {
        let (socket, _peer) = FakeSocket::pair();
        let channel = Channel::new(socket);
        let sequencer = AvdtpSequencer::new(channel);
        sequencer.abort();
        let deadline = Instant::now() + Duration::from_secs(5);
        let err = sequencer.discover(deadline).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::AsyncAborted));
    }
}
