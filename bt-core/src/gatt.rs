//! GATT profile sequencer (C14): walks a peer's attribute table into the
//! `Service`/`Characteristic`/`Descriptor` tree of §3's GATT data model.
//!
//! Four range-walks chained under one wall-clock `deadline`:
//! `ReadByGroupType` for primary services, `ReadByType` for each service's
//! characteristic declarations, `FindInformation` for each characteristic's
//! descriptors, and a `Read`/`ReadChain` for each characteristic's initial
//! value. A characteristic that rejects the read (write-only control
//! points are common) keeps an empty `value` rather than failing the
//! whole walk; any other failure — or the deadline elapsing — aborts it.
use crate::att::{ReadChain, RangeOp, RangeWalk};
use crate::channel::{Channel, Command, Socket};
use crate::error::{Error, ErrorKind};
use crate::uuid::Uuid;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// ATT's default, pre-negotiation MTU (23 bytes: 1 opcode + 22 payload).
pub const DEFAULT_MTU: usize = 23;

pub mod declaration {
    pub const PRIMARY_SERVICE: u16 = 0x2800;
    pub const SECONDARY_SERVICE: u16 = 0x2801;
    pub const INCLUDE: u16 = 0x2802;
    pub const CHARACTERISTIC: u16 = 0x2803;
}

pub mod property {
    pub const BROADCAST: u8 = 1 << 0;
    pub const READ: u8 = 1 << 1;
    pub const WRITE_WITHOUT_RESPONSE: u8 = 1 << 2;
    pub const WRITE: u8 = 1 << 3;
    pub const NOTIFY: u8 = 1 << 4;
    pub const INDICATE: u8 = 1 << 5;
    pub const AUTHENTICATED_SIGNED_WRITES: u8 = 1 << 6;
    pub const EXTENDED_PROPERTIES: u8 = 1 << 7;
}

#[derive(Clone, Debug)]
pub struct Descriptor {
    pub handle: u16,
    pub uuid: Uuid,
}

#[derive(Clone, Debug)]
pub struct Characteristic {
    pub value_handle: u16,
    pub rights: u8,
    pub uuid: Uuid,
    pub end: u16,
    pub descriptors: Vec<Descriptor>,
    pub value: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct Service {
    pub uuid: Uuid,
    pub start: u16,
    pub end: u16,
    pub characteristics: Vec<Characteristic>,
}

/// Parses the little-endian wire form of a UUID attribute value (2 or 16
/// bytes) back into [`Uuid`]'s internal big-endian representation — the
/// mirror image of `att`'s private `push_uuid_le`.
fn uuid_from_le(bytes: &[u8]) -> Uuid {
    match bytes.len() {
        2 => Uuid::from_short(u16::from_le_bytes([bytes[0], bytes[1]])),
        16 => {
            let mut b = [0u8; 16];
            b.copy_from_slice(bytes);
            b.reverse();
            Uuid::from_bytes(b)
        }
        _ => Uuid::from_short(0),
    }
}

pub struct GattSequencer<S> {
    channel: Channel<S>,
    mtu: usize,
    aborted: Arc<AtomicBool>,
}

impl<S: Socket> GattSequencer<S> {
    pub fn new(channel: Channel<S>) -> Self {
        Self::with_mtu(channel, DEFAULT_MTU)
    }

    pub fn with_mtu(channel: Channel<S>, mtu: usize) -> Self {
        Self {
            channel,
            mtu,
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancels the in-flight walk; the next `run` call (or the one
    /// currently awaiting a reply) completes with `AsyncAborted`.
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

    async fn run<C: Command>(&self, deadline: Instant, command: C) -> Result<C, Error> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::AsyncAborted));
        }
        let wait = self.remaining(deadline)?;
        self.channel.execute(wait, command).await
    }

    /// Walks the whole attribute table. `custom` forces characteristic/
    /// descriptor discovery even for services whose UUID has no 16-bit
    /// short form (normally skipped as vendor-specific and opaque).
    #[instrument(level = "debug", skip(self))]
    pub async fn discover(&self, custom: bool, deadline: Instant) -> Result<Vec<Service>, Error> {
        let mut services = self.discover_services(deadline).await?;

        for service in services.iter_mut() {
            if service.end > service.start && (custom || service.uuid.has_short()) {
                self.discover_characteristics(service, deadline).await?;
            }
        }
        for service in services.iter_mut() {
            for characteristic in service.characteristics.iter_mut() {
                self.discover_descriptors(characteristic, deadline).await?;
                self.read_initial_value(characteristic, deadline).await?;
            }
        }
        Ok(services)
    }

    async fn discover_services(&self, deadline: Instant) -> Result<Vec<Service>, Error> {
        let walk = RangeWalk::new(
            RangeOp::ReadByGroupType,
            0x0001,
            0xFFFF,
            Some(Uuid::from_short(declaration::PRIMARY_SERVICE)),
        );
        let walk = self.run(deadline, walk).await?;
        Ok(walk
            .entries
            .iter()
            .map(|entry| Service {
                uuid: uuid_from_le(&entry.value),
                start: entry.handle,
                end: entry.group_end,
                characteristics: Vec::new(),
            })
            .collect())
    }

    async fn discover_characteristics(&self, service: &mut Service, deadline: Instant) -> Result<(), Error> {
        let walk = RangeWalk::new(
            RangeOp::ReadByType,
            service.start + 1,
            service.end,
            Some(Uuid::from_short(declaration::CHARACTERISTIC)),
        );
        let walk = self.run(deadline, walk).await?;

        let mut characteristics = Vec::with_capacity(walk.entries.len());
        for (i, entry) in walk.entries.iter().enumerate() {
            if entry.value.len() < 3 {
                continue;
            }
            let rights = entry.value[0];
            let value_handle = u16::from_le_bytes([entry.value[1], entry.value[2]]);
            let uuid = uuid_from_le(&entry.value[3..]);
            let end = walk
                .entries
                .get(i + 1)
                .map(|next| next.handle.saturating_sub(1))
                .unwrap_or(service.end);
            characteristics.push(Characteristic {
                value_handle,
                rights,
                uuid,
                end,
                descriptors: Vec::new(),
                value: Vec::new(),
            });
        }
        service.characteristics = characteristics;
        Ok(())
    }

    async fn discover_descriptors(&self, characteristic: &mut Characteristic, deadline: Instant) -> Result<(), Error> {
        if characteristic.value_handle >= characteristic.end {
            return Ok(());
        }
        let walk = RangeWalk::new(
            RangeOp::FindInformation,
            characteristic.value_handle + 1,
            characteristic.end,
            None,
        );
        let walk = self.run(deadline, walk).await?;
        characteristic.descriptors = walk
            .entries
            .iter()
            .map(|entry| Descriptor {
                handle: entry.handle,
                uuid: uuid_from_le(&entry.value),
            })
            .collect();
        Ok(())
    }

    async fn read_initial_value(&self, characteristic: &mut Characteristic, deadline: Instant) -> Result<(), Error> {
        let chain = ReadChain::new(characteristic.value_handle, self.mtu);
        match self.run(deadline, chain).await {
            Ok(chain) => {
                characteristic.value = chain.value;
                Ok(())
            }
            Err(Error {
                kind: ErrorKind::AsyncFailed { .. },
                ..
            }) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::att;
    use crate::channel::fake::FakeSocket;

    #[tokio::test]
    async fn discovers_one_service_with_characteristic_descriptor_and_value() {
        let (socket, peer) = FakeSocket::pair();
        let channel = Channel::new(socket);
        let sequencer = GattSequencer::new(channel);
        let deadline = Instant::now() + Duration::from_secs(5);

        let driver = tokio::spawn(async move {
            let req = peer.sent().await;
            assert_eq!(req[0], att::opcode::READ_BY_GROUP_TYPE_REQ);
            let mut resp = vec![att::opcode::READ_BY_GROUP_TYPE_RESP, 6];
            resp.extend_from_slice(&1u16.to_le_bytes());
            resp.extend_from_slice(&5u16.to_le_bytes());
            resp.extend_from_slice(&0x1800u16.to_le_bytes());
            peer.deliver(&resp).await;

            let _req = peer.sent().await;
            peer.deliver(&[
                att::opcode::ERROR_RESP,
                att::opcode::READ_BY_GROUP_TYPE_REQ,
                0,
                0,
                att::ATTRIBUTE_NOT_FOUND,
            ])
            .await;

            let req = peer.sent().await;
            assert_eq!(req[0], att::opcode::READ_BY_TYPE_REQ);
            let mut resp = vec![att::opcode::READ_BY_TYPE_RESP, 7];
            resp.extend_from_slice(&2u16.to_le_bytes());
            resp.push(property::READ);
            resp.extend_from_slice(&3u16.to_le_bytes());
            resp.extend_from_slice(&0x2A00u16.to_le_bytes());
            peer.deliver(&resp).await;

            let _req = peer.sent().await;
            peer.deliver(&[
                att::opcode::ERROR_RESP,
                att::opcode::READ_BY_TYPE_REQ,
                0,
                0,
                att::ATTRIBUTE_NOT_FOUND,
            ])
            .await;

            let req = peer.sent().await;
            assert_eq!(req[0], att::opcode::FIND_INFO_REQ);
            let mut resp = vec![att::opcode::FIND_INFO_RESP, 1];
            resp.extend_from_slice(&5u16.to_le_bytes());
            resp.extend_from_slice(&0x2901u16.to_le_bytes());
            peer.deliver(&resp).await;

            let req = peer.sent().await;
            assert_eq!(req[0], att::opcode::READ_REQ);
            let mut resp = vec![att::opcode::READ_RESP];
            resp.extend_from_slice(b"hi");
            peer.deliver(&resp).await;
        });

        let services = sequencer.discover(false, deadline).await.unwrap();
        driver.await.unwrap();

        assert_eq!(services.len(), 1);
        let service = &services[0];
        assert_eq!(service.uuid.short(), 0x1800);
        assert_eq!(service.characteristics.len(), 1);
        let characteristic = &service.characteristics[0];
        assert_eq!(characteristic.uuid.short(), 0x2A00);
        assert_eq!(characteristic.value, b"hi");
        assert_eq!(characteristic.descriptors.len(), 1);
        assert_eq!(characteristic.descriptors[0].uuid.short(), 0x2901);
    }

    #[tokio::test]
    async fn past_deadline_times_out_before_any_request() {
        let (socket, _peer) = FakeSocket::pair();
        let channel = Channel::new(socket);
        let sequencer = GattSequencer::new(channel);
        let deadline = Instant::now() - Duration::from_millis(1);
        let err = sequencer.discover(false, deadline).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::TimedOut));
    }

    #[tokio::test]
    async fn abort_short_circuits_before_sending() {
        let (socket, _peer) = FakeSocket::pair();
        let channel = Channel::new(socket);
        let sequencer = GattSequencer::new(channel);
        sequencer.abort();
        let deadline = Instant::now() + Duration::from_secs(5);
        let err = sequencer.discover(false, deadline).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::AsyncAborted));
    }
}
