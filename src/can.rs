/*!
    CAN transport

    a message travels in the data field of an extended frame, whose identifier carries both ends:

    ```text
    bits 0-7    destination module
    bits 8-15   source module
    ```
*/

use core::future::Future;
use core::time::Duration;
use std::io;
use embedded_can::{Frame as _, Id, ExtendedId, StandardId};
use log::*;

use crate::{
    error::Error,
    message::Message,
    transport::{Envelope, Transport},
    };


/// time a frame is allowed to wait for the bus before being given up
pub const CAN_WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// extended identifier addressing `destination` from `source`
pub fn can_identifier(destination: u8, source: u8) -> ExtendedId {
    // 16 bits always fit in 29
    ExtendedId::new(u32::from(destination) | u32::from(source) << 8)
        .unwrap_or(ExtendedId::ZERO)
}
/// `(destination, source)` encoded in an identifier
pub fn split_identifier(id: Id) -> (u8, u8) {
    let raw = match id {
        Id::Extended(id) => id.as_raw(),
        Id::Standard(id) => id.as_raw().into(),
    };
    (raw as u8, (raw >> 8) as u8)
}


/// classic data frame, at most 8 bytes
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CanFrame {
    id: Id,
    dlc: u8,
    data: [u8; 8],
}

impl CanFrame {
    /// frame carrying a message from `source` to `destination`
    pub fn from_message(message: &Message, destination: u8, source: u8) -> Self {
        Self {
            id: can_identifier(destination, source).into(),
            dlc: Message::SIZE as u8,
            data: message.encode(),
        }
    }
    /// message carried, a shorter data field is completed with zeros
    pub fn message(&self) -> Message {
        Message::decode(self.data)
    }
}

impl embedded_can::Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        let mut padded = [0; 8];
        padded.get_mut(.. data.len())?.copy_from_slice(data);
        Some(Self {id: id.into(), dlc: data.len() as u8, data: padded})
    }
    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {None}
    fn is_extended(&self) -> bool {matches!(self.id, Id::Extended(_))}
    fn is_remote_frame(&self) -> bool {false}
    fn id(&self) -> Id {self.id}
    fn dlc(&self) -> usize {self.dlc.into()}
    fn data(&self) -> &[u8] {&self.data[.. self.dlc()]}
}

impl Default for CanFrame {
    fn default() -> Self {
        Self {id: StandardId::ZERO.into(), dlc: 0, data: [0; 8]}
    }
}


/// CAN controller seam
pub trait CanDriver: Send + Sync + 'static {
    /// queue a frame for transmission
    fn transmit(&self, frame: &CanFrame) -> impl Future<Output = io::Result<()>> + Send;
    /// wait for the next received frame
    fn receive(&self) -> impl Future<Output = io::Result<CanFrame>> + Send;
}


/**
    CAN bus endpoint

    the source written in identifiers is the `id` of the message sent, which is its originator
*/
pub struct CanBus<D> {
    driver: D,
}

impl<D: CanDriver> CanBus<D> {
    pub fn new(driver: D) -> Self {
        Self {driver}
    }

    /// transmit a frame, waiting at most [CAN_WRITE_TIMEOUT]
    pub async fn write(&self, frame: &CanFrame) -> Result<(), Error> {
        self.write_for(frame, CAN_WRITE_TIMEOUT).await
    }
    async fn write_for(&self, frame: &CanFrame, timeout: Duration) -> Result<(), Error> {
        let (destination, source) = split_identifier(frame.id());
        debug!("can write - destination: {} | source: {} | cmd: {:#04x}",
            destination, source, frame.data[0]);
        tokio::time::timeout(timeout, self.driver.transmit(frame)).await
            .map_err(|_| {
                error!("can write timeout");
                Error::Timeout
                })??;
        Ok(())
    }
    /// wait for the next frame
    pub async fn read(&self) -> Result<CanFrame, Error> {
        let frame = self.driver.receive().await?;
        if frame.dlc() < Message::SIZE
            {warn!("can frame of {} bytes, completed with zeros", frame.dlc())}
        Ok(frame)
    }
}

impl<D: CanDriver> Transport for CanBus<D> {
    async fn write(&self, envelope: Envelope, timeout: Duration) -> Result<(), Error> {
        let frame = CanFrame::from_message(&envelope.message, envelope.destination, envelope.message.id);
        self.write_for(&frame, timeout).await
    }
    async fn read(&self, timeout: Duration) -> Result<Envelope, Error> {
        let frame = tokio::time::timeout(timeout, CanBus::read(self)).await
            .map_err(|_| Error::Timeout)??;
        let (destination, _) = split_identifier(frame.id());
        Ok(Envelope::new(frame.message(), destination))
    }
}


#[cfg(feature = "socketcan")]
pub use socket::*;

#[cfg(feature = "socketcan")]
mod socket {
    use super::*;
    use embedded_can::Frame;

    /// linux socketcan interface
    pub struct SocketDriver(socketcan::tokio::CanSocket);

    impl CanBus<SocketDriver> {
        /// open a socketcan network interface, like `can0`
        pub fn open(interface: &str) -> Result<Self, Error> {
            Ok(Self::new(SocketDriver(socketcan::tokio::CanSocket::open(interface)?)))
        }
    }

    impl CanDriver for SocketDriver {
        async fn transmit(&self, frame: &CanFrame) -> io::Result<()> {
            let frame = socketcan::CanFrame::new(frame.id(), frame.data())
                .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
            self.0.write_frame(frame).await
        }
        async fn receive(&self) -> io::Result<CanFrame> {
            loop {
                let frame = self.0.read_frame().await?;
                if frame.is_remote_frame()
                    {continue}
                if let Some(frame) = CanFrame::new(frame.id(), frame.data())
                    {return Ok(frame)}
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use embedded_can::Frame;
    use crate::sim::CanHub;

    #[test]
    fn identifier_layout() {
        let id = can_identifier(0x12, 0x34);
        assert_eq!(id.as_raw(), 0x3412);
        assert_eq!(split_identifier(id.into()), (0x12, 0x34));
    }

    #[test]
    fn short_frames_are_padded() {
        let frame = CanFrame::new(can_identifier(1, 2), &[0xc1, 2, 3]).unwrap();
        assert_eq!(frame.dlc(), 3);
        assert_eq!(frame.data(), &[0xc1, 2, 3]);
        let message = frame.message();
        assert_eq!((message.opcode, message.id, message.conf, message.data), (0xc1, 2, 3, 0));
        assert!(CanFrame::new(can_identifier(1, 2), &[0; 9]).is_none());
    }

    #[tokio::test]
    async fn envelope_through_hub() {
        let hub = CanHub::new();
        let a = CanBus::new(hub.attach());
        let b = CanBus::new(hub.attach());

        let message = Message::new(0xc5, 3, 7, 1234);
        Transport::write(&a, Envelope::new(message, 9), CAN_WRITE_TIMEOUT).await.unwrap();
        let envelope = Transport::read(&b, Duration::from_millis(50)).await.unwrap();
        assert_eq!(envelope.destination, 9);
        assert!(!envelope.response);
        assert_eq!(envelope.message.data, 1234);

        let raw = b.read();
        a.write(&CanFrame::from_message(&message, 9, 3)).await.unwrap();
        let frame = raw.await.unwrap();
        assert_eq!(split_identifier(frame.id()), (9, 3));
    }

    #[tokio::test]
    async fn read_times_out() {
        let hub = CanHub::new();
        let bus = CanBus::new(hub.attach());
        assert!(matches!(Transport::read(&bus, Duration::from_millis(5)).await, Err(Error::Timeout)));
    }
}
