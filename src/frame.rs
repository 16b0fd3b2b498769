/*!
    checksummed frame carried by the RS-485 serial bus

    ```text
    offset 0    sync      0xAA
    offset 1    cmd       copy of the message opcode
    offset 2-3  flags     id:11 | dir:1 | ack:1 | error:1 | reserved:2
    offset 4-5  length    payload size, at most 1024
    offset 6    checksum  xor of 0xFE, cmd, flags, length and payload
    offset 7..  payload
    ```
    all integers are little endian
*/

use bilge::prelude::*;
use packbytes::{FromBytes, ToBytes, ByteArray};
use thiserror::Error;

use crate::{
    pack_bilge,
    message::Message,
    utils::xor_fold,
    };


/// marker byte starting every frame
pub const SYNC: u8 = 0xAA;
/// size of the frame header on the wire
pub const HEADER: usize = <Header as FromBytes>::Bytes::SIZE;
/// maximum payload size
pub const MAX_PAYLOAD: usize = 1024;
/// maximum frame size on the wire
pub const MAX_FRAME: usize = HEADER + MAX_PAYLOAD;
/// biggest module id that fits in the flags
pub const MAX_ID: u16 = 0x7FF;

const CHECKSUM_SEED: u8 = 0xFE;


/// frame header, as on the wire
#[derive(Copy, Clone, FromBytes, ToBytes, Debug, Default, PartialEq)]
pub struct Header {
    pub sync: u8,
    pub cmd: u8,
    pub flags: Flags,
    /// payload byte count
    pub length: u16,
    pub checksum: u8,
}

/// addressing and control bits
#[bitsize(16)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct Flags {
    /// destination module
    pub id: u11,
    /// set on a response, clear on a request from the sender side
    pub dir: bool,
    /// the sender is waiting for a response to this frame
    pub ack: bool,
    /// the command could not be executed by the answering module
    pub error: bool,
    _reserved: u2,
}
pack_bilge!(Flags);

impl Flags {
    /// flags addressing the given module, ids above [MAX_ID] are truncated
    pub fn to(id: u16) -> Self {
        let mut flags = Self::default();
        flags.set_id(u11::new(id & MAX_ID));
        flags
    }
    pub fn with_dir(mut self, dir: bool) -> Self {self.set_dir(dir); self}
    pub fn with_ack(mut self, ack: bool) -> Self {self.set_ack(ack); self}
    pub fn with_error(mut self, error: bool) -> Self {self.set_error(error); self}
}

/// problem found in a frame
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid sync byte {0:#04x}")]
    Sync(u8),
    #[error("invalid payload length {0}")]
    Length(u16),
    #[error("invalid checksum {received:#04x}, expected {expected:#04x}")]
    Checksum {received: u8, expected: u8},
    #[error("payload of {0} bytes is too short for a message")]
    ShortPayload(usize),
    #[error("payload of {0} bytes is longer than maximum allowed frame")]
    LongPayload(usize),
    #[error("module id {0} is out of message addressing range")]
    Address(u16),
}


/// checksum of a frame header and its payload, the header's own checksum and sync are ignored
pub fn checksum(header: &Header, payload: &[u8]) -> u8 {
    let flags = header.flags.to_le_bytes();
    let length = header.length.to_le_bytes();
    xor_fold(CHECKSUM_SEED, &[header.cmd, flags[1], flags[0], length[1], length[0]])
        ^ xor_fold(0, payload)
}


/// a complete frame, with its payload
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    pub header: Header,
    pub payload: heapless::Vec<u8, MAX_PAYLOAD>,
}

impl Frame {
    /// build a sealed frame
    pub fn new(cmd: u8, flags: Flags, payload: &[u8]) -> Result<Self, FrameError> {
        let mut frame = Self::default();
        frame.payload.extend_from_slice(payload)
            .map_err(|_| FrameError::LongPayload(payload.len()))?;
        frame.header.cmd = cmd;
        frame.header.flags = flags;
        frame.seal();
        Ok(frame)
    }
    /// build a sealed frame carrying a message, possibly followed by extension bytes
    pub fn from_message(message: &Message, flags: Flags, extension: &[u8]) -> Result<Self, FrameError> {
        let mut frame = Self::default();
        frame.payload.extend_from_slice(&message.encode())
            .and_then(|_| frame.payload.extend_from_slice(extension))
            .map_err(|_| FrameError::LongPayload(Message::SIZE + extension.len()))?;
        frame.header.cmd = message.opcode;
        frame.header.flags = flags;
        frame.seal();
        Ok(frame)
    }

    /// module id in flags
    pub fn id(&self) -> u16 {self.header.flags.id().value()}
    /// message carried by the first payload bytes
    pub fn message(&self) -> Result<Message, FrameError> {
        let bytes = self.payload.get(.. Message::SIZE)
            .ok_or(FrameError::ShortPayload(self.payload.len()))?;
        Ok(Message::decode(bytes.try_into().map_err(|_| FrameError::ShortPayload(bytes.len()))?))
    }
    /// payload bytes following the message
    pub fn extension(&self) -> &[u8] {
        self.payload.get(Message::SIZE ..).unwrap_or(&[])
    }

    /// set sync, length and checksum fields according to the current content
    pub fn seal(&mut self) {
        self.header.sync = SYNC;
        // payload capacity is MAX_PAYLOAD so it always fits
        self.header.length = self.payload.len() as u16;
        self.header.checksum = checksum(&self.header, &self.payload);
    }
    /// check the header checksum against the content
    pub fn verify(&self) -> Result<(), FrameError> {
        let expected = checksum(&self.header, &self.payload);
        if self.header.checksum != expected
            {return Err(FrameError::Checksum {received: self.header.checksum, expected})}
        Ok(())
    }

    /// size on the wire
    pub fn len(&self) -> usize {HEADER + self.payload.len()}

    /// serialize header then payload into `out`, returning the number of bytes written
    pub fn encode(&self, out: &mut [u8]) -> Result<usize, FrameError> {
        let size = self.len();
        let out = out.get_mut(.. size).ok_or(FrameError::LongPayload(self.payload.len()))?;
        out[.. HEADER].copy_from_slice(&self.header.to_le_bytes());
        out[HEADER ..].copy_from_slice(&self.payload);
        Ok(size)
    }
}
