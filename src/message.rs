/*!
    the 8 bytes command envelope exchanged between modules, whatever bus is carrying it

    on the wire a message is `[opcode, id, conf_lo, conf_hi, data_b0, data_b1, data_b2, data_b3]`
*/

use packbytes::{FromBytes, ToBytes};


/// address of a module that did not receive any hardware id yet
pub const UNDEFINED_ID: u8 = 0xFE;
/// address accepted by all modules, nobody ever answers to it
pub const BROADCAST_ID: u8 = 0xFF;

const MASK_SET: u8 = 0x80;
const MASK_KIND: u8 = 0xC0;
const TYPE_SET: u8 = 0b0 << 7;
const TYPE_GET: u8 = 0b10 << 6;
const TYPE_SEND: u8 = 0b11 << 6;

/**
    command envelope

    two messages are equal when their opcodes are equal, all other fields are payload.
    This is what the command registry and reply correlation rely on.
*/
#[derive(Copy, Clone, FromBytes, ToBytes, Debug, Default)]
pub struct Message {
    /// command opcode, its two top bits select the message [Kind]
    pub opcode: u8,
    /// module that originated the message, on a reply the module that answers
    pub id: u8,
    /// auxiliary selector, often a sub-device index and an enum packed in two bytes
    pub conf: u16,
    /// payload, raw bytes or a reinterpreted float or integer
    pub data: u32,
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.opcode == other.opcode
    }
}
impl Eq for Message {}

/// reply semantics selected by the top bits of an opcode
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Kind {
    /// acknowledged by an echo before the command runs
    Set,
    /// answered with the command result
    Get,
    /// never answered
    Send,
}

impl Kind {
    pub const fn of(opcode: u8) -> Self {
        if opcode & MASK_SET == TYPE_SET
            {Kind::Set}
        else if opcode & MASK_KIND == TYPE_GET
            {Kind::Get}
        else
            {Kind::Send}
    }
}

/// opcode of kind SET for the given command number
pub const fn set(command: u8) -> u8 {(command & !MASK_SET) | TYPE_SET}
/// opcode of kind GET for the given command number
pub const fn get(command: u8) -> u8 {(command & !MASK_KIND) | TYPE_GET}
/// opcode of kind SEND for the given command number
pub const fn send(command: u8) -> u8 {(command & !MASK_KIND) | TYPE_SEND}


/// opcodes handled by every module
pub mod opcode {
    use super::{set, get, send};

    /// a module adopts `conf` as hardware id if `data` is its OI-ID
    pub const SET_AUTO_ID: u8 = set(0x7B);
    /// answers [PING_ANSWER]
    pub const PING: u8 = get(0x3F);
    /// answers the board type code
    pub const GET_TYPE: u8 = get(0x3E);
    /// broadcast query, every module answers with [SEND_OI_ID] over CAN
    pub const GET_ALL_OI_ID: u8 = get(0x3D);
    /// carries a module OI-ID reading in `data`
    pub const SEND_OI_ID: u8 = send(0x3C);
    /// type discovery, every module answers with the same opcode carrying its type in `data`
    pub const GET_TYPE_ALL: u8 = send(0x3E);

    pub const PING_ANSWER: u32 = 0xAA;
}


impl Message {
    pub const SIZE: usize = 8;

    pub const fn new(opcode: u8, id: u8, conf: u16, data: u32) -> Self {
        Self {opcode, id, conf, data}
    }
    pub const fn kind(&self) -> Kind {Kind::of(self.opcode)}

    /// byte of `conf`, 0 is the low byte
    ///
    /// # Panics
    /// if `index` is not 0 or 1
    pub const fn conf_byte(&self, index: usize) -> u8 {
        self.conf.to_le_bytes()[index]
    }
    /// change a byte of `conf`, panics like [Self::conf_byte]
    pub fn set_conf_byte(&mut self, index: usize, value: u8) {
        let mut bytes = self.conf.to_le_bytes();
        bytes[index] = value;
        self.conf = u16::from_le_bytes(bytes);
    }
    /// composite selector, low byte is usually the sub-device and high byte the action
    pub const fn conf_from_bytes(low: u8, high: u8) -> u16 {
        u16::from_le_bytes([low, high])
    }

    /// byte of `data`, 0 is the low byte
    ///
    /// # Panics
    /// if `index` is above 3
    pub const fn data_byte(&self, index: usize) -> u8 {
        self.data.to_le_bytes()[index]
    }
    /// change a byte of `data`, panics like [Self::data_byte]
    pub fn set_data_byte(&mut self, index: usize, value: u8) {
        let mut bytes = self.data.to_le_bytes();
        bytes[index] = value;
        self.data = u32::from_le_bytes(bytes);
    }

    /// payload reinterpreted as a float
    pub fn data_as_f32(&self) -> f32 {bits_to_f32(self.data)}
    /// same message carrying a float payload
    pub fn with_f32(mut self, value: f32) -> Self {
        self.data = f32_to_bits(value);
        self
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {self.to_le_bytes()}
    pub fn decode(bytes: [u8; Self::SIZE]) -> Self {Self::from_le_bytes(bytes)}
}

/// bit-reinterpret a float into a 32 bits payload
pub fn f32_to_bits(value: f32) -> u32 {value.to_bits()}
/// bit-reinterpret a 32 bits payload as a float
pub fn bits_to_f32(bits: u32) -> f32 {f32::from_bits(bits)}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_layout() {
        let message = Message::new(0x12, 0x34, 0x5678, 0x9abc_def0);
        assert_eq!(message.encode(), [0x12, 0x34, 0x78, 0x56, 0xf0, 0xde, 0xbc, 0x9a]);
        let back = Message::decode(message.encode());
        assert_eq!((back.opcode, back.id, back.conf, back.data), (0x12, 0x34, 0x5678, 0x9abc_def0));
    }

    #[test]
    fn equality_is_opcode_only() {
        assert_eq!(Message::new(3, 1, 2, 3), Message::new(3, 9, 8, 7));
        assert_ne!(Message::new(3, 1, 2, 3), Message::new(4, 1, 2, 3));
    }

    #[test]
    fn kinds() {
        assert_eq!(Kind::of(set(0x7B)), Kind::Set);
        assert_eq!(Kind::of(0x00), Kind::Set);
        assert_eq!(Kind::of(get(0x3F)), Kind::Get);
        assert_eq!(Kind::of(0x80), Kind::Get);
        assert_eq!(Kind::of(send(0x3C)), Kind::Send);
        assert_eq!(Kind::of(0xFF), Kind::Send);
        assert_eq!(opcode::PING, 0xBF);
        assert_eq!(opcode::SET_AUTO_ID, 0x7B);
        assert_eq!(opcode::SEND_OI_ID, 0xFC);
    }

    #[test]
    fn composite_selectors() {
        let mut message = Message::new(set(1), 0, Message::conf_from_bytes(2, 7), 0);
        assert_eq!(message.conf_byte(0), 2);
        assert_eq!(message.conf_byte(1), 7);
        message.set_conf_byte(1, 9);
        assert_eq!(message.conf, 0x0902);
        message.set_data_byte(3, 0xAB);
        assert_eq!(message.data, 0xAB00_0000);
        assert_eq!(message.data_byte(3), 0xAB);
    }

    #[test]
    #[should_panic]
    fn conf_has_two_bytes() {
        Message::default().conf_byte(2);
    }

    #[test]
    #[should_panic]
    fn data_has_four_bytes() {
        Message::default().set_data_byte(4, 1);
    }

    #[test]
    fn float_payload() {
        let message = Message::new(get(1), 0, 0, 0).with_f32(-12.5);
        assert_eq!(message.data, (-12.5f32).to_bits());
        assert_eq!(message.data_as_f32(), -12.5);
    }
}
