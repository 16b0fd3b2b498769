use core::future::Future;
use core::time::Duration;

use crate::{
    error::Error,
    message::Message,
    };


/// a message with its addressing, as written to or read from a bus
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Envelope {
    pub message: Message,
    /// module the envelope is addressed to
    pub destination: u8,
    /// the sender waits for a response
    pub ack: bool,
    /// this envelope answers a previous request
    pub response: bool,
    /// the answering module could not execute the command
    pub error: bool,
}

impl Envelope {
    /// request or notification, not expecting any response
    pub fn new(message: Message, destination: u8) -> Self {
        Self {message, destination, ack: false, response: false, error: false}
    }
    /// request waiting for a response
    pub fn request(message: Message, destination: u8) -> Self {
        Self {ack: true, .. Self::new(message, destination)}
    }
    /// response to a previous request
    pub fn response(message: Message, destination: u8, error: bool) -> Self {
        Self {response: true, error, .. Self::new(message, destination)}
    }
}

/**
    a bus able to carry messages

    implementations only move envelopes, retries and replies are handled by [crate::bus::Bus]
*/
pub trait Transport: Send + Sync + 'static {
    /// write an envelope, waiting at most `timeout` for it to leave
    fn write(&self, envelope: Envelope, timeout: Duration) -> impl Future<Output = Result<(), Error>> + Send;
    /// wait at most `timeout` for the next envelope
    fn read(&self, timeout: Duration) -> impl Future<Output = Result<Envelope, Error>> + Send;
    /// forget any reply still expected after an acknowledged write
    fn cancel_reply(&self) {}
}
