/*!
    reliable messaging over any [Transport]

    SET and GET requests are written with an acknowledge request and retried until a reply
    matching the request comes back:

    - the reply is addressed to the requester, the `id` of the request
    - the reply comes from the requested module, its `id` is the request destination
    - the reply carries the same opcode

    broadcast requests are never answered, so they are written once
*/

use core::time::Duration;
use log::*;
use tokio::sync::Mutex;

use crate::{
    error::Error,
    message::{Message, BROADCAST_ID},
    mutex::BusyMutex,
    transport::{Envelope, Transport},
    };


/// attempts of a request before giving up
pub const MAX_RETRY: u8 = 3;
/// time waited for a reply after each attempt
pub const REPLY_TIMEOUT: Duration = Duration::from_millis(50);
/// pause between two attempts
pub const RETRY_DELAY: Duration = Duration::from_millis(10);
/// time a message is allowed to wait for the line
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(100);
/// time waited for the error counter, the count is skipped when it is busy
pub const COUNTER_WAIT: Duration = Duration::from_millis(10);

/// timings of a [Bus]
#[derive(Copy, Clone, Debug)]
pub struct BusConfig {
    pub retries: u8,
    pub reply_timeout: Duration,
    pub retry_delay: Duration,
    pub write_timeout: Duration,
    pub counter_wait: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            retries: MAX_RETRY,
            reply_timeout: REPLY_TIMEOUT,
            retry_delay: RETRY_DELAY,
            write_timeout: WRITE_TIMEOUT,
            counter_wait: COUNTER_WAIT,
        }
    }
}

impl BusConfig {
    pub fn with_retries(self, retries: u8) -> Self {Self {retries, .. self}}
    pub fn with_reply_timeout(self, reply_timeout: Duration) -> Self {Self {reply_timeout, .. self}}
    pub fn with_retry_delay(self, retry_delay: Duration) -> Self {Self {retry_delay, .. self}}
    pub fn with_write_timeout(self, write_timeout: Duration) -> Self {Self {write_timeout, .. self}}
}


/**
    messaging endpoint on a bus

    writers are serialized, a requester keeps the write side for its whole conversation so that
    no other request can slip between its attempt and the reply
*/
pub struct Bus<T> {
    transport: T,
    write: Mutex<()>,
    read: Mutex<()>,
    errors: BusyMutex<u32>,
    config: BusConfig,
}

impl<T: Transport> Bus<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, BusConfig::default())
    }
    pub fn with_config(transport: T, config: BusConfig) -> Self {
        Self {
            transport,
            write: Mutex::new(()),
            read: Mutex::new(()),
            errors: BusyMutex::new(0),
            config,
        }
    }
    pub fn transport(&self) -> &T {&self.transport}
    pub fn config(&self) -> &BusConfig {&self.config}

    /// write a message without waiting for any answer
    pub async fn send_message(&self, message: Message, destination: u8) -> Result<(), Error> {
        let _write = self.write.lock().await;
        self.transport.write(Envelope::new(message, destination), self.config.write_timeout).await
    }
    /// write the answer to a request, `error` tells the requester its command was not executed
    pub async fn send_reply(&self, message: Message, destination: u8, error: bool) -> Result<(), Error> {
        let _write = self.write.lock().await;
        self.transport.write(Envelope::response(message, destination, error), self.config.write_timeout).await
    }
    /// wait at most `timeout` for the next message, a failure is counted
    pub async fn receive_message(&self, timeout: Duration) -> Result<Envelope, Error> {
        let result = {
            let _read = self.read.lock().await;
            self.transport.read(timeout).await
        };
        if result.is_err()
            {self.count_error().await}
        result
    }

    /// request a module to execute a SET command, returning once it acknowledged
    pub async fn set_message(&self, message: Message, destination: u8) -> Result<(), Error> {
        self.request(message, destination).await.map(|_| ())
    }
    /**
        request a module to execute a GET command, returning its result

        a broadcast request is never answered and gives 0
    */
    pub async fn get_message(&self, message: Message, destination: u8) -> Result<u32, Error> {
        Ok(self.request(message, destination).await?
            .map_or(0, |reply| reply.data))
    }

    /// count of failed receptions since creation
    pub async fn message_error_counter(&self) -> u32 {
        *self.errors.lock().await
    }

    async fn request(&self, message: Message, destination: u8) -> Result<Option<Message>, Error> {
        if destination == BROADCAST_ID {
            self.send_message(message, destination).await?;
            return Ok(None)
        }
        for attempt in 1 ..= self.config.retries {
            {
                let _write = self.write.lock().await;
                match self.exchange(message, destination).await {
                    Ok(Some(reply)) if reply.error => {
                        warn!("module {} could not execute command {:#04x}", destination, message.opcode);
                        return Err(Error::Remote(message.opcode))
                    },
                    Ok(Some(reply)) => return Ok(Some(reply.message)),
                    Ok(None) => debug!("unexpected reply to command {:#04x}, attempt {}", message.opcode, attempt),
                    Err(error) => {
                        debug!("no reply to command {:#04x}, attempt {}: {}", message.opcode, attempt, error);
                        self.count_error().await;
                    },
                }
            }
            if attempt < self.config.retries
                {tokio::time::sleep(self.config.retry_delay).await}
        }
        warn!("module {} did not answer command {:#04x}", destination, message.opcode);
        Err(Error::NoReply {attempts: self.config.retries})
    }

    /// one attempt, giving the reply only if it matches the request
    async fn exchange(&self, message: Message, destination: u8) -> Result<Option<Envelope>, Error> {
        // the reply is not awaited anymore once the attempt ends, even dropped midway
        let _conversation = Conversation(&self.transport);
        self.transport.write(Envelope::request(message, destination), self.config.write_timeout).await?;
        let reply = {
            let _read = self.read.lock().await;
            self.transport.read(self.config.reply_timeout).await?
        };
        let matching = reply.destination == message.id
            && reply.message.id == destination
            && reply.message == message;
        Ok(matching.then_some(reply))
    }

    async fn count_error(&self) {
        if let Some(mut errors) = self.errors.lock_for(self.config.counter_wait).await
            {*errors += 1}
    }
}


/// ends an acknowledged conversation on its transport when dropped
struct Conversation<'t, T: Transport>(&'t T);

impl<T: Transport> Drop for Conversation<'_, T> {
    fn drop(&mut self) {self.0.cancel_reply()}
}
