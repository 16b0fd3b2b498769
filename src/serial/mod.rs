/*!
    RS-485 serial transport

    frames are written whole under the transmit lock, and read back through the [Reader] state
    machine fed with UART receive events
*/

mod pending;
pub mod reader;
pub mod driver;

pub use pending::{PendingReply, Reservation};
pub use reader::{Reader, State, Event};
pub use driver::{UartRx, UartTx, UartEvent, SerialConfig, BAUD_RATE};

use core::time::Duration;
use std::vec::Vec;
use log::*;
use tokio::sync::Mutex;

use crate::{
    error::Error,
    frame::{Flags, Frame, FrameError, MAX_FRAME},
    transport::{Envelope, Transport},
    };


/// receive half, with the buffers only the reading task needs
struct Receiver<R> {
    uart: R,
    chunk: Vec<u8>,
    reader: Reader,
}

/// transmit half, with its serialization buffer
struct Transmitter<T> {
    uart: T,
    wire: Vec<u8>,
}

/**
    serial bus endpoint

    reads and writes are serialized separately, so a reader waiting for a frame never prevents
    writing. A frame written with `ack` reserves the [PendingReply] slot, which is released by
    the next read completing, with a frame or an error.
*/
pub struct SerialBus<R, T> {
    receive: Mutex<Receiver<R>>,
    transmit: Mutex<Transmitter<T>>,
    pending: PendingReply,
}

impl<R: UartRx, T: UartTx> SerialBus<R, T> {
    pub fn new(rx: R, tx: T) -> Self {
        Self {
            receive: Mutex::new(Receiver {
                uart: rx,
                chunk: std::vec![0; MAX_FRAME],
                reader: Reader::new(),
                }),
            transmit: Mutex::new(Transmitter {
                uart: tx,
                wire: std::vec![0; MAX_FRAME],
                }),
            pending: PendingReply::new(),
        }
    }

    /// whether a written frame is still waiting for its reply to be read
    pub fn is_pending(&self) -> bool {self.pending.is_busy()}

    /**
        seal and write a frame, waiting at most `timeout` for the line to be free and the bytes to leave

        when the frame asks for an acknowledge, this first waits for any previous acknowledged
        conversation to finish
    */
    pub async fn write(&self, frame: &mut Frame, timeout: Duration) -> Result<(), Error> {
        frame.seal();
        let reservation = if frame.header.flags.ack()
            {Some(self.pending.reserve_for(timeout).await.ok_or(Error::Timeout)?)}
        else
            {None};

        tokio::time::timeout(timeout, async {
            let mut transmit = self.transmit.lock().await;
            let transmit = &mut *transmit;
            let size = frame.encode(&mut transmit.wire)?;
            debug!("write - id: {} | cmd: {:#04x} | length: {} | checksum: {:#04x}",
                frame.id(), frame.header.cmd, frame.header.length, frame.header.checksum);
            transmit.uart.write_all(&transmit.wire[.. size]).await?;
            Ok::<_, Error>(())
            }).await
            .unwrap_or(Err(Error::Timeout))?;

        // the slot now waits for the reply read
        if let Some(reservation) = reservation
            {reservation.keep()}
        Ok(())
    }

    /**
        read the next frame, waiting at most `timeout` between two receive events

        any terminal reader state releases a pending acknowledge, so does dropping the read
        future. A receive fault also drops whatever is left in the driver
    */
    pub async fn read(&self, timeout: Duration) -> Result<Frame, Error> {
        let _release = self.pending.guard();
        let mut receive = self.receive.lock().await;
        let receive = &mut *receive;
        receive.reader.reset();

        loop {
            let event = match tokio::time::timeout(timeout, receive.uart.event(&mut receive.chunk)).await {
                Err(_) => Event::Timeout,
                Ok(Err(error)) => break Err(Error::Bus(error)),
                Ok(Ok(UartEvent::Fault)) => Event::Fault,
                Ok(Ok(UartEvent::Data(size))) => Event::Data(&receive.chunk[.. size.min(MAX_FRAME)]),
            };
            match receive.reader.feed(event) {
                State::WaitHeader | State::Accumulating => continue,
                State::ChecksumOk => {
                    let frame = receive.reader.frame();
                    debug!("read - id: {} | cmd: {:#04x} | length: {} | checksum: {:#04x}",
                        frame.id(), frame.header.cmd, frame.header.length, frame.header.checksum);
                    if receive.reader.discarded() != 0
                        {warn!("{} bytes after frame end were dropped", receive.reader.discarded())}
                    break Ok(frame.clone())
                },
                State::EventInvalid => {
                    reader::log_failure(&receive.reader);
                    receive.uart.reset_events();
                    break match receive.uart.flush_input() {
                        Ok(()) => Err(Error::Event),
                        Err(error) => Err(Error::Bus(error)),
                        }
                },
                _ => {
                    reader::log_failure(&receive.reader);
                    break Err(receive.reader.error().unwrap_or(Error::Event))
                },
            }
        }
    }
}

#[cfg(feature = "serial")]
impl SerialBus<driver::PortRx, driver::PortTx> {
    /// open an operating system serial port as a bus endpoint
    pub fn begin(path: impl AsRef<std::path::Path>, config: SerialConfig) -> Result<Self, Error> {
        let (rx, tx) = driver::open(path, config)?;
        Ok(Self::new(rx, tx))
    }
}

impl<R: UartRx, T: UartTx> Transport for SerialBus<R, T> {
    async fn write(&self, envelope: Envelope, timeout: Duration) -> Result<(), Error> {
        let flags = Flags::to(envelope.destination.into())
            .with_dir(envelope.response)
            .with_ack(envelope.ack)
            .with_error(envelope.error);
        let mut frame = Frame::from_message(&envelope.message, flags, &[])?;
        SerialBus::write(self, &mut frame, timeout).await
    }
    async fn read(&self, timeout: Duration) -> Result<Envelope, Error> {
        let frame = SerialBus::read(self, timeout).await?;
        let message = frame.message()?;
        let destination = u8::try_from(frame.id())
            .map_err(|_| FrameError::Address(frame.id()))?;
        let flags = frame.header.flags;
        Ok(Envelope {
            message,
            destination,
            ack: flags.ack(),
            response: flags.dir(),
            error: flags.error(),
        })
    }
    fn cancel_reply(&self) {
        self.pending.release()
    }
}
