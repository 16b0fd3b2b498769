/*!
    UART driver seam: the serial bus only needs receive events and a blocking write
*/

use core::future::Future;
use std::io;
use packbytes::FromBytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::frame::{Header, HEADER, MAX_PAYLOAD, SYNC};


/// what the UART driver reports when woken up
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UartEvent {
    /// that many bytes were copied in the receive buffer
    Data(usize),
    /// anything else: fifo overflow, framing or parity error, break
    Fault,
}

/// receive half of a UART
pub trait UartRx: Send + 'static {
    /// wait for the next receive event, received bytes are copied to `buffer`
    fn event(&mut self, buffer: &mut [u8]) -> impl Future<Output = io::Result<UartEvent>> + Send;
    /// discard everything received but not read yet
    fn flush_input(&mut self) -> io::Result<()>;
    /// drop pending receive events
    fn reset_events(&mut self) {}
}

/// transmit half of a UART
pub trait UartTx: Send + 'static {
    /// queue all bytes then wait for them to be sent
    fn write_all(&mut self, data: &[u8]) -> impl Future<Output = io::Result<()>> + Send;
}


/// default line rate of the rail
pub const BAUD_RATE: u32 = 921_600;

/// serial line settings
#[derive(Copy, Clone, Debug)]
pub struct SerialConfig {
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {baud_rate: BAUD_RATE}
    }
}


/**
    read a byte stream until one whole frame is in `buffer`, as a frame aligned receive event

    bytes before a sync byte are skipped. A header announcing a too long payload is given alone,
    so the reader rejects it and the next call resynchronizes on the following bytes.
    An end of stream is reported as a fault.
*/
pub async fn frame_event<P: AsyncRead + Unpin>(port: &mut P, buffer: &mut [u8]) -> io::Result<UartEvent> {
    match read_frame(port, buffer).await {
        Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => Ok(UartEvent::Fault),
        result => result,
    }
}

async fn read_frame<P: AsyncRead + Unpin>(port: &mut P, buffer: &mut [u8]) -> io::Result<UartEvent> {
    let header = buffer.get_mut(.. HEADER)
        .ok_or(io::ErrorKind::InvalidInput)?;
    port.read_exact(header).await?;
    while header[0] != SYNC {
        header.copy_within(1 .., 0);
        port.read_exact(&mut header[HEADER-1 ..]).await?;
    }
    let header = Header::from_le_bytes(<[u8; HEADER]>::try_from(&*header)
        .map_err(|_| io::ErrorKind::InvalidInput)?);
    let length = usize::from(header.length);
    if length > MAX_PAYLOAD
        {return Ok(UartEvent::Data(HEADER))}
    let payload = buffer.get_mut(HEADER .. HEADER + length)
        .ok_or(io::ErrorKind::InvalidInput)?;
    port.read_exact(payload).await?;
    Ok(UartEvent::Data(HEADER + length))
}


#[cfg(feature = "serial")]
pub use port::*;

#[cfg(feature = "serial")]
mod port {
    use super::*;
    use std::path::Path;
    use serial2_tokio::{SerialPort, CharSize, StopBits, Parity};
    use tokio::io::AsyncWriteExt;

    /// receive half of an operating system serial port
    pub struct PortRx(SerialPort);
    /// transmit half of an operating system serial port
    pub struct PortTx(SerialPort);

    /// open a serial port in raw mode, 8N1, and split it in halves
    pub fn open(path: impl AsRef<Path>, config: SerialConfig) -> io::Result<(PortRx, PortTx)> {
        let port = SerialPort::open(path, |mut settings: serial2_tokio::Settings| {
            settings.set_raw();
            settings.set_baud_rate(config.baud_rate)?;
            settings.set_char_size(CharSize::Bits8);
            settings.set_stop_bits(StopBits::One);
            settings.set_parity(Parity::None);
            Ok(settings)
            })?;
        let tx = port.try_clone()?;
        Ok((PortRx(port), PortTx(tx)))
    }

    impl UartRx for PortRx {
        async fn event(&mut self, buffer: &mut [u8]) -> io::Result<UartEvent> {
            // the tty does not split reads at frame boundaries
            frame_event(&mut self.0, buffer).await
        }
        fn flush_input(&mut self) -> io::Result<()> {
            self.0.discard_input_buffer()
        }
    }

    impl UartTx for PortTx {
        async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            AsyncWriteExt::write_all(&mut self.0, data).await?;
            AsyncWriteExt::flush(&mut self.0).await
        }
    }
}
