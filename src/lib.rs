/*!
    transport, framing and command dispatch of the rail bus chaining industrial I/O modules

    a coordinator board and a chain of modules talk over an RS-485 serial line and a CAN bus,
    exchanging 8 bytes [Message]s. The framing layers ([message], [frame]) build without `std`,
    the async node stack ([bus], [system]) needs the `node` feature.

    ```text
    System ─┬─ Bus<SerialBus> ── frame reader ── UART driver
            ├─ Bus<CanBus> ──── CAN driver
            ├─ Registry
            └─ Identity ──────── key value store
    ```
*/
#![cfg_attr(not(feature = "std"), no_std)]

mod utils;
pub mod message;
pub mod frame;

#[cfg(feature = "node")]
mod mutex;
#[cfg(feature = "node")]
pub mod error;
#[cfg(feature = "node")]
pub mod transport;
#[cfg(feature = "node")]
pub mod serial;
#[cfg(feature = "node")]
pub mod can;
#[cfg(feature = "node")]
pub mod bus;
#[cfg(feature = "node")]
pub mod registry;
#[cfg(feature = "node")]
pub mod identity;
#[cfg(feature = "node")]
pub mod system;
#[cfg(all(feature = "node", any(test, feature = "sim")))]
pub mod sim;

pub use message::Message;
#[cfg(feature = "node")]
pub use error::Error;
