use thiserror::Error;
use crate::frame::FrameError;

/// error regarding rail bus communication
#[derive(Error, Debug)]
pub enum Error {
    #[error("problem with bus driver")]
    Bus(#[from] std::io::Error),
    #[error("problem with received frame: {0}")]
    Frame(#[from] FrameError),
    #[error("no data arrived in expected time")]
    Timeout,
    #[error("unexpected receive event")]
    Event,
    #[error("no matching reply after {attempts} attempts")]
    NoReply {attempts: u8},
    #[error("module could not execute command {0:#04x}")]
    Remote(u8),
    #[error("{expected} modules expected, {found} answered")]
    ModuleCount {expected: usize, found: usize},
    #[error("id {0:#04x} cannot be assigned to a module")]
    ReservedId(u8),
}
