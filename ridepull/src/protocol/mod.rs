//! Transfer protocols shared by device drivers.

pub mod crc;
pub mod ymodem;

pub use ymodem::{FileHeader, YmodemConfig, YmodemReceiver};
