//! Narrow interface to the grid message decoder.
//!
//! The index, reader and everything above them only talk to messages
//! through these traits. [`grib2::Grib2Decoder`] is the adapter used by
//! the command-line tool.

pub mod grib2;

use crate::error::Result;
use std::path::Path;

/// One encoded message as seen by the checker
pub trait RawMessage: Send {
    /// Integer metadata value, `None` when the message does not define the key
    fn scalar(&self, key: &str) -> Option<i64>;

    /// Field values in grid order, masked points set to [`crate::constants::MISSING_VALUE`]
    fn values(&self) -> Result<Vec<f64>>;

    /// Length of the encoded message in bytes
    fn total_length(&self) -> u64;
}

/// Sequence of messages read from one file
pub type MessageStream = Box<dyn Iterator<Item = Result<Box<dyn RawMessage>>> + Send>;

/// Decoder for a grid message format
pub trait Decoder: Send + Sync {
    /// Iterate over every message of a file, in file order
    ///
    /// Fails if the file cannot be opened.
    fn open(&self, path: &Path) -> Result<MessageStream>;

    /// Decode a single message from its raw bytes
    fn parse(&self, bytes: Vec<u8>) -> Result<Box<dyn RawMessage>>;
}
