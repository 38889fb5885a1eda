//! Binary framing between host and driver.
//!
//! A frame is `MARKER name\0 len:u32le payload[len] crc32(payload):u32le`.
//! Acknowledgements travel back as text lines on the same link.

use thiserror::Error;

mod ack;
mod decoder;
mod frame;

pub use ack::{wait_for_ack, AckOutcome, AckPolicy};
pub use decoder::FrameDecoder;
pub use frame::{FrameWriter, PayloadReader};

/// Start-of-frame marker. Every received byte is matched against it.
pub const MARKER: &[u8] = b"##HEADER##";

/// Prefix of the driver's success line: `##COMPLETE##: <name>`.
pub const COMPLETE_TOKEN: &str = "##COMPLETE##";

/// Prefix of the driver's error line: `### <message>`.
pub const ERROR_TOKEN: &str = "###";

/// Payload lengths must be strictly below this.
pub const MAX_PAYLOAD: u32 = 50_000;

/// Longest accepted command name, in bytes.
pub const MAX_NAME: usize = 100;

/// Size of the decoder's staging buffer.
pub const STAGING_SIZE: usize = 8000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("bad crc on {name}: received {received:#010x}, computed {computed:#010x}")]
    BadCrc {
        name: String,
        received: u32,
        computed: u32,
    },

    #[error("message too long: {0} bytes")]
    Oversize(u32),

    #[error("name too long")]
    NameTooLong,

    #[error("out of payload memory ({0} bytes)")]
    OutOfMemory(usize),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("{command}: missing parameters")]
    MissingParameters { command: &'static str },

    #[error("{command}: missing colors")]
    MissingColors { command: &'static str },

    #[error("{command}: invalid parameter: {reason}")]
    InvalidParameter {
        command: &'static str,
        reason: String,
    },
}
