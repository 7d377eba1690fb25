pub mod command;
pub mod framer;

pub use command::{Command, CommandRequest, JsonCommandHandler};
pub use framer::{CommandHandler, LineFramer};

/// Serial line settings reported by the host; informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCoding {
    pub bit_rate: u32,
    pub stop_bits: u8,
    pub parity: u8,
    pub data_bits: u8,
}
