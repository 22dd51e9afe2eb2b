//! The wire side of the GDB Remote Serial Protocol: framing, checksums,
//! transport encodings, and command parsing.

pub mod commands;
pub mod common;

mod packet;
mod recv_packet;
mod response_writer;

pub use packet::Packet;
pub use packet::PacketBuf;
pub use packet::PacketParseError;
pub use recv_packet::RecvPacketBlocking;
pub use recv_packet::RecvPacketError;
pub use response_writer::Error as ResponseWriterError;
pub use response_writer::ResponseWriter;
