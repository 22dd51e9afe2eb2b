//! `tracedbg` presents a recorded hardware-simulation trace to GDB/LLDB as
//! a live remote target.
//!
//! A simulator runs a synthesized CPU (the DUT) and emits one record per
//! retired instruction. This crate maintains a *shadow* of the DUT's
//! architectural state, replays that recording in either direction, and
//! speaks the GDB Remote Serial Protocol over a TCP or UNIX-domain stream.
//! A stock debugger gets registers, memory, breakpoints, watchpoints,
//! and (because the history is fully materialised) reverse step and reverse
//! continue.
//!
//! The crate splits along the same lines as the protocol:
//!
//! - [`conn`]: byte-wise I/O traits over the client stream
//! - [`protocol`]: framing, checksums, transport encodings, command parsing
//! - [`arch`]: compile-time description of the simulated CPU
//! - [`trace`]: the retired-instruction record model and file format
//! - [`shadow`]: registers, memory, points, and the replay engine
//! - [`dut`]: the optional live-simulator link
//! - [`stub`]: the dispatcher and the accept → read → dispatch → reply loop

#[macro_use]
extern crate log;

pub mod arch;
pub mod common;
pub mod conn;
pub mod dut;
pub mod protocol;
pub mod shadow;
pub mod stub;
pub mod trace;

mod internal;

pub use stub::DebugStub;
pub use stub::DisconnectReason;
pub use stub::StubError;
