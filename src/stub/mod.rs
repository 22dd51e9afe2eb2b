//! The top-level packet loop: accept → read → dispatch → reply.

mod core_impl;
mod error;

pub use error::ConnectionErrorKind;
pub use error::StubError;

use crate::arch::Isa;
use crate::conn::Connection;
use crate::conn::ConnectionExt;
use crate::dut::DutLink;
use crate::protocol::RecvPacketBlocking;
use crate::protocol::RecvPacketError;
use crate::protocol::ResponseWriter;
use crate::protocol::ResponseWriterError;
use crate::shadow::ShadowSystem;
use crate::stub::core_impl::State;
use crate::stub::core_impl::StubImpl;

/// How a debug session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `D`: the client detached. The server keeps its shadow state and
    /// waits for the next connection.
    Detach,
    /// `k`: the client killed the target; the server process exits.
    Kill,
}

/// Serve the GDB Remote Serial Protocol to one connected client.
///
/// One `DebugStub` corresponds to one client session: per-session protocol
/// state (acknowledgement mode, extended mode, read sourcing) lives here and
/// dies with it, while the shadow system and DUT link outlive sessions.
pub struct DebugStub<I: Isa, C: ConnectionExt> {
    conn: C,
    frame_buf: Vec<u8>,
    scratch: Vec<u8>,
    inner: StubImpl<I>,
}

impl<I: Isa, C: ConnectionExt> DebugStub<I, C> {
    pub fn new(conn: C) -> Self {
        DebugStub {
            conn,
            frame_buf: Vec::with_capacity(core_impl::PACKET_SIZE),
            scratch: Vec::with_capacity(core_impl::PACKET_SIZE),
            inner: StubImpl::new(),
        }
    }

    /// Run the session to completion: packets are processed strictly in
    /// arrival order, and a response is fully emitted before the next packet
    /// is consumed.
    pub fn run(
        mut self,
        sys: &mut ShadowSystem<I>,
        dut: &mut dyn DutLink<I>,
    ) -> Result<DisconnectReason, StubError<C::Error>> {
        let Self {
            conn,
            frame_buf,
            scratch,
            inner,
        } = &mut self;

        conn.on_session_start()
            .map_err(|e| StubError::Connection(e, ConnectionErrorKind::Init))?;

        let mut recv = RecvPacketBlocking::new();
        loop {
            match recv.recv(frame_buf, || conn.read()) {
                Ok(()) => {}
                Err(RecvPacketError::Capacity) => return Err(StubError::PacketOverflow),
                Err(RecvPacketError::Connection(e)) => {
                    return Err(StubError::Connection(e, ConnectionErrorKind::Read))
                }
            }

            match inner.handle_frame(sys, dut, conn, frame_buf, scratch)? {
                State::Pump => {}
                State::Disconnect(reason) => return Ok(reason),
            }
        }
    }
}

/// Emit an `O <hex-text>` console-output packet: diagnostic text that the
/// debugger shows at the user's prompt, outside any request/response pair.
pub fn console_output<C: Connection>(
    conn: &mut C,
    text: &[u8],
) -> Result<(), ResponseWriterError<C::Error>> {
    let mut res = ResponseWriter::new(conn, false);
    res.write(b'O')?;
    res.write_hex_buf(text)?;
    res.flush()
}
