use std::collections::BTreeMap;

use crate::arch::Isa;
use crate::common::Tid;
use crate::common::SINGLE_THREAD_TID;
use crate::conn::Connection;
use crate::conn::ConnectionExt;
use crate::dut::DutLink;
use crate::protocol::commands::Command;
use crate::protocol::Packet;
use crate::protocol::PacketParseError;
use crate::protocol::ResponseWriter;
use crate::shadow::ShadowSystem;
use crate::stub::error::ConnectionErrorKind;
use crate::stub::error::InternalError;
use crate::stub::error::StubError;
use crate::stub::DisconnectReason;

mod base;
mod breakpoints;
mod extended;
mod monitor_cmd;
mod no_ack_mode;
mod query;
mod resume;

/// Advertised to the client via `qSupported`; bounds the size of `M`/`X`
/// payloads it will send.
pub(crate) const PACKET_SIZE: usize = 4096;

/// Consecutive transport failures tolerated before hanging up.
const MAX_TRANSPORT_ERRORS: u8 = 3;

pub(crate) enum HandlerStatus {
    Handled,
    NeedsOk,
    /// Commands like `R` that the protocol defines as reply-less.
    NoResponse,
    Disconnect(DisconnectReason),
}

pub(crate) enum State {
    Pump,
    Disconnect(DisconnectReason),
}

#[derive(Copy, Clone)]
#[repr(transparent)]
pub(crate) struct SessionFlags(u16);

bitflags::bitflags! {
    impl SessionFlags: u16 {
        const NO_ACK_MODE = 1 << 0;
        const MULTIPROCESS = 1 << 1;
        /// Client advertised `error-message+`: errors as `E.<hex>`.
        const ERROR_MSG_GDB = 1 << 2;
        /// Client sent `QEnableErrorStrings`: errors as `E NN;<hex>`.
        const ERROR_MSG_LLDB = 1 << 3;
        const EXTENDED = 1 << 4;
        /// Register reads go to the live DUT instead of the shadow.
        const REG_SOURCE_DUT = 1 << 5;
        /// Memory reads go to the live DUT instead of the shadow.
        const MEM_SOURCE_DUT = 1 << 6;
        /// Protocol dump to stderr (`set remote log on`).
        const REMOTE_LOG = 1 << 7;
    }
}

impl SessionFlags {
    #[inline(always)]
    pub(crate) fn no_ack_mode(&self) -> bool {
        self.contains(SessionFlags::NO_ACK_MODE)
    }

    #[inline(always)]
    pub(crate) fn multiprocess(&self) -> bool {
        self.contains(SessionFlags::MULTIPROCESS)
    }

    #[inline(always)]
    pub(crate) fn remote_log(&self) -> bool {
        self.contains(SessionFlags::REMOTE_LOG)
    }
}

/// Per-session protocol state and the packet dispatcher.
///
/// Dropped (and re-created) on detach, which is what resets the
/// acknowledgement, extended-mode and sourcing flags between clients.
pub(crate) struct StubImpl<I: Isa> {
    pub(crate) flags: SessionFlags,
    /// Feature table the client announced in `qSupported`.
    pub(crate) client_features: BTreeMap<String, String>,
    /// Thread selected by `Hg`; register/memory commands address this core.
    pub(crate) current_mem_tid: Tid,
    transport_errors: u8,
    _isa: core::marker::PhantomData<I>,
}

impl<I: Isa> StubImpl<I> {
    pub(crate) fn new() -> Self {
        StubImpl {
            flags: SessionFlags::empty(),
            client_features: BTreeMap::new(),
            current_mem_tid: SINGLE_THREAD_TID,
            transport_errors: 0,
            _isa: core::marker::PhantomData,
        }
    }

    /// The 0-based hart the current thread selection addresses.
    pub(crate) fn current_hart(&self) -> usize {
        self.current_mem_tid.get() - 1
    }

    pub(crate) fn handle_frame<C: ConnectionExt>(
        &mut self,
        sys: &mut ShadowSystem<I>,
        dut: &mut dyn DutLink<I>,
        conn: &mut C,
        frame: &[u8],
        scratch: &mut Vec<u8>,
    ) -> Result<State, StubError<C::Error>> {
        if self.flags.remote_log() {
            eprintln!("REMOTE: <- {}", String::from_utf8_lossy(frame));
        }

        let packet = match Packet::parse(frame, scratch) {
            Ok(packet) => packet,
            Err(
                e @ (PacketParseError::ChecksumMismatched { .. }
                | PacketParseError::MissingChecksum
                | PacketParseError::MalformedChecksum),
            ) => {
                // transport damage: refuse the frame and wait for the
                // retransmission
                warn!("transport error: {:?}", e);
                if !self.flags.no_ack_mode() {
                    conn.write(b'-')
                        .map_err(|e| StubError::Connection(e, ConnectionErrorKind::Write))?;
                }
                return self.count_transport_error();
            }
            Err(e) => {
                // frame intact but body unparseable; acknowledge receipt and
                // report the failure
                debug!("malformed packet: {:?}", e);
                self.ack(conn)?;
                let mut res = ResponseWriter::new(conn, self.flags.remote_log());
                self.write_error_reply(&mut res, 22, Some("malformed packet"))
                    .map_err(internal_to_fatal)?;
                res.flush().map_err(|e| {
                    StubError::Connection(e.0, ConnectionErrorKind::Write)
                })?;
                self.transport_errors = 0;
                return Ok(State::Pump);
            }
        };

        match packet {
            Packet::Ack => Ok(State::Pump),
            Packet::Nack => {
                warn!("client rejected our last response");
                self.count_transport_error()
            }
            Packet::Interrupt => {
                // an interrupt that arrives while already stopped still
                // deserves a stop reply
                debug!("<-- interrupt byte");
                self.transport_errors = 0;
                let stop = crate::shadow::Stop::Interrupted;
                let mut res = ResponseWriter::new(conn, self.flags.remote_log());
                self.write_stop_reply(&mut res, sys, &stop)
                    .map_err(internal_to_fatal)?;
                res.flush()
                    .map_err(|e| StubError::Connection(e.0, ConnectionErrorKind::Write))?;
                Ok(State::Pump)
            }
            Packet::Command(command) => {
                self.transport_errors = 0;
                self.ack(conn)?;
                self.handle_command(sys, dut, conn, command)
            }
        }
    }

    fn ack<C: Connection>(&mut self, conn: &mut C) -> Result<(), StubError<C::Error>> {
        if !self.flags.no_ack_mode() {
            conn.write(b'+')
                .map_err(|e| StubError::Connection(e, ConnectionErrorKind::Write))?;
        }
        Ok(())
    }

    fn count_transport_error<E>(&mut self) -> Result<State, StubError<E>> {
        self.transport_errors += 1;
        if self.transport_errors >= MAX_TRANSPORT_ERRORS {
            return Err(StubError::ClientAbandoned);
        }
        Ok(State::Pump)
    }

    fn handle_command<C: ConnectionExt>(
        &mut self,
        sys: &mut ShadowSystem<I>,
        dut: &mut dyn DutLink<I>,
        conn: &mut C,
        command: Command<'_>,
    ) -> Result<State, StubError<C::Error>> {
        // resume-family commands poll the connection mid-handler, so they
        // build their own response writer once the replay has stopped
        if matches!(
            command,
            Command::s { .. }
                | Command::S { .. }
                | Command::c { .. }
                | Command::C { .. }
                | Command::bc
                | Command::bs
                | Command::vCont { .. }
        ) {
            return self.handle_resume(sys, dut, conn, command);
        }

        let mut res = ResponseWriter::new(conn, self.flags.remote_log());
        let outcome = self.dispatch(&mut res, sys, dut, command);
        self.finish_response(res, outcome)
    }

    /// Translate a handler outcome into wire bytes and loop state. Shared by
    /// the query path and the resume path.
    pub(crate) fn finish_response<C: Connection>(
        &mut self,
        mut res: ResponseWriter<'_, C>,
        outcome: Result<HandlerStatus, InternalError<C::Error>>,
    ) -> Result<State, StubError<C::Error>> {
        let disconnect = match outcome {
            Ok(HandlerStatus::Handled) => None,
            Ok(HandlerStatus::NeedsOk) => {
                res.write_str("OK").map_err(resp_to_fatal)?;
                None
            }
            Ok(HandlerStatus::NoResponse) => return Ok(State::Pump),
            Ok(HandlerStatus::Disconnect(reason)) => Some(reason),
            Err(InternalError::NonFatal { code, msg }) => {
                self.write_error_reply(&mut res, code, msg.as_deref())
                    .map_err(internal_to_fatal)?;
                None
            }
            Err(e) => return Err(internal_to_fatal(e)),
        };

        // every response is flushed, except the reply to a kill packet:
        // the client is told nothing and the server simply goes away
        let is_kill = matches!(disconnect, Some(DisconnectReason::Kill));
        if !is_kill {
            res.flush()
                .map_err(|e| StubError::Connection(e.0, ConnectionErrorKind::Write))?;
        }

        Ok(match disconnect {
            Some(reason) => State::Disconnect(reason),
            None => State::Pump,
        })
    }

    fn dispatch<C: Connection>(
        &mut self,
        res: &mut ResponseWriter<'_, C>,
        sys: &mut ShadowSystem<I>,
        dut: &mut dyn DutLink<I>,
        command: Command<'_>,
    ) -> Result<HandlerStatus, InternalError<C::Error>> {
        match command {
            Command::g
            | Command::G { .. }
            | Command::p { .. }
            | Command::P { .. }
            | Command::m { .. }
            | Command::M { .. }
            | Command::x { .. }
            | Command::X { .. } => self.handle_base(res, sys, dut, command),

            Command::z { .. } | Command::Z { .. } => self.handle_breakpoints(sys, command),

            Command::qSupported { .. }
            | Command::qXferFeaturesRead { .. }
            | Command::qC
            | Command::qAttached
            | Command::qfThreadInfo
            | Command::qsThreadInfo
            | Command::QuestionMark
            | Command::QEnableErrorStrings
            | Command::H { .. }
            | Command::T { .. }
            | Command::vCont_query
            | Command::vCtrlC => self.handle_query(res, sys, command),

            Command::QStartNoAckMode => self.handle_no_ack_mode(),

            Command::qRcmd { cmd } => self.handle_monitor_cmd(res, sys, dut, cmd),

            Command::ExclamationMark | Command::R | Command::D | Command::k => {
                self.handle_session(res, sys, dut, command)
            }

            // resume commands are routed before dispatch
            Command::s { .. }
            | Command::S { .. }
            | Command::c { .. }
            | Command::C { .. }
            | Command::bc
            | Command::bs
            | Command::vCont { .. } => unreachable!("resume commands take the polling path"),

            Command::Unknown => {
                // empty reply: "not supported"
                Ok(HandlerStatus::Handled)
            }
        }
    }

    /// Reply `E <code>` in the richest error form the client negotiated.
    pub(crate) fn write_error_reply<C: Connection>(
        &self,
        res: &mut ResponseWriter<'_, C>,
        code: u8,
        msg: Option<&str>,
    ) -> Result<(), InternalError<C::Error>> {
        if self.flags.contains(SessionFlags::ERROR_MSG_LLDB) {
            res.write(b'E')?;
            res.write_hex(code)?;
            if let Some(msg) = msg {
                res.write(b';')?;
                res.write_hex_buf(msg.as_bytes())?;
            }
            return Ok(());
        }

        if self.flags.contains(SessionFlags::ERROR_MSG_GDB) {
            if let Some(msg) = msg {
                res.write_str("E.")?;
                res.write_hex_buf(msg.as_bytes())?;
                return Ok(());
            }
        }

        res.write(b'E')?;
        res.write_hex(code)?;
        Ok(())
    }
}

pub(crate) fn resp_to_fatal<C>(e: crate::protocol::ResponseWriterError<C>) -> StubError<C> {
    StubError::Connection(e.0, ConnectionErrorKind::Write)
}

pub(crate) fn internal_to_fatal<C>(e: InternalError<C>) -> StubError<C> {
    match e {
        InternalError::Conn(e, kind) => StubError::Connection(e, kind),
        InternalError::Fatal(e) => StubError::Shadow(e),
        InternalError::NonFatal { .. } => {
            unreachable!("non-fatal errors are answered on the wire")
        }
    }
}
