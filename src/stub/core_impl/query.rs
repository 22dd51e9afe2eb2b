//! Feature negotiation, thread plumbing, and the stop-reason query.

use crate::arch::Isa;
use crate::common::hart_to_tid;
use crate::common::Tid;
use crate::common::FAKE_PID;
use crate::conn::Connection;
use crate::protocol::commands::Command;
use crate::protocol::commands::HOp;
use crate::protocol::common::thread_id::IdKind;
use crate::protocol::common::thread_id::ThreadId;
use crate::protocol::ResponseWriter;
use crate::shadow::ShadowSystem;
use crate::stub::core_impl::HandlerStatus;
use crate::stub::core_impl::SessionFlags;
use crate::stub::core_impl::StubImpl;
use crate::stub::core_impl::PACKET_SIZE;
use crate::stub::error::InternalError;

impl<I: Isa> StubImpl<I> {
    pub(crate) fn handle_query<C: Connection>(
        &mut self,
        res: &mut ResponseWriter<'_, C>,
        sys: &mut ShadowSystem<I>,
        command: Command<'_>,
    ) -> Result<HandlerStatus, InternalError<C::Error>> {
        let handler_status = match command {
            Command::qSupported { features } => {
                self.negotiate_features(features);

                res.write_str("PacketSize=")?;
                res.write_num(PACKET_SIZE as u64)?;
                res.write_str(concat!(
                    ";vContSupported+",
                    ";swbreak+",
                    ";hwbreak+",
                    ";error-message+",
                    ";ReverseStep+",
                    ";ReverseContinue+",
                    ";QStartNoAckMode+",
                    ";multiprocess-",
                    ";binary-upload-",
                ))?;
                if I::target_description_xml().is_some() {
                    res.write_str(";qXfer:features:read+")?;
                }
                HandlerStatus::Handled
            }

            Command::qXferFeaturesRead { annex, offset, len } => {
                let xml = match I::target_description_xml() {
                    Some(xml) => xml.as_bytes(),
                    // not advertised on this build; empty "unsupported" reply
                    None => return Ok(HandlerStatus::Handled),
                };

                if annex != b"target.xml" {
                    return Err(InternalError::NonFatal {
                        code: 0,
                        msg: Some("unknown annex".to_owned()),
                    });
                }

                let offset = offset as usize;
                let len = (len as usize).min(PACKET_SIZE - 16);
                if offset >= xml.len() {
                    res.write(b'l')?;
                } else {
                    let end = (offset + len).min(xml.len());
                    res.write(if end == xml.len() { b'l' } else { b'm' })?;
                    res.write_binary(&xml[offset..end])?;
                }
                HandlerStatus::Handled
            }

            Command::QuestionMark => {
                let stop = *sys.last_stop();
                self.write_stop_reply(res, sys, &stop)?;
                HandlerStatus::Handled
            }

            Command::QEnableErrorStrings => {
                self.flags.insert(SessionFlags::ERROR_MSG_LLDB);
                HandlerStatus::NeedsOk
            }

            Command::qC => {
                res.write_str("QC")?;
                self.write_tid(res, self.current_mem_tid)?;
                HandlerStatus::Handled
            }

            Command::qAttached => {
                // the simulation always pre-exists the debug session
                res.write_str("1")?;
                HandlerStatus::Handled
            }

            Command::qfThreadInfo => {
                res.write_str("m")?;
                for hart in 0..sys.num_cores() {
                    if hart != 0 {
                        res.write_str(",")?;
                    }
                    self.write_tid(res, hart_to_tid(hart))?;
                }
                HandlerStatus::Handled
            }

            Command::qsThreadInfo => {
                res.write_str("l")?;
                HandlerStatus::Handled
            }

            Command::H { op, thread } => {
                let tid = self.resolve_tid(sys, thread)?;
                match op {
                    HOp::Other => self.current_mem_tid = tid,
                    // replay always advances the system as a whole, so the
                    // continue-thread selection carries no meaning here;
                    // accept it for protocol compliance
                    HOp::StepContinue => {}
                }
                HandlerStatus::NeedsOk
            }

            Command::T { thread } => {
                let alive = match thread.tid {
                    IdKind::WithId(tid) => tid.get() <= sys.num_cores(),
                    _ => true,
                };
                if alive {
                    HandlerStatus::NeedsOk
                } else {
                    return Err(InternalError::NonFatal {
                        code: 3, // ESRCH
                        msg: Some("no such thread".to_owned()),
                    });
                }
            }

            Command::vCont_query => {
                res.write_str("vCont;c;C;s;S")?;
                HandlerStatus::Handled
            }

            Command::vCtrlC => {
                // the replay is stopped between packets by construction
                HandlerStatus::NeedsOk
            }

            _ => unreachable!("routed by dispatch"),
        };

        Ok(handler_status)
    }

    /// Parse the client's `qSupported` feature list: `name+`, `name-`,
    /// `name?`, or `name=value`, semicolon-delimited.
    fn negotiate_features(&mut self, features: &[u8]) {
        for entry in features.split(|&b| b == b';') {
            if entry.is_empty() {
                continue;
            }

            let (name, value) = match entry.last() {
                Some(b'+') | Some(b'-') | Some(b'?') => {
                    let (name, value) = entry.split_at(entry.len() - 1);
                    (name, value)
                }
                _ => match entry.iter().position(|&b| b == b'=') {
                    Some(pos) => (&entry[..pos], &entry[pos + 1..]),
                    None => (entry, &b""[..]),
                },
            };

            let name = String::from_utf8_lossy(name).into_owned();
            let value = String::from_utf8_lossy(value).into_owned();

            match (name.as_str(), value.as_str()) {
                ("multiprocess", "+") => self.flags.insert(SessionFlags::MULTIPROCESS),
                ("error-message", "+") => self.flags.insert(SessionFlags::ERROR_MSG_GDB),
                _ => {}
            }

            self.client_features.insert(name, value);
        }

        debug!("client features: {:?}", self.client_features);
    }

    /// Resolve a wire thread ID to a concrete thread, validating it against
    /// the core count. `Any` picks the first thread; `All` keeps the current
    /// selection (memory access needs one specific core).
    pub(crate) fn resolve_tid<E>(
        &self,
        sys: &ShadowSystem<I>,
        thread: ThreadId,
    ) -> Result<Tid, InternalError<E>> {
        match thread.tid {
            IdKind::Any => Ok(hart_to_tid(0)),
            IdKind::All => Ok(self.current_mem_tid),
            IdKind::WithId(tid) => {
                if tid.get() <= sys.num_cores() {
                    Ok(tid)
                } else {
                    Err(InternalError::NonFatal {
                        code: 3, // ESRCH
                        msg: Some("no such thread".to_owned()),
                    })
                }
            }
        }
    }

    pub(crate) fn write_tid<C: Connection>(
        &self,
        res: &mut ResponseWriter<'_, C>,
        tid: Tid,
    ) -> Result<(), InternalError<C::Error>> {
        res.write_thread_id(tid, self.flags.multiprocess().then_some(FAKE_PID))?;
        Ok(())
    }
}
