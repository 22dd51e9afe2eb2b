//! The resume family: step, continue, and their reverse counterparts, plus
//! stop-reply formatting.
//!
//! These are the only handlers that run for more than a packet's worth of
//! time: a continue replays retired instructions until something fires,
//! polling the connection for the client's interrupt byte as it goes. The
//! stop reply is written only once the replay has come to rest.

use crate::arch::Isa;
use crate::common::hart_to_tid;
use crate::conn::Connection;
use crate::conn::ConnectionExt;
use crate::dut::DutLink;
use crate::protocol::commands::Command;
use crate::protocol::commands::VContKind;
use crate::protocol::ResponseWriter;
use crate::shadow::ReplayLogPosition;
use crate::shadow::ShadowSystem;
use crate::shadow::Stop;
use crate::shadow::WatchKind;
use crate::stub::core_impl::HandlerStatus;
use crate::stub::core_impl::State;
use crate::stub::core_impl::StubImpl;
use crate::stub::error::InternalError;
use crate::stub::error::StubError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResumeAction {
    Step,
    Continue,
    ReverseStep,
    ReverseContinue,
}

impl<I: Isa> StubImpl<I> {
    pub(crate) fn handle_resume<C: ConnectionExt>(
        &mut self,
        sys: &mut ShadowSystem<I>,
        _dut: &mut dyn DutLink<I>,
        conn: &mut C,
        command: Command<'_>,
    ) -> Result<State, StubError<C::Error>> {
        let action = match command {
            Command::s { addr } | Command::c { addr } if addr.is_some() => {
                // resuming at an arbitrary address makes no sense against a
                // recording; the cursor dictates where execution is
                warn!("ignoring resume address {:#x?}", addr);
                if matches!(command, Command::s { .. }) {
                    ResumeAction::Step
                } else {
                    ResumeAction::Continue
                }
            }
            Command::s { .. } => ResumeAction::Step,
            Command::c { .. } => ResumeAction::Continue,
            Command::S { sig, .. } => {
                // a recording can't take a signal; replay as a plain step
                debug!("ignoring signal {} on step", sig);
                ResumeAction::Step
            }
            Command::C { sig, .. } => {
                debug!("ignoring signal {} on continue", sig);
                ResumeAction::Continue
            }
            Command::bs => ResumeAction::ReverseStep,
            Command::bc => ResumeAction::ReverseContinue,
            Command::vCont { actions } => {
                // the replay advances the whole system; any step action
                // makes the packet a step, everything else is a continue
                let step = actions.iter().any(|a| {
                    matches!(a.kind, VContKind::Step | VContKind::StepWithSig(_))
                });
                if step {
                    ResumeAction::Step
                } else {
                    ResumeAction::Continue
                }
            }
            _ => unreachable!("routed by handle_command"),
        };

        let outcome = match action {
            ResumeAction::Step => sys.step_forward(1),
            ResumeAction::ReverseStep => sys.step_reverse(1),
            ResumeAction::Continue => sys.continue_forward(|| poll_interrupt(conn)),
            ResumeAction::ReverseContinue => sys.continue_reverse(|| poll_interrupt(conn)),
        };

        let mut res = ResponseWriter::new(conn, self.flags.remote_log());
        let status = match outcome {
            Ok(stop) => self
                .write_stop_reply(&mut res, sys, &stop)
                .map(|()| HandlerStatus::Handled),
            Err(e) => Err(InternalError::from(e)),
        };
        self.finish_response(res, status)
    }

    /// Format a stop-reply packet: `S XX`, or `T XX` followed by
    /// semicolon-terminated `key:value` fields.
    pub(crate) fn write_stop_reply<C: Connection>(
        &mut self,
        res: &mut ResponseWriter<'_, C>,
        sys: &ShadowSystem<I>,
        stop: &Stop<I::Xlen>,
    ) -> Result<(), InternalError<C::Error>> {
        let sig = stop.signal();
        let multicore = sys.num_cores() > 1;

        // stops land the thread selection on the stopping core
        if let Some(hart) = stop.hart() {
            self.current_mem_tid = hart_to_tid(hart);
        }

        let reason_less = matches!(
            stop,
            Stop::Initial | Stop::DoneStep { .. } | Stop::Illegal { .. } | Stop::Interrupted
        );

        if reason_less && !multicore {
            res.write(b'S')?;
            res.write_hex(sig.0)?;
            return Ok(());
        }

        res.write(b'T')?;
        res.write_hex(sig.0)?;

        match stop {
            Stop::SwBreak { .. } => res.write_str("swbreak:;")?,
            Stop::HwBreak { .. } => res.write_str("hwbreak:;")?,
            Stop::Watch { kind, addr, .. } => {
                res.write_str(match kind {
                    WatchKind::Write => "watch:",
                    WatchKind::Read => "rwatch:",
                    WatchKind::ReadWrite => "awatch:",
                })?;
                res.write_word(*addr)?;
                res.write_str(";")?;
            }
            Stop::LogEdge(pos) => {
                res.write_str("replaylog:")?;
                res.write_str(match pos {
                    ReplayLogPosition::Begin => "begin",
                    ReplayLogPosition::End => "end",
                })?;
                res.write_str(";")?;
            }
            Stop::Initial | Stop::DoneStep { .. } | Stop::Illegal { .. } | Stop::Interrupted => {}
        }

        if multicore {
            let hart = stop.hart().unwrap_or_else(|| self.current_hart());
            res.write_str("thread:")?;
            self.write_tid(res, hart_to_tid(hart))?;
            res.write_str(";")?;
            res.write_str("core:")?;
            res.write_num(hart as u64)?;
            res.write_str(";")?;
        }

        Ok(())
    }
}

/// Non-blocking probe for the client's out-of-band interrupt byte; consumes
/// it when present.
fn poll_interrupt<C: ConnectionExt>(conn: &mut C) -> bool {
    match conn.peek() {
        Ok(Some(0x03)) => {
            let _ = conn.read();
            true
        }
        _ => false,
    }
}
