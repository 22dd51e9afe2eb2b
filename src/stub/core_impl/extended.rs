//! Session lifecycle: extended mode, target reset, detach, and kill.

use crate::arch::Isa;
use crate::conn::Connection;
use crate::dut::DutLink;
use crate::protocol::commands::Command;
use crate::protocol::ResponseWriter;
use crate::shadow::ShadowSystem;
use crate::stub::console_output;
use crate::stub::core_impl::HandlerStatus;
use crate::stub::error::ConnectionErrorKind;
use crate::stub::core_impl::SessionFlags;
use crate::stub::core_impl::StubImpl;
use crate::stub::error::InternalError;
use crate::stub::DisconnectReason;

impl<I: Isa> StubImpl<I> {
    pub(crate) fn handle_session<C: Connection>(
        &mut self,
        res: &mut ResponseWriter<'_, C>,
        sys: &mut ShadowSystem<I>,
        dut: &mut dyn DutLink<I>,
        command: Command<'_>,
    ) -> Result<HandlerStatus, InternalError<C::Error>> {
        let handler_status = match command {
            Command::ExclamationMark => {
                self.flags.insert(SessionFlags::EXTENDED);
                HandlerStatus::NeedsOk
            }

            Command::R => {
                // restart only means something in extended mode
                if !self.flags.contains(SessionFlags::EXTENDED) {
                    warn!("ignoring restart request outside extended mode");
                    return Ok(HandlerStatus::NoResponse);
                }

                console_output(res.as_conn(), b"rewinding replay and resetting DUT\n")
                    .map_err(|e| InternalError::Conn(e.0, ConnectionErrorKind::Write))?;

                dut.reset(true);
                dut.reset(false);

                // rewind the shadow to the initial snapshot; a readback
                // mismatch on the way is fatal as usual
                while sys.cursor() > 0 {
                    sys.unapply_prev()?;
                }

                // the restart packet is defined as reply-less
                HandlerStatus::NoResponse
            }

            Command::D => {
                // reply OK first; the client closes the connection and the
                // server returns to accept with the shadow intact
                res.write_str("OK")?;
                HandlerStatus::Disconnect(DisconnectReason::Detach)
            }

            Command::k => HandlerStatus::Disconnect(DisconnectReason::Kill),

            _ => unreachable!("routed by dispatch"),
        };

        Ok(handler_status)
    }
}
