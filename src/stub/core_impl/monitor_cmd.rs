//! `qRcmd`: the operator "monitor" sub-language.
//!
//! Each recognised line flips a server flag or requests a DUT action; the
//! reply is a hex-encoded console text line carried in the `qRcmd` response
//! body, which the debugger prints at the user's prompt.

use crate::arch::Isa;
use crate::conn::Connection;
use crate::dut::DutLink;
use crate::protocol::ResponseWriter;
use crate::shadow::ShadowSystem;
use crate::stub::core_impl::HandlerStatus;
use crate::stub::core_impl::SessionFlags;
use crate::stub::core_impl::StubImpl;
use crate::stub::error::InternalError;

const HELP: &str = "\
tracedbg monitor commands:
  set remote log on|off      protocol trace to stderr
  set waveform dump on|off   advise the simulator to dump waveforms
  set register=dut|shadow    source of register reads
  set memory=dut|shadow      source of memory reads
  reset assert               assert the DUT reset line
  reset release              release the DUT reset line
  help                       this text
";

impl<I: Isa> StubImpl<I> {
    pub(crate) fn handle_monitor_cmd<C: Connection>(
        &mut self,
        res: &mut ResponseWriter<'_, C>,
        _sys: &mut ShadowSystem<I>,
        dut: &mut dyn DutLink<I>,
        cmd: &[u8],
    ) -> Result<HandlerStatus, InternalError<C::Error>> {
        let line = match core::str::from_utf8(cmd) {
            Ok(line) => line.trim(),
            Err(_) => {
                res.write_hex_buf(b"monitor command must be valid UTF-8\n")?;
                return Ok(HandlerStatus::Handled);
            }
        };

        let reply: String = match line {
            "set remote log on" => {
                self.flags.insert(SessionFlags::REMOTE_LOG);
                "remote protocol logging enabled\n".into()
            }
            "set remote log off" => {
                self.flags.remove(SessionFlags::REMOTE_LOG);
                "remote protocol logging disabled\n".into()
            }
            "set waveform dump on" => {
                dut.waveform_dump(true);
                "waveform dump requested on\n".into()
            }
            "set waveform dump off" => {
                dut.waveform_dump(false);
                "waveform dump requested off\n".into()
            }
            "set register=dut" => {
                self.flags.insert(SessionFlags::REG_SOURCE_DUT);
                "register reads sourced from DUT\n".into()
            }
            "set register=shadow" => {
                self.flags.remove(SessionFlags::REG_SOURCE_DUT);
                "register reads sourced from shadow\n".into()
            }
            "set memory=dut" => {
                self.flags.insert(SessionFlags::MEM_SOURCE_DUT);
                "memory reads sourced from DUT\n".into()
            }
            "set memory=shadow" => {
                self.flags.remove(SessionFlags::MEM_SOURCE_DUT);
                "memory reads sourced from shadow\n".into()
            }
            "reset assert" => {
                dut.reset(true);
                "DUT reset asserted\n".into()
            }
            "reset release" => {
                dut.reset(false);
                "DUT reset released\n".into()
            }
            "help" => HELP.into(),
            _ => format!("monitor command not recognised: '{}'\n", line),
        };

        res.write_hex_buf(reply.as_bytes())?;
        Ok(HandlerStatus::Handled)
    }
}
