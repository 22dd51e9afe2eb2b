//! Register and memory access handlers.
//!
//! Reads honour the `set register=` / `set memory=` sourcing switches: the
//! shadow is the default authority, the live DUT answers when selected (and
//! the shadow fills in whatever the DUT can't provide). Writes always go to
//! both.

use crate::arch::Isa;
use num_traits::FromPrimitive;
use crate::conn::Connection;
use crate::dut::DutLink;
use crate::protocol::commands::Command;
use crate::protocol::ResponseWriter;
use crate::shadow::ShadowError;
use crate::shadow::ShadowSystem;
use crate::stub::core_impl::HandlerStatus;
use crate::stub::core_impl::SessionFlags;
use crate::stub::core_impl::StubImpl;
use crate::stub::error::InternalError;

/// Upper bound on a single `m`/`x` request; anything bigger is a client bug.
const MAX_READ_LEN: u64 = 0x100_0000;

impl<I: Isa> StubImpl<I> {
    pub(crate) fn handle_base<C: Connection>(
        &mut self,
        res: &mut ResponseWriter<'_, C>,
        sys: &mut ShadowSystem<I>,
        dut: &mut dyn DutLink<I>,
        command: Command<'_>,
    ) -> Result<HandlerStatus, InternalError<C::Error>> {
        let hart = self.current_hart();

        let handler_status = match command {
            Command::g => {
                let bytes = self.read_all_sourced(sys, dut, hart)?;
                res.write_hex_buf(&bytes)?;
                HandlerStatus::Handled
            }
            Command::G { vals } => {
                sys.reg_write_all(hart, vals)?;
                mirror_reg_write(sys, dut, hart, vals)?;
                HandlerStatus::NeedsOk
            }
            Command::p { reg } => {
                let slot = reg as usize;
                let bytes = self.read_one_sourced(sys, dut, hart, slot)?;
                res.write_hex_buf(&bytes)?;
                HandlerStatus::Handled
            }
            Command::P { reg, val } => {
                let slot = reg as usize;
                sys.reg_write_one(hart, slot, val)?;
                dut.reg_write(hart, slot, val);
                HandlerStatus::NeedsOk
            }
            Command::m { addr, len } => {
                let bytes = self.mem_read_sourced(sys, dut, hart, addr, len)?;
                res.write_hex_buf(&bytes)?;
                HandlerStatus::Handled
            }
            Command::M { addr, val } => {
                let addr = to_xlen::<I, C::Error>(addr)?;
                sys.mem_write(hart, addr, val)?;
                dut.mem_write(addr, val);
                HandlerStatus::NeedsOk
            }
            Command::x { addr, len } => {
                if len == 0 {
                    // availability probe
                    HandlerStatus::NeedsOk
                } else {
                    let bytes = self.mem_read_sourced(sys, dut, hart, addr, len)?;
                    res.write(b'b')?;
                    res.write_binary(&bytes)?;
                    HandlerStatus::Handled
                }
            }
            Command::X { addr, val } => {
                let addr = to_xlen::<I, C::Error>(addr)?;
                sys.mem_write(hart, addr, val)?;
                dut.mem_write(addr, val);
                HandlerStatus::NeedsOk
            }
            _ => unreachable!("routed by dispatch"),
        };

        Ok(handler_status)
    }

    fn read_all_sourced(
        &self,
        sys: &ShadowSystem<I>,
        dut: &mut dyn DutLink<I>,
        hart: usize,
    ) -> Result<Vec<u8>, ShadowError> {
        if !self.flags.contains(SessionFlags::REG_SOURCE_DUT) {
            return sys.reg_read_all(hart);
        }

        let num_slots = sys.core(hart)?.regs.num_slots();
        let mut out = Vec::with_capacity(sys.core(hart)?.regs.layout_len());
        for slot in 0..num_slots {
            match dut.reg_read(hart, slot) {
                Some(bytes) => out.extend_from_slice(&bytes),
                None => out.extend_from_slice(&sys.reg_read_one(hart, slot)?),
            }
        }
        Ok(out)
    }

    fn read_one_sourced(
        &self,
        sys: &ShadowSystem<I>,
        dut: &mut dyn DutLink<I>,
        hart: usize,
        slot: usize,
    ) -> Result<Vec<u8>, ShadowError> {
        if self.flags.contains(SessionFlags::REG_SOURCE_DUT) {
            if let Some(bytes) = dut.reg_read(hart, slot) {
                return Ok(bytes);
            }
        }
        sys.reg_read_one(hart, slot)
    }

    fn mem_read_sourced<E>(
        &self,
        sys: &ShadowSystem<I>,
        dut: &mut dyn DutLink<I>,
        hart: usize,
        addr: u64,
        len: u64,
    ) -> Result<Vec<u8>, InternalError<E>> {
        if len > MAX_READ_LEN {
            return Err(InternalError::malformed());
        }
        let addr = I::Xlen::from_u64(addr).ok_or_else(InternalError::malformed)?;
        let len = len as usize;

        if self.flags.contains(SessionFlags::MEM_SOURCE_DUT) {
            if let Some(bytes) = dut.mem_read(addr, len) {
                return Ok(bytes);
            }
        }
        Ok(sys.mem_read(hart, addr, len)?)
    }
}

fn mirror_reg_write<I: Isa>(
    sys: &ShadowSystem<I>,
    dut: &mut dyn DutLink<I>,
    hart: usize,
    vals: &[u8],
) -> Result<(), ShadowError> {
    let num_slots = sys.core(hart)?.regs.num_slots();
    let mut offset = 0;
    for slot in 0..num_slots {
        let width = sys.reg_read_one(hart, slot)?.len();
        dut.reg_write(hart, slot, &vals[offset..offset + width]);
        offset += width;
    }
    Ok(())
}

fn to_xlen<I: Isa, E>(addr: u64) -> Result<<I as Isa>::Xlen, InternalError<E>> {
    I::Xlen::from_u64(addr).ok_or_else(InternalError::malformed)
}
