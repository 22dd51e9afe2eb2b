//! The live simulator link.
//!
//! Register and memory reads can be sourced either from the shadow or from
//! the running simulator (the `set register=` / `set memory=` monitor
//! switches); writes always go to both. This trait is the narrow interface
//! the handlers call on the simulator side. A server replaying a trace file
//! with no simulator attached uses [`NullDut`].

use crate::arch::Isa;

pub trait DutLink<I: Isa> {
    /// Read one canonical register slot from the live DUT. `None` means the
    /// DUT can't answer (not attached, not halted), in which case callers
    /// fall back to the shadow.
    fn reg_read(&mut self, hart: usize, slot: usize) -> Option<Vec<u8>>;

    /// Read memory from the live DUT. `None` falls back to the shadow.
    fn mem_read(&mut self, addr: I::Xlen, len: usize) -> Option<Vec<u8>>;

    /// Mirror a debugger register write into the DUT.
    fn reg_write(&mut self, hart: usize, slot: usize, val: &[u8]);

    /// Mirror a debugger memory write into the DUT.
    fn mem_write(&mut self, addr: I::Xlen, data: &[u8]);

    /// Drive the DUT reset line.
    fn reset(&mut self, assert: bool);

    /// Advise the simulator to start or stop dumping waveforms.
    fn waveform_dump(&mut self, enable: bool);
}

/// The stand-alone configuration: no simulator attached. Reads defer to the
/// shadow, writes and control requests disappear.
pub struct NullDut;

impl<I: Isa> DutLink<I> for NullDut {
    fn reg_read(&mut self, _hart: usize, _slot: usize) -> Option<Vec<u8>> {
        None
    }

    fn mem_read(&mut self, _addr: I::Xlen, _len: usize) -> Option<Vec<u8>> {
        None
    }

    fn reg_write(&mut self, _hart: usize, _slot: usize, _val: &[u8]) {}

    fn mem_write(&mut self, _addr: I::Xlen, _data: &[u8]) {}

    fn reset(&mut self, assert: bool) {
        debug!("no DUT attached; ignoring reset {}", if assert { "assert" } else { "release" });
    }

    fn waveform_dump(&mut self, enable: bool) {
        debug!("no DUT attached; ignoring waveform dump {}", if enable { "on" } else { "off" });
    }
}
