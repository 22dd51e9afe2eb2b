//! Architecture description of the device under test.
//!
//! Everything the protocol engine and the shadow machine need to know about
//! the simulated CPU is captured by the [`Isa`] trait: word widths, register
//! file shape, which CSRs the debugger gets to see, and what a software
//! breakpoint trap looks like on the wire. Widths are fixed at compile time,
//! so all size computations monomorphise down to constants.

use core::fmt::Debug;
use core::fmt::LowerHex;

use num_traits::FromPrimitive;
use num_traits::PrimInt;
use num_traits::ToPrimitive;
use num_traits::Unsigned;

use crate::internal::LeBytes;

pub mod riscv;

/// An unsigned machine word that can cross the wire as a little-endian byte
/// string.
///
/// Blanket-implemented for every type satisfying the bounds; user code never
/// implements this directly.
pub trait Word:
    PrimInt + Unsigned + FromPrimitive + ToPrimitive + LeBytes + Default + Debug + LowerHex + 'static
{
    /// Width of the word in bytes.
    const WIDTH: usize = core::mem::size_of::<Self>();
}

impl<T> Word for T where
    T: PrimInt
        + Unsigned
        + FromPrimitive
        + ToPrimitive
        + LeBytes
        + Default
        + Debug
        + LowerHex
        + 'static
{
}

/// A compile-time description of the simulated CPU's architecture.
///
/// Implementations are empty enums ([`riscv::Rv32`], [`riscv::Rv64`]) used
/// purely as type parameters.
pub trait Isa: 'static {
    /// Address/integer register width (`XLEN`).
    type Xlen: Word;
    /// Floating point register width (`FLEN`).
    type Flen: Word;
    /// Vector register width (`VLEN`).
    type Vlen: Word;

    /// Number of general purpose registers: 16 iff the E extension is
    /// enabled, 32 otherwise.
    const GPRS: usize;
    /// Whether the floating point register file exists (F extension).
    const HAS_FPR: bool;
    /// Whether the vector register file exists (V extension).
    const HAS_VEC: bool;

    /// Whether the CSR at `idx` is visible to the debugger.
    ///
    /// Invisible CSRs remain live in the shadow; they just don't participate
    /// in the aggregated register views.
    fn csr_visible(idx: u16) -> bool;

    /// Whether `insn` (in memory order) is an unconditional breakpoint trap.
    ///
    /// This is the pluggable predicate behind software breakpoint matching;
    /// non-RISC-V adapters slot in here without touching the matcher.
    fn is_break_insn(insn: &[u8]) -> bool;

    /// Architecture name used in log output and the trace file header.
    fn name() -> &'static str;

    /// (optional) A `target.xml` description served via
    /// `qXfer:features:read`, which lets the debugger autodetect the
    /// architecture instead of being told `set architecture` by hand.
    fn target_description_xml() -> Option<&'static str> {
        None
    }
}

/// Number of debugger-visible CSRs for `I`.
pub fn visible_csr_count<I: Isa>() -> usize {
    (0..4096).filter(|&idx| I::csr_visible(idx)).count()
}

/// Ascending list of debugger-visible CSR indices for `I`.
pub fn visible_csrs<I: Isa>() -> Vec<u16> {
    (0..4096).filter(|&idx| I::csr_visible(idx)).collect()
}
