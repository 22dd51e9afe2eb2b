//! The retired-instruction trace: the record model, the binary file format,
//! and state snapshots.
//!
//! A trace is an immutable, fully materialised sequence of [`Retired`]
//! records in commit order. The replay engine owns a cursor into it; records
//! themselves are handed around by index, never by pointer.

mod reader;
pub mod snapshot;

pub use reader::read_trace;
pub use reader::read_trace_body;
pub use reader::write_trace;
pub use reader::TraceFileError;
pub use reader::TraceFileHeader;

use crate::arch::Isa;

/// Instruction fetch side of a retired instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetiredIfu<U> {
    /// Instruction address (the PC this instruction committed at).
    pub adr: U,
    /// Next PC.
    pub pcn: U,
    /// The instruction bytes, in memory order. The length encodes the
    /// instruction length (2 for compressed, 4 otherwise).
    pub rdt: Vec<u8>,
    /// The DUT flagged this instruction as illegal.
    pub ill: bool,
}

/// A register write-back: index, prior value, new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetiredReg<W> {
    pub idx: u8,
    pub rdt: W,
    pub wdt: W,
}

/// A CSR write-back. CSR indices are 12 bits, so they get their own record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetiredCsr<U> {
    pub idx: u16,
    pub rdt: U,
    pub wdt: U,
}

/// Load/store side of a retired instruction.
///
/// The access size is encoded in the byte-array lengths. An empty `rdt`
/// means no load; an empty `wdt` means no store. For stores, `rdt` carries
/// the prior memory contents when the capture hardware provides them, which
/// is what makes stores reversible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetiredLsu<U> {
    pub adr: U,
    pub rdt: Vec<u8>,
    pub wdt: Vec<u8>,
}

/// One committed instruction, as recorded by the simulator.
///
/// Generic over the word widths rather than an [`Isa`] so the usual derives
/// apply; use [`RetiredFor`] when an `Isa` type parameter is in scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retired<X, F, V> {
    /// Which core committed this instruction. 0 on single-core traces.
    pub hart: u8,
    pub ifu: RetiredIfu<X>,
    pub gpr: Vec<RetiredReg<X>>,
    pub fpr: Vec<RetiredReg<F>>,
    pub vec: Vec<RetiredReg<V>>,
    pub csr: Vec<RetiredCsr<X>>,
    pub lsu: Option<RetiredLsu<X>>,
}

/// The [`Retired`] record type for a given [`Isa`].
pub type RetiredFor<I> =
    Retired<<I as Isa>::Xlen, <I as Isa>::Flen, <I as Isa>::Vlen>;

impl<X, F, V> Retired<X, F, V> {
    /// A record with no register or memory effects beyond the PC update.
    pub fn flow(hart: u8, adr: X, pcn: X, insn: &[u8]) -> Self {
        Retired {
            hart,
            ifu: RetiredIfu {
                adr,
                pcn,
                rdt: insn.to_vec(),
                ill: false,
            },
            gpr: Vec::new(),
            fpr: Vec::new(),
            vec: Vec::new(),
            csr: Vec::new(),
            lsu: None,
        }
    }
}
