//! The shadow machine: the server's authoritative copy of the DUT's
//! architectural state, kept in sync with the retired-instruction trace.

mod core;
mod memory;
mod points;
mod registers;
mod replay;
mod system;

pub use self::core::CoreConfig;
pub use self::core::ShadowCore;
pub use memory::AddressBlock;
pub use memory::ConfigError;
pub use memory::MemoryMap;
pub use points::Point;
pub use points::PointMatch;
pub use points::PointSet;
pub use points::PointType;
pub use points::WatchKind;
pub use registers::RegisterFile;
pub use replay::ReplayLogPosition;
pub use replay::Stop;
pub use replay::INTERRUPT_POLL_PERIOD;
pub use system::ShadowSystem;
pub use system::SystemConfig;

/// Errors raised by shadow-state accesses and trace application.
///
/// All of these map to `E`-replies on the wire, except [`TraceCorruption`]:
/// a readback mismatch means the shadow has diverged from the recording, at
/// which point nothing the server reports can be trusted, so it tears the
/// session down instead.
///
/// [`TraceCorruption`]: ShadowError::TraceCorruption
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShadowError {
    /// Access to an address backed by neither RAM nor a recorded MMIO byte.
    UnmappedAddress(u64),
    /// Register slot outside the canonical layout.
    UnknownRegister(usize),
    /// Replay cursor is at the edge of the trace.
    TraceBounds,
    /// A value read back from the shadow doesn't match the prior value the
    /// trace recorded for it.
    TraceCorruption {
        bank: &'static str,
        idx: u16,
        expected: u64,
        found: u64,
    },
    /// A register write whose payload length doesn't match the layout.
    Layout { expected: usize, got: usize },
    /// Thread/core index out of range.
    UnknownHart(usize),
}

impl ::core::fmt::Display for ShadowError {
    fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
        use ShadowError::*;
        match self {
            UnmappedAddress(addr) => write!(f, "unmapped address {:#x}", addr),
            UnknownRegister(slot) => write!(f, "unknown register {}", slot),
            TraceBounds => write!(f, "replay cursor at trace edge"),
            TraceCorruption {
                bank,
                idx,
                expected,
                found,
            } => write!(
                f,
                "trace corruption: {}[{}] readback {:#x}, trace expected {:#x}",
                bank, idx, found, expected
            ),
            Layout { expected, got } => {
                write!(f, "register payload of {} bytes, layout needs {}", got, expected)
            }
            UnknownHart(hart) => write!(f, "no such core: {}", hart),
        }
    }
}

impl std::error::Error for ShadowError {}

impl ShadowError {
    /// Whether this error means the shadow can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ShadowError::TraceCorruption { .. })
    }
}
