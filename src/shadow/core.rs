//! The shadow of a single CPU core.

use crate::arch::Isa;
use crate::arch::Word;
use crate::common::Signal;
use crate::shadow::AddressBlock;
use crate::shadow::ConfigError;
use crate::shadow::MemoryMap;
use crate::shadow::PointSet;
use crate::shadow::RegisterFile;
use crate::shadow::ShadowError;
use crate::trace::RetiredFor;

/// Address map of one core's local memories and MMIO regions.
#[derive(Debug, Clone, Default)]
pub struct CoreConfig<U> {
    pub mem: Vec<AddressBlock<U>>,
    pub i_o: Vec<AddressBlock<U>>,
}

/// One core's architectural state plus its replay bookkeeping.
pub struct ShadowCore<I: Isa> {
    pub regs: RegisterFile<I>,
    /// Core-local memories; consulted before the system map.
    pub mem: MemoryMap<I::Xlen>,
    /// Per-core breakpoints/watchpoints.
    pub points: PointSet<I::Xlen>,
    /// Instructions this core has retired so far.
    pub cnt: u64,
    /// Index into the trace of the most recently applied record, if any.
    pub ret: Option<usize>,
    /// Signal associated with the last stop.
    pub signal: Signal,
}

impl<I: Isa> ShadowCore<I> {
    pub fn new(config: &CoreConfig<I::Xlen>) -> Result<Self, ConfigError> {
        Ok(ShadowCore {
            regs: RegisterFile::new(),
            mem: MemoryMap::new(config.mem.clone(), config.i_o.clone())?,
            points: PointSet::new(),
            cnt: 0,
            ret: None,
            signal: Signal::SIGTRAP,
        })
    }

    /// Apply the register side of a retired instruction, checking each prior
    /// value against the shadow on the way.
    pub(crate) fn apply_regs(&mut self, ret: &RetiredFor<I>) -> Result<(), ShadowError> {
        for e in &ret.gpr {
            let cur = self.regs.read_gpr(e.idx)?;
            // x0 reads back as zero no matter what the trace records for it
            if e.idx != 0 && cur != e.rdt {
                return Err(corruption("gpr", e.idx as u16, e.rdt, cur));
            }
            self.regs.write_gpr(e.idx, e.wdt)?;
        }

        for e in &ret.fpr {
            let cur = self.regs.read_fpr(e.idx)?;
            if cur != e.rdt {
                return Err(corruption("fpr", e.idx as u16, e.rdt, cur));
            }
            self.regs.write_fpr(e.idx, e.wdt)?;
        }

        for e in &ret.vec {
            let cur = self.regs.read_vec(e.idx)?;
            if cur != e.rdt {
                return Err(corruption("vec", e.idx as u16, e.rdt, cur));
            }
            self.regs.write_vec(e.idx, e.wdt)?;
        }

        for e in &ret.csr {
            let cur = self.regs.read_csr(e.idx);
            if cur != e.rdt {
                return Err(corruption("csr", e.idx, e.rdt, cur));
            }
            self.regs.write_csr(e.idx, e.wdt);
        }

        self.regs.set_pc(ret.ifu.pcn);
        Ok(())
    }

    /// Undo the register side of a retired instruction: each new value must
    /// still be in place, and is replaced with the prior one.
    pub(crate) fn unapply_regs(&mut self, ret: &RetiredFor<I>) -> Result<(), ShadowError> {
        for e in ret.csr.iter().rev() {
            let cur = self.regs.read_csr(e.idx);
            if cur != e.wdt {
                return Err(corruption("csr", e.idx, e.wdt, cur));
            }
            self.regs.write_csr(e.idx, e.rdt);
        }

        for e in ret.vec.iter().rev() {
            let cur = self.regs.read_vec(e.idx)?;
            if cur != e.wdt {
                return Err(corruption("vec", e.idx as u16, e.wdt, cur));
            }
            self.regs.write_vec(e.idx, e.rdt)?;
        }

        for e in ret.fpr.iter().rev() {
            let cur = self.regs.read_fpr(e.idx)?;
            if cur != e.wdt {
                return Err(corruption("fpr", e.idx as u16, e.wdt, cur));
            }
            self.regs.write_fpr(e.idx, e.rdt)?;
        }

        for e in ret.gpr.iter().rev() {
            let cur = self.regs.read_gpr(e.idx)?;
            if e.idx != 0 && cur != e.wdt {
                return Err(corruption("gpr", e.idx as u16, e.wdt, cur));
            }
            self.regs.write_gpr(e.idx, e.rdt)?;
        }

        self.regs.set_pc(ret.ifu.adr);
        Ok(())
    }
}

fn corruption<W: Word>(bank: &'static str, idx: u16, expected: W, found: W) -> ShadowError {
    ShadowError::TraceCorruption {
        bank,
        idx,
        expected: expected.to_u64().unwrap_or(0),
        found: found.to_u64().unwrap_or(0),
    }
}
