//! The shadow of the whole SoC: every core, the shared memory map, the
//! system-wide point set, and the trace with its replay cursor.

use crate::arch::Isa;
use num_traits::ToPrimitive;
use crate::shadow::AddressBlock;
use crate::shadow::ConfigError;
use crate::shadow::CoreConfig;
use crate::shadow::MemoryMap;
use crate::shadow::PointSet;
use crate::shadow::ShadowCore;
use crate::shadow::ShadowError;
use crate::shadow::Stop;
use crate::trace::RetiredFor;

/// The build-time architectural description the shadow is constructed from.
#[derive(Debug, Clone)]
pub struct SystemConfig<U> {
    pub cores: Vec<CoreConfig<U>>,
    /// System-wide shared memories.
    pub mem: Vec<AddressBlock<U>>,
    /// System-wide MMIO regions.
    pub i_o: Vec<AddressBlock<U>>,
}

impl<U> SystemConfig<U> {
    /// A single core owning every declared region; the common case.
    pub fn single_core(mem: Vec<AddressBlock<U>>, i_o: Vec<AddressBlock<U>>) -> Self {
        SystemConfig {
            cores: vec![CoreConfig { mem, i_o }],
            mem: Vec::new(),
            i_o: Vec::new(),
        }
    }
}

pub struct ShadowSystem<I: Isa> {
    cores: Vec<ShadowCore<I>>,
    /// Shared memories, consulted after the per-core maps.
    pub(crate) mem: MemoryMap<I::Xlen>,
    /// Points not bound to a specific core.
    pub points: PointSet<I::Xlen>,
    /// Logical time: total instructions applied since the initial snapshot.
    pub(crate) time: u64,
    trace: Vec<RetiredFor<I>>,
    /// Next trace record to apply. 0 = before the first instruction,
    /// `trace.len()` = after the last.
    cursor: usize,
    /// Most recent replay stop, re-reported by the `?` packet.
    pub(crate) last_stop: Stop<I::Xlen>,
}

impl<I: Isa> ShadowSystem<I> {
    pub fn new(
        config: &SystemConfig<I::Xlen>,
        trace: Vec<RetiredFor<I>>,
    ) -> Result<Self, ConfigError> {
        let mut cores = Vec::with_capacity(config.cores.len());
        for core_cfg in &config.cores {
            cores.push(ShadowCore::new(core_cfg)?);
        }

        for (record, ret) in trace.iter().enumerate() {
            if ret.hart as usize >= cores.len() {
                return Err(ConfigError::UnknownHart {
                    record,
                    hart: ret.hart,
                });
            }
        }

        Ok(ShadowSystem {
            cores,
            mem: MemoryMap::new(config.mem.clone(), config.i_o.clone())?,
            points: PointSet::new(),
            time: 0,
            trace,
            cursor: 0,
            last_stop: Stop::Initial,
        })
    }

    pub fn num_cores(&self) -> usize {
        self.cores.len()
    }

    pub fn core(&self, hart: usize) -> Result<&ShadowCore<I>, ShadowError> {
        self.cores.get(hart).ok_or(ShadowError::UnknownHart(hart))
    }

    pub fn core_mut(&mut self, hart: usize) -> Result<&mut ShadowCore<I>, ShadowError> {
        self.cores
            .get_mut(hart)
            .ok_or(ShadowError::UnknownHart(hart))
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn trace_len(&self) -> usize {
        self.trace.len()
    }

    pub fn trace(&self) -> &[RetiredFor<I>] {
        &self.trace
    }

    pub fn record(&self, idx: usize) -> Option<&RetiredFor<I>> {
        self.trace.get(idx)
    }

    pub fn last_stop(&self) -> &Stop<I::Xlen> {
        &self.last_stop
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    /// The shared (non-core-local) RAM contents, for snapshots.
    pub fn system_ram_bytes(&self) -> &[u8] {
        self.mem.ram_bytes()
    }

    pub fn system_ram_bytes_mut(&mut self) -> &mut [u8] {
        self.mem.ram_bytes_mut()
    }

    /// Reposition the replay bookkeeping after a snapshot restore. Per-core
    /// retirement counters are recomputed from the trace prefix.
    pub fn restore_position(&mut self, time: u64, cursor: usize) {
        self.time = time;
        self.cursor = cursor.min(self.trace.len());

        for core in &mut self.cores {
            core.cnt = 0;
            core.ret = None;
        }
        for idx in 0..self.cursor {
            let hart = self.trace[idx].hart as usize;
            if let Some(core) = self.cores.get_mut(hart) {
                core.cnt += 1;
                core.ret = Some(idx);
            }
        }
    }

    ////////////////////////////////////////
    // register access (debugger view)
    ////////////////////////////////////////

    pub fn reg_read_all(&self, hart: usize) -> Result<Vec<u8>, ShadowError> {
        Ok(self.core(hart)?.regs.read_all())
    }

    pub fn reg_write_all(&mut self, hart: usize, bytes: &[u8]) -> Result<(), ShadowError> {
        self.core_mut(hart)?.regs.write_all(bytes)
    }

    pub fn reg_read_one(&self, hart: usize, slot: usize) -> Result<Vec<u8>, ShadowError> {
        self.core(hart)?.regs.read_slot(slot)
    }

    pub fn reg_write_one(
        &mut self,
        hart: usize,
        slot: usize,
        bytes: &[u8],
    ) -> Result<(), ShadowError> {
        self.core_mut(hart)?.regs.write_slot(slot, bytes)
    }

    ////////////////////////////////////////
    // memory access
    ////////////////////////////////////////

    /// Byte-granular read as seen by `hart`: core-local RAM, then shared
    /// RAM, then the sparse MMIO maps (core-local entries shadowing shared
    /// ones).
    pub fn mem_read(&self, hart: usize, addr: I::Xlen, len: usize) -> Result<Vec<u8>, ShadowError> {
        let core = self.core(hart)?;

        if let Some(slice) = core.mem.ram_slice(addr, len) {
            return Ok(slice.to_vec());
        }
        if let Some(slice) = self.mem.ram_slice(addr, len) {
            return Ok(slice.to_vec());
        }

        let base = addr.to_u64().unwrap_or(0);
        let mut out = Vec::with_capacity(len);
        for i in 0..len as u64 {
            let a = base
                .checked_add(i)
                .ok_or(ShadowError::UnmappedAddress(u64::MAX))?;
            let byte = core
                .mem
                .io_get(a)
                .or_else(|| self.mem.io_get(a))
                .ok_or(ShadowError::UnmappedAddress(a))?;
            out.push(byte);
        }
        Ok(out)
    }

    /// Byte-granular write as seen by `hart`. Writes outside RAM land in the
    /// core-local sparse MMIO map, creating entries.
    pub fn mem_write(
        &mut self,
        hart: usize,
        addr: I::Xlen,
        data: &[u8],
    ) -> Result<(), ShadowError> {
        if hart >= self.cores.len() {
            return Err(ShadowError::UnknownHart(hart));
        }

        if let Some(slice) = self.cores[hart].mem.ram_slice_mut(addr, data.len()) {
            slice.copy_from_slice(data);
            return Ok(());
        }
        if let Some(slice) = self.mem.ram_slice_mut(addr, data.len()) {
            slice.copy_from_slice(data);
            return Ok(());
        }

        let base = addr.to_u64().unwrap_or(0);
        for (i, &b) in data.iter().enumerate() {
            let a = base
                .checked_add(i as u64)
                .ok_or(ShadowError::UnmappedAddress(u64::MAX))?;
            self.cores[hart].mem.io_set(a, b);
        }
        Ok(())
    }

    ////////////////////////////////////////
    // trace application
    ////////////////////////////////////////

    /// Apply `trace[cursor]` and advance. Returns the index of the record
    /// just applied.
    pub fn apply_next(&mut self) -> Result<usize, ShadowError> {
        if self.cursor >= self.trace.len() {
            return Err(ShadowError::TraceBounds);
        }

        let ret = &self.trace[self.cursor];
        let hart = ret.hart as usize;
        let core = self
            .cores
            .get_mut(hart)
            .ok_or(ShadowError::UnknownHart(hart))?;

        core.apply_regs(ret)?;

        if let Some(lsu) = &ret.lsu {
            if !lsu.wdt.is_empty() {
                // same routing as a debugger write, inlined to keep the
                // split borrow of `cores` / `mem` / `trace`
                if let Some(slice) = core.mem.ram_slice_mut(lsu.adr, lsu.wdt.len()) {
                    slice.copy_from_slice(&lsu.wdt);
                } else if let Some(slice) = self.mem.ram_slice_mut(lsu.adr, lsu.wdt.len()) {
                    slice.copy_from_slice(&lsu.wdt);
                } else {
                    let base = lsu.adr.to_u64().unwrap_or(0);
                    for (i, &b) in lsu.wdt.iter().enumerate() {
                        let a = base
                            .checked_add(i as u64)
                            .ok_or(ShadowError::UnmappedAddress(u64::MAX))?;
                        core.mem.io_set(a, b);
                    }
                }
            }
        }

        core.cnt += 1;
        core.ret = Some(self.cursor);
        self.time += 1;

        let applied = self.cursor;
        self.cursor += 1;
        Ok(applied)
    }

    /// Undo `trace[cursor - 1]` and retreat. Returns the index of the record
    /// just undone.
    pub fn unapply_prev(&mut self) -> Result<usize, ShadowError> {
        if self.cursor == 0 {
            return Err(ShadowError::TraceBounds);
        }

        let idx = self.cursor - 1;
        let ret = &self.trace[idx];
        let hart = ret.hart as usize;
        let core = self
            .cores
            .get_mut(hart)
            .ok_or(ShadowError::UnknownHart(hart))?;

        // undo the store before the registers so a faulting readback leaves
        // the register file untouched
        if let Some(lsu) = &ret.lsu {
            if !lsu.wdt.is_empty() {
                if let Some(slice) = core.mem.ram_slice_mut(lsu.adr, lsu.wdt.len()) {
                    restore_store(slice, &lsu.wdt, &lsu.rdt, lsu.adr.to_u64().unwrap_or(0))?;
                } else if let Some(slice) = self.mem.ram_slice_mut(lsu.adr, lsu.wdt.len()) {
                    restore_store(slice, &lsu.wdt, &lsu.rdt, lsu.adr.to_u64().unwrap_or(0))?;
                } else {
                    let base = lsu.adr.to_u64().unwrap_or(0);
                    for (i, &prior) in lsu.rdt.iter().enumerate() {
                        let a = base
                            .checked_add(i as u64)
                            .ok_or(ShadowError::UnmappedAddress(u64::MAX))?;
                        core.mem.io_set(a, prior);
                    }
                }
            }
        }

        core.unapply_regs(ret)?;

        core.cnt = core.cnt.saturating_sub(1);
        core.ret = idx.checked_sub(1);
        self.time = self.time.saturating_sub(1);

        self.cursor = idx;
        Ok(idx)
    }
}

/// Verify a store's bytes are still in place, then restore the prior
/// contents. A capture without prior contents (`rdt` empty) leaves memory
/// as-is: there is nothing truthful to put back.
fn restore_store(
    slice: &mut [u8],
    wdt: &[u8],
    rdt: &[u8],
    addr: u64,
) -> Result<(), ShadowError> {
    if slice != wdt {
        return Err(ShadowError::TraceCorruption {
            bank: "mem",
            idx: 0,
            expected: wdt.first().copied().unwrap_or(0) as u64,
            found: slice.first().copied().unwrap_or(0) as u64,
        });
    }
    if rdt.len() == wdt.len() {
        slice.copy_from_slice(rdt);
    } else {
        debug!("store at {:#x} has no prior contents; leaving memory as-is", addr);
    }
    Ok(())
}
