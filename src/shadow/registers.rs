//! Per-core register banks, exposed in two views.
//!
//! The DUT view addresses registers by (bank, index) and is what trace
//! application uses. The debugger view is a flat enumeration concatenating
//! the visible banks in the canonical order (GPR, PC, FPR, VEC, visible
//! CSRs ascending), which is the layout `g`/`G` packets and single-register
//! accesses operate on.

use std::collections::BTreeMap;

use crate::arch::visible_csrs;
use crate::arch::Isa;
use crate::arch::Word;
use crate::internal::LeBytes;
use crate::shadow::ShadowError;

const FPRS: usize = 32;
const VECS: usize = 32;

pub struct RegisterFile<I: Isa> {
    gpr: Vec<I::Xlen>,
    pc: I::Xlen,
    fpr: Vec<I::Flen>,
    vec: Vec<I::Vlen>,
    /// Sparse; holds visible and invisible CSRs alike. Unwritten CSRs read
    /// as zero.
    csr: BTreeMap<u16, I::Xlen>,
    /// Ascending. Fixes the tail of the canonical layout.
    visible: Vec<u16>,
}

/// A slot in the canonical debugger-view enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Gpr(usize),
    Pc,
    Fpr(usize),
    Vec(usize),
    Csr(u16),
}

impl<I: Isa> RegisterFile<I> {
    pub fn new() -> Self {
        RegisterFile {
            gpr: vec![I::Xlen::default(); I::GPRS],
            pc: I::Xlen::default(),
            fpr: vec![I::Flen::default(); if I::HAS_FPR { FPRS } else { 0 }],
            vec: vec![I::Vlen::default(); if I::HAS_VEC { VECS } else { 0 }],
            csr: BTreeMap::new(),
            visible: visible_csrs::<I>(),
        }
    }

    ////////////////////////////////////////
    // DUT view
    ////////////////////////////////////////

    pub fn read_gpr(&self, idx: u8) -> Result<I::Xlen, ShadowError> {
        self.gpr
            .get(idx as usize)
            .copied()
            .ok_or(ShadowError::UnknownRegister(idx as usize))
    }

    /// Replaces and returns the previous value. Writes to `gpr[0]` are
    /// silently discarded (hardwired zero).
    pub fn write_gpr(&mut self, idx: u8, val: I::Xlen) -> Result<I::Xlen, ShadowError> {
        let slot = self
            .gpr
            .get_mut(idx as usize)
            .ok_or(ShadowError::UnknownRegister(idx as usize))?;
        if idx == 0 {
            return Ok(*slot);
        }
        Ok(core::mem::replace(slot, val))
    }

    pub fn pc(&self) -> I::Xlen {
        self.pc
    }

    pub fn set_pc(&mut self, val: I::Xlen) -> I::Xlen {
        core::mem::replace(&mut self.pc, val)
    }

    pub fn read_fpr(&self, idx: u8) -> Result<I::Flen, ShadowError> {
        self.fpr
            .get(idx as usize)
            .copied()
            .ok_or(ShadowError::UnknownRegister(idx as usize))
    }

    pub fn write_fpr(&mut self, idx: u8, val: I::Flen) -> Result<I::Flen, ShadowError> {
        let slot = self
            .fpr
            .get_mut(idx as usize)
            .ok_or(ShadowError::UnknownRegister(idx as usize))?;
        Ok(core::mem::replace(slot, val))
    }

    pub fn read_vec(&self, idx: u8) -> Result<I::Vlen, ShadowError> {
        self.vec
            .get(idx as usize)
            .copied()
            .ok_or(ShadowError::UnknownRegister(idx as usize))
    }

    pub fn write_vec(&mut self, idx: u8, val: I::Vlen) -> Result<I::Vlen, ShadowError> {
        let slot = self
            .vec
            .get_mut(idx as usize)
            .ok_or(ShadowError::UnknownRegister(idx as usize))?;
        Ok(core::mem::replace(slot, val))
    }

    /// CSR reads never fail: unwritten CSRs read as zero, and invisible CSRs
    /// stay live here even though the debugger view skips them.
    pub fn read_csr(&self, idx: u16) -> I::Xlen {
        self.csr.get(&idx).copied().unwrap_or_default()
    }

    pub fn write_csr(&mut self, idx: u16, val: I::Xlen) -> I::Xlen {
        self.csr.insert(idx, val).unwrap_or_default()
    }

    ////////////////////////////////////////
    // debugger view
    ////////////////////////////////////////

    /// Number of slots in the canonical enumeration.
    pub fn num_slots(&self) -> usize {
        self.gpr.len() + 1 + self.fpr.len() + self.vec.len() + self.visible.len()
    }

    /// Total byte length of the `g`-packet payload.
    pub fn layout_len(&self) -> usize {
        (self.gpr.len() + 1) * I::Xlen::WIDTH
            + self.fpr.len() * I::Flen::WIDTH
            + self.vec.len() * I::Vlen::WIDTH
            + self.visible.len() * I::Xlen::WIDTH
    }

    fn slot(&self, idx: usize) -> Option<(Slot, usize)> {
        let mut idx = idx;

        if idx < self.gpr.len() {
            return Some((Slot::Gpr(idx), I::Xlen::WIDTH));
        }
        idx -= self.gpr.len();

        if idx == 0 {
            return Some((Slot::Pc, I::Xlen::WIDTH));
        }
        idx -= 1;

        if idx < self.fpr.len() {
            return Some((Slot::Fpr(idx), I::Flen::WIDTH));
        }
        idx -= self.fpr.len();

        if idx < self.vec.len() {
            return Some((Slot::Vec(idx), I::Vlen::WIDTH));
        }
        idx -= self.vec.len();

        self.visible
            .get(idx)
            .map(|&csr| (Slot::Csr(csr), I::Xlen::WIDTH))
    }

    /// The canonical byte offset of a slot; deterministic given the
    /// build-time capability set.
    pub fn slot_offset(&self, idx: usize) -> Option<usize> {
        if idx > self.num_slots() {
            return None;
        }
        let mut offset = 0;
        for i in 0..idx {
            let (_, width) = self.slot(i)?;
            offset += width;
        }
        Some(offset)
    }

    /// The whole debugger view as one contiguous little-endian buffer.
    pub fn read_all(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.layout_len());
        for i in 0..self.num_slots() {
            // every i < num_slots resolves
            let bytes = self.read_slot(i).unwrap_or_default();
            out.extend_from_slice(&bytes);
        }
        out
    }

    /// Accepts the same layout as [`read_all`](Self::read_all); the length
    /// must match exactly.
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), ShadowError> {
        if bytes.len() != self.layout_len() {
            return Err(ShadowError::Layout {
                expected: self.layout_len(),
                got: bytes.len(),
            });
        }

        let mut offset = 0;
        for i in 0..self.num_slots() {
            let (_, width) = self.slot(i).expect("slot in range");
            self.write_slot(i, &bytes[offset..offset + width])?;
            offset += width;
        }
        Ok(())
    }

    /// Read a single slot by its canonical index.
    pub fn read_slot(&self, idx: usize) -> Result<Vec<u8>, ShadowError> {
        let (slot, width) = self.slot(idx).ok_or(ShadowError::UnknownRegister(idx))?;
        let mut buf = vec![0u8; width];
        let written = match slot {
            Slot::Gpr(i) => self.gpr[i].to_le_bytes(&mut buf),
            Slot::Pc => self.pc.to_le_bytes(&mut buf),
            Slot::Fpr(i) => self.fpr[i].to_le_bytes(&mut buf),
            Slot::Vec(i) => self.vec[i].to_le_bytes(&mut buf),
            Slot::Csr(csr) => self.read_csr(csr).to_le_bytes(&mut buf),
        };
        debug_assert_eq!(written, Some(width));
        Ok(buf)
    }

    /// Write a single slot by its canonical index. The payload length must
    /// match the slot width.
    pub fn write_slot(&mut self, idx: usize, bytes: &[u8]) -> Result<(), ShadowError> {
        let (slot, width) = self.slot(idx).ok_or(ShadowError::UnknownRegister(idx))?;
        if bytes.len() != width {
            return Err(ShadowError::Layout {
                expected: width,
                got: bytes.len(),
            });
        }

        match slot {
            Slot::Gpr(i) => {
                let val = LeBytes::from_le_bytes(bytes).ok_or(ShadowError::Layout {
                    expected: width,
                    got: bytes.len(),
                })?;
                self.write_gpr(i as u8, val)?;
            }
            Slot::Pc => {
                self.pc = LeBytes::from_le_bytes(bytes).ok_or(ShadowError::Layout {
                    expected: width,
                    got: bytes.len(),
                })?;
            }
            Slot::Fpr(i) => {
                let val = LeBytes::from_le_bytes(bytes).ok_or(ShadowError::Layout {
                    expected: width,
                    got: bytes.len(),
                })?;
                self.fpr[i] = val;
            }
            Slot::Vec(i) => {
                let val = LeBytes::from_le_bytes(bytes).ok_or(ShadowError::Layout {
                    expected: width,
                    got: bytes.len(),
                })?;
                self.vec[i] = val;
            }
            Slot::Csr(csr) => {
                let val = LeBytes::from_le_bytes(bytes).ok_or(ShadowError::Layout {
                    expected: width,
                    got: bytes.len(),
                })?;
                self.write_csr(csr, val);
            }
        }
        Ok(())
    }
}

impl<I: Isa> Default for RegisterFile<I> {
    fn default() -> Self {
        Self::new()
    }
}
