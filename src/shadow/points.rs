//! Breakpoint / watchpoint dictionary and the retired-instruction matcher.

use std::collections::BTreeMap;

use crate::arch::Isa;
use crate::arch::Word;
use crate::trace::RetiredFor;

/// Point type, numbered as in the `z`/`Z` packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointType {
    SwBreak = 0,
    HwBreak = 1,
    Watch = 2,
    RWatch = 3,
    AWatch = 4,
}

impl PointType {
    pub fn from_wire(n: u8) -> Option<Self> {
        Some(match n {
            0 => PointType::SwBreak,
            1 => PointType::HwBreak,
            2 => PointType::Watch,
            3 => PointType::RWatch,
            4 => PointType::AWatch,
            _ => return None,
        })
    }

    fn is_breakpoint(self) -> bool {
        matches!(self, PointType::SwBreak | PointType::HwBreak)
    }
}

/// The direction a watchpoint hit was reported for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Write,
    Read,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub type_: PointType,
    /// Instruction length for breakpoints, access width for watchpoints.
    pub kind: u64,
}

/// Why the matcher decided to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointMatch<U> {
    /// The DUT flagged the instruction as illegal (`SIGILL`, no reason
    /// field).
    Illegal,
    /// The instruction bytes are the architecture's breakpoint trap.
    SwBreak,
    /// The instruction address carries a registered hardware breakpoint.
    HwBreak,
    /// The data access address carries a registered watchpoint whose kind
    /// matches the access direction.
    Watch { kind: WatchKind, addr: U },
}

/// Address-keyed breakpoint and watchpoint dictionaries.
///
/// Each core owns one, and the system owns another for points that aren't
/// bound to any particular core; the matcher consults both.
pub struct PointSet<U: Word> {
    breakpoints: BTreeMap<u64, Point>,
    watchpoints: BTreeMap<u64, Point>,
    _marker: core::marker::PhantomData<U>,
}

impl<U: Word> PointSet<U> {
    pub fn new() -> Self {
        PointSet {
            breakpoints: BTreeMap::new(),
            watchpoints: BTreeMap::new(),
            _marker: core::marker::PhantomData,
        }
    }

    /// Re-inserting the same address overwrites.
    pub fn insert(&mut self, type_: PointType, addr: U, kind: u64) {
        let map = if type_.is_breakpoint() {
            &mut self.breakpoints
        } else {
            &mut self.watchpoints
        };
        map.insert(addr.to_u64().unwrap_or(0), Point { type_, kind });
    }

    /// Removing an absent address is a no-op, reported as success. Returns
    /// whether anything was actually removed.
    pub fn remove(&mut self, type_: PointType, addr: U) -> bool {
        let map = if type_.is_breakpoint() {
            &mut self.breakpoints
        } else {
            &mut self.watchpoints
        };
        map.remove(&addr.to_u64().unwrap_or(0)).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty() && self.watchpoints.is_empty()
    }

    /// Decide whether `ret` should halt the replay, in priority order:
    /// illegal instruction, trap instruction, hardware breakpoint, then
    /// watchpoints.
    pub fn match_retired<I>(&self, ret: &RetiredFor<I>) -> Option<PointMatch<U>>
    where
        I: Isa<Xlen = U>,
    {
        if ret.ifu.ill {
            return Some(PointMatch::Illegal);
        }

        if I::is_break_insn(&ret.ifu.rdt) {
            return Some(PointMatch::SwBreak);
        }

        let adr = ret.ifu.adr.to_u64().unwrap_or(0);
        if let Some(point) = self.breakpoints.get(&adr) {
            if point.type_ == PointType::HwBreak {
                return Some(PointMatch::HwBreak);
            }
        }

        if let Some(lsu) = &ret.lsu {
            let rena = !lsu.rdt.is_empty();
            let wena = !lsu.wdt.is_empty();
            let adr = lsu.adr.to_u64().unwrap_or(0);
            if let Some(point) = self.watchpoints.get(&adr) {
                let (hit, kind) = match point.type_ {
                    PointType::Watch => (wena, WatchKind::Write),
                    PointType::RWatch => (rena, WatchKind::Read),
                    PointType::AWatch => (rena || wena, WatchKind::ReadWrite),
                    _ => (false, WatchKind::ReadWrite),
                };
                if hit {
                    return Some(PointMatch::Watch {
                        kind,
                        addr: lsu.adr,
                    });
                }
            }
        }

        None
    }
}

impl<U: Word> Default for PointSet<U> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::riscv::Rv32;
    use crate::trace::Retired;
    use crate::trace::RetiredFor;
    use crate::trace::RetiredLsu;

    fn nop(adr: u32) -> RetiredFor<Rv32> {
        Retired::flow(0, adr, adr + 4, &[0x13, 0x00, 0x00, 0x00])
    }

    #[test]
    fn insert_overwrites_and_remove_is_idempotent() {
        let mut points = PointSet::<u32>::new();
        points.insert(PointType::HwBreak, 0x8000_0100, 4);
        points.insert(PointType::HwBreak, 0x8000_0100, 2);
        assert!(points.remove(PointType::HwBreak, 0x8000_0100));
        assert!(!points.remove(PointType::HwBreak, 0x8000_0100));
    }

    #[test]
    fn illegal_takes_priority() {
        let mut points = PointSet::<u32>::new();
        points.insert(PointType::HwBreak, 0x8000_0000, 4);
        let mut ret = nop(0x8000_0000);
        ret.ifu.ill = true;
        assert_eq!(points.match_retired::<Rv32>(&ret), Some(PointMatch::Illegal));
    }

    #[test]
    fn trap_insn_beats_hw_breakpoint() {
        let mut points = PointSet::<u32>::new();
        points.insert(PointType::HwBreak, 0x8000_0000, 4);
        let mut ret = nop(0x8000_0000);
        ret.ifu.rdt = vec![0x73, 0x00, 0x10, 0x00]; // EBREAK
        assert_eq!(points.match_retired::<Rv32>(&ret), Some(PointMatch::SwBreak));
    }

    #[test]
    fn hw_breakpoint_matches_by_address() {
        let mut points = PointSet::<u32>::new();
        points.insert(PointType::HwBreak, 0x8000_0100, 4);
        assert_eq!(points.match_retired::<Rv32>(&nop(0x8000_0000)), None);
        assert_eq!(
            points.match_retired::<Rv32>(&nop(0x8000_0100)),
            Some(PointMatch::HwBreak)
        );
    }

    #[test]
    fn sw_breakpoint_entries_do_not_match_by_address() {
        // a z0 entry only fires off the trap instruction itself
        let mut points = PointSet::<u32>::new();
        points.insert(PointType::SwBreak, 0x8000_0100, 4);
        assert_eq!(points.match_retired::<Rv32>(&nop(0x8000_0100)), None);
    }

    #[test]
    fn watchpoint_direction() {
        let mut points = PointSet::<u32>::new();
        points.insert(PointType::Watch, 0x8001_0000, 4);
        points.insert(PointType::RWatch, 0x8001_0004, 4);
        points.insert(PointType::AWatch, 0x8001_0008, 4);

        let mut store = nop(0x8000_0000);
        store.lsu = Some(RetiredLsu {
            adr: 0x8001_0000,
            rdt: vec![],
            wdt: vec![1, 2, 3, 4],
        });
        assert_eq!(
            points.match_retired::<Rv32>(&store),
            Some(PointMatch::Watch {
                kind: WatchKind::Write,
                addr: 0x8001_0000
            })
        );

        // a load at the write-watchpoint address does not fire
        let mut load = nop(0x8000_0000);
        load.lsu = Some(RetiredLsu {
            adr: 0x8001_0000,
            rdt: vec![1, 2, 3, 4],
            wdt: vec![],
        });
        assert_eq!(points.match_retired::<Rv32>(&load), None);

        // but fires the read watchpoint
        if let Some(lsu) = &mut load.lsu {
            lsu.adr = 0x8001_0004;
        }
        assert_eq!(
            points.match_retired::<Rv32>(&load),
            Some(PointMatch::Watch {
                kind: WatchKind::Read,
                addr: 0x8001_0004
            })
        );

        // awatch fires either way
        if let Some(lsu) = &mut load.lsu {
            lsu.adr = 0x8001_0008;
        }
        assert_eq!(
            points.match_retired::<Rv32>(&load),
            Some(PointMatch::Watch {
                kind: WatchKind::ReadWrite,
                addr: 0x8001_0008
            })
        );
    }
}
