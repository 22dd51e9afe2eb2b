//! The shadow memory map: RAM-like blocks over one contiguous backing
//! buffer, plus a sparse byte map for memory-mapped I/O.

use std::collections::BTreeMap;

use crate::arch::Word;
use crate::internal::LeBytes;
use crate::shadow::ShadowError;

/// A half-open address range `[base, base + size)`.
///
/// `base` and `size` must both be aligned to the word size; [`MemoryMap::new`]
/// rejects anything else at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressBlock<U> {
    pub base: U,
    pub size: U,
}

/// Address-map validation failure. These are fatal: a server with a bogus
/// memory map cannot answer anything truthfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    UnalignedBlock { base: u64, size: u64 },
    OverlappingBlocks { first: u64, second: u64 },
    UnknownHart { record: usize, hart: u8 },
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use ConfigError::*;
        match self {
            UnalignedBlock { base, size } => write!(
                f,
                "address block {:#x}+{:#x} is not word-aligned",
                base, size
            ),
            OverlappingBlocks { first, second } => write!(
                f,
                "address blocks at {:#x} and {:#x} overlap",
                first, second
            ),
            UnknownHart { record, hart } => write!(
                f,
                "trace record {} names hart {}, which the configuration doesn't declare",
                record, hart
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

pub struct MemoryMap<U: Word> {
    /// RAM blocks with their offsets into `buf`.
    ram: Vec<(AddressBlock<U>, usize)>,
    /// Contiguous backing storage, Σ block sizes long.
    buf: Vec<u8>,
    /// Declared MMIO ranges (validated, kept for introspection).
    io_blocks: Vec<AddressBlock<U>>,
    /// Individually recorded MMIO bytes.
    io: BTreeMap<u64, u8>,
}

impl<U: Word> MemoryMap<U> {
    pub fn new(
        ram_blocks: Vec<AddressBlock<U>>,
        io_blocks: Vec<AddressBlock<U>>,
    ) -> Result<Self, ConfigError> {
        check_blocks(&ram_blocks)?;
        check_blocks(&io_blocks)?;

        let mut ram = Vec::with_capacity(ram_blocks.len());
        let mut total = 0usize;
        for block in ram_blocks {
            ram.push((block, total));
            total += block.size.to_usize().unwrap_or(0);
        }

        Ok(MemoryMap {
            ram,
            buf: vec![0u8; total],
            io_blocks,
            io: BTreeMap::new(),
        })
    }

    /// An empty map; every access falls through to the caller's fallback.
    pub fn empty() -> Self {
        MemoryMap {
            ram: Vec::new(),
            buf: Vec::new(),
            io_blocks: Vec::new(),
            io: BTreeMap::new(),
        }
    }

    pub fn io_blocks(&self) -> &[AddressBlock<U>] {
        &self.io_blocks
    }

    /// The raw RAM backing buffer, in block order. Snapshots persist this
    /// wholesale.
    pub fn ram_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn ram_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Locate `[addr, addr+len)` within a single RAM block.
    ///
    /// Reads and writes may cross block boundaries only within the same
    /// category; a range that straddles two RAM blocks is not backed.
    fn ram_range(&self, addr: U, len: usize) -> Option<core::ops::Range<usize>> {
        let addr = addr.to_u64()?;
        for (block, offset) in &self.ram {
            let base = block.base.to_u64()?;
            let size = block.size.to_u64()?;
            if addr >= base && addr - base + len as u64 <= size {
                let start = offset + (addr - base) as usize;
                return Some(start..start + len);
            }
        }
        None
    }

    /// A view into RAM, if the whole range is RAM-backed.
    pub fn ram_slice(&self, addr: U, len: usize) -> Option<&[u8]> {
        let range = self.ram_range(addr, len)?;
        Some(&self.buf[range])
    }

    pub fn ram_slice_mut(&mut self, addr: U, len: usize) -> Option<&mut [u8]> {
        let range = self.ram_range(addr, len)?;
        Some(&mut self.buf[range])
    }

    /// A recorded MMIO byte, if one exists.
    pub fn io_get(&self, addr: u64) -> Option<u8> {
        self.io.get(&addr).copied()
    }

    pub fn io_set(&mut self, addr: u64, byte: u8) {
        self.io.insert(addr, byte);
    }

    /// Byte-granular read. RAM takes precedence; outside RAM each byte must
    /// have been recorded in the sparse I/O map.
    pub fn read(&self, addr: U, len: usize) -> Result<Vec<u8>, ShadowError> {
        if let Some(slice) = self.ram_slice(addr, len) {
            return Ok(slice.to_vec());
        }

        let base = addr.to_u64().unwrap_or(0);
        let mut out = Vec::with_capacity(len);
        for i in 0..len as u64 {
            let a = base
                .checked_add(i)
                .ok_or(ShadowError::UnmappedAddress(u64::MAX))?;
            out.push(self.io_get(a).ok_or(ShadowError::UnmappedAddress(a))?);
        }
        Ok(out)
    }

    /// Byte-granular write. Writes outside RAM fall back to the sparse I/O
    /// map, creating entries.
    pub fn write(&mut self, addr: U, data: &[u8]) -> Result<(), ShadowError> {
        if let Some(slice) = self.ram_slice_mut(addr, data.len()) {
            slice.copy_from_slice(data);
            return Ok(());
        }

        let base = addr.to_u64().unwrap_or(0);
        for (i, &b) in data.iter().enumerate() {
            let a = base
                .checked_add(i as u64)
                .ok_or(ShadowError::UnmappedAddress(u64::MAX))?;
            self.io_set(a, b);
        }
        Ok(())
    }

    /// Typed load, used during trace application.
    pub fn load<T: Word>(&self, addr: U) -> Result<T, ShadowError> {
        let bytes = self.read(addr, T::WIDTH)?;
        LeBytes::from_le_bytes(&bytes)
            .ok_or_else(|| ShadowError::UnmappedAddress(addr.to_u64().unwrap_or(0)))
    }

    /// Typed store, used during trace application.
    pub fn store<T: Word>(&mut self, addr: U, val: T) -> Result<(), ShadowError> {
        let mut buf = [0u8; 16];
        let len = val.to_le_bytes(&mut buf).expect("word fits in 16 bytes");
        self.write(addr, &buf[..len])
    }
}

fn check_blocks<U: Word>(blocks: &[AddressBlock<U>]) -> Result<(), ConfigError> {
    let word = U::WIDTH as u64;

    for block in blocks {
        let base = block.base.to_u64().unwrap_or(0);
        let size = block.size.to_u64().unwrap_or(0);
        if base % word != 0 || size % word != 0 {
            return Err(ConfigError::UnalignedBlock { base, size });
        }
    }

    for (i, a) in blocks.iter().enumerate() {
        for b in &blocks[i + 1..] {
            let (a_base, a_size) = (a.base.to_u64().unwrap_or(0), a.size.to_u64().unwrap_or(0));
            let (b_base, b_size) = (b.base.to_u64().unwrap_or(0), b.size.to_u64().unwrap_or(0));
            if a_base < b_base + b_size && b_base < a_base + a_size {
                return Err(ConfigError::OverlappingBlocks {
                    first: a_base,
                    second: b_base,
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> MemoryMap<u32> {
        MemoryMap::new(
            vec![AddressBlock {
                base: 0x8000_0000,
                size: 0x1_0000,
            }],
            vec![AddressBlock {
                base: 0x8001_0000,
                size: 0x1_0000,
            }],
        )
        .unwrap()
    }

    #[test]
    fn ram_write_read_commutation() {
        let mut m = map();
        m.write(0x8000_0000, &[0x13, 0x05, 0xa0, 0x02]).unwrap();
        assert_eq!(m.read(0x8000_0000, 4).unwrap(), &[0x13, 0x05, 0xa0, 0x02]);
        // offset within the block
        m.write(0x8000_fffc, &[1, 2, 3, 4]).unwrap();
        assert_eq!(m.read(0x8000_fffc, 4).unwrap(), &[1, 2, 3, 4]);
    }

    #[test]
    fn unmapped_read_fails() {
        let m = map();
        assert_eq!(
            m.read(0x8002_0000, 1),
            Err(ShadowError::UnmappedAddress(0x8002_0000))
        );
    }

    #[test]
    fn io_write_creates_entries() {
        let mut m = map();
        m.write(0x8001_0004, &[0xaa, 0xbb]).unwrap();
        assert_eq!(m.read(0x8001_0004, 2).unwrap(), &[0xaa, 0xbb]);
        // a neighbouring, never-written byte is still unmapped
        assert!(m.read(0x8001_0004, 3).is_err());
    }

    #[test]
    fn ram_has_precedence_over_io() {
        let mut m = map();
        m.io_set(0x8000_0000, 0xff);
        m.write(0x8000_0000, &[0x01]).unwrap();
        assert_eq!(m.read(0x8000_0000, 1).unwrap(), &[0x01]);
    }

    #[test]
    fn range_must_stay_inside_one_block() {
        let m = map();
        // last RAM byte is 0x8000_ffff; this read would run into the I/O block
        assert!(m.ram_slice(0x8000_fffe, 4).is_none());
    }

    #[test]
    fn typed_load_store() {
        let mut m = map();
        m.store::<u32>(0x8000_0010, 0xdead_beef).unwrap();
        assert_eq!(m.load::<u32>(0x8000_0010).unwrap(), 0xdead_beef);
        assert_eq!(m.read(0x8000_0010, 4).unwrap(), &[0xef, 0xbe, 0xad, 0xde]);
    }

    #[test]
    fn rejects_unaligned_blocks() {
        let err = MemoryMap::<u32>::new(
            vec![AddressBlock {
                base: 0x8000_0002,
                size: 0x1000,
            }],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnalignedBlock { .. }));
    }

    #[test]
    fn rejects_overlapping_blocks() {
        let err = MemoryMap::<u32>::new(
            vec![
                AddressBlock {
                    base: 0x8000_0000,
                    size: 0x1000,
                },
                AddressBlock {
                    base: 0x8000_0800,
                    size: 0x1000,
                },
            ],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::OverlappingBlocks { .. }));
    }
}
