//! Positional state snapshots.
//!
//! Layout: 8 bytes of simulation time, 8 bytes of trace cursor position,
//! then for each core its canonical register buffer followed by its RAM
//! contents, then the system RAM contents. Everything is length-checked on
//! load; a snapshot taken under a different architectural configuration is
//! rejected rather than partially applied.

use std::io;
use std::io::Read;
use std::io::Write;

use crate::arch::Isa;
use crate::shadow::ShadowSystem;

#[derive(Debug)]
pub enum SnapshotError {
    Io(io::Error),
    /// Snapshot length doesn't match the configured register/memory layout.
    LengthMismatch,
    /// The recorded cursor points outside the loaded trace.
    CursorOutOfRange { cursor: u64, trace_len: usize },
}

impl From<io::Error> for SnapshotError {
    fn from(e: io::Error) -> Self {
        SnapshotError::Io(e)
    }
}

impl core::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SnapshotError::Io(e) => write!(f, "snapshot I/O error: {}", e),
            SnapshotError::LengthMismatch => {
                write!(f, "snapshot does not match the configured state layout")
            }
            SnapshotError::CursorOutOfRange { cursor, trace_len } => write!(
                f,
                "snapshot cursor {} is outside the {}-record trace",
                cursor, trace_len
            ),
        }
    }
}

impl std::error::Error for SnapshotError {}

/// Persist the complete shadow state.
pub fn save<I: Isa, W: Write>(sys: &ShadowSystem<I>, mut w: W) -> Result<(), SnapshotError> {
    w.write_all(&sys.time().to_le_bytes())?;
    w.write_all(&(sys.cursor() as u64).to_le_bytes())?;

    for hart in 0..sys.num_cores() {
        let core = sys.core(hart).expect("hart in range");
        w.write_all(&core.regs.read_all())?;
        w.write_all(core.mem.ram_bytes())?;
    }
    w.write_all(sys.system_ram_bytes())?;

    Ok(())
}

/// Restore a snapshot produced by [`save`] into an equally-configured
/// system. Positional and length-checked.
pub fn load<I: Isa, R: Read>(sys: &mut ShadowSystem<I>, mut r: R) -> Result<(), SnapshotError> {
    let mut word = [0u8; 8];
    r.read_exact(&mut word)?;
    let time = u64::from_le_bytes(word);
    r.read_exact(&mut word)?;
    let cursor = u64::from_le_bytes(word);

    if cursor as usize > sys.trace_len() {
        return Err(SnapshotError::CursorOutOfRange {
            cursor,
            trace_len: sys.trace_len(),
        });
    }

    for hart in 0..sys.num_cores() {
        let layout_len = sys.core(hart).expect("hart in range").regs.layout_len();

        let mut regs = vec![0u8; layout_len];
        read_exactly(&mut r, &mut regs)?;

        {
            let core = sys.core_mut(hart).expect("hart in range");
            core.regs
                .write_all(&regs)
                .map_err(|_| SnapshotError::LengthMismatch)?;
        }

        let core = sys.core_mut(hart).expect("hart in range");
        let ram = core.mem.ram_bytes_mut();
        read_exactly(&mut r, ram)?;
    }

    read_exactly(&mut r, sys.system_ram_bytes_mut())?;

    // the file must end exactly here
    let mut probe = [0u8; 1];
    match r.read(&mut probe)? {
        0 => {}
        _ => return Err(SnapshotError::LengthMismatch),
    }

    sys.restore_position(time, cursor as usize);
    Ok(())
}

fn read_exactly<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<(), SnapshotError> {
    r.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            SnapshotError::LengthMismatch
        } else {
            SnapshotError::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::riscv::Rv32;
    use crate::shadow::AddressBlock;
    use crate::shadow::SystemConfig;
    use crate::trace::Retired;
    use crate::trace::RetiredReg;

    fn system() -> ShadowSystem<Rv32> {
        let config = SystemConfig::single_core(
            vec![AddressBlock {
                base: 0x8000_0000,
                size: 0x1000,
            }],
            vec![],
        );
        let mut r0 = Retired::flow(0, 0x8000_0000, 0x8000_0004, &[0x13, 0x05, 0xa0, 0x02]);
        r0.gpr.push(RetiredReg {
            idx: 10,
            rdt: 0,
            wdt: 42,
        });
        ShadowSystem::new(&config, vec![r0]).unwrap()
    }

    #[test]
    fn save_load_round_trip() {
        let mut sys = system();
        sys.step_forward(1).unwrap();
        sys.mem_write(0, 0x8000_0100, &[0xaa, 0xbb, 0xcc, 0xdd])
            .unwrap();

        let mut snapshot = Vec::new();
        save(&sys, &mut snapshot).unwrap();

        let mut fresh = system();
        load(&mut fresh, snapshot.as_slice()).unwrap();

        assert_eq!(fresh.cursor(), 1);
        assert_eq!(fresh.time(), 1);
        assert_eq!(fresh.reg_read_all(0).unwrap(), sys.reg_read_all(0).unwrap());
        assert_eq!(
            fresh.mem_read(0, 0x8000_0100, 4).unwrap(),
            &[0xaa, 0xbb, 0xcc, 0xdd]
        );
    }

    #[test]
    fn load_rejects_truncated_snapshot() {
        let sys = system();
        let mut snapshot = Vec::new();
        save(&sys, &mut snapshot).unwrap();
        snapshot.truncate(snapshot.len() - 1);

        let mut fresh = system();
        assert!(matches!(
            load(&mut fresh, snapshot.as_slice()),
            Err(SnapshotError::LengthMismatch)
        ));
    }

    #[test]
    fn load_rejects_trailing_garbage() {
        let sys = system();
        let mut snapshot = Vec::new();
        save(&sys, &mut snapshot).unwrap();
        snapshot.push(0);

        let mut fresh = system();
        assert!(matches!(
            load(&mut fresh, snapshot.as_slice()),
            Err(SnapshotError::LengthMismatch)
        ));
    }
}
