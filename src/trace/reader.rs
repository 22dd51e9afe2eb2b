//! The binary trace file format.
//!
//! ```text
//! file   := header record*
//! header := "TRCD" version:u16 xlen:u8 flen:u8 vlen:u8 harts:u8 pad:u16
//! record := hart:u8 flags:u8
//!           ilen:u8 insn[ilen] adr:X pcn:X
//!           ngpr:u8 { idx:u8  rdt:X wdt:X }*
//!           nfpr:u8 { idx:u8  rdt:F wdt:F }*
//!           nvec:u8 { idx:u8  rdt:V wdt:V }*
//!           ncsr:u8 { idx:u16 rdt:X wdt:X }*
//!           [ adr:X rlen:u8 rdt[rlen] wlen:u8 wdt[wlen] ]   (iff flags.LSU)
//! ```
//!
//! All multi-byte fields are little-endian. The word-width bytes in the
//! header record `size_of` the build's `XLEN`/`FLEN`/`VLEN`; a mismatch is
//! rejected up front rather than producing garbled records.

use std::io;
use std::io::Read;
use std::io::Write;

use crate::arch::Isa;
use crate::arch::Word;
use crate::internal::LeBytes;
use crate::trace::Retired;
use crate::trace::RetiredCsr;
use crate::trace::RetiredFor;
use crate::trace::RetiredIfu;
use crate::trace::RetiredLsu;
use crate::trace::RetiredReg;

const MAGIC: [u8; 4] = *b"TRCD";
const VERSION: u16 = 1;

const FLAG_ILL: u8 = 1 << 0;
const FLAG_LSU: u8 = 1 << 1;

#[derive(Debug)]
pub enum TraceFileError {
    Io(io::Error),
    BadMagic,
    UnsupportedVersion(u16),
    WordWidthMismatch {
        field: &'static str,
        file: u8,
        build: u8,
    },
    HartOutOfRange {
        record: usize,
        hart: u8,
        harts: u8,
    },
}

impl From<io::Error> for TraceFileError {
    fn from(e: io::Error) -> Self {
        TraceFileError::Io(e)
    }
}

impl core::fmt::Display for TraceFileError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use TraceFileError::*;
        match self {
            Io(e) => write!(f, "trace file I/O error: {}", e),
            BadMagic => write!(f, "not a trace file (bad magic)"),
            UnsupportedVersion(v) => write!(f, "unsupported trace file version {}", v),
            WordWidthMismatch { field, file, build } => write!(
                f,
                "trace file {} width is {} bytes, but this build uses {}",
                field, file, build
            ),
            HartOutOfRange { record, hart, harts } => write!(
                f,
                "record {} names hart {}, but the file declares {} hart(s)",
                record, hart, harts
            ),
        }
    }
}

impl std::error::Error for TraceFileError {}

/// The parsed file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceFileHeader {
    pub version: u16,
    pub xlen: u8,
    pub flen: u8,
    pub vlen: u8,
    pub harts: u8,
}

impl TraceFileHeader {
    /// Read and validate a header, without committing to a build `Isa` yet.
    /// This is how the binary decides between the 32- and 64-bit server
    /// instantiations.
    pub fn read<R: Read>(r: &mut R) -> Result<Self, TraceFileError> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(TraceFileError::BadMagic);
        }

        let version = read_u16(r)?;
        if version != VERSION {
            return Err(TraceFileError::UnsupportedVersion(version));
        }

        let xlen = read_u8(r)?;
        let flen = read_u8(r)?;
        let vlen = read_u8(r)?;
        let harts = read_u8(r)?;
        let _pad = read_u16(r)?;

        Ok(TraceFileHeader {
            version,
            xlen,
            flen,
            vlen,
            harts,
        })
    }

    fn check_widths<I: Isa>(&self) -> Result<(), TraceFileError> {
        let checks: [(&'static str, u8, usize); 3] = [
            ("XLEN", self.xlen, I::Xlen::WIDTH),
            ("FLEN", self.flen, I::Flen::WIDTH),
            ("VLEN", self.vlen, I::Vlen::WIDTH),
        ];
        for (field, file, build) in checks {
            if file as usize != build {
                return Err(TraceFileError::WordWidthMismatch {
                    field,
                    file,
                    build: build as u8,
                });
            }
        }
        Ok(())
    }
}

/// Read an entire trace file into memory.
pub fn read_trace<I: Isa, R: Read>(mut r: R) -> Result<Vec<RetiredFor<I>>, TraceFileError> {
    let header = TraceFileHeader::read(&mut r)?;
    read_trace_body::<I, R>(r, &header)
}

/// Read the records following an already-parsed header.
pub fn read_trace_body<I: Isa, R: Read>(
    mut r: R,
    header: &TraceFileHeader,
) -> Result<Vec<RetiredFor<I>>, TraceFileError> {
    header.check_widths::<I>()?;

    let mut trace = Vec::new();
    loop {
        let hart = match read_u8(&mut r) {
            Ok(b) => b,
            // a record boundary is the only clean place to hit EOF
            Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };

        if hart >= header.harts {
            return Err(TraceFileError::HartOutOfRange {
                record: trace.len(),
                hart,
                harts: header.harts,
            });
        }

        let flags = read_u8(&mut r)?;

        let ilen = read_u8(&mut r)? as usize;
        let mut insn = vec![0u8; ilen];
        r.read_exact(&mut insn)?;

        let adr = read_word::<I::Xlen, R>(&mut r)?;
        let pcn = read_word::<I::Xlen, R>(&mut r)?;

        let gpr = read_regs::<I::Xlen, R>(&mut r)?;
        let fpr = read_regs::<I::Flen, R>(&mut r)?;
        let vec = read_regs::<I::Vlen, R>(&mut r)?;

        let ncsr = read_u8(&mut r)? as usize;
        let mut csr = Vec::with_capacity(ncsr);
        for _ in 0..ncsr {
            let idx = read_u16(&mut r)?;
            let rdt = read_word::<I::Xlen, R>(&mut r)?;
            let wdt = read_word::<I::Xlen, R>(&mut r)?;
            csr.push(RetiredCsr { idx, rdt, wdt });
        }

        let lsu = if flags & FLAG_LSU != 0 {
            let adr = read_word::<I::Xlen, R>(&mut r)?;
            let rlen = read_u8(&mut r)? as usize;
            let mut rdt = vec![0u8; rlen];
            r.read_exact(&mut rdt)?;
            let wlen = read_u8(&mut r)? as usize;
            let mut wdt = vec![0u8; wlen];
            r.read_exact(&mut wdt)?;
            Some(RetiredLsu { adr, rdt, wdt })
        } else {
            None
        };

        trace.push(Retired {
            hart,
            ifu: RetiredIfu {
                adr,
                pcn,
                rdt: insn,
                ill: flags & FLAG_ILL != 0,
            },
            gpr,
            fpr,
            vec,
            csr,
            lsu,
        });
    }

    Ok(trace)
}

/// Serialize a trace back out (the `-o` processed-trace output).
pub fn write_trace<I: Isa, W: Write>(
    mut w: W,
    harts: u8,
    trace: &[RetiredFor<I>],
) -> Result<(), io::Error> {
    w.write_all(&MAGIC)?;
    w.write_all(&VERSION.to_le_bytes())?;
    w.write_all(&[
        I::Xlen::WIDTH as u8,
        I::Flen::WIDTH as u8,
        I::Vlen::WIDTH as u8,
        harts,
    ])?;
    w.write_all(&0u16.to_le_bytes())?;

    for ret in trace {
        let mut flags = 0u8;
        if ret.ifu.ill {
            flags |= FLAG_ILL;
        }
        if ret.lsu.is_some() {
            flags |= FLAG_LSU;
        }

        w.write_all(&[ret.hart, flags, ret.ifu.rdt.len() as u8])?;
        w.write_all(&ret.ifu.rdt)?;
        write_word(&mut w, ret.ifu.adr)?;
        write_word(&mut w, ret.ifu.pcn)?;

        write_regs(&mut w, &ret.gpr)?;
        write_regs(&mut w, &ret.fpr)?;
        write_regs(&mut w, &ret.vec)?;

        w.write_all(&[ret.csr.len() as u8])?;
        for e in &ret.csr {
            w.write_all(&e.idx.to_le_bytes())?;
            write_word(&mut w, e.rdt)?;
            write_word(&mut w, e.wdt)?;
        }

        if let Some(lsu) = &ret.lsu {
            write_word(&mut w, lsu.adr)?;
            w.write_all(&[lsu.rdt.len() as u8])?;
            w.write_all(&lsu.rdt)?;
            w.write_all(&[lsu.wdt.len() as u8])?;
            w.write_all(&lsu.wdt)?;
        }
    }

    Ok(())
}

fn read_u8<R: Read>(r: &mut R) -> Result<u8, io::Error> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

fn read_u16<R: Read>(r: &mut R) -> Result<u16, io::Error> {
    let mut b = [0u8; 2];
    r.read_exact(&mut b)?;
    Ok(u16::from_le_bytes(b))
}

fn read_word<W: Word, R: Read>(r: &mut R) -> Result<W, io::Error> {
    let mut buf = [0u8; 16];
    r.read_exact(&mut buf[..W::WIDTH])?;
    LeBytes::from_le_bytes(&buf[..W::WIDTH])
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed word field"))
}

fn read_regs<W: Word, R: Read>(r: &mut R) -> Result<Vec<RetiredReg<W>>, io::Error> {
    let n = read_u8(r)? as usize;
    let mut regs = Vec::with_capacity(n);
    for _ in 0..n {
        let idx = read_u8(r)?;
        let rdt = read_word::<W, R>(r)?;
        let wdt = read_word::<W, R>(r)?;
        regs.push(RetiredReg { idx, rdt, wdt });
    }
    Ok(regs)
}

fn write_word<W: Word, O: Write>(w: &mut O, word: W) -> Result<(), io::Error> {
    let mut buf = [0u8; 16];
    let len = word
        .to_le_bytes(&mut buf)
        .expect("word cannot exceed 16 bytes");
    w.write_all(&buf[..len])
}

fn write_regs<W: Word, O: Write>(w: &mut O, regs: &[RetiredReg<W>]) -> Result<(), io::Error> {
    w.write_all(&[regs.len() as u8])?;
    for e in regs {
        w.write_all(&[e.idx])?;
        write_word(w, e.rdt)?;
        write_word(w, e.wdt)?;
    }
    Ok(())
}
