use crate::protocol::commands::Command;
use crate::protocol::common::decode_hex;

/// Packet parse error.
#[derive(Debug, PartialEq, Eq)]
pub enum PacketParseError {
    ChecksumMismatched { checksum: u8, calculated: u8 },
    EmptyBuf,
    MissingChecksum,
    MalformedChecksum,
    MalformedEscape,
    MalformedRunLength,
    MalformedCommand,
    UnexpectedHeader(u8),
}

/// Top-level packet, as classified from raw frame bytes.
pub enum Packet<'a> {
    Ack,
    Nack,
    Interrupt,
    Command(Command<'a>),
}

/// A validated and decoded packet body.
///
/// Frame validation (checksum) runs over the raw wire bytes; the body is then
/// unescaped and run-length expanded into a caller-provided scratch buffer,
/// which this type borrows. Run-length expansion can grow the payload, so
/// decoding in place is not an option.
pub struct PacketBuf<'a> {
    buf: &'a mut [u8],
}

impl<'a> PacketBuf<'a> {
    /// Validate a raw `$<payload>#<xx>` frame and decode its payload.
    pub fn decode(frame: &[u8], scratch: &'a mut Vec<u8>) -> Result<PacketBuf<'a>, PacketParseError> {
        if frame.is_empty() {
            return Err(PacketParseError::EmptyBuf);
        }

        // split the frame into body and checksum components
        let mut parts = frame[1..].split(|b| *b == b'#');

        let body = parts.next().unwrap(); // split iter always returns at least one elem
        let checksum = parts
            .next()
            .ok_or(PacketParseError::MissingChecksum)?
            .get(..2)
            .ok_or(PacketParseError::MalformedChecksum)?;

        // the checksum covers the body as transmitted, escapes and all
        let checksum = decode_hex(checksum).map_err(|_| PacketParseError::MalformedChecksum)?;
        let calculated = body.iter().fold(0u8, |a, x| a.wrapping_add(*x));
        if calculated != checksum {
            return Err(PacketParseError::ChecksumMismatched {
                checksum,
                calculated,
            });
        }

        scratch.clear();
        unescape_body(body, scratch)?;

        Ok(PacketBuf {
            buf: scratch.as_mut_slice(),
        })
    }

    /// (used for tests) Wrap a raw body buffer, skipping the frame
    /// validation and decode stages.
    #[cfg(test)]
    pub fn new_with_raw_body(body: &'a mut [u8]) -> PacketBuf<'a> {
        PacketBuf { buf: body }
    }

    pub fn as_body(&self) -> &[u8] {
        self.buf
    }

    /// Return a mut reference to the decoded packet body.
    pub fn into_body(self) -> &'a mut [u8] {
        self.buf
    }
}

/// Undo the two payload transport encodings:
///
/// - `}` escape: `}b` stands for `b ^ 0x20` (used for `$`, `#`, `}`, `*`)
/// - run-length: `x*N` stands for `N - 28` repetitions of `x` in total
fn unescape_body(body: &[u8], out: &mut Vec<u8>) -> Result<(), PacketParseError> {
    let mut iter = body.iter();
    while let Some(&b) = iter.next() {
        match b {
            b'}' => {
                let &escaped = iter.next().ok_or(PacketParseError::MalformedEscape)?;
                out.push(escaped ^ 0x20);
            }
            b'*' => {
                let &count = iter.next().ok_or(PacketParseError::MalformedRunLength)?;
                let run = (count as usize)
                    .checked_sub(28)
                    .filter(|&n| n >= 1)
                    .ok_or(PacketParseError::MalformedRunLength)?;
                let &prev = out.last().ok_or(PacketParseError::MalformedRunLength)?;
                // the byte preceding the `*` counts as the run's first element
                for _ in 1..run {
                    out.push(prev);
                }
            }
            _ => out.push(b),
        }
    }
    Ok(())
}

impl<'a> Packet<'a> {
    /// Classify raw frame bytes (as returned by the receive path) into a
    /// packet, decoding command bodies into `scratch`.
    pub fn parse(
        frame: &[u8],
        scratch: &'a mut Vec<u8>,
    ) -> Result<Packet<'a>, PacketParseError> {
        match frame.first() {
            None => Err(PacketParseError::EmptyBuf),
            Some(b'$') => Ok(Packet::Command(Command::from_packet(PacketBuf::decode(
                frame, scratch,
            )?)?)),
            Some(b'+') => Ok(Packet::Ack),
            Some(b'-') => Ok(Packet::Nack),
            Some(0x03) => Ok(Packet::Interrupt),
            Some(&b) => Err(PacketParseError::UnexpectedHeader(b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(frame: &[u8]) -> Result<Vec<u8>, PacketParseError> {
        let mut scratch = Vec::new();
        PacketBuf::decode(frame, &mut scratch).map(|p| p.as_body().to_vec())
    }

    #[test]
    fn plain_body() {
        assert_eq!(decode(b"$m80000000,4#fd").unwrap(), b"m80000000,4");
    }

    #[test]
    fn checksum_mismatch() {
        assert_eq!(
            decode(b"$g#00"),
            Err(PacketParseError::ChecksumMismatched {
                checksum: 0x00,
                calculated: 0x67,
            })
        );
    }

    #[test]
    fn missing_checksum() {
        assert_eq!(decode(b"$g"), Err(PacketParseError::MissingChecksum));
        assert_eq!(decode(b"$g#6"), Err(PacketParseError::MalformedChecksum));
    }

    #[test]
    fn escape_decoding() {
        // "}\x03" decodes to '#' (0x23); checksum covers the escaped form
        let frame = b"$X1,1:}\x03#a0";
        assert_eq!(decode(frame).unwrap(), b"X1,1:\x23");
    }

    #[test]
    fn run_length_expansion() {
        // '0' followed by "* " (count 32 - 28 = 4 total copies)
        let body = b"0* ";
        let sum = body.iter().fold(0u8, |a, x| a.wrapping_add(*x));
        let frame = [b"$".as_slice(), body, b"#".as_slice(), format!("{sum:02x}").as_bytes()]
            .concat();
        assert_eq!(decode(&frame).unwrap(), b"0000");
    }

    #[test]
    fn run_length_without_preceding_byte() {
        assert_eq!(decode(b"$* #4a"), Err(PacketParseError::MalformedRunLength));
    }
}
