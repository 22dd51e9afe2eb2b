/// Largest frame the server will buffer before giving up on the sender.
///
/// Well above the advertised `PacketSize`; only a runaway peer hits this.
const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug)]
pub enum RecvPacketError<C> {
    /// Frame exceeded [`MAX_FRAME_LEN`].
    Capacity,
    Connection(C),
}

/// Receives a frame by pulling data from a callback (typically backed by a
/// blocking `Connection::read`).
///
/// Returns either a single control byte (`+`, `-`, `0x03`) or a complete
/// `$<payload>#<xx>` frame. Bytes arriving outside a frame that aren't
/// control bytes are line noise (e.g. the tail of a frame whose start was
/// dropped after a transport error) and are skipped, which re-synchronizes
/// the stream on the next `$`.
pub struct RecvPacketBlocking {}

impl RecvPacketBlocking {
    pub fn new() -> Self {
        RecvPacketBlocking {}
    }

    pub fn recv<C>(
        &mut self,
        frame_buf: &mut Vec<u8>,
        mut get_byte: impl FnMut() -> Result<u8, C>,
    ) -> Result<(), RecvPacketError<C>> {
        frame_buf.clear();

        let header_byte = loop {
            let b = get_byte().map_err(RecvPacketError::Connection)?;
            match b {
                b'$' | b'+' | b'-' | 0x03 => break b,
                _ => trace!("dropping stray byte {:#04x}", b),
            }
        };

        frame_buf.push(header_byte);
        if header_byte == b'$' {
            // read the packet body
            loop {
                let c = get_byte().map_err(RecvPacketError::Connection)?;
                frame_buf.push(c);
                if c == b'#' {
                    break;
                }
                if frame_buf.len() > MAX_FRAME_LEN {
                    return Err(RecvPacketError::Capacity);
                }
            }
            // read the checksum as well
            frame_buf.push(get_byte().map_err(RecvPacketError::Connection)?);
            frame_buf.push(get_byte().map_err(RecvPacketError::Connection)?);
        }

        trace!(
            "<-- {}",
            core::str::from_utf8(frame_buf).unwrap_or("<non-utf8 packet>")
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recv_from(bytes: &[u8]) -> Result<Vec<u8>, RecvPacketError<&'static str>> {
        let mut iter = bytes.iter().copied();
        let mut buf = Vec::new();
        RecvPacketBlocking::new().recv(&mut buf, || iter.next().ok_or("eof"))?;
        Ok(buf)
    }

    #[test]
    fn whole_frame() {
        assert_eq!(recv_from(b"$g#67").unwrap(), b"$g#67");
    }

    #[test]
    fn control_bytes() {
        assert_eq!(recv_from(b"+").unwrap(), b"+");
        assert_eq!(recv_from(b"-").unwrap(), b"-");
        assert_eq!(recv_from(b"\x03").unwrap(), b"\x03");
    }

    #[test]
    fn resyncs_on_stray_bytes() {
        assert_eq!(recv_from(b"garbage$g#67").unwrap(), b"$g#67");
    }
}
