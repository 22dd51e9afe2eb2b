use btoi::btou_radix;
use btoi::ParseIntegerError;
use num_traits::CheckedAdd;
use num_traits::CheckedMul;
use num_traits::FromPrimitive;
use num_traits::Zero;

/// Decode a hex number from its ASCII representation. Accepts both cases.
#[inline]
pub fn decode_hex<I>(buf: &[u8]) -> Result<I, ParseIntegerError>
where
    I: FromPrimitive + Zero + CheckedAdd + CheckedMul,
{
    btou_radix(buf, 16)
}

#[derive(Debug, PartialEq, Eq)]
pub enum DecodeHexBufError {
    NotAscii,
    NotEvenLen,
}

fn ascii2byte(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        // "xx" denotes a value the client doesn't know; treat it as zero
        b'x' | b'X' => Some(0),
        _ => None,
    }
}

/// Decode a hex string into a byte slice _in place_.
pub fn decode_hex_buf(buf: &mut [u8]) -> Result<&mut [u8], DecodeHexBufError> {
    use DecodeHexBufError::*;

    if buf.len() % 2 != 0 {
        return Err(NotEvenLen);
    }

    let decoded_len = buf.len() / 2;
    for i in 0..decoded_len {
        let b = ascii2byte(buf[i * 2]).ok_or(NotAscii)? << 4
            | ascii2byte(buf[i * 2 + 1]).ok_or(NotAscii)?;
        buf[i] = b;
    }

    Ok(&mut buf[..decoded_len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_hex_both_cases() {
        assert_eq!(decode_hex::<u32>(b"80000000"), Ok(0x8000_0000));
        assert_eq!(decode_hex::<u32>(b"DeadBeef"), Ok(0xdead_beef));
        assert!(decode_hex::<u8>(b"100").is_err());
    }

    #[test]
    fn decode_buf_in_place() {
        let mut buf = *b"beef";
        assert_eq!(decode_hex_buf(&mut buf).unwrap(), &[0xbe, 0xef]);
    }

    #[test]
    fn decode_buf_rejects_odd_len() {
        let mut buf = *b"bee";
        assert_eq!(decode_hex_buf(&mut buf), Err(DecodeHexBufError::NotEvenLen));
    }
}
