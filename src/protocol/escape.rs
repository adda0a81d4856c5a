//! Byte stuffing and XOR checksum for the 0x7E-delimited frame.

use super::{ESCAPE_ESCAPE, ESCAPE_MARK, ESCAPE_SIGN, FRAME_SIGN};
use crate::error::{CodecError, Result};

/// Escape a sentinel-bounded raw frame.
///
/// Every byte strictly between the first and last positions is stuffed:
/// 0x7E becomes `7D 02` and 0x7D becomes `7D 01`. The two sentinel bytes
/// themselves are written verbatim.
pub fn escape(raw: &[u8]) -> Result<Vec<u8>> {
    check_sentinels(raw)?;

    let mut out = Vec::with_capacity(raw.len() + 8);
    out.push(FRAME_SIGN);
    for &b in &raw[1..raw.len() - 1] {
        match b {
            FRAME_SIGN => {
                out.push(ESCAPE_MARK);
                out.push(ESCAPE_SIGN);
            }
            ESCAPE_MARK => {
                out.push(ESCAPE_MARK);
                out.push(ESCAPE_ESCAPE);
            }
            _ => out.push(b),
        }
    }
    out.push(FRAME_SIGN);
    Ok(out)
}

/// Reverse the byte stuffing of [`escape`].
///
/// Fails with `BadEscape` when 0x7D is followed by anything other than
/// 0x01 or 0x02, or when an unescaped 0x7E appears in the interior.
pub fn unescape(framed: &[u8]) -> Result<Vec<u8>> {
    check_sentinels(framed)?;

    let interior = &framed[1..framed.len() - 1];
    let mut out = Vec::with_capacity(framed.len());
    out.push(FRAME_SIGN);
    let mut i = 0;
    while i < interior.len() {
        match interior[i] {
            ESCAPE_MARK => {
                let next = interior.get(i + 1).ok_or(CodecError::BadEscape)?;
                match *next {
                    ESCAPE_SIGN => out.push(FRAME_SIGN),
                    ESCAPE_ESCAPE => out.push(ESCAPE_MARK),
                    _ => return Err(CodecError::BadEscape.into()),
                }
                i += 2;
            }
            FRAME_SIGN => return Err(CodecError::BadEscape.into()),
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out.push(FRAME_SIGN);
    Ok(out)
}

/// Bytewise XOR of a span.
pub fn xor_checksum(span: &[u8]) -> u8 {
    span.iter().fold(0, |acc, b| acc ^ b)
}

fn check_sentinels(frame: &[u8]) -> Result<()> {
    if frame.len() < 2 || frame[0] != FRAME_SIGN || frame[frame.len() - 1] != FRAME_SIGN {
        return Err(CodecError::BadFrame.into());
    }
    Ok(())
}
