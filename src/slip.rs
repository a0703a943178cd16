//! SLIP-style byte escaping for frame boundaries.
//!
//! Frames are bounded by a literal [`DELIMITER`] byte on each side.  The
//! delimiter must never appear unescaped inside a frame, so every frame byte
//! equal to the delimiter or to the escape byte is replaced by a two-byte
//! escape pair before transmission:
//!
//! | Byte in frame | Bytes on the wire |
//! |---------------|-------------------|
//! | `0xC0`        | `0xDB 0xDC`       |
//! | `0xDB`        | `0xDB 0xDD`       |
//! | anything else | unchanged         |
//!
//! Encoding is stateless per byte.  Decoding is incremental: input arrives in
//! arbitrary-sized chunks, so an escape byte at the end of one chunk must be
//! resolved by the first byte of the next.  [`Unescaper`] carries exactly that
//! one pending-escape bit of state.
//!
//! No I/O happens here; this is pure data transformation.

/// Frame boundary byte.
pub const DELIMITER: u8 = 0xC0;

/// Escape introducer byte.
pub const ESCAPE: u8 = 0xDB;

/// Second byte of the pair encoding a literal [`DELIMITER`].
pub const ESCAPED_DELIMITER: u8 = 0xDC;

/// Second byte of the pair encoding a literal [`ESCAPE`].
pub const ESCAPED_ESCAPE: u8 = 0xDD;

/// Append the wire encoding of `byte` (one or two bytes) to `out`.
pub fn escape_into(byte: u8, out: &mut Vec<u8>) {
    match byte {
        DELIMITER => out.extend_from_slice(&[ESCAPE, ESCAPED_DELIMITER]),
        ESCAPE => out.extend_from_slice(&[ESCAPE, ESCAPED_ESCAPE]),
        other => out.push(other),
    }
}

/// An escape byte was followed by something other than a valid pair byte.
///
/// The peer can only produce `0xDB 0xDC` or `0xDB 0xDD`; anything else means
/// the stream is corrupt and the in-progress frame must be abandoned.  The
/// offending second byte is carried for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadEscape(pub u8);

/// Incremental unescaper for the receive path.
///
/// Feed raw wire bytes to [`push`](Unescaper::push); it yields the decoded
/// byte, or `None` while an escape pair is half-received.  The caller handles
/// [`DELIMITER`] *before* feeding a byte here: delimiters are frame
/// structure, not frame data.
#[derive(Debug, Default)]
pub struct Unescaper {
    pending_escape: bool,
}

impl Unescaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one raw wire byte.
    ///
    /// Returns `Ok(None)` when `raw` is the first half of an escape pair,
    /// `Ok(Some(byte))` once a frame byte is fully decoded, and
    /// [`BadEscape`] when an escape pair resolves to neither known value.
    pub fn push(&mut self, raw: u8) -> Result<Option<u8>, BadEscape> {
        if self.pending_escape {
            self.pending_escape = false;
            match raw {
                ESCAPED_DELIMITER => Ok(Some(DELIMITER)),
                ESCAPED_ESCAPE => Ok(Some(ESCAPE)),
                other => Err(BadEscape(other)),
            }
        } else if raw == ESCAPE {
            self.pending_escape = true;
            Ok(None)
        } else {
            Ok(Some(raw))
        }
    }

    /// Drop any half-received escape pair (the frame was abandoned).
    pub fn reset(&mut self) {
        self.pending_escape = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Escape a whole buffer, then run it back through the unescaper.
    fn roundtrip(input: &[u8]) -> Vec<u8> {
        let mut wire = Vec::new();
        for &b in input {
            escape_into(b, &mut wire);
        }
        let mut un = Unescaper::new();
        let mut out = Vec::new();
        for raw in wire {
            if let Some(b) = un.push(raw).expect("valid escape stream") {
                out.push(b);
            }
        }
        out
    }

    #[test]
    fn plain_bytes_pass_through_unchanged() {
        let mut out = Vec::new();
        escape_into(0x42, &mut out);
        assert_eq!(out, [0x42]);
    }

    #[test]
    fn delimiter_and_escape_expand_to_pairs() {
        let mut out = Vec::new();
        escape_into(DELIMITER, &mut out);
        escape_into(ESCAPE, &mut out);
        assert_eq!(out, [ESCAPE, ESCAPED_DELIMITER, ESCAPE, ESCAPED_ESCAPE]);
    }

    #[test]
    fn roundtrip_all_byte_values() {
        let input: Vec<u8> = (0..=255).collect();
        assert_eq!(roundtrip(&input), input);
    }

    #[test]
    fn escape_pair_split_across_pushes() {
        // The two halves of an escape pair arrive in separate chunks.
        let mut un = Unescaper::new();
        assert_eq!(un.push(ESCAPE), Ok(None));
        assert_eq!(un.push(ESCAPED_DELIMITER), Ok(Some(DELIMITER)));
        assert_eq!(un.push(ESCAPE), Ok(None));
        assert_eq!(un.push(ESCAPED_ESCAPE), Ok(Some(ESCAPE)));
    }

    #[test]
    fn invalid_escape_pair_is_an_error() {
        let mut un = Unescaper::new();
        assert_eq!(un.push(ESCAPE), Ok(None));
        assert_eq!(un.push(0x00), Err(BadEscape(0x00)));
    }

    #[test]
    fn reset_clears_pending_escape() {
        let mut un = Unescaper::new();
        assert_eq!(un.push(ESCAPE), Ok(None));
        un.reset();
        // After a reset the next byte is decoded on its own.
        assert_eq!(un.push(0x7E), Ok(Some(0x7E)));
    }
}
