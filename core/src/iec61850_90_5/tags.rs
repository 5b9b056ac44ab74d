//! # Tag Cursor and Wire Constants
//!
//! Bounds-checked cursor over a byte buffer used by every parsing stage. It reads
//! fixed-width big- or little-endian integers, single-byte tags, and BER tag-length-value
//! records (short and long length forms). The cursor is a plain value that threads an
//! explicit offset; no state lives outside it.
//!
//! The constants in this module fix the on-the-wire layout of both envelopes and of the
//! sampled value APDU (IEC 61850-9-2 tags as carried by IEC 61850-90-5).

use super::common::ParseError;

/// First byte of a sync-byte envelope.
pub const SYNC_BYTE: u8 = 0xAA;
/// CLTP unit-data TPDU code; second byte of a session-encapsulated frame.
pub const CLTP_TAG: u8 = 0x40;
/// Session identifier for tunnelled sampled values.
pub const SESSION_TYPE_SAMPLED_VALUES: u8 = 0xA2;
/// Expected value of the session header size field.
pub const SESSION_HEADER_SIZE: u8 = 0x18;
/// Reserved bytes following the session header size field.
pub const SESSION_RESERVED_BYTES: usize = 3;
/// Size of the key identifier block.
pub const KEY_ID_SIZE: usize = 4;
/// Payload type marker for sampled values.
pub const PAYLOAD_TYPE_SAMPLED_VALUES: u8 = 0x82;
/// Marker that opens the trailing signature.
pub const SIGNATURE_TAG: u8 = 0x85;
/// Fixed header length of the sync-byte envelope.
pub const SYNC_HEADER_LENGTH: usize = 14;
/// CRC-CCITT trailer of the sync-byte envelope.
pub const CHECKSUM_LENGTH: usize = 2;

/// Mask selecting the time quality bits of a fraction-of-second word.
pub const TIME_QUALITY_MASK: u32 = 0x0000_00FF;
/// Shift that moves the fraction ticks above the time quality byte down to bit 0.
pub const FRACTION_SHIFT: u32 = 8;

/// Sampled value PDU tags.
pub mod sv {
    pub const SV_PDU: u8 = 0x60;
    pub const ASDU_COUNT: u8 = 0x80;
    pub const SECURITY: u8 = 0x81;
    pub const SEQUENCE_OF_ASDU: u8 = 0xA2;
    pub const ASDU: u8 = 0x30;
    pub const MSVID: u8 = 0x80;
    pub const DATASET: u8 = 0x81;
    pub const SAMPLE_COUNT: u8 = 0x82;
    pub const CONFIG_REVISION: u8 = 0x83;
    pub const REFRESH_TIME: u8 = 0x84;
    pub const SAMPLE_SYNCHRONIZED: u8 = 0x85;
    pub const SAMPLE_RATE: u8 = 0x86;
    pub const SAMPLES: u8 = 0x87;
    pub const SAMPLE_MODIFICATION: u8 = 0x88;
    pub const UTC_TIMESTAMP: u8 = 0x89;
}

/// Byte order for fixed-width reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Big,
    Little,
}

/// A bounds-checked read position inside `buffer[..end]`.
#[derive(Debug, Clone, Copy)]
pub struct TagCursor<'a> {
    buffer: &'a [u8],
    offset: usize,
    end: usize,
}

impl<'a> TagCursor<'a> {
    /// Creates a cursor over `buffer[start..start + length]`.
    ///
    /// `length` is clamped to the buffer so a caller-supplied length can never widen
    /// the readable window.
    pub fn new(buffer: &'a [u8], start: usize, length: usize) -> Self {
        let end = start.saturating_add(length).min(buffer.len());
        TagCursor {
            buffer,
            offset: start.min(end),
            end,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn remaining(&self) -> usize {
        self.end - self.offset
    }

    pub fn buffer(&self) -> &'a [u8] {
        self.buffer
    }

    /// Moves to an absolute offset inside the window.
    pub fn seek(&mut self, offset: usize) -> Result<(), ParseError> {
        if offset > self.end {
            return Err(ParseError::out_of_bounds("seek", offset, 0, self.end));
        }
        self.offset = offset;
        Ok(())
    }

    fn ensure(&self, what: &str, needed: usize) -> Result<(), ParseError> {
        if needed > self.remaining() {
            return Err(ParseError::out_of_bounds(what, self.offset, needed, self.end));
        }
        Ok(())
    }

    /// Returns the next byte without consuming it.
    pub fn peek(&self) -> Option<u8> {
        if self.offset < self.end {
            Some(self.buffer[self.offset])
        } else {
            None
        }
    }

    /// Returns `true` when the next byte equals `tag`.
    pub fn peek_tag(&self, tag: u8) -> bool {
        self.peek() == Some(tag)
    }

    pub fn skip(&mut self, count: usize) -> Result<(), ParseError> {
        self.ensure("skip", count)?;
        self.offset += count;
        Ok(())
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], ParseError> {
        self.ensure("bytes", count)?;
        let bytes = &self.buffer[self.offset..self.offset + count];
        self.offset += count;
        Ok(bytes)
    }

    /// Reads an unsigned integer of `width` bytes (1..=8).
    pub fn read_fixed_width(
        &mut self,
        width: usize,
        endianness: Endianness,
    ) -> Result<u64, ParseError> {
        if width == 0 || width > 8 {
            return Err(ParseError::FormatMismatch {
                message: format!("Unsupported integer width: {}", width),
            });
        }
        let bytes = self.read_bytes(width)?;
        let value = match endianness {
            Endianness::Big => bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64),
            Endianness::Little => bytes
                .iter()
                .rev()
                .fold(0u64, |acc, &b| (acc << 8) | b as u64),
        };
        Ok(value)
    }

    pub fn read_u8(&mut self) -> Result<u8, ParseError> {
        self.ensure("u8", 1)?;
        let value = self.buffer[self.offset];
        self.offset += 1;
        Ok(value)
    }

    pub fn read_u16(&mut self) -> Result<u16, ParseError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, ParseError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Consumes a single tag byte, failing if it is not `expected`.
    pub fn read_tag(&mut self, expected: u8) -> Result<(), ParseError> {
        let at = self.offset;
        let tag = self.read_u8()?;
        if tag != expected {
            return Err(ParseError::FormatMismatch {
                message: format!(
                    "Expected tag 0x{:02X} at offset {}, got 0x{:02X}",
                    expected, at, tag
                ),
            });
        }
        Ok(())
    }

    /// Reads a BER definite length (short form, or long form with up to 4 length bytes).
    pub fn read_length(&mut self) -> Result<usize, ParseError> {
        let first = self.read_u8()?;
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }

        let count = (first & 0x7F) as usize;
        if count == 0 || count > 4 {
            return Err(ParseError::FormatMismatch {
                message: format!("Unsupported BER length form 0x{:02X}", first),
            });
        }
        Ok(self.read_fixed_width(count, Endianness::Big)? as usize)
    }

    /// Consumes a tag and its length, leaving the cursor at the start of the value.
    ///
    /// Used for constructed elements whose contents are parsed in place. The declared
    /// length must fit in the remaining window.
    pub fn read_tag_length(&mut self, expected: u8) -> Result<usize, ParseError> {
        self.read_tag(expected)?;
        let length = self.read_length()?;
        self.ensure("tag value", length)?;
        Ok(length)
    }

    /// Consumes a complete tag-length-value record and returns its value bytes along
    /// with the offset just past it.
    pub fn read_length_prefixed(&mut self, expected: u8) -> Result<(&'a [u8], usize), ParseError> {
        let length = self.read_tag_length(expected)?;
        let value = self.read_bytes(length)?;
        Ok((value, self.offset))
    }

    /// Consumes a tag-length-value record carrying an unsigned integer.
    pub fn read_unsigned_tag(&mut self, expected: u8) -> Result<u64, ParseError> {
        let (value, _) = self.read_length_prefixed(expected)?;
        parse_unsigned(value)
    }

    /// Consumes a tag-length-value record whose value must be exactly `width` bytes.
    pub fn read_fixed_tag(&mut self, expected: u8, width: usize) -> Result<u64, ParseError> {
        let (value, _) = self.read_length_prefixed(expected)?;
        if value.len() != width {
            return Err(ParseError::FormatMismatch {
                message: format!(
                    "Tag 0x{:02X} carries {} bytes, expected {}",
                    expected,
                    value.len(),
                    width
                ),
            });
        }
        parse_unsigned(value)
    }

    /// Skips an optional record when the next byte equals `tag`.
    ///
    /// Returns the skipped value when present.
    pub fn skip_optional(&mut self, tag: u8) -> Result<Option<&'a [u8]>, ParseError> {
        if !self.peek_tag(tag) {
            return Ok(None);
        }
        let (value, _) = self.read_length_prefixed(tag)?;
        Ok(Some(value))
    }
}

/// Interprets a BER integer payload of 1..=8 bytes as an unsigned big-endian value.
pub fn parse_unsigned(bytes: &[u8]) -> Result<u64, ParseError> {
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(ParseError::FormatMismatch {
            message: format!("Invalid integer length: {}", bytes.len()),
        });
    }
    Ok(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_reads() {
        let buffer = [0x12, 0x34, 0x56, 0x78, 0x9A];
        let mut cursor = TagCursor::new(&buffer, 0, buffer.len());

        assert_eq!(cursor.read_fixed_width(2, Endianness::Big).unwrap(), 0x1234);
        assert_eq!(
            cursor.read_fixed_width(2, Endianness::Little).unwrap(),
            0x7856
        );
        assert_eq!(cursor.offset(), 4);
        assert!(matches!(
            cursor.read_u16(),
            Err(ParseError::OutOfBounds { .. })
        ));
        // Failed reads do not move the cursor
        assert_eq!(cursor.offset(), 4);
        assert_eq!(cursor.read_u8().unwrap(), 0x9A);
    }

    #[test]
    fn test_window_limits_reads() {
        let buffer = [0u8; 16];
        let mut cursor = TagCursor::new(&buffer, 4, 4);
        assert_eq!(cursor.remaining(), 4);
        assert!(cursor.read_u32().is_ok());
        assert!(matches!(
            cursor.read_u8(),
            Err(ParseError::OutOfBounds { .. })
        ));

        // A length reaching past the buffer is clamped
        let cursor = TagCursor::new(&buffer, 10, 100);
        assert_eq!(cursor.end(), 16);
    }

    #[test]
    fn test_read_tag_mismatch() {
        let buffer = [0x80, 0x01, 0x05];
        let mut cursor = TagCursor::new(&buffer, 0, buffer.len());
        assert!(matches!(
            cursor.read_tag(0x81),
            Err(ParseError::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_short_and_long_form_lengths() {
        let short = [0x87, 0x03, 1, 2, 3];
        let mut cursor = TagCursor::new(&short, 0, short.len());
        let (value, next) = cursor.read_length_prefixed(0x87).unwrap();
        assert_eq!(value, &[1, 2, 3]);
        assert_eq!(next, 5);

        let mut long = vec![0x87, 0x82, 0x01, 0x00];
        long.extend(std::iter::repeat(0xEE).take(256));
        let mut cursor = TagCursor::new(&long, 0, long.len());
        let (value, next) = cursor.read_length_prefixed(0x87).unwrap();
        assert_eq!(value.len(), 256);
        assert_eq!(next, long.len());

        let indefinite = [0x87, 0x80, 0x00];
        let mut cursor = TagCursor::new(&indefinite, 0, indefinite.len());
        assert!(matches!(
            cursor.read_length_prefixed(0x87),
            Err(ParseError::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_declared_length_past_end() {
        let buffer = [0x87, 0x05, 1, 2];
        let mut cursor = TagCursor::new(&buffer, 0, buffer.len());
        assert!(matches!(
            cursor.read_length_prefixed(0x87),
            Err(ParseError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_optional_and_unsigned_tags() {
        let buffer = [0x82, 0x02, 0x01, 0x02, 0x88, 0x01, 0x07];
        let mut cursor = TagCursor::new(&buffer, 0, buffer.len());
        assert_eq!(cursor.skip_optional(0x81).unwrap(), None);
        assert_eq!(cursor.read_unsigned_tag(0x82).unwrap(), 0x0102);
        assert_eq!(cursor.skip_optional(0x88).unwrap(), Some(&[0x07][..]));
        assert_eq!(cursor.remaining(), 0);
        assert!(parse_unsigned(&[]).is_err());
    }

    #[test]
    fn test_fixed_tag_width() {
        let buffer = [0x82, 0x02, 0x01, 0x02, 0x85, 0x01, 0x01];
        let mut cursor = TagCursor::new(&buffer, 0, buffer.len());
        assert_eq!(cursor.read_fixed_tag(0x82, 2).unwrap(), 0x0102);
        assert_eq!(cursor.read_fixed_tag(0x85, 1).unwrap(), 1);

        let wide = [0x82, 0x04, 0x00, 0x01, 0x00, 0x02];
        let mut cursor = TagCursor::new(&wide, 0, wide.len());
        assert!(matches!(
            cursor.read_fixed_tag(0x82, 2),
            Err(ParseError::FormatMismatch { .. })
        ));
    }
}
