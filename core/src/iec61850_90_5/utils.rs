//! # IEC 61850-90-5 Frame Parsing Utilities
//!
//! Helpers shared by the header and ASDU decoders: the CRC-CCITT checksum that trails
//! sync-byte frames (IEEE C37.118.2-2011 Appendix B), and conversion of the IEC 61850
//! `UtcTime` layout (4 bytes seconds, 3 bytes fraction, 1 byte time quality) into
//! timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::common::{ParseError, TimeQuality};
use super::tags::{FRACTION_SHIFT, TIME_QUALITY_MASK};

/// Ticks per second of a 24-bit IEC 61850 fraction of second.
pub const DEFAULT_TIME_BASE: u32 = 1 << 24;

/// Calculates the CRC-CCITT checksum for a given buffer.
///
/// Polynomial 0x1021, initial value 0xFFFF, no final XOR.
pub fn calculate_crc(buffer: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in buffer {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Validates the checksum of a given buffer.
///
/// The last two bytes of `buffer` are the big-endian CRC of the preceding bytes.
///
/// # Returns
///
/// * `Ok(())` if the checksum is valid.
/// * `Err(ParseError::OutOfBounds)` if the buffer is too short to hold a checksum.
/// * `Err(ParseError::InvalidChecksum)` if the checksum does not match.
pub fn validate_checksum(buffer: &[u8]) -> Result<(), ParseError> {
    if buffer.len() < 2 {
        return Err(ParseError::out_of_bounds("checksum", 0, 2, buffer.len()));
    }

    let calculated_crc = calculate_crc(&buffer[..buffer.len() - 2]);
    let frame_crc = u16::from_be_bytes([buffer[buffer.len() - 2], buffer[buffer.len() - 1]]);

    if calculated_crc != frame_crc {
        return Err(ParseError::InvalidChecksum {
            message: format!(
                "CRC Checksum Mismatch: Expected {:04X}, got {:04X}",
                calculated_crc, frame_crc
            ),
        });
    }
    Ok(())
}

/// A frame timestamp: whole seconds since the Unix epoch plus fractional ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: u32,
    pub ticks: u32,
    pub time_base: u32,
}

impl Timestamp {
    pub fn new(seconds: u32, ticks: u32, time_base: u32) -> Self {
        Timestamp {
            seconds,
            ticks,
            time_base,
        }
    }

    /// Nanoseconds since the Unix epoch. A zero time base is treated as whole seconds.
    pub fn as_nanos(&self) -> i64 {
        let whole = self.seconds as i64 * 1_000_000_000;
        if self.time_base == 0 {
            return whole;
        }
        whole + (self.ticks as i64 * 1_000_000_000 / self.time_base as i64)
    }

    /// Seconds since the Unix epoch as a floating point value.
    pub fn as_seconds_f64(&self) -> f64 {
        if self.time_base == 0 {
            return self.seconds as f64;
        }
        self.seconds as f64 + self.ticks as f64 / self.time_base as f64
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let nanos = self.as_nanos();
        DateTime::from_timestamp(
            nanos.div_euclid(1_000_000_000),
            nanos.rem_euclid(1_000_000_000) as u32,
        )
    }

    /// Re-expresses the ticks in another time base.
    pub fn with_time_base(&self, time_base: u32) -> Self {
        if self.time_base == 0 || self.time_base == time_base {
            return Timestamp::new(self.seconds, self.ticks, time_base);
        }
        let ticks = (self.ticks as u64 * time_base as u64) / self.time_base as u64;
        Timestamp::new(self.seconds, ticks as u32, time_base)
    }
}

/// Splits a fraction-of-second word into its 24-bit tick count and time quality.
pub fn split_fraction_word(word: u32) -> (u32, TimeQuality) {
    let ticks = word >> FRACTION_SHIFT;
    let quality = TimeQuality::from_raw((word & TIME_QUALITY_MASK) as u8);
    (ticks, quality)
}

/// Decodes an 8-byte `UtcTime` value.
///
/// Extra trailing bytes are ignored.
pub fn utc_time_from_bytes(
    bytes: &[u8],
    time_base: u32,
) -> Result<(Timestamp, TimeQuality), ParseError> {
    if bytes.len() < 8 {
        return Err(ParseError::out_of_bounds("UtcTime", 0, 8, bytes.len()));
    }
    let seconds = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let word = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let (fraction, quality) = split_fraction_word(word);

    // The 24-bit fraction is always relative to 2^24; rescale to the requested base.
    let timestamp = Timestamp::new(seconds, fraction, DEFAULT_TIME_BASE).with_time_base(time_base);
    Ok((timestamp, quality))
}
