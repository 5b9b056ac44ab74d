//! # IEC 61850-90-5 Common Types and Utilities
//!
//! This module defines the core types shared by every stage of the IEC 61850-90-5
//! sampled-value decoder: the crate-wide error type, the envelope discriminator, the
//! frame type carried in sync-byte envelopes, time quality flags, the per-sample status
//! word, and MSVID identity parsing.
//!
//! ## Key Components
//!
//! - `ParseError`: Enumerates every failure the decoder can report for one frame.
//! - `EnvelopeKind`: The two outer syntaxes (sync-byte and session-encapsulated).
//! - `FrameType`: Frame type bits of the sync-byte envelope (data, header, config, command).
//! - `TimeQuality`: Decodes the time quality byte that trails every fraction-of-second word.
//! - `SampleStatus`: Interprets the 16-bit STAT word at the start of each sample block.
//! - `parse_identity`: Splits an MSVID of the form `idCode_stationName`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Represents errors that can occur while decoding an IEC 61850-90-5 frame.
///
/// Every variant aborts decoding of the current frame only. `SignatureMismatch` and
/// `SampleSizeMismatch` may be downgraded to warnings by decoder policy, and
/// `InvalidDerivedConfiguration` never reaches the caller of a frame decode: the
/// resolver falls through to the next derivation strategy instead.
///
/// # Variants
///
/// * `OutOfBounds`: A field would read past the end of the supplied buffer slice.
/// * `FormatMismatch`: A fixed tag or constant did not hold the expected value.
/// * `UnrecognizedSyncPattern`: Neither the sync byte nor the session tag matched.
/// * `UnsupportedSessionType`: Session type is not "sampled values".
/// * `MissingSignatureTag`: The signature trailer does not start with the signature tag.
/// * `SignatureMismatch`: The embedded digest does not match the computed one.
/// * `EmptyFrame`: The frame declares zero ASDUs.
/// * `SampleSizeMismatch`: Declared sample length differs from the configuration.
/// * `InvalidDerivedConfiguration`: An ETR definition file violates the grammar.
/// * `InvalidChecksum`: CRC-CCITT of a sync-byte frame does not match.
/// * `InvalidFrameType`: Frame type bits of a sync-byte frame are not defined.
/// * `InvalidOption`: A decoder option could not be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Out of bounds: {message}")]
    OutOfBounds { message: String },
    #[error("Format mismatch: {message}")]
    FormatMismatch { message: String },
    #[error("Unrecognized sync pattern: {message}")]
    UnrecognizedSyncPattern { message: String },
    #[error("Unsupported session type: {message}")]
    UnsupportedSessionType { message: String },
    #[error("Missing signature tag: {message}")]
    MissingSignatureTag { message: String },
    #[error("Signature mismatch: {message}")]
    SignatureMismatch { message: String },
    #[error("Empty frame: {message}")]
    EmptyFrame { message: String },
    #[error("Sample size mismatch: {message}")]
    SampleSizeMismatch { message: String },
    #[error("Invalid derived configuration: {message}")]
    InvalidDerivedConfiguration { message: String },
    #[error("Invalid checksum: {message}")]
    InvalidChecksum { message: String },
    #[error("Invalid frame type: {message}")]
    InvalidFrameType { message: String },
    #[error("Invalid option: {message}")]
    InvalidOption { message: String },
}

impl ParseError {
    /// Builds an `OutOfBounds` error for a read of `needed` bytes at `offset`.
    pub fn out_of_bounds(what: &str, offset: usize, needed: usize, end: usize) -> Self {
        ParseError::OutOfBounds {
            message: format!(
                "{}: need {} bytes at offset {}, buffer ends at {}",
                what, needed, offset, end
            ),
        }
    }
}

/// The two outer wrapping syntaxes accepted by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeKind {
    /// Frame starts with the 0xAA sync byte (C37.118-style prefix).
    SyncByte,
    /// Frame is wrapped in CLTP + session protocol (IEC 61850-90-5 R-SV).
    SessionEncapsulated,
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeKind::SyncByte => write!(f, "Sync-byte envelope"),
            EnvelopeKind::SessionEncapsulated => write!(f, "Session-encapsulated envelope"),
        }
    }
}

/// Represents the type of a frame.
///
/// Sync-byte envelopes encode the type in bits 6-4 of the second byte. Frames that
/// arrive session-encapsulated are always `Data`.
///
/// # Variants
///
/// * `Data`: Sampled measurement data.
/// * `Header`: Descriptive header information.
/// * `Config1`: Configuration frame 1 (device capabilities).
/// * `Config2`: Configuration frame 2 (current configuration).
/// * `Config3`: Configuration frame 3 (extended configuration).
/// * `Command`: Command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    Data,
    Header,
    Config1,
    Config2,
    Config3,
    Command,
}

impl FrameType {
    /// Extracts the frame type and version from the second byte of a sync-byte frame.
    ///
    /// # Parameters
    ///
    /// * `byte`: Bit 7 reserved, bits 6-4 frame type, bits 3-0 version.
    ///
    /// # Returns
    ///
    /// * `Ok((FrameType, u8))`: The frame type and version number.
    /// * `Err(ParseError::InvalidFrameType)`: If the frame type bits are undefined.
    pub fn from_type_byte(byte: u8) -> Result<(FrameType, u8), ParseError> {
        let frame_type_bits = (byte >> 4) & 0x07;
        let version = byte & 0x0F;

        let frame_type = match frame_type_bits {
            0 => FrameType::Data,
            1 => FrameType::Header,
            2 => FrameType::Config1,
            3 => FrameType::Config2,
            4 => FrameType::Command,
            5 => FrameType::Config3,
            _ => {
                return Err(ParseError::InvalidFrameType {
                    message: format!("Invalid frame type bits: {}", frame_type_bits),
                })
            }
        };
        Ok((frame_type, version))
    }

    /// Returns `true` for the three configuration frame types.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FrameType::Config1 | FrameType::Config2 | FrameType::Config3
        )
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameType::Data => write!(f, "Data Frame"),
            FrameType::Header => write!(f, "Header Frame"),
            FrameType::Config1 => write!(f, "Configuration Frame 1"),
            FrameType::Config2 => write!(f, "Configuration Frame 2"),
            FrameType::Config3 => write!(f, "Configuration Frame 3"),
            FrameType::Command => write!(f, "Command Frame"),
        }
    }
}

/// Time quality flags carried in the low byte of every fraction-of-second word.
///
/// Bit layout follows the IEC 61850 `TimeQuality` octet: bit 7 leap seconds known,
/// bit 6 clock failure, bit 5 clock not synchronized, bits 4-0 time accuracy (number of
/// significant fraction bits, 31 = unspecified).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeQuality {
    pub raw: u8,
    pub leap_seconds_known: bool,
    pub clock_failure: bool,
    pub clock_not_synchronized: bool,
    pub time_accuracy: u8,
}

impl TimeQuality {
    pub fn from_raw(raw: u8) -> Self {
        TimeQuality {
            raw,
            leap_seconds_known: raw & 0x80 != 0,
            clock_failure: raw & 0x40 != 0,
            clock_not_synchronized: raw & 0x20 != 0,
            time_accuracy: raw & 0x1F,
        }
    }

    /// A timestamp is only trustworthy when the clock is healthy and locked.
    pub fn is_reliable(&self) -> bool {
        !self.clock_failure && !self.clock_not_synchronized
    }
}

/// Represents the STAT word leading every sample block.
///
/// # Fields
///
/// * `raw`: Raw 16-bit STAT value.
/// * `data_error`: 2-bit data error code (bits 15-14).
/// * `pmu_sync`: Set when the device has lost time synchronization (bit 13).
/// * `data_sorting`: Data sorted by arrival rather than timestamp (bit 12).
/// * `pmu_trigger`: Trigger detected (bit 11).
/// * `config_change`: Configuration change pending (bit 10).
/// * `data_modified`: Data modified by post-processing (bit 9).
/// * `time_quality`: 3-bit device time quality (bits 8-6).
/// * `unlock_time`: 2-bit unlocked time (bits 5-4).
/// * `trigger_reason`: 4-bit trigger reason (bits 3-0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SampleStatus {
    pub raw: u16,
    pub data_error: u8,
    pub pmu_sync: bool,
    pub data_sorting: bool,
    pub pmu_trigger: bool,
    pub config_change: bool,
    pub data_modified: bool,
    pub time_quality: u8,
    pub unlock_time: u8,
    pub trigger_reason: u8,
}

impl SampleStatus {
    pub fn from_raw(raw: u16) -> Self {
        SampleStatus {
            raw,
            data_error: ((raw >> 14) & 0x03) as u8,
            pmu_sync: raw & 0x2000 != 0,
            data_sorting: raw & 0x1000 != 0,
            pmu_trigger: raw & 0x0800 != 0,
            config_change: raw & 0x0400 != 0,
            data_modified: raw & 0x0200 != 0,
            time_quality: ((raw >> 6) & 0x07) as u8,
            unlock_time: ((raw >> 4) & 0x03) as u8,
            trigger_reason: (raw & 0x000F) as u8,
        }
    }

    /// Data is usable when no data error is flagged.
    pub fn is_valid(&self) -> bool {
        self.data_error == 0
    }
}

/// ID code assigned when an MSVID carries no numeric prefix.
pub const DEFAULT_ID_CODE: u16 = 1;

/// Splits an MSVID of the form `idCode_stationName` into its parts.
///
/// The split happens at the first underscore. When there is no underscore, or the text
/// before it is not a 16-bit number, the ID code falls back to `DEFAULT_ID_CODE` and
/// the whole MSVID is used as the station name.
///
/// # Examples
///
/// ```
/// use rtpa_sv_core::iec61850_90_5::common::parse_identity;
///
/// assert_eq!(parse_identity("1_SubstationA"), (1, "SubstationA".to_string()));
/// assert_eq!(parse_identity("NoUnderscoreHere"), (1, "NoUnderscoreHere".to_string()));
/// ```
pub fn parse_identity(msvid: &str) -> (u16, String) {
    if let Some((id, station)) = msvid.split_once('_') {
        if let Ok(id_code) = id.trim().parse::<u16>() {
            return (id_code, station.to_string());
        }
    }
    (DEFAULT_ID_CODE, msvid.to_string())
}
