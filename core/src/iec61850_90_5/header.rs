//! # IEC 61850-90-5 Frame Header Decoding
//!
//! Every frame starts with one of two envelopes:
//!
//! - **Sync-byte** (`0xAA`): a 14-byte C37.118-style header (sync, type/version, frame
//!   length, ID code, second-of-century, fraction word) and a CRC-CCITT trailer. Data
//!   frames carry the sampled-value PDU right after the header.
//! - **Session-encapsulated** (CLTP `0x40` at offset 1): a CLTP length indicator, the
//!   IEC 61850-90-5 session header (session type `0xA2`, SPDU length, packet number,
//!   security and signature algorithms, key id), the payload header and the
//!   sampled-value PDU, optionally followed by a signature trailer (`0x85`, length,
//!   digest) covering the whole SPDU.
//!
//! `FrameHeader::decode` stops right after the sequence-of-ASDU tag, so `header_length`
//! is the offset at which the first ASDU begins.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::common::{EnvelopeKind, FrameType, ParseError, TimeQuality, DEFAULT_ID_CODE};
use super::signature::{self, SecurityAlgorithm, SignatureAlgorithm};
use super::tags::{
    sv, TagCursor, CHECKSUM_LENGTH, CLTP_TAG, KEY_ID_SIZE, PAYLOAD_TYPE_SAMPLED_VALUES,
    SESSION_HEADER_SIZE, SESSION_RESERVED_BYTES, SESSION_TYPE_SAMPLED_VALUES, SIGNATURE_TAG,
    SYNC_BYTE, SYNC_HEADER_LENGTH,
};
use super::utils::{split_fraction_word, validate_checksum, Timestamp, DEFAULT_TIME_BASE};

/// Version reported for session-encapsulated frames, which carry none.
pub const SESSION_FRAME_VERSION: u8 = 1;

/// Inputs to header decoding that do not come from the frame itself.
#[derive(Debug, Clone, Copy)]
pub struct HeaderContext<'a> {
    /// Ticks per second of the fraction word.
    pub time_base: u32,
    pub signature_key: &'a [u8],
    /// Log signature mismatches instead of failing the frame.
    pub tolerate_signature_failures: bool,
}

impl Default for HeaderContext<'_> {
    fn default() -> Self {
        HeaderContext {
            time_base: DEFAULT_TIME_BASE,
            signature_key: signature::DEFAULT_SIGNATURE_KEY,
            tolerate_signature_failures: false,
        }
    }
}

/// Fields of the CLTP and session layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHeader {
    pub cltp_length: u8,
    pub spdu_length: u32,
    pub packet_number: u32,
    pub security_algorithm: SecurityAlgorithm,
    pub signature_algorithm: SignatureAlgorithm,
    pub key_id: [u8; KEY_ID_SIZE],
    pub payload_length: u32,
    pub simulated: bool,
    pub application_id: u16,
    pub asdu_payload_size: u16,
    /// Digest copied from the signature trailer, empty when absent.
    pub signature: Vec<u8>,
    pub signature_verified: bool,
}

/// Decoded frame header, common to both envelopes.
///
/// # Fields
///
/// * `envelope`: Which outer syntax the frame used.
/// * `frame_type` / `version`: From the type byte of sync-byte frames; session frames
///   are always `Data`.
/// * `frame_length`: Total bytes of the frame including checksum or signature trailer.
/// * `id_code`: From the sync-byte header; session frames start with the default code.
/// * `timestamp` / `time_quality`: From the fraction word, then overwritten by each
///   ASDU's refresh time.
/// * `header_length`: Offset from the frame start to the first ASDU.
/// * `asdu_count`: Number of ASDUs in the sequence, zero for non-data frames.
/// * `session`: Session-layer fields of session-encapsulated frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub envelope: EnvelopeKind,
    pub frame_type: FrameType,
    pub version: u8,
    pub frame_length: usize,
    pub id_code: u16,
    pub timestamp: Timestamp,
    pub time_quality: TimeQuality,
    pub header_length: usize,
    pub asdu_count: usize,
    /// Declared length of the sequence-of-ASDU element.
    pub sequence_length: usize,
    pub session: Option<SessionHeader>,
}

impl FrameHeader {
    /// Decodes the header of the frame at `buffer[start..start + length]`.
    ///
    /// # Returns
    ///
    /// * `Ok(FrameHeader)`: The decoded header.
    /// * `Err(ParseError::UnrecognizedSyncPattern)`: Neither envelope matched.
    /// * `Err(ParseError::UnsupportedSessionType)`: Session type is not sampled values.
    /// * `Err(ParseError::MissingSignatureTag)`: The trailer does not start with `0x85`.
    /// * `Err(ParseError::SignatureMismatch)`: Digest mismatch, unless tolerated.
    /// * `Err(ParseError::EmptyFrame)`: The frame declares zero ASDUs.
    /// * `Err(ParseError::InvalidChecksum)`: CRC mismatch on a sync-byte frame.
    /// * `Err(ParseError::OutOfBounds)` / `Err(ParseError::FormatMismatch)`: Truncated or
    ///   malformed fields.
    pub fn decode(
        buffer: &[u8],
        start: usize,
        length: usize,
        ctx: &HeaderContext<'_>,
    ) -> Result<Self, ParseError> {
        let window = TagCursor::new(buffer, start, length);
        if window.remaining() < 2 {
            return Err(ParseError::out_of_bounds(
                "frame header",
                start,
                2,
                window.end(),
            ));
        }

        if buffer[start] == SYNC_BYTE {
            Self::decode_sync_byte(buffer, start, window.end(), ctx)
        } else if buffer[start + 1] == CLTP_TAG {
            Self::decode_session(buffer, start, window.end(), ctx)
        } else {
            Err(ParseError::UnrecognizedSyncPattern {
                message: format!(
                    "Expected 0x{:02X} or CLTP tag 0x{:02X} at offset {}, got 0x{:02X} 0x{:02X}",
                    SYNC_BYTE,
                    CLTP_TAG,
                    start,
                    buffer[start],
                    buffer[start + 1]
                ),
            })
        }
    }

    fn decode_sync_byte(
        buffer: &[u8],
        start: usize,
        end: usize,
        ctx: &HeaderContext<'_>,
    ) -> Result<Self, ParseError> {
        let mut cursor = TagCursor::new(buffer, start, end - start);
        cursor.read_tag(SYNC_BYTE)?;
        let (frame_type, version) = FrameType::from_type_byte(cursor.read_u8()?)?;
        let frame_length = cursor.read_u16()? as usize;
        let id_code = cursor.read_u16()?;
        let seconds = cursor.read_u32()?;
        let (ticks, time_quality) = split_fraction_word(cursor.read_u32()?);

        if frame_length < SYNC_HEADER_LENGTH + CHECKSUM_LENGTH {
            return Err(ParseError::FormatMismatch {
                message: format!(
                    "Frame length {} is shorter than the {} byte header and checksum",
                    frame_length,
                    SYNC_HEADER_LENGTH + CHECKSUM_LENGTH
                ),
            });
        }
        if start + frame_length > end {
            return Err(ParseError::out_of_bounds("frame", start, frame_length, end));
        }
        validate_checksum(&buffer[start..start + frame_length])?;

        let mut header = FrameHeader {
            envelope: EnvelopeKind::SyncByte,
            frame_type,
            version,
            frame_length,
            id_code,
            timestamp: Timestamp::new(seconds, ticks, ctx.time_base),
            time_quality,
            header_length: SYNC_HEADER_LENGTH,
            asdu_count: 0,
            sequence_length: 0,
            session: None,
        };

        if frame_type == FrameType::Data {
            // The PDU ends before the checksum.
            let mut body = TagCursor::new(buffer, start, frame_length - CHECKSUM_LENGTH);
            body.seek(start + SYNC_HEADER_LENGTH)?;
            let (asdu_count, sequence_length) = read_sv_pdu_header(&mut body)?;
            header.asdu_count = asdu_count;
            header.sequence_length = sequence_length;
            header.header_length = body.offset() - start;
        }

        Ok(header)
    }

    fn decode_session(
        buffer: &[u8],
        start: usize,
        end: usize,
        ctx: &HeaderContext<'_>,
    ) -> Result<Self, ParseError> {
        let mut cursor = TagCursor::new(buffer, start, end - start);

        // CLTP UD TPDU: length indicator, then that many bytes starting with the tag
        let cltp_length = cursor.read_u8()?;
        cursor.skip(cltp_length as usize)?;

        let session_type = cursor.read_u8()?;
        if session_type != SESSION_TYPE_SAMPLED_VALUES {
            return Err(ParseError::UnsupportedSessionType {
                message: format!(
                    "Expected session type 0x{:02X}, got 0x{:02X}",
                    SESSION_TYPE_SAMPLED_VALUES, session_type
                ),
            });
        }
        let header_size = cursor.read_u8()?;
        if header_size != SESSION_HEADER_SIZE {
            return Err(ParseError::FormatMismatch {
                message: format!(
                    "Expected session header size 0x{:02X}, got 0x{:02X}",
                    SESSION_HEADER_SIZE, header_size
                ),
            });
        }
        cursor.skip(SESSION_RESERVED_BYTES)?;
        let spdu_length = cursor.read_u32()?;
        let packet_number = cursor.read_u32()?;
        let security_algorithm = SecurityAlgorithm::from_id(cursor.read_u8()?)?;
        let signature_algorithm = SignatureAlgorithm::from_id(cursor.read_u8()?)?;
        let key_bytes = cursor.read_bytes(KEY_ID_SIZE)?;
        let key_id = [key_bytes[0], key_bytes[1], key_bytes[2], key_bytes[3]];

        let spdu_end = start.saturating_add(spdu_length as usize);
        let (signature, signature_verified) =
            check_signature(buffer, start, spdu_length as usize, end, signature_algorithm, ctx)?;

        // Payload and PDU live inside the SPDU.
        let mut body = TagCursor::new(buffer, start, spdu_end.min(end) - start);
        body.seek(cursor.offset())?;
        let payload_length = body.read_u32()?;
        let payload_type = body.read_u8()?;
        if payload_type != PAYLOAD_TYPE_SAMPLED_VALUES {
            return Err(ParseError::FormatMismatch {
                message: format!(
                    "Expected payload type 0x{:02X}, got 0x{:02X}",
                    PAYLOAD_TYPE_SAMPLED_VALUES, payload_type
                ),
            });
        }
        let simulated = body.read_u8()? != 0;
        let application_id = body.read_u16()?;
        let asdu_payload_size = body.read_u16()?;
        let (asdu_count, sequence_length) = read_sv_pdu_header(&mut body)?;

        let frame_length = spdu_length as usize + signature_algorithm.trailer_length();

        Ok(FrameHeader {
            envelope: EnvelopeKind::SessionEncapsulated,
            frame_type: FrameType::Data,
            version: SESSION_FRAME_VERSION,
            frame_length,
            id_code: DEFAULT_ID_CODE,
            timestamp: Timestamp::new(0, 0, ctx.time_base),
            time_quality: TimeQuality::default(),
            header_length: body.offset() - start,
            asdu_count,
            sequence_length,
            session: Some(SessionHeader {
                cltp_length,
                spdu_length,
                packet_number,
                security_algorithm,
                signature_algorithm,
                key_id,
                payload_length,
                simulated,
                application_id,
                asdu_payload_size,
                signature,
                signature_verified,
            }),
        })
    }

    /// Bytes after the header that belong to neither the checksum nor the signature.
    pub fn data_length(&self) -> usize {
        self.frame_length
            .saturating_sub(self.header_length + self.trailer_length())
    }

    /// Sets `frame_length` (and the SPDU length) so that `data_length()` returns `length`.
    pub fn set_data_length(&mut self, length: usize) {
        self.frame_length = self.header_length + length + self.trailer_length();
        let trailer = self.trailer_length();
        if let Some(session) = self.session.as_mut() {
            session.spdu_length = (self.frame_length - trailer) as u32;
        }
    }

    /// Bytes that follow the data: checksum or signature trailer.
    pub fn trailer_length(&self) -> usize {
        match &self.session {
            Some(session) => session.signature_algorithm.trailer_length(),
            None => CHECKSUM_LENGTH,
        }
    }

    /// Offset (from the frame start) at which the ASDU sequence ends.
    pub fn sequence_end(&self) -> usize {
        self.header_length + self.sequence_length
    }

    /// Stores the timestamp of the ASDU being decoded.
    pub fn set_time(&mut self, timestamp: Timestamp, quality: TimeQuality) {
        self.timestamp = timestamp;
        self.time_quality = quality;
    }
}

/// Reads SV-PDU tag, ASDU count, optional security element and the sequence-of-ASDU
/// tag. Returns the ASDU count and the declared sequence length.
fn read_sv_pdu_header(cursor: &mut TagCursor<'_>) -> Result<(usize, usize), ParseError> {
    cursor.read_tag_length(sv::SV_PDU)?;
    let asdu_count = cursor.read_unsigned_tag(sv::ASDU_COUNT)? as usize;
    if asdu_count == 0 {
        return Err(ParseError::EmptyFrame {
            message: "ASDU count is zero".to_string(),
        });
    }
    cursor.skip_optional(sv::SECURITY)?;
    let sequence_length = cursor.read_tag_length(sv::SEQUENCE_OF_ASDU)?;
    Ok((asdu_count, sequence_length))
}

/// Checks the signature trailer at `start + spdu_length`.
///
/// The tag is checked whenever the window reaches it; the digest is verified only when
/// the window holds the complete trailer.
fn check_signature(
    buffer: &[u8],
    start: usize,
    spdu_length: usize,
    end: usize,
    algorithm: SignatureAlgorithm,
    ctx: &HeaderContext<'_>,
) -> Result<(Vec<u8>, bool), ParseError> {
    if algorithm == SignatureAlgorithm::None {
        return Ok((Vec::new(), false));
    }

    let trailer = start.saturating_add(spdu_length);
    if trailer >= end {
        debug!(
            "Signature trailer at offset {} lies beyond the supplied bytes; not verified",
            trailer
        );
        return Ok((Vec::new(), false));
    }
    if buffer[trailer] != SIGNATURE_TAG {
        return Err(ParseError::MissingSignatureTag {
            message: format!(
                "Expected 0x{:02X} at offset {}, got 0x{:02X}",
                SIGNATURE_TAG, trailer, buffer[trailer]
            ),
        });
    }
    if trailer + algorithm.trailer_length() > end {
        debug!(
            "Signature digest at offset {} is truncated; not verified",
            trailer + 2
        );
        return Ok((Vec::new(), false));
    }
    let declared = buffer[trailer + 1] as usize;
    if declared != algorithm.digest_length() {
        debug!(
            "Signature length byte {} differs from the {} byte {:?} digest",
            declared,
            algorithm.digest_length(),
            algorithm
        );
    }

    let digest_start = trailer + 2;
    let claimed = buffer[digest_start..digest_start + algorithm.digest_length()].to_vec();
    match signature::verify(
        algorithm,
        ctx.signature_key,
        &buffer[..end],
        start,
        spdu_length,
        digest_start,
    ) {
        Ok(record) => Ok((record.claimed, record.matched)),
        Err(ParseError::SignatureMismatch { message }) if ctx.tolerate_signature_failures => {
            warn!("Tolerating signature failure: {}", message);
            Ok((claimed, false))
        }
        Err(e) => Err(e),
    }
}
