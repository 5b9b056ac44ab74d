//! # Frame Signature Verification
//!
//! Session-encapsulated frames may carry a keyed digest over the session protocol data
//! unit. This module maps the signature algorithm identifier to a MAC construction and
//! truncation length, computes digests, and compares them in constant time against the
//! bytes embedded in the frame.
//!
//! | Id | Algorithm          | MAC               | Digest bytes |
//! |----|--------------------|-------------------|--------------|
//! | 0  | `None`             | -                 | 0            |
//! | 1  | `HmacSha256_80`    | HMAC-SHA-256      | 10           |
//! | 2  | `HmacSha256_128`   | HMAC-SHA-256      | 16           |
//! | 3  | `HmacSha256_256`   | HMAC-SHA-256      | 32           |
//! | 4  | `Aes64`            | AES-128-CMAC      | 8            |
//! | 5  | `Aes128`           | AES-128-CMAC      | 16           |
//!
//! Key material is always injected by the caller. Key lookup by key id and rotation are
//! the responsibility of the surrounding system.

use std::ops::Range;

use aes::Aes128;
use cmac::Cmac;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::common::ParseError;

type HmacSha256 = Hmac<Sha256>;
type CmacAes128 = Cmac<Aes128>;

/// Placeholder shared secret for interoperability testing. Production deployments
/// supply the key associated with the frame's key id.
pub const DEFAULT_SIGNATURE_KEY: &[u8; 16] = b"iec61850-90-5key";

/// Signature (MAC) algorithm declared in the session header.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    None,
    HmacSha256_80,
    HmacSha256_128,
    HmacSha256_256,
    Aes64,
    Aes128,
}

impl SignatureAlgorithm {
    pub const ALL: [SignatureAlgorithm; 6] = [
        SignatureAlgorithm::None,
        SignatureAlgorithm::HmacSha256_80,
        SignatureAlgorithm::HmacSha256_128,
        SignatureAlgorithm::HmacSha256_256,
        SignatureAlgorithm::Aes64,
        SignatureAlgorithm::Aes128,
    ];

    pub fn from_id(id: u8) -> Result<Self, ParseError> {
        match id {
            0 => Ok(SignatureAlgorithm::None),
            1 => Ok(SignatureAlgorithm::HmacSha256_80),
            2 => Ok(SignatureAlgorithm::HmacSha256_128),
            3 => Ok(SignatureAlgorithm::HmacSha256_256),
            4 => Ok(SignatureAlgorithm::Aes64),
            5 => Ok(SignatureAlgorithm::Aes128),
            _ => Err(ParseError::FormatMismatch {
                message: format!("Unknown signature algorithm id: {}", id),
            }),
        }
    }

    pub fn id(&self) -> u8 {
        match self {
            SignatureAlgorithm::None => 0,
            SignatureAlgorithm::HmacSha256_80 => 1,
            SignatureAlgorithm::HmacSha256_128 => 2,
            SignatureAlgorithm::HmacSha256_256 => 3,
            SignatureAlgorithm::Aes64 => 4,
            SignatureAlgorithm::Aes128 => 5,
        }
    }

    /// Length of the truncated digest embedded in the frame.
    pub fn digest_length(&self) -> usize {
        match self {
            SignatureAlgorithm::None => 0,
            SignatureAlgorithm::Aes64 => 8,
            SignatureAlgorithm::HmacSha256_80 => 10,
            SignatureAlgorithm::HmacSha256_128 | SignatureAlgorithm::Aes128 => 16,
            SignatureAlgorithm::HmacSha256_256 => 32,
        }
    }

    /// Bytes occupied by the signature trailer: tag, length and digest.
    pub fn trailer_length(&self) -> usize {
        match self {
            SignatureAlgorithm::None => 0,
            _ => 2 + self.digest_length(),
        }
    }
}

/// Encryption algorithm declared in the session header. Payload decryption is not
/// performed; the value is recorded on the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityAlgorithm {
    None,
    Aes128Gcm,
    Aes256Gcm,
}

impl SecurityAlgorithm {
    pub fn from_id(id: u8) -> Result<Self, ParseError> {
        match id {
            0 => Ok(SecurityAlgorithm::None),
            1 => Ok(SecurityAlgorithm::Aes128Gcm),
            2 => Ok(SecurityAlgorithm::Aes256Gcm),
            _ => Err(ParseError::FormatMismatch {
                message: format!("Unknown security algorithm id: {}", id),
            }),
        }
    }
}

/// Outcome of one signature check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    pub algorithm: SignatureAlgorithm,
    pub digest_length: usize,
    pub source: Range<usize>,
    pub claimed: Vec<u8>,
    pub matched: bool,
}

enum KeyedMac {
    Hmac(HmacSha256),
    Cmac(CmacAes128),
}

impl KeyedMac {
    fn new(algorithm: SignatureAlgorithm, key: &[u8]) -> Result<Self, ParseError> {
        match algorithm {
            SignatureAlgorithm::Aes64 | SignatureAlgorithm::Aes128 => {
                let mac = <CmacAes128 as Mac>::new_from_slice(key).map_err(|_| {
                    ParseError::SignatureMismatch {
                        message: format!(
                            "{:?} requires a 16 byte key, got {} bytes",
                            algorithm,
                            key.len()
                        ),
                    }
                })?;
                Ok(KeyedMac::Cmac(mac))
            }
            _ => {
                let mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| {
                    ParseError::SignatureMismatch {
                        message: "Invalid HMAC key".to_string(),
                    }
                })?;
                Ok(KeyedMac::Hmac(mac))
            }
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            KeyedMac::Hmac(mac) => mac.update(data),
            KeyedMac::Cmac(mac) => mac.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            KeyedMac::Hmac(mac) => mac.finalize().into_bytes().to_vec(),
            KeyedMac::Cmac(mac) => mac.finalize().into_bytes().to_vec(),
        }
    }

    fn verify_truncated(self, claimed: &[u8]) -> bool {
        match self {
            KeyedMac::Hmac(mac) => mac.verify_truncated_left(claimed).is_ok(),
            KeyedMac::Cmac(mac) => mac.verify_truncated_left(claimed).is_ok(),
        }
    }
}

/// Computes the truncated digest `algorithm` embeds for `data`.
///
/// Returns an empty vector for `SignatureAlgorithm::None`.
pub fn compute_signature(
    algorithm: SignatureAlgorithm,
    key: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, ParseError> {
    if algorithm == SignatureAlgorithm::None {
        return Ok(Vec::new());
    }
    let mut mac = KeyedMac::new(algorithm, key)?;
    mac.update(data);
    let mut digest = mac.finalize();
    digest.truncate(algorithm.digest_length());
    Ok(digest)
}

/// Verifies the digest at `claimed_start` against `buffer[range_start..range_start + range_len]`.
///
/// # Returns
///
/// * `Ok(SignatureRecord)`: The digest matched (always for `None`).
/// * `Err(ParseError::SignatureMismatch)`: The digest did not match, or the key is unusable.
/// * `Err(ParseError::OutOfBounds)`: The range or the claimed digest leaves the buffer.
pub fn verify(
    algorithm: SignatureAlgorithm,
    key: &[u8],
    buffer: &[u8],
    range_start: usize,
    range_len: usize,
    claimed_start: usize,
) -> Result<SignatureRecord, ParseError> {
    let digest_length = algorithm.digest_length();
    let source = range_start..range_start.saturating_add(range_len);

    if algorithm == SignatureAlgorithm::None {
        return Ok(SignatureRecord {
            algorithm,
            digest_length,
            source,
            claimed: Vec::new(),
            matched: true,
        });
    }

    if source.end > buffer.len() {
        return Err(ParseError::out_of_bounds(
            "signed range",
            range_start,
            range_len,
            buffer.len(),
        ));
    }
    let claimed_end = claimed_start.saturating_add(digest_length);
    if claimed_end > buffer.len() {
        return Err(ParseError::out_of_bounds(
            "signature digest",
            claimed_start,
            digest_length,
            buffer.len(),
        ));
    }
    let claimed = &buffer[claimed_start..claimed_end];

    let mut mac = KeyedMac::new(algorithm, key)?;
    mac.update(&buffer[source.clone()]);
    if !mac.verify_truncated(claimed) {
        return Err(ParseError::SignatureMismatch {
            message: format!(
                "{:?} digest over bytes {}..{} does not match",
                algorithm, source.start, source.end
            ),
        });
    }

    Ok(SignatureRecord {
        algorithm,
        digest_length,
        source,
        claimed: claimed.to_vec(),
        matched: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_buffer(algorithm: SignatureAlgorithm, payload: &[u8]) -> Vec<u8> {
        let mut buffer = payload.to_vec();
        let digest = compute_signature(algorithm, DEFAULT_SIGNATURE_KEY, payload).unwrap();
        buffer.extend_from_slice(&digest);
        buffer
    }

    #[test]
    fn test_digest_lengths() {
        let expected = [0, 10, 16, 32, 8, 16];
        for (algorithm, length) in SignatureAlgorithm::ALL.iter().zip(expected) {
            assert_eq!(algorithm.digest_length(), length);
            let digest = compute_signature(*algorithm, DEFAULT_SIGNATURE_KEY, b"abc").unwrap();
            assert_eq!(digest.len(), length, "Digest length for {:?}", algorithm);
            assert_eq!(SignatureAlgorithm::from_id(algorithm.id()).unwrap(), *algorithm);
        }
        assert!(SignatureAlgorithm::from_id(9).is_err());
    }

    #[test]
    fn test_hmac_known_answer() {
        // RFC 4231 test case 2
        let digest = compute_signature(
            SignatureAlgorithm::HmacSha256_256,
            b"Jefe",
            b"what do ya want for nothing?",
        )
        .unwrap();
        let expected = [
            0x5b, 0xdc, 0xc1, 0x46, 0xbf, 0x60, 0x75, 0x4e, 0x6a, 0x04, 0x24, 0x26, 0x08, 0x95,
            0x75, 0xc7, 0x5a, 0x00, 0x3f, 0x08, 0x9d, 0x27, 0x39, 0x83, 0x9d, 0xec, 0x58, 0xb9,
            0x64, 0xec, 0x38, 0x43,
        ];
        assert_eq!(digest, expected);

        let truncated =
            compute_signature(SignatureAlgorithm::HmacSha256_80, b"Jefe", b"what do ya want for nothing?")
                .unwrap();
        assert_eq!(truncated, &expected[..10]);
    }

    #[test]
    fn test_verify_signed_buffers() {
        let payload: Vec<u8> = (0..64u8).collect();
        for algorithm in SignatureAlgorithm::ALL {
            let buffer = signed_buffer(algorithm, &payload);
            let record = verify(
                algorithm,
                DEFAULT_SIGNATURE_KEY,
                &buffer,
                0,
                payload.len(),
                payload.len(),
            )
            .unwrap();
            assert!(record.matched);
            assert_eq!(record.claimed.len(), algorithm.digest_length());
        }
    }

    #[test]
    fn test_wrong_key_is_mismatch() {
        let payload = b"sampled values";
        let buffer = signed_buffer(SignatureAlgorithm::HmacSha256_128, payload);
        let result = verify(
            SignatureAlgorithm::HmacSha256_128,
            b"another key",
            &buffer,
            0,
            payload.len(),
            payload.len(),
        );
        assert!(matches!(result, Err(ParseError::SignatureMismatch { .. })));
    }

    #[test]
    fn test_aes_requires_16_byte_key() {
        let result = compute_signature(SignatureAlgorithm::Aes64, b"short", b"data");
        assert!(matches!(result, Err(ParseError::SignatureMismatch { .. })));
    }

    #[test]
    fn test_truncated_digest_is_out_of_bounds() {
        let payload = b"abcdef";
        let buffer = signed_buffer(SignatureAlgorithm::HmacSha256_256, payload);
        let result = verify(
            SignatureAlgorithm::HmacSha256_256,
            DEFAULT_SIGNATURE_KEY,
            &buffer[..buffer.len() - 1],
            0,
            payload.len(),
            payload.len(),
        );
        assert!(matches!(result, Err(ParseError::OutOfBounds { .. })));
    }
}
