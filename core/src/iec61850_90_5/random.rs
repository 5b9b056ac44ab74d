//! # IEC 61850-90-5 Test Frame Generator
//!
//! Builds synthetic sampled-value frames for tests and benchmarks: ASDUs, SV-PDUs,
//! session-encapsulated frames with optional signature trailers, sync-byte data frames,
//! and CFG-2 configuration frames. Sample blocks use the float polar layout that
//! `config::guess` infers, so random frames decode without any supplied configuration.
//!
//! ## Key Components
//!
//! - `AsduBuilder`: Field values of one ASDU and its encoding.
//! - `session_frame`: Wraps ASDUs in the CLTP/session envelope and signs the SPDU.
//! - `sync_data_frame` / `sync_config_frame`: The 0xAA envelope with a CRC trailer.
//! - `random_sample_block`: A float polar sample block with random values.

use rand::Rng;

use super::common::ParseError;
use super::config::{PhasorKind, ResolvedConfiguration, DIGITAL_SIZE, STATUS_SIZE};
use super::phasors::PhasorType;
use super::signature::{compute_signature, SignatureAlgorithm};
use super::tags::{
    sv, CLTP_TAG, KEY_ID_SIZE, PAYLOAD_TYPE_SAMPLED_VALUES, SESSION_HEADER_SIZE,
    SESSION_RESERVED_BYTES, SESSION_TYPE_SAMPLED_VALUES, SIGNATURE_TAG, SYNC_BYTE,
    SYNC_HEADER_LENGTH, CHECKSUM_LENGTH,
};
use super::units::NominalFrequency;
use super::utils::calculate_crc;

const DATA_TYPE_BYTE: u8 = 0x01;
const CONFIG2_TYPE_BYTE: u8 = 0x31;
const NAME_LENGTH: usize = 16;

/// Encodes a BER definite length.
pub fn encode_length(length: usize) -> Vec<u8> {
    if length < 0x80 {
        vec![length as u8]
    } else if length <= 0xFF {
        vec![0x81, length as u8]
    } else {
        let bytes = (length as u16).to_be_bytes();
        vec![0x82, bytes[0], bytes[1]]
    }
}

fn push_tlv(out: &mut Vec<u8>, tag: u8, value: &[u8]) {
    out.push(tag);
    out.extend_from_slice(&encode_length(value.len()));
    out.extend_from_slice(value);
}

/// Field values of one ASDU.
#[derive(Debug, Clone, PartialEq)]
pub struct AsduBuilder {
    pub identity: String,
    pub dataset: Option<String>,
    pub sample_count: u16,
    pub config_revision: u32,
    /// Seconds of the refresh time.
    pub seconds: u32,
    /// 24-bit fraction of the refresh time, relative to 2^24.
    pub fraction: u32,
    pub time_quality: u8,
    pub sample_synchronization: u8,
    pub sample_rate: Option<u16>,
    pub samples: Vec<u8>,
}

impl AsduBuilder {
    pub fn new(identity: &str, samples: Vec<u8>) -> Self {
        AsduBuilder {
            identity: identity.to_string(),
            dataset: None,
            sample_count: 0,
            config_revision: 1,
            seconds: 1_700_000_000,
            fraction: 0,
            time_quality: 0,
            sample_synchronization: 1,
            sample_rate: None,
            samples,
        }
    }

    pub fn sample_count(mut self, sample_count: u16) -> Self {
        self.sample_count = sample_count;
        self
    }

    pub fn refresh_time(mut self, seconds: u32, fraction: u32) -> Self {
        self.seconds = seconds;
        self.fraction = fraction & 0x00FF_FFFF;
        self
    }

    pub fn sample_rate(mut self, sample_rate: u16) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Encodes the ASDU including its `0x30` tag and length.
    pub fn encode(&self) -> Vec<u8> {
        let mut fields = Vec::new();
        push_tlv(&mut fields, sv::MSVID, self.identity.as_bytes());
        if let Some(dataset) = &self.dataset {
            push_tlv(&mut fields, sv::DATASET, dataset.as_bytes());
        }
        push_tlv(&mut fields, sv::SAMPLE_COUNT, &self.sample_count.to_be_bytes());
        push_tlv(
            &mut fields,
            sv::CONFIG_REVISION,
            &self.config_revision.to_be_bytes(),
        );
        let mut refresh = self.seconds.to_be_bytes().to_vec();
        let fraction_word = ((self.fraction & 0x00FF_FFFF) << 8) | self.time_quality as u32;
        refresh.extend_from_slice(&fraction_word.to_be_bytes());
        push_tlv(&mut fields, sv::REFRESH_TIME, &refresh);
        push_tlv(
            &mut fields,
            sv::SAMPLE_SYNCHRONIZED,
            &[self.sample_synchronization],
        );
        if let Some(rate) = self.sample_rate {
            push_tlv(&mut fields, sv::SAMPLE_RATE, &rate.to_be_bytes());
        }
        push_tlv(&mut fields, sv::SAMPLES, &self.samples);

        let mut asdu = Vec::with_capacity(fields.len() + 4);
        push_tlv(&mut asdu, sv::ASDU, &fields);
        asdu
    }
}

/// Encodes an SV-PDU carrying `asdus`, oldest first.
pub fn sv_pdu(asdus: &[AsduBuilder]) -> Vec<u8> {
    let sequence: Vec<u8> = asdus.iter().flat_map(|asdu| asdu.encode()).collect();
    let mut inner = Vec::new();
    push_tlv(&mut inner, sv::ASDU_COUNT, &[asdus.len() as u8]);
    push_tlv(&mut inner, sv::SEQUENCE_OF_ASDU, &sequence);
    let mut pdu = Vec::with_capacity(inner.len() + 4);
    push_tlv(&mut pdu, sv::SV_PDU, &inner);
    pdu
}

/// Builds a session-encapsulated frame and appends the signature trailer.
///
/// The digest covers every byte before the trailer. `SignatureAlgorithm::None` produces
/// a frame without a trailer.
pub fn session_frame(
    asdus: &[AsduBuilder],
    algorithm: SignatureAlgorithm,
    key: &[u8],
    packet_number: u32,
) -> Result<Vec<u8>, ParseError> {
    let pdu = sv_pdu(asdus);

    let mut frame = vec![0x01, CLTP_TAG, SESSION_TYPE_SAMPLED_VALUES, SESSION_HEADER_SIZE];
    frame.extend_from_slice(&[0u8; SESSION_RESERVED_BYTES]);
    let spdu_offset = frame.len();
    frame.extend_from_slice(&0u32.to_be_bytes());
    frame.extend_from_slice(&packet_number.to_be_bytes());
    frame.push(0); // no encryption
    frame.push(algorithm.id());
    frame.extend_from_slice(&[0u8; KEY_ID_SIZE]);

    // Payload header: length, type, simulation flag, APPID, ASDU payload size
    frame.extend_from_slice(&((pdu.len() + 6) as u32).to_be_bytes());
    frame.push(PAYLOAD_TYPE_SAMPLED_VALUES);
    frame.push(0);
    frame.extend_from_slice(&0x4000u16.to_be_bytes());
    frame.extend_from_slice(&(pdu.len() as u16).to_be_bytes());
    frame.extend_from_slice(&pdu);

    let spdu_length = frame.len() as u32;
    frame[spdu_offset..spdu_offset + 4].copy_from_slice(&spdu_length.to_be_bytes());

    if algorithm != SignatureAlgorithm::None {
        let digest = compute_signature(algorithm, key, &frame)?;
        frame.push(SIGNATURE_TAG);
        frame.push(digest.len() as u8);
        frame.extend_from_slice(&digest);
    }
    Ok(frame)
}

fn sync_frame(type_byte: u8, id_code: u16, seconds: u32, body: &[u8]) -> Vec<u8> {
    let frame_length = (SYNC_HEADER_LENGTH + body.len() + CHECKSUM_LENGTH) as u16;
    let mut frame = vec![SYNC_BYTE, type_byte];
    frame.extend_from_slice(&frame_length.to_be_bytes());
    frame.extend_from_slice(&id_code.to_be_bytes());
    frame.extend_from_slice(&seconds.to_be_bytes());
    frame.extend_from_slice(&0u32.to_be_bytes());
    frame.extend_from_slice(body);
    let crc = calculate_crc(&frame);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame
}

/// Builds a sync-byte data frame whose body is the SV-PDU of `asdus`.
pub fn sync_data_frame(id_code: u16, seconds: u32, asdus: &[AsduBuilder]) -> Vec<u8> {
    sync_frame(DATA_TYPE_BYTE, id_code, seconds, &sv_pdu(asdus))
}

fn padded_name(name: &str) -> [u8; NAME_LENGTH] {
    let mut padded = [b' '; NAME_LENGTH];
    let bytes = name.as_bytes();
    let length = bytes.len().min(NAME_LENGTH);
    padded[..length].copy_from_slice(&bytes[..length]);
    padded
}

/// Builds a sync-byte CFG-2 frame announcing one station per configuration.
///
/// Phasor and analog units are written when present, otherwise unit scale. Digital
/// words name their first bit after the word label.
pub fn sync_config_frame(
    id_code: u16,
    time_base: u32,
    sample_rate: i16,
    configurations: &[ResolvedConfiguration],
) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&time_base.to_be_bytes());
    body.extend_from_slice(&(configurations.len() as u16).to_be_bytes());

    for configuration in configurations {
        body.extend_from_slice(&padded_name(&configuration.station_name));
        body.extend_from_slice(&configuration.id_code.to_be_bytes());
        body.extend_from_slice(&configuration.format.to_format_word().to_be_bytes());
        body.extend_from_slice(&(configuration.phasors.len() as u16).to_be_bytes());
        body.extend_from_slice(&(configuration.analogs.len() as u16).to_be_bytes());
        body.extend_from_slice(&(configuration.digitals.len() as u16).to_be_bytes());

        for phasor in &configuration.phasors {
            body.extend_from_slice(&padded_name(&phasor.label));
        }
        for analog in &configuration.analogs {
            body.extend_from_slice(&padded_name(&analog.label));
        }
        for digital in &configuration.digitals {
            body.extend_from_slice(&padded_name(&digital.label));
            for _ in 1..16 {
                body.extend_from_slice(&padded_name(""));
            }
        }

        for phasor in &configuration.phasors {
            let is_current = phasor.kind == PhasorKind::Current;
            let scale = phasor
                .units
                .map(|units| units.scale_factor)
                .unwrap_or(100_000);
            let word = ((is_current as u32) << 24) | (scale & 0x00FF_FFFF);
            body.extend_from_slice(&word.to_be_bytes());
        }
        for _ in &configuration.analogs {
            body.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        }
        for _ in &configuration.digitals {
            body.extend_from_slice(&[0x00, 0x00, 0xFF, 0xFF]);
        }
        body.extend_from_slice(&configuration.nominal_frequency.to_hex());
        body.extend_from_slice(&configuration.change_count.unwrap_or(0).to_be_bytes());
    }
    body.extend_from_slice(&sample_rate.to_be_bytes());

    sync_frame(CONFIG2_TYPE_BYTE, id_code, 0, &body)
}

/// Byte length of a float polar sample block with FREQ/DFREQ.
pub fn float_sample_length(phasor_count: usize, digital_count: usize) -> usize {
    STATUS_SIZE
        + phasor_count * PhasorType::FloatPolar.size()
        + 8
        + digital_count * DIGITAL_SIZE
}

/// Encodes a float polar sample block: STAT, phasors, FREQ, DFREQ, digital words.
pub fn float_sample_block(
    status: u16,
    phasors: &[(f32, f32)],
    frequency: f32,
    dfdt: f32,
    digitals: &[u16],
) -> Vec<u8> {
    let mut block = Vec::with_capacity(float_sample_length(phasors.len(), digitals.len()));
    block.extend_from_slice(&status.to_be_bytes());
    for (magnitude, angle) in phasors {
        block.extend_from_slice(&magnitude.to_be_bytes());
        block.extend_from_slice(&angle.to_be_bytes());
    }
    block.extend_from_slice(&frequency.to_be_bytes());
    block.extend_from_slice(&dfdt.to_be_bytes());
    for word in digitals {
        block.extend_from_slice(&word.to_be_bytes());
    }
    block
}

/// Generates a float polar sample block with random but plausible values.
pub fn random_sample_block<R: Rng>(
    rng: &mut R,
    phasor_count: usize,
    digital_count: usize,
    nominal: NominalFrequency,
) -> Vec<u8> {
    let phasors: Vec<(f32, f32)> = (0..phasor_count)
        .map(|_| {
            (
                rng.random_range(0.0..400_000.0f32),
                rng.random_range(-std::f32::consts::PI..std::f32::consts::PI),
            )
        })
        .collect();
    let digitals: Vec<u16> = (0..digital_count).map(|_| rng.random()).collect();
    float_sample_block(
        0,
        &phasors,
        nominal.hertz() + rng.random_range(-0.05..0.05f32),
        rng.random_range(-0.5..0.5f32),
        &digitals,
    )
}

/// Generates a session frame of `asdu_count` ASDUs for one stream with consecutive
/// sample counts, the newest last.
pub fn random_session_frame<R: Rng>(
    rng: &mut R,
    identity: &str,
    asdu_count: usize,
    phasor_count: usize,
    algorithm: SignatureAlgorithm,
    key: &[u8],
) -> Result<Vec<u8>, ParseError> {
    let seconds = 1_700_000_000 + rng.random_range(0..86_400u32);
    let first_count: u16 = rng.random_range(0..1000);
    let asdus: Vec<AsduBuilder> = (0..asdu_count)
        .map(|i| {
            let samples = random_sample_block(rng, phasor_count, 1, NominalFrequency::Hz60);
            AsduBuilder::new(identity, samples)
                .sample_count(first_count + i as u16)
                .refresh_time(seconds, (i as u32) * 0x8000)
        })
        .collect();
    session_frame(&asdus, algorithm, key, rng.random())
}
