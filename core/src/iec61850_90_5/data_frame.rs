//! # Sampled-Value ASDU Decoding
//!
//! After the header, a data frame carries a sequence of ASDUs (application service data
//! units). Each ASDU holds one sample block for one stream, identified by its MSVID. A
//! session-encapsulated frame with `N` ASDUs carries the current sample last and
//! `N - 1` redundant older samples before it; the redundant ones are republished as
//! frames of their own when `publish_redundant_samples` is set. The ASDUs of a
//! sync-byte frame all land in one frame as separate cells.
//!
//! ## Key Components
//!
//! - `Asdu`: The tagged fields of one ASDU and the byte range of its sample block.
//! - `DataCell`: One decoded sample block (STAT, phasors, FREQ/DFREQ, analogs, digitals).
//! - `DataFrame`: A header snapshot, its timestamp and the cells decoded for it.
//! - `decode_asdus`: Walks the ASDU sequence, resolving a configuration per ASDU.

use std::ops::Range;
use std::sync::Arc;

use log::{debug, warn};
use serde::Serialize;

use super::common::{parse_identity, EnvelopeKind, ParseError, SampleStatus, TimeQuality};
use super::config::{Capabilities, ResolvedConfiguration};
use super::header::FrameHeader;
use super::phasors::{PhasorFloatPolar, PhasorValue};
use super::resolver::{ConfigurationResolver, ConfigurationSink, ResolveRequest};
use super::tags::{parse_unsigned, sv, TagCursor};
use super::utils::{utc_time_from_bytes, Timestamp};

/// Minimum bytes of a refresh time (`UtcTime`).
const REFRESH_TIME_LENGTH: usize = 8;
const SAMPLE_COUNT_LENGTH: usize = 2;
const SAMPLE_SYNCHRONIZED_LENGTH: usize = 1;

/// The fields of one ASDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asdu {
    pub identity: String,
    pub id_code: u16,
    pub station_name: String,
    pub sample_count: u16,
    pub config_revision: u32,
    pub refresh_time: Timestamp,
    pub time_quality: TimeQuality,
    pub sample_synchronization: u8,
    pub sample_rate: Option<u16>,
    /// Absolute byte range of the sample block in the frame buffer.
    pub samples: Range<usize>,
}

impl Asdu {
    /// Parses one ASDU at the cursor, leaving the cursor after it.
    ///
    /// `time_base` is the tick rate the refresh time is expressed in.
    pub fn parse(cursor: &mut TagCursor<'_>, time_base: u32) -> Result<Self, ParseError> {
        let length = cursor.read_tag_length(sv::ASDU)?;
        let asdu_end = cursor.offset() + length;
        let mut fields = TagCursor::new(cursor.buffer(), cursor.offset(), length);

        let (msvid, _) = fields.read_length_prefixed(sv::MSVID)?;
        let identity = String::from_utf8_lossy(msvid).trim().to_string();
        let (id_code, station_name) = parse_identity(&identity);

        fields.skip_optional(sv::DATASET)?;
        let sample_count = fields.read_fixed_tag(sv::SAMPLE_COUNT, SAMPLE_COUNT_LENGTH)? as u16;
        let config_revision = fields.read_unsigned_tag(sv::CONFIG_REVISION)? as u32;

        let (refresh, _) = fields.read_length_prefixed(sv::REFRESH_TIME)?;
        if refresh.len() < REFRESH_TIME_LENGTH {
            return Err(ParseError::FormatMismatch {
                message: format!(
                    "Refresh time of '{}' has {} bytes, expected {}",
                    identity,
                    refresh.len(),
                    REFRESH_TIME_LENGTH
                ),
            });
        }
        let (refresh_time, time_quality) = utc_time_from_bytes(refresh, time_base)?;

        let sample_synchronization =
            fields.read_fixed_tag(sv::SAMPLE_SYNCHRONIZED, SAMPLE_SYNCHRONIZED_LENGTH)? as u8;
        let sample_rate = match fields.skip_optional(sv::SAMPLE_RATE)? {
            Some(value) => Some(parse_unsigned(value)? as u16),
            None => None,
        };

        let sample_length = fields.read_tag_length(sv::SAMPLES)?;
        let samples = fields.offset()..fields.offset() + sample_length;
        fields.skip(sample_length)?;

        fields.skip_optional(sv::SAMPLE_MODIFICATION)?;
        fields.skip_optional(sv::UTC_TIMESTAMP)?;
        if fields.remaining() > 0 {
            debug!(
                "Skipping {} unknown trailing bytes in ASDU '{}'",
                fields.remaining(),
                identity
            );
        }
        cursor.seek(asdu_end)?;

        Ok(Asdu {
            identity,
            id_code,
            station_name,
            sample_count,
            config_revision,
            refresh_time,
            time_quality,
            sample_synchronization,
            sample_rate,
            samples,
        })
    }

    pub fn sample_length(&self) -> usize {
        self.samples.len()
    }
}

/// One decoded sample block.
#[derive(Debug, Clone, Serialize)]
pub struct DataCell {
    pub identity: String,
    pub id_code: u16,
    pub station_name: String,
    pub sample_count: u16,
    pub config_revision: u32,
    pub sample_synchronization: u8,
    pub status: SampleStatus,
    pub phasors: Vec<PhasorValue>,
    pub frequency: f32,
    pub dfdt: f32,
    pub analogs: Vec<f32>,
    pub digitals: Vec<u16>,
    #[serde(skip)]
    pub configuration: Arc<ResolvedConfiguration>,
}

impl DataCell {
    /// Phasors in engineering units, scaled by each channel's PHUNIT.
    pub fn polar_phasors(&self) -> Vec<PhasorFloatPolar> {
        self.phasors
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let units = self
                    .configuration
                    .phasors
                    .get(i)
                    .and_then(|definition| definition.units.as_ref());
                value.to_float_polar(units)
            })
            .collect()
    }
}

/// A published frame: header snapshot, authoritative timestamp and cells.
#[derive(Debug, Clone, Serialize)]
pub struct DataFrame {
    pub header: FrameHeader,
    pub timestamp: Timestamp,
    pub time_quality: TimeQuality,
    /// Set for frames built from redundant (older) ASDUs.
    pub redundant: bool,
    pub cells: Vec<DataCell>,
}

/// Inputs to `decode_asdus` that come from the decoder rather than the frame.
pub struct AsduContext<'a> {
    pub resolver: &'a ConfigurationResolver,
    pub sink: &'a dyn ConfigurationSink,
    pub supplied: Option<&'a ResolvedConfiguration>,
    pub tolerate_sample_size_mismatch: bool,
    pub publish_redundant_samples: bool,
}

/// Result of decoding the ASDUs of one frame.
#[derive(Debug, Clone)]
pub struct DecodedFrames {
    /// Redundant frames oldest first (when enabled), then the current frame.
    pub frames: Vec<DataFrame>,
    pub bytes_consumed: usize,
}

/// Working cell set for the ASDU currently being decoded.
#[derive(Default)]
struct AsduState {
    cells: Vec<DataCell>,
}

impl AsduState {
    fn take_frame(&mut self, header: &FrameHeader, redundant: bool) -> DataFrame {
        DataFrame {
            header: header.clone(),
            timestamp: header.timestamp,
            time_quality: header.time_quality,
            redundant,
            cells: std::mem::take(&mut self.cells),
        }
    }
}

/// Decodes every ASDU of the data frame at `buffer[start..]` described by `header`.
///
/// The header's timestamp and time quality follow each ASDU's refresh time. ASDUs
/// whose configuration cannot be resolved are skipped, so a frame may publish with no
/// cells.
///
/// # Returns
///
/// * `Ok(DecodedFrames)`: Frames to publish and `bytes_consumed == header.frame_length`.
/// * `Err(ParseError::SampleSizeMismatch)`: A sample block does not match its
///   configuration and mismatches are not tolerated.
/// * `Err(ParseError)`: A malformed ASDU.
pub fn decode_asdus(
    buffer: &[u8],
    start: usize,
    header: &mut FrameHeader,
    ctx: &AsduContext<'_>,
) -> Result<DecodedFrames, ParseError> {
    let mut cursor = TagCursor::new(buffer, start + header.header_length, header.sequence_length);
    let mut state = AsduState::default();
    // Only session-encapsulated frames carry older samples ahead of the current one.
    let carries_redundant = header.envelope == EnvelopeKind::SessionEncapsulated;
    let mut frames = Vec::with_capacity(if carries_redundant && ctx.publish_redundant_samples {
        header.asdu_count
    } else {
        1
    });

    for index in 0..header.asdu_count {
        if index > 0 && carries_redundant {
            let redundant = state.take_frame(header, true);
            if ctx.publish_redundant_samples {
                frames.push(redundant);
            } else {
                debug!(
                    "Discarding redundant sample {} of {}",
                    index, header.asdu_count
                );
            }
        }

        let asdu = Asdu::parse(&mut cursor, header.timestamp.time_base)?;
        header.set_time(asdu.refresh_time, asdu.time_quality);

        let request = ResolveRequest {
            identity: &asdu.identity,
            sample_length: asdu.sample_length(),
            sample_rate: asdu.sample_rate,
            supplied: ctx.supplied,
        };
        let configuration = match ctx.resolver.resolve(&request, ctx.sink) {
            Some(configuration) => configuration,
            None => {
                debug!(
                    "Skipping {} sample bytes of unresolved '{}'",
                    asdu.sample_length(),
                    asdu.identity
                );
                continue;
            }
        };

        if configuration.time_base != header.timestamp.time_base {
            let timestamp = header.timestamp.with_time_base(configuration.time_base);
            header.set_time(timestamp, asdu.time_quality);
        }

        let expected = configuration.expected_sample_length();
        let actual = asdu.sample_length();
        if actual != expected {
            let message = format!(
                "'{}' carries {} sample bytes, configuration expects {}",
                asdu.identity, actual, expected
            );
            if !ctx.tolerate_sample_size_mismatch {
                return Err(ParseError::SampleSizeMismatch { message });
            }
            if actual < expected {
                warn!("Skipping sample: {}", message);
                continue;
            }
            warn!("Decoding leading bytes: {}", message);
        }

        let sample = &buffer[asdu.samples.start..asdu.samples.start + expected];
        let cell = decode_cell(sample, &asdu, configuration)?;
        state.cells.push(cell);
    }

    frames.push(state.take_frame(header, false));
    Ok(DecodedFrames {
        frames,
        bytes_consumed: header.frame_length,
    })
}

/// Decodes one sample block laid out as `configuration` describes.
pub fn decode_cell(
    sample: &[u8],
    asdu: &Asdu,
    configuration: Arc<ResolvedConfiguration>,
) -> Result<DataCell, ParseError> {
    let mut cursor = TagCursor::new(sample, 0, sample.len());
    let format = configuration.format;
    let capabilities = configuration.capabilities();

    let status = SampleStatus::from_raw(cursor.read_u16()?);

    let mut phasors = Vec::with_capacity(configuration.phasors.len());
    if capabilities.contains(Capabilities::PHASORS) {
        for _ in 0..configuration.phasors.len() {
            let bytes = cursor.read_bytes(format.phasor_size())?;
            phasors.push(PhasorValue::from_hex(bytes, format.phasor)?);
        }
    }

    let (mut frequency, mut dfdt) = (f32::NAN, f32::NAN);
    if capabilities.contains(Capabilities::FREQUENCY) {
        if format.frequency_float {
            frequency = f32::from_bits(cursor.read_u32()?);
            dfdt = f32::from_bits(cursor.read_u32()?);
        } else {
            // Fixed point: mHz deviation from nominal, ROCOF in hundredths of Hz/s
            let deviation = cursor.read_u16()? as i16;
            let rocof = cursor.read_u16()? as i16;
            frequency = configuration.nominal_frequency.hertz() + deviation as f32 / 1000.0;
            dfdt = rocof as f32 / 100.0;
        }
    }

    let mut analogs = Vec::with_capacity(configuration.analogs.len());
    if capabilities.contains(Capabilities::ANALOGS) {
        for _ in 0..configuration.analogs.len() {
            let value = if format.analog_float {
                f32::from_bits(cursor.read_u32()?)
            } else {
                cursor.read_u16()? as i16 as f32
            };
            analogs.push(value);
        }
    }

    let mut digitals = Vec::with_capacity(configuration.digitals.len());
    if capabilities.contains(Capabilities::DIGITALS) {
        for _ in 0..configuration.digitals.len() {
            digitals.push(cursor.read_u16()?);
        }
    }

    Ok(DataCell {
        identity: asdu.identity.clone(),
        id_code: asdu.id_code,
        station_name: asdu.station_name.clone(),
        sample_count: asdu.sample_count,
        config_revision: asdu.config_revision,
        sample_synchronization: asdu.sample_synchronization,
        status,
        phasors,
        frequency,
        dfdt,
        analogs,
        digitals,
        configuration,
    })
}
