//! # Configuration Frames in the Sync-Byte Envelope
//!
//! Devices that use the 0xAA sync-byte envelope announce their measurement layout with
//! C37.118-style configuration frames. This module parses the body of CFG-1, CFG-2 and
//! CFG-3 frames (everything between the 14-byte header and the checksum) into one
//! `Supplied` `ResolvedConfiguration` per station, keyed `"{idcode}_{station}"`, so that
//! the resolver can bind later data frames from the same station without guessing.
//!
//! CFG-1 and CFG-2 share a fixed layout. CFG-3 uses length-prefixed names, floating-point
//! phasor and analog scales and a continuation index; only unfragmented CFG-3 frames
//! (continuation index 0) are accepted.

use log::debug;

use super::common::{FrameType, ParseError};
use super::config::{
    AnalogDefinition, ConfigurationSource, DataFormat, DerivationDefaults, DigitalDefinition,
    FrequencyDefinition, PhasorDefinition, PhasorKind, ResolvedConfiguration,
};
use super::tags::TagCursor;
use super::units::{
    AnalogUnits, DataRate, DigitalUnits, MeasurementType, NominalFrequency, PhasorUnits,
};

const CHANNEL_NAME_LENGTH: usize = 16;
const STATION_NAME_LENGTH: usize = 16;
const TIME_BASE_MASK: u32 = 0x00FF_FFFF;
const DIGITAL_CHANNELS_PER_WORD: usize = 16;

/// The parsed body of a configuration frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationFrame {
    pub frame_type: FrameType,
    pub time_base: u32,
    pub data_rate: DataRate,
    pub configurations: Vec<ResolvedConfiguration>,
}

/// Channel counts and names common to every configuration frame revision.
struct StationLayout {
    format: DataFormat,
    phasor_names: Vec<String>,
    analog_names: Vec<String>,
    digital_names: Vec<String>,
}

impl ConfigurationFrame {
    /// Parses a configuration frame body.
    ///
    /// # Parameters
    ///
    /// * `body`: Bytes after the 14-byte header, excluding the trailing checksum.
    /// * `frame_type`: One of the three configuration frame types.
    /// * `defaults`: Used when the frame declares a zero time base.
    ///
    /// # Returns
    ///
    /// * `Ok(ConfigurationFrame)`: One configuration per station.
    /// * `Err(ParseError::InvalidFrameType)`: `frame_type` is not a configuration frame.
    /// * `Err(ParseError::OutOfBounds)`: The body is shorter than its declared contents.
    /// * `Err(ParseError::FormatMismatch)`: A fragmented CFG-3 frame.
    pub fn parse(
        body: &[u8],
        frame_type: FrameType,
        defaults: &DerivationDefaults,
    ) -> Result<Self, ParseError> {
        if !frame_type.is_configuration() {
            return Err(ParseError::InvalidFrameType {
                message: format!("Expected a configuration frame type, got {}", frame_type),
            });
        }

        let mut cursor = TagCursor::new(body, 0, body.len());
        if frame_type == FrameType::Config3 {
            let continuation = cursor.read_u16()?;
            if continuation != 0 {
                return Err(ParseError::FormatMismatch {
                    message: format!(
                        "Fragmented configuration frame 3 (continuation index {}) is not supported",
                        continuation
                    ),
                });
            }
        }

        let mut time_base = cursor.read_u32()? & TIME_BASE_MASK;
        if time_base == 0 {
            time_base = defaults.time_base;
        }
        let station_count = cursor.read_u16()?;

        let mut configurations = Vec::new();
        for _ in 0..station_count {
            let configuration = if frame_type == FrameType::Config3 {
                parse_station_cfg3(&mut cursor, time_base, defaults)?
            } else {
                parse_station(&mut cursor, time_base, defaults)?
            };
            configurations.push(configuration);
        }

        let rate_bytes = cursor.read_bytes(2)?;
        let data_rate = DataRate::from_hex(&[rate_bytes[0], rate_bytes[1]]);
        for configuration in configurations.iter_mut() {
            configuration.sample_rate = data_rate.samples_per_second();
        }

        debug!(
            "Parsed {} with {} station(s), time base {}",
            frame_type,
            configurations.len(),
            time_base
        );

        Ok(ConfigurationFrame {
            frame_type,
            time_base,
            data_rate,
            configurations,
        })
    }
}

fn fixed_name(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string()
}

fn read_fixed_name(cursor: &mut TagCursor<'_>, length: usize) -> Result<String, ParseError> {
    Ok(fixed_name(cursor.read_bytes(length)?))
}

fn read_prefixed_name(cursor: &mut TagCursor<'_>) -> Result<String, ParseError> {
    let length = cursor.read_u8()? as usize;
    Ok(fixed_name(cursor.read_bytes(length)?))
}

fn read_name(cursor: &mut TagCursor<'_>, prefixed: bool) -> Result<String, ParseError> {
    if prefixed {
        read_prefixed_name(cursor)
    } else {
        read_fixed_name(cursor, CHANNEL_NAME_LENGTH)
    }
}

fn read_counts_and_names(
    cursor: &mut TagCursor<'_>,
    prefixed_names: bool,
) -> Result<StationLayout, ParseError> {
    let format = DataFormat::from_format_word(cursor.read_u16()?);
    let phasor_count = cursor.read_u16()? as usize;
    let analog_count = cursor.read_u16()? as usize;
    let digital_count = cursor.read_u16()? as usize;

    let mut phasor_names = Vec::with_capacity(phasor_count);
    for _ in 0..phasor_count {
        phasor_names.push(read_name(cursor, prefixed_names)?);
    }
    let mut analog_names = Vec::with_capacity(analog_count);
    for _ in 0..analog_count {
        analog_names.push(read_name(cursor, prefixed_names)?);
    }
    // Each digital word names its 16 bits; the first bit name labels the word.
    let mut digital_names = Vec::with_capacity(digital_count);
    for index in 0..digital_count {
        let mut label = String::new();
        for bit in 0..DIGITAL_CHANNELS_PER_WORD {
            let name = read_name(cursor, prefixed_names)?;
            if bit == 0 {
                label = name;
            }
        }
        if label.is_empty() {
            label = format!("D{}", index + 1);
        }
        digital_names.push(label);
    }

    Ok(StationLayout {
        format,
        phasor_names,
        analog_names,
        digital_names,
    })
}

fn new_station(
    station_name: &str,
    id_code: u16,
    time_base: u32,
    defaults: &DerivationDefaults,
) -> ResolvedConfiguration {
    let identity = format!("{}_{}", id_code, station_name);
    let mut configuration =
        ResolvedConfiguration::new(&identity, ConfigurationSource::Supplied, defaults);
    configuration.time_base = time_base;
    configuration.frequency = Some(FrequencyDefinition::default());
    configuration
}

fn read_digital_units(
    cursor: &mut TagCursor<'_>,
    names: Vec<String>,
) -> Result<Vec<DigitalDefinition>, ParseError> {
    names
        .into_iter()
        .map(|label| {
            let units = DigitalUnits::from_hex(cursor.read_bytes(4)?)?;
            Ok(DigitalDefinition {
                label,
                units: Some(units),
            })
        })
        .collect()
}

fn read_fnom_and_cfgcnt(
    cursor: &mut TagCursor<'_>,
    configuration: &mut ResolvedConfiguration,
) -> Result<(), ParseError> {
    configuration.nominal_frequency = NominalFrequency::from_hex(cursor.read_bytes(2)?)?;
    configuration.change_count = Some(cursor.read_u16()?);
    Ok(())
}

/// CFG-1 / CFG-2 station block.
fn parse_station(
    cursor: &mut TagCursor<'_>,
    time_base: u32,
    defaults: &DerivationDefaults,
) -> Result<ResolvedConfiguration, ParseError> {
    let station_name = read_fixed_name(cursor, STATION_NAME_LENGTH)?;
    let id_code = cursor.read_u16()?;
    let layout = read_counts_and_names(cursor, false)?;

    let mut configuration = new_station(&station_name, id_code, time_base, defaults);
    configuration.format = layout.format;

    for label in layout.phasor_names {
        let units = PhasorUnits::from_hex(cursor.read_bytes(4)?)?;
        configuration.phasors.push(PhasorDefinition {
            label,
            kind: if units.is_current {
                PhasorKind::Current
            } else {
                PhasorKind::Voltage
            },
            units: Some(units),
        });
    }
    for label in layout.analog_names {
        let units = AnalogUnits::from_hex(cursor.read_bytes(4)?)?;
        configuration.analogs.push(AnalogDefinition {
            label,
            units: Some(units),
        });
    }
    configuration.digitals = read_digital_units(cursor, layout.digital_names)?;
    read_fnom_and_cfgcnt(cursor, &mut configuration)?;

    Ok(configuration)
}

/// CFG-3 station block: length-prefixed names, a 16-byte global PMU id, float scales,
/// and position/service fields that are skipped.
fn parse_station_cfg3(
    cursor: &mut TagCursor<'_>,
    time_base: u32,
    defaults: &DerivationDefaults,
) -> Result<ResolvedConfiguration, ParseError> {
    let station_name = read_prefixed_name(cursor)?;
    let id_code = cursor.read_u16()?;
    cursor.skip(16)?; // G_PMU_ID
    let layout = read_counts_and_names(cursor, true)?;

    let mut configuration = new_station(&station_name, id_code, time_base, defaults);
    configuration.format = layout.format;

    // PHSCALE: flags (2), type byte (bit 3 set for current), user byte, scale f32, angle offset f32
    for label in layout.phasor_names {
        let bytes = cursor.read_bytes(12)?;
        let is_current = bytes[2] & 0x08 != 0;
        let scale = f32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        configuration.phasors.push(PhasorDefinition {
            label,
            kind: if is_current {
                PhasorKind::Current
            } else {
                PhasorKind::Voltage
            },
            units: Some(PhasorUnits {
                is_current,
                scale_factor: (scale.max(0.0) * 1e5).round() as u32,
            }),
        });
    }
    // ANSCALE: scale f32, offset f32
    for label in layout.analog_names {
        let bytes = cursor.read_bytes(8)?;
        let scale = f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        configuration.analogs.push(AnalogDefinition {
            label,
            units: Some(AnalogUnits {
                measurement_type: MeasurementType::SinglePointOnWave,
                scale_factor: scale.round() as i32,
            }),
        });
    }
    configuration.digitals = read_digital_units(cursor, layout.digital_names)?;

    // PMU_LAT, PMU_LON, PMU_ELEV, SVC_CLASS, WINDOW, GRP_DLY
    cursor.skip(4 + 4 + 4 + 1 + 4 + 4)?;
    read_fnom_and_cfgcnt(cursor, &mut configuration)?;

    Ok(configuration)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded(name: &str) -> Vec<u8> {
        let mut bytes = name.as_bytes().to_vec();
        bytes.resize(16, b' ');
        bytes
    }

    fn cfg2_body() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&1_000_000u32.to_be_bytes());
        body.extend_from_slice(&1u16.to_be_bytes());
        body.extend_from_slice(&padded("Station A"));
        body.extend_from_slice(&7734u16.to_be_bytes());
        body.extend_from_slice(&0x0004u16.to_be_bytes()); // int rect phasors, float analogs
        body.extend_from_slice(&2u16.to_be_bytes());
        body.extend_from_slice(&1u16.to_be_bytes());
        body.extend_from_slice(&1u16.to_be_bytes());
        body.extend_from_slice(&padded("VA"));
        body.extend_from_slice(&padded("I1"));
        body.extend_from_slice(&padded("ANALOG1"));
        body.extend_from_slice(&padded("BREAKER 1"));
        for _ in 1..16 {
            body.extend_from_slice(&padded(""));
        }
        body.extend_from_slice(&[0x00, 0x0D, 0xF8, 0x47]);
        body.extend_from_slice(&[0x01, 0x00, 0xB2, 0xD0]);
        body.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        body.extend_from_slice(&[0x00, 0x00, 0xFF, 0xFF]);
        body.extend_from_slice(&[0x00, 0x00]); // 60 Hz
        body.extend_from_slice(&22u16.to_be_bytes());
        body.extend_from_slice(&30i16.to_be_bytes());
        body
    }

    #[test]
    fn test_parse_cfg2() {
        let frame = ConfigurationFrame::parse(
            &cfg2_body(),
            FrameType::Config2,
            &DerivationDefaults::default(),
        )
        .unwrap();

        assert_eq!(frame.time_base, 1_000_000);
        assert_eq!(frame.data_rate.frequency(), 30.0);
        assert_eq!(frame.configurations.len(), 1);

        let configuration = &frame.configurations[0];
        assert_eq!(configuration.identity, "7734_Station A");
        assert_eq!(configuration.id_code, 7734);
        assert_eq!(configuration.station_name, "Station A");
        assert_eq!(configuration.source, ConfigurationSource::Supplied);
        assert_eq!(configuration.time_base, 1_000_000);
        assert_eq!(configuration.sample_rate, 30);
        assert_eq!(configuration.change_count, Some(22));
        assert_eq!(configuration.phasors[0].kind, PhasorKind::Voltage);
        assert_eq!(configuration.phasors[1].kind, PhasorKind::Current);
        assert_eq!(configuration.digitals[0].label, "BREAKER 1");
        // STAT 2 + 2 int phasors 8 + int FREQ/DFREQ 4 + float analog 4 + digital 2
        assert_eq!(configuration.expected_sample_length(), 20);
    }

    #[test]
    fn test_truncated_cfg2_is_out_of_bounds() {
        let body = cfg2_body();
        let result = ConfigurationFrame::parse(
            &body[..body.len() - 3],
            FrameType::Config1,
            &DerivationDefaults::default(),
        );
        assert!(matches!(result, Err(ParseError::OutOfBounds { .. })));
    }

    #[test]
    fn test_station_count_beyond_body_is_out_of_bounds() {
        let mut body = Vec::new();
        body.extend_from_slice(&1_000_000u32.to_be_bytes());
        body.extend_from_slice(&u16::MAX.to_be_bytes());
        body.extend_from_slice(&padded("Station A"));
        let result = ConfigurationFrame::parse(
            &body,
            FrameType::Config2,
            &DerivationDefaults::default(),
        );
        assert!(matches!(result, Err(ParseError::OutOfBounds { .. })));
    }

    #[test]
    fn test_rejects_data_frame_type() {
        let result = ConfigurationFrame::parse(
            &cfg2_body(),
            FrameType::Data,
            &DerivationDefaults::default(),
        );
        assert!(matches!(result, Err(ParseError::InvalidFrameType { .. })));
    }

    #[test]
    fn test_parse_cfg3_single_phasor() {
        let mut body = Vec::new();
        body.extend_from_slice(&0u16.to_be_bytes()); // CONT_IDX
        body.extend_from_slice(&0u32.to_be_bytes()); // falls back to the default time base
        body.extend_from_slice(&1u16.to_be_bytes());
        body.push(3);
        body.extend_from_slice(b"SUB");
        body.extend_from_slice(&5u16.to_be_bytes());
        body.extend_from_slice(&[0u8; 16]);
        body.extend_from_slice(&0x000Fu16.to_be_bytes());
        body.extend_from_slice(&1u16.to_be_bytes());
        body.extend_from_slice(&0u16.to_be_bytes());
        body.extend_from_slice(&0u16.to_be_bytes());
        body.push(2);
        body.extend_from_slice(b"IA");
        body.extend_from_slice(&[0x00, 0x00, 0x08, 0x00]);
        body.extend_from_slice(&1.0f32.to_be_bytes());
        body.extend_from_slice(&0.0f32.to_be_bytes());
        body.extend_from_slice(&[0u8; 21]);
        body.extend_from_slice(&[0x00, 0x01]); // 50 Hz
        body.extend_from_slice(&3u16.to_be_bytes());
        body.extend_from_slice(&50i16.to_be_bytes());

        let frame =
            ConfigurationFrame::parse(&body, FrameType::Config3, &DerivationDefaults::default())
                .unwrap();
        let configuration = &frame.configurations[0];
        assert_eq!(configuration.identity, "5_SUB");
        assert_eq!(configuration.time_base, 1 << 24);
        assert_eq!(configuration.nominal_frequency, NominalFrequency::Hz50);
        assert_eq!(configuration.phasors[0].kind, PhasorKind::Current);
        assert_eq!(
            configuration.phasors[0].units.map(|u| u.scale_factor),
            Some(100_000)
        );
        assert_eq!(configuration.sample_rate, 50);
    }
}
