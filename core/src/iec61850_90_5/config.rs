//! # Resolved Measurement Configurations
//!
//! A `ResolvedConfiguration` describes how to read the sample block of one data stream:
//! which phasors, frequency, analog and digital channels it carries, in which numeric
//! formats, and with which time base. Configurations come from three sources:
//!
//! - `Supplied`: delivered out-of-band or in a configuration frame.
//! - `FileDerived`: parsed from an associated ETR definition file (see `etr`).
//! - `Guessed`: inferred from the byte length of the sample block (see `guess`).
//!
//! Once cached by the resolver a configuration is immutable and shared through an `Arc`.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::common::{parse_identity, ParseError};
use super::phasors::PhasorType;
use super::units::{AnalogUnits, DigitalUnits, NominalFrequency, PhasorUnits};
use super::utils::DEFAULT_TIME_BASE;

/// Bytes taken by the STAT word that leads every sample block.
pub const STATUS_SIZE: usize = 2;

/// Bytes taken by one 16-bit digital status word.
pub const DIGITAL_SIZE: usize = 2;

/// Smallest sample block a guess accepts: STAT plus float FREQ and DFREQ.
pub const MINIMUM_GUESS_LENGTH: usize = STATUS_SIZE + 4 + 4;

/// Samples per second assumed when neither the stream nor the options say otherwise.
pub const DEFAULT_SAMPLE_RATE: u16 = 30;

bitflags! {
    /// Channel groups present in a sample block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        const PHASORS = 0b0001;
        const FREQUENCY = 0b0010;
        const ANALOGS = 0b0100;
        const DIGITALS = 0b1000;
    }
}

/// Where a configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigurationSource {
    Supplied,
    FileDerived,
    Guessed,
}

impl fmt::Display for ConfigurationSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigurationSource::Supplied => write!(f, "supplied"),
            ConfigurationSource::FileDerived => write!(f, "file-derived"),
            ConfigurationSource::Guessed => write!(f, "guessed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhasorKind {
    Voltage,
    Current,
}

/// Numeric formats of the sample block, equivalent to the C37.118 FORMAT word.
///
/// # Fields
///
/// * `phasor`: Phasor coordinate system and width.
/// * `frequency_float`: FREQ/DFREQ as 32-bit floats (`true`) or 16-bit integers.
/// * `analog_float`: Analogs as 32-bit floats (`true`) or 16-bit integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFormat {
    pub phasor: PhasorType,
    pub frequency_float: bool,
    pub analog_float: bool,
}

impl Default for DataFormat {
    fn default() -> Self {
        DataFormat {
            phasor: PhasorType::FloatPolar,
            frequency_float: true,
            analog_float: true,
        }
    }
}

impl DataFormat {
    /// Reads a FORMAT word: bit 3 FREQ/DFREQ float, bit 2 analogs float, bit 1 phasors
    /// float, bit 0 phasors polar.
    pub fn from_format_word(word: u16) -> Self {
        DataFormat {
            phasor: PhasorType::new(word & 0x0002 != 0, word & 0x0001 != 0),
            frequency_float: word & 0x0008 != 0,
            analog_float: word & 0x0004 != 0,
        }
    }

    pub fn to_format_word(&self) -> u16 {
        let mut word = 0u16;
        if self.frequency_float {
            word |= 0x0008;
        }
        if self.analog_float {
            word |= 0x0004;
        }
        if self.phasor.is_float() {
            word |= 0x0002;
        }
        if self.phasor.is_polar() {
            word |= 0x0001;
        }
        word
    }

    pub fn phasor_size(&self) -> usize {
        self.phasor.size()
    }

    pub fn frequency_size(&self) -> usize {
        if self.frequency_float {
            4
        } else {
            2
        }
    }

    pub fn analog_size(&self) -> usize {
        if self.analog_float {
            4
        } else {
            2
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhasorDefinition {
    pub label: String,
    pub kind: PhasorKind,
    pub units: Option<PhasorUnits>,
}

/// Labels for the FREQ and DFREQ pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyDefinition {
    pub label: String,
    pub dfdt_label: String,
}

impl Default for FrequencyDefinition {
    fn default() -> Self {
        FrequencyDefinition {
            label: "FREQ".to_string(),
            dfdt_label: "DFDT".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalogDefinition {
    pub label: String,
    pub units: Option<AnalogUnits>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitalDefinition {
    pub label: String,
    pub units: Option<DigitalUnits>,
}

/// Stream-independent values used when a configuration is derived rather than supplied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivationDefaults {
    pub time_base: u32,
    pub sample_rate: u16,
    pub nominal_frequency: NominalFrequency,
}

impl Default for DerivationDefaults {
    fn default() -> Self {
        DerivationDefaults {
            time_base: DEFAULT_TIME_BASE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            nominal_frequency: NominalFrequency::Hz60,
        }
    }
}

/// Layout of one stream's sample block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedConfiguration {
    pub identity: String,
    pub id_code: u16,
    pub station_name: String,
    pub source: ConfigurationSource,
    pub time_base: u32,
    pub sample_rate: u16,
    pub nominal_frequency: NominalFrequency,
    pub format: DataFormat,
    pub phasors: Vec<PhasorDefinition>,
    pub frequency: Option<FrequencyDefinition>,
    pub analogs: Vec<AnalogDefinition>,
    pub digitals: Vec<DigitalDefinition>,
    /// Configuration change count, when the source carries one.
    pub change_count: Option<u16>,
}

impl ResolvedConfiguration {
    /// Creates an empty configuration for `identity`; channels are added by the caller.
    pub fn new(identity: &str, source: ConfigurationSource, defaults: &DerivationDefaults) -> Self {
        let (id_code, station_name) = parse_identity(identity);
        ResolvedConfiguration {
            identity: identity.to_string(),
            id_code,
            station_name,
            source,
            time_base: defaults.time_base,
            sample_rate: defaults.sample_rate,
            nominal_frequency: defaults.nominal_frequency,
            format: DataFormat::default(),
            phasors: Vec::new(),
            frequency: None,
            analogs: Vec::new(),
            digitals: Vec::new(),
            change_count: None,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        let mut capabilities = Capabilities::empty();
        if !self.phasors.is_empty() {
            capabilities |= Capabilities::PHASORS;
        }
        if self.frequency.is_some() {
            capabilities |= Capabilities::FREQUENCY;
        }
        if !self.analogs.is_empty() {
            capabilities |= Capabilities::ANALOGS;
        }
        if !self.digitals.is_empty() {
            capabilities |= Capabilities::DIGITALS;
        }
        capabilities
    }

    pub fn voltage_count(&self) -> usize {
        self.phasors
            .iter()
            .filter(|p| p.kind == PhasorKind::Voltage)
            .count()
    }

    pub fn current_count(&self) -> usize {
        self.phasors.len() - self.voltage_count()
    }

    /// Bytes of one sample block: STAT, phasors, FREQ and DFREQ, analogs, digitals.
    pub fn expected_sample_length(&self) -> usize {
        let frequency = if self.frequency.is_some() {
            2 * self.format.frequency_size()
        } else {
            0
        };
        STATUS_SIZE
            + self.phasors.len() * self.format.phasor_size()
            + frequency
            + self.analogs.len() * self.format.analog_size()
            + self.digitals.len() * DIGITAL_SIZE
    }
}

/// Infers a float-format layout from the byte length of a sample block.
///
/// After STAT, FREQ and DFREQ (10 bytes) the remainder is split into 8-byte polar
/// phasors; what is left must be whole 16-bit digital words. Voltages take the larger
/// half of the phasors and come first (`V1..`), followed by currents (`I1..`).
///
/// # Returns
///
/// * `Ok(ResolvedConfiguration)`: A `Guessed` configuration.
/// * `Err(ParseError::InvalidDerivedConfiguration)`: The length admits no layout.
pub fn guess(
    identity: &str,
    sample_length: usize,
    defaults: &DerivationDefaults,
) -> Result<ResolvedConfiguration, ParseError> {
    if sample_length < MINIMUM_GUESS_LENGTH {
        return Err(ParseError::InvalidDerivedConfiguration {
            message: format!(
                "Sample block of {} bytes is shorter than the {} byte minimum",
                sample_length, MINIMUM_GUESS_LENGTH
            ),
        });
    }

    let mut configuration =
        ResolvedConfiguration::new(identity, ConfigurationSource::Guessed, defaults);
    let phasor_size = configuration.format.phasor_size();

    let remainder = sample_length - MINIMUM_GUESS_LENGTH;
    let phasor_count = remainder / phasor_size;
    let leftover = remainder % phasor_size;
    if leftover % DIGITAL_SIZE != 0 {
        return Err(ParseError::InvalidDerivedConfiguration {
            message: format!(
                "Sample block of {} bytes leaves {} odd bytes after {} phasors",
                sample_length, leftover, phasor_count
            ),
        });
    }
    let digital_count = leftover / DIGITAL_SIZE;

    let voltages = phasor_count.div_ceil(2);
    let currents = phasor_count / 2;
    for i in 1..=voltages {
        configuration.phasors.push(PhasorDefinition {
            label: format!("V{}", i),
            kind: PhasorKind::Voltage,
            units: None,
        });
    }
    for i in 1..=currents {
        configuration.phasors.push(PhasorDefinition {
            label: format!("I{}", i),
            kind: PhasorKind::Current,
            units: None,
        });
    }
    configuration.frequency = Some(FrequencyDefinition::default());
    for i in 1..=digital_count {
        configuration.digitals.push(DigitalDefinition {
            label: format!("D{}", i),
            units: None,
        });
    }

    Ok(configuration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_word_round_trip() {
        let format = DataFormat::from_format_word(0x000F);
        assert_eq!(format, DataFormat::default());
        assert_eq!(format.to_format_word(), 0x000F);

        let int_format = DataFormat::from_format_word(0x0000);
        assert_eq!(int_format.phasor, PhasorType::IntRect);
        assert_eq!(int_format.phasor_size(), 4);
        assert_eq!(int_format.frequency_size(), 2);
        assert_eq!(int_format.analog_size(), 2);
    }

    #[test]
    fn test_guess_single_phasor() {
        let configuration = guess("1_SubstationA", 18, &DerivationDefaults::default()).unwrap();
        assert_eq!(configuration.source, ConfigurationSource::Guessed);
        assert_eq!(configuration.id_code, 1);
        assert_eq!(configuration.station_name, "SubstationA");
        assert_eq!(configuration.voltage_count(), 1);
        assert_eq!(configuration.current_count(), 0);
        assert!(configuration.digitals.is_empty());
        assert_eq!(
            configuration.capabilities(),
            Capabilities::PHASORS | Capabilities::FREQUENCY
        );
        assert_eq!(configuration.expected_sample_length(), 18);
    }

    #[test]
    fn test_guess_mixed_layout() {
        // 3 phasors and 2 digitals
        let configuration = guess("PMU", 10 + 24 + 4, &DerivationDefaults::default()).unwrap();
        let labels: Vec<&str> = configuration.phasors.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, ["V1", "V2", "I1"]);
        assert_eq!(configuration.digitals.len(), 2);
        assert_eq!(configuration.digitals[1].label, "D2");
        assert!(configuration.capabilities().contains(Capabilities::DIGITALS));
        assert_eq!(configuration.expected_sample_length(), 38);
    }

    #[test]
    fn test_guess_rejects_bad_lengths() {
        let defaults = DerivationDefaults::default();
        assert!(guess("PMU", 9, &defaults).is_err());
        assert!(guess("PMU", 11, &defaults).is_err());
        assert!(guess("PMU", 10 + 8 + 3, &defaults).is_err());
        assert!(guess("PMU", 10, &defaults).is_ok());
    }
}
