//! # Measurement Units and Nominal Frequency
//!
//! Scaling descriptors that accompany a configuration: phasor units (voltage/current
//! and a 10⁻⁵ per-bit scale factor used by integer phasors), analog units, digital
//! status masks, nominal frequency and the data rate. They arrive in C37.118-style
//! configuration frames and default to unscaled values for guessed or file-derived
//! configurations.

use super::common::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scaling for one phasor channel.
///
/// # Fields
///
/// * `is_current`: Current (`true`) or voltage (`false`) phasor.
/// * `scale_factor`: Unsigned 24-bit factor in 10⁻⁵ V or A per bit. Ignored for
///   floating-point phasors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhasorUnits {
    pub is_current: bool,
    pub scale_factor: u32,
}

impl PhasorUnits {
    /// Parses phasor units from a 4-byte PHUNIT word.
    ///
    /// # Returns
    ///
    /// * `Ok(PhasorUnits)`: The parsed phasor units.
    /// * `Err(ParseError::OutOfBounds)`: If the slice is not 4 bytes.
    pub fn from_hex(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() != 4 {
            return Err(ParseError::OutOfBounds {
                message: format!(
                    "Invalid length for PhasorUnits: expected 4 bytes, got {}",
                    bytes.len()
                ),
            });
        }
        Ok(PhasorUnits {
            is_current: bytes[0] == 1,
            scale_factor: u32::from_be_bytes([0, bytes[1], bytes[2], bytes[3]]),
        })
    }

    pub fn to_hex(&self) -> [u8; 4] {
        let mut bytes = self.scale_factor.to_be_bytes();
        bytes[0] = self.is_current as u8;
        bytes
    }

    /// Engineering units per integer count.
    pub fn multiplier(&self) -> f32 {
        self.scale_factor as f32 * 1e-5
    }
}

/// Measurement type of an analog channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasurementType {
    SinglePointOnWave,
    RmsOfAnalogInput,
    PeakOfAnalogInput,
    Reserved(u8),
}

impl fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MeasurementType::SinglePointOnWave => write!(f, "Single Point-On-Wave"),
            MeasurementType::RmsOfAnalogInput => write!(f, "RMS"),
            MeasurementType::PeakOfAnalogInput => write!(f, "Peak"),
            MeasurementType::Reserved(code) => write!(f, "Reserved ({})", code),
        }
    }
}

impl MeasurementType {
    fn from_byte(byte: u8) -> Self {
        match byte {
            0 => MeasurementType::SinglePointOnWave,
            1 => MeasurementType::RmsOfAnalogInput,
            2 => MeasurementType::PeakOfAnalogInput,
            other => MeasurementType::Reserved(other),
        }
    }
}

/// Type and user-defined scaling of an analog channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalogUnits {
    pub measurement_type: MeasurementType,
    /// Signed 24-bit scale factor, sign-extended.
    pub scale_factor: i32,
}

impl AnalogUnits {
    pub fn from_hex(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() != 4 {
            return Err(ParseError::OutOfBounds {
                message: format!(
                    "Invalid length for AnalogUnits: expected 4 bytes, got {}",
                    bytes.len()
                ),
            });
        }
        // Shift the 24-bit field to the top and back to sign-extend it.
        let scale_factor = i32::from_be_bytes([bytes[1], bytes[2], bytes[3], 0]) >> 8;
        Ok(AnalogUnits {
            measurement_type: MeasurementType::from_byte(bytes[0]),
            scale_factor,
        })
    }
}

/// Mask words for one 16-bit digital status word.
///
/// `normal_status` XORed with the status word yields zero when every input is in its
/// normal state; `valid_inputs` has a bit set for each input in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DigitalUnits {
    pub normal_status: u16,
    pub valid_inputs: u16,
}

impl DigitalUnits {
    pub fn from_hex(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() != 4 {
            return Err(ParseError::OutOfBounds {
                message: format!(
                    "Invalid length for DigitalUnits: expected 4 bytes, got {}",
                    bytes.len()
                ),
            });
        }
        Ok(DigitalUnits {
            normal_status: u16::from_be_bytes([bytes[0], bytes[1]]),
            valid_inputs: u16::from_be_bytes([bytes[2], bytes[3]]),
        })
    }

    /// Bits of `word` that are valid inputs and differ from their normal state.
    pub fn abnormal_inputs(&self, word: u16) -> u16 {
        (word ^ self.normal_status) & self.valid_inputs
    }
}

/// Nominal system frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NominalFrequency {
    Hz50,
    Hz60,
}

impl NominalFrequency {
    /// Parses the 2-byte FNOM field: bit 0 set means 50 Hz, clear means 60 Hz.
    pub fn from_hex(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() != 2 {
            return Err(ParseError::OutOfBounds {
                message: format!(
                    "Invalid length for NominalFrequency: expected 2 bytes, got {}",
                    bytes.len()
                ),
            });
        }
        let word = u16::from_be_bytes([bytes[0], bytes[1]]);
        if word & 0x0001 != 0 {
            Ok(NominalFrequency::Hz50)
        } else {
            Ok(NominalFrequency::Hz60)
        }
    }

    pub fn to_hex(&self) -> [u8; 2] {
        match self {
            NominalFrequency::Hz50 => [0x00, 0x01],
            NominalFrequency::Hz60 => [0x00, 0x00],
        }
    }

    pub fn hertz(&self) -> f32 {
        match self {
            NominalFrequency::Hz50 => 50.0,
            NominalFrequency::Hz60 => 60.0,
        }
    }

    /// Maps a configured frequency in hertz to the nearest nominal value.
    pub fn from_hertz(hz: f32) -> Result<Self, ParseError> {
        if (hz - 50.0).abs() < f32::EPSILON {
            Ok(NominalFrequency::Hz50)
        } else if (hz - 60.0).abs() < f32::EPSILON {
            Ok(NominalFrequency::Hz60)
        } else {
            Err(ParseError::InvalidOption {
                message: format!("Nominal frequency must be 50 or 60 Hz, got {}", hz),
            })
        }
    }
}

impl Default for NominalFrequency {
    fn default() -> Self {
        NominalFrequency::Hz60
    }
}

impl fmt::Display for NominalFrequency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NominalFrequency::Hz50 => write!(f, "50 Hz"),
            NominalFrequency::Hz60 => write!(f, "60 Hz"),
        }
    }
}

/// Rate of data transmission.
///
/// Positive values are frames per second, negative values are seconds per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRate {
    pub value: i16,
}

impl DataRate {
    pub fn from_hex(bytes: &[u8; 2]) -> Self {
        DataRate {
            value: i16::from_be_bytes(*bytes),
        }
    }

    /// Frames per second.
    pub fn frequency(&self) -> f32 {
        if self.value > 0 {
            self.value as f32
        } else if self.value < 0 {
            1.0 / (-(self.value as f32))
        } else {
            0.0
        }
    }

    /// Whole frames per second, at least 1.
    pub fn samples_per_second(&self) -> u16 {
        if self.value > 0 {
            self.value as u16
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phasor_units() {
        let p1 = PhasorUnits::from_hex(&[0x00, 0x0D, 0xF8, 0x47]).unwrap();
        let p2 = PhasorUnits::from_hex(&[0x01, 0x00, 0xB2, 0xD0]).unwrap();

        assert!(!p1.is_current);
        assert!(p2.is_current);
        assert_eq!(p1.scale_factor, 915527);
        assert_eq!(p2.scale_factor, 45776);
        assert_eq!(p2.to_hex(), [0x01, 0x00, 0xB2, 0xD0]);
        assert!((p1.multiplier() - 9.15527).abs() < 1e-4);

        assert!(PhasorUnits::from_hex(&[0x00, 0x01]).is_err());
    }

    #[test]
    fn test_analog_units_sign_extension() {
        let positive = AnalogUnits::from_hex(&[0x01, 0x00, 0x00, 0x64]).unwrap();
        assert_eq!(positive.measurement_type, MeasurementType::RmsOfAnalogInput);
        assert_eq!(positive.scale_factor, 100);

        let negative = AnalogUnits::from_hex(&[0x07, 0xFF, 0xFF, 0xFE]).unwrap();
        assert_eq!(negative.measurement_type, MeasurementType::Reserved(7));
        assert_eq!(negative.scale_factor, -2);
    }

    #[test]
    fn test_digital_units() {
        let units = DigitalUnits::from_hex(&[0x00, 0x0F, 0x00, 0xFF]).unwrap();
        assert_eq!(units.abnormal_inputs(0x000F), 0);
        assert_eq!(units.abnormal_inputs(0x0F0E), 0x0001);
    }

    #[test]
    fn test_nominal_frequency() {
        let n50 = NominalFrequency::from_hex(&[0x00, 0x01]).unwrap();
        let n60 = NominalFrequency::from_hex(&[0x00, 0x00]).unwrap();

        assert_eq!(n50.to_string(), "50 Hz");
        assert_eq!(n60.to_string(), "60 Hz");
        assert_eq!(n50.to_hex(), [0x00, 0x01]);
        assert_eq!(NominalFrequency::from_hertz(60.0).unwrap(), n60);
        assert!(NominalFrequency::from_hertz(55.0).is_err());
    }

    #[test]
    fn test_data_rate() {
        assert_eq!(DataRate::from_hex(&[0x00, 0x1E]).frequency(), 30.0);
        assert_eq!(DataRate::from_hex(&[0xFF, 0xFB]).frequency(), 0.2);
        assert_eq!(DataRate::from_hex(&[0xFF, 0xFB]).samples_per_second(), 1);
    }
}
