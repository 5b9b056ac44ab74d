//! # Phasor Measurement Values
//!
//! Phasors in a sample block are encoded in one of four layouts chosen by the
//! configuration: polar or rectangular coordinates, each as a pair of 32-bit floats or a
//! pair of 16-bit integers. Integer phasors are scaled by the PHUNIT factor of their
//! channel (10⁻⁵ units per bit) and integer angles are radians × 10⁴.
//!
//! ## Key Components
//!
//! - `PhasorType`: The four encodings and their byte widths.
//! - `PhasorValue`: A decoded phasor in its wire encoding.
//! - `PhasorFloatPolar` / `PhasorFloatRect`: Engineering-unit representations every
//!   encoding converts to.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::common::ParseError;
use super::units::PhasorUnits;

// Integer angles are transmitted in units of 10^-4 radians.
const INT_ANGLE_SCALE: f32 = 0.0001;

/// Phasor encodings.
///
/// # Variants
///
/// * `FloatPolar`: Magnitude and angle (radians) as 32-bit floats.
/// * `FloatRect`: Real and imaginary parts as 32-bit floats.
/// * `IntPolar`: Unsigned 16-bit magnitude and signed 16-bit angle.
/// * `IntRect`: Signed 16-bit real and imaginary parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PhasorType {
    #[default]
    FloatPolar,
    FloatRect,
    IntPolar,
    IntRect,
}

impl fmt::Display for PhasorType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PhasorType::FloatPolar => write!(f, "FloatPolar"),
            PhasorType::FloatRect => write!(f, "FloatRect"),
            PhasorType::IntPolar => write!(f, "IntPolar"),
            PhasorType::IntRect => write!(f, "IntRect"),
        }
    }
}

impl PhasorType {
    pub fn new(is_float: bool, is_polar: bool) -> Self {
        match (is_float, is_polar) {
            (true, true) => PhasorType::FloatPolar,
            (true, false) => PhasorType::FloatRect,
            (false, true) => PhasorType::IntPolar,
            (false, false) => PhasorType::IntRect,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, PhasorType::FloatPolar | PhasorType::FloatRect)
    }

    pub fn is_polar(&self) -> bool {
        matches!(self, PhasorType::FloatPolar | PhasorType::IntPolar)
    }

    /// Bytes one phasor occupies in a sample block.
    pub fn size(&self) -> usize {
        if self.is_float() {
            8
        } else {
            4
        }
    }
}

/// A decoded phasor in its wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PhasorValue {
    FloatPolar(PhasorFloatPolar),
    FloatRect(PhasorFloatRect),
    IntPolar(PhasorIntPolar),
    IntRect(PhasorIntRect),
}

impl PhasorValue {
    /// Parses one phasor of `phasor_type` from the front of `bytes`.
    ///
    /// # Returns
    ///
    /// * `Ok(PhasorValue)`: The parsed phasor value.
    /// * `Err(ParseError::OutOfBounds)`: If `bytes` is shorter than the encoding.
    pub fn from_hex(bytes: &[u8], phasor_type: PhasorType) -> Result<Self, ParseError> {
        let size = phasor_type.size();
        if bytes.len() < size {
            return Err(ParseError::OutOfBounds {
                message: format!(
                    "Invalid length for {} phasor: expected {} bytes, got {}",
                    phasor_type,
                    size,
                    bytes.len()
                ),
            });
        }

        let value = match phasor_type {
            PhasorType::FloatPolar => PhasorValue::FloatPolar(PhasorFloatPolar {
                magnitude: f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
                angle: f32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            }),
            PhasorType::FloatRect => PhasorValue::FloatRect(PhasorFloatRect {
                real: f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
                imag: f32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            }),
            PhasorType::IntPolar => PhasorValue::IntPolar(PhasorIntPolar {
                magnitude: u16::from_be_bytes([bytes[0], bytes[1]]),
                angle: i16::from_be_bytes([bytes[2], bytes[3]]),
            }),
            PhasorType::IntRect => PhasorValue::IntRect(PhasorIntRect {
                real: i16::from_be_bytes([bytes[0], bytes[1]]),
                imag: i16::from_be_bytes([bytes[2], bytes[3]]),
            }),
        };
        Ok(value)
    }

    pub fn get_type(&self) -> PhasorType {
        match self {
            PhasorValue::FloatPolar(_) => PhasorType::FloatPolar,
            PhasorValue::FloatRect(_) => PhasorType::FloatRect,
            PhasorValue::IntPolar(_) => PhasorType::IntPolar,
            PhasorValue::IntRect(_) => PhasorType::IntRect,
        }
    }

    /// Converts to engineering-unit polar form. `units` scales integer encodings and
    /// is ignored for floats; without units integer counts are returned unscaled.
    pub fn to_float_polar(&self, units: Option<&PhasorUnits>) -> PhasorFloatPolar {
        let multiplier = units.map(|u| u.multiplier()).unwrap_or(1.0);
        match self {
            PhasorValue::FloatPolar(phasor) => *phasor,
            PhasorValue::FloatRect(phasor) => phasor.to_float_polar(),
            PhasorValue::IntPolar(phasor) => PhasorFloatPolar {
                magnitude: phasor.magnitude as f32 * multiplier,
                angle: phasor.angle as f32 * INT_ANGLE_SCALE,
            },
            PhasorValue::IntRect(phasor) => PhasorFloatRect {
                real: phasor.real as f32 * multiplier,
                imag: phasor.imag as f32 * multiplier,
            }
            .to_float_polar(),
        }
    }

    pub fn to_float_rect(&self, units: Option<&PhasorUnits>) -> PhasorFloatRect {
        match self {
            PhasorValue::FloatRect(phasor) => *phasor,
            other => other.to_float_polar(units).to_float_rect(),
        }
    }
}

/// Polar phasor in engineering units, angle in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhasorFloatPolar {
    pub magnitude: f32,
    pub angle: f32,
}

impl PhasorFloatPolar {
    pub fn to_float_rect(&self) -> PhasorFloatRect {
        PhasorFloatRect {
            real: self.magnitude * self.angle.cos(),
            imag: self.magnitude * self.angle.sin(),
        }
    }

    pub fn angle_degrees(&self) -> f32 {
        self.angle.to_degrees()
    }
}

/// Rectangular phasor in engineering units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhasorFloatRect {
    pub real: f32,
    pub imag: f32,
}

impl PhasorFloatRect {
    pub fn to_float_polar(&self) -> PhasorFloatPolar {
        PhasorFloatPolar {
            magnitude: (self.real * self.real + self.imag * self.imag).sqrt(),
            angle: self.imag.atan2(self.real),
        }
    }
}

/// Integer polar phasor as transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhasorIntPolar {
    pub magnitude: u16,
    pub angle: i16,
}

/// Integer rectangular phasor as transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhasorIntRect {
    pub real: i16,
    pub imag: i16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_phasor_polar_conversions() {
        let polar = PhasorFloatPolar {
            magnitude: 1.0,
            angle: PI / 4.0,
        };
        let rect = polar.to_float_rect();
        assert!((rect.real - 0.7071).abs() < 1e-3);
        assert!((rect.imag - 0.7071).abs() < 1e-3);

        let back = rect.to_float_polar();
        assert!((back.magnitude - 1.0).abs() < 1e-5);
        assert!((back.angle - PI / 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_float_polar_from_hex() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&132_790.0f32.to_be_bytes());
        bytes.extend_from_slice(&0.5f32.to_be_bytes());
        let phasor = PhasorValue::from_hex(&bytes, PhasorType::FloatPolar).unwrap();
        assert_eq!(phasor.get_type(), PhasorType::FloatPolar);
        let polar = phasor.to_float_polar(None);
        assert_eq!(polar.magnitude, 132_790.0);
        assert_eq!(polar.angle, 0.5);

        assert!(PhasorValue::from_hex(&bytes[..7], PhasorType::FloatPolar).is_err());
    }

    #[test]
    fn test_int_rect_scaling() {
        // 14635 counts at 915527 x 10^-5 V per count is roughly 134 kV
        let units = PhasorUnits {
            is_current: false,
            scale_factor: 915_527,
        };
        let phasor = PhasorValue::from_hex(&[0x39, 0x2B, 0x00, 0x00], PhasorType::IntRect).unwrap();
        let polar = phasor.to_float_polar(Some(&units));
        assert!((polar.magnitude - 133_987.4).abs() < 1.0);
        assert_eq!(polar.angle, 0.0);
    }

    #[test]
    fn test_int_polar_angle() {
        let phasor = PhasorValue::from_hex(&[0x00, 0x64, 0x3D, 0x5C], PhasorType::IntPolar).unwrap();
        let polar = phasor.to_float_polar(None);
        assert_eq!(polar.magnitude, 100.0);
        assert!((polar.angle - PI / 2.0).abs() < 1e-3);
        assert!((polar.angle_degrees() - 90.0).abs() < 0.1);
    }

    #[test]
    fn test_phasor_type_sizes() {
        assert_eq!(PhasorType::new(true, true), PhasorType::FloatPolar);
        assert_eq!(PhasorType::new(false, false), PhasorType::IntRect);
        assert_eq!(PhasorType::FloatRect.size(), 8);
        assert_eq!(PhasorType::IntPolar.size(), 4);
    }
}
