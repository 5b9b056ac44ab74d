//! # ETR Definition Files
//!
//! An ETR file describes the sample block of one stream as an ordered list of signals,
//! one `signal_type,data_type,label` triple per line:
//!
//! ```text
//! # station 1_SubstationA
//! FLAG,INT16U,STAT
//! VPHM,FLOAT32,VA magnitude
//! VPHA,FLOAT32,VA angle
//! IPHM,FLOAT32,IA magnitude
//! IPHA,FLOAT32,IA angle
//! FREQ,FLOAT32,Frequency
//! DFDT,FLOAT32,ROCOF
//! ALOG,FLOAT32,MW
//! DIGI,INT16U,Breakers
//! ```
//!
//! Blank lines and lines starting with `#` or `;` are ignored. The signal order is
//! strict: one `FLAG`, one or more magnitude/angle pairs of the same kind, `FREQ`,
//! `DFDT`, any number of `ALOG`, then any number of `DIGI`. `FLAG` and `DIGI` are
//! `INT16U`; every other signal is `FLOAT32`. Any deviation rejects the whole file.

use std::fs;
use std::path::Path;

use super::common::ParseError;
use super::config::{
    AnalogDefinition, ConfigurationSource, DerivationDefaults, DigitalDefinition,
    FrequencyDefinition, PhasorDefinition, PhasorKind, ResolvedConfiguration,
};

/// File extension of definition files.
pub const ETR_EXTENSION: &str = "etr";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalType {
    Flag,
    VoltageMagnitude,
    VoltageAngle,
    CurrentMagnitude,
    CurrentAngle,
    Frequency,
    Dfdt,
    Analog,
    Digital,
}

impl SignalType {
    fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_uppercase().as_str() {
            "FLAG" => Some(SignalType::Flag),
            "VPHM" => Some(SignalType::VoltageMagnitude),
            "VPHA" => Some(SignalType::VoltageAngle),
            "IPHM" => Some(SignalType::CurrentMagnitude),
            "IPHA" => Some(SignalType::CurrentAngle),
            "FREQ" => Some(SignalType::Frequency),
            "DFDT" => Some(SignalType::Dfdt),
            "ALOG" => Some(SignalType::Analog),
            "DIGI" => Some(SignalType::Digital),
            _ => None,
        }
    }

    fn required_data_type(&self) -> &'static str {
        match self {
            SignalType::Flag | SignalType::Digital => "INT16U",
            _ => "FLOAT32",
        }
    }
}

/// Where the grammar currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Flag,
    FirstMagnitude,
    Angle(PhasorKind),
    MagnitudeOrFrequency,
    Dfdt,
    AnalogOrDigital,
    Digital,
}

struct Signal<'a> {
    line: usize,
    signal_type: SignalType,
    label: &'a str,
}

fn invalid(line: usize, message: impl Into<String>) -> ParseError {
    ParseError::InvalidDerivedConfiguration {
        message: format!("line {}: {}", line, message.into()),
    }
}

fn parse_line(line: usize, text: &str) -> Result<Signal<'_>, ParseError> {
    let mut fields = text.splitn(3, ',');
    let signal_text = fields.next().unwrap_or("").trim();
    let data_type = fields
        .next()
        .map(str::trim)
        .ok_or_else(|| invalid(line, "expected signal_type,data_type,label"))?;
    let label = fields
        .next()
        .map(str::trim)
        .ok_or_else(|| invalid(line, "expected signal_type,data_type,label"))?;

    let signal_type = SignalType::parse(signal_text)
        .ok_or_else(|| invalid(line, format!("unknown signal type '{}'", signal_text)))?;
    let required = signal_type.required_data_type();
    if !data_type.eq_ignore_ascii_case(required) {
        return Err(invalid(
            line,
            format!(
                "{} must be {}, got '{}'",
                signal_text.to_ascii_uppercase(),
                required,
                data_type
            ),
        ));
    }

    Ok(Signal {
        line,
        signal_type,
        label,
    })
}

fn label_or(label: &str, fallback: String) -> String {
    if label.is_empty() {
        fallback
    } else {
        label.to_string()
    }
}

/// Parses ETR text into a `FileDerived` configuration for `identity`.
///
/// Derived configurations use float polar phasors, float frequency and float analogs.
///
/// # Returns
///
/// * `Ok(ResolvedConfiguration)`: The derived layout.
/// * `Err(ParseError::InvalidDerivedConfiguration)`: The text violates the grammar; the
///   message names the offending line.
pub fn parse_etr(
    identity: &str,
    text: &str,
    defaults: &DerivationDefaults,
) -> Result<ResolvedConfiguration, ParseError> {
    let mut configuration =
        ResolvedConfiguration::new(identity, ConfigurationSource::FileDerived, defaults);
    let mut frequency = FrequencyDefinition::default();
    let mut expect = Expect::Flag;
    let mut pending_magnitude = String::new();
    let mut last_line = 0;

    for (index, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }
        let signal = parse_line(index + 1, trimmed)?;
        last_line = signal.line;

        expect = match (expect, signal.signal_type) {
            (Expect::Flag, SignalType::Flag) => Expect::FirstMagnitude,
            (
                Expect::FirstMagnitude | Expect::MagnitudeOrFrequency,
                SignalType::VoltageMagnitude,
            ) => {
                pending_magnitude = signal.label.to_string();
                Expect::Angle(PhasorKind::Voltage)
            }
            (
                Expect::FirstMagnitude | Expect::MagnitudeOrFrequency,
                SignalType::CurrentMagnitude,
            ) => {
                pending_magnitude = signal.label.to_string();
                Expect::Angle(PhasorKind::Current)
            }
            (Expect::Angle(PhasorKind::Voltage), SignalType::VoltageAngle)
            | (Expect::Angle(PhasorKind::Current), SignalType::CurrentAngle) => {
                let kind = if signal.signal_type == SignalType::VoltageAngle {
                    PhasorKind::Voltage
                } else {
                    PhasorKind::Current
                };
                let ordinal = configuration
                    .phasors
                    .iter()
                    .filter(|p| p.kind == kind)
                    .count()
                    + 1;
                let prefix = if kind == PhasorKind::Voltage { "V" } else { "I" };
                configuration.phasors.push(PhasorDefinition {
                    label: label_or(&pending_magnitude, format!("{}{}", prefix, ordinal)),
                    kind,
                    units: None,
                });
                Expect::MagnitudeOrFrequency
            }
            (Expect::MagnitudeOrFrequency, SignalType::Frequency) => {
                frequency.label = label_or(signal.label, frequency.label);
                Expect::Dfdt
            }
            (Expect::Dfdt, SignalType::Dfdt) => {
                frequency.dfdt_label = label_or(signal.label, frequency.dfdt_label);
                Expect::AnalogOrDigital
            }
            (Expect::AnalogOrDigital, SignalType::Analog) => {
                let ordinal = configuration.analogs.len() + 1;
                configuration.analogs.push(AnalogDefinition {
                    label: label_or(signal.label, format!("A{}", ordinal)),
                    units: None,
                });
                Expect::AnalogOrDigital
            }
            (Expect::AnalogOrDigital | Expect::Digital, SignalType::Digital) => {
                let ordinal = configuration.digitals.len() + 1;
                configuration.digitals.push(DigitalDefinition {
                    label: label_or(signal.label, format!("D{}", ordinal)),
                    units: None,
                });
                Expect::Digital
            }
            (state, found) => {
                return Err(invalid(
                    signal.line,
                    format!("unexpected {:?} while expecting {:?}", found, state),
                ));
            }
        };
    }

    match expect {
        Expect::AnalogOrDigital | Expect::Digital => {
            configuration.frequency = Some(frequency);
            Ok(configuration)
        }
        incomplete => Err(invalid(
            last_line,
            format!("definition ends while expecting {:?}", incomplete),
        )),
    }
}

/// Reads and parses the ETR file at `path`.
pub fn load_etr(
    identity: &str,
    path: &Path,
    defaults: &DerivationDefaults,
) -> Result<ResolvedConfiguration, ParseError> {
    let text = fs::read_to_string(path).map_err(|e| ParseError::InvalidDerivedConfiguration {
        message: format!("Unable to read {}: {}", path.display(), e),
    })?;
    parse_etr(identity, &text, defaults)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iec61850_90_5::config::Capabilities;

    const FULL: &str = "\
# station 1_SubstationA
FLAG,INT16U,STAT

VPHM,FLOAT32,VA
VPHA,FLOAT32,VA angle
IPHM,FLOAT32,IA
IPHA,FLOAT32,IA angle
FREQ,FLOAT32,Frequency
DFDT,FLOAT32,ROCOF
; analogs follow
ALOG,FLOAT32,MW
DIGI,INT16U,Breakers
";

    #[test]
    fn test_parse_full_definition() {
        let configuration =
            parse_etr("1_SubstationA", FULL, &DerivationDefaults::default()).unwrap();
        assert_eq!(configuration.source, ConfigurationSource::FileDerived);
        assert_eq!(configuration.phasors.len(), 2);
        assert_eq!(configuration.phasors[0].label, "VA");
        assert_eq!(configuration.phasors[1].kind, PhasorKind::Current);
        assert_eq!(
            configuration.frequency.as_ref().map(|f| f.dfdt_label.as_str()),
            Some("ROCOF")
        );
        assert_eq!(configuration.analogs[0].label, "MW");
        assert_eq!(configuration.digitals[0].label, "Breakers");
        assert_eq!(configuration.capabilities(), Capabilities::all());
        assert_eq!(configuration.expected_sample_length(), 2 + 16 + 8 + 4 + 2);
    }

    #[test]
    fn test_minimal_definition() {
        let text = "FLAG,INT16U,S\nVPHM,FLOAT32,\nVPHA,FLOAT32,\nFREQ,FLOAT32,F\nDFDT,FLOAT32,R\n";
        let configuration = parse_etr("PMU", text, &DerivationDefaults::default()).unwrap();
        assert_eq!(configuration.phasors[0].label, "V1");
        assert_eq!(configuration.expected_sample_length(), 18);
    }

    #[test]
    fn test_grammar_violations() {
        let defaults = DerivationDefaults::default();
        let cases = [
            // FLAG missing
            "VPHM,FLOAT32,V\nVPHA,FLOAT32,V\nFREQ,FLOAT32,F\nDFDT,FLOAT32,R",
            // angle of the wrong kind
            "FLAG,INT16U,S\nVPHM,FLOAT32,V\nIPHA,FLOAT32,I\nFREQ,FLOAT32,F\nDFDT,FLOAT32,R",
            // no phasors
            "FLAG,INT16U,S\nFREQ,FLOAT32,F\nDFDT,FLOAT32,R",
            // wrong data type
            "FLAG,FLOAT32,S\nVPHM,FLOAT32,V\nVPHA,FLOAT32,V\nFREQ,FLOAT32,F\nDFDT,FLOAT32,R",
            // analog after digital
            "FLAG,INT16U,S\nVPHM,FLOAT32,V\nVPHA,FLOAT32,V\nFREQ,FLOAT32,F\nDFDT,FLOAT32,R\nDIGI,INT16U,D\nALOG,FLOAT32,A",
            // DFDT missing
            "FLAG,INT16U,S\nVPHM,FLOAT32,V\nVPHA,FLOAT32,V\nFREQ,FLOAT32,F",
            // unknown signal
            "FLAG,INT16U,S\nXXXX,FLOAT32,V",
            // too few fields
            "FLAG,INT16U",
        ];
        for text in cases {
            let result = parse_etr("PMU", text, &defaults);
            assert!(
                matches!(result, Err(ParseError::InvalidDerivedConfiguration { .. })),
                "Expected rejection of:\n{}",
                text
            );
        }
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_etr(
            "PMU",
            Path::new("/nonexistent/PMU.etr"),
            &DerivationDefaults::default(),
        );
        assert!(matches!(
            result,
            Err(ParseError::InvalidDerivedConfiguration { .. })
        ));
    }
}
