//! # Decoder Options
//!
//! `DecoderOptions` holds the policy flags and defaults of a `Decoder`. Options can be
//! built in code, deserialized from JSON, or parsed from an openPDC-style connection
//! string of `key=value` pairs separated by semicolons:
//!
//! ```
//! use rtpa_sv_core::options::DecoderOptions;
//!
//! let options = DecoderOptions::from_connection_string(
//!     "guessConfiguration=true; useETRConfiguration=false; parseRedundantASDUs=true",
//! )
//! .unwrap();
//! assert!(options.guess_configuration);
//! assert!(!options.use_etr_configuration);
//! assert!(options.publish_redundant_samples);
//! ```

use std::path::PathBuf;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::iec61850_90_5::common::ParseError;
use crate::iec61850_90_5::config::{DerivationDefaults, DEFAULT_SAMPLE_RATE};
use crate::iec61850_90_5::resolver::ResolverPolicy;
use crate::iec61850_90_5::signature::DEFAULT_SIGNATURE_KEY;
use crate::iec61850_90_5::units::NominalFrequency;
use crate::iec61850_90_5::utils::DEFAULT_TIME_BASE;

/// Policy flags and defaults of a decoder.
///
/// # Fields
///
/// * `tolerate_signature_failures`: Log signature mismatches instead of failing the frame.
/// * `tolerate_sample_size_mismatch`: Decode (or skip) sample blocks whose length
///   differs from their configuration instead of failing the frame.
/// * `use_etr_configuration`: Look for an associated ETR file before guessing.
/// * `guess_configuration`: Infer a layout from the sample length as a last resort.
/// * `publish_redundant_samples`: Publish older redundant ASDUs as frames of their own.
/// * `signature_key`: Key for HMAC and AES-CMAC signature verification.
/// * `configuration_directory`: Directory searched for `<identity>.etr` files.
/// * `default_time_base`: Ticks per second used for fraction words.
/// * `default_sample_rate`: Sample rate of derived configurations when the stream
///   does not carry one.
/// * `nominal_frequency`: Nominal frequency of derived configurations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderOptions {
    pub tolerate_signature_failures: bool,
    pub tolerate_sample_size_mismatch: bool,
    pub use_etr_configuration: bool,
    pub guess_configuration: bool,
    pub publish_redundant_samples: bool,
    pub signature_key: String,
    pub configuration_directory: Option<PathBuf>,
    pub default_time_base: u32,
    pub default_sample_rate: u16,
    pub nominal_frequency: NominalFrequency,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        DecoderOptions {
            tolerate_signature_failures: false,
            tolerate_sample_size_mismatch: false,
            use_etr_configuration: true,
            guess_configuration: true,
            publish_redundant_samples: false,
            signature_key: String::from_utf8_lossy(DEFAULT_SIGNATURE_KEY).into_owned(),
            configuration_directory: None,
            default_time_base: DEFAULT_TIME_BASE,
            default_sample_rate: DEFAULT_SAMPLE_RATE,
            nominal_frequency: NominalFrequency::Hz60,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ParseError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(ParseError::InvalidOption {
            message: format!("{} expects a boolean, got '{}'", key, value),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ParseError> {
    value.parse::<T>().map_err(|_| ParseError::InvalidOption {
        message: format!("{} expects a number, got '{}'", key, value),
    })
}

impl DecoderOptions {
    /// Parses a connection string such as
    /// `"guessConfiguration=true; useETRConfiguration=false"`.
    ///
    /// Keys are case-insensitive. Unknown keys are ignored, since connection strings
    /// usually carry transport settings as well.
    ///
    /// # Returns
    ///
    /// * `Ok(DecoderOptions)`: Defaults overridden by the recognized keys.
    /// * `Err(ParseError::InvalidOption)`: A malformed pair or value.
    pub fn from_connection_string(connection_string: &str) -> Result<Self, ParseError> {
        let mut options = DecoderOptions::default();
        options.apply_connection_string(connection_string)?;
        Ok(options)
    }

    /// Overrides the fields named in `connection_string`.
    pub fn apply_connection_string(&mut self, connection_string: &str) -> Result<(), ParseError> {
        for pair in connection_string.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').ok_or_else(|| ParseError::InvalidOption {
                message: format!("Expected key=value, got '{}'", pair),
            })?;
            let key = key.trim();
            let value = value.trim();

            match key.to_ascii_lowercase().as_str() {
                "ignoresignaturevalidationfailures" | "toleratesignaturefailures" => {
                    self.tolerate_signature_failures = parse_bool(key, value)?
                }
                "ignoresamplesizevalidationfailures" | "toleratesamplesizemismatch" => {
                    self.tolerate_sample_size_mismatch = parse_bool(key, value)?
                }
                "useetrconfiguration" => self.use_etr_configuration = parse_bool(key, value)?,
                "guessconfiguration" => self.guess_configuration = parse_bool(key, value)?,
                "parseredundantasdus" | "publishredundantsamples" => {
                    self.publish_redundant_samples = parse_bool(key, value)?
                }
                "signaturekey" => self.signature_key = value.to_string(),
                "configurationdirectory" => {
                    self.configuration_directory = Some(PathBuf::from(value))
                }
                "timebase" => self.default_time_base = parse_number(key, value)?,
                "samplerate" | "framespersecond" => {
                    self.default_sample_rate = parse_number(key, value)?
                }
                "nominalfrequency" => {
                    let hz: f32 = parse_number(key, value)?;
                    self.nominal_frequency = NominalFrequency::from_hertz(hz)?;
                }
                _ => debug!("Ignoring connection string key '{}'", key),
            }
        }
        self.validate()
    }

    /// Parses options from JSON; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ParseError> {
        let options: DecoderOptions =
            serde_json::from_str(json).map_err(|e| ParseError::InvalidOption {
                message: format!("Invalid options JSON: {}", e),
            })?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ParseError> {
        if self.default_time_base == 0 {
            return Err(ParseError::InvalidOption {
                message: "Time base must be greater than zero".to_string(),
            });
        }
        if self.default_sample_rate == 0 {
            return Err(ParseError::InvalidOption {
                message: "Sample rate must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn derivation_defaults(&self) -> DerivationDefaults {
        DerivationDefaults {
            time_base: self.default_time_base,
            sample_rate: self.default_sample_rate,
            nominal_frequency: self.nominal_frequency,
        }
    }

    pub fn resolver_policy(&self) -> ResolverPolicy {
        ResolverPolicy {
            use_etr_configuration: self.use_etr_configuration,
            guess_configuration: self.guess_configuration,
            defaults: self.derivation_defaults(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = DecoderOptions::default();
        assert!(options.guess_configuration);
        assert!(options.use_etr_configuration);
        assert!(!options.publish_redundant_samples);
        assert_eq!(options.default_time_base, 1 << 24);
        assert_eq!(options.signature_key.len(), 16);
    }

    #[test]
    fn test_connection_string() {
        let options = DecoderOptions::from_connection_string(
            "IgnoreSignatureValidationFailures=yes; ignoreSampleSizeValidationFailures=1;\
             configurationDirectory=/var/etr; nominalFrequency=50; sampleRate=60; port=4712",
        )
        .unwrap();
        assert!(options.tolerate_signature_failures);
        assert!(options.tolerate_sample_size_mismatch);
        assert_eq!(
            options.configuration_directory,
            Some(PathBuf::from("/var/etr"))
        );
        assert_eq!(options.nominal_frequency, NominalFrequency::Hz50);
        assert_eq!(options.default_sample_rate, 60);
    }

    #[test]
    fn test_connection_string_errors() {
        for text in [
            "guessConfiguration=maybe",
            "timeBase=fast",
            "guessConfiguration",
            "timeBase=0",
            "nominalFrequency=55",
        ] {
            assert!(
                matches!(
                    DecoderOptions::from_connection_string(text),
                    Err(ParseError::InvalidOption { .. })
                ),
                "{}",
                text
            );
        }
    }

    #[test]
    fn test_json_options() {
        let options =
            DecoderOptions::from_json(r#"{"publish_redundant_samples": true, "default_sample_rate": 60}"#)
                .unwrap();
        assert!(options.publish_redundant_samples);
        assert_eq!(options.default_sample_rate, 60);
        assert!(options.guess_configuration);

        let json = serde_json::to_string(&options).unwrap();
        assert_eq!(DecoderOptions::from_json(&json).unwrap(), options);

        assert!(DecoderOptions::from_json("{not json").is_err());
    }
}
