//! # IEC 61850-90-5 Sampled-Value Frames
//!
//! Decoding stages for synchrophasor sampled values carried either in the sync-byte
//! (0xAA) envelope or in the CLTP/session envelope of IEC 61850-90-5, together with the
//! configuration sources that give each sample block its meaning.
//!
//! ## Submodules
//!
//! - `common`: Shared types (`ParseError`, `FrameType`, `TimeQuality`, `SampleStatus`)
//!   and MSVID identity parsing.
//! - `tags`: Tag and BER length constants and the bounds-checked `TagCursor`.
//! - `signature`: HMAC-SHA256 and AES-CMAC signature verification of session frames.
//! - `header`: Decodes both envelopes into a common `FrameHeader`.
//! - `data_frame`: Walks the ASDU sequence and decodes sample blocks into cells.
//! - `config`: The `ResolvedConfiguration` layout of a stream and layout guessing.
//! - `config_frame`: CFG-1, CFG-2 and CFG-3 frames from sync-byte devices.
//! - `etr`: Parses ETR configuration files.
//! - `resolver`: Binds stream identities to configurations with a shared cache.
//! - `phasors`: Phasor value formats and conversions.
//! - `units`: PHUNIT, ANUNIT, DIGUNIT, FNOM and DATA_RATE words.
//! - `utils`: CRC-CCITT, timestamps and `UtcTime` decoding.
//! - `random`: Synthetic frames for tests and benchmarks.

pub mod common;
pub mod config;
pub mod config_frame;
pub mod data_frame;
pub mod etr;
pub mod header;
pub mod phasors;
pub mod random;
pub mod resolver;
pub mod signature;
pub mod tags;
pub mod units;
pub mod utils;
