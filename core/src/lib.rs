//! # Synchrophasor Sampled-Value Decoding
//!
//! This crate decodes IEC 61850-90-5 synchrophasor sampled-value traffic for phasor data
//! concentration. It accepts frames in the 0xAA sync-byte envelope and in the
//! CLTP/session envelope, verifies session signatures, walks the ASDU sequence of each
//! frame (republishing redundant samples on request), and binds every sample block to a
//! configuration taken from a configuration frame, a supplied layout, an ETR file, or a
//! guess from the block length.
//!
//! ## Submodules
//!
//! - `iec61850_90_5`: Frame stages and configuration sources.
//!   - `header`: Envelope and session header decoding.
//!   - `data_frame`: ASDU and sample block decoding.
//!   - `resolver`: Configuration cache and resolution order.
//!   - `etr`, `config_frame`: Configuration sources.
//!   - `random`: Synthetic frames for testing.
//! - `decoder`: `Decoder`, which runs the stages and publishes frames and configurations.
//! - `options`: `DecoderOptions`, including connection string parsing.
//!
//! ## Usage
//!
//! Create a `Decoder` with options and a `FramePublisher`, then feed it datagrams with
//! `decode` or, for independent datagrams, `decode_batch`. Resolved configurations are
//! published before the first frame that uses them.

pub mod decoder;
pub mod iec61850_90_5;
pub mod options;

pub use decoder::{ChannelPublisher, DecodeEvent, DecodeSummary, Decoder, FramePublisher};
pub use iec61850_90_5::common::ParseError;
pub use options::DecoderOptions;
