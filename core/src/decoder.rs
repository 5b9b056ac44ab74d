//! # Sampled-Value Decoder
//!
//! `Decoder` ties the frame stages together: it decodes the header, routes
//! configuration frames to the resolver, walks the ASDUs of data frames, and hands the
//! results to an injected `FramePublisher`. Configurations are always published before
//! the first frame that uses them, and redundant frames are published oldest first.
//!
//! A decoder is `Send + Sync`; `decode_batch` decodes independent datagrams in parallel
//! on the rayon thread pool, so publishers receive calls from worker threads.

use std::cell::Cell;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;

use crate::iec61850_90_5::common::{FrameType, ParseError};
use crate::iec61850_90_5::config::ResolvedConfiguration;
use crate::iec61850_90_5::config_frame::ConfigurationFrame;
use crate::iec61850_90_5::data_frame::{decode_asdus, AsduContext, DataFrame};
use crate::iec61850_90_5::header::{FrameHeader, HeaderContext};
use crate::iec61850_90_5::resolver::{ConfigurationResolver, ConfigurationSink, DirectoryLocator};
use crate::iec61850_90_5::tags::CHECKSUM_LENGTH;
use crate::options::DecoderOptions;

/// Receives the output of a decoder.
pub trait FramePublisher: Send + Sync {
    fn publish_frame(&self, frame: DataFrame);
    fn publish_configuration(&self, configuration: Arc<ResolvedConfiguration>);
}

/// Everything a decoder publishes, in publication order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum DecodeEvent {
    Configuration(Arc<ResolvedConfiguration>),
    Frame(DataFrame),
}

/// Forwards published items over a channel.
pub struct ChannelPublisher {
    sender: Mutex<Sender<DecodeEvent>>,
}

impl ChannelPublisher {
    pub fn new(sender: Sender<DecodeEvent>) -> Self {
        ChannelPublisher {
            sender: Mutex::new(sender),
        }
    }

    fn send(&self, event: DecodeEvent) {
        if self.sender.lock().send(event).is_err() {
            debug!("Decode event receiver dropped");
        }
    }
}

impl FramePublisher for ChannelPublisher {
    fn publish_frame(&self, frame: DataFrame) {
        self.send(DecodeEvent::Frame(frame));
    }

    fn publish_configuration(&self, configuration: Arc<ResolvedConfiguration>) {
        self.send(DecodeEvent::Configuration(configuration));
    }
}

/// Counts of what one decode call produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecodeSummary {
    pub bytes_consumed: usize,
    pub frames_published: usize,
    pub cells_published: usize,
    pub configurations_published: usize,
}

impl DecodeSummary {
    fn merge(mut self, other: DecodeSummary) -> Self {
        self.bytes_consumed += other.bytes_consumed;
        self.frames_published += other.frames_published;
        self.cells_published += other.cells_published;
        self.configurations_published += other.configurations_published;
        self
    }
}

/// Adapts a publisher to the resolver's sink and counts configurations.
struct PublisherSink<'a> {
    publisher: &'a dyn FramePublisher,
    published: Cell<usize>,
}

impl ConfigurationSink for PublisherSink<'_> {
    fn configuration_resolved(&self, configuration: Arc<ResolvedConfiguration>) {
        self.published.set(self.published.get() + 1);
        self.publisher.publish_configuration(configuration);
    }
}

pub struct Decoder {
    options: DecoderOptions,
    resolver: Arc<ConfigurationResolver>,
    publisher: Arc<dyn FramePublisher>,
}

impl Decoder {
    /// Creates a decoder with its own resolver. ETR files are looked up in
    /// `options.configuration_directory` when one is set.
    pub fn new(options: DecoderOptions, publisher: Arc<dyn FramePublisher>) -> Self {
        let mut resolver = ConfigurationResolver::new(options.resolver_policy());
        if let Some(directory) = &options.configuration_directory {
            resolver = resolver.with_locator(Arc::new(DirectoryLocator::new(directory.clone())));
        }
        Self::with_resolver(options, Arc::new(resolver), publisher)
    }

    /// Creates a decoder sharing `resolver` (and its cache) with other decoders.
    pub fn with_resolver(
        options: DecoderOptions,
        resolver: Arc<ConfigurationResolver>,
        publisher: Arc<dyn FramePublisher>,
    ) -> Self {
        Decoder {
            options,
            resolver,
            publisher,
        }
    }

    pub fn options(&self) -> &DecoderOptions {
        &self.options
    }

    pub fn resolver(&self) -> &Arc<ConfigurationResolver> {
        &self.resolver
    }

    /// Decodes the frame at `buffer[start..start + length]`.
    pub fn decode(
        &self,
        buffer: &[u8],
        start: usize,
        length: usize,
    ) -> Result<DecodeSummary, ParseError> {
        self.decode_with(buffer, start, length, None)
    }

    /// Decodes a frame, offering `supplied` as the configuration of its stream. The
    /// header's fraction word is read in the supplied configuration's time base.
    ///
    /// # Returns
    ///
    /// * `Ok(DecodeSummary)`: What was published; `bytes_consumed` is the frame length.
    /// * `Err(ParseError)`: The frame was abandoned. Nothing from the failing data frame
    ///   is published, though configurations resolved before the failure are.
    pub fn decode_with(
        &self,
        buffer: &[u8],
        start: usize,
        length: usize,
        supplied: Option<&ResolvedConfiguration>,
    ) -> Result<DecodeSummary, ParseError> {
        self.decode_frame(buffer, start, length, supplied)
            .inspect_err(|e| warn!("Frame at offset {} rejected: {}", start, e))
    }

    fn decode_frame(
        &self,
        buffer: &[u8],
        start: usize,
        length: usize,
        supplied: Option<&ResolvedConfiguration>,
    ) -> Result<DecodeSummary, ParseError> {
        // A known configuration fixes the time base of the fraction word.
        let header_ctx = HeaderContext {
            time_base: supplied.map_or(self.options.default_time_base, |c| c.time_base),
            signature_key: self.options.signature_key.as_bytes(),
            tolerate_signature_failures: self.options.tolerate_signature_failures,
        };
        let mut header = FrameHeader::decode(buffer, start, length, &header_ctx)?;
        let sink = PublisherSink {
            publisher: self.publisher.as_ref(),
            published: Cell::new(0),
        };

        let mut summary = DecodeSummary {
            bytes_consumed: header.frame_length,
            ..DecodeSummary::default()
        };

        match header.frame_type {
            FrameType::Data => {
                let ctx = AsduContext {
                    resolver: &self.resolver,
                    sink: &sink,
                    supplied,
                    tolerate_sample_size_mismatch: self.options.tolerate_sample_size_mismatch,
                    publish_redundant_samples: self.options.publish_redundant_samples,
                };
                let decoded = decode_asdus(buffer, start, &mut header, &ctx)?;
                summary.bytes_consumed = decoded.bytes_consumed;
                for frame in decoded.frames {
                    summary.frames_published += 1;
                    summary.cells_published += frame.cells.len();
                    self.publisher.publish_frame(frame);
                }
            }
            frame_type if frame_type.is_configuration() => {
                let body_start = start + header.header_length;
                let body_end = start + header.frame_length - CHECKSUM_LENGTH;
                let frame = ConfigurationFrame::parse(
                    &buffer[body_start..body_end],
                    frame_type,
                    &self.options.derivation_defaults(),
                )?;
                for configuration in frame.configurations {
                    self.resolver.register(configuration, &sink);
                }
            }
            other => debug!("Skipping {} at offset {}", other, start),
        }

        summary.configurations_published = sink.published.get();
        Ok(summary)
    }

    /// Decodes independent datagrams in parallel.
    ///
    /// Results are returned in input order; publication order across datagrams is not
    /// defined.
    pub fn decode_batch<B>(&self, datagrams: &[B]) -> Vec<Result<DecodeSummary, ParseError>>
    where
        B: AsRef<[u8]> + Sync,
    {
        datagrams
            .par_iter()
            .map(|datagram| {
                let bytes = datagram.as_ref();
                self.decode(bytes, 0, bytes.len())
            })
            .collect()
    }

    /// Sums the successful results of `decode_batch`.
    pub fn summarize(results: &[Result<DecodeSummary, ParseError>]) -> DecodeSummary {
        results
            .iter()
            .filter_map(|result| result.as_ref().ok())
            .fold(DecodeSummary::default(), |total, summary| total.merge(*summary))
    }
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("options", &self.options)
            .field("resolver", &self.resolver)
            .finish()
    }
}
