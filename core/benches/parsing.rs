use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rtpa_sv_core::iec61850_90_5::config::ResolvedConfiguration;
use rtpa_sv_core::iec61850_90_5::data_frame::DataFrame;
use rtpa_sv_core::iec61850_90_5::header::{FrameHeader, HeaderContext};
use rtpa_sv_core::iec61850_90_5::random::random_session_frame;
use rtpa_sv_core::iec61850_90_5::signature::{SignatureAlgorithm, DEFAULT_SIGNATURE_KEY};
use rtpa_sv_core::{Decoder, DecoderOptions, FramePublisher};
use std::sync::Arc;

struct DiscardPublisher;

impl FramePublisher for DiscardPublisher {
    fn publish_frame(&self, frame: DataFrame) {
        black_box(frame);
    }

    fn publish_configuration(&self, configuration: Arc<ResolvedConfiguration>) {
        black_box(configuration);
    }
}

fn frames(count: usize, algorithm: SignatureAlgorithm) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(2024);
    (0..count)
        .map(|i| {
            let identity = format!("{}_PMU{}", i % 8, i % 8);
            random_session_frame(&mut rng, &identity, 2, 6, algorithm, DEFAULT_SIGNATURE_KEY)
                .unwrap()
        })
        .collect()
}

fn benchmark_header(c: &mut Criterion) {
    let frame = frames(1, SignatureAlgorithm::HmacSha256_256).remove(0);
    let ctx = HeaderContext::default();

    c.bench_function("decode_signed_header", |b| {
        b.iter(|| FrameHeader::decode(black_box(&frame), 0, frame.len(), &ctx).unwrap());
    });
}

fn benchmark_decode(c: &mut Criterion) {
    let options = DecoderOptions {
        publish_redundant_samples: true,
        ..DecoderOptions::default()
    };
    let decoder = Decoder::new(options, Arc::new(DiscardPublisher));
    let unsigned = frames(1, SignatureAlgorithm::None).remove(0);
    let signed = frames(1, SignatureAlgorithm::Aes128).remove(0);

    c.bench_function("decode_unsigned_frame", |b| {
        b.iter(|| decoder.decode(black_box(&unsigned), 0, unsigned.len()).unwrap());
    });
    c.bench_function("decode_aes128_frame", |b| {
        b.iter(|| decoder.decode(black_box(&signed), 0, signed.len()).unwrap());
    });
}

fn benchmark_batch(c: &mut Criterion) {
    let decoder = Decoder::new(DecoderOptions::default(), Arc::new(DiscardPublisher));
    let batch = frames(10_000, SignatureAlgorithm::HmacSha256_80);

    c.bench_function("decode_batch_10000", |b| {
        b.iter(|| Decoder::summarize(&decoder.decode_batch(black_box(&batch))));
    });
}

criterion_group!(benches, benchmark_header, benchmark_decode, benchmark_batch);
criterion_main!(benches);
