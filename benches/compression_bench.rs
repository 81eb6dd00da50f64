use bararc::compress::{encoder, ByteAlgorithm};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn pull_all(c: &mut dyn bararc::compress::ByteCompressor) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = c.pull(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}

fn bench_compression(c: &mut Criterion) {
    let data = vec![0u8; 1024 * 1024];

    c.bench_function("zstd_compress_1mb", |b| {
        b.iter(|| {
            let mut enc = encoder(ByteAlgorithm::Zstd, 3);
            enc.push(black_box(&data)).unwrap();
            enc.finish().unwrap();
            pull_all(enc.as_mut())
        })
    });

    c.bench_function("lz4_compress_1mb", |b| {
        b.iter(|| {
            let mut enc = encoder(ByteAlgorithm::Lz4, 0);
            enc.push(black_box(&data)).unwrap();
            enc.finish().unwrap();
            pull_all(enc.as_mut())
        })
    });
}

criterion_group!(benches, bench_compression);
criterion_main!(benches);
