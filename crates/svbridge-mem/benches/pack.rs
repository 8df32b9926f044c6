use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use svbridge_mem::{pack, unpack, BufferShape, ElementWidth};

fn criterion_config() -> Criterion {
    match std::env::var("SVBRIDGE_BENCH_PROFILE").as_deref() {
        Ok("ci") => Criterion::default()
            // Keep PR runtime low.
            .warm_up_time(Duration::from_millis(150))
            .measurement_time(Duration::from_millis(400))
            .sample_size(20)
            .noise_threshold(0.05),
        _ => Criterion::default()
            .warm_up_time(Duration::from_secs(1))
            .measurement_time(Duration::from_secs(2))
            .sample_size(50)
            .noise_threshold(0.03),
    }
}

fn bench_pack_strided_frame(c: &mut Criterion) {
    // 64x64 luma block stored inside a 96-wide frame.
    const WIDTH: usize = 64;
    const HEIGHT: usize = 64;
    const STRIDE: usize = 96;

    let src: Vec<u8> = (0..STRIDE * HEIGHT).map(|i| i as u8).collect();
    let shape = BufferShape::grid(WIDTH, HEIGHT, STRIDE, ElementWidth::Byte);

    let mut group = c.benchmark_group("pack");
    group.throughput(Throughput::Bytes(shape.packed_len() as u64));
    group.bench_function("u8_64x64_strided", |b| {
        b.iter(|| pack(black_box(&src[..]), black_box(&shape)).unwrap())
    });

    let words = pack(&src[..], &shape).unwrap();
    let mut dst = vec![0u8; src.len()];
    group.bench_function("u8_64x64_unpack", |b| {
        b.iter(|| unpack(black_box(&words), black_box(&shape), &mut dst[..]).unwrap())
    });
    group.finish();
}

fn bench_pack_i16_block(c: &mut Criterion) {
    let src: Vec<i16> = (0..256).map(|i| (i * 37 - 4000) as i16).collect();
    let shape = BufferShape::linear(256, ElementWidth::Half);

    let mut group = c.benchmark_group("pack");
    group.throughput(Throughput::Bytes(shape.packed_len() as u64));
    group.bench_function("i16_256_linear", |b| {
        b.iter(|| pack(black_box(&src[..]), black_box(&shape)).unwrap())
    });
    group.finish();
}

criterion_group! {
    name = benches;
    config = criterion_config();
    targets = bench_pack_strided_frame, bench_pack_i16_block
}
criterion_main!(benches);
