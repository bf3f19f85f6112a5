use candle_core::Device;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{DynamicImage, GrayImage, Luma};
use sigver_core::{SignatureImage, IMAGE_HEIGHT, IMAGE_WIDTH};

fn scanned_page() -> DynamicImage {
    let gray = GrayImage::from_fn(900, 350, |x, y| Luma([((x * 7 + y * 3) % 256) as u8]));
    DynamicImage::ImageLuma8(gray)
}

fn bench_preprocess(c: &mut Criterion) {
    let page = scanned_page();
    c.bench_function("SignatureImage::from_dynamic_image (900x350)", |b| {
        b.iter(|| black_box(SignatureImage::from_dynamic_image(&page, IMAGE_HEIGHT, IMAGE_WIDTH)))
    });
}

fn bench_stack(c: &mut Criterion) {
    let images: Vec<SignatureImage> = (0..32)
        .map(|i| SignatureImage::filled(IMAGE_HEIGHT, IMAGE_WIDTH, i as f32 / 32.0))
        .collect();
    let refs: Vec<&SignatureImage> = images.iter().collect();
    c.bench_function("SignatureImage::stack (batch 32)", |b| {
        b.iter(|| SignatureImage::stack(black_box(&refs), &Device::Cpu).unwrap())
    });
}

criterion_group!(benches, bench_preprocess, bench_stack);
criterion_main!(benches);
