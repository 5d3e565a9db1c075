//! Benchmarks for layout resolution and compositing.

use adflow::compositor::compose;
use adflow::config::ChannelProfile;
use adflow::core::{Channel, FontSize, LayoutSpec, Region, RelativeBounds};
use adflow::layout::LayoutResolver;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{Rgba, RgbaImage};

fn layout() -> LayoutSpec {
    LayoutSpec::new()
        .with_region(Region::graphic(RelativeBounds::new(0.3, 0.78, 0.4, 0.1), "#00000099").with_z(1))
        .with_region(
            Region::text(RelativeBounds::new(0.1, 0.08, 0.8, 0.15), "TODAY ONLY 50% OFF")
                .with_z(2)
                .with_font_size(FontSize::Px(64)),
        )
        .with_region(Region::text(RelativeBounds::new(0.3, 0.78, 0.4, 0.1), "SEE NOW").with_z(3))
}

fn compositor_benchmark(c: &mut Criterion) {
    let profile = ChannelProfile::for_channel(Channel::Instagram);
    let (w, h) = profile.canvas();
    let background = RgbaImage::from_fn(w, h, |_, y| {
        let t = u8::try_from(y * 255 / h).unwrap_or(u8::MAX);
        Rgba([t, 120, 255 - t, 255])
    });
    let product = RgbaImage::from_pixel(w, h, Rgba([200, 40, 40, 128]));
    let spec = layout();
    let resolver = LayoutResolver::new(profile.font_scale);

    c.bench_function("resolve_layout", |b| {
        b.iter(|| resolver.resolve(black_box(&spec), w, h));
    });

    let resolved = resolver.resolve(&spec, w, h).expect("layout fits the canvas");
    c.bench_function("compose_instagram", |b| {
        b.iter(|| compose(black_box(&background), Some(&product), &resolved));
    });
}

criterion_group!(benches, compositor_benchmark);
criterion_main!(benches);
