use criterion::{criterion_group, criterion_main, Criterion};

fn bench_spawn_wait(c: &mut Criterion) {
    c.bench_function("spawn_wait", |b| {
        b.iter(|| {
            let green = verdin::spawn(|| 1u32 + 1);
            green.wait().unwrap()
        })
    });

    c.bench_function("sleep_zero_yield", |b| {
        b.iter(|| verdin::sleep(std::time::Duration::ZERO))
    });
}

criterion_group!(benches, bench_spawn_wait);
criterion_main!(benches);
