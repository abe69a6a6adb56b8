use criterion::{black_box, criterion_group, criterion_main, Criterion};
use parley::{parse_request, parse_service_frame};

fn bench_parse_service(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    group.bench_function("service_frames", |b| {
        b.iter(|| {
            for frame in [
                "\\help\n",
                "\\nickname alice\n",
                "\\private bob a somewhat longer private message body\n",
                "\\quit\n",
                "not a command at all, just chat\n",
            ] {
                let _ = black_box(parse_service_frame(black_box(frame)));
            }
        });
    });
    group.bench_function("register_requests", |b| {
        b.iter(|| {
            for line in [
                "REGISTER username=John Smith; email=john.smith@somewhere.com",
                "GET username=John Smith",
                "REGISTER malformed",
            ] {
                let _ = black_box(parse_request(black_box(line)));
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_parse_service);
criterion_main!(benches);
