use criterion::Criterion;
use libshadow::network::application::shadow::document::{desired_value, reported_document};
use std::hint::black_box;

const DOCUMENT: &str = r#"{"state":{"desired":{"mode":"eco","fan":3,"temp":72},"reported":{"temp":68}},"metadata":{"desired":{"temp":{"timestamp":1718000000}}},"version":12,"timestamp":1718000001}"#;

pub fn bench_desired_value(c: &mut Criterion) {
    c.bench_function("shadow_desired_value", |b| {
        b.iter(|| desired_value(black_box(DOCUMENT), black_box("temp")).unwrap())
    });
}

pub fn bench_reported_document(c: &mut Criterion) {
    c.bench_function("shadow_reported_document", |b| {
        b.iter(|| reported_document(black_box("temp"), black_box(72i32).into()).unwrap())
    });
}
