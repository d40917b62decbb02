use criterion::{criterion_group, criterion_main};

mod network;

criterion_group!(
    benches,
    network::application::mqtt::codec::bench_encode_publish,
    network::application::mqtt::codec::bench_decode_publish,
    network::application::shadow::bench_desired_value,
    network::application::shadow::bench_reported_document
);
criterion_main!(benches);
