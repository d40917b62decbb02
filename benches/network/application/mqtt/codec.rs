use criterion::{Criterion, Throughput};
use heapless::Vec;
use libshadow::network::application::mqtt::codec::{self, Publish, QoS};
use libshadow::network::application::mqtt::MQTT_BUFFER_SIZE;
use std::hint::black_box;

const TOPIC: &str = "$aws/things/pump-7/shadow/update";
const PAYLOAD: &[u8] = br#"{"state":{"reported":{"temp":72,"status":"ok","online":true}}}"#;

pub fn bench_encode_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("mqtt_codec");
    group.throughput(Throughput::Bytes(PAYLOAD.len() as u64));

    let mut buf: Vec<u8, MQTT_BUFFER_SIZE> = Vec::new();
    group.bench_function("encode_publish_qos0", |b| {
        b.iter(|| {
            let publish = Publish {
                topic: black_box(TOPIC),
                payload: black_box(PAYLOAD),
                qos: QoS::AtMostOnce,
                packet_id: None,
                dup: false,
                retain: false,
            };
            codec::encode_publish(&mut buf, &publish).unwrap();
            black_box(buf.len())
        })
    });
    group.finish();
}

pub fn bench_decode_publish(c: &mut Criterion) {
    let mut buf: Vec<u8, MQTT_BUFFER_SIZE> = Vec::new();
    let publish = Publish {
        topic: TOPIC,
        payload: PAYLOAD,
        qos: QoS::AtLeastOnce,
        packet_id: Some(42),
        dup: false,
        retain: false,
    };
    codec::encode_publish(&mut buf, &publish).unwrap();
    // one byte of header, one byte of remaining length
    let header = buf[0];
    let body = &buf[2..];

    let mut group = c.benchmark_group("mqtt_codec");
    group.throughput(Throughput::Bytes(body.len() as u64));
    group.bench_function("decode_publish_qos1", |b| {
        b.iter(|| codec::decode(black_box(header), black_box(body)).unwrap())
    });
    group.finish();
}
