//! Criterion benchmarks for the INDI XML codec.
//!
//! Measures decoding of the three message shapes that dominate real
//! traffic (number updates, switch definitions, BLOB payloads) plus the
//! stream framer that sits in front of the decoder.
//!
//! Run with:
//! ```bash
//! cargo bench --package indi-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use indi_core::protocol::messages::{OneElement, SetVector};
use indi_core::{decode_message, encode_message, IndiMessage, MessageFramer, PropertyKind};

// ── Message fixtures ──────────────────────────────────────────────────────────

fn make_number_update() -> IndiMessage {
    let mut set = SetVector::new(PropertyKind::Number, "Telescope", "EQUATORIAL_EOD_COORD");
    set.state = Some("Busy".to_string());
    set.timestamp = Some("2024-05-01T10:00:00.000".to_string());
    set.elements.push(OneElement::new("RA", "5.5876"));
    set.elements.push(OneElement::new("DEC", "-5.3911"));
    IndiMessage::SetVector(set)
}

fn make_switch_definition() -> IndiMessage {
    let xml = r#"<defSwitchVector device="CCD" name="CCD_FRAME_TYPE" label="Frame" group="Image" state="Idle" perm="rw" rule="OneOfMany">
  <defSwitch name="FRAME_LIGHT" label="Light">On</defSwitch>
  <defSwitch name="FRAME_BIAS" label="Bias">Off</defSwitch>
  <defSwitch name="FRAME_DARK" label="Dark">Off</defSwitch>
  <defSwitch name="FRAME_FLAT" label="Flat">Off</defSwitch>
</defSwitchVector>"#;
    decode_message(xml).expect("fixture must decode")
}

/// A BLOB update with `size` bytes of payload, base64-encoded on the wire.
fn make_blob_update(size: usize) -> IndiMessage {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    let payload = vec![0x5Au8; size];
    let mut set = SetVector::new(PropertyKind::Blob, "CCD", "CCD1");
    set.state = Some("Ok".to_string());
    set.elements.push(OneElement {
        name: "CCD1".to_string(),
        value: BASE64.encode(&payload),
        size: Some(size.to_string()),
        format: Some(".fits".to_string()),
    });
    IndiMessage::SetVector(set)
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let fixtures = [
        ("NumberUpdate", make_number_update()),
        ("SwitchDefinition", make_switch_definition()),
        ("Blob64KiB", make_blob_update(64 * 1024)),
    ];
    for (name, message) in &fixtures {
        let xml = encode_message(message).expect("fixture must encode");
        group.bench_with_input(BenchmarkId::from_parameter(name), &xml, |b, xml| {
            b.iter(|| decode_message(black_box(xml)))
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let fixtures = [
        ("NumberUpdate", make_number_update()),
        ("SwitchDefinition", make_switch_definition()),
    ];
    for (name, message) in &fixtures {
        group.bench_with_input(BenchmarkId::from_parameter(name), message, |b, message| {
            b.iter(|| encode_message(black_box(message)))
        });
    }
    group.finish();
}

/// Frames a stream of 100 number updates delivered in 1 KiB chunks.
fn bench_framer(c: &mut Criterion) {
    let one = encode_message(&make_number_update()).expect("fixture must encode");
    let stream = one.repeat(100).into_bytes();

    c.bench_function("framer/100_updates_1KiB_chunks", |b| {
        b.iter(|| {
            let mut framer = MessageFramer::new();
            let mut count = 0;
            for chunk in stream.chunks(1024) {
                count += framer.push(black_box(chunk)).len();
            }
            count
        })
    });
}

criterion_group!(benches, bench_decode, bench_encode, bench_framer);
criterion_main!(benches);
