//! Fill, commit and random-read throughput
//!
//! Run: cargo bench --bench fill_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tuplestore_core::page::CodecId;
use tuplestore_core::{
    Entry, Field, FieldSelection, Model, PrimitiveKind, ReadOptions, Reader, Value, WriteOptions,
    Writer,
};

fn event_model() -> Model {
    Model::builder()
        .scalar("id", PrimitiveKind::UInt64)
        .field(
            "tracks",
            Field::sequence(Field::record([
                ("pt", Field::scalar(PrimitiveKind::Float32)),
                ("eta", Field::scalar(PrimitiveKind::Float32)),
                ("charge", Field::scalar(PrimitiveKind::Int8)),
            ])),
        )
        .field("label", Field::Text)
        .build()
        .unwrap()
}

fn event(i: u64) -> Entry {
    let tracks = (0..i % 8)
        .map(|t| {
            Value::Record(vec![
                Value::Float32(t as f32 * 1.5),
                Value::Float32(-(t as f32) * 0.1),
                Value::Int8(if t % 2 == 0 { 1 } else { -1 }),
            ])
        })
        .collect();
    Entry::new()
        .with("id", i)
        .with("tracks", Value::Sequence(tracks))
        .with("label", format!("event-{}", i % 100))
}

fn write(entries: &[Entry], options: WriteOptions) -> Vec<u8> {
    let mut writer = Writer::create(event_model(), Vec::new(), options).unwrap();
    for entry in entries {
        writer.fill(entry).unwrap();
    }
    writer.close().unwrap();
    writer.into_inner()
}

fn bench_fill(c: &mut Criterion) {
    let entries: Vec<Entry> = (0..20_000).map(event).collect();
    let mut group = c.benchmark_group("fill");
    group.throughput(Throughput::Elements(entries.len() as u64));

    for (name, codec) in [("lz4", CodecId::Lz4), ("none", CodecId::None)] {
        let options = WriteOptions::default().with_cluster_rows(5_000).with_codec(codec);
        group.bench_with_input(BenchmarkId::new("codec", name), &options, |b, options| {
            b.iter(|| black_box(write(&entries, options.clone())))
        });
    }

    for workers in [1, 4] {
        let options = WriteOptions::default().with_cluster_rows(5_000).with_workers(workers);
        group.bench_with_input(BenchmarkId::new("workers", workers), &options, |b, options| {
            b.iter(|| black_box(write(&entries, options.clone())))
        });
    }

    group.finish();
}

fn bench_get_entry(c: &mut Criterion) {
    let entries: Vec<Entry> = (0..20_000).map(event).collect();
    let bytes = write(&entries, WriteOptions::default().with_cluster_rows(5_000));
    let reader = Reader::open(bytes, ReadOptions::default()).unwrap();
    let only_id = FieldSelection::only(["id"]);

    c.bench_function("get_entry/all", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 7_919) % 20_000;
            black_box(reader.get_entry(i, &FieldSelection::All).unwrap())
        })
    });

    c.bench_function("get_entry/id_only", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 7_919) % 20_000;
            black_box(reader.get_entry(i, &only_id).unwrap())
        })
    });
}

criterion_group!(benches, bench_fill, bench_get_entry);
criterion_main!(benches);
