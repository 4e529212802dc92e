use std::hint::black_box;

use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use kvspool::spool::record;
use kvspool::{Options, Record, SpoolReader, SpoolWriter, SyncPolicy};

fn sample(i: usize) -> Record {
    Record::new()
        .with("seq", i.to_string())
        .with("host", "web-01")
        .with("msg", "request served in 12ms")
}

fn codec(c: &mut Criterion) {
    let record = sample(7);
    let encoded = record::encode(&record).unwrap();

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("encode", |b| b.iter(|| record::encode(black_box(&record))));
    group.bench_function("decode", |b| b.iter(|| record::decode(black_box(&encoded))));
    group.finish();
}

fn write_read(c: &mut Criterion) {
    const N: usize = 1_000;
    let records: Vec<Record> = (0..N).map(sample).collect();
    let options = Options::default()
        .with_sync_policy(SyncPolicy::EveryNWrites(N))
        .with_max_segment_records(250);

    let mut group = c.benchmark_group("spool");
    group.throughput(Throughput::Elements(N as u64));

    group.bench_function("write_1k", |b| {
        b.iter_batched(
            || tempfile::tempdir().unwrap(),
            |dir| {
                let mut writer = SpoolWriter::open(dir.path(), options.clone()).unwrap();
                for r in &records {
                    writer.write(r).unwrap();
                }
                dir
            },
            BatchSize::PerIteration,
        )
    });

    group.bench_function("read_1k", |b| {
        b.iter_batched(
            || {
                let dir = tempfile::tempdir().unwrap();
                let mut writer = SpoolWriter::open(dir.path(), options.clone()).unwrap();
                writer.write_batch(&records).unwrap();
                dir
            },
            |dir| {
                let reader = SpoolReader::open(dir.path(), options.clone()).unwrap();
                assert_eq!(reader.count(), N);
                dir
            },
            BatchSize::PerIteration,
        )
    });
    group.finish();
}

criterion_group!(benches, codec, write_read);
criterion_main!(benches);
