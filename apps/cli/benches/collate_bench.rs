//! Benchmarks for batching and argument parsing.

use clap::Parser;
use criterion::{Criterion, criterion_group, criterion_main};
use folio_training::{DataCollator, DocFeatures, Padding, PretrainArgs};
use std::hint::black_box;

fn features(n: usize) -> Vec<DocFeatures> {
    (0..n)
        .map(|i| {
            let len = 64 + (i * 37) % 400;
            DocFeatures {
                input_ids: (0..len as u32).collect(),
                bbox: vec![[0.1, 0.2, 0.3, 0.4]; len],
                labels: (0..(len / 4) as u32).collect(),
                image: None,
            }
        })
        .collect()
}

fn bench_collate(c: &mut Criterion) {
    let batch = features(32);
    for padding in [Padding::Longest, Padding::MaxLength] {
        let collator = DataCollator::new(padding, 512, 128, 0);
        c.bench_function(format!("collate_32_{padding}").as_str(), |b| {
            b.iter(|| black_box(collator.collate(black_box(&batch))));
        });
    }
}

fn bench_json_config(c: &mut Criterion) {
    let config = r#"{
        "model_name_or_path": "pretrained",
        "data_dir": "data",
        "output_dir": "out",
        "do_train": true,
        "do_selfsupervised": true,
        "max_seq_length": 1024
    }"#;
    c.bench_function("parse_json_config", |b| {
        b.iter(|| black_box(PretrainArgs::from_json_str(black_box(config)).unwrap()));
    });
    c.bench_function("parse_flags", |b| {
        b.iter(|| {
            black_box(
                PretrainArgs::try_parse_from([
                    "folio-pretrain",
                    "--model_name_or_path",
                    "pretrained",
                    "--data_dir",
                    "data",
                    "--output_dir",
                    "out",
                ])
                .unwrap(),
            )
        });
    });
}

criterion_group!(collate_benches, bench_collate, bench_json_config);
criterion_main!(collate_benches);
