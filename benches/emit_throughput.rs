use aggregated_logging::{AggregationConfig, LogLevel, LogRecord, MemorySink, RealtimeAggregatingHandler};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::Arc;

fn mixed_records(count: usize) -> Vec<LogRecord> {
    (0..count)
        .map(|i| match i % 10 {
            0 => LogRecord::new(LogLevel::Info, "app.plot", format!("Adding line: F{i}")),
            1 => LogRecord::new(LogLevel::Info, "app.io", format!("Loading file batch_{i}.csv")),
            2 => LogRecord::new(
                LogLevel::Debug,
                "app.calc",
                format!("Coefficients [{}]", (0..16).map(|v| (v * i).to_string()).collect::<Vec<_>>().join(", ")),
            ),
            9 if i % 50 == 9 => LogRecord::new(LogLevel::Error, "app.io", format!("File not found: missing_{i}.csv")),
            _ => LogRecord::new(LogLevel::Info, "app", format!("Processed batch {i} of items")),
        })
        .collect()
}

fn bench_emit(c: &mut Criterion) {
    let records = mixed_records(1000);
    let mut group = c.benchmark_group("emit");

    for preset in ["production", "minimal"] {
        group.bench_function(preset, |b| {
            b.iter_batched(
                || {
                    let config = AggregationConfig::preset(preset).unwrap();
                    RealtimeAggregatingHandler::new(Arc::new(MemorySink::new()), config).unwrap()
                },
                |handler| {
                    for record in &records {
                        handler.emit(black_box(record));
                    }
                    handler.flush().unwrap();
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.bench_function("disabled", |b| {
        let handler = RealtimeAggregatingHandler::new(
            Arc::new(MemorySink::new()),
            AggregationConfig {
                enabled: false,
                ..AggregationConfig::default()
            },
        )
        .unwrap();
        b.iter(|| {
            for record in &records {
                handler.emit(black_box(record));
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_emit);
criterion_main!(benches);
