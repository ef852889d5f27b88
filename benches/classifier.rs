//! Classifier benchmarks

use bibrunner_core::{classify, classify_command, Command, CompiledPattern, CriticalCondition, LevelPattern, LevelPatterns};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn levels() -> LevelPatterns {
    LevelPatterns {
        warn: Some(LevelPattern::new(r"TEMP_(\d+)C", false).unwrap()),
        fail: Some(LevelPattern::new(r"ERROR|FAULT:\s*\w+", false).unwrap()),
        critical: Some(LevelPattern::new(r"OVERHEAT|SHORT_CIRCUIT", true).unwrap()),
    }
}

fn classify_benchmark(c: &mut Criterion) {
    let levels = levels();
    let mut group = c.benchmark_group("classify");

    group.bench_function("pass", |b| {
        b.iter(|| black_box(classify(black_box("PORT1:TEST_OK"), "PORT1:TEST_OK", &levels)));
    });

    group.bench_function("warn_with_capture", |b| {
        b.iter(|| black_box(classify(black_box("STATUS TEMP_87C"), "STATUS_OK", &levels)));
    });

    group.bench_function("critical", |b| {
        b.iter(|| black_box(classify(black_box("ERROR OVERHEAT detected"), "OK", &levels)));
    });

    group.finish();
}

fn command_benchmark(c: &mut Criterion) {
    let command = Command::new("TEST", "PORT1:TEST_OK").levels(levels());
    let conditions: Vec<CriticalCondition> = (0..8)
        .map(|i| CriticalCondition {
            name: format!("cond{i}"),
            pattern: CompiledPattern::new(&format!("^FATAL_{i}$")).unwrap(),
            trigger_hardware: i % 2 == 0,
        })
        .collect();

    let mut group = c.benchmark_group("classify_command");

    group.bench_function("no_conditions_hit", |b| {
        b.iter(|| black_box(classify_command(black_box("PORT1:TEST_OK"), &command, &conditions)));
    });

    group.bench_function("last_condition_hit", |b| {
        b.iter(|| black_box(classify_command(black_box("FATAL_7"), &command, &conditions)));
    });

    group.finish();
}

criterion_group!(benches, classify_benchmark, command_benchmark);
criterion_main!(benches);
