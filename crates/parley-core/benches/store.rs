//! Message store benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use parley_core::MessageStore;
use parley_protocol::{ChatMessage, Timestamp};

fn history(len: i64) -> Vec<ChatMessage> {
    (0..len)
        .rev()
        .map(|t| ChatMessage::new("alice", format!("message {t}"), Timestamp::from_millis(t * 10)))
        .collect()
}

fn bench_load_history(c: &mut Criterion) {
    c.bench_function("load_history_50", |b| {
        let store = MessageStore::new();
        b.iter_batched(
            || history(50),
            |page| store.load_history(black_box(page)),
            BatchSize::SmallInput,
        )
    });
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");

    group.bench_function("in_order", |b| {
        b.iter_batched(
            || {
                let store = MessageStore::new();
                store.load_history(history(50));
                store
            },
            |store| store.append(ChatMessage::new("bob", "hi", Timestamp::from_millis(10_000))),
            BatchSize::SmallInput,
        )
    });

    group.bench_function("late", |b| {
        b.iter_batched(
            || {
                let store = MessageStore::new();
                store.load_history(history(50));
                store
            },
            |store| store.append(ChatMessage::new("bob", "late", Timestamp::from_millis(255))),
            BatchSize::SmallInput,
        )
    });

    group.bench_function("duplicate", |b| {
        let store = MessageStore::new();
        store.load_history(history(50));
        let dup = ChatMessage::new("alice", "message 7", Timestamp::from_millis(70));
        b.iter(|| store.append(black_box(dup.clone())))
    });

    group.finish();
}

criterion_group!(benches, bench_load_history, bench_append);
criterion_main!(benches);
