//! Benchmarks for the transaction packer
//!
//! Every placement attempt compiles a v0 message to measure it, so packing
//! cost grows with both the item count and the instructions per transaction.
//!
//! Benchmarks:
//! - Footprint measurement of a single framed transaction
//! - Packing loose instructions
//! - Packing a close batch

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};

use lockin_sweeper::config::PackingConfig;
use lockin_sweeper::tx_builder::{PackItem, TipConfig, TransactionPacker};

fn packer(payer: Pubkey) -> TransactionPacker {
    let tip = TipConfig {
        account: Pubkey::new_unique(),
        lamports: 10_000,
    };
    TransactionPacker::new(payer, &PackingConfig::default(), Some(tip))
}

fn swap_like(data_len: usize) -> Instruction {
    Instruction::new_with_bytes(
        Pubkey::new_unique(),
        &vec![1u8; data_len],
        (0..3).map(|_| AccountMeta::new(Pubkey::new_unique(), false)).collect(),
    )
}

fn bench_footprint(c: &mut Criterion) {
    let packer = packer(Pubkey::new_unique());
    let body: Vec<Instruction> = (0..6).map(|_| swap_like(80)).collect();

    c.bench_function("footprint_6_ix", |b| {
        b.iter(|| black_box(packer.footprint(black_box(&body), &[])))
    });
}

fn bench_pack_instructions(c: &mut Criterion) {
    let mut group = c.benchmark_group("pack_instructions");
    let packer = packer(Pubkey::new_unique());

    for count in [10usize, 50, 200] {
        let items: Vec<PackItem> = (0..count).map(|_| PackItem::Instruction(swap_like(60))).collect();
        group.bench_with_input(BenchmarkId::from_parameter(count), &items, |b, items| {
            b.iter(|| black_box(packer.pack(items.clone())))
        });
    }

    group.finish();
}

fn bench_pack_close_batch(c: &mut Criterion) {
    let owner = Pubkey::new_unique();
    let packer = packer(owner);
    let accounts: Vec<Pubkey> = (0..100).map(|_| Pubkey::new_unique()).collect();

    c.bench_function("pack_close_batch_100", |b| {
        b.iter(|| {
            black_box(packer.pack(vec![PackItem::CloseBatch {
                label: "close".to_string(),
                accounts: accounts.clone(),
                owner,
            }]))
        })
    });
}

criterion_group!(
    benches,
    bench_footprint,
    bench_pack_instructions,
    bench_pack_close_batch
);
criterion_main!(benches);
