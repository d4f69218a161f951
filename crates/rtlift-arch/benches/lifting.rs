//! Benchmarks for decoding and lifting performance.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rtlift_arch::x86::{ProcessorMode, X86Architecture, X86Decoder};
use rtlift_arch::{lift_procedure, lift_procedures_parallel, LiftConfig, NullHost};
use rtlift_core::{Address, MemoryArea};

/// A small 32-bit function mixing stack, arithmetic and control flow.
const X86_32_CODE: &[u8] = &[
    0x55, // push ebp
    0x89, 0xE5, // mov ebp, esp
    0x83, 0xEC, 0x08, // sub esp, 8
    0x8B, 0x45, 0x08, // mov eax, [ebp+8]
    0x83, 0xC0, 0x01, // add eax, 1
    0x89, 0x45, 0xFC, // mov [ebp-4], eax
    0x83, 0xF8, 0x0A, // cmp eax, 10
    0x7E, 0x02, // jle +2
    0x31, 0xC0, // xor eax, eax
    0x53, // push ebx
    0x5E, // pop esi
    0x83, 0xC4, 0x08, // add esp, 8
    0x5D, // pop ebp
];

/// Larger code block for throughput testing (repeated pattern).
fn generate_block(size: usize) -> Vec<u8> {
    let mut result = Vec::with_capacity(size + 1);
    while result.len() < size {
        let remaining = size - result.len();
        result.extend_from_slice(&X86_32_CODE[..remaining.min(X86_32_CODE.len())]);
    }
    result.push(0xC3);
    result
}

fn bench_decoding(c: &mut Criterion) {
    let decoder = X86Decoder::new(ProcessorMode::Protected32);
    let mut group = c.benchmark_group("x86_decoding");

    group.bench_function("single_instruction", |b| {
        b.iter(|| {
            let _ = decoder.decode_instruction(black_box(&X86_32_CODE[3..6]), Address::ptr32(0x1000));
        })
    });

    group.finish();
}

fn bench_lifting(c: &mut Criterion) {
    let arch = X86Architecture::new(ProcessorMode::Protected32);
    let config = LiftConfig::default();
    let mut group = c.benchmark_group("x86_lifting");

    for size in [1024, 4096, 16384] {
        let mem = MemoryArea::new(Address::ptr32(0x1000), generate_block(size));
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("procedure", size), &mem, |b, mem| {
            b.iter(|| {
                let _ = lift_procedure(&arch, black_box(mem), mem.base, &NullHost, &config);
            })
        });
    }

    let mem = MemoryArea::new(Address::ptr32(0x1000), generate_block(16384));
    let entries: Vec<Address> = (0..64u64).map(|i| mem.base.wrapping_add(i * X86_32_CODE.len() as u64)).collect();
    group.bench_function("parallel_64_procedures", |b| {
        b.iter(|| {
            let _ = lift_procedures_parallel(&arch, black_box(&mem), &entries, &NullHost, &config);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_decoding, bench_lifting);
criterion_main!(benches);
