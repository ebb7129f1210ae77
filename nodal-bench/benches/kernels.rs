use criterion::{Criterion, black_box, criterion_group, criterion_main};
use nodal_core::bpe::{BpeEngine, MergeRule, MergeTable};
use nodal_core::kernels::{KernelFn, matmul, softmax};
use nodal_core::{KernelCall, Scalar, quant, simd};

fn f32_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn values(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| (i as f32) * 0.01 - (n as f32 * 0.005))
        .collect()
}

fn run(kernel: KernelFn, inputs: &[&[u8]], out: &mut [u32], scalars: &[Scalar]) {
    let out = bytemuck::cast_slice_mut::<u32, u8>(out);
    let mut call = KernelCall::build(inputs, vec![out], scalars).expect("call within ABI bounds");
    kernel(&mut call).expect("kernel failed");
}

fn bench_matmul(c: &mut Criterion) {
    let (m, n, k) = (8u32, 256u32, 256u32);
    let a = f32_bytes(&values((m * k) as usize));
    let b = f32_bytes(&values((k * n) as usize));
    let mut out = vec![0u32; (m * n) as usize];
    let dims = [Scalar::U32(m), Scalar::U32(n), Scalar::U32(k)];

    c.bench_function("matmul_f32 8x256x256 (generic)", |bch| {
        bch.iter(|| run(matmul::matmul_f32, &[black_box(&a[..]), &b[..]], &mut out, &dims))
    });
    c.bench_function("matmul_f32 8x256x256 (dispatch)", |bch| {
        bch.iter(|| {
            run(matmul::matmul_f32_accel, &[black_box(&a[..]), &b[..]], &mut out, &dims)
        })
    });

    let w = values((n * k) as usize);
    let (packed, scales) = quant::quantize(&w, 64).expect("quantize");
    let scales = f32_bytes(&scales);
    let nf4 = [Scalar::U32(m), Scalar::U32(n), Scalar::U32(k), Scalar::U32(64)];

    c.bench_function("matmul_nf4 8x256x256 (generic)", |bch| {
        bch.iter(|| {
            run(matmul::matmul_nf4, &[&a[..], black_box(&packed[..]), &scales[..]], &mut out, &nf4)
        })
    });
    c.bench_function("matmul_nf4 8x256x256 (dispatch)", |bch| {
        bch.iter(|| {
            let inputs = [&a[..], black_box(&packed[..]), &scales[..]];
            run(matmul::matmul_nf4_accel, &inputs, &mut out, &nf4)
        })
    });
}

fn bench_dot(c: &mut Criterion) {
    let a = values(4096);
    let b = values(4096);
    c.bench_function("dot_f32 4096 (scalar)", |bch| {
        bch.iter(|| simd::scalar::dot_f32(black_box(&a), black_box(&b)))
    });
    c.bench_function("dot_f32 4096 (dispatch)", |bch| {
        bch.iter(|| simd::dot_f32(black_box(&a), black_box(&b)))
    });
}

fn bench_softmax(c: &mut Criterion) {
    let logits = f32_bytes(&(0..32000).map(|i| (i as f32) * 0.001).collect::<Vec<_>>());
    let mut out = vec![0u32; 32000];
    c.bench_function("softmax_32k_vocab", |bch| {
        bch.iter(|| {
            run(softmax::softmax_f32, &[black_box(&logits[..])], &mut out, &[Scalar::U32(32000)])
        })
    });
}

fn bench_bpe(c: &mut Criterion) {
    let rules: Vec<MergeRule> = (0..26u32)
        .map(|i| MergeRule::new(b'a' as u32 + i, b'a' as u32 + (i + 1) % 26, i))
        .collect();
    let table = MergeTable::from_rules(rules).expect("valid rules");
    let text: Vec<u8> = (0..2048).map(|i| b'a' + (i % 26) as u8).collect();
    let engine = BpeEngine::new(&table);
    c.bench_function("bpe_encode 2k bytes", |bch| {
        bch.iter(|| engine.encode(black_box(&text)).expect("encode"))
    });
}

criterion_group!(benches, bench_matmul, bench_dot, bench_softmax, bench_bpe);
criterion_main!(benches);
