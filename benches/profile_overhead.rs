//! Criterion benchmarks: cost of a forward+backward pass with and without memory hooks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use memprofile_oxidized::{
    flatten_model, simple_model_seeded, CrossEntropyLoss, DType, DeviceConfig, HookRegistry,
    Module, ProfilingSession, SimpleModelConfig, SimulatedDevice, Tensor,
};

const BATCH: usize = 16;

fn bench_pass(c: &mut Criterion) {
    let device = SimulatedDevice::new(DeviceConfig::default());
    let config = SimpleModelConfig::default().with_activations(true);
    let mut model = simple_model_seeded(&device, &config, 0).unwrap();
    let x = Tensor::zeros(&device, &[BATCH, config.width], DType::F32).unwrap();
    let targets = vec![0usize; BATCH];

    c.bench_function("pass_no_hooks_100x5", |b| {
        b.iter(|| {
            let logits = model.call(black_box(&x)).unwrap();
            let loss = CrossEntropyLoss.forward(&logits, &targets).unwrap();
            model.call_backward(&loss.grad).unwrap();
            model.zero_grad();
        })
    });

    let modules = flatten_model(&model);
    let registry = HookRegistry::attach(&modules, None, device.clone()).unwrap();
    c.bench_function("pass_hooked_100x5", |b| {
        b.iter(|| {
            let logits = model.call(black_box(&x)).unwrap();
            let loss = CrossEntropyLoss.forward(&logits, &targets).unwrap();
            model.call_backward(&loss.grad).unwrap();
            model.zero_grad();
        })
    });
    drop(registry);

    let session = ProfilingSession::new(device.clone());
    c.bench_function("session_run_100x5", |b| {
        b.iter(|| {
            session
                .run(&mut model, |m| {
                    let logits = m.call(&x)?;
                    CrossEntropyLoss.forward(&logits, &targets)
                })
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_pass);
criterion_main!(benches);
