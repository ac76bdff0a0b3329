//! Integration tests: hook registry lifecycle, profiling sessions, the
//! training-loop adapter, and baseline normalization.

use anyhow::Result;
use memprofile_oxidized::data::{simple_dls, DataConfig};
use memprofile_oxidized::nn::HookPoints;
use memprofile_oxidized::{
    flatten_model, profile_fit, simple_model_seeded, CrossEntropyLoss, DType, DeviceAllocator,
    DeviceConfig, HookPhase, HookRegistry, Learner, Linear, Loss, MemoryTable, Module,
    ProfilerError, ProfilingSession, SessionConfig, Sequential, SimpleModelConfig, SimulatedDevice,
    Tensor,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::Cell;
use std::sync::Arc;

const WIDTH: usize = 16;
const BATCH: usize = 4;

fn five_layer(device: &Arc<SimulatedDevice>) -> Sequential {
    let config = SimpleModelConfig::default().with_width(WIDTH);
    simple_model_seeded(device, &config, 11).unwrap()
}

fn input(device: &Arc<SimulatedDevice>) -> Tensor {
    let data = (0..BATCH * WIDTH).map(|i| (i % 7) as f32 * 0.1 - 0.3).collect();
    Tensor::from_vec(device, data, &[BATCH, WIDTH], DType::F32).unwrap()
}

fn forward_loss<M: Module>(device: &Arc<SimulatedDevice>, model: &mut M) -> Result<Loss> {
    let x = input(device);
    let logits = model.call(&x)?;
    let targets: Vec<usize> = (0..BATCH).map(|i| i % 2).collect();
    CrossEntropyLoss.forward(&logits, &targets)
}

fn profile(device: &Arc<SimulatedDevice>, model: &mut Sequential, config: SessionConfig) -> MemoryTable {
    let session = ProfilingSession::new(device.clone()).with_config(config);
    session.run(model, |m| forward_loss(device, m)).unwrap()
}

fn hooks_left(model: &dyn Module) -> usize {
    flatten_model(model)
        .iter()
        .filter_map(|h| h.hook_points())
        .map(HookPoints::len)
        .sum()
}

#[test]
fn five_linear_layers_give_fifteen_records_with_backward() {
    let device = SimulatedDevice::new(DeviceConfig::default());
    let mut model = five_layer(&device);
    let table = profile(&device, &mut model, SessionConfig::default());

    assert_eq!(table.len(), 15);
    assert_eq!(table.count_phase(HookPhase::Pre), 5);
    assert_eq!(table.count_phase(HookPhase::Forward), 5);
    assert_eq!(table.count_phase(HookPhase::Backward), 5);
    assert_eq!(table.experiment_label(), Some("Sequential"));
    for (i, r) in table.iter().enumerate() {
        assert_eq!(r.call_index, i);
    }
    // backward runs in reverse layer order
    let bwd: Vec<usize> = table
        .iter()
        .filter(|r| r.hook_phase == HookPhase::Backward)
        .map(|r| r.layer_index)
        .collect();
    assert_eq!(bwd, vec![4, 3, 2, 1, 0]);
    assert_eq!(hooks_left(&model), 0);
}

#[test]
fn forward_only_gives_ten_records() {
    let device = SimulatedDevice::new(DeviceConfig::default());
    let mut model = five_layer(&device);
    let table = profile(&device, &mut model, SessionConfig::default().forward_only());
    assert_eq!(table.len(), 10);
    assert_eq!(table.count_phase(HookPhase::Backward), 0);

    let first = &table.records()[0];
    assert_eq!(first.hook_phase, HookPhase::Pre);
    assert_eq!(first.input_shape, vec![BATCH, WIDTH]);
    assert_eq!(first.output_shape, None);
    let last = table.records().last().unwrap();
    assert_eq!(last.output_shape, Some(vec![BATCH, 2]));
}

#[test]
fn detach_is_idempotent_and_stops_recording() {
    let device = SimulatedDevice::new(DeviceConfig::default());
    let mut model = five_layer(&device);
    let modules = flatten_model(&model);
    let mut registry = HookRegistry::attach(&modules, None, device.clone()).unwrap();
    assert_eq!(hooks_left(&model), 15);

    model.call(&input(&device)).unwrap();
    assert_eq!(registry.log().len(), 10);

    registry.detach();
    registry.detach();
    assert!(!registry.is_attached());
    assert_eq!(hooks_left(&model), 0);

    model.call(&input(&device)).unwrap();
    assert_eq!(registry.log().len(), 10);
}

/// A layer that works but exposes no hook points.
struct OpaqueLayer;

impl Module for OpaqueLayer {
    fn type_name(&self) -> &str {
        "OpaqueLayer"
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        input.try_clone()
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        grad_output.try_clone()
    }
}

#[test]
fn unsupported_layer_leaves_no_hooks_behind() {
    let device = SimulatedDevice::new(DeviceConfig::default());
    let mut rng = StdRng::seed_from_u64(3);
    let mut model = Sequential::default();
    model.push(Linear::new(&device, WIDTH, WIDTH, &mut rng).unwrap());
    model.push(OpaqueLayer);
    model.push(Linear::new(&device, WIDTH, 2, &mut rng).unwrap());

    let modules = flatten_model(&model);
    let Err(err) = HookRegistry::attach(&modules, None, device.clone()) else {
        panic!("attach should reject OpaqueLayer");
    };
    match err {
        ProfilerError::UnsupportedModule { index, layer_type } => {
            assert_eq!(index, 1);
            assert_eq!(layer_type, "OpaqueLayer");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(hooks_left(&model), 0);

    let session = ProfilingSession::new(device.clone());
    let err = session
        .run(&mut model, |m| forward_loss(&device, m))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ProfilerError>(),
        Some(ProfilerError::UnsupportedModule { index: 1, .. })
    ));
}

#[test]
fn failing_forward_propagates_and_detaches() {
    let device = SimulatedDevice::new(DeviceConfig::default());
    let mut model = five_layer(&device);
    let session = ProfilingSession::new(device.clone());
    let err = session
        .run(&mut model, |m| {
            let bad = Tensor::zeros(&device, &[BATCH, WIDTH + 3], DType::F32)?;
            let logits = m.call(&bad)?;
            CrossEntropyLoss.forward(&logits, &[0; BATCH])
        })
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ProfilerError>(),
        Some(ProfilerError::ShapeMismatch { .. })
    ));
    assert_eq!(hooks_left(&model), 0);
}

#[test]
fn labeled_sessions_concatenate_with_independent_numbering() {
    let device = SimulatedDevice::new(DeviceConfig::default());
    let mut model = five_layer(&device);
    let a = profile(&device, &mut model, SessionConfig::default().with_label("a"));
    let b = profile(&device, &mut model, SessionConfig::default().with_label("b"));

    let combined = MemoryTable::concat([&a, &b]);
    assert_eq!(combined.len(), 30);
    let parts = combined.split_by_experiment();
    assert_eq!(parts.len(), 2);
    for (part, label) in parts.iter().zip(["a", "b"]) {
        assert_eq!(part.experiment_label(), Some(label));
        assert_eq!(part.records()[0].call_index, 0);
        assert_eq!(part.records().last().unwrap().call_index, 14);
    }
}

/// Allocator whose `allocated_bytes` grows by one block on every read.
struct CountingAllocator {
    reads: Cell<u64>,
}

impl DeviceAllocator for CountingAllocator {
    fn allocated_bytes(&self) -> u64 {
        let n = self.reads.get() + 1;
        self.reads.set(n);
        1_000_000 + n * 512
    }

    fn reserved_bytes(&self) -> u64 {
        4 << 20
    }

    fn peak_allocated_bytes(&self) -> u64 {
        2_000_000
    }

    fn synchronize(&self) {}
}

#[test]
fn normalization_subtracts_baseline_exactly() {
    let device = SimulatedDevice::new(DeviceConfig::default());
    let mut model = five_layer(&device);
    let fake = Arc::new(CountingAllocator { reads: Cell::new(0) });
    let session = ProfilingSession::new(fake.clone());
    let table = session.run(&mut model, |m| forward_loss(&device, m)).unwrap();

    // read 1 is the baseline, read k + 2 belongs to call k
    assert_eq!(table.len(), 15);
    for r in &table {
        assert_eq!(r.bytes_allocated, (r.call_index as i64 + 1) * 512);
        assert_eq!(r.bytes_reserved, 4 << 20);
        assert_eq!(r.peak_bytes_allocated, 2_000_000);
    }
    assert_eq!(fake.reads.get(), 16);
}

#[test]
fn peak_covers_allocations_at_every_hook() {
    let device = SimulatedDevice::new(DeviceConfig::default());
    let mut model = five_layer(&device);
    let baseline = device.allocated_bytes() as i64;
    let table = profile(&device, &mut model, SessionConfig::default());
    for r in &table {
        assert!(r.peak_bytes_allocated as i64 >= r.bytes_allocated + baseline);
        assert!(r.bytes_reserved as i64 >= r.bytes_allocated + baseline);
    }
}

#[test]
fn reduced_precision_lowers_activation_memory() {
    // activations must span several allocator blocks for the halving to show
    let (width, batch) = (128, 16);
    let run = |reduced: bool| {
        let device = SimulatedDevice::new(DeviceConfig::default());
        let config = SimpleModelConfig::default().with_width(width);
        let mut model = simple_model_seeded(&device, &config, 2).unwrap();
        let session = ProfilingSession::new(device.clone()).with_config(
            SessionConfig::default()
                .forward_only()
                .with_reduced_precision(reduced),
        );
        session
            .run(&mut model, |m| {
                let x = Tensor::zeros(&device, &[batch, width], DType::F32)?;
                let logits = m.call(&x)?;
                CrossEntropyLoss.forward(&logits, &vec![0; batch])
            })
            .unwrap()
    };
    let full = run(false);
    let half = run(true);

    let last_fwd = |t: &MemoryTable| t.records().last().map(|r| r.bytes_allocated).unwrap();
    assert_eq!(half.len(), full.len());
    assert!(last_fwd(&half) < last_fwd(&full));
}

#[test]
fn empty_model_gives_empty_table() {
    let device = SimulatedDevice::new(DeviceConfig::default());
    let mut model = Sequential::default();
    let table = profile(&device, &mut model, SessionConfig::default());
    assert!(table.is_empty());
}

#[test]
fn profile_fit_records_one_batch_and_keeps_weights() {
    let device = SimulatedDevice::new(DeviceConfig::default());
    let model = five_layer(&device);
    let data = DataConfig {
        width: WIDTH,
        train_samples: 32,
        valid_samples: 0,
        batch_size: BATCH,
        ..DataConfig::default()
    };
    let mut learn = Learner::new(model, simple_dls(&data, 1).unwrap(), device.clone());

    let x = input(&device);
    let before = learn.model_mut().call(&x).unwrap().data().to_vec();
    let table = profile_fit(&mut learn, device.clone(), Some("fit".into())).unwrap();
    let after = learn.model_mut().call(&x).unwrap().data().to_vec();

    assert_eq!(before, after);
    assert_eq!(table.len(), 15);
    assert_eq!(table.experiment_label(), Some("fit"));
    assert_eq!(hooks_left(learn.model()), 0);
}

#[test]
fn bare_layer_records_all_three_phases() {
    let device = SimulatedDevice::new(DeviceConfig::default());
    let mut rng = StdRng::seed_from_u64(4);
    let mut layer = Linear::new(&device, WIDTH, 2, &mut rng).unwrap();
    let session = ProfilingSession::new(device.clone());
    let table = session.run(&mut layer, |m| forward_loss(&device, m)).unwrap();

    let phases: Vec<HookPhase> = table.iter().map(|r| r.hook_phase).collect();
    assert_eq!(phases, HookPhase::ALL.to_vec());
    assert!(table.iter().all(|r| r.layer_index == 0 && r.layer_type == "Linear"));
    assert_eq!(table.experiment_label(), Some("Linear"));
    assert_eq!(hooks_left(&layer), 0);
}

#[test]
fn profile_fit_on_bare_layer_records_three() {
    let device = SimulatedDevice::new(DeviceConfig::default());
    let mut rng = StdRng::seed_from_u64(4);
    let layer = Linear::new(&device, WIDTH, 2, &mut rng).unwrap();
    let data = DataConfig {
        width: WIDTH,
        train_samples: 8,
        valid_samples: 0,
        batch_size: BATCH,
        ..DataConfig::default()
    };
    let mut learn = Learner::new(layer, simple_dls(&data, 2).unwrap(), device.clone());
    let table = profile_fit(&mut learn, device.clone(), None).unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(table.count_phase(HookPhase::Backward), 1);
}

/// Passes activations through but refuses to run backward.
#[derive(Default)]
struct BrokenBackward {
    hooks: HookPoints,
}

impl Module for BrokenBackward {
    fn type_name(&self) -> &str {
        "BrokenBackward"
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        input.try_clone()
    }

    fn backward(&mut self, _grad_output: &Tensor) -> Result<Tensor> {
        anyhow::bail!("backward not supported")
    }

    fn hook_points(&self) -> Option<&HookPoints> {
        Some(&self.hooks)
    }
}

#[test]
fn failing_backward_propagates_detaches_and_clears_gradients() {
    let device = SimulatedDevice::new(DeviceConfig::default());
    let mut rng = StdRng::seed_from_u64(5);
    let mut model = Sequential::default();
    model.push(BrokenBackward::default());
    model.push(Linear::new(&device, WIDTH, 2, &mut rng).unwrap());
    let before = device.allocated_bytes();

    let session = ProfilingSession::new(device.clone());
    let err = session
        .run(&mut model, |m| forward_loss(&device, m))
        .unwrap_err();
    assert!(err.to_string().contains("backward not supported"));
    assert_eq!(hooks_left(&model), 0);
    // the Linear ran its backward before the failure; its gradients are gone
    assert_eq!(device.allocated_bytes(), before);
}
