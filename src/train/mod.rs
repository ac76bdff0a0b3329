//! Minimal training loop with a callback protocol.
//!
//! Callbacks observe `before_fit`, `before_batch`, `before_step`, `after_batch`
//! and `after_fit`, and steer the loop by returning a [`CallbackFlow`].

pub mod mem_stats;

pub use mem_stats::{profile_fit, AdapterState, MemStatsCallback, SinglePassGuard};

use crate::data::DataLoaders;
use crate::device::SimulatedDevice;
use crate::nn::{CrossEntropyLoss, Module};
use anyhow::Result;
use std::sync::Arc;

/// What the loop should do after a callback event. Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum CallbackFlow {
    #[default]
    Continue,
    /// Skip the optimizer step for the current batch.
    CancelStep,
    /// Stop the fit; `after_fit` still runs.
    CancelFit,
}

/// Loop state handed to callbacks.
pub struct TrainContext<'a> {
    pub model: &'a mut dyn Module,
    pub epoch: usize,
    pub batch_index: usize,
}

pub trait Callback {
    fn name(&self) -> &str;

    fn before_fit(&mut self, _ctx: &mut TrainContext<'_>) -> Result<CallbackFlow> {
        Ok(CallbackFlow::Continue)
    }

    fn before_batch(&mut self, _ctx: &mut TrainContext<'_>) -> Result<CallbackFlow> {
        Ok(CallbackFlow::Continue)
    }

    /// Runs after backward, right before the optimizer would update weights.
    fn before_step(&mut self, _ctx: &mut TrainContext<'_>) -> Result<CallbackFlow> {
        Ok(CallbackFlow::Continue)
    }

    fn after_batch(&mut self, _ctx: &mut TrainContext<'_>) -> Result<CallbackFlow> {
        Ok(CallbackFlow::Continue)
    }

    fn after_fit(&mut self, _ctx: &mut TrainContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Runs instead of `after_fit` when the fit fails, before the error is
    /// returned. Release anything acquired in `before_fit` here.
    fn on_fit_error(&mut self, _ctx: &mut TrainContext<'_>, _error: &anyhow::Error) {}
}

#[derive(Debug, Clone, Copy)]
enum Event {
    BeforeFit,
    BeforeBatch,
    BeforeStep,
    AfterBatch,
}

/// Training hyperparameters.
#[derive(Debug, Clone)]
pub struct LearnerConfig {
    pub learning_rate: f32,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
        }
    }
}

/// Counters from one call to [`Learner::fit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitSummary {
    pub batches_run: usize,
    pub steps_applied: usize,
    pub cancelled: bool,
    pub last_loss: Option<f32>,
}

/// Model + data + loss + SGD, driven by callbacks.
pub struct Learner<M: Module> {
    model: M,
    dls: DataLoaders,
    device: Arc<SimulatedDevice>,
    loss_fn: CrossEntropyLoss,
    config: LearnerConfig,
}

impl<M: Module> Learner<M> {
    pub fn new(model: M, dls: DataLoaders, device: Arc<SimulatedDevice>) -> Self {
        Self {
            model,
            dls,
            device,
            loss_fn: CrossEntropyLoss,
            config: LearnerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LearnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn device(&self) -> &Arc<SimulatedDevice> {
        &self.device
    }

    fn dispatch(
        &mut self,
        callbacks: &mut [&mut dyn Callback],
        event: Event,
        epoch: usize,
        batch_index: usize,
    ) -> Result<CallbackFlow> {
        let mut flow = CallbackFlow::Continue;
        for cb in callbacks.iter_mut() {
            let mut ctx = TrainContext {
                model: &mut self.model,
                epoch,
                batch_index,
            };
            let next = match event {
                Event::BeforeFit => cb.before_fit(&mut ctx)?,
                Event::BeforeBatch => cb.before_batch(&mut ctx)?,
                Event::BeforeStep => cb.before_step(&mut ctx)?,
                Event::AfterBatch => cb.after_batch(&mut ctx)?,
            };
            if next != CallbackFlow::Continue {
                tracing::debug!(callback = cb.name(), ?event, ?next, "callback changed flow");
            }
            flow = flow.max(next);
        }
        Ok(flow)
    }

    /// Train for `epochs` over the training split.
    ///
    /// `after_fit` runs for every callback when the loop finishes or is
    /// cancelled. If the model or a callback fails, every callback gets
    /// `on_fit_error` instead and the error is returned.
    pub fn fit(&mut self, epochs: usize, callbacks: &mut [&mut dyn Callback]) -> Result<FitSummary> {
        let mut summary = FitSummary::default();
        let outcome = match self.dispatch(callbacks, Event::BeforeFit, 0, 0) {
            Ok(CallbackFlow::CancelFit) => {
                summary.cancelled = true;
                Ok(())
            }
            Ok(_) => self.run_epochs(epochs, callbacks, &mut summary),
            Err(e) => Err(e),
        };
        if let Err(err) = outcome {
            tracing::warn!(error = %err, batches = summary.batches_run, "fit failed");
            for cb in callbacks.iter_mut() {
                let mut ctx = TrainContext {
                    model: &mut self.model,
                    epoch: epochs,
                    batch_index: summary.batches_run,
                };
                cb.on_fit_error(&mut ctx, &err);
            }
            return Err(err);
        }
        for cb in callbacks.iter_mut() {
            let mut ctx = TrainContext {
                model: &mut self.model,
                epoch: epochs,
                batch_index: summary.batches_run,
            };
            cb.after_fit(&mut ctx)?;
        }
        if summary.cancelled {
            tracing::info!(batches = summary.batches_run, "fit cancelled");
        }
        Ok(summary)
    }

    fn run_epochs(
        &mut self,
        epochs: usize,
        callbacks: &mut [&mut dyn Callback],
        summary: &mut FitSummary,
    ) -> Result<()> {
        let batch_size = self.dls.batch_size;
        for epoch in 0..epochs {
            let batch_count = self.dls.train.batches(batch_size).count();
            for batch_index in 0..batch_count {
                if self.dispatch(callbacks, Event::BeforeBatch, epoch, batch_index)?
                    == CallbackFlow::CancelFit
                {
                    summary.cancelled = true;
                    return Ok(());
                }
                summary.last_loss = Some(self.train_batch(batch_index)?);
                summary.batches_run += 1;

                let flow = self.dispatch(callbacks, Event::BeforeStep, epoch, batch_index)?;
                if flow == CallbackFlow::CancelFit {
                    summary.cancelled = true;
                    return Ok(());
                }
                if flow == CallbackFlow::Continue {
                    self.model.apply_gradients(self.config.learning_rate);
                    self.model.zero_grad();
                    summary.steps_applied += 1;
                }

                if self.dispatch(callbacks, Event::AfterBatch, epoch, batch_index)?
                    == CallbackFlow::CancelFit
                {
                    summary.cancelled = true;
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Upload one batch, run forward, loss and backward. Returns the loss.
    fn train_batch(&mut self, batch_index: usize) -> Result<f32> {
        let batch = self
            .dls
            .train
            .batches(self.dls.batch_size)
            .nth(batch_index)
            .ok_or_else(|| anyhow::anyhow!("batch {} out of range", batch_index))?;
        let x = batch.to_device(&self.device)?;
        let logits = self.model.call(&x)?;
        let loss = self.loss_fn.forward(&logits, batch.labels)?;
        self.model.call_backward(&loss.grad)?;
        Ok(loss.value)
    }

    /// Mean loss over the validation split, without gradients kept.
    pub fn validate(&mut self) -> Result<f32> {
        let mut total = 0.0f32;
        let mut count = 0usize;
        for batch in self.dls.valid.batches(self.dls.batch_size) {
            let x = batch.to_device(&self.device)?;
            let logits = self.model.call(&x)?;
            let loss = self.loss_fn.forward(&logits, batch.labels)?;
            total += loss.value * batch.labels.len() as f32;
            count += batch.labels.len();
        }
        if count == 0 {
            anyhow::bail!("validation split is empty");
        }
        Ok(total / count as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{simple_dls, DataConfig};
    use crate::device::DeviceConfig;
    use crate::model::{simple_model_seeded, SimpleModelConfig};
    use crate::nn::Sequential;

    fn learner(samples: usize) -> Learner<Sequential> {
        let device = SimulatedDevice::new(DeviceConfig::default());
        let model = simple_model_seeded(&device, &SimpleModelConfig::default().with_width(8), 0).unwrap();
        let data = DataConfig {
            width: 8,
            train_samples: samples,
            valid_samples: 8,
            batch_size: 4,
            ..DataConfig::default()
        };
        Learner::new(model, simple_dls(&data, 0).unwrap(), device)
    }

    #[test]
    fn fit_runs_every_batch_without_callbacks() {
        let mut learn = learner(12);
        let summary = learn.fit(2, &mut []).unwrap();
        assert_eq!(summary.batches_run, 6);
        assert_eq!(summary.steps_applied, 6);
        assert!(!summary.cancelled);
        assert!(summary.last_loss.unwrap().is_finite());
        assert!(learn.validate().unwrap().is_finite());
    }

    struct StopAfter(usize);

    impl Callback for StopAfter {
        fn name(&self) -> &str {
            "stop_after"
        }

        fn after_batch(&mut self, ctx: &mut TrainContext<'_>) -> Result<CallbackFlow> {
            if ctx.batch_index + 1 >= self.0 {
                return Ok(CallbackFlow::CancelFit);
            }
            Ok(CallbackFlow::Continue)
        }
    }

    struct FailOnBatch {
        at: usize,
        errors_seen: usize,
        fits_finished: usize,
    }

    impl Callback for FailOnBatch {
        fn name(&self) -> &str {
            "fail_on_batch"
        }

        fn before_batch(&mut self, ctx: &mut TrainContext<'_>) -> Result<CallbackFlow> {
            if ctx.batch_index == self.at {
                anyhow::bail!("batch {} rejected", ctx.batch_index);
            }
            Ok(CallbackFlow::Continue)
        }

        fn after_fit(&mut self, _ctx: &mut TrainContext<'_>) -> Result<()> {
            self.fits_finished += 1;
            Ok(())
        }

        fn on_fit_error(&mut self, ctx: &mut TrainContext<'_>, error: &anyhow::Error) {
            assert_eq!(ctx.batch_index, self.at);
            assert!(error.to_string().contains("rejected"));
            self.errors_seen += 1;
        }
    }

    #[test]
    fn failing_callback_gets_error_event_instead_of_after_fit() {
        let mut learn = learner(20);
        let mut fail = FailOnBatch {
            at: 2,
            errors_seen: 0,
            fits_finished: 0,
        };
        assert!(learn.fit(1, &mut [&mut fail]).is_err());
        assert_eq!(fail.errors_seen, 1);
        assert_eq!(fail.fits_finished, 0);
    }

    #[test]
    fn cancel_fit_stops_the_loop() {
        let mut learn = learner(40);
        let mut stop = StopAfter(3);
        let summary = learn.fit(1, &mut [&mut stop]).unwrap();
        assert_eq!(summary.batches_run, 3);
        assert!(summary.cancelled);
    }
}
