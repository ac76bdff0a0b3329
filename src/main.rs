//! CLI for memprofile-oxidized: profile, fit, compare.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use memprofile_oxidized::data::{simple_dls, DataConfig, DataLoaders};
use memprofile_oxidized::report::{self, TableSummary};
use memprofile_oxidized::{
    simple_model_seeded, CrossEntropyLoss, DeviceConfig, Learner, MemStatsCallback, MemoryTable,
    Module, ProfilingSession, SessionConfig, SimpleModelConfig, SimulatedDevice, SinglePassGuard,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "memprofile-oxidized")]
#[command(about = "Per-layer memory profile of a forward and backward pass")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// One forward+backward pass of the demo model under memory hooks
    Profile {
        #[command(flatten)]
        model: ModelArgs,
        #[command(flatten)]
        output: OutputArgs,
        /// Run the forward pass under bf16 autocast
        #[arg(long, alias = "fp16")]
        reduced_precision: bool,
        /// Skip the backward pass (PRE and FORWARD records only)
        #[arg(long)]
        forward_only: bool,
        #[arg(long)]
        label: Option<String>,
    },

    /// Profile through the training loop with the memory-stats callback
    Fit {
        #[command(flatten)]
        model: ModelArgs,
        #[command(flatten)]
        output: OutputArgs,
        #[arg(long)]
        label: Option<String>,
        /// Hook every flattened layer, not only those with parameters
        #[arg(long)]
        all_layers: bool,
    },

    /// Overlay full and reduced precision profiles of the same model
    Compare {
        #[command(flatten)]
        model: ModelArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args, Clone)]
struct ModelArgs {
    #[arg(long, default_value = "4")]
    hidden_layers: usize,
    #[arg(long, default_value = "100")]
    width: usize,
    #[arg(long, default_value = "2")]
    classes: usize,
    #[arg(long, default_value = "16")]
    batch_size: usize,
    /// Insert a ReLU after every hidden Linear
    #[arg(long)]
    activations: bool,
    /// Simulated device capacity; unlimited when unset
    #[arg(long)]
    capacity_mib: Option<u64>,
    #[arg(long, default_value = "0")]
    seed: u64,
}

impl ModelArgs {
    fn device(&self) -> Arc<SimulatedDevice> {
        let config = match self.capacity_mib {
            Some(mib) => DeviceConfig::default().with_capacity(mib * 1024 * 1024),
            None => DeviceConfig::default(),
        };
        SimulatedDevice::new(config)
    }

    fn model_config(&self) -> SimpleModelConfig {
        SimpleModelConfig::default()
            .with_width(self.width)
            .with_outputs(self.classes)
            .with_hidden_layers(self.hidden_layers)
            .with_activations(self.activations)
    }

    fn data(&self) -> Result<DataLoaders> {
        let config = DataConfig {
            width: self.width,
            classes: self.classes,
            train_samples: self.batch_size * 4,
            valid_samples: self.batch_size,
            batch_size: self.batch_size,
        };
        simple_dls(&config, self.seed)
    }
}

#[derive(Args, Clone, Default)]
struct OutputArgs {
    #[arg(long)]
    csv: Option<PathBuf>,
    #[arg(long)]
    json: Option<PathBuf>,
    #[arg(long)]
    svg: Option<PathBuf>,
    /// Chrome trace (chrome://tracing, Perfetto)
    #[arg(long)]
    trace: Option<PathBuf>,
    /// Print every record, not just the summary
    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Profile {
            model,
            output,
            reduced_precision,
            forward_only,
            label,
        } => run_profile(&model, &output, reduced_precision, forward_only, label)?,
        Commands::Fit {
            model,
            output,
            label,
            all_layers,
        } => run_fit(&model, &output, label, all_layers)?,
        Commands::Compare { model, output } => run_compare(&model, &output)?,
    }
    Ok(())
}

/// One session over the first training batch.
fn profile_once(args: &ModelArgs, config: SessionConfig) -> Result<MemoryTable> {
    let device = args.device();
    let mut model = simple_model_seeded(&device, &args.model_config(), args.seed)?;
    let dls = args.data()?;
    let batch = dls
        .train
        .batches(dls.batch_size)
        .next()
        .ok_or_else(|| anyhow::anyhow!("training split is empty"))?;

    let session = ProfilingSession::new(device.clone()).with_config(config);
    session.run(&mut model, |m| {
        let x = batch.to_device(&device)?;
        let logits = m.call(&x)?;
        CrossEntropyLoss.forward(&logits, batch.labels)
    })
}

fn run_profile(
    args: &ModelArgs,
    output: &OutputArgs,
    reduced_precision: bool,
    forward_only: bool,
    label: Option<String>,
) -> Result<()> {
    let mut config = SessionConfig::default().with_reduced_precision(reduced_precision);
    if let Some(label) = label {
        config = config.with_label(label);
    }
    if forward_only {
        config = config.forward_only();
    }
    let table = profile_once(args, config)?;
    emit(&[&table], output)
}

fn run_fit(args: &ModelArgs, output: &OutputArgs, label: Option<String>, all_layers: bool) -> Result<()> {
    let device = args.device();
    let model = simple_model_seeded(&device, &args.model_config(), args.seed)?;
    let mut learn = Learner::new(model, args.data()?, device.clone());

    let mut stats = MemStatsCallback::new(device.clone());
    if let Some(label) = label {
        stats = stats.with_label(label);
    }
    if all_layers {
        stats = stats.with_modules(memprofile_oxidized::flatten_model(learn.model()));
    }
    let mut guard = SinglePassGuard;
    let summary = learn.fit(1, &mut [&mut stats, &mut guard])?;
    info!(
        batches = summary.batches_run,
        steps = summary.steps_applied,
        loss = ?summary.last_loss,
        "fit finished"
    );
    let table = stats
        .stats()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("memory stats callback produced no table"))?;
    emit(&[&table], output)
}

fn run_compare(args: &ModelArgs, output: &OutputArgs) -> Result<()> {
    let full = profile_once(args, SessionConfig::default().with_label("fp32"))?;
    let reduced = profile_once(
        args,
        SessionConfig::default()
            .with_label("bf16")
            .with_reduced_precision(true),
    )?;
    let (a, b) = (TableSummary::from_table(&full), TableSummary::from_table(&reduced));
    if a.max_bytes_allocated > 0 {
        info!(
            ratio = b.max_bytes_allocated as f64 / a.max_bytes_allocated as f64,
            "bf16 / fp32 max allocation"
        );
    }
    emit(&[&full, &reduced], output)
}

/// Print summaries and write every requested export. Multiple tables are
/// concatenated for CSV / JSON and overlaid in the plot.
fn emit(tables: &[&MemoryTable], output: &OutputArgs) -> Result<()> {
    for table in tables {
        if output.verbose {
            println!("{}", report::format_table(table));
        }
        let s = TableSummary::from_table(table);
        println!(
            "{:<12} records={:<4} pre={:<3} fwd={:<3} bwd={:<3} max_alloc={:.1} KiB final={:.1} KiB peak={:.1} KiB",
            s.experiment_label.as_deref().unwrap_or("-"),
            s.records,
            s.pre_calls,
            s.forward_calls,
            s.backward_calls,
            s.max_bytes_allocated as f64 / 1024.0,
            s.final_bytes_allocated as f64 / 1024.0,
            s.peak_bytes_allocated as f64 / 1024.0,
        );
    }

    let combined = MemoryTable::concat(tables.iter().copied());
    if let Some(path) = &output.csv {
        report::write_csv(path, &combined)?;
        info!(path = %path.display(), "CSV written");
    }
    if let Some(path) = &output.json {
        report::write_json(path, &combined)?;
        info!(path = %path.display(), "JSON written");
    }
    if let Some(path) = &output.trace {
        report::trace::write_chrome_trace(path, tables)?;
        info!(path = %path.display(), "Chrome trace written");
    }
    if let Some(path) = &output.svg {
        report::plot::write_svg(path, tables)?;
    }
    Ok(())
}
