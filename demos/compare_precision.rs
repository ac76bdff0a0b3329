//! Compare per-layer memory of a full and a reduced precision pass.
//!
//! Usage:
//!   cargo run --example compare_precision --
//!   cargo run --example compare_precision -- --width 512 --svg overlay.svg --csv both.csv

use anyhow::Result;
use clap::Parser;
use memprofile_oxidized::data::{simple_dls, DataConfig};
use memprofile_oxidized::report::{self, TableSummary};
use memprofile_oxidized::{
    simple_model_seeded, CrossEntropyLoss, DeviceConfig, MemoryTable, Module, ProfilingSession,
    SessionConfig, SimpleModelConfig, SimulatedDevice,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "compare_precision")]
struct Args {
    #[arg(long, default_value = "100")]
    width: usize,

    #[arg(long, default_value = "4")]
    hidden_layers: usize,

    #[arg(long, default_value = "64")]
    batch_size: usize,

    /// SVG overlay of both runs.
    #[arg(long, default_value = "memory_fp32_vs_bf16.svg")]
    svg: PathBuf,

    /// CSV with both runs stacked (label column tells them apart).
    #[arg(long)]
    csv: Option<PathBuf>,
}

fn run(args: &Args, label: &str, reduced_precision: bool) -> Result<MemoryTable> {
    let device = SimulatedDevice::new(DeviceConfig::default());
    let config = SimpleModelConfig::default()
        .with_width(args.width)
        .with_hidden_layers(args.hidden_layers)
        .with_activations(true);
    let mut model = simple_model_seeded(&device, &config, 42)?;
    let dls = simple_dls(
        &DataConfig {
            width: args.width,
            train_samples: args.batch_size,
            valid_samples: 0,
            batch_size: args.batch_size,
            ..DataConfig::default()
        },
        42,
    )?;
    let batch = dls
        .train
        .batches(dls.batch_size)
        .next()
        .ok_or_else(|| anyhow::anyhow!("no training batch"))?;

    let session = ProfilingSession::new(device.clone()).with_config(
        SessionConfig::default()
            .with_label(label)
            .with_reduced_precision(reduced_precision),
    );
    session.run(&mut model, |m| {
        let x = batch.to_device(&device)?;
        let logits = m.call(&x)?;
        CrossEntropyLoss.forward(&logits, batch.labels)
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("warn".parse()?),
        )
        .init();
    let args = Args::parse();

    let full = run(&args, "fp32", false)?;
    let reduced = run(&args, "bf16", true)?;

    println!("=== fp32 ===");
    print!("{}", report::format_table(&full));
    println!("\n=== bf16 ===");
    print!("{}", report::format_table(&reduced));

    let (a, b) = (TableSummary::from_table(&full), TableSummary::from_table(&reduced));
    println!(
        "\nmax allocated: fp32 {:.1} KiB, bf16 {:.1} KiB",
        a.max_bytes_allocated as f64 / 1024.0,
        b.max_bytes_allocated as f64 / 1024.0
    );

    report::plot::write_svg(&args.svg, &[&full, &reduced])?;
    println!("Plot written to {}", args.svg.display());
    if let Some(path) = &args.csv {
        report::write_csv(path, &MemoryTable::concat([&full, &reduced]))?;
        println!("CSV written to {}", path.display());
    }
    Ok(())
}
