//! Export and summaries of finished memory tables.
//!
//! CSV and JSON carry exactly the `MemoryRecord` columns; `plot` renders
//! allocated KiB against call index; `trace` emits Chrome trace counters.

pub mod plot;
pub mod trace;

use crate::nn::HookPhase;
use crate::profiling::{MemoryRecord, MemoryTable};
use anyhow::Result;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Column order used for CSV export.
pub const CSV_HEADER: &str = "layer_index,call_index,layer_type,experiment_label,hook_phase,\
bytes_allocated,bytes_reserved,peak_bytes_allocated,input_shape,output_shape";

fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Shapes are written as `16x100`.
fn format_shape(shape: &[usize]) -> String {
    shape
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("x")
}

fn csv_row(r: &MemoryRecord) -> String {
    format!(
        "{},{},{},{},{},{},{},{},{},{}",
        r.layer_index,
        r.call_index,
        escape_csv(&r.layer_type),
        r.experiment_label.as_deref().map(escape_csv).unwrap_or_default(),
        r.hook_phase,
        r.bytes_allocated,
        r.bytes_reserved,
        r.peak_bytes_allocated,
        format_shape(&r.input_shape),
        r.output_shape.as_deref().map(format_shape).unwrap_or_default(),
    )
}

/// Write `table` as CSV to any writer.
pub fn write_csv_to<W: Write>(mut w: W, table: &MemoryTable) -> Result<()> {
    writeln!(w, "{}", CSV_HEADER)?;
    for record in table {
        writeln!(w, "{}", csv_row(record))?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_csv(path: &Path, table: &MemoryTable) -> Result<()> {
    let f = File::create(path).map_err(|e| anyhow::anyhow!("create {}: {}", path.display(), e))?;
    write_csv_to(BufWriter::new(f), table)
}

/// Export the table to a JSON array of records.
pub fn write_json(path: &Path, table: &MemoryTable) -> Result<()> {
    let f = File::create(path).map_err(|e| anyhow::anyhow!("create {}: {}", path.display(), e))?;
    let w = BufWriter::new(f);
    serde_json::to_writer_pretty(w, table).map_err(|e| anyhow::anyhow!("serialize: {}", e))?;
    Ok(())
}

/// Headline numbers of one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub experiment_label: Option<String>,
    pub records: usize,
    pub pre_calls: usize,
    pub forward_calls: usize,
    pub backward_calls: usize,
    /// Highest baseline-relative allocation seen at any hook.
    pub max_bytes_allocated: i64,
    /// Allocation at the last hook, relative to baseline.
    pub final_bytes_allocated: i64,
    pub max_bytes_reserved: u64,
    pub peak_bytes_allocated: u64,
}

impl TableSummary {
    pub fn from_table(table: &MemoryTable) -> Self {
        let records = table.records();
        Self {
            experiment_label: table.experiment_label().map(str::to_string),
            records: records.len(),
            pre_calls: table.count_phase(HookPhase::Pre),
            forward_calls: table.count_phase(HookPhase::Forward),
            backward_calls: table.count_phase(HookPhase::Backward),
            max_bytes_allocated: records.iter().map(|r| r.bytes_allocated).max().unwrap_or(0),
            final_bytes_allocated: records.last().map_or(0, |r| r.bytes_allocated),
            max_bytes_reserved: records.iter().map(|r| r.bytes_reserved).max().unwrap_or(0),
            peak_bytes_allocated: records
                .iter()
                .map(|r| r.peak_bytes_allocated)
                .max()
                .unwrap_or(0),
        }
    }
}

/// Fixed-width text rendering of a table, one line per record.
pub fn format_table(table: &MemoryTable) -> String {
    let mut out = format!(
        "{:>5} {:>5} {:<12} {:<4} {:>12} {:>12} {:>12}  {:<12} {:<12}\n",
        "call", "layer", "type", "hook", "alloc_kib", "reserved_kib", "peak_kib", "input", "output"
    );
    for r in table {
        out.push_str(&format!(
            "{:>5} {:>5} {:<12} {:<4} {:>12.1} {:>12.1} {:>12.1}  {:<12} {:<12}\n",
            r.call_index,
            r.layer_index,
            r.layer_type,
            r.hook_phase.as_str(),
            r.bytes_allocated as f64 / 1024.0,
            r.bytes_reserved as f64 / 1024.0,
            r.peak_bytes_allocated as f64 / 1024.0,
            format_shape(&r.input_shape),
            r.output_shape.as_deref().map(format_shape).unwrap_or_else(|| "-".into()),
        ));
    }
    out
}
