//! Chrome trace export (for chrome://tracing or Perfetto).
//!
//! Each record becomes a counter event at `ts = call_index`, so the memory
//! curve shows up as a counter track per experiment.

use crate::profiling::MemoryTable;
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Chrome trace event; `ph = "C"` (counter) or `"i"` (instant).
#[derive(Debug, Clone, Serialize)]
pub struct ChromeTraceEvent {
    pub name: String,
    pub cat: String,
    pub ph: String,
    pub ts: f64,
    pub pid: u32,
    pub tid: u32,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, f64>,
}

/// Counter events for allocated/reserved/peak KiB plus an instant event per
/// hook naming the layer and phase. Each table gets its own `tid`.
pub fn table_to_chrome_trace(tables: &[&MemoryTable], pid: u32) -> Vec<ChromeTraceEvent> {
    let mut events = Vec::new();
    for (tid, table) in tables.iter().enumerate() {
        let tid = tid as u32 + 1;
        let series = table.experiment_label().unwrap_or("memory").to_string();
        for r in table.iter() {
            let ts = r.call_index as f64;
            let mut args = BTreeMap::new();
            args.insert("allocated_kib".to_string(), r.bytes_allocated as f64 / 1024.0);
            args.insert("reserved_kib".to_string(), r.bytes_reserved as f64 / 1024.0);
            args.insert("peak_kib".to_string(), r.peak_bytes_allocated as f64 / 1024.0);
            events.push(ChromeTraceEvent {
                name: series.clone(),
                cat: "memory".to_string(),
                ph: "C".to_string(),
                ts,
                pid,
                tid,
                args,
            });
            events.push(ChromeTraceEvent {
                name: format!("{}#{} {}", r.layer_type, r.layer_index, r.hook_phase),
                cat: "hook".to_string(),
                ph: "i".to_string(),
                ts,
                pid,
                tid,
                args: BTreeMap::new(),
            });
        }
    }
    events
}

pub fn write_chrome_trace(path: &Path, tables: &[&MemoryTable]) -> Result<()> {
    let events = table_to_chrome_trace(tables, 1);
    let f = File::create(path).map_err(|e| anyhow::anyhow!("create {}: {}", path.display(), e))?;
    serde_json::to_writer(BufWriter::new(f), &events)
        .map_err(|e| anyhow::anyhow!("serialize: {}", e))?;
    Ok(())
}
