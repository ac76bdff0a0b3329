//! Memory records, the append-only session log, and the finalized table.

use super::snapshot::Snapshot;
use crate::nn::HookPhase;
use serde::{Deserialize, Serialize};

/// One observation in a memory log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub layer_index: usize,
    pub call_index: usize,
    pub layer_type: String,
    pub experiment_label: Option<String>,
    pub hook_phase: HookPhase,
    /// Raw while the session runs, relative to the baseline once finalized.
    pub bytes_allocated: i64,
    pub bytes_reserved: u64,
    pub peak_bytes_allocated: u64,
    pub input_shape: Vec<usize>,
    pub output_shape: Option<Vec<usize>>,
}

/// Append-only record sequence; insertion order is call-index order.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    records: Vec<MemoryRecord>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// One past the last record's call index, or 0 when empty.
    pub fn next_call_index(&self) -> usize {
        self.records.last().map_or(0, |r| r.call_index + 1)
    }

    /// Append a snapshot, assigning it the next call index.
    pub fn append(&mut self, snapshot: Snapshot) -> &MemoryRecord {
        let call_index = self.next_call_index();
        self.records.push(MemoryRecord {
            layer_index: snapshot.layer_index,
            call_index,
            layer_type: snapshot.layer_type,
            experiment_label: snapshot.experiment_label,
            hook_phase: snapshot.hook_phase,
            bytes_allocated: snapshot.bytes_allocated as i64,
            bytes_reserved: snapshot.bytes_reserved,
            peak_bytes_allocated: snapshot.peak_bytes_allocated,
            input_shape: snapshot.input_shape,
            output_shape: snapshot.output_shape,
        });
        &self.records[self.records.len() - 1]
    }

    pub fn records(&self) -> &[MemoryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Finalize: subtract `baseline` from every `bytes_allocated`.
    pub fn normalize(self, baseline: u64) -> MemoryTable {
        let baseline = baseline as i64;
        let records = self
            .records
            .into_iter()
            .map(|mut r| {
                r.bytes_allocated -= baseline;
                r
            })
            .collect();
        MemoryTable { records }
    }
}

/// Immutable, normalized memory log handed out when a session ends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryTable {
    records: Vec<MemoryRecord>,
}

impl MemoryTable {
    /// Stack several tables (e.g. one per experiment) without renumbering.
    pub fn concat<'a>(tables: impl IntoIterator<Item = &'a MemoryTable>) -> MemoryTable {
        let records = tables
            .into_iter()
            .flat_map(|t| t.records.iter().cloned())
            .collect();
        MemoryTable { records }
    }

    pub fn records(&self) -> &[MemoryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MemoryRecord> {
        self.records.iter()
    }

    pub fn count_phase(&self, phase: HookPhase) -> usize {
        self.records.iter().filter(|r| r.hook_phase == phase).count()
    }

    /// Label of the first record; used as the legend entry when plotting.
    pub fn experiment_label(&self) -> Option<&str> {
        self.records.first()?.experiment_label.as_deref()
    }

    /// Split a concatenated table back into per-experiment tables, in order of
    /// first appearance.
    pub fn split_by_experiment(&self) -> Vec<MemoryTable> {
        let mut groups: Vec<(Option<String>, Vec<MemoryRecord>)> = Vec::new();
        for record in &self.records {
            match groups
                .iter_mut()
                .find(|(label, _)| *label == record.experiment_label)
            {
                Some((_, rows)) => rows.push(record.clone()),
                None => groups.push((record.experiment_label.clone(), vec![record.clone()])),
            }
        }
        groups
            .into_iter()
            .map(|(_, records)| MemoryTable { records })
            .collect()
    }
}

impl<'a> IntoIterator for &'a MemoryTable {
    type Item = &'a MemoryRecord;
    type IntoIter = std::slice::Iter<'a, MemoryRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
