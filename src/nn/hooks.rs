//! Lifecycle hook points carried by layers.
//!
//! A layer owns a [`HookPoints`] table; callers register callbacks per
//! [`HookPhase`] and get back a [`HookHandle`] that removes exactly that
//! callback. The table is shared (`Rc`) so a flattened view of the model can
//! attach hooks without borrowing the model itself.

use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// Point in a layer's lifecycle at which a hook fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HookPhase {
    /// Before the forward computation; only inputs are available.
    #[serde(rename = "pre")]
    Pre,
    /// After the forward computation.
    #[serde(rename = "fwd")]
    Forward,
    /// After the backward computation.
    #[serde(rename = "bwd")]
    Backward,
}

impl HookPhase {
    pub const ALL: [HookPhase; 3] = [HookPhase::Pre, HookPhase::Forward, HookPhase::Backward];

    pub fn as_str(self) -> &'static str {
        match self {
            HookPhase::Pre => "pre",
            HookPhase::Forward => "fwd",
            HookPhase::Backward => "bwd",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments handed to a hook when it fires.
///
/// For PRE and FORWARD, `input` is the layer input and `output` its result.
/// For BACKWARD, `input` is the gradient w.r.t. the layer input and `output`
/// the incoming gradient w.r.t. its output.
pub struct HookContext<'a> {
    pub layer_type: &'a str,
    pub phase: HookPhase,
    pub input: &'a Tensor,
    pub output: Option<&'a Tensor>,
}

type HookFn = Rc<dyn Fn(&HookContext<'_>)>;

struct HookEntry {
    id: u64,
    phase: HookPhase,
    callback: HookFn,
}

#[derive(Default)]
struct HookTable {
    next_id: u64,
    entries: Vec<HookEntry>,
}

/// Shared table of lifecycle callbacks for one layer.
#[derive(Clone, Default)]
pub struct HookPoints {
    table: Rc<RefCell<HookTable>>,
}

impl HookPoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `phase`.
    pub fn register<F>(&self, phase: HookPhase, callback: F) -> HookHandle
    where
        F: Fn(&HookContext<'_>) + 'static,
    {
        let mut table = self.table.borrow_mut();
        let id = table.next_id;
        table.next_id += 1;
        table.entries.push(HookEntry {
            id,
            phase,
            callback: Rc::new(callback),
        });
        HookHandle {
            table: Rc::downgrade(&self.table),
            id,
        }
    }

    /// Invoke every callback registered for `ctx.phase`, in registration order.
    pub fn fire(&self, ctx: &HookContext<'_>) {
        // Collect first so a callback may remove hooks without a borrow conflict.
        let callbacks: Vec<HookFn> = self
            .table
            .borrow()
            .entries
            .iter()
            .filter(|e| e.phase == ctx.phase)
            .map(|e| Rc::clone(&e.callback))
            .collect();
        for callback in callbacks {
            callback(ctx);
        }
    }

    /// Number of registered callbacks across all phases.
    pub fn len(&self) -> usize {
        self.table.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for HookPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookPoints")
            .field("registered", &self.len())
            .finish()
    }
}

/// Removes one registered callback. Dropping the handle does not remove it.
#[derive(Debug, Clone)]
pub struct HookHandle {
    table: Weak<RefCell<HookTable>>,
    id: u64,
}

impl HookHandle {
    /// Remove the callback. Returns `false` if it was already gone or the
    /// layer no longer exists.
    pub fn remove(&self) -> bool {
        let Some(table) = self.table.upgrade() else {
            return false;
        };
        let mut table = table.borrow_mut();
        let before = table.entries.len();
        table.entries.retain(|e| e.id != self.id);
        table.entries.len() != before
    }
}
