// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Recording enforcement backend.
//!
//! Keeps the "hardware" state in memory and records every call, so the
//! lifecycle controller can be tested without a hypervisor. Failures and
//! stalls can be scripted per operation.

use super::Enforcement;
use crate::descriptor::IrqRouting;
use crate::error::EnforcementError;
use cellhv_abi::{CellId, MemoryRegion};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::thread;
use std::time::Duration;

/// Collaborator operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnforcementOp {
    /// [`Enforcement::apply_memory_layout`].
    MemoryLayout,
    /// [`Enforcement::apply_irq_routing`].
    IrqRouting,
    /// [`Enforcement::release`].
    Release,
}

/// One recorded call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnforcementCall {
    /// The operation.
    pub op: EnforcementOp,
    /// The target cell.
    pub cell: CellId,
}

#[derive(Debug)]
enum Script {
    Fail(String),
    Stall(Duration),
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<EnforcementCall>,
    scripts: HashMap<EnforcementOp, VecDeque<Script>>,
    memory: BTreeMap<CellId, Vec<MemoryRegion>>,
    irqs: BTreeMap<CellId, IrqRouting>,
}

/// In-memory [`Enforcement`] that records calls.
#[derive(Debug, Default)]
pub struct RecordingEnforcement {
    state: Mutex<State>,
}

impl RecordingEnforcement {
    /// Creates a backend where every call succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call of `op` fail with `reason`.
    pub fn fail_next(&self, op: EnforcementOp, reason: impl Into<String>) {
        self.script(op, Script::Fail(reason.into()));
    }

    /// Makes the next call of `op` block for `duration` before succeeding.
    pub fn stall_next(&self, op: EnforcementOp, duration: Duration) {
        self.script(op, Script::Stall(duration));
    }

    /// Returns every call made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<EnforcementCall> {
        self.state.lock().calls.clone()
    }

    /// Returns the operations called for `cell`, in order.
    #[must_use]
    pub fn calls_for(&self, cell: CellId) -> Vec<EnforcementOp> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.cell == cell)
            .map(|call| call.op)
            .collect()
    }

    /// Checks if any state is currently programmed for `cell`.
    #[must_use]
    pub fn is_programmed(&self, cell: CellId) -> bool {
        let state = self.state.lock();
        state.memory.contains_key(&cell) || state.irqs.contains_key(&cell)
    }

    /// Returns the regions currently mapped for `cell`.
    #[must_use]
    pub fn mapped_regions(&self, cell: CellId) -> Option<Vec<MemoryRegion>> {
        self.state.lock().memory.get(&cell).cloned()
    }

    /// Returns the routing currently applied for `cell`.
    #[must_use]
    pub fn routed_irqs(&self, cell: CellId) -> Option<IrqRouting> {
        self.state.lock().irqs.get(&cell).cloned()
    }

    fn script(&self, op: EnforcementOp, script: Script) {
        self.state
            .lock()
            .scripts
            .entry(op)
            .or_default()
            .push_back(script);
    }

    /// Records the call and plays its script. The lock is not held while
    /// stalling.
    fn enter(&self, op: EnforcementOp, cell: CellId) -> Result<(), EnforcementError> {
        let script = {
            let mut state = self.state.lock();
            state.calls.push(EnforcementCall { op, cell });
            state.scripts.get_mut(&op).and_then(VecDeque::pop_front)
        };
        match script {
            Some(Script::Fail(reason)) => Err(EnforcementError::Rejected(reason)),
            Some(Script::Stall(duration)) => {
                thread::sleep(duration);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Enforcement for RecordingEnforcement {
    fn apply_memory_layout(
        &self,
        cell: CellId,
        regions: &[MemoryRegion],
    ) -> Result<(), EnforcementError> {
        self.enter(EnforcementOp::MemoryLayout, cell)?;
        self.state.lock().memory.insert(cell, regions.to_vec());
        Ok(())
    }

    fn apply_irq_routing(&self, cell: CellId, routing: &IrqRouting) -> Result<(), EnforcementError> {
        self.enter(EnforcementOp::IrqRouting, cell)?;
        self.state.lock().irqs.insert(cell, routing.clone());
        Ok(())
    }

    fn release(&self, cell: CellId) -> Result<(), EnforcementError> {
        self.enter(EnforcementOp::Release, cell)?;
        let mut state = self.state.lock();
        state.memory.remove(&cell);
        state.irqs.remove(&cell);
        Ok(())
    }
}
