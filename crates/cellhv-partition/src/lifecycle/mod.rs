// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Cell lifecycle controller.
//!
//! [`PartitionManager`] owns the current validated snapshot, the state of
//! every cell and the pool of claimed resources. Each cell moves through
//!
//! ```text
//! Unloaded --load--> Loaded --start--> Running --stop--> Stopped --destroy--> Unloaded
//!                      |                                    ^   |
//!                      +---------------stop-----------------+   +--load--> Loaded
//! ```
//!
//! All mutations are serialized by one lock around the whole "validate,
//! then act" sequence. Hardware is only touched through the
//! [`Enforcement`] collaborator, and every collaborator call is bounded by
//! the platform's enforcement timeout.
//!
//! A call that times out is still running. It gets the settle timeout to
//! land before anything else is sent for that cell. A call that does not
//! land in time is kept as the cell's in-flight call and settled by the
//! next `start` or `stop`, so the recorded state never disagrees with a
//! late collaborator result.

mod pool;


use crate::config::PlatformConfig;
use crate::cpu::{CpuResolver, CpuSet};
use crate::descriptor::CellDescriptor;
use crate::enforcement::{Enforcement, Pending, spawn_call};
use crate::error::{EnforcementError, LifecycleError};
use crate::validator::{CellEntry, CellRole, ValidatedCellSet, Validator};
use cellhv_abi::{Architecture, CellId, MemoryRegion};
use parking_lot::Mutex;
use pool::ResourcePool;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, info_span, warn};

// =============================================================================
// States
// =============================================================================

/// Lifecycle state of a cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CellState {
    /// Part of the cell set, holding no resources.
    Unloaded,
    /// Resources claimed, not running.
    Loaded,
    /// Hardware programmed, running.
    Running,
    /// Hardware released, resources still claimed.
    Stopped,
}

impl CellState {
    /// Returns the lowercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loaded => "loaded",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for CellState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of [`PartitionManager::list_cells`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellSummary {
    /// Cell ID.
    pub id: CellId,
    /// Cell name.
    pub name: String,
    /// Root or inmate.
    pub role: CellRole,
    /// Current state.
    pub state: CellState,
    /// Target architecture.
    pub architecture: Architecture,
    /// Owned CPUs.
    pub cpus: CpuSet,
}

// =============================================================================
// Collaborator Calls
// =============================================================================

/// How one collaborator call ended.
enum Outcome {
    /// Returned within the enforcement timeout.
    Done(Result<(), EnforcementError>),
    /// Timed out, then landed within the settle timeout.
    Late(EnforcementError, Result<(), EnforcementError>),
    /// Timed out and still running after the settle timeout.
    Stuck(EnforcementError, Pending<()>),
}

/// A collaborator call that did not land within the settle timeout.
#[derive(Debug)]
enum InFlight {
    /// Memory or interrupt programming. The cell is released once it lands.
    Apply(Pending<()>),
    /// A release. On success the cell moves to `then`, if set.
    Release {
        call: Pending<()>,
        then: Option<CellState>,
    },
}

impl InFlight {
    const fn op(&self) -> &'static str {
        match self {
            Self::Apply(call) | Self::Release { call, .. } => call.op(),
        }
    }
}

// =============================================================================
// Partition Manager
// =============================================================================

struct Inner {
    snapshot: Option<Arc<ValidatedCellSet>>,
    states: BTreeMap<CellId, CellState>,
    pool: ResourcePool,
    in_flight: BTreeMap<CellId, InFlight>,
    next_id: CellId,
}

impl Inner {
    fn current(&self) -> Result<Arc<ValidatedCellSet>, LifecycleError> {
        self.snapshot.clone().ok_or(LifecycleError::NotEnabled)
    }

    fn commit(&mut self, set: ValidatedCellSet) {
        info!(version = set.version(), cells = set.len(), "cell set committed");
        self.snapshot = Some(Arc::new(set));
    }

    fn state(&self, id: CellId) -> Result<CellState, LifecycleError> {
        self.states
            .get(&id)
            .copied()
            .ok_or(LifecycleError::UnknownCell(id))
    }

    fn transition(&mut self, entry: &CellEntry, to: CellState) {
        if let Some(state) = self.states.insert(entry.id(), to) {
            info!(cell = entry.name(), from = %state, to = %to, "cell state changed");
        }
    }

    /// Applies the state a finished release leads to. Cells that are not
    /// part of the set yet (a root being enabled) have no state to change.
    fn released(&mut self, entry: &CellEntry, then: Option<CellState>) {
        let Some(to) = then else {
            return;
        };
        if self.states.contains_key(&entry.id()) {
            self.transition(entry, to);
        }
    }
}

/// Serialized owner of the active cell set.
pub struct PartitionManager {
    platform: PlatformConfig,
    resolver: Arc<CpuResolver>,
    enforcement: Arc<dyn Enforcement>,
    inner: Mutex<Inner>,
}

impl PartitionManager {
    /// Creates a manager with no cell set. Call [`enable`](Self::enable)
    /// with the root cell first.
    #[must_use]
    pub fn new(
        platform: PlatformConfig,
        resolver: Arc<CpuResolver>,
        enforcement: Arc<dyn Enforcement>,
    ) -> Self {
        Self {
            platform,
            resolver,
            enforcement,
            inner: Mutex::new(Inner {
                snapshot: None,
                states: BTreeMap::new(),
                pool: ResourcePool::new(),
                in_flight: BTreeMap::new(),
                next_id: CellId::ROOT.next(),
            }),
        }
    }

    /// Returns the platform configuration.
    #[must_use]
    pub const fn platform(&self) -> &PlatformConfig {
        &self.platform
    }

    /// Returns the CPU resolver.
    #[must_use]
    pub fn resolver(&self) -> &CpuResolver {
        &self.resolver
    }

    fn validator(&self) -> Validator<'_> {
        Validator::new(&self.platform, &self.resolver)
    }

    // =========================================================================
    // Cell Set Changes
    // =========================================================================

    /// Validates the root cell, programs it and marks it running.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::AlreadyEnabled`] if a root cell exists
    /// - [`LifecycleError::Validation`] if the root is rejected
    /// - [`LifecycleError::EnforcementFailed`] if programming fails; nothing
    ///   is committed then
    /// - [`LifecycleError::RollbackFailed`] or
    ///   [`LifecycleError::CallInFlight`] as for [`start`](Self::start)
    pub fn enable(&self, root: CellDescriptor) -> Result<CellId, LifecycleError> {
        let _span = info_span!("enable", cell = %root.name).entered();
        let mut inner = self.inner.lock();
        if inner.snapshot.is_some() {
            return Err(LifecycleError::AlreadyEnabled);
        }
        let set = self
            .validator()
            .validate(1, Arc::new(root), std::iter::empty::<CellEntry>())?;
        let root = set.root().clone();
        self.settle(&mut inner, &root)?;
        self.program(&mut inner, &root)?;

        inner.pool.claim(root.id(), root.descriptor());
        inner.states.insert(root.id(), CellState::Running);
        inner.commit(set);
        info!("partitioning enabled");
        Ok(root.id())
    }

    /// Adds an inmate to the cell set.
    ///
    /// The new set is validated as a whole and replaces the current one
    /// only on success. The cell starts out [`CellState::Unloaded`].
    ///
    /// # Errors
    ///
    /// [`LifecycleError::NotEnabled`] or [`LifecycleError::Validation`].
    pub fn add_cell(&self, desc: CellDescriptor) -> Result<CellId, LifecycleError> {
        let _span = info_span!("add_cell", cell = %desc.name).entered();
        let mut inner = self.inner.lock();
        self.add_locked(&mut inner, desc).map(|entry| entry.id())
    }

    /// Removes an unloaded inmate from the cell set.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::RootCellImmutable`] for the root cell
    /// - [`LifecycleError::UnknownCell`] if `id` is not in the set
    /// - [`LifecycleError::InvalidState`] unless the cell is unloaded
    pub fn remove_cell(&self, id: CellId) -> Result<(), LifecycleError> {
        let _span = info_span!("remove_cell", %id).entered();
        if id.is_root() {
            return Err(LifecycleError::RootCellImmutable);
        }
        let mut inner = self.inner.lock();
        let current = inner.current()?;
        let entry = lookup(&current, id)?;
        expect_state(&inner, &entry, "remove", &[CellState::Unloaded])?;

        let remaining = current
            .inmates()
            .iter()
            .filter(|other| other.id() != id)
            .cloned();
        let set = self
            .validator()
            .validate(current.version() + 1, current.root().shared(), remaining)?;
        inner.commit(set);
        inner.states.remove(&id);
        info!(cell = entry.name(), "cell removed");
        Ok(())
    }

    /// Adds an inmate and loads it in one step.
    ///
    /// # Errors
    ///
    /// See [`add_cell`](Self::add_cell).
    pub fn create(&self, desc: CellDescriptor) -> Result<CellId, LifecycleError> {
        let _span = info_span!("create", cell = %desc.name).entered();
        let mut inner = self.inner.lock();
        let entry = self.add_locked(&mut inner, desc)?;
        inner.pool.claim(entry.id(), entry.descriptor());
        inner.transition(&entry, CellState::Loaded);
        Ok(entry.id())
    }

    fn add_locked(&self, inner: &mut Inner, desc: CellDescriptor) -> Result<CellEntry, LifecycleError> {
        let current = inner.current()?;
        let entry = CellEntry::new(inner.next_id, Arc::new(desc));
        let candidate = current
            .inmates()
            .iter()
            .cloned()
            .chain(std::iter::once(entry.clone()));
        let set = self
            .validator()
            .validate(current.version() + 1, current.root().shared(), candidate)?;

        inner.commit(set);
        inner.states.insert(entry.id(), CellState::Unloaded);
        inner.next_id = entry.id().next();
        info!(id = %entry.id(), cell = entry.name(), "cell added");
        Ok(entry)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Loads a descriptor of the current snapshot and claims its resources.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NotValidated`] unless `desc` is, by name and
    ///   content, part of the current snapshot
    /// - [`LifecycleError::InvalidState`] unless the cell is unloaded or
    ///   stopped
    pub fn load(&self, desc: &CellDescriptor) -> Result<CellId, LifecycleError> {
        let _span = info_span!("load", cell = %desc.name).entered();
        let mut inner = self.inner.lock();
        let current = inner.current()?;
        let id = current
            .position_of(desc)
            .ok_or_else(|| LifecycleError::NotValidated {
                name: desc.name.clone(),
            })?;
        let entry = lookup(&current, id)?;
        let state = expect_state(
            &inner,
            &entry,
            "load",
            &[CellState::Unloaded, CellState::Stopped],
        )?;
        if state == CellState::Unloaded {
            inner.pool.claim(id, entry.descriptor());
        }
        inner.transition(&entry, CellState::Loaded);
        Ok(id)
    }

    /// Programs a loaded cell's memory and interrupts and marks it running.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::InvalidState`] unless the cell is loaded
    /// - [`LifecycleError::EnforcementFailed`] if a collaborator fails or
    ///   times out; everything applied is released again and the cell
    ///   stays loaded, so the call may be retried
    /// - [`LifecycleError::RollbackFailed`] if releasing after such a
    ///   failure fails too, or the failed call has not landed yet; the cell
    ///   stays loaded and must be stopped before it is started again
    /// - [`LifecycleError::CallInFlight`] if an earlier call for the cell
    ///   still has not landed
    pub fn start(&self, id: CellId) -> Result<(), LifecycleError> {
        let _span = info_span!("start", %id).entered();
        let mut inner = self.inner.lock();
        let current = inner.current()?;
        let entry = lookup(&current, id)?;
        self.settle(&mut inner, &entry)?;
        expect_state(&inner, &entry, "start", &[CellState::Loaded])?;
        self.program(&mut inner, &entry)?;
        inner.transition(&entry, CellState::Running);
        Ok(())
    }

    /// Releases a cell's hardware state. Valid after a failed start.
    ///
    /// If an earlier release is still in flight and lands now, the cell is
    /// already stopped and this succeeds without another release.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::RootCellImmutable`] for the root cell
    /// - [`LifecycleError::InvalidState`] unless running or loaded
    /// - [`LifecycleError::EnforcementFailed`] if release fails or times
    ///   out. The state follows the hardware: it is unchanged unless a
    ///   timed-out release still landed, which stops the cell.
    /// - [`LifecycleError::CallInFlight`] if an earlier call for the cell
    ///   still has not landed
    pub fn stop(&self, id: CellId) -> Result<(), LifecycleError> {
        let _span = info_span!("stop", %id).entered();
        if id.is_root() {
            return Err(LifecycleError::RootCellImmutable);
        }
        let mut inner = self.inner.lock();
        let current = inner.current()?;
        let entry = lookup(&current, id)?;
        if self.settle(&mut inner, &entry)? && inner.state(id)? == CellState::Stopped {
            return Ok(());
        }
        expect_state(
            &inner,
            &entry,
            "stop",
            &[CellState::Running, CellState::Loaded],
        )?;

        let err = match self.run(&entry, "release", move |e| e.release(id)) {
            Outcome::Done(Ok(())) => {
                inner.transition(&entry, CellState::Stopped);
                return Ok(());
            }
            Outcome::Done(Err(err)) => err,
            Outcome::Late(err, landed) => {
                if landed.is_ok() {
                    inner.transition(&entry, CellState::Stopped);
                }
                err
            }
            Outcome::Stuck(err, call) => {
                let then = Some(CellState::Stopped);
                inner.in_flight.insert(id, InFlight::Release { call, then });
                err
            }
        };
        warn!(cell = entry.name(), error = %err, "release failed");
        Err(LifecycleError::EnforcementFailed {
            cell: entry.name().to_owned(),
            reason: err.to_string(),
        })
    }

    /// Returns a stopped cell's resources to the free pool.
    ///
    /// The cell stays in the cell set as unloaded. Another cell can only
    /// take over its resources after it is removed and the new set passes
    /// validation.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::RootCellImmutable`] for the root cell
    /// - [`LifecycleError::InvalidState`] unless the cell is stopped
    pub fn destroy(&self, id: CellId) -> Result<(), LifecycleError> {
        let _span = info_span!("destroy", %id).entered();
        if id.is_root() {
            return Err(LifecycleError::RootCellImmutable);
        }
        let mut inner = self.inner.lock();
        let current = inner.current()?;
        let entry = lookup(&current, id)?;
        expect_state(&inner, &entry, "destroy", &[CellState::Stopped])?;
        inner.pool.release(id);
        inner.transition(&entry, CellState::Unloaded);
        Ok(())
    }

    /// Applies memory, then interrupts; on failure releases the cell again.
    fn program(&self, inner: &mut Inner, entry: &CellEntry) -> Result<(), LifecycleError> {
        let id = entry.id();
        let desc = entry.shared();
        let layout = Arc::clone(&desc);

        let outcome = match self.run(entry, "memory", move |e| {
            e.apply_memory_layout(id, &layout.memory_regions)
        }) {
            Outcome::Done(Ok(())) => self.run(entry, "irq", move |e| {
                e.apply_irq_routing(id, &desc.irq_routing)
            }),
            failed => failed,
        };

        let err = match outcome {
            Outcome::Done(Ok(())) => return Ok(()),
            Outcome::Done(Err(err)) | Outcome::Late(err, _) => err,
            Outcome::Stuck(err, call) => {
                let operation = call.op();
                error!(cell = entry.name(), operation, "call still in flight, release deferred");
                inner.in_flight.insert(id, InFlight::Apply(call));
                return Err(LifecycleError::RollbackFailed {
                    cell: entry.name().to_owned(),
                    reason: err.to_string(),
                    rollback: format!("`{operation}` still in flight"),
                });
            }
        };
        warn!(cell = entry.name(), error = %err, "enforcement failed, rolling back");
        match self.release(inner, entry) {
            Ok(()) => Err(LifecycleError::EnforcementFailed {
                cell: entry.name().to_owned(),
                reason: err.to_string(),
            }),
            Err(rollback) => {
                error!(cell = entry.name(), error = %rollback, "rollback failed");
                Err(LifecycleError::RollbackFailed {
                    cell: entry.name().to_owned(),
                    reason: err.to_string(),
                    rollback: rollback.to_string(),
                })
            }
        }
    }

    /// Releases a cell without changing its state. A release that lands
    /// after its timeout still counts.
    fn release(&self, inner: &mut Inner, entry: &CellEntry) -> Result<(), EnforcementError> {
        let id = entry.id();
        match self.run(entry, "release", move |e| e.release(id)) {
            Outcome::Done(result) | Outcome::Late(_, result) => result,
            Outcome::Stuck(err, call) => {
                inner.in_flight.insert(id, InFlight::Release { call, then: None });
                Err(err)
            }
        }
    }

    /// Waits for the cell's in-flight call, if any, and finishes what it
    /// left behind. Returns whether there was one.
    fn settle(&self, inner: &mut Inner, entry: &CellEntry) -> Result<bool, LifecycleError> {
        let Some(in_flight) = inner.in_flight.remove(&entry.id()) else {
            return Ok(false);
        };
        let operation = in_flight.op();
        let (call, then) = match &in_flight {
            InFlight::Apply(call) => (call, None),
            InFlight::Release { call, then } => (call, *then),
        };
        let landed = call.wait(self.platform.settle_timeout);
        if let Err(EnforcementError::TimedOut(_)) = landed {
            inner.in_flight.insert(entry.id(), in_flight);
            return Err(LifecycleError::CallInFlight {
                cell: entry.name().to_owned(),
                operation,
            });
        }
        info!(cell = entry.name(), operation, "in-flight call landed");

        match in_flight {
            InFlight::Apply(_) => {
                self.release(inner, entry).map_err(|err| {
                    error!(cell = entry.name(), error = %err, "rollback failed");
                    LifecycleError::EnforcementFailed {
                        cell: entry.name().to_owned(),
                        reason: err.to_string(),
                    }
                })?;
            }
            InFlight::Release { .. } => match landed {
                Ok(()) => inner.released(entry, then),
                Err(err) => warn!(cell = entry.name(), error = %err, "late release failed"),
            },
        }
        Ok(true)
    }

    /// Runs one collaborator call. A call that times out gets the settle
    /// timeout to land before it is handed back unfinished.
    fn run<F>(&self, entry: &CellEntry, operation: &'static str, call: F) -> Outcome
    where
        F: FnOnce(&dyn Enforcement) -> Result<(), EnforcementError> + Send + 'static,
    {
        let pending = match spawn_call(&self.enforcement, operation, call) {
            Ok(pending) => pending,
            Err(err) => return Outcome::Done(Err(err)),
        };
        let err = match pending.wait(self.platform.enforcement_timeout) {
            Err(err @ EnforcementError::TimedOut(_)) => err,
            result => return Outcome::Done(result),
        };
        warn!(cell = entry.name(), operation, "call timed out, waiting for it to land");
        match pending.wait(self.platform.settle_timeout) {
            Err(EnforcementError::TimedOut(_)) => Outcome::Stuck(err, pending),
            landed => Outcome::Late(err, landed),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Lists every cell of the current snapshot, root first.
    #[must_use]
    pub fn list_cells(&self) -> Vec<CellSummary> {
        let inner = self.inner.lock();
        let Some(set) = &inner.snapshot else {
            return Vec::new();
        };
        set.cells()
            .iter()
            .filter_map(|entry| {
                let state = inner.states.get(&entry.id()).copied()?;
                Some(CellSummary {
                    id: entry.id(),
                    name: entry.name().to_owned(),
                    role: entry.role(),
                    state,
                    architecture: entry.descriptor().architecture(),
                    cpus: entry.descriptor().cpu_set.clone(),
                })
            })
            .collect()
    }

    /// Returns a cell's state.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::UnknownCell`] if `id` is not in the set.
    pub fn cell_status(&self, id: CellId) -> Result<CellState, LifecycleError> {
        self.inner.lock().state(id)
    }

    /// Returns the current validated snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<ValidatedCellSet>> {
        self.inner.lock().snapshot.clone()
    }

    /// Returns the CPUs no loaded, running or stopped cell holds.
    #[must_use]
    pub fn free_cpus(&self) -> CpuSet {
        self.resolver
            .all_cpus()
            .difference(&self.inner.lock().pool.claimed_cpus())
    }

    /// Checks if a cell currently holds its resources.
    #[must_use]
    pub fn holds_resources(&self, id: CellId) -> bool {
        self.inner.lock().pool.is_claimed(id)
    }

    /// Returns the operation of a cell's call that outlived the settle
    /// timeout, if it has one.
    #[must_use]
    pub fn call_in_flight(&self, id: CellId) -> Option<&'static str> {
        self.inner.lock().in_flight.get(&id).map(InFlight::op)
    }

    /// Returns the physically backed regions held by cells.
    #[must_use]
    pub fn claimed_memory(&self) -> Vec<(CellId, MemoryRegion)> {
        self.inner
            .lock()
            .pool
            .claimed_regions()
            .map(|(id, region)| (id, *region))
            .collect()
    }

    /// Returns the number of interrupt pins held by cells.
    #[must_use]
    pub fn claimed_pin_count(&self) -> u32 {
        self.inner.lock().pool.claimed_pin_count()
    }
}

impl fmt::Debug for PartitionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PartitionManager")
            .field("version", &inner.snapshot.as_ref().map(|set| set.version()))
            .field("states", &inner.states)
            .finish_non_exhaustive()
    }
}

fn lookup(set: &ValidatedCellSet, id: CellId) -> Result<CellEntry, LifecycleError> {
    set.get(id).cloned().ok_or(LifecycleError::UnknownCell(id))
}

fn expect_state(
    inner: &Inner,
    entry: &CellEntry,
    operation: &'static str,
    allowed: &[CellState],
) -> Result<CellState, LifecycleError> {
    let state = inner.state(entry.id())?;
    if allowed.contains(&state) {
        Ok(state)
    } else {
        Err(LifecycleError::InvalidState {
            cell: entry.name().to_owned(),
            state,
            operation,
        })
    }
}
