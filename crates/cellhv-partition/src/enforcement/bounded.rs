// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Time-bounded collaborator calls.

use super::Enforcement;
use crate::error::EnforcementError;
use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// A collaborator call running on its own worker thread.
///
/// Waiting may time out any number of times; the result stays receivable
/// until it has been taken once. A worker that panics is reported as
/// [`EnforcementError::Disconnected`].
pub(crate) struct Pending<T> {
    op: &'static str,
    rx: Receiver<Result<T, EnforcementError>>,
}

impl<T> Pending<T> {
    /// Returns the operation name the worker was started for.
    pub(crate) const fn op(&self) -> &'static str {
        self.op
    }

    /// Waits at most `timeout` for the worker's result.
    pub(crate) fn wait(&self, timeout: Duration) -> Result<T, EnforcementError> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(EnforcementError::TimedOut(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(EnforcementError::Disconnected),
        }
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending").field("op", &self.op).finish_non_exhaustive()
    }
}

/// Starts `call` on a worker thread named `enforce-{op}`.
///
/// The caller bounds the wait through [`Pending::wait`]. Dropping the
/// handle detaches the worker.
pub(crate) fn spawn_call<T, F>(
    enforcement: &Arc<dyn Enforcement>,
    op: &'static str,
    call: F,
) -> Result<Pending<T>, EnforcementError>
where
    T: Send + 'static,
    F: FnOnce(&dyn Enforcement) -> Result<T, EnforcementError> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    let worker = Arc::clone(enforcement);
    thread::Builder::new()
        .name(format!("enforce-{op}"))
        .spawn(move || {
            // The receiver may be gone.
            let _ = tx.send(call(worker.as_ref()));
        })
        .map_err(|err| EnforcementError::Rejected(format!("cannot spawn {op} worker: {err}")))?;
    Ok(Pending { op, rx })
}
