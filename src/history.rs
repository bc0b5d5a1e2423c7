// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The history buffer: every operation this site has incorporated, retained
//! until garbage collection proves no other site can still need it.
//!
//! The buffer is the arena the transform algorithm works against. A
//! [`ContextDifference`] names operations by [`OpId`], and
//! [`HistoryBuffer::get_ops_for_difference`] resolves those ids back to the
//! stored originals. An id that cannot be resolved means an operation was
//! purged too early or never delivered; the engine cannot recover from that
//! locally, so resolution fails loudly instead of guessing.
//!
//! Stored operations are immutable. The buffer owns the canonical copy of
//! every operation exactly as it was first recorded, in its original context;
//! transformation always works on copies.

use std::collections::HashMap;
use std::fmt;

use ahash::RandomState;

use crate::context::{ContextDifference, OpId};
use crate::operation::Operation;

/// An [`OpId`] that could not be resolved against the buffer.
///
/// Raised by [`HistoryBuffer::get_ops_for_difference`] when a context
/// difference names an operation the buffer does not hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MissingOperation(pub OpId);

impl fmt::Display for MissingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation {} is not in the history buffer", self.0)
    }
}

impl std::error::Error for MissingOperation {}

/// All operations known to a site, keyed by [`OpId`].
#[derive(Clone, Debug, Default)]
pub struct HistoryBuffer {
    ops: HashMap<OpId, Operation, RandomState>,
}

impl HistoryBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of operations currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True if nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Records an operation under its id.
    pub fn add(&mut self, op: Operation) {
        self.ops.insert(op.id(), op);
    }

    /// Evicts the operation with the given id, returning it if it was there.
    pub fn remove(&mut self, id: OpId) -> Option<Operation> {
        self.ops.remove(&id)
    }

    /// Backfills the total-order rank of a stored operation.
    ///
    /// Local operations enter the buffer unranked; the rank becomes known
    /// only when the sequenced copy echoes back from the transport. Ids the
    /// buffer does not hold and operations already ranked are left alone, so
    /// redelivered echoes are harmless.
    pub fn record_order(&mut self, id: OpId, order: u64) {
        if let Some(stored) = self.ops.get(&id) {
            if stored.order().is_some() {
                return;
            }
            let ranked = stored.with_order(order);
            self.ops.insert(id, ranked);
        }
    }

    /// Resolves every id in `difference` to its stored operation, sorted by
    /// total order.
    ///
    /// Ranked operations come first in rank order; unranked ones follow,
    /// ordered by sequence number and then by the difference's own
    /// site-ascending construction order.
    ///
    /// # Errors
    ///
    /// Fails with [`MissingOperation`] on the first id the buffer cannot
    /// resolve.
    pub fn get_ops_for_difference(
        &self,
        difference: &ContextDifference,
    ) -> Result<Vec<&Operation>, MissingOperation> {
        let mut ops = Vec::with_capacity(difference.len());
        for id in difference.ids() {
            let op = self.ops.get(id).ok_or(MissingOperation(*id))?;
            ops.push(op);
        }
        ops.sort_by(|a, b| a.compare_by_order(b));
        Ok(ops)
    }

    /// Every retained operation, sorted by generation context. Operations
    /// generated in older document states sort first; garbage collection
    /// sweeps this view from the front.
    #[must_use]
    pub fn context_sorted_ops(&self) -> Vec<&Operation> {
        let mut ops: Vec<&Operation> = self.ops.values().collect();
        ops.sort_by(|a, b| a.compare_by_context(b));
        ops
    }

    /// The buffer contents as a serializable list, sorted by id so equal
    /// buffers produce identical state.
    #[must_use]
    pub fn state(&self) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self.ops.values().cloned().collect();
        ops.sort_by_key(Operation::id);
        ops
    }

    /// Rebuilds a buffer from serialized state.
    #[must_use]
    pub fn from_state(ops: Vec<Operation>) -> Self {
        let mut buffer = Self::new();
        for op in ops {
            buffer.add(op);
        }
        buffer
    }
}
