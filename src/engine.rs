// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The operation engine: one per site, orchestrating timestamping of local
//! edits, transformation of remote ones, history garbage collection, and site
//! membership.
//!
//! The engine is deliberately transport-agnostic. It never talks to a
//! network; callers feed it operations and engine-sync messages as they
//! arrive and broadcast whatever it returns. The delivery contract it relies
//! on is modest: operations from a single site arrive in generation order,
//! and anything may be delivered more than once (duplicates are detected and
//! absorbed here, so at-least-once transports need no extra bookkeeping).
//!
//! Incorporating a remote operation is a fold over the context difference —
//! the operations this site has seen but the sender had not. Each historical
//! operation in the difference is itself brought into the incoming
//! operation's context first, recursively, before being folded in. The
//! recursion bottoms out because every step works against strictly older
//! history.
//!
//! Failures are sticky. [`EngineError`] means local history no longer covers
//! what a peer sent — the engine cannot guarantee convergence afterwards, and
//! the instance should be discarded and reseeded from a healthy peer via
//! [`OperationEngine::state`].

use std::cmp::Ordering;
use std::fmt;

use tracing::{debug, trace};

use crate::context::{ContextDifference, ContextVector, OpId, SiteId};
use crate::history::{HistoryBuffer, MissingOperation};
use crate::operation::{Operation, OperationKind, PropertyValue};
use crate::table::ContextVectorTable;

/// Failure modes of [`OperationEngine::push_remote`] and
/// [`OperationEngine::purge`].
///
/// Both variants are protocol-fatal: once raised, the engine can no longer
/// guarantee that its document converges with its peers. Expected conditions
/// — duplicate delivery, an operation voided by concurrent edits — are
/// reported as `Ok(None)`, never as errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineError {
    /// An operation needed to bridge two contexts is not in the history
    /// buffer: it was purged too early or never delivered.
    MissingOperation(OpId),
    /// Two operations could not be brought into a common context; the
    /// offending operation claims a generation context that is causally
    /// impossible given local history.
    ContextMismatch {
        /// The operation being transformed.
        op: OpId,
        /// The historical operation it could not be aligned with.
        other: OpId,
    },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::MissingOperation(id) => {
                write!(f, "operation {id} is not in the history buffer")
            }
            EngineError::ContextMismatch { op, other } => {
                write!(f, "operation {op} cannot be brought into the context of {other}")
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<MissingOperation> for EngineError {
    fn from(err: MissingOperation) -> Self {
        EngineError::MissingOperation(err.0)
    }
}

/// Everything a late-joining engine needs to take over a site's view of the
/// document: the context vector table, the retained history, the seeding
/// site's id, and which slots were frozen.
///
/// With the `serde` feature this serializes as a fixed-position array,
/// `[table, history, site, frozen]`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(::serde::Deserialize, ::serde::Serialize),
    serde(from = "WireEngineState", into = "WireEngineState")
)]
pub struct EngineState {
    /// One context vector per known site, padded to the table width.
    pub table: Vec<ContextVector>,
    /// The seeding site's history buffer, sorted by id.
    pub history: Vec<Operation>,
    /// The site the state was captured at.
    pub site: SiteId,
    /// Sites whose table slots were frozen at the seeder, local slot excluded.
    pub frozen: Vec<SiteId>,
}

#[cfg(feature = "serde")]
#[derive(::serde::Deserialize, ::serde::Serialize)]
struct WireEngineState(Vec<ContextVector>, Vec<Operation>, SiteId, Vec<SiteId>);

#[cfg(feature = "serde")]
impl From<WireEngineState> for EngineState {
    fn from(wire: WireEngineState) -> Self {
        let WireEngineState(table, history, site, frozen) = wire;
        EngineState {
            table,
            history,
            site,
            frozen,
        }
    }
}

#[cfg(feature = "serde")]
impl From<EngineState> for WireEngineState {
    fn from(state: EngineState) -> Self {
        WireEngineState(state.table, state.history, state.site, state.frozen)
    }
}

/// The per-site heart of the transformation algorithm.
///
/// An engine holds the local context vector (what this site has
/// incorporated), the history buffer (the operations themselves), and the
/// context vector table (what every other site is known to have
/// incorporated). Local edits go through [`push_local`], remote ones through
/// [`push_remote`]; [`purge`] trims history that no site can still need.
///
/// [`push_local`]: OperationEngine::push_local
/// [`push_remote`]: OperationEngine::push_remote
/// [`purge`]: OperationEngine::purge
#[derive(Clone, Debug)]
pub struct OperationEngine {
    site: SiteId,
    cv: ContextVector,
    cvt: ContextVectorTable,
    hb: HistoryBuffer,
    site_count: usize,
}

impl OperationEngine {
    /// Creates the engine for a site, initially aware only of itself and of
    /// lower site ids at sequence zero.
    #[must_use]
    pub fn new(site: SiteId) -> Self {
        Self {
            site,
            cv: ContextVector::with_sites(site as usize + 1),
            cvt: ContextVectorTable::new(site),
            hb: HistoryBuffer::new(),
            site_count: 1,
        }
    }

    /// The site this engine runs at.
    #[must_use]
    pub fn site_id(&self) -> SiteId {
        self.site
    }

    /// The local document state: everything this engine has incorporated.
    #[must_use]
    pub fn context_vector(&self) -> &ContextVector {
        &self.cv
    }

    /// A copy of the local context vector, as carried by engine-sync
    /// messages.
    #[must_use]
    pub fn copy_context_vector(&self) -> ContextVector {
        self.cv.clone()
    }

    /// Number of operations retained for future transforms. Grows while any
    /// tracked site lags behind; callers can watch it to spot stalled peers.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.hb.len()
    }

    /// Number of participating (non-frozen) sites, this one included.
    #[must_use]
    pub fn site_count(&self) -> usize {
        self.site_count
    }

    /// True if this engine has already incorporated `op`, or a later
    /// operation from the same site.
    #[must_use]
    pub fn has_processed(&self, op: &Operation) -> bool {
        self.cv.seq_for_site(op.site()) >= op.seq()
    }

    /// Timestamps a locally generated edit and records it in history.
    ///
    /// The operation is expressed against the current local context, so it
    /// needs no transformation here; the returned copy is what the transport
    /// should deliver to every other site.
    pub fn push_local(
        &mut self,
        kind: OperationKind,
        key: impl Into<String>,
        value: PropertyValue,
        position: usize,
    ) -> Operation {
        let op = Operation::local(self.site, self.cv.clone(), kind, key, value, position);
        trace!(id = %op.id(), "generated local operation");
        self.cv.set_seq_for_site(op.site(), op.seq());
        self.hb.add(op.clone());
        op
    }

    /// Incorporates an operation received from another site.
    ///
    /// Returns the operation to apply to the local document: a copy of `op`
    /// expressed in the local context. `Ok(None)` means there is nothing to
    /// apply, either because the operation was already processed (duplicate
    /// delivery is expected and harmless) or because concurrent edits voided
    /// it entirely. The operation still enters history in its original form
    /// in the latter case; later arrivals may need it.
    ///
    /// Duplicates are not entirely inert: one that carries a total-order
    /// rank backfills the rank of the stored copy. This is how a local
    /// operation learns its place in the total order when a sequencing
    /// transport echoes it back.
    ///
    /// # Errors
    ///
    /// Fails when local history no longer covers the operation's generation
    /// context ([`EngineError::MissingOperation`]) or the context cannot be
    /// aligned with local history ([`EngineError::ContextMismatch`]). Errors
    /// leave the engine untouched, but mean it can no longer guarantee
    /// convergence; see [`EngineError`].
    pub fn push_remote(&mut self, op: Operation) -> Result<Option<Operation>, EngineError> {
        if self.has_processed(&op) {
            // still let the buffer learn the rank: the echo of a local
            // operation is the first copy of it seen here that carries one
            if let Some(order) = op.order() {
                self.hb.record_order(op.id(), order);
            }
            trace!(id = %op.id(), "skipping already processed operation");
            return Ok(None);
        }
        let transformed = if op.context() == &self.cv {
            // already expressed in the local context
            Some(op.clone())
        } else {
            let difference = self.cv.subtract(op.context());
            debug!(
                id = %op.id(),
                missing = difference.len(),
                "transforming remote operation"
            );
            self.transform(&op, &difference)?
        };
        self.cv.set_seq_for_site(op.site(), op.seq());
        self.cvt.update_with_operation(&op);
        // history keeps the original: future transforms start from the
        // operation's own generation context, not from ours
        self.hb.add(op);
        Ok(transformed)
    }

    /// Records that `site` has reached the document state described by `cv`.
    ///
    /// Engine-sync messages let idle sites keep advancing the garbage
    /// collection boundary without generating operations.
    pub fn push_sync(&mut self, site: SiteId, cv: ContextVector) {
        trace!(site, cv = ?cv, "engine sync");
        self.cvt.set_context_vector(site, cv);
    }

    /// Transforms `op` against every operation named by `difference`,
    /// bringing each historical operation into `op`'s context first.
    fn transform(
        &self,
        op: &Operation,
        difference: &ContextDifference,
    ) -> Result<Option<Operation>, EngineError> {
        let ops = self.hb.get_ops_for_difference(difference)?;
        let mut working = op.clone();
        for entry in ops {
            let aligned;
            let mut xop = entry;
            if working.context() != xop.context() {
                let gap = working.context().subtract(xop.context());
                if gap.is_empty() {
                    return Err(EngineError::ContextMismatch {
                        op: working.id(),
                        other: xop.id(),
                    });
                }
                trace!(id = %working.id(), against = %xop.id(), "aligning historical operation");
                match self.transform(xop, &gap)? {
                    Some(x) => {
                        aligned = x;
                        xop = &aligned;
                    }
                    None => {
                        // voided on the way up; it still happened
                        working.advance_context(entry.id());
                        continue;
                    }
                }
            }
            if working.context() != xop.context() {
                return Err(EngineError::ContextMismatch {
                    op: working.id(),
                    other: xop.id(),
                });
            }
            working = match working.transformed_against(xop) {
                Some(next) => next,
                None => return Ok(None),
            };
            working.advance_context(xop.id());
        }
        Ok(Some(working))
    }

    /// Garbage-collects operations no known site can still need.
    ///
    /// Runs in two phases. Phase one starts from the table's per-site minimum
    /// and chases oldest-difference chains down to the earliest operation
    /// some transform may still reach — the naive minimum alone undercounts
    /// dependencies pulled in recursively. Phase two sweeps the
    /// context-sorted buffer from the front, stopping at that operation.
    ///
    /// Returns the minimum context vector the sweep ran against, or `None`
    /// when the buffer is empty or the table has no minimum.
    ///
    /// # Errors
    ///
    /// Fails with [`EngineError::MissingOperation`] if the buffer no longer
    /// resolves a difference it produced itself, which means history was
    /// corrupted earlier.
    pub fn purge(&mut self) -> Result<Option<ContextVector>, EngineError> {
        if self.hb.is_empty() {
            return Ok(None);
        }
        let Some(mcv) = self.cvt.minimum_context_vector(&self.cv) else {
            return Ok(None);
        };

        let min_id = {
            let difference = self.cv.oldest_difference(&mcv);
            let mut work = self.hb.get_ops_for_difference(&difference)?;
            let mut min_op: Option<&Operation> = None;
            while let Some(curr) = work.pop() {
                let earlier =
                    min_op.is_none_or(|min| curr.compare_by_context(min) == Ordering::Less);
                if earlier {
                    let difference = self.cv.oldest_difference(curr.context());
                    work.extend(self.hb.get_ops_for_difference(&difference)?);
                    min_op = Some(curr);
                }
            }
            min_op.map(Operation::id)
        };

        let doomed: Vec<OpId> = self
            .hb
            .context_sorted_ops()
            .into_iter()
            .map(Operation::id)
            .collect();
        let mut evicted = 0;
        for id in doomed {
            if Some(id) == min_id {
                break;
            }
            self.hb.remove(id);
            evicted += 1;
        }
        debug!(evicted, minimum = ?mcv, "purged history buffer");
        Ok(Some(mcv))
    }

    /// Marks `site` as departed. Its table slot is pinned to the local
    /// vector, so the site stops holding back garbage collection. Freezing an
    /// already frozen site changes nothing.
    pub fn freeze_site(&mut self, site: SiteId) {
        if self.cvt.is_frozen(site) {
            return;
        }
        self.cvt.freeze_site(site);
        self.site_count = self.site_count.saturating_sub(1);
        debug!(site, site_count = self.site_count, "froze departed site");
    }

    /// Marks `site` as joined or returned. Its table slot starts from the
    /// current table minimum, the most that can be assumed about a newcomer.
    /// Thawing the local site is ignored.
    pub fn thaw_site(&mut self, site: SiteId) {
        if site == self.site {
            return;
        }
        self.cvt.thaw_site(site, &self.cv);
        self.site_count += 1;
        debug!(site, site_count = self.site_count, "thawed joined site");
    }

    /// Captures everything a late joiner needs to seed its own engine from
    /// this site's view.
    #[must_use]
    pub fn state(&self) -> EngineState {
        EngineState {
            table: self.cvt.state(&self.cv),
            history: self.hb.state(),
            site: self.site,
            frozen: self.cvt.frozen_sites(self.site),
        }
    }

    /// Adopts state captured at another site, replacing table, history, and
    /// context vector wholesale.
    ///
    /// The local vector becomes a copy of the seeder's, the local slot is
    /// frozen as every engine's own slot is, and slots frozen at the seeder
    /// are frozen here too. The caller remains responsible for announcing
    /// this site to the session so peers thaw it.
    pub fn set_state(&mut self, state: EngineState) {
        let EngineState {
            table,
            history,
            site: seeder,
            frozen,
        } = state;
        self.cvt = ContextVectorTable::from_state(table);
        self.hb = HistoryBuffer::from_state(history);
        self.cv = self.cvt.context_vector(seeder, &self.cv);
        self.cvt.freeze_site(self.site);
        self.site_count = self.cv.len();
        debug!(seeder, ops = self.hb.len(), "adopted engine state");
        for site in frozen {
            self.freeze_site(site);
        }
    }
}
