// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The context vector table: what document state each site is known to have
//! reached.
//!
//! Garbage collection hinges on this table. An operation can only be dropped
//! from the history buffer once every site has incorporated it, and the table
//! is where that knowledge accumulates: each received operation or engine-sync
//! message advances the sender's slot, and the per-site minimum across all
//! slots bounds what may still be needed for future transforms.
//!
//! A site that goes quiet would pin that minimum forever. Freezing its slot
//! takes it out of the equation: a frozen slot always reads as the local
//! engine's own vector, and so never lags. Thawing reverses this for a site
//! that joins or returns, seeding its slot from the current table minimum.

use crate::context::{ContextVector, SiteId};
use crate::operation::Operation;

/// One slot of the table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TableSlot {
    /// The most recent context vector reported for this site.
    Tracked(ContextVector),
    /// The slot mirrors the local engine's own vector: its site is not
    /// expected to generate operations and must not hold back garbage
    /// collection.
    Frozen,
}

/// Context vectors for all known sites, indexed by site id.
#[derive(Clone, Debug, Default)]
pub struct ContextVectorTable {
    slots: Vec<TableSlot>,
}

impl ContextVectorTable {
    /// Creates the table for an engine at `site`.
    ///
    /// Every lower site id gets a zeroed tracked slot, since nothing can be
    /// assumed about sites never heard from; the local slot starts frozen.
    #[must_use]
    pub fn new(site: SiteId) -> Self {
        let mut table = Self::default();
        table.grow_to(site as usize + 1);
        table.slots[site as usize] = TableSlot::Frozen;
        table
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if the table has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Grows the table to hold `count` slots, padding every tracked vector to
    /// the new width. New slots start zeroed.
    pub fn grow_to(&mut self, count: usize) {
        for slot in &mut self.slots {
            if let TableSlot::Tracked(cv) = slot {
                cv.grow_to(count);
            }
        }
        for _ in self.slots.len()..count {
            self.slots.push(TableSlot::Tracked(ContextVector::with_sites(count)));
        }
    }

    /// The vector recorded for `site`, growing the table to include the site
    /// if needed. A frozen slot reads as a copy of `local`.
    #[must_use]
    pub fn context_vector(&mut self, site: SiteId, local: &ContextVector) -> ContextVector {
        let index = site as usize;
        if self.slots.len() <= index {
            self.grow_to(index + 1);
        }
        match &self.slots[index] {
            TableSlot::Tracked(cv) => cv.clone(),
            TableSlot::Frozen => local.clone(),
        }
    }

    /// Records `cv` as the latest vector known for `site`, growing the table
    /// and the incoming vector to cover the site's own entry.
    pub fn set_context_vector(&mut self, site: SiteId, mut cv: ContextVector) {
        let index = site as usize;
        if self.slots.len() <= index {
            self.grow_to(index + 1);
        }
        cv.grow_to(index + 1);
        self.slots[index] = TableSlot::Tracked(cv);
    }

    /// Derives the sender's state right after generating `op` — its generation
    /// context plus the operation itself — and records it for the sending
    /// site.
    pub fn update_with_operation(&mut self, op: &Operation) {
        let mut cv = op.context().clone();
        cv.set_seq_for_site(op.site(), op.seq());
        self.set_context_vector(op.site(), cv);
    }

    /// The per-site minimum across all slots: the document state every known
    /// site has reached. Frozen slots contribute `local`. [`None`] if the
    /// table is empty.
    #[must_use]
    pub fn minimum_context_vector(&self, local: &ContextVector) -> Option<ContextVector> {
        let mut vectors = self.slots.iter().map(|slot| match slot {
            TableSlot::Tracked(cv) => cv,
            TableSlot::Frozen => local,
        });
        let mut mcv = vectors.next()?.clone();
        for cv in vectors {
            let width = mcv.len().max(cv.len());
            mcv = (0..width)
                .map(|site| {
                    let site = site as SiteId;
                    mcv.seq_for_site(site).min(cv.seq_for_site(site))
                })
                .collect();
        }
        Some(mcv)
    }

    /// Pins `site`'s slot to the local engine's vector.
    pub fn freeze_site(&mut self, site: SiteId) {
        let index = site as usize;
        if self.slots.len() <= index {
            self.grow_to(index + 1);
        }
        self.slots[index] = TableSlot::Frozen;
    }

    /// Re-opens `site`'s slot with a copy of the current table minimum: a
    /// joiner is assumed to know at least as much as the least-informed
    /// current participant.
    pub fn thaw_site(&mut self, site: SiteId, local: &ContextVector) {
        let cv = self.minimum_context_vector(local).unwrap_or_default();
        self.set_context_vector(site, cv);
    }

    /// True if `site`'s slot is pinned to the local vector.
    #[must_use]
    pub fn is_frozen(&self, site: SiteId) -> bool {
        matches!(self.slots.get(site as usize), Some(TableSlot::Frozen))
    }

    /// Sites whose slots are frozen, excluding `skip` (conventionally the
    /// local site, frozen by construction).
    #[must_use]
    pub fn frozen_sites(&self, skip: SiteId) -> Vec<SiteId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(site, slot)| {
                let site = site as SiteId;
                (site != skip && matches!(slot, TableSlot::Frozen)).then_some(site)
            })
            .collect()
    }

    /// The table contents as a serializable list: one vector per slot, each
    /// padded to the table width. Frozen slots render as `local`.
    #[must_use]
    pub fn state(&self, local: &ContextVector) -> Vec<ContextVector> {
        let width = self.slots.len();
        self.slots
            .iter()
            .map(|slot| {
                let mut cv = match slot {
                    TableSlot::Tracked(cv) => cv.clone(),
                    TableSlot::Frozen => local.clone(),
                };
                cv.grow_to(width);
                cv
            })
            .collect()
    }

    /// Rebuilds a table from serialized state. Every slot starts tracked; the
    /// receiving engine re-freezes slots from the frozen-site list carried
    /// alongside.
    #[must_use]
    pub fn from_state(vectors: Vec<ContextVector>) -> Self {
        Self {
            slots: vectors.into_iter().map(TableSlot::Tracked).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_vector;
    use crate::operation::{OperationKind, PropertyValue};

    #[test]
    fn new_table_freezes_the_local_slot() {
        let table = ContextVectorTable::new(2);
        assert_eq!(table.len(), 3);
        assert!(table.is_frozen(2));
        assert!(!table.is_frozen(0));
        assert!(!table.is_frozen(1));
        assert!(!table.is_frozen(7));
    }

    #[test]
    fn reads_grow_the_table() {
        let mut table = ContextVectorTable::new(0);
        let local = context_vector![4];

        assert_eq!(table.context_vector(0, &local), local);
        assert_eq!(table.context_vector(3, &local), context_vector![0, 0, 0, 0]);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn set_pads_the_incoming_vector() {
        let mut table = ContextVectorTable::new(0);
        table.set_context_vector(3, context_vector![1, 1]);

        assert_eq!(table.len(), 4);
        let local = context_vector![];
        assert_eq!(table.context_vector(3, &local), context_vector![1, 1, 0, 0]);
    }

    #[test]
    fn operations_advance_their_senders_slot() {
        let mut table = ContextVectorTable::new(0);
        let op = Operation::remote(
            1,
            3,
            context_vector![2, 2],
            OperationKind::Insert,
            "k",
            PropertyValue::Null,
            0,
            None,
        );
        table.update_with_operation(&op);

        let local = context_vector![];
        assert_eq!(table.context_vector(1, &local), context_vector![2, 3]);
    }

    #[test]
    fn minimum_is_the_per_site_floor() {
        let mut table = ContextVectorTable::new(2);
        let local = context_vector![9, 9, 9];
        table.set_context_vector(0, context_vector![2, 1, 3]);
        table.set_context_vector(1, context_vector![1, 3]);

        // slot 1's vector is short: site 2 reads as zero there
        assert_eq!(
            table.minimum_context_vector(&local),
            Some(context_vector![1, 1, 0])
        );
    }

    #[test]
    fn frozen_slots_contribute_the_local_vector() {
        let mut table = ContextVectorTable::new(0);
        table.set_context_vector(1, context_vector![1, 1]);
        let local = context_vector![5, 2];

        assert_eq!(
            table.minimum_context_vector(&local),
            Some(context_vector![1, 1])
        );

        table.freeze_site(1);
        assert_eq!(
            table.minimum_context_vector(&local),
            Some(context_vector![5, 2])
        );
    }

    #[test]
    fn empty_table_has_no_minimum() {
        let table = ContextVectorTable::from_state(Vec::new());
        assert_eq!(table.minimum_context_vector(&context_vector![1]), None);
    }

    #[test]
    fn thawing_seeds_from_the_minimum() {
        let mut table = ContextVectorTable::new(0);
        table.set_context_vector(1, context_vector![3, 1]);
        let local = context_vector![4, 2];

        table.thaw_site(2, &local);
        assert!(!table.is_frozen(2));
        assert_eq!(table.context_vector(2, &local), context_vector![3, 1, 0]);
    }

    #[test]
    fn frozen_sites_skip_the_local_site() {
        let mut table = ContextVectorTable::new(1);
        table.freeze_site(3);
        assert_eq!(table.frozen_sites(1), vec![3]);
        assert_eq!(table.frozen_sites(0), vec![1, 3]);
    }

    #[test]
    fn state_pads_to_the_table_width() {
        let mut table = ContextVectorTable::new(1);
        table.set_context_vector(2, context_vector![1, 1, 1]);
        let local = context_vector![2];

        let state = table.state(&local);
        assert_eq!(
            state,
            vec![
                context_vector![0, 0, 0],
                context_vector![2, 0, 0],
                context_vector![1, 1, 1],
            ]
        );

        let rebuilt = ContextVectorTable::from_state(state);
        assert_eq!(rebuilt.len(), 3);
        assert!(!rebuilt.is_frozen(1));
    }
}
