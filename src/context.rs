// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Context vectors: the causality timestamps of the operation engine.
//!
//! Every operation carries a [`ContextVector`] recording, per site, how many
//! operations from that site had been applied at the moment the operation was
//! generated. The engine compares the vector of an incoming operation with its
//! own to decide which historical operations the sender had not yet seen; that
//! query result is a [`ContextDifference`], a list of [`OpId`]s resolvable
//! against the history buffer.
//!
//! Vectors are indexed by [`SiteId`] and grow on demand. A site that has not
//! yet been observed is implicitly at sequence zero, so vectors of different
//! lengths compare as if zero-padded to a common length:
//!
//! ```rust
//! use tandem::context_vector;
//!
//! let a = context_vector![2, 1];
//! let b = context_vector![2, 1, 0, 0];
//! assert_eq!(a, b);
//! ```
use std::{cmp::Ordering, fmt, ops::Range};

use smallvec::SmallVec;

/// Identifies a participating site (an engine instance).
///
/// Site IDs are small integers handed out by the session layer; they double as
/// indices into context vectors and the context vector table.
pub type SiteId = u32;

/// Uniquely identifies one operation as the pair of its originating site and
/// its sequence number at that site.
///
/// Sequence numbers start at 1; a context vector entry of `n` means operations
/// `1..=n` from that site are included in the context.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId {
    /// Site the operation originated at.
    pub site: SiteId,
    /// Sequence number of the operation at its originating site.
    pub seq: u64,
}

impl OpId {
    /// Constructs an id from its parts.
    #[must_use]
    pub const fn new(site: SiteId, seq: u64) -> Self {
        Self { site, seq }
    }
}

// Renders as `site:seq`, the form used in log events and error messages.
impl fmt::Debug for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.site, self.seq)
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Per-site operation counters describing a document state.
///
/// The counter at index `s` is the sequence number of the latest operation
/// from site `s` included in this context. Missing trailing entries are
/// implicitly zero; all comparisons account for that.
///
/// Equality ([`PartialEq`]) is the zero-padded component-wise comparison. The
/// [`Ord`] implementation is the zero-padded *lexicographic* order used to
/// sort operations for garbage collection; it is a total order, not the
/// partial happened-before relation, so `a < b` does not imply that `b`
/// includes everything in `a`.
#[derive(Clone, Default)]
#[cfg_attr(
    feature = "serde",
    derive(::serde::Deserialize, ::serde::Serialize),
    serde(transparent)
)]
pub struct ContextVector {
    sites: SmallVec<[u64; 8]>,
}

impl ContextVector {
    /// Creates an empty vector, equivalent to any length of zeros.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a vector with `count` zeroed entries.
    #[must_use]
    pub fn with_sites(count: usize) -> Self {
        Self {
            sites: SmallVec::from_elem(0, count),
        }
    }

    /// Creates a vector from explicit per-site counters, e.g. received off
    /// the wire or written as a literal (see [`context_vector!`]).
    ///
    /// [`context_vector!`]: crate::context_vector
    #[must_use]
    pub fn from_counts<I>(counts: I) -> Self
    where
        I: IntoIterator<Item = u64>,
    {
        Self {
            sites: counts.into_iter().collect(),
        }
    }

    /// Number of explicit entries. Sites at or beyond this index are
    /// implicitly at sequence zero.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// True if no explicit entries exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// The raw per-site counters, as carried on the wire.
    #[must_use]
    pub fn sites(&self) -> &[u64] {
        &self.sites
    }

    /// Pads the vector with zeros up to `count` entries.
    pub fn grow_to(&mut self, count: usize) {
        if self.sites.len() < count {
            self.sites.resize(count, 0);
        }
    }

    /// Sequence number recorded for `site`, zero if the site is beyond the
    /// explicit entries.
    #[must_use]
    pub fn seq_for_site(&self, site: SiteId) -> u64 {
        self.sites.get(site as usize).copied().unwrap_or(0)
    }

    /// Records `seq` as the latest sequence number seen from `site`, growing
    /// the vector with zeros as needed.
    pub fn set_seq_for_site(&mut self, site: SiteId, seq: u64) {
        let index = site as usize;
        self.grow_to(index + 1);
        self.sites[index] = seq;
    }

    /// Operations included in this context but not in `other`: the full range
    /// `other[s]+1 ..= self[s]` for every site where this vector is ahead.
    ///
    /// Only sites with explicit entries here can contribute; a site where
    /// `other` is ahead contributes nothing, since a difference lists what
    /// *this* side knows and the other lacks.
    #[must_use]
    pub fn subtract(&self, other: &ContextVector) -> ContextDifference {
        let mut diff = ContextDifference::new();
        for site in 0..self.sites.len() {
            let site = site as SiteId;
            let a = self.seq_for_site(site);
            let b = other.seq_for_site(site);
            if a > b {
                diff.add_range(site, b + 1..a + 1);
            }
        }
        diff
    }

    /// Like [`subtract`](Self::subtract), but lists only the single oldest
    /// missing operation per site. Used by garbage collection to find the
    /// earliest operation some site may still need.
    #[must_use]
    pub fn oldest_difference(&self, other: &ContextVector) -> ContextDifference {
        let mut diff = ContextDifference::new();
        for site in 0..self.sites.len() {
            let site = site as SiteId;
            let a = self.seq_for_site(site);
            let b = other.seq_for_site(site);
            if a > b {
                diff.add(OpId::new(site, b + 1));
            }
        }
        diff
    }
}

impl PartialEq for ContextVector {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ContextVector {}

impl PartialOrd for ContextVector {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ContextVector {
    fn cmp(&self, other: &Self) -> Ordering {
        let max = self.sites.len().max(other.sites.len());
        for site in 0..max {
            let site = site as SiteId;
            match self.seq_for_site(site).cmp(&other.seq_for_site(site)) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Debug for ContextVector {
    /// Renders as the plain counter list, e.g. `[5, 2]`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.sites.iter()).finish()
    }
}

impl FromIterator<u64> for ContextVector {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        Self::from_counts(iter)
    }
}

#[cfg(any(test, feature = "arbitrary"))]
impl quickcheck::Arbitrary for OpId {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        // small ids keep generated scenarios overlapping enough to be useful
        OpId::new(
            u32::from(u8::arbitrary(g) % 8),
            u64::from(u8::arbitrary(g) % 16) + 1,
        )
    }
}

#[cfg(any(test, feature = "arbitrary"))]
impl quickcheck::Arbitrary for ContextVector {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        let counts = Vec::<u8>::arbitrary(g);
        counts
            .into_iter()
            .take(8)
            .map(u64::from)
            .collect::<ContextVector>()
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        let counts: Vec<u64> = self.sites.to_vec();
        Box::new(counts.shrink().map(ContextVector::from_counts))
    }
}

/// The operations one context contains that another does not, as returned by
/// [`ContextVector::subtract`] and [`ContextVector::oldest_difference`].
///
/// Differences are transient query results; they are resolved against the
/// history buffer immediately and never stored or serialized. Ids are listed
/// in ascending site order, with each site's sequence numbers ascending.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ContextDifference {
    ids: Vec<OpId>,
}

impl ContextDifference {
    /// Creates an empty difference.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a single operation to the difference.
    pub fn add(&mut self, id: OpId) {
        self.ids.push(id);
    }

    /// Adds a contiguous range of sequence numbers for one site.
    pub fn add_range(&mut self, site: SiteId, seqs: Range<u64>) {
        for seq in seqs {
            self.add(OpId::new(site, seq));
        }
    }

    /// The operation ids in this difference.
    #[must_use]
    pub fn ids(&self) -> &[OpId] {
        &self.ids
    }

    /// Number of operations in the difference.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True if the two contexts were equal (for the queried direction).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl fmt::Debug for ContextDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ids.iter()).finish()
    }
}
