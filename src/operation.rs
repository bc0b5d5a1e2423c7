// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Operations: immutable, timestamped edits and their inclusion transforms.
//!
//! An [`Operation`] is a value: once created it is never modified. Applying
//! the effect of another, already-applied operation produces a *new*
//! operation via [`Operation::transformed_against`], or [`None`] when the
//! other operation voids this one (for example, a concurrent delete of the
//! same position). The engine owns the bookkeeping of *which* operations to
//! fold in and in what order; this module only knows how a single pair
//! interacts.
//!
//! Both operations of a pair must be expressed in the same context (their
//! context vectors equal) for the transform to be meaningful. Operations on
//! different keys never interact.
use std::{cmp::Ordering, fmt};

use crate::context::{ContextVector, OpId, SiteId};

/// The three ways an operation can change a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(::serde::Deserialize, ::serde::Serialize),
    serde(rename_all = "lowercase")
)]
pub enum OperationKind {
    /// Inserts a value at a position, shifting later positions right.
    Insert,
    /// Removes the value at a position, shifting later positions left.
    Delete,
    /// Replaces the value at a position in place.
    Update,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Insert => "insert",
            OperationKind::Delete => "delete",
            OperationKind::Update => "update",
        };
        f.write_str(name)
    }
}

/// The payload an operation carries.
///
/// The engine treats payloads as opaque; the only time a payload is even
/// inspected is when two concurrent updates to the same position are
/// reconciled and one adopts the other's value. Deletes conventionally carry
/// [`PropertyValue::Null`].
// NOTE: Why no U32 or I32? Make this a serialization concern.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(::serde::Deserialize, ::serde::Serialize),
    serde(untagged)
)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    U64(u64),
    I64(i64),
    Double(f64),
    String(String),
    // NOTE: the #[serde] here is needed to get efficient encoding of byte-arrays for
    // protocols that support it (like msgpack):
    // <https://docs.rs/rmp-serde/1/rmp_serde/index.html#efficient-storage-of-u8-types>
    Bytes(#[cfg_attr(feature = "serde", serde(with = "serde_bytes"))] Vec<u8>),
}

macro_rules! impl_from {
    ($($source:ty => $target:ident),* $(,)?) => {
        $(
            impl From<$source> for PropertyValue {
                fn from(value: $source) -> Self {
                    Self::$target(value)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    u64 => U64,
    i64 => I64,
    f64 => Double,
    String => String,
    Vec<u8> => Bytes,
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// A single timestamped edit, local or remote.
///
/// Operations are immutable values. The position, value, and context of an
/// operation never change after construction; transformation returns fresh
/// operations instead. The history buffer therefore holds each operation
/// exactly as it was first recorded, which is what later transforms rely on.
///
/// An operation is identified by [`Operation::id`], the `(site, seq)` pair
/// assigned at its originating site. `order` is the operation's rank in the
/// total order once a sequencer has assigned one; local operations that have
/// not been ranked carry [`None`] and sort after all ranked operations.
#[derive(Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(::serde::Deserialize, ::serde::Serialize),
    serde(from = "WireOperation", into = "WireOperation")
)]
pub struct Operation {
    kind: OperationKind,
    key: String,
    value: PropertyValue,
    position: usize,
    context: ContextVector,
    seq: u64,
    site: SiteId,
    order: Option<u64>,
}

impl Operation {
    /// Creates an operation originating at the local site.
    ///
    /// `context` must be the local document state at generation time; the
    /// sequence number is derived from it as `context[site] + 1`.
    #[must_use]
    pub fn local(
        site: SiteId,
        context: ContextVector,
        kind: OperationKind,
        key: impl Into<String>,
        value: PropertyValue,
        position: usize,
    ) -> Self {
        let seq = context.seq_for_site(site) + 1;
        Self {
            kind,
            key: key.into(),
            value,
            position,
            context,
            seq,
            site,
            order: None,
        }
    }

    /// Creates an operation received from a remote site.
    ///
    /// The arguments mirror the wire layout: every field is caller-supplied,
    /// including the sequence number and the total-order rank (if the
    /// transport assigned one).
    #[expect(clippy::too_many_arguments, reason = "mirrors the wire layout")]
    #[must_use]
    pub fn remote(
        site: SiteId,
        seq: u64,
        context: ContextVector,
        kind: OperationKind,
        key: impl Into<String>,
        value: PropertyValue,
        position: usize,
        order: Option<u64>,
    ) -> Self {
        Self {
            kind,
            key: key.into(),
            value,
            position,
            context,
            seq,
            site,
            order,
        }
    }

    /// The kind of edit this operation performs.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// The property this operation affects.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The payload carried by this operation.
    #[must_use]
    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    /// The position this operation targets, in the coordinates of its
    /// context.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// The document state this operation was generated in.
    #[must_use]
    pub fn context(&self) -> &ContextVector {
        &self.context
    }

    /// The sequence number at the originating site. Starts at 1.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// The originating site.
    #[must_use]
    pub fn site(&self) -> SiteId {
        self.site
    }

    /// The rank in the global total order, or [`None`] if not yet assigned.
    #[must_use]
    pub fn order(&self) -> Option<u64> {
        self.order
    }

    /// The `(site, seq)` pair identifying this operation.
    #[must_use]
    pub fn id(&self) -> OpId {
        OpId::new(self.site, self.seq)
    }

    /// Returns a copy of this operation carrying `order` as its rank in the
    /// total order.
    ///
    /// Ranks come from whatever sequencing service the transport runs through;
    /// the engine itself never assigns one.
    #[must_use]
    pub fn with_order(&self, order: u64) -> Operation {
        Operation {
            order: Some(order),
            ..self.clone()
        }
    }

    /// Records that the operation identified by `id` is now part of this
    /// operation's context. Called by the engine after each fold.
    pub(crate) fn advance_context(&mut self, id: OpId) {
        self.context.set_seq_for_site(id.site, id.seq);
    }

    /// Sorts by total-order rank; unranked operations sort last. Rank ties
    /// (and pairs of unranked operations) fall back to the sequence number.
    ///
    /// This is the order in which historical operations are folded into an
    /// incoming operation.
    #[must_use]
    pub fn compare_by_order(&self, other: &Operation) -> Ordering {
        match (self.order, other.order) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.seq.cmp(&other.seq)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.seq.cmp(&other.seq),
        }
    }

    /// Sorts by context vector (lexicographically), ties broken by site ID.
    ///
    /// This is the garbage collection sweep order: operations generated in
    /// earlier contexts sort first.
    #[must_use]
    pub fn compare_by_context(&self, other: &Operation) -> Ordering {
        self.context
            .cmp(&other.context)
            .then_with(|| self.site.cmp(&other.site))
    }

    /// Produces a copy of `self` with the effect of `other` folded into its
    /// coordinates, or [`None`] if `other` voids `self` entirely.
    ///
    /// `other` must already be applied to the document and both operations
    /// must be expressed in the same context. Operations on different keys
    /// are independent and pass through unchanged.
    ///
    /// The position tie-breaks are fixed for all participating peers:
    /// at equal positions an insert from a lower site ID ends up *after* one
    /// from a higher site ID, and of two concurrent updates to the same
    /// position the one from the lower site ID supplies the surviving value.
    #[must_use]
    pub fn transformed_against(&self, other: &Operation) -> Option<Operation> {
        let mut out = self.clone();
        if self.key != other.key {
            return Some(out);
        }
        match (self.kind, other.kind) {
            (OperationKind::Insert, OperationKind::Insert) => {
                let keeps_position = self.position < other.position
                    || (self.position == other.position && self.site > other.site);
                if !keeps_position {
                    out.position += 1;
                }
            }
            (OperationKind::Insert, OperationKind::Delete) => {
                // inserting exactly at a deleted position does not shift
                if self.position > other.position {
                    out.position -= 1;
                }
            }
            (OperationKind::Insert, OperationKind::Update) => {}
            (OperationKind::Delete, OperationKind::Insert) => {
                if self.position >= other.position {
                    out.position += 1;
                }
            }
            (OperationKind::Delete, OperationKind::Delete) => {
                if self.position > other.position {
                    out.position -= 1;
                } else if self.position == other.position {
                    // both sides deleted the same thing
                    return None;
                }
            }
            (OperationKind::Delete, OperationKind::Update) => {}
            (OperationKind::Update, OperationKind::Insert) => {
                if self.position >= other.position {
                    out.position += 1;
                }
            }
            (OperationKind::Update, OperationKind::Delete) => {
                if self.position > other.position {
                    out.position -= 1;
                } else if self.position == other.position {
                    // the update's target no longer exists
                    return None;
                }
            }
            (OperationKind::Update, OperationKind::Update) => {
                if self.position == other.position
                    && (self.site > other.site
                        || (self.site == other.site && self.seq < other.seq))
                {
                    out.value = other.value.clone();
                }
            }
        }
        Some(out)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} @{} by {:?} in {:?}",
            self.kind, self.key, self.position, self.id(), self.context
        )
    }
}

/// Fixed-position array layout of an operation on the wire:
/// `[type, key, value, position, contextVectorSites, seqId, siteId, order]`.
#[cfg(feature = "serde")]
#[derive(::serde::Deserialize, ::serde::Serialize)]
struct WireOperation(
    OperationKind,
    String,
    PropertyValue,
    usize,
    ContextVector,
    u64,
    SiteId,
    Option<u64>,
);

#[cfg(feature = "serde")]
impl From<WireOperation> for Operation {
    fn from(wire: WireOperation) -> Self {
        let WireOperation(kind, key, value, position, context, seq, site, order) = wire;
        Operation {
            kind,
            key,
            value,
            position,
            context,
            seq,
            site,
            order,
        }
    }
}

#[cfg(feature = "serde")]
impl From<Operation> for WireOperation {
    fn from(op: Operation) -> Self {
        WireOperation(
            op.kind,
            op.key,
            op.value,
            op.position,
            op.context,
            op.seq,
            op.site,
            op.order,
        )
    }
}

#[cfg(any(test, feature = "arbitrary"))]
impl quickcheck::Arbitrary for OperationKind {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        *g.choose(&[
            OperationKind::Insert,
            OperationKind::Delete,
            OperationKind::Update,
        ])
        .unwrap()
    }
}

#[cfg(any(test, feature = "arbitrary"))]
impl quickcheck::Arbitrary for PropertyValue {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        match u8::arbitrary(g) % 6 {
            0 => PropertyValue::Null,
            1 => PropertyValue::Bool(bool::arbitrary(g)),
            2 => PropertyValue::U64(u64::arbitrary(g)),
            3 => PropertyValue::I64(i64::arbitrary(g)),
            4 => PropertyValue::String(String::arbitrary(g)),
            _ => PropertyValue::Bytes(Vec::arbitrary(g)),
        }
    }
}
