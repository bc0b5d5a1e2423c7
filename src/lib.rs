// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # Tandem: An Operation Engine for Real-Time Collaboration
//!
//! This crate provides a Rust implementation of **context-based operational
//! transformation**, the concurrency control algorithm behind real-time
//! collaborative editors. It is based on the approach described in
//! ["Context-Based Operational Transformation in Distributed Collaborative
//! Editing Systems"][cot-paper] and inspired by the operation engine of the
//! [Open Cooperative Web Framework][coweb].
//!
//! The goal is optimistic collaboration: every participant applies its own
//! edits immediately, without locks and without waiting for a round trip, and
//! the engine reshapes everyone else's edits so that all copies of the shared
//! data converge to the same state.
//!
//! ## Core Concepts
//!
//! The engine works with a small set of composable pieces:
//!
//! - [`Operation`]: one edit — an insert, update, or delete of a value at a
//!   position under a named property — timestamped with where and when it was
//!   generated.
//! - [`ContextVector`]: a vector clock of per-site operation counters,
//!   describing the document state an operation was generated against.
//! - [`HistoryBuffer`]: every operation a site has incorporated, kept in its
//!   original form for transforming stragglers.
//! - [`ContextVectorTable`]: what document state every *other* site is known
//!   to have reached, which bounds what history can be garbage-collected.
//! - [`OperationEngine`]: one per site, tying the above together.
//!
//! ## How Concurrent Edits Reconcile
//!
//! When an operation arrives from another site, its context vector tells the
//! engine exactly which local operations the sender had not seen: the
//! *context difference*. The incoming operation is transformed against each
//! of those — shifting positions past concurrent inserts and deletes,
//! resolving same-position conflicts by site id — until it is expressed in
//! the local context and can be applied directly. Historical operations that
//! are themselves too old are first brought forward the same way,
//! recursively.
//!
//! Two edits can collapse into nothing (concurrent deletes of the same
//! element, an update of something since deleted); the engine reports those
//! as "nothing to apply" rather than inventing an edit.
//!
//! ## Garbage Collection and Membership
//!
//! History cannot be kept forever. [`OperationEngine::purge`] discards every
//! operation that all known sites have incorporated, using the context vector
//! table's per-site minimum. A site that leaves the session would pin that
//! minimum forever, so departures are *frozen* ([`OperationEngine::freeze_site`])
//! and no longer count; joiners are *thawed* ([`OperationEngine::thaw_site`])
//! and seeded from the current minimum. A late joiner takes over a running
//! peer's entire view with [`OperationEngine::state`] and
//! [`OperationEngine::set_state`].
//!
//! ## Scope of this Crate
//!
//! The engine is document-agnostic: it neither stores nor interprets the
//! shared data. Callers apply the operations the engine hands back to
//! whatever structure they maintain — a text buffer, a list, a map of
//! properties.
//!
//! **It does not include any networking protocols.**
//!
//! You are responsible for delivering operations between sites. The engine
//! asks little of that transport: operations from a single site must arrive
//! in generation order, and anything may be delivered more than once —
//! duplicates are detected and absorbed. Orderings *across* sites are
//! entirely unconstrained. If the transport runs through a central sequencer,
//! its total-order rank can be attached with [`Operation::with_order`] to
//! make transform ordering globally consistent.
//!
//! ## Getting Started: Two Concurrent Inserts
//!
//! ```rust
//! use tandem::{OperationEngine, OperationKind, PropertyValue};
//!
//! // 1. SETUP: TWO SITES
//! // Create an engine per participant. Site ids must be unique.
//! let mut alice = OperationEngine::new(0);
//! let mut bob = OperationEngine::new(1);
//!
//! // 2. CONCURRENT EDITS
//! // Both sites insert at position 0 of the same property without having
//! // heard from each other. Each edit applies locally right away.
//! let from_alice = alice.push_local(
//!     OperationKind::Insert,
//!     "line",
//!     PropertyValue::from("a"),
//!     0,
//! );
//! let from_bob = bob.push_local(
//!     OperationKind::Insert,
//!     "line",
//!     PropertyValue::from("b"),
//!     0,
//! );
//!
//! // 3. EXCHANGE
//! // Each site feeds the other's operation to its engine, which transforms
//! // it against the concurrent local insert before it is applied.
//! let bob_at_alice = alice
//!     .push_remote(from_bob)
//!     .expect("history is intact")
//!     .expect("not a duplicate");
//! let alice_at_bob = bob
//!     .push_remote(from_alice)
//!     .expect("history is intact")
//!     .expect("not a duplicate");
//!
//! // 4. CONVERGENCE
//! // The same-position tie goes to the higher site: Bob's insert keeps
//! // position 0 at Alice's site, while Alice's shifts past it at Bob's.
//! // Applying the results, both documents read "b" then "a".
//! assert_eq!(bob_at_alice.position(), 0);
//! assert_eq!(alice_at_bob.position(), 1);
//! ```
//!
//! ## License
//!
//! This project is licensed under either of
//!
//! - Apache License, Version 2.0, ([LICENSE-APACHE](LICENSE-APACHE) or http://www.apache.org/licenses/LICENSE-2.0)
//! - MIT license ([LICENSE-MIT](LICENSE-MIT) or http://opensource.org/licenses/MIT)
//!
//! at your option.
//!
//! ## Features
//!
//! - `serde`: Provides `serde` support for operations, context vectors, and
//!   engine state, using the compact array forms collaborative transports
//!   exchange. This feature is enabled by default.
//! - `arbitrary`: Implements `quickcheck::Arbitrary` for engine types, useful
//!   for property-based testing.
//!
//! [cot-paper]: https://doi.org/10.1109/TPDS.2008.240
//! [coweb]: https://github.com/opencoweb/coweb
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

pub mod context;
pub use context::{ContextDifference, ContextVector, OpId, SiteId};
pub mod operation;
pub use operation::{Operation, OperationKind, PropertyValue};
pub mod history;
pub use history::{HistoryBuffer, MissingOperation};
pub mod table;
pub use table::{ContextVectorTable, TableSlot};
pub mod engine;
pub use engine::{EngineError, EngineState, OperationEngine};
/// Macros usable for tests and initialization
pub mod macros;
