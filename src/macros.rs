// (c) Copyright 2025 Helsing GmbH. All rights reserved.

/// Convenience macro for writing context vector literals.
///
/// Each argument is the sequence number for the site at that index. Mostly
/// useful in tests and documentation.
///
/// ```rust
/// use tandem::{ContextVector, context_vector};
///
/// let cv = context_vector![3, 1];
/// assert_eq!(cv.seq_for_site(0), 3);
/// assert_eq!(cv.seq_for_site(1), 1);
/// // trailing sites are implicitly at zero
/// assert_eq!(cv.seq_for_site(7), 0);
/// assert_eq!(context_vector![], ContextVector::new());
/// ```
#[macro_export]
macro_rules! context_vector {
    () => {
        $crate::ContextVector::new()
    };
    ($($seq:expr),+ $(,)?) => {
        $crate::ContextVector::from_counts([$($seq),+])
    };
}
