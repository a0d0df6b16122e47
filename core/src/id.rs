//! Correlation identifiers and their allocation.
//!
//! Every request that goes out on the wire carries a [`CorrelationId`]. The
//! reply echoes it back, which is the only thing linking the two messages.
//! Identifiers come from a bounded space `[0, MAX]` (see [`IdSpace`]) and are
//! recycled once their request has been resolved.
//!
//! Allocation is a pure function of a hint and the set of identifiers that
//! are currently pending:
//!
//! ```
//! use porter_core::id::{allocate, CorrelationId, IdSpace};
//! use std::collections::HashSet;
//!
//! let pending: HashSet<CorrelationId> = [CorrelationId::new(3), CorrelationId::new(4)].into();
//! let id = allocate(IdSpace::DEFAULT, 3, |id| pending.contains(&id));
//! assert_eq!(id, CorrelationId::new(5));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer tag linking one outgoing request to its inbound response.
///
/// Serializes as a bare JSON integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u32);

impl CorrelationId {
    /// Wrap a raw identifier value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// The raw identifier value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Hint to record after this identifier has been dispatched.
    ///
    /// May exceed the space's maximum; [`IdSpace::wrap`] folds it back to 0.
    #[must_use]
    pub const fn next_hint(self) -> u32 {
        self.0.wrapping_add(1)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for CorrelationId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// The inclusive range `[0, max]` identifiers are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdSpace {
    max: u32,
}

impl IdSpace {
    /// `[0, 2^31 - 1]`, safely below any peer's exact-integer ceiling.
    pub const DEFAULT: Self = Self { max: 0x7FFF_FFFF };

    /// A space covering `[0, max]`.
    ///
    /// Small spaces are useful in tests that need to exercise wraparound or
    /// exhaustion without allocating billions of identifiers.
    #[must_use]
    pub const fn new(max: u32) -> Self {
        Self { max }
    }

    /// Largest identifier in the space.
    #[must_use]
    pub const fn max(self) -> u32 {
        self.max
    }

    /// Number of distinct identifiers in the space.
    #[must_use]
    pub const fn capacity(self) -> u64 {
        self.max as u64 + 1
    }

    /// Fold a hint back into the space: anything above `max` becomes 0.
    #[must_use]
    pub const fn wrap(self, hint: u32) -> u32 {
        if hint > self.max { 0 } else { hint }
    }

    /// Whether `id` lies inside the space.
    #[must_use]
    pub const fn contains(self, id: CorrelationId) -> bool {
        id.0 <= self.max
    }
}

impl Default for IdSpace {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Allocate an identifier that is not currently pending.
///
/// Starts at `hint` (wrapped into the space) and walks upward, wrapping from
/// `max` back to 0, until it finds an identifier for which `is_pending`
/// returns `false`.
///
/// This search never terminates if every identifier in the space is
/// pending. Callers must bound the number of in-flight requests below
/// [`IdSpace::capacity`], or use [`try_allocate`] which detects exhaustion.
#[must_use]
pub fn allocate(space: IdSpace, hint: u32, is_pending: impl Fn(CorrelationId) -> bool) -> CorrelationId {
    let mut candidate = space.wrap(hint);
    loop {
        let id = CorrelationId(candidate);
        if !is_pending(id) {
            return id;
        }
        candidate = space.wrap(candidate.wrapping_add(1));
    }
}

/// Same search as [`allocate`], but visits each identifier at most once.
///
/// Returns `None` when every identifier in the space is pending.
#[must_use]
pub fn try_allocate(
    space: IdSpace,
    hint: u32,
    is_pending: impl Fn(CorrelationId) -> bool,
) -> Option<CorrelationId> {
    let mut candidate = space.wrap(hint);
    for _ in 0..space.capacity() {
        let id = CorrelationId(candidate);
        if !is_pending(id) {
            return Some(id);
        }
        candidate = space.wrap(candidate.wrapping_add(1));
    }
    None
}
