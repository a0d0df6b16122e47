//! The pending-request table.
//!
//! While a chain waits for a response, everything it still needs to do lives
//! in a [`PendingEntry`] keyed by the request's [`CorrelationId`]. The entry
//! is removed the moment a matching response is accepted, so each one is
//! consumed at most once.

use crate::chain::{Finish, Steps};
use crate::error::CorrelationError;
use crate::id::CorrelationId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;

/// The suspended remainder of a chain.
///
/// # Type Parameters
///
/// - `Req`: Request type (kept for diagnostics only, never re-sent)
/// - `Msg`: Value produced once the chain resolves
pub struct PendingEntry<Req, Msg> {
    request: Req,
    dispatched_at: DateTime<Utc>,
    steps: Steps<Req>,
    finish: Finish<Msg>,
}

impl<Req, Msg> PendingEntry<Req, Msg> {
    /// Create an entry for a request that has just been sent.
    #[must_use]
    pub fn new(
        request: Req,
        dispatched_at: DateTime<Utc>,
        steps: Steps<Req>,
        finish: Finish<Msg>,
    ) -> Self {
        Self {
            request,
            dispatched_at,
            steps,
            finish,
        }
    }

    /// The request that was sent.
    #[must_use]
    pub const fn request(&self) -> &Req {
        &self.request
    }

    /// When the request was sent.
    #[must_use]
    pub const fn dispatched_at(&self) -> DateTime<Utc> {
        self.dispatched_at
    }

    /// Number of steps still to run.
    #[must_use]
    pub fn remaining_steps(&self) -> usize {
        self.steps.len()
    }

    /// Take the entry apart into its step list and finishing function.
    #[must_use]
    pub fn into_continuation(self) -> (Steps<Req>, Finish<Msg>) {
        (self.steps, self.finish)
    }
}

impl<Req: fmt::Debug, Msg> fmt::Debug for PendingEntry<Req, Msg> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingEntry")
            .field("request", &self.request)
            .field("dispatched_at", &self.dispatched_at)
            .field("steps", &self.steps.len())
            .finish_non_exhaustive()
    }
}

/// Map from correlation identifier to pending entry.
pub struct PendingTable<Req, Msg> {
    entries: HashMap<CorrelationId, PendingEntry<Req, Msg>>,
}

impl<Req, Msg> PendingTable<Req, Msg> {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Store `entry` under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::DuplicateId`] if `id` is already pending.
    /// The allocator never hands out a pending id, so this indicates a bug in
    /// the caller.
    pub fn insert(&mut self, id: CorrelationId, entry: PendingEntry<Req, Msg>) -> Result<(), CorrelationError> {
        match self.entries.entry(id) {
            std::collections::hash_map::Entry::Occupied(_) => Err(CorrelationError::DuplicateId(id)),
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            },
        }
    }

    /// Remove and return the entry for `id`.
    ///
    /// `None` is the ordinary outcome for a stale or duplicate response.
    pub fn remove(&mut self, id: CorrelationId) -> Option<PendingEntry<Req, Msg>> {
        self.entries.remove(&id)
    }

    /// Whether `id` is pending.
    #[must_use]
    pub fn contains(&self, id: CorrelationId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Look at a pending entry without consuming it.
    #[must_use]
    pub fn get(&self, id: CorrelationId) -> Option<&PendingEntry<Req, Msg>> {
        self.entries.get(&id)
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending identifiers in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<CorrelationId> {
        let mut ids: Vec<_> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Iterate over `(id, request, dispatched_at)` for every pending entry.
    pub fn iter_requests(&self) -> impl Iterator<Item = (CorrelationId, &Req, DateTime<Utc>)> + '_ {
        self.entries
            .iter()
            .map(|(id, entry)| (*id, &entry.request, entry.dispatched_at))
    }

    /// Identifiers dispatched strictly before `cutoff`, oldest first.
    ///
    /// Inspection only: nothing is evicted.
    #[must_use]
    pub fn older_than(&self, cutoff: DateTime<Utc>) -> Vec<CorrelationId> {
        let mut stale: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.dispatched_at < cutoff)
            .map(|(id, entry)| (entry.dispatched_at, *id))
            .collect();
        stale.sort_unstable();
        stale.into_iter().map(|(_, id)| id).collect()
    }
}

impl<Req, Msg> Default for PendingTable<Req, Msg> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Msg> fmt::Debug for PendingTable<Req, Msg> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTable")
            .field("ids", &self.ids())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::chain::Erased;
    use chrono::TimeZone;
    use std::collections::VecDeque;

    type Entry = PendingEntry<String, String>;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_735_689_600 + secs, 0).unwrap()
    }

    fn entry(request: &str, secs: i64) -> Entry {
        PendingEntry::new(
            request.to_string(),
            at(secs),
            VecDeque::new(),
            Box::new(|value: Erased| value.downcast::<String>().map(|v| *v).unwrap_or_default()),
        )
    }

    #[test]
    fn test_insert_then_remove() {
        let mut table = PendingTable::new();
        table.insert(CorrelationId::new(1), entry("a", 0)).unwrap();

        assert!(table.contains(CorrelationId::new(1)));
        assert_eq!(table.len(), 1);

        let removed = table.remove(CorrelationId::new(1)).unwrap();
        assert_eq!(removed.request(), "a");
        assert!(table.is_empty());
    }

    #[test]
    fn test_insert_duplicate_is_rejected() {
        let mut table = PendingTable::new();
        table.insert(CorrelationId::new(5), entry("first", 0)).unwrap();

        let result = table.insert(CorrelationId::new(5), entry("second", 1));
        assert!(matches!(result, Err(CorrelationError::DuplicateId(id)) if id == CorrelationId::new(5)));
        assert_eq!(table.get(CorrelationId::new(5)).unwrap().request(), "first");
    }

    #[test]
    fn test_remove_unknown_is_none() {
        let mut table: PendingTable<String, String> = PendingTable::new();
        assert!(table.remove(CorrelationId::new(9999)).is_none());
    }

    #[test]
    fn test_remove_consumes_once() {
        let mut table = PendingTable::new();
        table.insert(CorrelationId::new(3), entry("x", 0)).unwrap();
        assert!(table.remove(CorrelationId::new(3)).is_some());
        assert!(table.remove(CorrelationId::new(3)).is_none());
    }

    #[test]
    fn test_older_than_sorts_by_age() {
        let mut table = PendingTable::new();
        table.insert(CorrelationId::new(1), entry("new", 50)).unwrap();
        table.insert(CorrelationId::new(2), entry("oldest", 0)).unwrap();
        table.insert(CorrelationId::new(3), entry("old", 10)).unwrap();

        assert_eq!(
            table.older_than(at(20)),
            vec![CorrelationId::new(2), CorrelationId::new(3)]
        );
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_iter_requests_reports_all() {
        let mut table = PendingTable::new();
        table.insert(CorrelationId::new(8), entry("p", 1)).unwrap();
        table.insert(CorrelationId::new(4), entry("q", 2)).unwrap();

        let mut seen: Vec<_> = table
            .iter_requests()
            .map(|(id, request, _)| (id.value(), request.clone()))
            .collect();
        seen.sort();
        assert_eq!(seen, vec![(4, "q".to_string()), (8, "p".to_string())]);
        assert_eq!(table.ids(), vec![CorrelationId::new(4), CorrelationId::new(8)]);
    }
}
