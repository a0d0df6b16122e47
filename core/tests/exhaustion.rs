//! Behaviour of the allocator when every identifier is pending.

#![allow(clippy::unwrap_used)]

use porter_core::chain;
use porter_core::codec::JsonCodec;
use porter_core::correlator::{Correlator, Dispatch};
use porter_core::id::{CorrelationId, IdSpace, allocate, try_allocate};
use porter_core::CorrelationError;
use std::collections::HashSet;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn full(space: IdSpace) -> HashSet<CorrelationId> {
    (0..=space.max()).map(CorrelationId::new).collect()
}

#[test]
fn try_allocate_reports_a_full_space() {
    let space = IdSpace::new(3);
    let pending = full(space);

    for hint in [0, 2, 3, 4, u32::MAX] {
        assert_eq!(try_allocate(space, hint, |id| pending.contains(&id)), None);
    }
}

#[test]
fn try_allocate_finds_the_last_free_id() {
    let space = IdSpace::new(3);
    let mut pending = full(space);
    pending.remove(&CorrelationId::new(1));

    assert_eq!(
        try_allocate(space, 2, |id| pending.contains(&id)),
        Some(CorrelationId::new(1))
    );
}

#[test]
fn allocate_does_not_return_on_a_full_space() {
    let space = IdSpace::new(3);
    let pending = full(space);
    let (tx, rx) = mpsc::channel();

    // The search spins forever; the thread is left behind when the test ends.
    thread::spawn(move || {
        let id = allocate(space, 0, |id| pending.contains(&id));
        let _ = tx.send(id);
    });

    assert_eq!(
        rx.recv_timeout(Duration::from_millis(200)),
        Err(mpsc::RecvTimeoutError::Timeout)
    );
}

#[test]
fn correlator_refuses_to_dispatch_past_capacity() {
    let mut correlator: Correlator<JsonCodec<String, String>, String> =
        Correlator::with_space(JsonCodec::new(), IdSpace::new(1));

    for text in ["a", "b"] {
        let dispatched = correlator.send(|r| r, chain::request(text.to_string())).unwrap();
        assert!(matches!(dispatched, Dispatch::Emit(_)));
    }

    let refused = correlator.send(|r| r, chain::request("c".to_string()));
    assert_eq!(refused, Err(CorrelationError::IdSpaceExhausted { capacity: 2 }));
    assert_eq!(correlator.pending_len(), 2);
}
