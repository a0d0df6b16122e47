//! The dispatch/resolve engine.
//!
//! A [`Correlator`] owns the pending table and the identifier hint for one
//! pair of channels. It is a plain state machine: it never performs I/O.
//! [`send`](Correlator::send) returns the envelope to put on the wire and
//! [`receive`](Correlator::receive) turns an inbound message into either a
//! resolved value, the next envelope of a chain, or a discard.
//!
//! ```text
//! NotSent ──send──▶ AwaitingResponse ──response──▶ Advancing ──▶ AwaitingResponse
//!                           │                                          │
//!                           └──────────── response, no steps ──────────┴──▶ Resolved
//! ```
//!
//! Resolved chains are not stored; removing the entry is the terminal
//! transition.
//!
//! # Example
//!
//! ```
//! use porter_core::chain;
//! use porter_core::codec::JsonCodec;
//! use porter_core::correlator::{Correlator, Dispatch, Resolution};
//! use porter_core::envelope::Envelope;
//! use serde_json::json;
//!
//! let mut correlator: Correlator<JsonCodec<String, String>, String> = Correlator::new(JsonCodec::new());
//!
//! let Ok(Dispatch::Emit(outbound)) = correlator.send(|r| r, chain::request("Reverse me!".to_string())) else {
//!     unreachable!()
//! };
//! let reply = Envelope::new(outbound.id, json!("!em esreveR")).to_bytes().unwrap();
//!
//! match correlator.receive(&reply).unwrap() {
//!     Resolution::Resolved(text) => assert_eq!(text, "!em esreveR"),
//!     other => panic!("unexpected {other:?}"),
//! }
//! assert_eq!(correlator.pending_len(), 0);
//! ```

use crate::chain::{Chain, Erased, Finish, Flow, Steps, Suspended};
use crate::codec::Codec;
use crate::envelope::Envelope;
use crate::environment::{Clock, SystemClock};
use crate::error::CorrelationError;
use crate::id::{CorrelationId, IdSpace, try_allocate};
use crate::pending::{PendingEntry, PendingTable};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// Outcome of submitting a chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch<Msg> {
    /// A request must be emitted; the chain is now pending.
    Emit(Envelope),

    /// The chain short-circuited; nothing goes on the wire.
    Resolved(Msg),
}

/// Why an inbound message was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Not a `{ id, msg }` object with an integer id
    MalformedEnvelope,

    /// No pending entry for the id (stale or duplicate reply)
    UnknownId,

    /// The codec rejected the `msg` payload; the entry stays pending
    UndecodableResponse,
}

impl DiscardReason {
    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MalformedEnvelope => "malformed_envelope",
            Self::UnknownId => "unknown_id",
            Self::UndecodableResponse => "undecodable_response",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<Msg> {
    /// The chain finished; its final handler produced this value.
    Resolved(Msg),

    /// The chain moved on to its next request.
    Advanced(Envelope),

    /// The message was ignored.
    Discarded(DiscardReason),
}

/// Correlation state for one channel pair.
///
/// # Type Parameters
///
/// - `C`: Codec for requests and responses
/// - `Msg`: Value produced by final handlers (typically a reducer action)
pub struct Correlator<C: Codec, Msg> {
    codec: C,
    pending: PendingTable<C::Request, Msg>,
    next_id_hint: u32,
    space: IdSpace,
    clock: Arc<dyn Clock>,
}

impl<C, Msg> Correlator<C, Msg>
where
    C: Codec,
    Msg: Send + 'static,
{
    /// An empty correlator over the default identifier space.
    #[must_use]
    pub fn new(codec: C) -> Self {
        Self::with_space(codec, IdSpace::DEFAULT)
    }

    /// An empty correlator over a custom identifier space.
    #[must_use]
    pub fn with_space(codec: C, space: IdSpace) -> Self {
        Self {
            codec,
            pending: PendingTable::new(),
            next_id_hint: 0,
            space,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` to timestamp pending entries.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start allocation from `hint` instead of 0.
    #[must_use]
    pub const fn with_initial_hint(mut self, hint: u32) -> Self {
        self.next_id_hint = hint;
        self
    }

    /// Submit `chain`, delivering its output to `handler` once resolved.
    ///
    /// # Errors
    ///
    /// See [`Correlator::dispatch`].
    pub fn send<T, F>(&mut self, handler: F, chain: Chain<C::Request, C::Response, T>) -> Result<Dispatch<Msg>, CorrelationError>
    where
        T: Send + 'static,
        F: FnOnce(T) -> Msg + Send + 'static,
    {
        self.dispatch(chain.map(handler))
    }

    /// Submit a chain whose output is already the final value.
    ///
    /// # Errors
    ///
    /// - [`CorrelationError::Codec`] if the first request cannot be encoded
    /// - [`CorrelationError::IdSpaceExhausted`] if no identifier is free
    ///
    /// On error nothing is stored and nothing should be emitted.
    pub fn dispatch(&mut self, chain: Chain<C::Request, C::Response, Msg>) -> Result<Dispatch<Msg>, CorrelationError> {
        match chain.suspend() {
            Suspended::Ready(msg) => {
                tracing::trace!("Chain short-circuited without a request");
                Ok(Dispatch::Resolved(msg))
            },
            Suspended::Awaiting {
                request,
                steps,
                finish,
            } => self.emit(request, steps, finish).map(Dispatch::Emit),
        }
    }

    /// Handle one inbound wire message.
    ///
    /// Malformed envelopes, unknown ids, and undecodable payloads are
    /// reported as [`Resolution::Discarded`]; a payload the codec rejects
    /// leaves the entry pending.
    ///
    /// # Errors
    ///
    /// Only when the chain advances and its next request cannot be
    /// dispatched (see [`Correlator::dispatch`]). The consumed entry is gone
    /// in that case.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<Resolution<Msg>, CorrelationError> {
        let envelope = match Envelope::from_slice(bytes) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::debug!(%error, "Discarding inbound message");
                return Ok(Resolution::Discarded(DiscardReason::MalformedEnvelope));
            },
        };
        self.receive_envelope(envelope)
    }

    /// Handle an inbound envelope that has already been parsed.
    ///
    /// # Errors
    ///
    /// Same as [`Correlator::receive`].
    pub fn receive_envelope(&mut self, envelope: Envelope) -> Result<Resolution<Msg>, CorrelationError> {
        let Envelope { id, msg } = envelope;

        if !self.pending.contains(id) {
            tracing::debug!(%id, "Discarding response for unknown correlation id");
            return Ok(Resolution::Discarded(DiscardReason::UnknownId));
        }

        let response = match self.codec.decode_response(msg) {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!(%id, %error, "Discarding undecodable response");
                return Ok(Resolution::Discarded(DiscardReason::UndecodableResponse));
            },
        };

        self.deliver(id, response)
    }

    /// Resolve `id` with an already-decoded response.
    ///
    /// # Errors
    ///
    /// Same as [`Correlator::receive`].
    pub fn deliver(&mut self, id: CorrelationId, response: C::Response) -> Result<Resolution<Msg>, CorrelationError> {
        let Some(entry) = self.pending.remove(id) else {
            tracing::debug!(%id, "Discarding response for unknown correlation id");
            return Ok(Resolution::Discarded(DiscardReason::UnknownId));
        };

        tracing::trace!(%id, steps = entry.remaining_steps(), "Matched response");
        let (steps, finish) = entry.into_continuation();
        self.advance(steps, finish, response)
    }

    /// Run steps on `response` until a request must go out or the chain ends.
    ///
    /// Each step costs constant stack; a produced chain's own steps are
    /// spliced in front of the remaining ones in time proportional to their
    /// own count.
    fn advance(
        &mut self,
        mut steps: Steps<C::Request>,
        finish: Finish<Msg>,
        response: C::Response,
    ) -> Result<Resolution<Msg>, CorrelationError> {
        let mut value: Erased = Box::new(response);

        while let Some(step) = steps.pop_front() {
            match step(value) {
                // A short-circuited step feeds the next one directly.
                Flow::Value(next) => value = next,
                Flow::Request { request, steps: own } => {
                    for step in own.into_iter().rev() {
                        steps.push_front(step);
                    }
                    return self.emit(request, steps, finish).map(Resolution::Advanced);
                },
            }
        }

        Ok(Resolution::Resolved(finish(value)))
    }

    /// Encode, allocate, and store: the only place an entry is created.
    fn emit(
        &mut self,
        request: C::Request,
        steps: Steps<C::Request>,
        finish: Finish<Msg>,
    ) -> Result<Envelope, CorrelationError> {
        let msg = self.codec.encode_request(&request)?;
        let id = self.allocate()?;

        self.pending
            .insert(id, PendingEntry::new(request, self.clock.now(), steps, finish))?;
        self.next_id_hint = id.next_hint();

        tracing::trace!(%id, pending = self.pending.len(), "Request dispatched");
        Ok(Envelope::new(id, msg))
    }

    fn allocate(&self) -> Result<CorrelationId, CorrelationError> {
        let capacity = self.space.capacity();
        if self.pending.len() as u64 >= capacity {
            return Err(CorrelationError::IdSpaceExhausted { capacity });
        }
        try_allocate(self.space, self.next_id_hint, |id| self.pending.contains(id))
            .ok_or(CorrelationError::IdSpaceExhausted { capacity })
    }

    /// Number of chains awaiting a response.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether `id` is awaiting a response.
    #[must_use]
    pub fn is_pending(&self, id: CorrelationId) -> bool {
        self.pending.contains(id)
    }

    /// Pending identifiers in ascending order.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<CorrelationId> {
        self.pending.ids()
    }

    /// Identifiers whose request went out before `cutoff`.
    #[must_use]
    pub fn pending_older_than(&self, cutoff: DateTime<Utc>) -> Vec<CorrelationId> {
        self.pending.older_than(cutoff)
    }

    /// Read-only view of the pending table.
    #[must_use]
    pub const fn pending(&self) -> &PendingTable<C::Request, Msg> {
        &self.pending
    }

    /// Hint the next allocation will start from.
    #[must_use]
    pub const fn next_id_hint(&self) -> u32 {
        self.next_id_hint
    }

    /// The identifier space in use.
    #[must_use]
    pub const fn id_space(&self) -> IdSpace {
        self.space
    }
}

impl<C: Codec, Msg> fmt::Debug for Correlator<C, Msg> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending)
            .field("next_id_hint", &self.next_id_hint)
            .field("space", &self.space)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::chain::{self, map2};
    use crate::codec::JsonCodec;
    use serde_json::json;

    type TextCorrelator = Correlator<JsonCodec<String, String>, String>;

    fn correlator() -> TextCorrelator {
        Correlator::new(JsonCodec::new())
    }

    fn emitted(dispatch: Result<Dispatch<String>, CorrelationError>) -> Envelope {
        match dispatch.unwrap() {
            Dispatch::Emit(envelope) => envelope,
            Dispatch::Resolved(msg) => panic!("expected a request, resolved to {msg}"),
        }
    }

    fn advanced(resolution: Result<Resolution<String>, CorrelationError>) -> Envelope {
        match resolution.unwrap() {
            Resolution::Advanced(envelope) => envelope,
            other => panic!("expected the chain to advance, got {other:?}"),
        }
    }

    fn reply_reversed(envelope: &Envelope) -> Vec<u8> {
        let text: String = envelope.msg.as_str().unwrap().chars().rev().collect();
        Envelope::new(envelope.id, json!(text)).to_bytes().unwrap()
    }

    #[test]
    fn test_round_trip_resolves_once() {
        let mut c = correlator();
        let out = emitted(c.send(|r| r, chain::request("Reverse me!".to_string())));
        assert_eq!(out.msg, json!("Reverse me!"));
        assert!(c.is_pending(out.id));

        let reply = reply_reversed(&out);
        assert_eq!(
            c.receive(&reply).unwrap(),
            Resolution::Resolved("!em esreveR".to_string())
        );
        assert!(!c.is_pending(out.id));

        // Duplicate delivery is ignored.
        assert_eq!(
            c.receive(&reply).unwrap(),
            Resolution::Discarded(DiscardReason::UnknownId)
        );
    }

    #[test]
    fn test_unknown_id_is_discarded() {
        let mut c = correlator();
        let stray = Envelope::new(CorrelationId::new(9999), json!("hi")).to_bytes().unwrap();
        assert_eq!(
            c.receive(&stray).unwrap(),
            Resolution::Discarded(DiscardReason::UnknownId)
        );
        assert_eq!(c.pending_len(), 0);
    }

    #[test]
    fn test_malformed_envelope_is_discarded() {
        let mut c = correlator();
        let out = emitted(c.send(|r| r, chain::request("x".to_string())));

        let malformed: [&[u8]; 3] = [b"garbage", br#"{"msg": "y"}"#, br#"{"id": "0", "msg": "y"}"#];
        for bad in malformed {
            assert_eq!(
                c.receive(bad).unwrap(),
                Resolution::Discarded(DiscardReason::MalformedEnvelope)
            );
        }
        assert!(c.is_pending(out.id));
    }

    #[test]
    fn test_undecodable_payload_keeps_entry() {
        let mut c = correlator();
        let out = emitted(c.send(|r| r, chain::request("x".to_string())));

        let wrong_type = Envelope::new(out.id, json!(17)).to_bytes().unwrap();
        assert_eq!(
            c.receive(&wrong_type).unwrap(),
            Resolution::Discarded(DiscardReason::UndecodableResponse)
        );
        assert!(c.is_pending(out.id));

        let good = reply_reversed(&out);
        assert_eq!(c.receive(&good).unwrap(), Resolution::Resolved("x".to_string()));
    }

    #[test]
    fn test_succeed_resolves_without_dispatch() {
        let mut c = correlator();
        let result = c.send(|n: usize| format!("n={n}"), Chain::succeed(3)).unwrap();
        assert_eq!(result, Dispatch::Resolved("n=3".to_string()));
        assert_eq!(c.pending_len(), 0);
        assert_eq!(c.next_id_hint(), 0);
    }

    #[test]
    fn test_left_identity_emits_only_continuation_request() {
        let mut c = correlator();
        let chain = Chain::succeed("seed".to_string()).and_then(|v| chain::request(format!("{v}!")));
        let out = emitted(c.send(|r| r, chain));
        assert_eq!(out.msg, json!("seed!"));
        assert_eq!(c.pending_len(), 1);
    }

    #[test]
    fn test_chained_scenario() {
        let mut c = correlator();
        let chain = chain::request::<String, String>("Reverse me too!".to_string())
            .and_then(|prev| chain::request(format!("{prev} The Quick Brown Fox!")))
            .and_then(|prev| Chain::succeed(format!("{prev}0")));

        let first = emitted(c.send(|r| r, chain));
        let second = advanced(c.receive(&reply_reversed(&first)));
        assert_ne!(first.id, second.id);
        assert!(!c.is_pending(first.id));
        assert_eq!(second.msg, json!("!oot em esreveR The Quick Brown Fox!"));

        assert_eq!(
            c.receive(&reply_reversed(&second)).unwrap(),
            Resolution::Resolved("!xoF nworB kciuQ ehT Reverse me too!0".to_string())
        );
        assert_eq!(c.pending_len(), 0);
    }

    #[test]
    fn test_sequential_steps_splice_in_order() {
        let mut c = correlator();
        let chain = chain::request::<String, String>("a".to_string())
            .then_request(|r| {
                chain::request(format!("{r}b")).then_request(|r: String| chain::request(format!("{r}c")))
            })
            .then_request(|r| chain::request(format!("{r}d")));

        let mut out = emitted(c.send(|r| r, chain));
        let mut sent = vec![out.msg.clone()];
        let final_value = loop {
            match c.receive(&reply_reversed(&out)).unwrap() {
                Resolution::Advanced(next) => {
                    sent.push(next.msg.clone());
                    out = next;
                },
                Resolution::Resolved(value) => break value,
                Resolution::Discarded(reason) => panic!("discarded: {reason}"),
            }
        };

        assert_eq!(sent, vec![json!("a"), json!("ab"), json!("bac"), json!("cabd")]);
        assert_eq!(final_value, "dbac");
        assert_eq!(c.pending_len(), 0);
    }

    #[test]
    fn test_map2_waits_for_first_response() {
        let mut c = correlator();
        let chain = map2(
            |a: String, b: String| format!("{a}+{b}"),
            chain::request("left".to_string()),
            chain::request("right".to_string()),
        );

        let first = emitted(c.send(|r| r, chain));
        assert_eq!(first.msg, json!("left"));
        assert_eq!(c.pending_len(), 1);

        let second = advanced(c.receive(&reply_reversed(&first)));
        assert_eq!(second.msg, json!("right"));
        assert_eq!(
            c.receive(&reply_reversed(&second)).unwrap(),
            Resolution::Resolved("tfel+thgir".to_string())
        );
    }

    #[test]
    fn test_out_of_order_responses() {
        let mut c = correlator();
        let a = emitted(c.send(|r| format!("a:{r}"), chain::request("one".to_string())));
        let b = emitted(c.send(|r| format!("b:{r}"), chain::request("two".to_string())));
        assert_ne!(a.id, b.id);

        assert_eq!(
            c.receive(&reply_reversed(&b)).unwrap(),
            Resolution::Resolved("b:owt".to_string())
        );
        assert_eq!(
            c.receive(&reply_reversed(&a)).unwrap(),
            Resolution::Resolved("a:eno".to_string())
        );
    }

    #[test]
    fn test_ids_wrap_and_skip_pending() {
        let mut c: TextCorrelator = Correlator::with_space(JsonCodec::new(), IdSpace::new(2)).with_initial_hint(1);

        let first = emitted(c.send(|r| r, chain::request("p".to_string())));
        let second = emitted(c.send(|r| r, chain::request("q".to_string())));
        let third = emitted(c.send(|r| r, chain::request("r".to_string())));
        assert_eq!(
            [first.id, second.id, third.id],
            [CorrelationId::new(1), CorrelationId::new(2), CorrelationId::new(0)]
        );

        let exhausted = c.send(|r| r, chain::request("s".to_string()));
        assert_eq!(exhausted, Err(CorrelationError::IdSpaceExhausted { capacity: 3 }));

        c.receive(&reply_reversed(&second)).unwrap();
        let reused = emitted(c.send(|r| r, chain::request("t".to_string())));
        assert_eq!(reused.id, CorrelationId::new(2));
    }

    #[test]
    fn test_deliver_decoded_response() {
        let mut c = correlator();
        let out = emitted(c.send(|r: String| r.to_uppercase(), chain::request("q".to_string())));
        assert_eq!(
            c.deliver(out.id, "abc".to_string()).unwrap(),
            Resolution::Resolved("ABC".to_string())
        );
    }

    #[test]
    fn test_encode_failure_stores_nothing() {
        use crate::codec::FnCodec;
        use crate::error::CodecError;

        let codec = FnCodec::new(
            |_: &String| Err(CodecError::Encode("refused".to_string())),
            |v: serde_json::Value| Ok(v.to_string()),
        );
        let mut c: Correlator<_, String> = Correlator::new(codec);
        let result = c.send(|r| r, chain::request("x".to_string()));
        assert!(matches!(result, Err(CorrelationError::Codec(CodecError::Encode(_)))));
        assert_eq!(c.pending_len(), 0);
    }
}
