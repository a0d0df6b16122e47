//! Composable request chains.
//!
//! A [`Chain`] describes one or more dependent requests and how to turn the
//! final response into a value. Building a chain has no side effect; only
//! handing it to a [`Correlator`](crate::correlator::Correlator) puts
//! anything on the wire, and then only one request at a time.
//!
//! Behind the first request a chain keeps a flat list of [`Step`]s. Each
//! combinator appends one step, so a chain of any length is built in linear
//! time and resolved with constant stack per response. Values travel between
//! steps type-erased; the typed combinators are the only code that builds
//! steps, so every step receives the type it expects.
//!
//! # Laws
//!
//! - Left identity: `Chain::succeed(v).and_then(f)` is `f(v)`, evaluated on
//!   the spot with no dispatch.
//! - Associativity: `c.and_then(f).and_then(g)` dispatches the same requests
//!   and produces the same value as `c.and_then(|x| f(x).and_then(g))`.
//! - `c.map(f)` behaves as `c.and_then(|x| Chain::succeed(f(x)))`.
//!
//! # Example
//!
//! ```
//! use porter_core::chain::{self, Chain};
//!
//! let chain: Chain<String, String, String> = chain::request::<String, String>("Reverse me too!".to_string())
//!     .and_then(|prev| chain::request(format!("{prev} The Quick Brown Fox!")))
//!     .and_then(|prev| Chain::succeed(format!("{prev}0")));
//! assert_eq!(chain.pending_request().map(String::as_str), Some("Reverse me too!"));
//! ```

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;

/// A value passed between steps.
pub type Erased = Box<dyn Any + Send>;

/// One continuation in a chain's step list.
pub type Step<Req> = Box<dyn FnOnce(Erased) -> Flow<Req> + Send>;

/// Ordered list of steps still to run.
pub type Steps<Req> = VecDeque<Step<Req>>;

/// Transform from the raw response to a chain's output.
pub type Specialize<Resp, T> = Box<dyn FnOnce(Resp) -> T + Send>;

/// Recovers the typed output from the value left by the last step.
pub type Finish<T> = Box<dyn FnOnce(Erased) -> T + Send>;

/// What a step hands back to the engine.
pub enum Flow<Req> {
    /// Feed this value to the next step.
    Value(Erased),

    /// Send `request` first; its response goes through `steps`, then on to
    /// the steps that were already waiting.
    Request {
        /// Request to send
        request: Req,
        /// The produced chain's own steps
        steps: Steps<Req>,
    },
}

/// A lazily executed description of dependent requests.
///
/// # Type Parameters
///
/// - `Req`: Request type understood by the codec
/// - `Resp`: Raw response type produced by the codec
/// - `T`: The value this chain eventually yields
pub enum Chain<Req, Resp, T> {
    /// Resolves to a value without sending anything.
    Succeed(T),

    /// One request; its response is transformed by `specialize`.
    Request {
        /// Request to send
        request: Req,
        /// Raw response to output
        specialize: Specialize<Resp, T>,
    },

    /// One request followed by raw-response steps run in order.
    ///
    /// Every step takes a raw response and leaves a raw response.
    Sequential {
        /// First request to send
        request: Req,
        /// Steps run on each successive raw response
        steps: Steps<Req>,
        /// Applied to the raw response once every step has run
        specialize: Specialize<Resp, T>,
    },

    /// Generalized multi-step form.
    ///
    /// The steps start from the raw response of `request` and leave a `T`.
    AndThen {
        /// First request to send
        request: Req,
        /// Steps run after the first response
        steps: Steps<Req>,
        /// Recovers the output from the last step's value
        finish: Finish<T>,
    },
}

/// A chain taken apart for dispatch.
pub enum Suspended<Req, T> {
    /// Nothing to send; the value is available now.
    Ready(T),

    /// A request must go out before the chain can continue.
    Awaiting {
        /// Request to send now
        request: Req,
        /// Steps to run on the response, oldest first
        steps: Steps<Req>,
        /// Run on the value the last step leaves
        finish: Finish<T>,
    },
}

impl<Req> fmt::Debug for Flow<Req>
where
    Req: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Flow::Value(..)"),
            Self::Request { request, steps } => f
                .debug_struct("Flow::Request")
                .field("request", request)
                .field("steps", &steps.len())
                .finish(),
        }
    }
}

impl<Req, Resp, T> fmt::Debug for Chain<Req, Resp, T>
where
    Req: fmt::Debug,
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeed(value) => f.debug_tuple("Chain::Succeed").field(value).finish(),
            Self::Request { request, .. } => f
                .debug_struct("Chain::Request")
                .field("request", request)
                .finish_non_exhaustive(),
            Self::Sequential { request, steps, .. } => f
                .debug_struct("Chain::Sequential")
                .field("request", request)
                .field("steps", &steps.len())
                .finish_non_exhaustive(),
            Self::AndThen { request, steps, .. } => f
                .debug_struct("Chain::AndThen")
                .field("request", request)
                .field("steps", &steps.len())
                .finish_non_exhaustive(),
        }
    }
}

/// Take a step's input back to its static type.
fn unerase<T: 'static>(value: Erased) -> T {
    match value.downcast::<T>() {
        Ok(value) => *value,
        // Steps are only built by the combinators below, which pair every
        // producer with a consumer of the same type.
        Err(_) => unreachable!("chain step received a value of another type"),
    }
}

/// Lift a request into a chain yielding its raw response.
#[must_use]
pub fn request<Req, Resp>(request: Req) -> Chain<Req, Resp, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    Chain::request(request)
}

/// A chain that resolves to `value` without any request.
#[must_use]
pub const fn succeed<Req, Resp, T>(value: T) -> Chain<Req, Resp, T> {
    Chain::Succeed(value)
}

/// Run `a`, then `b`, and combine both outputs.
///
/// `b` is dispatched only after `a` has resolved.
#[must_use]
pub fn map2<Req, Resp, A, B, T, F>(f: F, a: Chain<Req, Resp, A>, b: Chain<Req, Resp, B>) -> Chain<Req, Resp, T>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    A: Send + 'static,
    B: Send + 'static,
    T: Send + 'static,
    F: FnOnce(A, B) -> T + Send + 'static,
{
    a.and_then(move |x| b.map(move |y| f(x, y)))
}

/// Run `a`, `b`, then `c`, and combine all three outputs.
#[must_use]
pub fn map3<Req, Resp, A, B, C, T, F>(
    f: F,
    a: Chain<Req, Resp, A>,
    b: Chain<Req, Resp, B>,
    c: Chain<Req, Resp, C>,
) -> Chain<Req, Resp, T>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
    T: Send + 'static,
    F: FnOnce(A, B, C) -> T + Send + 'static,
{
    a.and_then(move |x| map2(move |y, z| f(x, y, z), b, c))
}

/// Run chains one after another, collecting their outputs in order.
#[must_use]
pub fn sequence<Req, Resp, T>(chains: Vec<Chain<Req, Resp, T>>) -> Chain<Req, Resp, Vec<T>>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    T: Send + 'static,
{
    let capacity = chains.len();
    chains
        .into_iter()
        .fold(Chain::succeed(Vec::with_capacity(capacity)), |acc, chain| {
            map2(
                |mut values: Vec<T>, value| {
                    values.push(value);
                    values
                },
                acc,
                chain,
            )
        })
}

impl<Req, Resp> Chain<Req, Resp, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Lift a request into a chain yielding its raw response.
    #[must_use]
    pub fn request(request: Req) -> Self {
        Self::Request {
            request,
            specialize: Box::new(|response| response),
        }
    }

    /// Append a raw-response step.
    ///
    /// Equivalent to [`and_then`](Self::and_then) but keeps the chain in its
    /// flat [`Chain::Sequential`] form.
    #[must_use]
    pub fn then_request<F>(self, f: F) -> Self
    where
        F: FnOnce(Resp) -> Self + Send + 'static,
    {
        let (request, mut steps, specialize) = match self {
            Self::Succeed(value) => return f(value),
            Self::Request { request, specialize } => (request, VecDeque::with_capacity(1), specialize),
            Self::Sequential {
                request,
                steps,
                specialize,
            } => (request, steps, specialize),
            general @ Self::AndThen { .. } => return general.and_then(f),
        };

        steps.push_back(Box::new(move |value| {
            f(specialize(unerase::<Resp>(value))).into_flow()
        }));
        Self::Sequential {
            request,
            steps,
            specialize: Box::new(|response| response),
        }
    }
}

impl<Req, Resp, T> Chain<Req, Resp, T>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    T: Send + 'static,
{
    /// A chain that resolves to `value` without any request.
    #[must_use]
    pub const fn succeed(value: T) -> Self {
        Self::Succeed(value)
    }

    /// Continue with the chain `f` builds from this chain's output.
    ///
    /// On a [`Chain::Succeed`] value `f` runs immediately. Otherwise `f`
    /// becomes one more step.
    #[must_use]
    pub fn and_then<U, F>(self, f: F) -> Chain<Req, Resp, U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Chain<Req, Resp, U> + Send + 'static,
    {
        match self.suspend() {
            Suspended::Ready(value) => f(value),
            Suspended::Awaiting {
                request,
                mut steps,
                finish,
            } => {
                steps.push_back(Box::new(move |value| f(finish(value)).into_flow()));
                Chain::AndThen {
                    request,
                    steps,
                    finish: Box::new(unerase::<U>),
                }
            },
        }
    }

    /// Transform this chain's output.
    #[must_use]
    pub fn map<U, F>(self, f: F) -> Chain<Req, Resp, U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        match self.suspend() {
            Suspended::Ready(value) => Chain::Succeed(f(value)),
            Suspended::Awaiting {
                request,
                mut steps,
                finish,
            } => {
                steps.push_back(Box::new(move |value| Flow::Value(Box::new(f(finish(value))))));
                Chain::AndThen {
                    request,
                    steps,
                    finish: Box::new(unerase::<U>),
                }
            },
        }
    }

    /// The request that would go out first, if any.
    #[must_use]
    pub const fn pending_request(&self) -> Option<&Req> {
        match self {
            Self::Succeed(_) => None,
            Self::Request { request, .. }
            | Self::Sequential { request, .. }
            | Self::AndThen { request, .. } => Some(request),
        }
    }

    /// Whether this chain resolves without touching the wire.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Succeed(_))
    }

    /// Split the chain into the request to send now and what follows it.
    #[must_use]
    pub fn suspend(self) -> Suspended<Req, T> {
        match self {
            Self::Succeed(value) => Suspended::Ready(value),
            Self::Request { request, specialize } => Suspended::Awaiting {
                request,
                steps: VecDeque::new(),
                finish: Box::new(move |value| specialize(unerase::<Resp>(value))),
            },
            Self::Sequential {
                request,
                steps,
                specialize,
            } => Suspended::Awaiting {
                request,
                steps,
                finish: Box::new(move |value| specialize(unerase::<Resp>(value))),
            },
            Self::AndThen { request, steps, finish } => Suspended::Awaiting { request, steps, finish },
        }
    }

    /// The form a step returns when it produces this chain.
    fn into_flow(self) -> Flow<Req> {
        match self.suspend() {
            Suspended::Ready(value) => Flow::Value(Box::new(value)),
            Suspended::Awaiting {
                request,
                mut steps,
                finish,
            } => {
                steps.push_back(Box::new(move |value| Flow::Value(Box::new(finish(value)))));
                Flow::Request { request, steps }
            },
        }
    }
}

impl<Req, Resp, T, E> Chain<Req, Resp, Result<T, E>>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    /// A chain that resolves to `Err(error)` without any request.
    #[must_use]
    pub const fn fail(error: E) -> Self {
        Self::Succeed(Err(error))
    }

    /// Continue with `f` on success; pass an error through untouched.
    ///
    /// `f` is never invoked for an `Err`, and a chain that already holds an
    /// `Err` stays a [`Chain::Succeed`], so nothing reaches the wire.
    #[must_use]
    pub fn and_then_ok<U, F>(self, f: F) -> Chain<Req, Resp, Result<U, E>>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Chain<Req, Resp, Result<U, E>> + Send + 'static,
    {
        self.and_then(move |result| match result {
            Ok(value) => f(value),
            Err(error) => Chain::Succeed(Err(error)),
        })
    }

    /// Transform the success value.
    #[must_use]
    pub fn map_ok<U, F>(self, f: F) -> Chain<Req, Resp, Result<U, E>>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.map(move |result| result.map(f))
    }

    /// Transform the error value.
    #[must_use]
    pub fn map_err<E2, F>(self, f: F) -> Chain<Req, Resp, Result<T, E2>>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> E2 + Send + 'static,
    {
        self.map(move |result| result.map_err(f))
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::correlator::{Correlator, Dispatch, Resolution};
    use crate::envelope::Envelope;
    use serde_json::json;

    type TextChain<T> = Chain<String, String, T>;

    fn reverse(text: &str) -> String {
        text.chars().rev().collect()
    }

    /// Resolve a chain through a correlator against a reversing worker,
    /// recording every request that went out.
    fn run<T>(chain: TextChain<T>) -> (Vec<String>, T)
    where
        T: Send + 'static,
    {
        let mut correlator: Correlator<JsonCodec<String, String>, T> = Correlator::new(JsonCodec::new());
        let mut sent = Vec::new();

        let mut outbound = match correlator.dispatch(chain).unwrap() {
            Dispatch::Resolved(value) => return (sent, value),
            Dispatch::Emit(envelope) => envelope,
        };
        loop {
            let request = outbound.msg.as_str().unwrap().to_string();
            let reply = Envelope::new(outbound.id, json!(reverse(&request)));
            sent.push(request);

            match correlator.receive_envelope(reply).unwrap() {
                Resolution::Resolved(value) => {
                    assert_eq!(correlator.pending_len(), 0);
                    return (sent, value);
                },
                Resolution::Advanced(next) => outbound = next,
                Resolution::Discarded(reason) => panic!("reply discarded: {reason}"),
            }
        }
    }

    #[test]
    fn test_request_yields_raw_response() {
        let (sent, value) = run(request("Reverse me!".to_string()));
        assert_eq!(sent, vec!["Reverse me!".to_string()]);
        assert_eq!(value, "!em esreveR");
    }

    #[test]
    fn test_succeed_sends_nothing() {
        let (sent, value) = run(TextChain::succeed(7));
        assert!(sent.is_empty());
        assert_eq!(value, 7);
    }

    #[test]
    fn test_left_identity_runs_immediately() {
        let chain: TextChain<String> =
            Chain::succeed("abc".to_string()).and_then(|v| request(format!("{v}!")));
        assert_eq!(chain.pending_request().map(String::as_str), Some("abc!"));
    }

    #[test]
    fn test_and_then_appends_one_step() {
        let chain = request::<String, String>("a".to_string())
            .and_then(|r| request(format!("{r}b")))
            .and_then(|r| request(format!("{r}c")))
            .map(|r: String| r.len());

        match chain {
            Chain::AndThen { steps, .. } => assert_eq!(steps.len(), 3),
            other => panic!("expected the general form, got {other:?}"),
        }
    }

    #[test]
    fn test_chained_scenario() {
        let chain: TextChain<String> = request::<String, String>("Reverse me too!".to_string())
            .and_then(|prev| request(format!("{prev} The Quick Brown Fox!")))
            .and_then(|prev| Chain::succeed(format!("{prev}0")));

        let (sent, value) = run(chain);
        assert_eq!(sent.len(), 2);
        assert_eq!(value, "!xoF nworB kciuQ ehT Reverse me too!0");
    }

    #[test]
    fn test_then_request_matches_and_then() {
        let flat = request::<String, String>("one".to_string())
            .then_request(|r| request(format!("{r}-two")))
            .then_request(|r| request(format!("{r}-three")));
        let nested = request::<String, String>("one".to_string())
            .and_then(|r| request(format!("{r}-two")))
            .and_then(|r| request(format!("{r}-three")));

        assert!(matches!(flat, Chain::Sequential { .. }));
        assert_eq!(run(flat), run(nested));
    }

    #[test]
    fn test_map_transforms_output() {
        let chain = request::<String, String>("abc".to_string()).map(|r| r.len());
        assert_eq!(run(chain), (vec!["abc".to_string()], 3));
    }

    #[test]
    fn test_map2_runs_in_order() {
        let chain = map2(
            |a: String, b: String| format!("{a}|{b}"),
            request("ab".to_string()),
            request("cd".to_string()),
        );
        let (sent, value) = run(chain);
        assert_eq!(sent, vec!["ab".to_string(), "cd".to_string()]);
        assert_eq!(value, "ba|dc");
    }

    #[test]
    fn test_map3_combines_three() {
        let chain = map3(
            |a: String, b: String, c: usize| format!("{a}{b}{c}"),
            request("x".to_string()),
            request("yz".to_string()),
            Chain::succeed(9),
        );
        let (sent, value) = run(chain);
        assert_eq!(sent.len(), 2);
        assert_eq!(value, "xzy9");
    }

    #[test]
    fn test_sequence_collects_in_order() {
        let chain = sequence(vec![
            request("ab".to_string()),
            Chain::succeed("static".to_string()),
            request("cd".to_string()),
        ]);
        let (sent, values) = run(chain);
        assert_eq!(sent, vec!["ab".to_string(), "cd".to_string()]);
        assert_eq!(values, vec!["ba", "static", "dc"]);
    }

    #[test]
    fn test_sequence_of_nothing_is_ready() {
        let chain: TextChain<Vec<String>> = sequence(Vec::new());
        assert!(chain.is_ready());
    }

    #[test]
    fn test_and_then_ok_short_circuits_error() {
        let chain: TextChain<Result<String, String>> = Chain::fail("boom".to_string())
            .and_then_ok(|v: String| request(v).map(Ok));

        assert!(chain.is_ready());
        let (sent, value) = run(chain);
        assert!(sent.is_empty());
        assert_eq!(value, Err("boom".to_string()));
    }

    #[test]
    fn test_and_then_ok_skips_after_error_response() {
        let parse = |raw: String| -> Result<String, String> {
            if raw.starts_with('!') { Err(raw) } else { Ok(raw) }
        };
        let chain = request::<String, String>("bad!".to_string())
            .map(parse)
            .and_then_ok(|v| request(v).map(Ok));

        let (sent, value) = run(chain);
        assert_eq!(sent.len(), 1);
        assert_eq!(value, Err("!dab".to_string()));
    }

    #[test]
    fn test_map_ok_and_map_err() {
        let ok: TextChain<Result<usize, String>> =
            request("abcd".to_string()).map(Ok).map_ok(|s: String| s.len());
        assert_eq!(run(ok).1, Ok(4));

        let err: TextChain<Result<String, usize>> =
            Chain::<String, String, Result<String, String>>::fail("xyz".to_string()).map_err(|e| e.len());
        assert_eq!(run(err).1, Err(3));
    }

    mod laws {
        use super::*;
        use proptest::prelude::*;

        fn shout(s: String) -> TextChain<String> {
            request(format!("{s}!"))
        }

        fn twice(s: String) -> TextChain<String> {
            request::<String, String>(s).and_then(|r| request(format!("{r}{r}")))
        }

        fn flat(s: String) -> TextChain<String> {
            request::<String, String>(s).then_request(|r| request(format!("{r}.")))
        }

        proptest! {
            #[test]
            fn left_identity(a in "[a-z ]{0,12}") {
                let lhs = Chain::succeed(a.clone()).and_then(shout);
                prop_assert_eq!(run(lhs), run(shout(a)));
            }

            #[test]
            fn right_identity(a in "[a-z ]{0,12}") {
                let lhs = twice(a.clone()).and_then(Chain::succeed);
                prop_assert_eq!(run(lhs), run(twice(a)));
            }

            #[test]
            fn associativity(a in "[a-z ]{0,12}") {
                let lhs = twice(a.clone()).and_then(shout).and_then(twice);
                let rhs = twice(a).and_then(|x| shout(x).and_then(twice));
                prop_assert_eq!(run(lhs), run(rhs));
            }

            #[test]
            fn associativity_across_forms(a in "[a-z ]{0,12}") {
                let lhs = flat(a.clone()).and_then(twice).map(|s| s.len()).and_then(|n| shout(n.to_string()));
                let rhs = flat(a).and_then(|x| twice(x).map(|s| s.len()).and_then(|n| shout(n.to_string())));
                prop_assert_eq!(run(lhs), run(rhs));
            }

            #[test]
            fn map_fusion(a in "[a-z ]{0,12}") {
                let lhs = twice(a.clone()).map(|s| s.len()).map(|n| n * 2);
                let rhs = twice(a).map(|s| s.len() * 2);
                prop_assert_eq!(run(lhs), run(rhs));
            }
        }
    }
}
