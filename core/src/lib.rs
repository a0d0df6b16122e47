//! # Porter Core
//!
//! Request/response correlation over a pair of one-way message channels.
//!
//! A host application can put a message on an outbound channel and receive
//! messages from an inbound channel, but the two are not linked. This crate
//! layers request/response semantics on top: every outgoing request is
//! wrapped in a `{ id, msg }` envelope, the peer echoes the `id` back, and the
//! response is routed to the continuation that asked for it.
//!
//! ## Core Concepts
//!
//! - **`CorrelationId`**: Integer tag linking a request to its response ([`id`])
//! - **Chain**: Lazy description of dependent requests ([`chain`])
//! - **Pending table**: Suspended continuations keyed by id ([`pending`])
//! - **Correlator**: The dispatch/resolve state machine ([`correlator`])
//! - **Envelope**: The `{ id, msg }` wire shape ([`envelope`])
//! - **Codec**: Request/response (de)serialization ([`codec`])
//!
//! The correlator performs no I/O. The runtime crate wires it to a transport
//! and to a [`Reducer`](reducer::Reducer)-driven store, where a resolved
//! chain becomes an action fed back into the reducer.
//!
//! ## Example
//!
//! ```
//! use porter_core::chain::{self, Chain};
//! use porter_core::codec::JsonCodec;
//! use porter_core::correlator::{Correlator, Dispatch, Resolution};
//! use porter_core::envelope::Envelope;
//!
//! let mut correlator: Correlator<JsonCodec<String, String>, String> = Correlator::new(JsonCodec::new());
//!
//! let chain = chain::request::<String, String>("ping".to_string())
//!     .and_then(|pong| Chain::succeed(format!("got {pong}")));
//!
//! let Ok(Dispatch::Emit(out)) = correlator.dispatch(chain) else { unreachable!() };
//! let reply = Envelope::new(out.id, serde_json::json!("pong")).to_bytes().unwrap();
//!
//! assert_eq!(
//!     correlator.receive(&reply).unwrap(),
//!     Resolution::Resolved("got pong".to_string())
//! );
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use smallvec::{SmallVec, smallvec};

/// Correlation identifiers and allocation
pub mod id;

/// Composable request chains
pub mod chain;

/// Pending-request table
pub mod pending;

/// Error types
pub mod error;

/// The `{ id, msg }` wire envelope
pub mod envelope;

/// Request/response codecs
pub mod codec;

/// Dispatch/resolve engine
pub mod correlator;

pub use chain::Chain;
pub use codec::{Codec, JsonCodec};
pub use correlator::{Correlator, DiscardReason, Dispatch, Resolution};
pub use envelope::Envelope;
pub use error::{CodecError, CorrelationError, EnvelopeError};
pub use id::{CorrelationId, IdSpace};

/// Reducer module - The core trait for application logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
/// Sending a request is an effect; its resolution comes back as an action.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait
    ///
    /// # Type Parameters
    ///
    /// - `State`: The state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    ///
    /// # Example
    ///
    /// ```
    /// use porter_core::effect::Effect;
    /// use porter_core::reducer::Reducer;
    /// use porter_core::{smallvec, SmallVec};
    ///
    /// #[derive(Clone)]
    /// struct CountReducer;
    ///
    /// impl Reducer for CountReducer {
    ///     type State = u32;
    ///     type Action = ();
    ///     type Environment = ();
    ///
    ///     fn reduce(&self, state: &mut u32, _action: (), _env: &()) -> SmallVec<[Effect<()>; 4]> {
    ///         *state += 1;
    ///         smallvec![Effect::None]
    ///     }
    /// }
    ///
    /// let mut state = 0;
    /// CountReducer.reduce(&mut state, (), &());
    /// assert_eq!(state, 1);
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// Updates state in place and returns effect descriptions for the
        /// runtime to execute. Must not perform I/O itself.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects are values returned from reducers and executed by the runtime.
/// Putting a request on the wire is one: the runtime's `Port` hands back an
/// [`Effect::Future`](effect::Effect::Future) that performs the emit.
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;

    /// Effect type - describes a side effect to be executed
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects can produce (feedback loop)
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects in parallel
        Parallel(Vec<Effect<Action>>),

        /// Run effects sequentially
        Sequential(Vec<Effect<Action>>),

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Chain effects to run sequentially
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }

        /// Box an async block into an [`Effect::Future`]
        #[must_use]
        pub fn future<F>(fut: F) -> Effect<Action>
        where
            F: Future<Output = Option<Action>> + Send + 'static,
        {
            Effect::Future(Box::pin(fut))
        }

        /// Whether this effect does nothing
        #[must_use]
        pub fn is_none(&self) -> bool {
            match self {
                Effect::None => true,
                Effect::Parallel(effects) | Effect::Sequential(effects) => {
                    effects.iter().all(Effect::is_none)
                },
                Effect::Future(_) => false,
            }
        }
    }
}

/// Environment module - Dependency injection traits
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time for testability
    ///
    /// The correlator stamps each pending entry with `now()` so that callers
    /// can find requests that have been waiting too long.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::effect::Effect;

    #[test]
    fn test_effect_is_none() {
        assert!(Effect::<()>::None.is_none());
        assert!(Effect::<()>::merge(vec![Effect::None, Effect::chain(vec![])]).is_none());
        assert!(!Effect::<()>::future(async { None }).is_none());
    }

    #[test]
    fn test_effect_debug() {
        let effect: Effect<u8> = Effect::chain(vec![Effect::None, Effect::future(async { Some(1) })]);
        assert_eq!(
            format!("{effect:?}"),
            "Effect::Sequential([Effect::None, Effect::Future(<future>)])"
        );
    }
}
