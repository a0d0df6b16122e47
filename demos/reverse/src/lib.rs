//! # Reverse Demo
//!
//! Request/response chains over a pair of one-way channels, driven by a
//! reducer.
//!
//! The "external worker" on the far side of the channels reverses every
//! string it receives. The reducer never talks to it directly: it returns
//! effects built with [`Port::send`], and the answers come back as
//! [`ReverseAction`]s.
//!
//! This example showcases:
//! - A single request (`"Reverse me!"` → `"!em esreveR"`)
//! - A dependent chain where each request is built from the previous reply
//! - Result-aware chaining that skips the second request on a bad reply
//!
//! ## Example
//!
//! ```no_run
//! use reverse_demo::{spawn_demo, ReverseAction};
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = spawn_demo();
//! let reply = store
//!     .send_and_wait_for(
//!         ReverseAction::Reverse("Reverse me!".to_string()),
//!         ReverseAction::is_outcome,
//!         Duration::from_secs(1),
//!     )
//!     .await?;
//! assert_eq!(reply, ReverseAction::Reversed("!em esreveR".to_string()));
//! # Ok(())
//! # }
//! ```

use porter_core::chain::{self, Chain};
use porter_core::codec::JsonCodec;
use porter_core::{SmallVec, effect::Effect, reducer::Reducer, smallvec};
use porter_runtime::transport::ChannelTransport;
use porter_runtime::{Port, PortConfig, Store, spawn_listener};
use porter_testing::ReversingWorker;
use std::sync::Arc;

/// Port type used by the demo: strings out, strings back.
pub type ReversePort = Port<JsonCodec<String, String>, ReverseAction>;

/// Store type used by the demo.
pub type ReverseStore = Store<ReverseState, ReverseAction, ReverseEnvironment, ReverseReducer>;

/// Demo state
#[derive(Debug, Clone, Default)]
pub struct ReverseState {
    /// Every reversed result, in arrival order
    pub results: Vec<String>,
    /// Every rejection reason, in arrival order
    pub rejections: Vec<String>,
    /// Chains sent and not yet answered
    pub in_flight: usize,
}

/// Demo actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReverseAction {
    /// Reverse a string once
    Reverse(String),
    /// Reverse, append `" The Quick Brown Fox!"`, reverse again, append `"0"`
    ReverseChained(String),
    /// Reverse; if the reply is non-empty, reverse it again with a `"!"`
    ReverseChecked(String),
    /// A chain finished with this text
    Reversed(String),
    /// A checked chain stopped early
    Rejected(String),
}

impl ReverseAction {
    /// Whether this action is the final answer to a chain.
    #[must_use]
    pub const fn is_outcome(&self) -> bool {
        matches!(self, Self::Reversed(_) | Self::Rejected(_))
    }
}

/// Demo environment
#[derive(Clone)]
pub struct ReverseEnvironment {
    /// Port to the reversing worker
    pub port: ReversePort,
}

impl ReverseEnvironment {
    /// Create an environment around `port`
    #[must_use]
    pub const fn new(port: ReversePort) -> Self {
        Self { port }
    }
}

/// Demo reducer
#[derive(Debug, Clone, Copy, Default)]
pub struct ReverseReducer;

impl Reducer for ReverseReducer {
    type State = ReverseState;
    type Action = ReverseAction;
    type Environment = ReverseEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            ReverseAction::Reverse(text) => {
                state.in_flight += 1;
                smallvec![env.port.send(ReverseAction::Reversed, chain::request(text))]
            },
            ReverseAction::ReverseChained(text) => {
                state.in_flight += 1;
                smallvec![env.port.send(ReverseAction::Reversed, chained(text))]
            },
            ReverseAction::ReverseChecked(text) => {
                state.in_flight += 1;
                let effect = env.port.send(
                    |outcome: Result<String, String>| match outcome {
                        Ok(text) => ReverseAction::Reversed(text),
                        Err(reason) => ReverseAction::Rejected(reason),
                    },
                    checked(text),
                );
                smallvec![effect]
            },
            ReverseAction::Reversed(text) => {
                state.in_flight = state.in_flight.saturating_sub(1);
                state.results.push(text);
                smallvec![Effect::None]
            },
            ReverseAction::Rejected(reason) => {
                state.in_flight = state.in_flight.saturating_sub(1);
                state.rejections.push(reason);
                smallvec![Effect::None]
            },
        }
    }
}

/// Two dependent requests and a local step.
#[must_use]
pub fn chained(text: String) -> Chain<String, String, String> {
    chain::request(text)
        .and_then(|prev: String| chain::request(format!("{prev} The Quick Brown Fox!")))
        .and_then(|prev: String| Chain::succeed(format!("{prev}0")))
}

/// Reverse `text`, then reverse the reply plus `"!"` unless it came back empty.
#[must_use]
pub fn checked(text: String) -> Chain<String, String, Result<String, String>> {
    chain::request(text)
        .map(|reply: String| {
            if reply.is_empty() {
                Err("worker returned an empty string".to_string())
            } else {
                Ok(reply)
            }
        })
        .and_then_ok(|reply| chain::request(format!("{reply}!")).map(Ok))
}

/// Wire a store to a freshly spawned reversing worker.
///
/// Must be called inside a Tokio runtime.
#[must_use]
pub fn spawn_demo() -> ReverseStore {
    let (transport, inbound, endpoint) = ChannelTransport::pair();
    let _worker = ReversingWorker::spawn(endpoint);

    let port: ReversePort = Port::new(JsonCodec::new(), Arc::new(transport), PortConfig::new("reverse"));
    let store = Store::new(ReverseState::default(), ReverseReducer, ReverseEnvironment::new(port.clone()));
    let _listener = spawn_listener(port, inbound, store.clone());

    store
}
