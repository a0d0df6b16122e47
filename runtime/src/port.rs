//! A correlator shared between a reducer's effects and the inbound listener.
//!
//! [`Port::send`] is the only way application code puts a request on the
//! wire: it wraps a chain into an [`Effect`] that the [`Store`] executes.
//! The listener started by [`spawn_listener`] feeds every inbound message to
//! [`Port::receive`] and sends resolved values back into the store as
//! actions.
//!
//! Access to the correlator is serialized by an async mutex, and the
//! outbound emit happens while it is held, so requests leave in the order
//! their chains were dispatched and one inbound message is fully processed
//! before the next.

use crate::metrics::PortMetrics;
use crate::store::Store;
use crate::transport::{InboundStream, Transport};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use porter_core::chain::Chain;
use porter_core::codec::Codec;
use porter_core::correlator::{Correlator, Dispatch, Resolution};
use porter_core::effect::Effect;
use porter_core::envelope::Envelope;
use porter_core::environment::Clock;
use porter_core::id::{CorrelationId, IdSpace};
use porter_core::reducer::Reducer;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Configuration for a [`Port`]
///
/// # Example
///
/// ```
/// use porter_core::IdSpace;
/// use porter_runtime::PortConfig;
///
/// let config = PortConfig::new("reverser")
///     .with_id_space(IdSpace::new(1023))
///     .with_initial_hint(1);
/// assert_eq!(config.name, "reverser");
/// ```
#[derive(Debug, Clone)]
pub struct PortConfig {
    /// Name used in log fields and metric labels
    pub name: String,
    /// Range correlation identifiers are drawn from
    pub id_space: IdSpace,
    /// Identifier the first allocation starts from
    pub initial_hint: u32,
}

impl PortConfig {
    /// Default configuration under a custom name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the identifier space
    #[must_use]
    pub const fn with_id_space(mut self, id_space: IdSpace) -> Self {
        self.id_space = id_space;
        self
    }

    /// Set the first allocation hint
    #[must_use]
    pub const fn with_initial_hint(mut self, hint: u32) -> Self {
        self.initial_hint = hint;
        self
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            name: "port".to_string(),
            id_space: IdSpace::DEFAULT,
            initial_hint: 0,
        }
    }
}

/// A correlator bound to a codec and a transport.
///
/// Cheap to clone; all clones share the same pending table.
///
/// # Type Parameters
///
/// - `C`: Codec for requests and responses
/// - `A`: Action type that resolved chains produce
pub struct Port<C: Codec, A> {
    inner: Arc<Inner<C, A>>,
}

struct Inner<C: Codec, A> {
    correlator: Mutex<Correlator<C, A>>,
    transport: Arc<dyn Transport>,
    config: PortConfig,
}

impl<C, A> Port<C, A>
where
    C: Codec + 'static,
    A: Send + 'static,
{
    /// Create a port with the system clock.
    #[must_use]
    pub fn new(codec: C, transport: Arc<dyn Transport>, config: PortConfig) -> Self {
        let correlator = Correlator::with_space(codec, config.id_space).with_initial_hint(config.initial_hint);
        Self::from_correlator(correlator, transport, config)
    }

    /// Create a port that timestamps pending requests with `clock`.
    #[must_use]
    pub fn with_clock(codec: C, transport: Arc<dyn Transport>, config: PortConfig, clock: Arc<dyn Clock>) -> Self {
        let correlator = Correlator::with_space(codec, config.id_space)
            .with_initial_hint(config.initial_hint)
            .with_clock(clock);
        Self::from_correlator(correlator, transport, config)
    }

    fn from_correlator(correlator: Correlator<C, A>, transport: Arc<dyn Transport>, config: PortConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                correlator: Mutex::new(correlator),
                transport,
                config,
            }),
        }
    }

    /// Describe sending `chain` and delivering its output to `handler`.
    ///
    /// Nothing happens until the returned effect is executed. A chain that
    /// needs no request resolves as soon as the effect runs; otherwise the
    /// effect completes once the first request is emitted, and the handler's
    /// action arrives later through the listener.
    #[must_use]
    pub fn send<T, F>(&self, handler: F, chain: Chain<C::Request, C::Response, T>) -> Effect<A>
    where
        T: Send + 'static,
        F: FnOnce(T) -> A + Send + 'static,
    {
        let port = self.clone();
        Effect::future(async move { port.dispatch(chain.map(handler)).await })
    }

    /// Dispatch a chain whose output is already an action.
    ///
    /// Returns the action immediately for a short-circuited chain, `None`
    /// once a request has been emitted or if dispatch failed. Failures are
    /// logged and the chain is dropped.
    #[tracing::instrument(skip(self, chain), fields(port = %self.inner.config.name))]
    pub async fn dispatch(&self, chain: Chain<C::Request, C::Response, A>) -> Option<A> {
        let name = self.name();
        let mut correlator = self.inner.correlator.lock().await;

        let outcome = correlator.dispatch(chain);
        PortMetrics::record_pending(name, correlator.pending_len());

        match outcome {
            Ok(Dispatch::Resolved(action)) => {
                tracing::trace!("Chain resolved without a request");
                PortMetrics::record_short_circuit(name);
                Some(action)
            },
            Ok(Dispatch::Emit(envelope)) => {
                tracing::debug!(id = %envelope.id, "Dispatching request");
                PortMetrics::record_dispatched(name);
                self.emit(&envelope);
                None
            },
            Err(error) => {
                tracing::error!(%error, "Dropping chain: request could not be dispatched");
                None
            },
        }
    }

    /// Process one inbound message.
    ///
    /// Returns the action a finished chain produced. Advancing chains emit
    /// their next request and return `None`; discarded messages are logged
    /// and counted.
    #[tracing::instrument(skip(self, bytes), fields(port = %self.inner.config.name, len = bytes.len()))]
    pub async fn receive(&self, bytes: &[u8]) -> Option<A> {
        let name = self.name();
        let mut correlator = self.inner.correlator.lock().await;

        let outcome = correlator.receive(bytes);
        PortMetrics::record_pending(name, correlator.pending_len());

        match outcome {
            Ok(Resolution::Resolved(action)) => {
                tracing::trace!("Chain resolved");
                PortMetrics::record_resolved(name);
                Some(action)
            },
            Ok(Resolution::Advanced(envelope)) => {
                tracing::debug!(id = %envelope.id, "Chain advanced to next request");
                PortMetrics::record_advanced(name);
                self.emit(&envelope);
                None
            },
            Ok(Resolution::Discarded(reason)) => {
                PortMetrics::record_discarded(name, reason.as_str());
                None
            },
            Err(error) => {
                tracing::error!(%error, "Dropping chain: next request could not be dispatched");
                None
            },
        }
    }

    fn emit(&self, envelope: &Envelope) {
        let bytes = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::error!(id = %envelope.id, %error, "Failed to serialize envelope");
                return;
            },
        };

        // The entry stays pending; a failed send looks like a lost response.
        if let Err(error) = self.inner.transport.emit(bytes) {
            tracing::warn!(id = %envelope.id, %error, "Failed to emit request");
        }
    }

    /// Number of chains awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.inner.correlator.lock().await.pending_len()
    }

    /// Pending identifiers in ascending order.
    pub async fn pending_ids(&self) -> Vec<CorrelationId> {
        self.inner.correlator.lock().await.pending_ids()
    }

    /// Whether `id` is awaiting a response.
    pub async fn is_pending(&self, id: CorrelationId) -> bool {
        self.inner.correlator.lock().await.is_pending(id)
    }

    /// Identifiers whose request went out before `cutoff`.
    ///
    /// Entries are never evicted; callers decide what to do about them.
    pub async fn pending_older_than(&self, cutoff: DateTime<Utc>) -> Vec<CorrelationId> {
        self.inner.correlator.lock().await.pending_older_than(cutoff)
    }

    /// The port's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// The port's configuration.
    #[must_use]
    pub fn config(&self) -> &PortConfig {
        &self.inner.config
    }
}

impl<C: Codec, A> Clone for Port<C, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Codec, A> fmt::Debug for Port<C, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.inner.config.name)
            .finish_non_exhaustive()
    }
}

/// Route inbound messages through `port` and resolved actions into `store`.
///
/// Runs until the inbound stream ends or the store starts shutting down.
pub fn spawn_listener<C, S, A, E, R>(port: Port<C, A>, mut inbound: InboundStream, store: Store<S, A, E, R>) -> JoinHandle<()>
where
    C: Codec + 'static,
    R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
    A: Send + Clone + 'static,
    S: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        while let Some(bytes) = inbound.next().await {
            let Some(action) = port.receive(&bytes).await else {
                continue;
            };
            if let Err(error) = store.feedback(action).await {
                tracing::warn!(port = %port.name(), %error, "Store rejected resolved action, stopping listener");
                break;
            }
        }
        tracing::debug!(port = %port.name(), "Inbound stream ended");
    })
}
