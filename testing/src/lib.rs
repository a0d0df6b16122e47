//! # Porter Testing
//!
//! Testing utilities for porter.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - A transport that records instead of sending ([`RecordingTransport`])
//! - Fake external workers answering over a channel pair ([`workers`])
//!
//! ## Example
//!
//! ```
//! use porter_core::chain;
//! use porter_core::codec::JsonCodec;
//! use porter_runtime::{ChannelTransport, Port, PortConfig};
//! use porter_testing::workers::ReversingWorker;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (transport, _inbound, endpoint) = ChannelTransport::pair();
//! let _worker = ReversingWorker::spawn(endpoint);
//!
//! let port: Port<JsonCodec<String, String>, String> =
//!     Port::new(JsonCodec::new(), Arc::new(transport), PortConfig::default());
//! let _effect = port.send(|text| text, chain::request("Reverse me!".to_string()));
//! # }
//! ```

use chrono::{DateTime, Utc};
use porter_core::environment::Clock;

/// Mock implementations of Environment traits and transports.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use porter_core::envelope::Envelope;
    use porter_runtime::transport::{Transport, TransportError};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use porter_testing::mocks::FixedClock;
    /// use porter_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Clock that only moves when told to
    ///
    /// Clones share the same time, so a test can keep one handle and give
    /// another to a port.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = lock(&self.time);
            *time += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *lock(&self.time)
        }
    }

    /// Transport that keeps every emitted message instead of sending it
    ///
    /// Clones share the same log.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingTransport {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        closed: Arc<AtomicBool>,
    }

    impl RecordingTransport {
        /// An open transport with an empty log
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every later `emit` fail with [`TransportError::Closed`]
        pub fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        /// Raw bytes emitted so far
        #[must_use]
        pub fn sent_bytes(&self) -> Vec<Vec<u8>> {
            lock(&self.sent).clone()
        }

        /// Emitted messages parsed as envelopes; unparseable ones are skipped
        #[must_use]
        pub fn sent(&self) -> Vec<Envelope> {
            lock(&self.sent)
                .iter()
                .filter_map(|bytes| Envelope::from_slice(bytes).ok())
                .collect()
        }

        /// Remove and return everything emitted so far
        #[must_use]
        pub fn take(&self) -> Vec<Envelope> {
            let drained: Vec<_> = lock(&self.sent).drain(..).collect();
            drained
                .iter()
                .filter_map(|bytes| Envelope::from_slice(bytes).ok())
                .collect()
        }

        /// Number of messages emitted so far
        #[must_use]
        pub fn len(&self) -> usize {
            lock(&self.sent).len()
        }

        /// Whether nothing has been emitted
        #[must_use]
        pub fn is_empty(&self) -> bool {
            lock(&self.sent).is_empty()
        }
    }

    impl Transport for RecordingTransport {
        fn emit(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }
            lock(&self.sent).push(bytes);
            Ok(())
        }
    }

    // A panicking test thread must not hide the log from the others.
    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fake external workers.
///
/// A worker reads requests from a [`WorkerEndpoint`], computes a reply
/// payload, and answers with the same `id`, the way a real peer on the other
/// end of the channels would.
pub mod workers {
    use porter_core::envelope::Envelope;
    use porter_runtime::transport::WorkerEndpoint;
    use serde_json::Value;
    use tokio::task::JoinHandle;

    /// Reverse a string by characters.
    #[must_use]
    pub fn reverse_text(text: &str) -> String {
        text.chars().rev().collect()
    }

    /// Build the raw reply to `request` carrying `msg`.
    ///
    /// # Panics
    ///
    /// Never: an envelope of an id and a JSON value always serializes.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn reply_to(request: &Envelope, msg: Value) -> Vec<u8> {
        Envelope::new(request.id, msg)
            .to_bytes()
            .expect("envelope with a JSON payload always serializes")
    }

    /// Serve requests with `respond` until either side hangs up.
    ///
    /// Returning `None` from `respond` drops the request without a reply.
    /// Messages that are not envelopes are ignored.
    pub fn spawn_worker<F>(mut endpoint: WorkerEndpoint, respond: F) -> JoinHandle<()>
    where
        F: Fn(Value) -> Option<Value> + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(bytes) = endpoint.recv().await {
                let Ok(request) = Envelope::from_slice(&bytes) else {
                    tracing::debug!("Worker ignoring malformed request");
                    continue;
                };
                let Some(msg) = respond(request.msg.clone()) else {
                    continue;
                };
                if endpoint.reply(reply_to(&request, msg)).is_err() {
                    break;
                }
            }
        })
    }

    /// Worker that answers every string request with the reversed string.
    pub struct ReversingWorker;

    impl ReversingWorker {
        /// Start answering on `endpoint`.
        pub fn spawn(endpoint: WorkerEndpoint) -> JoinHandle<()> {
            spawn_worker(endpoint, |msg| {
                msg.as_str().map(|text| Value::String(reverse_text(text)))
            })
        }
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, RecordingTransport, test_clock};
pub use workers::{ReversingWorker, reverse_text, spawn_worker};
