//! Transport adapters: the two one-way channels a [`Port`](crate::port::Port)
//! sits on top of.
//!
//! The outbound side is a fire-and-forget [`Transport::emit`]. The inbound
//! side is an [`InboundStream`] of raw messages, consumed by the listener
//! spawned with [`spawn_listener`](crate::port::spawn_listener).
//!
//! [`ChannelTransport`] is the in-process reference implementation, backed by
//! unbounded `tokio` channels. The peer side of the pair is a
//! [`WorkerEndpoint`].
//!
//! # Example
//!
//! ```
//! use futures::StreamExt;
//! use porter_runtime::transport::{ChannelTransport, Transport};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (transport, mut inbound, mut worker) = ChannelTransport::pair();
//!
//! transport.emit(b"ping".to_vec()).unwrap();
//! let request = worker.recv().await.unwrap();
//! worker.reply(request).unwrap();
//!
//! assert_eq!(inbound.next().await.unwrap(), b"ping".to_vec());
//! # }
//! ```

use futures::Stream;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from putting a message on the outbound channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The receiving side has gone away
    #[error("Transport channel closed")]
    Closed,

    /// Any other delivery failure
    #[error("Transport I/O error: {0}")]
    Io(String),
}

/// Stream of raw inbound messages.
pub type InboundStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Outbound half of a channel pair.
///
/// `emit` must not block: it hands the bytes to the channel and returns.
/// Nothing is promised about delivery.
pub trait Transport: Send + Sync {
    /// Put one message on the outbound channel.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the channel refuses the message.
    fn emit(&self, bytes: Vec<u8>) -> Result<(), TransportError>;
}

/// In-process transport over unbounded `tokio` channels.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelTransport {
    /// Create a connected transport, its inbound stream, and the peer.
    #[must_use]
    pub fn pair() -> (Self, InboundStream, WorkerEndpoint) {
        let (outbound, requests) = mpsc::unbounded_channel();
        let (replies, mut inbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let inbound: InboundStream = Box::pin(async_stream::stream! {
            while let Some(message) = inbound_rx.recv().await {
                yield message;
            }
        });

        (Self { outbound }, inbound, WorkerEndpoint { requests, replies })
    }
}

impl Transport for ChannelTransport {
    fn emit(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.outbound.send(bytes).map_err(|_| TransportError::Closed)
    }
}

/// The peer side of a [`ChannelTransport`]: reads requests, writes replies.
#[derive(Debug)]
pub struct WorkerEndpoint {
    requests: mpsc::UnboundedReceiver<Vec<u8>>,
    replies: mpsc::UnboundedSender<Vec<u8>>,
}

impl WorkerEndpoint {
    /// Next outbound request, or `None` once the transport is dropped.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.requests.recv().await
    }

    /// Send a reply to the inbound stream.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the inbound stream was dropped.
    pub fn reply(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.replies.send(bytes).map_err(|_| TransportError::Closed)
    }

    /// A detached handle that can reply from another task.
    #[must_use]
    pub fn replier(&self) -> Replier {
        Replier {
            replies: self.replies.clone(),
        }
    }
}

/// Cloneable reply handle split off a [`WorkerEndpoint`].
#[derive(Debug, Clone)]
pub struct Replier {
    replies: mpsc::UnboundedSender<Vec<u8>>,
}

impl Replier {
    /// Send a reply to the inbound stream.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the inbound stream was dropped.
    pub fn reply(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.replies.send(bytes).map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_emit_reaches_worker_in_order() {
        let (transport, _inbound, mut worker) = ChannelTransport::pair();
        for n in 0..3u8 {
            transport.emit(vec![n]).unwrap();
        }
        for n in 0..3u8 {
            assert_eq!(worker.recv().await.unwrap(), vec![n]);
        }
    }

    #[tokio::test]
    async fn test_replies_arrive_on_inbound() {
        let (_transport, mut inbound, worker) = ChannelTransport::pair();
        let replier = worker.replier();

        worker.reply(b"first".to_vec()).unwrap();
        replier.reply(b"second".to_vec()).unwrap();

        assert_eq!(inbound.next().await.unwrap(), b"first".to_vec());
        assert_eq!(inbound.next().await.unwrap(), b"second".to_vec());
    }

    #[tokio::test]
    async fn test_emit_after_worker_dropped_is_closed() {
        let (transport, _inbound, worker) = ChannelTransport::pair();
        drop(worker);
        assert_eq!(transport.emit(b"lost".to_vec()), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_inbound_ends_when_worker_dropped() {
        let (_transport, mut inbound, worker) = ChannelTransport::pair();
        drop(worker);
        assert!(inbound.next().await.is_none());
    }
}
