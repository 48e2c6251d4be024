//! Named queues between layers.
//!
//! A fifo is written through [`Queue`] and read through [`Dequeue`]. Two
//! backends exist: [`local::LocalFifo`], an unbounded in-process channel, and
//! [`nats::NatsFifo`], a JetStream stream for pipelines split across processes.
//! [`registry::FifoRegistry`] hands out one shared instance per name.

pub mod local;
pub mod nats;
pub mod registry;
#[cfg(test)]
pub(crate) mod scripted;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use sweep_plugin::{EmitError, Envelope};
use thiserror::Error;

use crate::config::BackendType;

pub use local::LocalFifo;
pub use nats::NatsFifo;
pub use registry::FifoRegistry;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FifoError {
    #[error("fifo `{name}` is distributed but has no broker `url` configured")]
    MissingBrokerUrl { name: String },

    #[error("fifo `{name}` is disabled")]
    Disabled { name: String },

    #[error("fifo `{name}`: broker error: {message}")]
    Broker { name: String, message: String },

    #[error("fifo `{name}`: could not decode envelope: {message}")]
    Codec { name: String, message: String },

    #[error("fifo `{name}` is closed")]
    Closed { name: String },
}

impl FifoError {
    pub fn name(&self) -> &str {
        match self {
            FifoError::MissingBrokerUrl { name }
            | FifoError::Disabled { name }
            | FifoError::Broker { name, .. }
            | FifoError::Codec { name, .. }
            | FifoError::Closed { name } => name,
        }
    }

    /// Broker hiccups and undecodable messages do not stop a reader; the
    /// layer logs them and tries again on the next poll.
    pub fn is_transient(&self) -> bool {
        matches!(self, FifoError::Broker { .. } | FifoError::Codec { .. })
    }
}

impl From<FifoError> for EmitError {
    fn from(err: FifoError) -> Self {
        EmitError::Rejected {
            queue: err.name().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Common identity of both ends of a fifo.
pub trait Fifo: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn backend(&self) -> BackendType;
}

/// Producer side. `add` never waits for a consumer.
#[async_trait]
pub trait Queue: Fifo {
    async fn add(&self, envelope: Envelope) -> Result<(), FifoError>;
}

/// Settles one fetched envelope with the backend that handed it out.
#[async_trait]
pub trait Receipt: Send + Sync {
    async fn ack(self: Box<Self>) -> Result<(), FifoError>;
}

/// An envelope fetched from a fifo but not yet settled.
///
/// Backends with redelivery hand out a [`Receipt`]; dropping the delivery
/// without [`Delivery::ack`] leaves the message to be delivered again.
pub struct Delivery {
    envelope: Envelope,
    receipt: Option<Box<dyn Receipt>>,
}

impl Delivery {
    /// Nothing left to settle, as for in-process fifos.
    pub fn settled(envelope: Envelope) -> Self {
        Self {
            envelope,
            receipt: None,
        }
    }

    pub fn pending(envelope: Envelope, receipt: impl Receipt + 'static) -> Self {
        Self {
            envelope,
            receipt: Some(Box::new(receipt)),
        }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn is_pending(&self) -> bool {
        self.receipt.is_some()
    }

    pub async fn ack(self) -> Result<Envelope, FifoError> {
        if let Some(receipt) = self.receipt {
            receipt.ack().await?;
        }
        Ok(self.envelope)
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("envelope", &self.envelope)
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Consumer side.
#[async_trait]
pub trait Dequeue: Fifo {
    /// Non-blocking: `Ok(None)` when nothing is waiting. The envelope is
    /// settled before it is returned.
    async fn poll(&self) -> Result<Option<Envelope>, FifoError>;

    /// Non-blocking like [`Dequeue::poll`], but settling is left to the
    /// caller, who acks once the envelope has been fully handled.
    async fn fetch(&self) -> Result<Option<Delivery>, FifoError> {
        Ok(self.poll().await?.map(Delivery::settled))
    }

    /// Waits until an envelope is available. `Ok(None)` once the fifo can no
    /// longer produce anything.
    async fn take(&self) -> Result<Option<Envelope>, FifoError>;

    /// Everything currently waiting, in order.
    async fn drain(&self) -> Result<Vec<Envelope>, FifoError> {
        let mut out = Vec::new();
        while let Some(envelope) = self.poll().await? {
            out.push(envelope);
        }
        Ok(out)
    }

    /// Reader-side setup, run once when a layer binds to this fifo.
    async fn attach(&self) -> Result<(), FifoError> {
        Ok(())
    }
}

/// A concrete backend: both ends at once, viewable as either.
pub trait FifoBackend: Queue + Dequeue {
    fn as_queue(self: Arc<Self>) -> Arc<dyn Queue>;
    fn as_dequeue(self: Arc<Self>) -> Arc<dyn Dequeue>;
}

impl<T: Queue + Dequeue + 'static> FifoBackend for T {
    fn as_queue(self: Arc<Self>) -> Arc<dyn Queue> {
        self
    }

    fn as_dequeue(self: Arc<Self>) -> Arc<dyn Dequeue> {
        self
    }
}

/// Address of the instance behind a fifo handle, for identity checks.
pub fn instance_addr<T: ?Sized>(fifo: &Arc<T>) -> *const () {
    Arc::as_ptr(fifo) as *const ()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ProbeLog;
    use super::scripted::AckLog;
    use serde_json::json;
    use sweep_plugin::Session;

    #[tokio::test]
    async fn test_local_fetch_is_already_settled() {
        let fifo = LocalFifo::new("q");
        fifo.add(Envelope::new(&Session::new(), "k", json!(1))).await.unwrap();

        let delivery = fifo.fetch().await.unwrap().unwrap();
        assert!(!delivery.is_pending());
        assert_eq!(delivery.ack().await.unwrap().kind(), "k");
        assert!(fifo.poll().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_delivery_acks_through_its_receipt() {
        let acks = AckLog::watching(ProbeLog::default());
        let envelope = Envelope::new(&Session::with_id("s"), "k", json!({"id": 7}));

        let delivery = acks.deliver(envelope.clone());
        assert!(delivery.is_pending());
        assert!(acks.seen_at_ack().is_empty());
        assert_eq!(delivery.ack().await.unwrap(), envelope);
        assert_eq!(acks.seen_at_ack(), vec![0]);
    }
}
