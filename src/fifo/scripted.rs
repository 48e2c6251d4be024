//! Reader that replays a fixed sequence of fetch outcomes.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use sweep_plugin::Envelope;

use super::{Delivery, Dequeue, Fifo, FifoError, Receipt};
use crate::{config::BackendType, test_support::ProbeLog};

pub(crate) type Step = Result<Option<Delivery>, FifoError>;

#[derive(Debug)]
pub(crate) struct ScriptedReader {
    name: String,
    steps: Mutex<VecDeque<Step>>,
}

impl ScriptedReader {
    pub(crate) fn new(name: &str, steps: Vec<Step>) -> Self {
        Self {
            name: name.to_string(),
            steps: Mutex::new(steps.into()),
        }
    }

    pub(crate) fn broker_error(name: &str) -> FifoError {
        FifoError::Broker {
            name: name.to_string(),
            message: "connection reset".to_string(),
        }
    }

    pub(crate) fn closed(name: &str) -> FifoError {
        FifoError::Closed { name: name.to_string() }
    }
}

impl Fifo for ScriptedReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> BackendType {
        BackendType::Distributed
    }
}

#[async_trait]
impl Dequeue for ScriptedReader {
    async fn poll(&self) -> Result<Option<Envelope>, FifoError> {
        match self.fetch().await? {
            Some(delivery) => delivery.ack().await.map(Some),
            None => Ok(None),
        }
    }

    async fn fetch(&self) -> Result<Option<Delivery>, FifoError> {
        self.steps.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }

    async fn take(&self) -> Result<Option<Envelope>, FifoError> {
        self.poll().await
    }
}

/// Records, at each ack, how many envelopes the watched plugin had accepted.
#[derive(Clone, Default)]
pub(crate) struct AckLog {
    watched: ProbeLog,
    seen_at_ack: Arc<Mutex<Vec<usize>>>,
}

impl AckLog {
    pub(crate) fn watching(watched: ProbeLog) -> Self {
        Self {
            watched,
            seen_at_ack: Arc::default(),
        }
    }

    pub(crate) fn deliver(&self, envelope: Envelope) -> Delivery {
        Delivery::pending(envelope, self.clone())
    }

    pub(crate) fn seen_at_ack(&self) -> Vec<usize> {
        self.seen_at_ack.lock().unwrap().clone()
    }
}

#[async_trait]
impl Receipt for AckLog {
    async fn ack(self: Box<Self>) -> Result<(), FifoError> {
        self.seen_at_ack.lock().unwrap().push(self.watched.accepted().len());
        Ok(())
    }
}
