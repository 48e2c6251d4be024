use async_trait::async_trait;
use sweep_plugin::Envelope;
use tokio::sync::{
    Mutex,
    mpsc::{UnboundedReceiver, UnboundedSender, error::TryRecvError, unbounded_channel},
};

use super::{Dequeue, Fifo, FifoError, Queue};
use crate::config::BackendType;

/// Unbounded in-process fifo. Lives as long as the process.
///
/// The sender half is owned alongside the receiver, so the channel never
/// disconnects while the fifo exists.
#[derive(Debug)]
pub struct LocalFifo {
    name: String,
    tx: UnboundedSender<Envelope>,
    rx: Mutex<UnboundedReceiver<Envelope>>,
}

impl LocalFifo {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            name: name.into(),
            tx,
            rx: Mutex::new(rx),
        }
    }

    fn closed(&self) -> FifoError {
        FifoError::Closed {
            name: self.name.clone(),
        }
    }
}

impl Fifo for LocalFifo {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> BackendType {
        BackendType::Local
    }
}

#[async_trait]
impl Queue for LocalFifo {
    async fn add(&self, envelope: Envelope) -> Result<(), FifoError> {
        self.tx.send(envelope).map_err(|_| self.closed())
    }
}

#[async_trait]
impl Dequeue for LocalFifo {
    async fn poll(&self) -> Result<Option<Envelope>, FifoError> {
        match self.rx.lock().await.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(self.closed()),
        }
    }

    async fn take(&self) -> Result<Option<Envelope>, FifoError> {
        Ok(self.rx.lock().await.recv().await)
    }
}
