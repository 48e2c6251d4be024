//! JetStream-backed fifo.
//!
//! Every fifo maps to one subject (`cloudsweep.fifo.<name>`) captured by one
//! stream. Readers share a durable pull consumer, so each envelope reaches
//! exactly one reader across all processes attached to the same group, and
//! publishers wait for the broker ack before `add` returns.
//!
//! Delivery is at least once: [`Dequeue::fetch`] leaves the message unacked
//! until the reader settles it, so a reader that dies mid-envelope gets it
//! redelivered once the consumer's ack wait expires.

use async_nats::jetstream::{
    self, AckKind,
    consumer::{AckPolicy, PullConsumer, pull},
};
use async_trait::async_trait;
use futures::StreamExt;
use std::{fmt, time::Duration};
use sweep_plugin::Envelope;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{Delivery, Dequeue, Fifo, FifoError, Queue, Receipt};
use crate::config::{BackendType, FifoConfig};

const SUBJECT_PREFIX: &str = "cloudsweep.fifo";
const TAKE_BACKOFF: Duration = Duration::from_millis(250);

/// Connection parameters resolved from a fifo section, before any network I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsSettings {
    pub name: String,
    pub url: String,
    pub subject: String,
    pub stream: String,
    pub consumer_group: String,
}

impl NatsSettings {
    pub fn from_config(name: &str, config: &FifoConfig) -> Result<Self, FifoError> {
        let url = config
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| FifoError::MissingBrokerUrl {
                name: name.to_string(),
            })?;
        Ok(Self {
            name: name.to_string(),
            url,
            subject: format!("{SUBJECT_PREFIX}.{}", subject_token(name)),
            stream: config
                .stream
                .clone()
                .unwrap_or_else(|| format!("CLOUDSWEEP_{}", stream_token(name))),
            consumer_group: config
                .consumer_group
                .clone()
                .unwrap_or_else(|| format!("cloudsweep-{}", subject_token(name))),
        })
    }
}

/// Subject tokens cannot contain `.`, `*`, `>` or whitespace.
fn subject_token(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '.' | '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

/// Stream names are kept to upper-case alphanumerics and `_`.
fn stream_token(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

pub struct NatsFifo {
    settings: NatsSettings,
    jetstream: jetstream::Context,
    consumer: OnceCell<PullConsumer>,
}

impl fmt::Debug for NatsFifo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsFifo")
            .field("settings", &self.settings)
            .field("attached", &self.consumer.initialized())
            .finish()
    }
}

impl NatsFifo {
    /// Connect and make sure the backing stream exists.
    pub async fn connect(name: &str, config: &FifoConfig) -> Result<Self, FifoError> {
        let settings = NatsSettings::from_config(name, config)?;
        let client = async_nats::connect(settings.url.as_str())
            .await
            .map_err(|e| broker(name, e))?;
        let jetstream = jetstream::new(client);
        jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: settings.stream.clone(),
                subjects: vec![settings.subject.clone()],
                ..Default::default()
            })
            .await
            .map_err(|e| broker(name, e))?;
        info!(
            "fifo `{}` bound to stream {} on {} (subject {})",
            name, settings.stream, settings.url, settings.subject
        );
        Ok(Self {
            settings,
            jetstream,
            consumer: OnceCell::new(),
        })
    }

    async fn consumer(&self) -> Result<&PullConsumer, FifoError> {
        self.consumer
            .get_or_try_init(|| async {
                let stream = self
                    .jetstream
                    .get_stream(&self.settings.stream)
                    .await
                    .map_err(|e| broker(&self.settings.name, e))?;
                let consumer: PullConsumer = stream
                    .get_or_create_consumer(
                        &self.settings.consumer_group,
                        pull::Config {
                            durable_name: Some(self.settings.consumer_group.clone()),
                            ack_policy: AckPolicy::Explicit,
                            filter_subject: self.settings.subject.clone(),
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(|e| broker(&self.settings.name, e))?;
                debug!(
                    "fifo `{}` reading as consumer group {}",
                    self.settings.name, self.settings.consumer_group
                );
                Ok(consumer)
            })
            .await
    }
}

fn broker(name: &str, err: impl fmt::Display) -> FifoError {
    FifoError::Broker {
        name: name.to_string(),
        message: err.to_string(),
    }
}

impl Fifo for NatsFifo {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn backend(&self) -> BackendType {
        BackendType::Distributed
    }
}

#[async_trait]
impl Queue for NatsFifo {
    async fn add(&self, envelope: Envelope) -> Result<(), FifoError> {
        let payload = envelope.to_wire().map_err(|e| FifoError::Codec {
            name: self.settings.name.clone(),
            message: e.to_string(),
        })?;
        self.jetstream
            .publish(self.settings.subject.clone(), payload.into())
            .await
            .map_err(|e| broker(&self.settings.name, e))?
            .await
            .map_err(|e| broker(&self.settings.name, e))?;
        Ok(())
    }
}

/// Acks one JetStream message once its envelope has been handled.
struct NatsReceipt {
    fifo: String,
    message: jetstream::Message,
}

#[async_trait]
impl Receipt for NatsReceipt {
    async fn ack(self: Box<Self>) -> Result<(), FifoError> {
        self.message.ack().await.map_err(|e| broker(&self.fifo, e))
    }
}

#[async_trait]
impl Dequeue for NatsFifo {
    async fn poll(&self) -> Result<Option<Envelope>, FifoError> {
        match self.fetch().await? {
            Some(delivery) => delivery.ack().await.map(Some),
            None => Ok(None),
        }
    }

    async fn fetch(&self) -> Result<Option<Delivery>, FifoError> {
        let consumer = self.consumer().await?;
        let mut batch = consumer
            .fetch()
            .max_messages(1)
            .messages()
            .await
            .map_err(|e| broker(&self.settings.name, e))?;

        let message = match batch.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(broker(&self.settings.name, e)),
            None => return Ok(None),
        };
        match Envelope::from_wire(&message.payload) {
            Ok(envelope) => Ok(Some(Delivery::pending(
                envelope,
                NatsReceipt {
                    fifo: self.settings.name.clone(),
                    message,
                },
            ))),
            Err(e) => {
                // Terminated, not left pending: it would never decode on redelivery either.
                warn!("fifo `{}` dropped an undecodable message", self.settings.name);
                message
                    .ack_with(AckKind::Term)
                    .await
                    .map_err(|e| broker(&self.settings.name, e))?;
                Err(FifoError::Codec {
                    name: self.settings.name.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    async fn take(&self) -> Result<Option<Envelope>, FifoError> {
        loop {
            if let Some(envelope) = self.poll().await? {
                return Ok(Some(envelope));
            }
            tokio::time::sleep(TAKE_BACKOFF).await;
        }
    }

    async fn attach(&self) -> Result<(), FifoError> {
        self.consumer().await.map(|_| ())
    }
}
