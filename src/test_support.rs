//! Scriptable plugins for pipeline tests.
//!
//! Shared by the unit tests and by the integration tests under `tests/`, so it
//! only depends on the plugin SDK.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{Value, json};
use sweep_plugin::{
    Capability, Configure, Emit, Envelope, IntermediatePlugin, InterestPattern, NoConfig,
    OriginPlugin, Plugin, PluginError, PluginLogger, PolicyOutputPlugin, Session, TerminalPlugin,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Succeed,
    Fail,
    Panic,
    Hang,
}

/// What a probe saw, readable after the probe has been handed to a registry.
#[derive(Clone, Default)]
pub struct ProbeLog {
    pub accepted: Arc<Mutex<Vec<Envelope>>>,
    pub reports: Arc<Mutex<Vec<Value>>>,
    pub discovers: Arc<AtomicUsize>,
    pub inits: Arc<AtomicUsize>,
    pub shutdowns: Arc<AtomicUsize>,
}

impl ProbeLog {
    pub fn accepted(&self) -> Vec<Envelope> {
        self.accepted.lock().unwrap().clone()
    }

    pub fn reports(&self) -> Vec<Value> {
        self.reports.lock().unwrap().clone()
    }

    pub fn discovers(&self) -> usize {
        self.discovers.load(Ordering::SeqCst)
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

pub struct Probe {
    id: String,
    capabilities: Vec<Capability>,
    behaviour: Behaviour,
    refuse_init: bool,
    emit_count: usize,
    emit_kind: String,
    accepts: Vec<InterestPattern>,
    log: ProbeLog,
}

impl Probe {
    pub fn new(id: &str, capabilities: &[Capability]) -> Self {
        Self {
            id: id.to_string(),
            capabilities: capabilities.to_vec(),
            behaviour: Behaviour::Succeed,
            refuse_init: false,
            emit_count: 1,
            emit_kind: "test.resource".to_string(),
            accepts: vec![InterestPattern::any()],
            log: ProbeLog::default(),
        }
    }

    pub fn origin(id: &str) -> Self {
        Self::new(id, &[Capability::Origin])
    }

    pub fn intermediate(id: &str) -> Self {
        Self::new(id, &[Capability::Intermediate])
    }

    pub fn terminal(id: &str) -> Self {
        Self::new(id, &[Capability::Terminal])
    }

    pub fn policy_output(id: &str) -> Self {
        Self::new(id, &[Capability::PolicyOutput])
    }

    pub fn behaving(mut self, behaviour: Behaviour) -> Self {
        self.behaviour = behaviour;
        self
    }

    pub fn refusing_init(mut self) -> Self {
        self.refuse_init = true;
        self
    }

    pub fn emitting(mut self, count: usize, kind: &str) -> Self {
        self.emit_count = count;
        self.emit_kind = kind.to_string();
        self
    }

    pub fn accepting(mut self, globs: &[&str]) -> Self {
        self.accepts = InterestPattern::parse_all(globs).unwrap();
        self
    }

    pub fn log(&self) -> ProbeLog {
        self.log.clone()
    }

    fn plays(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    async fn misbehave(&self) -> Result<(), PluginError> {
        match self.behaviour {
            Behaviour::Succeed => Ok(()),
            Behaviour::Fail => Err(PluginError::Other(format!("{} failed on purpose", self.id))),
            Behaviour::Panic => panic!("{} panicked on purpose", self.id),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Plugin for Probe {
    fn id(&self) -> &str {
        &self.id
    }

    async fn shutdown(&self) -> Result<(), PluginError> {
        self.log.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_origin(self: Arc<Self>) -> Option<Arc<dyn OriginPlugin>> {
        if self.plays(Capability::Origin) { Some(self) } else { None }
    }

    fn as_intermediate(self: Arc<Self>) -> Option<Arc<dyn IntermediatePlugin>> {
        if self.plays(Capability::Intermediate) { Some(self) } else { None }
    }

    fn as_terminal(self: Arc<Self>) -> Option<Arc<dyn TerminalPlugin>> {
        if self.plays(Capability::Terminal) { Some(self) } else { None }
    }

    fn as_policy_output(self: Arc<Self>) -> Option<Arc<dyn PolicyOutputPlugin>> {
        if self.plays(Capability::PolicyOutput) { Some(self) } else { None }
    }
}

#[async_trait]
impl Configure for Probe {
    type Config = NoConfig;

    async fn init(&mut self, _config: NoConfig, _logger: PluginLogger) -> Result<(), PluginError> {
        self.log.inits.fetch_add(1, Ordering::SeqCst);
        if self.refuse_init {
            return Err(PluginError::Other(format!("{} refused to start", self.id)));
        }
        Ok(())
    }
}

#[async_trait]
impl OriginPlugin for Probe {
    async fn discover(&self, session: &Session, emit: &dyn Emit) -> Result<(), PluginError> {
        self.log.discovers.fetch_add(1, Ordering::SeqCst);
        self.misbehave().await?;
        for n in 0..self.emit_count {
            emit.emit(Envelope::new(session, self.emit_kind.as_str(), json!({"n": n, "from": self.id})))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl IntermediatePlugin for Probe {
    fn accepts(&self) -> Vec<InterestPattern> {
        self.accepts.clone()
    }

    async fn accept(&self, envelope: &Envelope, emit: &dyn Emit) -> Result<(), PluginError> {
        self.log.accepted.lock().unwrap().push(envelope.clone());
        self.misbehave().await?;
        emit.emit(envelope.derive(envelope.kind(), envelope.payload().clone()))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TerminalPlugin for Probe {
    async fn accept(&self, envelope: &Envelope) -> Result<(), PluginError> {
        self.log.accepted.lock().unwrap().push(envelope.clone());
        self.misbehave().await
    }
}

#[async_trait]
impl PolicyOutputPlugin for Probe {
    async fn generate_report(&self, document: &Value) -> Result<(), PluginError> {
        self.log.reports.lock().unwrap().push(document.clone());
        self.misbehave().await
    }
}
