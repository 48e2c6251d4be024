//! Drives one scan: a worker per layer, a finite origin phase, a grace
//! period, then an orderly stop.

use std::{
    collections::BTreeMap,
    future::Future,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::FutureExt;
use serde::Serialize;
use strum_macros::Display;
use sweep_plugin::Session;
use thiserror::Error;
use tokio::{sync::watch, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::{EngineConfig, LayerKind},
    layer::{Layer, LayerError, Progress, panic_message},
    logger::{LayerTally, PipelineMetrics},
    plugin::PluginManager,
};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Layer(#[from] LayerError),

    #[error("worker for layer `{layer}` panicked: {message}")]
    WorkerPanicked { layer: String, message: String },

    #[error("worker for layer `{layer}` was lost: {message}")]
    WorkerLost { layer: String, message: String },

    #[error("a scan has already been run by this orchestrator")]
    AlreadyStarted,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// What a finished scan looked like.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub session: Session,
    pub layers: Vec<String>,
    pub duration: Duration,
    pub tallies: Vec<(String, LayerTally)>,
}

type WorkerOutcome = (String, Result<(), OrchestratorError>);

pub struct Orchestrator {
    layers: BTreeMap<String, Arc<dyn Layer>>,
    plugins: Arc<PluginManager>,
    engine: EngineConfig,
    metrics: PipelineMetrics,
    state: watch::Sender<OrchestratorState>,
    stop: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        layers: BTreeMap<String, Arc<dyn Layer>>,
        plugins: Arc<PluginManager>,
        engine: EngineConfig,
        metrics: PipelineMetrics,
    ) -> Self {
        let (state, _) = watch::channel(OrchestratorState::Idle);
        Self {
            layers,
            plugins,
            engine,
            metrics,
            state,
            stop: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }

    /// Follow state transitions, e.g. to report progress.
    pub fn subscribe(&self) -> watch::Receiver<OrchestratorState> {
        self.state.subscribe()
    }

    /// Stop early: skips whatever is left of the origin phase and the grace
    /// period. Safe to call from another task while `scan` runs.
    pub fn shutdown(&self) {
        if !self.stop.is_cancelled() {
            info!("stop requested");
            self.stop.cancel();
        }
        for layer in self.layers.values() {
            layer.shutdown();
        }
    }

    fn transition(&self, next: OrchestratorState) {
        let previous = self.state.send_replace(next);
        debug!("orchestrator {} -> {}", previous, next);
    }

    /// Run the pipeline once.
    ///
    /// With origin layers present this returns after every origin layer has
    /// made its single pass and the grace period has elapsed. Without origin
    /// layers it runs until [`Orchestrator::shutdown`] is called. A layer
    /// worker that fails or panics at any point ends the scan with an error.
    pub async fn scan(&self) -> Result<ScanReport, OrchestratorError> {
        if self.state() != OrchestratorState::Idle {
            return Err(OrchestratorError::AlreadyStarted);
        }
        let session = Session::new();
        let started = Instant::now();
        info!("scan {} starting with {} layers", session.id(), self.layers.len());
        self.transition(OrchestratorState::Running);

        let mut origins: JoinSet<WorkerOutcome> = JoinSet::new();
        let mut downstream: JoinSet<WorkerOutcome> = JoinSet::new();
        for (name, layer) in &self.layers {
            let layer = Arc::clone(layer);
            let session = session.clone();
            match layer.kind() {
                LayerKind::Origin => {
                    origins.spawn(supervised(name.clone(), async move {
                        layer.execute(&session).await.map(|_| ())
                    }));
                }
                LayerKind::Intermediate | LayerKind::Terminal => {
                    let idle_delay = self.engine.idle_delay();
                    downstream.spawn(supervised(name.clone(), run_repeating(layer, session, idle_delay)));
                }
            }
        }

        let phase = if origins.is_empty() {
            info!("no origin layers; streaming until stopped");
            self.await_streaming(&mut downstream).await
        } else {
            self.await_origins(&mut origins, &mut downstream).await
        };
        if let Err(e) = phase {
            error!("scan {} aborted: {}", session.id(), e);
            origins.abort_all();
            let _ = self.stop_everything(&mut downstream).await;
            return Err(e);
        }

        self.transition(OrchestratorState::Draining);
        if !self.stop.is_cancelled() {
            let grace = self.engine.grace_period();
            debug!("draining for {:?}", grace);
            tokio::select! {
                _ = tokio::time::sleep(grace) => {}
                _ = self.stop.cancelled() => {}
            }
        }

        let drained = self.stop_everything(&mut downstream).await;
        let report = ScanReport {
            session,
            layers: self.layers.keys().cloned().collect(),
            duration: started.elapsed(),
            tallies: self.metrics.tallies(),
        };
        self.metrics.log_summary();
        drained?;
        info!("scan {} finished in {:?}", report.session.id(), report.duration);
        Ok(report)
    }

    async fn await_origins(
        &self,
        origins: &mut JoinSet<WorkerOutcome>,
        downstream: &mut JoinSet<WorkerOutcome>,
    ) -> Result<(), OrchestratorError> {
        loop {
            tokio::select! {
                next = origins.join_next() => match next {
                    None => return Ok(()),
                    Some(joined) => {
                        let layer = settle(joined)?;
                        info!("origin layer `{}` completed its pass", layer);
                    }
                },
                Some(joined) = downstream.join_next(), if !downstream.is_empty() => {
                    let layer = settle(joined)?;
                    debug!("layer `{}` stopped during the origin phase", layer);
                }
                _ = self.stop.cancelled() => {
                    warn!("stopping before {} origin layers finished", origins.len());
                    origins.abort_all();
                    return Ok(());
                }
            }
        }
    }

    async fn await_streaming(&self, downstream: &mut JoinSet<WorkerOutcome>) -> Result<(), OrchestratorError> {
        while let Some(joined) = downstream.join_next().await {
            let layer = settle(joined)?;
            debug!("layer `{}` stopped", layer);
        }
        Ok(())
    }

    /// Shut every layer down, give running workers the grace period to
    /// notice, then run the plugin shutdown hooks.
    async fn stop_everything(&self, downstream: &mut JoinSet<WorkerOutcome>) -> Result<(), OrchestratorError> {
        for layer in self.layers.values() {
            layer.shutdown();
        }

        let mut first_failure = None;
        let wait = async {
            while let Some(joined) = downstream.join_next().await {
                if let Err(e) = settle(joined) {
                    error!("{}", e);
                    first_failure.get_or_insert(e);
                }
            }
        };
        if tokio::time::timeout(self.engine.grace_period(), wait).await.is_err() {
            warn!("{} layer workers did not stop in time; abandoning them", downstream.len());
            downstream.abort_all();
        }

        let failed_hooks = self.plugins.shutdown_all().await;
        if failed_hooks > 0 {
            warn!("{} plugin shutdown hooks failed", failed_hooks);
        }
        self.transition(OrchestratorState::Stopped);
        first_failure.map_or(Ok(()), Err)
    }
}

/// Catch a worker panic and tag the outcome with its layer.
async fn supervised<F>(layer: String, work: F) -> WorkerOutcome
where
    F: Future<Output = Result<(), LayerError>> + Send,
{
    let outcome = match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result.map_err(OrchestratorError::from),
        Err(panic) => Err(OrchestratorError::WorkerPanicked {
            layer: layer.clone(),
            message: panic_message(panic.as_ref()),
        }),
    };
    (layer, outcome)
}

fn settle(joined: Result<WorkerOutcome, tokio::task::JoinError>) -> Result<String, OrchestratorError> {
    match joined {
        Ok((layer, Ok(()))) => Ok(layer),
        Ok((_, Err(e))) => Err(e),
        Err(e) => Err(OrchestratorError::WorkerLost {
            layer: "unknown".to_string(),
            message: e.to_string(),
        }),
    }
}

/// Repeat loop for intermediate and terminal layers. Sleeps `idle_delay`
/// after an empty poll; the sleep ends early on shutdown.
async fn run_repeating(layer: Arc<dyn Layer>, session: Session, idle_delay: Duration) -> Result<(), LayerError> {
    let stop = layer.stop_token();
    while !stop.is_cancelled() {
        match layer.execute(&session).await? {
            Progress::Worked => tokio::task::yield_now().await,
            Progress::Idle => {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(idle_delay) => {}
                }
            }
        }
    }
    debug!("layer `{}` worker exiting", layer.name());
    Ok(())
}
