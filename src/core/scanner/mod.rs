// src/core/scanner/mod.rs

// One module per pseudo-OSI layer, plus the orchestrator that drives them.
pub mod application;
pub mod network;
pub mod physical_link;
pub mod presentation;
pub mod session;
pub mod transport;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::core::models::{
    AggregateResult, ApplicationLayer, Layer, LayerReport, NetworkLayer, PhysicalLinkLayer,
    PresentationLayer, SessionLayer, TransportLayer,
};
use crate::core::target::Target;

pub use self::application::ApplicationProbe;
pub use self::network::NetworkProbe;
pub use self::physical_link::PhysicalLinkProbe;
pub use self::presentation::PresentationProbe;
pub use self::session::SessionProbe;
pub use self::transport::TransportProbe;

/// A single layer probe. `analyze` must absorb every network fault and
/// report it through the returned record's `error` field.
pub trait Probe: Send + Sync + 'static {
    type Output: LayerReport + Send + 'static;

    fn layer(&self) -> Layer;

    fn analyze(&self, target: &Target) -> impl Future<Output = Self::Output> + Send;
}

/// Upper bound on redirect hops any probe follows.
pub(crate) const MAX_REDIRECTS: usize = 10;

/// Builds the HTTP client the probes share their settings through.
pub(crate) fn build_client(
    settings: &Settings,
    limit: Duration,
    redirect: reqwest::redirect::Policy,
) -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .user_agent(settings.user_agent.as_str())
        .timeout(limit)
        .redirect(redirect)
        .build()
        .map_err(|e| {
            error!(error = %e, "Failed to build HTTP client.");
            format!("Failed to build HTTP client: {}", e)
        })
}

/// Faults in the orchestration itself. Network conditions never end up here.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("{layer} probe panicked: {reason}")]
    ProbePanicked { layer: Layer, reason: String },
    #[error("{layer} probe was cancelled")]
    ProbeCancelled { layer: Layer },
}

/// Aborts the wrapped task when dropped, so a caller that goes away takes its
/// in-flight probes with it.
struct ProbeTask<T>(JoinHandle<T>);

impl<T> Drop for ProbeTask<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs one probe on its own task, bounded by the shared deadline.
async fn run_probe<P: Probe>(
    probe: Arc<P>,
    target: Arc<Target>,
    deadline: Instant,
) -> Result<P::Output, OrchestrationError> {
    let layer = probe.layer();
    let worker = Arc::clone(&probe);
    let mut task = ProbeTask(tokio::spawn(async move { worker.analyze(&target).await }));

    match timeout_at(deadline, &mut task.0).await {
        Ok(Ok(output)) => {
            debug!(%layer, degraded = output.error().is_some(), "Probe finished.");
            Ok(output)
        }
        Ok(Err(join_error)) if join_error.is_panic() => {
            error!(%layer, error = %join_error, "Probe task panicked!");
            Err(OrchestrationError::ProbePanicked { layer, reason: join_error.to_string() })
        }
        Ok(Err(_)) => Err(OrchestrationError::ProbeCancelled { layer }),
        Err(_) => {
            warn!(%layer, "Probe missed the analysis deadline, reporting it as degraded.");
            Ok(P::Output::degraded(format!("{} probe did not finish before the analysis deadline", layer)))
        }
    }
}

/// Drives all six probes against one target and merges their records.
///
/// Probes are statically typed; the defaults are the real network probes and
/// tests swap in their own implementations.
pub struct Orchestrator<
    A = ApplicationProbe,
    P = PresentationProbe,
    S = SessionProbe,
    T = TransportProbe,
    N = NetworkProbe,
    L = PhysicalLinkProbe,
> {
    application: Arc<A>,
    presentation: Arc<P>,
    session: Arc<S>,
    transport: Arc<T>,
    network: Arc<N>,
    physical_link: Arc<L>,
    deadline: Duration,
}

impl Orchestrator {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            application: Arc::new(ApplicationProbe::new(Arc::clone(&settings))),
            presentation: Arc::new(PresentationProbe::new(Arc::clone(&settings))),
            session: Arc::new(SessionProbe::new(Arc::clone(&settings))),
            transport: Arc::new(TransportProbe::new(Arc::clone(&settings))),
            network: Arc::new(NetworkProbe::new(Arc::clone(&settings))),
            physical_link: Arc::new(PhysicalLinkProbe),
            deadline: settings.analysis_deadline,
        }
    }
}

impl<A, P, S, T, N, L> Orchestrator<A, P, S, T, N, L>
where
    A: Probe<Output = ApplicationLayer>,
    P: Probe<Output = PresentationLayer>,
    S: Probe<Output = SessionLayer>,
    T: Probe<Output = TransportLayer>,
    N: Probe<Output = NetworkLayer>,
    L: Probe<Output = PhysicalLinkLayer>,
{
    pub fn with_probes(
        application: A,
        presentation: P,
        session: S,
        transport: T,
        network: N,
        physical_link: L,
        deadline: Duration,
    ) -> Self {
        Self {
            application: Arc::new(application),
            presentation: Arc::new(presentation),
            session: Arc::new(session),
            transport: Arc::new(transport),
            network: Arc::new(network),
            physical_link: Arc::new(physical_link),
            deadline,
        }
    }

    /// Executes every probe concurrently and joins them into one aggregate.
    ///
    /// Dropping the returned future aborts all probe tasks still running.
    pub async fn run(&self, target: &Target) -> Result<AggregateResult, OrchestrationError> {
        info!(host = target.hostname(), "Starting full layer analysis.");
        let started = Instant::now();
        let deadline = started + self.deadline;
        let target = Arc::new(target.clone());

        let (layer7, layer6, layer5, layer4, layer3, layer1_2) = tokio::try_join!(
            run_probe(Arc::clone(&self.application), Arc::clone(&target), deadline),
            run_probe(Arc::clone(&self.presentation), Arc::clone(&target), deadline),
            run_probe(Arc::clone(&self.session), Arc::clone(&target), deadline),
            run_probe(Arc::clone(&self.transport), Arc::clone(&target), deadline),
            run_probe(Arc::clone(&self.network), Arc::clone(&target), deadline),
            run_probe(Arc::clone(&self.physical_link), Arc::clone(&target), deadline)
        )?;

        let aggregate = AggregateResult {
            layer7,
            layer6,
            layer5,
            layer4,
            layer3,
            layer1_2,
            timestamp: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
        };

        info!(
            elapsed_ms = %started.elapsed().as_millis(),
            degraded = ?aggregate.degraded_layers(),
            "All probes joined."
        );
        Ok(aggregate)
    }
}
