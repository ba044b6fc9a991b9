// src/app.rs

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{error, info, instrument};

use crate::config::Settings;
use crate::core::journey;
use crate::core::knowledge_base;
use crate::core::models::AnalysisResult;
use crate::core::scanner::{OrchestrationError, Orchestrator};
use crate::core::scoring;
use crate::core::target::{InvalidTargetError, Target};

/// Request-level failures. Anything that goes wrong inside a probe is
/// reported in the layer record instead.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error(transparent)]
    InvalidTarget(#[from] InvalidTargetError),
    /// The request body was not `{"url": string}` JSON.
    #[error("{0}")]
    MalformedRequest(String),
    #[error("analysis failed: {0}")]
    Internal(#[from] OrchestrationError),
}

/// Shared by every request handler. Holds nothing mutable.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let settings = Arc::new(settings);
        Self {
            orchestrator: Arc::new(Orchestrator::new(Arc::clone(&settings))),
            settings,
        }
    }

    /// Normalize, probe, score, enrich, narrate.
    ///
    /// Dropping the returned future cancels every probe still in flight.
    #[instrument(skip(self))]
    pub async fn analyze_target(&self, raw: &str) -> Result<AnalysisResult, AnalyzeError> {
        let started = Instant::now();
        let target = Target::parse(raw)?;
        info!(
            input = target.original_input(),
            host = target.hostname(),
            scheme = target.scheme(),
            port = ?target.port(),
            "Target normalized."
        );

        let mut aggregate = self.orchestrator.run(&target).await.map_err(|e| {
            error!(error = %e, "Orchestration failed.");
            e
        })?;

        let ai_analysis = scoring::evaluate(&aggregate);
        knowledge_base::enrich(&mut aggregate);
        let journey = journey::generate(&aggregate);

        info!(
            score = ai_analysis.score,
            risk = %ai_analysis.risk_level,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Analysis completed."
        );
        Ok(AnalysisResult { aggregate, ai_analysis, journey })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn empty_input_is_rejected_before_probing() {
        let state = AppState::new(Settings::default());
        let err = state.analyze_target("   ").await.unwrap_err();
        assert!(matches!(err, AnalyzeError::InvalidTarget(InvalidTargetError::Empty)));
        assert_eq!(err.to_string(), "URL is required");
    }

    #[tokio::test]
    async fn unreachable_target_still_yields_a_complete_report() {
        let settings = Settings { analysis_deadline: Duration::from_secs(4), ..Settings::default() };
        let state = AppState::new(settings);

        let result = state.analyze_target("no-such-host.invalid").await.unwrap();

        assert!(!result.aggregate.degraded_layers().is_empty());
        assert!(result.aggregate.layer7.error.is_some());
        assert!(!result.aggregate.layer6.tls.valid);
        assert!(result.ai_analysis.score <= 100);
        assert_eq!(result.journey.len(), 5);

        let json = serde_json::to_value(&result).unwrap();
        for key in ["layer7", "layer6", "layer5", "layer4", "layer3", "layer1_2", "ai_analysis", "journey", "timestamp"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }
}
