//! Two-tier analysis router.
//!
//! The fast tier runs for every surviving message; the deep tier runs only
//! when the fast confidence clears the escalation threshold. Each tier walks
//! an explicit, ordered provider list: transient failures are retried with
//! backoff on the same provider, anything else moves straight to the next
//! provider. Neither tier ever fails the message: the fast tier degrades to
//! an unanalyzed result and the deep tier degrades to the fast result.

use super::{AnalysisProvider, AnalysisRequest, DeepTierGate};
use crate::config::AnalysisConfig;
use crate::models::{AnalysisResult, AnalysisTier, ProviderAnalysis};
use crate::services::remote::{RetryPolicy, run_blocking, with_retry};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::instrument;

/// Router tuning.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// Inclusive fast-confidence threshold for escalation.
    pub escalation_threshold: f32,
    /// Event types never escalated (compared case-insensitively).
    pub excluded_event_types: Vec<String>,
    /// Fast-tier retry budget per provider.
    pub fast_retry: RetryPolicy,
    /// Deep-tier retry budget per provider.
    pub deep_retry: RetryPolicy,
    /// Concurrent fast-tier passes.
    pub fast_concurrency: usize,
    /// Concurrent deep-tier passes.
    pub deep_concurrency: usize,
    /// Minimum interval between deep call starts.
    pub deep_min_interval: Duration,
}

impl RouterSettings {
    /// Builds settings from the analysis config section.
    #[must_use]
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            escalation_threshold: config.escalation_threshold,
            excluded_event_types: config
                .excluded_event_types
                .iter()
                .map(|t| t.trim().to_lowercase())
                .collect(),
            fast_retry: RetryPolicy {
                max_retries: config.fast_max_retries,
                base_backoff_ms: config.backoff_base_ms,
                max_backoff_ms: config.backoff_max_ms,
                timeout_ms: config.call_timeout_ms,
            },
            deep_retry: RetryPolicy {
                max_retries: config.deep_max_retries,
                base_backoff_ms: config.backoff_base_ms,
                max_backoff_ms: config.backoff_max_ms,
                timeout_ms: config.call_timeout_ms,
            },
            fast_concurrency: config.fast_concurrency.max(1),
            deep_concurrency: config.deep_concurrency.max(1),
            deep_min_interval: config.deep_min_interval(),
        }
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default())
    }
}

/// Confidence-gated two-tier analysis engine.
pub struct AnalysisRouter {
    fast: Vec<Arc<dyn AnalysisProvider>>,
    deep: Vec<Arc<dyn AnalysisProvider>>,
    settings: RouterSettings,
    fast_permits: Semaphore,
    deep_permits: Semaphore,
    gate: DeepTierGate,
}

impl AnalysisRouter {
    /// Creates a router over ordered fast and deep provider lists.
    #[must_use]
    pub fn new(
        fast: Vec<Arc<dyn AnalysisProvider>>,
        deep: Vec<Arc<dyn AnalysisProvider>>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            fast_permits: Semaphore::new(settings.fast_concurrency),
            deep_permits: Semaphore::new(settings.deep_concurrency),
            gate: DeepTierGate::new(settings.deep_min_interval),
            fast,
            deep,
            settings,
        }
    }

    /// Router settings.
    #[must_use]
    pub const fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    /// Returns true if at least one deep provider is configured.
    #[must_use]
    pub fn has_deep_tier(&self) -> bool {
        !self.deep.is_empty()
    }

    /// Runs the fast tier.
    ///
    /// Never fails: when every provider is exhausted the result is
    /// [`AnalysisResult::unanalyzed`].
    #[instrument(skip_all, fields(tier = "fast", providers = self.fast.len()))]
    pub async fn analyze_fast(&self, request: &AnalysisRequest) -> AnalysisResult {
        let _permit = self.fast_permits.acquire().await.ok();

        for provider in &self.fast {
            match self
                .call(provider, AnalysisTier::Fast, request, self.settings.fast_retry)
                .await
            {
                Ok(analysis) => {
                    return AnalysisResult::from_provider(
                        AnalysisTier::Fast,
                        provider.name(),
                        analysis,
                    );
                },
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, kind = e.kind(), "Fast provider failed, trying next");
                },
            }
        }

        tracing::warn!("All fast-tier providers failed; forwarding unanalyzed");
        AnalysisResult::unanalyzed(&request.text, "fast-analysis-failed")
    }

    /// Returns true if a fast result should be escalated to the deep tier.
    ///
    /// The threshold is inclusive. Unanalyzed results never escalate.
    #[must_use]
    pub fn should_escalate(&self, fast: &AnalysisResult) -> bool {
        fast.analyzed
            && fast.confidence >= self.settings.escalation_threshold
            && !self
                .settings
                .excluded_event_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&fast.event_type))
    }

    /// Runs the deep tier against a fast result.
    ///
    /// On success the deep result carries a confidence audit naming the fast
    /// value. When every deep provider fails, the fast result comes back
    /// unchanged apart from the `deep-analysis-failed` annotation.
    #[instrument(skip_all, fields(tier = "deep", fast_confidence = fast.confidence))]
    pub async fn analyze_deep(
        &self,
        fast: &AnalysisResult,
        request: &AnalysisRequest,
    ) -> AnalysisResult {
        metrics::counter!("analysis_escalations_total").increment(1);
        let _permit = self.deep_permits.acquire().await.ok();

        for provider in &self.deep {
            match self
                .call(provider, AnalysisTier::Deep, request, self.settings.deep_retry)
                .await
            {
                Ok(analysis) => {
                    let deep =
                        AnalysisResult::from_provider(AnalysisTier::Deep, provider.name(), analysis);
                    let reconciled = AnalysisResult::reconcile(fast, deep);
                    if let Some(audit) = &reconciled.audit {
                        tracing::info!(provider = provider.name(), confidence = %audit, "Deep analysis reconciled");
                    }
                    return reconciled;
                },
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, kind = e.kind(), "Deep provider failed, trying next");
                },
            }
        }

        tracing::warn!("Deep analysis attempted and failed; keeping fast result");
        fast.with_deep_failure()
    }

    /// One provider with retries. Deep calls pass the interval gate per attempt.
    async fn call(
        &self,
        provider: &Arc<dyn AnalysisProvider>,
        tier: AnalysisTier,
        request: &AnalysisRequest,
        policy: RetryPolicy,
    ) -> Result<ProviderAnalysis> {
        let operation = format!("analyze_{}", tier.as_str());
        let result = with_retry(policy, &operation, |_| {
            let provider = Arc::clone(provider);
            let request = request.clone();
            let operation = operation.clone();
            async move {
                if tier == AnalysisTier::Deep {
                    self.gate.acquire().await;
                }
                run_blocking(&operation, policy.timeout(), move || provider.analyze(&request))
                    .await
            }
        })
        .await;

        let status = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::counter!(
            "analysis_requests_total",
            "tier" => tier.as_str(),
            "provider" => provider.name().to_string(),
            "status" => status
        )
        .increment(1);

        result.map_err(|e| match e {
            Error::Timeout { .. } => Error::TransientProvider {
                provider: provider.name().to_string(),
                cause: e.to_string(),
            },
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DEEP_ANALYSIS_FAILED, TradeAction, UNANALYZED};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use test_case::test_case;

    /// Provider that replays scripted outcomes, repeating the last one.
    struct Scripted {
        name: String,
        outcomes: Mutex<VecDeque<Result<f32>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &str, outcomes: Vec<Result<f32>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn clone_outcome(outcome: &Result<f32>) -> Result<f32> {
        match outcome {
            Ok(c) => Ok(*c),
            Err(Error::TransientProvider { provider, cause }) => Err(Error::TransientProvider {
                provider: provider.clone(),
                cause: cause.clone(),
            }),
            Err(Error::MalformedAnalysis { provider, cause }) => Err(Error::MalformedAnalysis {
                provider: provider.clone(),
                cause: cause.clone(),
            }),
            Err(e) => Err(Error::PermanentProvider {
                provider: "scripted".to_string(),
                cause: e.to_string(),
            }),
        }
    }

    impl AnalysisProvider for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            unreachable!("analyze is overridden")
        }

        fn analyze(&self, _request: &AnalysisRequest) -> Result<ProviderAnalysis> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            let outcome = if outcomes.len() > 1 {
                outcomes.pop_front().unwrap()
            } else {
                clone_outcome(outcomes.front().unwrap())
            };
            drop(outcomes);
            outcome.map(|confidence| ProviderAnalysis {
                summary: "SOL listed".to_string(),
                event_type: "listing".to_string(),
                asset: "SOL".to_string(),
                action: TradeAction::Observe,
                confidence,
                risk_flags: vec![],
            })
        }
    }

    fn transient(name: &str) -> Error {
        Error::TransientProvider {
            provider: name.to_string(),
            cause: "503".to_string(),
        }
    }

    fn settings() -> RouterSettings {
        let mut settings = RouterSettings::default();
        settings.fast_retry.base_backoff_ms = 1;
        settings.fast_retry.max_backoff_ms = 2;
        settings.deep_retry.base_backoff_ms = 1;
        settings.deep_retry.max_backoff_ms = 2;
        settings.deep_min_interval = Duration::from_millis(1);
        settings
    }

    fn as_dyn(p: &Arc<Scripted>) -> Arc<dyn AnalysisProvider> {
        Arc::clone(p) as Arc<dyn AnalysisProvider>
    }

    #[tokio::test]
    async fn test_fast_retries_transient_then_succeeds() {
        let fast = Scripted::new("fast", vec![Err(transient("fast")), Ok(0.5)]);
        let router = AnalysisRouter::new(vec![as_dyn(&fast)], vec![], settings());

        let result = router.analyze_fast(&AnalysisRequest::new("text")).await;
        assert!(result.analyzed);
        assert_eq!(result.provider, "fast");
        assert_eq!(fast.calls(), 2);
    }

    #[tokio::test]
    async fn test_fast_exhaustion_degrades_to_unanalyzed() {
        let fast = Scripted::new("fast", vec![Err(transient("fast"))]);
        let router = AnalysisRouter::new(vec![as_dyn(&fast)], vec![], settings());

        let result = router.analyze_fast(&AnalysisRequest::new("raw text")).await;
        assert!(!result.analyzed);
        assert!(result.has_annotation(UNANALYZED));
        // One attempt plus the default two retries.
        assert_eq!(fast.calls(), 3);
    }

    #[tokio::test]
    async fn test_malformed_falls_through_without_retry() {
        let first = Scripted::new(
            "first",
            vec![Err(Error::MalformedAnalysis {
                provider: "first".to_string(),
                cause: "bad".to_string(),
            })],
        );
        let second = Scripted::new("second", vec![Ok(0.4)]);
        let router = AnalysisRouter::new(vec![as_dyn(&first), as_dyn(&second)], vec![], settings());

        let result = router.analyze_fast(&AnalysisRequest::new("text")).await;
        assert_eq!(result.provider, "second");
        assert_eq!(first.calls(), 1);
    }

    #[test_case(0.75, true ; "exactly at threshold escalates")]
    #[test_case(0.7499, false ; "just below does not")]
    #[test_case(0.95, true ; "above escalates")]
    fn test_escalation_boundary(confidence: f32, expected: bool) {
        let router = AnalysisRouter::new(vec![], vec![], settings());
        let mut fast = AnalysisResult::unanalyzed("t", "x");
        fast.analyzed = true;
        fast.event_type = "listing".to_string();
        fast.confidence = confidence;
        assert_eq!(router.should_escalate(&fast), expected);
    }

    #[test]
    fn test_excluded_event_type_not_escalated() {
        let mut s = settings();
        s.excluded_event_types = vec!["listing".to_string()];
        let router = AnalysisRouter::new(vec![], vec![], s);
        let mut fast = AnalysisResult::unanalyzed("t", "x");
        fast.analyzed = true;
        fast.event_type = "Listing".to_string();
        fast.confidence = 0.99;
        assert!(!router.should_escalate(&fast));
    }

    #[tokio::test]
    async fn test_deep_fallback_to_secondary() {
        let fast = Scripted::new("fast", vec![Ok(0.8)]);
        let primary = Scripted::new(
            "primary",
            vec![Err(Error::PermanentProvider {
                provider: "primary".to_string(),
                cause: "401".to_string(),
            })],
        );
        let secondary = Scripted::new("secondary", vec![Ok(0.6)]);
        let router = AnalysisRouter::new(
            vec![as_dyn(&fast)],
            vec![as_dyn(&primary), as_dyn(&secondary)],
            settings(),
        );

        let request = AnalysisRequest::new("text");
        let fast_result = router.analyze_fast(&request).await;
        let deep = router.analyze_deep(&fast_result, &request).await;

        assert_eq!(deep.provider, "secondary");
        assert_eq!(deep.tier, AnalysisTier::Deep);
        assert!((deep.confidence - 0.6).abs() < f32::EPSILON);
        assert_eq!(deep.audit.as_ref().unwrap().to_string(), "0.80 → 0.60");
    }

    #[tokio::test]
    async fn test_deep_total_failure_keeps_fast_result() {
        let fast = Scripted::new("fast", vec![Ok(0.9)]);
        let primary = Scripted::new("primary", vec![Err(transient("primary"))]);
        let secondary = Scripted::new("secondary", vec![Err(transient("secondary"))]);
        let router = AnalysisRouter::new(
            vec![as_dyn(&fast)],
            vec![as_dyn(&primary), as_dyn(&secondary)],
            settings(),
        );

        let request = AnalysisRequest::new("text");
        let fast_result = router.analyze_fast(&request).await;
        let deep = router.analyze_deep(&fast_result, &request).await;

        assert!(deep.has_annotation(DEEP_ANALYSIS_FAILED));
        assert!((deep.confidence - fast_result.confidence).abs() < f32::EPSILON);
        assert_eq!(deep.provider, "fast");
        assert!(deep.audit.is_none());
        // Each deep provider: first attempt plus one retry.
        assert_eq!(primary.calls(), 2);
        assert_eq!(secondary.calls(), 2);
    }
}
