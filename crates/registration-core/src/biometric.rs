//! Biometric face-match capability.

use crate::document::{CapturedImage, StoredDocument};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Matcher errors. A negative match is not an error, see [`MatchDecision::Failed`].
#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("Biometric matcher unavailable: {0}")]
    Unavailable(String),
}

/// Business outcome of a comparison.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchDecision {
    Verified,
    Failed,
}

/// Decision plus the matcher's confidence, when it reports one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MatchOutcome {
    pub decision: MatchDecision,
    pub confidence: Option<f64>,
}

impl MatchOutcome {
    pub fn verified(confidence: f64) -> Self {
        Self {
            decision: MatchDecision::Verified,
            confidence: Some(confidence),
        }
    }

    pub fn failed(confidence: f64) -> Self {
        Self {
            decision: MatchDecision::Failed,
            confidence: Some(confidence),
        }
    }
}

/// Compares a face capture against a stored identity document.
///
/// Implementations may take seconds. Callers race the returned future
/// against cancellation, so implementations must tolerate being dropped
/// mid-flight.
#[async_trait]
pub trait BiometricMatcher: Send + Sync {
    async fn compare(
        &self,
        document: &StoredDocument,
        face: &CapturedImage,
    ) -> Result<MatchOutcome, MatcherError>;
}

/// Deterministic matcher that replays queued outcomes, then a fallback.
#[derive(Clone)]
pub struct ScriptedMatcher {
    script: Arc<Mutex<VecDeque<Result<MatchOutcome, String>>>>,
    fallback: MatchOutcome,
    latency: Duration,
    calls: Arc<AtomicUsize>,
}

impl ScriptedMatcher {
    /// A matcher whose fallback outcome is `outcome`.
    pub fn new(outcome: MatchOutcome) -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: outcome,
            latency: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Verifies everything with full confidence.
    pub fn accepting() -> Self {
        Self::new(MatchOutcome::verified(1.0))
    }

    /// Rejects everything with zero confidence.
    pub fn rejecting() -> Self {
        Self::new(MatchOutcome::failed(0.0))
    }

    /// Delay every comparison by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue an outcome for the next unscripted call.
    pub async fn push_outcome(&self, outcome: MatchOutcome) {
        self.script.lock().await.push_back(Ok(outcome));
    }

    /// Queue an unavailability for the next unscripted call.
    pub async fn push_unavailable(&self, reason: impl Into<String>) {
        self.script.lock().await.push_back(Err(reason.into()));
    }

    /// Comparisons started so far, including cancelled ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BiometricMatcher for ScriptedMatcher {
    async fn compare(
        &self,
        _document: &StoredDocument,
        _face: &CapturedImage,
    ) -> Result<MatchOutcome, MatcherError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().await.pop_front();

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match next {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(reason)) => Err(MatcherError::Unavailable(reason)),
            None => Ok(self.fallback),
        }
    }
}
