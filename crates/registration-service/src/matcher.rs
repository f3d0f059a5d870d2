//! HTTP client for a remote face-comparison service.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use registration_core::{
    BiometricMatcher, CapturedImage, MatchDecision, MatchOutcome, MatcherError, StoredDocument,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Image as sent to the matcher: inline bytes or a reference it can fetch.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum ImagePayload<'a> {
    ImageBase64(String),
    ImageUri(&'a str),
}

impl<'a> From<&'a CapturedImage> for ImagePayload<'a> {
    fn from(image: &'a CapturedImage) -> Self {
        match image {
            CapturedImage::Inline(bytes) => ImagePayload::ImageBase64(STANDARD.encode(bytes)),
            CapturedImage::Reference(uri) => ImagePayload::ImageUri(uri),
        }
    }
}

#[derive(Debug, Serialize)]
struct CompareRequest<'a> {
    document: ImagePayload<'a>,
    face: ImagePayload<'a>,
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    verdict: MatchDecision,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Biometric matcher backed by `POST {base}/v1/compare`.
#[derive(Clone)]
pub struct HttpMatcher {
    client: Client,
    base_url: String,
}

impl HttpMatcher {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BiometricMatcher for HttpMatcher {
    #[instrument(skip_all, fields(document_id = %document.record.id))]
    async fn compare(
        &self,
        document: &StoredDocument,
        face: &CapturedImage,
    ) -> Result<MatchOutcome, MatcherError> {
        let request = CompareRequest {
            document: (&document.image).into(),
            face: face.into(),
        };

        let response = self
            .client
            .post(format!("{}/v1/compare", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| MatcherError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Matcher request failed");
            return Err(MatcherError::Unavailable(format!("{} - {}", status, body)));
        }

        let parsed: CompareResponse = response
            .json()
            .await
            .map_err(|e| MatcherError::Unavailable(format!("Invalid matcher response: {}", e)))?;

        debug!(verdict = ?parsed.verdict, confidence = ?parsed.confidence, "Matcher responded");

        Ok(MatchOutcome {
            decision: parsed.verdict,
            confidence: parsed.confidence,
        })
    }
}
