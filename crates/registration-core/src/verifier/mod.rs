//! One-time code issuance and verification for contact numbers.
//!
//! Codes are keyed by normalized phone number. Issuing and verifying both
//! take the store's write lock, so a new code and the supersession of the
//! old one happen atomically: there is never a window with two valid codes
//! for the same number. Expiry is checked against the wall clock on every
//! verification; the reaper only reclaims memory.
//!
//! Issuance for one number is also serialized end to end, delivery
//! included, so the last code a person receives is always the active one.

mod code;
mod gateway;

pub use code::CodeState;
pub use gateway::{GatewayError, MessagingGateway, RecordingGateway};

use crate::phone::{hash_secret, normalize_phone_number};
use chrono::{DateTime, Utc};
use code::{CodeLedger, IssuedCode};
use rand::Rng;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Digits in a generated code.
pub const CODE_LENGTH: usize = 6;

/// Errors from the contact verifier.
#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(String),

    #[error("Invalid verification code: {0}")]
    InvalidCode(String),

    #[error("No active verification code")]
    NoActiveCode,

    #[error("Verification code expired")]
    CodeExpired,

    #[error("Verification code was superseded by a newer code")]
    CodeSuperseded,

    #[error("Code delivery failed: {0}")]
    DeliveryFailed(#[source] GatewayError),
}

impl VerifierError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VerifierError::DeliveryFailed(_))
    }
}

/// Code lifetime and guessing policy.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// How long an issued code stays valid
    pub code_ttl: Duration,
    /// Mismatched submissions allowed per issued code before it locks
    pub max_attempts: u32,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            code_ttl: Duration::from_secs(5 * 60),
            max_attempts: 5,
        }
    }
}

/// Opaque reference to an issued code. Never carries the code value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeHandle {
    pub code_id: Uuid,
    pub phone_number: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a code submission that reached an active code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum VerificationResult {
    /// The code matched and has been consumed.
    Verified { phone_number: String },
    /// The code did not match. Zero remaining attempts means the code locked.
    Mismatch { attempts_remaining: u32 },
}

impl VerificationResult {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationResult::Verified { .. })
    }
}

/// Issues, expires and consumes one-time codes.
#[derive(Clone)]
pub struct ContactVerifier {
    codes: Arc<RwLock<HashMap<String, CodeLedger>>>,
    issuing: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    gateway: Arc<dyn MessagingGateway>,
    config: VerifierConfig,
}

impl ContactVerifier {
    /// Create a verifier that delivers codes through `gateway`.
    pub fn new(gateway: Arc<dyn MessagingGateway>, config: VerifierConfig) -> Self {
        Self {
            codes: Arc::new(RwLock::new(HashMap::new())),
            issuing: Arc::new(Mutex::new(HashMap::new())),
            gateway,
            config,
        }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Issue a fresh code for a number, superseding any pending one.
    ///
    /// If delivery fails the new code is withdrawn again.
    #[instrument(skip(self))]
    pub async fn issue_code(&self, phone_number: &str) -> Result<CodeHandle, VerifierError> {
        let phone_number =
            normalize_phone_number(phone_number).map_err(VerifierError::InvalidPhoneNumber)?;

        let guard = self.issuance_guard(&phone_number).await;
        let _issuing = guard.lock().await;

        let code = generate_code();
        let issued_at = Utc::now();
        let expires_at = issued_at + ttl_as_chrono(self.config.code_ttl);
        let issued = IssuedCode::new(&code, issued_at, expires_at);
        let code_id = issued.id;

        {
            let mut codes = self.codes.write().await;
            let ledger = codes.entry(phone_number.clone()).or_default();
            if let Some(previous) = ledger.install(issued) {
                debug!(phone_number = %phone_number, %previous, "Superseded pending code");
            }
        }

        let secret = SecretString::new(code);
        if let Err(e) = self.gateway.send(&phone_number, &secret).await {
            warn!(phone_number = %phone_number, error = %e, "Code delivery failed, withdrawing code");
            if let Some(ledger) = self.codes.write().await.get_mut(&phone_number) {
                ledger.withdraw(code_id);
            }
            return Err(VerifierError::DeliveryFailed(e));
        }

        info!(phone_number = %phone_number, %code_id, "Verification code issued");

        Ok(CodeHandle {
            code_id,
            phone_number,
            issued_at,
            expires_at,
        })
    }

    async fn issuance_guard(&self, phone_number: &str) -> Arc<Mutex<()>> {
        self.issuing
            .lock()
            .await
            .entry(phone_number.to_string())
            .or_default()
            .clone()
    }

    /// Check a submitted code against the number's active code.
    ///
    /// A match consumes the code, so a second correct submission fails with
    /// [`VerifierError::NoActiveCode`]. Values that are not a six-digit code
    /// are rejected up front and never count as an attempt.
    #[instrument(skip(self, submitted))]
    pub async fn verify_code(
        &self,
        phone_number: &str,
        submitted: &str,
    ) -> Result<VerificationResult, VerifierError> {
        let phone_number =
            normalize_phone_number(phone_number).map_err(VerifierError::InvalidPhoneNumber)?;
        let submitted = validate_code_format(submitted)?;
        let submitted_hash = hash_secret(submitted);
        let now = Utc::now();
        let max_attempts = self.config.max_attempts;

        let mut codes = self.codes.write().await;
        let ledger = codes
            .get_mut(&phone_number)
            .ok_or(VerifierError::NoActiveCode)?;

        let superseded_match = ledger.matches_superseded(&submitted_hash);

        let Some(active) = ledger.active_mut() else {
            return match ledger.latest().map(|c| c.state) {
                Some(CodeState::Expired) => Err(VerifierError::CodeExpired),
                _ if superseded_match => Err(VerifierError::CodeSuperseded),
                _ => Err(VerifierError::NoActiveCode),
            };
        };

        if active.is_expired_at(now) {
            active.state = CodeState::Expired;
            info!(phone_number = %phone_number, code_id = %active.id, "Verification code expired");
            return Err(VerifierError::CodeExpired);
        }

        if active.matches_hash(&submitted_hash) {
            active.state = CodeState::Consumed;
            info!(phone_number = %phone_number, code_id = %active.id, "Verification code consumed");
            return Ok(VerificationResult::Verified { phone_number });
        }

        if superseded_match {
            debug!(phone_number = %phone_number, "Submitted value belongs to a superseded code");
            return Err(VerifierError::CodeSuperseded);
        }

        active.failed_attempts += 1;
        let attempts_remaining = max_attempts.saturating_sub(active.failed_attempts);
        if attempts_remaining == 0 {
            active.state = CodeState::Locked;
            warn!(phone_number = %phone_number, code_id = %active.id, "Verification code locked after repeated mismatches");
        } else {
            debug!(phone_number = %phone_number, attempts_remaining, "Verification code mismatch");
        }

        Ok(VerificationResult::Mismatch { attempts_remaining })
    }

    /// State of the most recently issued code for a number.
    pub async fn code_state(&self, phone_number: &str) -> Option<CodeState> {
        let phone_number = normalize_phone_number(phone_number).ok()?;
        self.codes
            .read()
            .await
            .get(&phone_number)
            .and_then(|ledger| ledger.latest())
            .map(|code| code.state)
    }

    /// Number of phone numbers with a usable code right now.
    pub async fn active_count(&self) -> usize {
        let now = Utc::now();
        self.codes
            .read()
            .await
            .values()
            .filter(|ledger| ledger.has_active_at(now))
            .count()
    }

    /// Number of phone numbers tracked, usable or not.
    pub async fn tracked_count(&self) -> usize {
        self.codes.read().await.len()
    }

    /// Drop ledgers with nothing usable whose newest code expired more than
    /// `retention` ago. Returns the number of ledgers removed.
    pub async fn purge(&self, retention: Duration) -> usize {
        let now = Utc::now();
        let cutoff = now - ttl_as_chrono(retention);

        let removed = {
            let mut codes = self.codes.write().await;
            let before = codes.len();
            codes.retain(|_, ledger| !ledger.is_empty() && !ledger.is_stale(now, cutoff));
            before - codes.len()
        };

        // Guards nobody is waiting on
        self.issuing
            .lock()
            .await
            .retain(|_, guard| Arc::strong_count(guard) > 1);

        removed
    }

    /// Spawn a background task that periodically purges stale ledgers.
    pub fn spawn_reaper(
        &self,
        interval: Duration,
        retention: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let verifier = self.clone();

        info!(?interval, ?retention, "Starting verification code reaper");

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                let removed = verifier.purge(retention).await;
                if removed > 0 {
                    debug!("Purged {} stale code ledgers", removed);
                }
            }
        })
    }
}

fn generate_code() -> String {
    let value: u32 = rand::thread_rng().gen_range(0..10u32.pow(CODE_LENGTH as u32));
    format!("{:0width$}", value, width = CODE_LENGTH)
}

fn validate_code_format(submitted: &str) -> Result<&str, VerifierError> {
    let submitted = submitted.trim();
    if submitted.len() != CODE_LENGTH || !submitted.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VerifierError::InvalidCode(format!(
            "expected {} digits",
            CODE_LENGTH
        )));
    }
    Ok(submitted)
}

fn ttl_as_chrono(ttl: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(ttl.as_millis().min(i64::MAX as u128) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use tokio_test::{assert_err, assert_ok};

    const PHONE: &str = "0821234567";

    fn verifier_with(config: VerifierConfig) -> (ContactVerifier, RecordingGateway) {
        let gateway = RecordingGateway::new();
        let verifier = ContactVerifier::new(Arc::new(gateway.clone()), config);
        (verifier, gateway)
    }

    fn verifier() -> (ContactVerifier, RecordingGateway) {
        verifier_with(VerifierConfig::default())
    }

    /// A six-digit value guaranteed to differ from `code`.
    fn wrong_code(code: &str) -> String {
        if code == "000000" {
            "999999".into()
        } else {
            "000000".into()
        }
    }

    #[test]
    fn test_generate_code_shape() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn test_issue_and_verify() {
        let (verifier, gateway) = verifier();

        let handle = verifier.issue_code(PHONE).await.unwrap();
        assert_eq!(handle.phone_number, PHONE);
        assert!(handle.expires_at > handle.issued_at);

        let code = gateway.last_code(PHONE).await.unwrap();
        let result = verifier.verify_code(PHONE, &code).await.unwrap();

        assert_eq!(
            result,
            VerificationResult::Verified {
                phone_number: PHONE.into()
            }
        );
        assert_eq!(verifier.code_state(PHONE).await, Some(CodeState::Consumed));
    }

    #[tokio::test]
    async fn test_handle_does_not_expose_code() {
        let (verifier, gateway) = verifier();

        let handle = verifier.issue_code(PHONE).await.unwrap();
        let code = gateway.last_code(PHONE).await.unwrap();
        let json = serde_json::to_string(&handle).unwrap();

        assert!(!json.contains(&code));
    }

    #[tokio::test]
    async fn test_invalid_phone_number() {
        let (verifier, gateway) = verifier();

        let result = verifier.issue_code("12345").await;
        assert!(matches!(result, Err(VerifierError::InvalidPhoneNumber(_))));
        assert_eq!(gateway.delivered_count("12345").await, 0);
    }

    #[tokio::test]
    async fn test_verify_without_code() {
        let (verifier, _) = verifier();

        let result = verifier.verify_code(PHONE, "123456").await;
        assert!(matches!(result, Err(VerifierError::NoActiveCode)));
    }

    #[tokio::test]
    async fn test_mismatch_keeps_code_active() {
        let (verifier, gateway) = verifier();

        verifier.issue_code(PHONE).await.unwrap();
        let code = gateway.last_code(PHONE).await.unwrap();

        let result = verifier.verify_code(PHONE, &wrong_code(&code)).await.unwrap();
        assert_eq!(
            result,
            VerificationResult::Mismatch {
                attempts_remaining: 4
            }
        );
        assert_eq!(verifier.code_state(PHONE).await, Some(CodeState::Active));

        let result = verifier.verify_code(PHONE, &code).await.unwrap();
        assert!(result.is_verified());
    }

    #[tokio::test]
    async fn test_correct_code_twice() {
        let (verifier, gateway) = verifier();

        verifier.issue_code(PHONE).await.unwrap();
        let code = gateway.last_code(PHONE).await.unwrap();

        assert_ok!(verifier.verify_code(PHONE, &code).await);
        let second = verifier.verify_code(PHONE, &code).await;
        assert!(matches!(second, Err(VerifierError::NoActiveCode)));
    }

    #[tokio::test]
    async fn test_superseded_code_rejected() {
        let (verifier, gateway) = verifier();

        verifier.issue_code(PHONE).await.unwrap();
        let first = gateway.last_code(PHONE).await.unwrap();
        verifier.issue_code(PHONE).await.unwrap();
        let second = gateway.last_code(PHONE).await.unwrap();

        if first != second {
            let result = verifier.verify_code(PHONE, &first).await;
            assert!(matches!(result, Err(VerifierError::CodeSuperseded)));
        }

        let result = verifier.verify_code(PHONE, &second).await.unwrap();
        assert!(result.is_verified());

        // Once the newest code is consumed the old one is still refused
        if first != second {
            let result = verifier.verify_code(PHONE, &first).await;
            assert!(matches!(result, Err(VerifierError::CodeSuperseded)));
        }
    }

    #[tokio::test]
    async fn test_superseded_attempt_does_not_count() {
        let (verifier, gateway) = verifier_with(VerifierConfig {
            max_attempts: 1,
            ..VerifierConfig::default()
        });

        verifier.issue_code(PHONE).await.unwrap();
        let first = gateway.last_code(PHONE).await.unwrap();
        verifier.issue_code(PHONE).await.unwrap();
        let second = gateway.last_code(PHONE).await.unwrap();

        if first != second {
            assert_err!(verifier.verify_code(PHONE, &first).await);
        }

        // Still unlocked despite max_attempts = 1
        let result = verifier.verify_code(PHONE, &second).await.unwrap();
        assert!(result.is_verified());
    }

    #[tokio::test]
    async fn test_expired_code_rejected() {
        let (verifier, gateway) = verifier_with(VerifierConfig {
            code_ttl: Duration::from_millis(50),
            ..VerifierConfig::default()
        });

        verifier.issue_code(PHONE).await.unwrap();
        let code = gateway.last_code(PHONE).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        let result = verifier.verify_code(PHONE, &code).await;
        assert!(matches!(result, Err(VerifierError::CodeExpired)));
        assert_eq!(verifier.code_state(PHONE).await, Some(CodeState::Expired));

        // Terminal: the matching value keeps failing
        let result = verifier.verify_code(PHONE, &code).await;
        assert!(matches!(result, Err(VerifierError::CodeExpired)));
    }

    #[tokio::test]
    async fn test_new_code_after_expiry() {
        let (verifier, gateway) = verifier_with(VerifierConfig {
            code_ttl: Duration::from_millis(300),
            ..VerifierConfig::default()
        });

        verifier.issue_code(PHONE).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        verifier.issue_code(PHONE).await.unwrap();
        let code = gateway.last_code(PHONE).await.unwrap();

        let result = verifier.verify_code(PHONE, &code).await.unwrap();
        assert!(result.is_verified());
    }

    #[tokio::test]
    async fn test_code_locks_after_max_attempts() {
        let (verifier, gateway) = verifier_with(VerifierConfig {
            max_attempts: 3,
            ..VerifierConfig::default()
        });

        verifier.issue_code(PHONE).await.unwrap();
        let code = gateway.last_code(PHONE).await.unwrap();
        let wrong = wrong_code(&code);

        for expected in [2, 1, 0] {
            let result = verifier.verify_code(PHONE, &wrong).await.unwrap();
            assert_eq!(
                result,
                VerificationResult::Mismatch {
                    attempts_remaining: expected
                }
            );
        }

        assert_eq!(verifier.code_state(PHONE).await, Some(CodeState::Locked));
        let result = verifier.verify_code(PHONE, &code).await;
        assert!(matches!(result, Err(VerifierError::NoActiveCode)));
    }

    #[tokio::test]
    async fn test_malformed_code_does_not_use_attempt() {
        let (verifier, gateway) = verifier_with(VerifierConfig {
            max_attempts: 2,
            ..VerifierConfig::default()
        });

        verifier.issue_code(PHONE).await.unwrap();
        let code = gateway.last_code(PHONE).await.unwrap();

        for malformed in ["12345", "", "abcdef", "1234567", "12 456"] {
            let result = verifier.verify_code(PHONE, malformed).await;
            assert!(matches!(result, Err(VerifierError::InvalidCode(_))));
        }
        assert_eq!(verifier.code_state(PHONE).await, Some(CodeState::Active));

        let result = verifier
            .verify_code(PHONE, &wrong_code(&code))
            .await
            .unwrap();
        assert_eq!(
            result,
            VerificationResult::Mismatch {
                attempts_remaining: 1
            }
        );

        let result = verifier.verify_code(PHONE, &format!(" {} ", code)).await.unwrap();
        assert!(result.is_verified());
    }

    #[tokio::test]
    async fn test_delivery_failure_withdraws_code() {
        let (verifier, gateway) = verifier();
        gateway.set_failing(true);

        let result = verifier.issue_code(PHONE).await;
        let err = result.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, VerifierError::DeliveryFailed(_)));

        let result = verifier.verify_code(PHONE, "123456").await;
        assert!(matches!(result, Err(VerifierError::NoActiveCode)));
        assert_eq!(verifier.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_formatting_variants_share_a_code() {
        let (verifier, gateway) = verifier();

        verifier.issue_code("082 123 4567").await.unwrap();
        let code = gateway.last_code(PHONE).await.unwrap();

        let result = verifier.verify_code("(082) 123-4567", &code).await.unwrap();
        assert!(result.is_verified());
    }

    #[tokio::test]
    async fn test_concurrent_numbers_do_not_cross_talk() {
        let (verifier, gateway) = verifier();
        let numbers: Vec<String> = (0..20).map(|i| format!("08212345{:02}", i)).collect();

        let issued = join_all(numbers.iter().map(|n| verifier.issue_code(n))).await;
        assert!(issued.iter().all(|r| r.is_ok()));
        assert_eq!(verifier.active_count().await, numbers.len());

        for number in &numbers {
            let code = gateway.last_code(number).await.unwrap();
            let result = verifier.verify_code(number, &code).await.unwrap();
            assert!(result.is_verified());
        }
        assert_eq!(verifier.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_issuance_leaves_one_active_code() {
        let (verifier, gateway) = verifier();

        let issued = join_all((0..10).map(|_| verifier.issue_code(PHONE))).await;
        assert!(issued.iter().all(|r| r.is_ok()));
        assert_eq!(gateway.delivered_count(PHONE).await, 10);

        assert_eq!(verifier.code_state(PHONE).await, Some(CodeState::Active));
        assert_eq!(verifier.active_count().await, 1);
    }

    /// Delays the first delivery so an unguarded second issuance would
    /// overtake it.
    struct SlowFirstGateway {
        inner: RecordingGateway,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl MessagingGateway for SlowFirstGateway {
        async fn send(&self, phone_number: &str, code: &SecretString) -> Result<(), GatewayError> {
            let call = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call == 0 {
                tokio::time::sleep(Duration::from_millis(150)).await;
            }
            self.inner.send(phone_number, code).await
        }
    }

    #[tokio::test]
    async fn test_last_delivered_code_is_active() {
        let inner = RecordingGateway::new();
        let verifier = ContactVerifier::new(
            Arc::new(SlowFirstGateway {
                inner: inner.clone(),
                calls: Default::default(),
            }),
            VerifierConfig::default(),
        );

        let first = verifier.clone();
        let second = verifier.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move { first.issue_code(PHONE).await }),
            tokio::spawn(async move { second.issue_code(PHONE).await }),
        );
        assert_ok!(a.unwrap());
        assert_ok!(b.unwrap());
        assert_eq!(inner.delivered_count(PHONE).await, 2);

        let code = inner.last_code(PHONE).await.unwrap();
        let result = verifier.verify_code(PHONE, &code).await.unwrap();
        assert!(result.is_verified());
    }

    #[tokio::test]
    async fn test_purge_removes_stale_ledgers() {
        let (verifier, gateway) = verifier_with(VerifierConfig {
            code_ttl: Duration::from_millis(200),
            ..VerifierConfig::default()
        });

        verifier.issue_code(PHONE).await.unwrap();
        verifier.issue_code("0739876543").await.unwrap();
        let code = gateway.last_code("0739876543").await.unwrap();
        verifier.verify_code("0739876543", &code).await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(verifier.purge(Duration::from_secs(3600)).await, 0);
        assert_eq!(verifier.purge(Duration::ZERO).await, 2);
        assert_eq!(verifier.tracked_count().await, 0);
    }
}
