//! Registration workflow: the operations a caller drives a registration with.
//!
//! Each workflow owns one aggregate behind a mutex, so gating decisions
//! that read several fields see a consistent snapshot. The face comparison
//! is the only long-running step: it runs outside the lock and races a
//! cancellation signal, and its result is applied only if it still targets
//! the current document and the latest attempt.

use crate::aggregate::{
    ContactSlot, EmergencyContact, PersonField, RegistrationAggregate, RegistrationState,
    Requirement, VerdictStatus,
};
use crate::archive::RegistrationArchive;
use crate::biometric::{BiometricMatcher, MatchDecision};
use crate::document::{CapturedImage, DocumentStore};
use crate::error::WorkflowError;
use crate::verifier::{CodeHandle, ContactVerifier, VerificationResult};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Collaborators shared by every workflow instance.
#[derive(Clone)]
pub struct Collaborators {
    pub verifier: ContactVerifier,
    pub documents: DocumentStore,
    pub matcher: Arc<dyn BiometricMatcher>,
    pub archive: Arc<dyn RegistrationArchive>,
}

/// Read-only projection returned after every operation.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationView {
    pub registration: RegistrationAggregate,
    pub state: RegistrationState,
    pub phone_verified: bool,
    pub progress: f64,
    pub missing: Vec<Requirement>,
}

impl From<&RegistrationAggregate> for RegistrationView {
    fn from(aggregate: &RegistrationAggregate) -> Self {
        Self {
            registration: aggregate.clone(),
            state: aggregate.state(),
            phone_verified: aggregate.phone_verified(),
            progress: aggregate.progress(),
            missing: aggregate.missing_requirements(),
        }
    }
}

/// Result of confirming a phone code.
#[derive(Debug, Clone, Serialize)]
pub struct PhoneConfirmation {
    pub result: VerificationResult,
    pub view: RegistrationView,
}

/// Result of a completed face comparison.
#[derive(Debug, Clone, Serialize)]
pub struct FaceMatchReport {
    pub decision: MatchDecision,
    pub confidence: Option<f64>,
    pub view: RegistrationView,
}

struct InFlightMatch {
    attempt_id: Uuid,
    cancel: oneshot::Sender<()>,
}

struct Session {
    aggregate: RegistrationAggregate,
    in_flight: Option<InFlightMatch>,
}

impl Session {
    /// Signal the running comparison, if any, to stop. Returns its attempt id.
    fn cancel_in_flight(&mut self) -> Option<Uuid> {
        self.in_flight.take().map(|in_flight| {
            // The receiver may already be gone if the comparison just finished
            let _ = in_flight.cancel.send(());
            in_flight.attempt_id
        })
    }
}

/// Drives one registration from empty to submitted.
pub struct RegistrationWorkflow {
    deps: Collaborators,
    session: Mutex<Session>,
}

impl RegistrationWorkflow {
    /// Start a workflow around a new, empty aggregate.
    pub fn new(deps: Collaborators) -> Self {
        Self::with_aggregate(deps, RegistrationAggregate::new())
    }

    pub fn with_aggregate(deps: Collaborators, aggregate: RegistrationAggregate) -> Self {
        Self {
            deps,
            session: Mutex::new(Session {
                aggregate,
                in_flight: None,
            }),
        }
    }

    pub async fn id(&self) -> Uuid {
        self.session.lock().await.aggregate.id()
    }

    pub async fn snapshot(&self) -> RegistrationView {
        RegistrationView::from(&self.session.lock().await.aggregate)
    }

    pub async fn set_person_field(
        &self,
        field: PersonField,
        value: &str,
    ) -> Result<RegistrationView, WorkflowError> {
        let mut session = self.session.lock().await;
        let was_verified = session.aggregate.phone_verified();

        session.aggregate.set_person_field(field, value)?;

        if was_verified && !session.aggregate.phone_verified() {
            info!(registration_id = %session.aggregate.id(), "Phone number changed, verification reset");
        }
        Ok(RegistrationView::from(&session.aggregate))
    }

    pub async fn set_emergency_contact(
        &self,
        slot: ContactSlot,
        contact: EmergencyContact,
    ) -> Result<RegistrationView, WorkflowError> {
        let mut session = self.session.lock().await;
        session.aggregate.set_emergency_contact(slot, contact)?;
        debug!(registration_id = %session.aggregate.id(), ?slot, "Emergency contact updated");
        Ok(RegistrationView::from(&session.aggregate))
    }

    /// Issue a code for the phone number currently on the person record.
    pub async fn request_phone_code(&self) -> Result<CodeHandle, WorkflowError> {
        let (registration_id, phone) = {
            let session = self.session.lock().await;
            session.aggregate.ensure_open()?;
            (session.aggregate.id(), session.aggregate.person().phone.clone())
        };

        let handle = self.deps.verifier.issue_code(&phone).await?;
        info!(%registration_id, phone_number = %handle.phone_number, "Phone code requested");
        Ok(handle)
    }

    /// Check a code against the phone number currently on the person record.
    ///
    /// The lock is held across the check so the number cannot change
    /// between verification and recording the proof.
    pub async fn confirm_phone_code(&self, code: &str) -> Result<PhoneConfirmation, WorkflowError> {
        let mut session = self.session.lock().await;
        session.aggregate.ensure_open()?;

        let phone = session.aggregate.person().phone.clone();
        let result = self.deps.verifier.verify_code(&phone, code).await?;

        if let VerificationResult::Verified { phone_number } = &result {
            session.aggregate.record_phone_verified(phone_number.clone())?;
            info!(registration_id = %session.aggregate.id(), phone_number = %phone_number, "Phone number verified");
        }

        Ok(PhoneConfirmation {
            result,
            view: RegistrationView::from(&session.aggregate),
        })
    }

    /// Make a newly captured document current. Any verdict or running
    /// comparison for the previous document is discarded.
    pub async fn upload_document(
        &self,
        image: CapturedImage,
    ) -> Result<RegistrationView, WorkflowError> {
        let mut session = self.session.lock().await;
        session.aggregate.ensure_open()?;

        let record = self.deps.documents.capture_document(image).await?;
        let previous = session.aggregate.document().map(|d| d.id);

        if let Some(attempt_id) = session.cancel_in_flight() {
            debug!(%attempt_id, "Cancelled face comparison for replaced document");
        }
        if let Err(e) = session.aggregate.replace_document(record.clone()) {
            self.deps.documents.remove(record.id).await;
            return Err(e);
        }
        if let Some(previous) = previous {
            self.deps.documents.remove(previous).await;
        }

        info!(
            registration_id = %session.aggregate.id(),
            document_id = %record.id,
            superseded = session.aggregate.document_history().len(),
            "Identity document uploaded"
        );
        Ok(RegistrationView::from(&session.aggregate))
    }

    /// Compare a face capture against the current document.
    ///
    /// The verdict is Pending while the matcher runs. A newer capture,
    /// a document upload or [`Self::cancel_face_capture`] abandons this
    /// attempt. If the matcher is unreachable the verdict stays Pending.
    pub async fn capture_face(&self, face: CapturedImage) -> Result<FaceMatchReport, WorkflowError> {
        self.deps.documents.validate_image(&face)?;

        let (registration_id, attempt_id, document, cancelled) = {
            let mut session = self.session.lock().await;
            session.aggregate.ensure_open()?;

            let document_id = session
                .aggregate
                .document()
                .map(|d| d.id)
                .ok_or(WorkflowError::DocumentMissing)?;
            let document = self.deps.documents.get(document_id).await?;

            let attempt_id = Uuid::new_v4();
            let (cancel, cancelled) = oneshot::channel();
            session.cancel_in_flight();
            session.aggregate.begin_match(attempt_id)?;
            session.in_flight = Some(InFlightMatch { attempt_id, cancel });

            (session.aggregate.id(), attempt_id, document, cancelled)
        };

        info!(%registration_id, %attempt_id, document_id = %document.record.id, "Face comparison started");

        // A dropped sender means a newer attempt replaced this one
        let outcome = tokio::select! {
            outcome = self.deps.matcher.compare(&document, &face) => outcome,
            _ = cancelled => {
                info!(%registration_id, %attempt_id, "Face comparison cancelled");
                return Err(WorkflowError::ComparisonCancelled);
            }
        };

        let mut session = self.session.lock().await;
        if session
            .in_flight
            .as_ref()
            .is_some_and(|f| f.attempt_id == attempt_id)
        {
            session.in_flight = None;
        }

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(%registration_id, %attempt_id, error = %e, "Biometric matcher unavailable, verdict left pending");
                return Err(e.into());
            }
        };

        let status = session
            .aggregate
            .settle_match(attempt_id, &outcome)
            .inspect_err(|_| {
                debug!(%registration_id, %attempt_id, "Discarded stale face comparison result");
            })?;

        match status {
            VerdictStatus::Verified => {
                info!(%registration_id, %attempt_id, confidence = ?outcome.confidence, "Face matched identity document")
            }
            _ => {
                info!(%registration_id, %attempt_id, confidence = ?outcome.confidence, "Face did not match identity document")
            }
        }

        Ok(FaceMatchReport {
            decision: outcome.decision,
            confidence: outcome.confidence,
            view: RegistrationView::from(&session.aggregate),
        })
    }

    /// Abandon a running comparison. Returns whether one was running.
    pub async fn cancel_face_capture(&self) -> (bool, RegistrationView) {
        let mut session = self.session.lock().await;

        let cancelled = match session.cancel_in_flight() {
            Some(attempt_id) => {
                session.aggregate.clear_pending(attempt_id);
                info!(registration_id = %session.aggregate.id(), %attempt_id, "Face comparison cancelled by caller");
                true
            }
            None => false,
        };

        (cancelled, RegistrationView::from(&session.aggregate))
    }

    /// Stop any running comparison and drop the current document payload.
    ///
    /// Called when a registration is abandoned. Returns whether a payload
    /// was released.
    pub async fn release_documents(&self) -> bool {
        let mut session = self.session.lock().await;
        session.cancel_in_flight();

        match session.aggregate.document().map(|d| d.id) {
            Some(document_id) => self.deps.documents.remove(document_id).await,
            None => false,
        }
    }

    /// Finalize the registration and hand it to the archive.
    ///
    /// On any failure the aggregate is left exactly as it was.
    pub async fn submit(&self) -> Result<RegistrationView, WorkflowError> {
        let mut session = self.session.lock().await;

        let mut finalized = session.aggregate.clone();
        if let Err(e) = finalized.mark_submitted(Utc::now()) {
            if let WorkflowError::RegistrationIncomplete { missing } = &e {
                debug!(registration_id = %finalized.id(), missing = missing.len(), "Submission refused");
            }
            return Err(e);
        }

        self.deps.archive.store(&finalized).await.map_err(|e| {
            warn!(registration_id = %finalized.id(), error = %e, "Archiving failed, registration not submitted");
            WorkflowError::from(e)
        })?;

        session.aggregate = finalized;
        if let Some(document) = session.aggregate.document() {
            self.deps.documents.remove(document.id).await;
        }
        info!(registration_id = %session.aggregate.id(), "Registration submitted");

        Ok(RegistrationView::from(&session.aggregate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveError, MemoryArchive, MockRegistrationArchive};
    use crate::biometric::{MatchOutcome, ScriptedMatcher};
    use crate::verifier::{RecordingGateway, VerifierConfig};
    use std::time::Duration;

    const PHONE: &str = "0821234567";

    struct Harness {
        workflow: Arc<RegistrationWorkflow>,
        gateway: RecordingGateway,
        matcher: ScriptedMatcher,
        archive: MemoryArchive,
        documents: DocumentStore,
    }

    fn harness_with(matcher: ScriptedMatcher) -> Harness {
        let gateway = RecordingGateway::new();
        let archive = MemoryArchive::new();
        let documents = DocumentStore::default();
        let deps = Collaborators {
            verifier: ContactVerifier::new(Arc::new(gateway.clone()), VerifierConfig::default()),
            documents: documents.clone(),
            matcher: Arc::new(matcher.clone()),
            archive: Arc::new(archive.clone()),
        };

        Harness {
            workflow: Arc::new(RegistrationWorkflow::new(deps)),
            gateway,
            matcher,
            archive,
            documents,
        }
    }

    fn harness() -> Harness {
        harness_with(ScriptedMatcher::accepting())
    }

    fn document() -> CapturedImage {
        CapturedImage::Inline(vec![0xFF, 0xD8, 0xFF, 0xE0])
    }

    fn face() -> CapturedImage {
        CapturedImage::Reference("file:///captures/face.jpg".into())
    }

    async fn fill_personal(workflow: &RegistrationWorkflow) {
        workflow
            .set_person_field(PersonField::FullName, "Thandi Mokoena")
            .await
            .unwrap();
        workflow
            .set_person_field(PersonField::IdNumber, "9001014800086")
            .await
            .unwrap();
        workflow.set_person_field(PersonField::Phone, PHONE).await.unwrap();
    }

    async fn fill_contacts(workflow: &RegistrationWorkflow) {
        workflow
            .set_emergency_contact(
                ContactSlot::Primary,
                EmergencyContact::new("Sipho Mokoena", "8001015009087", "0831112222", "Brother"),
            )
            .await
            .unwrap();
        workflow
            .set_emergency_contact(
                ContactSlot::Secondary,
                EmergencyContact::new("Lerato Dlamini", "8502020123083", "0844443333", "Friend"),
            )
            .await
            .unwrap();
    }

    async fn verify_phone(h: &Harness) {
        h.workflow.request_phone_code().await.unwrap();
        let code = h.gateway.last_code(PHONE).await.unwrap();
        let confirmation = h.workflow.confirm_phone_code(&code).await.unwrap();
        assert!(confirmation.result.is_verified());
    }

    async fn complete(h: &Harness) {
        fill_personal(&h.workflow).await;
        verify_phone(h).await;
        fill_contacts(&h.workflow).await;
        h.workflow.upload_document(document()).await.unwrap();
        let report = h.workflow.capture_face(face()).await.unwrap();
        assert_eq!(report.decision, MatchDecision::Verified);
    }

    #[tokio::test]
    async fn test_full_registration() {
        let h = harness();
        let mut last_progress = h.workflow.snapshot().await.progress;

        fill_personal(&h.workflow).await;
        verify_phone(&h).await;
        let progress = h.workflow.snapshot().await.progress;
        assert!(progress >= last_progress);
        last_progress = progress;

        fill_contacts(&h.workflow).await;
        let progress = h.workflow.snapshot().await.progress;
        assert!(progress >= last_progress);
        last_progress = progress;

        h.workflow.upload_document(document()).await.unwrap();
        let progress = h.workflow.snapshot().await.progress;
        assert!(progress >= last_progress);

        let report = h.workflow.capture_face(face()).await.unwrap();
        assert_eq!(report.view.state, RegistrationState::ReadyToSubmit);
        assert_eq!(report.view.progress, 1.0);

        let view = h.workflow.submit().await.unwrap();
        assert_eq!(view.state, RegistrationState::Submitted);
        assert!(view.registration.submitted_at().is_some());

        let archived = h.archive.get(h.workflow.id().await).await.unwrap();
        assert_eq!(archived, view.registration);
    }

    #[tokio::test]
    async fn test_phone_scenario() {
        let h = harness();
        h.workflow.set_person_field(PersonField::Phone, PHONE).await.unwrap();

        h.workflow.request_phone_code().await.unwrap();
        let code = h.gateway.last_code(PHONE).await.unwrap();
        let wrong = if code == "000000" { "999999" } else { "000000" };

        let confirmation = h.workflow.confirm_phone_code(wrong).await.unwrap();
        assert!(matches!(confirmation.result, VerificationResult::Mismatch { .. }));
        assert!(!confirmation.view.phone_verified);

        let confirmation = h.workflow.confirm_phone_code(&code).await.unwrap();
        assert!(confirmation.result.is_verified());
        assert!(confirmation.view.phone_verified);

        let view = h
            .workflow
            .set_person_field(PersonField::Phone, "0739876543")
            .await
            .unwrap();
        assert!(!view.phone_verified);
        assert!(view.missing.contains(&Requirement::PhoneVerification));
    }

    #[tokio::test]
    async fn test_code_for_old_number_does_not_verify_new_number() {
        let h = harness();
        h.workflow.set_person_field(PersonField::Phone, PHONE).await.unwrap();
        h.workflow.request_phone_code().await.unwrap();
        let code = h.gateway.last_code(PHONE).await.unwrap();

        h.workflow
            .set_person_field(PersonField::Phone, "0739876543")
            .await
            .unwrap();

        let result = h.workflow.confirm_phone_code(&code).await;
        assert!(matches!(result, Err(WorkflowError::NoActiveCode)));
        assert!(!h.workflow.snapshot().await.phone_verified);
    }

    #[tokio::test]
    async fn test_request_code_without_phone() {
        let h = harness();

        let result = h.workflow.request_phone_code().await;
        assert!(matches!(result, Err(WorkflowError::InvalidPhoneNumber(_))));
    }

    #[tokio::test]
    async fn test_capture_face_requires_document() {
        let h = harness();

        let result = h.workflow.capture_face(face()).await;
        assert!(matches!(result, Err(WorkflowError::DocumentMissing)));
        assert_eq!(h.matcher.calls(), 0);
        assert!(h.workflow.snapshot().await.registration.verdict().is_none());
    }

    #[tokio::test]
    async fn test_invalid_images_rejected_without_state_change() {
        let h = harness();

        let result = h.workflow.upload_document(CapturedImage::Inline(Vec::new())).await;
        assert!(matches!(result, Err(WorkflowError::InvalidImage(_))));
        assert_eq!(h.workflow.snapshot().await.state, RegistrationState::Empty);

        h.workflow.upload_document(document()).await.unwrap();
        let result = h.workflow.capture_face(CapturedImage::Reference(" ".into())).await;
        assert!(matches!(result, Err(WorkflowError::InvalidImage(_))));
        assert!(h.workflow.snapshot().await.registration.verdict().is_none());
    }

    #[tokio::test]
    async fn test_reupload_resets_readiness() {
        let h = harness();
        complete(&h).await;
        assert_eq!(h.workflow.snapshot().await.state, RegistrationState::ReadyToSubmit);

        let view = h.workflow.upload_document(document()).await.unwrap();
        assert_eq!(view.state, RegistrationState::InProgress);
        assert_eq!(view.missing, vec![Requirement::BiometricMatch]);
        assert!(matches!(
            h.workflow.submit().await,
            Err(WorkflowError::RegistrationIncomplete { .. })
        ));

        let report = h.workflow.capture_face(face()).await.unwrap();
        assert_eq!(report.view.state, RegistrationState::ReadyToSubmit);
        assert_eq!(report.view.registration.document_history().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_match_can_be_retried() {
        let h = harness();
        h.matcher.push_outcome(MatchOutcome::failed(0.12)).await;
        h.workflow.upload_document(document()).await.unwrap();

        let report = h.workflow.capture_face(face()).await.unwrap();
        assert_eq!(report.decision, MatchDecision::Failed);
        assert_eq!(
            report.view.registration.verdict().unwrap().status,
            VerdictStatus::Failed
        );

        let report = h.workflow.capture_face(face()).await.unwrap();
        assert_eq!(report.decision, MatchDecision::Verified);
        assert_eq!(report.confidence, Some(1.0));
        assert_eq!(h.matcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_matcher_unavailable_leaves_verdict_pending() {
        let h = harness();
        h.matcher.push_unavailable("connection refused").await;
        h.workflow.upload_document(document()).await.unwrap();

        let err = h.workflow.capture_face(face()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::MatcherUnavailable(_)));
        assert!(err.is_retryable());

        let view = h.workflow.snapshot().await;
        assert_eq!(
            view.registration.verdict().unwrap().status,
            VerdictStatus::Pending
        );

        let report = h.workflow.capture_face(face()).await.unwrap();
        assert_eq!(report.decision, MatchDecision::Verified);
    }

    #[tokio::test]
    async fn test_upload_during_comparison_discards_result() {
        let h = harness_with(ScriptedMatcher::accepting().with_latency(Duration::from_millis(200)));
        h.workflow.upload_document(document()).await.unwrap();

        let workflow = h.workflow.clone();
        let capture = tokio::spawn(async move { workflow.capture_face(face()).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let view = h.workflow.upload_document(document()).await.unwrap();
        assert!(view.registration.verdict().is_none());

        let result = capture.await.unwrap();
        assert!(matches!(
            result,
            Err(WorkflowError::ComparisonCancelled) | Err(WorkflowError::StaleComparison)
        ));

        let view = h.workflow.snapshot().await;
        assert!(view.registration.verdict().is_none());
        assert!(!view.registration.biometric_verified());
    }

    #[tokio::test]
    async fn test_newer_capture_supersedes_running_one() {
        let h = harness_with(ScriptedMatcher::accepting().with_latency(Duration::from_millis(200)));
        h.workflow.upload_document(document()).await.unwrap();

        let workflow = h.workflow.clone();
        let first = tokio::spawn(async move { workflow.capture_face(face()).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = h.workflow.capture_face(face()).await.unwrap();
        assert_eq!(second.decision, MatchDecision::Verified);

        let first = first.await.unwrap();
        assert!(matches!(
            first,
            Err(WorkflowError::ComparisonCancelled) | Err(WorkflowError::StaleComparison)
        ));
        assert!(h.workflow.snapshot().await.registration.verdict().is_some());
    }

    #[tokio::test]
    async fn test_cancel_face_capture() {
        let h = harness_with(ScriptedMatcher::accepting().with_latency(Duration::from_millis(500)));
        h.workflow.upload_document(document()).await.unwrap();

        let workflow = h.workflow.clone();
        let capture = tokio::spawn(async move { workflow.capture_face(face()).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (cancelled, view) = h.workflow.cancel_face_capture().await;
        assert!(cancelled);
        assert!(view.registration.verdict().is_none());

        let result = capture.await.unwrap();
        assert!(matches!(result, Err(WorkflowError::ComparisonCancelled)));

        let (cancelled, _) = h.workflow.cancel_face_capture().await;
        assert!(!cancelled);
    }

    #[tokio::test]
    async fn test_incomplete_submit_changes_nothing() {
        let h = harness();
        fill_personal(&h.workflow).await;
        let before = h.workflow.snapshot().await;

        let err = h.workflow.submit().await.unwrap_err();
        match err {
            WorkflowError::RegistrationIncomplete { missing } => {
                assert_eq!(
                    missing,
                    vec![
                        Requirement::PhoneVerification,
                        Requirement::PrimaryContact,
                        Requirement::SecondaryContact,
                        Requirement::IdentityDocument,
                        Requirement::BiometricMatch,
                    ]
                );
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let after = h.workflow.snapshot().await;
        assert_eq!(after.registration, before.registration);
        assert_eq!(h.archive.count().await, 0);
    }

    #[tokio::test]
    async fn test_submit_twice() {
        let h = harness();
        complete(&h).await;

        h.workflow.submit().await.unwrap();
        let result = h.workflow.submit().await;
        assert!(matches!(result, Err(WorkflowError::AlreadySubmitted)));
        assert_eq!(h.archive.count().await, 1);

        let result = h.workflow.set_person_field(PersonField::Address, "12 Long St").await;
        assert!(matches!(result, Err(WorkflowError::AlreadySubmitted)));
        let result = h.workflow.request_phone_code().await;
        assert!(matches!(result, Err(WorkflowError::AlreadySubmitted)));
    }

    #[tokio::test]
    async fn test_submit_succeeds_iff_progress_is_one() {
        let h = harness();
        fill_personal(&h.workflow).await;
        verify_phone(&h).await;
        fill_contacts(&h.workflow).await;
        h.workflow.upload_document(document()).await.unwrap();

        let view = h.workflow.snapshot().await;
        assert!(view.progress < 1.0);
        assert!(h.workflow.submit().await.is_err());

        h.workflow.capture_face(face()).await.unwrap();
        let view = h.workflow.snapshot().await;
        assert_eq!(view.progress, 1.0);
        assert!(h.workflow.submit().await.is_ok());
    }

    #[tokio::test]
    async fn test_archive_failure_leaves_registration_open() {
        let gateway = RecordingGateway::new();
        let mut archive = MockRegistrationArchive::new();
        archive
            .expect_store()
            .times(1)
            .returning(|_| Err(ArchiveError::Storage("disk full".into())));

        let documents = DocumentStore::default();
        let h = Harness {
            workflow: Arc::new(RegistrationWorkflow::new(Collaborators {
                verifier: ContactVerifier::new(Arc::new(gateway.clone()), VerifierConfig::default()),
                documents: documents.clone(),
                matcher: Arc::new(ScriptedMatcher::accepting()),
                archive: Arc::new(archive),
            })),
            gateway,
            matcher: ScriptedMatcher::accepting(),
            archive: MemoryArchive::new(),
            documents,
        };
        complete(&h).await;

        let err = h.workflow.submit().await.unwrap_err();
        assert!(matches!(err, WorkflowError::ArchiveFailed(_)));
        assert!(err.is_retryable());

        let view = h.workflow.snapshot().await;
        assert_eq!(view.state, RegistrationState::ReadyToSubmit);
        assert!(view.registration.submitted_at().is_none());
        assert_eq!(h.documents.count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_operations_are_serialized() {
        let h = harness();
        fill_personal(&h.workflow).await;

        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let workflow = h.workflow.clone();
                tokio::spawn(async move {
                    workflow
                        .set_person_field(PersonField::Address, &format!("{} Long Street", i))
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        let view = h.workflow.snapshot().await;
        let address = view.registration.person().address.clone().unwrap();
        assert!(address.ends_with("Long Street"));
    }
    #[tokio::test]
    async fn test_reupload_releases_superseded_payload() {
        let h = harness();

        h.workflow.upload_document(document()).await.unwrap();
        let first = h.workflow.snapshot().await.registration.document().unwrap().id;
        h.workflow.upload_document(document()).await.unwrap();
        h.workflow.upload_document(document()).await.unwrap();

        assert_eq!(h.documents.count().await, 1);
        assert!(h.documents.get(first).await.is_err());

        let view = h.workflow.snapshot().await;
        assert_eq!(view.registration.document_history().len(), 2);
        let current = view.registration.document().unwrap().id;
        assert!(h.documents.get(current).await.is_ok());
    }

    #[tokio::test]
    async fn test_submit_releases_payload() {
        let h = harness();
        complete(&h).await;
        assert_eq!(h.documents.count().await, 1);

        let view = h.workflow.submit().await.unwrap();
        assert_eq!(h.documents.count().await, 0);
        assert!(view.registration.document().is_some());
    }

    #[tokio::test]
    async fn test_release_documents_on_abandon() {
        let h = harness_with(ScriptedMatcher::accepting().with_latency(Duration::from_millis(500)));
        assert!(!h.workflow.release_documents().await);

        h.workflow.upload_document(document()).await.unwrap();
        let workflow = h.workflow.clone();
        let capture = tokio::spawn(async move { workflow.capture_face(face()).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(h.workflow.release_documents().await);
        assert_eq!(h.documents.count().await, 0);

        let result = capture.await.unwrap();
        assert!(matches!(result, Err(WorkflowError::ComparisonCancelled)));
    }

    #[tokio::test]
    async fn test_racing_upload_and_submit_never_archive_stale_verdict() {
        for _ in 0..20 {
            let h = harness();
            complete(&h).await;

            let uploader = h.workflow.clone();
            let submitter = h.workflow.clone();
            let (upload, submit) = tokio::join!(
                tokio::spawn(async move { uploader.upload_document(document()).await }),
                tokio::spawn(async move { submitter.submit().await }),
            );
            let (upload, submit) = (upload.unwrap(), submit.unwrap());

            match submit {
                Ok(view) => {
                    // Submit won: the upload must have been refused
                    assert!(matches!(upload, Err(WorkflowError::AlreadySubmitted)));
                    let archived = h.archive.get(view.registration.id()).await.unwrap();
                    let document_id = archived.document().unwrap().id;
                    let verdict = archived.verdict().unwrap();
                    assert_eq!(verdict.status, VerdictStatus::Verified);
                    assert_eq!(verdict.document_id, document_id);
                }
                Err(e) => {
                    // Upload won: the verdict no longer binds the new document
                    assert!(upload.is_ok());
                    match e {
                        WorkflowError::RegistrationIncomplete { missing } => {
                            assert_eq!(missing, vec![Requirement::BiometricMatch]);
                        }
                        other => panic!("unexpected error: {:?}", other),
                    }
                    assert_eq!(h.archive.count().await, 0);
                }
            }
        }
    }
}
