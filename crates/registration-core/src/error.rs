//! Workflow error taxonomy.

use crate::aggregate::Requirement;
use crate::archive::ArchiveError;
use crate::biometric::MatcherError;
use crate::document::DocumentError;
use crate::verifier::VerifierError;
use thiserror::Error;

/// Errors returned by [`crate::RegistrationWorkflow`] operations.
///
/// None of these leave the aggregate partially mutated. Business outcomes
/// (a code mismatch, a failed face match) are values, not errors.
#[derive(Debug, Error)]
pub enum WorkflowError {
    // Validation
    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Invalid verification code: {0}")]
    InvalidCode(String),

    // Sequencing
    #[error("No identity document has been uploaded")]
    DocumentMissing,

    #[error("No active verification code")]
    NoActiveCode,

    #[error("Verification code expired")]
    CodeExpired,

    #[error("Verification code was superseded by a newer code")]
    CodeSuperseded,

    #[error("Registration already submitted")]
    AlreadySubmitted,

    #[error("Registration incomplete, missing: {}", join_requirements(.missing))]
    RegistrationIncomplete { missing: Vec<Requirement> },

    // Face comparison lifecycle
    #[error("Face comparison was cancelled")]
    ComparisonCancelled,

    #[error("Face comparison no longer targets the current document")]
    StaleComparison,

    // Dependent capabilities
    #[error("Biometric matcher unavailable: {0}")]
    MatcherUnavailable(String),

    #[error("Code delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Archiving the registration failed: {0}")]
    ArchiveFailed(String),
}

impl WorkflowError {
    /// Transient failures of a collaborator; the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkflowError::MatcherUnavailable(_)
                | WorkflowError::DeliveryFailed(_)
                | WorkflowError::ArchiveFailed(_)
        )
    }
}

fn join_requirements(missing: &[Requirement]) -> String {
    missing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<VerifierError> for WorkflowError {
    fn from(e: VerifierError) -> Self {
        match e {
            VerifierError::InvalidPhoneNumber(reason) => WorkflowError::InvalidPhoneNumber(reason),
            VerifierError::InvalidCode(reason) => WorkflowError::InvalidCode(reason),
            VerifierError::NoActiveCode => WorkflowError::NoActiveCode,
            VerifierError::CodeExpired => WorkflowError::CodeExpired,
            VerifierError::CodeSuperseded => WorkflowError::CodeSuperseded,
            VerifierError::DeliveryFailed(e) => WorkflowError::DeliveryFailed(e.to_string()),
        }
    }
}

impl From<DocumentError> for WorkflowError {
    fn from(e: DocumentError) -> Self {
        match e {
            DocumentError::InvalidImage(reason) => WorkflowError::InvalidImage(reason),
            DocumentError::NotFound(_) => WorkflowError::DocumentMissing,
        }
    }
}

impl From<MatcherError> for WorkflowError {
    fn from(e: MatcherError) -> Self {
        match e {
            MatcherError::Unavailable(reason) => WorkflowError::MatcherUnavailable(reason),
        }
    }
}

impl From<ArchiveError> for WorkflowError {
    fn from(e: ArchiveError) -> Self {
        WorkflowError::ArchiveFailed(e.to_string())
    }
}
