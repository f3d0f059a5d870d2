//! Registration Core - identity-verification registration workflow.
//!
//! Gates submission of a registration on:
//! - Personal details and a phone number proven by a one-time code
//! - Two complete emergency contacts
//! - An identity document and a biometric match against it
//!
//! Delivery, matching and archiving are traits so the service crate can
//! plug in real collaborators and tests can plug in deterministic ones.

pub mod aggregate;
pub mod archive;
pub mod biometric;
pub mod document;
pub mod error;
pub mod phone;
pub mod verifier;
pub mod workflow;

pub use aggregate::{
    BiometricVerdict, ContactSlot, EmergencyContact, EmergencyContacts, PersonField, PersonRecord,
    RegistrationAggregate, RegistrationState, Requirement, VerdictStatus,
};
pub use archive::{ArchiveError, MemoryArchive, RegistrationArchive};
pub use biometric::{BiometricMatcher, MatchDecision, MatchOutcome, MatcherError, ScriptedMatcher};
pub use document::{CapturedImage, DocumentError, DocumentRecord, DocumentStore, StoredDocument};
pub use error::WorkflowError;
pub use phone::normalize_phone_number;
pub use verifier::{
    CodeHandle, CodeState, ContactVerifier, GatewayError, MessagingGateway, RecordingGateway,
    VerificationResult, VerifierConfig, VerifierError,
};
pub use workflow::{
    Collaborators, FaceMatchReport, PhoneConfirmation, RegistrationView, RegistrationWorkflow,
};
