//! The registration aggregate: single consistency boundary for all
//! registration data.
//!
//! Completion is never cached. State, progress and the list of unmet
//! requirements are recomputed from the fields on every read, so a later
//! change (a new phone number, a re-uploaded document) moves the
//! registration backwards immediately.

mod types;

pub use types::*;

use crate::biometric::MatchOutcome;
use crate::document::DocumentRecord;
use crate::error::WorkflowError;
use crate::phone::normalize_phone_number;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Overall registration state, derived from the aggregate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    /// Nothing supplied yet
    Empty,
    /// Some information supplied, submission not yet allowed
    InProgress,
    /// Every gating requirement holds
    ReadyToSubmit,
    /// Finalized (terminal)
    Submitted,
}

/// A gating requirement for submission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    FullName,
    IdNumber,
    PhoneNumber,
    PhoneVerification,
    PrimaryContact,
    SecondaryContact,
    IdentityDocument,
    BiometricMatch,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Requirement::FullName => "full name",
            Requirement::IdNumber => "ID number",
            Requirement::PhoneNumber => "phone number",
            Requirement::PhoneVerification => "phone verification",
            Requirement::PrimaryContact => "primary emergency contact",
            Requirement::SecondaryContact => "secondary emergency contact",
            Requirement::IdentityDocument => "identity document",
            Requirement::BiometricMatch => "biometric match",
        };
        f.write_str(label)
    }
}

/// Everything known about one registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistrationAggregate {
    id: Uuid,
    created_at: DateTime<Utc>,
    person: PersonRecord,
    contacts: EmergencyContacts,
    /// Normalized number whose code was consumed
    verified_phone: Option<String>,
    document: Option<DocumentRecord>,
    /// Superseded documents, oldest first
    document_history: Vec<DocumentRecord>,
    verdict: Option<BiometricVerdict>,
    submitted_at: Option<DateTime<Utc>>,
}

impl Default for RegistrationAggregate {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrationAggregate {
    /// Start an empty registration.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            person: PersonRecord::default(),
            contacts: EmergencyContacts::default(),
            verified_phone: None,
            document: None,
            document_history: Vec::new(),
            verdict: None,
            submitted_at: None,
        }
    }

    // Accessors

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn person(&self) -> &PersonRecord {
        &self.person
    }

    pub fn contacts(&self) -> &EmergencyContacts {
        &self.contacts
    }

    pub fn document(&self) -> Option<&DocumentRecord> {
        self.document.as_ref()
    }

    pub fn document_history(&self) -> &[DocumentRecord] {
        &self.document_history
    }

    pub fn verdict(&self) -> Option<&BiometricVerdict> {
        self.verdict.as_ref()
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted_at.is_some()
    }

    // Derived predicates

    /// True only while the proven number equals the current phone number.
    pub fn phone_verified(&self) -> bool {
        match (&self.verified_phone, normalize_phone_number(&self.person.phone)) {
            (Some(verified), Ok(current)) => *verified == current,
            _ => false,
        }
    }

    /// True only for a Verified verdict bound to the current document.
    pub fn biometric_verified(&self) -> bool {
        match (&self.verdict, &self.document) {
            (Some(verdict), Some(document)) => {
                verdict.status == VerdictStatus::Verified && verdict.document_id == document.id
            }
            _ => false,
        }
    }

    fn personal_group_complete(&self) -> bool {
        !self.person.full_name.is_empty()
            && !self.person.id_number.is_empty()
            && !self.person.phone.is_empty()
            && self.phone_verified()
    }

    fn is_blank(&self) -> bool {
        self.person == PersonRecord::default()
            && self.contacts == EmergencyContacts::default()
            && self.verified_phone.is_none()
            && self.document.is_none()
            && self.verdict.is_none()
    }

    /// Every unmet submission requirement, in checklist order.
    pub fn missing_requirements(&self) -> Vec<Requirement> {
        let mut missing = Vec::new();

        if self.person.full_name.is_empty() {
            missing.push(Requirement::FullName);
        }
        if self.person.id_number.is_empty() {
            missing.push(Requirement::IdNumber);
        }
        if self.person.phone.is_empty() {
            missing.push(Requirement::PhoneNumber);
        }
        if !self.phone_verified() {
            missing.push(Requirement::PhoneVerification);
        }
        if !self.contacts.primary.is_complete() {
            missing.push(Requirement::PrimaryContact);
        }
        if !self.contacts.secondary.is_complete() {
            missing.push(Requirement::SecondaryContact);
        }
        if self.document.is_none() {
            missing.push(Requirement::IdentityDocument);
        }
        if !self.biometric_verified() {
            missing.push(Requirement::BiometricMatch);
        }

        missing
    }

    pub fn state(&self) -> RegistrationState {
        if self.is_submitted() {
            RegistrationState::Submitted
        } else if self.missing_requirements().is_empty() {
            RegistrationState::ReadyToSubmit
        } else if self.is_blank() {
            RegistrationState::Empty
        } else {
            RegistrationState::InProgress
        }
    }

    /// Fraction of the four gating groups satisfied, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        let groups = [
            self.personal_group_complete(),
            self.contacts.both_complete(),
            self.document.is_some(),
            self.biometric_verified(),
        ];
        groups.iter().filter(|done| **done).count() as f64 / groups.len() as f64
    }

    // Mutations, reachable only through the workflow

    pub(crate) fn ensure_open(&self) -> Result<(), WorkflowError> {
        if self.is_submitted() {
            Err(WorkflowError::AlreadySubmitted)
        } else {
            Ok(())
        }
    }

    pub(crate) fn set_person_field(
        &mut self,
        field: PersonField,
        value: &str,
    ) -> Result<(), WorkflowError> {
        self.ensure_open()?;
        self.person.set(field, value);

        if field == PersonField::Phone {
            let still_proven = match (&self.verified_phone, normalize_phone_number(value)) {
                (Some(verified), Ok(current)) => *verified == current,
                _ => false,
            };
            if !still_proven {
                self.verified_phone = None;
            }
        }
        Ok(())
    }

    pub(crate) fn set_emergency_contact(
        &mut self,
        slot: ContactSlot,
        contact: EmergencyContact,
    ) -> Result<(), WorkflowError> {
        self.ensure_open()?;
        self.contacts.set(slot, contact.trimmed());
        Ok(())
    }

    pub(crate) fn record_phone_verified(&mut self, phone_number: String) -> Result<(), WorkflowError> {
        self.ensure_open()?;
        self.verified_phone = Some(phone_number);
        Ok(())
    }

    /// Make `record` current. Any verdict bound to the old document is dropped.
    pub(crate) fn replace_document(&mut self, record: DocumentRecord) -> Result<(), WorkflowError> {
        self.ensure_open()?;
        if let Some(previous) = self.document.replace(record) {
            self.document_history.push(previous);
        }
        self.verdict = None;
        Ok(())
    }

    /// Mark a comparison attempt as in flight for the current document.
    pub(crate) fn begin_match(&mut self, attempt_id: Uuid) -> Result<Uuid, WorkflowError> {
        self.ensure_open()?;
        let document_id = self
            .document
            .as_ref()
            .map(|d| d.id)
            .ok_or(WorkflowError::DocumentMissing)?;

        self.verdict = Some(BiometricVerdict {
            status: VerdictStatus::Pending,
            document_id,
            attempt_id,
            confidence: None,
            updated_at: Utc::now(),
        });
        Ok(document_id)
    }

    /// Apply a comparison result if it still belongs to the pending attempt
    /// on the current document.
    pub(crate) fn settle_match(
        &mut self,
        attempt_id: Uuid,
        outcome: &MatchOutcome,
    ) -> Result<VerdictStatus, WorkflowError> {
        let current_document = self.document.as_ref().map(|d| d.id);

        match self.verdict.as_mut() {
            Some(verdict)
                if verdict.attempt_id == attempt_id
                    && verdict.status == VerdictStatus::Pending
                    && Some(verdict.document_id) == current_document =>
            {
                verdict.status = outcome.decision.into();
                verdict.confidence = outcome.confidence;
                verdict.updated_at = Utc::now();
                Ok(verdict.status)
            }
            _ => Err(WorkflowError::StaleComparison),
        }
    }

    /// Drop a pending verdict left by a cancelled attempt.
    pub(crate) fn clear_pending(&mut self, attempt_id: Uuid) -> bool {
        let pending = matches!(
            &self.verdict,
            Some(v) if v.attempt_id == attempt_id && v.status == VerdictStatus::Pending
        );
        if pending {
            self.verdict = None;
        }
        pending
    }

    pub(crate) fn mark_submitted(&mut self, at: DateTime<Utc>) -> Result<(), WorkflowError> {
        self.ensure_open()?;
        let missing = self.missing_requirements();
        if !missing.is_empty() {
            return Err(WorkflowError::RegistrationIncomplete { missing });
        }
        self.submitted_at = Some(at);
        Ok(())
    }
}
