//! Value types owned by the registration aggregate.

use crate::biometric::MatchDecision;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Personal details of the registrant.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonRecord {
    pub full_name: String,
    pub id_number: String,
    pub email: Option<String>,
    pub phone: String,
    pub address: Option<String>,
}

/// Addressable fields of a [`PersonRecord`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PersonField {
    FullName,
    IdNumber,
    Email,
    Phone,
    Address,
}

impl PersonRecord {
    /// Write a trimmed value. Blank values clear optional fields.
    pub fn set(&mut self, field: PersonField, value: &str) {
        let value = value.trim();
        let optional = || (!value.is_empty()).then(|| value.to_string());

        match field {
            PersonField::FullName => self.full_name = value.to_string(),
            PersonField::IdNumber => self.id_number = value.to_string(),
            PersonField::Email => self.email = optional(),
            PersonField::Phone => self.phone = value.to_string(),
            PersonField::Address => self.address = optional(),
        }
    }
}

/// One emergency contact. Complete only when every field is filled in.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmergencyContact {
    pub name: String,
    pub id_number: String,
    pub phone: String,
    pub relationship: String,
}

impl EmergencyContact {
    pub fn new(
        name: impl Into<String>,
        id_number: impl Into<String>,
        phone: impl Into<String>,
        relationship: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            id_number: id_number.into(),
            phone: phone.into(),
            relationship: relationship.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        [&self.name, &self.id_number, &self.phone, &self.relationship]
            .iter()
            .all(|field| !field.trim().is_empty())
    }

    pub(crate) fn trimmed(self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            id_number: self.id_number.trim().to_string(),
            phone: self.phone.trim().to_string(),
            relationship: self.relationship.trim().to_string(),
        }
    }
}

/// Which of the two mandatory contacts is addressed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContactSlot {
    Primary,
    Secondary,
}

/// The ordered pair of emergency contacts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmergencyContacts {
    pub primary: EmergencyContact,
    pub secondary: EmergencyContact,
}

impl EmergencyContacts {
    pub fn get(&self, slot: ContactSlot) -> &EmergencyContact {
        match slot {
            ContactSlot::Primary => &self.primary,
            ContactSlot::Secondary => &self.secondary,
        }
    }

    pub(crate) fn set(&mut self, slot: ContactSlot, contact: EmergencyContact) {
        match slot {
            ContactSlot::Primary => self.primary = contact,
            ContactSlot::Secondary => self.secondary = contact,
        }
    }

    pub fn both_complete(&self) -> bool {
        self.primary.is_complete() && self.secondary.is_complete()
    }
}

/// Status of a biometric verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Pending,
    Verified,
    Failed,
}

impl From<MatchDecision> for VerdictStatus {
    fn from(decision: MatchDecision) -> Self {
        match decision {
            MatchDecision::Verified => VerdictStatus::Verified,
            MatchDecision::Failed => VerdictStatus::Failed,
        }
    }
}

/// Biometric verdict, bound to the document it was computed against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BiometricVerdict {
    pub status: VerdictStatus,
    pub document_id: Uuid,
    /// Comparison attempt that produced this verdict
    pub attempt_id: Uuid,
    pub confidence: Option<f64>,
    pub updated_at: DateTime<Utc>,
}
