//! API request and response types.

use crate::error::ServiceError;
use base64::{engine::general_purpose::STANDARD, Engine};
use registration_core::{
    CapturedImage, EmergencyContact, PersonField, RegistrationView, VerificationResult,
};
use serde::{Deserialize, Serialize};

/// Partial update of the person record. Absent fields are left unchanged;
/// an empty string clears an optional field.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePersonRequest {
    pub full_name: Option<String>,
    pub id_number: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

impl UpdatePersonRequest {
    /// Supplied fields, in a fixed order.
    pub fn fields(&self) -> Vec<(PersonField, &str)> {
        [
            (PersonField::FullName, &self.full_name),
            (PersonField::IdNumber, &self.id_number),
            (PersonField::Email, &self.email),
            (PersonField::Phone, &self.phone),
            (PersonField::Address, &self.address),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.as_deref().map(|v| (field, v)))
        .collect()
    }
}

/// Emergency contact as submitted. Missing fields leave the contact incomplete.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ContactRequest {
    pub name: String,
    pub id_number: String,
    pub phone: String,
    pub relationship: String,
}

impl From<ContactRequest> for EmergencyContact {
    fn from(request: ContactRequest) -> Self {
        EmergencyContact::new(
            request.name,
            request.id_number,
            request.phone,
            request.relationship,
        )
    }
}

/// Request to confirm a phone verification code.
#[derive(Debug, Deserialize)]
pub struct VerifyCodeRequest {
    pub code: String,
}

/// Response after confirming a code. A mismatch is not an error.
#[derive(Debug, Serialize)]
pub struct VerifyCodeResponse {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts_remaining: Option<u32>,
    pub registration: RegistrationView,
}

impl VerifyCodeResponse {
    pub fn new(result: VerificationResult, registration: RegistrationView) -> Self {
        let (verified, attempts_remaining) = match result {
            VerificationResult::Verified { .. } => (true, None),
            VerificationResult::Mismatch { attempts_remaining } => {
                (false, Some(attempts_remaining))
            }
        };

        Self {
            verified,
            attempts_remaining,
            registration,
        }
    }
}

/// Captured image, either inline (base64) or by reference. Exactly one
/// of the two must be present.
#[derive(Debug, Default, Deserialize)]
pub struct ImageRequest {
    pub image_base64: Option<String>,
    pub image_uri: Option<String>,
}

impl TryFrom<ImageRequest> for CapturedImage {
    type Error = ServiceError;

    fn try_from(request: ImageRequest) -> Result<Self, Self::Error> {
        match (request.image_base64, request.image_uri) {
            (Some(encoded), None) => STANDARD
                .decode(encoded.trim())
                .map(CapturedImage::Inline)
                .map_err(|e| ServiceError::BadRequest(format!("Invalid base64 image: {}", e))),
            (None, Some(uri)) => Ok(CapturedImage::Reference(uri)),
            _ => Err(ServiceError::BadRequest(
                "Provide exactly one of image_base64 or image_uri".into(),
            )),
        }
    }
}

/// Response after cancelling a face comparison.
#[derive(Debug, Serialize)]
pub struct CancelFaceResponse {
    pub cancelled: bool,
    pub registration: RegistrationView,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub sessions: usize,
    pub active_codes: usize,
    pub documents: usize,
}
