//! HTTP request handlers.

use super::types::{
    CancelFaceResponse, ContactRequest, HealthResponse, ImageRequest, UpdatePersonRequest,
    VerifyCodeRequest, VerifyCodeResponse,
};
use super::AppState;
use crate::error::ServiceError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use registration_core::{
    CapturedImage, CodeHandle, ContactSlot, FaceMatchReport, RegistrationView,
    RegistrationWorkflow,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

async fn workflow(state: &AppState, id: Uuid) -> Result<Arc<RegistrationWorkflow>, ServiceError> {
    state.sessions.get(id).await.ok_or(ServiceError::NotFound(id))
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        sessions: state.sessions.count().await,
        active_codes: state.collaborators.verifier.active_count().await,
        documents: state.collaborators.documents.count().await,
    })
}

/// Start a new, empty registration.
pub async fn create_registration(
    State(state): State<AppState>,
) -> (StatusCode, Json<RegistrationView>) {
    let workflow = state.sessions.create(state.collaborators.clone()).await;
    (StatusCode::CREATED, Json(workflow.snapshot().await))
}

/// Current state, progress and unmet requirements.
pub async fn get_registration(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RegistrationView>, ServiceError> {
    let workflow = workflow(&state, id).await?;
    Ok(Json(workflow.snapshot().await))
}

/// Update any subset of the person fields.
pub async fn update_person(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdatePersonRequest>,
) -> Result<Json<RegistrationView>, ServiceError> {
    let workflow = workflow(&state, id).await?;

    let mut view = workflow.snapshot().await;
    for (field, value) in request.fields() {
        view = workflow.set_person_field(field, value).await?;
    }

    Ok(Json(view))
}

/// Replace the primary or secondary emergency contact.
pub async fn set_contact(
    State(state): State<AppState>,
    Path((id, slot)): Path<(Uuid, ContactSlot)>,
    Json(request): Json<ContactRequest>,
) -> Result<Json<RegistrationView>, ServiceError> {
    let workflow = workflow(&state, id).await?;
    Ok(Json(workflow.set_emergency_contact(slot, request.into()).await?))
}

/// Send a verification code to the phone number on file.
pub async fn request_phone_code(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<CodeHandle>), ServiceError> {
    let workflow = workflow(&state, id).await?;
    let handle = workflow.request_phone_code().await?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

/// Confirm a verification code.
pub async fn verify_phone_code(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<VerifyCodeRequest>,
) -> Result<Json<VerifyCodeResponse>, ServiceError> {
    let workflow = workflow(&state, id).await?;
    let confirmation = workflow.confirm_phone_code(&request.code).await?;

    Ok(Json(VerifyCodeResponse::new(
        confirmation.result,
        confirmation.view,
    )))
}

/// Upload an identity document, replacing any previous one.
pub async fn upload_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ImageRequest>,
) -> Result<Json<RegistrationView>, ServiceError> {
    let image = CapturedImage::try_from(request)?;
    let workflow = workflow(&state, id).await?;
    Ok(Json(workflow.upload_document(image).await?))
}

/// Capture a face and compare it against the current document.
///
/// Holds the request open while the matcher runs.
pub async fn capture_face(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ImageRequest>,
) -> Result<Json<FaceMatchReport>, ServiceError> {
    let face = CapturedImage::try_from(request)?;
    let workflow = workflow(&state, id).await?;
    Ok(Json(workflow.capture_face(face).await?))
}

/// Abandon an in-flight face comparison.
pub async fn cancel_face_capture(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelFaceResponse>, ServiceError> {
    let workflow = workflow(&state, id).await?;
    let (cancelled, registration) = workflow.cancel_face_capture().await;

    Ok(Json(CancelFaceResponse {
        cancelled,
        registration,
    }))
}

/// Finalize the registration.
pub async fn submit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RegistrationView>, ServiceError> {
    let workflow = workflow(&state, id).await?;
    let view = workflow.submit().await?;

    info!(registration_id = %id, "Registration submitted via API");
    Ok(Json(view))
}
