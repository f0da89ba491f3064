use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use consent_core::{Choice, ConsentError, LineItemError, LinkStatus};
use consent_platform::DecisionResponse;
use serde_json::json;
use tracing::error;

/// Error answer for the operator endpoints: `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    Consent(ConsentError),
    BadRequest(String),
    Unavailable(&'static str),
}

impl From<ConsentError> for ApiError {
    fn from(err: ConsentError) -> Self {
        Self::Consent(err)
    }
}

impl From<LineItemError> for ApiError {
    fn from(err: LineItemError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Unavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, message.to_string()),
            ApiError::Consent(err) => {
                let status = consent_status(&err);
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    error!(error = %err, "request failed");
                    (status, "internal error".to_string())
                } else {
                    (status, err.to_string())
                }
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn consent_status(err: &ConsentError) -> StatusCode {
    match err {
        ConsentError::TokenExpired | ConsentError::LinkExpired(_) => StatusCode::GONE,
        ConsentError::TokenInvalid | ConsentError::Invalid(_) => StatusCode::BAD_REQUEST,
        ConsentError::LinkNotFound(_)
        | ConsentError::OfferNotFound(_)
        | ConsentError::CustomerNotFound(_) => StatusCode::NOT_FOUND,
        ConsentError::AlreadyFinal { .. }
        | ConsentError::IllegalTransition { .. }
        | ConsentError::NotAgreed { .. } => StatusCode::CONFLICT,
        ConsentError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Status code and `status` word for a failed agree/reject call.
pub fn decision_failure(err: &ConsentError, choice: Choice) -> (StatusCode, &'static str) {
    match err {
        ConsentError::TokenExpired | ConsentError::LinkExpired(_) => (StatusCode::GONE, "expired"),
        ConsentError::TokenInvalid => (StatusCode::BAD_REQUEST, "invalid"),
        ConsentError::LinkNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        ConsentError::AlreadyFinal {
            status: LinkStatus::Agreed,
            ..
        } if choice == Choice::Agreed => (StatusCode::OK, "already_agreed"),
        ConsentError::AlreadyFinal { .. } => (StatusCode::OK, "already_final"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "error"),
    }
}

pub fn decision_reply(status: StatusCode, word: &str) -> (StatusCode, Json<DecisionResponse>) {
    (
        status,
        Json(DecisionResponse {
            status: word.to_string(),
        }),
    )
}

/// Status code and message for the landing page.
pub fn landing_failure(err: &ConsentError) -> (StatusCode, &'static str) {
    match err {
        ConsentError::TokenExpired | ConsentError::LinkExpired(_) => {
            (StatusCode::GONE, "Link expired.")
        }
        ConsentError::TokenInvalid => (StatusCode::BAD_REQUEST, "Invalid link."),
        ConsentError::LinkNotFound(_) => (StatusCode::NOT_FOUND, "Not found."),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong."),
    }
}
