use std::collections::HashMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::db::member_repository::MemberLedgerError;
use crate::services::identity::IdentityServiceError;

/// Application error taxonomy. Domain logic returns these; the HTTP boundary
/// serializes them into the uniform `{ ok: false, error, code }` envelope.
/// Anything not in the taxonomy is normalized to `INTERNAL_ERROR` and logged
/// server-side; internal detail never crosses the boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthenticated,
    #[error("{0}")]
    Forbidden(String),
    #[error("No active organization selected")]
    NoActiveOrg,
    #[error("Not a member of this organization")]
    NoMembership,
    #[error("Membership is not active")]
    MembershipNotActive,
    #[error("Insufficient role for this action")]
    InsufficientRole,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("Validation failed")]
    Validation(HashMap<String, Vec<String>>),
    #[error("{0}")]
    Conflict(String),
    #[error("Already a member of this organization")]
    AlreadyMember,
    #[error("Too many requests. Please wait a moment and try again.")]
    RateLimited,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("identity provider error: {0}")]
    Provider(#[from] IdentityServiceError),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_)
            | ApiError::NoMembership
            | ApiError::MembershipNotActive
            | ApiError::InsufficientRole => StatusCode::FORBIDDEN,
            ApiError::NoActiveOrg | ApiError::BadRequest(_) | ApiError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) | ApiError::AlreadyMember => StatusCode::CONFLICT,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Database(_) | ApiError::Provider(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated => "UNAUTHENTICATED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NoActiveOrg => "NO_ACTIVE_ORG",
            ApiError::NoMembership => "NO_MEMBERSHIP",
            ApiError::MembershipNotActive => "MEMBERSHIP_NOT_ACTIVE",
            ApiError::InsufficientRole => "INSUFFICIENT_ROLE",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::AlreadyMember => "ALREADY_MEMBER",
            ApiError::RateLimited => "RATE_LIMITED",
            ApiError::Database(_) | ApiError::Provider(_) | ApiError::Internal(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    fn user_message(&self) -> String {
        match self {
            ApiError::Database(err) => {
                error!(?err, "database error");
                "Something went wrong".to_string()
            }
            ApiError::Provider(err) => {
                error!(?err, "identity provider error");
                "Something went wrong".to_string()
            }
            ApiError::Internal(msg) => {
                error!(%msg, "internal error");
                "Something went wrong".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Builds a `VALIDATION_ERROR` with a single field message.
    pub fn invalid_field(field: &str, message: &str) -> ApiError {
        let mut fields = HashMap::new();
        fields.insert(field.to_string(), vec![message.to_string()]);
        ApiError::Validation(fields)
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    ok: bool,
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    field_errors: Option<HashMap<String, Vec<String>>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let field_errors = match &self {
            ApiError::Validation(fields) => Some(fields.clone()),
            _ => None,
        };
        let body = ErrorEnvelope {
            ok: false,
            error: self.user_message(),
            code: self.code(),
            field_errors,
        };
        (status, Json(body)).into_response()
    }
}

impl From<MemberLedgerError> for ApiError {
    fn from(err: MemberLedgerError) -> Self {
        match err {
            MemberLedgerError::AlreadyExists
            | MemberLedgerError::OwnerExists
            | MemberLedgerError::AlreadyCoach => ApiError::Conflict(err.to_string()),
            MemberLedgerError::NotFound => ApiError::NotFound(err.to_string()),
            MemberLedgerError::PromoteToOwner
            | MemberLedgerError::LastOwner
            | MemberLedgerError::OwnerImmutable
            | MemberLedgerError::OwnerDisable
            | MemberLedgerError::OwnerRemove
            | MemberLedgerError::NotACoach => ApiError::BadRequest(err.to_string()),
            MemberLedgerError::Database(e) => ApiError::Database(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_expected_status_codes() {
        assert_eq!(ApiError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::NoActiveOrg.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NoMembership.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::AlreadyMember.status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::RateLimited.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn internal_detail_does_not_cross_the_boundary() {
        let resp = ApiError::Internal("secret connection string".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(resp.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["code"], "INTERNAL_ERROR");
        assert!(!json["error"].as_str().unwrap().contains("secret"));
    }

    #[tokio::test]
    async fn validation_errors_carry_field_maps() {
        let resp = ApiError::invalid_field("email", "Email is required").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(resp.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "VALIDATION_ERROR");
        assert_eq!(json["field_errors"]["email"][0], "Email is required");
    }

    #[test]
    fn ledger_errors_map_into_the_taxonomy() {
        let err: ApiError = MemberLedgerError::LastOwner.into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Organization must have an owner");

        let err: ApiError = MemberLedgerError::AlreadyExists.into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }
}
