use axum::{
    extract::State,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::db::organization_repository::OrganizationRepository;
use crate::errors::ApiError;
use crate::responses::ApiResponse;
use crate::routes::auth::AuthSession;
use crate::state::AppState;

// GET /api/me
pub async fn get_me(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
) -> Result<Response, ApiError> {
    let user = app_state.gate.require_user(&claims).await?;
    let memberships = app_state.orgs.list_for_user(user.id).await?;
    Ok(ApiResponse::ok(json!({
        "user": user,
        "active_org": claims.org,
        "memberships": memberships,
    }))
    .into_response())
}
