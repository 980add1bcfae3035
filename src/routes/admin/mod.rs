//! Super-admin console: cross-organization management. The whole subtree is
//! gated by middleware; handlers assume a verified platform operator.

use axum::{
    body::Body,
    extract::{FromRequestParts, Path, Query, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use tracing::info;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::db::invitation_repository::InvitationRepository;
use crate::db::member_repository::MemberRepository;
use crate::db::organization_repository::OrganizationRepository;
use crate::db::user_repository::UserRepository;
use crate::errors::ApiError;
use crate::models::invitation::InvitationStatus;
use crate::models::member::{MemberFilters, MemberRole, MemberStatus};
use crate::responses::ApiResponse;
use crate::routes::auth::AuthSession;
use crate::routes::members::{apply_member_patch, UpdateMemberPayload};
use crate::services::identity::IdentityService;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
struct Paginated<T> {
    data: Vec<T>,
    total: i64,
    page: i64,
    limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct SetSuperAdminPayload {
    pub is_super_admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetUserDisabledPayload {
    pub is_disabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct RenameOrganizationPayload {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct MemberListQuery {
    pub role: Option<MemberRole>,
    pub status: Option<MemberStatus>,
}

#[derive(Debug, Deserialize)]
pub struct InvitationListQuery {
    pub status: Option<InvitationStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/organizations",
            get(list_organizations).post(crate::routes::organizations::create_organization),
        )
        .route(
            "/organizations/{org_id}",
            get(get_organization)
                .patch(rename_organization)
                .delete(delete_organization),
        )
        .route("/organizations/{org_id}/members", get(list_org_members))
        .route(
            "/organizations/{org_id}/members/{external_user_id}",
            patch(update_org_member),
        )
        .route(
            "/organizations/{org_id}/invitations",
            get(list_org_invitations),
        )
        .route("/users", get(list_users))
        .route("/users/{user_id}/super-admin", post(set_super_admin))
        .route("/users/{user_id}/disabled", post(set_user_disabled))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            super_admin_gate,
        ))
}

async fn super_admin_gate(
    State(app_state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    let (mut parts, body) = req.into_parts();
    let claims = match AuthSession::from_request_parts(&mut parts, &app_state).await {
        Ok(AuthSession(claims)) => claims,
        Err(err) => return Err(err.into_response()),
    };
    if let Err(err) = app_state.gate.require_super_admin(&claims).await {
        return Err(err.into_response());
    }
    Ok(next.run(Request::from_parts(parts, body)).await)
}

// GET /api/admin/organizations
pub async fn list_organizations(
    State(app_state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(25);
    let (data, total) = app_state
        .orgs
        .list(page, limit, query.search.as_deref())
        .await?;
    Ok(ApiResponse::ok(Paginated {
        data,
        total,
        page,
        limit,
    })
    .into_response())
}

// GET /api/admin/organizations/{org_id}
pub async fn get_organization(
    State(app_state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let organization = app_state
        .orgs
        .find_by_id(org_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Organization not found".to_string()))?;
    let settings = app_state.orgs.ensure_settings(org_id).await?;
    let members = app_state
        .members
        .list_by_org(org_id, &MemberFilters::default())
        .await?;
    Ok(ApiResponse::ok(json!({
        "organization": organization,
        "settings": settings,
        "member_count": members.len(),
    }))
    .into_response())
}

// PATCH /api/admin/organizations/{org_id} — local name correction; the
// provider-synced name wins again on the next org sync event.
pub async fn rename_organization(
    State(app_state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Json(payload): Json<RenameOrganizationPayload>,
) -> Result<Response, ApiError> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::invalid_field("name", "Name is required"));
    }
    let organization = app_state
        .orgs
        .rename(org_id, name)
        .await?
        .ok_or_else(|| ApiError::NotFound("Organization not found".to_string()))?;
    Ok(ApiResponse::ok(organization).into_response())
}

// DELETE /api/admin/organizations/{org_id} — provider first, local mirror
// after; a failed remote delete leaves everything in place.
pub async fn delete_organization(
    State(app_state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let organization = app_state
        .orgs
        .find_by_id(org_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Organization not found".to_string()))?;

    app_state
        .identity
        .delete_organization(&organization.external_id)
        .await?;
    app_state
        .orgs
        .delete_by_external_id(&organization.external_id)
        .await?;

    info!(%org_id, slug = %organization.slug, "organization deleted");
    Ok(ApiResponse::ok(json!({ "deleted": true })).into_response())
}

// GET /api/admin/organizations/{org_id}/members
pub async fn list_org_members(
    State(app_state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Query(query): Query<MemberListQuery>,
) -> Result<Response, ApiError> {
    let filters = MemberFilters {
        role: query.role,
        status: query.status,
    };
    let members = app_state.members.list_by_org(org_id, &filters).await?;
    Ok(ApiResponse::ok(members).into_response())
}

// PATCH /api/admin/organizations/{org_id}/members/{external_user_id}
pub async fn update_org_member(
    State(app_state): State<AppState>,
    Path((org_id, external_user_id)): Path<(Uuid, String)>,
    Json(payload): Json<UpdateMemberPayload>,
) -> Result<Response, ApiError> {
    let member = apply_member_patch(&app_state, org_id, &external_user_id, &payload).await?;
    Ok(ApiResponse::ok(member).into_response())
}

// GET /api/admin/organizations/{org_id}/invitations
pub async fn list_org_invitations(
    State(app_state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Query(query): Query<InvitationListQuery>,
) -> Result<Response, ApiError> {
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(25);
    let (data, total) = app_state
        .invitations
        .list_by_org(org_id, query.status, page, limit)
        .await?;
    Ok(ApiResponse::ok(Paginated {
        data,
        total,
        page,
        limit,
    })
    .into_response())
}

// GET /api/admin/users
pub async fn list_users(
    State(app_state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(25);
    let (data, total) = app_state
        .users
        .list(page, limit, query.search.as_deref())
        .await?;
    Ok(ApiResponse::ok(Paginated {
        data,
        total,
        page,
        limit,
    })
    .into_response())
}

// POST /api/admin/users/{user_id}/super-admin
pub async fn set_super_admin(
    State(app_state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<SetSuperAdminPayload>,
) -> Result<Response, ApiError> {
    let user = app_state
        .users
        .set_super_admin(user_id, payload.is_super_admin)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    Ok(ApiResponse::ok(user).into_response())
}

// POST /api/admin/users/{user_id}/disabled — mirrors provider-side user
// deletion/suspension; a disabled user fails every guard.
pub async fn set_user_disabled(
    State(app_state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<SetUserDisabledPayload>,
) -> Result<Response, ApiError> {
    let user = app_state
        .users
        .set_disabled(user_id, payload.is_disabled)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    Ok(ApiResponse::ok(user).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_app_state;

    #[tokio::test]
    async fn admin_subtree_is_gated_by_middleware() {
        use axum::http::StatusCode;
        use std::time::{SystemTime, UNIX_EPOCH};
        use tower::ServiceExt;

        let (state, db, _identity) = test_app_state();
        db.seed_user("user_plain");
        let app = Router::new()
            .nest("/api/admin", router(state.clone()))
            .with_state(state.clone());

        // No credentials at all.
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/admin/users")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Signed in, but not a platform operator.
        let claims = crate::routes::auth::claims::SessionClaims {
            sub: "user_plain".into(),
            org: None,
            org_role: None,
            exp: (SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs()
                + 3600) as usize,
            iss: String::new(),
            aud: String::new(),
        };
        let token = crate::utils::jwt::create_jwt(
            claims,
            &state.jwt_keys,
            &state.config.jwt_issuer,
            &state.config.jwt_audience,
        )
        .unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/admin/users")
                    .header("cookie", format!("auth_token={token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn set_super_admin_flags_and_unflags() {
        let (state, db, _identity) = test_app_state();
        let user = db.seed_user("user_target");

        let response = set_super_admin(
            State(state.clone()),
            Path(user.id),
            Json(SetSuperAdminPayload {
                is_super_admin: true,
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        assert!(db.users.lock().unwrap()[0].is_super_admin);

        set_super_admin(
            State(state),
            Path(user.id),
            Json(SetSuperAdminPayload {
                is_super_admin: false,
            }),
        )
        .await
        .unwrap();
        assert!(!db.users.lock().unwrap()[0].is_super_admin);
    }

    #[tokio::test]
    async fn set_super_admin_unknown_user_is_not_found() {
        let (state, _db, _identity) = test_app_state();
        let err = set_super_admin(
            State(state),
            Path(Uuid::new_v4()),
            Json(SetSuperAdminPayload {
                is_super_admin: true,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn org_detail_includes_settings_and_member_count() {
        let (state, db, _identity) = test_app_state();
        let org = db.seed_org("org_1", "Acme");
        let user = db.seed_user("user_1");
        db.seed_member(
            org.id,
            user.id,
            MemberRole::Owner,
            MemberStatus::Active,
        );

        let response = get_organization(State(state), Path(org.id)).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), 8192).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["data"]["member_count"], 1);
        assert_eq!(json["data"]["settings"]["timezone"], "UTC");
    }
}
