use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use tracing::info;

use crate::db::member_repository::MemberRepository;
use crate::db::organization_repository::OrganizationRepository;
use crate::errors::ApiError;
use crate::models::member::{MemberRole, MemberStatus};
use crate::models::organization::OrgSettingsPatch;
use crate::responses::ApiResponse;
use crate::routes::auth::claims::SessionClaims;
use crate::routes::auth::AuthSession;
use crate::services::authz::{OrgGuard, ADMIN_ROLES};
use crate::services::identity::IdentityService;
use crate::state::AppState;
use crate::utils::jwt::create_jwt;

#[derive(Debug, Deserialize)]
pub struct CreateOrganizationPayload {
    pub name: String,
}

// GET /api/organizations — the caller's organizations.
pub async fn list_my_organizations(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
) -> Result<Response, ApiError> {
    let user = app_state.gate.require_user(&claims).await?;
    let memberships = app_state.orgs.list_for_user(user.id).await?;
    Ok(ApiResponse::ok(memberships).into_response())
}

// POST /api/organizations — super-admin only. Creates the provider org
// first, mirrors it locally, and seats the caller as owner.
pub async fn create_organization(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Json(payload): Json<CreateOrganizationPayload>,
) -> Result<Response, ApiError> {
    let caller = app_state.gate.require_super_admin(&claims).await?;

    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::invalid_field("name", "Name is required"));
    }

    let provider_org = app_state.identity.create_organization(name).await?;
    let organization = app_state
        .orgs
        .create(&provider_org.external_id, name)
        .await?;
    let owner = app_state
        .members
        .create(
            organization.id,
            caller.id,
            MemberRole::Owner,
            MemberStatus::Active,
        )
        .await?;

    info!(org_id = %organization.id, slug = %organization.slug, "organization created");
    Ok(ApiResponse::created(serde_json::json!({
        "organization": organization,
        "owner": owner,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct SetActiveOrganizationPayload {
    pub external_org_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SetPrimaryAdminPayload {
    pub external_user_id: String,
}

// POST /api/organizations/set-active — reissues the session token with the
// new active-organization claim.
pub async fn set_active_organization(
    State(app_state): State<AppState>,
    jar: CookieJar,
    AuthSession(claims): AuthSession,
    Json(payload): Json<SetActiveOrganizationPayload>,
) -> Result<Response, ApiError> {
    let user = app_state.gate.require_user(&claims).await?;
    let organization = app_state
        .orgs
        .find_by_external_id(&payload.external_org_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Organization not found".to_string()))?;

    if !user.is_super_admin {
        let member = app_state
            .members
            .find(organization.id, user.id)
            .await?
            .ok_or(ApiError::NoMembership)?;
        if member.status == MemberStatus::Disabled {
            return Err(ApiError::MembershipNotActive);
        }
    }

    let new_claims = SessionClaims {
        sub: claims.sub,
        org: Some(organization.external_id.clone()),
        org_role: claims.org_role,
        exp: claims.exp,
        iss: String::new(),
        aud: String::new(),
    };
    let token = create_jwt(
        new_claims,
        &app_state.jwt_keys,
        &app_state.config.jwt_issuer,
        &app_state.config.jwt_audience,
    )
    .map_err(|err| ApiError::Internal(err.to_string()))?;

    let cookie = Cookie::build(("auth_token", token))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .build();
    Ok((jar.add(cookie), ApiResponse::ok(organization)).into_response())
}

// POST /api/organizations/primary-admin
pub async fn set_primary_admin(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Json(payload): Json<SetPrimaryAdminPayload>,
) -> Result<Response, ApiError> {
    let ctx = app_state
        .gate
        .require_org_access(&claims, OrgGuard::roles(ADMIN_ROLES))
        .await?;
    let target = app_state
        .members
        .find_by_external_user_id(ctx.organization.id, &payload.external_user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Member not found".to_string()))?;
    if target.status != MemberStatus::Active {
        return Err(ApiError::BadRequest(
            "Primary admin must be an active member".to_string(),
        ));
    }
    let organization = app_state
        .orgs
        .set_primary_admin(ctx.organization.id, target.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Organization not found".to_string()))?;
    Ok(ApiResponse::ok(organization).into_response())
}

// GET /api/organizations/settings
pub async fn get_settings(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
) -> Result<Response, ApiError> {
    let ctx = app_state
        .gate
        .require_org_access(&claims, OrgGuard::roles(ADMIN_ROLES))
        .await?;
    let settings = app_state.orgs.ensure_settings(ctx.organization.id).await?;
    Ok(ApiResponse::ok(settings).into_response())
}

// PATCH /api/organizations/settings
pub async fn update_settings(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Json(patch): Json<OrgSettingsPatch>,
) -> Result<Response, ApiError> {
    let ctx = app_state
        .gate
        .require_org_access(&claims, OrgGuard::roles(ADMIN_ROLES))
        .await?;
    if let Some(tz) = patch.timezone.as_deref() {
        if tz.trim().is_empty() {
            return Err(ApiError::invalid_field("timezone", "Timezone cannot be empty"));
        }
    }
    let settings = app_state
        .orgs
        .update_settings(ctx.organization.id, &patch)
        .await?;
    Ok(ApiResponse::ok(settings).into_response())
}
