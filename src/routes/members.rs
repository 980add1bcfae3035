use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::db::member_repository::MemberRepository;
use crate::errors::ApiError;
use crate::models::member::{Member, MemberFilters, MemberRole, MemberStatus};
use crate::responses::ApiResponse;
use crate::routes::auth::AuthSession;
use crate::services::authz::{OrgGuard, ADMIN_ROLES};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListMembersQuery {
    pub role: Option<MemberRole>,
    pub status: Option<MemberStatus>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberPayload {
    pub role: Option<MemberRole>,
    pub status: Option<MemberStatus>,
    pub disabled_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConvertFromCoachPayload {
    pub role: MemberRole,
}

/// Applies a role and/or status patch through the ledger. Shared with the
/// super-admin console.
pub(crate) async fn apply_member_patch(
    app_state: &AppState,
    org_id: uuid::Uuid,
    external_user_id: &str,
    payload: &UpdateMemberPayload,
) -> Result<Member, ApiError> {
    if payload.role.is_none() && payload.status.is_none() {
        return Err(ApiError::BadRequest("Nothing to update".to_string()));
    }

    let target = app_state
        .members
        .find_by_external_user_id(org_id, external_user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Member not found".to_string()))?;

    let mut member = None;
    if let Some(role) = payload.role {
        member = Some(app_state.members.set_role(org_id, target.user_id, role).await?);
    }
    if let Some(status) = payload.status {
        member = Some(
            app_state
                .members
                .set_status(
                    org_id,
                    target.user_id,
                    status,
                    payload.disabled_reason.as_deref(),
                )
                .await?,
        );
    }
    // One of the branches ran; both return the fresh row.
    member.ok_or_else(|| ApiError::Internal("member patch applied nothing".to_string()))
}

// GET /api/members
pub async fn list_members(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Query(query): Query<ListMembersQuery>,
) -> Result<Response, ApiError> {
    let ctx = app_state
        .gate
        .require_org_access(&claims, OrgGuard::any_member())
        .await?;
    let filters = MemberFilters {
        role: query.role,
        status: query.status,
    };
    let members = app_state
        .members
        .list_by_org(ctx.organization.id, &filters)
        .await?;
    Ok(ApiResponse::ok(members).into_response())
}

// GET /api/members/{external_user_id}
pub async fn get_member(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(external_user_id): Path<String>,
) -> Result<Response, ApiError> {
    let ctx = app_state
        .gate
        .require_org_access(&claims, OrgGuard::any_member())
        .await?;
    let member = app_state
        .members
        .find_by_external_user_id(ctx.organization.id, &external_user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Member not found".to_string()))?;
    Ok(ApiResponse::ok(member).into_response())
}

// PATCH /api/members/{external_user_id}
pub async fn update_member(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(external_user_id): Path<String>,
    Json(payload): Json<UpdateMemberPayload>,
) -> Result<Response, ApiError> {
    let ctx = app_state
        .gate
        .require_org_access(&claims, OrgGuard::roles(ADMIN_ROLES))
        .await?;
    let member =
        apply_member_patch(&app_state, ctx.organization.id, &external_user_id, &payload).await?;
    Ok(ApiResponse::ok(member).into_response())
}

// DELETE /api/members/{external_user_id}
pub async fn remove_member(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(external_user_id): Path<String>,
) -> Result<Response, ApiError> {
    let ctx = app_state
        .gate
        .require_org_access(&claims, OrgGuard::roles(ADMIN_ROLES))
        .await?;
    let target = app_state
        .members
        .find_by_external_user_id(ctx.organization.id, &external_user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Member not found".to_string()))?;
    app_state
        .members
        .remove(ctx.organization.id, target.user_id)
        .await?;
    Ok(ApiResponse::ok(json!({ "removed": true })).into_response())
}

// POST /api/members/{external_user_id}/convert-to-coach
pub async fn convert_to_coach(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(external_user_id): Path<String>,
) -> Result<Response, ApiError> {
    let ctx = app_state
        .gate
        .require_org_access(&claims, OrgGuard::roles(ADMIN_ROLES))
        .await?;
    let target = app_state
        .members
        .find_by_external_user_id(ctx.organization.id, &external_user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Member not found".to_string()))?;
    let member = app_state
        .members
        .convert_to_coach(ctx.organization.id, target.user_id)
        .await?;
    Ok(ApiResponse::ok(member).into_response())
}

// POST /api/members/{external_user_id}/convert-from-coach
pub async fn convert_from_coach(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(external_user_id): Path<String>,
    Json(payload): Json<ConvertFromCoachPayload>,
) -> Result<Response, ApiError> {
    let ctx = app_state
        .gate
        .require_org_access(&claims, OrgGuard::roles(ADMIN_ROLES))
        .await?;
    let target = app_state
        .members
        .find_by_external_user_id(ctx.organization.id, &external_user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Member not found".to_string()))?;
    let member = app_state
        .members
        .convert_from_coach(ctx.organization.id, target.user_id, payload.role)
        .await?;
    Ok(ApiResponse::ok(member).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::member::{MemberRole, MemberStatus};
    use crate::state::test_app_state;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn claims_for(sub: &str, org: Option<&str>) -> crate::routes::auth::claims::SessionClaims {
        crate::routes::auth::claims::SessionClaims {
            sub: sub.into(),
            org: org.map(|o| o.into()),
            org_role: None,
            exp: (SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs()
                + 3600) as usize,
            iss: "swimdeck".into(),
            aud: "swimdeck-api".into(),
        }
    }

    #[tokio::test]
    async fn owner_role_and_status_are_immutable() {
        let (state, db, _identity) = test_app_state();
        let org = db.seed_org("org_1", "Acme");
        let owner = db.seed_user("user_owner");
        db.seed_member(org.id, owner.id, MemberRole::Owner, MemberStatus::Active);

        let err = apply_member_patch(
            &state,
            org.id,
            "user_owner",
            &UpdateMemberPayload {
                role: Some(MemberRole::Admin),
                status: None,
                disabled_reason: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Organization must have an owner");

        let err = apply_member_patch(
            &state,
            org.id,
            "user_owner",
            &UpdateMemberPayload {
                role: None,
                status: Some(MemberStatus::Disabled),
                disabled_reason: Some("cleanup".into()),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Owner cannot be disabled");
    }

    #[tokio::test]
    async fn promoting_to_owner_is_rejected() {
        let (state, db, _identity) = test_app_state();
        let org = db.seed_org("org_1", "Acme");
        let admin = db.seed_user("user_admin");
        db.seed_member(org.id, admin.id, MemberRole::Admin, MemberStatus::Active);

        let err = apply_member_patch(
            &state,
            org.id,
            "user_admin",
            &UpdateMemberPayload {
                role: Some(MemberRole::Owner),
                status: None,
                disabled_reason: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Cannot promote to owner");
    }

    #[tokio::test]
    async fn disabling_stamps_reason_and_reenabling_clears_it() {
        let (state, db, _identity) = test_app_state();
        let org = db.seed_org("org_1", "Acme");
        let user = db.seed_user("user_m");
        db.seed_member(org.id, user.id, MemberRole::Member, MemberStatus::Active);

        let disabled = apply_member_patch(
            &state,
            org.id,
            "user_m",
            &UpdateMemberPayload {
                role: None,
                status: Some(MemberStatus::Disabled),
                disabled_reason: Some("left the club".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(disabled.status, MemberStatus::Disabled);
        assert!(disabled.disabled_at.is_some());
        assert_eq!(disabled.disabled_reason.as_deref(), Some("left the club"));

        let active = apply_member_patch(
            &state,
            org.id,
            "user_m",
            &UpdateMemberPayload {
                role: None,
                status: Some(MemberStatus::Active),
                disabled_reason: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(active.status, MemberStatus::Active);
        assert!(active.disabled_at.is_none());
        assert!(active.disabled_reason.is_none());
    }

    #[tokio::test]
    async fn list_requires_an_active_org() {
        let (state, db, _identity) = test_app_state();
        db.seed_user("user_1");

        let result = list_members(
            State(state),
            crate::routes::auth::AuthSession(claims_for("user_1", None)),
            Query(ListMembersQuery {
                role: None,
                status: None,
            }),
        )
        .await;
        let err = result.unwrap_err();
        assert!(matches!(err, ApiError::NoActiveOrg));
    }

    #[tokio::test]
    async fn coach_conversions_keep_profile_coupled() {
        let (state, db, _identity) = test_app_state();
        let org = db.seed_org("org_1", "Acme");
        let user = db.seed_user("user_m");
        let member = db.seed_member(org.id, user.id, MemberRole::Member, MemberStatus::Active);

        let converted = state
            .members
            .convert_to_coach(org.id, user.id)
            .await
            .unwrap();
        assert_eq!(converted.role, MemberRole::Coach);
        assert!(db
            .profiles
            .lock()
            .unwrap()
            .iter()
            .any(|p| p.member_id == member.id));

        let back = state
            .members
            .convert_from_coach(org.id, user.id, MemberRole::Member)
            .await
            .unwrap();
        assert_eq!(back.role, MemberRole::Member);
        assert!(!db
            .profiles
            .lock()
            .unwrap()
            .iter()
            .any(|p| p.member_id == member.id));
    }
}
