use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::db::rate_limit_repository::RateLimitRepository;
use crate::errors::ApiError;
use crate::models::invitation::{Invitation, InvitationStatus};
use crate::models::member::MemberRole;
use crate::responses::ApiResponse;
use crate::routes::auth::AuthSession;
use crate::services::authz::{OrgGuard, ADMIN_ROLES};
use crate::state::AppState;

/// Invite-creation cap per organization per hour; keeps a compromised admin
/// account from turning the provider into a spam cannon.
const INVITES_PER_HOUR: i32 = 100;

#[derive(Debug, Deserialize)]
pub struct CreateInvitationPayload {
    pub email: String,
    pub role: MemberRole,
    #[serde(default)]
    pub expires_in_days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListInvitationsQuery {
    pub status: Option<InvitationStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct PaginatedInvitations {
    invitations: Vec<Invitation>,
    total: i64,
    page: i64,
    limit: i64,
}

// GET /api/invitations
pub async fn list_invitations(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Query(query): Query<ListInvitationsQuery>,
) -> Result<Response, ApiError> {
    let ctx = app_state
        .gate
        .require_org_access(&claims, OrgGuard::roles(ADMIN_ROLES))
        .await?;
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(25);
    let (invitations, total) = app_state
        .invitation_service
        .list(ctx.organization.id, query.status, page, limit)
        .await?;
    Ok(ApiResponse::ok(PaginatedInvitations {
        invitations,
        total,
        page,
        limit,
    })
    .into_response())
}

// POST /api/invitations
pub async fn create_invitation(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Json(payload): Json<CreateInvitationPayload>,
) -> Result<Response, ApiError> {
    let ctx = app_state
        .gate
        .require_org_access(&claims, OrgGuard::roles(ADMIN_ROLES))
        .await?;

    let limiter_key = format!("invites:{}", ctx.organization.id);
    match app_state
        .rate_limits
        .hit(&limiter_key, INVITES_PER_HOUR, Duration::hours(1))
        .await
    {
        Ok(true) => {}
        Ok(false) => return Err(ApiError::RateLimited),
        // The limiter is best-effort; a broken counter must not block invites.
        Err(err) => warn!(?err, "invite rate limiter unavailable"),
    }

    let invitation = app_state
        .invitation_service
        .create(
            &ctx.organization,
            &payload.email,
            payload.role,
            payload.expires_in_days,
            ctx.user.id,
        )
        .await?;
    Ok(ApiResponse::created(invitation).into_response())
}

// POST /api/invitations/{id}/resend
pub async fn resend_invitation(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(invite_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let ctx = app_state
        .gate
        .require_org_access(&claims, OrgGuard::roles(ADMIN_ROLES))
        .await?;
    let invitation = app_state
        .invitation_service
        .resend(&ctx.organization, invite_id)
        .await?;
    Ok(ApiResponse::ok(invitation).into_response())
}

// POST /api/invitations/{id}/revoke
pub async fn revoke_invitation(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(invite_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let ctx = app_state
        .gate
        .require_org_access(&claims, OrgGuard::roles(ADMIN_ROLES))
        .await?;
    let invitation = app_state
        .invitation_service
        .revoke(&ctx.organization, invite_id)
        .await?;
    Ok(ApiResponse::ok(invitation).into_response())
}

// POST /api/invitations/{id}/accept — invitee-facing; no org context yet.
pub async fn accept_invitation(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(invite_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let user = app_state.gate.require_user(&claims).await?;
    let (invitation, member) = app_state
        .invitation_service
        .accept_by_invitee(&user, invite_id)
        .await?;
    Ok(ApiResponse::ok(serde_json::json!({
        "invitation": invitation,
        "member": member,
    }))
    .into_response())
}

// POST /api/invitations/{id}/reject — invitee-facing decline.
pub async fn reject_invitation(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(invite_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let user = app_state.gate.require_user(&claims).await?;
    let invitation = app_state
        .invitation_service
        .reject_by_invitee(&user, invite_id)
        .await?;
    Ok(ApiResponse::ok(invitation).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::member::MemberStatus;
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
    async fn coaches_cannot_manage_invitations() {
        let (state, db, _identity) = test_app_state();
        let org = db.seed_org("org_1", "Acme");
        let coach = db.seed_user("user_coach");
        db.seed_member(org.id, coach.id, MemberRole::Coach, MemberStatus::Active);

        let err = create_invitation(
            State(state),
            crate::routes::auth::AuthSession(claims_for("user_coach", Some("org_1"))),
            Json(CreateInvitationPayload {
                email: "new@example.com".into(),
                role: MemberRole::Member,
                expires_in_days: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::InsufficientRole));
    }

    #[tokio::test]
    async fn admin_invite_revoke_flow() {
        let (state, db, _identity) = test_app_state();
        let org = db.seed_org("org_1", "Acme");
        let admin = db.seed_user("user_admin");
        db.seed_member(org.id, admin.id, MemberRole::Admin, MemberStatus::Active);
        let session = claims_for("user_admin", Some("org_1"));

        let response = create_invitation(
            State(state.clone()),
            crate::routes::auth::AuthSession(session.clone()),
            Json(CreateInvitationPayload {
                email: "coach@example.com".into(),
                role: MemberRole::Coach,
                expires_in_days: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::CREATED);

        let invite_id = db.invitations.lock().unwrap()[0].id;
        revoke_invitation(
            State(state.clone()),
            crate::routes::auth::AuthSession(session.clone()),
            Path(invite_id),
        )
        .await
        .unwrap();
        {
            let invitations = db.invitations.lock().unwrap();
            assert_eq!(invitations[0].status, InvitationStatus::Revoked);
            assert!(invitations[0].revoked_at.is_some());
        }

        // Resend after revoke: conflict, per the documented rule.
        let err = resend_invitation(
            State(state),
            crate::routes::auth::AuthSession(session),
            Path(invite_id),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn invite_creation_is_rate_limited_per_org() {
        let (state, db, _identity) = test_app_state();
        let org = db.seed_org("org_1", "Acme");
        let admin = db.seed_user("user_admin");
        db.seed_member(org.id, admin.id, MemberRole::Admin, MemberStatus::Active);

        // Exhaust the window up front.
        {
            let mut hits = db.rate_hits.lock().unwrap();
            hits.insert(
                format!("invites:{}", org.id),
                (
                    INVITES_PER_HOUR,
                    time::OffsetDateTime::now_utc() + Duration::hours(1),
                ),
            );
        }

        let err = create_invitation(
            State(state),
            crate::routes::auth::AuthSession(claims_for("user_admin", Some("org_1"))),
            Json(CreateInvitationPayload {
                email: "late@example.com".into(),
                role: MemberRole::Member,
                expires_in_days: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::RateLimited));
    }
}
