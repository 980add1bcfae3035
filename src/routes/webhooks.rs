//! Identity-provider webhook intake. Verification is delegated to the
//! provider service; processing sits behind the (provider, event id)
//! idempotency gate, and `processed_at` is stamped only after the handler
//! body succeeds so provider retries re-attempt unfinished work. Every step
//! below is an idempotent upsert for exactly that reason.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde_json::json;
use time::{Duration, OffsetDateTime};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::invitation_repository::InvitationRepository;
use crate::db::member_repository::MemberRepository;
use crate::db::organization_repository::{OrganizationRepository, PLACEHOLDER_ORG_NAME};
use crate::db::rate_limit_repository::RateLimitRepository;
use crate::db::user_repository::UserRepository;
use crate::db::webhook_event_repository::WebhookEventRepository;
use crate::errors::ApiError;
use crate::models::invitation::NewInvitation;
use crate::models::member::{MemberRole, MemberStatus};
use crate::models::user::UserProfilePatch;
use crate::responses::ApiResponse;
use crate::services::identity::{IdentityService, ProviderEvent};
use crate::services::invitations::{AcceptanceHints, INVITE_EXPIRY_DEFAULT_DAYS};
use crate::state::AppState;

const WEBHOOK_PROVIDER: &str = "identity";
/// Burst cap for the intake endpoint as a whole; the per-IP governor in
/// `main` handles everything finer-grained.
const WEBHOOKS_PER_MINUTE: i32 = 600;

// Small helper: nested json lookup
fn jget<'a>(val: &'a serde_json::Value, path: &[&str]) -> Option<&'a serde_json::Value> {
    let mut cur = val;
    for key in path {
        cur = cur.get(*key)?;
    }
    Some(cur)
}

fn extract_str<'a>(val: &'a serde_json::Value, path: &[&str]) -> Option<&'a str> {
    jget(val, path)?.as_str()
}

fn extract_i64(val: &serde_json::Value, path: &[&str]) -> Option<i64> {
    jget(val, path)?.as_i64()
}

/// The provider is inconsistent about whether the organization arrives
/// nested or flat.
fn extract_org_external_id(data: &serde_json::Value) -> Option<&str> {
    extract_str(data, &["organization", "id"]).or_else(|| extract_str(data, &["organization_id"]))
}

fn extract_user_external_id(data: &serde_json::Value) -> Option<&str> {
    extract_str(data, &["user", "id"]).or_else(|| extract_str(data, &["user_id"]))
}

fn acceptance_hints(data: &serde_json::Value) -> AcceptanceHints {
    AcceptanceHints {
        metadata_invitation_id: extract_str(data, &["metadata", "invitation_id"])
            .and_then(|s| Uuid::parse_str(s).ok()),
        external_invitation_id: extract_str(data, &["id"]).map(str::to_string),
        email: extract_str(data, &["email_address"]).map(str::to_string),
    }
}

// POST /api/webhooks/identity
pub async fn identity_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match app_state
        .rate_limits
        .hit("webhooks:identity", WEBHOOKS_PER_MINUTE, Duration::minutes(1))
        .await
    {
        Ok(true) => {}
        Ok(false) => return ApiError::RateLimited.into_response(),
        // Best-effort; a broken counter must not drop provider events.
        Err(err) => warn!(?err, "webhook rate limiter unavailable"),
    }

    let signature = match headers
        .get("identity-signature")
        .and_then(|h| h.to_str().ok())
    {
        Some(s) => s,
        None => {
            return ApiError::BadRequest("Missing Identity-Signature".to_string()).into_response()
        }
    };

    let event = match app_state.identity.verify_webhook(&body, signature) {
        Ok(event) => event,
        Err(err) => {
            warn!(?err, "identity webhook verification failed");
            return ApiError::BadRequest("Invalid webhook".to_string()).into_response();
        }
    };

    match app_state
        .webhook_events
        .claim(WEBHOOK_PROVIDER, &event.id)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            info!(event_id = %event.id, "ignoring already-processed webhook replay");
            return ApiResponse::ok(json!({ "received": true })).into_response();
        }
        Err(err) => return ApiError::Database(err).into_response(),
    }

    if let Err(err) = process_event(&app_state, &event).await {
        error!(?err, event_id = %event.id, event_type = %event.r#type, "webhook processing failed");
        // Not marked processed; the provider's retry re-attempts the work.
        return err.into_response();
    }

    if let Err(err) = app_state
        .webhook_events
        .mark_processed(WEBHOOK_PROVIDER, &event.id)
        .await
    {
        error!(?err, event_id = %event.id, "failed to mark webhook event processed");
    }

    ApiResponse::ok(json!({ "received": true })).into_response()
}

async fn process_event(app_state: &AppState, event: &ProviderEvent) -> Result<(), ApiError> {
    let data = &event.payload;
    match event.r#type.as_str() {
        "user.created" | "user.updated" => {
            let Some(external_id) = extract_str(data, &["id"]) else {
                warn!(event_type = %event.r#type, "user event missing id");
                return Ok(());
            };
            let patch = UserProfilePatch {
                email: extract_str(data, &["email_address"]).map(str::to_string),
                name: extract_str(data, &["name"]).map(str::to_string),
                phone: extract_str(data, &["phone_number"]).map(str::to_string),
                avatar_url: extract_str(data, &["image_url"]).map(str::to_string),
            };
            app_state.users.upsert_from_provider(external_id, &patch).await?;
        }

        "organization.created" | "organization.updated" => {
            let Some(external_id) = extract_str(data, &["id"]) else {
                warn!(event_type = %event.r#type, "organization event missing id");
                return Ok(());
            };
            let name = extract_str(data, &["name"]).unwrap_or(PLACEHOLDER_ORG_NAME);
            app_state
                .orgs
                .upsert_from_provider_event(external_id, name)
                .await?;
        }

        "organization.deleted" => {
            if let Some(external_id) = extract_str(data, &["id"]) {
                app_state.orgs.delete_by_external_id(external_id).await?;
            }
        }

        "organizationMembership.created" | "organizationMembership.updated" => {
            let (Some(org_ext), Some(user_ext)) =
                (extract_org_external_id(data), extract_user_external_id(data))
            else {
                warn!(event_type = %event.r#type, "membership event missing identifiers");
                return Ok(());
            };
            let organization = app_state
                .orgs
                .get_or_create_by_external_id(org_ext)
                .await?;
            let user = app_state
                .users
                .get_or_create(user_ext, OffsetDateTime::now_utc())
                .await?;
            let role = extract_str(data, &["role"])
                .and_then(MemberRole::from_claim)
                .unwrap_or(MemberRole::Member);
            // A freshly-created provider membership has not signed in here
            // yet; the gate flips INVITED to ACTIVE on first sight.
            let default_status = if event.r#type.ends_with("created") {
                MemberStatus::Invited
            } else {
                MemberStatus::Active
            };
            let status = match extract_str(data, &["status"]).map(str::to_ascii_uppercase) {
                Some(ref s) if s == "INVITED" => MemberStatus::Invited,
                Some(ref s) if s == "ACTIVE" => MemberStatus::Active,
                Some(ref s) if s == "DISABLED" => MemberStatus::Disabled,
                _ => default_status,
            };
            app_state
                .members
                .upsert_from_provider(organization.id, user.id, role, status)
                .await?;
        }

        "organizationMembership.deleted" => {
            let (Some(org_ext), Some(user_ext)) =
                (extract_org_external_id(data), extract_user_external_id(data))
            else {
                return Ok(());
            };
            if let Some(organization) = app_state.orgs.find_by_external_id(org_ext).await? {
                if let Some(user) = app_state.users.find_by_external_id(user_ext).await? {
                    app_state
                        .members
                        .remove_from_provider(organization.id, user.id)
                        .await?;
                }
            }
        }

        "organizationInvitation.created" => {
            let Some(org_ext) = extract_org_external_id(data) else {
                return Ok(());
            };
            let organization = app_state
                .orgs
                .get_or_create_by_external_id(org_ext)
                .await?;
            mirror_provider_invitation(app_state, organization.id, data).await?;
        }

        "organizationInvitation.accepted" => {
            let Some(org_ext) = extract_org_external_id(data) else {
                return Ok(());
            };
            let organization = app_state
                .orgs
                .get_or_create_by_external_id(org_ext)
                .await?;
            let accepted_at = extract_i64(data, &["accepted_at"])
                .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
                .unwrap_or_else(OffsetDateTime::now_utc);
            app_state
                .invitation_service
                .mark_accepted_from_provider(organization.id, &acceptance_hints(data), accepted_at)
                .await?;
        }

        "organizationInvitation.revoked" => {
            let Some(org_ext) = extract_org_external_id(data) else {
                return Ok(());
            };
            if let Some(organization) = app_state.orgs.find_by_external_id(org_ext).await? {
                app_state
                    .invitation_service
                    .mark_revoked_from_provider(
                        organization.id,
                        &acceptance_hints(data),
                        OffsetDateTime::now_utc(),
                    )
                    .await?;
            }
        }

        // The only path that ever sets EXPIRED: the provider owns expiry.
        "organizationInvitation.expired" => {
            let Some(org_ext) = extract_org_external_id(data) else {
                return Ok(());
            };
            if let Some(organization) = app_state.orgs.find_by_external_id(org_ext).await? {
                app_state
                    .invitation_service
                    .mark_expired_from_provider(organization.id, &acceptance_hints(data))
                    .await?;
            }
        }

        other => {
            debug!(event_type = %other, "ignoring unhandled identity event");
        }
    }
    Ok(())
}

/// Mirrors a provider-originated invitation we have no local row for (e.g.
/// created from the provider dashboard). Locally-created invites are found
/// by external id or pending-email and left alone.
async fn mirror_provider_invitation(
    app_state: &AppState,
    org_id: Uuid,
    data: &serde_json::Value,
) -> Result<(), ApiError> {
    let Some(external_id) = extract_str(data, &["id"]) else {
        return Ok(());
    };
    if app_state
        .invitations
        .find_by_external_id(external_id)
        .await?
        .is_some()
    {
        return Ok(());
    }
    let Some(email) = extract_str(data, &["email_address"]) else {
        return Ok(());
    };
    let email = email.trim().to_lowercase();
    if app_state
        .invitations
        .find_pending_by_email(org_id, &email)
        .await?
        .is_some()
    {
        return Ok(());
    }

    let now = OffsetDateTime::now_utc();
    let expires_at = extract_i64(data, &["expires_at"])
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .unwrap_or(now + Duration::days(INVITE_EXPIRY_DEFAULT_DAYS));
    let id = extract_str(data, &["metadata", "invitation_id"])
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    app_state
        .invitations
        .insert(&NewInvitation {
            id,
            organization_id: org_id,
            email,
            role: extract_str(data, &["role"])
                .and_then(MemberRole::from_claim)
                .unwrap_or(MemberRole::Member),
            external_invitation_id: external_id.to_string(),
            invited_by: None,
            last_sent_at: now,
            expires_at,
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::invitation::InvitationStatus;
    use crate::state::test_app_state;

    fn signed_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("identity-signature", "test-signature".parse().unwrap());
        headers
    }

    fn membership_created(event_id: &str) -> Bytes {
        Bytes::from(
            serde_json::json!({
                "id": event_id,
                "type": "organizationMembership.created",
                "data": {
                    "organization": { "id": "org_1" },
                    "user": { "id": "user_1" },
                    "role": "COACH"
                }
            })
            .to_string(),
        )
    }

    #[tokio::test]
    async fn missing_signature_is_rejected_without_processing() {
        let (state, db, _identity) = test_app_state();
        let response =
            identity_webhook(State(state), HeaderMap::new(), membership_created("evt_1")).await;
        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
        assert!(db.webhook_events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_signature_is_rejected_without_processing() {
        let (state, db, _identity) = test_app_state();
        let mut headers = HeaderMap::new();
        headers.insert("identity-signature", "wrong".parse().unwrap());
        let response = identity_webhook(State(state), headers, membership_created("evt_1")).await;
        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
        assert!(db.webhook_events.lock().unwrap().is_empty());
        assert!(db.members.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn membership_event_is_applied_exactly_once_across_replays() {
        let (state, db, _identity) = test_app_state();

        for _ in 0..3 {
            let response = identity_webhook(
                State(state.clone()),
                signed_headers(),
                membership_created("evt_replay"),
            )
            .await;
            assert_eq!(response.status(), axum::http::StatusCode::OK);
        }

        let members = db.members.lock().unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].role, MemberRole::Coach);
        assert_eq!(members[0].status, MemberStatus::Invited);
        drop(members);

        let events = db.webhook_events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events
            .get(&("identity".to_string(), "evt_replay".to_string()))
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn claim_allows_retry_until_processed() {
        let (_state, db, _identity) = test_app_state();

        // First claim runs the work.
        assert!(db.claim("identity", "evt_x").await.unwrap());
        // Earlier attempt died before mark_processed: retry runs again.
        assert!(db.claim("identity", "evt_x").await.unwrap());
        db.mark_processed("identity", "evt_x").await.unwrap();
        // Fully processed: replay short-circuits.
        assert!(!db.claim("identity", "evt_x").await.unwrap());
    }

    #[tokio::test]
    async fn acceptance_event_resolves_by_metadata_id() {
        let (state, db, _identity) = test_app_state();
        let org = db.seed_org("org_1", "Acme");
        let invitation = db.seed_invitation(
            org.id,
            "coach@example.com",
            MemberRole::Coach,
            InvitationStatus::Pending,
        );

        let body = Bytes::from(
            serde_json::json!({
                "id": "evt_accept",
                "type": "organizationInvitation.accepted",
                "data": {
                    "id": "pinv_other",
                    "organization": { "id": "org_1" },
                    "metadata": { "invitation_id": invitation.id.to_string() }
                }
            })
            .to_string(),
        );
        let response = identity_webhook(State(state), signed_headers(), body).await;
        assert_eq!(response.status(), axum::http::StatusCode::OK);

        let invitations = db.invitations.lock().unwrap();
        assert_eq!(invitations[0].status, InvitationStatus::Accepted);
        assert!(invitations[0].accepted_at.is_some());
    }

    #[tokio::test]
    async fn expiry_is_mirrored_from_the_provider() {
        let (state, db, _identity) = test_app_state();
        let org = db.seed_org("org_1", "Acme");
        let invitation = db.seed_invitation(
            org.id,
            "late@example.com",
            MemberRole::Member,
            InvitationStatus::Pending,
        );

        let body = Bytes::from(
            serde_json::json!({
                "id": "evt_expire",
                "type": "organizationInvitation.expired",
                "data": {
                    "id": invitation.external_invitation_id,
                    "organization": { "id": "org_1" }
                }
            })
            .to_string(),
        );
        identity_webhook(State(state), signed_headers(), body).await;

        let invitations = db.invitations.lock().unwrap();
        assert_eq!(invitations[0].status, InvitationStatus::Expired);
    }

    #[tokio::test]
    async fn provider_dashboard_invites_are_mirrored() {
        let (state, db, _identity) = test_app_state();

        let body = Bytes::from(
            serde_json::json!({
                "id": "evt_mirror",
                "type": "organizationInvitation.created",
                "data": {
                    "id": "pinv_dashboard",
                    "organization": { "id": "org_new" },
                    "email_address": "Walk-In@Example.com",
                    "role": "member"
                }
            })
            .to_string(),
        );
        identity_webhook(State(state), signed_headers(), body).await;

        let invitations = db.invitations.lock().unwrap();
        assert_eq!(invitations.len(), 1);
        assert_eq!(invitations[0].email, "walk-in@example.com");
        assert_eq!(invitations[0].status, InvitationStatus::Pending);
        assert_eq!(
            invitations[0].external_invitation_id.as_deref(),
            Some("pinv_dashboard")
        );
        // The org was lazily created from the bare external id.
        assert_eq!(db.orgs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn org_rename_corrects_placeholder_name_and_slug() {
        let (state, db, _identity) = test_app_state();

        // Lazy creation first (placeholder).
        let body = Bytes::from(
            serde_json::json!({
                "id": "evt_m1",
                "type": "organizationMembership.created",
                "data": {
                    "organization": { "id": "org_lazy" },
                    "user": { "id": "user_1" },
                    "role": "member"
                }
            })
            .to_string(),
        );
        identity_webhook(State(state.clone()), signed_headers(), body).await;

        let body = Bytes::from(
            serde_json::json!({
                "id": "evt_o1",
                "type": "organization.updated",
                "data": { "id": "org_lazy", "name": "Splash Academy" }
            })
            .to_string(),
        );
        identity_webhook(State(state), signed_headers(), body).await;

        let orgs = db.orgs.lock().unwrap();
        assert_eq!(orgs[0].name, "Splash Academy");
        assert_eq!(orgs[0].slug, "splash-academy");
    }
}
