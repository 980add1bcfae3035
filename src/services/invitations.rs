//! The invitation ledger. Pending grants are mirrored against the identity
//! provider: every local transition that the provider also tracks runs the
//! remote call first and commits locally only after it succeeds, so a failed
//! remote call never strands local state. The reverse window (remote
//! succeeded, local write lost) is reconciled by the webhook handler.

use std::sync::Arc;

use serde_json::json;
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::db::invitation_repository::InvitationRepository;
use crate::db::member_repository::MemberRepository;
use crate::errors::ApiError;
use crate::models::invitation::{Invitation, InvitationStatus, NewInvitation};
use crate::models::member::{Member, MemberRole, MemberStatus};
use crate::models::organization::Organization;
use crate::models::user::AppUser;
use crate::services::identity::{CreateInvitationRequest, IdentityService};

pub const INVITE_EXPIRY_DEFAULT_DAYS: i64 = 14;
pub const INVITE_EXPIRY_MIN_DAYS: i64 = 1;
pub const INVITE_EXPIRY_MAX_DAYS: i64 = 60;

/// Identifiers an acceptance callback may carry. The provider's payload
/// shape is not guaranteed, so resolution tries these in order.
#[derive(Debug, Default, Clone)]
pub struct AcceptanceHints {
    /// Our invite id, echoed back through provider metadata. Preferred.
    pub metadata_invitation_id: Option<Uuid>,
    /// The provider's own invitation id.
    pub external_invitation_id: Option<String>,
    /// Last resort: the invited address.
    pub email: Option<String>,
}

#[derive(Clone)]
pub struct InvitationService {
    invitations: Arc<dyn InvitationRepository>,
    members: Arc<dyn MemberRepository>,
    identity: Arc<dyn IdentityService>,
}

impl InvitationService {
    pub fn new(
        invitations: Arc<dyn InvitationRepository>,
        members: Arc<dyn MemberRepository>,
        identity: Arc<dyn IdentityService>,
    ) -> Self {
        Self {
            invitations,
            members,
            identity,
        }
    }

    /// Creates or refreshes a pending invitation. Re-inviting while PENDING
    /// updates the existing row in place (fresh provider invite id and
    /// expiry) instead of creating a duplicate.
    pub async fn create(
        &self,
        org: &Organization,
        email: &str,
        role: MemberRole,
        expires_in_days: Option<i64>,
        invited_by: Uuid,
    ) -> Result<Invitation, ApiError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(ApiError::invalid_field("email", "A valid email is required"));
        }
        if role == MemberRole::Owner {
            return Err(ApiError::BadRequest("Cannot invite an owner".to_string()));
        }

        if self.members.email_is_member(org.id, &email).await? {
            return Err(ApiError::AlreadyMember);
        }
        if self.invitations.has_accepted_for_email(org.id, &email).await? {
            return Err(ApiError::AlreadyMember);
        }

        let days = expires_in_days
            .unwrap_or(INVITE_EXPIRY_DEFAULT_DAYS)
            .clamp(INVITE_EXPIRY_MIN_DAYS, INVITE_EXPIRY_MAX_DAYS);
        let now = OffsetDateTime::now_utc();

        let pending = self.invitations.find_pending_by_email(org.id, &email).await?;
        // The local id is fixed before the provider call so metadata can
        // carry it and the acceptance webhook can resolve by it.
        let invitation_id = pending.as_ref().map(|p| p.id).unwrap_or_else(Uuid::new_v4);

        let provider_invite = self
            .identity
            .create_invitation(CreateInvitationRequest {
                org_external_id: org.external_id.clone(),
                email: email.clone(),
                role: role_claim(role).to_string(),
                expires_in_days: days,
                metadata: json!({ "invitation_id": invitation_id.to_string() }),
            })
            .await?;

        match pending {
            Some(existing) => self
                .invitations
                .refresh_pending(
                    existing.id,
                    &provider_invite.external_id,
                    now,
                    provider_invite.expires_at,
                )
                .await?
                .ok_or_else(|| {
                    ApiError::Conflict("Invitation is no longer pending".to_string())
                }),
            None => Ok(self
                .invitations
                .insert(&NewInvitation {
                    id: invitation_id,
                    organization_id: org.id,
                    email,
                    role,
                    external_invitation_id: provider_invite.external_id,
                    invited_by: Some(invited_by),
                    last_sent_at: now,
                    expires_at: provider_invite.expires_at,
                })
                .await?),
        }
    }

    /// Re-issues a pending invitation through the provider.
    pub async fn resend(&self, org: &Organization, invite_id: Uuid) -> Result<Invitation, ApiError> {
        let invitation = self
            .invitations
            .find_by_id(org.id, invite_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Invitation not found".to_string()))?;

        match invitation.status {
            InvitationStatus::Accepted => Err(ApiError::AlreadyMember),
            InvitationStatus::Revoked | InvitationStatus::Expired => Err(ApiError::Conflict(
                "Invitation is no longer pending".to_string(),
            )),
            InvitationStatus::Pending => {
                let now = OffsetDateTime::now_utc();
                let provider_invite = match invitation.external_invitation_id.as_deref() {
                    Some(external_id) => self.identity.resend_invitation(external_id).await?,
                    // Mirror row without a provider id (created from a bare
                    // webhook); issue a fresh provider invite instead.
                    None => {
                        self.identity
                            .create_invitation(CreateInvitationRequest {
                                org_external_id: org.external_id.clone(),
                                email: invitation.email.clone(),
                                role: role_claim(invitation.role).to_string(),
                                expires_in_days: INVITE_EXPIRY_DEFAULT_DAYS,
                                metadata: json!({ "invitation_id": invitation.id.to_string() }),
                            })
                            .await?
                    }
                };
                self.invitations
                    .refresh_pending(
                        invitation.id,
                        &provider_invite.external_id,
                        now,
                        provider_invite.expires_at,
                    )
                    .await?
                    .ok_or_else(|| {
                        ApiError::Conflict("Invitation is no longer pending".to_string())
                    })
            }
        }
    }

    /// Revokes a pending invitation: remote first, local only afterwards.
    /// Revoking twice is a no-op.
    pub async fn revoke(&self, org: &Organization, invite_id: Uuid) -> Result<Invitation, ApiError> {
        let invitation = self
            .invitations
            .find_by_id(org.id, invite_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Invitation not found".to_string()))?;

        match invitation.status {
            InvitationStatus::Accepted => Err(ApiError::AlreadyMember),
            InvitationStatus::Revoked => Ok(invitation),
            InvitationStatus::Expired => Err(ApiError::Conflict(
                "Invitation is no longer pending".to_string(),
            )),
            InvitationStatus::Pending => {
                if let Some(external_id) = invitation.external_invitation_id.as_deref() {
                    self.identity.revoke_invitation(external_id).await?;
                }
                self.invitations
                    .mark_revoked(invitation.id, OffsetDateTime::now_utc())
                    .await?
                    .ok_or_else(|| {
                        ApiError::Conflict("Invitation is no longer pending".to_string())
                    })
            }
        }
    }

    /// Invitee-facing acceptance: the signed-in caller claims an invitation
    /// addressed to their email, gaining an active membership immediately.
    pub async fn accept_by_invitee(
        &self,
        user: &AppUser,
        invite_id: Uuid,
    ) -> Result<(Invitation, Member), ApiError> {
        let invitation = self
            .invitations
            .find_any(invite_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Invitation not found".to_string()))?;

        match invitation.status {
            InvitationStatus::Accepted => Err(ApiError::AlreadyMember),
            InvitationStatus::Revoked | InvitationStatus::Expired => Err(ApiError::Conflict(
                "Invitation is no longer pending".to_string(),
            )),
            InvitationStatus::Pending => {
                if !caller_owns_email(user, &invitation.email) {
                    return Err(ApiError::Forbidden(
                        "Invitation was issued to a different email".to_string(),
                    ));
                }
                let member = self
                    .members
                    .create(
                        invitation.organization_id,
                        user.id,
                        invitation.role,
                        MemberStatus::Active,
                    )
                    .await?;
                let accepted = self
                    .invitations
                    .mark_accepted(invitation.id, OffsetDateTime::now_utc())
                    .await?
                    .unwrap_or(invitation);
                Ok((accepted, member))
            }
        }
    }

    /// Invitee-facing decline. Remote revoke first, then the local row.
    pub async fn reject_by_invitee(
        &self,
        user: &AppUser,
        invite_id: Uuid,
    ) -> Result<Invitation, ApiError> {
        let invitation = self
            .invitations
            .find_any(invite_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Invitation not found".to_string()))?;

        match invitation.status {
            InvitationStatus::Accepted => Err(ApiError::AlreadyMember),
            InvitationStatus::Revoked => Ok(invitation),
            InvitationStatus::Expired => Err(ApiError::Conflict(
                "Invitation is no longer pending".to_string(),
            )),
            InvitationStatus::Pending => {
                if !caller_owns_email(user, &invitation.email) {
                    return Err(ApiError::Forbidden(
                        "Invitation was issued to a different email".to_string(),
                    ));
                }
                if let Some(external_id) = invitation.external_invitation_id.as_deref() {
                    self.identity.revoke_invitation(external_id).await?;
                }
                self.invitations
                    .mark_revoked(invitation.id, OffsetDateTime::now_utc())
                    .await?
                    .ok_or_else(|| {
                        ApiError::Conflict("Invitation is no longer pending".to_string())
                    })
            }
        }
    }

    /// Acceptance callback from the provider. Resolution strategies are
    /// tried in order; an already-accepted invite is a retry and succeeds
    /// without changing anything.
    pub async fn mark_accepted_from_provider(
        &self,
        org_id: Uuid,
        hints: &AcceptanceHints,
        accepted_at: OffsetDateTime,
    ) -> Result<Option<Invitation>, ApiError> {
        let Some(invitation) = self.resolve(org_id, hints).await? else {
            warn!(%org_id, "acceptance callback did not resolve to an invitation");
            return Ok(None);
        };

        match invitation.status {
            InvitationStatus::Accepted => Ok(Some(invitation)),
            _ => {
                let updated = self
                    .invitations
                    .mark_accepted(invitation.id, accepted_at)
                    .await?;
                Ok(updated.or(Some(invitation)))
            }
        }
    }

    /// Provider reported expiry; local status mirrors it. `expires_at` is
    /// never ticked locally.
    pub async fn mark_expired_from_provider(
        &self,
        org_id: Uuid,
        hints: &AcceptanceHints,
    ) -> Result<Option<Invitation>, ApiError> {
        let Some(invitation) = self.resolve(org_id, hints).await? else {
            return Ok(None);
        };
        Ok(self.invitations.mark_expired(invitation.id).await?)
    }

    /// Provider-side revocation (e.g. from the provider dashboard).
    pub async fn mark_revoked_from_provider(
        &self,
        org_id: Uuid,
        hints: &AcceptanceHints,
        revoked_at: OffsetDateTime,
    ) -> Result<Option<Invitation>, ApiError> {
        let Some(invitation) = self.resolve(org_id, hints).await? else {
            return Ok(None);
        };
        Ok(self.invitations.mark_revoked(invitation.id, revoked_at).await?)
    }

    pub async fn list(
        &self,
        org_id: Uuid,
        status: Option<InvitationStatus>,
        page: i64,
        limit: i64,
    ) -> Result<(Vec<Invitation>, i64), ApiError> {
        Ok(self.invitations.list_by_org(org_id, status, page, limit).await?)
    }

    /// Ordered resolution: metadata invite id, provider invitation id,
    /// (org, email) pending lookup.
    async fn resolve(
        &self,
        org_id: Uuid,
        hints: &AcceptanceHints,
    ) -> Result<Option<Invitation>, ApiError> {
        if let Some(id) = hints.metadata_invitation_id {
            if let Some(invitation) = self.invitations.find_by_id(org_id, id).await? {
                return Ok(Some(invitation));
            }
        }
        if let Some(external_id) = hints.external_invitation_id.as_deref() {
            if let Some(invitation) = self.invitations.find_by_external_id(external_id).await? {
                if invitation.organization_id == org_id {
                    return Ok(Some(invitation));
                }
            }
        }
        if let Some(email) = hints.email.as_deref() {
            let email = email.trim().to_lowercase();
            if let Some(invitation) =
                self.invitations.find_pending_by_email(org_id, &email).await?
            {
                return Ok(Some(invitation));
            }
        }
        Ok(None)
    }
}

fn caller_owns_email(user: &AppUser, invite_email: &str) -> bool {
    user.email
        .as_deref()
        .map(|e| e.eq_ignore_ascii_case(invite_email))
        .unwrap_or(false)
}

fn role_claim(role: MemberRole) -> &'static str {
    match role {
        MemberRole::Owner => "owner",
        MemberRole::Admin => "admin",
        MemberRole::Coach => "coach",
        MemberRole::Member => "member",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_db::MockDb;
    use crate::services::identity::MockIdentityService;
    use time::Duration;

    struct Fixture {
        db: Arc<MockDb>,
        identity: Arc<MockIdentityService>,
        service: InvitationService,
        org: Organization,
        admin_id: Uuid,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(MockDb::new());
        let identity = Arc::new(MockIdentityService::new());
        let org = db.seed_org("org_1", "Acme");
        let admin = db.seed_user("user_admin");
        let service = InvitationService::new(db.clone(), db.clone(), identity.clone());
        Fixture {
            db,
            identity,
            service,
            org,
            admin_id: admin.id,
        }
    }

    #[tokio::test]
    async fn create_normalizes_email_and_goes_through_the_provider() {
        let f = fixture();
        let invitation = f
            .service
            .create(&f.org, "  Coach@Example.COM ", MemberRole::Coach, None, f.admin_id)
            .await
            .unwrap();

        assert_eq!(invitation.email, "coach@example.com");
        assert_eq!(invitation.status, InvitationStatus::Pending);
        assert!(invitation.external_invitation_id.is_some());
        assert_eq!(f.identity.created_invitations.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reinvite_while_pending_updates_in_place() {
        let f = fixture();
        let first = f
            .service
            .create(&f.org, "coach@example.com", MemberRole::Coach, None, f.admin_id)
            .await
            .unwrap();
        let second = f
            .service
            .create(&f.org, "coach@example.com", MemberRole::Coach, None, f.admin_id)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_ne!(
            first.external_invitation_id,
            second.external_invitation_id
        );
        assert_eq!(f.db.invitations.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_email_is_a_validation_error() {
        let f = fixture();
        let err = f
            .service
            .create(&f.org, "not-an-email", MemberRole::Member, None, f.admin_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        // No provider call was made.
        assert!(f.identity.created_invitations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn inviting_an_existing_member_fails_already_member() {
        let f = fixture();
        let user = f.db.seed_user("user_existing");
        {
            let mut users = f.db.users.lock().unwrap();
            users
                .iter_mut()
                .find(|u| u.id == user.id)
                .unwrap()
                .email = Some("present@example.com".to_string());
        }
        f.db.seed_member(
            f.org.id,
            user.id,
            MemberRole::Member,
            crate::models::member::MemberStatus::Active,
        );

        let err = f
            .service
            .create(&f.org, "present@example.com", MemberRole::Member, None, f.admin_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::AlreadyMember));
    }

    #[tokio::test]
    async fn accepted_invitation_is_terminal_for_resend_and_revoke() {
        let f = fixture();
        let invitation =
            f.db.seed_invitation(f.org.id, "done@example.com", MemberRole::Member, InvitationStatus::Accepted);

        let err = f.service.resend(&f.org, invitation.id).await.unwrap_err();
        assert!(matches!(err, ApiError::AlreadyMember));

        let err = f.service.revoke(&f.org, invitation.id).await.unwrap_err();
        assert!(matches!(err, ApiError::AlreadyMember));

        // Recreating for an accepted address also conflicts.
        let err = f
            .service
            .create(&f.org, "done@example.com", MemberRole::Member, None, f.admin_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::AlreadyMember));
    }

    #[tokio::test]
    async fn revoke_is_remote_then_local_and_idempotent() {
        let f = fixture();
        let invitation = f
            .service
            .create(&f.org, "coach@example.com", MemberRole::Coach, None, f.admin_id)
            .await
            .unwrap();

        let revoked = f.service.revoke(&f.org, invitation.id).await.unwrap();
        assert_eq!(revoked.status, InvitationStatus::Revoked);
        assert!(revoked.revoked_at.is_some());
        assert_eq!(f.identity.revoked_invitations.lock().unwrap().len(), 1);

        // Second revoke is a no-op, not an error, and no second remote call.
        let again = f.service.revoke(&f.org, invitation.id).await.unwrap();
        assert_eq!(again.status, InvitationStatus::Revoked);
        assert_eq!(f.identity.revoked_invitations.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_remote_revoke_leaves_local_state_untouched() {
        let f = fixture();
        let invitation = f
            .service
            .create(&f.org, "coach@example.com", MemberRole::Coach, None, f.admin_id)
            .await
            .unwrap();

        f.identity.set_fail_revoke(true);
        let err = f.service.revoke(&f.org, invitation.id).await.unwrap_err();
        assert!(matches!(err, ApiError::Provider(_)));

        let stored = f
            .db
            .find_by_id(f.org.id, invitation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, InvitationStatus::Pending);
    }

    #[tokio::test]
    async fn resend_after_revoke_conflicts() {
        let f = fixture();
        let invitation = f
            .service
            .create(&f.org, "coach@example.com", MemberRole::Coach, None, f.admin_id)
            .await
            .unwrap();
        f.service.revoke(&f.org, invitation.id).await.unwrap();

        let err = f.service.resend(&f.org, invitation.id).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn reinvite_after_revoke_creates_a_fresh_row() {
        let f = fixture();
        let first = f
            .service
            .create(&f.org, "coach@example.com", MemberRole::Coach, None, f.admin_id)
            .await
            .unwrap();
        f.service.revoke(&f.org, first.id).await.unwrap();

        let second = f
            .service
            .create(&f.org, "coach@example.com", MemberRole::Coach, None, f.admin_id)
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(second.status, InvitationStatus::Pending);
        assert_eq!(f.db.invitations.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn invitee_acceptance_creates_an_active_membership() {
        let f = fixture();
        let invitation = f
            .service
            .create(&f.org, "coach@example.com", MemberRole::Coach, None, f.admin_id)
            .await
            .unwrap();

        let seeded = f.db.seed_user("user_invitee");
        let invitee = {
            let mut users = f.db.users.lock().unwrap();
            let stored = users.iter_mut().find(|u| u.id == seeded.id).unwrap();
            stored.email = Some("Coach@Example.com".to_string());
            stored.clone()
        };

        let (accepted, member) = f
            .service
            .accept_by_invitee(&invitee, invitation.id)
            .await
            .unwrap();
        assert_eq!(accepted.status, InvitationStatus::Accepted);
        assert_eq!(member.role, MemberRole::Coach);
        assert_eq!(member.status, MemberStatus::Active);

        // A second accept hits the terminal state.
        let err = f
            .service
            .accept_by_invitee(&invitee, invitation.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::AlreadyMember));
    }

    #[tokio::test]
    async fn invitee_with_wrong_email_cannot_accept() {
        let f = fixture();
        let invitation = f
            .service
            .create(&f.org, "coach@example.com", MemberRole::Coach, None, f.admin_id)
            .await
            .unwrap();

        let stranger = f.db.seed_user("user_stranger");
        let err = f
            .service
            .accept_by_invitee(&stranger, invitation.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn acceptance_resolves_by_metadata_id_first() {
        let f = fixture();
        let invitation = f
            .service
            .create(&f.org, "coach@example.com", MemberRole::Coach, None, f.admin_id)
            .await
            .unwrap();

        let hints = AcceptanceHints {
            metadata_invitation_id: Some(invitation.id),
            external_invitation_id: Some("pinv_wrong".to_string()),
            email: Some("other@example.com".to_string()),
        };
        let accepted = f
            .service
            .mark_accepted_from_provider(f.org.id, &hints, OffsetDateTime::now_utc())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(accepted.id, invitation.id);
        assert_eq!(accepted.status, InvitationStatus::Accepted);
    }

    #[tokio::test]
    async fn acceptance_falls_back_to_external_id_then_email() {
        let f = fixture();
        let invitation = f
            .service
            .create(&f.org, "coach@example.com", MemberRole::Coach, None, f.admin_id)
            .await
            .unwrap();

        // No metadata id; external id resolves.
        let hints = AcceptanceHints {
            metadata_invitation_id: None,
            external_invitation_id: invitation.external_invitation_id.clone(),
            email: None,
        };
        let found = f.service.resolve(f.org.id, &hints).await.unwrap().unwrap();
        assert_eq!(found.id, invitation.id);

        // Only the email; pending lookup resolves.
        let hints = AcceptanceHints {
            metadata_invitation_id: None,
            external_invitation_id: None,
            email: Some("Coach@Example.com".to_string()),
        };
        let found = f.service.resolve(f.org.id, &hints).await.unwrap().unwrap();
        assert_eq!(found.id, invitation.id);
    }

    #[tokio::test]
    async fn acceptance_retry_is_idempotent() {
        let f = fixture();
        let invitation = f
            .service
            .create(&f.org, "coach@example.com", MemberRole::Coach, None, f.admin_id)
            .await
            .unwrap();
        let hints = AcceptanceHints {
            metadata_invitation_id: Some(invitation.id),
            ..AcceptanceHints::default()
        };

        let at = OffsetDateTime::now_utc();
        let first = f
            .service
            .mark_accepted_from_provider(f.org.id, &hints, at)
            .await
            .unwrap()
            .unwrap();
        let second = f
            .service
            .mark_accepted_from_provider(f.org.id, &hints, at + Duration::hours(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.accepted_at, second.accepted_at);
    }
}
