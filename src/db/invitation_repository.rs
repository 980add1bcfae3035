use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::invitation::{Invitation, InvitationStatus, NewInvitation};

/// Storage for the invitation ledger. Transition rules (idempotent
/// re-invite, terminal ACCEPTED, remote-then-local ordering) live in
/// `services::invitations`; this trait is plain persistence.
#[async_trait]
pub trait InvitationRepository: Send + Sync {
    async fn find_by_id(&self, org_id: Uuid, id: Uuid) -> Result<Option<Invitation>, sqlx::Error>;

    /// Org-independent lookup for the invitee-facing accept/reject surface,
    /// where no organization is active yet.
    async fn find_any(&self, id: Uuid) -> Result<Option<Invitation>, sqlx::Error>;

    async fn find_pending_by_email(
        &self,
        org_id: Uuid,
        email: &str,
    ) -> Result<Option<Invitation>, sqlx::Error>;

    async fn has_accepted_for_email(&self, org_id: Uuid, email: &str)
        -> Result<bool, sqlx::Error>;

    async fn find_by_external_id(
        &self,
        external_invitation_id: &str,
    ) -> Result<Option<Invitation>, sqlx::Error>;

    async fn insert(&self, new: &NewInvitation) -> Result<Invitation, sqlx::Error>;

    /// Re-invite while pending: same row, fresh provider invite id and
    /// refreshed send/expiry stamps.
    async fn refresh_pending(
        &self,
        id: Uuid,
        external_invitation_id: &str,
        last_sent_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> Result<Option<Invitation>, sqlx::Error>;

    async fn mark_accepted(
        &self,
        id: Uuid,
        accepted_at: OffsetDateTime,
    ) -> Result<Option<Invitation>, sqlx::Error>;

    async fn mark_revoked(
        &self,
        id: Uuid,
        revoked_at: OffsetDateTime,
    ) -> Result<Option<Invitation>, sqlx::Error>;

    async fn mark_expired(&self, id: Uuid) -> Result<Option<Invitation>, sqlx::Error>;

    async fn list_by_org(
        &self,
        org_id: Uuid,
        status: Option<InvitationStatus>,
        page: i64,
        limit: i64,
    ) -> Result<(Vec<Invitation>, i64), sqlx::Error>;
}
