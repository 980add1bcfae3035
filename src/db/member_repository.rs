use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::member::{Member, MemberFilters, MemberRole, MemberStatus, MemberWithUser};

/// State-machine violations surfaced by the membership ledger. Messages are
/// user-facing; the HTTP boundary maps them onto the error taxonomy.
#[derive(Debug, Error)]
pub enum MemberLedgerError {
    #[error("Member already exists for this organization")]
    AlreadyExists,
    #[error("Member not found")]
    NotFound,
    #[error("Cannot promote to owner")]
    PromoteToOwner,
    #[error("Organization already has an owner")]
    OwnerExists,
    #[error("Organization must have an owner")]
    LastOwner,
    #[error("Owner role cannot be changed")]
    OwnerImmutable,
    #[error("Owner cannot be disabled")]
    OwnerDisable,
    #[error("Owner cannot be removed")]
    OwnerRemove,
    #[error("Member is already a coach")]
    AlreadyCoach,
    #[error("Member is not a coach")]
    NotACoach,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// The core state machine: one row per (organization, user) pair. Owner
/// invariants are enforced here, inside row-locking transactions, so every
/// call site gets them for free.
#[async_trait]
pub trait MemberRepository: Send + Sync {
    async fn find(&self, org_id: Uuid, user_id: Uuid) -> Result<Option<Member>, sqlx::Error>;

    async fn find_by_external_user_id(
        &self,
        org_id: Uuid,
        external_user_id: &str,
    ) -> Result<Option<MemberWithUser>, sqlx::Error>;

    /// Fails with `AlreadyExists` when the (org, user) pair is taken; use
    /// `set_role`/`set_status` for existing members.
    async fn create(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
        status: MemberStatus,
    ) -> Result<Member, MemberLedgerError>;

    /// Owner assignment never happens here: `PromoteToOwner` when the new
    /// role is owner; `LastOwner`/`OwnerImmutable` when the target is one.
    async fn set_role(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        new_role: MemberRole,
    ) -> Result<Member, MemberLedgerError>;

    async fn set_status(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        new_status: MemberStatus,
        reason: Option<&str>,
    ) -> Result<Member, MemberLedgerError>;

    async fn remove(&self, org_id: Uuid, user_id: Uuid) -> Result<(), MemberLedgerError>;

    /// Transactionally sets role = coach and creates the empty profile.
    async fn convert_to_coach(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<Member, MemberLedgerError>;

    /// Transactionally deletes the profile and sets the new role.
    async fn convert_from_coach(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        new_role: MemberRole,
    ) -> Result<Member, MemberLedgerError>;

    /// Ordered by role precedence (owner, admin, coach, member) then
    /// display name ascending.
    async fn list_by_org(
        &self,
        org_id: Uuid,
        filters: &MemberFilters,
    ) -> Result<Vec<MemberWithUser>, sqlx::Error>;

    /// Provider membership sync. Idempotent upsert; never touches an
    /// existing owner row (the provider cannot demote a local owner).
    async fn upsert_from_provider(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
        status: MemberStatus,
    ) -> Result<Member, sqlx::Error>;

    /// Provider membership deletion mirror; owners are skipped.
    async fn remove_from_provider(&self, org_id: Uuid, user_id: Uuid)
        -> Result<bool, sqlx::Error>;

    /// INVITED -> ACTIVE on first authenticated sight. Returns the updated
    /// row, or None when the member was not in INVITED.
    async fn activate_if_invited(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Member>, sqlx::Error>;

    /// Whether the email already belongs to a live (non-disabled) member of
    /// the org; backs the ALREADY_MEMBER invite check.
    async fn email_is_member(&self, org_id: Uuid, email: &str) -> Result<bool, sqlx::Error>;
}
