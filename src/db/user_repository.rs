use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::user::{AppUser, UserProfilePatch};

/// The user directory: maps external identity-provider user ids to
/// application users, creating them on first sight.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<AppUser>, sqlx::Error>;

    async fn find_by_external_id(&self, external_id: &str)
        -> Result<Option<AppUser>, sqlx::Error>;

    /// Idempotent get-or-create. Safe under concurrent first-requests:
    /// create races resolve via the unique constraint on `external_id`
    /// followed by a retry fetch. Bumps `last_seen_at`.
    async fn get_or_create(
        &self,
        external_id: &str,
        seen_at: OffsetDateTime,
    ) -> Result<AppUser, sqlx::Error>;

    /// Webhook-driven profile sync; creates the user when absent.
    async fn upsert_from_provider(
        &self,
        external_id: &str,
        profile: &UserProfilePatch,
    ) -> Result<AppUser, sqlx::Error>;

    async fn set_super_admin(
        &self,
        user_id: Uuid,
        is_super_admin: bool,
    ) -> Result<Option<AppUser>, sqlx::Error>;

    async fn set_disabled(
        &self,
        user_id: Uuid,
        is_disabled: bool,
    ) -> Result<Option<AppUser>, sqlx::Error>;

    async fn list(
        &self,
        page: i64,
        limit: i64,
        search: Option<&str>,
    ) -> Result<(Vec<AppUser>, i64), sqlx::Error>;
}
