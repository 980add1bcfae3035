use async_trait::async_trait;
use uuid::Uuid;

use crate::models::organization::{
    Organization, OrganizationMembershipSummary, OrgSettings, OrgSettingsPatch,
};

/// Placeholder name for organizations created lazily from a bare external
/// id; a provider sync event corrects it later.
pub const PLACEHOLDER_ORG_NAME: &str = "New organization";

#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    async fn find_by_id(&self, org_id: Uuid) -> Result<Option<Organization>, sqlx::Error>;

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Organization>, sqlx::Error>;

    /// Lazy-create on first reference, with a placeholder name and a
    /// generated slug. Also ensures the default settings row exists.
    async fn get_or_create_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Organization, sqlx::Error>;

    /// Explicit creation with a real name (super-admin console path).
    async fn create(&self, external_id: &str, name: &str) -> Result<Organization, sqlx::Error>;

    /// Provider sync: updates the name if the org exists (regenerating a
    /// placeholder slug), creates it otherwise.
    async fn upsert_from_provider_event(
        &self,
        external_id: &str,
        name: &str,
    ) -> Result<Organization, sqlx::Error>;

    /// Mirrors provider-side deletion.
    async fn delete_by_external_id(&self, external_id: &str) -> Result<bool, sqlx::Error>;

    /// Designates the escalation contact for the org. Caller-side guarded;
    /// the target must already be an active member.
    async fn set_primary_admin(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Organization>, sqlx::Error>;

    /// Local rename from the super-admin console; the slug stays put.
    async fn rename(&self, org_id: Uuid, name: &str) -> Result<Option<Organization>, sqlx::Error>;

    async fn list(
        &self,
        page: i64,
        limit: i64,
        search: Option<&str>,
    ) -> Result<(Vec<Organization>, i64), sqlx::Error>;

    async fn list_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<OrganizationMembershipSummary>, sqlx::Error>;

    /// Idempotent ensure-step for the settings row; defaults are
    /// non-destructive so this may run outside the creating transaction.
    async fn ensure_settings(&self, org_id: Uuid) -> Result<OrgSettings, sqlx::Error>;

    async fn update_settings(
        &self,
        org_id: Uuid,
        patch: &OrgSettingsPatch,
    ) -> Result<OrgSettings, sqlx::Error>;
}
