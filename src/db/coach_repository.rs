use async_trait::async_trait;
use uuid::Uuid;

use crate::models::coach::{CoachAvailability, CoachProfile, CoachProfilePatch, NewAvailability};

/// Coach profile and availability storage. Profile creation/deletion is
/// owned by the membership ledger (same transaction as the role change);
/// this trait only reads and edits profiles that already exist.
#[async_trait]
pub trait CoachRepository: Send + Sync {
    async fn find_profile_by_member(
        &self,
        member_id: Uuid,
    ) -> Result<Option<CoachProfile>, sqlx::Error>;

    /// Patches non-None fields; returns None when the member has no profile.
    async fn update_profile(
        &self,
        member_id: Uuid,
        patch: &CoachProfilePatch,
    ) -> Result<Option<CoachProfile>, sqlx::Error>;

    async fn list_availability(
        &self,
        coach_profile_id: Uuid,
    ) -> Result<Vec<CoachAvailability>, sqlx::Error>;

    /// Replaces the full weekly schedule in one transaction.
    async fn replace_availability(
        &self,
        coach_profile_id: Uuid,
        slots: &[NewAvailability],
    ) -> Result<Vec<CoachAvailability>, sqlx::Error>;
}
