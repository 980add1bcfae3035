use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Satellite record attached 1:1 to a coach-role membership. Exists exactly
/// while the member's role is coach; the ledger creates and deletes it in
/// the same transaction as the role change.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CoachProfile {
    pub id: Uuid,
    pub member_id: Uuid,
    pub bio: Option<String>,
    pub notes: Option<String>,
    pub address: Option<String>,
    pub zip: Option<String>,
    pub phone: Option<String>,
    pub nickname: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoachProfilePatch {
    pub bio: Option<String>,
    pub notes: Option<String>,
    pub address: Option<String>,
    pub zip: Option<String>,
    pub phone: Option<String>,
    pub nickname: Option<String>,
}

/// Weekly availability slot. Times are minutes since midnight internally;
/// the API boundary speaks HH:mm.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CoachAvailability {
    pub id: Uuid,
    pub coach_profile_id: Uuid,
    pub day_of_week: i16,
    pub start_minutes: i16,
    pub end_minutes: i16,
}

#[derive(Debug, Clone)]
pub struct NewAvailability {
    pub day_of_week: i16,
    pub start_minutes: i16,
    pub end_minutes: i16,
}
