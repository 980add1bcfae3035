use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// A known human across all organizations. Created lazily on first
/// authenticated request or first identity-provider webhook.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AppUser {
    pub id: Uuid,
    pub external_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub is_super_admin: bool,
    pub is_disabled: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Profile fields mirrored from identity-provider user events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserProfilePatch {
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
}
