use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::member::MemberRole;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    pub slug: String,
    pub primary_admin_user_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrgSettings {
    pub organization_id: Uuid,
    pub timezone: String,
    pub currency: String,
    pub features: Value,
    // Third-party credentials never leave the server.
    #[serde(skip_serializing, default)]
    pub integration_credentials: Option<Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrgSettingsPatch {
    pub timezone: Option<String>,
    pub currency: Option<String>,
    pub features: Option<Value>,
}

/// One row of "the organizations this user belongs to", as returned by
/// the caller-facing listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationMembershipSummary {
    pub organization: Organization,
    pub role: MemberRole,
}
