use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "member_role")]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Admin,
    Coach,
    Member,
}

impl MemberRole {
    /// Listing order: owner first, plain members last.
    pub fn precedence(self) -> i16 {
        match self {
            MemberRole::Owner => 0,
            MemberRole::Admin => 1,
            MemberRole::Coach => 2,
            MemberRole::Member => 3,
        }
    }

    /// Parses the raw role claim carried by identity-provider sessions and
    /// webhook payloads. The provider is inconsistent about casing and
    /// sometimes prefixes with "org:".
    pub fn from_claim(raw: &str) -> Option<MemberRole> {
        let normalized = raw.trim().to_ascii_lowercase();
        let normalized = normalized.strip_prefix("org:").unwrap_or(&normalized);
        match normalized {
            "owner" => Some(MemberRole::Owner),
            "admin" => Some(MemberRole::Admin),
            "coach" => Some(MemberRole::Coach),
            "member" | "basic_member" => Some(MemberRole::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "member_status")]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum MemberStatus {
    Invited,
    Active,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Member {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
    pub status: MemberStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub disabled_at: Option<OffsetDateTime>,
    pub disabled_reason: Option<String>,
}

/// Member joined with directory fields, for org-facing listings.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MemberWithUser {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub external_user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: MemberRole,
    pub status: MemberStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct MemberFilters {
    pub role: Option<MemberRole>,
    pub status: Option<MemberStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_claim_parsing_tolerates_provider_casing() {
        assert_eq!(MemberRole::from_claim("admin"), Some(MemberRole::Admin));
        assert_eq!(MemberRole::from_claim("ADMIN"), Some(MemberRole::Admin));
        assert_eq!(MemberRole::from_claim("org:owner"), Some(MemberRole::Owner));
        assert_eq!(MemberRole::from_claim(" COACH "), Some(MemberRole::Coach));
        assert_eq!(
            MemberRole::from_claim("basic_member"),
            Some(MemberRole::Member)
        );
        assert_eq!(MemberRole::from_claim("superuser"), None);
    }

    #[test]
    fn role_precedence_orders_owner_first() {
        let mut roles = vec![
            MemberRole::Member,
            MemberRole::Owner,
            MemberRole::Coach,
            MemberRole::Admin,
        ];
        roles.sort_by_key(|r| r.precedence());
        assert_eq!(
            roles,
            vec![
                MemberRole::Owner,
                MemberRole::Admin,
                MemberRole::Coach,
                MemberRole::Member
            ]
        );
    }

    #[test]
    fn status_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&MemberStatus::Invited).unwrap(),
            "\"INVITED\""
        );
        assert_eq!(
            serde_json::to_string(&MemberStatus::Active).unwrap(),
            "\"ACTIVE\""
        );
    }
}
