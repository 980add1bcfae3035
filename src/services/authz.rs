//! The authorization gate. Every mutating entry point calls exactly one of
//! the three guards before touching the ledgers; repositories are never
//! reached from a handler that skipped them.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::db::member_repository::MemberRepository;
use crate::db::organization_repository::OrganizationRepository;
use crate::db::user_repository::UserRepository;
use crate::errors::ApiError;
use crate::models::member::{Member, MemberRole, MemberStatus};
use crate::models::organization::Organization;
use crate::models::user::AppUser;
use crate::routes::auth::claims::SessionClaims;

pub const ADMIN_ROLES: &[MemberRole] = &[MemberRole::Owner, MemberRole::Admin];

/// How a caller is allowed to act on an organization. The platform override
/// is a distinct variant, not a nullable membership, so downstream code has
/// to acknowledge it.
#[derive(Debug, Clone)]
pub enum OrgAccess {
    Member(Member),
    PlatformOverride,
}

impl OrgAccess {
    pub fn role(&self) -> Option<MemberRole> {
        match self {
            OrgAccess::Member(member) => Some(member.role),
            OrgAccess::PlatformOverride => None,
        }
    }

    pub fn member(&self) -> Option<&Member> {
        match self {
            OrgAccess::Member(member) => Some(member),
            OrgAccess::PlatformOverride => None,
        }
    }

    pub fn is_platform_override(&self) -> bool {
        matches!(self, OrgAccess::PlatformOverride)
    }
}

/// Per-request organization context produced by `require_org_access`.
#[derive(Debug, Clone)]
pub struct OrgContext {
    pub user: AppUser,
    pub organization: Organization,
    pub access: OrgAccess,
}

/// Constraint for `require_org_access`. Defaults allow any active member
/// and let super admins through without a membership row.
#[derive(Debug, Clone, Copy)]
pub struct OrgGuard {
    pub roles: Option<&'static [MemberRole]>,
    pub allow_super_admin: bool,
}

impl Default for OrgGuard {
    fn default() -> Self {
        Self {
            roles: None,
            allow_super_admin: true,
        }
    }
}

impl OrgGuard {
    pub fn any_member() -> Self {
        Self::default()
    }

    pub fn roles(roles: &'static [MemberRole]) -> Self {
        Self {
            roles: Some(roles),
            ..Self::default()
        }
    }

    pub fn without_super_admin(mut self) -> Self {
        self.allow_super_admin = false;
        self
    }
}

pub struct AuthGate {
    users: Arc<dyn UserRepository>,
    orgs: Arc<dyn OrganizationRepository>,
    members: Arc<dyn MemberRepository>,
}

impl AuthGate {
    pub fn new(
        users: Arc<dyn UserRepository>,
        orgs: Arc<dyn OrganizationRepository>,
        members: Arc<dyn MemberRepository>,
    ) -> Self {
        Self {
            users,
            orgs,
            members,
        }
    }

    /// Signed-in check. Resolves (lazily creating) the AppUser record and
    /// rejects platform-disabled accounts.
    pub async fn require_user(&self, claims: &SessionClaims) -> Result<AppUser, ApiError> {
        let user = self
            .users
            .get_or_create(&claims.sub, OffsetDateTime::now_utc())
            .await?;
        if user.is_disabled {
            return Err(ApiError::Forbidden("Account is disabled".to_string()));
        }
        Ok(user)
    }

    /// Signed-in + active-organization check. Resolves (lazily creating)
    /// the Organization, applies the super-admin override when allowed, and
    /// otherwise loads and validates the caller's membership.
    pub async fn require_org_access(
        &self,
        claims: &SessionClaims,
        guard: OrgGuard,
    ) -> Result<OrgContext, ApiError> {
        let user = self.require_user(claims).await?;
        let active_org = claims.org.as_deref().ok_or(ApiError::NoActiveOrg)?;
        let organization = self.orgs.get_or_create_by_external_id(active_org).await?;

        if guard.allow_super_admin && user.is_super_admin {
            return Ok(OrgContext {
                user,
                organization,
                access: OrgAccess::PlatformOverride,
            });
        }

        let member = self
            .members
            .find(organization.id, user.id)
            .await?
            .ok_or(ApiError::NoMembership)?;

        // First authenticated sight of a provider-invited member.
        let member = if member.status == MemberStatus::Invited {
            self.members
                .activate_if_invited(organization.id, user.id)
                .await?
                .unwrap_or(member)
        } else {
            member
        };

        if member.status != MemberStatus::Active {
            return Err(ApiError::MembershipNotActive);
        }
        if let Some(roles) = guard.roles {
            if !roles.contains(&member.role) {
                return Err(ApiError::InsufficientRole);
            }
        }

        Ok(OrgContext {
            user,
            organization,
            access: OrgAccess::Member(member),
        })
    }

    /// Platform super-admin check; no organization context required.
    pub async fn require_super_admin(&self, claims: &SessionClaims) -> Result<AppUser, ApiError> {
        let user = self.require_user(claims).await?;
        if !user.is_super_admin {
            return Err(ApiError::Forbidden("Super admin required".to_string()));
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_db::MockDb;

    fn gate_with(db: Arc<MockDb>) -> AuthGate {
        AuthGate::new(db.clone(), db.clone(), db)
    }

    fn claims(sub: &str, org: Option<&str>) -> SessionClaims {
        SessionClaims {
            sub: sub.to_string(),
            org: org.map(|o| o.to_string()),
            org_role: None,
            exp: 4_102_444_800, // far future
            iss: "swimdeck".into(),
            aud: "swimdeck-api".into(),
        }
    }

    #[tokio::test]
    async fn require_user_creates_on_first_sight() {
        let db = Arc::new(MockDb::new());
        let gate = gate_with(db.clone());

        let user = gate.require_user(&claims("user_new", None)).await.unwrap();
        assert_eq!(user.external_id, "user_new");
        assert!(!user.is_super_admin);
        assert_eq!(db.users.lock().unwrap().len(), 1);

        // Idempotent on the second request.
        let again = gate.require_user(&claims("user_new", None)).await.unwrap();
        assert_eq!(again.id, user.id);
        assert_eq!(db.users.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disabled_account_is_rejected() {
        let db = Arc::new(MockDb::new());
        let user = db.seed_user("user_gone");
        db.set_disabled(user.id, true).await.unwrap();
        let gate = gate_with(db);

        let err = gate
            .require_user(&claims("user_gone", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn no_active_org_is_a_bad_request_not_forbidden() {
        let db = Arc::new(MockDb::new());
        db.seed_user("user_1");
        let gate = gate_with(db);

        let err = gate
            .require_org_access(&claims("user_1", None), OrgGuard::any_member())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NoActiveOrg));
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_membership_fails_no_membership() {
        let db = Arc::new(MockDb::new());
        db.seed_user("user_1");
        db.seed_org("org_1", "Acme");
        let gate = gate_with(db);

        let err = gate
            .require_org_access(&claims("user_1", Some("org_1")), OrgGuard::any_member())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NoMembership));
    }

    #[tokio::test]
    async fn disabled_membership_fails_not_active() {
        let db = Arc::new(MockDb::new());
        let user = db.seed_user("user_1");
        let org = db.seed_org("org_1", "Acme");
        db.seed_member(org.id, user.id, MemberRole::Member, MemberStatus::Disabled);
        let gate = gate_with(db);

        let err = gate
            .require_org_access(&claims("user_1", Some("org_1")), OrgGuard::any_member())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::MembershipNotActive));
    }

    #[tokio::test]
    async fn invited_membership_activates_on_first_sight() {
        let db = Arc::new(MockDb::new());
        let user = db.seed_user("user_1");
        let org = db.seed_org("org_1", "Acme");
        db.seed_member(org.id, user.id, MemberRole::Coach, MemberStatus::Invited);
        let gate = gate_with(db.clone());

        let ctx = gate
            .require_org_access(&claims("user_1", Some("org_1")), OrgGuard::any_member())
            .await
            .unwrap();
        let member = ctx.access.member().unwrap();
        assert_eq!(member.status, MemberStatus::Active);

        let stored = db.find(org.id, user.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MemberStatus::Active);
    }

    #[tokio::test]
    async fn role_constraint_is_enforced() {
        let db = Arc::new(MockDb::new());
        let user = db.seed_user("user_1");
        let org = db.seed_org("org_1", "Acme");
        db.seed_member(org.id, user.id, MemberRole::Coach, MemberStatus::Active);
        let gate = gate_with(db);

        let err = gate
            .require_org_access(&claims("user_1", Some("org_1")), OrgGuard::roles(ADMIN_ROLES))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InsufficientRole));
    }

    #[tokio::test]
    async fn super_admin_gets_platform_override_without_membership() {
        let db = Arc::new(MockDb::new());
        db.seed_super_admin("user_root");
        db.seed_org("org_1", "Acme");
        let gate = gate_with(db);

        let ctx = gate
            .require_org_access(&claims("user_root", Some("org_1")), OrgGuard::roles(ADMIN_ROLES))
            .await
            .unwrap();
        assert!(ctx.access.is_platform_override());
        assert_eq!(ctx.access.role(), None);
    }

    #[tokio::test]
    async fn super_admin_override_can_be_disallowed() {
        let db = Arc::new(MockDb::new());
        db.seed_super_admin("user_root");
        db.seed_org("org_1", "Acme");
        let gate = gate_with(db);

        let err = gate
            .require_org_access(
                &claims("user_root", Some("org_1")),
                OrgGuard::any_member().without_super_admin(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NoMembership));
    }

    #[tokio::test]
    async fn org_is_lazily_created_on_first_reference() {
        let db = Arc::new(MockDb::new());
        db.seed_super_admin("user_root");
        let gate = gate_with(db.clone());

        let ctx = gate
            .require_org_access(&claims("user_root", Some("org_fresh")), OrgGuard::any_member())
            .await
            .unwrap();
        assert_eq!(ctx.organization.external_id, "org_fresh");
        // Settings row ensured alongside.
        assert!(db
            .settings
            .lock()
            .unwrap()
            .contains_key(&ctx.organization.id));
    }

    #[tokio::test]
    async fn require_super_admin_rejects_regular_users() {
        let db = Arc::new(MockDb::new());
        db.seed_user("user_plain");
        let gate = gate_with(db);

        let err = gate
            .require_super_admin(&claims("user_plain", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }
}
