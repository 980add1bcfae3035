#![allow(dead_code)]
//! In-memory stand-in for every repository trait, used by unit tests.
//! Mirrors the Postgres implementations' behavior, including the membership
//! ledger invariants, so guard and route tests exercise the real rules.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::db::coach_repository::CoachRepository;
use crate::db::invitation_repository::InvitationRepository;
use crate::db::member_repository::{MemberLedgerError, MemberRepository};
use crate::db::organization_repository::{OrganizationRepository, PLACEHOLDER_ORG_NAME};
use crate::db::rate_limit_repository::RateLimitRepository;
use crate::db::user_repository::UserRepository;
use crate::db::webhook_event_repository::WebhookEventRepository;
use crate::models::coach::{CoachAvailability, CoachProfile, CoachProfilePatch, NewAvailability};
use crate::models::invitation::{Invitation, InvitationStatus, NewInvitation};
use crate::models::member::{Member, MemberFilters, MemberRole, MemberStatus, MemberWithUser};
use crate::models::organization::{
    Organization, OrganizationMembershipSummary, OrgSettings, OrgSettingsPatch,
};
use crate::models::user::{AppUser, UserProfilePatch};
use crate::utils::slug::slug_candidates;

#[derive(Default)]
pub struct MockDb {
    pub users: Mutex<Vec<AppUser>>,
    pub orgs: Mutex<Vec<Organization>>,
    pub settings: Mutex<HashMap<Uuid, OrgSettings>>,
    pub members: Mutex<Vec<Member>>,
    pub profiles: Mutex<Vec<CoachProfile>>,
    pub availability: Mutex<Vec<CoachAvailability>>,
    pub invitations: Mutex<Vec<Invitation>>,
    pub webhook_events: Mutex<HashMap<(String, String), Option<OffsetDateTime>>>,
    pub rate_hits: Mutex<HashMap<String, (i32, OffsetDateTime)>>,
    pub should_fail: Mutex<bool>,
}

fn mock_failure() -> sqlx::Error {
    sqlx::Error::Protocol("Mock DB failure".into())
}

impl MockDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_should_fail(&self, fail: bool) {
        *self.should_fail.lock().unwrap() = fail;
    }

    fn fail_check(&self) -> Result<(), sqlx::Error> {
        if *self.should_fail.lock().unwrap() {
            Err(mock_failure())
        } else {
            Ok(())
        }
    }

    pub fn seed_user(&self, external_id: &str) -> AppUser {
        let now = OffsetDateTime::now_utc();
        let user = AppUser {
            id: Uuid::new_v4(),
            external_id: external_id.to_string(),
            email: Some(format!("{external_id}@example.com")),
            name: Some(external_id.to_string()),
            phone: None,
            avatar_url: None,
            is_super_admin: false,
            is_disabled: false,
            last_seen_at: None,
            created_at: now,
            updated_at: now,
        };
        self.users.lock().unwrap().push(user.clone());
        user
    }

    pub fn seed_super_admin(&self, external_id: &str) -> AppUser {
        let user = self.seed_user(external_id);
        let mut users = self.users.lock().unwrap();
        let stored = users.iter_mut().find(|u| u.id == user.id).unwrap();
        stored.is_super_admin = true;
        stored.clone()
    }

    pub fn seed_org(&self, external_id: &str, name: &str) -> Organization {
        let now = OffsetDateTime::now_utc();
        let org = Organization {
            id: Uuid::new_v4(),
            external_id: external_id.to_string(),
            name: name.to_string(),
            slug: self.free_slug(name),
            primary_admin_user_id: None,
            created_at: now,
            updated_at: now,
        };
        self.orgs.lock().unwrap().push(org.clone());
        org
    }

    pub fn seed_member(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
        status: MemberStatus,
    ) -> Member {
        let member = Member {
            id: Uuid::new_v4(),
            organization_id: org_id,
            user_id,
            role,
            status,
            created_at: OffsetDateTime::now_utc(),
            disabled_at: None,
            disabled_reason: None,
        };
        self.members.lock().unwrap().push(member.clone());
        if role == MemberRole::Coach {
            self.attach_profile(member.id);
        }
        member
    }

    pub fn seed_invitation(
        &self,
        org_id: Uuid,
        email: &str,
        role: MemberRole,
        status: InvitationStatus,
    ) -> Invitation {
        let now = OffsetDateTime::now_utc();
        let invitation = Invitation {
            id: Uuid::new_v4(),
            organization_id: org_id,
            email: email.to_lowercase(),
            role,
            status,
            external_invitation_id: Some(format!("pinv_{}", Uuid::new_v4().simple())),
            invited_by: None,
            last_sent_at: Some(now),
            expires_at: Some(now + Duration::days(14)),
            accepted_at: (status == InvitationStatus::Accepted).then_some(now),
            revoked_at: (status == InvitationStatus::Revoked).then_some(now),
            created_at: now,
        };
        self.invitations.lock().unwrap().push(invitation.clone());
        invitation
    }

    fn attach_profile(&self, member_id: Uuid) -> CoachProfile {
        let now = OffsetDateTime::now_utc();
        let profile = CoachProfile {
            id: Uuid::new_v4(),
            member_id,
            bio: None,
            notes: None,
            address: None,
            zip: None,
            phone: None,
            nickname: None,
            created_at: now,
            updated_at: now,
        };
        self.profiles.lock().unwrap().push(profile.clone());
        profile
    }

    fn free_slug(&self, name: &str) -> String {
        let orgs = self.orgs.lock().unwrap();
        slug_candidates(name)
            .find(|candidate| !orgs.iter().any(|o| &o.slug == candidate))
            .unwrap()
    }

    fn with_user_row(&self, member: &Member) -> MemberWithUser {
        let users = self.users.lock().unwrap();
        let user = users.iter().find(|u| u.id == member.user_id);
        MemberWithUser {
            id: member.id,
            organization_id: member.organization_id,
            user_id: member.user_id,
            external_user_id: user.map(|u| u.external_id.clone()).unwrap_or_default(),
            email: user.and_then(|u| u.email.clone()),
            name: user.and_then(|u| u.name.clone()),
            role: member.role,
            status: member.status,
            created_at: member.created_at,
        }
    }
}

#[async_trait]
impl UserRepository for MockDb {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<AppUser>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.id == user_id)
            .cloned())
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<AppUser>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.external_id == external_id)
            .cloned())
    }

    async fn get_or_create(
        &self,
        external_id: &str,
        seen_at: OffsetDateTime,
    ) -> Result<AppUser, sqlx::Error> {
        self.fail_check()?;
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.iter_mut().find(|u| u.external_id == external_id) {
            user.last_seen_at = Some(seen_at);
            user.updated_at = seen_at;
            return Ok(user.clone());
        }
        let user = AppUser {
            id: Uuid::new_v4(),
            external_id: external_id.to_string(),
            email: None,
            name: None,
            phone: None,
            avatar_url: None,
            is_super_admin: false,
            is_disabled: false,
            last_seen_at: Some(seen_at),
            created_at: seen_at,
            updated_at: seen_at,
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn upsert_from_provider(
        &self,
        external_id: &str,
        profile: &UserProfilePatch,
    ) -> Result<AppUser, sqlx::Error> {
        self.fail_check()?;
        let now = OffsetDateTime::now_utc();
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.iter_mut().find(|u| u.external_id == external_id) {
            if profile.email.is_some() {
                user.email = profile.email.clone();
            }
            if profile.name.is_some() {
                user.name = profile.name.clone();
            }
            if profile.phone.is_some() {
                user.phone = profile.phone.clone();
            }
            if profile.avatar_url.is_some() {
                user.avatar_url = profile.avatar_url.clone();
            }
            user.updated_at = now;
            return Ok(user.clone());
        }
        let user = AppUser {
            id: Uuid::new_v4(),
            external_id: external_id.to_string(),
            email: profile.email.clone(),
            name: profile.name.clone(),
            phone: profile.phone.clone(),
            avatar_url: profile.avatar_url.clone(),
            is_super_admin: false,
            is_disabled: false,
            last_seen_at: None,
            created_at: now,
            updated_at: now,
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn set_super_admin(
        &self,
        user_id: Uuid,
        is_super_admin: bool,
    ) -> Result<Option<AppUser>, sqlx::Error> {
        self.fail_check()?;
        let mut users = self.users.lock().unwrap();
        Ok(users.iter_mut().find(|u| u.id == user_id).map(|user| {
            user.is_super_admin = is_super_admin;
            user.updated_at = OffsetDateTime::now_utc();
            user.clone()
        }))
    }

    async fn set_disabled(
        &self,
        user_id: Uuid,
        is_disabled: bool,
    ) -> Result<Option<AppUser>, sqlx::Error> {
        self.fail_check()?;
        let mut users = self.users.lock().unwrap();
        Ok(users.iter_mut().find(|u| u.id == user_id).map(|user| {
            user.is_disabled = is_disabled;
            user.updated_at = OffsetDateTime::now_utc();
            user.clone()
        }))
    }

    async fn list(
        &self,
        page: i64,
        limit: i64,
        search: Option<&str>,
    ) -> Result<(Vec<AppUser>, i64), sqlx::Error> {
        self.fail_check()?;
        let users = self.users.lock().unwrap();
        let term = search.map(|t| t.to_lowercase());
        let matched: Vec<AppUser> = users
            .iter()
            .filter(|u| match &term {
                None => true,
                Some(t) => {
                    u.external_id.to_lowercase().contains(t)
                        || u.email.as_deref().unwrap_or("").to_lowercase().contains(t)
                        || u.name.as_deref().unwrap_or("").to_lowercase().contains(t)
                }
            })
            .cloned()
            .collect();
        let total = matched.len() as i64;
        let start = ((page.max(1) - 1) * limit) as usize;
        let page_rows = matched.into_iter().skip(start).take(limit as usize).collect();
        Ok((page_rows, total))
    }
}

#[async_trait]
impl OrganizationRepository for MockDb {
    async fn find_by_id(&self, org_id: Uuid) -> Result<Option<Organization>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .orgs
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.id == org_id)
            .cloned())
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Organization>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .orgs
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.external_id == external_id)
            .cloned())
    }

    async fn get_or_create_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Organization, sqlx::Error> {
        self.fail_check()?;
        if let Some(org) = OrganizationRepository::find_by_external_id(self, external_id).await? {
            self.ensure_settings(org.id).await?;
            return Ok(org);
        }
        let org = OrganizationRepository::create(self, external_id, PLACEHOLDER_ORG_NAME).await?;
        Ok(org)
    }

    async fn create(&self, external_id: &str, name: &str) -> Result<Organization, sqlx::Error> {
        self.fail_check()?;
        let now = OffsetDateTime::now_utc();
        let org = Organization {
            id: Uuid::new_v4(),
            external_id: external_id.to_string(),
            name: name.to_string(),
            slug: self.free_slug(name),
            primary_admin_user_id: None,
            created_at: now,
            updated_at: now,
        };
        self.orgs.lock().unwrap().push(org.clone());
        self.ensure_settings(org.id).await?;
        Ok(org)
    }

    async fn upsert_from_provider_event(
        &self,
        external_id: &str,
        name: &str,
    ) -> Result<Organization, sqlx::Error> {
        self.fail_check()?;
        let existing = OrganizationRepository::find_by_external_id(self, external_id).await?;
        match existing {
            None => OrganizationRepository::create(self, external_id, name).await,
            Some(org) => {
                let new_slug =
                    (org.name == PLACEHOLDER_ORG_NAME).then(|| self.free_slug(name));
                let mut orgs = self.orgs.lock().unwrap();
                let stored = orgs.iter_mut().find(|o| o.id == org.id).unwrap();
                stored.name = name.to_string();
                if let Some(slug) = new_slug {
                    stored.slug = slug;
                }
                stored.updated_at = OffsetDateTime::now_utc();
                Ok(stored.clone())
            }
        }
    }

    async fn set_primary_admin(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Organization>, sqlx::Error> {
        self.fail_check()?;
        let mut orgs = self.orgs.lock().unwrap();
        Ok(orgs.iter_mut().find(|o| o.id == org_id).map(|org| {
            org.primary_admin_user_id = Some(user_id);
            org.updated_at = OffsetDateTime::now_utc();
            org.clone()
        }))
    }

    async fn rename(&self, org_id: Uuid, name: &str) -> Result<Option<Organization>, sqlx::Error> {
        self.fail_check()?;
        let mut orgs = self.orgs.lock().unwrap();
        Ok(orgs.iter_mut().find(|o| o.id == org_id).map(|org| {
            org.name = name.to_string();
            org.updated_at = OffsetDateTime::now_utc();
            org.clone()
        }))
    }

    async fn delete_by_external_id(&self, external_id: &str) -> Result<bool, sqlx::Error> {
        self.fail_check()?;
        let mut orgs = self.orgs.lock().unwrap();
        let before = orgs.len();
        let removed_ids: Vec<Uuid> = orgs
            .iter()
            .filter(|o| o.external_id == external_id)
            .map(|o| o.id)
            .collect();
        orgs.retain(|o| o.external_id != external_id);
        drop(orgs);
        let mut members = self.members.lock().unwrap();
        members.retain(|m| !removed_ids.contains(&m.organization_id));
        Ok(before > self.orgs.lock().unwrap().len())
    }

    async fn list(
        &self,
        page: i64,
        limit: i64,
        search: Option<&str>,
    ) -> Result<(Vec<Organization>, i64), sqlx::Error> {
        self.fail_check()?;
        let orgs = self.orgs.lock().unwrap();
        let term = search.map(|t| t.to_lowercase());
        let matched: Vec<Organization> = orgs
            .iter()
            .filter(|o| match &term {
                None => true,
                Some(t) => {
                    o.name.to_lowercase().contains(t) || o.slug.to_lowercase().contains(t)
                }
            })
            .cloned()
            .collect();
        let total = matched.len() as i64;
        let start = ((page.max(1) - 1) * limit) as usize;
        let page_rows = matched.into_iter().skip(start).take(limit as usize).collect();
        Ok((page_rows, total))
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<OrganizationMembershipSummary>, sqlx::Error> {
        self.fail_check()?;
        let members = self.members.lock().unwrap();
        let orgs = self.orgs.lock().unwrap();
        let mut summaries: Vec<OrganizationMembershipSummary> = members
            .iter()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| {
                orgs.iter()
                    .find(|o| o.id == m.organization_id)
                    .map(|org| OrganizationMembershipSummary {
                        organization: org.clone(),
                        role: m.role,
                    })
            })
            .collect();
        summaries.sort_by_key(|s| s.organization.created_at);
        Ok(summaries)
    }

    async fn ensure_settings(&self, org_id: Uuid) -> Result<OrgSettings, sqlx::Error> {
        self.fail_check()?;
        let mut settings = self.settings.lock().unwrap();
        Ok(settings
            .entry(org_id)
            .or_insert_with(|| OrgSettings {
                organization_id: org_id,
                timezone: "UTC".to_string(),
                currency: "USD".to_string(),
                features: serde_json::json!({}),
                integration_credentials: None,
                updated_at: OffsetDateTime::now_utc(),
            })
            .clone())
    }

    async fn update_settings(
        &self,
        org_id: Uuid,
        patch: &OrgSettingsPatch,
    ) -> Result<OrgSettings, sqlx::Error> {
        self.ensure_settings(org_id).await?;
        let mut settings = self.settings.lock().unwrap();
        let stored = settings.get_mut(&org_id).unwrap();
        if let Some(tz) = &patch.timezone {
            stored.timezone = tz.clone();
        }
        if let Some(currency) = &patch.currency {
            stored.currency = currency.clone();
        }
        if let Some(features) = &patch.features {
            stored.features = features.clone();
        }
        stored.updated_at = OffsetDateTime::now_utc();
        Ok(stored.clone())
    }
}

#[async_trait]
impl MemberRepository for MockDb {
    async fn find(&self, org_id: Uuid, user_id: Uuid) -> Result<Option<Member>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .members
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.organization_id == org_id && m.user_id == user_id)
            .cloned())
    }

    async fn find_by_external_user_id(
        &self,
        org_id: Uuid,
        external_user_id: &str,
    ) -> Result<Option<MemberWithUser>, sqlx::Error> {
        self.fail_check()?;
        let user_id = {
            let users = self.users.lock().unwrap();
            users
                .iter()
                .find(|u| u.external_id == external_user_id)
                .map(|u| u.id)
        };
        let Some(user_id) = user_id else {
            return Ok(None);
        };
        let member = self.find(org_id, user_id).await?;
        Ok(member.map(|m| self.with_user_row(&m)))
    }

    async fn create(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
        status: MemberStatus,
    ) -> Result<Member, MemberLedgerError> {
        self.fail_check()?;
        let mut members = self.members.lock().unwrap();
        if members
            .iter()
            .any(|m| m.organization_id == org_id && m.user_id == user_id)
        {
            return Err(MemberLedgerError::AlreadyExists);
        }
        if role == MemberRole::Owner
            && members
                .iter()
                .any(|m| m.organization_id == org_id && m.role == MemberRole::Owner)
        {
            return Err(MemberLedgerError::OwnerExists);
        }
        let member = Member {
            id: Uuid::new_v4(),
            organization_id: org_id,
            user_id,
            role,
            status,
            created_at: OffsetDateTime::now_utc(),
            disabled_at: None,
            disabled_reason: None,
        };
        members.push(member.clone());
        drop(members);
        if role == MemberRole::Coach {
            self.attach_profile(member.id);
        }
        Ok(member)
    }

    async fn set_role(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        new_role: MemberRole,
    ) -> Result<Member, MemberLedgerError> {
        self.fail_check()?;
        if new_role == MemberRole::Owner {
            return Err(MemberLedgerError::PromoteToOwner);
        }
        let mut members = self.members.lock().unwrap();
        let owners = members
            .iter()
            .filter(|m| m.organization_id == org_id && m.role == MemberRole::Owner)
            .count();
        let member = members
            .iter_mut()
            .find(|m| m.organization_id == org_id && m.user_id == user_id)
            .ok_or(MemberLedgerError::NotFound)?;

        if member.role == MemberRole::Owner {
            if owners <= 1 {
                return Err(MemberLedgerError::LastOwner);
            }
            return Err(MemberLedgerError::OwnerImmutable);
        }

        let old_role = member.role;
        member.role = new_role;
        let updated = member.clone();
        drop(members);

        if old_role == MemberRole::Coach && new_role != MemberRole::Coach {
            self.profiles
                .lock()
                .unwrap()
                .retain(|p| p.member_id != updated.id);
        }
        if old_role != MemberRole::Coach && new_role == MemberRole::Coach {
            self.attach_profile(updated.id);
        }
        Ok(updated)
    }

    async fn set_status(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        new_status: MemberStatus,
        reason: Option<&str>,
    ) -> Result<Member, MemberLedgerError> {
        self.fail_check()?;
        let mut members = self.members.lock().unwrap();
        let member = members
            .iter_mut()
            .find(|m| m.organization_id == org_id && m.user_id == user_id)
            .ok_or(MemberLedgerError::NotFound)?;

        if member.role == MemberRole::Owner && new_status == MemberStatus::Disabled {
            return Err(MemberLedgerError::OwnerDisable);
        }

        member.status = new_status;
        if new_status == MemberStatus::Disabled {
            member.disabled_at = Some(OffsetDateTime::now_utc());
            member.disabled_reason = reason.map(|r| r.to_string());
        } else {
            member.disabled_at = None;
            member.disabled_reason = None;
        }
        Ok(member.clone())
    }

    async fn remove(&self, org_id: Uuid, user_id: Uuid) -> Result<(), MemberLedgerError> {
        self.fail_check()?;
        let mut members = self.members.lock().unwrap();
        let member = members
            .iter()
            .find(|m| m.organization_id == org_id && m.user_id == user_id)
            .cloned()
            .ok_or(MemberLedgerError::NotFound)?;
        if member.role == MemberRole::Owner {
            return Err(MemberLedgerError::OwnerRemove);
        }
        members.retain(|m| m.id != member.id);
        drop(members);
        self.profiles
            .lock()
            .unwrap()
            .retain(|p| p.member_id != member.id);
        Ok(())
    }

    async fn convert_to_coach(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<Member, MemberLedgerError> {
        self.fail_check()?;
        let current = self
            .find(org_id, user_id)
            .await?
            .ok_or(MemberLedgerError::NotFound)?;
        if current.role == MemberRole::Owner {
            return Err(MemberLedgerError::OwnerImmutable);
        }
        if current.role == MemberRole::Coach {
            return Err(MemberLedgerError::AlreadyCoach);
        }
        self.set_role(org_id, user_id, MemberRole::Coach).await
    }

    async fn convert_from_coach(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        new_role: MemberRole,
    ) -> Result<Member, MemberLedgerError> {
        self.fail_check()?;
        if new_role == MemberRole::Owner {
            return Err(MemberLedgerError::PromoteToOwner);
        }
        let current = self
            .find(org_id, user_id)
            .await?
            .ok_or(MemberLedgerError::NotFound)?;
        if current.role != MemberRole::Coach {
            return Err(MemberLedgerError::NotACoach);
        }
        self.set_role(org_id, user_id, new_role).await
    }

    async fn list_by_org(
        &self,
        org_id: Uuid,
        filters: &MemberFilters,
    ) -> Result<Vec<MemberWithUser>, sqlx::Error> {
        self.fail_check()?;
        let members: Vec<Member> = self
            .members
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.organization_id == org_id)
            .filter(|m| filters.role.map(|r| m.role == r).unwrap_or(true))
            .filter(|m| filters.status.map(|s| m.status == s).unwrap_or(true))
            .cloned()
            .collect();
        let mut rows: Vec<MemberWithUser> =
            members.iter().map(|m| self.with_user_row(m)).collect();
        rows.sort_by(|a, b| {
            let name_a = a
                .name
                .clone()
                .or_else(|| a.email.clone())
                .unwrap_or_else(|| a.external_user_id.clone())
                .to_lowercase();
            let name_b = b
                .name
                .clone()
                .or_else(|| b.email.clone())
                .unwrap_or_else(|| b.external_user_id.clone())
                .to_lowercase();
            (a.role.precedence(), name_a).cmp(&(b.role.precedence(), name_b))
        });
        Ok(rows)
    }

    async fn upsert_from_provider(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
        status: MemberStatus,
    ) -> Result<Member, sqlx::Error> {
        self.fail_check()?;
        let existing = self.find(org_id, user_id).await?;
        match existing {
            Some(member) if member.role == MemberRole::Owner => Ok(member),
            Some(member) => {
                let mut members = self.members.lock().unwrap();
                let stored = members.iter_mut().find(|m| m.id == member.id).unwrap();
                stored.role = role;
                stored.status = status;
                Ok(stored.clone())
            }
            None => MemberRepository::create(self, org_id, user_id, role, status)
                .await
                .map_err(|_| mock_failure()),
        }
    }

    async fn remove_from_provider(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        self.fail_check()?;
        let mut members = self.members.lock().unwrap();
        let before = members.len();
        members.retain(|m| {
            !(m.organization_id == org_id && m.user_id == user_id && m.role != MemberRole::Owner)
        });
        Ok(members.len() < before)
    }

    async fn activate_if_invited(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Member>, sqlx::Error> {
        self.fail_check()?;
        let mut members = self.members.lock().unwrap();
        Ok(members
            .iter_mut()
            .find(|m| {
                m.organization_id == org_id
                    && m.user_id == user_id
                    && m.status == MemberStatus::Invited
            })
            .map(|m| {
                m.status = MemberStatus::Active;
                m.clone()
            }))
    }

    async fn email_is_member(&self, org_id: Uuid, email: &str) -> Result<bool, sqlx::Error> {
        self.fail_check()?;
        let users = self.users.lock().unwrap();
        let members = self.members.lock().unwrap();
        Ok(members
            .iter()
            .filter(|m| m.organization_id == org_id && m.status != MemberStatus::Disabled)
            .any(|m| {
                users
                    .iter()
                    .find(|u| u.id == m.user_id)
                    .and_then(|u| u.email.as_deref())
                    .map(|e| e.eq_ignore_ascii_case(email))
                    .unwrap_or(false)
            }))
    }
}

#[async_trait]
impl InvitationRepository for MockDb {
    async fn find_by_id(&self, org_id: Uuid, id: Uuid) -> Result<Option<Invitation>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .invitations
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.organization_id == org_id && i.id == id)
            .cloned())
    }

    async fn find_any(&self, id: Uuid) -> Result<Option<Invitation>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .invitations
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.id == id)
            .cloned())
    }

    async fn find_pending_by_email(
        &self,
        org_id: Uuid,
        email: &str,
    ) -> Result<Option<Invitation>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .invitations
            .lock()
            .unwrap()
            .iter()
            .find(|i| {
                i.organization_id == org_id
                    && i.email == email
                    && i.status == InvitationStatus::Pending
            })
            .cloned())
    }

    async fn has_accepted_for_email(
        &self,
        org_id: Uuid,
        email: &str,
    ) -> Result<bool, sqlx::Error> {
        self.fail_check()?;
        Ok(self.invitations.lock().unwrap().iter().any(|i| {
            i.organization_id == org_id
                && i.email == email
                && i.status == InvitationStatus::Accepted
        }))
    }

    async fn find_by_external_id(
        &self,
        external_invitation_id: &str,
    ) -> Result<Option<Invitation>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .invitations
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.external_invitation_id.as_deref() == Some(external_invitation_id))
            .cloned())
    }

    async fn insert(&self, new: &NewInvitation) -> Result<Invitation, sqlx::Error> {
        self.fail_check()?;
        let mut invitations = self.invitations.lock().unwrap();
        // Partial unique index stand-in.
        if invitations.iter().any(|i| {
            i.organization_id == new.organization_id
                && i.email == new.email
                && i.status == InvitationStatus::Pending
        }) {
            return Err(mock_failure());
        }
        let invitation = Invitation {
            id: new.id,
            organization_id: new.organization_id,
            email: new.email.clone(),
            role: new.role,
            status: InvitationStatus::Pending,
            external_invitation_id: Some(new.external_invitation_id.clone()),
            invited_by: new.invited_by,
            last_sent_at: Some(new.last_sent_at),
            expires_at: Some(new.expires_at),
            accepted_at: None,
            revoked_at: None,
            created_at: OffsetDateTime::now_utc(),
        };
        invitations.push(invitation.clone());
        Ok(invitation)
    }

    async fn refresh_pending(
        &self,
        id: Uuid,
        external_invitation_id: &str,
        last_sent_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> Result<Option<Invitation>, sqlx::Error> {
        self.fail_check()?;
        let mut invitations = self.invitations.lock().unwrap();
        Ok(invitations
            .iter_mut()
            .find(|i| i.id == id && i.status == InvitationStatus::Pending)
            .map(|i| {
                i.external_invitation_id = Some(external_invitation_id.to_string());
                i.last_sent_at = Some(last_sent_at);
                i.expires_at = Some(expires_at);
                i.clone()
            }))
    }

    async fn mark_accepted(
        &self,
        id: Uuid,
        accepted_at: OffsetDateTime,
    ) -> Result<Option<Invitation>, sqlx::Error> {
        self.fail_check()?;
        let mut invitations = self.invitations.lock().unwrap();
        Ok(invitations
            .iter_mut()
            .find(|i| i.id == id && i.status == InvitationStatus::Pending)
            .map(|i| {
                i.status = InvitationStatus::Accepted;
                i.accepted_at = Some(accepted_at);
                i.clone()
            }))
    }

    async fn mark_revoked(
        &self,
        id: Uuid,
        revoked_at: OffsetDateTime,
    ) -> Result<Option<Invitation>, sqlx::Error> {
        self.fail_check()?;
        let mut invitations = self.invitations.lock().unwrap();
        Ok(invitations
            .iter_mut()
            .find(|i| i.id == id && i.status == InvitationStatus::Pending)
            .map(|i| {
                i.status = InvitationStatus::Revoked;
                i.revoked_at = Some(revoked_at);
                i.clone()
            }))
    }

    async fn mark_expired(&self, id: Uuid) -> Result<Option<Invitation>, sqlx::Error> {
        self.fail_check()?;
        let mut invitations = self.invitations.lock().unwrap();
        Ok(invitations
            .iter_mut()
            .find(|i| i.id == id && i.status == InvitationStatus::Pending)
            .map(|i| {
                i.status = InvitationStatus::Expired;
                i.clone()
            }))
    }

    async fn list_by_org(
        &self,
        org_id: Uuid,
        status: Option<InvitationStatus>,
        page: i64,
        limit: i64,
    ) -> Result<(Vec<Invitation>, i64), sqlx::Error> {
        self.fail_check()?;
        let invitations = self.invitations.lock().unwrap();
        let mut matched: Vec<Invitation> = invitations
            .iter()
            .filter(|i| i.organization_id == org_id)
            .filter(|i| status.map(|s| i.status == s).unwrap_or(true))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matched.len() as i64;
        let start = ((page.max(1) - 1) * limit) as usize;
        let page_rows = matched.into_iter().skip(start).take(limit as usize).collect();
        Ok((page_rows, total))
    }
}

#[async_trait]
impl CoachRepository for MockDb {
    async fn find_profile_by_member(
        &self,
        member_id: Uuid,
    ) -> Result<Option<CoachProfile>, sqlx::Error> {
        self.fail_check()?;
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.member_id == member_id)
            .cloned())
    }

    async fn update_profile(
        &self,
        member_id: Uuid,
        patch: &CoachProfilePatch,
    ) -> Result<Option<CoachProfile>, sqlx::Error> {
        self.fail_check()?;
        let mut profiles = self.profiles.lock().unwrap();
        Ok(profiles
            .iter_mut()
            .find(|p| p.member_id == member_id)
            .map(|p| {
                if patch.bio.is_some() {
                    p.bio = patch.bio.clone();
                }
                if patch.notes.is_some() {
                    p.notes = patch.notes.clone();
                }
                if patch.address.is_some() {
                    p.address = patch.address.clone();
                }
                if patch.zip.is_some() {
                    p.zip = patch.zip.clone();
                }
                if patch.phone.is_some() {
                    p.phone = patch.phone.clone();
                }
                if patch.nickname.is_some() {
                    p.nickname = patch.nickname.clone();
                }
                p.updated_at = OffsetDateTime::now_utc();
                p.clone()
            }))
    }

    async fn list_availability(
        &self,
        coach_profile_id: Uuid,
    ) -> Result<Vec<CoachAvailability>, sqlx::Error> {
        self.fail_check()?;
        let mut slots: Vec<CoachAvailability> = self
            .availability
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.coach_profile_id == coach_profile_id)
            .cloned()
            .collect();
        slots.sort_by_key(|s| (s.day_of_week, s.start_minutes));
        Ok(slots)
    }

    async fn replace_availability(
        &self,
        coach_profile_id: Uuid,
        slots: &[NewAvailability],
    ) -> Result<Vec<CoachAvailability>, sqlx::Error> {
        self.fail_check()?;
        let mut availability = self.availability.lock().unwrap();
        availability.retain(|a| a.coach_profile_id != coach_profile_id);
        let mut saved: Vec<CoachAvailability> = slots
            .iter()
            .map(|s| CoachAvailability {
                id: Uuid::new_v4(),
                coach_profile_id,
                day_of_week: s.day_of_week,
                start_minutes: s.start_minutes,
                end_minutes: s.end_minutes,
            })
            .collect();
        availability.extend(saved.clone());
        saved.sort_by_key(|s| (s.day_of_week, s.start_minutes));
        Ok(saved)
    }
}

#[async_trait]
impl WebhookEventRepository for MockDb {
    async fn claim(&self, provider: &str, event_id: &str) -> Result<bool, sqlx::Error> {
        self.fail_check()?;
        let mut events = self.webhook_events.lock().unwrap();
        let key = (provider.to_string(), event_id.to_string());
        match events.get(&key) {
            Some(Some(_)) => Ok(false),
            Some(None) => Ok(true),
            None => {
                events.insert(key, None);
                Ok(true)
            }
        }
    }

    async fn mark_processed(&self, provider: &str, event_id: &str) -> Result<(), sqlx::Error> {
        self.fail_check()?;
        let mut events = self.webhook_events.lock().unwrap();
        events.insert(
            (provider.to_string(), event_id.to_string()),
            Some(OffsetDateTime::now_utc()),
        );
        Ok(())
    }
}

#[async_trait]
impl RateLimitRepository for MockDb {
    async fn hit(&self, key: &str, limit: i32, window: Duration) -> Result<bool, sqlx::Error> {
        self.fail_check()?;
        let now = OffsetDateTime::now_utc();
        let mut hits = self.rate_hits.lock().unwrap();
        let entry = hits
            .entry(key.to_string())
            .or_insert((0, now + window));
        if entry.1 < now {
            *entry = (0, now + window);
        }
        entry.0 += 1;
        Ok(entry.0 <= limit)
    }
}
