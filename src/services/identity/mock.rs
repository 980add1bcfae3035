#![allow(dead_code)]
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};

use super::{
    CreateInvitationRequest, IdentityService, IdentityServiceError, ProviderEvent,
    ProviderInvitation, ProviderOrganization,
};

/// Test double: records every call and can be programmed to fail. Webhook
/// verification accepts any payload whose signature header is exactly
/// `"test-signature"`.
pub struct MockIdentityService {
    pub created_orgs: Mutex<Vec<String>>,
    pub deleted_orgs: Mutex<Vec<String>>,
    pub created_invitations: Mutex<Vec<CreateInvitationRequest>>,
    pub resent_invitations: Mutex<Vec<String>>,
    pub revoked_invitations: Mutex<Vec<String>>,
    fail_create: AtomicBool,
    fail_resend: AtomicBool,
    fail_revoke: AtomicBool,
    counter: AtomicU64,
}

impl MockIdentityService {
    pub fn new() -> Self {
        Self {
            created_orgs: Mutex::new(vec![]),
            deleted_orgs: Mutex::new(vec![]),
            created_invitations: Mutex::new(vec![]),
            resent_invitations: Mutex::new(vec![]),
            revoked_invitations: Mutex::new(vec![]),
            fail_create: AtomicBool::new(false),
            fail_resend: AtomicBool::new(false),
            fail_revoke: AtomicBool::new(false),
            counter: AtomicU64::new(0),
        }
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_resend(&self, fail: bool) {
        self.fail_resend.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_revoke(&self, fail: bool) {
        self.fail_revoke.store(fail, Ordering::SeqCst);
    }

    fn next_invitation(&self, expires_in_days: i64) -> ProviderInvitation {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        ProviderInvitation {
            external_id: format!("pinv_{n}"),
            expires_at: OffsetDateTime::now_utc() + Duration::days(expires_in_days),
        }
    }
}

impl Default for MockIdentityService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityService for MockIdentityService {
    async fn create_organization(
        &self,
        name: &str,
    ) -> Result<ProviderOrganization, IdentityServiceError> {
        self.created_orgs.lock().unwrap().push(name.to_string());
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ProviderOrganization {
            external_id: format!("org_mock_{n}"),
        })
    }

    async fn delete_organization(
        &self,
        org_external_id: &str,
    ) -> Result<(), IdentityServiceError> {
        self.deleted_orgs
            .lock()
            .unwrap()
            .push(org_external_id.to_string());
        Ok(())
    }

    async fn create_invitation(
        &self,
        req: CreateInvitationRequest,
    ) -> Result<ProviderInvitation, IdentityServiceError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(IdentityServiceError::Api("mock create failure".into()));
        }
        let invite = self.next_invitation(req.expires_in_days);
        self.created_invitations.lock().unwrap().push(req);
        Ok(invite)
    }

    async fn resend_invitation(
        &self,
        external_invitation_id: &str,
    ) -> Result<ProviderInvitation, IdentityServiceError> {
        if self.fail_resend.load(Ordering::SeqCst) {
            return Err(IdentityServiceError::Api("mock resend failure".into()));
        }
        self.resent_invitations
            .lock()
            .unwrap()
            .push(external_invitation_id.to_string());
        Ok(self.next_invitation(14))
    }

    async fn revoke_invitation(
        &self,
        external_invitation_id: &str,
    ) -> Result<(), IdentityServiceError> {
        if self.fail_revoke.load(Ordering::SeqCst) {
            return Err(IdentityServiceError::Api("mock revoke failure".into()));
        }
        self.revoked_invitations
            .lock()
            .unwrap()
            .push(external_invitation_id.to_string());
        Ok(())
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<ProviderEvent, IdentityServiceError> {
        if signature_header != "test-signature" {
            return Err(IdentityServiceError::Webhook("bad test signature".into()));
        }
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|err| IdentityServiceError::Webhook(err.to_string()))?;
        Ok(ProviderEvent {
            id: value["id"].as_str().unwrap_or("evt_unknown").to_string(),
            r#type: value["type"].as_str().unwrap_or("unknown").to_string(),
            payload: value.get("data").cloned().unwrap_or(serde_json::Value::Null),
        })
    }
}
