//! Identity-provider collaborator: session identity lives in the JWT layer;
//! this service covers the provider's invitation primitives and webhook
//! verification. The core only ever sees the verified, parsed event.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
pub enum IdentityServiceError {
    #[error("identity api error: {0}")]
    Api(String),
    #[error("webhook verification failed: {0}")]
    Webhook(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("config error: {0}")]
    Config(String),
}

/// The provider's view of an organization invitation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderInvitation {
    pub external_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// The provider's view of an organization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderOrganization {
    pub external_id: String,
}

/// A verified, parsed webhook event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub id: String,
    pub r#type: String,
    pub payload: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateInvitationRequest {
    pub org_external_id: String,
    pub email: String,
    pub role: String,
    pub expires_in_days: i64,
    /// Carried back in acceptance webhooks so local invites resolve by id.
    pub metadata: Value,
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn create_organization(
        &self,
        name: &str,
    ) -> Result<ProviderOrganization, IdentityServiceError>;

    async fn delete_organization(
        &self,
        org_external_id: &str,
    ) -> Result<(), IdentityServiceError>;

    async fn create_invitation(
        &self,
        req: CreateInvitationRequest,
    ) -> Result<ProviderInvitation, IdentityServiceError>;

    /// Re-issues an invitation; the provider mints a fresh id and expiry.
    async fn resend_invitation(
        &self,
        external_invitation_id: &str,
    ) -> Result<ProviderInvitation, IdentityServiceError>;

    async fn revoke_invitation(
        &self,
        external_invitation_id: &str,
    ) -> Result<(), IdentityServiceError>;

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<ProviderEvent, IdentityServiceError>;
}

mod http;
mod mock;

#[allow(unused_imports)]
pub use http::HttpIdentityService;
#[allow(unused_imports)]
pub use mock::MockIdentityService;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_captures_invitation_requests() {
        let mock = MockIdentityService::new();
        let req = CreateInvitationRequest {
            org_external_id: "org_123".into(),
            email: "coach@example.com".into(),
            role: "coach".into(),
            expires_in_days: 14,
            metadata: serde_json::json!({ "invitation_id": "11111111-1111-1111-1111-111111111111" }),
        };

        let invite = mock.create_invitation(req.clone()).await.unwrap();
        assert!(invite.external_id.starts_with("pinv_"));

        let captured = mock.created_invitations.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].email, req.email);
        assert_eq!(captured[0].role, req.role);
    }

    #[tokio::test]
    async fn mock_revoke_can_be_programmed_to_fail() {
        let mock = MockIdentityService::new();
        mock.set_fail_revoke(true);
        let result = mock.revoke_invitation("pinv_1").await;
        assert!(matches!(result, Err(IdentityServiceError::Api(_))));
        assert!(mock.revoked_invitations.lock().unwrap().is_empty());
    }

    #[test]
    fn http_verify_webhook_rejects_invalid_signature() {
        let svc = HttpIdentityService::new(
            "https://identity.example.test",
            "test_api_key",
            "whsec_test",
        );
        let payload = br#"{ "id": "evt_123", "type": "user.created", "data": {} }"#;
        let result = svc.verify_webhook(payload, "t=1,v1=deadbeef");
        assert!(matches!(result, Err(IdentityServiceError::Webhook(_))));
    }

    #[test]
    fn http_verify_webhook_accepts_valid_signature() {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let secret = "whsec_test";
        let svc = HttpIdentityService::new("https://identity.example.test", "key", secret);
        let payload = br#"{ "id": "evt_123", "type": "user.created", "data": { "id": "user_1" } }"#;

        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(payload);
        let signature = hex::encode(mac.finalize().into_bytes());

        let header = format!("t={timestamp},v1={signature}");
        let event = svc.verify_webhook(payload, &header).unwrap();
        assert_eq!(event.id, "evt_123");
        assert_eq!(event.r#type, "user.created");
        assert_eq!(event.payload["id"], "user_1");
    }
}
