use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use super::{
    CreateInvitationRequest, IdentityService, IdentityServiceError, ProviderEvent,
    ProviderInvitation, ProviderOrganization,
};

/// Maximum age of a webhook timestamp before it is rejected as a replay.
const WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// HTTP client for the identity provider's management API, plus webhook
/// signature verification (`t=<unix>,v1=<hex hmac-sha256>` over
/// `"{t}.{payload}"`).
pub struct HttpIdentityService {
    client: Client,
    base_url: String,
    api_key: String,
    webhook_secret: String,
}

impl HttpIdentityService {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            webhook_secret: webhook_secret.into(),
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    async fn post_json(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<Value, IdentityServiceError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| IdentityServiceError::Api(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(IdentityServiceError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(IdentityServiceError::Api(format!(
                "{path} returned {status}: {detail}"
            )));
        }
        response
            .json()
            .await
            .map_err(|err| IdentityServiceError::Api(err.to_string()))
    }

    fn parse_invitation(value: &Value) -> Result<ProviderInvitation, IdentityServiceError> {
        let external_id = value
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| IdentityServiceError::Api("invitation response missing id".into()))?
            .to_string();
        let expires_at = value
            .get("expires_at")
            .and_then(|v| v.as_i64())
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
            .ok_or_else(|| {
                IdentityServiceError::Api("invitation response missing expires_at".into())
            })?;
        Ok(ProviderInvitation {
            external_id,
            expires_at,
        })
    }
}

#[async_trait]
impl IdentityService for HttpIdentityService {
    async fn create_organization(
        &self,
        name: &str,
    ) -> Result<ProviderOrganization, IdentityServiceError> {
        let body = serde_json::json!({ "name": name });
        let value = self.post_json("/v1/organizations", &body).await?;
        let external_id = value
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| IdentityServiceError::Api("organization response missing id".into()))?
            .to_string();
        Ok(ProviderOrganization { external_id })
    }

    async fn delete_organization(
        &self,
        org_external_id: &str,
    ) -> Result<(), IdentityServiceError> {
        let url = format!("{}/v1/organizations/{org_external_id}", self.base_url);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|err| IdentityServiceError::Api(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(IdentityServiceError::NotFound(org_external_id.to_string()));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(IdentityServiceError::Api(format!(
                "organization delete returned {status}: {detail}"
            )));
        }
        Ok(())
    }

    async fn create_invitation(
        &self,
        req: CreateInvitationRequest,
    ) -> Result<ProviderInvitation, IdentityServiceError> {
        let path = format!("/v1/organizations/{}/invitations", req.org_external_id);
        let body = serde_json::json!({
            "email_address": req.email,
            "role": req.role,
            "expires_in_days": req.expires_in_days,
            "metadata": req.metadata,
        });
        let value = self.post_json(&path, &body).await?;
        Self::parse_invitation(&value)
    }

    async fn resend_invitation(
        &self,
        external_invitation_id: &str,
    ) -> Result<ProviderInvitation, IdentityServiceError> {
        let path = format!("/v1/invitations/{external_invitation_id}/resend");
        let value = self.post_json(&path, &Value::Null).await?;
        Self::parse_invitation(&value)
    }

    async fn revoke_invitation(
        &self,
        external_invitation_id: &str,
    ) -> Result<(), IdentityServiceError> {
        let path = format!("/v1/invitations/{external_invitation_id}/revoke");
        self.post_json(&path, &Value::Null).await?;
        Ok(())
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<ProviderEvent, IdentityServiceError> {
        let mut timestamp: Option<i64> = None;
        let mut signature: Option<Vec<u8>> = None;
        for part in signature_header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => signature = hex::decode(value).ok(),
                _ => {}
            }
        }
        let timestamp = timestamp
            .ok_or_else(|| IdentityServiceError::Webhook("missing timestamp".into()))?;
        let signature = signature
            .ok_or_else(|| IdentityServiceError::Webhook("missing v1 signature".into()))?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if (now - timestamp).abs() > WEBHOOK_TOLERANCE_SECS {
            return Err(IdentityServiceError::Webhook(
                "timestamp outside tolerance".into(),
            ));
        }

        let mut mac = Hmac::<Sha256>::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| IdentityServiceError::Config("invalid webhook secret".into()))?;
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(payload);
        let expected = mac.finalize().into_bytes();

        if expected.as_slice().ct_eq(signature.as_slice()).unwrap_u8() != 1 {
            return Err(IdentityServiceError::Webhook(
                "signature mismatch".into(),
            ));
        }

        let value: Value = serde_json::from_slice(payload)
            .map_err(|err| IdentityServiceError::Webhook(err.to_string()))?;
        let id = value
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| IdentityServiceError::Webhook("event missing id".into()))?
            .to_string();
        let r#type = value
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| IdentityServiceError::Webhook("event missing type".into()))?
            .to_string();
        let payload = value.get("data").cloned().unwrap_or(Value::Null);

        Ok(ProviderEvent { id, r#type, payload })
    }
}
