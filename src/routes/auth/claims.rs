use serde::{Deserialize, Serialize};

/// Claims carried by the identity provider's session token. `sub` is the
/// provider's user id; `org` is the active-organization selection, when one
/// has been made; `org_role` is the provider's raw role claim and is never
/// trusted for authorization (the membership ledger is).
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct SessionClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_role: Option<String>,
    pub exp: usize, // expiration (as UNIX timestamp)
    pub iss: String,
    pub aud: String,
}
