use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::CookieJar;

use crate::errors::ApiError;
use crate::routes::auth::claims::SessionClaims;
use crate::state::AppState;
use crate::utils::jwt::decode_jwt;

/// The identity resolver: pulls the session token from the `auth_token`
/// cookie (or a Bearer header) and decodes it. Side-effect-free; downstream
/// guards trust the result for the duration of one request.
#[derive(Debug)]
pub struct AuthSession(pub SessionClaims);

impl FromRequestParts<AppState> for AuthSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar
            .get("auth_token")
            .map(|cookie| cookie.value().to_string())
            .or_else(|| {
                parts
                    .headers
                    .get(axum::http::header::AUTHORIZATION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.strip_prefix("Bearer "))
                    .map(|token| token.to_string())
            })
            .ok_or(ApiError::Unauthenticated)?;

        let data = decode_jwt(
            &token,
            &state.jwt_keys,
            &state.config.jwt_issuer,
            &state.config.jwt_audience,
        )
        .map_err(|_| ApiError::Unauthenticated)?;

        Ok(AuthSession(data.claims))
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        extract::FromRequestParts,
        http::{header, Method, Request},
    };
    use axum_extra::extract::cookie::Cookie;
    use std::time::{SystemTime, UNIX_EPOCH};

    use crate::routes::auth::claims::SessionClaims;
    use crate::routes::auth::session::AuthSession;
    use crate::state::test_app_state;
    use crate::utils::jwt::create_jwt;

    fn make_valid_jwt(state: &crate::state::AppState) -> String {
        let claims = SessionClaims {
            sub: "user_2x9ab".into(),
            org: Some("org_7fq1d".into()),
            org_role: Some("admin".into()),
            exp: (SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs()
                + 3600) as usize,
            iss: String::new(),
            aud: String::new(),
        };
        create_jwt(
            claims,
            &state.jwt_keys,
            &state.config.jwt_issuer,
            &state.config.jwt_audience,
        )
        .expect("JWT should create successfully")
    }

    #[tokio::test]
    async fn test_valid_cookie_token_extracted() {
        let (state, _db, _identity) = test_app_state();
        let jwt = make_valid_jwt(&state);
        let cookie = Cookie::new("auth_token", jwt);

        let request = Request::builder()
            .method(Method::GET)
            .uri("/")
            .header(header::COOKIE, cookie.to_string())
            .body(())
            .unwrap();

        let mut parts = request.into_parts().0;
        let result = AuthSession::from_request_parts(&mut parts, &state).await;

        let session = result.expect("extraction should succeed");
        assert_eq!(session.0.sub, "user_2x9ab");
        assert_eq!(session.0.org.as_deref(), Some("org_7fq1d"));
    }

    #[tokio::test]
    async fn test_bearer_header_fallback() {
        let (state, _db, _identity) = test_app_state();
        let jwt = make_valid_jwt(&state);

        let request = Request::builder()
            .method(Method::GET)
            .uri("/")
            .header(header::AUTHORIZATION, format!("Bearer {jwt}"))
            .body(())
            .unwrap();

        let mut parts = request.into_parts().0;
        let result = AuthSession::from_request_parts(&mut parts, &state).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_missing_credentials_returns_unauthenticated() {
        let (state, _db, _identity) = test_app_state();
        let request = Request::builder()
            .method(Method::GET)
            .uri("/")
            .body(())
            .unwrap();

        let mut parts = request.into_parts().0;
        let result = AuthSession::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(crate::errors::ApiError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_invalid_token_returns_unauthenticated() {
        let (state, _db, _identity) = test_app_state();
        let cookie = Cookie::new("auth_token", "invalid.token.here");

        let request = Request::builder()
            .method(Method::GET)
            .uri("/")
            .header(header::COOKIE, cookie.to_string())
            .body(())
            .unwrap();

        let mut parts = request.into_parts().0;
        let result = AuthSession::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(crate::errors::ApiError::Unauthenticated)));
    }
}
