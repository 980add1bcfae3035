use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::json;

/// Success side of the uniform envelope: `{ "ok": true, "data": <T> }`.
/// The failure side lives in `crate::errors::ApiError`.
pub struct ApiResponse;

impl ApiResponse {
    pub fn ok<T: Serialize>(data: T) -> impl IntoResponse {
        (StatusCode::OK, Json(json!({ "ok": true, "data": data })))
    }

    pub fn created<T: Serialize>(data: T) -> impl IntoResponse {
        (StatusCode::CREATED, Json(json!({ "ok": true, "data": data })))
    }
}

#[cfg(test)]
mod tests {
    use axum::response::IntoResponse;

    use super::ApiResponse;

    #[tokio::test]
    async fn test_ok_envelope() {
        let resp = ApiResponse::ok(serde_json::json!({ "id": 1 })).into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["data"]["id"], 1);
    }

    #[tokio::test]
    async fn test_created_envelope() {
        let resp = ApiResponse::created("acme").into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::CREATED);

        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["data"], "acme");
    }
}
