use std::env;

pub struct Config {
    pub database_url: String,
    pub frontend_origin: String,
    pub identity_api_url: String,
    pub identity_api_key: String,
    pub identity_webhook_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok(); // Load .env file

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let frontend_origin = env::var("FRONTEND_ORIGIN").expect("FRONTEND_ORIGIN must be set");
        let identity_api_url =
            env::var("IDENTITY_API_URL").expect("IDENTITY_API_URL must be set");
        let identity_api_key =
            env::var("IDENTITY_API_KEY").expect("IDENTITY_API_KEY must be set");
        let identity_webhook_secret =
            env::var("IDENTITY_WEBHOOK_SECRET").expect("IDENTITY_WEBHOOK_SECRET must be set");
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "swimdeck".to_string());
        let jwt_audience = env::var("JWT_AUDIENCE").unwrap_or_else(|_| "swimdeck-api".to_string());

        Config {
            database_url,
            frontend_origin,
            identity_api_url,
            identity_api_key,
            identity_webhook_secret,
            jwt_issuer,
            jwt_audience,
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Config {
            database_url: "postgres://localhost/swimdeck_test".to_string(),
            frontend_origin: "https://localhost:5173".to_string(),
            identity_api_url: "https://identity.example.test".to_string(),
            identity_api_key: "test_api_key".to_string(),
            identity_webhook_secret: "whsec_test".to_string(),
            jwt_issuer: "swimdeck".to_string(),
            jwt_audience: "swimdeck-api".to_string(),
        }
    }
}
