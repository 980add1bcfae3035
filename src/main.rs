use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::http::Method;
use axum::{
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use swimdeck_backend::config::Config;
use swimdeck_backend::db::postgres_coach_repository::PostgresCoachRepository;
use swimdeck_backend::db::postgres_invitation_repository::PostgresInvitationRepository;
use swimdeck_backend::db::postgres_member_repository::PostgresMemberRepository;
use swimdeck_backend::db::postgres_organization_repository::PostgresOrganizationRepository;
use swimdeck_backend::db::postgres_rate_limit_repository::PostgresRateLimitRepository;
use swimdeck_backend::db::postgres_user_repository::PostgresUserRepository;
use swimdeck_backend::db::postgres_webhook_event_repository::PostgresWebhookEventRepository;
use swimdeck_backend::errors::ApiError;
use swimdeck_backend::responses::ApiResponse;
use swimdeck_backend::routes::coaches::{
    get_member_availability, get_member_profile, get_my_availability, get_my_profile,
    replace_member_availability, replace_my_availability, update_member_profile,
    update_my_profile,
};
use swimdeck_backend::routes::invitations::{
    accept_invitation, create_invitation, list_invitations, reject_invitation,
    resend_invitation, revoke_invitation,
};
use swimdeck_backend::routes::me::get_me;
use swimdeck_backend::routes::members::{
    convert_from_coach, convert_to_coach, get_member, list_members, remove_member, update_member,
};
use swimdeck_backend::routes::organizations::{
    create_organization, get_settings, list_my_organizations, set_active_organization,
    set_primary_admin, update_settings,
};
use swimdeck_backend::routes::webhooks::identity_webhook;
use swimdeck_backend::routes;
use swimdeck_backend::services::authz::AuthGate;
use swimdeck_backend::services::identity::HttpIdentityService;
use swimdeck_backend::services::invitations::InvitationService;
use swimdeck_backend::utils::jwt::JwtKeys;
use swimdeck_backend::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let rate_limit_ms: u64 = std::env::var("RATE_LIMITER_MILLISECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        // Default: 200ms/token (~5 req/sec)
        .unwrap_or(200);
    let rate_limit_burst: u32 = std::env::var("RATE_LIMITER_BURST")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        // Default: allow short bursts during client polling
        .unwrap_or(20);
    let global_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(rate_limit_ms)
            .burst_size(rate_limit_burst)
            .use_headers()
            .error_handler(|_err| ApiError::RateLimited.into_response())
            .finish()
            .unwrap(),
    );

    let config = Config::from_env();
    let jwt_keys = JwtKeys::from_env().expect("JWT secret must be valid");

    let pg_pool = establish_connection(&config.database_url).await;
    sqlx::migrate!("./migrations")
        .run(&pg_pool)
        .await
        .expect("Failed to run database migrations");

    let users = Arc::new(PostgresUserRepository {
        pool: pg_pool.clone(),
    }) as Arc<dyn swimdeck_backend::db::user_repository::UserRepository>;
    let orgs = Arc::new(PostgresOrganizationRepository {
        pool: pg_pool.clone(),
    })
        as Arc<dyn swimdeck_backend::db::organization_repository::OrganizationRepository>;
    let members = Arc::new(PostgresMemberRepository {
        pool: pg_pool.clone(),
    }) as Arc<dyn swimdeck_backend::db::member_repository::MemberRepository>;
    let invitations = Arc::new(PostgresInvitationRepository {
        pool: pg_pool.clone(),
    })
        as Arc<dyn swimdeck_backend::db::invitation_repository::InvitationRepository>;
    let coaches = Arc::new(PostgresCoachRepository {
        pool: pg_pool.clone(),
    }) as Arc<dyn swimdeck_backend::db::coach_repository::CoachRepository>;
    let webhook_events = Arc::new(PostgresWebhookEventRepository {
        pool: pg_pool.clone(),
    })
        as Arc<dyn swimdeck_backend::db::webhook_event_repository::WebhookEventRepository>;
    let rate_limits = Arc::new(PostgresRateLimitRepository {
        pool: pg_pool.clone(),
    })
        as Arc<dyn swimdeck_backend::db::rate_limit_repository::RateLimitRepository>;

    let identity = Arc::new(HttpIdentityService::new(
        config.identity_api_url.clone(),
        config.identity_api_key.clone(),
        config.identity_webhook_secret.clone(),
    ))
        as Arc<dyn swimdeck_backend::services::identity::IdentityService>;

    let gate = Arc::new(AuthGate::new(users.clone(), orgs.clone(), members.clone()));
    let invitation_service = Arc::new(InvitationService::new(
        invitations.clone(),
        members.clone(),
        identity.clone(),
    ));

    let state = AppState {
        users,
        orgs,
        members,
        invitations,
        coaches,
        webhook_events,
        rate_limits,
        identity,
        gate,
        invitation_service,
        jwt_keys,
        config: Arc::new(config),
    };

    let cors = CorsLayer::new()
        .allow_origin(
            state
                .config
                .frontend_origin
                .parse::<HeaderValue>()
                .unwrap(),
        )
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true);

    let member_routes = Router::new()
        .route("/", get(list_members))
        .route(
            "/{external_user_id}",
            get(get_member).patch(update_member).delete(remove_member),
        )
        .route("/{external_user_id}/convert-to-coach", post(convert_to_coach))
        .route(
            "/{external_user_id}/convert-from-coach",
            post(convert_from_coach),
        )
        .route(
            "/{external_user_id}/coach-profile",
            get(get_member_profile).put(update_member_profile),
        )
        .route(
            "/{external_user_id}/coach-availability",
            get(get_member_availability).put(replace_member_availability),
        );

    let invitation_routes = Router::new()
        .route("/", get(list_invitations).post(create_invitation))
        .route("/{invite_id}/resend", post(resend_invitation))
        .route("/{invite_id}/revoke", post(revoke_invitation))
        .route("/{invite_id}/accept", post(accept_invitation))
        .route("/{invite_id}/reject", post(reject_invitation));

    let organization_routes = Router::new()
        .route("/", get(list_my_organizations).post(create_organization))
        .route("/set-active", post(set_active_organization))
        .route("/primary-admin", post(set_primary_admin))
        .route("/settings", get(get_settings).patch(update_settings));

    let me_routes = Router::new()
        .route("/", get(get_me))
        .route(
            "/coach-profile",
            get(get_my_profile).put(update_my_profile),
        )
        .route(
            "/coach-availability",
            get(get_my_availability).put(replace_my_availability),
        );

    let app = Router::new()
        .route("/", get(root))
        .nest("/api/me", me_routes)
        .nest("/api/members", member_routes)
        .nest("/api/invitations", invitation_routes)
        .nest("/api/organizations", organization_routes)
        .nest("/api/admin", routes::admin::router(state.clone()))
        .route("/api/webhooks/identity", post(identity_webhook))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer {
            config: global_governor_conf.clone(),
        })
        .layer(cors);

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));

    let listener = TcpListener::bind(addr).await.unwrap();
    info!("Listening on http://{}", addr);
    axum::serve(listener, make_service).await.unwrap();
}

/// A simple root route.
async fn root() -> Response {
    ApiResponse::ok("SwimDeck API").into_response()
}

/// Establish a connection to the database and verify it.
async fn establish_connection(database_url: &str) -> PgPool {
    let pool = PgPool::connect(database_url)
        .await
        .expect("Failed to connect to the database");

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .expect("Failed to verify database connection");

    info!("Successfully connected to the database");
    pool
}
