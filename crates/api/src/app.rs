use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use domain::services::{
    Clock, IdentityProvider, InvitationService, InvitationSettings, NotificationDispatcher,
    ProviderError, SystemClock,
};
use persistence::repositories::{InvitationRepository, UserRepository};
use shared::jwt::{JwtConfig, JwtError};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::{
    metrics_handler, metrics_middleware, rate_limit_middleware, trace_id, RateLimiterState,
};
use crate::routes::{admin_users, health, invitations};
use crate::services::{
    bootstrap_admin, Auth0Client, BootstrapError, EmailService, NotificationError,
};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("JWT configuration: {0}")]
    Jwt(#[from] JwtError),

    #[error("Identity provider client: {0}")]
    IdentityProvider(#[from] ProviderError),

    #[error("Email client: {0}")]
    Email(#[from] NotificationError),

    #[error("Admin bootstrap: {0}")]
    Bootstrap(#[from] BootstrapError),
}

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub jwt: Arc<JwtConfig>,
    pub users: UserRepository,
    pub invitations: Arc<InvitationService>,
    pub rate_limiter: Option<Arc<RateLimiterState>>,
}

impl AppState {
    /// Production wiring: Postgres store, Auth0 management client and email
    /// delivery from configuration.
    pub fn from_config(config: Config, pool: PgPool) -> Result<Self, StartupError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let identity = Arc::new(Auth0Client::new(&config.identity_provider, clock.clone())?);
        let notifier = Arc::new(
            EmailService::new(config.email.clone())?
                .with_invitation_validity_hours(config.invitations.expiry_hours),
        );
        Self::with_services(config, pool, identity, notifier, clock)
    }

    /// Wiring with caller-supplied external adapters. Integration tests use
    /// this to run against a real database with in-memory fakes for the
    /// identity provider and email.
    pub fn with_services(
        config: Config,
        pool: PgPool,
        identity: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StartupError> {
        let jwt = JwtConfig::with_leeway(
            &config.jwt.private_key,
            &config.jwt.public_key,
            config.jwt.access_token_expiry_secs,
            config.jwt.leeway_secs,
        )?;

        let invitations = InvitationService::new(
            Arc::new(InvitationRepository::new(pool.clone())),
            identity,
            notifier,
            clock,
            invitation_settings(&config),
        );

        let rate_limiter = (config.security.public_rate_limit_per_minute > 0).then(|| {
            Arc::new(RateLimiterState::new(
                config.security.public_rate_limit_per_minute,
            ))
        });

        Ok(Self {
            users: UserRepository::new(pool.clone()),
            pool,
            config: Arc::new(config),
            jwt: Arc::new(jwt),
            invitations: Arc::new(invitations),
            rate_limiter,
        })
    }
}

fn invitation_settings(config: &Config) -> InvitationSettings {
    InvitationSettings {
        expiry: chrono::Duration::hours(config.invitations.expiry_hours),
        app_base_url: config.server.app_base_url.clone(),
        password_setup_result_url: config.password_setup_result_url(),
        password_ticket_ttl: Duration::from_secs(
            config.identity_provider.password_ticket_ttl_secs,
        ),
        password_setup_budget: password_setup_budget(config.server.request_timeout_secs),
    }
}

/// A third of the request timeout, leaving the rest for the provider account
/// creation that precedes the commit.
fn password_setup_budget(request_timeout_secs: u64) -> Duration {
    Duration::from_secs(request_timeout_secs).max(Duration::from_secs(1)) / 3
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.security.cors_origins.is_empty() {
        // Development: any origin.
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .security
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

pub fn create_router(state: AppState) -> Router {
    let config = state.config.clone();

    // Admin routes authenticate through the `AdminAuth` extractor.
    let admin_routes = Router::new()
        .route(
            "/api/v1/admin/invitations",
            post(invitations::create_invitation).get(invitations::list_invitations),
        )
        .route(
            "/api/v1/admin/invitations/:invitation_id",
            delete(invitations::delete_invitation),
        )
        .route(
            "/api/v1/admin/users/:user_id/password-setup",
            post(admin_users::resend_password_setup),
        );

    // Unauthenticated token endpoints, limited per client address.
    let public_invitation_routes = Router::new()
        .route(
            "/api/v1/invitations/verify",
            get(invitations::verify_invitation),
        )
        .route(
            "/api/v1/invitations/accept",
            post(invitations::accept_invitation),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    let operational_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(admin_routes)
        .merge(public_invitation_routes)
        .merge(operational_routes)
        .with_state(state)
        // Global middleware (bottom layers run first)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors_layer(&config))
}

/// Builds production state, runs the admin bootstrap and returns the router.
pub async fn create_app(config: Config, pool: PgPool) -> Result<Router, StartupError> {
    let state = AppState::from_config(config, pool)?;
    bootstrap_admin(&state.users, &state.jwt, &state.config.admin).await?;
    Ok(create_router(state))
}
