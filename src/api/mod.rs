//! HTTP server wiring.

use anyhow::{Context, Result};
use axum::{
    Router,
    body::Body,
    extract::{Extension, MatchedPath},
    http::Request,
    routing::{get, post, put},
};
use base64::Engine;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};

use crate::linking::AccountLinker;
use crate::policy::{LinkingOptions, LinkingPolicy};
use crate::recipes::{EmailPassword, Passwordless, Sha256PasswordHasher, ThirdParty};
use crate::repo::{InMemoryRepository, PostgresRepository, UserRepository};
use crate::session::SessionRef;

pub(crate) mod handlers;
mod openapi;
pub(crate) mod types;

pub use openapi::openapi_json;

/// Turns a bearer token into a session reference. Deployments front this
/// service with their own session layer; the bundled resolver accepts a
/// base64-encoded JSON [`SessionRef`] and is meant for dev and tests.
pub trait SessionResolver: Send + Sync {
    fn resolve(&self, bearer: &str) -> Option<SessionRef>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Base64SessionResolver;

impl SessionResolver for Base64SessionResolver {
    fn resolve(&self, bearer: &str) -> Option<SessionRef> {
        let decoded = base64::engine::general_purpose::STANDARD.decode(bearer.trim()).ok()?;
        serde_json::from_slice(&decoded).ok()
    }
}

pub struct AppState {
    pub emailpassword: EmailPassword,
    pub thirdparty: ThirdParty,
    pub passwordless: Passwordless,
    pub linker: AccountLinker,
    pub sessions: Arc<dyn SessionResolver>,
    pub options: LinkingOptions,
}

impl AppState {
    #[must_use]
    pub fn new(repo: Arc<dyn UserRepository>, policy: Arc<dyn LinkingPolicy>) -> Self {
        let linker = AccountLinker::new(repo, policy);
        Self {
            emailpassword: EmailPassword::new(linker.clone(), Arc::new(Sha256PasswordHasher)),
            thirdparty: ThirdParty::new(linker.clone()),
            passwordless: Passwordless::new(linker.clone()),
            linker,
            sessions: Arc::new(Base64SessionResolver),
            options: LinkingOptions::default(),
        }
    }
}

/// Build the API router around a prepared state.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(handlers::health))
        .route("/v1/auth/:tenant_id/emailpassword/signup", post(handlers::emailpassword_signup))
        .route("/v1/auth/:tenant_id/emailpassword/signin", post(handlers::emailpassword_signin))
        .route("/v1/auth/emailpassword/user", put(handlers::emailpassword_update))
        .route("/v1/auth/:tenant_id/thirdparty/signinup", post(handlers::thirdparty_signinup))
        .route("/v1/auth/:tenant_id/passwordless/code", post(handlers::passwordless_create_code))
        .route(
            "/v1/auth/:tenant_id/passwordless/code/consume",
            post(handlers::passwordless_consume_code),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(CorsLayer::permissive())
                .layer(Extension(state)),
        )
}

/// Start the server.
///
/// With a DSN the repository is Postgres-backed; without one the state is
/// kept in memory and lost on restart.
///
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, dsn: Option<String>, policy: Arc<dyn LinkingPolicy>) -> Result<()> {
    let repo: Arc<dyn UserRepository> = match dsn {
        Some(dsn) => {
            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .max_lifetime(Duration::from_secs(60 * 2))
                .test_before_acquire(true)
                .connect(&dsn)
                .await
                .context("Failed to connect to database")?;
            Arc::new(PostgresRepository::new(pool))
        }
        None => {
            info!("No DSN provided, using in-memory storage");
            Arc::new(InMemoryRepository::new())
        }
    };

    let state = Arc::new(AppState::new(repo, policy));
    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
