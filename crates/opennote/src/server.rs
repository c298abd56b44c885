//! Server startup and routing.

use anyhow::Context;
use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    api,
    config::Config,
    profile::{
        HttpIdentityDirectory, IdentityDirectory, InMemoryProfileStore, ProfileStore, SqliteProfileStore,
        StaticIdentityDirectory,
    },
    providers::{HttpProviderFactory, ProviderSettings},
    session::spawn_session_sweeper,
    shared_state::AppState,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Run the HTTP service until the listener fails.
pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::telemetry::init_tracing();
    crate::metrics::init_metrics();
    cfg.validate()?;
    cfg.print_config();

    let profiles: Arc<dyn ProfileStore> = match SqliteProfileStore::new(Path::new(&cfg.profile_db_path)) {
        Ok(store) => {
            info!("Profile database initialized at: {}", cfg.profile_db_path);
            Arc::new(store)
        }
        Err(e) => {
            warn!("Failed to open profile database: {}. Falling back to in-memory.", e);
            Arc::new(InMemoryProfileStore::new())
        }
    };

    let identities: Arc<dyn IdentityDirectory> = match &cfg.identity_directory_url {
        Some(url) => Arc::new(HttpIdentityDirectory::new(url.clone(), cfg.provider_timeout())),
        None => {
            if cfg.identity_allowlist.is_empty() {
                warn!("No identity directory or allow-list configured; every identity will be rejected");
            }
            Arc::new(StaticIdentityDirectory::new(cfg.identity_allowlist.clone()))
        }
    };

    let factory = Arc::new(HttpProviderFactory::new(ProviderSettings::from_config(&cfg)));
    let addr = cfg.api_addr()?;
    let sweep_interval = cfg.session_settings().sweep_interval;

    let state = AppState::new(cfg, profiles, identities, factory);
    let sweeper = spawn_session_sweeper(state.sessions.clone(), sweep_interval);

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let app = build_router(state);
    let served = axum::serve(listener, app).await;
    sweeper.abort();
    served?;

    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(Duration::from_secs(86400));

    Router::new()
        .route("/message", post(api::post_message))
        .route(
            "/message/stream",
            post(api::post_message_stream).get(api::get_message_stream),
        )
        .route("/api/createEmptyUser", post(api::create_empty_user))
        .route("/api/getUser", post(api::get_user))
        .route("/api/updateUser", post(api::update_user))
        .route("/api/validateCredentials", post(api::validate_credentials))
        .route("/healthz", get(|| async { "OK" }))
        .route("/metrics", get(crate::metrics::get_metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}
