//! Keyward resolves login attempts through an ordered set of pluggable
//! authentication providers, with tracking of failed attempts.

#![forbid(unsafe_code)]

pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod ldap;
pub mod login;
pub mod provider;
mod router;
pub mod service;
pub mod telemetry;
#[cfg(test)]
mod testing;
pub mod track;
pub mod user;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use error::ServerError;
use ldap::LdapDirectory;
use login::LoginService;
use provider::{
    BrowserAuthProvider, BrowserIdentity, DatabaseAuthProvider,
    LdapAuthProvider, ProviderKind,
};
use service::{AuthPolicy, AuthProviderService};
use track::{TrackService, Tracker};
use user::{UserPassService, UserService};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    headers: &[(&str, &str)],
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in headers {
        request = request.header(*name, *value);
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub users: Arc<dyn UserService>,
    pub passwords: Arc<dyn UserPassService>,
    pub tracks: Arc<dyn TrackService>,
    pub ldap: Option<Arc<dyn LdapDirectory>>,
    pub hash: Arc<crypto::Hash>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Build the provider pipeline of one login attempt.
    ///
    /// A fresh pipeline is built for every request so nothing registered for
    /// one attempt leaks into another.
    pub fn auth_service(
        &self,
        identity: Option<BrowserIdentity>,
    ) -> error::Result<AuthProviderService> {
        let mut auth = AuthProviderService::new(
            Arc::clone(&self.users),
            AuthPolicy::from(&self.config.auth),
        );

        for kind in self.config.enabled_providers() {
            match kind {
                ProviderKind::Browser => {
                    let browser = self.config.browser.clone().unwrap_or_default();
                    auth.register(Box::new(BrowserAuthProvider::new(
                        identity.clone(),
                        browser.domain,
                        browser.authoritative,
                    )))?;
                },
                ProviderKind::Ldap => {
                    let directory = self.ldap.clone().ok_or_else(|| {
                        ServerError::Configuration(
                            "LDAP enabled but no directory initialized".into(),
                        )
                    })?;
                    let authoritative = self
                        .config
                        .ldap
                        .as_ref()
                        .is_some_and(|ldap| ldap.authoritative);
                    auth.register(Box::new(LdapAuthProvider::new(
                        directory,
                        authoritative,
                    )))?;
                },
                ProviderKind::Database => {
                    auth.register(Box::new(DatabaseAuthProvider::new(
                        Arc::clone(&self.users),
                        Arc::clone(&self.passwords),
                        Arc::clone(&self.hash),
                    )))?;
                },
            }
        }

        Ok(auth)
    }

    /// Login flow bound to the tracking store.
    pub fn login_service(&self) -> LoginService {
        LoginService::new(Tracker::new(
            Arc::clone(&self.tracks),
            self.config.track.max_attempts,
            self.config.track.window,
        ))
    }
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(30)))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        );

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `GET /metrics` goes to `metrics`.
        .route("/metrics", get(router::status::metrics))
        // `POST /rpc` goes to the JSON-RPC dispatcher.
        .route("/rpc", post(router::rpc::handler))
        .with_state(state)
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>> {
    // read configuration file. let it in memory.
    let path = std::env::var("CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_default();
    let config = config::Configuration::default().path(path).read()?;

    let Some(pg) = &config.postgres else {
        tracing::error!("missing `postgres` entry on `config.yaml` file");
        return Err(ServerError::Configuration("missing `postgres` entry".into()).into());
    };

    let db = database::Database::connect(pg).await?;

    // execute migrations scripts on start.
    sqlx::migrate!().run(&db.postgres).await?;

    let key = std::env::var("KEY").map_err(|_| {
        ServerError::Configuration("missing `KEY` environnement variable".into())
    })?;
    let hash = Arc::new(crypto::Hash::new(key, config.argon2.clone())?);

    // initialize LDAP.
    let ldap = match &config.ldap {
        Some(cfg) => {
            let directory = ldap::Ldap::new(ldap::LdapConfig::try_from(cfg)?);
            Some(Arc::new(directory) as Arc<dyn LdapDirectory>)
        },
        None => None,
    };

    let users = Arc::new(user::UserRepository::new(db.postgres.clone()));
    let passwords = Arc::new(user::UserPassManager::new(
        db.postgres.clone(),
        Arc::clone(&hash),
    ));
    let tracks = Arc::new(track::TrackRepository::new(db.postgres.clone()));

    tracing::info!(
        providers = ?config.enabled_providers(),
        "authentication pipeline configured"
    );

    Ok(AppState {
        config,
        users,
        passwords,
        tracks,
        ldap,
        hash,
        metrics: None,
    })
}
