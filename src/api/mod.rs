use crate::{
    apikey::ApiKeyAuthenticator,
    audit::AuditRecorder,
    mfa::MfaChallenge,
    session::SessionStore,
    store::{CredentialStore, PgCredentialStore},
    trusted::TrustedDeviceTokenService,
    vault::SecretVault,
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware,
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;

pub(crate) mod audit_capture;
pub(crate) mod handlers;
mod openapi;

pub use handlers::auth::{AuthConfig, AuthState};
pub use openapi::openapi;

/// Everything the server needs beyond the listen port and database DSN.
pub struct ServerOptions {
    pub vault_passphrase: SecretString,
    pub signing_key: SecretString,
    pub issuer: String,
    pub auth_config: AuthConfig,
    pub challenge_ttl_seconds: u64,
    pub session_ttl_seconds: u64,
    pub extended_session_ttl_seconds: u64,
    pub trusted_device_ttl_days: u64,
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, dsn: String, options: ServerOptions) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    let store: Arc<dyn CredentialStore> = Arc::new(PgCredentialStore::new(pool.clone()));
    let vault = Arc::new(SecretVault::new(&options.vault_passphrase)?);
    let trusted = TrustedDeviceTokenService::new(
        options.signing_key.expose_secret(),
        Duration::from_secs(options.trusted_device_ttl_days * 24 * 60 * 60),
    )?;
    let sessions = Arc::new(SessionStore::new(
        Duration::from_secs(options.challenge_ttl_seconds),
        Duration::from_secs(options.session_ttl_seconds),
        Duration::from_secs(options.extended_session_ttl_seconds),
    ));
    let mfa = MfaChallenge::new(
        Arc::clone(&vault),
        trusted,
        Arc::clone(&store),
        Arc::clone(&sessions),
        options.issuer,
    );

    // Plaintext leftovers from before the vault existed are rewritten once,
    // at startup.
    let migrated_secrets = mfa.migrate_legacy_secrets().await?;
    if migrated_secrets > 0 {
        info!(migrated_secrets, "Re-encrypted legacy authenticator secrets");
    }

    let api_keys = Arc::new(ApiKeyAuthenticator::new(
        options.signing_key.expose_secret(),
        Arc::clone(&store),
    )?);
    let migrated_keys = api_keys.migrate_legacy_keys().await?;
    if migrated_keys > 0 {
        info!(migrated_keys, "Re-digested legacy API keys");
    }

    let recorder = AuditRecorder::spawn(Arc::clone(&store));
    let auth_state = Arc::new(AuthState::new(
        options.auth_config,
        mfa,
        Arc::clone(&sessions),
        Arc::clone(&store),
    ));

    let frontend_origin = frontend_origin(auth_state.config().frontend_base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    // Machine routes carry their own gate; everything else relies on session
    // auth inside the handlers.
    let machine = openapi::machine_router()
        .layer(middleware::from_fn(handlers::machine::require_api_key));
    let (router, _openapi) = openapi::session_router().merge(machine).split_for_parts();
    let app = router.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors)
            .layer(Extension(auth_state))
            .layer(Extension(vault))
            .layer(Extension(api_keys))
            .layer(Extension(recorder))
            .layer(Extension(pool))
            .layer(middleware::from_fn(audit_capture::capture_mutations)),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

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

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
