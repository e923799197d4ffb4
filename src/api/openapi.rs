use super::handlers::{api_keys, audit, auth, credentials, health, machine};
use utoipa::openapi::{InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = session_router().split_for_parts();
    let (_router, machine_openapi) = machine_router().split_for_parts();
    let mut openapi = openapi;
    openapi.merge(machine_openapi);
    openapi
}

/// Routes that authenticate through the session cookie. Endpoints added via
/// `routes!` are both served and documented.
pub(crate) fn session_router() -> OpenApiRouter {
    OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(auth::login::login))
        .routes(routes!(auth::mfa::mfa_setup))
        .routes(routes!(auth::mfa::mfa_verify))
        .routes(routes!(auth::session::session))
        .routes(routes!(auth::session::logout))
        .routes(routes!(auth::password::change_password))
        .routes(routes!(api_keys::list_api_keys, api_keys::create_api_key))
        .routes(routes!(api_keys::delete_api_key))
        .routes(routes!(
            credentials::get_credential,
            credentials::put_credential
        ))
        .routes(routes!(audit::list_audit_entries))
}

/// Routes that authenticate through `x-api-key`; the gate middleware is
/// layered on by the server wiring.
pub(crate) fn machine_router() -> OpenApiRouter {
    OpenApiRouter::new().routes(routes!(machine::whoami))
}

fn tags() -> Vec<Tag> {
    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Service and database health".to_string());

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Login, MFA, and session management".to_string());

    let mut api_keys_tag = Tag::new("api-keys");
    api_keys_tag.description = Some("Machine key issuance and revocation".to_string());

    let mut credentials_tag = Tag::new("credentials");
    credentials_tag.description = Some("Tenant third-party credential custody".to_string());

    let mut audit_tag = Tag::new("audit");
    audit_tag.description = Some("Mutation audit trail".to_string());

    let mut machine_tag = Tag::new("machine");
    machine_tag.description = Some("API-key authenticated surface".to_string());

    vec![
        health_tag,
        auth_tag,
        api_keys_tag,
        credentials_tag,
        audit_tag,
        machine_tag,
    ]
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Cargo.toml metadata instead of the utoipa-axum defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(Some(env!("CARGO_PKG_DESCRIPTION")))
        .build();
    info.license = Some(License::new(env!("CARGO_PKG_LICENSE")));

    OpenApiBuilder::new().info(info).tags(Some(tags())).build()
}
