use super::handlers::{auth, health, notes};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI document.
    let (_router, mut openapi) = public_router()
        .merge(protected_router())
        .split_for_parts();
    openapi.tags = Some(tags());
    openapi
}

/// Routes reachable without a session.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` document.
pub(crate) fn public_router() -> OpenApiRouter {
    OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(auth::signup::send_otp))
        .routes(routes!(auth::signup::verify_otp))
        .routes(routes!(auth::signin::send_otp))
        .routes(routes!(auth::signin::verify_otp))
        .routes(routes!(auth::session::logout))
}

/// Routes that only run behind the session guard; `api::app` adds the guard.
pub(crate) fn protected_router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(auth::session::profile))
        .routes(routes!(notes::list, notes::create))
        .routes(routes!(notes::update, notes::delete))
}

fn tags() -> Vec<Tag> {
    let mut hdnotes_tag = Tag::new("hdnotes");
    hdnotes_tag.description = Some("Notes API with passwordless email sign-in".to_string());

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("One-time code signup, signin and sessions".to_string());

    let mut notes_tag = Tag::new("notes");
    notes_tag.description = Some("Notes owned by the signed-in user".to_string());

    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Liveness and store connectivity".to_string());

    vec![hdnotes_tag, auth_tag, notes_tag, health_tag]
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    if let Some(start) = author.find('<') {
        let name = author[..start].trim();
        let email = author[start + 1..].trim_end_matches('>').trim();
        let name = if name.is_empty() { None } else { Some(name) };
        let email = if email.is_empty() { None } else { Some(email) };
        (name, email)
    } else {
        let name = author.trim();
        (if name.is_empty() { None } else { Some(name) }, None)
    }
}
