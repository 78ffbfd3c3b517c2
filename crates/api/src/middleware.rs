use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use stockflow_catalog::OrganizationDirectory;
use stockflow_core::ActorId;

use crate::app::errors;
use crate::context::{ActorContext, OrganizationContext};

pub const ORGANIZATION_HEADER: &str = "x-organization";
pub const ACTOR_HEADER: &str = "x-actor-id";

#[derive(Clone)]
pub struct OrganizationState {
    pub directory: Arc<dyn OrganizationDirectory>,
}

/// Resolve the organization slug and optional actor id into request extensions.
///
/// Unknown and inactive organizations are both reported as not found.
pub async fn organization_middleware(
    State(state): State<OrganizationState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let slug = match extract_header(req.headers(), ORGANIZATION_HEADER) {
        Some(slug) => slug.to_string(),
        None => {
            return errors::json_error(StatusCode::BAD_REQUEST, "missing X-Organization header");
        }
    };

    let organization = match state.directory.resolve(&slug) {
        Some(org) if org.is_active => org,
        _ => {
            tracing::debug!(slug = %slug, "organization not resolved");
            return errors::json_error(StatusCode::NOT_FOUND, "organization not found");
        }
    };

    let actor_id = match extract_header(req.headers(), ACTOR_HEADER) {
        None => None,
        Some(raw) => match raw.parse::<Uuid>() {
            Ok(id) => Some(ActorId::from_uuid(id)),
            Err(_) => {
                return errors::json_error(StatusCode::BAD_REQUEST, "X-Actor-Id must be a UUID");
            }
        },
    };

    req.extensions_mut().insert(OrganizationContext::new(organization));
    req.extensions_mut().insert(ActorContext::new(actor_id));

    next.run(req).await.into_response()
}

fn extract_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
