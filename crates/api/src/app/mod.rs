//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (event store, bus, projections, services)
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request bodies, query filters and the response envelope
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::config::AppConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(config: &AppConfig) -> anyhow::Result<Router> {
    let services = services::build_services(config).await?;
    Ok(router(services))
}

/// Router over already-wired services.
pub fn router(services: Arc<services::AppServices>) -> Router {
    let org_state = middleware::OrganizationState {
        directory: services.catalog.clone(),
    };

    let scoped = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            org_state,
            middleware::organization_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(scoped)
        .layer(ServiceBuilder::new())
}
