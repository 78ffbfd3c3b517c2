use axum::{Router, routing::get};

pub mod inventory;
pub mod system;

/// Router for every organization-scoped endpoint.
pub fn router() -> Router {
    Router::new()
        .route(
            "/inventory",
            axum::routing::post(inventory::create).put(inventory::update),
        )
        .route("/inventory/:resource", get(inventory::list))
}
