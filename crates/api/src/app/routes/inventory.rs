use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query, rejection::JsonRejection},
    http::StatusCode,
};
use serde_json::json;

use stockflow_catalog::{LocationDirectory, ProductCatalog, SupplierDirectory};
use stockflow_infra::command_dispatcher::DispatchError;
use stockflow_infra::services::StockCorrection;

use crate::app::dto::{self, CreateAction, ListQuery, UpdateAction};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::{ActorContext, OrganizationContext};

type Response = axum::response::Response;

/// `GET /inventory/{resource}`
pub async fn list(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(org): Extension<OrganizationContext>,
    Path(resource): Path<String>,
    Query(query): Query<ListQuery>,
) -> Response {
    let organization_id = org.organization_id();
    let view = &services.stockflow.view;

    let data = match resource.as_str() {
        "items" => query
            .item_filter()
            .map(|f| json!(view.items(organization_id, &f))),
        "products" => query
            .item_filter()
            .map(|f| json!(view.products(organization_id, &f))),
        "movements" => query
            .movement_filter()
            .map(|f| json!(view.movements(organization_id, &f))),
        "purchase-orders" => query
            .purchase_order_filter()
            .map(|f| json!(view.purchase_orders(organization_id, &f))),
        "locations" => Ok(json!(services.catalog.locations(organization_id))),
        "suppliers" => Ok(json!(services.catalog.suppliers(organization_id))),
        "settings" => {
            return match services
                .run(move |s| s.stockflow.settings.get(organization_id))
                .await
            {
                Ok(settings) => dto::envelope(
                    StatusCode::OK,
                    settings,
                    json!({ "organization": org.slug(), "resource": "settings" }),
                ),
                Err(e) => errors::dispatch_error_to_response(e),
            };
        }
        other => {
            return errors::json_error(StatusCode::NOT_FOUND, format!("unknown resource '{other}'"));
        }
    };

    match data {
        Ok(data) => {
            let count = data.as_array().map(Vec::len).unwrap_or(0);
            dto::envelope(
                StatusCode::OK,
                data,
                json!({ "organization": org.slug(), "resource": resource, "count": count }),
            )
        }
        Err(msg) => errors::json_error(StatusCode::BAD_REQUEST, msg),
    }
}

/// `POST /inventory`
pub async fn create(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(org): Extension<OrganizationContext>,
    Extension(actor): Extension<ActorContext>,
    body: Result<Json<CreateAction>, JsonRejection>,
) -> Response {
    let Json(action) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_error(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let organization_id = org.organization_id();
    let actor_id = actor.actor_id();
    let metadata = json!({ "organization": org.slug(), "action": action.name() });

    let result = match action {
        CreateAction::Product(product) => services
            .catalog
            .add_product(organization_id, product)
            .map_err(DispatchError::from)
            .map(|p| (StatusCode::CREATED, json!(p))),
        CreateAction::Location(location) => services
            .catalog
            .add_location(organization_id, location)
            .map_err(DispatchError::from)
            .map(|l| (StatusCode::CREATED, json!(l))),
        CreateAction::Supplier(supplier) => services
            .catalog
            .add_supplier(organization_id, supplier)
            .map_err(DispatchError::from)
            .map(|s| (StatusCode::CREATED, json!(s))),
        CreateAction::Movement(request) => services
            .run(move |s| s.stockflow.ledger.record_movement(organization_id, request, actor_id))
            .await
            .map(|m| (StatusCode::CREATED, json!(m))),
        CreateAction::StockItem(request) => services
            .run(move |s| s.stockflow.ledger.open_stock_item(organization_id, request, actor_id))
            .await
            .map(|i| (StatusCode::CREATED, json!(i))),
        CreateAction::PurchaseOrder(request) => services
            .run(move |s| s.stockflow.purchase_orders.create(organization_id, request, actor_id))
            .await
            .map(|o| (StatusCode::CREATED, json!(o))),
        CreateAction::Settings(request) => services
            .run(move |s| {
                s.stockflow
                    .settings
                    .update(organization_id, request.low_stock_threshold, actor_id)
            })
            .await
            .map(|v| (StatusCode::OK, json!(v))),
        CreateAction::MigrateThresholds => services
            .run(move |s| s.stockflow.settings.migrate_thresholds(organization_id))
            .await
            .map(|updated| (StatusCode::OK, json!({ "updated": updated }))),
    };

    match result {
        Ok((status, data)) => dto::envelope(status, data, metadata),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

/// `PUT /inventory`
pub async fn update(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(org): Extension<OrganizationContext>,
    Extension(actor): Extension<ActorContext>,
    body: Result<Json<UpdateAction>, JsonRejection>,
) -> Response {
    let Json(action) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_error(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let organization_id = org.organization_id();
    let actor_id = actor.actor_id();
    let metadata = json!({ "organization": org.slug(), "action": action.name() });

    let result = match action {
        UpdateAction::UpdateStockItem {
            id,
            quantity,
            average_cost,
        } => services
            .run(move |s| {
                s.stockflow.ledger.correct_stock_item(
                    organization_id,
                    id,
                    StockCorrection {
                        quantity,
                        average_cost,
                    },
                    actor_id,
                )
            })
            .await
            .map(|item| json!(item)),
        UpdateAction::UpdatePoStatus { id, status } => services
            .run(move |s| {
                s.stockflow
                    .purchase_orders
                    .update_status(organization_id, id, status, actor_id)
            })
            .await
            .map(|update| json!(update)),
    };

    match result {
        Ok(data) => dto::envelope(StatusCode::OK, data, metadata),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
