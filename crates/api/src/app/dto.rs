use axum::http::StatusCode;
use axum::response::IntoResponse;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

use stockflow_catalog::{LocationId, NewLocation, NewProduct, NewSupplier, ProductId, SupplierId};
use stockflow_infra::services::{
    ItemFilter, MovementFilter, MovementRequest, NewPurchaseOrder, OpenStockItemRequest, PurchaseOrderFilter,
};
use stockflow_inventory::StockItemId;
use stockflow_purchasing::{PurchaseOrderId, PurchaseOrderStatus};

/// Query string shared by every `GET /inventory/{resource}`.
///
/// Each resource reads the filters that apply to it and ignores the rest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub category: Option<String>,
    pub location: Option<String>,
    pub product: Option<String>,
    pub status: Option<String>,
    pub supplier: Option<String>,
    pub search: Option<String>,
    /// Business document id (e.g. a purchase order) for movement listings.
    pub reference: Option<String>,
}

impl ListQuery {
    pub fn item_filter(&self) -> Result<ItemFilter, String> {
        Ok(ItemFilter {
            category: non_blank(&self.category),
            location_id: parse_opt::<LocationId>("location", &self.location)?,
            search: non_blank(&self.search),
        })
    }

    pub fn movement_filter(&self) -> Result<MovementFilter, String> {
        Ok(MovementFilter {
            product_id: parse_opt::<ProductId>("product", &self.product)?,
            location_id: parse_opt::<LocationId>("location", &self.location)?,
            reference_id: parse_opt::<Uuid>("reference", &self.reference)?,
        })
    }

    pub fn purchase_order_filter(&self) -> Result<PurchaseOrderFilter, String> {
        Ok(PurchaseOrderFilter {
            status: parse_opt::<PurchaseOrderStatus>("status", &self.status)?,
            supplier_id: parse_opt::<SupplierId>("supplier", &self.supplier)?,
        })
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_opt<T: core::str::FromStr>(name: &str, value: &Option<String>) -> Result<Option<T>, String> {
    match non_blank(value) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| format!("invalid {name}: {raw}")),
    }
}

/// Body of `POST /inventory`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum CreateAction {
    Product(NewProduct),
    Location(NewLocation),
    Supplier(NewSupplier),
    Movement(MovementRequest),
    StockItem(OpenStockItemRequest),
    PurchaseOrder(NewPurchaseOrder),
    Settings(SettingsRequest),
    MigrateThresholds,
}

impl CreateAction {
    pub fn name(&self) -> &'static str {
        match self {
            CreateAction::Product(_) => "product",
            CreateAction::Location(_) => "location",
            CreateAction::Supplier(_) => "supplier",
            CreateAction::Movement(_) => "movement",
            CreateAction::StockItem(_) => "stock-item",
            CreateAction::PurchaseOrder(_) => "purchase-order",
            CreateAction::Settings(_) => "settings",
            CreateAction::MigrateThresholds => "migrate-thresholds",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettingsRequest {
    pub low_stock_threshold: i64,
}

/// Body of `PUT /inventory`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum UpdateAction {
    UpdateStockItem {
        id: StockItemId,
        #[serde(default)]
        quantity: Option<i64>,
        #[serde(default)]
        average_cost: Option<Decimal>,
    },
    UpdatePoStatus {
        id: PurchaseOrderId,
        status: PurchaseOrderStatus,
    },
}

impl UpdateAction {
    pub fn name(&self) -> &'static str {
        match self {
            UpdateAction::UpdateStockItem { .. } => "update-stock-item",
            UpdateAction::UpdatePoStatus { .. } => "update-po-status",
        }
    }
}

/// `{"data": ..., "metadata": ...}` success body.
pub fn envelope(status: StatusCode, data: impl Serialize, metadata: JsonValue) -> axum::response::Response {
    match serde_json::to_value(data) {
        Ok(data) => (
            status,
            axum::Json(json!({
                "data": data,
                "metadata": metadata,
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "response serialization failed");
            crate::app::errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        }
    }
}
