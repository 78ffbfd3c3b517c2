use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use stockflow_catalog::{Directories, LocationId, Product, ProductId, SupplierId};
use stockflow_core::OrganizationId;
use stockflow_purchasing::PurchaseOrderStatus;

use crate::projections::{Projections, PurchaseOrderReadModel, StockItemReadModel, StockMovementReadModel};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFilter {
    pub category: Option<String>,
    pub location_id: Option<LocationId>,
    /// Case-insensitive substring of product name or SKU.
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementFilter {
    pub product_id: Option<ProductId>,
    pub location_id: Option<LocationId>,
    pub reference_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurchaseOrderFilter {
    pub status: Option<PurchaseOrderStatus>,
    pub supplier_id: Option<SupplierId>,
}

/// Stock item joined with its product and location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockItemRow {
    #[serde(flatten)]
    pub item: StockItemReadModel,
    pub sku: Option<String>,
    pub product_name: Option<String>,
    pub category: Option<String>,
    pub location_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseOrderRow {
    #[serde(flatten)]
    pub order: PurchaseOrderReadModel,
    pub supplier_name: Option<String>,
}

/// Read-only queries over the projections and the catalog.
pub struct StockItemView {
    projections: Arc<Projections>,
    directories: Arc<dyn Directories>,
}

impl StockItemView {
    pub fn new(projections: Arc<Projections>, directories: Arc<dyn Directories>) -> Self {
        Self {
            projections,
            directories,
        }
    }

    pub fn items(&self, organization_id: OrganizationId, filter: &ItemFilter) -> Vec<StockItemRow> {
        let products: HashMap<ProductId, Product> = self
            .directories
            .products(organization_id)
            .into_iter()
            .map(|p| (p.id, p))
            .collect();
        let locations: HashMap<LocationId, String> = self
            .directories
            .locations(organization_id)
            .into_iter()
            .map(|l| (l.id, l.name))
            .collect();

        let mut rows: Vec<StockItemRow> = self
            .projections
            .stock_items
            .list(organization_id)
            .into_iter()
            .filter(|item| filter.location_id.is_none_or(|l| item.location_id == l))
            .filter_map(|item| {
                let product = products.get(&item.product_id);
                if let Some(category) = filter.category.as_deref() {
                    if product.and_then(|p| p.category.as_deref()) != Some(category) {
                        return None;
                    }
                }
                if let Some(search) = filter.search.as_deref() {
                    if !product.is_some_and(|p| p.matches_text(search)) {
                        return None;
                    }
                }
                Some(StockItemRow {
                    sku: product.map(|p| p.sku.clone()),
                    product_name: product.map(|p| p.name.clone()),
                    category: product.and_then(|p| p.category.clone()),
                    location_name: locations.get(&item.location_id).cloned(),
                    item,
                })
            })
            .collect();

        rows.sort_by(|a, b| {
            a.product_name
                .cmp(&b.product_name)
                .then_with(|| a.location_name.cmp(&b.location_name))
                .then_with(|| a.item.id.cmp(&b.item.id))
        });
        rows
    }

    /// Newest first.
    pub fn movements(
        &self,
        organization_id: OrganizationId,
        filter: &MovementFilter,
    ) -> Vec<StockMovementReadModel> {
        self.projections
            .movements
            .list(organization_id)
            .into_iter()
            .filter(|m| filter.product_id.is_none_or(|p| m.product_id == p))
            .filter(|m| filter.location_id.is_none_or(|l| m.location_id == l))
            .filter(|m| {
                filter
                    .reference_id
                    .is_none_or(|r| m.reference.as_ref().is_some_and(|mr| mr.reference_id == r))
            })
            .collect()
    }

    pub fn purchase_orders(
        &self,
        organization_id: OrganizationId,
        filter: &PurchaseOrderFilter,
    ) -> Vec<PurchaseOrderRow> {
        let suppliers: HashMap<SupplierId, String> = self
            .directories
            .suppliers(organization_id)
            .into_iter()
            .map(|s| (s.id, s.name))
            .collect();

        self.projections
            .purchase_orders
            .list(organization_id)
            .into_iter()
            .filter(|o| filter.status.is_none_or(|s| o.status == s))
            .filter(|o| filter.supplier_id.is_none_or(|s| o.supplier_id == s))
            .map(|order| PurchaseOrderRow {
                supplier_name: suppliers.get(&order.supplier_id).cloned(),
                order,
            })
            .collect()
    }

    /// Catalog products, filtered like stock items.
    pub fn products(&self, organization_id: OrganizationId, filter: &ItemFilter) -> Vec<Product> {
        self.directories
            .products(organization_id)
            .into_iter()
            .filter(|p| {
                filter
                    .category
                    .as_deref()
                    .is_none_or(|c| p.category.as_deref() == Some(c))
            })
            .filter(|p| filter.search.as_deref().is_none_or(|s| p.matches_text(s)))
            .collect()
    }
}
