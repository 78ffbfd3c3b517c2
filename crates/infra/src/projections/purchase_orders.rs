use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as JsonValue;

use stockflow_catalog::{LocationId, SupplierId};
use stockflow_core::OrganizationId;
use stockflow_events::EventEnvelope;
use stockflow_purchasing::{
    PurchaseOrderEvent, PurchaseOrderId, PurchaseOrderLine, PurchaseOrderStatus,
};

use crate::projections::cursor::{ProjectionError, StreamCursors, ensure_scope};
use crate::read_model::OrganizationStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseOrderReadModel {
    pub id: PurchaseOrderId,
    pub po_number: String,
    pub supplier_id: SupplierId,
    pub status: PurchaseOrderStatus,
    pub order_date: DateTime<Utc>,
    pub expected_delivery_date: Option<NaiveDate>,
    pub location_id: Option<LocationId>,
    pub total_amount: Decimal,
    pub notes: Option<String>,
    pub lines: Vec<PurchaseOrderLine>,
    pub received_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct PurchaseOrdersProjection<S>
where
    S: OrganizationStore<PurchaseOrderId, PurchaseOrderReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> PurchaseOrdersProjection<S>
where
    S: OrganizationStore<PurchaseOrderId, PurchaseOrderReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, organization_id: OrganizationId, id: &PurchaseOrderId) -> Option<PurchaseOrderReadModel> {
        self.store.get(organization_id, id)
    }

    /// Newest order first.
    pub fn list(&self, organization_id: OrganizationId) -> Vec<PurchaseOrderReadModel> {
        let mut rows = self.store.list(organization_id);
        rows.sort_by(|a, b| b.order_date.cmp(&a.order_date).then_with(|| b.id.cmp(&a.id)));
        rows
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        self.cursors.advance(envelope, || {
            let event: PurchaseOrderEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
            let organization_id = envelope.organization_id();

            match event {
                PurchaseOrderEvent::PurchaseOrderCreated(e) => {
                    ensure_scope(envelope, e.organization_id, e.order_id.0)?;
                    self.store.upsert(
                        organization_id,
                        e.order_id,
                        PurchaseOrderReadModel {
                            id: e.order_id,
                            po_number: e.po_number,
                            supplier_id: e.supplier_id,
                            status: PurchaseOrderStatus::Draft,
                            order_date: e.occurred_at,
                            expected_delivery_date: e.expected_delivery_date,
                            location_id: e.location_id,
                            total_amount: e.total_amount,
                            notes: e.notes,
                            lines: e.lines,
                            received_at: None,
                            updated_at: e.occurred_at,
                        },
                    );
                }
                PurchaseOrderEvent::StatusChanged(e) => {
                    ensure_scope(envelope, e.organization_id, e.order_id.0)?;
                    if let Some(mut rm) = self.store.get(organization_id, &e.order_id) {
                        rm.status = e.to;
                        if e.to == PurchaseOrderStatus::Received {
                            if e.receiving_location_id.is_some() {
                                rm.location_id = e.receiving_location_id;
                            }
                            for line in &mut rm.lines {
                                line.received_quantity = line.quantity_ordered;
                            }
                            rm.received_at = Some(e.occurred_at);
                        }
                        rm.updated_at = e.occurred_at;
                        self.store.upsert(organization_id, e.order_id, rm);
                    }
                }
            }
            Ok(())
        })
    }

    pub(crate) fn reset(&self, organization_id: OrganizationId) {
        self.store.clear_organization(organization_id);
    }

    pub(crate) fn reset_cursors(&self) {
        self.cursors.clear();
    }
}
