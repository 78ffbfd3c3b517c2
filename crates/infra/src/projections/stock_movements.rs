use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use stockflow_catalog::{LocationId, ProductId};
use stockflow_core::{ActorId, OrganizationId};
use stockflow_events::EventEnvelope;
use stockflow_inventory::{MovementOrigin, MovementReference, MovementType, StockItemEvent, StockItemId};

use crate::projections::cursor::{ProjectionError, StreamCursors, ensure_scope};
use crate::read_model::OrganizationStore;

/// One ledger row as listed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockMovementReadModel {
    pub movement_id: Uuid,
    pub stock_item_id: StockItemId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub unit_cost: Decimal,
    pub origin: MovementOrigin,
    pub reference: Option<MovementReference>,
    pub notes: Option<String>,
    pub actor: Option<ActorId>,
    pub occurred_at: DateTime<Utc>,
    /// Position in the stock item stream.
    pub sequence_number: u64,
}

/// Movement history projection. Only `MovementRecorded` produces rows.
#[derive(Debug)]
pub struct StockMovementsProjection<S>
where
    S: OrganizationStore<Uuid, StockMovementReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> StockMovementsProjection<S>
where
    S: OrganizationStore<Uuid, StockMovementReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    /// Newest first.
    pub fn list(&self, organization_id: OrganizationId) -> Vec<StockMovementReadModel> {
        let mut rows = self.store.list(organization_id);
        rows.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| b.movement_id.cmp(&a.movement_id))
        });
        rows
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        self.cursors.advance(envelope, || {
            let event: StockItemEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

            if let StockItemEvent::MovementRecorded(e) = event {
                ensure_scope(envelope, e.organization_id, e.item_id.0)?;
                let m = e.movement;
                self.store.upsert(
                    envelope.organization_id(),
                    m.movement_id,
                    StockMovementReadModel {
                        movement_id: m.movement_id,
                        stock_item_id: e.item_id,
                        product_id: m.product_id,
                        location_id: m.location_id,
                        movement_type: m.movement_type,
                        quantity: m.quantity,
                        unit_cost: m.unit_cost,
                        origin: m.origin,
                        reference: m.reference,
                        notes: m.notes,
                        actor: m.actor,
                        occurred_at: m.occurred_at,
                        sequence_number: envelope.sequence_number(),
                    },
                );
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
