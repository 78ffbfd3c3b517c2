use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockflow_catalog::{LocationId, ProductId};
use stockflow_core::{ActorId, Aggregate, AggregateId, AggregateRoot, DomainError, OrganizationId};
use stockflow_events::Event;

use crate::level::{StockLevel, StockStatus};
use crate::movement::{
    MovementOrigin, MovementReference, MovementType, StockMovement, validate_movement,
    validate_reference,
};

/// Stream type under which stock items are stored.
pub const STOCK_ITEM_AGGREGATE_TYPE: &str = "inventory.stock_item";

/// Stock item identifier, derived from its organization/product/location key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockItemId(pub AggregateId);

impl StockItemId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn for_key(
        organization_id: OrganizationId,
        product_id: ProductId,
        location_id: LocationId,
    ) -> Self {
        Self(AggregateId::derived(
            STOCK_ITEM_AGGREGATE_TYPE,
            &[
                organization_id.as_uuid().as_bytes(),
                product_id.as_bytes(),
                location_id.as_bytes(),
            ],
        ))
    }
}

impl core::fmt::Display for StockItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: StockItem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockItem {
    id: StockItemId,
    organization_id: Option<OrganizationId>,
    product_id: Option<ProductId>,
    location_id: Option<LocationId>,
    level: StockLevel,
    /// Receipt lines already posted into this item.
    posted_receipts: BTreeSet<MovementReference>,
    movement_count: u64,
    last_movement_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl StockItem {
    /// Create an empty, not-yet-opened aggregate instance for rehydration.
    pub fn empty(id: StockItemId) -> Self {
        Self {
            id,
            organization_id: None,
            product_id: None,
            location_id: None,
            level: StockLevel::opened(0),
            posted_receipts: BTreeSet::new(),
            movement_count: 0,
            last_movement_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> StockItemId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn organization_id(&self) -> Option<OrganizationId> {
        self.organization_id
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn location_id(&self) -> Option<LocationId> {
        self.location_id
    }

    pub fn level(&self) -> &StockLevel {
        &self.level
    }

    pub fn quantity(&self) -> i64 {
        self.level.quantity
    }

    pub fn average_cost(&self) -> Decimal {
        self.level.average_cost
    }

    pub fn low_stock_threshold(&self) -> i64 {
        self.level.low_stock_threshold
    }

    pub fn status(&self) -> StockStatus {
        self.level.status()
    }

    pub fn movement_count(&self) -> u64 {
        self.movement_count
    }

    pub fn has_posted(&self, reference: &MovementReference) -> bool {
        self.posted_receipts.contains(reference)
    }

    pub fn snapshot(&self) -> Option<StockItemSnapshot> {
        if !self.created {
            return None;
        }
        Some(StockItemSnapshot {
            id: self.id,
            organization_id: self.organization_id?,
            product_id: self.product_id?,
            location_id: self.location_id?,
            quantity: self.level.quantity,
            reserved_quantity: self.level.reserved_quantity,
            available_quantity: self.level.available(),
            average_cost: self.level.average_cost,
            low_stock_threshold: self.level.low_stock_threshold,
            status: self.level.status(),
            last_movement_at: self.last_movement_at,
            version: self.version,
        })
    }
}

impl AggregateRoot for StockItem {
    type Id = StockItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Point-in-time view of a stock item, as returned by write operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItemSnapshot {
    pub id: StockItemId,
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub reserved_quantity: i64,
    pub available_quantity: i64,
    pub average_cost: Decimal,
    pub low_stock_threshold: i64,
    pub status: StockStatus,
    pub last_movement_at: Option<DateTime<Utc>>,
    pub version: u64,
}

/// Command: OpenStockItem (explicit creation, optionally with opening stock).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenStockItem {
    pub organization_id: OrganizationId,
    pub item_id: StockItemId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub low_stock_threshold: i64,
    pub opening_quantity: i64,
    pub opening_cost: Decimal,
    pub movement_id: Uuid,
    pub actor: Option<ActorId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordMovement (manual ledger entry).
///
/// Opens the item on first use with `low_stock_threshold`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMovement {
    pub organization_id: OrganizationId,
    pub item_id: StockItemId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub movement_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub unit_cost: Decimal,
    pub reference: Option<MovementReference>,
    pub notes: Option<String>,
    pub actor: Option<ActorId>,
    pub low_stock_threshold: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PostReceipt (stock_in for one purchase order line, at most once).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostReceipt {
    pub organization_id: OrganizationId,
    pub item_id: StockItemId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub movement_id: Uuid,
    pub quantity: i64,
    pub unit_cost: Decimal,
    pub reference: MovementReference,
    pub notes: Option<String>,
    pub actor: Option<ActorId>,
    pub low_stock_threshold: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CorrectStockItem (manual quantity and/or average cost fix).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectStockItem {
    pub organization_id: OrganizationId,
    pub item_id: StockItemId,
    pub movement_id: Uuid,
    pub quantity: Option<i64>,
    pub average_cost: Option<Decimal>,
    pub actor: Option<ActorId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApplyLowStockThreshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyLowStockThreshold {
    pub organization_id: OrganizationId,
    pub item_id: StockItemId,
    pub low_stock_threshold: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockItemCommand {
    OpenStockItem(OpenStockItem),
    RecordMovement(RecordMovement),
    PostReceipt(PostReceipt),
    CorrectStockItem(CorrectStockItem),
    ApplyLowStockThreshold(ApplyLowStockThreshold),
}

/// Event: StockItemOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItemOpened {
    pub organization_id: OrganizationId,
    pub item_id: StockItemId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub low_stock_threshold: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecorded {
    pub organization_id: OrganizationId,
    pub item_id: StockItemId,
    pub movement: StockMovement,
}

/// Event: AverageCostCorrected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AverageCostCorrected {
    pub organization_id: OrganizationId,
    pub item_id: StockItemId,
    pub average_cost: Decimal,
    pub actor: Option<ActorId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LowStockThresholdChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockThresholdChanged {
    pub organization_id: OrganizationId,
    pub item_id: StockItemId,
    pub low_stock_threshold: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockItemEvent {
    StockItemOpened(StockItemOpened),
    MovementRecorded(MovementRecorded),
    AverageCostCorrected(AverageCostCorrected),
    LowStockThresholdChanged(LowStockThresholdChanged),
}

impl Event for StockItemEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockItemEvent::StockItemOpened(_) => "inventory.stock_item.opened",
            StockItemEvent::MovementRecorded(_) => "inventory.stock_item.movement_recorded",
            StockItemEvent::AverageCostCorrected(_) => "inventory.stock_item.average_cost_corrected",
            StockItemEvent::LowStockThresholdChanged(_) => "inventory.stock_item.threshold_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockItemEvent::StockItemOpened(e) => e.occurred_at,
            StockItemEvent::MovementRecorded(e) => e.movement.occurred_at,
            StockItemEvent::AverageCostCorrected(e) => e.occurred_at,
            StockItemEvent::LowStockThresholdChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockItem {
    type Command = StockItemCommand;
    type Event = StockItemEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockItemEvent::StockItemOpened(e) => {
                self.id = e.item_id;
                self.organization_id = Some(e.organization_id);
                self.product_id = Some(e.product_id);
                self.location_id = Some(e.location_id);
                self.level = StockLevel::opened(e.low_stock_threshold);
                self.created = true;
            }
            StockItemEvent::MovementRecorded(e) => {
                let m = &e.movement;
                self.level.apply_movement(m.movement_type, m.quantity, m.unit_cost);
                if m.origin == MovementOrigin::Receipt {
                    if let Some(reference) = &m.reference {
                        self.posted_receipts.insert(reference.clone());
                    }
                }
                self.movement_count += 1;
                self.last_movement_at = Some(m.occurred_at);
            }
            StockItemEvent::AverageCostCorrected(e) => {
                self.level.average_cost = e.average_cost;
            }
            StockItemEvent::LowStockThresholdChanged(e) => {
                self.level.low_stock_threshold = e.low_stock_threshold;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockItemCommand::OpenStockItem(cmd) => self.handle_open(cmd),
            StockItemCommand::RecordMovement(cmd) => self.handle_record(cmd),
            StockItemCommand::PostReceipt(cmd) => self.handle_receipt(cmd),
            StockItemCommand::CorrectStockItem(cmd) => self.handle_correct(cmd),
            StockItemCommand::ApplyLowStockThreshold(cmd) => self.handle_threshold(cmd),
        }
    }
}

impl StockItem {
    fn ensure_organization(&self, organization_id: OrganizationId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.organization_id != Some(organization_id) {
            return Err(DomainError::invariant("organization mismatch"));
        }
        Ok(())
    }

    fn ensure_item_id(&self, item_id: StockItemId) -> Result<(), DomainError> {
        if self.id != item_id {
            return Err(DomainError::invariant("item_id mismatch"));
        }
        Ok(())
    }

    /// The stream id is derived from the key, so a command naming a different
    /// product or location than its id encodes is malformed.
    fn ensure_key(
        &self,
        organization_id: OrganizationId,
        item_id: StockItemId,
        product_id: ProductId,
        location_id: LocationId,
    ) -> Result<(), DomainError> {
        self.ensure_organization(organization_id)?;
        self.ensure_item_id(item_id)?;
        if StockItemId::for_key(organization_id, product_id, location_id) != item_id {
            return Err(DomainError::invariant("stock item key mismatch"));
        }
        Ok(())
    }

    fn opened_event(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
        location_id: LocationId,
        low_stock_threshold: i64,
        occurred_at: DateTime<Utc>,
    ) -> StockItemEvent {
        StockItemEvent::StockItemOpened(StockItemOpened {
            organization_id,
            item_id: self.id,
            product_id,
            location_id,
            low_stock_threshold,
            occurred_at,
        })
    }

    fn handle_open(&self, cmd: &OpenStockItem) -> Result<Vec<StockItemEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("stock item already exists"));
        }
        self.ensure_key(cmd.organization_id, cmd.item_id, cmd.product_id, cmd.location_id)?;
        validate_movement(MovementType::Adjustment, cmd.opening_quantity, cmd.opening_cost)?;

        let mut events = vec![self.opened_event(
            cmd.organization_id,
            cmd.product_id,
            cmd.location_id,
            cmd.low_stock_threshold,
            cmd.occurred_at,
        )];

        if cmd.opening_quantity > 0 {
            events.push(StockItemEvent::MovementRecorded(MovementRecorded {
                organization_id: cmd.organization_id,
                item_id: cmd.item_id,
                movement: StockMovement {
                    movement_id: cmd.movement_id,
                    product_id: cmd.product_id,
                    location_id: cmd.location_id,
                    movement_type: MovementType::StockIn,
                    quantity: cmd.opening_quantity,
                    unit_cost: cmd.opening_cost,
                    origin: MovementOrigin::Opening,
                    reference: None,
                    notes: Some("opening balance".to_string()),
                    actor: cmd.actor,
                    occurred_at: cmd.occurred_at,
                },
            }));
        } else if cmd.opening_cost > Decimal::ZERO {
            events.push(StockItemEvent::AverageCostCorrected(AverageCostCorrected {
                organization_id: cmd.organization_id,
                item_id: cmd.item_id,
                average_cost: cmd.opening_cost,
                actor: cmd.actor,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_record(&self, cmd: &RecordMovement) -> Result<Vec<StockItemEvent>, DomainError> {
        self.ensure_key(cmd.organization_id, cmd.item_id, cmd.product_id, cmd.location_id)?;
        validate_movement(cmd.movement_type, cmd.quantity, cmd.unit_cost)?;
        if let Some(reference) = &cmd.reference {
            validate_reference(reference)?;
        }

        let mut events = Vec::with_capacity(2);
        if !self.created {
            if cmd.movement_type == MovementType::StockOut {
                return Err(DomainError::insufficient_stock(cmd.quantity, 0));
            }
            events.push(self.opened_event(
                cmd.organization_id,
                cmd.product_id,
                cmd.location_id,
                cmd.low_stock_threshold,
                cmd.occurred_at,
            ));
        }

        // Rejects a stock_out that would go negative before anything is emitted.
        self.level
            .after_movement(cmd.movement_type, cmd.quantity, cmd.unit_cost)?;

        events.push(StockItemEvent::MovementRecorded(MovementRecorded {
            organization_id: cmd.organization_id,
            item_id: cmd.item_id,
            movement: StockMovement {
                movement_id: cmd.movement_id,
                product_id: cmd.product_id,
                location_id: cmd.location_id,
                movement_type: cmd.movement_type,
                quantity: cmd.quantity,
                unit_cost: cmd.unit_cost,
                origin: MovementOrigin::Manual,
                reference: cmd.reference.clone(),
                notes: cmd.notes.clone(),
                actor: cmd.actor,
                occurred_at: cmd.occurred_at,
            },
        }));

        Ok(events)
    }

    fn handle_receipt(&self, cmd: &PostReceipt) -> Result<Vec<StockItemEvent>, DomainError> {
        self.ensure_key(cmd.organization_id, cmd.item_id, cmd.product_id, cmd.location_id)?;
        validate_movement(MovementType::StockIn, cmd.quantity, cmd.unit_cost)?;
        validate_reference(&cmd.reference)?;

        if self.has_posted(&cmd.reference) {
            return Ok(vec![]);
        }

        let mut events = Vec::with_capacity(2);
        if !self.created {
            events.push(self.opened_event(
                cmd.organization_id,
                cmd.product_id,
                cmd.location_id,
                cmd.low_stock_threshold,
                cmd.occurred_at,
            ));
        }

        self.level
            .after_movement(MovementType::StockIn, cmd.quantity, cmd.unit_cost)?;

        events.push(StockItemEvent::MovementRecorded(MovementRecorded {
            organization_id: cmd.organization_id,
            item_id: cmd.item_id,
            movement: StockMovement {
                movement_id: cmd.movement_id,
                product_id: cmd.product_id,
                location_id: cmd.location_id,
                movement_type: MovementType::StockIn,
                quantity: cmd.quantity,
                unit_cost: cmd.unit_cost,
                origin: MovementOrigin::Receipt,
                reference: Some(cmd.reference.clone()),
                notes: cmd.notes.clone(),
                actor: cmd.actor,
                occurred_at: cmd.occurred_at,
            },
        }));

        Ok(events)
    }

    fn handle_correct(&self, cmd: &CorrectStockItem) -> Result<Vec<StockItemEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("stock item"));
        }
        self.ensure_organization(cmd.organization_id)?;
        self.ensure_item_id(cmd.item_id)?;

        if cmd.quantity.is_none() && cmd.average_cost.is_none() {
            return Err(DomainError::validation(
                "correction needs quantity or average_cost",
            ));
        }

        let (Some(product_id), Some(location_id)) = (self.product_id, self.location_id) else {
            return Err(DomainError::invariant("stock item key missing"));
        };

        let mut events = Vec::with_capacity(2);

        if let Some(quantity) = cmd.quantity {
            validate_movement(MovementType::Adjustment, quantity, self.level.average_cost)?;
            events.push(StockItemEvent::MovementRecorded(MovementRecorded {
                organization_id: cmd.organization_id,
                item_id: cmd.item_id,
                movement: StockMovement {
                    movement_id: cmd.movement_id,
                    product_id,
                    location_id,
                    movement_type: MovementType::Adjustment,
                    quantity,
                    unit_cost: self.level.average_cost,
                    origin: MovementOrigin::Correction,
                    reference: None,
                    notes: Some("manual correction".to_string()),
                    actor: cmd.actor,
                    occurred_at: cmd.occurred_at,
                },
            }));
        }

        if let Some(average_cost) = cmd.average_cost {
            if average_cost < Decimal::ZERO {
                return Err(DomainError::validation("average_cost cannot be negative"));
            }
            events.push(StockItemEvent::AverageCostCorrected(AverageCostCorrected {
                organization_id: cmd.organization_id,
                item_id: cmd.item_id,
                average_cost,
                actor: cmd.actor,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_threshold(
        &self,
        cmd: &ApplyLowStockThreshold,
    ) -> Result<Vec<StockItemEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("stock item"));
        }
        self.ensure_organization(cmd.organization_id)?;
        self.ensure_item_id(cmd.item_id)?;

        Ok(vec![StockItemEvent::LowStockThresholdChanged(
            LowStockThresholdChanged {
                organization_id: cmd.organization_id,
                item_id: cmd.item_id,
                low_stock_threshold: cmd.low_stock_threshold,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use stockflow_events::execute;

    struct Key {
        org: OrganizationId,
        product: ProductId,
        location: LocationId,
        id: StockItemId,
    }

    fn test_key() -> Key {
        let org = OrganizationId::new();
        let product = ProductId::generate();
        let location = LocationId::generate();
        Key {
            org,
            product,
            location,
            id: StockItemId::for_key(org, product, location),
        }
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn movement(key: &Key, movement_type: MovementType, quantity: i64, unit_cost: Decimal) -> StockItemCommand {
        StockItemCommand::RecordMovement(RecordMovement {
            organization_id: key.org,
            item_id: key.id,
            product_id: key.product,
            location_id: key.location,
            movement_id: Uuid::now_v7(),
            movement_type,
            quantity,
            unit_cost,
            reference: None,
            notes: None,
            actor: None,
            low_stock_threshold: 10,
            occurred_at: test_time(),
        })
    }

    fn receipt(key: &Key, order: Uuid, line_no: u32, quantity: i64, unit_cost: Decimal) -> StockItemCommand {
        StockItemCommand::PostReceipt(PostReceipt {
            organization_id: key.org,
            item_id: key.id,
            product_id: key.product,
            location_id: key.location,
            movement_id: Uuid::now_v7(),
            quantity,
            unit_cost,
            reference: MovementReference::purchase_order_line(order, line_no),
            notes: None,
            actor: None,
            low_stock_threshold: 10,
            occurred_at: test_time(),
        })
    }

    #[test]
    fn first_movement_opens_item_with_threshold_snapshot() {
        let key = test_key();
        let mut item = StockItem::empty(key.id);

        let events = execute(&mut item, &movement(&key, MovementType::StockIn, 5, dec!(2.00))).unwrap();

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StockItemEvent::StockItemOpened(_)));
        assert!(matches!(events[1], StockItemEvent::MovementRecorded(_)));
        assert_eq!(item.quantity(), 5);
        assert_eq!(item.average_cost(), dec!(2.00));
        assert_eq!(item.low_stock_threshold(), 10);
        assert_eq!(item.version(), 2);
    }

    #[test]
    fn stock_out_on_missing_item_is_insufficient() {
        let key = test_key();
        let item = StockItem::empty(key.id);

        match item.handle(&movement(&key, MovementType::StockOut, 1, Decimal::ZERO)) {
            Err(DomainError::InsufficientStock { available, .. }) => assert_eq!(available, 0),
            other => panic!("expected insufficient stock, got {other:?}"),
        }
    }

    #[test]
    fn rejected_stock_out_leaves_state_unchanged() {
        let key = test_key();
        let mut item = StockItem::empty(key.id);
        execute(&mut item, &movement(&key, MovementType::StockIn, 3, dec!(1))).unwrap();
        let before = item.clone();

        let result = execute(&mut item, &movement(&key, MovementType::StockOut, 4, Decimal::ZERO));

        assert!(matches!(result, Err(DomainError::InsufficientStock { .. })));
        assert_eq!(item, before);
    }

    #[test]
    fn adjustment_sets_absolute_quantity() {
        let key = test_key();
        let mut item = StockItem::empty(key.id);
        execute(&mut item, &movement(&key, MovementType::StockIn, 30, dec!(4))).unwrap();
        execute(&mut item, &movement(&key, MovementType::Adjustment, 7, Decimal::ZERO)).unwrap();

        assert_eq!(item.quantity(), 7);
        assert_eq!(item.average_cost(), dec!(4));
    }

    #[test]
    fn receipt_line_posts_only_once() {
        let key = test_key();
        let order = Uuid::now_v7();
        let mut item = StockItem::empty(key.id);

        let first = execute(&mut item, &receipt(&key, order, 1, 5, dec!(2))).unwrap();
        let second = execute(&mut item, &receipt(&key, order, 1, 5, dec!(2))).unwrap();

        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        assert_eq!(item.quantity(), 5);
        assert!(item.has_posted(&MovementReference::purchase_order_line(order, 1)));
    }

    #[test]
    fn distinct_lines_of_one_order_both_post() {
        let key = test_key();
        let order = Uuid::now_v7();
        let mut item = StockItem::empty(key.id);

        execute(&mut item, &receipt(&key, order, 1, 5, dec!(2))).unwrap();
        execute(&mut item, &receipt(&key, order, 2, 5, dec!(4))).unwrap();

        assert_eq!(item.quantity(), 10);
        assert_eq!(item.average_cost(), dec!(3));
    }

    #[test]
    fn manual_movement_with_order_reference_does_not_block_receipt() {
        let key = test_key();
        let order = Uuid::now_v7();
        let mut item = StockItem::empty(key.id);

        let manual = match movement(&key, MovementType::StockIn, 1, dec!(1)) {
            StockItemCommand::RecordMovement(mut m) => {
                m.reference = Some(MovementReference::purchase_order_line(order, 1));
                StockItemCommand::RecordMovement(m)
            }
            _ => unreachable!(),
        };
        execute(&mut item, &manual).unwrap();

        let events = execute(&mut item, &receipt(&key, order, 1, 5, dec!(1))).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(item.quantity(), 6);
    }

    #[test]
    fn open_with_opening_balance_records_stock_in() {
        let key = test_key();
        let mut item = StockItem::empty(key.id);

        let cmd = StockItemCommand::OpenStockItem(OpenStockItem {
            organization_id: key.org,
            item_id: key.id,
            product_id: key.product,
            location_id: key.location,
            low_stock_threshold: 3,
            opening_quantity: 12,
            opening_cost: dec!(1.5),
            movement_id: Uuid::now_v7(),
            actor: None,
            occurred_at: test_time(),
        });
        execute(&mut item, &cmd).unwrap();

        assert_eq!(item.quantity(), 12);
        assert_eq!(item.average_cost(), dec!(1.5));
        assert_eq!(item.movement_count(), 1);

        match item.handle(&cmd) {
            Err(DomainError::Conflict(msg)) => assert!(msg.contains("already exists")),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn correction_goes_through_ledger_and_cost_event() {
        let key = test_key();
        let mut item = StockItem::empty(key.id);
        execute(&mut item, &movement(&key, MovementType::StockIn, 10, dec!(5))).unwrap();

        let events = execute(
            &mut item,
            &StockItemCommand::CorrectStockItem(CorrectStockItem {
                organization_id: key.org,
                item_id: key.id,
                movement_id: Uuid::now_v7(),
                quantity: Some(8),
                average_cost: Some(dec!(4.25)),
                actor: None,
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        assert_eq!(events.len(), 2);
        match &events[0] {
            StockItemEvent::MovementRecorded(e) => {
                assert_eq!(e.movement.movement_type, MovementType::Adjustment);
                assert_eq!(e.movement.origin, MovementOrigin::Correction);
            }
            other => panic!("expected movement, got {other:?}"),
        }
        assert_eq!(item.quantity(), 8);
        assert_eq!(item.average_cost(), dec!(4.25));
    }

    #[test]
    fn correction_of_unknown_item_is_not_found() {
        let key = test_key();
        let item = StockItem::empty(key.id);

        let result = item.handle(&StockItemCommand::CorrectStockItem(CorrectStockItem {
            organization_id: key.org,
            item_id: key.id,
            movement_id: Uuid::now_v7(),
            quantity: Some(1),
            average_cost: None,
            actor: None,
            occurred_at: test_time(),
        }));
        assert!(matches!(result, Err(DomainError::NotFound(_))));
    }

    #[test]
    fn threshold_change_only_touches_threshold() {
        let key = test_key();
        let mut item = StockItem::empty(key.id);
        execute(&mut item, &movement(&key, MovementType::StockIn, 15, dec!(1))).unwrap();
        assert_eq!(item.status(), StockStatus::Normal);

        execute(
            &mut item,
            &StockItemCommand::ApplyLowStockThreshold(ApplyLowStockThreshold {
                organization_id: key.org,
                item_id: key.id,
                low_stock_threshold: 20,
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        assert_eq!(item.low_stock_threshold(), 20);
        assert_eq!(item.quantity(), 15);
        assert_eq!(item.status(), StockStatus::LowStock);
    }

    #[test]
    fn mismatched_key_is_rejected() {
        let key = test_key();
        let item = StockItem::empty(key.id);
        let other = Key {
            product: ProductId::generate(),
            ..test_key()
        };
        let cmd = match movement(&key, MovementType::StockIn, 1, dec!(1)) {
            StockItemCommand::RecordMovement(mut m) => {
                m.product_id = other.product;
                StockItemCommand::RecordMovement(m)
            }
            _ => unreachable!(),
        };

        assert!(matches!(item.handle(&cmd), Err(DomainError::InvariantViolation(_))));
    }

    fn movement_strategy() -> impl Strategy<Value = (MovementType, i64, i64)> {
        (
            prop_oneof![
                Just(MovementType::StockIn),
                Just(MovementType::StockOut),
                Just(MovementType::Adjustment),
            ],
            0i64..200,
            0i64..5_000,
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn replaying_the_stream_reproduces_state(ops in prop::collection::vec(movement_strategy(), 1..40)) {
            let key = test_key();
            let mut live = StockItem::empty(key.id);
            let mut history = Vec::new();

            for (movement_type, quantity, cents) in ops {
                let cmd = movement(&key, movement_type, quantity, Decimal::new(cents, 2));
                if let Ok(events) = execute(&mut live, &cmd) {
                    history.extend(events);
                }
                prop_assert!(live.quantity() >= 0);
            }

            let mut replayed = StockItem::empty(key.id);
            replayed.replay(&history);
            prop_assert_eq!(&replayed, &live);

            // Folding only the ledger rows reproduces the quantity.
            let mut quantity = 0i64;
            for event in &history {
                if let StockItemEvent::MovementRecorded(e) = event {
                    quantity = match e.movement.movement_type {
                        MovementType::StockIn => quantity + e.movement.quantity,
                        MovementType::StockOut => quantity - e.movement.quantity,
                        MovementType::Adjustment => e.movement.quantity,
                    };
                }
            }
            prop_assert_eq!(quantity, live.quantity());
        }
    }
}
