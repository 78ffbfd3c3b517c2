use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockflow_catalog::{LocationId, ProductId, SupplierId};
use stockflow_core::{ActorId, Aggregate, AggregateId, AggregateRoot, DomainError, OrganizationId};
use stockflow_events::Event;

pub const PURCHASE_ORDER_AGGREGATE_TYPE: &str = "purchasing.purchase_order";

/// Purchase order identifier (organization-scoped via `organization_id` fields).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderId(pub AggregateId);

impl PurchaseOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PurchaseOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Purchase order status lifecycle.
///
/// `Received` is absorbing. Every other pair of states may follow each other,
/// including skips and moves back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Draft,
    Approved,
    Ordered,
    PartiallyReceived,
    Received,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "draft",
            PurchaseOrderStatus::Approved => "approved",
            PurchaseOrderStatus::Ordered => "ordered",
            PurchaseOrderStatus::PartiallyReceived => "partially_received",
            PurchaseOrderStatus::Received => "received",
            PurchaseOrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_locked(self) -> bool {
        self == PurchaseOrderStatus::Received
    }
}

impl core::fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for PurchaseOrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "draft" => Ok(PurchaseOrderStatus::Draft),
            "approved" => Ok(PurchaseOrderStatus::Approved),
            "ordered" => Ok(PurchaseOrderStatus::Ordered),
            "partially_received" => Ok(PurchaseOrderStatus::PartiallyReceived),
            "received" => Ok(PurchaseOrderStatus::Received),
            "cancelled" => Ok(PurchaseOrderStatus::Cancelled),
            other => Err(DomainError::validation(format!("invalid status '{other}'"))),
        }
    }
}

/// Purchase order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity_ordered: i64,
    pub unit_cost: Decimal,
    pub received_quantity: i64,
}

impl PurchaseOrderLine {
    pub fn line_total(&self) -> Decimal {
        Decimal::from(self.quantity_ordered) * self.unit_cost
    }
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    organization_id: Option<OrganizationId>,
    supplier_id: Option<SupplierId>,
    po_number: String,
    status: PurchaseOrderStatus,
    order_date: Option<DateTime<Utc>>,
    expected_delivery_date: Option<NaiveDate>,
    location_id: Option<LocationId>,
    total_amount: Decimal,
    notes: Option<String>,
    lines: Vec<PurchaseOrderLine>,
    received_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl PurchaseOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            organization_id: None,
            supplier_id: None,
            po_number: String::new(),
            status: PurchaseOrderStatus::Draft,
            order_date: None,
            expected_delivery_date: None,
            location_id: None,
            total_amount: Decimal::ZERO,
            notes: None,
            lines: Vec::new(),
            received_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn organization_id(&self) -> Option<OrganizationId> {
        self.organization_id
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        self.supplier_id
    }

    pub fn po_number(&self) -> &str {
        &self.po_number
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn order_date(&self) -> Option<DateTime<Utc>> {
        self.order_date
    }

    pub fn expected_delivery_date(&self) -> Option<NaiveDate> {
        self.expected_delivery_date
    }

    pub fn location_id(&self) -> Option<LocationId> {
        self.location_id
    }

    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn lines(&self) -> &[PurchaseOrderLine] {
        &self.lines
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.received_at
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Requested line on order creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_cost: Decimal,
}

/// Command: CreatePurchaseOrder (header and all lines in one step).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub organization_id: OrganizationId,
    pub order_id: PurchaseOrderId,
    pub supplier_id: SupplierId,
    pub po_number: String,
    pub lines: Vec<NewOrderLine>,
    pub location_id: Option<LocationId>,
    pub expected_delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub actor: Option<ActorId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeStatus.
///
/// A move into `Received` must name where the goods land, either here or via
/// the order's own location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStatus {
    pub organization_id: OrganizationId,
    pub order_id: PurchaseOrderId,
    pub status: PurchaseOrderStatus,
    pub receiving_location_id: Option<LocationId>,
    pub actor: Option<ActorId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderCommand {
    CreatePurchaseOrder(CreatePurchaseOrder),
    ChangeStatus(ChangeStatus),
}

/// Event: PurchaseOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCreated {
    pub organization_id: OrganizationId,
    pub order_id: PurchaseOrderId,
    pub supplier_id: SupplierId,
    pub po_number: String,
    pub lines: Vec<PurchaseOrderLine>,
    pub total_amount: Decimal,
    pub location_id: Option<LocationId>,
    pub expected_delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub actor: Option<ActorId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub organization_id: OrganizationId,
    pub order_id: PurchaseOrderId,
    pub from: PurchaseOrderStatus,
    pub to: PurchaseOrderStatus,
    pub receiving_location_id: Option<LocationId>,
    pub actor: Option<ActorId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    PurchaseOrderCreated(PurchaseOrderCreated),
    StatusChanged(StatusChanged),
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(_) => "purchasing.purchase_order.created",
            PurchaseOrderEvent::StatusChanged(_) => "purchasing.purchase_order.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.occurred_at,
            PurchaseOrderEvent::StatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseOrder {
    type Command = PurchaseOrderCommand;
    type Event = PurchaseOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => {
                self.id = e.order_id;
                self.organization_id = Some(e.organization_id);
                self.supplier_id = Some(e.supplier_id);
                self.po_number = e.po_number.clone();
                self.status = PurchaseOrderStatus::Draft;
                self.order_date = Some(e.occurred_at);
                self.expected_delivery_date = e.expected_delivery_date;
                self.location_id = e.location_id;
                self.total_amount = e.total_amount;
                self.notes = e.notes.clone();
                self.lines = e.lines.clone();
                self.created = true;
            }
            PurchaseOrderEvent::StatusChanged(e) => {
                self.status = e.to;
                if e.to == PurchaseOrderStatus::Received {
                    if e.receiving_location_id.is_some() {
                        self.location_id = e.receiving_location_id;
                    }
                    for line in &mut self.lines {
                        line.received_quantity = line.quantity_ordered;
                    }
                    self.received_at = Some(e.occurred_at);
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseOrderCommand::CreatePurchaseOrder(cmd) => self.handle_create(cmd),
            PurchaseOrderCommand::ChangeStatus(cmd) => self.handle_change_status(cmd),
        }
    }
}

impl PurchaseOrder {
    fn ensure_organization(&self, organization_id: OrganizationId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.organization_id != Some(organization_id) {
            return Err(DomainError::invariant("organization mismatch"));
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreatePurchaseOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase order already exists"));
        }
        self.ensure_order_id(cmd.order_id)?;

        let po_number = cmd.po_number.trim();
        if po_number.is_empty() {
            return Err(DomainError::validation("po_number is required"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("at least one item is required"));
        }

        let mut lines = Vec::with_capacity(cmd.lines.len());
        let mut total_amount = Decimal::ZERO;
        for (idx, line) in cmd.lines.iter().enumerate() {
            let line_no = (idx + 1) as u32;
            if line.quantity <= 0 {
                return Err(DomainError::validation(format!(
                    "item {line_no}: quantity must be positive"
                )));
            }
            if line.unit_cost < Decimal::ZERO {
                return Err(DomainError::validation(format!(
                    "item {line_no}: unit_cost cannot be negative"
                )));
            }
            let line_total = Decimal::from(line.quantity)
                .checked_mul(line.unit_cost)
                .ok_or_else(|| DomainError::validation(format!("item {line_no}: amount out of range")))?;
            total_amount = total_amount
                .checked_add(line_total)
                .ok_or_else(|| DomainError::validation("total_amount out of range"))?;

            lines.push(PurchaseOrderLine {
                line_no,
                product_id: line.product_id,
                quantity_ordered: line.quantity,
                unit_cost: line.unit_cost,
                received_quantity: 0,
            });
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCreated(PurchaseOrderCreated {
            organization_id: cmd.organization_id,
            order_id: cmd.order_id,
            supplier_id: cmd.supplier_id,
            po_number: po_number.to_string(),
            lines,
            total_amount,
            location_id: cmd.location_id,
            expected_delivery_date: cmd.expected_delivery_date,
            notes: cmd.notes.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(&self, cmd: &ChangeStatus) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("purchase order"));
        }
        self.ensure_organization(cmd.organization_id)?;
        self.ensure_order_id(cmd.order_id)?;

        if self.status.is_locked() && cmd.status != self.status {
            return Err(DomainError::conflict(
                "cannot revert a received order; use movements for corrections",
            ));
        }
        if cmd.status == self.status {
            return Ok(vec![]);
        }

        let receiving_location_id = if cmd.status == PurchaseOrderStatus::Received {
            let location = cmd.receiving_location_id.or(self.location_id);
            if location.is_none() {
                return Err(DomainError::validation(
                    "receiving location must be resolved before receiving",
                ));
            }
            location
        } else {
            None
        };

        Ok(vec![PurchaseOrderEvent::StatusChanged(StatusChanged {
            organization_id: cmd.organization_id,
            order_id: cmd.order_id,
            from: self.status,
            to: cmd.status,
            receiving_location_id,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use stockflow_events::execute;

    const ALL: [PurchaseOrderStatus; 6] = [
        PurchaseOrderStatus::Draft,
        PurchaseOrderStatus::Approved,
        PurchaseOrderStatus::Ordered,
        PurchaseOrderStatus::PartiallyReceived,
        PurchaseOrderStatus::Received,
        PurchaseOrderStatus::Cancelled,
    ];

    fn test_organization_id() -> OrganizationId {
        OrganizationId::new()
    }

    fn test_order_id() -> PurchaseOrderId {
        PurchaseOrderId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn create_cmd(org: OrganizationId, order_id: PurchaseOrderId, lines: Vec<NewOrderLine>) -> PurchaseOrderCommand {
        PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
            organization_id: org,
            order_id,
            supplier_id: SupplierId::generate(),
            po_number: "PO-0001".to_string(),
            lines,
            location_id: None,
            expected_delivery_date: None,
            notes: None,
            actor: None,
            occurred_at: test_time(),
        })
    }

    fn line(quantity: i64, unit_cost: Decimal) -> NewOrderLine {
        NewOrderLine {
            product_id: ProductId::generate(),
            quantity,
            unit_cost,
        }
    }

    fn change(org: OrganizationId, order_id: PurchaseOrderId, status: PurchaseOrderStatus) -> PurchaseOrderCommand {
        PurchaseOrderCommand::ChangeStatus(ChangeStatus {
            organization_id: org,
            order_id,
            status,
            receiving_location_id: Some(LocationId::generate()),
            actor: None,
            occurred_at: test_time(),
        })
    }

    fn created_order(org: OrganizationId) -> PurchaseOrder {
        let order_id = test_order_id();
        let mut order = PurchaseOrder::empty(order_id);
        execute(
            &mut order,
            &create_cmd(org, order_id, vec![line(5, dec!(2.00)), line(3, dec!(10.00))]),
        )
        .unwrap();
        order
    }

    #[test]
    fn create_computes_total_and_numbers_lines() {
        let org = test_organization_id();
        let order = created_order(org);

        assert_eq!(order.status(), PurchaseOrderStatus::Draft);
        assert_eq!(order.total_amount(), dec!(40.00));
        assert_eq!(order.lines().len(), 2);
        assert_eq!(order.lines()[0].line_no, 1);
        assert_eq!(order.lines()[1].line_no, 2);
        assert!(order.lines().iter().all(|l| l.received_quantity == 0));
    }

    #[test]
    fn create_validates_items() {
        let org = test_organization_id();
        let order_id = test_order_id();
        let order = PurchaseOrder::empty(order_id);

        let cases = vec![
            (vec![], "at least one item"),
            (vec![line(0, dec!(1))], "quantity must be positive"),
            (vec![line(1, dec!(-1))], "unit_cost cannot be negative"),
        ];
        for (lines, expected) in cases {
            match order.handle(&create_cmd(org, order_id, lines)) {
                Err(DomainError::Validation(msg)) => assert!(msg.contains(expected), "{msg}"),
                other => panic!("expected validation error, got {other:?}"),
            }
        }
    }

    #[test]
    fn create_requires_po_number() {
        let org = test_organization_id();
        let order_id = test_order_id();
        let order = PurchaseOrder::empty(order_id);

        let cmd = match create_cmd(org, order_id, vec![line(1, dec!(1))]) {
            PurchaseOrderCommand::CreatePurchaseOrder(mut c) => {
                c.po_number = "   ".into();
                PurchaseOrderCommand::CreatePurchaseOrder(c)
            }
            _ => unreachable!(),
        };
        assert!(matches!(order.handle(&cmd), Err(DomainError::Validation(_))));
    }

    #[test]
    fn receiving_marks_every_line_received_and_records_location() {
        let org = test_organization_id();
        let mut order = created_order(org);
        let order_id = order.id_typed();

        execute(&mut order, &change(org, order_id, PurchaseOrderStatus::Approved)).unwrap();
        execute(&mut order, &change(org, order_id, PurchaseOrderStatus::Ordered)).unwrap();
        execute(&mut order, &change(org, order_id, PurchaseOrderStatus::Received)).unwrap();

        assert_eq!(order.status(), PurchaseOrderStatus::Received);
        assert!(order.location_id().is_some());
        assert!(order.received_at().is_some());
        assert!(order.lines().iter().all(|l| l.received_quantity == l.quantity_ordered));
    }

    #[test]
    fn receiving_without_any_location_is_rejected() {
        let org = test_organization_id();
        let order = created_order(org);

        let cmd = PurchaseOrderCommand::ChangeStatus(ChangeStatus {
            organization_id: org,
            order_id: order.id_typed(),
            status: PurchaseOrderStatus::Received,
            receiving_location_id: None,
            actor: None,
            occurred_at: test_time(),
        });
        assert!(matches!(order.handle(&cmd), Err(DomainError::Validation(_))));
    }

    #[test]
    fn same_status_is_a_no_op() {
        let org = test_organization_id();
        let order = created_order(org);
        let events = order
            .handle(&change(org, order.id_typed(), PurchaseOrderStatus::Draft))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn status_change_on_missing_order_is_not_found() {
        let org = test_organization_id();
        let order_id = test_order_id();
        let order = PurchaseOrder::empty(order_id);
        assert!(matches!(
            order.handle(&change(org, order_id, PurchaseOrderStatus::Approved)),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn received_order_rejects_every_other_status() {
        let org = test_organization_id();
        let mut order = created_order(org);
        let order_id = order.id_typed();
        execute(&mut order, &change(org, order_id, PurchaseOrderStatus::Received)).unwrap();

        for to in ALL {
            let result = order.handle(&change(org, order_id, to));
            if to == PurchaseOrderStatus::Received {
                assert!(result.unwrap().is_empty());
            } else {
                match result {
                    Err(DomainError::Conflict(msg)) => {
                        assert!(msg.contains("cannot revert a received order"))
                    }
                    other => panic!("expected conflict for {to}, got {other:?}"),
                }
            }
        }
    }

    #[test]
    fn foreign_organization_cannot_change_status() {
        let org = test_organization_id();
        let order = created_order(org);
        let result = order.handle(&change(OrganizationId::new(), order.id_typed(), PurchaseOrderStatus::Approved));
        assert!(matches!(result, Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn status_round_trips_through_wire_name() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<PurchaseOrderStatus>().unwrap(), status);
        }
        assert!("shipped".parse::<PurchaseOrderStatus>().is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn transitions_between_open_states_always_succeed(path in prop::collection::vec(0usize..6, 1..12)) {
            let org = test_organization_id();
            let mut order = created_order(org);
            let order_id = order.id_typed();

            for idx in path {
                let to = ALL[idx];
                let result = execute(&mut order, &change(org, order_id, to));
                if order.status() == PurchaseOrderStatus::Received && to != PurchaseOrderStatus::Received {
                    prop_assert!(matches!(result, Err(DomainError::Conflict(_))));
                } else {
                    prop_assert!(result.is_ok());
                    prop_assert_eq!(order.status(), to);
                }
            }
        }
    }
}
