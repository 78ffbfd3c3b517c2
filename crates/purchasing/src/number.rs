//! Per-organization purchase order numbers.
//!
//! Each number owns a stream keyed by (organization, number). Claiming it in the
//! same atomic append as the order's creation makes a second order with the
//! same number lose on the claim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{Aggregate, AggregateId, AggregateRoot, DomainError, OrganizationId};
use stockflow_events::Event;

use crate::order::PurchaseOrderId;

pub const PO_NUMBER_AGGREGATE_TYPE: &str = "purchasing.po_number";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoNumberClaimId(pub AggregateId);

impl PoNumberClaimId {
    pub fn for_number(organization_id: OrganizationId, po_number: &str) -> Self {
        Self(AggregateId::derived(
            PO_NUMBER_AGGREGATE_TYPE,
            &[organization_id.as_uuid().as_bytes(), po_number.trim().as_bytes()],
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoNumberClaim {
    id: PoNumberClaimId,
    organization_id: Option<OrganizationId>,
    po_number: String,
    claimed_by: Option<PurchaseOrderId>,
    version: u64,
}

impl PoNumberClaim {
    pub fn empty(id: PoNumberClaimId) -> Self {
        Self {
            id,
            organization_id: None,
            po_number: String::new(),
            claimed_by: None,
            version: 0,
        }
    }

    pub fn claimed_by(&self) -> Option<PurchaseOrderId> {
        self.claimed_by
    }

    pub fn po_number(&self) -> &str {
        &self.po_number
    }
}

impl AggregateRoot for PoNumberClaim {
    type Id = PoNumberClaimId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimPoNumber {
    pub organization_id: OrganizationId,
    pub po_number: String,
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoNumberClaimCommand {
    ClaimPoNumber(ClaimPoNumber),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoNumberClaimed {
    pub organization_id: OrganizationId,
    pub po_number: String,
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoNumberClaimEvent {
    PoNumberClaimed(PoNumberClaimed),
}

impl Event for PoNumberClaimEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PoNumberClaimEvent::PoNumberClaimed(_) => "purchasing.po_number.claimed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PoNumberClaimEvent::PoNumberClaimed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PoNumberClaim {
    type Command = PoNumberClaimCommand;
    type Event = PoNumberClaimEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PoNumberClaimEvent::PoNumberClaimed(e) => {
                self.organization_id = Some(e.organization_id);
                self.po_number = e.po_number.clone();
                self.claimed_by = Some(e.order_id);
            }
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PoNumberClaimCommand::ClaimPoNumber(cmd) => {
                let po_number = cmd.po_number.trim();
                if po_number.is_empty() {
                    return Err(DomainError::validation("po_number is required"));
                }
                if PoNumberClaimId::for_number(cmd.organization_id, po_number) != self.id {
                    return Err(DomainError::invariant("po_number claim key mismatch"));
                }
                match self.claimed_by {
                    Some(owner) if owner == cmd.order_id => Ok(vec![]),
                    Some(_) => Err(DomainError::conflict(format!(
                        "duplicate po_number '{po_number}'"
                    ))),
                    None => Ok(vec![PoNumberClaimEvent::PoNumberClaimed(PoNumberClaimed {
                        organization_id: cmd.organization_id,
                        po_number: po_number.to_string(),
                        order_id: cmd.order_id,
                        occurred_at: cmd.occurred_at,
                    })]),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockflow_events::execute;

    fn claim(org: OrganizationId, number: &str, order_id: PurchaseOrderId) -> PoNumberClaimCommand {
        PoNumberClaimCommand::ClaimPoNumber(ClaimPoNumber {
            organization_id: org,
            po_number: number.to_string(),
            order_id,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn second_order_cannot_claim_taken_number() {
        let org = OrganizationId::new();
        let mut claim_stream = PoNumberClaim::empty(PoNumberClaimId::for_number(org, "PO-1"));
        let first = PurchaseOrderId::new(AggregateId::new());

        execute(&mut claim_stream, &claim(org, "PO-1", first)).unwrap();
        assert_eq!(claim_stream.claimed_by(), Some(first));

        let second = PurchaseOrderId::new(AggregateId::new());
        match claim_stream.handle(&claim(org, "PO-1", second)) {
            Err(DomainError::Conflict(msg)) => assert!(msg.contains("duplicate po_number")),
            other => panic!("expected conflict, got {other:?}"),
        }

        // Re-claiming by the owner is a no-op.
        assert!(claim_stream.handle(&claim(org, "PO-1", first)).unwrap().is_empty());
    }

    #[test]
    fn same_number_in_other_organization_is_a_different_stream() {
        let a = OrganizationId::new();
        let b = OrganizationId::new();
        assert_ne!(
            PoNumberClaimId::for_number(a, "PO-1"),
            PoNumberClaimId::for_number(b, "PO-1")
        );
        assert_eq!(
            PoNumberClaimId::for_number(a, " PO-1 "),
            PoNumberClaimId::for_number(a, "PO-1")
        );
    }
}
