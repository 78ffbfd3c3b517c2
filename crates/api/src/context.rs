use stockflow_catalog::Organization;
use stockflow_core::{ActorId, OrganizationId};

/// Organization context for a request.
///
/// Resolved from the `X-Organization` header by middleware; must be present
/// for every `/inventory` route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationContext {
    organization: Organization,
}

impl OrganizationContext {
    pub fn new(organization: Organization) -> Self {
        Self { organization }
    }

    pub fn organization_id(&self) -> OrganizationId {
        self.organization.id
    }

    pub fn slug(&self) -> &str {
        &self.organization.slug
    }
}

/// Who issued the request, when the caller says so (`X-Actor-Id`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ActorContext {
    actor_id: Option<ActorId>,
}

impl ActorContext {
    pub fn new(actor_id: Option<ActorId>) -> Self {
        Self { actor_id }
    }

    pub fn actor_id(&self) -> Option<ActorId> {
        self.actor_id
    }
}
