//! Organization-isolated read model storage.

pub mod organization_store;

pub use organization_store::{InMemoryOrganizationStore, OrganizationStore};
