use thiserror::Error;

use stockflow_core::OrganizationId;

use crate::ids::{LocationId, ProductId, SupplierId};
use crate::model::{Location, NewLocation, NewProduct, NewSupplier, Organization, Product, Supplier};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("invalid {0}")]
    Invalid(String),

    #[error("duplicate {0}")]
    Duplicate(String),

    #[error("catalog unavailable")]
    Unavailable,
}

/// Resolves the organization a request is scoped to.
pub trait OrganizationDirectory: Send + Sync {
    fn resolve(&self, slug: &str) -> Option<Organization>;
}

pub trait ProductCatalog: Send + Sync {
    fn product(&self, organization_id: OrganizationId, id: ProductId) -> Option<Product>;

    fn products(&self, organization_id: OrganizationId) -> Vec<Product>;

    fn add_product(
        &self,
        organization_id: OrganizationId,
        product: NewProduct,
    ) -> Result<Product, CatalogError>;
}

pub trait SupplierDirectory: Send + Sync {
    fn supplier(&self, organization_id: OrganizationId, id: SupplierId) -> Option<Supplier>;

    fn suppliers(&self, organization_id: OrganizationId) -> Vec<Supplier>;

    fn add_supplier(
        &self,
        organization_id: OrganizationId,
        supplier: NewSupplier,
    ) -> Result<Supplier, CatalogError>;
}

pub trait LocationDirectory: Send + Sync {
    fn location(&self, organization_id: OrganizationId, id: LocationId) -> Option<Location>;

    /// Locations in creation order.
    fn locations(&self, organization_id: OrganizationId) -> Vec<Location>;

    fn add_location(
        &self,
        organization_id: OrganizationId,
        location: NewLocation,
    ) -> Result<Location, CatalogError>;

    /// Create the organization's fallback receiving location.
    fn create_default(&self, organization_id: OrganizationId) -> Result<Location, CatalogError>;

    fn first_active(&self, organization_id: OrganizationId) -> Option<Location> {
        self.locations(organization_id)
            .into_iter()
            .find(|l| l.is_active)
    }
}

/// Everything the stock services look up, behind one trait object.
pub trait Directories:
    OrganizationDirectory + ProductCatalog + SupplierDirectory + LocationDirectory
{
}

impl<T> Directories for T where
    T: OrganizationDirectory + ProductCatalog + SupplierDirectory + LocationDirectory
{
}
