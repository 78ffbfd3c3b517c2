//! In-memory directory for tests/dev.

use std::collections::HashMap;
use std::sync::RwLock;

use stockflow_core::OrganizationId;

use crate::directory::{
    CatalogError, LocationDirectory, OrganizationDirectory, ProductCatalog, SupplierDirectory,
};
use crate::ids::{LocationId, ProductId, SupplierId};
use crate::model::{Location, NewLocation, NewProduct, NewSupplier, Organization, Product, Supplier};

pub const DEFAULT_LOCATION_NAME: &str = "Main Warehouse";

#[derive(Debug, Default)]
struct OrganizationRecords {
    products: Vec<Product>,
    suppliers: Vec<Supplier>,
    locations: Vec<Location>,
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    organizations: RwLock<HashMap<String, Organization>>,
    records: RwLock<HashMap<OrganizationId, OrganizationRecords>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an active organization under `slug` and return it.
    pub fn register_organization(&self, slug: &str, name: &str) -> Organization {
        self.register_organization_with_id(OrganizationId::new(), slug, name)
    }

    /// Like [`InMemoryCatalog::register_organization`], with a caller-chosen id
    /// so the organization survives restarts over a persistent event store.
    /// A slug that is already registered keeps its existing id.
    pub fn register_organization_with_id(&self, id: OrganizationId, slug: &str, name: &str) -> Organization {
        let org = Organization {
            id,
            slug: slug.to_string(),
            name: name.to_string(),
            is_active: true,
        };
        if let Ok(mut map) = self.organizations.write() {
            map.entry(slug.to_string()).or_insert_with(|| org.clone()).clone()
        } else {
            org
        }
    }

    pub fn deactivate_organization(&self, slug: &str) {
        if let Ok(mut map) = self.organizations.write() {
            if let Some(org) = map.get_mut(slug) {
                org.is_active = false;
            }
        }
    }

    fn read<T>(
        &self,
        organization_id: OrganizationId,
        f: impl FnOnce(&OrganizationRecords) -> T,
    ) -> Option<T> {
        let map = self.records.read().ok()?;
        map.get(&organization_id).map(f)
    }

    fn write<T>(
        &self,
        organization_id: OrganizationId,
        f: impl FnOnce(&mut OrganizationRecords) -> Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        let mut map = self.records.write().map_err(|_| CatalogError::Unavailable)?;
        f(map.entry(organization_id).or_default())
    }
}

fn required(field: &str, value: &str) -> Result<String, CatalogError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CatalogError::Invalid(format!("{field}: must not be empty")));
    }
    Ok(value.to_string())
}

impl OrganizationDirectory for InMemoryCatalog {
    fn resolve(&self, slug: &str) -> Option<Organization> {
        let map = self.organizations.read().ok()?;
        map.get(slug).cloned()
    }
}

impl ProductCatalog for InMemoryCatalog {
    fn product(&self, organization_id: OrganizationId, id: ProductId) -> Option<Product> {
        self.read(organization_id, |r| r.products.iter().find(|p| p.id == id).cloned())
            .flatten()
    }

    fn products(&self, organization_id: OrganizationId) -> Vec<Product> {
        self.read(organization_id, |r| r.products.clone())
            .unwrap_or_default()
    }

    fn add_product(
        &self,
        organization_id: OrganizationId,
        product: NewProduct,
    ) -> Result<Product, CatalogError> {
        let sku = required("sku", &product.sku)?;
        let name = required("name", &product.name)?;

        self.write(organization_id, |r| {
            if r.products.iter().any(|p| p.sku.eq_ignore_ascii_case(&sku)) {
                return Err(CatalogError::Duplicate(format!("sku '{sku}'")));
            }
            let created = Product {
                id: ProductId::generate(),
                sku,
                name,
                category: product.category.filter(|c| !c.trim().is_empty()),
            };
            r.products.push(created.clone());
            Ok(created)
        })
    }
}

impl SupplierDirectory for InMemoryCatalog {
    fn supplier(&self, organization_id: OrganizationId, id: SupplierId) -> Option<Supplier> {
        self.read(organization_id, |r| r.suppliers.iter().find(|s| s.id == id).cloned())
            .flatten()
    }

    fn suppliers(&self, organization_id: OrganizationId) -> Vec<Supplier> {
        self.read(organization_id, |r| r.suppliers.clone())
            .unwrap_or_default()
    }

    fn add_supplier(
        &self,
        organization_id: OrganizationId,
        supplier: NewSupplier,
    ) -> Result<Supplier, CatalogError> {
        let name = required("name", &supplier.name)?;

        self.write(organization_id, |r| {
            let created = Supplier {
                id: SupplierId::generate(),
                name,
                email: supplier.email,
            };
            r.suppliers.push(created.clone());
            Ok(created)
        })
    }
}

impl LocationDirectory for InMemoryCatalog {
    fn location(&self, organization_id: OrganizationId, id: LocationId) -> Option<Location> {
        self.read(organization_id, |r| r.locations.iter().find(|l| l.id == id).cloned())
            .flatten()
    }

    fn locations(&self, organization_id: OrganizationId) -> Vec<Location> {
        self.read(organization_id, |r| r.locations.clone())
            .unwrap_or_default()
    }

    fn add_location(
        &self,
        organization_id: OrganizationId,
        location: NewLocation,
    ) -> Result<Location, CatalogError> {
        let name = required("name", &location.name)?;

        self.write(organization_id, |r| {
            let created = Location {
                id: LocationId::generate(),
                name,
                is_active: location.is_active,
                is_default: false,
            };
            r.locations.push(created.clone());
            Ok(created)
        })
    }

    fn create_default(&self, organization_id: OrganizationId) -> Result<Location, CatalogError> {
        self.write(organization_id, |r| {
            // Two receipts racing on an empty organization must share one default.
            if let Some(existing) = r.locations.iter().find(|l| l.is_default && l.is_active) {
                return Ok(existing.clone());
            }
            let created = Location {
                id: LocationId::generate(),
                name: DEFAULT_LOCATION_NAME.to_string(),
                is_active: true,
                is_default: true,
            };
            r.locations.push(created.clone());
            Ok(created)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_isolated_per_organization() {
        let catalog = InMemoryCatalog::new();
        let a = catalog.register_organization("acme", "Acme").id;
        let b = catalog.register_organization("globex", "Globex").id;

        let p = catalog
            .add_product(a, NewProduct { sku: "SKU-1".into(), name: "Widget".into(), category: None })
            .unwrap();

        assert!(catalog.product(a, p.id).is_some());
        assert!(catalog.product(b, p.id).is_none());
        assert!(catalog.products(b).is_empty());
    }

    #[test]
    fn duplicate_sku_is_rejected_within_one_organization() {
        let catalog = InMemoryCatalog::new();
        let org = catalog.register_organization("acme", "Acme").id;
        let new = || NewProduct { sku: "SKU-1".into(), name: "Widget".into(), category: None };

        catalog.add_product(org, new()).unwrap();
        match catalog.add_product(org, new()) {
            Err(CatalogError::Duplicate(msg)) => assert!(msg.contains("SKU-1")),
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[test]
    fn first_active_skips_inactive_and_default_is_created_once() {
        let catalog = InMemoryCatalog::new();
        let org = catalog.register_organization("acme", "Acme").id;
        assert!(catalog.first_active(org).is_none());

        catalog
            .add_location(org, NewLocation { name: "Closed".into(), is_active: false })
            .unwrap();
        assert!(catalog.first_active(org).is_none());

        let d1 = catalog.create_default(org).unwrap();
        let d2 = catalog.create_default(org).unwrap();
        assert_eq!(d1.id, d2.id);
        assert_eq!(catalog.first_active(org).map(|l| l.id), Some(d1.id));
    }

    #[test]
    fn resolve_returns_registered_organization() {
        let catalog = InMemoryCatalog::new();
        let org = catalog.register_organization("acme", "Acme");
        assert_eq!(catalog.resolve("acme"), Some(org));
        assert_eq!(catalog.resolve("nope"), None);

        catalog.deactivate_organization("acme");
        assert_eq!(catalog.resolve("acme").map(|o| o.is_active), Some(false));
    }
}
