//! Reference data owned by neighbouring systems.
//!
//! Organizations, products, suppliers and locations are maintained elsewhere;
//! the stock ledger only needs to resolve and check them. This crate holds the
//! lookup contracts plus an in-memory directory for development and tests.

pub mod directory;
pub mod ids;
pub mod in_memory;
pub mod model;

pub use directory::{
    CatalogError, Directories, LocationDirectory, OrganizationDirectory, ProductCatalog,
    SupplierDirectory,
};
pub use ids::{LocationId, ProductId, SupplierId};
pub use in_memory::InMemoryCatalog;
pub use model::{Location, NewLocation, NewProduct, NewSupplier, Organization, Product, Supplier};
