use serde::{Deserialize, Serialize};

use stockflow_core::{AggregateId, DomainError};

macro_rules! catalog_id {
    ($t:ident, $name:literal) => {
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(pub AggregateId);

        impl $t {
            pub fn new(id: AggregateId) -> Self {
                Self(id)
            }

            pub fn generate() -> Self {
                Self(AggregateId::new())
            }

            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_uuid().as_bytes()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl core::str::FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<AggregateId>()
                    .map(Self)
                    .map_err(|_| DomainError::invalid_id(format!("{}: {s}", $name)))
            }
        }
    };
}

catalog_id!(ProductId, "ProductId");
catalog_id!(LocationId, "LocationId");
catalog_id!(SupplierId, "SupplierId");
