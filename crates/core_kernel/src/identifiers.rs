//! Typed identifiers for ledger entities
//!
//! Each entity gets its own UUID newtype so a payment id can never be passed
//! where an invoice id is expected. Ids are UUIDv7: ordering by id follows
//! creation order, which the store relies on to break `created_at` ties.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new time-ordered identifier
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Wraps a UUID loaded from storage
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Prefix used by `Display`, e.g. `INV`
            pub fn prefix() -> &'static str {
                $prefix
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid_str = s.strip_prefix(concat!($prefix, "-")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(uuid_str)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

// Parties and catalog
define_id!(PayerId, "PYR");
define_id!(CatalogItemId, "CAT");
define_id!(BillingPeriodId, "PRD");

// Invoice ledger
define_id!(InvoiceId, "INV");
define_id!(InvoiceLineId, "LIN");

// Discounts
define_id!(DiscountId, "DSC");
define_id!(StudentDiscountId, "SDC");

// Payments and credit
define_id!(PaymentId, "PAY");
define_id!(CreditAllocationId, "ALC");
