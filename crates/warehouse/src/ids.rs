//! Warehouse identifiers.
//!
//! Codes that come from the physical world (product, owner, lot, location,
//! pallet labels) are validated strings. Aggregates created by the ledger
//! (allocations, pick lists, batches) use UUIDv7 ids plus a human-readable
//! number assigned at commit.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use cellarledger_core::{AggregateId, DomainError};

macro_rules! code_newtype {
    ($(#[$meta:meta])* $t:ident, $name:literal, upper = $upper:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $t(String);

        impl $t {
            pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
                let raw: String = value.into();
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Err(DomainError::invalid_id(format!("{}: cannot be empty", $name)));
                }
                if trimmed.chars().any(char::is_whitespace) {
                    return Err(DomainError::invalid_id(format!(
                        "{}: '{}' contains whitespace",
                        $name, trimmed
                    )));
                }
                let normalized = if $upper {
                    trimmed.to_ascii_uppercase()
                } else {
                    trimmed.to_string()
                };
                Ok(Self(normalized))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }
    };
}

code_newtype!(
    /// Stock owner: a supplying partner or the distributor itself.
    OwnerId,
    "OwnerId",
    upper = true
);
code_newtype!(
    /// Receiving batch of a product.
    LotNumber,
    "LotNumber",
    upper = true
);
code_newtype!(
    /// Physical storage slot code, e.g. `RAK-01`.
    LocationCode,
    "LocationCode",
    upper = true
);
code_newtype!(
    /// Printed pallet label.
    PalletCode,
    "PalletCode",
    upper = true
);
code_newtype!(
    /// Order reference owned by the order subsystem.
    OrderId,
    "OrderId",
    upper = false
);
code_newtype!(
    /// Caller-supplied key that makes a retried command a no-op.
    IdempotencyKey,
    "IdempotencyKey",
    upper = false
);

/// LWIN-18 product reference (wine/spirit + vintage + pack configuration).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductRef(String);

impl ProductRef {
    pub const LEN: usize = 18;

    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let raw: String = value.into();
        let code = raw.trim();
        if code.len() != Self::LEN || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::invalid_id(format!(
                "ProductRef: '{code}' is not an 18-digit LWIN"
            )));
        }
        Ok(Self(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The LWIN-11 prefix (wine + vintage), shared across pack sizes.
    pub fn lwin11(&self) -> &str {
        &self.0[..11]
    }
}

impl core::fmt::Display for ProductRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProductRef {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ProductRef {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProductRef> for String {
    fn from(value: ProductRef) -> Self {
        value.0
    }
}

macro_rules! aggregate_newtype {
    ($(#[$meta:meta])* $t:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(pub AggregateId);

        impl $t {
            pub fn new() -> Self {
                Self(AggregateId::new())
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

aggregate_newtype!(
    /// Reservation handle returned by the allocation engine.
    AllocationId
);
aggregate_newtype!(PickListId);
aggregate_newtype!(DispatchBatchId);

macro_rules! number_newtype {
    ($(#[$meta:meta])* $t:ident, $prefix:literal, $width:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(pub u64);

        impl $t {
            /// Placeholder carried by staged changes until commit assigns the real number.
            pub const UNASSIGNED: Self = Self(0);

            pub fn value(self) -> u64 {
                self.0
            }

            pub fn is_assigned(self) -> bool {
                self.0 != 0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, concat!($prefix, "-{:0", $width, "}"), self.0)
            }
        }
    };
}

number_newtype!(
    /// Monotonic, human-readable movement number (`MV-00000042`).
    MovementNumber,
    "MV",
    8
);
number_newtype!(PickListNumber, "PL", 6);
number_newtype!(BatchNumber, "DB", 6);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_trimmed_and_upper_cased() {
        let code = LocationCode::new("  rak-01 ").unwrap();
        assert_eq!(code.as_str(), "RAK-01");
        assert!(LocationCode::new("   ").is_err());
        assert!(LocationCode::new("RAK 01").is_err());
    }

    #[test]
    fn product_ref_requires_eighteen_digits() {
        let p = ProductRef::new("101234520151200750").unwrap();
        assert_eq!(p.lwin11(), "10123452015");
        assert!(ProductRef::new("1012345").is_err());
        assert!(ProductRef::new("10123452015120075X").is_err());
    }

    #[test]
    fn numbers_render_with_prefix() {
        assert_eq!(MovementNumber(42).to_string(), "MV-00000042");
        assert_eq!(PickListNumber(7).to_string(), "PL-000007");
        assert!(!BatchNumber::UNASSIGNED.is_assigned());
    }

    #[test]
    fn codes_deserialize_through_validation() {
        let ok: OwnerId = serde_json::from_str("\"partner-a\"").unwrap();
        assert_eq!(ok.as_str(), "PARTNER-A");
        assert!(serde_json::from_str::<ProductRef>("\"12\"").is_err());
    }
}
