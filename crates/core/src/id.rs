//! Strongly-typed, prefixed identifiers used across the domain.
//!
//! Every identifier has the textual form `<prefix>_<uuid>`, e.g.
//! `stu_0190f5c3a2b47c0e8d1f2a3b4c5d6e7f`. The UUID part is accepted in simple
//! or hyphenated form and is always rendered in simple form.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of an organization (the statistics boundary).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrganizationId(Uuid);

/// Identifier of a warehouse.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WarehouseId(Uuid);

/// Identifier of a facility inside a warehouse.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FacilityId(Uuid);

/// Identifier of an area inside a facility.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AreaId(Uuid);

/// Identifier of a storage unit (pallet, shelf, bin, ...).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageUnitId(Uuid);

/// Identifier of a catalog product.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductId(Uuid);

/// Split `<prefix>_<uuid>` and check the prefix; returns the UUID part.
fn strip_prefix<'a>(s: &'a str, prefix: &str, name: &str) -> Result<&'a str, DomainError> {
    match s.split_once('_') {
        Some((p, rest)) if p == prefix && !rest.is_empty() => Ok(rest),
        Some((p, _)) if p != prefix => Err(DomainError::invalid_id(format!(
            "{name}: expected prefix `{prefix}_`, found `{p}_`"
        ))),
        _ => Err(DomainError::invalid_id(format!(
            "{name}: `{s}` is not of the form `{prefix}_<uuid>`"
        ))),
    }
}

macro_rules! impl_prefixed_id {
    ($t:ty, $prefix:literal, $name:literal) => {
        impl $t {
            /// Textual prefix of this identifier kind.
            pub const PREFIX: &'static str = $prefix;

            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Parse and validate the prefixed textual form.
            pub fn parse(s: &str) -> Result<Self, DomainError> {
                s.parse()
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}_{}", $prefix, self.0.simple())
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.to_string()
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = strip_prefix(s, $prefix, $name)?;
                let uuid = Uuid::try_parse(raw)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_prefixed_id!(OrganizationId, "org", "OrganizationId");
impl_prefixed_id!(WarehouseId, "wh", "WarehouseId");
impl_prefixed_id!(FacilityId, "fac", "FacilityId");
impl_prefixed_id!(AreaId, "area", "AreaId");
impl_prefixed_id!(StorageUnitId, "stu", "StorageUnitId");
impl_prefixed_id!(ProductId, "prd", "ProductId");
