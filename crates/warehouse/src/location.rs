//! Location registry: the catalog of physical storage slots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::ids::LocationCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationType {
    Rack,
    Floor,
    Receiving,
    Shipping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub code: LocationCode,
    pub location_type: LocationType,
    /// `None` means unbounded.
    pub capacity_cases: Option<u32>,
    pub requires_forklift: bool,
    /// Archived locations keep their history but accept no inbound stock.
    #[serde(default)]
    pub archived: bool,
}

impl Location {
    pub fn new(code: LocationCode, location_type: LocationType) -> Self {
        Self {
            code,
            location_type,
            capacity_cases: None,
            requires_forklift: false,
            archived: false,
        }
    }

    pub fn with_capacity(mut self, capacity_cases: u32) -> Self {
        self.capacity_cases = Some(capacity_cases);
        self
    }

    pub fn with_forklift(mut self) -> Self {
        self.requires_forklift = true;
        self
    }

    /// Would storing `incoming` more cases on top of `stored` exceed capacity?
    pub fn check_capacity(&self, stored_cases: u64, incoming_cases: u32) -> LedgerResult<()> {
        match self.capacity_cases {
            Some(capacity) if stored_cases + u64::from(incoming_cases) > u64::from(capacity) => {
                Err(LedgerError::CapacityExceeded {
                    location: self.code.clone(),
                    capacity_cases: capacity,
                    stored_cases,
                    incoming_cases,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Slowly-changing catalog of locations, keyed by code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationRegistry {
    locations: BTreeMap<LocationCode, Location>,
}

impl LocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, code: &LocationCode) -> LedgerResult<&Location> {
        self.locations
            .get(code)
            .ok_or_else(|| LedgerError::not_found("location", code))
    }

    pub fn find(&self, code: &LocationCode) -> Option<&Location> {
        self.locations.get(code)
    }

    /// Active (non-archived) locations of one type, in code order.
    pub fn list_by_type(&self, location_type: LocationType) -> Vec<&Location> {
        self.locations
            .values()
            .filter(|l| l.location_type == location_type && !l.archived)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.locations.values()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Insert or replace a location record.
    pub(crate) fn put(&mut self, location: Location) {
        self.locations.insert(location.code.clone(), location);
    }

    pub(crate) fn get_mut(&mut self, code: &LocationCode) -> Option<&mut Location> {
        self.locations.get_mut(code)
    }
}
