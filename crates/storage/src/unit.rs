//! Storage-unit model as returned by the repository (one level deep).

use serde::{Deserialize, Serialize};

use stockforge_core::{AreaId, ProductId, StorageUnitId};

/// A product placed directly in a storage unit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAssociation {
    pub product_id: ProductId,
    pub quantity: u64,
}

impl ProductAssociation {
    pub fn new(product_id: ProductId, quantity: u64) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// A node in the storage hierarchy (pallet, shelf, bin, ...).
///
/// `children` and `product_associations` only describe the *direct* level;
/// deeper levels are resolved by the aggregator through further fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUnit {
    pub id: StorageUnitId,
    /// `None` marks a root unit anchored to a warehouse area.
    pub parent_id: Option<StorageUnitId>,
    pub area_id: Option<AreaId>,
    /// Only meaningful on leaves; a unit with children derives its capacity.
    pub capacity: u64,
    pub children: Vec<StorageUnitId>,
    pub product_associations: Vec<ProductAssociation>,
    pub labels: Vec<String>,
}

impl StorageUnit {
    /// A childless, empty unit.
    pub fn new(id: StorageUnitId, capacity: u64) -> Self {
        Self {
            id,
            parent_id: None,
            area_id: None,
            capacity,
            children: Vec::new(),
            product_associations: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: StorageUnitId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_area(mut self, area_id: AreaId) -> Self {
        self.area_id = Some(area_id);
        self
    }

    pub fn with_child(mut self, child: StorageUnitId) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_product(mut self, product_id: ProductId, quantity: u64) -> Self {
        self.product_associations
            .push(ProductAssociation::new(product_id, quantity));
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of association rows placed directly in this unit.
    pub fn direct_product_count(&self) -> u64 {
        self.product_associations.len() as u64
    }
}
