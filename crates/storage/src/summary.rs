//! Product summaries and the composite per-subtree result.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use stockforge_core::{AreaId, ProductId, StorageUnitId};

use crate::unit::ProductAssociation;

/// Aggregated on-hand count of one product.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCount {
    pub product_id: ProductId,
    pub count: u64,
}

/// Product totals deduplicated by product id.
///
/// Entries keep first-encounter order so repeated runs over the same data
/// produce identical output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductSummary {
    entries: Vec<ProductCount>,
    index: HashMap<ProductId, usize>,
}

impl ProductSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_associations<'a>(associations: impl IntoIterator<Item = &'a ProductAssociation>) -> Self {
        let mut summary = Self::new();
        for a in associations {
            summary.add(a.product_id, a.quantity);
        }
        summary
    }

    /// Add `count` to `product_id`, appending it if unseen.
    pub fn add(&mut self, product_id: ProductId, count: u64) {
        match self.index.get(&product_id) {
            Some(&i) => {
                let entry = &mut self.entries[i];
                entry.count = entry.count.saturating_add(count);
            }
            None => {
                self.index.insert(product_id, self.entries.len());
                self.entries.push(ProductCount { product_id, count });
            }
        }
    }

    pub fn merge(&mut self, counts: &[ProductCount]) {
        for c in counts {
            self.add(c.product_id, c.count);
        }
    }

    pub fn get(&self, product_id: &ProductId) -> Option<u64> {
        self.index.get(product_id).map(|&i| self.entries[i].count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn as_slice(&self) -> &[ProductCount] {
        &self.entries
    }

    pub fn into_vec(self) -> Vec<ProductCount> {
        self.entries
    }
}

/// Everything one descent learns about a subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtreeSummary {
    pub storage_id: StorageUnitId,
    pub area_id: Option<AreaId>,
    /// Effective capacity: own capacity for a leaf, sum of children otherwise.
    pub capacity: u64,
    /// Association rows over every node of the subtree, each node counted once.
    pub product_count: u64,
    pub products: Vec<ProductCount>,
}
