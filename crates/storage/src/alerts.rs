//! Low-stock evaluation over an organization snapshot.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use stockforge_core::ProductId;

use crate::config::AlertConfig;
use crate::statistics::OrganizationInventorySnapshot;
use crate::summary::ProductCount;

/// A product whose on-hand count is below its configured minimum.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub product_id: ProductId,
    pub count: u64,
    pub minimum_stock: u64,
}

/// Pure filter: `count < minimum_stock`.
///
/// No hysteresis and no suppression window; every evaluation starts from the
/// snapshot it is given.
#[derive(Debug, Clone, Default)]
pub struct LowStockAlertEvaluator {
    config: AlertConfig,
}

impl LowStockAlertEvaluator {
    pub fn new(config: AlertConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Products that need a threshold lookup, in snapshot order.
    ///
    /// Only products in the organization's catalog are candidates; stock of
    /// products the organization does not list is counted but never alerted.
    /// With `include_unstocked`, catalog products absent from every storage
    /// unit are appended with a count of 0.
    pub fn candidates(&self, snapshot: &OrganizationInventorySnapshot) -> Vec<ProductCount> {
        let catalog: HashSet<ProductId> = snapshot.catalog.iter().copied().collect();
        let mut candidates: Vec<ProductCount> = snapshot
            .products
            .iter()
            .filter(|c| catalog.contains(&c.product_id))
            .copied()
            .collect();

        if self.config.include_unstocked {
            for product_id in &snapshot.catalog {
                if !candidates.iter().any(|c| c.product_id == *product_id) {
                    candidates.push(ProductCount {
                        product_id: *product_id,
                        count: 0,
                    });
                }
            }
        }

        candidates
    }

    /// Flag every candidate strictly below its threshold.
    ///
    /// Candidates without a threshold are never flagged.
    pub fn evaluate(
        &self,
        candidates: &[ProductCount],
        minimum_stock: &HashMap<ProductId, u64>,
    ) -> Vec<LowStockAlert> {
        candidates
            .iter()
            .filter_map(|c| {
                let minimum = *minimum_stock.get(&c.product_id)?;
                (c.count < minimum).then_some(LowStockAlert {
                    product_id: c.product_id,
                    count: c.count,
                    minimum_stock: minimum,
                })
            })
            .collect()
    }
}
