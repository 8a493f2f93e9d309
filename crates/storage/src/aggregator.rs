//! Subtree aggregation over the storage hierarchy.
//!
//! One descent per subtree produces capacity, deep product count and the
//! product summary together ([`SubtreeSummary`]); the single-metric
//! operations are projections of it. Within one request, a node that was
//! already summarised is served from a per-request memo instead of being
//! fetched again.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, instrument};

use stockforge_core::StorageUnitId;

use crate::config::AggregationConfig;
use crate::error::AggregationError;
use crate::fetcher::Fetcher;
use crate::repository::StorageRepository;
use crate::summary::{ProductCount, ProductSummary, SubtreeSummary};
use crate::unit::StorageUnit;

/// Computes capacity and product figures for storage subtrees.
#[derive(Debug)]
pub struct SubtreeAggregator<R: ?Sized> {
    fetcher: Fetcher<R>,
}

impl<R> SubtreeAggregator<R>
where
    R: StorageRepository + ?Sized,
{
    pub fn new(repo: Arc<R>, config: AggregationConfig) -> Self {
        Self {
            fetcher: Fetcher::new(repo, config),
        }
    }

    pub fn config(&self) -> &AggregationConfig {
        self.fetcher.config()
    }

    pub(crate) fn fetcher(&self) -> &Fetcher<R> {
        &self.fetcher
    }

    /// Validate `id` and fetch that single unit (one level deep).
    #[instrument(skip(self), err)]
    pub async fn fetch_unit(&self, id: &str) -> Result<StorageUnit, AggregationError> {
        let id = StorageUnitId::parse(id)?;
        self.fetcher.storage_unit(id).await
    }

    /// Deduplicated product totals over the whole subtree.
    #[instrument(skip(self), err)]
    pub async fn aggregate_product_summary(&self, id: &str) -> Result<Vec<ProductCount>, AggregationError> {
        Ok(self.aggregate_subtree(id).await?.products)
    }

    /// Effective capacity of the subtree.
    #[instrument(skip(self), err)]
    pub async fn aggregate_capacity(&self, id: &str) -> Result<u64, AggregationError> {
        Ok(self.aggregate_subtree(id).await?.capacity)
    }

    /// Association rows placed directly in this one unit (not recursive).
    #[instrument(skip(self), err)]
    pub async fn aggregate_product_count(&self, id: &str) -> Result<u64, AggregationError> {
        let unit = self.fetch_unit(id).await?;
        Ok(unit.direct_product_count())
    }

    /// Association rows over every node of the subtree.
    #[instrument(skip(self), err)]
    pub async fn aggregate_product_count_deep(&self, id: &str) -> Result<u64, AggregationError> {
        Ok(self.aggregate_subtree(id).await?.product_count)
    }

    /// All three metrics from a single descent.
    pub async fn aggregate_subtree(&self, id: &str) -> Result<SubtreeSummary, AggregationError> {
        let id = StorageUnitId::parse(id)?;
        self.summarize(id).await
    }

    /// Typed entry point for [`aggregate_subtree`](Self::aggregate_subtree).
    pub async fn summarize(&self, id: StorageUnitId) -> Result<SubtreeSummary, AggregationError> {
        let traversal = Traversal::new(&self.fetcher);
        let summary = traversal.descend(id, None, Vec::new()).await?;
        Ok(SubtreeSummary::clone(&summary))
    }

    /// Summarise several roots concurrently, sharing one memo.
    ///
    /// Results are returned in the order of `roots`. Any failure fails the
    /// whole call.
    #[instrument(skip(self, roots), fields(roots = roots.len()), err)]
    pub async fn summarize_many(&self, roots: &[StorageUnitId]) -> Result<Vec<SubtreeSummary>, AggregationError> {
        let traversal = Traversal::new(&self.fetcher);
        let fanout = self.fetcher.config().max_fanout.max(1);

        let summaries: Vec<Arc<SubtreeSummary>> = stream::iter(roots.iter().copied())
            .map(|root| traversal.descend(root, None, Vec::new()))
            .buffered(fanout)
            .try_collect()
            .await?;

        debug!(
            roots = roots.len(),
            fetched = traversal.memo_len(),
            "summarised storage roots"
        );

        Ok(summaries.iter().map(|s| SubtreeSummary::clone(s)).collect())
    }
}

/// State of one aggregation request.
struct Traversal<'f, R: ?Sized> {
    fetcher: &'f Fetcher<R>,
    memo: Mutex<HashMap<StorageUnitId, Memoized>>,
}

#[derive(Clone)]
struct Memoized {
    parent_id: Option<StorageUnitId>,
    summary: Arc<SubtreeSummary>,
}

impl<'f, R> Traversal<'f, R>
where
    R: StorageRepository + ?Sized,
{
    fn new(fetcher: &'f Fetcher<R>) -> Self {
        Self {
            fetcher,
            memo: Mutex::new(HashMap::new()),
        }
    }

    fn memo_len(&self) -> usize {
        self.memo.lock().map(|m| m.len()).unwrap_or(0)
    }

    fn memo_get(&self, id: &StorageUnitId) -> Option<Memoized> {
        self.memo.lock().ok()?.get(id).cloned()
    }

    fn memo_put(&self, id: StorageUnitId, entry: Memoized) {
        if let Ok(mut memo) = self.memo.lock() {
            memo.insert(id, entry);
        }
    }

    /// Summarise the subtree at `id`.
    ///
    /// `expected_parent` is the unit that listed `id` as a child (None for the
    /// root of the request); `ancestors` is the path from the root down to,
    /// but excluding, `id`.
    fn descend<'t>(
        &'t self,
        id: StorageUnitId,
        expected_parent: Option<StorageUnitId>,
        ancestors: Vec<StorageUnitId>,
    ) -> BoxFuture<'t, Result<Arc<SubtreeSummary>, AggregationError>> {
        Box::pin(async move {
            let config = self.fetcher.config();

            if ancestors.contains(&id) {
                return Err(AggregationError::CycleDetected { storage_id: id });
            }
            if ancestors.len() > config.max_depth {
                return Err(AggregationError::DepthExceeded {
                    storage_id: id,
                    max_depth: config.max_depth,
                });
            }

            if let Some(hit) = self.memo_get(&id) {
                check_parent(expected_parent, id, hit.parent_id)?;
                return Ok(hit.summary);
            }

            let unit = self.fetcher.storage_unit(id).await?;
            check_parent(expected_parent, id, unit.parent_id)?;

            let mut seen = HashSet::with_capacity(unit.children.len());
            let children: Vec<StorageUnitId> =
                unit.children.iter().copied().filter(|c| seen.insert(*c)).collect();

            let mut path = ancestors;
            path.push(id);

            let child_summaries: Vec<Arc<SubtreeSummary>> = stream::iter(children)
                .map(|child| self.descend(child, Some(id), path.clone()))
                .buffered(config.max_fanout.max(1))
                .try_collect()
                .await?;

            let summary = Arc::new(combine(&unit, &child_summaries));
            self.memo_put(
                id,
                Memoized {
                    parent_id: unit.parent_id,
                    summary: Arc::clone(&summary),
                },
            );
            Ok(summary)
        })
    }
}

fn check_parent(
    expected: Option<StorageUnitId>,
    child: StorageUnitId,
    actual: Option<StorageUnitId>,
) -> Result<(), AggregationError> {
    match expected {
        Some(parent) if actual != Some(parent) => Err(AggregationError::InconsistentHierarchy {
            parent,
            child,
            actual,
        }),
        _ => Ok(()),
    }
}

/// Fold a unit's own data with its children's summaries.
fn combine(unit: &StorageUnit, children: &[Arc<SubtreeSummary>]) -> SubtreeSummary {
    let mut products = ProductSummary::from_associations(&unit.product_associations);
    let mut product_count = unit.direct_product_count();

    // A unit with children derives its capacity; its own field is ignored.
    let capacity = if children.is_empty() {
        unit.capacity
    } else {
        children.iter().fold(0u64, |acc, c| acc.saturating_add(c.capacity))
    };

    for child in children {
        product_count = product_count.saturating_add(child.product_count);
        products.merge(&child.products);
    }

    SubtreeSummary {
        storage_id: unit.id,
        area_id: unit.area_id,
        capacity,
        product_count,
        products: products.into_vec(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::RetryPolicy;
    use crate::in_memory::InMemoryStorageRepository;
    use stockforge_core::{AreaId, ProductId};

    fn aggregator(repo: &Arc<InMemoryStorageRepository>) -> SubtreeAggregator<InMemoryStorageRepository> {
        SubtreeAggregator::new(Arc::clone(repo), AggregationConfig::default())
    }

    /// B (capacity 99, ignored) with leaves A (10, P1×3) and C (5, P1×2).
    fn unit_b(
        repo: &InMemoryStorageRepository,
        area: AreaId,
        p1: ProductId,
    ) -> (StorageUnitId, StorageUnitId, StorageUnitId) {
        let b = repo.add_unit(area, None, 99, &[]);
        let a = repo.add_unit(area, Some(b), 10, &[(p1, 3)]);
        let c = repo.add_unit(area, Some(b), 5, &[(p1, 2)]);
        (b, a, c)
    }

    #[tokio::test]
    async fn leaf_reports_own_capacity_and_products() {
        let repo = Arc::new(InMemoryStorageRepository::new());
        let p1 = ProductId::new();
        let a = repo.add_unit(AreaId::new(), None, 10, &[(p1, 3)]);
        let agg = aggregator(&repo);

        let id = a.to_string();
        assert_eq!(agg.aggregate_capacity(&id).await.unwrap(), 10);
        assert_eq!(
            agg.aggregate_product_summary(&id).await.unwrap(),
            vec![ProductCount { product_id: p1, count: 3 }]
        );
        assert_eq!(agg.aggregate_product_count(&id).await.unwrap(), 1);
        assert_eq!(agg.aggregate_product_count_deep(&id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn parent_sums_children_and_ignores_own_capacity() {
        let repo = Arc::new(InMemoryStorageRepository::new());
        let p1 = ProductId::new();
        let (b, a, c) = unit_b(&repo, AreaId::new(), p1);
        let agg = aggregator(&repo);

        let summary = agg.aggregate_subtree(&b.to_string()).await.unwrap();
        assert_eq!(summary.capacity, 15);
        assert_eq!(summary.products, vec![ProductCount { product_id: p1, count: 5 }]);
        assert_eq!(summary.product_count, 2);

        let children_capacity = agg.aggregate_capacity(&a.to_string()).await.unwrap()
            + agg.aggregate_capacity(&c.to_string()).await.unwrap();
        assert_eq!(summary.capacity, children_capacity);
    }

    #[tokio::test]
    async fn products_on_inner_units_are_counted_alongside_children() {
        let repo = Arc::new(InMemoryStorageRepository::new());
        let area = AreaId::new();
        let (p1, p2) = (ProductId::new(), ProductId::new());

        let shelf = repo.add_unit(area, None, 0, &[(p2, 4), (p1, 1)]);
        repo.add_unit(area, Some(shelf), 8, &[(p1, 6)]);
        let bin = repo.add_unit(area, Some(shelf), 2, &[]);
        repo.add_unit(area, Some(bin), 3, &[(p2, 1), (p2, 1)]);

        let agg = aggregator(&repo);
        let summary = agg.summarize(shelf).await.unwrap();

        // own associations first, then children in listed order
        assert_eq!(
            summary.products,
            vec![
                ProductCount { product_id: p2, count: 6 },
                ProductCount { product_id: p1, count: 7 },
            ]
        );
        // 8 + (bin's only child: 3); bin's own 2 is ignored
        assert_eq!(summary.capacity, 11);
        assert_eq!(summary.product_count, 2 + 1 + 0 + 2);
        assert_eq!(agg.aggregate_product_count(&shelf.to_string()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn one_descent_fetches_each_node_once() {
        let repo = Arc::new(InMemoryStorageRepository::new());
        let (b, a, c) = unit_b(&repo, AreaId::new(), ProductId::new());

        aggregator(&repo).summarize(b).await.unwrap();

        assert_eq!(repo.fetch_count(), 3);
        for id in [a, b, c] {
            assert_eq!(repo.fetch_count_for(&id), 1);
        }
    }

    #[tokio::test]
    async fn repeated_roots_in_one_request_are_served_from_memo() {
        let repo = Arc::new(InMemoryStorageRepository::new());
        let (b, _, _) = unit_b(&repo, AreaId::new(), ProductId::new());

        let sequential = SubtreeAggregator::new(Arc::clone(&repo), AggregationConfig::default().with_max_fanout(1));
        let summaries = sequential.summarize_many(&[b, b]).await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0], summaries[1]);
        assert_eq!(repo.fetch_count_for(&b), 1);
    }

    #[tokio::test]
    async fn malformed_id_is_rejected_before_any_fetch() {
        let repo = Arc::new(InMemoryStorageRepository::new());
        let agg = aggregator(&repo);

        for bad in ["", "not-an-id", "prd_0190f5c3a2b47c0e8d1f2a3b4c5d6e7f"] {
            let err = agg.aggregate_capacity(bad).await.unwrap_err();
            assert!(matches!(err, AggregationError::InvalidId(_)), "{bad}: {err:?}");
        }
        assert_eq!(repo.fetch_count(), 0);
    }

    #[tokio::test]
    async fn missing_descendant_fails_the_whole_subtree() {
        let repo = Arc::new(InMemoryStorageRepository::new());
        let area = AreaId::new();
        let root = repo.add_unit(area, None, 0, &[]);
        repo.add_unit(area, Some(root), 4, &[]);

        let ghost = StorageUnitId::new();
        let mut unit = aggregator(&repo).fetch_unit(&root.to_string()).await.unwrap();
        unit.children.push(ghost);
        repo.insert_unit(unit);

        let err = aggregator(&repo).aggregate_capacity(&root.to_string()).await.unwrap_err();
        assert_eq!(
            err,
            AggregationError::NotFound {
                entity: "storage unit",
                id: ghost.to_string()
            }
        );

        let err = aggregator(&repo)
            .aggregate_capacity(&StorageUnitId::new().to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AggregationError::NotFound { .. }));
    }

    #[tokio::test]
    async fn cycle_is_detected_instead_of_recursing_forever() {
        let repo = Arc::new(InMemoryStorageRepository::new());
        let (x, y) = (StorageUnitId::new(), StorageUnitId::new());
        repo.insert_unit(StorageUnit::new(x, 1).with_parent(y).with_child(y));
        repo.insert_unit(StorageUnit::new(y, 1).with_parent(x).with_child(x));

        let err = aggregator(&repo).summarize(x).await.unwrap_err();
        assert_eq!(err, AggregationError::CycleDetected { storage_id: x });
        assert_eq!(repo.fetch_count(), 2);
    }

    #[tokio::test]
    async fn depth_guard_stops_runaway_descent() {
        let repo = Arc::new(InMemoryStorageRepository::new());
        let area = AreaId::new();
        let root = repo.add_unit(area, None, 0, &[]);
        let mut parent = root;
        for _ in 0..5 {
            parent = repo.add_unit(area, Some(parent), 1, &[]);
        }

        let shallow = SubtreeAggregator::new(Arc::clone(&repo), AggregationConfig::default().with_max_depth(2));
        let err = shallow.summarize(root).await.unwrap_err();
        assert!(matches!(err, AggregationError::DepthExceeded { max_depth: 2, .. }));

        let deep = SubtreeAggregator::new(Arc::clone(&repo), AggregationConfig::default().with_max_depth(5));
        assert_eq!(deep.summarize(root).await.unwrap().capacity, 1);
    }

    #[tokio::test]
    async fn child_recording_another_parent_is_inconsistent() {
        let repo = Arc::new(InMemoryStorageRepository::new());
        let area = AreaId::new();
        let real_parent = repo.add_unit(area, None, 0, &[]);
        let child = repo.add_unit(area, Some(real_parent), 3, &[]);

        let impostor = StorageUnitId::new();
        repo.insert_unit(StorageUnit::new(impostor, 0).with_area(area).with_child(child));

        let err = aggregator(&repo).summarize(impostor).await.unwrap_err();
        assert_eq!(
            err,
            AggregationError::InconsistentHierarchy {
                parent: impostor,
                child,
                actual: Some(real_parent),
            }
        );
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let repo = Arc::new(InMemoryStorageRepository::new());
        let (b, _, _) = unit_b(&repo, AreaId::new(), ProductId::new());
        repo.fail_next_fetches(2);

        let config = AggregationConfig::default().with_retry(RetryPolicy::fixed(3, Duration::ZERO));
        let summary = SubtreeAggregator::new(Arc::clone(&repo), config)
            .summarize(b)
            .await
            .unwrap();

        assert_eq!(summary.capacity, 15);
        assert_eq!(repo.fetch_count(), 5);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_unavailable() {
        let repo = Arc::new(InMemoryStorageRepository::new());
        let (b, _, _) = unit_b(&repo, AreaId::new(), ProductId::new());
        repo.fail_next_fetches(10);

        let config = AggregationConfig::default().with_retry(RetryPolicy::fixed(2, Duration::ZERO));
        let err = SubtreeAggregator::new(Arc::clone(&repo), config)
            .summarize(b)
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(matches!(err, AggregationError::Unavailable { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn slow_fetches_time_out_as_unavailable() {
        let repo = Arc::new(InMemoryStorageRepository::new().with_latency(Duration::from_millis(200)));
        let area = AreaId::new();
        let root = repo.add_unit(area, None, 1, &[]);

        let config = AggregationConfig::default()
            .with_fetch_timeout(Duration::from_millis(5))
            .with_retry(RetryPolicy::no_retry());
        let err = SubtreeAggregator::new(Arc::clone(&repo), config)
            .summarize(root)
            .await
            .unwrap_err();

        assert!(matches!(err, AggregationError::Unavailable { attempts: 1, .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_fetches_never_exceed_the_limit() {
        let repo = Arc::new(InMemoryStorageRepository::new().with_latency(Duration::from_millis(2)));
        let area = AreaId::new();
        let root = repo.add_unit(area, None, 0, &[]);
        for _ in 0..12 {
            let shelf = repo.add_unit(area, Some(root), 0, &[]);
            for _ in 0..4 {
                repo.add_unit(area, Some(shelf), 1, &[]);
            }
        }

        let config = AggregationConfig::default()
            .with_max_concurrent_fetches(3)
            .with_max_fanout(16);
        let summary = SubtreeAggregator::new(Arc::clone(&repo), config)
            .summarize(root)
            .await
            .unwrap();

        assert_eq!(summary.capacity, 48);
        assert!(repo.peak_in_flight() <= 3, "peak was {}", repo.peak_in_flight());
        assert!(repo.peak_in_flight() >= 1);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        /// Node `i > 0` hangs under `parent_pick.index(i)`, so the result is always a tree.
        type NodeSpec = (prop::sample::Index, u64, Vec<(usize, u64)>);

        struct Built {
            repo: Arc<InMemoryStorageRepository>,
            ids: Vec<StorageUnitId>,
            parents: Vec<Option<usize>>,
            capacities: Vec<u64>,
            rows: Vec<usize>,
        }

        fn build(nodes: &[NodeSpec], products: &[ProductId]) -> Built {
            let repo = Arc::new(InMemoryStorageRepository::new());
            let area = AreaId::new();
            let mut built = Built {
                repo: Arc::clone(&repo),
                ids: Vec::new(),
                parents: Vec::new(),
                capacities: Vec::new(),
                rows: Vec::new(),
            };

            for (i, (pick, capacity, assoc)) in nodes.iter().enumerate() {
                let parent = if i == 0 { None } else { Some(pick.index(i)) };
                let placed: Vec<(ProductId, u64)> =
                    assoc.iter().map(|&(p, q)| (products[p % products.len()], q)).collect();
                let id = repo.add_unit(area, parent.map(|p| built.ids[p]), *capacity, &placed);
                built.ids.push(id);
                built.parents.push(parent);
                built.capacities.push(*capacity);
                built.rows.push(placed.len());
            }
            built
        }

        fn runtime() -> tokio::runtime::Runtime {
            tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap()
        }

        fn node_strategy() -> impl Strategy<Value = Vec<NodeSpec>> {
            prop::collection::vec(
                (
                    any::<prop::sample::Index>(),
                    0u64..1_000,
                    prop::collection::vec((0usize..4, 1u64..50), 0..4),
                ),
                1..40,
            )
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 64,
                ..ProptestConfig::default()
            })]

            /// Property: capacity of every node is its own (leaf) or the sum of its children's.
            #[test]
            fn capacity_is_additive(nodes in node_strategy()) {
                let products: Vec<ProductId> = (0..4).map(|_| ProductId::new()).collect();
                let b = build(&nodes, &products);
                let agg = SubtreeAggregator::new(Arc::clone(&b.repo), AggregationConfig::default());

                let rt = runtime();
                let capacity: Vec<u64> = b.ids.iter()
                    .map(|id| rt.block_on(agg.summarize(*id)).unwrap().capacity)
                    .collect();

                for i in 0..b.ids.len() {
                    let children: Vec<usize> = (0..b.ids.len()).filter(|&j| b.parents[j] == Some(i)).collect();
                    if children.is_empty() {
                        prop_assert_eq!(capacity[i], b.capacities[i]);
                    } else {
                        prop_assert_eq!(capacity[i], children.iter().map(|&j| capacity[j]).sum::<u64>());
                    }
                }
            }

            /// Property: the deep count at the root is the sum of direct rows over all nodes.
            #[test]
            fn product_rows_are_conserved(nodes in node_strategy()) {
                let products: Vec<ProductId> = (0..4).map(|_| ProductId::new()).collect();
                let b = build(&nodes, &products);
                let agg = SubtreeAggregator::new(Arc::clone(&b.repo), AggregationConfig::default());

                let rt = runtime();
                let root = b.ids[0].to_string();
                let deep = rt.block_on(agg.aggregate_product_count_deep(&root)).unwrap();
                prop_assert_eq!(deep, b.rows.iter().sum::<usize>() as u64);

                let summary = rt.block_on(agg.summarize(b.ids[0])).unwrap();
                let total_quantity: u64 = nodes.iter()
                    .flat_map(|(_, _, assoc)| assoc.iter().map(|&(_, q)| q))
                    .sum();
                prop_assert_eq!(summary.products.iter().map(|p| p.count).sum::<u64>(), total_quantity);
            }

            /// Property: aggregating twice without mutation yields identical results.
            #[test]
            fn aggregation_is_idempotent(nodes in node_strategy()) {
                let products: Vec<ProductId> = (0..4).map(|_| ProductId::new()).collect();
                let b = build(&nodes, &products);
                let agg = SubtreeAggregator::new(Arc::clone(&b.repo), AggregationConfig::default());

                let rt = runtime();
                let first = rt.block_on(agg.summarize(b.ids[0])).unwrap();
                let second = rt.block_on(agg.summarize(b.ids[0])).unwrap();
                prop_assert_eq!(first, second);
            }
        }
    }
}
