//! Property-Based Tests for Quota Enforcement
//!
//! # Test Properties
//!
//! 1. **Quota**: after cleanup, usage is at or below the limit
//! 2. **No Over-Eviction**: the last size-pass deletion was still needed
//! 3. **Ordering**: the size pass evicts the oldest retained buckets first
//! 4. **Worker Independence**: measured usage does not depend on pool size
//! 5. **Idempotence**: a second cleanup with the same limits deletes nothing

#![cfg(test)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use super::aggregator::AggregatorConfig;
use super::manager::{QuotaConfig, QuotaManager};
use super::retention::oldest_first;
use crate::adapters::InMemoryObjectStore;
use crate::domain::ports::BucketInfo;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 6, 1, 12, 0, 0).unwrap()
}

// =============================================================================
// Property Strategies
// =============================================================================

/// Strategy for bucket layouts as `(size, age_days)` pairs.
fn layout_strategy() -> impl Strategy<Value = Vec<(usize, i64)>> {
    prop::collection::vec((0usize..2000, 0i64..400), 0..12)
}

fn max_age_strategy() -> impl Strategy<Value = Option<u32>> {
    prop::option::of(0u32..365)
}

fn seed(layout: &[(usize, i64)]) -> (Arc<InMemoryObjectStore>, Vec<BucketInfo>) {
    let store = Arc::new(InMemoryObjectStore::new());
    let mut infos = Vec::with_capacity(layout.len());
    for (i, (size, age)) in layout.iter().enumerate() {
        let name = format!("b{i:02}");
        // Minute offsets keep timestamps distinct without changing the day count
        let modified = now() - Duration::days(*age) - Duration::minutes(i as i64);
        store.insert_sized(&name, "blob", *size, modified);
        infos.push(BucketInfo::new(name, *size as u64, modified));
    }
    (store, infos)
}

fn manager(store: Arc<InMemoryObjectStore>, workers: usize) -> QuotaManager {
    let config = QuotaConfig {
        aggregator: AggregatorConfig::with_workers(workers),
        ..Default::default()
    };
    QuotaManager::new(store, config).unwrap()
}

fn is_expired(bucket: &BucketInfo, max_age: Option<u32>) -> bool {
    max_age.map_or(false, |max| bucket.age_days(now()) > i64::from(max))
}

// =============================================================================
// Cleanup Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: cleanup reaches the quota, deletes every expired bucket,
    /// then evicts the oldest retained buckets and stops as soon as it can.
    #[test]
    fn prop_cleanup_reaches_quota_oldest_first(
        layout in layout_strategy(),
        max_size in 0u64..10_000,
        max_age in max_age_strategy(),
    ) {
        let (store, infos) = seed(&layout);
        let manager = manager(store.clone(), 1);

        let report = tokio_test::block_on(manager.cleanup_storage_at(max_size, max_age, now()))?;

        let remaining: u64 = infos
            .iter()
            .filter(|b| store.contains_bucket(&b.name))
            .map(|b| b.size)
            .sum();
        prop_assert_eq!(report.final_size, remaining);
        prop_assert!(report.final_size <= max_size);
        prop_assert!(report.failed_deletions.is_empty());

        let expired: Vec<&BucketInfo> = infos.iter().filter(|b| is_expired(b, max_age)).collect();
        for bucket in &expired {
            prop_assert!(!store.contains_bucket(&bucket.name));
        }
        prop_assert!(report.deleted_buckets.len() >= expired.len());

        let mut retained: Vec<BucketInfo> = infos
            .iter()
            .filter(|b| !is_expired(b, max_age))
            .cloned()
            .collect();
        retained.sort_by(oldest_first);

        let evicted = &report.deleted_buckets[expired.len()..];
        let oldest: Vec<String> = retained
            .iter()
            .take(evicted.len())
            .map(|b| b.name.clone())
            .collect();
        prop_assert_eq!(evicted, oldest.as_slice());

        if let Some(last) = evicted.last() {
            let last_size = retained
                .iter()
                .find(|b| &b.name == last)
                .map(|b| b.size)
                .unwrap_or(0);
            prop_assert!(report.final_size + last_size > max_size);
        }
    }

    /// Property: running cleanup twice with the same limits is a no-op the
    /// second time.
    #[test]
    fn prop_cleanup_is_idempotent(
        layout in layout_strategy(),
        max_size in 0u64..10_000,
        max_age in max_age_strategy(),
    ) {
        let (store, _) = seed(&layout);
        let manager = manager(store, 1);

        let first = tokio_test::block_on(manager.cleanup_storage_at(max_size, max_age, now()))?;
        let second = tokio_test::block_on(manager.cleanup_storage_at(max_size, max_age, now()))?;

        prop_assert!(second.deleted_buckets.is_empty());
        prop_assert_eq!(second.final_size, first.final_size);
    }
}

// =============================================================================
// Aggregation Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: total usage is the same for a sequential and a pooled run.
    #[test]
    fn prop_usage_independent_of_workers(
        layout in layout_strategy(),
        workers in 2usize..8,
    ) {
        let (store, infos) = seed(&layout);
        let expected: u64 = infos.iter().map(|b| b.size).sum();

        let sequential = tokio_test::block_on(manager(store.clone(), 1).get_storage_used())?;
        let pooled = tokio_test::block_on(manager(store, workers).get_storage_used())?;

        prop_assert_eq!(sequential, expected);
        prop_assert_eq!(pooled, expected);
    }
}
