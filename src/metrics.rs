//! Quota Metrics
//!
//! Prometheus counters and gauges describing storage usage and reclamation.
//! Each [`QuotaMetrics`] owns its own registry so several managers (and
//! tests) can coexist in one process.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::domain::ports::ReclaimPass;
use crate::error::{Error, Result};

/// Registered quota metrics.
#[derive(Clone)]
pub struct QuotaMetrics {
    registry: Registry,
    cleanup_runs: IntCounter,
    buckets_deleted: IntCounterVec,
    delete_failures: IntCounterVec,
    bytes_reclaimed: IntCounter,
    stats_errors: IntCounter,
    storage_used: IntGauge,
    final_size: IntGauge,
}

impl std::fmt::Debug for QuotaMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaMetrics")
            .field("cleanup_runs", &self.cleanup_runs.get())
            .field("storage_used", &self.storage_used.get())
            .finish()
    }
}

fn metric_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registration failed: {}", e))
}

impl QuotaMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let cleanup_runs = IntCounter::new(
            "bucketquota_cleanup_runs_total",
            "Total number of cleanup runs",
        )
        .map_err(metric_err)?;
        let buckets_deleted = IntCounterVec::new(
            Opts::new(
                "bucketquota_buckets_deleted_total",
                "Buckets deleted, by retention pass",
            ),
            &["pass"],
        )
        .map_err(metric_err)?;
        let delete_failures = IntCounterVec::new(
            Opts::new(
                "bucketquota_bucket_delete_failures_total",
                "Bucket deletions that failed, by retention pass",
            ),
            &["pass"],
        )
        .map_err(metric_err)?;
        let bytes_reclaimed = IntCounter::new(
            "bucketquota_bytes_reclaimed_total",
            "Bytes freed by size-pass and age-pass deletions",
        )
        .map_err(metric_err)?;
        let stats_errors = IntCounter::new(
            "bucketquota_stats_errors_total",
            "Buckets that could not be measured",
        )
        .map_err(metric_err)?;
        let storage_used = IntGauge::new(
            "bucketquota_storage_used_bytes",
            "Storage used as of the last measurement",
        )
        .map_err(metric_err)?;
        let final_size = IntGauge::new(
            "bucketquota_cleanup_final_size_bytes",
            "Storage used after the last cleanup run",
        )
        .map_err(metric_err)?;

        registry
            .register(Box::new(cleanup_runs.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(buckets_deleted.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(delete_failures.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(bytes_reclaimed.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(stats_errors.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(storage_used.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(final_size.clone()))
            .map_err(metric_err)?;

        Ok(Self {
            registry,
            cleanup_runs,
            buckets_deleted,
            delete_failures,
            bytes_reclaimed,
            stats_errors,
            storage_used,
            final_size,
        })
    }

    pub fn record_storage_used(&self, bytes: u64) {
        self.storage_used.set(clamp(bytes));
    }

    pub fn record_stats_errors(&self, count: usize) {
        self.stats_errors.inc_by(count as u64);
    }

    pub fn record_deleted(&self, pass: ReclaimPass, bytes: u64) {
        self.buckets_deleted
            .with_label_values(&[pass.as_str()])
            .inc();
        self.bytes_reclaimed.inc_by(bytes);
    }

    pub fn record_delete_failure(&self, pass: ReclaimPass) {
        self.delete_failures
            .with_label_values(&[pass.as_str()])
            .inc();
    }

    pub fn record_cleanup(&self, final_size: u64) {
        self.cleanup_runs.inc();
        self.final_size.set(clamp(final_size));
        self.storage_used.set(clamp(final_size));
    }

    pub fn cleanup_runs(&self) -> u64 {
        self.cleanup_runs.get()
    }

    pub fn buckets_deleted(&self, pass: ReclaimPass) -> u64 {
        self.buckets_deleted
            .with_label_values(&[pass.as_str()])
            .get()
    }

    pub fn storage_used(&self) -> i64 {
        self.storage_used.get()
    }

    /// Render the registry in the Prometheus text format.
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metric_err)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

fn clamp(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}
