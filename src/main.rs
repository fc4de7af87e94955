//! BucketQuota CLI
//!
//! Storage quota enforcement for a directory-backed object store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         bucketquota                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │  Aggregator  │───▶│  Retention   │───▶│   Report /   │       │
//! │  │  (measure)   │    │   Engine     │    │   Metrics    │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bucketquota::adapters::FilesystemObjectStore;
use bucketquota::metrics::QuotaMetrics;
use bucketquota::quota::{
    AggregatorConfig, CleanupReport, QuotaConfig, QuotaManager, RetentionConfig,
    StatsFailurePolicy,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// BucketQuota - keep a bucketed object store within size and age limits
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Object store root; each subdirectory is a bucket
    #[arg(long, env = "BUCKETQUOTA_ROOT")]
    root: PathBuf,

    /// Buckets measured concurrently
    #[arg(long, env = "AGGREGATION_WORKERS", default_value = "1")]
    workers: usize,

    /// What to do when some buckets cannot be measured (abort, partial)
    #[arg(long, env = "STATS_FAILURE_POLICY", default_value = "abort")]
    stats_failure_policy: StatsFailurePolicy,

    /// Enable dry-run mode (log only, no deletions)
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print total bytes used across all buckets
    Usage,
    /// List bucket names
    Buckets,
    /// Print size and age of every bucket
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Create a bucket
    CreateBucket { bucket: String },
    /// Upload a local file as an object
    Upload {
        bucket: String,
        object: String,
        file: PathBuf,
    },
    /// Download an object into a new local file
    Download {
        bucket: String,
        object: String,
        dest: PathBuf,
    },
    /// Delete objects from a bucket
    Delete {
        bucket: String,
        #[arg(required = true)]
        objects: Vec<String>,
    },
    /// Run one cleanup pass
    Cleanup {
        #[command(flatten)]
        limits: Limits,
        /// Print the cleanup report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run cleanup on a schedule and serve health and metrics endpoints
    Run {
        #[command(flatten)]
        limits: Limits,
        /// Seconds between cleanup runs
        #[arg(long, env = "CLEANUP_INTERVAL_SECONDS", default_value = "3600")]
        interval_seconds: u64,
        /// Health and metrics server bind address
        #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8080")]
        http_addr: SocketAddr,
    },
}

#[derive(clap::Args, Debug, Clone, Copy)]
struct Limits {
    /// Maximum total size in bytes
    #[arg(long, env = "MAX_SIZE")]
    max_size: u64,

    /// Maximum bucket age in days; omit to skip the age pass
    #[arg(long, env = "MAX_AGE_DAYS")]
    max_age: Option<u32>,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;

    let store = FilesystemObjectStore::open(cli.root.clone())
        .await
        .with_context(|| format!("cannot open object store at {}", cli.root.display()))?;

    let config = QuotaConfig {
        aggregator: AggregatorConfig::with_workers(cli.workers),
        retention: RetentionConfig {
            dry_run: cli.dry_run,
        },
        stats_failure_policy: cli.stats_failure_policy,
    };
    let manager = Arc::new(
        QuotaManager::new(Arc::new(store), config).context("failed to create quota manager")?,
    );

    match cli.command {
        Command::Usage => {
            let used = manager
                .get_storage_used()
                .await
                .context("failed to measure storage")?;
            println!("{}", used);
        }
        Command::Buckets => {
            for bucket in manager.get_buckets().await.context("failed to list buckets")? {
                println!("{}", bucket);
            }
        }
        Command::Stats { json } => {
            let stats = manager
                .bucket_infos()
                .await
                .context("failed to measure buckets")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                for bucket in &stats.buckets {
                    println!(
                        "{}\t{}\t{}",
                        bucket.name,
                        bucket.size,
                        bucket.last_modified.to_rfc3339()
                    );
                }
                for failure in &stats.errors {
                    eprintln!("{}\terror: {}", failure.bucket, failure.message);
                }
            }
        }
        Command::CreateBucket { bucket } => {
            manager
                .create_bucket(&bucket)
                .await
                .with_context(|| format!("failed to create bucket {}", bucket))?;
        }
        Command::Upload {
            bucket,
            object,
            file,
        } => {
            manager
                .upload_file(&bucket, &object, &file)
                .await
                .with_context(|| format!("failed to upload {} to {}/{}", file.display(), bucket, object))?;
        }
        Command::Download {
            bucket,
            object,
            dest,
        } => {
            let bytes = manager
                .get_file(&bucket, &object, &dest)
                .await
                .with_context(|| format!("failed to download {}/{}", bucket, object))?;
            info!("Wrote {} bytes to {}", bytes, dest.display());
        }
        Command::Delete { bucket, objects } => {
            let outcomes = manager
                .delete_objects(&bucket, &objects)
                .await
                .with_context(|| format!("failed to delete objects from {}", bucket))?;
            let failed: Vec<_> = outcomes.iter().filter(|o| !o.is_success()).collect();
            for outcome in &failed {
                eprintln!("{}\t{}", outcome.object_name, outcome.error_message);
            }
            if !failed.is_empty() {
                bail!("{} of {} objects could not be deleted", failed.len(), outcomes.len());
            }
        }
        Command::Cleanup { limits, json } => {
            let report = manager
                .cleanup_storage(limits.max_size, limits.max_age)
                .await
                .context("cleanup failed")?;
            print_report(&report, json)?;
        }
        Command::Run {
            limits,
            interval_seconds,
            http_addr,
        } => {
            run_scheduled(manager, limits, Duration::from_secs(interval_seconds), http_addr)
                .await?;
        }
    }

    Ok(())
}

fn print_report(report: &CleanupReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("final size: {}", report.final_size);
    for bucket in &report.deleted_buckets {
        println!("deleted: {}", bucket);
    }
    for failure in &report.failed_deletions {
        eprintln!("failed ({}): {}: {}", failure.pass, failure.bucket, failure.reason);
    }
    for failure in &report.stats_errors {
        eprintln!("unmeasured: {}: {}", failure.bucket, failure.message);
    }
    Ok(())
}

// =============================================================================
// Scheduled Cleanup
// =============================================================================

async fn run_scheduled(
    manager: Arc<QuotaManager>,
    limits: Limits,
    interval: Duration,
    http_addr: SocketAddr,
) -> Result<()> {
    info!("Starting scheduled cleanup");
    info!("  Max size: {} bytes", limits.max_size);
    info!("  Max age: {:?} days", limits.max_age);
    info!("  Interval: {:?}", interval);
    info!("  Dry-run mode: {}", manager.config().retention.dry_run);

    let ready = Arc::new(AtomicBool::new(false));
    let metrics = manager.metrics().clone();
    let server_ready = ready.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = run_http_server(http_addr, metrics, server_ready).await {
            error!("HTTP server error: {:#}", e);
        }
    });

    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match manager.cleanup_storage(limits.max_size, limits.max_age).await {
                    Ok(report) => {
                        ready.store(true, Ordering::Release);
                        if !report.failed_deletions.is_empty() {
                            warn!(failed = report.failed_deletions.len(), "Cleanup run left buckets behind");
                        }
                    }
                    Err(e) => {
                        ready.store(false, Ordering::Release);
                        error!("Cleanup run failed: {}", e);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    server.abort();
    info!("Scheduled cleanup stopped");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(cli: &Cli) -> Result<()> {
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?);

    // Logs go to stderr so command output stays pipeable
    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

// =============================================================================
// Health and Metrics Server
// =============================================================================

async fn run_http_server(
    addr: SocketAddr,
    metrics: QuotaMetrics,
    ready: Arc<AtomicBool>,
) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTP server to {}", addr))?;

    info!("HTTP server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("HTTP server accept error")?;

        let io = TokioIo::new(stream);
        let metrics = metrics.clone();
        let ready = ready.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                let response = route(req.uri().path(), &metrics, &ready);
                async move { Ok::<_, Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("HTTP connection error: {}", e);
            }
        });
    }
}

type HttpResponse = hyper::Response<http_body_util::Full<hyper::body::Bytes>>;

fn route(path: &str, metrics: &QuotaMetrics, ready: &AtomicBool) -> HttpResponse {
    use hyper::StatusCode;

    match path {
        "/healthz" | "/livez" => text(StatusCode::OK, "ok"),
        "/readyz" => {
            if ready.load(Ordering::Acquire) {
                text(StatusCode::OK, "ok")
            } else {
                text(StatusCode::SERVICE_UNAVAILABLE, "not ready")
            }
        }
        "/metrics" => match metrics.encode() {
            Ok((content_type, body)) => {
                let mut response = text(StatusCode::OK, body);
                if let Ok(value) = hyper::header::HeaderValue::from_str(&content_type) {
                    response
                        .headers_mut()
                        .insert(hyper::header::CONTENT_TYPE, value);
                }
                response
            }
            Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}

fn text(status: hyper::StatusCode, body: impl Into<hyper::body::Bytes>) -> HttpResponse {
    let mut response = hyper::Response::new(http_body_util::Full::new(body.into()));
    *response.status_mut() = status;
    response
}
