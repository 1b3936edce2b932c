//! Process-wide Prometheus metrics, registered once via `lazy_static` and
//! exposed by `rcpd`'s `/metrics` endpoint.

use lazy_static::lazy_static;
use prometheus::{CounterVec, Gauge, GaugeVec, HistogramVec, Opts, Registry, register_counter_vec_with_registry, register_gauge_vec_with_registry, register_gauge_with_registry, register_histogram_vec_with_registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new_custom(Some("rcp".to_string()), None).expect("metrics registry");

    pub static ref SNAPSHOT_CAPTURE_TOTAL: CounterVec = register_counter_vec_with_registry!(
        Opts::new("snapshot_capture_total", "snapshot capture attempts"),
        &["device", "kind", "source", "status"],
        REGISTRY
    )
    .expect("register snapshot_capture_total");

    pub static ref SNAPSHOT_CAPTURE_DURATION_SECONDS: HistogramVec = register_histogram_vec_with_registry!(
        "rcp_snapshot_capture_duration_seconds",
        "snapshot capture duration",
        &["device", "kind", "source"],
        REGISTRY
    )
    .expect("register snapshot_capture_duration_seconds");

    pub static ref SNAPSHOT_SIZE_BYTES: HistogramVec = register_histogram_vec_with_registry!(
        "rcp_snapshot_size_bytes",
        "uncompressed snapshot size in bytes",
        &["device", "kind"],
        REGISTRY
    )
    .expect("register snapshot_size_bytes");

    pub static ref SNAPSHOT_COMPRESSION_RATIO: HistogramVec = register_histogram_vec_with_registry!(
        "rcp_snapshot_compression_ratio",
        "compressed/uncompressed size ratio",
        &["device", "kind"],
        REGISTRY
    )
    .expect("register snapshot_compression_ratio");

    pub static ref SNAPSHOT_AGE_SECONDS: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("snapshot_age_seconds", "age of the latest snapshot"),
        &["device", "kind"],
        REGISTRY
    )
    .expect("register snapshot_age_seconds");

    pub static ref SNAPSHOT_MISSING_TOTAL: CounterVec = register_counter_vec_with_registry!(
        Opts::new("snapshot_missing_total", "get_latest calls that found nothing"),
        &["device", "kind"],
        REGISTRY
    )
    .expect("register snapshot_missing_total");

    pub static ref HEALTH_CHECK_TOTAL: CounterVec = register_counter_vec_with_registry!(
        Opts::new("health_check_total", "health checks performed"),
        &["device", "status", "source"],
        REGISTRY
    )
    .expect("register health_check_total");

    pub static ref ROLLOUT_BATCHES_TOTAL: CounterVec = register_counter_vec_with_registry!(
        Opts::new("rollout_batches_total", "rollout batches executed"),
        &["outcome"],
        REGISTRY
    )
    .expect("register rollout_batches_total");

    pub static ref PLANS_ACTIVE: Gauge = register_gauge_with_registry!(
        Opts::new("plans_active", "plans not yet in a terminal state"),
        REGISTRY
    )
    .expect("register plans_active");
}

/// Forces metric registration at a known point (tests, daemon startup)
/// instead of lazily on first use.
pub fn init() {
    lazy_static::initialize(&REGISTRY);
    lazy_static::initialize(&SNAPSHOT_CAPTURE_TOTAL);
    lazy_static::initialize(&SNAPSHOT_CAPTURE_DURATION_SECONDS);
    lazy_static::initialize(&SNAPSHOT_SIZE_BYTES);
    lazy_static::initialize(&SNAPSHOT_COMPRESSION_RATIO);
    lazy_static::initialize(&SNAPSHOT_AGE_SECONDS);
    lazy_static::initialize(&SNAPSHOT_MISSING_TOTAL);
    lazy_static::initialize(&HEALTH_CHECK_TOTAL);
    lazy_static::initialize(&ROLLOUT_BATCHES_TOTAL);
    lazy_static::initialize(&PLANS_ACTIVE);
}
