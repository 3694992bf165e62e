
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use lazy_static::lazy_static;
use std::sync::OnceLock;
use tracing::warn;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}
static JOBS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static DISCUSSIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static DEDUP_CONFLICTS: OnceLock<IntCounter> = OnceLock::new();
static QUEUE_DEPTH: OnceLock<IntGauge> = OnceLock::new();
static JOB_DURATION: OnceLock<Histogram> = OnceLock::new();

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Registers every collector once. Recording before this call is a no-op.
pub fn init_metrics() -> prometheus::Result<()> {
    if JOBS_TOTAL.get().is_some() {
        return Ok(());
    }

    let jobs_total = IntCounterVec::new(
        prometheus::opts!("jobs_total", "Finished jobs per kind and status"),
        &["kind", "status"],
    )?;
    let discussions_total = IntCounterVec::new(
        prometheus::opts!("discussions_total", "Processed discussions per outcome"),
        &["outcome"],
    )?;
    let dedup_conflicts = IntCounter::new(
        "dedup_conflicts_total",
        "Uniqueness conflicts resolved by re-matching",
    )?;
    let queue_depth = IntGauge::new("queue_depth", "Jobs waiting in the queue")?;
    let job_duration = Histogram::with_opts(HistogramOpts::new(
        "job_duration_seconds",
        "Wall time of one job attempt",
    ))?;

    REGISTRY.register(Box::new(jobs_total.clone())).ok();
    REGISTRY.register(Box::new(discussions_total.clone())).ok();
    REGISTRY.register(Box::new(dedup_conflicts.clone())).ok();
    REGISTRY.register(Box::new(queue_depth.clone())).ok();
    REGISTRY.register(Box::new(job_duration.clone())).ok();

    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = DISCUSSIONS_TOTAL.set(discussions_total);
    let _ = DEDUP_CONFLICTS.set(dedup_conflicts);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = JOB_DURATION.set(job_duration);
    Ok(())
}

pub fn inc_job(kind: &str, status: &str) {
    if let Some(counter) = JOBS_TOTAL.get() {
        counter.with_label_values(&[kind, status]).inc();
    }
}

pub fn inc_discussion(outcome: &str) {
    if let Some(counter) = DISCUSSIONS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn inc_dedup_conflict() {
    if let Some(counter) = DEDUP_CONFLICTS.get() {
        counter.inc();
    }
}

pub fn inc_queue() {
    if let Some(gauge) = QUEUE_DEPTH.get() {
        gauge.inc();
    }
}

pub fn dec_queue() {
    if let Some(gauge) = QUEUE_DEPTH.get() {
        gauge.dec();
    }
}

pub fn observe_job_duration(seconds: f64) {
    if let Some(histogram) = JOB_DURATION.get() {
        histogram.observe(seconds);
    }
}

/// Text exposition of the registry.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
