//! Prometheus instruments for job queues.
//!
//! `QueueMetrics::register` is called once per registry at process start and
//! the result is handed to every queue. Queues sharing a name share series.
//!
//! ## Metrics Exposed
//! - `changelist_sync_queue_depth{queue}` - jobs currently queued
//! - `changelist_sync_queue_enqueued_total{queue}` - jobs ever pushed
//! - `changelist_sync_queue_wait_seconds{queue}` - time between push and pop
//! - `changelist_sync_queue_processing_seconds{queue}` - time between pop and done

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::error::{AppError, Result};

const QUEUE_LABEL: &str = "queue";

/// Unbound instrument families, one series per queue name.
#[derive(Clone)]
pub struct QueueMetrics {
    depth: IntGaugeVec,
    enqueued: IntCounterVec,
    wait_seconds: HistogramVec,
    processing_seconds: HistogramVec,
}

/// Instruments bound to one queue name.
#[derive(Clone)]
pub(crate) struct BoundQueueMetrics {
    pub depth: IntGauge,
    pub enqueued: IntCounter,
    pub wait_seconds: Histogram,
    pub processing_seconds: Histogram,
}

impl QueueMetrics {
    /// Create the four instrument families and register them on `registry`.
    ///
    /// Registering twice on the same registry fails with
    /// `AlreadyReg`; share the returned value instead.
    pub fn register(registry: &Registry) -> Result<Self> {
        let depth = IntGaugeVec::new(
            Opts::new("changelist_sync_queue_depth", "Number of jobs waiting in the queue"),
            &[QUEUE_LABEL],
        )?;
        registry.register(Box::new(depth.clone()))?;

        let enqueued = IntCounterVec::new(
            Opts::new(
                "changelist_sync_queue_enqueued_total",
                "Total number of jobs pushed onto the queue",
            ),
            &[QUEUE_LABEL],
        )?;
        registry.register(Box::new(enqueued.clone()))?;

        let wait_seconds = HistogramVec::new(
            HistogramOpts::new(
                "changelist_sync_queue_wait_seconds",
                "Time a job spent queued before being popped",
            )
            .buckets(prometheus::exponential_buckets(0.005, 4.0, 10)?),
            &[QUEUE_LABEL],
        )?;
        registry.register(Box::new(wait_seconds.clone()))?;

        let processing_seconds = HistogramVec::new(
            HistogramOpts::new(
                "changelist_sync_queue_processing_seconds",
                "Time between popping a job and marking it done",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
            &[QUEUE_LABEL],
        )?;
        registry.register(Box::new(processing_seconds.clone()))?;

        Ok(Self {
            depth,
            enqueued,
            wait_seconds,
            processing_seconds,
        })
    }

    pub(crate) fn bind(&self, queue_name: &str) -> BoundQueueMetrics {
        BoundQueueMetrics {
            depth: self.depth.with_label_values(&[queue_name]),
            enqueued: self.enqueued.with_label_values(&[queue_name]),
            wait_seconds: self.wait_seconds.with_label_values(&[queue_name]),
            processing_seconds: self.processing_seconds.with_label_values(&[queue_name]),
        }
    }
}

/// Render every metric of `registry` in the Prometheus text format.
pub fn encode_text(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| AppError::Other(e.into()))
}
