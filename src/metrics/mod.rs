use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Event store appends (throughput, latency, optimistic concurrency conflicts)
// - Aggregate rehydration
// - Projection folds (applied vs skipped, fold latency)
//
// Every instance owns its own registry. `render` produces the text
// exposition format for whatever transport the host application uses.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Event Store Metrics
    pub events_appended: IntCounter,
    pub concurrency_conflicts: IntCounter,
    pub append_duration: Histogram,
    pub streams_rehydrated: IntCounterVec,

    // Projection Metrics
    pub projection_events_applied: IntCounterVec,
    pub projection_events_skipped: IntCounterVec,
    pub projection_fold_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Event Store Metrics
        let events_appended =
            IntCounter::new("events_appended_total", "Total events durably appended")?;
        registry.register(Box::new(events_appended.clone()))?;

        let concurrency_conflicts = IntCounter::new(
            "concurrency_conflicts_total",
            "Appends rejected because the stream moved past the expected version",
        )?;
        registry.register(Box::new(concurrency_conflicts.clone()))?;

        let append_duration = Histogram::with_opts(
            HistogramOpts::new("append_duration_seconds", "Event store commit duration")
                .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        registry.register(Box::new(append_duration.clone()))?;

        let streams_rehydrated = IntCounterVec::new(
            Opts::new("streams_rehydrated_total", "Aggregates rebuilt from their stream"),
            &["aggregate_type"],
        )?;
        registry.register(Box::new(streams_rehydrated.clone()))?;

        // Projection Metrics
        let projection_events_applied = IntCounterVec::new(
            Opts::new(
                "projection_events_applied_total",
                "Events folded into a read model",
            ),
            &["projection", "event_type"],
        )?;
        registry.register(Box::new(projection_events_applied.clone()))?;

        let projection_events_skipped = IntCounterVec::new(
            Opts::new(
                "projection_events_skipped_total",
                "Events ignored because the projection has no fold for their type",
            ),
            &["projection", "event_type"],
        )?;
        registry.register(Box::new(projection_events_skipped.clone()))?;

        let projection_fold_duration = HistogramVec::new(
            HistogramOpts::new(
                "projection_fold_duration_seconds",
                "Load, fold and save duration per projected event",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["projection"],
        )?;
        registry.register(Box::new(projection_fold_duration.clone()))?;

        Ok(Self {
            registry,
            events_appended,
            concurrency_conflicts,
            append_duration,
            streams_rehydrated,
            projection_events_applied,
            projection_events_skipped,
            projection_fold_duration,
        })
    }

    /// Get the Prometheus registry, e.g. to merge into an application-wide one
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
