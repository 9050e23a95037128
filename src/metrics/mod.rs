use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Events appended per stream name
// - Unit-of-work commits and their outcome
// - Optimistic-concurrency conflicts
// - Key lifecycle (minted, shredded) and encryption failures
//
// The registry is owned by `Metrics`; `gather_text` renders it in the
// Prometheus text exposition format.
// ============================================================================

/// Outcome label of one unit-of-work flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    Conflict,
    Failed,
    Noop,
}

impl CommitOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::Conflict => "conflict",
            Self::Failed => "failed",
            Self::Noop => "noop",
        }
    }
}

/// Central metrics registry for the event store
pub struct Metrics {
    registry: Registry,

    // Store Metrics
    pub events_appended: IntCounterVec,
    pub concurrency_conflicts: IntCounter,

    // Unit of Work Metrics
    pub commits_total: IntCounterVec,
    pub commit_duration: HistogramVec,

    // Key Metrics
    pub keys_generated: IntCounter,
    pub keys_shredded: IntCounter,
    pub encryption_failures: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Store Metrics
        let events_appended = IntCounterVec::new(
            Opts::new("event_store_events_appended_total", "Total events appended"),
            &["stream_name"],
        )?;
        registry.register(Box::new(events_appended.clone()))?;

        let concurrency_conflicts = IntCounter::new(
            "event_store_concurrency_conflicts_total",
            "Commits rejected by optimistic concurrency",
        )?;
        registry.register(Box::new(concurrency_conflicts.clone()))?;

        // Unit of Work Metrics
        let commits_total = IntCounterVec::new(
            Opts::new("unit_of_work_commits_total", "Unit-of-work flushes by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(commits_total.clone()))?;

        let commit_duration = HistogramVec::new(
            HistogramOpts::new("unit_of_work_commit_duration_seconds", "Encrypt and commit duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        // Key Metrics
        let keys_generated = IntCounter::new(
            "encryption_keys_generated_total",
            "Per-user data keys minted",
        )?;
        registry.register(Box::new(keys_generated.clone()))?;

        let keys_shredded = IntCounter::new(
            "encryption_keys_shredded_total",
            "Per-user data keys deleted",
        )?;
        registry.register(Box::new(keys_shredded.clone()))?;

        let encryption_failures = IntCounterVec::new(
            Opts::new("encryption_failures_total", "Field encryption or decryption failures"),
            &["operation"],
        )?;
        registry.register(Box::new(encryption_failures.clone()))?;

        Ok(Self {
            registry,
            events_appended,
            concurrency_conflicts,
            commits_total,
            commit_duration,
            keys_generated,
            keys_shredded,
            encryption_failures,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Helper to record one flush and how long it took
    pub fn record_commit(&self, outcome: CommitOutcome, duration_secs: f64) {
        self.commits_total.with_label_values(&[outcome.as_str()]).inc();
        self.commit_duration.with_label_values(&[outcome.as_str()]).observe(duration_secs);
        if outcome == CommitOutcome::Conflict {
            self.concurrency_conflicts.inc();
        }
    }

    pub fn record_appended(&self, stream_name: &str, count: usize) {
        self.events_appended.with_label_values(&[stream_name]).inc_by(count as u64);
    }

    pub fn record_keys_generated(&self, count: usize) {
        self.keys_generated.inc_by(count as u64);
    }

    pub fn record_key_shredded(&self) {
        self.keys_shredded.inc();
    }

    pub fn record_encryption_failure(&self, operation: &str) {
        self.encryption_failures.with_label_values(&[operation]).inc();
    }

    /// Render every registered metric in the text exposition format.
    pub fn gather_text(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
