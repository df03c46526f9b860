//! Mirrorgate Metrics - multiprocess Prometheus exposition
//!
//! Worker processes cannot share in-memory counters, so each one records into
//! its own [`WorkerMetrics`] registry and persists it to an exclusive shard
//! file through a [`ShardWriter`]. On scrape, the [`Aggregator`] reads every
//! shard in the directory (including those of exited workers) and merges them
//! into one [`MergedExposition`].
//!
//! Merge rules: counters and histograms sum; gauges take the value from the
//! most recently written shard.

pub mod aggregate;
pub mod exposition;
pub mod registry;
pub mod shard;
pub mod snapshot;

pub use aggregate::{Aggregator, SkippedShard};
pub use exposition::{MergedExposition, MergedFamily, MergedValue};
pub use registry::{WorkerMetrics, HTTP_LATENCY_BUCKETS, STORE_LATENCY_BUCKETS};
pub use shard::{is_shard_file_name, ShardWriter, SHARD_PREFIX, SHARD_SUFFIX};
pub use snapshot::{
    BucketSnapshot, FamilySnapshot, HistogramSnapshot, LabelSet, MetricKind, SampleSnapshot,
    SampleValue, ShardSnapshot,
};

/// Content type of the Prometheus text exposition format.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";
