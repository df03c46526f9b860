//! On-disk shard format.
//!
//! A shard is a JSON document holding a full snapshot of one worker's
//! registry. Writers replace it atomically on every flush, so a reader always
//! sees either the previous or the next complete snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use prometheus::proto::{MetricFamily, MetricType};
use serde::{Deserialize, Serialize};

/// Label name to value, ordered so that equal sets compare equal.
pub type LabelSet = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardSnapshot {
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_index: Option<u32>,
    pub written_at: DateTime<Utc>,
    pub families: Vec<FamilySnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilySnapshot {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub samples: Vec<SampleSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSnapshot {
    pub labels: LabelSet,
    pub value: SampleValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Scalar(f64),
    Histogram(HistogramSnapshot),
}

/// Histogram state with cumulative bucket counts. The implicit `+Inf`
/// bucket equals `count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
    pub buckets: Vec<BucketSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketSnapshot {
    pub le: f64,
    pub count: u64,
}

impl ShardSnapshot {
    pub fn empty(pid: u32, worker_index: Option<u32>) -> Self {
        Self {
            pid,
            worker_index,
            written_at: Utc::now(),
            families: Vec::new(),
        }
    }

    /// Convert gathered families into a snapshot.
    ///
    /// Summaries and untyped metrics are not produced by this crate and are
    /// dropped. Non-finite scalar values are dropped as well since JSON
    /// cannot carry them.
    pub fn capture(pid: u32, worker_index: Option<u32>, families: &[MetricFamily]) -> Self {
        let families = families.iter().filter_map(capture_family).collect();
        Self {
            pid,
            worker_index,
            written_at: Utc::now(),
            families,
        }
    }

    pub fn family(&self, name: &str) -> Option<&FamilySnapshot> {
        self.families.iter().find(|family| family.name == name)
    }
}

fn capture_family(family: &MetricFamily) -> Option<FamilySnapshot> {
    let kind = match family.get_field_type() {
        MetricType::COUNTER => MetricKind::Counter,
        MetricType::GAUGE => MetricKind::Gauge,
        MetricType::HISTOGRAM => MetricKind::Histogram,
        _ => return None,
    };

    let samples = family
        .get_metric()
        .iter()
        .filter_map(|metric| {
            let labels: LabelSet = metric
                .get_label()
                .iter()
                .map(|pair| (pair.get_name().to_string(), pair.get_value().to_string()))
                .collect();
            let value = match kind {
                MetricKind::Counter => SampleValue::Scalar(metric.get_counter().value()),
                MetricKind::Gauge => SampleValue::Scalar(metric.get_gauge().value()),
                MetricKind::Histogram => {
                    let histogram = metric.get_histogram();
                    SampleValue::Histogram(HistogramSnapshot {
                        count: histogram.get_sample_count(),
                        sum: histogram.get_sample_sum(),
                        buckets: histogram
                            .get_bucket()
                            .iter()
                            .filter(|bucket| bucket.get_upper_bound().is_finite())
                            .map(|bucket| BucketSnapshot {
                                le: bucket.get_upper_bound(),
                                count: bucket.get_cumulative_count(),
                            })
                            .collect(),
                    })
                }
            };
            match value {
                SampleValue::Scalar(v) if !v.is_finite() => None,
                value => Some(SampleSnapshot { labels, value }),
            }
        })
        .collect();

    Some(FamilySnapshot {
        name: family.get_name().to_string(),
        help: family.get_help().to_string(),
        kind,
        samples,
    })
}
