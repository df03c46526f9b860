//! Merged view over all shards and its text rendering.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::aggregate::SkippedShard;
use crate::snapshot::{BucketSnapshot, LabelSet, MetricKind};

#[derive(Debug, Clone, PartialEq)]
pub enum MergedValue {
    Scalar(f64),
    Histogram {
        count: u64,
        sum: f64,
        buckets: Vec<BucketSnapshot>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedFamily {
    pub help: String,
    pub kind: MetricKind,
    pub samples: BTreeMap<LabelSet, MergedValue>,
}

/// Result of one scrape. Computed per request, never persisted.
#[derive(Debug, Clone, Default)]
pub struct MergedExposition {
    pub families: BTreeMap<String, MergedFamily>,
    /// Shards that contributed to the merge.
    pub shards_merged: usize,
    /// Shards that were unreadable or corrupt.
    pub skipped: Vec<SkippedShard>,
}

impl MergedExposition {
    /// Scalar value of `name` for an exact label set.
    pub fn value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let key: LabelSet = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        match self.families.get(name)?.samples.get(&key)? {
            MergedValue::Scalar(v) => Some(*v),
            MergedValue::Histogram { .. } => None,
        }
    }

    /// Sum of a scalar family over every sample whose labels include all of
    /// `matching`.
    pub fn sum(&self, name: &str, matching: &[(&str, &str)]) -> f64 {
        let Some(family) = self.families.get(name) else {
            return 0.0;
        };
        family
            .samples
            .iter()
            .filter(|(labels, _)| {
                matching
                    .iter()
                    .all(|(k, v)| labels.get(*k).map(String::as_str) == Some(*v))
            })
            .map(|(_, value)| match value {
                MergedValue::Scalar(v) => *v,
                MergedValue::Histogram { count, .. } => *count as f64,
            })
            .sum()
    }

    /// Render in the Prometheus text exposition format (version 0.0.4).
    pub fn render(&self) -> String {
        let mut out = String::new();

        for (name, family) in &self.families {
            if family.samples.is_empty() {
                continue;
            }
            let _ = writeln!(out, "# HELP {} {}", name, escape_help(&family.help));
            let _ = writeln!(out, "# TYPE {} {}", name, family.kind.as_str());

            for (labels, value) in &family.samples {
                match value {
                    MergedValue::Scalar(v) => {
                        write_sample(&mut out, name, labels, None, *v);
                    }
                    MergedValue::Histogram {
                        count,
                        sum,
                        buckets,
                    } => {
                        let bucket_name = format!("{}_bucket", name);
                        for bucket in buckets {
                            write_sample(
                                &mut out,
                                &bucket_name,
                                labels,
                                Some(&format_value(bucket.le)),
                                bucket.count as f64,
                            );
                        }
                        write_sample(&mut out, &bucket_name, labels, Some("+Inf"), *count as f64);
                        write_sample(&mut out, &format!("{}_sum", name), labels, None, *sum);
                        write_sample(
                            &mut out,
                            &format!("{}_count", name),
                            labels,
                            None,
                            *count as f64,
                        );
                    }
                }
            }
        }

        let _ = writeln!(out, "# HELP metrics_shards_merged Shard files merged into this scrape");
        let _ = writeln!(out, "# TYPE metrics_shards_merged gauge");
        let _ = writeln!(out, "metrics_shards_merged {}", self.shards_merged);
        let _ = writeln!(out, "# HELP metrics_shards_skipped Shard files skipped as unreadable");
        let _ = writeln!(out, "# TYPE metrics_shards_skipped gauge");
        let _ = writeln!(out, "metrics_shards_skipped {}", self.skipped.len());

        out
    }
}

fn write_sample(out: &mut String, name: &str, labels: &LabelSet, le: Option<&str>, value: f64) {
    out.push_str(name);
    if !labels.is_empty() || le.is_some() {
        out.push('{');
        let mut first = true;
        let le_pair = le.map(|le| ("le", le));
        let pairs = labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain(le_pair);
        for (k, v) in pairs {
            if !first {
                out.push(',');
            }
            first = false;
            let _ = write!(out, "{}=\"{}\"", k, escape_label(v));
        }
        out.push('}');
    }
    let _ = writeln!(out, " {}", format_value(value));
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        format!("{}", value)
    }
}

fn escape_label(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}
