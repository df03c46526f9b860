//! Scrape-time merge of every shard in the metrics directory.
//!
//! The aggregator is read-only. It lists `shard-*.json` (temp files never
//! match), parses each file on its own, and merges whatever parsed. One bad
//! shard costs only its own contribution.

use std::collections::btree_map::Entry;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use mirrorgate_core::{MirrorError, MirrorResult};
use tracing::{debug, warn};

use crate::exposition::{MergedExposition, MergedFamily, MergedValue};
use crate::shard::is_shard_file_name;
use crate::snapshot::{MetricKind, SampleValue, ShardSnapshot};

/// A shard left out of a merge, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedShard {
    pub path: PathBuf,
    pub error: MirrorError,
}

struct LoadedShard {
    path: PathBuf,
    modified: SystemTime,
    snapshot: ShardSnapshot,
}

/// Reads and merges the shards of one metrics directory.
#[derive(Debug, Clone)]
pub struct Aggregator {
    dir: PathBuf,
}

impl Aggregator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Merge every readable shard.
    ///
    /// Fails only when the directory itself is missing.
    pub fn collect(&self) -> MirrorResult<MergedExposition> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            warn!(dir = %self.dir.display(), error = %e, "Metrics directory unreadable");
            MirrorError::metrics_dir_missing(&self.dir)
        })?;

        let mut loaded = Vec::new();
        let mut skipped = Vec::new();

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_shard_file_name(name) {
                continue;
            }
            let path = entry.path();
            match load_shard(&path) {
                Ok(Some(shard)) => loaded.push(shard),
                Ok(None) => {}
                Err(error) => {
                    warn!(shard = %path.display(), error = %error, "Skipping corrupt metrics shard");
                    skipped.push(SkippedShard { path, error });
                }
            }
        }

        // Oldest first, so gauges written later overwrite earlier ones.
        loaded.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));

        let mut merged = MergedExposition {
            shards_merged: loaded.len(),
            skipped,
            ..MergedExposition::default()
        };
        for shard in &loaded {
            merge_shard(&mut merged, shard);
        }

        debug!(
            merged = merged.shards_merged,
            skipped = merged.skipped.len(),
            "Merged metrics shards"
        );
        Ok(merged)
    }
}

/// `Ok(None)` when the file vanished between listing and reading.
fn load_shard(path: &Path) -> MirrorResult<Option<LoadedShard>> {
    let read = fs::metadata(path).and_then(|meta| {
        let modified = meta.modified()?;
        let bytes = fs::read(path)?;
        Ok((modified, bytes))
    });
    let (modified, bytes) = match read {
        Ok(read) => read,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(MirrorError::shard_corrupt(path, e)),
    };
    let snapshot: ShardSnapshot =
        serde_json::from_slice(&bytes).map_err(|e| MirrorError::shard_corrupt(path, e))?;
    Ok(Some(LoadedShard {
        path: path.to_path_buf(),
        modified,
        snapshot,
    }))
}

fn merge_shard(merged: &mut MergedExposition, shard: &LoadedShard) {
    for family in &shard.snapshot.families {
        let target = match merged.families.entry(family.name.clone()) {
            Entry::Vacant(slot) => slot.insert(MergedFamily {
                help: family.help.clone(),
                kind: family.kind,
                samples: Default::default(),
            }),
            Entry::Occupied(slot) => {
                let existing = slot.into_mut();
                if existing.kind != family.kind {
                    warn!(
                        shard = %shard.path.display(),
                        metric = %family.name,
                        expected = existing.kind.as_str(),
                        found = family.kind.as_str(),
                        "Metric type conflict, skipping family from shard"
                    );
                    continue;
                }
                existing
            }
        };

        for sample in &family.samples {
            let incoming = match &sample.value {
                SampleValue::Scalar(v) => MergedValue::Scalar(*v),
                SampleValue::Histogram(h) => MergedValue::Histogram {
                    count: h.count,
                    sum: h.sum,
                    buckets: h.buckets.clone(),
                },
            };

            match target.samples.entry(sample.labels.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(incoming);
                }
                Entry::Occupied(mut slot) => {
                    if !combine(family.kind, slot.get_mut(), incoming) {
                        warn!(
                            shard = %shard.path.display(),
                            metric = %family.name,
                            "Incompatible sample shape, skipping sample from shard"
                        );
                    }
                }
            }
        }
    }
}

/// Fold `incoming` into `current`. Returns false if the shapes disagree.
fn combine(kind: MetricKind, current: &mut MergedValue, incoming: MergedValue) -> bool {
    match (current, incoming) {
        (MergedValue::Scalar(current), MergedValue::Scalar(incoming)) => {
            match kind {
                MetricKind::Gauge => *current = incoming,
                MetricKind::Counter | MetricKind::Histogram => *current += incoming,
            }
            true
        }
        (
            MergedValue::Histogram {
                count,
                sum,
                buckets,
            },
            MergedValue::Histogram {
                count: in_count,
                sum: in_sum,
                buckets: in_buckets,
            },
        ) => {
            let same_layout = buckets.len() == in_buckets.len()
                && buckets.iter().zip(&in_buckets).all(|(a, b)| a.le == b.le);
            if !same_layout {
                return false;
            }
            *count += in_count;
            *sum += in_sum;
            for (bucket, incoming) in buckets.iter_mut().zip(in_buckets) {
                bucket.count += incoming.count;
            }
            true
        }
        _ => false,
    }
}
