//! Append-only, path-keyed data store.
//!
//! [`JsonlStore`] keeps every record in memory for reads and mirrors each
//! append as one JSON line in a backing file, whose path doubles as the
//! store's stable resource identity. Appends to a path receive dense,
//! zero-based indices in wire-arrival order; a single writer lock decides
//! that order.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use lab_core::{LabError, LabResult, Sample, SliceArg};

/// One persisted line: an appended sample, attribute updates, or both.
#[derive(Serialize, Deserialize)]
struct Line {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample: Option<Sample>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    attrs: BTreeMap<String, String>,
}

#[derive(Default)]
struct PathData {
    samples: Vec<Sample>,
    attrs: BTreeMap<String, String>,
}

struct Inner {
    file: File,
    paths: HashMap<String, PathData>,
}

/// JSON-lines backed append-only store.
pub struct JsonlStore {
    file_path: PathBuf,
    inner: Mutex<Inner>,
}

impl JsonlStore {
    /// Create a fresh store, truncating any existing file.
    pub fn create(file_path: impl Into<PathBuf>) -> LabResult<Self> {
        let file_path = file_path.into();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&file_path)?;
        info!(file = %file_path.display(), "created data store");
        Ok(JsonlStore {
            file_path,
            inner: Mutex::new(Inner {
                file,
                paths: HashMap::new(),
            }),
        })
    }

    /// Open a store, replaying any records already in the file.
    pub fn open(file_path: impl Into<PathBuf>) -> LabResult<Self> {
        let file_path = file_path.into();
        let mut paths: HashMap<String, PathData> = HashMap::new();
        if file_path.exists() {
            let content = std::fs::read_to_string(&file_path)?;
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                let line: Line = serde_json::from_str(line)?;
                let data = paths.entry(line.path).or_default();
                if let Some(sample) = line.sample {
                    data.samples.push(sample);
                }
                data.attrs.extend(line.attrs);
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;
        let records: usize = paths.values().map(|d| d.samples.len()).sum();
        info!(file = %file_path.display(), paths = paths.len(), records, "opened data store");
        Ok(JsonlStore {
            file_path,
            inner: Mutex::new(Inner { file, paths }),
        })
    }

    /// The backing file path: the store's stable resource identity.
    pub fn resource_id(&self) -> &Path {
        &self.file_path
    }

    /// [`resource_id`](Self::resource_id) as a string, as reported over
    /// the wire and compared by reconnecting gateways.
    pub fn filename(&self) -> String {
        self.file_path.display().to_string()
    }

    /// Append one record, creating the path on first use.
    ///
    /// Returns the record's dense, zero-based index within its path.
    /// `attrs` are set on first append and merged on later ones.
    pub async fn append(
        &self,
        path: &str,
        sample: Sample,
        attrs: &BTreeMap<String, String>,
    ) -> LabResult<u64> {
        let path = normalize_path(path)?;
        let mut inner = self.inner.lock().await;
        let line = serde_json::to_string(&Line {
            path: path.clone(),
            sample: Some(sample.clone()),
            attrs: attrs.clone(),
        })?;
        inner.file.write_all(line.as_bytes())?;
        inner.file.write_all(b"\n")?;
        inner.file.flush()?;
        let data = inner.paths.entry(path).or_default();
        let index = data.samples.len() as u64;
        data.samples.push(sample);
        data.attrs.extend(attrs.clone());
        Ok(index)
    }

    /// Merge attributes into a path without appending a record.
    pub async fn set_attrs(&self, path: &str, attrs: BTreeMap<String, String>) -> LabResult<()> {
        let path = normalize_path(path)?;
        let mut inner = self.inner.lock().await;
        let line = serde_json::to_string(&Line {
            path: path.clone(),
            sample: None,
            attrs: attrs.clone(),
        })?;
        inner.file.write_all(line.as_bytes())?;
        inner.file.write_all(b"\n")?;
        inner.file.flush()?;
        inner.paths.entry(path).or_default().attrs.extend(attrs);
        Ok(())
    }

    /// Records under a path, optionally sliced.
    pub async fn get_data(&self, path: &str, slice: SliceArg) -> LabResult<Vec<Sample>> {
        let path = normalize_path(path)?;
        let inner = self.inner.lock().await;
        let data = inner
            .paths
            .get(&path)
            .ok_or_else(|| LabError::PathUnknown(path.clone()))?;
        let (start, stop, step) = slice.resolve(data.samples.len())?;
        Ok((start..stop)
            .step_by(step)
            .map(|i| data.samples[i].clone())
            .collect())
    }

    /// One field's values under a path, optionally sliced.
    ///
    /// Every selected record must carry the field.
    pub async fn get_field(&self, path: &str, field: &str, slice: SliceArg) -> LabResult<Vec<f64>> {
        let path = normalize_path(path)?;
        let inner = self.inner.lock().await;
        let data = inner
            .paths
            .get(&path)
            .ok_or_else(|| LabError::PathUnknown(path.clone()))?;
        let (start, stop, step) = slice.resolve(data.samples.len())?;
        (start..stop)
            .step_by(step)
            .map(|i| {
                data.samples[i]
                    .field(field)
                    .ok_or_else(|| LabError::FieldUnknown {
                        path: path.clone(),
                        field: field.to_string(),
                    })
            })
            .collect()
    }

    /// Attributes of a path; empty when the path has none yet.
    pub async fn attrs(&self, path: &str) -> LabResult<BTreeMap<String, String>> {
        let path = normalize_path(path)?;
        let inner = self.inner.lock().await;
        Ok(inner
            .paths
            .get(&path)
            .map(|d| d.attrs.clone())
            .unwrap_or_default())
    }

    /// Number of records under a path.
    pub async fn len(&self, path: &str) -> LabResult<u64> {
        let path = normalize_path(path)?;
        let inner = self.inner.lock().await;
        let data = inner
            .paths
            .get(&path)
            .ok_or_else(|| LabError::PathUnknown(path.clone()))?;
        Ok(data.samples.len() as u64)
    }

    /// All paths starting with `prefix`, sorted.
    pub async fn list_paths(&self, prefix: &str) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut paths: Vec<String> = inner
            .paths
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect();
        paths.sort();
        debug!(prefix, count = paths.len(), "listed paths");
        paths
    }
}

/// Require a leading slash and non-empty segments; strip a trailing slash.
fn normalize_path(path: &str) -> LabResult<String> {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Err(LabError::InvalidPath(path.to_string()));
    };
    if rest.is_empty() || rest.split('/').any(|seg| seg.is_empty()) {
        return Err(LabError::InvalidPath(path.to_string()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;

    fn sample(tick: u64, value: f64) -> Sample {
        Sample::at_tick(tick).with_field("value", value)
    }

    #[tokio::test]
    async fn appends_get_dense_indices_per_path() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::create(dir.path().join("data.jsonl")).unwrap();
        let none = BTreeMap::new();

        assert_eq!(store.append("/a", sample(0, 1.0), &none).await.unwrap(), 0);
        assert_eq!(store.append("/b", sample(0, 2.0), &none).await.unwrap(), 0);
        assert_eq!(store.append("/a", sample(1, 3.0), &none).await.unwrap(), 1);
        assert_eq!(store.len("/a").await.unwrap(), 2);
        assert_eq!(store.len("/b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn slices_and_field_extraction() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::create(dir.path().join("data.jsonl")).unwrap();
        let none = BTreeMap::new();
        for i in 0..10 {
            store
                .append("/run/probe", sample(i, i as f64), &none)
                .await
                .unwrap();
        }

        let tail = store
            .get_data("/run/probe", SliceArg::tail(3))
            .await
            .unwrap();
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].tick, 7);

        let strided = store
            .get_field(
                "/run/probe",
                "value",
                SliceArg {
                    start: Some(0),
                    stop: Some(6),
                    step: Some(2),
                },
            )
            .await
            .unwrap();
        assert_eq!(strided, vec![0.0, 2.0, 4.0]);
    }

    #[tokio::test]
    async fn unknown_path_and_field_are_synchronous_errors() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::create(dir.path().join("data.jsonl")).unwrap();
        let none = BTreeMap::new();
        store.append("/run/probe", sample(0, 1.0), &none).await.unwrap();

        assert!(matches!(
            store.get_data("/missing", SliceArg::all()).await,
            Err(LabError::PathUnknown(_))
        ));
        assert!(matches!(
            store.get_field("/run/probe", "phase", SliceArg::all()).await,
            Err(LabError::FieldUnknown { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_paths_are_rejected() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::create(dir.path().join("data.jsonl")).unwrap();
        let none = BTreeMap::new();

        for bad in ["", "no-slash", "/", "/a//b"] {
            assert!(
                matches!(
                    store.append(bad, sample(0, 0.0), &none).await,
                    Err(LabError::InvalidPath(_))
                ),
                "path {bad:?} should be rejected"
            );
        }
        // A trailing slash is tolerated and stripped.
        store.append("/run/", sample(0, 0.0), &none).await.unwrap();
        assert_eq!(store.len("/run").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn attrs_are_set_on_first_append_and_merged_later() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::create(dir.path().join("data.jsonl")).unwrap();

        let mut first = BTreeMap::new();
        first.insert("unit".to_string(), "V".to_string());
        store.append("/run/src", sample(0, 0.0), &first).await.unwrap();

        let mut second = BTreeMap::new();
        second.insert("gain".to_string(), "10".to_string());
        store.append("/run/src", sample(1, 0.1), &second).await.unwrap();

        let attrs = store.attrs("/run/src").await.unwrap();
        assert_eq!(attrs.get("unit").map(String::as_str), Some("V"));
        assert_eq!(attrs.get("gain").map(String::as_str), Some("10"));
    }

    #[tokio::test]
    async fn concurrent_appends_keep_per_path_density() {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonlStore::create(dir.path().join("data.jsonl")).unwrap());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..25 {
                    store
                        .append("/shared", sample(i, i as f64), &BTreeMap::new())
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // 8 writers x 25 appends: indices must have stayed dense.
        assert_eq!(store.len("/shared").await.unwrap(), 200);
    }

    #[tokio::test]
    async fn reopening_replays_records_and_attrs() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("data.jsonl");
        {
            let store = JsonlStore::create(&file).unwrap();
            let mut attrs = BTreeMap::new();
            attrs.insert("run".to_string(), "cooldown-3".to_string());
            store.append("/run/probe", sample(0, 4.2), &attrs).await.unwrap();
            store.append("/run/probe", sample(1, 4.1), &BTreeMap::new()).await.unwrap();
        }

        let store = JsonlStore::open(&file).unwrap();
        let records = store.get_data("/run/probe", SliceArg::all()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].field("value"), Some(4.1));
        let attrs = store.attrs("/run/probe").await.unwrap();
        assert_eq!(attrs.get("run").map(String::as_str), Some("cooldown-3"));

        // New appends continue the index sequence.
        let idx = store
            .append("/run/probe", sample(2, 4.0), &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(idx, 2);
    }

    #[tokio::test]
    async fn list_paths_filters_by_prefix() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::create(dir.path().join("data.jsonl")).unwrap();
        let none = BTreeMap::new();
        store.append("/status/a", sample(0, 0.0), &none).await.unwrap();
        store.append("/status/b", sample(0, 0.0), &none).await.unwrap();
        store.append("/measurement/m000000/a", sample(0, 0.0), &none).await.unwrap();

        assert_eq!(
            store.list_paths("/status").await,
            vec!["/status/a".to_string(), "/status/b".to_string()]
        );
    }
}
