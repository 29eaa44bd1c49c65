use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::workflow::config::FetchConfig;
use crate::workflow::errors::TransportError;
use crate::workflow::retry::{retry_transient, RetryPolicy};
use crate::workflow::source::DesignSource;
use crate::workflow::types::{AssetMap, AssetRecord, AssetTarget, DesignNode};
use crate::workflow::walker::walk;

const ASSET_EXTENSION: &str = "png";
const UNSAFE_FILE_NAME_CHARS: &[char] = &[':', ';', '/', '\\', '*', '?', '"', '<', '>', '|'];

/// Every node with a visible image fill, in pre-order, the root included.
pub fn locate_image_nodes(root: Option<&DesignNode>) -> Vec<AssetTarget> {
    let mut targets = Vec::new();
    walk(root, &mut |node, _| {
        if node.has_visible_image_fill() {
            debug!(node = %node.id, name = %node.name, "image fill located");
            targets.push(AssetTarget {
                id: node.id.clone(),
                name: node.name.clone(),
            });
        }
    });
    targets
}

#[derive(Debug, Clone, Copy)]
pub struct AssetFetchRequest<'a> {
    pub file_key: &'a str,
    pub targets: &'a [AssetTarget],
    /// Human label for the storage folder; the file key is used without one.
    pub group_label: Option<&'a str>,
}

#[derive(Debug, Clone, Default)]
pub struct AssetDownloads {
    /// One record per target, in target order.
    pub records: Vec<AssetRecord>,
    pub map: AssetMap,
}

impl AssetDownloads {
    pub fn stored_count(&self) -> usize {
        self.map.len()
    }

    pub fn skipped(&self) -> impl Iterator<Item = &AssetRecord> {
        self.records.iter().filter(|record| !record.is_stored())
    }
}

enum PendingAsset {
    Settled(AssetRecord),
    /// The record as it stood at spawn time stands in if the task dies.
    Running(AssetRecord, JoinHandle<AssetRecord>),
}

/// Resolves export URLs for `targets` in one batched call, then downloads
/// each asset into `{asset_root}/{group}/` with bounded concurrency. Every
/// target gets exactly one record, and no two targets share a file.
///
/// Only a batch that fails after its retry budget is an error. A single
/// asset without a URL, or whose download or write fails, is logged and
/// left out of the map.
pub async fn download_assets(
    source: Arc<dyn DesignSource>,
    request: AssetFetchRequest<'_>,
    config: &FetchConfig,
) -> Result<AssetDownloads, TransportError> {
    if request.targets.is_empty() {
        debug!("no image targets; skipping export");
        return Ok(AssetDownloads::default());
    }

    let ids: Vec<String> = request
        .targets
        .iter()
        .map(|target| target.id.clone())
        .collect();
    info!(count = ids.len(), "resolving image export URLs");

    let upstream: &dyn DesignSource = source.as_ref();
    let id_slice = ids.as_slice();
    let urls = retry_transient(&config.batch_retry, "image export batch", || {
        upstream.resolve_image_urls(request.file_key, id_slice, config.export_scale)
    })
    .await?;

    let group = group_segment(request.group_label, request.file_key);
    let directory = config.asset_root.join(&group);
    let directory_ready = match tokio::fs::create_dir_all(&directory).await {
        Ok(()) => true,
        Err(error) => {
            warn!(
                path = %directory.display(),
                %error,
                "failed to create asset directory; no assets will be stored"
            );
            false
        }
    };

    let semaphore = Arc::new(Semaphore::new(config.download_permits()));
    let mut claimed_names = HashSet::new();
    let mut pending = Vec::with_capacity(request.targets.len());
    for target in request.targets {
        let url = urls
            .get(&target.id)
            .cloned()
            .flatten()
            .filter(|url| !url.trim().is_empty());
        let record = AssetRecord::pending(target, url.clone());
        let Some(url) = url else {
            warn!(
                node = %target.id,
                name = %target.name,
                "no export URL returned; skipping asset"
            );
            pending.push(PendingAsset::Settled(record));
            continue;
        };
        if !directory_ready {
            pending.push(PendingAsset::Settled(record));
            continue;
        }

        let file_name = claim_file_name(&mut claimed_names, &target.id);
        let job = DownloadJob {
            url,
            destination: directory.join(&file_name),
            public_path: public_asset_path(&config.public_prefix, &group, &file_name),
            policy: config.batch_retry,
        };
        let source = Arc::clone(&source);
        let semaphore = Arc::clone(&semaphore);
        let fallback = record.clone();
        pending.push(PendingAsset::Running(
            fallback,
            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return record;
                };
                job.run(source.as_ref(), record).await
            }),
        ));
    }

    let mut downloads = AssetDownloads::default();
    for entry in pending {
        let record = match entry {
            PendingAsset::Settled(record) => record,
            PendingAsset::Running(fallback, handle) => match handle.await {
                Ok(record) => record,
                Err(error) => {
                    warn!(node = %fallback.node_id, %error, "asset download task failed");
                    fallback
                }
            },
        };
        if let Some(public_path) = &record.public_path {
            downloads
                .map
                .insert(record.node_id.clone(), public_path.clone());
        }
        downloads.records.push(record);
    }

    info!(
        requested = request.targets.len(),
        stored = downloads.stored_count(),
        group = %group,
        "image assets downloaded"
    );
    Ok(downloads)
}

struct DownloadJob {
    url: String,
    destination: PathBuf,
    public_path: String,
    policy: RetryPolicy,
}

impl DownloadJob {
    async fn run(self, source: &dyn DesignSource, mut record: AssetRecord) -> AssetRecord {
        match self.fetch_and_store(source).await {
            Ok(bytes) => {
                let sha256 = format!("{:x}", Sha256::digest(&bytes));
                debug!(
                    node = %record.node_id,
                    bytes = bytes.len(),
                    sha256 = %sha256,
                    path = %self.destination.display(),
                    "asset stored"
                );
                record.byte_len = Some(bytes.len());
                record.sha256 = Some(sha256);
                record.file_path = Some(self.destination);
                record.public_path = Some(self.public_path);
            }
            Err(error) => {
                warn!(node = %record.node_id, error = %format!("{error:#}"), "skipping asset");
            }
        }
        record
    }

    async fn fetch_and_store(&self, source: &dyn DesignSource) -> Result<Vec<u8>> {
        let destination: &Path = &self.destination;
        let url = self.url.as_str();
        let bytes = retry_transient(&self.policy, "asset download", || source.download(url))
            .await
            .with_context(|| format!("failed to download asset URL {url}"))?;
        tokio::fs::write(destination, &bytes)
            .await
            .with_context(|| {
                format!(
                    "failed to write asset to destination {}",
                    destination.display()
                )
            })?;
        Ok(bytes)
    }
}

/// Folder name under the asset root: the label with every character
/// outside `[A-Za-z0-9]` replaced by `_`, lowercased. Falls back to the
/// file key when the label is absent or blank.
pub fn group_segment(label: Option<&str>, file_key: &str) -> String {
    let raw = label
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .unwrap_or(file_key);
    raw.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn file_stem(node_id: &str) -> String {
    node_id
        .chars()
        .map(|ch| {
            if ch.is_whitespace() || UNSAFE_FILE_NAME_CHARS.contains(&ch) {
                '-'
            } else {
                ch
            }
        })
        .collect()
}

/// `12:34` -> `12-34.png`, or the first free `12-34_{n}.png` (n = 2, 3, ...)
/// when an earlier target in the batch already holds that name. Distinct
/// ids can sanitize alike (`1:2` and `1;2`).
fn claim_file_name(claimed: &mut HashSet<String>, node_id: &str) -> String {
    let stem = file_stem(node_id);
    let mut candidate = format!("{stem}.{ASSET_EXTENSION}");
    let mut suffix = 2;
    while !claimed.insert(candidate.clone()) {
        candidate = format!("{stem}_{suffix}.{ASSET_EXTENSION}");
        suffix += 1;
    }
    candidate
}

pub fn public_asset_path(public_prefix: &str, group: &str, file_name: &str) -> String {
    format!("{}/{group}/{file_name}", public_prefix.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tempfile::tempdir;

    use std::collections::HashSet;

    use super::{
        claim_file_name, download_assets, group_segment, locate_image_nodes,
        public_asset_path, AssetFetchRequest,
    };
    use crate::workflow::config::FetchConfig;
    use crate::workflow::errors::TransportError;
    use crate::workflow::source::fake::FakeSource;
    use crate::workflow::types::{AssetTarget, DesignNode};

    fn tree() -> DesignNode {
        serde_json::from_value(json!({
            "id": "0:1",
            "name": "Hero Section",
            "type": "FRAME",
            "children": [
                {
                    "id": "1:2",
                    "name": "Photo",
                    "type": "RECTANGLE",
                    "fills": [{ "type": "IMAGE", "imageRef": "abc" }]
                },
                {
                    "id": "1:3",
                    "name": "Hidden photo",
                    "type": "RECTANGLE",
                    "fills": [{ "type": "IMAGE", "imageRef": "def", "visible": false }]
                },
                {
                    "id": "1:4",
                    "name": "Group",
                    "type": "GROUP",
                    "children": [{
                        "id": "1:5",
                        "name": "Avatar",
                        "type": "ELLIPSE",
                        "fills": [
                            { "type": "SOLID", "color": { "r": 1, "g": 1, "b": 1, "a": 1 } },
                            { "type": "IMAGE", "imageRef": "ghi" }
                        ]
                    }]
                }
            ]
        }))
        .expect("tree decodes")
    }

    fn targets(ids: &[&str]) -> Vec<AssetTarget> {
        ids.iter()
            .map(|id| AssetTarget {
                id: (*id).to_owned(),
                name: format!("asset {id}"),
            })
            .collect()
    }

    fn config_in(root: &std::path::Path) -> FetchConfig {
        FetchConfig {
            asset_root: root.to_path_buf(),
            ..FetchConfig::default()
        }
    }

    #[test]
    fn locates_visible_image_fills_in_pre_order() {
        let tree = tree();
        let ids: Vec<_> = locate_image_nodes(Some(&tree))
            .into_iter()
            .map(|target| target.id)
            .collect();
        assert_eq!(ids, vec!["1:2", "1:5"]);
        assert!(locate_image_nodes(None).is_empty());
    }

    #[test]
    fn storage_names_are_sanitized() {
        assert_eq!(group_segment(Some("Hero Section!"), "KEY"), "hero_section_");
        assert_eq!(group_segment(Some("  "), "AbC-9"), "abc_9");
        assert_eq!(group_segment(None, "KEY"), "key");
        assert_eq!(claim_file_name(&mut HashSet::new(), "12:34"), "12-34.png");
        assert_eq!(
            claim_file_name(&mut HashSet::new(), "I1:2;3:4"),
            "I1-2-3-4.png"
        );
        assert_eq!(
            public_asset_path("/assets/images/", "hero", "1-2.png"),
            "/assets/images/hero/1-2.png"
        );
    }

    #[test]
    fn colliding_ids_claim_distinct_names() {
        let mut claimed = HashSet::new();
        let names: Vec<_> = ["1:2", "1;2", "1 2", "1-2_2", "1:2"]
            .iter()
            .map(|id| claim_file_name(&mut claimed, id))
            .collect();
        assert_eq!(
            names,
            vec!["1-2.png", "1-2_2.png", "1-2_3.png", "1-2_2_2.png", "1-2_4.png"]
        );
    }

    #[tokio::test]
    async fn empty_targets_make_no_upstream_calls() {
        let dir = tempdir().expect("tempdir");
        let source = Arc::new(FakeSource::new());
        let downloads = download_assets(
            source.clone(),
            AssetFetchRequest {
                file_key: "KEY",
                targets: &[],
                group_label: None,
            },
            &config_in(dir.path()),
        )
        .await
        .expect("no-op succeeds");
        assert!(downloads.map.is_empty());
        assert_eq!(source.resolve_count(), 0);
    }

    #[tokio::test]
    async fn omitted_urls_are_skipped_not_fatal() {
        let dir = tempdir().expect("tempdir");
        let source = Arc::new(
            FakeSource::new()
                .with_url("1:1", "https://cdn/1")
                .with_url("1:2", "https://cdn/2")
                .with_null_url("1:3")
                .with_payload("https://cdn/1", b"one".to_vec())
                .with_payload("https://cdn/2", b"two".to_vec()),
        );
        let targets = targets(&["1:1", "1:2", "1:3"]);
        let downloads = download_assets(
            source.clone(),
            AssetFetchRequest {
                file_key: "KEY",
                targets: &targets,
                group_label: Some("Hero Section"),
            },
            &config_in(dir.path()),
        )
        .await
        .expect("batch succeeds");

        assert_eq!(downloads.map.len(), 2);
        assert_eq!(
            downloads.map.get("1:1").map(String::as_str),
            Some("/assets/images/hero_section/1-1.png")
        );
        assert!(!downloads.map.contains_key("1:3"));
        assert_eq!(source.resolve_count(), 1);
        assert_eq!(downloads.records.len(), 3);
        assert_eq!(downloads.skipped().count(), 1);

        let stored = std::fs::read(dir.path().join("hero_section").join("1-2.png"))
            .expect("asset written");
        assert_eq!(stored, b"two");
        assert_eq!(
            downloads.records[0].sha256.as_deref(),
            Some("7692c3ad3540bb803c020b3aee66cd8887123234ea0c6e7143c0add73ff431ed")
        );
    }

    #[tokio::test]
    async fn a_failed_download_does_not_abort_its_siblings() {
        let dir = tempdir().expect("tempdir");
        let source = Arc::new(
            FakeSource::new()
                .with_url("1:1", "https://cdn/1")
                .with_url("1:2", "https://cdn/missing")
                .with_payload("https://cdn/1", b"one".to_vec()),
        );
        let targets = targets(&["1:1", "1:2"]);
        let downloads = download_assets(
            source.clone(),
            AssetFetchRequest {
                file_key: "KEY",
                targets: &targets,
                group_label: None,
            },
            &config_in(dir.path()),
        )
        .await
        .expect("batch succeeds");

        assert_eq!(downloads.map.keys().collect::<Vec<_>>(), vec!["1:1"]);
        assert!(dir.path().join("key").join("1-1.png").exists());
        assert!(!dir.path().join("key").join("1-2.png").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn an_exhausted_batch_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let source = Arc::new(FakeSource::new().with_resolve_failures(
            (0..4)
                .map(|_| TransportError::RateLimited {
                    retry_after_secs: None,
                })
                .collect(),
        ));
        let targets = targets(&["1:1"]);
        let result = download_assets(
            source.clone(),
            AssetFetchRequest {
                file_key: "KEY",
                targets: &targets,
                group_label: None,
            },
            &config_in(dir.path()),
        )
        .await;

        assert!(matches!(
            result,
            Err(TransportError::RetriesExhausted { attempts: 4, .. })
        ));
        assert_eq!(source.resolve_count(), 4);
        assert_eq!(source.download_count(), 0);
    }

    #[tokio::test]
    async fn single_permit_still_downloads_everything() {
        let dir = tempdir().expect("tempdir");
        let mut source = FakeSource::new();
        for index in 0..5 {
            let url = format!("https://cdn/{index}");
            source = source
                .with_url(&format!("2:{index}"), &url)
                .with_payload(&url, vec![index as u8; 16]);
        }
        let source = Arc::new(source);
        let targets = targets(&["2:0", "2:1", "2:2", "2:3", "2:4"]);
        let config = FetchConfig {
            max_concurrent_downloads: 1,
            ..config_in(dir.path())
        };
        let downloads = download_assets(
            source.clone(),
            AssetFetchRequest {
                file_key: "KEY",
                targets: &targets,
                group_label: Some("Gallery"),
            },
            &config,
        )
        .await
        .expect("batch succeeds");

        assert_eq!(downloads.map.len(), 5);
        assert_eq!(source.download_count(), 5);
        let order: Vec<_> = downloads
            .records
            .iter()
            .map(|record| record.node_id.as_str())
            .collect();
        assert_eq!(order, vec!["2:0", "2:1", "2:2", "2:3", "2:4"]);
        assert!(downloads
            .records
            .iter()
            .all(|record| record.byte_len == Some(16)));
    }

    #[tokio::test]
    async fn ids_that_sanitize_alike_keep_separate_files() {
        let dir = tempdir().expect("tempdir");
        let source = Arc::new(
            FakeSource::new()
                .with_url("1:2", "https://cdn/colon")
                .with_url("1;2", "https://cdn/semicolon")
                .with_payload("https://cdn/colon", b"colon".to_vec())
                .with_payload("https://cdn/semicolon", b"semicolon".to_vec()),
        );
        let targets = targets(&["1:2", "1;2"]);
        let downloads = download_assets(
            source.clone(),
            AssetFetchRequest {
                file_key: "KEY",
                targets: &targets,
                group_label: None,
            },
            &config_in(dir.path()),
        )
        .await
        .expect("batch succeeds");

        assert_eq!(
            downloads.map.get("1:2").map(String::as_str),
            Some("/assets/images/key/1-2.png")
        );
        assert_eq!(
            downloads.map.get("1;2").map(String::as_str),
            Some("/assets/images/key/1-2_2.png")
        );
        let colon = std::fs::read(dir.path().join("key").join("1-2.png")).expect("first file");
        let semicolon =
            std::fs::read(dir.path().join("key").join("1-2_2.png")).expect("second file");
        assert_eq!(colon, b"colon");
        assert_eq!(semicolon, b"semicolon");
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_download_recovers_without_holding_up_siblings() {
        let dir = tempdir().expect("tempdir");
        let source = Arc::new(
            FakeSource::new()
                .with_url("1:1", "https://cdn/busy")
                .with_url("1:2", "https://cdn/calm")
                .with_payload("https://cdn/busy", b"busy".to_vec())
                .with_payload("https://cdn/calm", b"calm".to_vec())
                .with_download_failures(
                    "https://cdn/busy",
                    (0..2)
                        .map(|_| TransportError::RateLimited {
                            retry_after_secs: None,
                        })
                        .collect(),
                ),
        );
        let targets = targets(&["1:1", "1:2"]);
        let started = tokio::time::Instant::now();
        let downloads = download_assets(
            source.clone(),
            AssetFetchRequest {
                file_key: "KEY",
                targets: &targets,
                group_label: None,
            },
            &config_in(dir.path()),
        )
        .await
        .expect("batch succeeds");

        assert_eq!(downloads.stored_count(), 2);
        assert_eq!(downloads.records[0].byte_len, Some(4));
        assert_eq!(source.download_count(), 4);
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn a_crashed_download_task_still_reports_its_target() {
        let dir = tempdir().expect("tempdir");
        let source = Arc::new(
            FakeSource::new()
                .with_url("1:1", "https://cdn/boom")
                .with_url("1:2", "https://cdn/fine")
                .with_payload("https://cdn/fine", b"fine".to_vec())
                .with_panicking_download("https://cdn/boom"),
        );
        let targets = targets(&["1:1", "1:2"]);
        let downloads = download_assets(
            source.clone(),
            AssetFetchRequest {
                file_key: "KEY",
                targets: &targets,
                group_label: None,
            },
            &config_in(dir.path()),
        )
        .await
        .expect("batch succeeds");

        assert_eq!(downloads.records.len(), 2);
        assert_eq!(downloads.records[0].node_id, "1:1");
        assert_eq!(
            downloads.records[0].download_url.as_deref(),
            Some("https://cdn/boom")
        );
        assert!(!downloads.records[0].is_stored());
        assert_eq!(downloads.map.keys().collect::<Vec<_>>(), vec!["1:2"]);
    }
}
