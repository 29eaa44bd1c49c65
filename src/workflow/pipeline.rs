//! Runs the extraction passes over one design tree and assembles the four
//! outputs: token summary, component summary, asset map and annotated tree.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::workflow::annotate::annotate_in_place;
use crate::workflow::assets::{
    download_assets, locate_image_nodes, AssetDownloads, AssetFetchRequest,
};
use crate::workflow::components::{detect_components, ComponentDetectionSummary};
use crate::workflow::config::FetchConfig;
use crate::workflow::figma_client::decode_tree_document;
use crate::workflow::source::DesignSource;
use crate::workflow::tokens::{extract_design_tokens, DesignTokenSummary};
use crate::workflow::types::{AssetMap, AssetTarget, DesignNode};
use crate::workflow::walker::count_nodes;

pub const RAW_SNAPSHOT_FILE: &str = "figma_raw_data.json";
pub const PROCESSED_SNAPSHOT_FILE: &str = "figma_processed_data.json";

#[derive(Debug, Clone)]
pub struct PipelineRequest {
    /// `None` when the upstream tree could not be obtained.
    pub tree: Option<DesignNode>,
    pub file_key: String,
    pub group_label: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutput {
    pub token_summary: DesignTokenSummary,
    pub component_summary: ComponentDetectionSummary,
    pub asset_map: AssetMap,
    pub annotated_tree: Option<DesignNode>,
}

impl PipelineOutput {
    /// Output for a run without a tree: empty summaries, no assets, no tree.
    pub fn degraded() -> Self {
        Self::default()
    }

    pub fn is_degraded(&self) -> bool {
        self.annotated_tree.is_none()
    }
}

/// The offline passes: everything except downloads and annotation.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeAnalysis {
    pub node_count: usize,
    pub token_summary: DesignTokenSummary,
    pub component_summary: ComponentDetectionSummary,
    pub image_assets: Vec<AssetTarget>,
}

pub fn analyze_tree(tree: Option<&DesignNode>) -> TreeAnalysis {
    TreeAnalysis {
        node_count: count_nodes(tree),
        token_summary: extract_design_tokens(tree),
        component_summary: detect_components(tree),
        image_assets: locate_image_nodes(tree),
    }
}

pub enum PipelineEvent<'a> {
    TreeLoaded(&'a DesignNode),
    TokensExtracted(&'a DesignTokenSummary),
    ComponentsDetected(&'a ComponentDetectionSummary),
    AssetsDownloaded(&'a AssetDownloads),
    TreeAnnotated(&'a DesignNode),
}

/// Hook for inspecting intermediate results. Observers must not fail the
/// run; they log their own errors.
pub trait PipelineObserver: Send + Sync {
    fn observe(&self, event: PipelineEvent<'_>);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {
    fn observe(&self, _event: PipelineEvent<'_>) {}
}

/// Writes the raw and annotated trees as pretty JSON into `dir`.
#[derive(Debug, Clone)]
pub struct SnapshotObserver {
    dir: PathBuf,
}

impl SnapshotObserver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn write_snapshot(&self, file_name: &str, tree: &DesignNode) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create dump directory {}", self.dir.display()))?;
        let path = self.dir.join(file_name);
        let json = serde_json::to_string_pretty(tree).context("failed to serialize snapshot")?;
        fs::write(&path, json)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
        Ok(path)
    }
}

impl PipelineObserver for SnapshotObserver {
    fn observe(&self, event: PipelineEvent<'_>) {
        let (file_name, tree) = match event {
            PipelineEvent::TreeLoaded(tree) => (RAW_SNAPSHOT_FILE, tree),
            PipelineEvent::TreeAnnotated(tree) => (PROCESSED_SNAPSHOT_FILE, tree),
            _ => return,
        };
        match self.write_snapshot(file_name, tree) {
            Ok(path) => info!(path = %path.display(), "wrote debug snapshot"),
            Err(error) => warn!(error = %format!("{error:#}"), "failed to write debug snapshot"),
        }
    }
}

/// Fetches the subtree, or logs the failure and returns `None` so the run
/// can continue in degraded mode.
pub async fn fetch_tree_or_degrade(
    source: &dyn DesignSource,
    file_key: &str,
    node_id: &str,
) -> Option<DesignNode> {
    match source.fetch_node_tree(file_key, node_id).await {
        Ok(tree) => Some(tree),
        Err(error) => {
            warn!(file_key, node_id, %error, "design tree unavailable");
            None
        }
    }
}

/// Decodes a tree from JSON text. Malformed input yields `None`.
pub fn parse_design_tree(raw: &str) -> Option<DesignNode> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(error) => {
            warn!(%error, "design tree is not valid JSON");
            return None;
        }
    };
    match decode_tree_document(value, None) {
        Ok(tree) => Some(tree),
        Err(error) => {
            warn!(%error, "design tree does not have the expected shape");
            None
        }
    }
}

pub async fn run_pipeline(
    source: Arc<dyn DesignSource>,
    request: PipelineRequest,
    config: &FetchConfig,
    observer: &dyn PipelineObserver,
) -> PipelineOutput {
    let Some(mut tree) = request.tree else {
        warn!(file_key = %request.file_key, "no design tree; producing degraded output");
        return PipelineOutput::degraded();
    };
    info!(nodes = count_nodes(Some(&tree)), "design tree loaded");
    observer.observe(PipelineEvent::TreeLoaded(&tree));

    let analysis = analyze_tree(Some(&tree));
    observer.observe(PipelineEvent::TokensExtracted(&analysis.token_summary));
    observer.observe(PipelineEvent::ComponentsDetected(
        &analysis.component_summary,
    ));

    let downloads = match download_assets(
        source,
        AssetFetchRequest {
            file_key: &request.file_key,
            targets: &analysis.image_assets,
            group_label: request.group_label.as_deref(),
        },
        config,
    )
    .await
    {
        Ok(downloads) => downloads,
        Err(error) => {
            warn!(%error, "image export failed; continuing without local assets");
            AssetDownloads::default()
        }
    };
    observer.observe(PipelineEvent::AssetsDownloaded(&downloads));

    annotate_in_place(&mut tree, &downloads.map);
    observer.observe(PipelineEvent::TreeAnnotated(&tree));

    PipelineOutput {
        token_summary: analysis.token_summary,
        component_summary: analysis.component_summary,
        asset_map: downloads.map,
        annotated_tree: Some(tree),
    }
}
