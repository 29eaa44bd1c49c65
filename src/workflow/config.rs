use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::workflow::retry::RetryPolicy;

pub const DEFAULT_ASSET_ROOT: &str = "public/assets/images";
pub const DEFAULT_PUBLIC_PREFIX: &str = "/assets/images";
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 8;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 25;
pub const DEFAULT_EXPORT_SCALE: f32 = 2.0;

pub const FRAME_SCALES: [f32; 3] = [2.0, 1.0, 0.5];
pub const FRAME_SIZE_CEILING_BYTES: usize = 3 * 1024 * 1024;

const TOKEN_ENV_VARS: [&str; 2] = ["FIGMA_TOKEN", "FIGMA_ACCESS_TOKEN"];

/// Knobs for the asset fetcher and the frame renderer.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Filesystem directory under which group folders are created.
    pub asset_root: PathBuf,
    /// Web path the asset root is served at.
    pub public_prefix: String,
    pub max_concurrent_downloads: usize,
    pub export_scale: f32,
    pub batch_retry: RetryPolicy,
    pub frame: FrameRenderConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            asset_root: PathBuf::from(DEFAULT_ASSET_ROOT),
            public_prefix: DEFAULT_PUBLIC_PREFIX.to_owned(),
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            export_scale: DEFAULT_EXPORT_SCALE,
            batch_retry: RetryPolicy::ASSET_BATCH,
            frame: FrameRenderConfig::default(),
        }
    }
}

impl FetchConfig {
    pub fn download_permits(&self) -> usize {
        self.max_concurrent_downloads.max(1)
    }
}

#[derive(Debug, Clone)]
pub struct FrameRenderConfig {
    /// Tried in order; the last one is accepted whatever its size.
    pub scales: Vec<f32>,
    pub max_bytes: usize,
    pub retry: RetryPolicy,
    pub pause_between_scales: Duration,
    /// Upper bound on one resolve + download attempt.
    pub attempt_timeout: Duration,
}

impl Default for FrameRenderConfig {
    fn default() -> Self {
        Self {
            scales: FRAME_SCALES.to_vec(),
            max_bytes: FRAME_SIZE_CEILING_BYTES,
            retry: RetryPolicy::FRAME_RENDER,
            pause_between_scales: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(120),
        }
    }
}

/// First non-empty of `FIGMA_TOKEN`, `FIGMA_ACCESS_TOKEN`.
pub fn token_from_env() -> Option<String> {
    TOKEN_ENV_VARS.iter().find_map(|name| {
        env::var(name)
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    })
}
