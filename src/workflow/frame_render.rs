use tracing::{info, warn};

use crate::workflow::config::{FrameRenderConfig, FRAME_SCALES};
use crate::workflow::errors::TransportError;
use crate::workflow::retry::retry_transient;
use crate::workflow::source::DesignSource;
use crate::workflow::types::FrameRender;

/// Rasterizes one whole frame, stepping down through `config.scales` while
/// the payload is larger than `config.max_bytes`. The last scale is kept
/// whatever its size. Each scale attempt (resolve + download) has its own
/// retry budget.
pub async fn fetch_frame_render(
    source: &dyn DesignSource,
    file_key: &str,
    node_id: &str,
    config: &FrameRenderConfig,
) -> Result<FrameRender, TransportError> {
    let scales: &[f32] = if config.scales.is_empty() {
        &FRAME_SCALES
    } else {
        &config.scales
    };
    let ids = [node_id.to_owned()];

    for (index, &scale) in scales.iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(config.pause_between_scales).await;
        }

        let bytes = retry_transient(&config.retry, "frame render", || {
            render_attempt(source, file_key, node_id, &ids, scale, config)
        })
        .await?;

        let is_last = index + 1 == scales.len();
        if bytes.len() <= config.max_bytes || is_last {
            if bytes.len() > config.max_bytes {
                warn!(
                    node = node_id,
                    scale,
                    bytes = bytes.len(),
                    "frame still exceeds size ceiling at the smallest scale; keeping it"
                );
            }
            info!(node = node_id, scale, bytes = bytes.len(), "frame rendered");
            return Ok(FrameRender {
                node_id: node_id.to_owned(),
                scale,
                bytes,
            });
        }

        warn!(
            node = node_id,
            scale,
            bytes = bytes.len(),
            max_bytes = config.max_bytes,
            "frame render too large; retrying at a lower scale"
        );
    }

    Err(TransportError::MissingRender {
        node_id: node_id.to_owned(),
    })
}

async fn render_attempt(
    source: &dyn DesignSource,
    file_key: &str,
    node_id: &str,
    ids: &[String],
    scale: f32,
    config: &FrameRenderConfig,
) -> Result<Vec<u8>, TransportError> {
    let attempt = async {
        let urls = source.resolve_image_urls(file_key, ids, scale).await?;
        let url = urls
            .get(node_id)
            .cloned()
            .flatten()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| TransportError::MissingRender {
                node_id: node_id.to_owned(),
            })?;
        source.download(&url).await
    };
    tokio::time::timeout(config.attempt_timeout, attempt)
        .await
        .unwrap_or_else(|_| Err(TransportError::Timeout))
}
