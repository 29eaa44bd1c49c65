use std::collections::BTreeMap;

use futures::future::BoxFuture;

use crate::workflow::errors::TransportError;
use crate::workflow::types::DesignNode;

/// Node id -> export URL. `None` means the upstream answered but could not
/// render that node.
pub type ImageUrls = BTreeMap<String, Option<String>>;

/// The three upstream capabilities the pipeline consumes.
///
/// Futures are boxed so the trait stays object safe; the pipeline holds an
/// `Arc<dyn DesignSource>` and hands clones to spawned download tasks.
pub trait DesignSource: Send + Sync {
    fn fetch_node_tree<'a>(
        &'a self,
        file_key: &'a str,
        node_id: &'a str,
    ) -> BoxFuture<'a, Result<DesignNode, TransportError>>;

    /// One batched request for every id in `node_ids`, rendered as PNG at
    /// `scale`.
    fn resolve_image_urls<'a>(
        &'a self,
        file_key: &'a str,
        node_ids: &'a [String],
        scale: f32,
    ) -> BoxFuture<'a, Result<ImageUrls, TransportError>>;

    fn download<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, TransportError>>;
}

/// `2.0` -> `"2"`, `0.5` -> `"0.5"`.
pub fn format_scale(scale: f32) -> String {
    if scale.fract() == 0.0 {
        format!("{scale:.0}")
    } else {
        let text = format!("{scale:.3}");
        text.trim_end_matches('0').trim_end_matches('.').to_owned()
    }
}
