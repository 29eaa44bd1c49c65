use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::workflow::errors::TransportError;
use crate::workflow::source::{format_scale, DesignSource, ImageUrls};
use crate::workflow::types::DesignNode;

pub const FIGMA_API_BASE: &str = "https://api.figma.com/v1";

#[derive(Debug, Clone)]
pub struct FigmaClient {
    http: Client,
    token: String,
    api_base: String,
}

impl FigmaClient {
    pub fn new(http: Client, token: String) -> Self {
        Self {
            http,
            token,
            api_base: FIGMA_API_BASE.to_owned(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_owned();
        self
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, TransportError> {
        debug!(path, "calling Figma API");
        let response = self
            .http
            .get(format!("{}{path}", self.api_base))
            .header("X-Figma-Token", &self.token)
            .query(query)
            .send()
            .await?;
        let response = check_status(response, path)?;
        Ok(response.json::<T>().await?)
    }
}

pub fn build_http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder().no_proxy().timeout(timeout).build()
}

fn check_status(response: Response, resource: &str) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());
    Err(TransportError::from_status(
        status.as_u16(),
        retry_after,
        resource,
    ))
}

#[derive(Debug, Deserialize)]
struct FigmaImageResponse {
    #[serde(default)]
    err: Option<String>,
    #[serde(default)]
    images: BTreeMap<String, Option<String>>,
}

impl DesignSource for FigmaClient {
    fn fetch_node_tree<'a>(
        &'a self,
        file_key: &'a str,
        node_id: &'a str,
    ) -> BoxFuture<'a, Result<DesignNode, TransportError>> {
        async move {
            let response: Value = self
                .get_json(
                    &format!("/files/{file_key}/nodes"),
                    &[("ids", node_id.to_owned())],
                )
                .await?;
            if let Some(error) = response.get("err").and_then(Value::as_str) {
                return Err(TransportError::Upstream(error.to_owned()));
            }
            decode_tree_document(response, Some(node_id))
        }
        .boxed()
    }

    fn resolve_image_urls<'a>(
        &'a self,
        file_key: &'a str,
        node_ids: &'a [String],
        scale: f32,
    ) -> BoxFuture<'a, Result<ImageUrls, TransportError>> {
        async move {
            let response: FigmaImageResponse = self
                .get_json(
                    &format!("/images/{file_key}"),
                    &[
                        ("ids", node_ids.join(",")),
                        ("format", "png".to_owned()),
                        ("scale", format_scale(scale)),
                        ("use_absolute_bounds", "true".to_owned()),
                    ],
                )
                .await?;
            if let Some(error) = response.err {
                return Err(TransportError::Upstream(error));
            }
            Ok(response.images)
        }
        .boxed()
    }

    fn download<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, TransportError>> {
        async move {
            let response = self.http.get(url).send().await?;
            let response = check_status(response, url)?;
            Ok(response.bytes().await?.to_vec())
        }
        .boxed()
    }
}

/// Accepts a `/files/{key}/nodes` response, a `{ "document": .. }` wrapper,
/// or a bare node. For a nodes response the entry for `node_id` is chosen,
/// else the first non-null entry.
pub fn decode_tree_document(
    mut value: Value,
    node_id: Option<&str>,
) -> Result<DesignNode, TransportError> {
    if let Some(Value::Object(mut nodes)) = value.get_mut("nodes").map(Value::take) {
        let wanted = node_id.and_then(|id| nodes.remove(id));
        let entry = match wanted {
            Some(entry) if !entry.is_null() => entry,
            _ => nodes
                .into_iter()
                .map(|(_, entry)| entry)
                .find(|entry| !entry.is_null())
                .ok_or_else(|| {
                    TransportError::NotFound(node_id.unwrap_or("nodes").to_owned())
                })?,
        };
        value = entry;
    }
    if let Some(document) = value.get_mut("document").map(Value::take) {
        value = document;
    }
    Ok(serde_json::from_value(value)?)
}

pub fn parse_figma_file_key(input: &str) -> Option<String> {
    parse_figma_file_context(input).map(|(file_key, _)| file_key)
}

/// File key plus the `node-id` query parameter, if any, from a Figma URL.
/// A bare token without slashes is taken as the key itself.
pub fn parse_figma_file_context(input: &str) -> Option<(String, Option<String>)> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    if !trimmed.contains("://") && !trimmed.contains('/') {
        return Some((trimmed.to_owned(), None));
    }

    let url = Url::parse(trimmed).ok()?;
    let path_parts = url.path_segments()?.collect::<Vec<_>>();
    let markers = ["file", "design", "proto"];
    let marker_index = path_parts
        .iter()
        .position(|segment| markers.iter().any(|marker| marker == segment))?;
    let file_key = path_parts
        .get(marker_index + 1)
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.to_string())?;

    let node_id = url
        .query_pairs()
        .find_map(|(key, value)| (key == "node-id").then_some(value.to_string()))
        .and_then(normalize_node_id);

    Some((file_key, node_id))
}

/// URLs carry `12-44`; the API expects `12:44`.
pub fn normalize_node_id(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains(':') {
        return Some(trimmed.to_owned());
    }
    if trimmed.contains('-') {
        return Some(trimmed.replacen('-', ":", 1));
    }
    Some(trimmed.to_owned())
}
