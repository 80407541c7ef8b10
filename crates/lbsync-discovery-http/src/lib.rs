// # HTTP Discovery Node Source
//
// This crate fetches the active worker nodes from the discovery service.
//
// ## API
//
// - `GET {base_url}/nodes` with header `X-API-Key: {key}`
// - Response: JSON array of `{"id": "...", "url": "scheme://host:port", ...}`
//
// ## Behavior
//
// - One request per `fetch()`, bounded by the configured timeout
// - No retries: the engine tries again on its next tick
// - Transport errors, timeouts, non-2xx statuses and bodies that are not a
//   JSON array fail the whole fetch
// - Entries that are not objects, lack a string `id` or `url`, or carry a
//   `status` other than `active` are skipped; the rest are returned
//
// ## Security
//
// The API key is never logged and is redacted from `Debug` output.

use async_trait::async_trait;
use lbsync_core::config::DiscoveryConfig;
use lbsync_core::traits::{Node, NodeSource};
use lbsync_core::{Error, NodeParseError, Result};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

/// Header carrying the discovery credential
const API_KEY_HEADER: &str = "X-API-Key";

/// Status value the discovery service uses for live nodes
const ACTIVE_STATUS: &str = "active";

/// Discovery-service node source
pub struct HttpNodeSource {
    /// Full URL of the node listing
    url: String,

    /// Discovery credential
    /// ⚠️ NEVER log this value
    api_key: String,

    /// Request timeout
    timeout: Duration,

    /// HTTP client
    client: reqwest::Client,
}

// Custom Debug implementation that hides the API key
impl std::fmt::Debug for HttpNodeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpNodeSource")
            .field("url", &self.url)
            .field("api_key", &"<REDACTED>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpNodeSource {
    /// Create a node source from discovery configuration
    pub fn new(config: &DiscoveryConfig) -> Result<Self> {
        config.validate()?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: config.nodes_url(),
            api_key: config.api_key.clone(),
            timeout,
            client,
        })
    }

    /// URL this source polls
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Perform the request and return the decoded body
    async fn request_nodes(&self) -> Result<Value> {
        let response = self
            .client
            .get(&self.url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::fetch(format!("Request timed out after {:?}", self.timeout))
                } else {
                    Error::fetch(format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(Error::fetch(format!(
                    "Authentication rejected ({}). Check the discovery API key.",
                    status
                )));
            }
            s if !s.is_success() => {
                return Err(Error::fetch(format!("HTTP error: {}", s)));
            }
            _ => {}
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| Error::fetch(format!("Malformed response body: {}", e)))
    }

    /// Validate a decoded body against the node schema
    ///
    /// Returns the usable nodes and the entries that were rejected.
    pub fn parse_nodes(body: Value) -> Result<(Vec<Node>, Vec<NodeParseError>)> {
        let entries = match body {
            Value::Array(entries) => entries,
            other => {
                return Err(Error::fetch(format!(
                    "Expected a JSON array of nodes, got {}",
                    json_type(&other)
                )));
            }
        };

        let mut nodes = Vec::with_capacity(entries.len());
        let mut rejected = Vec::new();

        for (index, entry) in entries.into_iter().enumerate() {
            match parse_entry(index, &entry) {
                Ok(Some(node)) => nodes.push(node),
                Ok(None) => {}
                Err(e) => rejected.push(e),
            }
        }

        Ok((nodes, rejected))
    }
}

/// Turn one array element into a node; `Ok(None)` for inactive nodes
fn parse_entry(index: usize, entry: &Value) -> std::result::Result<Option<Node>, NodeParseError> {
    let label = entry
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{}", index));

    let Value::Object(fields) = entry else {
        return Err(NodeParseError::new(
            label,
            format!("expected an object, got {}", json_type(entry)),
        ));
    };

    let id = match fields.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(other) => {
            return Err(NodeParseError::new(
                label,
                format!("'id' must be a string, got {}", json_type(other)),
            ));
        }
        None => return Err(NodeParseError::new(label, "missing 'id'")),
    };

    let url = match fields.get("url") {
        Some(Value::String(url)) => url.clone(),
        Some(other) => {
            return Err(NodeParseError::new(
                label,
                format!("'url' must be a string, got {}", json_type(other)),
            ));
        }
        None => return Err(NodeParseError::new(label, "missing 'url'")),
    };

    if let Some(status) = fields.get("status").and_then(Value::as_str)
        && status != ACTIVE_STATUS
    {
        tracing::debug!("Ignoring node {} with status '{}'", id, status);
        return Ok(None);
    }

    Ok(Some(Node { id, url }))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl NodeSource for HttpNodeSource {
    async fn fetch(&self) -> Result<Vec<Node>> {
        tracing::debug!("Fetching nodes from {}", self.url);

        let body = self.request_nodes().await?;
        let (nodes, rejected) = Self::parse_nodes(body)?;

        for e in &rejected {
            tracing::warn!("Discovery returned an unusable entry: {}", e);
        }
        tracing::debug!(
            "Discovery returned {} usable node(s), {} rejected",
            nodes.len(),
            rejected.len()
        );

        Ok(nodes)
    }

    fn source_name(&self) -> &'static str {
        "http"
    }
}
