// # Node Source Trait
//
// Defines the interface for fetching the set of active worker nodes.
//
// ## Implementations
//
// - HTTP discovery service: `lbsync-discovery-http` crate
//
// ## Usage
//
// ```rust,ignore
// use lbsync_core::NodeSource;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let source = /* NodeSource implementation */;
//
//     for node in source.fetch().await? {
//         println!("{} -> {}", node.id, node.url);
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An active worker node as reported by discovery
///
/// `id` becomes the proxy server name, `url` is `scheme://host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    /// Unique node id
    pub id: String,
    /// Address the proxy should forward to
    pub url: String,
}

impl Node {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }
}

/// Trait for node source implementations
///
/// A node source performs exactly one lookup per call.
///
/// # Contract
///
/// - Transport errors, timeouts, non-success statuses and payloads that are
///   not a node list return [`Error::Fetch`](crate::Error::Fetch)
/// - Individual malformed entries are skipped (and logged), they do not fail
///   the whole fetch
/// - No retries: the engine tries again on its next tick
///
/// Implementations must be thread-safe and usable across async tasks.
#[async_trait]
pub trait NodeSource: Send + Sync {
    /// Fetch the current list of active nodes
    async fn fetch(&self) -> crate::Result<Vec<Node>>;

    /// Short name used in logs
    fn source_name(&self) -> &'static str;
}
