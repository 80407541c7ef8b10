// # Config Applier Trait
//
// Defines the interface for putting a patched configuration into service.
//
// ## Implementations
//
// - HAProxy: `lbsync-haproxy` crate
//
// ## Apply Sequence
//
// 1. Stage the document next to the target file
// 2. Validate it with the proxy's own checker
// 3. Atomically replace the target file
// 4. Ask the running proxy for a graceful reload

use async_trait::async_trait;
use std::path::Path;

use crate::document::ConfigDocument;

/// Result of a successful apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Config installed and the running proxy asked to hand over
    Reloaded {
        /// Pids of the instances told to finish and exit
        replaced_pids: Vec<u32>,
    },
    /// Config installed, no running proxy was found so a fresh one was started
    Started,
    /// Config validated but not installed (dry-run)
    DryRun,
}

/// Trait for config applier implementations
///
/// # Contract
///
/// - Must never leave a partially written file at `target`
/// - A rejected configuration returns [`Error::Validation`](crate::Error::Validation)
/// - A failed reload dispatch returns [`Error::Reload`](crate::Error::Reload)
/// - "No running proxy" is not a failure
/// - No retries: the engine tries again on its next tick
#[async_trait]
pub trait ConfigApplier: Send + Sync {
    /// Validate, install and reload `document` as `target`
    async fn apply(&self, document: &ConfigDocument, target: &Path) -> crate::Result<ApplyOutcome>;

    /// Short name used in logs
    fn applier_name(&self) -> &'static str;
}
