// # lbsync-core
//
// Core library for the lbsync backend reconciler.
//
// ## Architecture Overview
//
// This library keeps a load balancer's backend member list in step with the
// active worker nodes reported by a discovery service:
// - **NodeSource**: Trait for fetching the current active-node list
// - **ConfigPatcher**: Rewrites one named backend section of a config document
// - **ConfigApplier**: Trait for validating, installing and reloading a config
// - **ReconcileEngine**: Timer-driven loop that runs fetch → patch → apply
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from implementations
// 2. **Region Replace**: Only the owned backend section changes, every other
//    line of the file is carried over byte for byte
// 3. **Cycle Isolation**: A failed cycle is logged and the next tick retries
// 4. **Library-First**: All core functionality can be used as a library

pub mod traits;
pub mod engine;
pub mod patcher;
pub mod document;
pub mod config;
pub mod error;

// Re-export core types for convenience
pub use traits::{NodeSource, ConfigApplier, ApplyOutcome, Node};
pub use engine::{ReconcileEngine, EngineEvent, CycleOutcome, CycleStage};
pub use patcher::{ConfigPatcher, PatchOutcome, ServerLine};
pub use document::ConfigDocument;
pub use config::{LbSyncConfig, DiscoveryConfig, ProxyConfig, PatcherConfig, EngineConfig};
pub use error::{Error, NodeParseError, Result};
