//! Core traits for lbsync
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`NodeSource`]: Fetch the active-node list from a discovery service
//! - [`ConfigApplier`]: Validate, install and reload a patched configuration

pub mod node_source;
pub mod config_applier;

pub use node_source::{NodeSource, Node};
pub use config_applier::{ConfigApplier, ApplyOutcome};
