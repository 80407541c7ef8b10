//! Test doubles and common utilities for engine contract tests

#![allow(dead_code)]

use lbsync_core::traits::{ApplyOutcome, ConfigApplier, Node, NodeSource};
use lbsync_core::{ConfigDocument, Error, LbSyncConfig, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A node source that replays scripted responses, repeating the last one
pub struct ScriptedNodeSource {
    responses: Mutex<VecDeque<std::result::Result<Vec<Node>, String>>>,
    last: Mutex<std::result::Result<Vec<Node>, String>>,
    fetch_count: Arc<AtomicUsize>,
}

impl ScriptedNodeSource {
    pub fn new(responses: Vec<std::result::Result<Vec<Node>, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            last: Mutex::new(Ok(Vec::new())),
            fetch_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Always answer with the same nodes
    pub fn fixed(nodes: Vec<Node>) -> Self {
        Self::new(vec![Ok(nodes)])
    }

    /// Always fail like a timed-out request
    pub fn failing() -> Self {
        Self::new(vec![Err("request timed out".to_string())])
    }

    /// Shared handle to the fetch counter
    pub fn fetch_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.fetch_count)
    }
}

#[async_trait::async_trait]
impl NodeSource for ScriptedNodeSource {
    async fn fetch(&self) -> Result<Vec<Node>> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);

        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.responses.lock().unwrap().pop_front() {
            *last = next;
        }
        last.clone().map_err(Error::fetch)
    }

    fn source_name(&self) -> &'static str {
        "scripted"
    }
}

/// Shared view of what a [`RecordingApplier`] saw
#[derive(Clone, Default)]
pub struct ApplierLog {
    pub calls: Arc<AtomicUsize>,
    pub applied: Arc<Mutex<Vec<String>>>,
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
}

impl ApplierLog {
    /// Every apply call, successful or not
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn apply_count(&self) -> usize {
        self.applied.lock().unwrap().len()
    }

    pub fn last_applied(&self) -> Option<String> {
        self.applied.lock().unwrap().last().cloned()
    }
}

/// An applier that installs documents atomically and records them
pub struct RecordingApplier {
    log: ApplierLog,
    fail_with: Option<String>,
    reload_failures: AtomicUsize,
    delay: Duration,
}

impl RecordingApplier {
    pub fn new() -> (Self, ApplierLog) {
        let log = ApplierLog::default();
        (
            Self {
                log: log.clone(),
                fail_with: None,
                reload_failures: AtomicUsize::new(0),
                delay: Duration::ZERO,
            },
            log,
        )
    }

    /// Reject every document like a failing `haproxy -c`
    pub fn rejecting(message: &str) -> (Self, ApplierLog) {
        let (mut applier, log) = Self::new();
        applier.fail_with = Some(message.to_string());
        (applier, log)
    }

    /// Install the document, then fail the reload for the first `times` calls
    pub fn failing_reload(times: usize) -> (Self, ApplierLog) {
        let (applier, log) = Self::new();
        applier.reload_failures.store(times, Ordering::SeqCst);
        (applier, log)
    }

    /// Take `delay` per apply, to observe overlap
    pub fn slow(delay: Duration) -> (Self, ApplierLog) {
        let (mut applier, log) = Self::new();
        applier.delay = delay;
        (applier, log)
    }
}

#[async_trait::async_trait]
impl ConfigApplier for RecordingApplier {
    async fn apply(&self, document: &ConfigDocument, target: &Path) -> Result<ApplyOutcome> {
        self.log.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.log.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = match &self.fail_with {
            Some(message) => Err(Error::validation(message.clone())),
            None => {
                document.write_atomic(target).await?;
                let fail_reload = self
                    .reload_failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if fail_reload {
                    Err(Error::reload("haproxy exited with exit status: 1"))
                } else {
                    self.log.applied.lock().unwrap().push(document.to_text());
                    Ok(ApplyOutcome::Started)
                }
            }
        };

        self.log.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn applier_name(&self) -> &'static str {
        "recording"
    }
}

/// Config used by the spec scenario
pub const SCENARIO_CONFIG: &str = "global\n    daemon\n\nbackend ws_nodes\n    balance roundrobin\n    server old 10.0.0.1:80 check\nbackend other\n    server x 10.0.0.9:80\n";

/// Write `content` as haproxy.cfg in `dir`
pub fn write_config(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("haproxy.cfg");
    std::fs::write(&path, content).expect("config written");
    path
}

/// Helper to create a minimal LbSyncConfig for testing
pub fn minimal_config(config_path: &Path) -> LbSyncConfig {
    let mut config = LbSyncConfig::new("test-key");
    config.proxy.config_path = config_path.to_path_buf();
    config.proxy.pid_file = None;
    config.engine.interval_secs = 1;
    config
}
