//! Reconciliation engine
//!
//! The ReconcileEngine is responsible for:
//! - Fetching the active-node list via NodeSource
//! - Patching the owned backend section of the config file
//! - Handing changed configs to the ConfigApplier
//! - Repeating on a fixed interval until shutdown
//!
//! ## Architecture
//!
//! ```text
//!  tick ──► ┌─────────────┐   nodes   ┌───────────────┐  document  ┌───────────────┐
//!           │ NodeSource  │──────────►│ ConfigPatcher │───────────►│ ConfigApplier │
//!           └─────────────┘           └───────────────┘            └───────────────┘
//!                  │                          │                            │
//!                  └──────────────────────────┴────────────────────────────┘
//!                                             ▼
//!                                   EngineEvent / CycleOutcome
//! ```
//!
//! ## Cycle States
//!
//! The engine is `Idle` between ticks and `Running` during a cycle. Cycles
//! never overlap: the next tick is only taken after the current cycle ends,
//! and missed ticks are delayed rather than replayed. Every failure ends the
//! cycle, never the engine.
//!
//! A cycle is only skipped when the file on disk already equals both the
//! patched document and the last document the applier accepted. A fresh
//! engine, or one whose last apply failed, always applies.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::LbSyncConfig;
use crate::document::ConfigDocument;
use crate::error::{Error, Result};
use crate::patcher::ConfigPatcher;
use crate::traits::{ApplyOutcome, ConfigApplier, NodeSource};

/// Stage of a cycle, used to attribute failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    Fetch,
    Read,
    Patch,
    Apply,
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleStage::Fetch => "fetch",
            CycleStage::Read => "read",
            CycleStage::Patch => "patch",
            CycleStage::Apply => "apply",
        };
        f.write_str(name)
    }
}

/// How a single cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Discovery returned no nodes; configuration untouched
    NoNodes,

    /// Patched document equals the file on disk; nothing applied
    Unchanged { servers: usize },

    /// New configuration installed
    Applied {
        servers: usize,
        skipped: usize,
        outcome: ApplyOutcome,
    },

    /// A stage failed; the cycle was abandoned
    Failed { stage: CycleStage, error: String },
}

/// Events emitted by the ReconcileEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started
    Started {
        backend: String,
        interval_secs: u64,
    },

    /// A cycle began
    CycleStarted { cycle: u64 },

    /// Discovery answered
    NodesFetched { count: usize },

    /// A node could not be rendered and was left out
    NodeSkipped { node: String, reason: String },

    /// Nothing to apply
    ConfigUnchanged { servers: usize },

    /// New configuration applied
    ConfigApplied {
        servers: usize,
        outcome: ApplyOutcome,
        at: DateTime<Utc>,
    },

    /// Cycle abandoned
    CycleFailed { stage: CycleStage, error: String },

    /// Engine stopped
    Stopped { reason: String },
}

/// Timer-driven reconciler
///
/// ## Lifecycle
///
/// 1. Create with [`ReconcileEngine::new()`]
/// 2. Start with [`ReconcileEngine::run()`] (stops on ctrl-c) or
///    [`ReconcileEngine::run_until()`] (stops when a future resolves)
/// 3. Individual cycles can be driven directly with
///    [`ReconcileEngine::run_cycle()`]
pub struct ReconcileEngine {
    /// Source of the active-node list
    node_source: Box<dyn NodeSource>,

    /// Installs and reloads patched configs
    applier: Box<dyn ConfigApplier>,

    /// Renders the owned backend section
    patcher: ConfigPatcher,

    /// File being reconciled
    config_path: PathBuf,

    /// Name of the owned backend section
    backend: String,

    /// Time between cycle starts
    interval: Duration,

    /// Number of cycles started so far
    cycles: AtomicU64,

    /// Last document the applier accepted; cleared on apply failure
    last_applied: RwLock<Option<ConfigDocument>>,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl ReconcileEngine {
    /// Create a new engine
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        node_source: Box<dyn NodeSource>,
        applier: Box<dyn ConfigApplier>,
        config: LbSyncConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);

        let engine = Self {
            node_source,
            applier,
            patcher: ConfigPatcher::new(config.patcher),
            config_path: config.proxy.config_path,
            backend: config.proxy.backend,
            interval: Duration::from_secs(config.engine.interval_secs),
            cycles: AtomicU64::new(0),
            last_applied: RwLock::new(None),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Run until ctrl-c
    pub async fn run(&self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run cycles on every tick until `shutdown` resolves
    ///
    /// The first cycle starts immediately. Shutdown is observed between
    /// cycles; a cycle in progress always runs to completion.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.emit_event(EngineEvent::Started {
            backend: self.backend.clone(),
            interval_secs: self.interval.as_secs(),
        });
        info!(
            "Reconciling 'backend {}' in {} every {:?} using {} → {}",
            self.backend,
            self.config_path.display(),
            self.interval,
            self.node_source.source_name(),
            self.applier.applier_name()
        );

        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(timer);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                // Shutdown wins over a tick that is due at the same time
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    self.emit_event(EngineEvent::Stopped {
                        reason: "Shutdown signal".to_string(),
                    });
                    break;
                }

                Some(_) = ticks.next() => {
                    self.run_cycle().await;
                }
            }
        }

        Ok(())
    }

    /// Run one fetch → patch → apply cycle
    ///
    /// Never fails: errors are logged, reported as events and folded into
    /// the returned [`CycleOutcome`].
    pub async fn run_cycle(&self) -> CycleOutcome {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        self.emit_event(EngineEvent::CycleStarted { cycle });

        let span = info_span!("cycle", cycle, backend = %self.backend);
        match self.reconcile().instrument(span).await {
            Ok(outcome) => outcome,
            Err((stage, e)) => {
                if stage == CycleStage::Fetch {
                    warn!("Cycle {}: failed to fetch nodes: {}", cycle, e);
                } else {
                    error!("Cycle {}: {} failed: {}", cycle, stage, e);
                }
                let error = e.to_string();
                self.emit_event(EngineEvent::CycleFailed {
                    stage,
                    error: error.clone(),
                });
                CycleOutcome::Failed { stage, error }
            }
        }
    }

    /// Number of cycles started so far
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    async fn reconcile(&self) -> std::result::Result<CycleOutcome, (CycleStage, Error)> {
        let nodes = self
            .node_source
            .fetch()
            .await
            .map_err(|e| (CycleStage::Fetch, e))?;
        self.emit_event(EngineEvent::NodesFetched { count: nodes.len() });

        if nodes.is_empty() {
            warn!("No active nodes found, leaving configuration untouched");
            return Ok(CycleOutcome::NoNodes);
        }
        debug!("Fetched {} node(s)", nodes.len());

        let current = ConfigDocument::read(&self.config_path)
            .await
            .map_err(|e| (CycleStage::Read, e))?;

        let patch = self
            .patcher
            .patch(&current, &self.backend, &nodes)
            .map_err(|e| (CycleStage::Patch, e))?;

        for skipped in &patch.skipped {
            self.emit_event(EngineEvent::NodeSkipped {
                node: skipped.node.clone(),
                reason: skipped.reason.clone(),
            });
        }
        if patch.servers.is_empty() {
            warn!(
                "None of the {} node(s) could be parsed, 'backend {}' will have no servers",
                nodes.len(),
                self.backend
            );
        }

        let servers = patch.servers.len();
        let skipped = patch.skipped.len();

        let up_to_date = patch.document == current
            && self.last_applied.read().await.as_ref() == Some(&current);
        if up_to_date {
            debug!("Configuration already up to date ({} servers)", servers);
            self.emit_event(EngineEvent::ConfigUnchanged { servers });
            return Ok(CycleOutcome::Unchanged { servers });
        }

        let outcome = match self.applier.apply(&patch.document, &self.config_path).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // The applier may have installed the file before failing
                *self.last_applied.write().await = None;
                return Err((CycleStage::Apply, e));
            }
        };

        info!(
            "Updated 'backend {}' with {} server(s) ({} skipped): {:?}",
            self.backend, servers, skipped, outcome
        );
        *self.last_applied.write().await = Some(patch.document);
        self.emit_event(EngineEvent::ConfigApplied {
            servers,
            outcome: outcome.clone(),
            at: Utc::now(),
        });

        Ok(CycleOutcome::Applied {
            servers,
            skipped,
            outcome,
        })
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        // Never block a cycle on a slow or absent consumer
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
