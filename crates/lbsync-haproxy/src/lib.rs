// # HAProxy Config Applier
//
// This crate puts a patched configuration into service on a local HAProxy.
//
// ## Apply Sequence
//
// 1. Stage the document as `<config>.tmp` next to the live file
// 2. `haproxy -c -f <config>.tmp`; a non-zero exit aborts and removes the
//    staged file, the live file is never touched
// 3. Rename the staged file over the live file (previous content kept as
//    `<config>.bak`)
// 4. Read the running pids (pid file, or `pidof` when none is configured)
// 5. `haproxy -D -f <config> [-p <pidfile>] -sf <pid>...` starts a new
//    process that takes over the listeners while the old ones drain and exit
//
// Every subprocess is spawned with explicit arguments, never through a shell.
//
// ## Dry-Run Mode
//
// When `dry_run` is set the document is staged and validated, the intended
// install is logged, and nothing else happens.

use async_trait::async_trait;
use lbsync_core::config::ProxyConfig;
use lbsync_core::document::ConfigDocument;
use lbsync_core::traits::{ApplyOutcome, ConfigApplier};
use lbsync_core::{Error, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Upper bound for a single haproxy invocation
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest checker output carried into a validation error
const MAX_DIAGNOSTIC_LEN: usize = 2048;

/// Applier that validates with `haproxy -c` and reloads with `-sf`
#[derive(Debug, Clone)]
pub struct HaproxyApplier {
    /// HAProxy executable
    binary: PathBuf,

    /// Pid file written by HAProxy (`-p`), if any
    pid_file: Option<PathBuf>,

    /// Stage and validate only
    dry_run: bool,
}

impl HaproxyApplier {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            pid_file: config.pid_file.clone(),
            dry_run: config.dry_run,
        }
    }

    /// Run the configuration checker against `path`
    pub async fn check(&self, path: &Path) -> Result<()> {
        let mut command = Command::new(&self.binary);
        command
            .arg("-c")
            .arg("-f")
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(COMMAND_TIMEOUT, command.output())
            .await
            .map_err(|_| {
                Error::validation(format!(
                    "{} -c did not finish within {:?}",
                    self.binary.display(),
                    COMMAND_TIMEOUT
                ))
            })?
            .map_err(|e| {
                Error::validation(format!("Failed to run {}: {}", self.binary.display(), e))
            })?;

        if output.status.success() {
            tracing::debug!("{} accepted {}", self.binary.display(), path.display());
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let diagnostics = if stderr.trim().is_empty() {
            stdout.trim()
        } else {
            stderr.trim()
        };

        Err(Error::validation(format!(
            "{} rejected {} ({}): {}",
            self.binary.display(),
            path.display(),
            output.status,
            truncate(diagnostics, MAX_DIAGNOSTIC_LEN)
        )))
    }

    /// Pids of the running HAProxy instances, empty when none are running
    pub async fn running_pids(&self) -> Result<Vec<u32>> {
        match &self.pid_file {
            Some(pid_file) => match tokio::fs::read_to_string(pid_file).await {
                Ok(content) => Ok(parse_pids(&content)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!("Pid file {} not found", pid_file.display());
                    Ok(Vec::new())
                }
                Err(e) => Err(Error::reload(format!(
                    "Failed to read pid file {}: {}",
                    pid_file.display(),
                    e
                ))),
            },
            None => self.pidof().await,
        }
    }

    async fn pidof(&self) -> Result<Vec<u32>> {
        let name = self
            .binary
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| self.binary.as_os_str().to_os_string());

        let output = Command::new("pidof")
            .arg(&name)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::reload(format!("Failed to run pidof: {}", e)))?;

        // pidof exits 1 when no process matches
        if !output.status.success() {
            return Ok(Vec::new());
        }

        Ok(parse_pids(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Arguments for starting a new instance that replaces `pids`
    pub fn reload_args(&self, target: &Path, pids: &[u32]) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-D".into(), "-f".into(), target.into()];

        if let Some(pid_file) = &self.pid_file {
            args.push("-p".into());
            args.push(pid_file.into());
        }

        if !pids.is_empty() {
            args.push("-sf".into());
            args.extend(pids.iter().map(|pid| OsString::from(pid.to_string())));
        }

        args
    }

    /// Start a new instance on `target`, handing over from `pids`
    pub async fn reload(&self, target: &Path, pids: &[u32]) -> Result<ApplyOutcome> {
        if pids.is_empty() {
            tracing::info!("No running HAProxy found, starting a new instance");
        } else {
            tracing::debug!("Handing over from pid(s) {:?}", pids);
        }

        let mut command = Command::new(&self.binary);
        command
            .args(self.reload_args(target, pids))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            // Daemonized children inherit pipes, so stderr goes straight to ours
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let status = tokio::time::timeout(COMMAND_TIMEOUT, command.status())
            .await
            .map_err(|_| {
                Error::reload(format!(
                    "{} did not return within {:?}",
                    self.binary.display(),
                    COMMAND_TIMEOUT
                ))
            })?
            .map_err(|e| Error::reload(format!("Failed to run {}: {}", self.binary.display(), e)))?;

        if !status.success() {
            return Err(Error::reload(format!(
                "{} exited with {}",
                self.binary.display(),
                status
            )));
        }

        if pids.is_empty() {
            Ok(ApplyOutcome::Started)
        } else {
            Ok(ApplyOutcome::Reloaded {
                replaced_pids: pids.to_vec(),
            })
        }
    }
}

#[async_trait]
impl ConfigApplier for HaproxyApplier {
    async fn apply(&self, document: &ConfigDocument, target: &Path) -> Result<ApplyOutcome> {
        let staged = document.stage(target).await?;

        if let Err(e) = self.check(staged.path()).await {
            staged.discard().await;
            return Err(e);
        }

        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would install {} ({} lines) and reload HAProxy",
                target.display(),
                document.len()
            );
            staged.discard().await;
            return Ok(ApplyOutcome::DryRun);
        }

        staged.commit().await?;

        let pids = self.running_pids().await?;
        self.reload(target, &pids).await
    }

    fn applier_name(&self) -> &'static str {
        "haproxy"
    }
}

/// Whitespace-separated pids; anything that is not a positive integer is ignored
fn parse_pids(content: &str) -> Vec<u32> {
    content
        .split_whitespace()
        .filter_map(|token| match token.parse::<u32>() {
            Ok(pid) if pid > 0 => Some(pid),
            _ => {
                tracing::warn!("Ignoring invalid pid '{}'", token);
                None
            }
        })
        .collect()
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
