//! Pipeline orchestration.
//!
//! A single thread drives the stage sequence; stages are strictly sequential
//! because later stages depend on earlier stages' committed state. The run
//! itself is a small state machine: validation first (fail fast, never fail
//! slow mid-pipeline), then the stage walk, ending in completion, suspension,
//! or abort. Suspension persists nothing extra: the pending items sit in the
//! pre-suspend status, so resuming is simply re-invoking the orchestrator.

use chrono::{DateTime, Utc};
use postforge_common::Result;
use postforge_db::pool::get_conn;
use postforge_db::queries::settings;
use tracing::{error, info, warn};

use super::cancel::CancelToken;
use crate::stages::{pipeline_stages, StageContext, StageDef, StageSignal};

/// How the run executes stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Full,
    /// Validate and report intended execution without mutating the store.
    DryRun,
}

/// Terminal state of one orchestrator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { had_errors: bool },
    Suspended(String),
    Aborted(String),
}

impl RunOutcome {
    /// Process exit code: 0 clean, 1 completed with errors, 2 aborted,
    /// 3 suspended awaiting the manual step.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Completed { had_errors: false } => 0,
            RunOutcome::Completed { had_errors: true } => 1,
            RunOutcome::Aborted(_) => 2,
            RunOutcome::Suspended(_) => 3,
        }
    }
}

/// Result of one stage within a run.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub name: &'static str,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub disabled: bool,
    pub dry_run: bool,
    pub signal: Option<String>,
    /// A failure of the stage's own control logic (caught; the run went on).
    pub stage_error: Option<String>,
}

impl StageReport {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            disabled: false,
            dry_run: false,
            signal: None,
            stage_error: None,
        }
    }
}

/// Aggregated result of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub stages: Vec<StageReport>,
}

/// Walks the stage list against the entity store.
pub struct Orchestrator<'a> {
    ctx: StageContext<'a>,
    cancel: CancelToken,
    stages: Vec<StageDef>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(ctx: StageContext<'a>, cancel: CancelToken) -> Self {
        Self {
            ctx,
            cancel,
            stages: pipeline_stages(),
        }
    }

    fn stage_is_enabled(&self, stage: &StageDef) -> Result<bool> {
        let conn = get_conn(self.ctx.pool)?;
        match settings::get(&conn, settings::STAGES_SECTION, stage.name)? {
            Some(value) => Ok(!matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "false" | "0" | "no" | "off"
            )),
            None => Ok(stage.enabled_default),
        }
    }

    /// Fixed precondition checks. Any returned error is fatal to the run.
    fn validate(&self, dry_run: bool) -> Result<Vec<String>> {
        info!("--- Validating run preconditions ---");
        let mut errors = Vec::new();

        // Publisher credentials and reachability, when publication will run.
        let publish_enabled = self
            .stages
            .iter()
            .filter(|s| s.name == "publish-items" || s.name == "publish-assets")
            .map(|s| self.stage_is_enabled(s))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .any(|enabled| enabled);
        if publish_enabled {
            if let Err(e) = self.ctx.publisher.health_check() {
                if dry_run {
                    warn!("Publisher check failed (ignored for dry-run): {}", e);
                } else {
                    errors.push(format!("publisher check failed: {e}"));
                }
            }
        }

        // Input directory. The scan stage tolerates its absence, so this is
        // advisory.
        let input_dir = self.ctx.config.input_dir();
        if !input_dir.exists() {
            warn!("Input directory does not exist: {:?}", input_dir);
        }

        // Free disk space under the data dir.
        let min_free = self.ctx.config.validation.min_free_bytes;
        match free_space(&self.ctx.config.general.data_dir) {
            Some(free) if free < min_free => {
                errors.push(format!(
                    "insufficient disk space: {free} bytes free, {min_free} required"
                ));
            }
            Some(_) => {}
            None => warn!("Could not determine free disk space"),
        }

        // Preflight decode pass: find unreadable inputs before a multi-hour
        // run commits to them.
        let unreadable = self.preflight_unreadable(&input_dir);
        if !unreadable.is_empty() {
            warn!(
                "{} input file(s) are not valid UTF-8 and will be recorded as errors: {}",
                unreadable.len(),
                unreadable
                    .iter()
                    .take(3)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        if errors.is_empty() {
            info!("Validation OK");
        }
        Ok(errors)
    }

    fn preflight_unreadable(&self, input_dir: &std::path::Path) -> Vec<String> {
        let mut unreadable = Vec::new();
        if !input_dir.exists() {
            return unreadable;
        }
        let max_bytes = self.ctx.config.validation.max_file_bytes;
        for entry in walkdir::WalkDir::new(input_dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            let is_markup = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| matches!(e.to_ascii_lowercase().as_str(), "html" | "htm"))
                .unwrap_or(false);
            if path.is_dir() || !is_markup {
                continue;
            }
            if entry.metadata().map(|m| m.len() > max_bytes).unwrap_or(true) {
                continue;
            }
            match std::fs::read(path) {
                Ok(bytes) if std::str::from_utf8(&bytes).is_err() => {
                    unreadable.push(path.to_string_lossy().into_owned());
                }
                Ok(_) => {}
                Err(_) => unreadable.push(path.to_string_lossy().into_owned()),
            }
        }
        unreadable
    }

    /// Execute one run to its terminal state.
    pub fn run(&self, mode: RunMode) -> Result<RunReport> {
        let started_at = Utc::now();
        let dry_run = mode == RunMode::DryRun;
        if dry_run {
            info!("!!! DRY-RUN: stages are reported, not executed !!!");
        }

        let mut stages = Vec::with_capacity(self.stages.len());

        let validation_errors = self.validate(dry_run)?;
        if !validation_errors.is_empty() {
            for e in &validation_errors {
                error!("Validation failed: {}", e);
            }
            return Ok(RunReport {
                started_at,
                finished_at: Utc::now(),
                outcome: RunOutcome::Aborted(validation_errors.join("; ")),
                stages,
            });
        }

        let mut had_errors = false;
        let mut outcome = None;

        for stage in &self.stages {
            // Cancellation is cooperative and coarse: checked only between
            // stages, so an in-flight stage always drains.
            if self.cancel.is_cancelled() {
                warn!("Run cancelled before stage '{}'", stage.name);
                outcome = Some(RunOutcome::Aborted("cancelled".to_string()));
                break;
            }

            let mut report = StageReport::new(stage.name);

            if !self.stage_is_enabled(stage)? {
                info!("--- Stage '{}' disabled, skipping ---", stage.name);
                report.disabled = true;
                stages.push(report);
                continue;
            }

            if dry_run {
                info!("--- [DRY-RUN] would run stage '{}' ---", stage.name);
                report.dry_run = true;
                stages.push(report);
                continue;
            }

            info!("--- Running stage '{}' ---", stage.name);
            match (stage.run)(&self.ctx) {
                Ok(stage_outcome) => {
                    report.succeeded = stage_outcome.succeeded;
                    report.failed = stage_outcome.failed;
                    report.skipped = stage_outcome.skipped;
                    had_errors |= stage_outcome.failed > 0;

                    if let Some(StageSignal::ManualIntervention(reason)) = stage_outcome.signal {
                        warn!("Stage '{}' requires manual action: {}", stage.name, reason);
                        report.signal = Some(reason.clone());
                        stages.push(report);
                        outcome = Some(RunOutcome::Suspended(reason));
                        break;
                    }
                    stages.push(report);
                }
                Err(e) => {
                    // A stage's internal bug must not block unrelated stages;
                    // they operate on disjoint items.
                    error!("Stage '{}' failed: {}", stage.name, e);
                    report.stage_error = Some(e.to_string());
                    had_errors = true;
                    stages.push(report);
                }
            }
        }

        let outcome = outcome.unwrap_or(RunOutcome::Completed { had_errors });
        Ok(RunReport {
            started_at,
            finished_at: Utc::now(),
            outcome,
            stages,
        })
    }
}

/// Free bytes available on the filesystem holding `path`.
#[cfg(unix)]
fn free_space(path: &std::path::Path) -> Option<u64> {
    let probe = if path.exists() {
        path
    } else {
        std::path::Path::new(".")
    };
    nix::sys::statvfs::statvfs(probe)
        .ok()
        .map(|vfs| vfs.blocks_available() as u64 * vfs.fragment_size() as u64)
}

#[cfg(not(unix))]
fn free_space(_path: &std::path::Path) -> Option<u64> {
    None
}
