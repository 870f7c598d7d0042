//! Pipeline stages.
//!
//! Each stage reads the items in one status through the store, processes
//! them, and writes the new status back per item. The orchestrator treats
//! every stage identically through [`StageDef`]: a closed, ordered list built
//! at startup, so stage order and existence are statically checkable.

pub mod archive;
pub mod enrich;
pub mod publish_assets;
pub mod publish_items;
pub mod scan;
pub mod transform;

use postforge_common::Result;
use postforge_db::pool::DbPool;

use crate::config::Config;
use crate::enrich::Enricher;
use crate::media::AssetTransformer;
use crate::publish::Publisher;

/// Everything a stage body may touch. Collaborators are trait objects so
/// tests and alternate deployments can swap them without touching the
/// orchestration core.
pub struct StageContext<'a> {
    pub pool: &'a DbPool,
    pub config: &'a Config,
    pub enricher: &'a dyn Enricher,
    pub transformer: &'a dyn AssetTransformer,
    pub publisher: &'a dyn Publisher,
}

/// Control-flow signal a stage may raise instead of plain counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageSignal {
    /// Forward progress needs an out-of-band human action; the orchestrator
    /// suspends the run and expects to be re-invoked later.
    ManualIntervention(String),
}

/// Result of one stage invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub signal: Option<StageSignal>,
}

impl StageOutcome {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn counts(succeeded: usize, failed: usize) -> Self {
        Self {
            succeeded,
            failed,
            ..Self::default()
        }
    }

    pub fn manual<S: Into<String>>(reason: S) -> Self {
        Self {
            signal: Some(StageSignal::ManualIntervention(reason.into())),
            ..Self::default()
        }
    }
}

/// A stage body: no input besides the context, counts (or a signal) out.
pub type StageFn = fn(&StageContext<'_>) -> Result<StageOutcome>;

/// One entry in the pipeline's closed stage list.
pub struct StageDef {
    pub name: &'static str,
    pub enabled_default: bool,
    pub run: StageFn,
}

/// The pipeline, in execution order.
pub fn pipeline_stages() -> Vec<StageDef> {
    vec![
        StageDef {
            name: "scan",
            enabled_default: true,
            run: scan::run,
        },
        StageDef {
            name: "transform-assets",
            enabled_default: true,
            run: transform::run,
        },
        StageDef {
            name: "enrich-keywords",
            enabled_default: true,
            run: enrich::run_keywords,
        },
        StageDef {
            name: "enrich-location",
            enabled_default: true,
            run: enrich::run_location,
        },
        StageDef {
            name: "publish-assets",
            enabled_default: true,
            run: publish_assets::run,
        },
        StageDef {
            name: "publish-items",
            enabled_default: true,
            run: publish_items::run,
        },
        StageDef {
            name: "archive",
            enabled_default: true,
            run: archive::run,
        },
    ]
}
