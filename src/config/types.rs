use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub publisher: PublisherConfig,
    pub transform: TransformConfig,
    pub enrich: EnrichConfig,
    pub manual: ManualExchangeConfig,
    pub archive: ArchiveConfig,
    pub validation: ValidationConfig,
    /// Per-stage enabled flags, keyed by stage name. Synced into the
    /// settings table at startup; a missing entry leaves the stage enabled.
    pub stages: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the database, logs, and backups.
    pub data_dir: PathBuf,
    /// Directory scanned for authored content files.
    pub input_dir: PathBuf,
    /// Worker-pool size for per-item stage work. Defaults to the number of
    /// processing units, capped at 4.
    pub max_parallelism: Option<usize>,
    /// Run the retry classifier before every pipeline run.
    pub auto_retry: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            input_dir: PathBuf::from("./inbox"),
            max_parallelism: None,
            auto_retry: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Base URL of the publishing API.
    pub endpoint: String,
    pub api_token: String,
    /// Collection/blog the items are published into.
    pub collection_id: String,
    /// Pause between publish calls, for the target's rate ceiling.
    pub delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_token: String::new(),
            collection_id: String::new(),
            delay_ms: 1100,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Directory receiving processed asset copies.
    pub output_dir: PathBuf,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./work/processed"),
        }
    }
}

/// A named point for the location enrichment gazetteer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoPoint {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    /// Keywords injected when they appear in the payload text.
    pub keywords: Vec<String>,
    /// Known locations matched against the payload text.
    pub locations: Vec<GeoPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManualExchangeConfig {
    /// Processed assets are exported here for the manual publishing step.
    pub export_dir: PathBuf,
    /// The operator saves the confirmation page here afterwards.
    pub confirmations_dir: PathBuf,
}

impl Default for ManualExchangeConfig {
    fn default() -> Self {
        Self {
            export_dir: PathBuf::from("./export"),
            confirmations_dir: PathBuf::from("./confirmations"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub output_dir: PathBuf,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./archive"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Minimum free disk space required to start a run.
    pub min_free_bytes: u64,
    /// Source files larger than this are skipped by the scanner.
    pub max_file_bytes: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_free_bytes: 500 * 1024 * 1024,
            max_file_bytes: 2 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Resolve a possibly-relative configured path against the data dir.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.general.data_dir.join(path)
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.general.data_dir.join("postforge.db")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.general.data_dir.join("logs")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.general.data_dir.join("backups")
    }

    pub fn input_dir(&self) -> PathBuf {
        self.resolve(&self.general.input_dir)
    }

    pub fn transform_output_dir(&self) -> PathBuf {
        self.resolve(&self.transform.output_dir)
    }

    pub fn export_dir(&self) -> PathBuf {
        self.resolve(&self.manual.export_dir)
    }

    pub fn confirmations_dir(&self) -> PathBuf {
        self.resolve(&self.manual.confirmations_dir)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.resolve(&self.archive.output_dir)
    }

    /// Worker-pool size for stages that fan out per item.
    pub fn max_parallelism(&self) -> usize {
        self.general
            .max_parallelism
            .unwrap_or_else(crate::pipeline::runner::default_parallelism)
            .max(1)
    }
}
