//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which owns a temp directory tree (inbox, work,
//! export, confirmations, archive) and a file-backed pool, plus mock
//! collaborators so the pipeline runs without a real publisher or raster
//! codec.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;

use postforge::config::Config;
use postforge::enrich::{Enricher, Enrichment};
use postforge::media::AssetTransformer;
use postforge::publish::{PublishRequest, Publisher};
use postforge::stages::StageContext;
use postforge_common::{Error, Result};
use postforge_db::pool::{get_conn, init_pool, DbPool, PooledConnection};

pub struct TestHarness {
    pub dir: TempDir,
    pub pool: DbPool,
    pub config: Config,
}

impl TestHarness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let data_dir = dir.path().join("data");
        let input_dir = dir.path().join("inbox");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::create_dir_all(&input_dir).unwrap();

        let mut config = Config::default();
        config.general.data_dir = data_dir.clone();
        config.general.input_dir = input_dir;
        config.general.max_parallelism = Some(2);
        config.publisher.delay_ms = 0;
        config.transform.output_dir = dir.path().join("work");
        config.manual.export_dir = dir.path().join("export");
        config.manual.confirmations_dir = dir.path().join("confirmations");
        config.archive.output_dir = dir.path().join("archive");

        let pool = init_pool(&config.db_path().to_string_lossy()).expect("pool");

        Self { dir, pool, config }
    }

    pub fn conn(&self) -> PooledConnection {
        get_conn(&self.pool).expect("conn")
    }

    /// Write a file under the inbox, creating parent directories.
    pub fn write_input(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.config.input_dir().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn context<'a>(
        &'a self,
        enricher: &'a dyn Enricher,
        transformer: &'a dyn AssetTransformer,
        publisher: &'a dyn Publisher,
    ) -> StageContext<'a> {
        StageContext {
            pool: &self.pool,
            config: &self.config,
            enricher,
            transformer,
            publisher,
        }
    }
}

/// Enricher that prepends plain markers, failing any payload carrying the
/// configured marker string.
#[derive(Default)]
pub struct MockEnricher {
    pub fail_marker: Option<String>,
}

impl MockEnricher {
    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
        }
    }
}

impl Enricher for MockEnricher {
    fn add_keywords(&self, payload: &str) -> Result<Enrichment> {
        if let Some(marker) = &self.fail_marker {
            if payload.contains(marker.as_str()) {
                return Err(Error::internal("keyword stage rejected payload"));
            }
        }
        let payload = if payload.contains("<search>") {
            payload.to_string()
        } else {
            format!("<search>auto</search>{payload}")
        };
        Ok(Enrichment {
            payload,
            title: None,
            labels: vec!["auto".to_string()],
        })
    }

    fn add_location(&self, payload: &str) -> Result<Enrichment> {
        if let Some(marker) = &self.fail_marker {
            if payload.contains(marker.as_str()) {
                return Err(Error::internal("location stage rejected payload"));
            }
        }
        let payload = if payload.contains("<georss:point>") {
            payload.to_string()
        } else {
            format!("<georss:point>0 0</georss:point>{payload}")
        };
        Ok(Enrichment {
            payload,
            title: None,
            labels: Vec::new(),
        })
    }
}

/// Transformer that copies the source byte-for-byte; no codec involved.
pub struct CopyTransformer;

impl AssetTransformer for CopyTransformer {
    fn transform(&self, source: &Path, output_dir: &Path) -> Result<PathBuf> {
        let name = source
            .file_name()
            .ok_or_else(|| Error::invalid_input("no file name"))?;
        let dest = output_dir.join(name);
        std::fs::copy(source, &dest)?;
        Ok(dest)
    }
}

/// Publisher that assigns sequential ids, failing any payload carrying the
/// configured marker string.
#[derive(Default)]
pub struct MockPublisher {
    pub fail_marker: Option<String>,
    counter: AtomicUsize,
}

impl MockPublisher {
    pub fn published_count(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

impl Publisher for MockPublisher {
    fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn publish_item(&self, request: &PublishRequest<'_>) -> Result<String> {
        if let Some(marker) = &self.fail_marker {
            if request.payload.contains(marker.as_str()) {
                return Err(Error::io("publish rejected (429): rate limited"));
            }
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("post-{n}"))
    }
}
