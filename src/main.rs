mod cli;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

use postforge::enrich::MarkupEnricher;
use postforge::media::ImageTransformer;
use postforge::pipeline::{self, CancelToken, Orchestrator, RunMode};
use postforge::publish::HttpPublisher;
use postforge::{config, maintenance, stages};
use postforge_db::pool::{get_conn, init_pool};

const BACKUPS_TO_KEEP: usize = 5;

fn run_pipeline(config: &config::Config, dry_run: bool, retry: bool) -> Result<u8> {
    // Back up before touching the database, so a bad run can be rolled back.
    let db_path = config.db_path();
    postforge_db::maintenance::backup_database(&db_path, &config.backups_dir(), BACKUPS_TO_KEEP)?;

    let pool = init_pool(&db_path.to_string_lossy())?;
    {
        let conn = get_conn(&pool)?;
        config::sync_settings(&conn, config)?;
    }

    if retry || config.general.auto_retry {
        tracing::info!("--- Running retry classifier before the pipeline ---");
        match pipeline::run_retry(&pool) {
            Ok(tally) => tracing::info!(
                "Retry classifier reset {} item(s), {} asset(s)",
                tally.items_reset,
                tally.assets_reset
            ),
            Err(e) => tracing::error!("Retry classification failed: {}", e),
        }
    }

    let enricher = MarkupEnricher::new(&config.enrich);
    let transformer = ImageTransformer::new();
    let publisher = HttpPublisher::new(&config.publisher)?;

    let ctx = stages::StageContext {
        pool: &pool,
        config,
        enricher: &enricher,
        transformer: &transformer,
        publisher: &publisher,
    };

    let orchestrator = Orchestrator::new(ctx, CancelToken::new());
    let mode = if dry_run {
        RunMode::DryRun
    } else {
        RunMode::Full
    };
    let report = orchestrator.run(mode)?;

    let conn = get_conn(&pool)?;
    pipeline::report::log_summary(&report, &conn);
    if !dry_run {
        pipeline::report::write_markdown(&report, &conn, &config.logs_dir())?;
    }

    Ok(report.outcome.exit_code())
}

fn run(cli: Cli) -> Result<u8> {
    match cli.command {
        Commands::Run { dry_run, retry } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            run_pipeline(&config, dry_run, retry)
        }

        Commands::Retry => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let pool = init_pool(&config.db_path().to_string_lossy())?;
            let tally = pipeline::run_retry(&pool)?;
            println!(
                "Reset {} item(s) and {} asset(s) for reprocessing.",
                tally.items_reset, tally.assets_reset
            );
            Ok(0)
        }

        Commands::Maintenance => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            maintenance::run_maintenance(&config)?;
            Ok(0)
        }

        Commands::Stats => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let pool = init_pool(&config.db_path().to_string_lossy())?;
            let conn = get_conn(&pool)?;
            let stats = postforge_db::queries::statistics(&conn)?;

            println!("Items:");
            for (status, count) in &stats.items {
                println!("  {status:<16} {count}");
            }
            println!("Assets:");
            for (status, count) in &stats.assets {
                println!("  {status:<16} {count}");
            }
            Ok(0)
        }

        Commands::Validate { config: path } => {
            let path = path.or(cli.config);
            config::load_config_or_default(path.as_deref())?;
            println!("Configuration OK");
            Ok(0)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "postforge=trace,postforge_db=debug".to_string()
        } else {
            "postforge=info,postforge_db=info".to_string()
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}
