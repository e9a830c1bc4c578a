use anyhow::Context;
use clap::Parser;
use vtpk_publish::app;
use vtpk_publish::core::orchestrator::CyclePlan;
use vtpk_publish::utils::{logger, validation::Validate};
use vtpk_publish::{adapters::report, CliConfig, PublishConfig, WorkingMap};

const CONFIG_EXIT_CODE: i32 = 3;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("🚀 Starting vtpk-publish");
    tracing::info!("📁 Loading configuration from: {}", cli.config);

    let config = match PublishConfig::from_file(&cli.config).and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Configuration is not usable: {}", e);
            tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(CONFIG_EXIT_CODE);
        }
    };
    let specs = match config.select_packages(&cli.only) {
        Ok(specs) => specs,
        Err(e) => {
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(CONFIG_EXIT_CODE);
        }
    };
    tracing::info!(
        "✅ Configuration loaded: {} packages for owner {} on {}",
        specs.len(),
        config.owner(),
        config.portal.url
    );

    let monitor_enabled = cli.monitor.unwrap_or_else(|| config.monitoring_enabled());
    let batch = app::build_batch(&config, monitor_enabled).context("failed to set up portal client")?;

    if cli.dry_run {
        tracing::info!("🔍 DRY RUN MODE - nothing will be built, deleted or uploaded");
        let plans = batch.plan(&specs).await;
        print_plans(&plans);
        if plans.iter().all(CyclePlan::is_ready) {
            return Ok(());
        }
        std::process::exit(1);
    }

    let (_map, summary) = batch.run(&specs, WorkingMap::new(config.map_name())).await;

    let report_path = cli
        .report
        .as_ref()
        .map(std::path::PathBuf::from)
        .or_else(|| config.report_path());
    if let Some(path) = report_path {
        report::write_report(&path, &summary.reports, chrono::Utc::now())
            .with_context(|| format!("failed to write report to {}", path.display()))?;
    }

    for cycle in &summary.reports {
        println!("{:<32} {}", cycle.package, cycle.status);
        for error in &cycle.errors {
            println!("    - {}", error.user_friendly_message());
            println!("      💡 {}", error.recovery_suggestion());
        }
    }
    tracing::debug!("Execution summary: {:?}", summary.get_execution_summary());

    let exit_code = summary.exit_code();
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

fn print_plans(plans: &[CyclePlan]) {
    for plan in plans {
        println!("📦 {} -> {}", plan.package, plan.artifact_path.display());
        for layer in &plan.layers {
            println!("    + {}", layer.id);
        }
        for missing in &plan.missing_layers {
            println!("    ! {}", missing);
        }
        match (&plan.stale, &plan.resolve_error) {
            (Some(stale), _) if stale.is_empty() => println!("    nothing to delete (first publish)"),
            (Some(stale), _) => {
                for item in stale.in_deletion_order() {
                    println!("    - would delete {}", item);
                }
            }
            (None, Some(e)) => println!("    ! portal lookup failed: {}", e),
            (None, None) => {}
        }
    }
}
