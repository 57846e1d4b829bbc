//! bao-install - entry point

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use bao_install::cli::{Cli, Commands, ConfigArgs};
use bao_install::config_file::InstallConfig;
use bao_install::installer::{Installer, ProvisionPlan, StepStatus};
use bao_install::process_guard;
use bao_install::sanity;
use bao_install::steps::ssh::Invoker;
use bao_install::verify::verify_host;

/// Initialize logging: stderr, file:line, `info` unless -v or RUST_LOG say otherwise
fn init_logger(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}

fn main() {
    let cli = Cli::parse_args();
    init_logger(cli.verbose);
    debug!("CLI arguments parsed");

    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        eprintln!("✗ {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Install {
            config,
            skip_root_check,
            report,
        } => install(&config, cli.dry_run, skip_root_check, report.as_deref()),
        Commands::Plan { config, json } => plan(&config, json),
        Commands::Verify { config, json } => verify(&config, json),
        Commands::ConfigInit { path, variant } => {
            InstallConfig::for_variant(variant)
                .save_to_file(&path)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("✓ Wrote default configuration to {}", path.display());
            Ok(())
        }
        Commands::Validate { config } => {
            info!("Validating configuration file: {}", config.display());
            let loaded = InstallConfig::load_from_file(&config)?;
            loaded.validate()?;
            println!("✓ Configuration file is valid: {}", config.display());
            Ok(())
        }
    }
}

fn build_plan(args: &ConfigArgs) -> Result<(InstallConfig, ProvisionPlan)> {
    let config = args.resolve()?;
    let invoker = Invoker::detect().context("detecting invoking user")?;
    debug!(invoker = %invoker.name, "invoking user");
    let plan = ProvisionPlan::from_config(&config, &invoker)?;
    Ok((config, plan))
}

fn install(
    args: &ConfigArgs,
    dry_run: bool,
    skip_root_check: bool,
    report_path: Option<&std::path::Path>,
) -> Result<()> {
    let (config, plan) = build_plan(args)?;
    info!(
        user = %plan.user,
        variant = %plan.variant,
        steps = plan.len(),
        dry_run,
        "provisioning Bao host"
    );

    let preflight =
        sanity::verify_environment(config.variant, &config.entrypoint_source, skip_root_check, dry_run);
    if !preflight.is_ok() {
        eprint!("{}", sanity::format_failure(&preflight));
        anyhow::bail!("pre-flight checks failed");
    }

    let installer = Installer::system(dry_run);
    let report = installer.run(&plan);

    if let Some(path) = report_path {
        report
            .save_to_file(path)
            .with_context(|| format!("saving report to {}", path.display()))?;
        info!("report written to {}", path.display());
    }

    for record in &report.steps {
        let mark = match record.status {
            StepStatus::Completed => "✓",
            StepStatus::Skipped => "-",
            StepStatus::DryRun => "·",
            StepStatus::Failed => "✗",
            StepStatus::NotRun => " ",
        };
        println!("{} {:<20} {}", mark, record.name, record.description);
    }

    if let Some(failed) = report.failed_step() {
        anyhow::bail!(
            "step '{}' failed: {} ({} step(s) not run)",
            failed.name,
            failed.detail.as_deref().unwrap_or("unknown error"),
            report.count(StepStatus::NotRun)
        );
    }

    if !dry_run {
        println!("✓ Host provisioned for user {}", plan.user);
    }
    Ok(())
}

fn plan(args: &ConfigArgs, json: bool) -> Result<()> {
    let (_, plan) = build_plan(args)?;

    if json {
        let steps: Vec<serde_json::Value> = plan
            .steps
            .iter()
            .map(|s| serde_json::json!({ "name": s.name(), "description": s.describe() }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&steps)?);
    } else {
        for (index, step) in plan.steps.iter().enumerate() {
            println!("{:>2}. {:<20} {}", index + 1, step.name(), step.describe());
        }
    }
    Ok(())
}

fn verify(args: &ConfigArgs, json: bool) -> Result<()> {
    let config = args.resolve()?;
    let invoker = Invoker::detect().context("detecting invoking user")?;
    let report = verify_host(&config, &invoker);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for check in &report.checks {
            let mark = if check.passed { "✓" } else { "✗" };
            println!("{} {:<16} {}", mark, check.name, check.detail);
        }
    }

    if !report.passed() {
        anyhow::bail!("{} check(s) failed", report.failures().count());
    }
    Ok(())
}
