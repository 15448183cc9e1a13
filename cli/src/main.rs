use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vigil_agent::analyzer::ProblemAnalyzer;
use vigil_agent::config::AgentConfig;
use vigil_agent::cpu::{CpuUsageTracker, HostCpuSource, ProcessCpuSource};
use vigil_agent::memory::FallbackMemoryProvider;
use vigil_agent::probe::{HostRuntimeProbe, RuntimeProbe};
use vigil_agent::report::any_problem;
use vigil_agent::sample::HistorySample;
use vigil_agent::sampler::HistorySampler;

#[derive(Parser)]
#[command(name = "vigilctl")]
#[command(about = "Vigil CLI - run the telemetry agent or take one-shot readings")]
#[command(version)]
#[command(long_about = "
vigilctl drives the Vigil telemetry agent from the command line.

Examples:
  vigilctl run                        # run the agent until Ctrl-C
  vigilctl run --config vigil.toml    # run with an explicit config file
  vigilctl check --json               # one analyzer pass, JSON output
  vigilctl sample                     # one history sample, JSON output
")]
struct Cli {
    /// Configuration file path
    #[arg(long, global = true, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sampling agent until interrupted
    Run,

    /// Run the health checks once and print the reports
    Check {
        /// Print the full report sequence as JSON
        #[arg(long)]
        json: bool,
    },

    /// Take one history sample and print it as JSON
    Sample,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(e) = execute(cli).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vigil_agent={0},vigilctl={0}", default_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<AgentConfig> {
    match path {
        Some(path) => AgentConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(AgentConfig::default()),
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Run => run_agent(config).await,
        Commands::Check { json } => check_once(config, json),
        Commands::Sample => sample_once(),
    }
}

async fn run_agent(config: AgentConfig) -> Result<()> {
    let probe: Arc<dyn RuntimeProbe> = Arc::new(HostRuntimeProbe::new());
    let memory = Arc::new(FallbackMemoryProvider::host_default());
    let analyzer = Arc::new(ProblemAnalyzer::new(config.thresholds.clone()));

    let mut sampler = HistorySampler::new();
    sampler
        .start(
            config.history.clone(),
            config.problems.clone(),
            probe,
            memory,
            analyzer,
        )
        .await?;
    info!("agent running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    sampler.stop().await;

    let history = sampler.history();
    let problems = sampler.problem_history();
    println!(
        "collected {} samples, {} problem snapshots",
        history.len(),
        problems.len()
    );
    if let Some(latest) = problems.last() {
        for report in latest.iter().filter(|r| r.problem) {
            println!("active problem: {}", report.diagnosis);
        }
    }
    Ok(())
}

fn check_once(config: AgentConfig, json: bool) -> Result<()> {
    let probe = HostRuntimeProbe::new();
    let memory = FallbackMemoryProvider::host_default();
    let analyzer = ProblemAnalyzer::new(config.thresholds);

    let reports = analyzer.analyze(&probe, &memory);
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!("{}", report);
        }
    }
    if any_problem(&reports) {
        process::exit(2);
    }
    Ok(())
}

fn sample_once() -> Result<()> {
    let probe = HostRuntimeProbe::new();

    // One-shot reading: the usage trackers have no baseline yet, so
    // the percentages follow the first-call rule and read 0 / -1.
    let mut host_cpu = CpuUsageTracker::new(HostCpuSource::new());
    let mut process_cpu = CpuUsageTracker::new(ProcessCpuSource::new());

    let sample = HistorySample::builder()
        .cpu_usage(host_cpu.current_usage())
        .cpu_process_usage(process_cpu.current_usage())
        .classes_loaded(probe.loaded_class_count().unwrap_or(0))
        .pools(probe.memory_pools())
        .threads(probe.thread_dump())
        .build();

    println!("{}", serde_json::to_string_pretty(&sample)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["vigilctl", "check", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Check { json: true }));

        let cli = Cli::try_parse_from(["vigilctl", "--verbose", "run"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Run));
    }

    #[test]
    fn test_load_config_default_and_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config.history.interval_ms, 1_000);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[history]\ninterval_ms = 77\nmax_samples = 3").unwrap();
        let path = file.path().to_path_buf();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.history.interval_ms, 77);

        let missing = PathBuf::from("/nonexistent/vigil.toml");
        assert!(load_config(Some(&missing)).is_err());
    }
}
