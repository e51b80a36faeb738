use anyhow::{Context, Result};
use building_flex_scheduler::io::{load_horizon, ScenarioFiles};
use building_flex_scheduler::optimizer::ModelBuilder;
use building_flex_scheduler::{config::Config, runner, telemetry};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about = "Cost-optimal load shifting and shared EV charging", long_about = None)]
struct Cli {
    /// Configuration file (TOML); BFS__* environment variables override it
    #[arg(long, short, global = true, env = "BFS_CONFIG")]
    config: Option<PathBuf>,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Solve one or more scenario directories
    Solve(SolveArgs),
    /// Load and validate scenarios and build their models without solving
    Check {
        #[arg(required = true)]
        scenarios: Vec<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct SolveArgs {
    #[arg(required = true)]
    scenarios: Vec<PathBuf>,
    /// Results base directory
    #[arg(long, short)]
    output: Option<PathBuf>,
    /// Solver wall clock limit per scenario, in seconds
    #[arg(long)]
    time_limit: Option<f64>,
    #[arg(long)]
    mip_gap: Option<f64>,
    /// Scenarios solved concurrently
    #[arg(long, short = 'j', default_value_t = 1)]
    jobs: usize,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.json_logs);

    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Solve(args) => {
            if let Some(output) = args.output {
                config.output.directory = output;
            }
            if let Some(limit) = args.time_limit {
                config.solver.time_limit_seconds = Some(limit);
            }
            if let Some(gap) = args.mip_gap {
                config.solver.mip_gap = Some(gap);
            }
            config.check().context("invalid command line overrides")?;
            solve(config, args.scenarios, args.jobs).await
        }
        Commands::Check { scenarios } => check(&config, &scenarios),
    }
}

async fn solve(config: Config, scenarios: Vec<PathBuf>, jobs: usize) -> Result<ExitCode> {
    info!(
        scenarios = scenarios.len(),
        jobs,
        time_limit = ?config.solver.time_limit_seconds.map(Duration::from_secs_f64),
        output = %config.output.directory.display(),
        "starting batch"
    );

    let batch = runner::run_scenarios(Arc::new(config), scenarios, jobs).await;
    for report in &batch.reports {
        println!(
            "{}\t{}\t{}",
            report.scenario,
            report.outcome,
            report.message.as_deref().unwrap_or("")
        );
    }

    if batch.interrupted {
        warn!("interrupted before all scenarios finished");
        // In-flight solves run on blocking threads the runtime would wait for.
        std::process::exit(130);
    }
    Ok(if batch.all_succeeded() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn check(config: &Config, scenarios: &[PathBuf]) -> Result<ExitCode> {
    let constraints = config.to_constraints();
    let mut ok = true;
    for dir in scenarios {
        let files = ScenarioFiles::in_dir(dir);
        let built = load_horizon(&files, config)
            .map_err(anyhow::Error::from)
            .and_then(|horizon| ModelBuilder::new(&constraints).build(horizon).map_err(anyhow::Error::from));
        match built {
            Ok(model) => println!(
                "{}\tok\t{} variables, {} rows",
                files.name,
                model.variables().len(),
                model.rows().len()
            ),
            Err(e) => {
                error!(scenario = %files.name, error = %e, "scenario rejected");
                println!("{}\trejected\t{e:#}", files.name);
                ok = false;
            }
        }
    }
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
