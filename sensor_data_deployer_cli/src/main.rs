use std::{io::Write, path::PathBuf, process::ExitCode, time::Duration};

use anyhow::Context;
use clap::Parser;
use sensor_data_deployer::{
    compile::compile_project, config::ProjectConfig, deploy_sensor_data, DeployOptions, Deployment,
};
use tracing_subscriber::EnvFilter;

/// Deploy the SensorData contract to a configured network.
#[derive(Debug, Parser)]
#[command(name = "deploy")]
struct Args {
    /// Project config declaring the compiler version and networks.
    #[arg(long, env = "DEPLOY_CONFIG", default_value = "smart-contracts/deploy.config.json")]
    config: PathBuf,

    /// Network to deploy to. Falls back to `defaultNetwork`.
    #[arg(long, env = "DEPLOY_NETWORK")]
    network: Option<String>,

    /// Compile the contracts with the configured solc version first.
    #[arg(long)]
    compile: bool,

    #[arg(long, env = "SOLC_PATH", default_value = "solc")]
    solc: PathBuf,

    /// Seconds to wait for the deployment receipt.
    #[arg(long, value_parser = parse_seconds)]
    confirmation_timeout: Option<Duration>,

    #[arg(long, env = "LOG_FILTER", default_value = "warn,sensor_data_deployer=info")]
    log_filter: String,
}

fn parse_seconds(s: &str) -> Result<Duration, std::num::ParseIntError> {
    s.parse().map(Duration::from_secs)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // stdout carries only the result line
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::new(&args.log_filter))
        .init();

    let result = run(args).await;
    report(result, &mut std::io::stdout(), &mut std::io::stderr())
}

/// The result line goes to `out`, the error chain to `err`.
fn report(result: anyhow::Result<Deployment>, out: &mut impl Write, err: &mut impl Write) -> ExitCode {
    match result {
        Ok(deployment) => match writeln!(out, "{deployment}") {
            Ok(()) => ExitCode::SUCCESS,
            Err(_) => ExitCode::FAILURE,
        },
        Err(e) => {
            let _ = writeln!(err, "{e:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<Deployment> {
    let config = ProjectConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let network = config.select_network(args.network.as_deref())?;

    if args.compile {
        compile_project(&config, &args.solc)?;
    }

    tracing::info!(
        network = %network.name,
        config = %args.config.display(),
        compile = args.compile,
        "starting deployment"
    );
    let options = DeployOptions {
        confirmation_timeout: args.confirmation_timeout,
        ..Default::default()
    };
    let deployment = deploy_sensor_data(&config, network, &options)
        .await
        .with_context(|| format!("failed to deploy to network {}", network.name))?;

    Ok(deployment)
}
