use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

mod cli;
mod logging;

use cli::{BrokerArgs, Cli, Commands, ConfigCommands};
use conveyor_config::validation::Validatable;
use conveyor_config::{ConfigLoader, ConveyorConfig};
use conveyor_engine::BuiltinEngine;
use conveyor_execution::{
    fault_kind_of, run_locally, run_remotely, run_role_process, Engine, FaultRecord, FaultSlot,
    Launcher, PipelineConfig, RemoteNode, RunId,
};
use conveyor_queue::ManagerClient;
use logging::{init_host_tracing, init_role_tracing};

/// Load configuration from file or use defaults
fn load_config(config_path: Option<&PathBuf>) -> Result<ConveyorConfig> {
    let loader = ConfigLoader::new();

    match config_path {
        Some(path) => {
            if path.exists() {
                loader
                    .from_file(path)
                    .context(format!("Failed to load configuration from {:?}", path))
            } else {
                eprintln!("Configuration file not found: {:?}. Using defaults.", path);
                loader
                    .from_env()
                    .context("Failed to load configuration from environment")
            }
        }
        None => loader
            .from_env()
            .context("Failed to load configuration from environment"),
    }
}

/// Apply `--rabbit-*` flags over the configured broker
fn apply_broker_args(config: &mut ConveyorConfig, args: &BrokerArgs) -> Result<()> {
    if let Some(username) = &args.rabbit_username {
        config.broker.username = username.clone();
    }
    if let Some(password) = &args.rabbit_password {
        config.broker.password = password.clone();
    }
    if let Some(host) = &args.rabbit_host {
        config.broker.host = host.clone();
    }
    if let Some(port) = args.rabbit_port {
        config.broker.port = port;
    }
    config
        .broker
        .validate()
        .context("Invalid broker connection flags")?;
    Ok(())
}

/// Launcher that re-executes this binary as a role process
fn role_launcher(log_level: Option<&String>) -> Result<Launcher> {
    let mut base_args = vec!["--role-process".to_string()];
    if let Some(level) = log_level {
        base_args.push("--log-level".to_string());
        base_args.push(level.clone());
    }
    Launcher::current_exe(base_args).context("Failed to prepare role process launcher")
}

/// Run the whole pipeline inside this process
async fn run_single_process(config: &ConveyorConfig) -> Result<()> {
    info!("Running pipeline in a single process");
    let engine = Arc::new(BuiltinEngine::new(None));
    let pipeline = PipelineConfig::standalone(RunId::local(), config.engine.clone());

    let mut task = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run(pipeline).await }
    });

    tokio::select! {
        joined = &mut task => joined.context("Pipeline task failed")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupt received; shutting the pipeline down");
            engine.shutdown().await;
            task.await.context("Pipeline task failed")?
        }
    }
}

async fn run_command(
    mut config: ConveyorConfig,
    cpus: usize,
    remote: bool,
    run_id: Option<&String>,
    broker: &BrokerArgs,
    log_level: Option<&String>,
) -> Result<()> {
    if cpus == 0 {
        bail!("--cpus must be at least 1");
    }
    apply_broker_args(&mut config, broker)?;

    if remote {
        let run_id = run_id.map(|id| RunId::new(id.as_str()));
        run_remotely(cpus, run_id, &config, role_launcher(log_level)?).await?;
    } else if cpus == 1 {
        run_single_process(&config).await?;
    } else {
        run_locally(cpus, &config, role_launcher(log_level)?).await?;
    }

    info!("Run finished");
    Ok(())
}

async fn serve_command(
    mut config: ConveyorConfig,
    max_workers: usize,
    broker: &BrokerArgs,
    log_level: Option<&String>,
) -> Result<()> {
    apply_broker_args(&mut config, broker)?;
    let node = RemoteNode::connect(&config, role_launcher(log_level)?, max_workers)
        .await
        .context("Failed to connect remote node to the broker")?;

    let launched = node
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for interrupt: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Interrupt received");
        })
        .await?;

    info!(launched, "Remote node stopped");
    Ok(())
}

/// Body of a role process
///
/// Failures before the engine starts are recorded in the fault slot too,
/// so the supervisor always finds a record next to a nonzero exit.
async fn role_process_command(
    pipeline_config: &Path,
    fault_slot: &Path,
    queue_manager: Option<SocketAddr>,
) -> Result<()> {
    let slot = FaultSlot::new(fault_slot);

    let setup = async {
        let raw = tokio::fs::read(pipeline_config)
            .await
            .with_context(|| format!("Failed to read pipeline config {:?}", pipeline_config))?;
        let config: PipelineConfig =
            serde_json::from_slice(&raw).context("Failed to parse pipeline config")?;
        let manager = match queue_manager {
            Some(addr) => Some(
                ManagerClient::connect(addr)
                    .await
                    .with_context(|| format!("Failed to connect to queue manager at {}", addr))?,
            ),
            None => None,
        };
        anyhow::Ok((config, manager))
    }
    .await;

    let (config, manager) = match setup {
        Ok(ready) => ready,
        Err(e) => {
            let record = FaultRecord::new(fault_kind_of(&e), format!("{:?}", e));
            if let Err(write_err) = slot.record(&record) {
                error!("Could not record fault: {}", write_err);
            }
            return Err(e);
        }
    };

    debug!(role = %config.role, run_id = %config.run_id, "Role process configured");
    run_role_process(Arc::new(BuiltinEngine::new(manager)), config, &slot).await?;
    Ok(())
}

/// Handle configuration validation
fn handle_config_validate(config_file: &PathBuf) -> Result<()> {
    if !config_file.exists() {
        bail!("Configuration file not found: {:?}", config_file);
    }

    match ConfigLoader::new().from_file(config_file) {
        Ok(_) => {
            println!("Configuration file is valid");
            Ok(())
        }
        Err(e) => {
            println!("Configuration validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// Handle configuration generation
fn handle_config_generate(output: &PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!(
            "Output file already exists: {:?}. Use --force to overwrite.",
            output
        );
    }

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).context("Failed to create output directory")?;
    }

    fs::write(output, ConveyorConfig::generate_sample())
        .with_context(|| format!("Failed to write {:?}", output))?;
    println!("Sample configuration written to {:?}", output);
    Ok(())
}

/// Handle configuration display; the broker password is masked
fn handle_config_show(config: &ConveyorConfig, format: &str) -> Result<()> {
    let mut shown = config.clone();
    shown.broker.password = "***".to_string();

    let rendered = match format {
        "yaml" => serde_yaml::to_string(&shown)?,
        "json" => serde_json::to_string_pretty(&shown)?,
        other => bail!("Unknown format '{}'; expected yaml or json", other),
    };
    println!("{}", rendered);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Role processes first: their logging and failure handling differ
    if cli.role_process {
        init_role_tracing(cli.log_level.as_ref())?;
        let (Some(pipeline_config), Some(fault_slot)) = (&cli.pipeline_config, &cli.fault_slot)
        else {
            bail!("--role-process needs --pipeline-config and --fault-slot");
        };
        return role_process_command(pipeline_config, fault_slot, cli.queue_manager).await;
    }

    let config = load_config(cli.config.as_ref())?;
    init_host_tracing(&config.logging, cli.log_level.as_ref())?;
    debug!("Conveyor CLI starting");

    match &cli.command {
        Some(Commands::Run {
            cpus,
            remote,
            run_id,
            broker,
        }) => {
            run_command(
                config,
                *cpus,
                *remote,
                run_id.as_ref(),
                broker,
                cli.log_level.as_ref(),
            )
            .await
        }
        Some(Commands::Serve {
            max_workers,
            broker,
        }) => serve_command(config, *max_workers, broker, cli.log_level.as_ref()).await,
        Some(Commands::Config { config_cmd }) => match config_cmd {
            ConfigCommands::Validate { config_file } => handle_config_validate(config_file),
            ConfigCommands::Generate { output, force } => handle_config_generate(output, *force),
            ConfigCommands::Show { format } => handle_config_show(&config, format),
        },
        None => {
            println!("No command specified. Use --help for usage information.");
            Ok(())
        }
    }
}
