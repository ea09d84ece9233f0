mod cli;
mod error;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fieldgate_config::{ControllerSection, FileConfig, GatewaySection};
use fieldgate_core::{Gateway, GatewayConfig, StaticAccess, ViewerId};
use fieldgate_proto::{SimController, SimFleet};

use crate::cli::{Cli, Command, GlobalOpts, RunArgs};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // stdout carries the telemetry stream; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Check => check(&cli.global),
        Command::Run(args) => run_gateway(args, &cli.global).await,
    }
}

fn config_file_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(fieldgate_config::config_path)
}

fn load_gateway_config(global: &GlobalOpts) -> Result<GatewayConfig, CliError> {
    let path = config_file_path(global);
    let wrap = |source| CliError::Config {
        path: path.display().to_string(),
        source,
    };

    let file_cfg = fieldgate_config::load_from(&path).map_err(wrap)?;
    fieldgate_config::to_gateway_config(&file_cfg).map_err(wrap)
}

fn check(global: &GlobalOpts) -> Result<(), CliError> {
    let config = load_gateway_config(global)?;

    println!("config ok: {} controller(s)", config.controllers.len());
    for controller in &config.controllers {
        println!(
            "  {} ({}) -> {}",
            controller.id, controller.name, controller.address
        );
    }
    println!(
        "poll every {:?}, broadcast every {:?}, reconnect delay {:?}",
        config.options.poll_interval,
        config.options.broadcast_interval,
        config.options.reconnect_delay
    );
    Ok(())
}

/// Fleet used by `run --demo`: two simulated solar parks.
fn demo_config() -> Result<GatewayConfig, CliError> {
    let file_cfg = FileConfig {
        gateway: GatewaySection {
            poll_interval_secs: 1,
            broadcast_interval_secs: 1,
            reconnect_delay_secs: 10,
            ..GatewaySection::default()
        },
        controllers: vec![
            ControllerSection {
                id: "eco-solar".into(),
                name: Some("Eco Solar".into()),
                address: "opc.tcp://10.0.40.11:4840/".into(),
            },
            ControllerSection {
                id: "north-ridge".into(),
                name: Some("North Ridge".into()),
                address: "opc.tcp://10.0.40.12:4840/".into(),
            },
        ],
    };
    fieldgate_config::to_gateway_config(&file_cfg).map_err(|source| CliError::Config {
        path: "<demo>".into(),
        source,
    })
}

async fn run_gateway(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let config = if args.demo {
        demo_config()?
    } else {
        load_gateway_config(global)?
    };
    if config.controllers.is_empty() {
        return Err(CliError::EmptyFleet);
    }

    // The protocol stack is pluggable; this binary ships with the
    // simulated fleet, one device per configured endpoint.
    let fleet = SimFleet::new(
        config
            .controllers
            .iter()
            .map(|c| SimController::demo(c.address.clone(), c.name.clone())),
    );

    let gateway = Gateway::new(config, Arc::new(fleet), Arc::new(StaticAccess::allow_all()));
    gateway.start();

    let (_subscription, mut updates) = gateway.subscribe(&ViewerId::new("console")).await?;
    info!("streaming telemetry updates, press Ctrl-C to stop");

    let mut printed: u64 = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            message = updates.recv() => {
                let Some(message) = message else { break };
                match serde_json::to_string(&message) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!(error = %e, "failed to serialize update"),
                }
                printed += 1;
                if args.updates.is_some_and(|limit| printed >= limit) {
                    break;
                }
            }
        }
    }

    gateway.shutdown().await;
    Ok(())
}
