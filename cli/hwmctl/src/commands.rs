//! Subcommands, one per operation.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use hwm_client::{Connector, HttpClient, HttpConnector, ResourceClient};
use hwm_converge::discovery::HardwareDiscovery;
use hwm_converge::operations;
use hwm_converge::{
    ApplianceLogin, ApplianceSpec, BatchArgs, ConvergeError, OperationArgs, ServerHardwareSpec,
    ServerProfileSpec, ServerProfileTemplateSpec, XmlDataDiscovery,
};
use serde::de::DeserializeOwned;
use tracing::info;

use crate::config::Settings;
use crate::logging::LogFormat;
use crate::output::{BatchOutput, Output};

/// Converge a hardware-management appliance and its resources.
#[derive(Debug, Parser)]
#[command(name = "hwmctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Settings file; defaults to config.toml in the user config directory.
    #[arg(long, global = true, env = "HWM_CONFIG")]
    config: Option<PathBuf>,

    /// Log format on stderr.
    #[arg(long, global = true, value_enum, default_value = "text", env = "HWM_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// First-boot setup: EULA, credential rotation and network settings.
    ApplianceSettings(ArgsFile),

    /// Import, remove or power-control a physical server.
    ServerHardware(ArgsFile),

    /// Create, update or remove a server profile template.
    ServerProfileTemplate(ArgsFile),

    /// Create, update or remove a server profile.
    ServerProfile(ArgsFile),

    /// Converge a list of resources in one run.
    Apply(ArgsFile),
}

#[derive(Debug, Args)]
pub struct ArgsFile {
    /// JSON arguments file, or `-` for stdin.
    #[arg(long = "args", default_value = "-")]
    path: String,
}

impl ArgsFile {
    fn read<T: DeserializeOwned>(&self) -> Result<T> {
        let contents = if self.path == "-" {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read arguments from stdin")?;
            buffer
        } else {
            std::fs::read_to_string(&self.path)
                .with_context(|| format!("Failed to read arguments from {}", self.path))?
        };

        parse_args(&contents).with_context(|| format!("Invalid arguments in {}", self.path))
    }
}

fn parse_args<T: DeserializeOwned>(contents: &str) -> Result<T> {
    Ok(serde_json::from_str(contents)?)
}

impl Cli {
    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    pub async fn run(self, settings: &Settings) -> Result<Output> {
        match self.command {
            Commands::ApplianceSettings(args) => {
                let spec: ApplianceSpec = args.read()?;
                let connector = HttpConnector::new(settings.http());
                let result =
                    operations::appliance_settings(&connector, &spec, settings.bootstrap()).await?;
                Ok(Output::Single(result))
            }
            Commands::ServerHardware(args) => {
                let args: OperationArgs<ServerHardwareSpec> = args.read()?;
                let client = login(settings, &args.login).await?;
                let discovery = if settings.discovery {
                    Some(XmlDataDiscovery::new(settings.timeout(), settings.accept_invalid_certs)?)
                } else {
                    None
                };
                let result = operations::server_hardware(
                    &client,
                    args.spec,
                    args.state,
                    discovery.as_ref().map(|d| d as &dyn HardwareDiscovery),
                )
                .await?;
                Ok(Output::Single(result))
            }
            Commands::ServerProfileTemplate(args) => {
                let args: OperationArgs<ServerProfileTemplateSpec> = args.read()?;
                let client = login(settings, &args.login).await?;
                let result =
                    operations::server_profile_template(&client, args.spec, args.state).await?;
                Ok(Output::Single(result))
            }
            Commands::ServerProfile(args) => {
                let args: OperationArgs<ServerProfileSpec> = args.read()?;
                let client = login(settings, &args.login).await?;
                let result = operations::server_profile(&client, args.spec, args.state).await?;
                Ok(Output::Single(result))
            }
            Commands::Apply(args) => {
                let args: BatchArgs = args.read()?;
                let client = login(settings, &args.login).await?;
                let results =
                    operations::apply_batch(&client, &args.resources, args.concurrency).await?;
                Ok(Output::Batch(BatchOutput::new(results)))
            }
        }
    }
}

async fn login(settings: &Settings, login: &ApplianceLogin) -> Result<HttpClient, ConvergeError> {
    let mut client = HttpConnector::new(settings.http())
        .connect(&login.oneview_host)
        .await?;
    client.login(&login.credentials()).await?;
    info!(address = %login.oneview_host, user = %login.username, "Logged in");
    Ok(client)
}
