use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::process::ExitCode;
use std::sync::Arc;

use conduit::{
    ClientFactory, ConduitError, ConfigError, DeploymentMode, HealthStatus, LogFormat,
    Mapping, OperationRegistry, RuntimeConfig, RuntimeConfigBuilder, init_logging,
};

#[derive(Parser, Debug)]
#[command(name = "conduit", version)]
#[command(about = "Inspect and call Conduit services")]
struct Cli {
    /// Override CONDUIT_MODE (in_process or distributed)
    #[arg(long, global = true)]
    mode: Option<DeploymentMode>,

    /// Extra service endpoint, name=url (repeatable)
    #[arg(long = "endpoint", global = true, value_parser = parse_endpoint)]
    endpoints: Vec<(String, String)>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List known services
    Services,
    /// List the tools of a service
    Tools { service: String },
    /// List the resources of a service
    Resources { service: String },
    /// Call a tool
    Call {
        service: String,
        tool: String,
        /// Input mapping as a JSON object
        #[arg(long)]
        input: Option<String>,
    },
    /// Read a resource
    Read {
        service: String,
        resource: String,
        /// Parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
    },
    /// Probe every endpoint and print its health
    Health,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Runtime(#[from] ConduitError),

    #[error("--{flag} must be a JSON object: {reason}")]
    InvalidJson { flag: &'static str, reason: String },

    #[error(
        "the CLI only reaches distributed services; \
         pass --mode distributed or set CONDUIT_MODE=distributed"
    )]
    InProcessMode,
}

#[derive(Serialize)]
struct HealthRow {
    service: String,
    endpoint: String,
    health: HealthStatus,
}

fn parse_endpoint(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, url)| (name.trim().to_string(), url.trim().to_string()))
        .ok_or_else(|| format!("expected name=url, got '{raw}'"))
}

fn parse_mapping(flag: &'static str, raw: Option<String>) -> Result<Option<Mapping>, CliError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        Ok(other) => Err(CliError::InvalidJson {
            flag,
            reason: format!("got {other}"),
        }),
        Err(e) => Err(CliError::InvalidJson {
            flag,
            reason: e.to_string(),
        }),
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => tracing::error!(error = %e, "Failed to render output"),
    }
}

/// Runtime settings from the environment, with flags layered on top.
///
/// An in-process runtime started here would have an empty registry, so only
/// distributed mode is accepted.
fn load_config(
    mode: Option<DeploymentMode>,
    endpoints: Vec<(String, String)>,
) -> Result<RuntimeConfig, CliError> {
    let mut builder = RuntimeConfigBuilder::from_env()?;
    if let Some(mode) = mode {
        builder = builder.mode(mode);
    }
    for (service, endpoint) in endpoints {
        builder = builder.endpoint(service, endpoint);
    }
    let config = builder.build()?;
    if config.mode == DeploymentMode::InProcess {
        return Err(CliError::InProcessMode);
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(cli.mode, cli.endpoints)?;
    let factory = ClientFactory::new(config, Arc::new(OperationRegistry::new()));
    let result = dispatch(&factory, cli.command).await;
    factory.shutdown().await;
    result
}

async fn dispatch(factory: &ClientFactory, command: Commands) -> Result<(), CliError> {
    let client = factory.client().await;
    match command {
        Commands::Services => print_json(&client.list_services().await?),
        Commands::Tools { service } => print_json(&client.list_tools(&service).await?),
        Commands::Resources { service } => print_json(&client.list_resources(&service).await?),
        Commands::Call {
            service,
            tool,
            input,
        } => {
            let input = parse_mapping("input", input)?;
            print_json(&client.call_tool(&service, &tool, input).await?);
        }
        Commands::Read {
            service,
            resource,
            params,
        } => {
            let params = parse_mapping("params", params)?;
            let content = client.get_resource(&service, &resource, params).await?;
            print_json(&content.into_value());
        }
        Commands::Health => print_json(&health_rows(factory).await?),
    }
    Ok(())
}

async fn health_rows(factory: &ClientFactory) -> Result<Vec<HealthRow>, CliError> {
    let Some(network) = factory.network_client().await else {
        return Err(CliError::InProcessMode);
    };

    let discovery = network.discovery();
    discovery.probe_now().await;
    Ok(discovery
        .records()
        .await
        .into_iter()
        .map(|record| HealthRow {
            service: record.service,
            endpoint: record.address,
            health: record.health,
        })
        .collect())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging(LogFormat::Json);

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("memory=http://m:1").unwrap(),
            ("memory".to_string(), "http://m:1".to_string())
        );
        assert!(parse_endpoint("memory").is_err());
    }

    #[test]
    fn test_parse_mapping() {
        assert!(parse_mapping("input", None).unwrap().is_none());
        let map = parse_mapping("input", Some(r#"{"a":1}"#.into()))
            .unwrap()
            .unwrap();
        assert_eq!(map["a"], 1);
        assert!(parse_mapping("input", Some("[1]".into())).is_err());
        assert!(parse_mapping("input", Some("{".into())).is_err());
    }

    #[test]
    fn test_cli_parses_call() {
        let cli = Cli::parse_from([
            "conduit",
            "--mode",
            "distributed",
            "call",
            "memory",
            "store",
            "--input",
            "{}",
        ]);
        assert_eq!(cli.mode, Some(DeploymentMode::Distributed));
        assert!(matches!(cli.command, Commands::Call { .. }));
    }

    #[test]
    fn test_in_process_mode_is_rejected() {
        let err = load_config(Some(DeploymentMode::InProcess), Vec::new()).unwrap_err();
        assert!(matches!(err, CliError::InProcessMode));
        assert!(err.to_string().contains("--mode distributed"));
    }

    #[test]
    fn test_distributed_mode_keeps_flag_endpoints() {
        let endpoints = vec![("memory".to_string(), "http://m:8001".to_string())];
        let config = load_config(Some(DeploymentMode::Distributed), endpoints).unwrap();
        assert_eq!(config.mode, DeploymentMode::Distributed);
        assert_eq!(
            config.discovery.endpoints.get("memory").map(String::as_str),
            Some("http://m:8001")
        );
    }
}
