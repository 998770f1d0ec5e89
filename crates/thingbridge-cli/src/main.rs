//! Command-line interface for the ThingBridge gateway.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use thingbridge_bindings::{
    available_technologies, BindingCatalog, BindingRegistry, ConsumerHandle, Dispatcher,
    FnConsumer, Poller, ReadRequest, RecordStatus, RequestOutcome, ResourceRegistration,
    WriteRequest,
};
use thingbridge_core::config::env_vars;
use thingbridge_core::{logging, EventBus, GatewayConfig, SharedEventBus};

/// Default gateway file when neither `--config` nor `THINGBRIDGE_CONFIG` is set.
const DEFAULT_CONFIG_FILE: &str = "thingbridge.toml";

/// ThingBridge - bind device properties and actions to their technologies.
#[derive(Parser, Debug)]
#[command(name = "thingbridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Gateway file path.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Register every resource and poll until interrupted.
    Run {
        /// Poll once, print the outcomes and exit.
        #[arg(long)]
        once: bool,
    },
    /// Validate the gateway file and list the endpoints it registers.
    Check,
    /// Read property endpoints once.
    Read {
        /// Endpoint URIs.
        #[arg(required = true)]
        endpoints: Vec<String>,
    },
    /// Write a JSON payload to an action endpoint.
    Write {
        /// Endpoint URI.
        endpoint: String,
        /// JSON payload.
        payload: String,
    },
    /// List the technologies compiled into this build.
    Technologies,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    match args.command {
        Command::Technologies => {
            for technology in available_technologies() {
                println!("{}", technology);
            }
            Ok(())
        }
        Command::Check => {
            let config = load_config(args.config)?;
            run_check(&config)
        }
        Command::Run { once } => {
            let config = load_config(args.config)?;
            run_gateway(&config, once).await
        }
        Command::Read { endpoints } => {
            let config = load_config(args.config)?;
            let gateway = Gateway::build(&config, None)?;
            let requests: Vec<ReadRequest> = endpoints.into_iter().map(ReadRequest::new).collect();
            let outcomes = gateway.dispatcher.read_batch(&requests).await;
            gateway.shutdown();
            print_outcomes(&outcomes)
        }
        Command::Write { endpoint, payload } => {
            let config = load_config(args.config)?;
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("payload is not valid JSON")?;
            let gateway = Gateway::build(&config, None)?;
            let outcomes = gateway
                .dispatcher
                .write_batch(&[WriteRequest::new(endpoint, payload)])
                .await;
            gateway.shutdown();
            print_outcomes(&outcomes)
        }
    }
}

/// Resolve the gateway file path and load it with env overrides.
fn load_config(path: Option<PathBuf>) -> Result<GatewayConfig> {
    let path = path
        .or_else(|| std::env::var(env_vars::CONFIG_PATH).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = GatewayConfig::load(&path)
        .with_context(|| format!("Failed to load gateway file {}", path.display()))?;
    Ok(config.with_env_overrides())
}

/// A started registry with every resource of the gateway file registered.
struct Gateway {
    event_bus: SharedEventBus,
    registry: Arc<BindingRegistry>,
    dispatcher: Dispatcher,
}

impl Gateway {
    fn build(config: &GatewayConfig, consumer: Option<ConsumerHandle>) -> Result<Self> {
        let event_bus = Arc::new(EventBus::with_capacity(config.gateway.event_bus_capacity));
        let catalog = Arc::new(BindingCatalog::with_builtin());
        let registry = Arc::new(BindingRegistry::new(catalog, event_bus.clone()));
        registry.start();

        for (index, resource) in config.resources.iter().enumerate() {
            let registration = ResourceRegistration::from_config(resource, consumer.clone())
                .with_context(|| format!("resources[{}] ({})", index, resource.device))?;
            registry
                .register(registration)
                .with_context(|| format!("resources[{}] ({})", index, resource.device))?;
        }

        let dispatcher = Dispatcher::new(registry.clone());
        Ok(Self {
            event_bus,
            registry,
            dispatcher,
        })
    }

    fn shutdown(&self) {
        self.registry.stop();
    }
}

fn run_check(config: &GatewayConfig) -> Result<()> {
    let gateway = Gateway::build(config, None)?;
    println!("Gateway: {}", config.gateway.name);
    for endpoint in gateway.registry.endpoints() {
        let entry = gateway.registry.lookup_entry(&endpoint)?;
        println!(
            "  {:<8} {:<10} {}",
            entry.kind().to_string(),
            entry.technology,
            endpoint
        );
    }
    println!("{} endpoint(s) OK", gateway.registry.len());
    gateway.shutdown();
    Ok(())
}

async fn run_gateway(config: &GatewayConfig, once: bool) -> Result<()> {
    let consumer = ConsumerHandle::new(FnConsumer::new(|record: &thingbridge_bindings::ValueRecord| {
        match record.status {
            RecordStatus::Success => tracing::info!(
                resource = %record.resource_name,
                value = ?record.value,
                timestamp = record.timestamp,
                "Value updated"
            ),
            RecordStatus::Failure => tracing::warn!(
                resource = %record.resource_name,
                reason = record.message.as_deref().unwrap_or_default(),
                "Value rejected"
            ),
        }
    }));
    let gateway = Gateway::build(config, Some(consumer.clone()))?;

    if once {
        let outcomes = Poller::poll_once(&gateway.dispatcher).await;
        gateway.shutdown();
        return print_outcomes(&outcomes);
    }

    tracing::info!(
        gateway = %config.gateway.name,
        endpoints = gateway.registry.len(),
        "Gateway started"
    );

    let mut events = gateway.event_bus.filter().property_events();
    let forwarder = tokio::spawn(async move {
        while let Some(message) = events.recv().await {
            tracing::debug!(topic = %message.topic, event = %message.event.type_name(), "Bus message");
        }
    });

    let poller = Poller::spawn(
        gateway.dispatcher.clone(),
        Duration::from_secs(config.gateway.poll_interval_secs),
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutting down");
    poller.stop();
    gateway.registry.unregister(&consumer);
    gateway.shutdown();
    forwarder.abort();
    Ok(())
}

fn print_outcomes(outcomes: &[RequestOutcome]) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(outcomes)?);
    if outcomes.iter().any(|o| !o.is_success()) {
        anyhow::bail!(
            "{} of {} request(s) failed",
            outcomes.iter().filter(|o| !o.is_success()).count(),
            outcomes.len()
        );
    }
    Ok(())
}
