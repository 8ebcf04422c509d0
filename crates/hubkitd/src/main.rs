// # hubkitd - hubkit daemon
//
// A thin layer over hubkit-core. It does no device work of its own; every
// integration lives in its own crate and every lifecycle rule in the host.
//
// The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing tracing and the runtime
// 3. Registering the integrations compiled in
// 4. Optionally running one config flow to add an entry
// 5. Setting up all stored entries and unloading them on shutdown
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Logging
// - `HUBKIT_LOG_LEVEL`: trace, debug, info, warn or error (default info)
//
// ### Entry Store
// - `HUBKIT_ENTRY_STORE`: file or memory (default memory)
// - `HUBKIT_ENTRY_STORE_PATH`: Path to the entries file (for file)
//
// ### Polling and Setup
// - `HUBKIT_UPDATE_INTERVAL_SECS`: Default coordinator poll interval
// - `HUBKIT_OFFLINE_RETRY_SECS`: Delay before polling an offline device again
// - `HUBKIT_SETUP_RETRY_SECS`: Delay between setup attempts of offline entries
//
// ### Adding an Entry
// - `HUBKIT_FLOW_DOMAIN`: Integration whose config flow runs at startup
// - `HUBKIT_FLOW_INPUT`: JSON object submitted to the flow's first form
//
// ## Example
//
// ```bash
// export HUBKIT_ENTRY_STORE=file
// export HUBKIT_ENTRY_STORE_PATH=/var/lib/hubkit/entries.json
// export HUBKIT_FLOW_DOMAIN=bluesound
// export HUBKIT_FLOW_INPUT='{"host": "192.168.1.40"}'
//
// hubkitd
// ```

use anyhow::{Context, Result};
use hubkit_core::state::open_entry_store;
use hubkit_core::{
    EntryStoreConfig, FlowManager, FlowResult, Host, HostEvent, HubConfig, IntegrationRegistry,
};
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum HubkitExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<HubkitExitCode> for ExitCode {
    fn from(code: HubkitExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// A config flow to run once at startup
struct StartupFlow {
    domain: String,
    input: serde_json::Value,
}

/// Application configuration
struct Config {
    hub: HubConfig,
    flow: Option<StartupFlow>,
    log_level: String,
}

fn env_number<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{} must be a number, got '{}'", name, value)),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let mut hub = HubConfig::new();

        hub.entry_store = match env::var("HUBKIT_ENTRY_STORE")
            .unwrap_or_else(|_| "memory".to_string())
            .as_str()
        {
            "memory" => EntryStoreConfig::Memory,
            "file" => EntryStoreConfig::File {
                path: env::var("HUBKIT_ENTRY_STORE_PATH").context(
                    "HUBKIT_ENTRY_STORE_PATH is required when HUBKIT_ENTRY_STORE=file. \
                    Set it via: export HUBKIT_ENTRY_STORE_PATH=/var/lib/hubkit/entries.json",
                )?,
            },
            other => anyhow::bail!(
                "HUBKIT_ENTRY_STORE '{}' is not supported. Supported types: file, memory",
                other
            ),
        };

        if let Some(secs) = env_number("HUBKIT_UPDATE_INTERVAL_SECS")? {
            hub.coordinator.update_interval_secs = secs;
        }
        if let Some(secs) = env_number("HUBKIT_OFFLINE_RETRY_SECS")? {
            hub.coordinator.offline_retry_secs = secs;
        }
        if let Some(secs) = env_number("HUBKIT_SETUP_RETRY_SECS")? {
            hub.host.setup_retry_secs = secs;
        }

        let flow = match env::var("HUBKIT_FLOW_DOMAIN") {
            Ok(domain) => {
                let raw = env::var("HUBKIT_FLOW_INPUT")
                    .context("HUBKIT_FLOW_INPUT is required when HUBKIT_FLOW_DOMAIN is set")?;
                let input: serde_json::Value = serde_json::from_str(&raw)
                    .context("HUBKIT_FLOW_INPUT must be a JSON object")?;
                if !input.is_object() {
                    anyhow::bail!("HUBKIT_FLOW_INPUT must be a JSON object");
                }
                Some(StartupFlow { domain, input })
            }
            Err(_) => None,
        };

        Ok(Self {
            hub,
            flow,
            log_level: env::var("HUBKIT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.hub.validate().context("Invalid hub configuration")?;

        if let EntryStoreConfig::File { path } = &self.hub.entry_store
            && let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "HUBKIT_ENTRY_STORE_PATH parent directory does not exist: {}. \
                Create it first: sudo mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        if let Some(flow) = &self.flow
            && flow.domain.trim().is_empty()
        {
            anyhow::bail!("HUBKIT_FLOW_DOMAIN cannot be empty");
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "HUBKIT_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return HubkitExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return HubkitExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return HubkitExitCode::ConfigError.into();
    }

    info!("Starting hubkitd");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return HubkitExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        match run_daemon(config).await {
            Ok(code) => code,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                HubkitExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Registry with every integration compiled in
fn build_registry() -> IntegrationRegistry {
    let registry = IntegrationRegistry::new();

    #[cfg(feature = "ads")]
    {
        info!("Registering ADS integration");
        hubkit_ads::register(&registry);
    }

    #[cfg(feature = "bluesound")]
    {
        info!("Registering Bluesound integration");
        hubkit_bluesound::register(&registry);
    }

    registry
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<HubkitExitCode> {
    let registry = Arc::new(build_registry());
    if registry.list_domains().is_empty() {
        warn!("No integrations compiled in");
    }

    let store = match open_entry_store(&config.hub.entry_store).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open entry store: {}", e);
            return Ok(HubkitExitCode::ConfigError);
        }
    };

    if let Some(flow) = &config.flow {
        if !registry.has_domain(&flow.domain) {
            error!("HUBKIT_FLOW_DOMAIN '{}' is not a registered integration", flow.domain);
            return Ok(HubkitExitCode::ConfigError);
        }
        let flows = FlowManager::new(Arc::clone(&registry), Arc::clone(&store));
        run_startup_flow(&flows, flow).await?;
    }

    let (host, events) = match Host::new(registry, store, &config.hub) {
        Ok(host) => host,
        Err(e) => {
            error!("Failed to create host: {}", e);
            return Ok(HubkitExitCode::ConfigError);
        }
    };
    let event_log = tokio::spawn(log_events(events));

    let states = host.setup_all().await.context("Failed to set up entries")?;
    info!("Set up {} config entries", states.len());
    for (entry_id, state) in &states {
        debug!("[{}] {}", entry_id, state);
    }

    let signal = wait_for_shutdown().await?;
    info!("Received shutdown signal: {}", signal);
    info!("Shutting down daemon");

    host.shutdown().await.context("Shutdown failed")?;
    drop(host);
    if let Err(e) = event_log.await {
        warn!("Event log task ended abnormally: {}", e);
    }

    Ok(HubkitExitCode::CleanShutdown)
}

/// Submit the configured input to a domain's config flow
///
/// A rejected form is logged and the daemon carries on with the entries it
/// already has.
async fn run_startup_flow(flows: &FlowManager, flow: &StartupFlow) -> Result<()> {
    info!("Running config flow for {}", flow.domain);

    let step = flows
        .start(&flow.domain)
        .await
        .with_context(|| format!("Failed to start {} config flow", flow.domain))?;
    let step = flows
        .configure(&step.flow_id, flow.input.clone())
        .await
        .with_context(|| format!("{} config flow failed", flow.domain))?;

    match (&step.result, &step.entry) {
        (_, Some(entry)) => info!(
            "Created {} entry '{}' ({})",
            entry.domain, entry.title, entry.entry_id
        ),
        (FlowResult::ShowForm { errors, .. }, None) => {
            flows.abort(&step.flow_id).await;
            warn!("{} config flow rejected the input: {:?}", flow.domain, errors);
        }
        (FlowResult::Abort { reason }, None) => {
            info!("{} config flow aborted: {}", flow.domain, reason)
        }
        (FlowResult::CreateEntry { title, .. }, None) => {
            warn!("{} config flow created '{}' without an entry", flow.domain, title)
        }
    }

    Ok(())
}

/// Log host events until the host stops
async fn log_events(mut events: mpsc::Receiver<HostEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            HostEvent::EntryLoaded {
                entry_id,
                domain,
                entities,
            } => info!("[{}] {} entry loaded with {} entities", entry_id, domain, entities),
            HostEvent::SetupRetry {
                entry_id,
                error,
                retry_in_secs,
            } => warn!("[{}] Setup failed ({}), retrying in {}s", entry_id, error, retry_in_secs),
            HostEvent::SetupFailed { entry_id, error } => {
                error!("[{}] Setup failed: {}", entry_id, error)
            }
            HostEvent::TaskFailed {
                entry_id,
                task,
                error,
            } => error!("[{}] Task {} failed: {}", entry_id, task, error),
            HostEvent::Stopped => {
                debug!("Host stopped");
                break;
            }
            other => debug!("{:?}", other),
        }
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
