use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use config::{Config, File as ConfigFile};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use phishguard_forest::{Forest, ModelStore};
use phishguard_rpc::{start_server, AppState};
use std::net::{IpAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod version;

use version::{git_commit_hash, PHISHGUARD_VERSION};

const DEFAULT_CONFIG_PATH: &str = "config/phishguard.toml";
const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 5000;
const DEFAULT_MODEL_PATH: &str = "model/phishing_model.json";
const LOG_FORMATS: [&str; 2] = ["pretty", "json"];

#[derive(Debug, Clone, PartialEq)]
struct AppConfig {
    config_path: Option<PathBuf>,
    rpc_host: String,
    rpc_port: u16,
    model_path: PathBuf,
    expected_model_hash: Option<String>,
    require_model: bool,
    log_level: String,
    log_format: String,
    prometheus_enabled: bool,
}

impl AppConfig {
    fn load(config_path_override: Option<&str>) -> Result<Self> {
        let resolved_path = if let Some(path) = config_path_override {
            let path = PathBuf::from(path);
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            Some(path)
        } else {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if path.exists() {
                Some(path)
            } else {
                None
            }
        };

        let mut builder = Config::builder();

        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }

        builder = builder.add_source(config::Environment::with_prefix("PHISHGUARD"));

        let config = builder.build()?;

        let rpc_port = match get_string_value(&config, &["rpc_port", "rpc.port"]) {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("invalid rpc_port value '{raw}'"))?,
            None => DEFAULT_RPC_PORT,
        };

        Ok(Self {
            config_path: resolved_path,
            rpc_host: get_string_value(&config, &["rpc_host", "rpc.host"])
                .unwrap_or_else(|| DEFAULT_RPC_HOST.to_string()),
            rpc_port,
            model_path: get_string_value(&config, &["model_path", "model.path"])
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            expected_model_hash: get_string_value(
                &config,
                &["expected_model_hash", "model.expected_hash"],
            ),
            require_model: get_bool_value(&config, &["require_model", "model.required"], true),
            log_level: get_string_value(&config, &["log_level", "logging.level"])
                .unwrap_or_else(|| "info".to_string()),
            log_format: get_string_value(&config, &["log_format", "logging.format"])
                .unwrap_or_else(|| "pretty".to_string()),
            prometheus_enabled: get_bool_value(
                &config,
                &["prometheus_enabled", "metrics.prometheus_enabled"],
                true,
            ),
        })
    }

    fn validate(&self) -> Result<()> {
        if self.rpc_host.trim().is_empty() {
            anyhow::bail!("RPC_HOST must not be empty");
        }
        if self.rpc_port == 0 {
            anyhow::bail!("RPC_PORT must be greater than zero");
        }
        if !LOG_FORMATS.contains(&self.log_format.as_str()) {
            anyhow::bail!(
                "LOG_FORMAT '{}' is not supported; expected one of {}",
                self.log_format,
                LOG_FORMATS.join(", ")
            );
        }
        Ok(())
    }

    fn bind_addr(&self) -> String {
        match self.rpc_host.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => format!("[{ip}]:{}", self.rpc_port),
            _ => format!("{}:{}", self.rpc_host, self.rpc_port),
        }
    }
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        config
            .get_string(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn get_bool_value(config: &Config, keys: &[&str], default: bool) -> bool {
    for key in keys {
        if let Ok(value) = config.get_bool(key) {
            return value;
        }
        if let Ok(raw) = config.get_string(key) {
            if let Ok(parsed) = raw.parse::<bool>() {
                return parsed;
            }
        }
    }
    default
}

fn load_config_with_overrides(matches: &clap::ArgMatches) -> Result<AppConfig> {
    let config_path = matches
        .get_one::<String>("config")
        .map(|value| value.as_str());
    let mut config = AppConfig::load(config_path)?;
    apply_overrides(matches, &mut config);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(matches: &clap::ArgMatches, config: &mut AppConfig) {
    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }

    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }

    if let Some(rpc_host) = matches.get_one::<String>("rpc-host") {
        config.rpc_host = rpc_host.clone();
    }

    if let Some(rpc_port) = matches.get_one::<u16>("rpc-port") {
        config.rpc_port = *rpc_port;
    }

    if let Some(model_path) = matches.get_one::<String>("model") {
        config.model_path = PathBuf::from(model_path);
    }

    if let Some(hash) = matches.get_one::<String>("expected-model-hash") {
        config.expected_model_hash = Some(hash.clone());
    }

    if matches.get_flag("allow-missing-model") {
        config.require_model = false;
    }

    if matches.get_flag("disable-metrics") {
        config.prometheus_enabled = false;
    }
}

fn cli() -> Command {
    Command::new("phishguard-node")
        .version(PHISHGUARD_VERSION)
        .about("PhishGuard random-forest prediction service")
        .disable_version_flag(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("version_flag")
                .short('V')
                .long("version")
                .action(ArgAction::SetTrue)
                .help("Print detailed version information and exit"),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .action(ArgAction::SetTrue)
                .help("Validate configuration and the model artifact, then exit"),
        )
        .arg(
            Arg::new("model")
                .short('m')
                .long("model")
                .value_name("FILE")
                .help("Path to the exported forest JSON"),
        )
        .arg(
            Arg::new("expected-model-hash")
                .long("expected-model-hash")
                .value_name("HEX")
                .help("Refuse to serve a forest whose fingerprint differs"),
        )
        .arg(
            Arg::new("allow-missing-model")
                .long("allow-missing-model")
                .action(ArgAction::SetTrue)
                .help("Start even if the model cannot be loaded"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(LOG_FORMATS)
                .help("Select log output format"),
        )
        .arg(
            Arg::new("rpc-host")
                .long("rpc-host")
                .value_name("HOST")
                .help("Override HTTP bind host"),
        )
        .arg(
            Arg::new("rpc-port")
                .long("rpc-port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("Override HTTP port"),
        )
        .arg(
            Arg::new("disable-metrics")
                .long("disable-metrics")
                .action(ArgAction::SetTrue)
                .help("Disable the Prometheus metrics exporter"),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    if matches.get_flag("version_flag") {
        print_version_info();
        return Ok(());
    }

    let config = load_config_with_overrides(&matches)?;

    if matches.get_flag("check") {
        run_self_check(&config)?;
        return Ok(());
    }

    init_logging(&config)?;
    let prometheus_handle = init_metrics(&config);

    info!(
        "Starting PhishGuard {} (commit {})",
        PHISHGUARD_VERSION,
        git_commit_hash()
    );
    if let Some(path) = &config.config_path {
        info!("Config file: {}", path.display());
    } else {
        info!("Config file: (built-in defaults)");
    }
    info!("Model path: {}", config.model_path.display());

    let store = Arc::new(ModelStore::new());
    match store.load_from_path(&config.model_path, config.expected_model_hash.as_deref()) {
        Ok(report) => info!(
            "Serving forest with {} trees (fingerprint {})",
            report.trees, report.fingerprint
        ),
        Err(err) if config.require_model => {
            return Err(err).with_context(|| {
                format!("failed to load model from {}", config.model_path.display())
            });
        }
        Err(err) => warn!(
            "Starting without a model; predictions will be unavailable until a reload succeeds: {}",
            err
        ),
    }

    #[cfg(unix)]
    spawn_reload_on_hangup(
        store.clone(),
        config.model_path.clone(),
        config.expected_model_hash.clone(),
    );

    let mut state = AppState::new(store);
    state.model_path = Some(config.model_path.clone());
    state.expected_model_hash = config.expected_model_hash.clone();
    state.metrics = prometheus_handle;

    if let Ok(ip) = config.rpc_host.parse::<IpAddr>() {
        if ip.is_unspecified() {
            warn!(
                "HTTP host {} binds to all interfaces; consider PHISHGUARD_RPC_HOST=127.0.0.1 behind a reverse proxy",
                config.rpc_host
            );
        }
    }

    start_server(state, &config.bind_addr()).await?;
    info!("PhishGuard stopped");
    Ok(())
}

#[cfg(unix)]
fn spawn_reload_on_hangup(store: Arc<ModelStore>, path: PathBuf, expected_hash: Option<String>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Failed to install SIGHUP handler; reload via HTTP only: {}", err);
                return;
            }
        };

        while hangup.recv().await.is_some() {
            info!("SIGHUP received, reloading {}", path.display());
            let store = store.clone();
            let path = path.clone();
            let expected_hash = expected_hash.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                store.load_from_path(&path, expected_hash.as_deref())
            })
            .await;

            match outcome {
                Ok(Ok(report)) => info!(
                    "Reloaded forest with {} trees (fingerprint {})",
                    report.trees, report.fingerprint
                ),
                Ok(Err(err)) => warn!("Reload rejected, keeping current forest: {}", err),
                Err(err) => warn!("Reload task failed: {}", err),
            }
        }
    });
}

fn init_metrics(config: &AppConfig) -> Option<PrometheusHandle> {
    if !config.prometheus_enabled {
        info!("Prometheus metrics exporter disabled via configuration");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("Prometheus metrics exporter registered");
            describe_counter!("forest_predictions_total", "Predictions served");
            describe_counter!(
                "forest_prediction_errors_total",
                "Predictions rejected with an error"
            );
            describe_counter!(
                "forest_malformed_leaf_total",
                "Votes cast by leaves with an unrecognised value shape"
            );
            describe_counter!(
                "forest_reloads_total",
                "Served forests replaced by a newer load"
            );
            describe_gauge!("forest_trees", "Trees in the currently served forest");
            Some(handle)
        }
        Err(err) => {
            warn!("Failed to install Prometheus metrics exporter: {}", err);
            None
        }
    }
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    Ok(())
}

fn print_version_info() {
    println!(
        "PhishGuard {} (commit {})",
        PHISHGUARD_VERSION,
        git_commit_hash()
    );
}

fn run_self_check(config: &AppConfig) -> Result<()> {
    println!("Running PhishGuard self-check...");
    let mut issues = Vec::new();

    match check_model(&config.model_path, config.expected_model_hash.as_deref()) {
        Ok(summary) => println!("{summary}"),
        Err(err) if config.require_model => issues.push(err),
        Err(err) => println!("warning: {err}"),
    }

    if let Err(err) = ensure_port_available(&config.bind_addr()) {
        issues.push(err);
    }

    if issues.is_empty() {
        println!("OK");
        Ok(())
    } else {
        for issue in &issues {
            eprintln!("- {issue}");
        }
        anyhow::bail!("self-check failed")
    }
}

fn check_model(path: &Path, expected_hash: Option<&str>) -> Result<String, String> {
    let forest = Forest::load_json(path)
        .map_err(|err| format!("model {} failed to load: {err}", path.display()))?;

    let fingerprint = match expected_hash {
        Some(expected) => forest.verify_hash(expected),
        None => forest.hash_hex(),
    }
    .map_err(|err| format!("model {}: {err}", path.display()))?;

    Ok(format!(
        "Model {}: {} trees, {} malformed leaves, fingerprint {}",
        path.display(),
        forest.num_trees(),
        forest.malformed_leaves(),
        fingerprint
    ))
}

fn ensure_port_available(addr: &str) -> Result<(), String> {
    match TcpListener::bind(addr) {
        Ok(listener) => drop(listener),
        Err(err) => return Err(format!("HTTP address {addr} is not available for binding: {err}")),
    }
    Ok(())
}
