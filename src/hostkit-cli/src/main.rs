//! Hostkit - interactive plugin host binary.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use hostkit_plugins::{
    CommandDispatcher, Config, DynamicConfig, PluginDescriptor, PluginRegistry, StaticConfig,
};

mod builtin;
mod session;
mod system;

use builtin::{TEXT_MODULE, TextPlugin};

const CONFIG_FILE: &str = "hostkit.yml";

const DEFAULT_CONFIG: &str = "\
# Hostkit host configuration
prompt: \"hostkit> \"
echo_separator: \" \"
";

/// Hostkit plugin host
#[derive(Parser, Debug)]
#[command(name = "hostkit")]
#[command(about = "Run commands contributed by Hostkit plugins")]
#[command(version)]
struct Args {
    /// Configuration file path (YAML)
    #[arg(short, long, env = "HOSTKIT_CONFIG")]
    config: Option<String>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,

    /// Command to run once instead of starting a session
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn setup_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Open the YAML config at `path`, or the per-user one when no path is given.
fn load_config(path: Option<&str>) -> anyhow::Result<Arc<dyn Config>> {
    let config = match path {
        Some(path) => {
            let path = Path::new(path);
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow::anyhow!("invalid config path: {}", path.display()))?;
            DynamicConfig::open(dir, name, DEFAULT_CONFIG)?
        }
        None => match DynamicConfig::default_dir() {
            Some(dir) => DynamicConfig::open(dir, CONFIG_FILE, DEFAULT_CONFIG)?,
            None => {
                warn!("No config directory available, using built-in defaults");
                return Ok(Arc::new(
                    StaticConfig::new(CONFIG_FILE)
                        .with("prompt", "hostkit> ")
                        .with("echo_separator", " "),
                ));
            }
        },
    };

    info!("Using config {}", config.path().display());
    Ok(Arc::new(config))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    setup_logging(&args.log_level, args.json_logs);

    let config = match load_config(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    let prompt = config
        .get_string("prompt")
        .unwrap_or_else(|_| "hostkit> ".to_string());

    let registry = PluginRegistry::new(config);
    registry.set_system_commands(system::commands(&registry));
    registry.register_plugin(TEXT_MODULE, PluginDescriptor::of::<TextPlugin>());

    let (dispatcher, _task) = CommandDispatcher::spawn(&registry);

    let code = if let Some((tag, tokens)) = args.command.split_first() {
        let outcome = dispatcher.execute(None, tag.as_str(), tokens.to_vec()).await;
        if session::report(outcome) {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    } else {
        match session::run(&dispatcher, &prompt).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Session error: {:#}", e);
                ExitCode::FAILURE
            }
        }
    };

    for (module, stopped) in registry.shutdown() {
        info!("Stopped {} (clean: {})", module, stopped);
    }

    code
}
