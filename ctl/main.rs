#![forbid(unsafe_code)]

//! `presence-ctl`: set a rich-presence status from the command line.
//!
//! Connects to the desktop application's IPC channel, shows the given
//! message as the activity `details`, refreshes it every `--interval`
//! seconds, and on Ctrl-C clears the activity and closes the connection.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use presence_ipc::ipc::PipeSelector;
use presence_ipc::{Activity, AppError, Client, ClientConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "presence-ctl",
    about = "Set a rich-presence status over local IPC",
    version,
    long_about = None
)]
struct Cli {
    /// Application client id. Overrides the config file.
    #[arg(long)]
    client_id: Option<String>,

    /// Pipe index (0-9) or explicit socket path. Overrides the config file.
    #[arg(long)]
    pipe: Option<String>,

    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds between activity refreshes.
    #[arg(long, default_value_t = 60)]
    interval: u64,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Message shown as the activity details.
    message: Vec<String>,
}

impl Cli {
    /// Merge the config file, environment and flags into one configuration.
    fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match (&self.config, &self.client_id) {
            (Some(path), _) => ClientConfig::load_from_path(path)?,
            (None, Some(id)) => ClientConfig::new(id.clone()),
            (None, None) => ClientConfig::new(String::new()),
        };
        if let Some(id) = &self.client_id {
            config.client_id.clone_from(id);
        }
        if let Some(pipe) = &self.pipe {
            config.pipe = PipeSelector::parse(pipe);
        }
        config.apply_env_overrides()?;
        Ok(config)
    }
}

fn main() {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to build tokio runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(run(args)) {
        match &err {
            AppError::InvalidPipe(_) => {
                eprintln!("Error: could not connect; is the desktop application running?");
            }
            AppError::InvalidClientId(_) => eprintln!("Error: invalid client id"),
            AppError::ConnectionClosed(_) => eprintln!("Error: connection lost ({err})"),
            other => eprintln!("Error: {other}"),
        }
        std::process::exit(1);
    }
}

async fn run(args: Cli) -> Result<()> {
    let config = args.client_config()?;
    let message = args.message.join(" ");
    let interval = Duration::from_secs(args.interval.max(1));

    let client = Client::new(config);
    client.connect().await?;
    println!("Connected; updating status every {}s", interval.as_secs());

    let activity = Activity::new().details(message);
    let mut ticker = tokio::time::interval(interval);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted, clearing activity");
                break;
            }
            _ = ticker.tick() => {
                client.update_activity(&activity).await?;
                println!("Status updated");
            }
        }
    }

    if let Err(err) = client.clear_activity(std::process::id()).await {
        warn!(error = %err, "clearing activity failed");
    }
    client.close().await
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
