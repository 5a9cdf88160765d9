//! Washer device link console.
//!
//! Connects to a washer controller over WebSocket, keeps the link alive, and
//! offers a line console on stdin for run control, pin toggling, and telemetry
//! inspection. Logs go to stderr so console output stays readable.

use clap::Parser;
use devlink_session::{ConnectionState, DeviceLink, LinkStatus, WebSocketConnector};
use devlink_telemetry::TelemetryProjection;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod console;
mod logging;

use config::DevlinkConfig;
use console::{Console, Flow};
use logging::DevlinkLogFormatter;

/// Washer device link console
#[derive(Parser, Debug)]
#[command(name = "devlink", version, about = "Operator console for a washer test controller")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "devlink.yaml")]
    config: PathBuf,

    /// Device address, e.g. ws://192.168.4.1:81/ws
    #[arg(long)]
    endpoint: Option<String>,

    /// Reconnect attempts before giving up
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Keep-alive ping interval, e.g. 30s
    #[arg(long)]
    ping_interval: Option<humantime::Duration>,

    /// Samples kept per sensor history
    #[arg(long)]
    history: Option<usize>,

    /// Start disconnected; use `connect` in the console
    #[arg(long)]
    no_connect: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(&self, config: &mut DevlinkConfig) {
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
        if let Some(ping_interval) = self.ping_interval {
            config.ping_interval = ping_interval.into();
        }
        if let Some(history) = self.history {
            config.history = history;
        }
        if self.no_connect {
            config.auto_connect = false;
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("warn")
        .add_directive(format!("devlink={}", args.log_level).parse()?)
        .add_directive(format!("devlink_session={}", args.log_level).parse()?)
        .add_directive(format!("devlink_wire={}", args.log_level).parse()?)
        .add_directive(format!("devlink_telemetry={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .event_format(DevlinkLogFormatter::new("devlink"))
        .init();

    info!("Starting washer device link v{}", env!("CARGO_PKG_VERSION"));

    let mut config = DevlinkConfig::load_from_file(&args.config);
    args.apply(&mut config);
    let link_config = config.link_config()?;
    info!(
        "Device {} (max attempts {}, ping every {:?}, history {})",
        link_config.endpoint, config.max_attempts, config.ping_interval, config.history
    );

    let connector = WebSocketConnector::new(config.connect_timeout);
    let (link, driver) = DeviceLink::spawn(link_config, connector);
    let telemetry = TelemetryProjection::attach(&link, config.history);
    let status_watcher = tokio::spawn(log_status_changes(link.subscribe()));

    let console = Console::new(link.clone(), telemetry);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", console::HELP);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break,
                };
                match console.run_line(&line).await {
                    Ok((Flow::Quit, _)) => break,
                    Ok((Flow::Continue, output)) => {
                        if !output.is_empty() {
                            println!("{}", output);
                        }
                    }
                    Err(e) => component_warn!("console", "{:#}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                component_info!("console", "Interrupted");
                break;
            }
        }
    }

    info!("Shutting down");
    link.shutdown().await?;
    driver.await?;
    status_watcher.abort();
    Ok(())
}

/// Log every change of the derived link status
async fn log_status_changes(mut rx: watch::Receiver<ConnectionState>) {
    let mut last = rx.borrow().status();

    while rx.changed().await.is_ok() {
        let (status, error) = {
            let state = rx.borrow_and_update();
            (state.status(), state.error.clone())
        };
        if status == last {
            continue;
        }
        last = status;

        let reason = error.unwrap_or_default();
        match status {
            LinkStatus::Retrying { .. } => component_warn!("link", "{}: {}", status, reason),
            LinkStatus::Failed { .. } => component_error!("link", "{}: {}", status, reason),
            _ => component_info!("link", "{}", status),
        }
    }
}
