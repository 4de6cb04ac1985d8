use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use brain::{Controller, FileScoreSource, Settings};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "brain")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Session controller for a density-driven live score")]
struct Cli {
    /// JSON settings file. Flags override its values.
    #[arg(short, long, env = "BRAIN_CONFIG")]
    config: Option<PathBuf>,

    /// Score definition to load on every reset
    #[arg(short, long, env = "BRAIN_SCORE")]
    score: Option<PathBuf>,

    #[arg(long, env = "BRAIN_BIND")]
    bind: Option<IpAddr>,

    /// Inbound UDP port
    #[arg(short, long, env = "BRAIN_PORT")]
    port: Option<u16>,

    /// Port participant devices listen on (0 = reply to the sending port)
    #[arg(long, env = "BRAIN_PARTICIPANT_PORT")]
    participant_port: Option<u16>,

    /// WebSocket port for visualization clients
    #[arg(long, env = "BRAIN_VISUALIZATION_PORT", conflicts_with = "no_visualization")]
    visualization_port: Option<u16>,

    #[arg(long)]
    no_visualization: bool,

    /// Participant identities, replacing the configured list
    #[arg(long = "participant", env = "BRAIN_PARTICIPANTS", value_delimiter = ',')]
    participants: Vec<String>,

    #[arg(long, env = "BRAIN_ANALYSIS_INTERVAL_MS")]
    analysis_interval_ms: Option<u64>,

    #[arg(long, env = "BRAIN_MAX_ACTIVITY")]
    max_activity: Option<u32>,

    #[arg(long, env = "BRAIN_THRESHOLD")]
    threshold: Option<f64>,

    #[arg(long, env = "BRAIN_REST_INTERVAL_MS")]
    rest_interval_ms: Option<u64>,
}

impl Cli {
    fn settings(self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)
                .with_context(|| format!("loading settings from {}", path.display()))?,
            None => Settings::default(),
        };

        if let Some(score) = self.score {
            settings.score_path = score;
        }
        if let Some(bind) = self.bind {
            settings.bind_address = bind;
        }
        if let Some(port) = self.port {
            settings.udp_port = port;
        }
        if let Some(port) = self.participant_port {
            settings.participant_port = port;
        }
        if self.no_visualization {
            settings.visualization_port = None;
        } else if let Some(port) = self.visualization_port {
            settings.visualization_port = Some(port);
        }
        if !self.participants.is_empty() {
            settings.participants = self.participants;
        }
        if let Some(ms) = self.analysis_interval_ms {
            settings.analysis_interval_ms = ms;
        }
        if let Some(max) = self.max_activity {
            settings.max_activity = max;
        }
        if let Some(threshold) = self.threshold {
            settings.activity_threshold = threshold;
        }
        if let Some(ms) = self.rest_interval_ms {
            settings.rest_interval_ms = ms;
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Cli::parse().settings()?;
    let source = FileScoreSource::new(&settings.score_path);

    let controller = Controller::bind(settings, source)
        .await
        .context("starting controller")?;
    let handle = controller.spawn();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    log::info!("Shutting down");
    handle.shutdown().await?;
    Ok(())
}
