use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use loopcast::config::DEFAULT_CONFIG_PATH;
use loopcast::{
    create_router, AppState, Config, ConsoleSink, DriveLink, LocalFile, MediaAcquirer,
    SessionController, SessionEvent, StopOutcome, StreamKey, StreamOptions,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::Receiver;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "loopcast", version, about = "Loop a local video file to an RTMP ingest")]
struct Cli {
    /// Config file, without extension
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP control API
    Serve,

    /// Stream one file until interrupted
    Stream {
        /// Video file to loop (.mp4 or .flv)
        #[arg(long, required_unless_present = "drive_url", conflicts_with = "drive_url")]
        source: Option<PathBuf>,

        /// Publicly shared Google Drive file to download and loop
        #[arg(long)]
        drive_url: Option<String>,

        #[arg(long)]
        stream_key: String,

        /// Force 720x1280 output
        #[arg(long)]
        vertical: bool,

        /// Intended air date (YYYY-MM-DD), informational
        #[arg(long)]
        air_date: Option<NaiveDate>,

        /// Intended air time (HH:MM:SS), informational
        #[arg(long)]
        air_time: Option<NaiveTime>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Loopcast v{}", env!("CARGO_PKG_VERSION"));
    info!("Encoder: {} -> rtmp://{}/live2", cfg.encoder.program, cfg.encoder.ingest_host);

    let controller = SessionController::from_config(&cfg, Arc::new(ConsoleSink));

    match cli.command {
        Command::Serve => serve(cfg, controller).await,
        Command::Stream {
            source,
            drive_url,
            stream_key,
            vertical,
            air_date,
            air_time,
        } => {
            let options = StreamOptions {
                stream_key: StreamKey::new(stream_key),
                vertical_mode: vertical,
                air_date,
                air_time,
            };
            let acquirer: Box<dyn MediaAcquirer> = match (drive_url, source) {
                (Some(url), _) => Box::new(
                    DriveLink::new(url, cfg.session.media_dir.clone())
                        .with_endpoint(cfg.session.drive_endpoint.clone()),
                ),
                (None, Some(path)) => Box::new(LocalFile::new(path)),
                (None, None) => anyhow::bail!("either --source or --drive-url is required"),
            };
            stream(controller, acquirer.as_ref(), options).await
        }
    }
}

async fn serve(cfg: Config, controller: SessionController) -> Result<()> {
    let state = AppState::new(
        controller.clone(),
        cfg.session.media_dir.clone(),
        cfg.service.http.upload_limit_bytes(),
    )
    .with_drive_endpoint(cfg.session.drive_endpoint.clone());
    let app = create_router(state.clone());

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("{} listening on {}", cfg.service.name, addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    if !controller.state().is_idle() {
        info!("Stopping active session before exit");
        report_stop(controller.stop().await?);
    }
    state.discard_uploads().await;

    Ok(())
}

async fn stream(
    controller: SessionController,
    acquirer: &dyn MediaAcquirer,
    options: StreamOptions,
) -> Result<()> {
    let mut events = controller.subscribe();
    let session_id = controller.start_from(acquirer, options).await?;
    let mut state = controller.watch_state();

    info!("Session {} running, press Ctrl+C to stop", session_id);

    let interrupted = shutdown_signal();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            biased;

            _ = &mut interrupted => {
                report_stop(controller.stop().await?);
                return Ok(());
            }

            event = events.recv() => match event {
                Ok(event) => check_event(event)?,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Skipped {} session events", skipped);
                }
                Err(RecvError::Closed) => return Ok(()),
            },

            // Events may have been skipped; the state still tells us the session is over
            _ = state.wait_for(|s| s.is_idle()) => {
                return session_ended(&controller, &mut events).await;
            }
        }
    }
}

/// Fails on events that end the session abnormally
fn check_event(event: SessionEvent) -> Result<()> {
    match event {
        SessionEvent::Anomaly { exit, .. } => {
            error!("Last {} encoder lines:", exit.tail.len());
            for line in &exit.tail {
                error!("  {}", line.text);
            }
            Err(exit.into())
        }
        SessionEvent::TerminationFailed { pid, .. } => {
            anyhow::bail!("encoder pid {} could not be terminated", pid)
        }
        _ => Ok(()),
    }
}

async fn session_ended(
    controller: &SessionController,
    events: &mut Receiver<SessionEvent>,
) -> Result<()> {
    loop {
        match events.try_recv() {
            Ok(event) => check_event(event)?,
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }

    let tail = controller.logs(None).await;
    error!("Last {} encoder lines:", tail.len());
    for line in &tail {
        error!("  {}", line.text);
    }
    anyhow::bail!("encoder session ended")
}

fn report_stop(outcome: StopOutcome) {
    match outcome {
        StopOutcome::Stopped { exit } => info!("Stream stopped ({})", exit),
        StopOutcome::AlreadyStopped => info!("Stream already stopped"),
        StopOutcome::Leaked { pid } => warn!("Encoder pid {} may still be running", pid),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
