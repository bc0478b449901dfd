//! SceneTest Viewer
//!
//! Headless stand-in for a scene viewer. Loads a scene, runs the step script
//! named by its `<StepScript>` hook one frame at a time, then keeps
//! presenting frames until it is told to stop.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use scenetest_common::{Context, SentinelChannel, StepRegistry, StepScheduler};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod error;
mod host;
mod scene;
mod script;

use host::{HeadlessHost, Screen};
use scene::{SceneDocument, StepHook};
use script::StepScript;

#[derive(Parser)]
#[command(name = "scenetest-viewer")]
#[command(about = "Headless scene viewer that runs SceneTest step scripts")]
#[command(version)]
struct Cli {
    /// Accepted for compatibility; the viewer never opens a window
    #[arg(long)]
    no_fullscreen: bool,

    /// Screen size as WIDTHxHEIGHT
    #[arg(long, default_value = "800x600")]
    screen: Screen,

    /// Frames per second
    #[arg(long, default_value_t = 60.0)]
    frame_rate: f64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Scene to load
    scene: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for step console output
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    info!("SceneTest viewer v{}", scenetest_common::VERSION);
    if !cli.no_fullscreen {
        debug!("Fullscreen requested, running headless anyway");
    }

    if !(cli.frame_rate.is_finite() && cli.frame_rate > 0.0) {
        anyhow::bail!("frame rate must be a positive number, got {}", cli.frame_rate);
    }

    let scene = SceneDocument::load(&cli.scene)?;
    let mut host = HeadlessHost::new(cli.screen, cli.frame_rate, &scene);
    let mut scheduler = match &scene.hook {
        Some(hook) => Some(scheduler_for(hook)?),
        None => {
            info!("No step script hook in {}, idling", cli.scene.display());
            None
        }
    };

    let mut frames = tokio::time::interval(Duration::from_secs_f64(1.0 / cli.frame_rate));
    frames.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let start = Instant::now();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!(
        "Presenting {}x{} at {} fps",
        cli.screen.width, cli.screen.height, cli.frame_rate
    );
    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                info!("Received shutdown signal");
                break;
            }
            _ = frames.tick() => {
                host.present();
                if let Some(scheduler) = scheduler.as_mut().filter(|s| !s.is_finished()) {
                    scheduler.tick(start.elapsed().as_secs_f64(), &mut host)?;
                }
            }
        }
    }

    info!("Viewer shutdown complete");
    Ok(())
}

fn scheduler_for(hook: &StepHook) -> anyhow::Result<StepScheduler> {
    let registry = match &hook.script {
        Some(path) => StepScript::load(path)?.into_registry()?,
        None => {
            warn!("Step script hook names no script; signalling completion straight away");
            StepRegistry::new()
        }
    };
    let context = Context::new(
        &hook.output_prefix,
        &hook.log,
        SentinelChannel::new(&hook.sentinel),
    )?;
    Ok(StepScheduler::new(registry, context))
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
