use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand};
use head_wobbler_core::{AppConfig, MovementScheduler, SimulatedHead, SwayEngine};
use tracing_subscriber::EnvFilter;

fn main() -> head_wobbler_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Replay {
            input,
            sample_rate,
            no_pace,
        } => {
            let mut config = config;
            if let Some(rate) = sample_rate {
                config.audio.sample_rate = rate;
            }
            run_replay(&input, &config, !no_pace)
        }
        Commands::Config => {
            println!("{}", config.to_json_pretty()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> head_wobbler_core::Result<AppConfig> {
    match path {
        Some(path) => {
            tracing::info!(?path, "loading configuration");
            AppConfig::from_path(path)
        }
        None => Ok(AppConfig::default()),
    }
}

fn run_replay(input: &Path, config: &AppConfig, pace: bool) -> head_wobbler_core::Result<()> {
    tracing::info!(?input, pace, "replaying recorded speech");

    let mut bytes = std::fs::read(input)?;
    if trim_to_whole_samples(&mut bytes) {
        tracing::warn!(?input, "recording ends in half a sample, ignoring the last byte");
    }
    let rate = u64::from(config.audio.sample_rate.max(1));
    let chunk_samples = (rate * config.audio.chunk_ms / 1000).max(1);
    let chunk_bytes = usize::try_from(chunk_samples * 2).unwrap_or(usize::MAX);
    let chunk_duration = Duration::from_millis(config.audio.chunk_ms);
    let audio_duration = Duration::from_millis(bytes.len() as u64 / 2 * 1000 / rate);

    let head = Arc::new(SimulatedHead::new());
    let scheduler = MovementScheduler::new(config, Box::new(SwayEngine::new()), head.clone());
    scheduler.start()?;

    // Speech APIs deliver audio as base64 deltas; replay it the same way.
    for slice in bytes.chunks(chunk_bytes) {
        scheduler.feed(&STANDARD.encode(slice));
        if pace {
            thread::sleep(chunk_duration);
        }
    }

    let budget = audio_duration + config.scheduler.latency() + Duration::from_secs(5);
    if !scheduler.wait_idle(budget) {
        tracing::warn!(
            pending = scheduler.pending_chunks(),
            "gave up waiting for the queue to drain"
        );
    }
    scheduler.stop();

    let stats = scheduler.stats();
    tracing::info!(
        chunks = stats.chunks_processed,
        applied = stats.hops_applied,
        dropped = stats.hops_dropped,
        suppressed = stats.hops_suppressed,
        failed = stats.hops_failed,
        decode_errors = stats.decode_errors,
        commands = head.commands(),
        "replay finished"
    );
    Ok(())
}

/// Drops a trailing odd byte so every slice decodes to whole PCM16 samples.
/// Returns `true` if a byte was removed.
fn trim_to_whole_samples(bytes: &mut Vec<u8>) -> bool {
    if bytes.len() % 2 == 0 {
        return false;
    }
    bytes.pop();
    true
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Speech-synchronised head movement", long_about = None)]
struct Cli {
    /// JSON configuration file. Missing fields use built-in defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive a simulated head from a raw PCM16 little-endian mono recording.
    Replay {
        /// Path to the raw audio file.
        input: PathBuf,
        /// Sample rate of the recording, overriding the configuration.
        #[arg(long)]
        sample_rate: Option<u32>,
        /// Feed the whole file at once instead of at real-time pace.
        #[arg(long)]
        no_pace: bool,
    },
    /// Print the effective configuration as JSON.
    Config,
}
