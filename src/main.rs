//! Binary entrypoint for the photo frame playback engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use frame_playback::config::Configuration;
use frame_playback::display::DisplayMachine;
use frame_playback::events::ControlSignal;
use frame_playback::index::ImageIndex;
use frame_playback::library::Library;
use frame_playback::metadata::{ExifExtractor, ExifTags, MetadataExtractor};
use frame_playback::playlist::{self, PlayMode, Scheduler};
use frame_playback::tasks::{control, files, sensor, viewer};

#[derive(Debug, Parser)]
#[command(
    name = "frame-playback",
    version,
    about = "Directory-driven photo frame slideshow"
)]
struct Cli {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Override the configured play mode
    #[arg(long, value_enum)]
    play_mode: Option<PlayMode>,

    /// Deterministic RNG seed for playlist selection
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Print the index and N planned selections without starting the display
    #[arg(long, value_name = "ITERATIONS")]
    dry_run: Option<usize>,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut cfg = Configuration::from_yaml_file(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?
        .validated()
        .context("invalid configuration values")?;
    if let Some(mode) = cli.play_mode {
        cfg.play_mode = mode;
    }
    if cli.seed.is_some() {
        cfg.playlist_seed = cli.seed;
    }
    info!("Loaded configuration from {}:\n{:#?}", cli.config.display(), cfg);

    let extractor: Arc<dyn MetadataExtractor> = Arc::new(ExifExtractor::new(ExifTags::default()));

    if let Some(iterations) = cli.dry_run {
        return run_dry_run(&cfg, extractor.as_ref(), iterations);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let index = cfg
        .snapshot_path
        .as_deref()
        .and_then(|path| match ImageIndex::load_snapshot(path) {
            Ok(index) => {
                info!(path = %path.display(), folders = index.len(), "restored index snapshot");
                Some(index)
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "index snapshot unusable; scanning from scratch");
                None
            }
        })
        .unwrap_or_default();
    let restored = !index.is_empty();

    let mut scheduler = Scheduler::seeded(cfg.play_mode, cfg.playlist_seed);
    for path in &cfg.disabled_playlists {
        scheduler.set_enabled(path, false);
    }
    let library = Library::new(index, scheduler);
    if restored {
        library.mark_ready();
    }

    let (signal_tx, signal_rx) = crossbeam_channel::unbounded::<ControlSignal>();
    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();
    let guard = runtime.enter();

    tasks.spawn({
        let library = library.clone();
        let extractor = Arc::clone(&extractor);
        let options = files::RescanOptions {
            roots: cfg.photo_library_paths.clone(),
            interval: cfg.rescan_interval,
            snapshot_path: cfg.snapshot_path.clone(),
        };
        let cancel = cancel.clone();
        async move {
            files::run(library, extractor, options, cancel)
                .await
                .context("files task failed")
        }
    });

    if let Some(sensor_cfg) = cfg.light_sensor.clone() {
        let device = sensor::IioLightSensor::new(&sensor_cfg.device_path);
        let to_viewer = signal_tx.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            sensor::run(device, sensor_cfg, to_viewer, cancel)
                .await
                .context("sensor task failed")
        });
    }

    tasks.spawn({
        let library = library.clone();
        let extractor = Arc::clone(&extractor);
        let to_viewer = signal_tx.clone();
        let cancel = cancel.clone();
        async move {
            control::run(library, extractor, to_viewer, cancel)
                .await
                .context("control task failed")
        }
    });

    {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                res = tokio::signal::ctrl_c() => match res {
                    Ok(()) => {
                        info!("ctrl-c received; initiating shutdown");
                        cancel.cancel();
                    }
                    Err(err) => warn!("ctrl-c handler failed: {err}"),
                }
            }
            Ok(())
        });
    }

    #[cfg(unix)]
    {
        let cancel = cancel.clone();
        let control = signal_tx.clone();
        tasks.spawn(async move {
            let mut sigusr1 = signal(SignalKind::user_defined1())
                .context("failed to register SIGUSR1 handler")?;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = sigusr1.recv() => {
                        if received.is_none() {
                            break;
                        }
                        info!("SIGUSR1 received; toggling sleep");
                        if control.send(ControlSignal::ToggleSleep).is_err() {
                            break;
                        }
                    }
                }
            }
            Ok(())
        });
    }

    drop(guard);

    // The display owns the main thread; it returns once cancelled.
    let machine = DisplayMachine::new(cfg.display(), Instant::now());
    let mut renderer = viewer::LogRenderer::default();
    viewer::run(
        machine,
        &library,
        &mut renderer,
        &signal_rx,
        &cancel,
        cfg.tick_interval,
    );
    cancel.cancel();

    runtime.block_on(async {
        while let Some(res) = tasks.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("task error: {e:?}"),
                Err(e) => tracing::error!("join error: {e}"),
            }
        }
    });
    // stdin reads cannot be interrupted; don't wait on them forever
    runtime.shutdown_timeout(Duration::from_secs(1));
    Ok(())
}

fn run_dry_run(cfg: &Configuration, extractor: &dyn MetadataExtractor, iterations: usize) -> Result<()> {
    let mut index = ImageIndex::new();
    for root in &cfg.photo_library_paths {
        let report = index
            .add_root(root, extractor)
            .with_context(|| format!("failed to index {}", root.display()))?;
        for failure in &report.failed {
            println!("# skipped {}: {}", failure.path.display(), failure.error);
        }
    }
    println!("{index}\n");

    println!(
        "# play mode: {:?}\n# seed: {}\n# iterations: {}\n",
        cfg.play_mode,
        cfg.playlist_seed
            .map_or_else(|| "(random)".to_string(), |s| s.to_string()),
        iterations
    );

    let plan = playlist::simulate(&index, cfg.play_mode, cfg.playlist_seed, iterations);
    if plan.is_empty() {
        println!("(nothing to play)");
    } else {
        for (idx, selection) in plan.iter().enumerate() {
            println!("  {:>4}: {}", idx + 1, selection.path().display());
        }
    }
    Ok(())
}
