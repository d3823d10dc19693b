use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::library::Library;
use crate::metadata::MetadataExtractor;

/// Settings for the periodic library refresh.
#[derive(Debug, Clone)]
pub struct RescanOptions {
    pub roots: Vec<PathBuf>,
    pub interval: Duration,
    /// Written after every full pass when set.
    pub snapshot_path: Option<PathBuf>,
}

/// Keeps the library in step with the filesystem.
///
/// - The first pass indexes every root, then marks the library ready.
/// - Later passes run every `interval` and replace nodes one at a time.
/// - A root that cannot be scanned is logged and retried next pass.
#[instrument(skip_all, fields(roots = options.roots.len()))]
pub async fn run(
    library: Library,
    extractor: Arc<dyn MetadataExtractor>,
    options: RescanOptions,
    cancel: CancellationToken,
) -> Result<()> {
    let mut first_pass = true;
    loop {
        for root in &options.roots {
            if cancel.is_cancelled() {
                info!("cancel received; exiting files task");
                return Ok(());
            }
            let task_library = library.clone();
            let task_extractor = Arc::clone(&extractor);
            let task_root = root.clone();
            let res = tokio::task::spawn_blocking(move || {
                task_library.rescan_root(&task_root, task_extractor.as_ref())
            })
            .await;
            match res {
                Ok(Ok(summary)) => info!(
                    root = %root.display(),
                    directories = summary.directories,
                    images = summary.images,
                    failed = summary.failed,
                    removed = summary.removed.len(),
                    "rescan complete"
                ),
                Ok(Err(err)) => warn!(root = %root.display(), %err, "rescan failed"),
                Err(err) => warn!(root = %root.display(), %err, "rescan task panicked"),
            }
        }
        library.mark_ready();
        if first_pass {
            for path in library.unindexed_disabled() {
                warn!(path = %path.display(), "disabled playlist is not in the library");
            }
            first_pass = false;
        }

        if let Some(path) = &options.snapshot_path {
            if let Err(err) = library.save_snapshot(path) {
                warn!(path = %path.display(), %err, "failed to write index snapshot");
            }
        }

        debug!(next = %humantime::format_duration(options.interval), "waiting for next rescan");
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancel received; exiting files task");
                break;
            }
            _ = sleep(options.interval) => {}
        }
    }
    Ok(())
}
