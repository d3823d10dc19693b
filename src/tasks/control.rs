//! Line-oriented control surface: one command per line on stdin.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use clap::ValueEnum;
use crossbeam_channel::Sender;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::events::ControlSignal;
use crate::index::ImageRecord;
use crate::library::Library;
use crate::metadata::MetadataExtractor;
use crate::playlist::PlayMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Signal(ControlSignal),
    Enable(PathBuf),
    Disable(PathBuf),
    PlayNow { directory: PathBuf, files: Vec<String> },
    Mode(PlayMode),
    Stats,
    Quit,
}

/// Parse one command line. Blank lines and `#` comments yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    if verb.starts_with('#') {
        return Ok(None);
    }
    let rest: Vec<&str> = words.collect();
    let dir = |rest: &[&str]| {
        rest.first()
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("`{verb}` needs a directory"))
    };

    let cmd = match verb.to_ascii_lowercase().as_str() {
        "pause" => Command::Signal(ControlSignal::Pause),
        "play" | "resume" => Command::Signal(ControlSignal::Resume),
        "next" => Command::Signal(ControlSignal::TransitionNow),
        "sleep" => Command::Signal(ControlSignal::Sleep),
        "wake" => Command::Signal(ControlSignal::Wake),
        "toggle-sleep" => Command::Signal(ControlSignal::ToggleSleep),
        "enable" => Command::Enable(dir(&rest)?),
        "disable" => Command::Disable(dir(&rest)?),
        "play-now" => Command::PlayNow {
            directory: dir(&rest)?,
            files: rest.iter().skip(1).map(|s| (*s).to_string()).collect(),
        },
        "mode" => {
            let raw = rest.first().ok_or_else(|| anyhow!("`mode` needs a play mode"))?;
            Command::Mode(PlayMode::from_str(raw, true).map_err(|e| anyhow!(e))?)
        }
        "stats" => Command::Stats,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command `{other}`"),
    };
    Ok(Some(cmd))
}

/// Apply a parsed command against the library and display.
pub fn apply(
    cmd: Command,
    library: &Library,
    extractor: &dyn MetadataExtractor,
    to_viewer: &Sender<ControlSignal>,
    cancel: &CancellationToken,
) -> Result<()> {
    match cmd {
        Command::Signal(signal) => to_viewer.send(signal)?,
        Command::Enable(path) => {
            library.set_enabled(&path, true);
        }
        Command::Disable(path) => {
            library.set_enabled(&path, false);
        }
        Command::PlayNow { directory, files } => {
            let images = (!files.is_empty()).then(|| load_records(&directory, &files, extractor));
            library.play_now(&directory, images)?;
            to_viewer.send(ControlSignal::TransitionNow)?;
        }
        Command::Mode(mode) => library.set_mode(mode),
        Command::Stats => library.with_index(|index| info!("\n{index}")),
        Command::Quit => cancel.cancel(),
    }
    Ok(())
}

fn load_records(
    directory: &std::path::Path,
    files: &[String],
    extractor: &dyn MetadataExtractor,
) -> Vec<ImageRecord> {
    files
        .iter()
        .filter_map(|name| match extractor.extract(&directory.join(name)) {
            Ok(meta) => Some(ImageRecord {
                filename: name.clone(),
                timestamp: meta.timestamp,
                orientation: meta.orientation,
            }),
            Err(err) => {
                warn!(%err, "play-now: skipping image");
                None
            }
        })
        .collect()
}

/// Read commands from stdin until it closes or `cancel` fires.
pub async fn run(
    library: Library,
    extractor: Arc<dyn MetadataExtractor>,
    to_viewer: Sender<ControlSignal>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            info!("stdin closed; control surface stopped");
            break;
        };
        match parse_command(&line) {
            Ok(Some(cmd)) => {
                if let Err(err) = apply(cmd, &library, extractor.as_ref(), &to_viewer, &cancel) {
                    warn!("command failed: {err:#}");
                }
            }
            Ok(None) => {}
            Err(err) => warn!("{err:#}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signals() {
        assert_eq!(
            parse_command("pause").unwrap(),
            Some(Command::Signal(ControlSignal::Pause))
        );
        assert_eq!(
            parse_command("  PLAY ").unwrap(),
            Some(Command::Signal(ControlSignal::Resume))
        );
        assert_eq!(
            parse_command("next").unwrap(),
            Some(Command::Signal(ControlSignal::TransitionNow))
        );
        assert_eq!(parse_command("").unwrap(), None);
        assert_eq!(parse_command("# comment").unwrap(), None);
    }

    #[test]
    fn parses_play_now_with_files() {
        let cmd = parse_command("play-now /photos/c x.jpg y.png").unwrap();
        assert_eq!(
            cmd,
            Some(Command::PlayNow {
                directory: PathBuf::from("/photos/c"),
                files: vec!["x.jpg".into(), "y.png".into()],
            })
        );
    }

    #[test]
    fn parses_mode() {
        assert_eq!(
            parse_command("mode uniform-random").unwrap(),
            Some(Command::Mode(PlayMode::UniformRandom))
        );
        assert!(parse_command("mode bogus").is_err());
    }

    #[test]
    fn rejects_missing_arguments_and_unknown_verbs() {
        assert!(parse_command("disable").is_err());
        assert!(parse_command("dance").is_err());
    }

    use crate::error::{MetadataError, PlaybackError};
    use crate::index::ImageIndex;
    use crate::metadata::ImageMetadata;
    use crate::playlist::Scheduler;
    use std::path::Path;

    struct Stub {
        fail: bool,
    }

    impl MetadataExtractor for Stub {
        fn extract(&self, path: &Path) -> Result<ImageMetadata, MetadataError> {
            if self.fail {
                return Err(MetadataError::Open {
                    path: path.to_path_buf(),
                    source: std::io::Error::other("unreadable"),
                });
            }
            Ok(ImageMetadata::default())
        }
    }

    fn library_with(dir: &Path, files: &[&str]) -> Library {
        std::fs::create_dir_all(dir).unwrap();
        for f in files {
            std::fs::write(dir.join(f), b"").unwrap();
        }
        let mut index = ImageIndex::new();
        index.add_directory(dir, &Stub { fail: false }).unwrap();
        Library::new(index, Scheduler::seeded(PlayMode::RandomPlaylist, Some(1)))
    }

    #[test]
    fn play_now_cuts_to_the_requested_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("album");
        let library = library_with(&dir, &["a.jpg", "b.jpg", "c.jpg"]);
        let (tx, rx) = crossbeam_channel::unbounded();
        let cancel = CancellationToken::new();

        let cmd = parse_command(&format!("play-now {} c.jpg", dir.display()))
            .unwrap()
            .unwrap();
        apply(cmd, &library, &Stub { fail: false }, &tx, &cancel).unwrap();

        assert_eq!(rx.try_recv(), Ok(ControlSignal::TransitionNow));
        assert!(rx.try_recv().is_err());
        assert_eq!(library.advance().unwrap().path(), dir.join("c.jpg"));
    }

    #[test]
    fn play_now_with_only_unreadable_files_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("album");
        let library = library_with(&dir, &["a.jpg"]);
        let (tx, rx) = crossbeam_channel::unbounded();
        let cancel = CancellationToken::new();

        let cmd = Command::PlayNow {
            directory: dir.clone(),
            files: vec!["a.jpg".into(), "missing.jpg".into()],
        };
        let err = apply(cmd, &library, &Stub { fail: true }, &tx, &cancel).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PlaybackError>(),
            Some(&PlaybackError::EmptyPlaylist)
        );
        assert!(rx.try_recv().is_err(), "nothing sent on failure");
    }

    #[test]
    fn signals_mask_and_quit_reach_their_targets() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("album");
        let library = library_with(&dir, &["a.jpg"]);
        let (tx, rx) = crossbeam_channel::unbounded();
        let cancel = CancellationToken::new();
        let stub = Stub { fail: false };

        for line in ["pause", "play", "toggle-sleep"] {
            let cmd = parse_command(line).unwrap().unwrap();
            apply(cmd, &library, &stub, &tx, &cancel).unwrap();
        }
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            [
                ControlSignal::Pause,
                ControlSignal::Resume,
                ControlSignal::ToggleSleep
            ]
        );

        apply(Command::Disable(dir.clone()), &library, &stub, &tx, &cancel).unwrap();
        assert!(!library.is_enabled(&dir));
        apply(Command::Enable(dir.clone()), &library, &stub, &tx, &cancel).unwrap();
        assert!(library.is_enabled(&dir));

        assert!(!cancel.is_cancelled());
        apply(Command::Quit, &library, &stub, &tx, &cancel).unwrap();
        assert!(cancel.is_cancelled());
    }
}
