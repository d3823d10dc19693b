mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{BodyExtractor, make_dir};
use frame_playback::error::PlaybackError;
use frame_playback::index::{DirStats, ImageIndex};
use frame_playback::library::{Library, SelectionSource};
use frame_playback::metadata::MetadataExtractor;
use frame_playback::playlist::{PlayMode, Scheduler};
use frame_playback::tasks::files::{self, RescanOptions};
use tokio_util::sync::CancellationToken;

fn library(mode: PlayMode) -> Library {
    Library::new(ImageIndex::new(), Scheduler::seeded(mode, Some(17)))
}

#[test]
fn rescan_tracks_added_and_removed_directories() {
    let tmp = tempfile::tempdir().unwrap();
    make_dir(tmp.path(), "a", &["a1.jpg", "a2.jpg"]);
    make_dir(tmp.path(), "b", &["b1.jpg"]);
    let lib = library(PlayMode::RandomPlaylist);

    let first = lib.rescan_root(tmp.path(), &BodyExtractor).unwrap();
    assert_eq!(first.directories, 3);
    assert_eq!(first.images, 3);
    assert!(first.removed.is_empty());

    fs::remove_dir_all(tmp.path().join("b")).unwrap();
    make_dir(tmp.path(), "c/d", &["d1.jpg", "d2.png"]);
    let second = lib.rescan_root(tmp.path(), &BodyExtractor).unwrap();
    assert_eq!(second.removed, vec![tmp.path().join("b")]);
    assert_eq!(second.directories, 4);
    assert_eq!(
        lib.stats(tmp.path()),
        Some(DirStats { pics: 4, folders: 4 })
    );
    lib.with_index(|index| {
        assert_eq!(index.roots().len(), 1);
        assert!(index.contains(&tmp.path().join("c/d")));
        assert!(!index.contains(&tmp.path().join("b")));
    });
}

#[test]
fn rescan_of_missing_root_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let lib = library(PlayMode::UniformRandom);
    assert!(lib.rescan_root(&tmp.path().join("gone"), &BodyExtractor).is_err());
}

#[test]
fn selections_come_from_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let album = make_dir(tmp.path(), "album", &["one.jpg"]);
    let lib = library(PlayMode::RandomPlaylistShuffled);
    lib.rescan_root(tmp.path(), &BodyExtractor).unwrap();

    assert!(!lib.is_ready());
    lib.mark_ready();
    assert!(lib.is_ready());

    let sel = lib.next_selection().unwrap();
    assert_eq!(sel.path(), album.join("one.jpg"));

    fs::remove_file(album.join("one.jpg")).unwrap();
    assert_eq!(
        lib.next_selection(),
        Err(PlaybackError::MissingImage {
            path: album.join("one.jpg")
        })
    );
}

#[test]
fn library_exposes_mask_and_play_now() {
    let tmp = tempfile::tempdir().unwrap();
    let a = make_dir(tmp.path(), "a", &["a1.jpg"]);
    let b = make_dir(tmp.path(), "b", &["b1.jpg", "b2.jpg"]);
    let lib = library(PlayMode::UniformRandom);
    lib.rescan_root(tmp.path(), &BodyExtractor).unwrap();

    assert!(lib.set_enabled(&a, false));
    assert!(!lib.is_enabled(&a));
    for _ in 0..20 {
        assert_eq!(lib.advance().unwrap().directory, b);
    }

    lib.play_now(&a, None).unwrap();
    assert_eq!(lib.advance().unwrap().directory, a);
    assert_eq!(lib.advance().unwrap().directory, b);
    assert!(matches!(
        lib.play_now(Path::new("/nowhere"), None),
        Err(PlaybackError::InvalidDirectory { .. })
    ));
}

#[test]
fn snapshot_restores_a_usable_library() {
    let tmp = tempfile::tempdir().unwrap();
    let photos = tmp.path().join("photos");
    make_dir(&photos, "a", &["a1.jpg"]);
    let lib = library(PlayMode::RandomPlaylist);
    lib.rescan_root(&photos, &BodyExtractor).unwrap();

    let snapshot = tmp.path().join("index.json");
    lib.save_snapshot(&snapshot).unwrap();
    let restored = Library::new(
        ImageIndex::load_snapshot(&snapshot).unwrap(),
        Scheduler::seeded(PlayMode::RandomPlaylist, Some(1)),
    );
    assert_eq!(
        restored.next_selection().unwrap().path(),
        photos.join("a/a1.jpg")
    );
}

#[tokio::test]
async fn files_task_marks_library_ready_and_writes_snapshot() {
    let tmp = tempfile::tempdir().unwrap();
    let photos = tmp.path().join("photos");
    make_dir(&photos, "a", &["a1.jpg", "a2.jpg"]);
    let snapshot = tmp.path().join("index.json");

    let lib = library(PlayMode::RandomPlaylist);
    let extractor: Arc<dyn MetadataExtractor> = Arc::new(BodyExtractor);
    let cancel = CancellationToken::new();
    let options = RescanOptions {
        roots: vec![photos.clone(), tmp.path().join("missing")],
        interval: Duration::from_secs(3600),
        snapshot_path: Some(snapshot.clone()),
    };
    let task = tokio::spawn(files::run(lib.clone(), extractor, options, cancel.clone()));

    tokio::time::timeout(Duration::from_secs(10), async {
        while !lib.is_ready() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(lib.stats(&photos), Some(DirStats { pics: 2, folders: 2 }));
    cancel.cancel();
    task.await.unwrap().unwrap();
    assert!(snapshot.is_file());
}

#[test]
fn disabled_entries_outside_the_index_are_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let a = make_dir(tmp.path(), "a", &["a1.jpg"]);
    let lib = library(PlayMode::RandomPlaylist);
    lib.rescan_root(tmp.path(), &BodyExtractor).unwrap();

    lib.set_enabled(&a, false);
    lib.set_enabled(&tmp.path().join("typo"), false);
    assert_eq!(lib.unindexed_disabled(), vec![tmp.path().join("typo")]);

    lib.set_enabled(&tmp.path().join("typo"), true);
    assert!(lib.unindexed_disabled().is_empty());
}
