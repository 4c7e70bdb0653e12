use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{name_id, type_id, Device, File, Properties, Track, TrackDraft};
use metadata::{MetadataError, TagInfo, TagService, TagUpdate};
use parking_lot::Mutex;

use crate::collection::Collection;
use crate::config::CollectionConfig;
use crate::reporter::{Reporter, ScanStats};

/// In-memory tag store keyed by path.
#[derive(Default)]
pub(crate) struct FakeTags {
    infos: Mutex<HashMap<PathBuf, TagInfo>>,
    failing: Mutex<HashSet<PathBuf>>,
    writes: Mutex<Vec<(PathBuf, TagUpdate)>>,
    reads: AtomicUsize,
}

impl FakeTags {
    pub(crate) fn set(&self, path: &Path, info: TagInfo) {
        self.infos.lock().insert(path.to_path_buf(), info);
    }

    pub(crate) fn fail_writes_to(&self, path: &Path) {
        self.failing.lock().insert(path.to_path_buf());
    }

    pub(crate) fn writes(&self) -> Vec<(PathBuf, TagUpdate)> {
        self.writes.lock().clone()
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl TagService for FakeTags {
    fn read(&self, path: &Path) -> Result<TagInfo, MetadataError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if !path.exists() {
            return Err(MetadataError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )));
        }
        Ok(self.infos.lock().get(path).cloned().unwrap_or_default())
    }

    fn write(&self, path: &Path, update: &TagUpdate) -> Result<(), MetadataError> {
        if self.failing.lock().contains(path) {
            return Err(MetadataError::Unsupported(format!(
                "read-only file {}",
                path.display()
            )));
        }
        self.writes
            .lock()
            .push((path.to_path_buf(), update.clone()));
        let mut infos = self.infos.lock();
        let info = infos.entry(path.to_path_buf()).or_default();
        apply(info, update.clone());
        Ok(())
    }
}

fn apply(info: &mut TagInfo, update: TagUpdate) {
    if let Some(value) = update.track_name {
        info.track_name = Some(value);
    }
    if let Some(value) = update.album_name {
        info.album_name = Some(value);
    }
    if let Some(value) = update.author_name {
        info.author_name = Some(value);
    }
    if let Some(value) = update.style_name {
        info.style_name = Some(value);
    }
    if let Some(value) = update.album_artist {
        info.album_artist = Some(value);
    }
    if let Some(value) = update.comment {
        info.comment = Some(value);
    }
    if let Some(value) = update.year {
        info.year = Some(value);
    }
    if let Some(value) = update.order {
        info.order = Some(value);
    }
    if let Some(value) = update.disc_number {
        info.disc_number = Some(value);
    }
}

pub(crate) fn tag(
    title: &str,
    album: &str,
    artist: &str,
    year: i64,
    order: u32,
    duration: u64,
) -> TagInfo {
    TagInfo {
        track_name: Some(title.to_string()),
        album_name: Some(album.to_string()),
        author_name: Some(artist.to_string()),
        year: Some(year),
        order: Some(order),
        duration_secs: duration,
        quality: 320,
        ..TagInfo::default()
    }
}

pub(crate) fn sample_config() -> CollectionConfig {
    CollectionConfig {
        case_insensitive_paths: Some(false),
        music_extensions: vec!["mp3".to_string(), "flac".to_string(), "ogg".to_string()],
        playlist_extensions: vec!["m3u".to_string()],
        ..CollectionConfig::default()
    }
}

pub(crate) fn collection_with(tags: Arc<FakeTags>) -> Collection {
    Collection::new(sample_config(), tags)
}

pub(crate) fn sample_collection() -> Collection {
    collection_with(Arc::new(FakeTags::default()))
}

pub(crate) fn draft(name: &str, album_id: &str, order: u32) -> TrackDraft {
    TrackDraft {
        name: name.to_string(),
        album_id: album_id.to_string(),
        style_id: name_id("Rock"),
        author_id: name_id("ArtistX"),
        year_id: name_id("2001"),
        year: 2001,
        type_id: type_id("mp3"),
        duration_secs: 180,
        order,
        disc_number: 1,
        comment: String::new(),
        album_artist: String::new(),
        discovery_date: 0,
    }
}

pub(crate) fn sample_file(id: &str, track: &Track) -> File {
    File {
        id: id.to_string(),
        name: id.to_string(),
        directory_id: "dir".to_string(),
        dir_path: String::new(),
        track_id: track.id.clone(),
        track_order: track.order,
        size: 0,
        quality: 0,
        modified: 0,
        custom: Properties::new(),
    }
}

/// Creates `rel` under `root` with a few placeholder bytes.
pub(crate) fn put_file(root: &Path, rel: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, b"fake audio").unwrap();
    path
}

#[derive(Default)]
pub(crate) struct RecordingReporter {
    corrupted: Mutex<Vec<PathBuf>>,
    new_files: Mutex<Vec<PathBuf>>,
    started: Mutex<Vec<String>>,
    finished: Mutex<Option<ScanStats>>,
}

impl RecordingReporter {
    pub(crate) fn corrupted(&self) -> Vec<PathBuf> {
        self.corrupted.lock().clone()
    }

    pub(crate) fn new_files(&self) -> Vec<PathBuf> {
        self.new_files.lock().clone()
    }

    pub(crate) fn finished(&self) -> bool {
        self.finished.lock().is_some() && !self.started.lock().is_empty()
    }
}

impl Reporter for RecordingReporter {
    fn startup(&self, device: &Device) {
        self.started.lock().push(device.id.clone());
    }

    fn notify_new_file(&self, path: &Path) {
        self.new_files.lock().push(path.to_path_buf());
    }

    fn notify_corrupted_file(&self, path: &Path, _reason: &str) {
        self.corrupted.lock().push(path.to_path_buf());
    }

    fn done(&self, stats: &ScanStats) {
        *self.finished.lock() = Some(stats.clone());
    }
}
