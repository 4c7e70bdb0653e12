use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::{
    child_relpath, directory_id, file_id, join_relpath, playlist_id, type_id, Album, Author, Device,
    Directory, EntityKind, File, Playlist, Style, TrackDraft, TrackType, Year,
};
use metadata::{MetadataError, TagInfo};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::collection::Collection;
use crate::references::Removal;
use crate::reporter::{CancelToken, NoopReporter, RefreshOutcome, Reporter, ScanStats};
use crate::LibraryError;

pub const UNKNOWN_AUTHOR: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";
pub const UNKNOWN_STYLE: &str = "Unknown Style";

const JUNK_NAMES: &[&str] = &[
    "thumbs.db",
    "desktop.ini",
    ".ds_store",
    "__macosx",
    "$recycle.bin",
    "system volume information",
    "lost+found",
];

struct Scan<'a> {
    device: Device,
    deep: bool,
    reporter: &'a dyn Reporter,
    cancel: &'a CancelToken,
    stats: ScanStats,
    /// Set once the device root disappears mid-scan.
    lost: bool,
}

impl Scan<'_> {
    fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn record(&mut self, removal: Removal) {
        self.stats.removed_directories += removal.directories;
        self.stats.removed_files += removal.files;
        self.stats.removed_playlists += removal.playlists;
    }

    fn outcome(self) -> RefreshOutcome {
        self.reporter.done(&self.stats);
        if self.lost {
            RefreshOutcome::NotMounted
        } else if self.cancel.is_cancelled() {
            RefreshOutcome::Cancelled(self.stats)
        } else {
            RefreshOutcome::Completed(self.stats)
        }
    }
}

struct Entry {
    path: PathBuf,
    name: String,
    is_dir: bool,
}

impl Collection {
    /// Full refresh of a device: drops entries whose files vanished, scans
    /// the whole tree, then runs orphan cleanup.
    pub fn refresh_device(
        &self,
        device_id: &str,
        deep: bool,
        reporter: &dyn Reporter,
        cancel: &CancelToken,
    ) -> Result<RefreshOutcome, LibraryError> {
        let device = match self.reachable_device(device_id)? {
            Some(device) => device,
            None => return Ok(RefreshOutcome::NotMounted),
        };
        let root = self
            .root_directory(device_id)
            .ok_or_else(|| LibraryError::not_found(EntityKind::Directory, device_id))?;
        reporter.startup(&device);
        let mut scan = Scan {
            device,
            deep,
            reporter,
            cancel,
            stats: ScanStats::default(),
            lost: false,
        };
        self.clean_subtree(&mut scan, &root);
        self.refresh_tree(&mut scan, root);
        if !scan.cancelled() && !scan.lost {
            self.cleanup();
        }
        info!(
            "Refreshed {}: {} new files, {} removed files, {} errors",
            scan.device.name, scan.stats.new_files, scan.stats.removed_files, scan.stats.errors
        );
        Ok(scan.outcome())
    }

    /// Scans a directory and everything below it.
    pub fn refresh_directory(
        &self,
        directory_id: &str,
        deep: bool,
        reporter: &dyn Reporter,
        cancel: &CancelToken,
    ) -> Result<RefreshOutcome, LibraryError> {
        let (directory, device) = match self.scan_target(directory_id)? {
            Some(target) => target,
            None => return Ok(RefreshOutcome::NotMounted),
        };
        reporter.startup(&device);
        let mut scan = Scan {
            device,
            deep,
            reporter,
            cancel,
            stats: ScanStats::default(),
            lost: false,
        };
        self.refresh_tree(&mut scan, directory);
        Ok(scan.outcome())
    }

    /// Scans the immediate content of one directory. Child directories are
    /// registered but not entered.
    pub fn scan_directory(
        &self,
        directory_id: &str,
        deep: bool,
        reporter: &dyn Reporter,
        cancel: &CancelToken,
    ) -> Result<RefreshOutcome, LibraryError> {
        let (directory, device) = match self.scan_target(directory_id)? {
            Some(target) => target,
            None => return Ok(RefreshOutcome::NotMounted),
        };
        reporter.startup(&device);
        let mut scan = Scan {
            device,
            deep,
            reporter,
            cancel,
            stats: ScanStats::default(),
            lost: false,
        };
        self.scan_one(&mut scan, &directory);
        Ok(scan.outcome())
    }

    /// Removes the directories, files and playlists under `directory_id`
    /// whose backing path is gone. Entries of unmounted devices are never
    /// considered removed.
    pub fn clean_removed_files(
        &self,
        directory_id: &str,
        cancel: &CancelToken,
    ) -> Result<RefreshOutcome, LibraryError> {
        let (directory, device) = match self.scan_target(directory_id)? {
            Some(target) => target,
            None => return Ok(RefreshOutcome::NotMounted),
        };
        let reporter = NoopReporter;
        let mut scan = Scan {
            device,
            deep: false,
            reporter: &reporter,
            cancel,
            stats: ScanStats::default(),
            lost: false,
        };
        self.clean_subtree(&mut scan, &directory);
        Ok(scan.outcome())
    }

    fn reachable_device(&self, device_id: &str) -> Result<Option<Device>, LibraryError> {
        let device = self
            .devices
            .get(device_id)
            .ok_or_else(|| LibraryError::not_found(EntityKind::Device, device_id))?;
        let reachable = device.url.is_dir();
        if reachable != device.mounted {
            self.set_mounted(device_id, reachable);
        }
        if !reachable {
            info!("Device {} is not mounted; skipping", device.name);
            return Ok(None);
        }
        Ok(Some(Device {
            mounted: true,
            ..device
        }))
    }

    fn scan_target(&self, directory_id: &str) -> Result<Option<(Directory, Device)>, LibraryError> {
        let directory = self
            .directories
            .get(directory_id)
            .ok_or_else(|| LibraryError::not_found(EntityKind::Directory, directory_id))?;
        Ok(self
            .reachable_device(&directory.device_id)?
            .map(|device| (directory, device)))
    }

    fn refresh_tree(&self, scan: &mut Scan<'_>, directory: Directory) {
        let mut pending = vec![directory];
        while let Some(directory) = pending.pop() {
            if scan.cancelled() || !self.still_mounted(scan) {
                return;
            }
            let mut children = self.scan_one(scan, &directory);
            children.reverse();
            pending.extend(children);
        }
    }

    /// Scans one directory and returns its registered subdirectories.
    fn scan_one(&self, scan: &mut Scan<'_>, directory: &Directory) -> Vec<Directory> {
        if scan.cancelled() {
            return Vec::new();
        }
        scan.reporter.update_state(directory);
        scan.stats.directories += 1;

        let path = join_relpath(&scan.device.url, &directory.relative_path);
        let mut subdirs = Vec::new();
        let mut music = Vec::new();
        let mut playlists = Vec::new();
        for entry in self.list_entries(&path, &mut scan.stats) {
            if entry.is_dir {
                subdirs.push(entry);
                continue;
            }
            match extension_of(&entry.name) {
                Some(ext) if self.types.contains(&type_id(&ext)) => music.push(entry),
                Some(ext) if self.config.is_playlist_extension(&ext) => playlists.push(entry),
                _ => {}
            }
        }

        let mut tags: HashMap<String, Result<TagInfo, MetadataError>> = HashMap::new();
        let mut disc_id = directory.disc_id.clone();
        if scan.deep {
            for entry in &music {
                if scan.cancelled() {
                    return Vec::new();
                }
                tags.insert(entry.name.clone(), self.tags.read(&entry.path));
            }
            let durations: Vec<u64> = music
                .iter()
                .filter_map(|entry| tags.get(&entry.name))
                .filter_map(|info| info.as_ref().ok())
                .map(|info| info.duration_secs)
                .collect();
            let computed = disc_id_for(&durations);
            if computed != disc_id {
                let _gate = self.gate.lock();
                self.directories
                    .update(&directory.id, |dir| dir.disc_id = computed.clone());
                disc_id = computed;
            }
        }
        let disc_id = disc_id.unwrap_or_default();

        for entry in &music {
            if scan.cancelled() {
                return Vec::new();
            }
            let id = file_id(
                &scan.device.name,
                &directory.relative_path,
                &entry.name,
                self.case_insensitive,
            );
            if !scan.deep && self.files.contains(&id) {
                continue;
            }
            let info = match tags.remove(&entry.name) {
                Some(info) => info,
                None => self.tags.read(&entry.path),
            };
            match info {
                Ok(info) => self.register_music_file(scan, directory, entry, &id, &disc_id, info),
                Err(err) => {
                    warn!("Failed to read tags for {:?}: {}", entry.path, err);
                    scan.stats.errors += 1;
                }
            }
        }

        for entry in &playlists {
            if scan.cancelled() {
                return Vec::new();
            }
            self.register_playlist(scan, directory, entry);
        }

        let mut children = Vec::new();
        for entry in subdirs {
            if scan.cancelled() {
                break;
            }
            children.push(self.register_subdirectory(scan, directory, &entry.name));
        }
        children
    }

    fn list_entries(&self, path: &Path, stats: &mut ScanStats) -> Vec<Entry> {
        let mut entries = Vec::new();
        for entry in WalkDir::new(path)
            .follow_links(false)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Failed to list {:?}: {}", path, err);
                    stats.errors += 1;
                    continue;
                }
            };
            let name = match entry.file_name().to_str() {
                Some(name) => name.to_string(),
                None => {
                    warn!("Skipping {:?}: name is not valid UTF-8", entry.path());
                    stats.errors += 1;
                    continue;
                }
            };
            if is_junk(&name) || (self.config.skip_hidden && is_hidden(&name)) {
                continue;
            }
            let file_type = entry.file_type();
            if !file_type.is_dir() && !file_type.is_file() {
                continue;
            }
            entries.push(Entry {
                path: entry.path().to_path_buf(),
                name,
                is_dir: file_type.is_dir(),
            });
        }
        entries
    }

    fn register_subdirectory(&self, scan: &mut Scan<'_>, parent: &Directory, name: &str) -> Directory {
        let directory = Directory {
            id: directory_id(
                &scan.device.name,
                Some(&parent.relative_path),
                name,
                self.case_insensitive,
            ),
            name: name.to_string(),
            device_id: scan.device.id.clone(),
            parent_id: Some(parent.id.clone()),
            relative_path: child_relpath(&parent.relative_path, name),
            disc_id: None,
            custom: Default::default(),
        };
        let _gate = self.gate.lock();
        let (directory, created) = self.directories.register(directory);
        if created {
            scan.stats.new_directories += 1;
        }
        directory
    }

    fn register_music_file(
        &self,
        scan: &mut Scan<'_>,
        directory: &Directory,
        entry: &Entry,
        file_id: &str,
        disc_id: &str,
        info: TagInfo,
    ) {
        let metadata = match fs::metadata(&entry.path) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("Failed to stat {:?}: {}", entry.path, err);
                scan.stats.errors += 1;
                return;
            }
        };
        if let Some(reason) = &info.corruption {
            scan.reporter.notify_corrupted_file(&entry.path, reason);
            scan.stats.corrupted_files += 1;
        }
        let size = metadata.len();
        let modified = mtime_secs(&metadata);
        let extension = extension_of(&entry.name).unwrap_or_default();
        let album_artist = info.album_artist.clone().unwrap_or_default();
        let year_value = info.year.unwrap_or(0);

        let gate = self.gate.lock();
        let (style, _) = self.styles.register(Style::new(
            info.style_name.as_deref().unwrap_or(UNKNOWN_STYLE),
        ));
        let (author, _) = self.authors.register(Author::new(
            info.author_name.as_deref().unwrap_or(UNKNOWN_AUTHOR),
        ));
        let (year, _) = self.years.register(Year::new(year_value));
        let (album, _) = self.albums.register(Album::new(
            info.album_name.as_deref().unwrap_or(UNKNOWN_ALBUM),
            &album_artist,
            disc_id,
        ));
        let (track_type, _) = self.types.register(TrackType::new(&extension));
        let (track, _) = self.link_track(TrackDraft {
            name: info
                .track_name
                .clone()
                .unwrap_or_else(|| file_stem(&entry.name)),
            album_id: album.id,
            style_id: style.id,
            author_id: author.id,
            year_id: year.id,
            year: year_value,
            type_id: track_type.id,
            duration_secs: info.duration_secs,
            order: info.order.unwrap_or(0),
            disc_number: info.disc_number.unwrap_or(0),
            comment: info.comment.clone().unwrap_or_default(),
            album_artist,
            discovery_date: if self.config.force_file_date {
                modified
            } else {
                now_secs()
            },
        });

        match self.files.get(file_id) {
            Some(known) => {
                let changed = known.track_id != track.id
                    || known.size != size
                    || known.quality != info.quality
                    || known.modified != modified;
                if known.track_id != track.id {
                    self.relink_file(file_id, &track);
                }
                if changed {
                    self.files.update(file_id, |file| {
                        file.size = size;
                        file.quality = info.quality;
                        file.modified = modified;
                    });
                    scan.stats.updated_files += 1;
                }
                drop(gate);
            }
            None => {
                self.link_file(File {
                    id: file_id.to_string(),
                    name: entry.name.clone(),
                    directory_id: directory.id.clone(),
                    dir_path: directory.relative_path.clone(),
                    track_id: track.id.clone(),
                    track_order: track.order,
                    size,
                    quality: info.quality,
                    modified,
                    custom: Default::default(),
                });
                drop(gate);
                scan.stats.new_files += 1;
                scan.reporter.notify_new_file(&entry.path);
            }
        }
    }

    fn register_playlist(&self, scan: &mut Scan<'_>, directory: &Directory, entry: &Entry) {
        let id = playlist_id(
            &scan.device.name,
            &directory.relative_path,
            &entry.name,
            self.case_insensitive,
        );
        let known = self.playlists.contains(&id);
        if known && !scan.deep {
            return;
        }
        let entries = match read_playlist(&entry.path) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("Failed to read playlist {:?}: {}", entry.path, err);
                scan.stats.errors += 1;
                return;
            }
        };
        let _gate = self.gate.lock();
        if known {
            self.playlists.update(&id, |playlist| playlist.entries = entries);
            return;
        }
        self.playlists.register(Playlist {
            id,
            name: entry.name.clone(),
            directory_id: directory.id.clone(),
            dir_path: directory.relative_path.clone(),
            entries,
            custom: Default::default(),
        });
        scan.stats.new_playlists += 1;
    }

    /// Whether the device root is still reachable. A vanished root marks
    /// the device unmounted and ends the scan without removing anything.
    fn still_mounted(&self, scan: &mut Scan<'_>) -> bool {
        if scan.lost {
            return false;
        }
        if scan.device.url.is_dir() {
            return true;
        }
        warn!("Device {} disappeared during scan", scan.device.name);
        scan.lost = true;
        self.set_mounted(&scan.device.id, false);
        false
    }

    fn clean_subtree(&self, scan: &mut Scan<'_>, root: &Directory) {
        let device_id = scan.device.id.clone();
        let directories = self.directories.filtered(|dir| {
            dir.device_id == device_id && root.contains_relpath(&dir.relative_path)
        });
        for directory in directories {
            if scan.cancelled() || !self.still_mounted(scan) {
                return;
            }
            let path = join_relpath(&scan.device.url, &directory.relative_path);
            let stale = !directory.is_root()
                && (!path.is_dir()
                    || is_junk(&directory.name)
                    || (self.config.skip_hidden && is_hidden(&directory.name)));
            if stale {
                if !self.still_mounted(scan) {
                    return;
                }
                let _gate = self.gate.lock();
                scan.record(self.drop_directory(&directory.id));
                continue;
            }
            for file in self.files.filtered(|file| file.directory_id == directory.id) {
                if scan.cancelled() {
                    return;
                }
                if !path.join(&file.name).is_file() || is_junk(&file.name) {
                    if !self.still_mounted(scan) {
                        return;
                    }
                    let _gate = self.gate.lock();
                    scan.record(self.drop_file(&file.id));
                }
            }
            for playlist in self
                .playlists
                .filtered(|playlist| playlist.directory_id == directory.id)
            {
                if !path.join(&playlist.name).is_file() {
                    if !self.still_mounted(scan) {
                        return;
                    }
                    let _gate = self.gate.lock();
                    scan.record(self.drop_playlist(&playlist.id));
                }
            }
        }
    }
}

/// CDDB-style disc identifier over the durations of a directory's tracks.
pub fn disc_id_for(durations: &[u64]) -> Option<String> {
    if durations.is_empty() {
        return None;
    }
    let mut checksum = 0u64;
    // Offsets start after the two-second lead-in.
    let mut offset = 2u64;
    for duration in durations {
        checksum += digit_sum(offset);
        offset += duration;
    }
    let total = offset - 2;
    let id = ((checksum % 0xff) << 24) | ((total & 0xffff) << 8) | (durations.len() as u64 & 0xff);
    Some(format!("{:08x}", id))
}

fn digit_sum(mut value: u64) -> u64 {
    let mut sum = 0;
    while value > 0 {
        sum += value % 10;
        value /= 10;
    }
    sum
}

/// Entries of an m3u playlist: every non-empty line that is not a
/// comment or directive.
pub fn read_playlist(path: &Path) -> Result<Vec<String>, std::io::Error> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(text
        .lines()
        .map(|line| line.trim_start_matches('\u{feff}').trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.to_string())
        .collect())
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(name)
        .to_string()
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn is_junk(name: &str) -> bool {
    let lower = name.to_lowercase();
    JUNK_NAMES.contains(&lower.as_str()) || lower.starts_with("._") || lower.ends_with('~')
}

fn mtime_secs(metadata: &fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{collection_with, put_file, tag, FakeTags, RecordingReporter};
    use common::{DeviceKind, Entity};
    use std::sync::Arc;

    fn album_y(root: &Path, tags: &FakeTags) {
        let first = put_file(root, "ArtistX/AlbumY/track1.mp3");
        let second = put_file(root, "ArtistX/AlbumY/track2.mp3");
        tags.set(&first, tag("Song", "AlbumY", "ArtistX", 2001, 1, 200));
        tags.set(&second, tag("Other Song", "AlbumY", "ArtistX", 2001, 2, 240));
    }

    #[test]
    fn deep_scan_builds_the_catalog_and_cleanup_follows_deletions() {
        let dir = tempfile::tempdir().unwrap();
        let tags = Arc::new(FakeTags::default());
        album_y(dir.path(), &tags);
        let collection = collection_with(tags.clone());
        let device = collection
            .register_device("music", dir.path(), DeviceKind::Directory)
            .unwrap();

        let outcome = collection
            .refresh_device(&device.id, true, &NoopReporter, &CancelToken::new())
            .unwrap();
        let stats = outcome.stats().unwrap();
        assert_eq!(stats.new_files, 2);
        assert_eq!(stats.new_directories, 2);

        assert_eq!(collection.authors().len(), 1);
        assert_eq!(collection.authors().all()[0].name, "ArtistX");
        assert_eq!(collection.albums().len(), 1);
        let album = collection.albums().all().remove(0);
        assert_eq!(album.name, "AlbumY");
        assert_eq!(Some(album.disc_id.clone()), disc_id_for(&[200, 240]));
        assert_eq!(collection.tracks().len(), 2);
        assert_eq!(collection.files().len(), 2);
        assert_eq!(collection.album_tracks(&album.id).len(), 2);

        fs::remove_file(dir.path().join("ArtistX/AlbumY/track1.mp3")).unwrap();
        let outcome = collection
            .refresh_device(&device.id, true, &NoopReporter, &CancelToken::new())
            .unwrap();
        assert_eq!(outcome.stats().unwrap().removed_files, 1);
        assert_eq!(collection.files().len(), 1);
        assert_eq!(collection.tracks().len(), 1);
        // The remaining file now yields a one-track disc id, hence a new album.
        let albums = collection.albums().all();
        assert_eq!(albums.len(), 1);
        assert_eq!(collection.album_tracks(&albums[0].id).len(), 1);
        assert_eq!(
            collection.album_tracks(&albums[0].id),
            collection.derive_album_tracks(&albums[0].id)
        );
    }

    #[test]
    fn cleanup_pass_alone_removes_exactly_the_deleted_file() {
        let dir = tempfile::tempdir().unwrap();
        let tags = Arc::new(FakeTags::default());
        album_y(dir.path(), &tags);
        let collection = collection_with(tags);
        let device = collection
            .register_device("music", dir.path(), DeviceKind::Directory)
            .unwrap();
        collection
            .refresh_device(&device.id, true, &NoopReporter, &CancelToken::new())
            .unwrap();
        let album = collection.albums().all().remove(0);

        fs::remove_file(dir.path().join("ArtistX/AlbumY/track1.mp3")).unwrap();
        let root = collection.root_directory(&device.id).unwrap();
        let outcome = collection
            .clean_removed_files(&root.id, &CancelToken::new())
            .unwrap();
        assert_eq!(outcome.stats().unwrap().removed_files, 1);
        assert_eq!(collection.files().len(), 1);
        assert_eq!(collection.tracks().len(), 1);
        assert_eq!(collection.album_tracks(&album.id).len(), 1);
    }

    #[test]
    fn second_fast_scan_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let tags = Arc::new(FakeTags::default());
        album_y(dir.path(), &tags);
        put_file(dir.path(), "Loose/a.flac");
        let collection = collection_with(tags.clone());
        let device = collection
            .register_device("music", dir.path(), DeviceKind::Directory)
            .unwrap();

        collection
            .refresh_device(&device.id, false, &NoopReporter, &CancelToken::new())
            .unwrap();
        let before = collection.stats();
        let reads = tags.reads();

        let outcome = collection
            .refresh_device(&device.id, false, &NoopReporter, &CancelToken::new())
            .unwrap();
        assert!(!outcome.stats().unwrap().changed());
        assert_eq!(collection.stats(), before);
        assert_eq!(tags.reads(), reads);
    }

    #[test]
    fn deep_rescan_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let tags = Arc::new(FakeTags::default());
        album_y(dir.path(), &tags);
        let collection = collection_with(tags);
        let device = collection
            .register_device("music", dir.path(), DeviceKind::Directory)
            .unwrap();
        collection
            .refresh_device(&device.id, true, &NoopReporter, &CancelToken::new())
            .unwrap();
        let ids: Vec<String> = collection.tracks().all().into_iter().map(|t| t.id).collect();
        let outcome = collection
            .refresh_device(&device.id, true, &NoopReporter, &CancelToken::new())
            .unwrap();
        assert!(!outcome.stats().unwrap().changed());
        let again: Vec<String> = collection.tracks().all().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, again);
    }

    #[test]
    fn fast_scan_reuses_the_directory_disc_id() {
        let dir = tempfile::tempdir().unwrap();
        let tags = Arc::new(FakeTags::default());
        album_y(dir.path(), &tags);
        let collection = collection_with(tags.clone());
        let device = collection
            .register_device("music", dir.path(), DeviceKind::Directory)
            .unwrap();
        collection
            .refresh_device(&device.id, true, &NoopReporter, &CancelToken::new())
            .unwrap();

        let third = put_file(dir.path(), "ArtistX/AlbumY/track3.mp3");
        tags.set(&third, tag("Third", "AlbumY", "ArtistX", 2001, 3, 100));
        collection
            .refresh_device(&device.id, false, &NoopReporter, &CancelToken::new())
            .unwrap();
        assert_eq!(collection.albums().len(), 1);
        let album = collection.albums().all().remove(0);
        assert_eq!(collection.album_tracks(&album.id).len(), 3);
    }

    #[test]
    fn corrupted_tags_are_reported_and_kept() {
        let dir = tempfile::tempdir().unwrap();
        let tags = Arc::new(FakeTags::default());
        let path = put_file(dir.path(), "broken.mp3");
        tags.set(
            &path,
            TagInfo {
                corruption: Some("bad frame".into()),
                duration_secs: 12,
                ..TagInfo::default()
            },
        );
        let collection = collection_with(tags);
        let device = collection
            .register_device("music", dir.path(), DeviceKind::Directory)
            .unwrap();
        let reporter = RecordingReporter::default();
        let outcome = collection
            .refresh_device(&device.id, true, &reporter, &CancelToken::new())
            .unwrap();

        assert_eq!(outcome.stats().unwrap().corrupted_files, 1);
        assert_eq!(reporter.corrupted(), vec![path.clone()]);
        assert_eq!(reporter.new_files(), vec![path]);
        let track = collection.tracks().all().remove(0);
        assert_eq!(track.name, "broken");
        assert_eq!(
            collection
                .human_value(EntityKind::Track, &track.id, "author")
                .unwrap(),
            UNKNOWN_AUTHOR
        );
        assert!(reporter.finished());
    }

    #[test]
    fn hidden_and_junk_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let tags = Arc::new(FakeTags::default());
        put_file(dir.path(), ".hidden/a.mp3");
        put_file(dir.path(), "._b.mp3");
        put_file(dir.path(), "Thumbs.db");
        put_file(dir.path(), "notes.txt");
        put_file(dir.path(), "c.mp3");
        let collection = collection_with(tags);
        let device = collection
            .register_device("music", dir.path(), DeviceKind::Directory)
            .unwrap();
        collection
            .refresh_device(&device.id, true, &NoopReporter, &CancelToken::new())
            .unwrap();
        let names: Vec<String> = collection.files().all().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["c.mp3"]);
        assert_eq!(collection.directories().len(), 1);
    }

    #[test]
    fn cancelled_scans_stop_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let tags = Arc::new(FakeTags::default());
        album_y(dir.path(), &tags);
        let collection = collection_with(tags);
        let device = collection
            .register_device("music", dir.path(), DeviceKind::Directory)
            .unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = collection
            .refresh_device(&device.id, true, &NoopReporter, &cancel)
            .unwrap();
        assert!(matches!(outcome, RefreshOutcome::Cancelled(_)));
        assert_eq!(collection.files().len(), 0);
    }

    #[test]
    fn unmounted_devices_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let tags = Arc::new(FakeTags::default());
        album_y(dir.path(), &tags);
        let root = dir.path().join("mount");
        fs::create_dir(&root).unwrap();
        put_file(&root, "a.mp3");
        let collection = collection_with(tags);
        let device = collection
            .register_device("usb", &root, DeviceKind::ExternalDrive)
            .unwrap();
        collection
            .refresh_device(&device.id, true, &NoopReporter, &CancelToken::new())
            .unwrap();
        assert_eq!(collection.files().len(), 1);

        fs::rename(&root, dir.path().join("elsewhere")).unwrap();
        let outcome = collection
            .refresh_device(&device.id, true, &NoopReporter, &CancelToken::new())
            .unwrap();
        assert_eq!(outcome, RefreshOutcome::NotMounted);
        assert!(!collection.is_mounted(&device.id));
        assert_eq!(collection.files().len(), 1);
        let root_dir = collection.root_directory(&device.id).unwrap();
        assert_eq!(
            collection
                .clean_removed_files(&root_dir.id, &CancelToken::new())
                .unwrap(),
            RefreshOutcome::NotMounted
        );
        assert_eq!(collection.files().len(), 1);
    }

    #[test]
    fn removed_directories_cascade() {
        let dir = tempfile::tempdir().unwrap();
        let tags = Arc::new(FakeTags::default());
        album_y(dir.path(), &tags);
        fs::write(dir.path().join("ArtistX/AlbumY/best.m3u"), "track1.mp3\n").unwrap();
        let collection = collection_with(tags);
        let device = collection
            .register_device("music", dir.path(), DeviceKind::Directory)
            .unwrap();
        collection
            .refresh_device(&device.id, true, &NoopReporter, &CancelToken::new())
            .unwrap();
        assert_eq!(collection.playlists().len(), 1);

        fs::remove_dir_all(dir.path().join("ArtistX")).unwrap();
        let outcome = collection
            .refresh_device(&device.id, false, &NoopReporter, &CancelToken::new())
            .unwrap();
        let stats = outcome.stats().unwrap();
        assert_eq!(stats.removed_directories, 2);
        assert_eq!(stats.removed_files, 2);
        assert_eq!(stats.removed_playlists, 1);
        assert_eq!(collection.tracks().len(), 0);
        assert_eq!(collection.authors().len(), 0);
        assert_eq!(collection.albums().len(), 0);
        assert_eq!(collection.directories().len(), 1);
    }

    #[test]
    fn playlists_resolve_registered_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let tags = Arc::new(FakeTags::default());
        album_y(dir.path(), &tags);
        fs::write(
            dir.path().join("ArtistX/AlbumY/mix.m3u"),
            "#EXTM3U\n#EXTINF:200,Song\ntrack2.mp3\nmissing.mp3\n\ntrack1.mp3\n",
        )
        .unwrap();
        let collection = collection_with(tags);
        let device = collection
            .register_device("music", dir.path(), DeviceKind::Directory)
            .unwrap();
        collection
            .refresh_device(&device.id, true, &NoopReporter, &CancelToken::new())
            .unwrap();

        let playlist = collection.playlists().all().remove(0);
        assert_eq!(playlist.entries.len(), 3);
        let names: Vec<String> = collection
            .playlist_files(playlist.id())
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["track2.mp3", "track1.mp3"]);
    }

    #[test]
    fn readers_never_see_partial_state_during_a_scan() {
        let dir = tempfile::tempdir().unwrap();
        let tags = Arc::new(FakeTags::default());
        for album in 0..10 {
            for track in 0..5 {
                let path = put_file(dir.path(), &format!("A{}/t{}.mp3", album, track));
                tags.set(
                    &path,
                    tag(&format!("t{}", track), &format!("A{}", album), "X", 2000, track + 1, 60),
                );
            }
        }
        let collection = collection_with(tags);
        let device = collection
            .register_device("music", dir.path(), DeviceKind::Directory)
            .unwrap();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                collection
                    .refresh_device(&device.id, true, &NoopReporter, &CancelToken::new())
                    .unwrap();
            });
            for _ in 0..3 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        for file in collection.files().all() {
                            assert!(!file.track_id.is_empty());
                        }
                        for album in collection.albums().all() {
                            for track in collection.album_tracks(&album.id) {
                                assert_eq!(track.album_id, album.id);
                            }
                        }
                    }
                });
            }
        });
        assert_eq!(collection.files().len(), 50);
        assert_eq!(collection.albums().len(), 10);
    }

    /// Moves the device root away as soon as the scan starts.
    struct VanishingRoot {
        from: PathBuf,
        to: PathBuf,
    }

    impl Reporter for VanishingRoot {
        fn startup(&self, _device: &Device) {
            fs::rename(&self.from, &self.to).unwrap();
        }
    }

    #[test]
    fn device_vanishing_mid_refresh_keeps_the_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let tags = Arc::new(FakeTags::default());
        let root = dir.path().join("mount");
        album_y(&root, &tags);
        let collection = collection_with(tags);
        let device = collection
            .register_device("usb", &root, DeviceKind::ExternalDrive)
            .unwrap();
        collection
            .refresh_device(&device.id, false, &NoopReporter, &CancelToken::new())
            .unwrap();
        let before = collection.stats();
        assert_eq!(before.files, 2);

        let reporter = VanishingRoot {
            from: root.clone(),
            to: dir.path().join("elsewhere"),
        };
        let outcome = collection
            .refresh_device(&device.id, false, &reporter, &CancelToken::new())
            .unwrap();
        assert_eq!(outcome, RefreshOutcome::NotMounted);
        assert!(!collection.is_mounted(&device.id));
        assert_eq!(collection.stats(), before);
        assert_eq!(collection.authors().len(), 1);
        assert_eq!(collection.albums().len(), 1);
    }

    /// Cancels the scan right after the first new file is registered.
    struct CancelOnNewFile {
        token: CancelToken,
    }

    impl Reporter for CancelOnNewFile {
        fn notify_new_file(&self, _path: &Path) {
            self.token.cancel();
        }
    }

    #[test]
    fn cancelling_mid_scan_leaves_a_consistent_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let tags = Arc::new(FakeTags::default());
        album_y(dir.path(), &tags);
        let third = put_file(dir.path(), "ArtistZ/AlbumW/track3.mp3");
        tags.set(&third, tag("Third", "AlbumW", "ArtistZ", 1999, 1, 100));
        let collection = collection_with(tags);
        let device = collection
            .register_device("music", dir.path(), DeviceKind::Directory)
            .unwrap();

        let token = CancelToken::new();
        let reporter = CancelOnNewFile {
            token: token.clone(),
        };
        let outcome = collection
            .refresh_device(&device.id, true, &reporter, &token)
            .unwrap();
        assert!(matches!(outcome, RefreshOutcome::Cancelled(_)));
        assert_eq!(outcome.stats().unwrap().new_files, 1);
        assert_eq!(collection.files().len(), 1);
        assert_eq!(collection.tracks().len(), 1);
        for track in collection.tracks().all() {
            assert!(collection.has_files(&track));
        }
        for album in collection.albums().all() {
            assert_eq!(
                collection.album_tracks(&album.id),
                collection.derive_album_tracks(&album.id)
            );
        }
    }

    #[test]
    fn single_directory_scans_report_startup_and_done() {
        let dir = tempfile::tempdir().unwrap();
        let tags = Arc::new(FakeTags::default());
        put_file(dir.path(), "a.mp3");
        let collection = collection_with(tags);
        let device = collection
            .register_device("music", dir.path(), DeviceKind::Directory)
            .unwrap();
        let root = collection.root_directory(&device.id).unwrap();
        let reporter = RecordingReporter::default();
        collection
            .scan_directory(&root.id, false, &reporter, &CancelToken::new())
            .unwrap();
        assert!(reporter.finished());
        assert_eq!(collection.files().len(), 1);
    }
}
