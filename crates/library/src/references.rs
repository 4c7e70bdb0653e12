use std::collections::{BTreeSet, HashMap, HashSet};

use common::{Entity, EntityKind, File, Track, TrackDraft};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collection::Collection;

/// Position of a track inside its album: disc, then order, then name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct AlbumSlot {
    disc_number: u32,
    order: u32,
    name: String,
    track_id: String,
}

impl AlbumSlot {
    fn of(track: &Track) -> Self {
        Self {
            disc_number: track.disc_number,
            order: track.order,
            name: track.name.to_lowercase(),
            track_id: track.id.clone(),
        }
    }
}

/// Derived back-reference caches: album to tracks and track to files.
/// Only `Collection` mutates them, through the cascade operations below.
#[derive(Default)]
pub(crate) struct References {
    album_tracks: RwLock<HashMap<String, BTreeSet<AlbumSlot>>>,
    track_files: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl References {
    fn add_track(&self, track: &Track) {
        self.album_tracks
            .write()
            .entry(track.album_id.clone())
            .or_default()
            .insert(AlbumSlot::of(track));
    }

    fn remove_track(&self, track: &Track) {
        let mut albums = self.album_tracks.write();
        if let Some(slots) = albums.get_mut(&track.album_id) {
            slots.remove(&AlbumSlot::of(track));
            if slots.is_empty() {
                albums.remove(&track.album_id);
            }
        }
    }

    fn add_file(&self, file: &File) {
        self.track_files
            .write()
            .entry(file.track_id.clone())
            .or_default()
            .insert(file.id.clone());
    }

    /// Returns how many files still reference the file's track.
    fn remove_file(&self, file: &File) -> usize {
        let mut tracks = self.track_files.write();
        match tracks.get_mut(&file.track_id) {
            Some(files) => {
                files.remove(&file.id);
                let left = files.len();
                if left == 0 {
                    tracks.remove(&file.track_id);
                }
                left
            }
            None => 0,
        }
    }

    pub(crate) fn album_track_ids(&self, album_id: &str) -> Vec<String> {
        self.album_tracks
            .read()
            .get(album_id)
            .map(|slots| slots.iter().map(|slot| slot.track_id.clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn albums_in_use(&self) -> HashSet<String> {
        self.album_tracks.read().keys().cloned().collect()
    }

    pub(crate) fn track_file_ids(&self, track_id: &str) -> Vec<String> {
        self.track_files
            .read()
            .get(track_id)
            .map(|files| files.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn file_count(&self, track_id: &str) -> usize {
        self.track_files
            .read()
            .get(track_id)
            .map(|files| files.len())
            .unwrap_or(0)
    }

    /// Recomputes both caches from the registries' contents.
    pub(crate) fn rebuild(&self, tracks: &[Track], files: &[File]) {
        let mut albums: HashMap<String, BTreeSet<AlbumSlot>> = HashMap::new();
        for track in tracks {
            albums
                .entry(track.album_id.clone())
                .or_default()
                .insert(AlbumSlot::of(track));
        }
        let mut links: HashMap<String, BTreeSet<String>> = HashMap::new();
        for file in files {
            links
                .entry(file.track_id.clone())
                .or_default()
                .insert(file.id.clone());
        }
        *self.album_tracks.write() = albums;
        *self.track_files.write() = links;
    }
}

/// Counts of the entities removed by one cascade or cleanup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Removal {
    pub directories: usize,
    pub files: usize,
    pub playlists: usize,
    pub tracks: usize,
    pub albums: usize,
    pub authors: usize,
    pub years: usize,
}

impl Removal {
    pub fn absorb(&mut self, other: Removal) {
        self.directories += other.directories;
        self.files += other.files;
        self.playlists += other.playlists;
        self.tracks += other.tracks;
        self.albums += other.albums;
        self.authors += other.authors;
        self.years += other.years;
    }
}

// Cascade primitives. Callers hold the collection gate.
impl Collection {
    pub(crate) fn link_track(&self, draft: TrackDraft) -> (Track, bool) {
        let (track, created) = self.tracks.register(draft.build());
        if created {
            self.refs.add_track(&track);
        }
        (track, created)
    }

    pub(crate) fn link_file(&self, file: File) -> (File, bool) {
        let (file, created) = self.files.register(file);
        if created {
            self.refs.add_file(&file);
        }
        (file, created)
    }

    /// Points a file at another track. The previous track is dropped when
    /// this was its last file; the flag tells whether that happened.
    pub(crate) fn relink_file(&self, file_id: &str, track: &Track) -> Option<(File, bool)> {
        let before = self.files.get(file_id)?;
        if before.track_id == track.id {
            return Some((before, false));
        }
        let left = self.refs.remove_file(&before);
        let after = self.files.update(file_id, |file| {
            file.track_id = track.id.clone();
            file.track_order = track.order;
        })?;
        self.refs.add_file(&after);
        let dropped = left == 0 && self.drop_track(&before.track_id).is_some();
        Some((after, dropped))
    }

    pub(crate) fn drop_track(&self, track_id: &str) -> Option<Track> {
        let track = self.tracks.remove(track_id)?;
        self.refs.remove_track(&track);
        debug!("Dropped track {} ({})", track.name, track.id);
        Some(track)
    }

    /// Removes a file and, when it was the last one, its track.
    pub(crate) fn drop_file(&self, file_id: &str) -> Removal {
        let mut removal = Removal::default();
        let file = match self.files.remove(file_id) {
            Some(file) => file,
            None => return removal,
        };
        removal.files += 1;
        if self.refs.remove_file(&file) == 0 && self.drop_track(&file.track_id).is_some() {
            removal.tracks += 1;
        }
        removal
    }

    pub(crate) fn drop_playlist(&self, playlist_id: &str) -> Removal {
        let mut removal = Removal::default();
        if self.playlists.remove(playlist_id).is_some() {
            removal.playlists += 1;
        }
        removal
    }

    /// Removes the files and playlists of a directory, then its child
    /// directories, then the directory itself. Unknown IDs are a no-op.
    pub(crate) fn drop_directory(&self, directory_id: &str) -> Removal {
        let mut removal = Removal::default();
        if !self.directories.contains(directory_id) {
            return removal;
        }
        for file in self.files.filtered(|file| file.directory_id == directory_id) {
            removal.absorb(self.drop_file(&file.id));
        }
        for playlist in self
            .playlists
            .filtered(|playlist| playlist.directory_id == directory_id)
        {
            removal.absorb(self.drop_playlist(&playlist.id));
        }
        let children = self
            .directories
            .filtered(|dir| dir.parent_id.as_deref() == Some(directory_id));
        for child in children {
            removal.absorb(self.drop_directory(&child.id));
        }
        if self.directories.remove(directory_id).is_some() {
            removal.directories += 1;
        }
        removal
    }

    /// Drops authors, years and albums no track references. Styles stay.
    pub(crate) fn cleanup_orphans(&self) -> Removal {
        let tracks = self.tracks.all();
        let authors: HashSet<String> = tracks.iter().map(|t| t.author_id.clone()).collect();
        let years: HashSet<String> = tracks.iter().map(|t| t.year_id.clone()).collect();
        Removal {
            authors: self.authors.retain_referenced(&authors).len(),
            years: self.years.retain_referenced(&years).len(),
            albums: self.albums.retain_referenced(&self.refs.albums_in_use()).len(),
            ..Removal::default()
        }
    }

    /// Orphan cleanup restricted to one registry.
    pub(crate) fn cleanup_kind(&self, kind: EntityKind) -> usize {
        let tracks = self.tracks.all();
        match kind {
            EntityKind::Author => {
                let used: HashSet<String> = tracks.iter().map(|t| t.author_id.clone()).collect();
                self.authors.retain_referenced(&used).len()
            }
            EntityKind::Year => {
                let used: HashSet<String> = tracks.iter().map(|t| t.year_id.clone()).collect();
                self.years.retain_referenced(&used).len()
            }
            EntityKind::Album => self
                .albums
                .retain_referenced(&self.refs.albums_in_use())
                .len(),
            _ => 0,
        }
    }

    /// Runs orphan cleanup across the catalog.
    pub fn cleanup(&self) -> Removal {
        let _gate = self.gate.lock();
        let removal = self.cleanup_orphans();
        debug!(
            "Cleanup removed {} authors, {} years, {} albums",
            removal.authors, removal.years, removal.albums
        );
        removal
    }

    /// Tracks of an album from the cache, in disc and track order.
    pub fn album_tracks(&self, album_id: &str) -> Vec<Track> {
        self.refs
            .album_track_ids(album_id)
            .iter()
            .filter_map(|id| self.tracks.get(id))
            .collect()
    }

    /// Tracks of an album found by a full scan of the track registry, in
    /// the same order as `album_tracks`.
    pub fn derive_album_tracks(&self, album_id: &str) -> Vec<Track> {
        let mut tracks = self.tracks.filtered(|track| track.album_id == album_id);
        tracks.sort_by_cached_key(AlbumSlot::of);
        tracks
    }

    pub fn track_files(&self, track_id: &str) -> Vec<File> {
        self.refs
            .track_file_ids(track_id)
            .iter()
            .filter_map(|id| self.files.get(id))
            .collect()
    }

    pub fn remove_file(&self, file_id: &str) -> Removal {
        let _gate = self.gate.lock();
        self.drop_file(file_id)
    }

    pub fn remove_directory(&self, directory_id: &str) -> Removal {
        let _gate = self.gate.lock();
        self.drop_directory(directory_id)
    }

    pub fn remove_playlist(&self, playlist_id: &str) -> Removal {
        let _gate = self.gate.lock();
        self.drop_playlist(playlist_id)
    }

    /// Removes a device together with its whole directory tree.
    pub fn remove_device(&self, device_id: &str) -> Removal {
        let _gate = self.gate.lock();
        let mut removal = Removal::default();
        for root in self
            .directories
            .filtered(|dir| dir.device_id == device_id && dir.is_root())
        {
            removal.absorb(self.drop_directory(&root.id));
        }
        self.devices.remove(device_id);
        removal
    }

    /// Whether a track is still referenced by at least one file.
    pub fn has_files(&self, track: &Track) -> bool {
        self.refs.file_count(track.id()) > 0
    }
}
