use std::mem;
use std::path::{Path, PathBuf};

use common::{Album, Author, EntityKind, File, Style, Track, TrackDraft, Year};
use metadata::TagUpdate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collection::Collection;
use crate::LibraryError;

pub const MAX_RATE: i64 = 100;
pub const MAX_YEAR: i64 = 9999;

/// One change requested on a track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackEdit {
    Name(String),
    Album(String),
    Author(String),
    Style(String),
    Year(i64),
    Order(i64),
    DiscNumber(i64),
    AlbumArtist(String),
    Rate(i64),
    Comment(String),
}

impl TrackEdit {
    fn field(&self) -> &'static str {
        match self {
            TrackEdit::Name(_) => "name",
            TrackEdit::Album(_) => "album",
            TrackEdit::Author(_) => "author",
            TrackEdit::Style(_) => "style",
            TrackEdit::Year(_) => "year",
            TrackEdit::Order(_) => "order",
            TrackEdit::DiscNumber(_) => "disc_number",
            TrackEdit::AlbumArtist(_) => "album_artist",
            TrackEdit::Rate(_) => "rate",
            TrackEdit::Comment(_) => "comment",
        }
    }

    /// Rejects values no tag can hold. An out-of-range rate is reset to 0.
    fn validated(self) -> Result<Self, LibraryError> {
        let invalid = |edit: &TrackEdit, value: String| LibraryError::InvalidValue {
            field: edit.field(),
            value,
        };
        match self {
            TrackEdit::Name(ref value) | TrackEdit::Album(ref value)
            | TrackEdit::Author(ref value) | TrackEdit::Style(ref value)
                if value.trim().is_empty() =>
            {
                Err(invalid(&self, value.clone()))
            }
            TrackEdit::Year(value) if !(0..=MAX_YEAR).contains(&value) => {
                Err(invalid(&self, value.to_string()))
            }
            TrackEdit::Order(value) | TrackEdit::DiscNumber(value)
                if u32::try_from(value).is_err() =>
            {
                Err(invalid(&self, value.to_string()))
            }
            TrackEdit::Rate(value) if !(0..=MAX_RATE).contains(&value) => {
                warn!("Rate {} out of range; reset to 0", value);
                Ok(TrackEdit::Rate(0))
            }
            TrackEdit::Name(value) => Ok(TrackEdit::Name(value.trim().to_string())),
            TrackEdit::Album(value) => Ok(TrackEdit::Album(value.trim().to_string())),
            TrackEdit::Author(value) => Ok(TrackEdit::Author(value.trim().to_string())),
            TrackEdit::Style(value) => Ok(TrackEdit::Style(value.trim().to_string())),
            TrackEdit::AlbumArtist(value) => Ok(TrackEdit::AlbumArtist(value.trim().to_string())),
            other => Ok(other),
        }
    }

    fn tag_update(&self) -> TagUpdate {
        let mut update = TagUpdate::default();
        match self {
            TrackEdit::Name(value) => update.track_name = Some(value.clone()),
            TrackEdit::Album(value) => update.album_name = Some(value.clone()),
            TrackEdit::Author(value) => update.author_name = Some(value.clone()),
            TrackEdit::Style(value) => update.style_name = Some(value.clone()),
            TrackEdit::Year(value) => update.year = Some(*value),
            TrackEdit::Order(value) => update.order = u32::try_from(*value).ok(),
            TrackEdit::DiscNumber(value) => update.disc_number = u32::try_from(*value).ok(),
            TrackEdit::AlbumArtist(value) => update.album_artist = Some(value.clone()),
            TrackEdit::Comment(value) => update.comment = Some(value.clone()),
            TrackEdit::Rate(_) => {}
        }
        update
    }

    /// Registry whose entities may be orphaned by this edit.
    fn orphaned_kind(&self) -> Option<EntityKind> {
        match self {
            TrackEdit::Album(_) | TrackEdit::AlbumArtist(_) => Some(EntityKind::Album),
            TrackEdit::Author(_) => Some(EntityKind::Author),
            TrackEdit::Year(_) => Some(EntityKind::Year),
            _ => None,
        }
    }
}

/// Per-file result of tag writes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagWriteReport {
    pub written: Vec<PathBuf>,
    /// Held back until `Collection::flush_tag_writes`.
    pub queued: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl TagWriteReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn accepted(&self, path: &Path) -> bool {
        self.written.iter().chain(&self.queued).any(|done| done == path)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum EditOutcome {
    /// The requested value equals the current one.
    Unchanged(Track),
    /// Rate or comment updated on the same track.
    InPlace { track: Track, report: TagWriteReport },
    /// Files moved to the track with the new identity. `previous` is the
    /// old track when some of its files stayed behind.
    Migrated {
        track: Track,
        previous: Option<Track>,
        moved: Vec<File>,
        report: TagWriteReport,
    },
}

impl EditOutcome {
    pub fn track(&self) -> &Track {
        match self {
            EditOutcome::Unchanged(track) => track,
            EditOutcome::InPlace { track, .. } => track,
            EditOutcome::Migrated { track, .. } => track,
        }
    }
}

impl Collection {
    /// Applies an edit to a track. Identity-changing edits write the tags
    /// of the accessible files accepted by `filter`, then move those files
    /// to the track with the new identity.
    pub fn edit_track(
        &self,
        track_id: &str,
        edit: TrackEdit,
        filter: Option<&dyn Fn(&File) -> bool>,
    ) -> Result<EditOutcome, LibraryError> {
        let edit = edit.validated()?;
        let _gate = self.gate.lock();
        let track = self
            .tracks
            .get(track_id)
            .ok_or_else(|| LibraryError::not_found(EntityKind::Track, track_id))?;
        if self.is_unchanged(&track, &edit) {
            return Ok(EditOutcome::Unchanged(track));
        }

        if let TrackEdit::Rate(rate) = edit {
            let track = self
                .tracks
                .update(track_id, |track| track.rate = rate)
                .ok_or_else(|| LibraryError::not_found(EntityKind::Track, track_id))?;
            return Ok(EditOutcome::InPlace {
                track,
                report: TagWriteReport::default(),
            });
        }

        let files: Vec<(File, PathBuf)> = self
            .track_files(track_id)
            .into_iter()
            .filter(|file| self.is_file_accessible(file))
            .filter(|file| filter.map(|keep| keep(file)).unwrap_or(true))
            .filter_map(|file| {
                let path = self.file_path(&file)?;
                Some((file, path))
            })
            .collect();

        if let TrackEdit::Comment(comment) = &edit {
            let paths: Vec<PathBuf> = files.into_iter().map(|(_, path)| path).collect();
            let report = self.write_tags(&paths, &edit.tag_update());
            let track = self
                .tracks
                .update(track_id, |track| track.comment = comment.clone())
                .ok_or_else(|| LibraryError::not_found(EntityKind::Track, track_id))?;
            return Ok(EditOutcome::InPlace { track, report });
        }

        if files.is_empty() {
            return Err(LibraryError::NoAccessibleFiles {
                track_id: track_id.to_string(),
            });
        }
        let paths: Vec<PathBuf> = files.iter().map(|(_, path)| path.clone()).collect();
        let report = self.write_tags(&paths, &edit.tag_update());
        if report.written.is_empty() && report.queued.is_empty() {
            return Err(LibraryError::TagWrite(report));
        }

        let draft = self.edited_draft(&track, &edit);
        let existed = self.tracks.contains(&draft.key().id());
        let (target, _) = self.link_track(draft);
        let target = if target.id == track.id {
            target
        } else {
            self.tracks
                .update(&target.id, |new| {
                    if !existed {
                        new.rate = track.rate;
                        new.hits = track.hits;
                        new.comment = track.comment.clone();
                        new.discovery_date = track.discovery_date;
                    }
                    // Values already on the target win.
                    for (name, value) in &track.custom {
                        new.custom.entry(name.clone()).or_insert_with(|| value.clone());
                    }
                })
                .unwrap_or(target)
        };

        let mut moved = Vec::new();
        for (file, path) in &files {
            if !report.accepted(path) {
                continue;
            }
            if let Some((file, _)) = self.relink_file(&file.id, &target) {
                moved.push(file);
            }
        }
        if !self.has_files(&track) {
            self.drop_track(&track.id);
        }
        if let Some(kind) = edit.orphaned_kind() {
            let removed = self.cleanup_kind(kind);
            debug!("Edit of {} orphaned {} {} entries", track.id, removed, kind);
        }
        info!(
            "Track '{}' {} edit moved {} file(s), {} failed",
            track.name,
            edit.field(),
            moved.len(),
            report.failed.len()
        );
        Ok(EditOutcome::Migrated {
            previous: self.tracks.get(&track.id),
            track: target,
            moved,
            report,
        })
    }

    /// Renames an album by editing each of its tracks. Results are listed
    /// per track; one failing track does not stop the others.
    pub fn rename_album(
        &self,
        album_id: &str,
        name: &str,
    ) -> Result<Vec<(String, Result<EditOutcome, LibraryError>)>, LibraryError> {
        if !self.albums.contains(album_id) {
            return Err(LibraryError::not_found(EntityKind::Album, album_id));
        }
        Ok(self
            .album_tracks(album_id)
            .into_iter()
            .map(|track| {
                let outcome = self.edit_track(&track.id, TrackEdit::Album(name.to_string()), None);
                (track.id, outcome)
            })
            .collect())
    }

    /// Writes every queued tag update. Failed writes are reported and
    /// dropped from the queue.
    pub fn flush_tag_writes(&self) -> TagWriteReport {
        let pending = mem::take(&mut *self.pending_tags.lock());
        let mut report = TagWriteReport::default();
        for (path, update) in pending {
            match self.tags.write(&path, &update) {
                Ok(()) => report.written.push(path),
                Err(err) => {
                    warn!("Failed to write tags to {:?}: {}", path, err);
                    report.failed.push((path, err.to_string()));
                }
            }
        }
        report
    }

    pub fn pending_tag_writes(&self) -> usize {
        self.pending_tags.lock().len()
    }

    fn write_tags(&self, paths: &[PathBuf], update: &TagUpdate) -> TagWriteReport {
        let mut report = TagWriteReport::default();
        if !self.config.autocommit_tags {
            let mut pending = self.pending_tags.lock();
            for path in paths {
                pending
                    .entry(path.clone())
                    .or_default()
                    .merge(update.clone());
                report.queued.push(path.clone());
            }
            return report;
        }
        for path in paths {
            match self.tags.write(path, update) {
                Ok(()) => report.written.push(path.clone()),
                Err(err) => {
                    warn!("Failed to write tags to {:?}: {}", path, err);
                    report.failed.push((path.clone(), err.to_string()));
                }
            }
        }
        report
    }

    fn is_unchanged(&self, track: &Track, edit: &TrackEdit) -> bool {
        let name_of = |value: Option<String>| value.unwrap_or_default();
        match edit {
            TrackEdit::Name(value) => &track.name == value,
            TrackEdit::Album(value) => {
                &name_of(self.albums.get(&track.album_id).map(|a| a.name)) == value
            }
            TrackEdit::Author(value) => {
                &name_of(self.authors.get(&track.author_id).map(|a| a.name)) == value
            }
            TrackEdit::Style(value) => {
                &name_of(self.styles.get(&track.style_id).map(|s| s.name)) == value
            }
            TrackEdit::Year(value) => {
                self.years.get(&track.year_id).map(|y| y.value) == Some(*value)
            }
            TrackEdit::Order(value) => i64::from(track.order) == *value,
            TrackEdit::DiscNumber(value) => i64::from(track.disc_number) == *value,
            TrackEdit::AlbumArtist(value) => &track.album_artist == value,
            TrackEdit::Rate(value) => track.rate == *value,
            TrackEdit::Comment(value) => &track.comment == value,
        }
    }

    /// Identity of `track` with `edit` applied, registering the referenced
    /// entities it needs.
    fn edited_draft(&self, track: &Track, edit: &TrackEdit) -> TrackDraft {
        let album = self.albums.get(&track.album_id);
        let album_name = album.as_ref().map(|a| a.name.clone()).unwrap_or_default();
        let disc_id = album.map(|a| a.disc_id).unwrap_or_default();
        let year = self.years.get(&track.year_id).map(|y| y.value).unwrap_or(0);
        let mut draft = TrackDraft {
            name: track.name.clone(),
            album_id: track.album_id.clone(),
            style_id: track.style_id.clone(),
            author_id: track.author_id.clone(),
            year_id: track.year_id.clone(),
            year,
            type_id: track.type_id.clone(),
            duration_secs: track.duration_secs,
            order: track.order,
            disc_number: track.disc_number,
            comment: track.comment.clone(),
            album_artist: track.album_artist.clone(),
            discovery_date: track.discovery_date,
        };
        match edit {
            TrackEdit::Name(value) => draft.name = value.clone(),
            TrackEdit::Album(value) => {
                let (album, _) = self
                    .albums
                    .register(Album::new(value, &track.album_artist, &disc_id));
                draft.album_id = album.id;
            }
            TrackEdit::AlbumArtist(value) => {
                let (album, _) = self.albums.register(Album::new(&album_name, value, &disc_id));
                draft.album_id = album.id;
                draft.album_artist = value.clone();
            }
            TrackEdit::Author(value) => {
                let (author, _) = self.authors.register(Author::new(value));
                draft.author_id = author.id;
            }
            TrackEdit::Style(value) => {
                let (style, _) = self.styles.register(Style::new(value));
                draft.style_id = style.id;
            }
            TrackEdit::Year(value) => {
                let (year, _) = self.years.register(Year::new(*value));
                draft.year_id = year.id;
                draft.year = *value;
            }
            TrackEdit::Order(value) => draft.order = u32::try_from(*value).unwrap_or(0),
            TrackEdit::DiscNumber(value) => {
                draft.disc_number = u32::try_from(*value).unwrap_or(0)
            }
            TrackEdit::Rate(_) | TrackEdit::Comment(_) => {}
        }
        draft
    }
}
