use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use lofty::config::WriteOptions;
use lofty::error::LoftyError;
use lofty::prelude::{AudioFile, ItemKey, TagExt, TaggedFileExt};
use lofty::tag::{ItemValue, Tag};
use tracing::debug;

/// Tag fields read from one audio file. Missing fields are `None`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TagInfo {
    pub track_name: Option<String>,
    pub album_name: Option<String>,
    pub author_name: Option<String>,
    pub style_name: Option<String>,
    pub album_artist: Option<String>,
    pub comment: Option<String>,
    pub year: Option<i64>,
    pub order: Option<u32>,
    pub disc_number: Option<u32>,
    pub duration_secs: u64,
    /// Bitrate in kbps, 0 when unknown.
    pub quality: u32,
    pub extra: BTreeMap<String, String>,
    /// Set when the tag could not be parsed; the other fields then hold
    /// whatever was recovered.
    pub corruption: Option<String>,
}

impl TagInfo {
    pub fn is_corrupted(&self) -> bool {
        self.corruption.is_some()
    }
}

/// Field changes to write back into a file's tag. `None` leaves the
/// field untouched.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TagUpdate {
    pub track_name: Option<String>,
    pub album_name: Option<String>,
    pub author_name: Option<String>,
    pub style_name: Option<String>,
    pub album_artist: Option<String>,
    pub comment: Option<String>,
    pub year: Option<i64>,
    pub order: Option<u32>,
    pub disc_number: Option<u32>,
}

impl TagUpdate {
    pub fn is_empty(&self) -> bool {
        *self == TagUpdate::default()
    }

    /// Folds a later update into this one; the later value wins.
    pub fn merge(&mut self, later: TagUpdate) {
        if later.track_name.is_some() {
            self.track_name = later.track_name;
        }
        if later.album_name.is_some() {
            self.album_name = later.album_name;
        }
        if later.author_name.is_some() {
            self.author_name = later.author_name;
        }
        if later.style_name.is_some() {
            self.style_name = later.style_name;
        }
        if later.album_artist.is_some() {
            self.album_artist = later.album_artist;
        }
        if later.comment.is_some() {
            self.comment = later.comment;
        }
        if later.year.is_some() {
            self.year = later.year;
        }
        if later.order.is_some() {
            self.order = later.order;
        }
        if later.disc_number.is_some() {
            self.disc_number = later.disc_number;
        }
    }

    fn text_fields(&self) -> Vec<(ItemKey, String)> {
        let mut fields = Vec::new();
        let texts = [
            (ItemKey::TrackTitle, &self.track_name),
            (ItemKey::AlbumTitle, &self.album_name),
            (ItemKey::TrackArtist, &self.author_name),
            (ItemKey::Genre, &self.style_name),
            (ItemKey::AlbumArtist, &self.album_artist),
            (ItemKey::Comment, &self.comment),
        ];
        for (key, value) in texts {
            if let Some(value) = value {
                fields.push((key, value.clone()));
            }
        }
        if let Some(year) = self.year {
            fields.push((ItemKey::Year, year.to_string()));
        }
        if let Some(order) = self.order {
            fields.push((ItemKey::TrackNumber, order.to_string()));
        }
        if let Some(disc) = self.disc_number {
            fields.push((ItemKey::DiscNumber, disc.to_string()));
        }
        fields
    }
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
    Unsupported(String),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
            MetadataError::Unsupported(path) => write!(f, "no writable tag in {}", path),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

/// Reads and writes the tags of audio files.
pub trait TagService: Send + Sync {
    /// Reads the tag of `path`. A damaged tag is reported through
    /// `TagInfo::corruption` rather than as an error.
    fn read(&self, path: &Path) -> Result<TagInfo, MetadataError>;

    fn write(&self, path: &Path, update: &TagUpdate) -> Result<(), MetadataError>;
}

/// `TagService` backed by lofty.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyTags;

impl TagService for LoftyTags {
    fn read(&self, path: &Path) -> Result<TagInfo, MetadataError> {
        fs::metadata(path)?;
        match read_tags(path) {
            Ok(info) => Ok(info),
            Err(MetadataError::Lofty(err)) => {
                debug!("Unreadable tag in {:?}: {}", path, err);
                Ok(TagInfo {
                    corruption: Some(err.to_string()),
                    ..TagInfo::default()
                })
            }
            Err(err) => Err(err),
        }
    }

    fn write(&self, path: &Path, update: &TagUpdate) -> Result<(), MetadataError> {
        write_tags(path, update)
    }
}

pub fn read_tags(path: &Path) -> Result<TagInfo, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let properties = tagged_file.properties();

    let mut info = TagInfo {
        duration_secs: properties.duration().as_secs(),
        quality: properties
            .audio_bitrate()
            .or(properties.overall_bitrate())
            .unwrap_or(0),
        ..TagInfo::default()
    };

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        info.track_name = tag_text(tag, &ItemKey::TrackTitle);
        info.album_name = tag_text(tag, &ItemKey::AlbumTitle);
        let album_artist = tag_text(tag, &ItemKey::AlbumArtist);
        let track_artist = tag_text(tag, &ItemKey::TrackArtist);
        info.author_name = track_artist.or_else(|| album_artist.clone());
        info.album_artist = album_artist;
        info.style_name = tag.get_string(&ItemKey::Genre).and_then(first_genre);
        info.comment = tag_text(tag, &ItemKey::Comment);
        info.order = tag.get_string(&ItemKey::TrackNumber).and_then(parse_number);
        info.disc_number = tag.get_string(&ItemKey::DiscNumber).and_then(parse_number);
        info.year = tag
            .get_string(&ItemKey::Year)
            .or_else(|| tag.get_string(&ItemKey::RecordingDate))
            .and_then(parse_year);
        for item in tag.items() {
            if let (ItemKey::Unknown(name), ItemValue::Text(value)) = (item.key(), item.value()) {
                info.extra.insert(name.clone(), value.clone());
            }
        }
    }

    Ok(info)
}

pub fn write_tags(path: &Path, update: &TagUpdate) -> Result<(), MetadataError> {
    if update.is_empty() {
        return Ok(());
    }
    let mut tagged_file = lofty::read_from_path(path)?;
    if tagged_file.primary_tag().is_none() {
        let tag_type = tagged_file.primary_tag_type();
        tagged_file.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged_file
        .primary_tag_mut()
        .ok_or_else(|| MetadataError::Unsupported(path.to_string_lossy().to_string()))?;
    for (key, value) in update.text_fields() {
        if value.is_empty() {
            tag.remove_key(&key);
        } else {
            tag.insert_text(key, value);
        }
    }
    tag.save_to_path(path, WriteOptions::default())?;
    Ok(())
}

fn tag_text(tag: &Tag, key: &ItemKey) -> Option<String> {
    tag.get_string(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_number(text: &str) -> Option<u32> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

fn parse_year(text: &str) -> Option<i64> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

fn first_genre(text: &str) -> Option<String> {
    text.split(&[';', '/', '|', '\0'][..])
        .map(|part| part.trim())
        .find(|part| !part.is_empty())
        .map(|part| part.to_string())
}
