use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::property::{Properties, PropertyKey, PropertyValue};
use crate::{album_id, device_id, name_id, type_id, TrackKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Device,
    Directory,
    File,
    Track,
    Album,
    Author,
    Style,
    Year,
    Type,
    Playlist,
}

impl EntityKind {
    pub const ALL: [EntityKind; 10] = [
        EntityKind::Device,
        EntityKind::Directory,
        EntityKind::File,
        EntityKind::Track,
        EntityKind::Album,
        EntityKind::Author,
        EntityKind::Style,
        EntityKind::Year,
        EntityKind::Type,
        EntityKind::Playlist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Device => "device",
            EntityKind::Directory => "directory",
            EntityKind::File => "file",
            EntityKind::Track => "track",
            EntityKind::Album => "album",
            EntityKind::Author => "author",
            EntityKind::Style => "style",
            EntityKind::Year => "year",
            EntityKind::Type => "type",
            EntityKind::Playlist => "playlist",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural order of an entity: group, then rank, then case-insensitive
/// name, with the ID as tie-break.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SortKey {
    group: String,
    rank: i64,
    name: String,
    id: String,
}

impl SortKey {
    pub fn new(group: &str, rank: i64, name: &str, id: &str) -> Self {
        Self {
            group: group.to_lowercase(),
            rank,
            name: name.to_lowercase(),
            id: id.to_string(),
        }
    }

    pub fn by_name(name: &str, id: &str) -> Self {
        Self::new("", 0, name, id)
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

pub trait Entity: Clone + fmt::Debug + Send + Sync + 'static {
    const KIND: EntityKind;
    /// Whether `cleanup` may drop entities of this type once no Track
    /// references them.
    const ORPHAN_CLEANUP: bool = false;

    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn custom(&self) -> &Properties;
    fn custom_mut(&mut self) -> &mut Properties;

    /// Value of a built-in property. Reference keys yield the referenced ID.
    fn value(&self, key: PropertyKey) -> Option<PropertyValue>;

    fn sort_key(&self) -> SortKey {
        SortKey::by_name(self.name(), self.id())
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        match PropertyKey::parse(name) {
            Some(key) => self.value(key),
            None => self.custom().get(name).cloned(),
        }
    }

    fn human_value(&self, name: &str) -> String {
        self.property(name)
            .map(|value| value.human())
            .unwrap_or_default()
    }
}

fn text(value: &str) -> Option<PropertyValue> {
    Some(PropertyValue::Text(value.to_string()))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Directory,
    FilesCd,
    NetworkDrive,
    ExternalDrive,
    Player,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Directory => "directory",
            DeviceKind::FilesCd => "files_cd",
            DeviceKind::NetworkDrive => "network_drive",
            DeviceKind::ExternalDrive => "external_drive",
            DeviceKind::Player => "player",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub url: PathBuf,
    pub kind: DeviceKind,
    pub mounted: bool,
    #[serde(default)]
    pub custom: Properties,
}

impl Device {
    pub fn new(name: &str, url: PathBuf, kind: DeviceKind) -> Self {
        Self {
            id: device_id(name),
            name: name.to_string(),
            url,
            kind,
            mounted: false,
            custom: Properties::new(),
        }
    }
}

impl Entity for Device {
    const KIND: EntityKind = EntityKind::Device;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn custom(&self) -> &Properties {
        &self.custom
    }

    fn custom_mut(&mut self) -> &mut Properties {
        &mut self.custom
    }

    fn value(&self, key: PropertyKey) -> Option<PropertyValue> {
        match key {
            PropertyKey::Id => text(&self.id),
            PropertyKey::Name => text(&self.name),
            PropertyKey::Url => Some(PropertyValue::Text(self.url.to_string_lossy().to_string())),
            PropertyKey::DeviceKind => text(self.kind.as_str()),
            PropertyKey::Mounted => Some(PropertyValue::Boolean(self.mounted)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Directory {
    pub id: String,
    /// Empty for the root directory of a device.
    pub name: String,
    pub device_id: String,
    pub parent_id: Option<String>,
    /// Slash separated path from the device root.
    pub relative_path: String,
    /// Disc identifier computed by the last deep scan.
    pub disc_id: Option<String>,
    #[serde(default)]
    pub custom: Properties,
}

impl Directory {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Whether `relpath` is this directory or lies below it.
    pub fn contains_relpath(&self, relpath: &str) -> bool {
        if self.relative_path.is_empty() {
            return true;
        }
        relpath == self.relative_path
            || relpath
                .strip_prefix(self.relative_path.as_str())
                .map(|rest| rest.starts_with('/'))
                .unwrap_or(false)
    }
}

impl Entity for Directory {
    const KIND: EntityKind = EntityKind::Directory;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn custom(&self) -> &Properties {
        &self.custom
    }

    fn custom_mut(&mut self) -> &mut Properties {
        &mut self.custom
    }

    fn value(&self, key: PropertyKey) -> Option<PropertyValue> {
        match key {
            PropertyKey::Id => text(&self.id),
            PropertyKey::Name => text(&self.name),
            PropertyKey::Device => text(&self.device_id),
            PropertyKey::Parent => self.parent_id.as_deref().and_then(text),
            PropertyKey::DiscId => self.disc_id.as_deref().and_then(text),
            _ => None,
        }
    }

    fn sort_key(&self) -> SortKey {
        SortKey::new(&self.device_id, 0, &self.relative_path, &self.id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub id: String,
    pub name: String,
    pub directory_id: String,
    /// Relative path of the containing directory.
    pub dir_path: String,
    pub track_id: String,
    /// Order of the referenced track, kept for the natural order.
    pub track_order: u32,
    pub size: u64,
    /// Bitrate in kbps, 0 when unknown.
    pub quality: u32,
    pub modified: u64,
    #[serde(default)]
    pub custom: Properties,
}

impl Entity for File {
    const KIND: EntityKind = EntityKind::File;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn custom(&self) -> &Properties {
        &self.custom
    }

    fn custom_mut(&mut self) -> &mut Properties {
        &mut self.custom
    }

    fn value(&self, key: PropertyKey) -> Option<PropertyValue> {
        match key {
            PropertyKey::Id => text(&self.id),
            PropertyKey::Name => text(&self.name),
            PropertyKey::Directory => text(&self.directory_id),
            PropertyKey::Track => text(&self.track_id),
            PropertyKey::Size => Some(PropertyValue::Integer(self.size as i64)),
            PropertyKey::Quality => Some(PropertyValue::Integer(i64::from(self.quality))),
            PropertyKey::Modified => Some(PropertyValue::Timestamp(self.modified)),
            _ => None,
        }
    }

    fn sort_key(&self) -> SortKey {
        SortKey::new(&self.dir_path, i64::from(self.track_order), &self.name, &self.id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub album_id: String,
    pub style_id: String,
    pub author_id: String,
    pub year_id: String,
    pub type_id: String,
    pub duration_secs: u64,
    pub order: u32,
    pub disc_number: u32,
    pub rate: i64,
    pub hits: u64,
    pub comment: String,
    pub album_artist: String,
    pub discovery_date: u64,
    #[serde(default)]
    pub custom: Properties,
}

/// Identity fields plus the descriptive fields set at creation time.
#[derive(Clone, Debug)]
pub struct TrackDraft {
    pub name: String,
    pub album_id: String,
    pub style_id: String,
    pub author_id: String,
    pub year_id: String,
    pub year: i64,
    pub type_id: String,
    pub duration_secs: u64,
    pub order: u32,
    pub disc_number: u32,
    pub comment: String,
    pub album_artist: String,
    pub discovery_date: u64,
}

impl TrackDraft {
    pub fn key(&self) -> TrackKey<'_> {
        TrackKey {
            style_id: &self.style_id,
            author_id: &self.author_id,
            album_id: &self.album_id,
            name: &self.name,
            year: self.year,
            duration_secs: self.duration_secs,
            order: self.order,
            type_id: &self.type_id,
            disc_number: self.disc_number,
        }
    }

    pub fn build(self) -> Track {
        let id = self.key().id();
        Track {
            id,
            name: self.name,
            album_id: self.album_id,
            style_id: self.style_id,
            author_id: self.author_id,
            year_id: self.year_id,
            type_id: self.type_id,
            duration_secs: self.duration_secs,
            order: self.order,
            disc_number: self.disc_number,
            rate: 0,
            hits: 0,
            comment: self.comment,
            album_artist: self.album_artist,
            discovery_date: self.discovery_date,
            custom: Properties::new(),
        }
    }
}

impl Entity for Track {
    const KIND: EntityKind = EntityKind::Track;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn custom(&self) -> &Properties {
        &self.custom
    }

    fn custom_mut(&mut self) -> &mut Properties {
        &mut self.custom
    }

    fn value(&self, key: PropertyKey) -> Option<PropertyValue> {
        match key {
            PropertyKey::Id => text(&self.id),
            PropertyKey::Name => text(&self.name),
            PropertyKey::Album => text(&self.album_id),
            PropertyKey::Style => text(&self.style_id),
            PropertyKey::Author => text(&self.author_id),
            PropertyKey::Year => text(&self.year_id),
            PropertyKey::Type => text(&self.type_id),
            PropertyKey::Duration => Some(PropertyValue::Integer(self.duration_secs as i64)),
            PropertyKey::Order => Some(PropertyValue::Integer(i64::from(self.order))),
            PropertyKey::DiscNumber => Some(PropertyValue::Integer(i64::from(self.disc_number))),
            PropertyKey::Rate => Some(PropertyValue::Integer(self.rate)),
            PropertyKey::Hits => Some(PropertyValue::Integer(self.hits as i64)),
            PropertyKey::Comment => text(&self.comment),
            PropertyKey::AlbumArtist => text(&self.album_artist),
            PropertyKey::DiscoveryDate => Some(PropertyValue::Timestamp(self.discovery_date)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub album_artist: String,
    pub disc_id: String,
    #[serde(default)]
    pub custom: Properties,
}

impl Album {
    pub fn new(name: &str, album_artist: &str, disc_id: &str) -> Self {
        Self {
            id: album_id(name, album_artist, disc_id),
            name: name.to_string(),
            album_artist: album_artist.to_string(),
            disc_id: disc_id.to_string(),
            custom: Properties::new(),
        }
    }
}

impl Entity for Album {
    const KIND: EntityKind = EntityKind::Album;
    const ORPHAN_CLEANUP: bool = true;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn custom(&self) -> &Properties {
        &self.custom
    }

    fn custom_mut(&mut self) -> &mut Properties {
        &mut self.custom
    }

    fn value(&self, key: PropertyKey) -> Option<PropertyValue> {
        match key {
            PropertyKey::Id => text(&self.id),
            PropertyKey::Name => text(&self.name),
            PropertyKey::AlbumArtist => text(&self.album_artist),
            PropertyKey::DiscId => text(&self.disc_id),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub custom: Properties,
}

impl Author {
    pub fn new(name: &str) -> Self {
        Self {
            id: name_id(name),
            name: name.to_string(),
            custom: Properties::new(),
        }
    }
}

impl Entity for Author {
    const KIND: EntityKind = EntityKind::Author;
    const ORPHAN_CLEANUP: bool = true;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn custom(&self) -> &Properties {
        &self.custom
    }

    fn custom_mut(&mut self) -> &mut Properties {
        &mut self.custom
    }

    fn value(&self, key: PropertyKey) -> Option<PropertyValue> {
        match key {
            PropertyKey::Id => text(&self.id),
            PropertyKey::Name => text(&self.name),
            _ => None,
        }
    }
}

/// Styles are a curated list: they survive orphan cleanup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Style {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub custom: Properties,
}

impl Style {
    pub fn new(name: &str) -> Self {
        Self {
            id: name_id(name),
            name: name.to_string(),
            custom: Properties::new(),
        }
    }
}

impl Entity for Style {
    const KIND: EntityKind = EntityKind::Style;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn custom(&self) -> &Properties {
        &self.custom
    }

    fn custom_mut(&mut self) -> &mut Properties {
        &mut self.custom
    }

    fn value(&self, key: PropertyKey) -> Option<PropertyValue> {
        match key {
            PropertyKey::Id => text(&self.id),
            PropertyKey::Name => text(&self.name),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Year {
    pub id: String,
    pub name: String,
    pub value: i64,
    #[serde(default)]
    pub custom: Properties,
}

impl Year {
    pub fn new(value: i64) -> Self {
        let name = value.to_string();
        Self {
            id: name_id(&name),
            name,
            value,
            custom: Properties::new(),
        }
    }
}

impl Entity for Year {
    const KIND: EntityKind = EntityKind::Year;
    const ORPHAN_CLEANUP: bool = true;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn custom(&self) -> &Properties {
        &self.custom
    }

    fn custom_mut(&mut self) -> &mut Properties {
        &mut self.custom
    }

    fn value(&self, key: PropertyKey) -> Option<PropertyValue> {
        match key {
            PropertyKey::Id => text(&self.id),
            PropertyKey::Name => text(&self.name),
            _ => None,
        }
    }

    fn sort_key(&self) -> SortKey {
        SortKey::new("", self.value, &self.name, &self.id)
    }
}

/// Audio encoding of a track, keyed by file extension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackType {
    pub id: String,
    pub name: String,
    pub extension: String,
    #[serde(default)]
    pub custom: Properties,
}

impl TrackType {
    pub fn new(extension: &str) -> Self {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        Self {
            id: type_id(&extension),
            name: extension.to_ascii_uppercase(),
            extension,
            custom: Properties::new(),
        }
    }
}

impl Entity for TrackType {
    const KIND: EntityKind = EntityKind::Type;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn custom(&self) -> &Properties {
        &self.custom
    }

    fn custom_mut(&mut self) -> &mut Properties {
        &mut self.custom
    }

    fn value(&self, key: PropertyKey) -> Option<PropertyValue> {
        match key {
            PropertyKey::Id => text(&self.id),
            PropertyKey::Name => text(&self.name),
            PropertyKey::Extension => text(&self.extension),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub directory_id: String,
    pub dir_path: String,
    /// Entries as written in the playlist file, in playback order. They
    /// may point at files that are not mounted or not registered.
    pub entries: Vec<String>,
    #[serde(default)]
    pub custom: Properties,
}

impl Entity for Playlist {
    const KIND: EntityKind = EntityKind::Playlist;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn custom(&self) -> &Properties {
        &self.custom
    }

    fn custom_mut(&mut self) -> &mut Properties {
        &mut self.custom
    }

    fn value(&self, key: PropertyKey) -> Option<PropertyValue> {
        match key {
            PropertyKey::Id => text(&self.id),
            PropertyKey::Name => text(&self.name),
            PropertyKey::Directory => text(&self.directory_id),
            PropertyKey::Entries => Some(PropertyValue::Integer(self.entries.len() as i64)),
            _ => None,
        }
    }

    fn sort_key(&self) -> SortKey {
        SortKey::new(&self.dir_path, 0, &self.name, &self.id)
    }
}
