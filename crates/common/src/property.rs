use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;

/// User-defined property values of one entity, keyed by property name.
pub type Properties = BTreeMap<String, PropertyValue>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    Text,
    Integer,
    Boolean,
    Timestamp,
}

impl PropertyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyKind::Text => "text",
            PropertyKind::Integer => "integer",
            PropertyKind::Boolean => "boolean",
            PropertyKind::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyValue {
    Text(String),
    Integer(i64),
    Boolean(bool),
    /// Seconds since the unix epoch.
    Timestamp(u64),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Text(_) => PropertyKind::Text,
            PropertyValue::Integer(_) => PropertyKind::Integer,
            PropertyValue::Boolean(_) => PropertyKind::Boolean,
            PropertyValue::Timestamp(_) => PropertyKind::Timestamp,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn human(&self) -> String {
        match self {
            PropertyValue::Text(value) => value.clone(),
            PropertyValue::Integer(value) => value.to_string(),
            PropertyValue::Boolean(value) => value.to_string(),
            PropertyValue::Timestamp(value) => value.to_string(),
        }
    }
}

/// Built-in property keys shared by the entity types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    Id,
    Name,
    Url,
    DeviceKind,
    Mounted,
    Device,
    Parent,
    Directory,
    Track,
    Size,
    Quality,
    Modified,
    Album,
    Author,
    Style,
    Year,
    Type,
    Duration,
    Order,
    DiscNumber,
    Rate,
    Hits,
    Comment,
    AlbumArtist,
    DiscoveryDate,
    DiscId,
    Extension,
    Entries,
}

impl PropertyKey {
    pub const ALL: [PropertyKey; 28] = [
        PropertyKey::Id,
        PropertyKey::Name,
        PropertyKey::Url,
        PropertyKey::DeviceKind,
        PropertyKey::Mounted,
        PropertyKey::Device,
        PropertyKey::Parent,
        PropertyKey::Directory,
        PropertyKey::Track,
        PropertyKey::Size,
        PropertyKey::Quality,
        PropertyKey::Modified,
        PropertyKey::Album,
        PropertyKey::Author,
        PropertyKey::Style,
        PropertyKey::Year,
        PropertyKey::Type,
        PropertyKey::Duration,
        PropertyKey::Order,
        PropertyKey::DiscNumber,
        PropertyKey::Rate,
        PropertyKey::Hits,
        PropertyKey::Comment,
        PropertyKey::AlbumArtist,
        PropertyKey::DiscoveryDate,
        PropertyKey::DiscId,
        PropertyKey::Extension,
        PropertyKey::Entries,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyKey::Id => "id",
            PropertyKey::Name => "name",
            PropertyKey::Url => "url",
            PropertyKey::DeviceKind => "device_kind",
            PropertyKey::Mounted => "mounted",
            PropertyKey::Device => "device",
            PropertyKey::Parent => "parent",
            PropertyKey::Directory => "directory",
            PropertyKey::Track => "track",
            PropertyKey::Size => "size",
            PropertyKey::Quality => "quality",
            PropertyKey::Modified => "modified",
            PropertyKey::Album => "album",
            PropertyKey::Author => "author",
            PropertyKey::Style => "style",
            PropertyKey::Year => "year",
            PropertyKey::Type => "type",
            PropertyKey::Duration => "duration",
            PropertyKey::Order => "order",
            PropertyKey::DiscNumber => "disc_number",
            PropertyKey::Rate => "rate",
            PropertyKey::Hits => "hits",
            PropertyKey::Comment => "comment",
            PropertyKey::AlbumArtist => "album_artist",
            PropertyKey::DiscoveryDate => "discovery_date",
            PropertyKey::DiscId => "disc_id",
            PropertyKey::Extension => "extension",
            PropertyKey::Entries => "entries",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        PropertyKey::ALL.iter().copied().find(|key| key.as_str() == name)
    }
}

/// Describes one property of an entity type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyMeta {
    pub name: String,
    pub kind: PropertyKind,
    pub custom: bool,
    pub editable: bool,
    pub visible: bool,
    pub default: Option<PropertyValue>,
}

impl PropertyMeta {
    fn builtin(key: PropertyKey, kind: PropertyKind, editable: bool, visible: bool) -> Self {
        Self {
            name: key.as_str().to_string(),
            kind,
            custom: false,
            editable,
            visible,
            default: None,
        }
    }

    pub fn custom(name: &str, kind: PropertyKind, default: Option<PropertyValue>) -> Self {
        Self {
            name: name.trim().to_string(),
            kind,
            custom: true,
            editable: true,
            visible: true,
            default,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    Reserved(String),
    Duplicate(String),
    Unknown(String),
    NotCustom(String),
    EmptyName,
    TypeMismatch {
        name: String,
        expected: PropertyKind,
        found: PropertyKind,
    },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::Reserved(name) => write!(f, "property name is reserved: {}", name),
            SchemaError::Duplicate(name) => write!(f, "property already exists: {}", name),
            SchemaError::Unknown(name) => write!(f, "unknown property: {}", name),
            SchemaError::NotCustom(name) => write!(f, "property is not custom: {}", name),
            SchemaError::EmptyName => write!(f, "property name is empty"),
            SchemaError::TypeMismatch {
                name,
                expected,
                found,
            } => write!(
                f,
                "property {} expects {} values, got {}",
                name, expected, found
            ),
        }
    }
}

impl std::error::Error for SchemaError {}

/// Property metadata for one entity type: the built-in keys followed by
/// the user-defined ones in creation order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertySchema {
    entries: Vec<PropertyMeta>,
}

impl PropertySchema {
    pub fn builtin(kind: EntityKind) -> Self {
        use PropertyKey as K;
        use PropertyKind::{Boolean, Integer, Text, Timestamp};

        let mut entries = vec![
            PropertyMeta::builtin(K::Id, Text, false, false),
            PropertyMeta::builtin(K::Name, Text, true, true),
        ];
        let rest: &[(PropertyKey, PropertyKind, bool, bool)] = match kind {
            EntityKind::Device => &[
                (K::Url, Text, true, true),
                (K::DeviceKind, Text, false, true),
                (K::Mounted, Boolean, false, true),
            ],
            EntityKind::Directory => &[
                (K::Device, Text, false, true),
                (K::Parent, Text, false, true),
                (K::DiscId, Text, false, false),
            ],
            EntityKind::File => &[
                (K::Directory, Text, false, true),
                (K::Track, Text, false, true),
                (K::Size, Integer, false, true),
                (K::Quality, Integer, false, true),
                (K::Modified, Timestamp, false, true),
            ],
            EntityKind::Track => &[
                (K::Album, Text, true, true),
                (K::Author, Text, true, true),
                (K::Style, Text, true, true),
                (K::Year, Text, true, true),
                (K::Type, Text, false, true),
                (K::Duration, Integer, false, true),
                (K::Order, Integer, true, true),
                (K::DiscNumber, Integer, true, true),
                (K::Rate, Integer, true, true),
                (K::Hits, Integer, false, true),
                (K::Comment, Text, true, true),
                (K::AlbumArtist, Text, true, true),
                (K::DiscoveryDate, Timestamp, false, true),
            ],
            EntityKind::Album => &[
                (K::AlbumArtist, Text, false, true),
                (K::DiscId, Text, false, false),
            ],
            EntityKind::Author | EntityKind::Style | EntityKind::Year => &[],
            EntityKind::Type => &[(K::Extension, Text, false, true)],
            EntityKind::Playlist => &[
                (K::Directory, Text, false, true),
                (K::Entries, Integer, false, true),
            ],
        };
        for (key, kind, editable, visible) in rest {
            entries.push(PropertyMeta::builtin(*key, *kind, *editable, *visible));
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[PropertyMeta] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&PropertyMeta> {
        self.entries.iter().find(|meta| meta.name == name)
    }

    pub fn custom(&self) -> impl Iterator<Item = &PropertyMeta> {
        self.entries.iter().filter(|meta| meta.custom)
    }

    pub fn insert_custom(&mut self, meta: PropertyMeta) -> Result<(), SchemaError> {
        if meta.name.is_empty() {
            return Err(SchemaError::EmptyName);
        }
        if PropertyKey::parse(&meta.name).is_some() {
            return Err(SchemaError::Reserved(meta.name));
        }
        if self.get(&meta.name).is_some() {
            return Err(SchemaError::Duplicate(meta.name));
        }
        if let Some(default) = &meta.default {
            if default.kind() != meta.kind {
                return Err(SchemaError::TypeMismatch {
                    name: meta.name,
                    expected: meta.kind,
                    found: default.kind(),
                });
            }
        }
        self.entries.push(PropertyMeta {
            custom: true,
            ..meta
        });
        Ok(())
    }

    pub fn remove_custom(&mut self, name: &str) -> Result<PropertyMeta, SchemaError> {
        let idx = self
            .entries
            .iter()
            .position(|meta| meta.name == name)
            .ok_or_else(|| SchemaError::Unknown(name.to_string()))?;
        if !self.entries[idx].custom {
            return Err(SchemaError::NotCustom(name.to_string()));
        }
        Ok(self.entries.remove(idx))
    }

    /// Checks that `value` may be stored under the custom property `name`.
    pub fn check_custom(&self, name: &str, value: &PropertyValue) -> Result<(), SchemaError> {
        let meta = self
            .get(name)
            .ok_or_else(|| SchemaError::Unknown(name.to_string()))?;
        if !meta.custom {
            return Err(SchemaError::NotCustom(name.to_string()));
        }
        if meta.kind != value.kind() {
            return Err(SchemaError::TypeMismatch {
                name: name.to_string(),
                expected: meta.kind,
                found: value.kind(),
            });
        }
        Ok(())
    }
}
