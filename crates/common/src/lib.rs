mod entity;
mod property;

use std::path::{Path, PathBuf};

pub use entity::{
    Album, Author, Device, DeviceKind, Directory, Entity, EntityKind, File, Playlist, SortKey,
    Style, Track, TrackDraft, TrackType, Year,
};
pub use property::{
    Properties, PropertyKey, PropertyKind, PropertyMeta, PropertySchema, PropertyValue,
    SchemaError,
};

pub const KEY_SEP: char = '\x1f';

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

/// Hashes the parts of a composite key. Parts are joined with a unit
/// separator so `("ab", "c")` and `("a", "bc")` never collide.
pub fn composite_id(parts: &[&str]) -> String {
    let mut key = String::new();
    for (idx, part) in parts.iter().enumerate() {
        if idx > 0 {
            key.push(KEY_SEP);
        }
        key.push_str(part);
    }
    stable_id(&key)
}

/// Case folding applied to path components at ID-generation time only.
pub fn path_key(value: &str, case_insensitive: bool) -> String {
    if case_insensitive {
        value.to_lowercase()
    } else {
        value.to_string()
    }
}

pub fn device_id(name: &str) -> String {
    composite_id(&["device", name])
}

pub fn directory_id(
    device_name: &str,
    parent_relpath: Option<&str>,
    name: &str,
    case_insensitive: bool,
) -> String {
    let parent = path_key(parent_relpath.unwrap_or(""), case_insensitive);
    let name = path_key(name, case_insensitive);
    composite_id(&[device_name, &parent, &name])
}

pub fn file_id(device_name: &str, dir_relpath: &str, file_name: &str, case_insensitive: bool) -> String {
    let dir = path_key(dir_relpath, case_insensitive);
    let name = path_key(file_name, case_insensitive);
    composite_id(&[device_name, &dir, &name])
}

pub fn playlist_id(
    device_name: &str,
    dir_relpath: &str,
    name: &str,
    case_insensitive: bool,
) -> String {
    let dir = path_key(dir_relpath, case_insensitive);
    let name = path_key(name, case_insensitive);
    composite_id(&["playlist", device_name, &dir, &name])
}

pub fn album_id(name: &str, album_artist: &str, disc_id: &str) -> String {
    composite_id(&[name, album_artist, disc_id])
}

pub fn name_id(name: &str) -> String {
    stable_id(name)
}

pub fn type_id(extension: &str) -> String {
    composite_id(&["type", &extension.to_ascii_lowercase()])
}

/// Fields that make up a Track's identity. Changing any of them yields
/// a different Track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackKey<'a> {
    pub style_id: &'a str,
    pub author_id: &'a str,
    pub album_id: &'a str,
    pub name: &'a str,
    pub year: i64,
    pub duration_secs: u64,
    pub order: u32,
    pub type_id: &'a str,
    pub disc_number: u32,
}

impl TrackKey<'_> {
    pub fn id(&self) -> String {
        let year = self.year.to_string();
        let duration = self.duration_secs.to_string();
        let order = self.order.to_string();
        let disc = self.disc_number.to_string();
        composite_id(&[
            self.style_id,
            self.author_id,
            self.album_id,
            self.name,
            &year,
            &duration,
            &order,
            self.type_id,
            &disc,
        ])
    }
}

pub fn join_relpath(root: &Path, relpath: &str) -> PathBuf {
    let mut out = PathBuf::from(root);
    for part in relpath.split('/') {
        if part.is_empty() {
            continue;
        }
        out.push(part);
    }
    out
}

/// Appends `name` to a slash separated relative path. The root
/// directory has an empty relative path.
pub fn child_relpath(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_id_is_deterministic() {
        let first = stable_id("Artist/Album/Track.mp3");
        let second = stable_id("Artist/Album/Track.mp3");
        assert_eq!(first, second);
        assert_ne!(first, stable_id("Artist/Album/Track2.mp3"));
    }

    #[test]
    fn composite_parts_do_not_run_together() {
        assert_ne!(composite_id(&["ab", "c"]), composite_id(&["a", "bc"]));
    }

    #[test]
    fn directory_ids_fold_case_only_when_asked() {
        let upper = directory_id("disk", Some("Music"), "A", true);
        let lower = directory_id("disk", Some("music"), "a", true);
        assert_eq!(upper, lower);

        let upper = directory_id("disk", Some("Music"), "A", false);
        let lower = directory_id("disk", Some("Music"), "a", false);
        assert_ne!(upper, lower);
    }

    #[test]
    fn file_ids_depend_on_directory() {
        let one = file_id("disk", "a", "track.mp3", false);
        let two = file_id("disk", "b", "track.mp3", false);
        assert_ne!(one, two);
        assert_eq!(one, file_id("disk", "a", "track.mp3", false));
    }

    #[test]
    fn track_identity_covers_every_key_field() {
        let base = TrackKey {
            style_id: "s",
            author_id: "a",
            album_id: "al",
            name: "Song",
            year: 2001,
            duration_secs: 180,
            order: 1,
            type_id: "mp3",
            disc_number: 1,
        };
        let id = base.id();
        assert_eq!(id, base.clone().id());

        let mut other = base.clone();
        other.disc_number = 2;
        assert_ne!(id, other.id());

        let mut other = base.clone();
        other.type_id = "flac";
        assert_ne!(id, other.id());
    }

    #[test]
    fn relpaths_use_forward_slashes() {
        let root = Path::new("/music");
        let path = root.join("ArtistX").join("AlbumY");
        assert_eq!(join_relpath(root, "ArtistX/AlbumY"), path);
        assert_eq!(child_relpath("", "ArtistX"), "ArtistX");
        assert_eq!(child_relpath("ArtistX", "AlbumY"), "ArtistX/AlbumY");
    }
}
