use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{
    directory_id, join_relpath, Album, Author, Device, DeviceKind, Directory, Entity, EntityKind,
    File, Playlist, PropertyKey, PropertyMeta, PropertySchema, PropertyValue, Style, Track,
    TrackType, Year,
};
use metadata::{TagService, TagUpdate};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::CollectionConfig;
use crate::references::References;
use crate::registry::Registry;
use crate::LibraryError;

/// Runs `$body` with `$registry` bound to the registry of `$kind`.
macro_rules! with_registry {
    ($collection:expr, $kind:expr, $registry:ident => $body:expr) => {
        match $kind {
            EntityKind::Device => {
                let $registry = &$collection.devices;
                $body
            }
            EntityKind::Directory => {
                let $registry = &$collection.directories;
                $body
            }
            EntityKind::File => {
                let $registry = &$collection.files;
                $body
            }
            EntityKind::Track => {
                let $registry = &$collection.tracks;
                $body
            }
            EntityKind::Album => {
                let $registry = &$collection.albums;
                $body
            }
            EntityKind::Author => {
                let $registry = &$collection.authors;
                $body
            }
            EntityKind::Style => {
                let $registry = &$collection.styles;
                $body
            }
            EntityKind::Year => {
                let $registry = &$collection.years;
                $body
            }
            EntityKind::Type => {
                let $registry = &$collection.types;
                $body
            }
            EntityKind::Playlist => {
                let $registry = &$collection.playlists;
                $body
            }
        }
    };
}

pub(crate) use with_registry;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub devices: usize,
    pub directories: usize,
    pub files: usize,
    pub tracks: usize,
    pub albums: usize,
    pub authors: usize,
    pub styles: usize,
    pub years: usize,
    pub types: usize,
    pub playlists: usize,
}

/// The catalog: one registry per entity type plus the reference caches
/// that tie them together.
///
/// Reads go straight to the registries. Every operation that touches
/// more than one registry runs under `gate`, which is always taken
/// before any registry or cache lock.
pub struct Collection {
    pub(crate) config: CollectionConfig,
    pub(crate) tags: Arc<dyn TagService>,
    pub(crate) case_insensitive: bool,
    pub(crate) devices: Registry<Device>,
    pub(crate) directories: Registry<Directory>,
    pub(crate) files: Registry<File>,
    pub(crate) tracks: Registry<Track>,
    pub(crate) albums: Registry<Album>,
    pub(crate) authors: Registry<Author>,
    pub(crate) styles: Registry<Style>,
    pub(crate) years: Registry<Year>,
    pub(crate) types: Registry<TrackType>,
    pub(crate) playlists: Registry<Playlist>,
    pub(crate) refs: References,
    pub(crate) gate: Mutex<()>,
    pub(crate) pending_tags: Mutex<BTreeMap<PathBuf, TagUpdate>>,
}

impl Collection {
    pub fn new(config: CollectionConfig, tags: Arc<dyn TagService>) -> Self {
        let collection = Self {
            case_insensitive: config.case_insensitive(),
            config,
            tags,
            devices: Registry::new(),
            directories: Registry::new(),
            files: Registry::new(),
            tracks: Registry::new(),
            albums: Registry::new(),
            authors: Registry::new(),
            styles: Registry::new(),
            years: Registry::new(),
            types: Registry::new(),
            playlists: Registry::new(),
            refs: References::default(),
            gate: Mutex::new(()),
            pending_tags: Mutex::new(BTreeMap::new()),
        };
        collection.seed_types();
        collection
    }

    pub(crate) fn seed_types(&self) {
        for ext in &self.config.music_extensions {
            self.types.register(TrackType::new(ext));
        }
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn devices(&self) -> &Registry<Device> {
        &self.devices
    }

    pub fn directories(&self) -> &Registry<Directory> {
        &self.directories
    }

    pub fn files(&self) -> &Registry<File> {
        &self.files
    }

    pub fn tracks(&self) -> &Registry<Track> {
        &self.tracks
    }

    pub fn albums(&self) -> &Registry<Album> {
        &self.albums
    }

    pub fn authors(&self) -> &Registry<Author> {
        &self.authors
    }

    pub fn styles(&self) -> &Registry<Style> {
        &self.styles
    }

    pub fn years(&self) -> &Registry<Year> {
        &self.years
    }

    pub fn types(&self) -> &Registry<TrackType> {
        &self.types
    }

    pub fn playlists(&self) -> &Registry<Playlist> {
        &self.playlists
    }

    /// Switches every registry to sorted mode, in dependency order.
    pub fn switch_to_order(&self) {
        let _gate = self.gate.lock();
        self.devices.switch_to_order();
        self.directories.switch_to_order();
        self.types.switch_to_order();
        self.styles.switch_to_order();
        self.authors.switch_to_order();
        self.years.switch_to_order();
        self.albums.switch_to_order();
        self.tracks.switch_to_order();
        self.files.switch_to_order();
        self.playlists.switch_to_order();
    }

    pub fn stats(&self) -> CollectionStats {
        CollectionStats {
            devices: self.devices.len(),
            directories: self.directories.len(),
            files: self.files.len(),
            tracks: self.tracks.len(),
            albums: self.albums.len(),
            authors: self.authors.len(),
            styles: self.styles.len(),
            years: self.years.len(),
            types: self.types.len(),
            playlists: self.playlists.len(),
        }
    }

    /// Registers a device and its root directory. Registering a known
    /// name returns the existing device.
    pub fn register_device(
        &self,
        name: &str,
        url: &Path,
        kind: DeviceKind,
    ) -> Result<Device, LibraryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LibraryError::InvalidValue {
                field: "device name",
                value: name.to_string(),
            });
        }
        let mounted = url.is_dir();
        let _gate = self.gate.lock();
        let mut device = Device::new(name, url.to_path_buf(), kind);
        device.mounted = mounted;
        let (device, created) = self.devices.register(device);
        self.directories.register(Directory {
            id: directory_id(&device.name, None, "", self.case_insensitive),
            name: String::new(),
            device_id: device.id.clone(),
            parent_id: None,
            relative_path: String::new(),
            disc_id: None,
            custom: Default::default(),
        });
        if created {
            info!("Registered device {} at {:?}", device.name, device.url);
        }
        Ok(device)
    }

    pub fn root_directory(&self, device_id: &str) -> Option<Directory> {
        let device = self.devices.get(device_id)?;
        self.directories
            .get(&directory_id(&device.name, None, "", self.case_insensitive))
    }

    /// Marks the device mounted when its root is reachable. Returns the
    /// resulting mount state.
    pub fn mount_device(&self, device_id: &str) -> Result<bool, LibraryError> {
        let device = self
            .devices
            .get(device_id)
            .ok_or_else(|| LibraryError::not_found(EntityKind::Device, device_id))?;
        let reachable = device.url.is_dir();
        self.set_mounted(device_id, reachable);
        Ok(reachable)
    }

    pub fn unmount_device(&self, device_id: &str) -> Result<(), LibraryError> {
        if !self.devices.contains(device_id) {
            return Err(LibraryError::not_found(EntityKind::Device, device_id));
        }
        self.set_mounted(device_id, false);
        Ok(())
    }

    /// Re-evaluates the mount state of every device. Returns how many are
    /// mounted.
    pub fn refresh_mount_states(&self) -> usize {
        let mut mounted = 0;
        for device in self.devices.all() {
            let reachable = device.url.is_dir();
            if reachable != device.mounted {
                self.set_mounted(&device.id, reachable);
            }
            if reachable {
                mounted += 1;
            }
        }
        mounted
    }

    pub(crate) fn set_mounted(&self, device_id: &str, mounted: bool) {
        let _gate = self.gate.lock();
        if let Some(device) = self
            .devices
            .update(device_id, |device| device.mounted = mounted)
        {
            debug!("Device {} mounted: {}", device.name, mounted);
        }
    }

    pub fn is_mounted(&self, device_id: &str) -> bool {
        self.devices
            .get(device_id)
            .map(|device| device.mounted)
            .unwrap_or(false)
    }

    pub fn directory_path(&self, directory: &Directory) -> Option<PathBuf> {
        let device = self.devices.get(&directory.device_id)?;
        Some(join_relpath(&device.url, &directory.relative_path))
    }

    pub fn file_path(&self, file: &File) -> Option<PathBuf> {
        let directory = self.directories.get(&file.directory_id)?;
        Some(self.directory_path(&directory)?.join(&file.name))
    }

    /// Whether a file lives on a mounted device.
    pub fn is_file_accessible(&self, file: &File) -> bool {
        self.directories
            .get(&file.directory_id)
            .map(|dir| self.is_mounted(&dir.device_id))
            .unwrap_or(false)
    }

    /// Files shown to the user: all of them, or only the accessible ones
    /// when `hide_unmounted` is set.
    pub fn visible_files(&self) -> Vec<File> {
        if !self.config.hide_unmounted {
            return self.files.all();
        }
        let mounted = self.mounted_directories();
        self.files
            .filtered(|file| mounted.get(&file.directory_id).copied().unwrap_or(false))
    }

    /// Tracks shown to the user. With `hide_unmounted`, a track is shown
    /// when at least one of its files is accessible.
    pub fn visible_tracks(&self) -> Vec<Track> {
        if !self.config.hide_unmounted {
            return self.tracks.all();
        }
        let mounted = self.mounted_directories();
        self.tracks
            .all()
            .into_iter()
            .filter(|track| {
                self.refs
                    .track_file_ids(&track.id)
                    .iter()
                    .filter_map(|id| self.files.get(id))
                    .any(|file| mounted.get(&file.directory_id).copied().unwrap_or(false))
            })
            .collect()
    }

    fn mounted_directories(&self) -> HashMap<String, bool> {
        let devices: HashMap<String, bool> = self
            .devices
            .all()
            .into_iter()
            .map(|device| (device.id, device.mounted))
            .collect();
        self.directories
            .all()
            .into_iter()
            .map(|dir| {
                let mounted = devices.get(&dir.device_id).copied().unwrap_or(false);
                (dir.id, mounted)
            })
            .collect()
    }

    /// Resolves the files listed by a playlist, in playlist order. Entries
    /// that match no registered file are skipped.
    pub fn playlist_files(&self, playlist_id: &str) -> Result<Vec<File>, LibraryError> {
        let playlist = self
            .playlists
            .get(playlist_id)
            .ok_or_else(|| LibraryError::not_found(EntityKind::Playlist, playlist_id))?;
        let base = self
            .directories
            .get(&playlist.directory_id)
            .and_then(|dir| self.directory_path(&dir))
            .ok_or_else(|| LibraryError::not_found(EntityKind::Directory, &playlist.directory_id))?;

        let by_path: HashMap<PathBuf, File> = self
            .files
            .all()
            .into_iter()
            .filter_map(|file| Some((normalize_path(&self.file_path(&file)?), file)))
            .collect();

        let mut out = Vec::new();
        for entry in &playlist.entries {
            let entry = entry.replace('\\', "/");
            let raw = Path::new(&entry);
            let path = if raw.is_absolute() {
                raw.to_path_buf()
            } else {
                base.join(raw)
            };
            if let Some(file) = by_path.get(&normalize_path(&path)) {
                out.push(file.clone());
            }
        }
        Ok(out)
    }

    pub fn schema(&self, kind: EntityKind) -> PropertySchema {
        with_registry!(self, kind, registry => registry.schema())
    }

    pub fn add_custom_property(
        &self,
        kind: EntityKind,
        meta: PropertyMeta,
    ) -> Result<(), LibraryError> {
        let _gate = self.gate.lock();
        with_registry!(self, kind, registry => registry.add_custom_property(meta))
    }

    pub fn remove_custom_property(&self, kind: EntityKind, name: &str) -> Result<(), LibraryError> {
        let _gate = self.gate.lock();
        with_registry!(self, kind, registry => registry.remove_custom_property(name))
    }

    pub fn set_custom_property(
        &self,
        kind: EntityKind,
        id: &str,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), LibraryError> {
        with_registry!(self, kind, registry => registry
            .set_custom_property(id, name, value)
            .map(|_| ()))
    }

    /// Display value of a property. Reference-valued keys resolve to the
    /// name of the referenced entity.
    pub fn human_value(&self, kind: EntityKind, id: &str, key: &str) -> Result<String, LibraryError> {
        let value = with_registry!(self, kind, registry => registry
            .get(id)
            .map(|entity| entity.property(key)))
        .ok_or_else(|| LibraryError::not_found(kind, id))?;
        let value = match value {
            Some(value) => value,
            None => return Ok(String::new()),
        };
        let target = match PropertyKey::parse(key).and_then(reference_kind) {
            Some(target) => target,
            None => return Ok(value.human()),
        };
        let id = value.as_text().unwrap_or_default();
        let name = with_registry!(self, target, registry => registry
            .get(id)
            .map(|entity| entity.name().to_string()));
        Ok(name.unwrap_or_default())
    }
}

fn reference_kind(key: PropertyKey) -> Option<EntityKind> {
    match key {
        PropertyKey::Device => Some(EntityKind::Device),
        PropertyKey::Parent | PropertyKey::Directory => Some(EntityKind::Directory),
        PropertyKey::Track => Some(EntityKind::Track),
        PropertyKey::Album => Some(EntityKind::Album),
        PropertyKey::Author => Some(EntityKind::Author),
        PropertyKey::Style => Some(EntityKind::Style),
        PropertyKey::Year => Some(EntityKind::Year),
        PropertyKey::Type => Some(EntityKind::Type),
        _ => None,
    }
}

fn normalize_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
