use std::fs;
use std::path::Path;

use common::{
    Album, Author, Device, Directory, Entity, EntityKind, File, Playlist, PropertyMeta, Style,
    Track, TrackType, Year,
};
use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, TableError, WriteTransaction};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::collection::{with_registry, Collection};
use crate::registry::Registry;
use crate::LibraryError;

pub const CATALOG_VERSION: u32 = 1;

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const DEVICES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("devices");
const DIRECTORIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("directories");
const FILES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("files");
const TRACKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tracks");
const ALBUMS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("albums");
const AUTHORS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("authors");
const STYLES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("styles");
const YEARS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("years");
const TYPES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("types");
const PLAYLISTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("playlists");

const META_VERSION_KEY: &str = "version";
const META_SCHEMAS_KEY: &str = "schemas";

/// Custom property declarations of one entity kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KindSchema {
    pub kind: EntityKind,
    pub custom: Vec<PropertyMeta>,
}

/// Persisted form of a whole collection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub version: u32,
    pub devices: Vec<Device>,
    pub directories: Vec<Directory>,
    pub files: Vec<File>,
    pub tracks: Vec<Track>,
    pub albums: Vec<Album>,
    pub authors: Vec<Author>,
    pub styles: Vec<Style>,
    pub years: Vec<Year>,
    pub types: Vec<TrackType>,
    pub playlists: Vec<Playlist>,
    pub schemas: Vec<KindSchema>,
}

impl CatalogDocument {
    pub fn to_json(&self) -> Result<String, LibraryError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, LibraryError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// redb-backed catalog storage: one table per entity kind, values in
/// bincode.
pub struct CatalogStore {
    db: Database,
}

impl CatalogStore {
    pub fn open(path: &Path) -> Result<Self, LibraryError> {
        Ok(Self {
            db: open_or_create_db(path)?,
        })
    }

    /// Replaces the stored catalog with `doc`.
    pub fn save(&self, doc: &CatalogDocument) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        clear_table(&write_txn, META_TABLE)?;
        write_entities(&write_txn, DEVICES_TABLE, &doc.devices)?;
        write_entities(&write_txn, DIRECTORIES_TABLE, &doc.directories)?;
        write_entities(&write_txn, FILES_TABLE, &doc.files)?;
        write_entities(&write_txn, TRACKS_TABLE, &doc.tracks)?;
        write_entities(&write_txn, ALBUMS_TABLE, &doc.albums)?;
        write_entities(&write_txn, AUTHORS_TABLE, &doc.authors)?;
        write_entities(&write_txn, STYLES_TABLE, &doc.styles)?;
        write_entities(&write_txn, YEARS_TABLE, &doc.years)?;
        write_entities(&write_txn, TYPES_TABLE, &doc.types)?;
        write_entities(&write_txn, PLAYLISTS_TABLE, &doc.playlists)?;
        {
            let mut meta = write_txn.open_table(META_TABLE)?;
            let version = encode_value(&CATALOG_VERSION)?;
            meta.insert(META_VERSION_KEY, version.as_slice())?;
            let schemas = encode_value(&doc.schemas)?;
            meta.insert(META_SCHEMAS_KEY, schemas.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Reads the stored catalog. `None` when nothing was saved yet.
    pub fn load(&self) -> Result<Option<CatalogDocument>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let meta = match read_txn.open_table(META_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let version: u32 = match meta.get(META_VERSION_KEY)? {
            Some(value) => decode_value(value.value())?,
            None => return Ok(None),
        };
        if version != CATALOG_VERSION {
            return Err(LibraryError::VersionMismatch(version));
        }
        let schemas = match meta.get(META_SCHEMAS_KEY)? {
            Some(value) => decode_value(value.value())?,
            None => Vec::new(),
        };
        Ok(Some(CatalogDocument {
            version,
            devices: read_entities(&read_txn, DEVICES_TABLE)?,
            directories: read_entities(&read_txn, DIRECTORIES_TABLE)?,
            files: read_entities(&read_txn, FILES_TABLE)?,
            tracks: read_entities(&read_txn, TRACKS_TABLE)?,
            albums: read_entities(&read_txn, ALBUMS_TABLE)?,
            authors: read_entities(&read_txn, AUTHORS_TABLE)?,
            styles: read_entities(&read_txn, STYLES_TABLE)?,
            years: read_entities(&read_txn, YEARS_TABLE)?,
            types: read_entities(&read_txn, TYPES_TABLE)?,
            playlists: read_entities(&read_txn, PLAYLISTS_TABLE)?,
            schemas,
        }))
    }
}

impl Collection {
    /// Copies every registry and its custom schema into a document.
    pub fn snapshot(&self) -> CatalogDocument {
        let _gate = self.gate.lock();
        let schemas = EntityKind::ALL
            .iter()
            .map(|kind| KindSchema {
                kind: *kind,
                custom: with_registry!(self, *kind, registry => registry
                    .schema()
                    .custom()
                    .cloned()
                    .collect()),
            })
            .filter(|schema| !schema.custom.is_empty())
            .collect();
        CatalogDocument {
            version: CATALOG_VERSION,
            devices: self.devices.all(),
            directories: self.directories.all(),
            files: self.files.all(),
            tracks: self.tracks.all(),
            albums: self.albums.all(),
            authors: self.authors.all(),
            styles: self.styles.all(),
            years: self.years.all(),
            types: self.types.all(),
            playlists: self.playlists.all(),
            schemas,
        }
    }

    /// Replaces the collection content with `doc`: entities are registered
    /// referenced-first, caches are rebuilt, and every registry switches
    /// to sorted mode once loading is done.
    pub fn load_document(&self, doc: CatalogDocument) -> Result<(), LibraryError> {
        if doc.version != CATALOG_VERSION {
            return Err(LibraryError::VersionMismatch(doc.version));
        }
        {
            let _gate = self.gate.lock();
            for kind in EntityKind::ALL {
                with_registry!(self, kind, registry => registry.clear());
            }
            self.seed_types();
            for schema in doc.schemas {
                with_registry!(self, schema.kind, registry => registry.restore_schema(schema.custom))?;
            }
            load_into(&self.devices, doc.devices);
            load_into(&self.directories, doc.directories);
            load_into(&self.types, doc.types);
            load_into(&self.styles, doc.styles);
            load_into(&self.authors, doc.authors);
            load_into(&self.years, doc.years);
            load_into(&self.albums, doc.albums);
            load_into(&self.tracks, doc.tracks);
            load_into(&self.files, doc.files);
            load_into(&self.playlists, doc.playlists);
            self.refs.rebuild(&self.tracks.all(), &self.files.all());
            self.pending_tags.lock().clear();
        }
        self.switch_to_order();
        info!(
            "Loaded catalog: {} tracks, {} files",
            self.tracks.len(),
            self.files.len()
        );
        Ok(())
    }

    /// Loads the stored catalog if there is one. Returns whether anything
    /// was loaded.
    pub fn load_from(&self, store: &CatalogStore) -> Result<bool, LibraryError> {
        match store.load()? {
            Some(doc) => {
                self.load_document(doc)?;
                Ok(true)
            }
            None => {
                warn!("Catalog missing; starting empty");
                self.switch_to_order();
                Ok(false)
            }
        }
    }

    pub fn commit(&self, store: &CatalogStore) -> Result<(), LibraryError> {
        let doc = self.snapshot();
        store.save(&doc)?;
        info!(
            "Committed catalog: {} tracks, {} files",
            doc.tracks.len(),
            doc.files.len()
        );
        Ok(())
    }
}

fn load_into<T: Entity>(registry: &Registry<T>, entities: Vec<T>) {
    for entity in entities {
        registry.register(entity);
    }
}

fn open_or_create_db(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn clear_table(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
) -> Result<(), LibraryError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn write_entities<T: Entity + Serialize>(
    txn: &WriteTransaction,
    definition: TableDefinition<&str, &[u8]>,
    entities: &[T],
) -> Result<(), LibraryError> {
    clear_table(txn, definition)?;
    let mut table = txn.open_table(definition)?;
    for entity in entities {
        let bytes = encode_value(entity)?;
        table.insert(entity.id(), bytes.as_slice())?;
    }
    Ok(())
}

fn read_entities<T: for<'de> Deserialize<'de>>(
    txn: &ReadTransaction,
    definition: TableDefinition<&str, &[u8]>,
) -> Result<Vec<T>, LibraryError> {
    let table = match txn.open_table(definition) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut out = Vec::new();
    for entry in table.iter()? {
        let entry = entry?;
        out.push(decode_value(entry.1.value())?);
    }
    Ok(out)
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::{CancelToken, NoopReporter};
    use crate::testing::{collection_with, put_file, tag, FakeTags};
    use common::{DeviceKind, PropertyKind, PropertyValue};
    use std::sync::Arc;

    fn scanned_collection(root: &Path) -> Collection {
        let tags = Arc::new(FakeTags::default());
        let first = put_file(root, "ArtistX/AlbumY/track1.mp3");
        let second = put_file(root, "ArtistX/AlbumY/track2.mp3");
        tags.set(&first, tag("Song", "AlbumY", "ArtistX", 2001, 1, 200));
        tags.set(&second, tag("Other", "AlbumY", "ArtistX", 2001, 2, 240));
        fs::write(root.join("ArtistX/AlbumY/list.m3u"), "track2.mp3\n").unwrap();
        let collection = collection_with(tags);
        let device = collection
            .register_device("music", root, DeviceKind::Directory)
            .unwrap();
        collection
            .refresh_device(&device.id, true, &NoopReporter, &CancelToken::new())
            .unwrap();
        collection
            .add_custom_property(
                EntityKind::Album,
                PropertyMeta::custom("label", PropertyKind::Text, None),
            )
            .unwrap();
        let album = collection.albums().all().remove(0);
        collection
            .set_custom_property(
                EntityKind::Album,
                &album.id,
                "label",
                PropertyValue::Text("Blue Note".into()),
            )
            .unwrap();
        collection
    }

    #[test]
    fn commit_and_load_round_trip_through_redb() {
        let music = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let source = scanned_collection(music.path());
        let store = CatalogStore::open(&data.path().join("db").join("catalog.redb")).unwrap();
        assert!(store.load().unwrap().is_none());
        source.commit(&store).unwrap();

        let target = collection_with(Arc::new(FakeTags::default()));
        assert!(target.load_from(&store).unwrap());
        assert_eq!(target.stats(), source.stats());
        assert!(target.tracks().is_ready());

        let album = target.albums().sorted().unwrap().remove(0);
        assert_eq!(album.human_value("label"), "Blue Note");
        assert!(target.schema(EntityKind::Album).get("label").is_some());
        assert_eq!(target.album_tracks(&album.id).len(), 2);
        assert_eq!(
            target.album_tracks(&album.id),
            target.derive_album_tracks(&album.id)
        );
        let playlist = target.playlists().all().remove(0);
        assert_eq!(target.playlist_files(&playlist.id).unwrap().len(), 1);
    }

    #[test]
    fn loaded_catalogs_keep_cascading() {
        let music = tempfile::tempdir().unwrap();
        let source = scanned_collection(music.path());
        let target = collection_with(Arc::new(FakeTags::default()));
        target.load_document(source.snapshot()).unwrap();

        let file = target.files().all().remove(0);
        let removal = target.remove_file(&file.id);
        assert_eq!(removal.tracks, 1);
        assert_eq!(target.tracks().len(), 1);
    }

    #[test]
    fn json_export_matches_the_snapshot() {
        let music = tempfile::tempdir().unwrap();
        let source = scanned_collection(music.path());
        let doc = source.snapshot();
        let json = doc.to_json().unwrap();
        assert!(json.contains("\"AlbumY\""));
        assert_eq!(CatalogDocument::from_json(&json).unwrap(), doc);
    }

    #[test]
    fn other_versions_are_rejected() {
        let target = collection_with(Arc::new(FakeTags::default()));
        let doc = CatalogDocument {
            version: CATALOG_VERSION + 1,
            ..CatalogDocument::default()
        };
        assert!(matches!(
            target.load_document(doc),
            Err(LibraryError::VersionMismatch(_))
        ));
    }
}
