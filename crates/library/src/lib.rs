//! Music catalog core: typed registries of devices, directories, files,
//! tracks and their descriptive entities, kept consistent by a cascade
//! engine and fed by a filesystem scanner.

mod collection;
mod config;
mod edit;
mod error;
mod references;
mod registry;
mod reporter;
mod scanner;
mod store;
#[cfg(test)]
mod testing;

pub use collection::{Collection, CollectionStats};
pub use config::{
    config_path_from_env, load_or_create_config, resolve_path, save_config, CollectionConfig,
    CONFIG_VERSION, DEFAULT_MUSIC_EXTENSIONS, DEFAULT_PLAYLIST_EXTENSIONS,
};
pub use edit::{EditOutcome, TagWriteReport, TrackEdit, MAX_RATE, MAX_YEAR};
pub use error::LibraryError;
pub use references::Removal;
pub use registry::Registry;
pub use reporter::{
    CancelToken, LogReporter, NoopReporter, RefreshOutcome, Reporter, ScanStats,
};
pub use scanner::{disc_id_for, read_playlist, UNKNOWN_ALBUM, UNKNOWN_AUTHOR, UNKNOWN_STYLE};
pub use store::{CatalogDocument, CatalogStore, KindSchema, CATALOG_VERSION};
