use std::fmt;

use common::{EntityKind, SchemaError};
use metadata::MetadataError;
use redb::{CommitError, DatabaseError, StorageError, TableError, TransactionError};

use crate::edit::TagWriteReport;

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Metadata(MetadataError),
    Schema(SchemaError),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    Json(serde_json::Error),
    Yaml(serde_yaml::Error),
    NotFound { kind: EntityKind, id: String },
    /// An order-dependent read was issued before the registry switched
    /// to sorted mode.
    NotReady(EntityKind),
    /// None of the files of the edited track is currently accessible.
    NoAccessibleFiles { track_id: String },
    InvalidValue { field: &'static str, value: String },
    /// Every tag write of an edit failed; the catalog is unchanged.
    TagWrite(TagWriteReport),
    VersionMismatch(u32),
}

impl fmt::Display for LibraryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Metadata(err) => write!(f, "metadata error: {}", err),
            LibraryError::Schema(err) => write!(f, "schema error: {}", err),
            LibraryError::Redb(err) => write!(f, "db error: {}", err),
            LibraryError::Bincode(err) => write!(f, "bincode error: {}", err),
            LibraryError::Json(err) => write!(f, "json error: {}", err),
            LibraryError::Yaml(err) => write!(f, "yaml error: {}", err),
            LibraryError::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
            LibraryError::NotReady(kind) => write!(f, "{} registry is still loading", kind),
            LibraryError::NoAccessibleFiles { track_id } => {
                write!(f, "no accessible files for track {}", track_id)
            }
            LibraryError::InvalidValue { field, value } => {
                write!(f, "invalid value for {}: {}", field, value)
            }
            LibraryError::TagWrite(report) => write!(
                f,
                "tag write failed for {} file(s)",
                report.failed.len()
            ),
            LibraryError::VersionMismatch(version) => {
                write!(f, "catalog version mismatch: {}", version)
            }
        }
    }
}

impl std::error::Error for LibraryError {}

impl LibraryError {
    pub fn not_found(kind: EntityKind, id: &str) -> Self {
        LibraryError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<MetadataError> for LibraryError {
    fn from(err: MetadataError) -> Self {
        LibraryError::Metadata(err)
    }
}

impl From<SchemaError> for LibraryError {
    fn from(err: SchemaError) -> Self {
        LibraryError::Schema(err)
    }
}

impl From<redb::Error> for LibraryError {
    fn from(err: redb::Error) -> Self {
        LibraryError::Redb(err)
    }
}

impl From<DatabaseError> for LibraryError {
    fn from(err: DatabaseError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TableError> for LibraryError {
    fn from(err: TableError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TransactionError> for LibraryError {
    fn from(err: TransactionError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<StorageError> for LibraryError {
    fn from(err: StorageError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<CommitError> for LibraryError {
    fn from(err: CommitError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for LibraryError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        LibraryError::Bincode(err)
    }
}

impl From<serde_json::Error> for LibraryError {
    fn from(err: serde_json::Error) -> Self {
        LibraryError::Json(err)
    }
}

impl From<serde_yaml::Error> for LibraryError {
    fn from(err: serde_yaml::Error) -> Self {
        LibraryError::Yaml(err)
    }
}
