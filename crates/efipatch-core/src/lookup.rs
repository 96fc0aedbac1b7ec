//! Model-name lookup by hardware code.
//!
//! Hardware codes (the last four serial characters) map to a marketing model
//! name. Known mappings live in a local JSON database kept sorted by code.
//! Codes missing from it can be resolved through an [`IdentifierService`];
//! any mapping discovered that way is appended and the database is saved.

use crate::error::{Error, Result};
use crate::writer::write_atomic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One database row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Hardware code
    pub last4: String,
    /// Model name
    pub name: String,
    /// Model identifier, if known
    #[serde(default)]
    pub id: Option<String>,
    /// Model number, if known
    #[serde(default)]
    pub modelnum: Option<String>,
}

impl ModelEntry {
    /// Creates an entry with only a code and a name
    pub fn new(last4: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            last4: last4.into(),
            name: name.into(),
            id: None,
            modelnum: None,
        }
    }
}

/// Local code-to-model database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelDatabase {
    entries: Vec<ModelEntry>,
}

impl ModelDatabase {
    /// Creates an empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a database from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let entries = serde_json::from_str(json)?;
        Ok(Self { entries })
    }

    /// Loads a database from disk. A missing file yields an empty database.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No model database at {}, starting empty", path.display());
                Ok(Self::new())
            }
            Err(e) => Err(Error::file_read(path, e)),
        }
    }

    /// Serializes the database with 3-space indentation
    pub fn to_json(&self) -> Result<String> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"   ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.entries.serialize(&mut serializer)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Writes the database to disk
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_atomic(path.as_ref(), self.to_json()?.as_bytes())
    }

    /// Finds the entry for a hardware code
    pub fn find(&self, code: &str) -> Option<&ModelEntry> {
        self.entries.iter().find(|e| e.last4 == code)
    }

    /// Inserts an entry, keeping the database sorted by code.
    ///
    /// Entries with an equal code keep their relative order; the new one goes last.
    pub fn insert(&mut self, entry: ModelEntry) {
        let index = self.entries.partition_point(|e| e.last4 <= entry.last4);
        self.entries.insert(index, entry);
    }

    /// All entries
    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A remote source of model names
pub trait IdentifierService {
    /// Returns the model name for `code`, `Ok(None)` if the service does not know it
    fn identify(&self, code: &str) -> Result<Option<String>>;
}

/// Where a lookup result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    /// Found in the local database
    Database,
    /// Resolved remotely and added to the database
    Remote,
    /// No mapping available
    NotFound,
}

/// Result of resolving one hardware code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelLookup {
    /// Model name, if any
    pub name: Option<String>,
    /// Where it came from
    pub source: LookupSource,
}

/// Resolves hardware codes through the database, falling back to a service
pub struct ModelResolver {
    database: ModelDatabase,
    path: PathBuf,
    service: Option<Box<dyn IdentifierService>>,
}

impl ModelResolver {
    /// Creates a resolver persisting to `path`
    pub fn new(database: ModelDatabase, path: impl Into<PathBuf>) -> Self {
        Self {
            database,
            path: path.into(),
            service: None,
        }
    }

    /// Loads the database at `path` and creates a resolver for it
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let database = ModelDatabase::load(&path)?;
        Ok(Self::new(database, path))
    }

    /// Sets the fallback service
    pub fn with_service(mut self, service: impl IdentifierService + 'static) -> Self {
        self.service = Some(Box::new(service));
        self
    }

    /// The underlying database
    pub fn database(&self) -> &ModelDatabase {
        &self.database
    }

    /// Resolves a hardware code.
    ///
    /// Service failures count as "not found". A failure to save a newly
    /// learned mapping is returned as an error.
    pub fn resolve(&mut self, code: &str) -> Result<ModelLookup> {
        if let Some(entry) = self.database.find(code) {
            debug!("Hardware code {} found in database: {}", code, entry.name);
            return Ok(ModelLookup {
                name: Some(entry.name.clone()),
                source: LookupSource::Database,
            });
        }

        let remote = match &self.service {
            Some(service) => service.identify(code).unwrap_or_else(|e| {
                warn!("{}", e);
                None
            }),
            None => None,
        };

        let Some(name) = remote else {
            return Ok(ModelLookup {
                name: None,
                source: LookupSource::NotFound,
            });
        };

        self.database.insert(ModelEntry::new(code, name.clone()));
        self.database.save(&self.path)?;
        info!("Model database updated: {} -> {}", code, name);

        Ok(ModelLookup {
            name: Some(name),
            source: LookupSource::Remote,
        })
    }
}
