//! On-disk state store for one installation.
//!
//! Each provisioned resource's raw creation response is persisted as one
//! JSON record named `<kind>.<name>.json`. A `tag` file records which
//! installation owns the directory; opening the store with any other tag is
//! refused. The record is the single source of truth for identifiers: they
//! are re-extracted through [`ResourceKind::id_lookup`] on every read.

mod key;

use std::io::{self, Write as _};
use std::time::{SystemTime, UNIX_EPOCH};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs::OpenOptions;
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::lookup::{LookupError, LookupPath};
use crate::tag::InstallationTag;

pub use key::{ResourceKey, ResourceKind};

const TAG_FILE_NAME: &str = "tag";
const RECORD_SUFFIX: &str = ".json";
const TEMP_SUFFIX: &str = ".tmp";

/// Errors raised by the state store.
#[derive(Debug, Error)]
pub enum StateError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the directory belongs to another installation.
    #[error(
        "state directory {path} belongs to installation '{recorded}', not '{supplied}'; \
         use the original tag or a different state directory"
    )]
    TagMismatch {
        /// State directory.
        path: Utf8PathBuf,
        /// Tag recorded in the directory.
        recorded: String,
        /// Tag supplied for this run.
        supplied: String,
    },
    /// Raised when the state directory does not exist and may not be created.
    #[error("no state found for installation '{tag}' at {path}")]
    Missing {
        /// Expected state directory.
        path: Utf8PathBuf,
        /// Supplied tag.
        tag: String,
    },
    /// Raised when a record or the tag file cannot be parsed.
    #[error("corrupt state file {path}: {message}")]
    Corrupt {
        /// File that failed to parse.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
    /// Raised when a key name contains characters unsafe for file names.
    #[error("invalid record name '{name}' for {kind}")]
    InvalidKey {
        /// Record kind.
        kind: ResourceKind,
        /// Offending name.
        name: String,
    },
    /// Raised when a record a later step depends on is absent.
    #[error("required {key} has not been provisioned")]
    Required {
        /// Missing record key.
        key: ResourceKey,
    },
}

/// One persisted resource.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ResourceRecord {
    /// Record kind.
    pub kind: ResourceKind,
    /// Record name.
    pub name: String,
    /// Seconds since the Unix epoch when the record was written.
    pub recorded_at: u64,
    /// Raw provider response.
    pub response: Value,
}

impl ResourceRecord {
    /// Wraps a response for `key`, stamping the current time.
    #[must_use]
    pub fn new(key: &ResourceKey, response: Value) -> Self {
        let recorded_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs());
        Self {
            kind: key.kind(),
            name: key.name().to_owned(),
            recorded_at,
            response,
        }
    }

    /// Key this record is stored under.
    #[must_use]
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind, self.name.clone())
    }

    /// Extracts the identifier using the kind's lookup expression.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError`] when the response has no usable identifier.
    pub fn identifier(&self) -> Result<String, LookupError> {
        self.lookup(self.kind.id_lookup())
    }

    /// Extracts an arbitrary scalar from the response.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError`] when the expression is malformed or finds no
    /// usable value.
    pub fn lookup(&self, expression: &str) -> Result<String, LookupError> {
        LookupPath::parse(expression)?.extract(&self.response)
    }

    pub(crate) fn is_empty(&self) -> bool {
        match &self.response {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::String(text) => text.trim().is_empty(),
            Value::Bool(_) | Value::Number(_) => false,
        }
    }
}

/// Directory-backed record store for a single installation.
#[derive(Debug)]
pub struct StateStore {
    path: Utf8PathBuf,
    dir: Dir,
    tag: InstallationTag,
}

impl StateStore {
    /// Opens the store at `path`, creating it and recording `tag` when the
    /// directory is new.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::TagMismatch`] when the directory records another
    /// tag, [`StateError::Corrupt`] when the tag file is empty, and
    /// [`StateError::Io`] for file system failures.
    pub fn open(path: &Utf8Path, tag: &InstallationTag) -> Result<Self, StateError> {
        Dir::create_ambient_dir_all(path, ambient_authority()).map_err(|err| io_error(path, &err))?;
        let store = Self::attach(path, tag)?;
        if store.recorded_tag()?.is_none() {
            store.write_file(TAG_FILE_NAME, tag.as_str())?;
            debug!(path = %path, tag = %tag, "initialised state directory");
        }
        Ok(store)
    }

    /// Opens an existing store without creating anything.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Missing`] when the directory or its tag file is
    /// absent, plus the errors of [`StateStore::open`].
    pub fn open_existing(path: &Utf8Path, tag: &InstallationTag) -> Result<Self, StateError> {
        let missing = || StateError::Missing {
            path: path.to_path_buf(),
            tag: tag.to_string(),
        };
        match Dir::open_ambient_dir(path, ambient_authority()) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(missing()),
            Err(err) => return Err(io_error(path, &err)),
        }
        let store = Self::attach(path, tag)?;
        if store.recorded_tag()?.is_none() {
            return Err(missing());
        }
        Ok(store)
    }

    fn attach(path: &Utf8Path, tag: &InstallationTag) -> Result<Self, StateError> {
        let dir =
            Dir::open_ambient_dir(path, ambient_authority()).map_err(|err| io_error(path, &err))?;
        let store = Self {
            path: path.to_path_buf(),
            dir,
            tag: tag.clone(),
        };
        if let Some(recorded) = store.recorded_tag()?
            && recorded != tag.as_str()
        {
            return Err(StateError::TagMismatch {
                path: path.to_path_buf(),
                recorded,
                supplied: tag.to_string(),
            });
        }
        Ok(store)
    }

    fn recorded_tag(&self) -> Result<Option<String>, StateError> {
        let Some(contents) = self.read_optional(TAG_FILE_NAME)? else {
            return Ok(None);
        };
        let recorded = contents.trim();
        if recorded.is_empty() {
            return Err(StateError::Corrupt {
                path: self.path.join(TAG_FILE_NAME),
                message: String::from("tag file is empty"),
            });
        }
        Ok(Some(recorded.to_owned()))
    }

    /// Directory backing the store.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Installation tag owning the store.
    #[must_use]
    pub const fn tag(&self) -> &InstallationTag {
        &self.tag
    }

    /// Loads the record for `key`.
    ///
    /// A missing file, or a file with only whitespace, is reported as
    /// `Ok(None)`: nothing usable was created yet.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Corrupt`] when the file cannot be parsed or
    /// belongs to another key, and [`StateError::Io`] on read failures.
    pub fn load(&self, key: &ResourceKey) -> Result<Option<ResourceRecord>, StateError> {
        let file_name = self.checked_file_name(key)?;
        let Some(contents) = self.read_optional(&file_name)? else {
            return Ok(None);
        };
        if contents.trim().is_empty() {
            return Ok(None);
        }
        let record = self.parse_record(&file_name, &contents)?;
        if record.kind != key.kind() || record.name != key.name() {
            return Err(StateError::Corrupt {
                path: self.path.join(&file_name),
                message: format!("record describes {} instead of {key}", record.key()),
            });
        }
        Ok(Some(record))
    }

    /// Loads a record that must already exist.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Required`] when the record is absent, plus the
    /// errors of [`StateStore::load`].
    pub fn require(&self, key: &ResourceKey) -> Result<ResourceRecord, StateError> {
        self.load(key)?
            .ok_or_else(|| StateError::Required { key: key.clone() })
    }

    /// Returns `true` when a non-empty record exists for `key`.
    ///
    /// # Errors
    ///
    /// Propagates [`StateStore::load`] failures.
    pub fn contains(&self, key: &ResourceKey) -> Result<bool, StateError> {
        Ok(self
            .load(key)?
            .is_some_and(|record| !record.is_empty()))
    }

    /// Persists `record`, replacing any previous version atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InvalidKey`] for unsafe names and
    /// [`StateError::Io`] on write failures.
    pub fn save(&self, record: &ResourceRecord) -> Result<(), StateError> {
        let file_name = self.checked_file_name(&record.key())?;
        let rendered =
            serde_json::to_string_pretty(record).map_err(|err| StateError::Corrupt {
                path: self.path.join(&file_name),
                message: err.to_string(),
            })?;
        self.write_file(&file_name, &rendered)
    }

    /// Deletes the record for `key`; absent records are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] when removal fails for another reason.
    pub fn remove(&self, key: &ResourceKey) -> Result<(), StateError> {
        let file_name = self.checked_file_name(key)?;
        self.remove_file(&file_name)
    }

    /// Returns all records sorted by kind then name.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] when the directory cannot be listed and
    /// [`StateError::Corrupt`] when a record cannot be parsed.
    pub fn records(&self) -> Result<Vec<ResourceRecord>, StateError> {
        let entries = self.dir.entries().map_err(|err| io_error(&self.path, &err))?;
        let mut records = Vec::new();
        for entry in entries {
            let file_name = entry
                .and_then(|item| item.file_name())
                .map_err(|err| io_error(&self.path, &err))?;
            if !file_name.ends_with(RECORD_SUFFIX) {
                continue;
            }
            let Some(contents) = self.read_optional(&file_name)? else {
                continue;
            };
            if contents.trim().is_empty() {
                continue;
            }
            records.push(self.parse_record(&file_name, &contents)?);
        }
        records.sort_by(|lhs, rhs| (lhs.kind, &lhs.name).cmp(&(rhs.kind, &rhs.name)));
        Ok(records)
    }

    /// Writes an auxiliary file such as a private key and returns its path.
    /// Like records, it is readable only by the owner.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] on write failures.
    pub fn write_secret(&self, file_name: &str, contents: &str) -> Result<Utf8PathBuf, StateError> {
        self.write_file(file_name, contents)?;
        Ok(self.path.join(file_name))
    }

    /// Removes an auxiliary file; absent files are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] when removal fails for another reason.
    pub fn remove_file(&self, file_name: &str) -> Result<(), StateError> {
        match self.dir.remove_file(file_name) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(&self.path.join(file_name), &err)),
        }
    }

    fn checked_file_name(&self, key: &ResourceKey) -> Result<String, StateError> {
        if !key.is_valid_name() {
            return Err(StateError::InvalidKey {
                kind: key.kind(),
                name: key.name().to_owned(),
            });
        }
        Ok(key.file_name())
    }

    fn parse_record(&self, file_name: &str, contents: &str) -> Result<ResourceRecord, StateError> {
        serde_json::from_str(contents).map_err(|err| StateError::Corrupt {
            path: self.path.join(file_name),
            message: err.to_string(),
        })
    }

    fn read_optional(&self, file_name: &str) -> Result<Option<String>, StateError> {
        match self.dir.read_to_string(file_name) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(&self.path.join(file_name), &err)),
        }
    }

    /// Writes through a fresh owner-only temp file renamed over the target,
    /// so readers never see a partial file and no record is world-readable.
    fn write_file(&self, file_name: &str, contents: &str) -> Result<(), StateError> {
        let temp_name = format!("{file_name}{TEMP_SUFFIX}");
        let temp_path = self.path.join(&temp_name);
        self.remove_file(&temp_name)?;
        let mut file = self
            .dir
            .open_with(&temp_name, &owner_only())
            .map_err(|err| io_error(&temp_path, &err))?;
        file.write_all(contents.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|err| io_error(&temp_path, &err))?;
        drop(file);
        self.dir
            .rename(&temp_name, &self.dir, file_name)
            .map_err(|err| io_error(&self.path.join(file_name), &err))
    }
}

fn owner_only() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use cap_std::fs::OpenOptionsExt as _;
        options.mode(0o600);
    }
    options
}

fn io_error(path: &Utf8Path, err: &io::Error) -> StateError {
    StateError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
