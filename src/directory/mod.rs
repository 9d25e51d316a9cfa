//! Directory backend: one `<type>.features` file per feature type.
//!
//! The directory is held with an exclusive `.lock` file for as long as the backend is
//! open. Writers stage their edits in memory and rewrite the file when closed. The
//! backend applies no query clause natively.

mod format;

use crate::capabilities::Capabilities;
use crate::content::{ContentEntry, DataStoreBackend, FeatureBackend};
use crate::error::{Result, StoreError};
use crate::feature::Feature;
use crate::query::Query;
use crate::reader::{BoxReader, CollectionReader};
use crate::schema::FeatureType;
use crate::transaction::Transaction;
use crate::types::{Envelope, FeatureId};
use crate::writer::{BoxWriter, FeatureWriter, WriteFlags};
use format::FileHeader;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const FILE_EXTENSION: &str = "features";

/// Directory store configuration.
#[derive(Clone, Debug)]
pub struct DirectoryConfig {
    /// Directory holding the feature files.
    pub path: PathBuf,

    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./features"),
            create_if_missing: true,
        }
    }
}

/// One feature file. Writers serialize on `write_lock`; `generation` detects a writer
/// whose snapshot went stale.
struct FeatureFile {
    path: PathBuf,
    feature_type: Arc<FeatureType>,
    write_lock: Mutex<()>,
    generation: Mutex<u64>,
}

impl FeatureFile {
    fn load(&self) -> Result<(FileHeader, Vec<Feature>)> {
        format::read_file(&self.path, &self.feature_type)
    }
}

/// A data store backend persisting each feature type to its own file.
pub struct DirectoryDataStore {
    config: DirectoryConfig,
    /// Held for exclusive access.
    lock_file: File,
    files: RwLock<HashMap<String, Arc<FeatureFile>>>,
}

impl DirectoryDataStore {
    /// Open a directory store, creating the directory when allowed.
    pub fn open(config: DirectoryConfig) -> Result<Self> {
        if !config.path.exists() {
            if !config.create_if_missing {
                return Err(StoreError::Io(std::io::Error::new(
                    ErrorKind::NotFound,
                    format!("{} does not exist", config.path.display()),
                )));
            }
            fs::create_dir_all(&config.path)?;
        }

        let lock_file = Self::acquire_lock(&config.path)?;

        let mut files = HashMap::new();
        for dir_entry in fs::read_dir(&config.path)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let header = format::read_header(&path)?;
            let name = header.schema.name().to_string();
            files.insert(
                name,
                Arc::new(FeatureFile {
                    path,
                    feature_type: Arc::new(header.schema),
                    write_lock: Mutex::new(()),
                    generation: Mutex::new(0),
                }),
            );
        }
        tracing::debug!(path = %config.path.display(), types = files.len(), "directory store opened");

        Ok(Self {
            config,
            lock_file,
            files: RwLock::new(files),
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join(".lock"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;
        Ok(lock_file)
    }

    fn file(&self, type_name: &str) -> Result<Arc<FeatureFile>> {
        self.files
            .read()
            .get(type_name)
            .cloned()
            .ok_or_else(|| StoreError::TypeNotFound(type_name.to_string()))
    }

    fn file_path(&self, type_name: &str) -> Result<PathBuf> {
        let valid = !type_name.is_empty()
            && type_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::InvalidSchema(format!(
                "type name {:?} cannot be used as a file name",
                type_name
            )));
        }
        Ok(self
            .config
            .path
            .join(format!("{}.{}", type_name, FILE_EXTENSION)))
    }
}

impl DataStoreBackend for DirectoryDataStore {
    fn create_type_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.files.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn create_feature_source(&self, entry: &Arc<ContentEntry>) -> Result<Arc<dyn FeatureBackend>> {
        Ok(Arc::new(DirectoryFeatureBackend {
            file: self.file(entry.type_name())?,
        }))
    }

    fn create_schema(&self, feature_type: &FeatureType) -> Result<()> {
        let path = self.file_path(feature_type.name())?;
        let mut files = self.files.write();
        if files.contains_key(feature_type.name()) || path.exists() {
            return Err(StoreError::TypeExists(feature_type.name().to_string()));
        }
        let header = FileHeader {
            schema: feature_type.clone(),
            next_seq: 0,
        };
        format::write_file(&path, &header, std::iter::empty())?;
        files.insert(
            feature_type.name().to_string(),
            Arc::new(FeatureFile {
                path,
                feature_type: Arc::new(feature_type.clone()),
                write_lock: Mutex::new(()),
                generation: Mutex::new(0),
            }),
        );
        Ok(())
    }

    fn remove_schema(&self, type_name: &str) -> Result<()> {
        let file = self
            .files
            .write()
            .remove(type_name)
            .ok_or_else(|| StoreError::TypeNotFound(type_name.to_string()))?;
        let _writing = file.write_lock.lock();
        fs::remove_file(&file.path)?;
        Ok(())
    }

    fn dispose(&self) -> Result<()> {
        if let Err(e) = self.lock_file.unlock() {
            tracing::warn!(error = %e, "failed to release directory lock");
        }
        Ok(())
    }
}

struct DirectoryFeatureBackend {
    file: Arc<FeatureFile>,
}

impl FeatureBackend for DirectoryFeatureBackend {
    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
            .with_reliable_fids(true)
            .with_use_provided_fid(true)
    }

    fn build_feature_type(&self) -> Result<FeatureType> {
        Ok(self.file.feature_type.as_ref().clone())
    }

    fn bounds_internal(&self, _query: &Query, _transaction: &Transaction) -> Result<Option<Envelope>> {
        let (_, features) = self.file.load()?;
        Ok(features
            .iter()
            .fold(None, |acc, f| Envelope::union(acc, f.bounds())))
    }

    fn count_internal(&self, _query: &Query, _transaction: &Transaction) -> Result<Option<usize>> {
        let (_, features) = self.file.load()?;
        Ok(Some(features.len()))
    }

    fn reader_internal(&self, _query: &Query, _transaction: &Transaction) -> Result<BoxReader> {
        let (_, features) = self.file.load()?;
        Ok(Box::new(CollectionReader::new(
            Arc::clone(&self.file.feature_type),
            features,
        )))
    }

    fn writer_internal(&self, _query: &Query, flags: WriteFlags, _transaction: &Transaction) -> Result<BoxWriter> {
        let generation = *self.file.generation.lock();
        let (header, features) = self.file.load()?;
        let ids = features.iter().map(|f| f.id().clone()).collect();
        // Append-only writers keep the rows too, so close rewrites them unchanged.
        let rows = features.into_iter().map(Some).collect();
        Ok(Box::new(DirectoryWriter {
            file: Arc::clone(&self.file),
            generation,
            next_seq: header.next_seq,
            visit: flags.contains(WriteFlags::UPDATE),
            append: flags.contains(WriteFlags::APPEND),
            rows,
            position: 0,
            appended: Vec::new(),
            ids,
            current: None,
            cursor: Cursor::Idle,
            dirty: false,
            closed: false,
        }))
    }

    fn is_writable(&self) -> bool {
        true
    }
}

enum Cursor {
    Idle,
    Existing(usize),
    Appending,
    Done,
}

/// Writer staging edits over a snapshot of the file.
struct DirectoryWriter {
    file: Arc<FeatureFile>,
    generation: u64,
    next_seq: u64,
    visit: bool,
    append: bool,
    /// Snapshot rows; `None` marks a removed row.
    rows: Vec<Option<Feature>>,
    position: usize,
    appended: Vec<Feature>,
    ids: HashSet<FeatureId>,
    current: Option<Feature>,
    cursor: Cursor,
    dirty: bool,
    closed: bool,
}

impl DirectoryWriter {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(StoreError::Closed("directory writer".into()));
        }
        Ok(())
    }

    fn generate_id(&mut self) -> FeatureId {
        loop {
            self.next_seq += 1;
            let fid = FeatureId(format!(
                "{}.{}",
                self.file.feature_type.name(),
                self.next_seq
            ));
            if !self.ids.contains(&fid) {
                return fid;
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        let _writing = self.file.write_lock.lock();
        let mut generation = self.file.generation.lock();
        if *generation != self.generation {
            return Err(StoreError::IllegalState(format!(
                "{} changed since the writer opened",
                self.file.path.display()
            )));
        }
        let header = FileHeader {
            schema: self.file.feature_type.as_ref().clone(),
            next_seq: self.next_seq,
        };
        let rows = self.rows.iter().flatten().chain(self.appended.iter());
        format::write_file(&self.file.path, &header, rows)?;
        *generation += 1;
        tracing::debug!(
            path = %self.file.path.display(),
            appended = self.appended.len(),
            "feature file rewritten"
        );
        Ok(())
    }
}

impl FeatureWriter for DirectoryWriter {
    fn feature_type(&self) -> Arc<FeatureType> {
        Arc::clone(&self.file.feature_type)
    }

    fn has_next(&mut self) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.visit && self.position < self.rows.len())
    }

    fn next(&mut self) -> Result<&mut Feature> {
        if self.has_next()? {
            let index = self.position;
            self.position += 1;
            if let Some(feature) = self.rows[index].clone() {
                self.cursor = Cursor::Existing(index);
                return Ok(self.current.insert(feature));
            }
        }
        if !self.append {
            return Err(StoreError::IllegalState(
                "writer has no more features and cannot append".into(),
            ));
        }
        let placeholder = format!("{}.new", self.file.feature_type.name());
        self.cursor = Cursor::Appending;
        Ok(self
            .current
            .insert(Feature::new(Arc::clone(&self.file.feature_type), placeholder)))
    }

    fn current(&mut self) -> Option<&mut Feature> {
        self.current.as_mut()
    }

    fn write(&mut self) -> Result<()> {
        self.ensure_open()?;
        let Some(mut row) = self.current.clone() else {
            return Err(StoreError::IllegalState("no current feature to write".into()));
        };
        match self.cursor {
            Cursor::Existing(index) => {
                row.set_use_provided_id(false);
                self.rows[index] = Some(row);
            }
            Cursor::Appending => {
                let fid = if row.use_provided_id() {
                    if self.ids.contains(row.id()) {
                        return Err(StoreError::FeatureExists(row.id().clone()));
                    }
                    row.id().clone()
                } else {
                    self.generate_id()
                };
                row.set_id(fid.clone());
                row.set_use_provided_id(false);
                self.ids.insert(fid);
                self.appended.push(row.clone());
                self.current = Some(row);
            }
            Cursor::Idle | Cursor::Done => {
                return Err(StoreError::IllegalState("no current feature to write".into()));
            }
        }
        self.cursor = Cursor::Done;
        self.dirty = true;
        Ok(())
    }

    fn remove(&mut self) -> Result<()> {
        self.ensure_open()?;
        match self.cursor {
            Cursor::Existing(index) => {
                if let Some(removed) = self.rows[index].take() {
                    self.ids.remove(removed.id());
                }
                self.dirty = true;
            }
            Cursor::Appending => {}
            Cursor::Idle | Cursor::Done => {
                return Err(StoreError::IllegalState("no current feature to remove".into()));
            }
        }
        self.cursor = Cursor::Done;
        self.current = None;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.dirty {
            self.flush()?;
        }
        Ok(())
    }
}
