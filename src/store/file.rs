//! JSON file backed key-value store.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use super::{KeyValueStore, StoreError};

/// Default quota, matching what browsers grant a single origin.
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// Default store file, relative to the user data directory.
const DEFAULT_STORE_FILE: &str = "timerboard/store.json";

/// A key-value store persisted as one JSON object on disk.
///
/// Every write rewrites the whole file (via a temporary file and rename), and
/// is rejected with [`StoreError::QuotaExceeded`] when the serialized object
/// would exceed the quota.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    quota: usize,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Opens (or creates on first write) the store at `path`.
    ///
    /// A missing file is an empty store. A corrupt file is moved aside to
    /// `<name>.corrupt` and the store starts empty; if it cannot be moved the
    /// store refuses to open rather than overwrite it later.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(entries) => entries,
                Err(e) => {
                    let aside = corrupt_path(&path);
                    warn!(
                        path = %path.display(),
                        aside = %aside.display(),
                        "ストアファイルが壊れているため退避します: {}",
                        e
                    );
                    fs::rename(&path, &aside)?;
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::Io(e)),
        };
        debug!(path = %path.display(), keys = entries.len(), "Store opened");
        Ok(Self {
            path,
            quota: DEFAULT_QUOTA_BYTES,
            entries: Mutex::new(entries),
        })
    }

    /// Opens the store at the default location under the user data directory.
    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(Self::default_path()?)
    }

    /// Returns the default store path.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        dirs::data_dir()
            .map(|dir| dir.join(DEFAULT_STORE_FILE))
            .ok_or_else(|| StoreError::Unavailable("data directory".to_string()))
    }

    /// Sets the quota in bytes.
    #[must_use]
    pub fn with_quota(mut self, quota: usize) -> Self {
        self.quota = quota;
        self
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(entries)?;
        if json.len() > self.quota {
            return Err(StoreError::QuotaExceeded {
                needed: json.len(),
                limit: self.quota,
            });
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update(
        &self,
        apply: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut draft = entries.clone();
        apply(&mut draft);
        self.persist(&draft)?;
        *entries = draft;
        Ok(())
    }
}

/// Where a corrupt store file is moved: `store.json` -> `store.json.corrupt`.
fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".corrupt");
    path.with_file_name(name)
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}
