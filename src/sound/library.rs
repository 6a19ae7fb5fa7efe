//! The board's sound library.
//!
//! A persisted list of user-registered audio clips. The engine only ever
//! reads it through [`SoundLookup`]; editing goes through [`SoundLibrary`],
//! whose every change is committed to the store before it becomes visible,
//! so a failed save leaves the last successfully saved state in place.

use std::fs;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::error::LibraryError;
use super::id::{slugify, time_slug_aliases};
use crate::store::{
    get_json, set_json, KeyValueStore, SOUND_LIBRARY_KEY, SOUND_MIGRATION_FLAG_KEY,
};
use crate::types::sanitize::{lenient_bool, lenient_opt_f64, lenient_string, vec_of};

/// Largest file accepted by [`SoundLibrary::import_file`].
pub const MAX_IMPORT_BYTES: u64 = 1024 * 1024;

/// Name given to entries stored without one.
const UNNAMED: &str = "名称未設定";

/// Mime type assumed when none is recorded.
pub const DEFAULT_MIME: &str = "audio/wav";

// ============================================================================
// SoundLibraryEntry
// ============================================================================

/// One registered clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundLibraryEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    /// Individual volume, 0-100 (absent means 100)
    #[serde(
        default,
        deserialize_with = "lenient_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub volume: Option<f64>,
    /// Complete `data:` URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,
    /// Bare base64 payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
    /// File path or URL (older boards wrote `fileUrl`)
    #[serde(default, alias = "fileUrl", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    /// Payload is known to be unplayable
    #[serde(default, deserialize_with = "lenient_bool", skip_serializing_if = "is_false")]
    pub broken: bool,
    /// Marker older boards used for the built-in tones
    #[serde(default, deserialize_with = "lenient_bool", skip_serializing)]
    builtin: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl SoundLibraryEntry {
    /// Creates an entry holding an encoded payload.
    pub fn encoded(
        id: impl Into<String>,
        name: impl Into<String>,
        payload: impl Into<String>,
        mime: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            volume: None,
            data_url: None,
            base64: Some(payload.into()),
            url: None,
            mime: Some(mime.into()),
            broken: false,
            builtin: false,
        }
    }

    /// Creates an entry pointing at a file path or URL.
    pub fn located(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            volume: None,
            data_url: None,
            base64: None,
            url: Some(url.into()),
            mime: None,
            broken: false,
            builtin: false,
        }
    }

    /// Returns the individual volume as a 0.0-1.0 factor.
    ///
    /// Absent or non-finite values count as full volume.
    #[must_use]
    pub fn volume_factor(&self) -> f64 {
        self.volume
            .filter(|v| v.is_finite())
            .map_or(1.0, |v| (v / 100.0).clamp(0.0, 1.0))
    }

    /// Returns true if the entry points at an object URL that died with the
    /// session that created it.
    #[must_use]
    pub fn has_expiring_url(&self) -> bool {
        self.url.as_deref().is_some_and(is_expiring_url)
    }

    /// Returns true if the entry carries its payload inline.
    #[must_use]
    pub fn has_inline_payload(&self) -> bool {
        self.data_url.as_deref().is_some_and(|d| !d.is_empty())
            || self.base64.as_deref().is_some_and(|b| !b.is_empty())
    }

    fn matches_name(&self, name: &str) -> bool {
        self.name == name
    }

    fn matches_slug(&self, slug: &str) -> bool {
        !slug.is_empty() && slugify(&self.name) == slug
    }
}

/// Returns true for URL schemes that only live as long as the page that
/// created them.
#[must_use]
pub fn is_expiring_url(url: &str) -> bool {
    url.trim_start().starts_with("blob:")
}

/// Guesses the mime type of an audio file from its extension.
#[must_use]
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("m4a" | "mp4") => "audio/mp4",
        Some("aac") => "audio/aac",
        Some("ogg" | "oga") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("webm") => "audio/webm",
        _ => DEFAULT_MIME,
    }
}

fn new_entry_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("snd_{}", &id[..8])
}

// ============================================================================
// SoundLookup
// ============================================================================

/// Read-only access to the library, as the resolver sees it.
pub trait SoundLookup: Send + Sync {
    /// Finds an entry by exact id, then exact name, then slugified name.
    fn find(&self, id: &str) -> Option<SoundLibraryEntry>;

    /// Returns the individual volume factor of an entry (1.0 if unknown).
    fn volume_of(&self, id: &str) -> f64 {
        self.find(id).map_or(1.0, |e| e.volume_factor())
    }
}

impl SoundLookup for SoundLibrary {
    fn find(&self, id: &str) -> Option<SoundLibraryEntry> {
        self.get(id).cloned()
    }
}

impl SoundLookup for RwLock<SoundLibrary> {
    fn find(&self, id: &str) -> Option<SoundLibraryEntry> {
        self.read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

// ============================================================================
// SoundLibrary
// ============================================================================

/// The registered clips, in registration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SoundLibrary {
    entries: Vec<SoundLibraryEntry>,
}

impl SoundLibrary {
    /// Creates an empty library.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a library from raw entries, repairing ids, names and volumes.
    ///
    /// Built-in tone markers written by older boards are dropped; the tones
    /// are synthesized by the player.
    #[must_use]
    pub fn from_entries(entries: Vec<SoundLibraryEntry>) -> Self {
        Self::repaired(entries).0
    }

    /// Like [`from_entries`](Self::from_entries), also reporting how many
    /// entries were given a fresh id.
    fn repaired(entries: Vec<SoundLibraryEntry>) -> (Self, usize) {
        let mut new_ids = 0;
        let entries = entries
            .into_iter()
            .filter(|e| !e.builtin)
            .map(|mut e| {
                if e.id.trim().is_empty() {
                    e.id = new_entry_id();
                    new_ids += 1;
                }
                if e.name.trim().is_empty() {
                    e.name = UNNAMED.to_string();
                }
                e.volume = e.volume.map(|v| v.clamp(0.0, 100.0));
                e
            })
            .collect();
        (Self { entries }, new_ids)
    }

    /// Loads the library, treating a missing or corrupt collection as empty.
    ///
    /// Ids assigned to entries stored without one are written back at once,
    /// so timer configs referring to them keep resolving after a restart.
    pub fn load(store: &dyn KeyValueStore) -> Self {
        match get_json::<Value>(store, SOUND_LIBRARY_KEY) {
            Ok(Some(value)) => {
                let (library, new_ids) = Self::repaired(vec_of(value));
                if new_ids > 0 {
                    match library.save(store) {
                        Ok(()) => info!(count = new_ids, "Assigned ids to unnamed sounds"),
                        Err(e) => warn!("音声ライブラリのIDを保存できません: {}", e),
                    }
                }
                debug!(count = library.len(), "Sound library loaded");
                library
            }
            Ok(None) => Self::new(),
            Err(e) => {
                warn!("音声ライブラリの読み込みに失敗しました: {}", e);
                Self::new()
            }
        }
    }

    /// Saves the whole collection.
    pub fn save(&self, store: &dyn KeyValueStore) -> Result<(), LibraryError> {
        set_json(store, SOUND_LIBRARY_KEY, &self.entries)?;
        Ok(())
    }

    /// Applies `change` to a copy of the entries and saves it.
    ///
    /// The library only takes the new state once the save succeeded.
    pub fn commit<R>(
        &mut self,
        store: &dyn KeyValueStore,
        change: impl FnOnce(&mut Vec<SoundLibraryEntry>) -> Result<R, LibraryError>,
    ) -> Result<R, LibraryError> {
        let mut draft = self.entries.clone();
        let result = change(&mut draft)?;
        set_json(store, SOUND_LIBRARY_KEY, &draft)?;
        self.entries = draft;
        Ok(result)
    }

    /// Returns all entries.
    #[must_use]
    pub fn entries(&self) -> &[SoundLibraryEntry] {
        &self.entries
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no clip is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finds an entry by exact id, then exact name, then slugified name.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&SoundLibraryEntry> {
        if id.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|e| e.id == id)
            .or_else(|| self.entries.iter().find(|e| e.matches_name(id)))
            .or_else(|| self.entries.iter().find(|e| e.matches_slug(id)))
            .or_else(|| {
                time_slug_aliases(id)
                    .iter()
                    .find_map(|alias| self.entries.iter().find(|e| e.matches_slug(alias)))
            })
    }

    /// Registers an audio file as a new entry and returns its id.
    ///
    /// The payload is stored base64-encoded so the entry outlives the file.
    pub fn import_file(
        &mut self,
        store: &dyn KeyValueStore,
        path: &Path,
        name: Option<&str>,
    ) -> Result<String, LibraryError> {
        let size = fs::metadata(path)?.len();
        if size > MAX_IMPORT_BYTES {
            return Err(LibraryError::FileTooLarge {
                size_kb: size.div_ceil(1024),
            });
        }
        let bytes = fs::read(path)?;
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or_else(|| {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| UNNAMED.to_string());

        let entry = SoundLibraryEntry::encoded(
            new_entry_id(),
            name,
            STANDARD.encode(&bytes),
            mime_for_path(path),
        );
        let id = entry.id.clone();
        self.commit(store, |entries| {
            entries.push(entry);
            Ok(())
        })?;
        info!(id = %id, bytes = bytes.len(), "Sound registered");
        Ok(id)
    }

    /// Removes an entry.
    pub fn remove(&mut self, store: &dyn KeyValueStore, id: &str) -> Result<(), LibraryError> {
        self.commit(store, |entries| {
            let before = entries.len();
            entries.retain(|e| e.id != id);
            if entries.len() == before {
                return Err(LibraryError::EntryNotFound(id.to_string()));
            }
            Ok(())
        })
    }

    /// Renames an entry; a blank name becomes the placeholder name.
    pub fn rename(
        &mut self,
        store: &dyn KeyValueStore,
        id: &str,
        name: &str,
    ) -> Result<(), LibraryError> {
        let name = match name.trim() {
            "" => UNNAMED.to_string(),
            n => n.to_string(),
        };
        self.update_entry(store, id, |e| e.name = name)
    }

    /// Sets an entry's individual volume, clamped to 0-100.
    pub fn set_volume(
        &mut self,
        store: &dyn KeyValueStore,
        id: &str,
        volume: f64,
    ) -> Result<(), LibraryError> {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 100.0)
        } else {
            100.0
        };
        self.update_entry(store, id, |e| e.volume = Some(volume))
    }

    fn update_entry(
        &mut self,
        store: &dyn KeyValueStore,
        id: &str,
        apply: impl FnOnce(&mut SoundLibraryEntry),
    ) -> Result<(), LibraryError> {
        self.commit(store, |entries| {
            let entry = entries
                .iter_mut()
                .find(|e| e.id == id)
                .ok_or_else(|| LibraryError::EntryNotFound(id.to_string()))?;
            apply(entry);
            Ok(())
        })
    }

    /// Marks entries that only point at an expired object URL as broken.
    ///
    /// Runs once per store; returns how many entries were marked.
    pub fn migrate_expiring_urls(
        &mut self,
        store: &dyn KeyValueStore,
    ) -> Result<usize, LibraryError> {
        if matches!(store.get(SOUND_MIGRATION_FLAG_KEY), Ok(Some(_))) {
            return Ok(0);
        }
        let marked = self.commit(store, |entries| {
            let mut marked = 0;
            for entry in entries
                .iter_mut()
                .filter(|e| e.has_expiring_url() && !e.has_inline_payload() && !e.broken)
            {
                entry.broken = true;
                marked += 1;
            }
            Ok(marked)
        })?;
        store.set(SOUND_MIGRATION_FLAG_KEY, "1")?;
        if marked > 0 {
            info!(count = marked, "Marked sounds with expired URLs as broken");
        }
        Ok(marked)
    }
}
