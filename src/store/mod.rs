//! Persisted board state.
//!
//! Everything the board keeps between sessions lives in a flat string
//! key-value store, one JSON blob per logical key. The engine and the sound
//! library never touch a concrete store; they go through the typed accessors
//! in [`SlotStore`] and [`BoardStore`] over an injected [`KeyValueStore`].
//!
//! # Keys
//!
//! | key                          | owner  | contents                        |
//! |------------------------------|--------|---------------------------------|
//! | `timerConfig_card_<slot>`    | slot   | [`TimerCardConfig`] blob        |
//! | `timer_lastModeIdx_<slot>`   | slot   | last used mode index            |
//! | `timer_tenKeyLast_<slot>`    | slot   | retained numeric-entry seconds  |
//! | `timerBoard_settings_v1`     | board  | [`BoardSettings`]               |
//! | `timerBoard_slots_v1`        | board  | slot arrangement order          |
//! | `timerBoard_pageNames_v1`    | board  | page names                      |
//! | `timerBoard_pageLock_v1`     | board  | `"1"` when paging is locked     |
//! | `timerBoard_sounds_v1`       | board  | sound library collection        |

mod error;
mod file;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::types::{BoardSettings, SlotId, TimerCardConfig};

pub use error::StoreError;
pub use file::{JsonFileStore, DEFAULT_QUOTA_BYTES};

/// Board-wide key of the sound library collection.
pub const SOUND_LIBRARY_KEY: &str = "timerBoard_sounds_v1";
/// Board-wide key of the one-time expiring-URL migration flag.
pub const SOUND_MIGRATION_FLAG_KEY: &str = "timerSounds_migrated_v2";
/// Board-wide key of [`BoardSettings`].
pub const BOARD_SETTINGS_KEY: &str = "timerBoard_settings_v1";
/// Board-wide key of the slot arrangement order.
pub const SLOTS_KEY: &str = "timerBoard_slots_v1";
/// Board-wide key of the page names.
pub const PAGE_NAMES_KEY: &str = "timerBoard_pageNames_v1";
/// Board-wide key of the page-lock flag.
pub const PAGE_LOCK_KEY: &str = "timerBoard_pageLock_v1";
/// Pre-slot configuration key, only ever written for the first card.
pub const LEGACY_CONFIG_KEY: &str = "timerConfig";

/// Key of a slot's configuration blob.
#[must_use]
pub fn config_key(slot: &SlotId) -> String {
    format!("timerConfig_card_{slot}")
}

/// Key of a slot's last used mode index.
#[must_use]
pub fn last_mode_key(slot: &SlotId) -> String {
    format!("timer_lastModeIdx_{slot}")
}

/// Key of a slot's retained numeric-entry value.
#[must_use]
pub fn numeric_retained_key(slot: &SlotId) -> String {
    format!("timer_tenKeyLast_{slot}")
}

// ============================================================================
// KeyValueStore
// ============================================================================

/// A flat string key-value store.
pub trait KeyValueStore: Send + Sync {
    /// Reads a value.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes a value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::QuotaExceeded`] when the store is full.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Deletes a value. Deleting a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Reads and deserializes a JSON value, treating corrupt data as absent.
pub fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(key, "保存データを読み込めませんでした: {}", e);
            Ok(None)
        }
    }
}

/// Serializes and writes a JSON value.
pub fn set_json<T: serde::Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory store, optionally with a byte quota over keys plus values.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryStore {
    /// Creates an empty, unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store that rejects writes beyond `quota` bytes.
    #[must_use]
    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: Mutex::default(),
            quota: Some(quota),
        }
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(limit) = self.quota {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = used + key.len() + value.len();
            if needed > limit {
                return Err(StoreError::QuotaExceeded { needed, limit });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

// ============================================================================
// SlotStore
// ============================================================================

/// Typed access to the keys owned by one timer slot.
///
/// Read failures degrade to defaults; write failures are returned so the
/// caller can decide whether to log or surface them.
#[derive(Clone)]
pub struct SlotStore {
    store: Arc<dyn KeyValueStore>,
    slot: SlotId,
}

impl SlotStore {
    /// Creates the accessor for `slot`.
    pub fn new(store: Arc<dyn KeyValueStore>, slot: SlotId) -> Self {
        Self { store, slot }
    }

    /// Returns the slot this accessor is bound to.
    pub fn slot(&self) -> &SlotId {
        &self.slot
    }

    /// Loads the sanitized configuration of this slot.
    ///
    /// Falls back to the legacy un-suffixed key for slot `0`, and to the
    /// default configuration when nothing usable is stored.
    pub fn load_config(&self) -> TimerCardConfig {
        let store = self.store.as_ref();
        let read = |key: &str| match get_json::<TimerCardConfig>(store, key) {
            Ok(config) => config,
            Err(e) => {
                warn!(slot = %self.slot, "設定の読み込みに失敗しました: {}", e);
                None
            }
        };

        if let Some(config) = read(&config_key(&self.slot)) {
            return config;
        }
        if self.slot.is_first() {
            if let Some(config) = read(LEGACY_CONFIG_KEY) {
                debug!(slot = %self.slot, "Migrating legacy timer configuration");
                if let Err(e) = self.save_config(&config) {
                    warn!(slot = %self.slot, "旧設定の移行に失敗しました: {}", e);
                }
                return config;
            }
        }
        TimerCardConfig::default()
    }

    /// Saves the configuration of this slot.
    pub fn save_config(&self, config: &TimerCardConfig) -> Result<(), StoreError> {
        set_json(self.store.as_ref(), &config_key(&self.slot), config)
    }

    /// Loads the last used mode index, if one was stored.
    pub fn load_last_mode(&self) -> Option<usize> {
        match get_json::<usize>(self.store.as_ref(), &last_mode_key(&self.slot)) {
            Ok(index) => index,
            Err(e) => {
                warn!(slot = %self.slot, "最終モードの読み込みに失敗しました: {}", e);
                None
            }
        }
    }

    /// Saves the last used mode index.
    pub fn save_last_mode(&self, index: usize) -> Result<(), StoreError> {
        set_json(self.store.as_ref(), &last_mode_key(&self.slot), &index)
    }

    /// Loads the retained numeric-entry value in seconds (0 when absent).
    pub fn load_numeric_retained(&self) -> u32 {
        match get_json::<u32>(self.store.as_ref(), &numeric_retained_key(&self.slot)) {
            Ok(seconds) => seconds.unwrap_or(0),
            Err(e) => {
                warn!(slot = %self.slot, "保持時間の読み込みに失敗しました: {}", e);
                0
            }
        }
    }

    /// Saves the retained numeric-entry value in seconds.
    pub fn save_numeric_retained(&self, seconds: u32) -> Result<(), StoreError> {
        set_json(
            self.store.as_ref(),
            &numeric_retained_key(&self.slot),
            &seconds,
        )
    }
}

impl std::fmt::Debug for SlotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotStore")
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// BoardStore
// ============================================================================

/// Typed access to the board-wide keys.
#[derive(Clone)]
pub struct BoardStore {
    store: Arc<dyn KeyValueStore>,
}

impl BoardStore {
    /// Creates the accessor.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    pub fn inner(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Returns the accessor of one slot on this board.
    pub fn slot(&self, slot: SlotId) -> SlotStore {
        SlotStore::new(Arc::clone(&self.store), slot)
    }

    /// Loads the board settings (defaults when absent or corrupt).
    pub fn load_settings(&self) -> BoardSettings {
        get_json::<BoardSettings>(self.store.as_ref(), BOARD_SETTINGS_KEY)
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    /// Saves the board settings.
    pub fn save_settings(&self, settings: &BoardSettings) -> Result<(), StoreError> {
        set_json(self.store.as_ref(), BOARD_SETTINGS_KEY, settings)
    }

    /// Loads the slot arrangement order.
    pub fn load_slots(&self) -> Vec<SlotId> {
        get_json::<Vec<SlotId>>(self.store.as_ref(), SLOTS_KEY)
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    /// Saves the slot arrangement order.
    pub fn save_slots(&self, slots: &[SlotId]) -> Result<(), StoreError> {
        set_json(self.store.as_ref(), SLOTS_KEY, slots)
    }

    /// Loads the page names.
    pub fn load_page_names(&self) -> Vec<String> {
        get_json::<Vec<String>>(self.store.as_ref(), PAGE_NAMES_KEY)
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    /// Saves the page names.
    pub fn save_page_names(&self, names: &[String]) -> Result<(), StoreError> {
        set_json(self.store.as_ref(), PAGE_NAMES_KEY, names)
    }

    /// Returns true if page navigation is locked.
    pub fn page_locked(&self) -> bool {
        matches!(self.store.get(PAGE_LOCK_KEY), Ok(Some(v)) if v == "1")
    }

    /// Sets the page-lock flag.
    pub fn set_page_locked(&self, locked: bool) -> Result<(), StoreError> {
        self.store.set(PAGE_LOCK_KEY, if locked { "1" } else { "0" })
    }
}

impl std::fmt::Debug for BoardStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardStore").finish_non_exhaustive()
    }
}
