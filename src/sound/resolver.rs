//! Sound resolution.
//!
//! Turns a [`SoundId`] into something the player can act on, exactly once,
//! so nothing downstream ever looks at raw library records again.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, warn};

use super::error::SoundError;
use super::id::{BuiltinTone, SoundId};
use super::library::{is_expiring_url, SoundLibraryEntry, SoundLookup};

/// Master playback level applied to every sound.
pub const GLOBAL_VOLUME: f32 = 0.85;

/// Tone played when a sound cannot be resolved or decoded.
pub const FALLBACK_TONE: BuiltinTone = BuiltinTone::Beep;

/// Upper bound on fetching a remote clip, connection included.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(8);

// ============================================================================
// PlayableSource
// ============================================================================

/// Where the bytes of a library sound come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayableSource {
    /// A complete `data:` URL.
    DataUrl(String),
    /// A bare base64 payload.
    Encoded {
        payload: String,
        mime: Option<String>,
    },
    /// A file path, `file://` URL or remote URL.
    Location(String),
}

impl PlayableSource {
    /// Picks the first usable source of an entry.
    ///
    /// Checked in order: inline `data:` URL, encoded payload, then a location
    /// whose scheme does not expire. Returns `None` when nothing is usable.
    #[must_use]
    pub fn of(entry: &SoundLibraryEntry) -> Option<Self> {
        if let Some(data) = non_empty(&entry.data_url) {
            return Some(Self::DataUrl(data.to_string()));
        }
        if let Some(url) = non_empty(&entry.url).filter(|u| u.starts_with("data:")) {
            return Some(Self::DataUrl(url.to_string()));
        }
        if let Some(payload) = non_empty(&entry.base64) {
            return Some(Self::Encoded {
                payload: payload.to_string(),
                mime: entry.mime.clone(),
            });
        }
        non_empty(&entry.url)
            .filter(|u| !is_expiring_url(u))
            .map(|u| Self::Location(u.to_string()))
    }

    /// Returns true if loading goes over the network.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Location(l) if is_remote_url(l))
    }

    /// Loads the raw audio bytes.
    ///
    /// Remote locations are fetched with a blocking client, so this must not
    /// be called from inside the async runtime; the player runs remote loads
    /// on a worker thread.
    ///
    /// # Errors
    ///
    /// - [`SoundError::DecodeError`] for malformed data URLs or base64
    /// - [`SoundError::FileNotFound`] for unreadable files
    /// - [`SoundError::FetchError`] when a remote clip cannot be fetched
    pub fn load(&self) -> Result<Vec<u8>, SoundError> {
        match self {
            Self::DataUrl(url) => decode_data_url(url),
            Self::Encoded { payload, .. } => decode_base64(payload),
            Self::Location(location) if is_remote_url(location) => fetch_remote(location),
            Self::Location(location) => {
                let path = location.strip_prefix("file://").unwrap_or(location);
                fs::read(path).map_err(|e| SoundError::FileNotFound(format!("{path}: {e}")))
            }
        }
    }
}

fn is_remote_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

fn fetch_remote(url: &str) -> Result<Vec<u8>, SoundError> {
    let fetch_error = |e: reqwest::Error| SoundError::FetchError(format!("{url}: {e}"));
    let client = reqwest::blocking::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(fetch_error)?;
    let bytes = client
        .get(url)
        .send()
        .and_then(reqwest::blocking::Response::error_for_status)
        .and_then(reqwest::blocking::Response::bytes)
        .map_err(fetch_error)?;
    debug!(url, bytes = bytes.len(), "Remote sound fetched");
    Ok(bytes.to_vec())
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn decode_base64(payload: &str) -> Result<Vec<u8>, SoundError> {
    let compact: String = payload.split_whitespace().collect();
    STANDARD
        .decode(compact)
        .map_err(|e| SoundError::DecodeError(e.to_string()))
}

fn decode_data_url(url: &str) -> Result<Vec<u8>, SoundError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| SoundError::DecodeError("not a data URL".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| SoundError::DecodeError("data URL without payload".to_string()))?;
    if !meta.split(';').any(|part| part.eq_ignore_ascii_case("base64")) {
        return Err(SoundError::UnsupportedSource(
            "data URL is not base64 encoded".to_string(),
        ));
    }
    decode_base64(payload)
}

// ============================================================================
// ResolvedSound
// ============================================================================

/// Coarse classification of a resolved sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundKind {
    Silence,
    Builtin,
    Library,
    Fallback,
}

/// A sound id resolved against the library.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedSound {
    /// Play nothing.
    Silence,
    /// A synthesized tone.
    Builtin { tone: BuiltinTone, volume: f32 },
    /// A library clip.
    Library {
        id: String,
        source: PlayableSource,
        volume: f32,
    },
    /// The id could not be resolved; play the fallback tone.
    Fallback { volume: f32 },
}

impl ResolvedSound {
    /// Returns the classification.
    #[must_use]
    pub fn kind(&self) -> SoundKind {
        match self {
            Self::Silence => SoundKind::Silence,
            Self::Builtin { .. } => SoundKind::Builtin,
            Self::Library { .. } => SoundKind::Library,
            Self::Fallback { .. } => SoundKind::Fallback,
        }
    }

    /// Returns the effective playback volume (0.0 for silence).
    #[must_use]
    pub fn volume(&self) -> f32 {
        match self {
            Self::Silence => 0.0,
            Self::Builtin { volume, .. }
            | Self::Library { volume, .. }
            | Self::Fallback { volume } => *volume,
        }
    }

    /// Returns true if nothing should be played.
    #[must_use]
    pub fn is_silence(&self) -> bool {
        matches!(self, Self::Silence)
    }
}

// ============================================================================
// SoundResolver
// ============================================================================

/// Resolves sound ids against a library.
#[derive(Clone)]
pub struct SoundResolver {
    library: Arc<dyn SoundLookup>,
}

impl SoundResolver {
    /// Creates a resolver reading from `library`.
    pub fn new(library: Arc<dyn SoundLookup>) -> Self {
        Self { library }
    }

    /// Resolves `id`. Never fails: anything unplayable becomes a fallback.
    #[must_use]
    pub fn resolve(&self, id: &SoundId) -> ResolvedSound {
        if id.is_silence() {
            return ResolvedSound::Silence;
        }
        if let Some(tone) = id.builtin_tone() {
            return ResolvedSound::Builtin {
                tone,
                volume: GLOBAL_VOLUME,
            };
        }

        let Some(entry) = self.library.find(id.as_str()) else {
            debug!(sound = %id, "Sound not in library, using fallback tone");
            return ResolvedSound::Fallback {
                volume: GLOBAL_VOLUME,
            };
        };
        let volume = effective_volume(&entry);

        match PlayableSource::of(&entry) {
            Some(source) => ResolvedSound::Library {
                id: entry.id,
                source,
                volume,
            },
            None => {
                if entry.broken {
                    debug!(sound = %id, "Sound is marked broken, using fallback tone");
                } else {
                    warn!(sound = %id, "再生可能な音源がありません。代替音を使用します");
                }
                ResolvedSound::Fallback { volume }
            }
        }
    }

    /// Returns the effective volume of `id` (global level times the entry's
    /// individual volume).
    #[must_use]
    pub fn volume_for(&self, id: &SoundId) -> f32 {
        if id.is_silence() || id.builtin_tone().is_some() {
            return GLOBAL_VOLUME;
        }
        self.library
            .find(id.as_str())
            .map_or(GLOBAL_VOLUME, |entry| effective_volume(&entry))
    }
}

fn effective_volume(entry: &SoundLibraryEntry) -> f32 {
    GLOBAL_VOLUME * entry.volume_factor() as f32
}

impl std::fmt::Debug for SoundResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundResolver").finish_non_exhaustive()
    }
}
