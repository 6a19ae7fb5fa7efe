//! Sound system error types.
//!
//! None of these ever reach the user: the engine logs them and treats the
//! affected playback as "sound did not play".

use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur in the sound playback system.
#[derive(Debug, Error)]
pub enum SoundError {
    /// Audio device is not available (e.g., no speakers connected).
    #[error("オーディオデバイスが利用できません: {0}")]
    DeviceNotAvailable(String),

    /// Sound file was not found at the specified path.
    #[error("サウンドファイルが見つかりません: {0}")]
    FileNotFound(String),

    /// Failed to decode the audio payload.
    #[error("サウンドのデコードに失敗しました: {0}")]
    DecodeError(String),

    /// Failed to create the audio output stream or a sink on it.
    #[error("オーディオストリームの作成に失敗しました: {0}")]
    StreamError(String),

    /// Fetching a remote clip failed (unreachable host, HTTP error, timeout).
    #[error("音声の取得に失敗しました: {0}")]
    FetchError(String),

    /// The source location cannot be played by this player.
    #[error("再生できない音源です: {0}")]
    UnsupportedSource(String),

    /// Generic sound playback error.
    #[error("サウンド再生エラー: {0}")]
    PlaybackError(String),
}

impl SoundError {
    /// Returns true if this error is related to device availability.
    #[must_use]
    pub fn is_device_error(&self) -> bool {
        matches!(self, Self::DeviceNotAvailable(_) | Self::StreamError(_))
    }

    /// Returns true if this error is related to the sound payload itself.
    #[must_use]
    pub fn is_source_error(&self) -> bool {
        matches!(
            self,
            Self::FileNotFound(_)
                | Self::DecodeError(_)
                | Self::FetchError(_)
                | Self::UnsupportedSource(_)
        )
    }

    /// Returns true if playback should be retried with the fallback tone.
    ///
    /// Device errors are excluded: the fallback would fail the same way.
    #[must_use]
    pub fn should_fall_back(&self) -> bool {
        self.is_source_error()
    }
}

/// Errors raised while editing the sound library.
///
/// Unlike [`SoundError`], these are shown to the user.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// The collection no longer fits into the store.
    #[error("音声ライブラリの保存容量がいっぱいです。不要な音声を削除するか、短い音声ファイルにしてください。")]
    QuotaExceeded,

    /// Any other persistence failure.
    #[error("音声ライブラリの保存に失敗しました: {0}")]
    Store(StoreError),

    /// The imported file exceeds the per-file limit.
    #[error("音声ファイルが大きすぎます（{size_kb}KB）。1MB以下の短い音声ファイルを登録してください。")]
    FileTooLarge {
        /// File size in KiB
        size_kb: u64,
    },

    /// The imported file could not be read.
    #[error("音声ファイルを読み込めません: {0}")]
    Read(#[from] std::io::Error),

    /// No entry has the given id.
    #[error("音声が見つかりません: {0}")]
    EntryNotFound(String),
}

impl From<StoreError> for LibraryError {
    fn from(e: StoreError) -> Self {
        if e.is_quota() {
            Self::QuotaExceeded
        } else {
            Self::Store(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SoundError::DeviceNotAvailable("no device".to_string());
        assert!(err.to_string().contains("no device"));
        assert!(err.to_string().contains("オーディオデバイスが利用できません"));

        let err = SoundError::FileNotFound("/path/to/sound.wav".to_string());
        assert!(err.to_string().contains("/path/to/sound.wav"));

        let err = SoundError::UnsupportedSource("https://example.com/a.mp3".to_string());
        assert!(err.to_string().contains("example.com"));
    }

    #[test]
    fn test_is_device_error() {
        assert!(SoundError::DeviceNotAvailable("x".into()).is_device_error());
        assert!(SoundError::StreamError("x".into()).is_device_error());
        assert!(!SoundError::FileNotFound("x".into()).is_device_error());
        assert!(!SoundError::PlaybackError("x".into()).is_device_error());
    }

    #[test]
    fn test_library_error_from_store() {
        let quota = StoreError::QuotaExceeded { needed: 2, limit: 1 };
        assert!(matches!(LibraryError::from(quota), LibraryError::QuotaExceeded));

        let other = StoreError::Unavailable("x".into());
        assert!(matches!(LibraryError::from(other), LibraryError::Store(_)));
        assert!(LibraryError::FileTooLarge { size_kb: 2048 }
            .to_string()
            .contains("2048KB"));
    }

    #[test]
    fn test_should_fall_back() {
        assert!(SoundError::FileNotFound("x".into()).should_fall_back());
        assert!(SoundError::DecodeError("x".into()).should_fall_back());
        assert!(SoundError::UnsupportedSource("x".into()).should_fall_back());
        assert!(SoundError::FetchError("x".into()).should_fall_back());
        assert!(!SoundError::StreamError("x".into()).should_fall_back());
        assert!(!SoundError::PlaybackError("x".into()).should_fall_back());
    }
}
