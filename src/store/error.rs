//! Persistence error types.

use thiserror::Error;

/// Errors raised by a [`KeyValueStore`](super::KeyValueStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The write would exceed the storage quota.
    #[error("保存容量の上限を超えました（{needed} / {limit} バイト）")]
    QuotaExceeded {
        /// Bytes the store would occupy after the write.
        needed: usize,
        /// Configured quota in bytes.
        limit: usize,
    },

    /// Underlying file I/O failed.
    #[error("ストレージの入出力に失敗しました: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be (de)serialized.
    #[error("保存データの変換に失敗しました: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No location is available for the store.
    #[error("保存先が見つかりません: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns true if the failure is a quota/space problem.
    ///
    /// These are the only persistence failures shown to the user.
    #[must_use]
    pub fn is_quota(&self) -> bool {
        match self {
            Self::QuotaExceeded { .. } => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::StorageFull,
            _ => false,
        }
    }
}
