use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building vocabularies, datasets and batches.
#[derive(Debug, Error)]
pub enum CocoError {
    /// The requested configuration can never work (bad mode, batch size, cache flags).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The vocabulary snapshot could not be read or failed validation.
    #[error("corrupt vocabulary cache {path:?}: {reason}")]
    CorruptCache {
        /// Location of the snapshot.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// An image referenced by the corpus is not present in the image store.
    #[error("image not found: {0:?}")]
    MissingImage(PathBuf),

    /// The image file exists but could not be decoded.
    #[error("failed to decode image {path:?}: {reason}")]
    ImageDecode {
        /// Location of the image.
        path: PathBuf,
        /// Decoder message.
        reason: String,
    },

    /// An annotations file could not be read or parsed.
    #[error("failed to load annotations {path:?}: {reason}")]
    Annotations {
        /// Location of the annotations file.
        path: PathBuf,
        /// Reader or parser message.
        reason: String,
    },

    /// A record referenced by id is missing from the corpus.
    #[error("unknown {kind} id {id}")]
    UnknownRecord {
        /// Record kind (`"annotation"` or `"image"`).
        kind: &'static str,
        /// The id that was looked up.
        id: u64,
    },

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A regex pattern failed to compile (should not happen with static patterns).
    #[error("regex compilation error: {0}")]
    RegexError(#[from] regex::Error),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

/// Result type alias for cococap operations.
pub type Result<T> = std::result::Result<T, CocoError>;
