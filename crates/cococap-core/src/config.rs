//! # Pipeline Configuration
//!
//! Options recognized by the dataset and loader: mode, file locations,
//! vocabulary cache settings, batch size and worker count.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CocoError, Result};

pub const DEFAULT_START_WORD: &str = "<start>";
pub const DEFAULT_END_WORD: &str = "<end>";
pub const DEFAULT_UNK_WORD: &str = "<unk>";

/// Default minimum number of occurrences for a token to enter the vocabulary.
pub const DEFAULT_VOCAB_THRESHOLD: usize = 5;

/// Whether the pipeline serves captioned training data or caption-less evaluation images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Train,
    #[serde(alias = "test")]
    Evaluate,
}

impl Mode {
    /// Image folder used by the COCO 2017 split for this mode.
    pub fn default_images_dir(self) -> PathBuf {
        match self {
            Self::Train => PathBuf::from("data/images/train2017"),
            Self::Evaluate => PathBuf::from("data/images/test2017"),
        }
    }

    /// Annotations file used by the COCO 2017 split for this mode.
    pub fn default_annotations_file(self) -> PathBuf {
        match self {
            Self::Train => PathBuf::from("data/annotations/captions_train2017.json"),
            Self::Evaluate => PathBuf::from("data/annotations/image_info_test2017.json"),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => write!(f, "train"),
            Self::Evaluate => write!(f, "evaluate"),
        }
    }
}

impl FromStr for Mode {
    type Err = CocoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "train" => Ok(Self::Train),
            "evaluate" | "eval" | "test" => Ok(Self::Evaluate),
            other => Err(CocoError::InvalidConfiguration(format!(
                "mode must be one of 'train' or 'evaluate', got {other:?}"
            ))),
        }
    }
}

/// Vocabulary construction and cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VocabSettings {
    /// Minimum corpus occurrences for a token to be kept.
    pub threshold: usize,
    /// Snapshot location.
    pub vocab_file: PathBuf,
    /// Caller asserts the snapshot at `vocab_file` is present and fresh.
    pub vocab_file_exists: bool,
    pub start_word: String,
    pub end_word: String,
    pub unk_word: String,
}

impl Default for VocabSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_VOCAB_THRESHOLD,
            vocab_file: PathBuf::from("vocabulary.json"),
            vocab_file_exists: false,
            start_word: DEFAULT_START_WORD.to_string(),
            end_word: DEFAULT_END_WORD.to_string(),
            unk_word: DEFAULT_UNK_WORD.to_string(),
        }
    }
}

impl VocabSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_vocab_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.vocab_file = path.into();
        self
    }

    pub fn with_vocab_file_exists(mut self, exists: bool) -> Self {
        self.vocab_file_exists = exists;
        self
    }

    /// Override the reserved start/end/unknown words.
    pub fn with_special_words(
        mut self,
        start: impl Into<String>,
        end: impl Into<String>,
        unk: impl Into<String>,
    ) -> Self {
        self.start_word = start.into();
        self.end_word = end.into();
        self.unk_word = unk.into();
        self
    }

    /// Checks that the cache flag agrees with the filesystem and the
    /// reserved words are usable.
    pub fn validate(&self) -> Result<()> {
        if self.vocab_file_exists && !self.vocab_file.exists() {
            return Err(CocoError::InvalidConfiguration(format!(
                "vocabulary file {:?} does not exist; set vocab_file_exists to false to build it",
                self.vocab_file
            )));
        }
        let words = [&self.start_word, &self.end_word, &self.unk_word];
        if words.iter().any(|w| w.is_empty()) {
            return Err(CocoError::InvalidConfiguration(
                "reserved words must be non-empty".into(),
            ));
        }
        if words[0] == words[1] || words[0] == words[2] || words[1] == words[2] {
            return Err(CocoError::InvalidConfiguration(
                "reserved words must be distinct".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for building a dataset and its loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub mode: Mode,
    pub images_dir: PathBuf,
    pub annotations_file: PathBuf,
    pub vocab: VocabSettings,
    /// Number of samples per batch. Must be 1 in evaluate mode.
    pub batch_size: usize,
    /// Number of parallel workers for item fetching (0 = sequential).
    pub num_workers: usize,
    /// Optional random seed for reproducible sampling and shuffling.
    pub seed: Option<u64>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::for_mode(Mode::Train)
    }
}

impl LoaderConfig {
    /// Defaults for a mode, pointing at the standard COCO 2017 layout.
    pub fn for_mode(mode: Mode) -> Self {
        let vocab = match mode {
            Mode::Train => VocabSettings::default(),
            Mode::Evaluate => VocabSettings::default().with_vocab_file_exists(true),
        };
        Self {
            mode,
            images_dir: mode.default_images_dir(),
            annotations_file: mode.default_annotations_file(),
            vocab,
            batch_size: match mode {
                Mode::Train => 32,
                Mode::Evaluate => 1,
            },
            num_workers: 0,
            seed: None,
        }
    }

    /// Read a configuration from a JSON file. Missing keys take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn with_images_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.images_dir = dir.into();
        self
    }

    pub fn with_annotations_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.annotations_file = path.into();
        self
    }

    pub fn with_vocab(mut self, vocab: VocabSettings) -> Self {
        self.vocab = vocab;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Rejects configurations that cannot work, without touching the corpus
    /// or the image store.
    ///
    /// # Errors
    ///
    /// Returns `CocoError::InvalidConfiguration` when:
    /// - the batch size is zero, or not 1 in evaluate mode
    /// - evaluate mode is asked to build a vocabulary instead of loading one
    /// - the vocabulary cache is flagged as existing but is absent
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(CocoError::InvalidConfiguration(
                "batch size must be at least 1".into(),
            ));
        }
        if self.mode == Mode::Evaluate {
            if self.batch_size != 1 {
                return Err(CocoError::InvalidConfiguration(format!(
                    "batch size must be 1 in evaluate mode, got {}",
                    self.batch_size
                )));
            }
            if !self.vocab.vocab_file_exists {
                return Err(CocoError::InvalidConfiguration(
                    "evaluate mode needs a vocabulary built from training data; \
                     set vocab_file_exists"
                        .into(),
                ));
            }
        }
        self.vocab.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_str() {
        assert_eq!("train".parse::<Mode>().unwrap(), Mode::Train);
        assert_eq!("Test".parse::<Mode>().unwrap(), Mode::Evaluate);
        assert_eq!("evaluate".parse::<Mode>().unwrap(), Mode::Evaluate);

        let err = "validate".parse::<Mode>().unwrap_err();
        assert!(matches!(err, CocoError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_mode_serde_accepts_test_alias() {
        let mode: Mode = serde_json::from_str("\"test\"").unwrap();
        assert_eq!(mode, Mode::Evaluate);
        assert_eq!(serde_json::to_string(&Mode::Train).unwrap(), "\"train\"");
        assert!(serde_json::from_str::<Mode>("\"predict\"").is_err());
    }

    #[test]
    fn test_default_train_config_is_valid() {
        let config = LoaderConfig::default();
        assert_eq!(config.mode, Mode::Train);
        assert_eq!(config.vocab.threshold, DEFAULT_VOCAB_THRESHOLD);
        config.validate().unwrap();
    }

    #[test]
    fn test_evaluate_rejects_batch_size_above_one() {
        let dir = tempfile::tempdir().unwrap();
        let vocab_file = dir.path().join("vocab.json");
        std::fs::write(&vocab_file, "{}").unwrap();

        let config = LoaderConfig::for_mode(Mode::Evaluate)
            .with_vocab(
                VocabSettings::new()
                    .with_vocab_file(&vocab_file)
                    .with_vocab_file_exists(true),
            )
            .with_batch_size(2);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, CocoError::InvalidConfiguration(_)));
        assert!(err.to_string().contains("batch size must be 1"));

        config.with_batch_size(1).validate().unwrap();
    }

    #[test]
    fn test_evaluate_requires_existing_vocab() {
        let config = LoaderConfig::for_mode(Mode::Evaluate)
            .with_vocab(VocabSettings::new().with_vocab_file_exists(false));
        assert!(matches!(
            config.validate(),
            Err(CocoError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_exists_flag_with_missing_file() {
        let config = LoaderConfig::default().with_vocab(
            VocabSettings::new()
                .with_vocab_file("/no/such/vocabulary.json")
                .with_vocab_file_exists(true),
        );
        assert!(matches!(
            config.validate(),
            Err(CocoError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = LoaderConfig::default().with_batch_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_special_words_rejected() {
        let settings = VocabSettings::new().with_special_words("<s>", "<s>", "<unk>");
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"mode": "train", "batch_size": 8, "vocab": {"threshold": 2}}"#,
        )
        .unwrap();

        let config = LoaderConfig::from_file(&path).unwrap();
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.vocab.threshold, 2);
        assert_eq!(config.vocab.unk_word, DEFAULT_UNK_WORD);
        assert_eq!(config.num_workers, 0);
    }
}
