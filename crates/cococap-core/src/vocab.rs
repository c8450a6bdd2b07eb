//! # Caption Vocabulary
//!
//! Token ↔ id mapping built once from a captions corpus (or loaded from a
//! snapshot) and read-only afterwards. Ids are dense and start at 0; the
//! start, end and unknown words always take ids 0, 1 and 2.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_END_WORD, DEFAULT_START_WORD, DEFAULT_UNK_WORD, VocabSettings};
use crate::corpus::CaptionCorpus;
use crate::error::{CocoError, Result};
use crate::tokenizer::CaptionTokenizer;

/// Snapshot format written by [`Vocabulary::persist`].
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

const PROGRESS_EVERY: usize = 100_000;

/// The three reserved words, in id order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialWords {
    pub start: String,
    pub end: String,
    pub unk: String,
}

impl Default for SpecialWords {
    fn default() -> Self {
        Self {
            start: DEFAULT_START_WORD.to_string(),
            end: DEFAULT_END_WORD.to_string(),
            unk: DEFAULT_UNK_WORD.to_string(),
        }
    }
}

impl From<&VocabSettings> for SpecialWords {
    fn from(settings: &VocabSettings) -> Self {
        Self {
            start: settings.start_word.clone(),
            end: settings.end_word.clone(),
            unk: settings.unk_word.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct VocabSnapshot {
    format_version: u32,
    start_word: String,
    end_word: String,
    unk_word: String,
    entries: Vec<(String, u32)>,
}

/// Bidirectional token ↔ id mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    word_to_id: HashMap<String, u32>,
    id_to_word: Vec<String>,
    special: SpecialWords,
}

impl Vocabulary {
    /// Start a vocabulary holding only the reserved words.
    fn with_special(special: SpecialWords) -> Self {
        let mut vocab = Self {
            word_to_id: HashMap::new(),
            id_to_word: Vec::new(),
            special,
        };
        let reserved = [
            vocab.special.start.clone(),
            vocab.special.end.clone(),
            vocab.special.unk.clone(),
        ];
        for word in reserved {
            vocab.add_word(word);
        }
        vocab
    }

    fn add_word(&mut self, word: String) {
        if !self.word_to_id.contains_key(&word) {
            let id = self.id_to_word.len() as u32;
            self.word_to_id.insert(word.clone(), id);
            self.id_to_word.push(word);
        }
    }

    /// Build a vocabulary from every caption in the corpus.
    ///
    /// Tokens occurring at least `threshold` times are kept and numbered in
    /// the order they were first seen, after the reserved words.
    ///
    /// # Examples
    /// ```
    /// use cococap_core::corpus::{Annotation, CocoCaptions};
    /// use cococap_core::tokenizer::CaptionTokenizer;
    /// use cococap_core::vocab::{SpecialWords, Vocabulary};
    ///
    /// let corpus = CocoCaptions::from_records(vec![], vec![
    ///     Annotation { id: 1, image_id: 1, caption: "a cat".into() },
    ///     Annotation { id: 2, image_id: 1, caption: "a cat sat".into() },
    ///     Annotation { id: 3, image_id: 2, caption: "a dog".into() },
    /// ]);
    /// let tokenizer = CaptionTokenizer::new().unwrap();
    /// let vocab = Vocabulary::build(&corpus, 1, &tokenizer, SpecialWords::default());
    ///
    /// assert_eq!(vocab.len(), 7);
    /// assert_eq!(vocab.lookup("sat"), 5);
    /// ```
    pub fn build<C: CaptionCorpus + ?Sized>(
        corpus: &C,
        threshold: usize,
        tokenizer: &CaptionTokenizer,
        special: SpecialWords,
    ) -> Self {
        let ids = corpus.annotation_ids();
        let total = ids.len();

        // Counts kept in first-seen order so id assignment is deterministic.
        let mut slots: HashMap<String, usize> = HashMap::new();
        let mut counts: Vec<(String, usize)> = Vec::new();

        for (i, id) in ids.iter().enumerate() {
            if i % PROGRESS_EVERY == 0 {
                info!("[{}/{}] Tokenizing captions...", i, total);
            }
            let Some(ann) = corpus.annotation_by_id(*id) else {
                warn!(id = *id, "annotation id has no record, skipping");
                continue;
            };
            for token in tokenizer.tokenize(&ann.caption) {
                match slots.get(&token) {
                    Some(&slot) => counts[slot].1 += 1,
                    None => {
                        slots.insert(token.clone(), counts.len());
                        counts.push((token, 1));
                    }
                }
            }
        }

        let mut vocab = Self::with_special(special);
        let distinct = counts.len();
        for (word, count) in counts {
            if count >= threshold {
                vocab.add_word(word);
            }
        }

        info!(
            captions = total,
            distinct_tokens = distinct,
            threshold,
            size = vocab.len(),
            "built vocabulary"
        );
        vocab
    }

    /// Load a snapshot written by [`Vocabulary::persist`].
    ///
    /// # Errors
    ///
    /// Returns `CocoError::CorruptCache` if the file cannot be read, is not
    /// a snapshot, has an unsupported version, or its ids are not dense and
    /// unique with the reserved words at 0, 1 and 2.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let corrupt = |reason: String| CocoError::CorruptCache {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).map_err(|e| corrupt(e.to_string()))?;
        let snapshot: VocabSnapshot =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| corrupt(e.to_string()))?;

        let vocab = Self::from_snapshot(snapshot).map_err(corrupt)?;
        info!(path = %path.display(), size = vocab.len(), "loaded vocabulary");
        Ok(vocab)
    }

    fn from_snapshot(snapshot: VocabSnapshot) -> std::result::Result<Self, String> {
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(format!(
                "unsupported format version {} (expected {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            ));
        }

        let n = snapshot.entries.len();
        let mut id_to_word: Vec<Option<String>> = vec![None; n];
        let mut word_to_id = HashMap::with_capacity(n);
        for (word, id) in snapshot.entries {
            let slot = id_to_word
                .get_mut(id as usize)
                .ok_or_else(|| format!("id {id} out of range for {n} entries"))?;
            if slot.is_some() {
                return Err(format!("id {id} assigned twice"));
            }
            if word_to_id.insert(word.clone(), id).is_some() {
                return Err(format!("token {word:?} listed twice"));
            }
            *slot = Some(word);
        }
        // n entries, n distinct in-range ids: every slot is filled.
        let id_to_word: Vec<String> = id_to_word.into_iter().flatten().collect();

        let special = SpecialWords {
            start: snapshot.start_word,
            end: snapshot.end_word,
            unk: snapshot.unk_word,
        };
        for (expected, word) in [&special.start, &special.end, &special.unk].iter().enumerate() {
            if word_to_id.get(word.as_str()) != Some(&(expected as u32)) {
                return Err(format!("reserved word {word:?} is not at id {expected}"));
            }
        }

        Ok(Self {
            word_to_id,
            id_to_word,
            special,
        })
    }

    /// Write a snapshot, replacing any existing file.
    pub fn persist<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let snapshot = VocabSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            start_word: self.special.start.clone(),
            end_word: self.special.end.clone(),
            unk_word: self.special.unk.clone(),
            entries: self
                .id_to_word
                .iter()
                .enumerate()
                .map(|(id, word)| (word.clone(), id as u32))
                .collect(),
        };

        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, &snapshot)?;
        writer.flush()?;
        info!(path = %path.display(), size = self.len(), "saved vocabulary");
        Ok(())
    }

    /// Load the cached vocabulary when the caller vouches for it, otherwise
    /// build it from the corpus and write the cache.
    pub fn load_or_build<C: CaptionCorpus + ?Sized>(
        settings: &VocabSettings,
        corpus: &C,
        tokenizer: &CaptionTokenizer,
    ) -> Result<Self> {
        if settings.vocab_file_exists && settings.vocab_file.exists() {
            return Self::load(&settings.vocab_file);
        }

        debug!(path = %settings.vocab_file.display(), "vocabulary cache not used, building");
        let vocab = Self::build(corpus, settings.threshold, tokenizer, settings.into());
        vocab.persist(&settings.vocab_file)?;
        Ok(vocab)
    }

    /// Id of `word`, or the unknown-word id if it is not in the vocabulary.
    pub fn lookup(&self, word: &str) -> u32 {
        self.word_to_id
            .get(word)
            .copied()
            .unwrap_or_else(|| self.unk_id())
    }

    pub fn contains(&self, word: &str) -> bool {
        self.word_to_id.contains_key(word)
    }

    /// Word for `id`, if assigned.
    pub fn word(&self, id: u32) -> Option<&str> {
        self.id_to_word.get(id as usize).map(String::as_str)
    }

    /// Number of distinct ids, reserved words included.
    pub fn len(&self) -> usize {
        self.id_to_word.len()
    }

    /// Always false: the reserved words are present in every vocabulary.
    pub fn is_empty(&self) -> bool {
        self.id_to_word.is_empty()
    }

    pub fn special_words(&self) -> &SpecialWords {
        &self.special
    }

    pub fn start_id(&self) -> u32 {
        self.word_to_id[&self.special.start]
    }

    pub fn end_id(&self) -> u32 {
        self.word_to_id[&self.special.end]
    }

    pub fn unk_id(&self) -> u32 {
        self.word_to_id[&self.special.unk]
    }

    /// Encode tokens as ids bracketed by the start and end ids.
    pub fn encode<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<u32> {
        let mut ids = Vec::with_capacity(tokens.len() + 2);
        ids.push(self.start_id());
        ids.extend(tokens.iter().map(|t| self.lookup(t.as_ref())));
        ids.push(self.end_id());
        ids
    }

    /// Map ids back to words; unassigned ids decode as the unknown word.
    pub fn decode(&self, ids: &[u32]) -> Vec<&str> {
        ids.iter()
            .map(|&id| self.word(id).unwrap_or(self.special.unk.as_str()))
            .collect()
    }

    /// Words in id order.
    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.id_to_word.iter().map(String::as_str)
    }
}
