//! COCO caption vocabulary tool
//!
//! Builds the vocabulary snapshot used by training, inspects an existing
//! snapshot, and dry-runs the length-bucketed batch sampler without
//! decoding any image.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use cococap_core::{
    CaptionTokenizer, CocoCaptions, CocoDataset, LengthBucketSampler, LoaderConfig, Mode,
    Preprocess, VocabSettings, Vocabulary,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "coco-vocab")]
#[command(about = "Build, inspect and dry-run COCO caption vocabularies")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Vocabulary snapshot file [default: vocabulary.json, or the config's for `sample`]
    #[arg(short, long, global = true, env = "COCO_VOCAB_FILE")]
    vocab_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Count caption tokens and write a fresh snapshot
    Build {
        /// COCO captions file
        #[arg(
            short,
            long,
            env = "COCO_ANNOTATIONS",
            default_value = "annotations/captions_train2017.json"
        )]
        annotations: PathBuf,

        /// Minimum occurrences for a token to be kept
        #[arg(short, long, default_value_t = cococap_core::config::DEFAULT_VOCAB_THRESHOLD)]
        threshold: usize,
    },
    /// Print snapshot statistics, or encode the given captions
    Inspect {
        /// Captions to tokenize and encode
        captions: Vec<String>,

        /// Also list the first N words by id
        #[arg(short, long, default_value_t = 0)]
        list: usize,
    },
    /// Draw batches from the length-bucketed sampler and print their indices
    Sample {
        /// JSON loader configuration; flags below override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// COCO captions file
        #[arg(short, long, env = "COCO_ANNOTATIONS")]
        annotations: Option<PathBuf>,

        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Number of batches to draw
        #[arg(short = 'n', long, default_value_t = 5)]
        batches: usize,

        #[arg(short, long)]
        seed: Option<u64>,

        /// The snapshot at the vocabulary file is fresh and can be reused
        #[arg(long)]
        vocab_file_exists: bool,
    },
}

/// Command-line values that replace those of the `sample` configuration.
#[derive(Debug, Default)]
struct SampleOverrides {
    annotations: Option<PathBuf>,
    batch_size: Option<usize>,
    seed: Option<u64>,
    vocab_file: Option<PathBuf>,
    vocab_file_exists: bool,
}

fn default_vocab_file() -> PathBuf {
    VocabSettings::default().vocab_file
}

/// Tokenize the captions file and write the snapshot, replacing any old one.
fn build_vocabulary(
    annotations: &Path,
    vocab_file: &Path,
    threshold: usize,
) -> Result<Vocabulary> {
    let corpus = CocoCaptions::from_file(annotations)
        .with_context(|| format!("Failed to load captions from {}", annotations.display()))?;
    let tokenizer = CaptionTokenizer::new()?;

    let settings = VocabSettings::new()
        .with_threshold(threshold)
        .with_vocab_file(vocab_file);
    settings.validate()?;

    let vocab = Vocabulary::build(&corpus, threshold, &tokenizer, (&settings).into());
    vocab
        .persist(vocab_file)
        .with_context(|| format!("Failed to write {}", vocab_file.display()))?;
    Ok(vocab)
}

/// Tokens and ids for one caption, as written by `inspect`.
fn encode_report(
    vocab: &Vocabulary,
    tokenizer: &CaptionTokenizer,
    caption: &str,
) -> serde_json::Value {
    let tokens = tokenizer.tokenize(caption);
    let ids = vocab.encode(tokens.as_slice());
    let unknown: Vec<&str> = tokens
        .iter()
        .filter(|t| !vocab.contains(t))
        .map(String::as_str)
        .collect();
    serde_json::json!({
        "caption": caption,
        "tokens": tokens,
        "ids": ids,
        "unknown": unknown,
    })
}

/// Resolve the loader configuration for `sample` from an optional file and
/// command-line overrides.
fn sample_config(config: Option<&Path>, overrides: SampleOverrides) -> Result<LoaderConfig> {
    let mut config = match config {
        Some(path) => LoaderConfig::from_file(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => LoaderConfig::for_mode(Mode::Train),
    };
    if config.mode != Mode::Train {
        bail!("Batch sampling needs a training configuration, got mode {}", config.mode);
    }
    if let Some(path) = overrides.annotations {
        config.annotations_file = path;
    }
    if let Some(n) = overrides.batch_size {
        config.batch_size = n;
    }
    if overrides.seed.is_some() {
        config.seed = overrides.seed;
    }
    if let Some(path) = overrides.vocab_file {
        config.vocab.vocab_file = path;
    }
    if overrides.vocab_file_exists {
        config.vocab.vocab_file_exists = true;
    }
    Ok(config)
}

/// Draw `count` batches; each entry is the shared caption length and the indices.
fn sample_batches(config: &LoaderConfig, count: usize) -> Result<Vec<(usize, Vec<usize>)>> {
    // Images are only decoded on item access, which never happens here.
    let dataset = CocoDataset::from_config(config, Arc::new(Preprocess::coco_train()))?;
    let lengths = dataset
        .caption_lengths()
        .context("Training dataset has no caption lengths")?;
    let mut sampler = LengthBucketSampler::new(lengths, config.batch_size, config.seed)?;

    Ok((0..count)
        .map(|_| {
            let batch = sampler.next_batch();
            (lengths[batch[0]], batch)
        })
        .collect())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            annotations,
            threshold,
        } => {
            let vocab_file = cli.vocab_file.unwrap_or_else(default_vocab_file);
            info!("Building vocabulary from {}...", annotations.display());
            let vocab = build_vocabulary(&annotations, &vocab_file, threshold)?;
            println!("Vocabulary size: {}", vocab.len());
            println!("Saved to {}", vocab_file.display());
        }
        Commands::Inspect { captions, list } => {
            let vocab_file = cli.vocab_file.unwrap_or_else(default_vocab_file);
            let vocab = Vocabulary::load(&vocab_file)
                .with_context(|| format!("Failed to load {}", vocab_file.display()))?;
            let special = vocab.special_words();
            println!("Vocabulary: {}", vocab_file.display());
            println!("  size:  {}", vocab.len());
            println!("  start: {} ({})", special.start, vocab.start_id());
            println!("  end:   {} ({})", special.end, vocab.end_id());
            println!("  unk:   {} ({})", special.unk, vocab.unk_id());

            for (id, word) in vocab.words().take(list).enumerate() {
                println!("{id:>8}  {word}");
            }

            let tokenizer = CaptionTokenizer::new()?;
            for caption in &captions {
                let report = encode_report(&vocab, &tokenizer, caption);
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
        Commands::Sample {
            config,
            annotations,
            batch_size,
            batches,
            seed,
            vocab_file_exists,
        } => {
            let overrides = SampleOverrides {
                annotations,
                batch_size,
                seed,
                vocab_file: cli.vocab_file,
                vocab_file_exists,
            };
            let config = sample_config(config.as_deref(), overrides)?;
            info!(
                annotations = %config.annotations_file.display(),
                batch_size = config.batch_size,
                "Sampling {} batches...",
                batches
            );
            let drawn = sample_batches(&config, batches)?;
            for (i, (length, indices)) in drawn.into_iter().enumerate() {
                println!("batch {i}: length {length}, indices {indices:?}");
            }
        }
    }

    Ok(())
}
