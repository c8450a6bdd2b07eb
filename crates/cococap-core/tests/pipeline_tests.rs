// End-to-end: annotation files and images on disk → vocabulary cache →
// dataset → loader, in both modes.

use std::path::Path;
use std::sync::Arc;

use cococap_core::{
    CocoDataset, CocoError, Crop, Loader, LoaderConfig, Mode, Preprocess, VocabSettings,
    Vocabulary,
};
use image::{Rgb, RgbImage};

fn write_png(dir: &Path, name: &str, w: u32, h: u32, shade: u8) {
    RgbImage::from_pixel(w, h, Rgb([shade, shade / 2, 255 - shade]))
        .save(dir.join(name))
        .unwrap();
}

fn write_train_split(root: &Path) {
    let images = root.join("train2017");
    std::fs::create_dir_all(&images).unwrap();
    write_png(&images, "000000000009.png", 40, 30, 10);
    write_png(&images, "000000000025.png", 30, 50, 200);
    write_png(&images, "000000000030.png", 64, 64, 90);

    std::fs::write(
        root.join("captions_train.json"),
        r#"{
            "images": [
                {"id": 9, "file_name": "000000000009.png"},
                {"id": 25, "file_name": "000000000025.png"},
                {"id": 30, "file_name": "000000000030.png"}
            ],
            "annotations": [
                {"id": 1, "image_id": 9, "caption": "A plate of food."},
                {"id": 2, "image_id": 9, "caption": "A plate with rice."},
                {"id": 3, "image_id": 25, "caption": "A giraffe near a tree."},
                {"id": 4, "image_id": 25, "caption": "A tall giraffe."},
                {"id": 5, "image_id": 30, "caption": "A vase of flowers."},
                {"id": 6, "image_id": 30, "caption": "Flowers in a vase on a table."}
            ]
        }"#,
    )
    .unwrap();
}

fn write_test_split(root: &Path) {
    let images = root.join("test2017");
    std::fs::create_dir_all(&images).unwrap();
    write_png(&images, "000000000001.png", 20, 20, 1);
    write_png(&images, "000000000002.png", 25, 18, 2);

    std::fs::write(
        root.join("image_info_test.json"),
        r#"{"images": [
            {"id": 1, "file_name": "000000000001.png"},
            {"id": 2, "file_name": "000000000002.png"}
        ]}"#,
    )
    .unwrap();
}

fn small_preprocess() -> Arc<Preprocess> {
    Arc::new(
        Preprocess::new()
            .resize_shorter(20)
            .crop(Crop::Random(16))
            .horizontal_flip(0.5)
            .seed(3),
    )
}

fn train_config(root: &Path) -> LoaderConfig {
    LoaderConfig::for_mode(Mode::Train)
        .with_images_dir(root.join("train2017"))
        .with_annotations_file(root.join("captions_train.json"))
        .with_batch_size(4)
        .with_num_workers(2)
        .with_seed(17)
        .with_vocab(
            VocabSettings::new()
                .with_threshold(2)
                .with_vocab_file(root.join("cache").join("vocab.json")),
        )
}

#[test]
fn train_pipeline_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    write_train_split(dir.path());
    let config = train_config(dir.path());

    let batches = Loader::from_config(&config, small_preprocess())
        .unwrap()
        .into_train()
        .unwrap();

    for batch in batches.take(12) {
        let batch = batch.unwrap();
        assert_eq!(batch.images.dims(), &[4, 3, 16, 16]);
        let rows = batch.captions.to_vec2::<u32>().unwrap();
        assert_eq!(rows.len(), 4);
        let len = rows[0].len();
        assert!(rows.iter().all(|r| r.len() == len && r[0] == 0 && r[len - 1] == 1));
    }

    // "a", "plate", "of", ".", "giraffe", "vase", "flowers" occur at least twice.
    let vocab = Vocabulary::load(&config.vocab.vocab_file).unwrap();
    assert_eq!(vocab.len(), 3 + 7);
    assert_eq!(vocab.lookup("rice"), vocab.unk_id());
}

#[test]
fn cached_vocabulary_is_reused() {
    let dir = tempfile::tempdir().unwrap();
    write_train_split(dir.path());
    let config = train_config(dir.path());

    let first = CocoDataset::from_config(&config, small_preprocess()).unwrap();

    let mut cached = config.clone();
    cached.vocab.vocab_file_exists = true;
    cached.vocab.threshold = 1;
    let second = CocoDataset::from_config(&cached, small_preprocess()).unwrap();

    // The threshold change is ignored because the snapshot was loaded.
    assert_eq!(first.vocabulary(), second.vocabulary());
}

#[test]
fn corrupt_cache_surfaces() {
    let dir = tempfile::tempdir().unwrap();
    write_train_split(dir.path());
    let mut config = train_config(dir.path());
    std::fs::create_dir_all(dir.path().join("cache")).unwrap();
    std::fs::write(&config.vocab.vocab_file, "not json").unwrap();
    config.vocab.vocab_file_exists = true;

    let err = CocoDataset::from_config(&config, small_preprocess()).err().unwrap();
    assert!(matches!(err, CocoError::CorruptCache { .. }));
}

#[test]
fn evaluate_pipeline_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    write_train_split(dir.path());
    write_test_split(dir.path());

    // Evaluation reuses the vocabulary built from the training split.
    let train = train_config(dir.path());
    CocoDataset::from_config(&train, small_preprocess()).unwrap();

    let config = LoaderConfig::for_mode(Mode::Evaluate)
        .with_images_dir(dir.path().join("test2017"))
        .with_annotations_file(dir.path().join("image_info_test.json"))
        .with_vocab(train.vocab.clone().with_vocab_file_exists(true));

    let samples = Loader::from_config(&config, small_preprocess())
        .unwrap()
        .into_evaluate()
        .unwrap();

    let mut seen: Vec<_> = samples
        .map(|s| {
            let s = s.unwrap();
            assert_eq!(s.image.dims(), &[1, 3, 16, 16]);
            (s.index, s.original.dimensions())
        })
        .collect();
    seen.sort();
    assert_eq!(seen, [(0, (20, 20)), (1, (25, 18))]);
}

#[test]
fn evaluate_with_batch_size_two_fails_before_io() {
    let dir = tempfile::tempdir().unwrap();
    let vocab_file = dir.path().join("vocab.json");
    std::fs::write(&vocab_file, "{}").unwrap();

    // Neither the annotations file nor the image folder exists.
    let config = LoaderConfig::for_mode(Mode::Evaluate)
        .with_images_dir(dir.path().join("missing-images"))
        .with_annotations_file(dir.path().join("missing.json"))
        .with_batch_size(2)
        .with_vocab(
            VocabSettings::new()
                .with_vocab_file(&vocab_file)
                .with_vocab_file_exists(true),
        );

    let err = Loader::from_config(&config, small_preprocess()).err().unwrap();
    assert!(matches!(err, CocoError::InvalidConfiguration(_)));
}
