//! Benchmark utilities: synthetic corpora and a cheap tagger.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tempfile::TempDir;

use strata_common::config::StoreConfig;
use strata_common::error::{StrataError, StrataResult};
use strata_model::{Document, Layer, Tagger};
use strata_store::{Collection, CollectionOptions, Storage, StoreResult};

const VOCABULARY: [&str; 16] = [
    "river", "stone", "light", "forest", "dog", "cat", "window", "quiet",
    "north", "market", "bread", "winter", "paper", "green", "song", "road",
];

/// Generates `count` texts of `words` random vocabulary words each.
pub fn generate_texts(count: usize, words: usize) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|_| {
            let n = rng.gen_range(words / 2..=words).max(1);
            (0..n)
                .filter_map(|_| VOCABULARY.choose(&mut rng).copied())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

/// A `words` layer with one span per space-separated token.
pub fn words_layer(text: &str) -> StrataResult<Layer> {
    let mut layer = Layer::builder("words").attributes(["normal"]).build()?;
    let mut start = 0;
    for token in text.split(' ') {
        let end = start + token.len();
        if !token.is_empty() {
            layer.add_annotation((start, end), [("normal", json!(token))])?;
        }
        start = end + 1;
    }
    Ok(layer)
}

/// Builds documents carrying an attached `words` layer.
pub fn generate_documents(count: usize, words: usize) -> StrataResult<Vec<Document>> {
    generate_texts(count, words)
        .into_iter()
        .map(|text| {
            let layer = words_layer(&text)?;
            let mut document = Document::new(text);
            document.add_layer(layer)?;
            Ok(document)
        })
        .collect()
}

/// A store in a temporary directory, removed on drop.
pub struct BenchStore {
    /// Keeps the directory alive.
    pub dir: TempDir,
    /// The opened storage.
    pub storage: Storage,
}

impl BenchStore {
    /// Opens a fresh store with a large insert buffer.
    pub fn new() -> StoreResult<Self> {
        let dir = TempDir::new().map_err(|e| StrataError::internal(format!("temporary directory: {e}")))?;
        let mut config = StoreConfig::default();
        config.insert.buffer_size = 1_000;
        let storage = Storage::open(dir.path().join("bench.db"), config)?;
        Ok(Self { dir, storage })
    }

    /// Creates collection `name` filled with `documents`.
    pub fn collection(&self, name: &str, documents: &[Document]) -> StoreResult<Collection<'_>> {
        let collection = self.storage.create_collection(name, CollectionOptions::new())?;
        collection.insert_documents(documents.iter().cloned())?;
        Ok(collection)
    }
}

/// Marks `dog` and `cat` tokens of the `words` layer.
pub struct AnimalTagger {
    inputs: Vec<String>,
    template: Layer,
}

impl AnimalTagger {
    /// Creates the tagger producing layer `animals`.
    pub fn new() -> StrataResult<Self> {
        Ok(Self {
            inputs: vec!["words".to_string()],
            template: Layer::builder("animals").attributes(["kind"]).build()?,
        })
    }
}

impl Tagger for AnimalTagger {
    fn output_layer(&self) -> &str {
        "animals"
    }

    fn input_layers(&self) -> &[String] {
        &self.inputs
    }

    fn layer_template(&self) -> Layer {
        self.template.clone()
    }

    fn make_layer(&self, document: &Document) -> StrataResult<Layer> {
        let mut layer = self.layer_template();
        if let Some(words) = document.layer("words") {
            for span in words.spans() {
                let token = span.text(document.text()).unwrap_or_default();
                if matches!(token, "dog" | "cat") {
                    layer.add_annotation((span.start(), span.end()), [("kind", json!(token))])?;
                }
            }
        }
        Ok(layer)
    }
}
