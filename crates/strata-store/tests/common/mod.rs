//! Shared fixtures for the store integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use tempfile::TempDir;

use strata_common::config::StoreConfig;
use strata_common::error::StrataResult;
use strata_model::{Document, Layer, RowMapperRecord, Tagger};
use strata_store::{Collection, CollectionOptions, Storage};

/// A storage in a fresh temporary directory.
pub struct TestStore {
    pub dir: TempDir,
    pub storage: Storage,
}

impl TestStore {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path().join("store.db"), StoreConfig::for_testing()).unwrap();
        Self { dir, storage }
    }

    /// Opens a second connection to the same database file.
    pub fn reopen(&self, config: StoreConfig) -> Storage {
        Storage::open(self.dir.path().join("store.db"), config).unwrap()
    }
}

/// A `words` layer with one span per space-separated token.
pub fn words_layer(text: &str) -> Layer {
    let mut layer = Layer::builder("words").attributes(["normal"]).build().unwrap();
    let mut start = 0;
    for token in text.split(' ') {
        let end = start + token.len();
        if !token.is_empty() {
            layer
                .add_annotation((start, end), [("normal", json!(token.to_lowercase()))])
                .unwrap();
        }
        start = end + 1;
    }
    layer
}

/// A document with a `words` layer.
pub fn words_document(text: &str) -> Document {
    let mut document = Document::new(text);
    document.add_layer(words_layer(text)).unwrap();
    document
}

/// The six documents of the animal corpus.
pub const ANIMAL_TEXTS: [&str; 6] = [
    "a dog barks",
    "the cat sleeps",
    "nothing here",
    "dog and cat",
    "rain again",
    "big dog runs",
];

/// Creates a collection holding the animal corpus.
pub fn animal_collection<'s>(storage: &'s Storage, name: &str) -> Collection<'s> {
    let collection = storage.create_collection(name, CollectionOptions::new()).unwrap();
    collection
        .insert_documents(ANIMAL_TEXTS.iter().map(|text| words_document(text)))
        .unwrap();
    collection
}

/// Tags `dog` and `cat` tokens with their kind. Documents without animals
/// get an empty layer.
pub struct AnimalTagger {
    output: String,
    inputs: Vec<String>,
    only: Option<&'static str>,
}

impl AnimalTagger {
    pub fn new(output: &str) -> Self {
        Self {
            output: output.to_string(),
            inputs: vec!["words".to_string()],
            only: None,
        }
    }

    /// Tags only one kind.
    pub fn only(output: &str, kind: &'static str) -> Self {
        Self {
            only: Some(kind),
            ..Self::new(output)
        }
    }
}

impl Tagger for AnimalTagger {
    fn output_layer(&self) -> &str {
        &self.output
    }

    fn input_layers(&self) -> &[String] {
        &self.inputs
    }

    fn layer_template(&self) -> Layer {
        Layer::builder(&self.output).attributes(["kind"]).build().unwrap()
    }

    fn make_layer(&self, document: &Document) -> StrataResult<Layer> {
        let mut layer = self.layer_template();
        let words = document.layer("words").expect("input layer");
        for span in words.spans() {
            let token = span.text(document.text()).unwrap_or_default();
            if matches!(token, "dog" | "cat") && self.only.map_or(true, |kind| kind == token) {
                layer.add_annotation((span.start(), span.end()), [("kind", json!(token))])?;
            }
        }
        Ok(layer)
    }

    fn make_record(&self, document: &Document) -> StrataResult<RowMapperRecord> {
        let layer = self.make_layer(document)?;
        let count = json!(layer.len());
        Ok(RowMapperRecord::new(layer).with_meta("animals", count))
    }
}

/// Values of one attribute across a layer, in span order.
pub fn attribute_values(layer: &Layer, attribute: &str) -> Vec<Value> {
    layer.values(attribute).unwrap().into_iter().cloned().collect()
}
