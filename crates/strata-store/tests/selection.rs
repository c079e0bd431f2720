//! Selection, query and export tests.

mod common;

use serde_json::json;

use strata_common::config::StoreConfig;
use strata_common::error::ErrorCode;
use strata_common::types::{DocumentId, MetaSchema, MetaType};
use strata_store::{CollectionOptions, DocumentRow, ExportMode, ExportOptions, Query};

use common::{animal_collection, words_document, TestStore};

fn ids(values: &[i64]) -> Vec<DocumentId> {
    values.iter().copied().map(DocumentId::new).collect()
}

fn word(normal: &str) -> Query {
    Query::layer_attribute("words", [("normal", json!(normal))])
}

#[test]
fn test_attribute_queries() {
    let store = TestStore::new();
    let collection = animal_collection(&store.storage, "corpus");

    assert_eq!(collection.select().query(word("dog")).ids().unwrap(), ids(&[0, 3, 5]));
    assert_eq!(collection.select().query(word("cat") | word("rain")).ids().unwrap(), ids(&[1, 3, 4]));
    assert_eq!(collection.select().query(word("dog") & word("cat")).ids().unwrap(), ids(&[3]));
    assert_eq!(
        collection
            .select()
            .query(word("dog") | word("cat"))
            .query(Query::slice(Some(1), Some(4)))
            .ids()
            .unwrap(),
        ids(&[1, 3])
    );
    assert_eq!(collection.select().query(word("zebra")).count().unwrap(), 0);
}

#[test]
fn test_key_slice_and_substring() {
    let store = TestStore::new();
    let collection = animal_collection(&store.storage, "corpus");

    assert_eq!(collection.select().query(Query::keys([4_i64, 1])).ids().unwrap(), ids(&[1, 4]));
    assert_eq!(collection.select().query(Query::slice(Some(2), Some(4))).ids().unwrap(), ids(&[2, 3]));
    assert_eq!(collection.select().query(Query::slice(None, Some(1))).ids().unwrap(), ids(&[0]));
    assert_eq!(collection.select().query(Query::substring("sleeps")).ids().unwrap(), ids(&[1]));
}

#[test]
fn test_skip_limit_and_chunking() {
    let store = TestStore::new();
    let collection = animal_collection(&store.storage, "corpus");

    let page = collection.select().skip(1).limit(4).itersize(2);
    assert_eq!(page.ids().unwrap(), ids(&[1, 2, 3, 4]));
    let documents: Vec<DocumentId> = page.iter().unwrap().map(|d| d.unwrap().id).collect();
    assert_eq!(documents, ids(&[1, 2, 3, 4]));
    assert_eq!(page.count().unwrap(), 4);

    let all = collection.select().itersize(1).to_vec().unwrap();
    assert_eq!(all.len(), 6);
    assert_eq!(all[2].document.text(), "nothing here");
    assert!(all[2].document.layer("words").is_some());
}

#[test]
fn test_get_document() {
    let store = TestStore::new();
    let collection = animal_collection(&store.storage, "corpus");

    let document = collection.get(DocumentId::new(1)).unwrap().unwrap();
    assert_eq!(document.text(), "the cat sleeps");
    assert_eq!(document.layer("words").unwrap().len(), 3);
    assert!(collection.get(DocumentId::new(42)).unwrap().is_none());
}

#[test]
fn test_hidden_documents() {
    let store = TestStore::new();
    let collection = animal_collection(&store.storage, "corpus");

    assert_eq!(collection.hide_documents(&ids(&[0, 1])).unwrap(), 2);
    assert_eq!(collection.select().count().unwrap(), 4);
    assert_eq!(collection.select().include_hidden(true).count().unwrap(), 6);
    assert!(collection.get(DocumentId::new(0)).unwrap().is_some());
    assert_eq!(collection.len().unwrap(), 6);

    collection.unhide_documents(&ids(&[0])).unwrap();
    assert_eq!(collection.select().ids().unwrap(), ids(&[0, 2, 3, 4, 5]));
}

#[test]
fn test_metadata_queries() {
    let store = TestStore::new();
    let meta = MetaSchema::new()
        .with_column("year", MetaType::Int)
        .with_column("source", MetaType::Str);
    let collection = store
        .storage
        .create_collection("news", CollectionOptions::new().meta(meta))
        .unwrap();
    let rows = [
        ("first story", 2019, "web"),
        ("second story", 2020, "paper"),
        ("third story", 2021, "web"),
    ]
    .into_iter()
    .map(|(text, year, source)| {
        DocumentRow::new(words_document(text).with_meta("lang", json!("en")))
            .with_meta("year", json!(year))
            .with_meta("source", json!(source))
    });
    collection.insert_documents(rows).unwrap();

    let selected = collection
        .select()
        .query(Query::metadata("year", [json!(2019), json!(2021)]))
        .collection_meta(["source"])
        .to_vec()
        .unwrap();
    assert_eq!(selected.len(), 2);
    assert_eq!(selected[0].meta["source"], json!("web"));
    assert_eq!(selected[1].document.text(), "third story");

    let by_text_meta = collection
        .select()
        .query(Query::text_metadata("lang", [json!("en")]))
        .count()
        .unwrap();
    assert_eq!(by_text_meta, 3);

    let err = collection.select().collection_meta(["missing"]).ids().unwrap_err();
    assert_eq!(err.root_code(), ErrorCode::InvalidArgument);
}

#[test]
fn test_delete_documents() {
    let store = TestStore::new();
    let collection = animal_collection(&store.storage, "corpus");
    assert_eq!(collection.delete_documents(&ids(&[2, 4])).unwrap(), 2);
    assert_eq!(collection.select().ids().unwrap(), ids(&[0, 1, 3, 5]));
}

#[test]
fn test_export_layer() {
    let store = TestStore::new();
    let meta = MetaSchema::new().with_column("year", MetaType::Int);
    let collection = store
        .storage
        .create_collection("corpus", CollectionOptions::new().meta(meta))
        .unwrap();
    collection
        .insert_documents(
            ["a dog barks", "the cat sleeps"]
                .into_iter()
                .map(|text| DocumentRow::new(words_document(text)).with_meta("year", json!(2020))),
        )
        .unwrap();

    let options = ExportOptions {
        collection_meta: vec!["year".to_string()],
        ..ExportOptions::default()
    };
    assert_eq!(collection.export_layer("words", options.clone()).unwrap(), 6);

    let conn = store.storage.connection();
    let (rows, years): (i64, i64) = conn
        .query_row(
            "SELECT COUNT(*), SUM(year) FROM \"corpus__words__export\" WHERE normal IS NOT NULL",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(rows, 6);
    assert_eq!(years, 6 * 2020);

    let err = collection.export_layer("words", options.clone()).unwrap_err();
    assert_eq!(err.root_code(), ErrorCode::StructureConflict);

    let appended = collection
        .export_layer(
            "words",
            ExportOptions {
                mode: ExportMode::Append,
                query: Some(Query::keys([1_i64])),
                ..options
            },
        )
        .unwrap();
    assert_eq!(appended, 3);
    let total: i64 = conn
        .query_row("SELECT COUNT(*) FROM \"corpus__words__export\"", [], |row| row.get(0))
        .unwrap();
    assert_eq!(total, 9);
}

#[test]
fn test_temporary_collections() {
    let store = TestStore::new();
    let temp = store
        .storage
        .create_collection("scratch", CollectionOptions::new().temporary(true))
        .unwrap();
    temp.insert_documents([words_document("a dog barks")]).unwrap();
    assert!(temp.info().temporary);
    assert_eq!(temp.select().query(word("dog")).count().unwrap(), 1);
    assert!(store.storage.has_collection("scratch").unwrap());

    let other = store.reopen(StoreConfig::for_testing());
    assert!(!other.has_collection("scratch").unwrap());

    store.storage.delete_collection("scratch").unwrap();
    assert!(!store.storage.has_collection("scratch").unwrap());
}

#[test]
fn test_collection_registry() {
    let store = TestStore::new();
    animal_collection(&store.storage, "first");
    animal_collection(&store.storage, "second");

    let names: Vec<String> = store.storage.collections().unwrap().into_iter().map(|c| c.name).collect();
    assert_eq!(names, vec!["first".to_string(), "second".to_string()]);

    let err = store
        .storage
        .create_collection("first", CollectionOptions::new())
        .unwrap_err();
    assert_eq!(err.root_code(), ErrorCode::CollectionExists);

    store.storage.delete_collection("first").unwrap();
    let err = store.storage.collection("first").unwrap_err();
    assert_eq!(err.root_code(), ErrorCode::CollectionNotFound);
}

#[test]
fn test_sample_is_repeatable_subset() {
    let store = TestStore::new();
    let collection = store.storage.create_collection("sampled", CollectionOptions::new()).unwrap();
    collection
        .insert_documents((0..400).map(|i| words_document(if i % 2 == 0 { "a dog" } else { "a cat" })))
        .unwrap();

    let sample = collection.select().sample(25.0, 7).ids().unwrap();
    assert_eq!(collection.select().sample(25.0, 7).ids().unwrap(), sample);
    assert_eq!(collection.select().sample(25.0, 7).count().unwrap(), sample.len() as u64);
    assert!((50..=150).contains(&sample.len()), "sampled {} of 400", sample.len());
    assert_ne!(collection.select().sample(25.0, 8).ids().unwrap(), sample);

    let iterated: Vec<DocumentId> = collection
        .select()
        .sample(25.0, 7)
        .itersize(7)
        .iter()
        .unwrap()
        .map(|selected| selected.unwrap().id)
        .collect();
    assert_eq!(iterated, sample);

    let dogs = collection.select().query(word("dog")).sample(25.0, 7).ids().unwrap();
    let expected: Vec<DocumentId> = sample.iter().copied().filter(|id| id.as_i64() % 2 == 0).collect();
    assert_eq!(dogs, expected);

    assert_eq!(collection.select().sample(0.0, 7).count().unwrap(), 0);
    assert_eq!(collection.select().sample(100.0, 7).count().unwrap(), 400);
    let err = collection.select().sample(150.0, 7).count().unwrap_err();
    assert_eq!(err.root_code(), ErrorCode::InvalidArgument);
}
