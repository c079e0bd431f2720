//! Document ingestion tests.

mod common;

use serde_json::json;

use strata_common::error::ErrorCode;
use strata_common::types::{CollectionVersion, DocumentId, MetaSchema, MetaType};
use strata_model::{Document, Layer};
use strata_store::{CollectionOptions, DocumentRow, LayerOptions, StoreError};

use common::{words_document, TestStore};

#[test]
fn test_ids_assigned_after_largest_key() {
    let store = TestStore::new();
    let collection = store.storage.create_collection("corpus", CollectionOptions::new()).unwrap();

    let mut inserter = collection.insert().unwrap();
    assert_eq!(inserter.insert(words_document("first").into()).unwrap(), DocumentId::new(0));
    assert_eq!(
        inserter
            .insert(DocumentRow::new(words_document("keyed")).with_key(DocumentId::new(10)))
            .unwrap(),
        DocumentId::new(10)
    );
    assert_eq!(inserter.insert(words_document("after").into()).unwrap(), DocumentId::new(11));
    let summary = inserter.close().unwrap();
    assert_eq!(summary.inserted, 3);

    let summary = collection.insert_documents([words_document("later")]).unwrap();
    assert_eq!(summary.inserted, 1);
    assert!(collection.get(DocumentId::new(12)).unwrap().is_some());
}

#[test]
fn test_first_document_fixes_attached_layers() {
    let store = TestStore::new();
    let collection = store.storage.create_collection("corpus", CollectionOptions::new()).unwrap();
    collection.insert_documents([words_document("a dog")]).unwrap();

    let structure = collection.structure().unwrap();
    assert_eq!(structure.names(), vec!["words"]);

    let err = collection.insert_documents([Document::new("no layers")]).unwrap_err();
    assert_eq!(err.root_code(), ErrorCode::RowShapeMismatch);

    let mut other = Document::new("other shape");
    other
        .add_layer(Layer::builder("words").attributes(["lemma"]).build().unwrap())
        .unwrap();
    let err = collection.insert_documents([other]).unwrap_err();
    assert_eq!(err.root_code(), ErrorCode::RowShapeMismatch);
    assert_eq!(collection.len().unwrap(), 1);
}

#[test]
fn test_failure_reports_flushed_rows() {
    let store = TestStore::new();
    let collection = store.storage.create_collection("corpus", CollectionOptions::new()).unwrap();
    let mut documents: Vec<Document> = (0..5).map(|i| words_document(&format!("document {i}"))).collect();
    documents.push(Document::new("no layers"));

    let err = collection.insert_documents(documents).unwrap_err();
    match &err {
        StoreError::Ingestion {
            flushed,
            document_id,
            failed_batch,
            source,
        } => {
            assert_eq!(*failed_batch, None);
            assert_eq!(*flushed, 4);
            assert_eq!(*document_id, Some(DocumentId::new(5)));
            assert_eq!(source.code(), ErrorCode::RowShapeMismatch);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(collection.len().unwrap(), 4);
}

#[test]
fn test_duplicate_key_rolls_back_flush() {
    let store = TestStore::new();
    let collection = store.storage.create_collection("corpus", CollectionOptions::new()).unwrap();
    collection.insert_documents([words_document("zero"), words_document("one")]).unwrap();

    let err = collection
        .insert_documents([
            DocumentRow::new(words_document("two")).with_key(DocumentId::new(2)),
            DocumentRow::new(words_document("again")).with_key(DocumentId::new(1)),
        ])
        .unwrap_err();
    assert_eq!(err.root_code(), ErrorCode::DuplicateKey);
    assert_eq!(collection.len().unwrap(), 2);
}

#[test]
fn test_meta_columns_validated() {
    let store = TestStore::new();
    let meta = MetaSchema::new().with_column("year", MetaType::Int);
    let collection = store
        .storage
        .create_collection("corpus", CollectionOptions::new().meta(meta))
        .unwrap();

    let err = collection
        .insert_documents([DocumentRow::new(words_document("x")).with_meta("month", json!(3))])
        .unwrap_err();
    assert_eq!(err.root_code(), ErrorCode::InvalidArgument);

    let err = collection
        .insert_documents([DocumentRow::new(words_document("x")).with_meta("year", json!("soon"))])
        .unwrap_err();
    assert_eq!(err.root_code(), ErrorCode::InvalidArgument);

    collection
        .insert_documents([DocumentRow::new(words_document("x")).with_meta("year", json!(2024))])
        .unwrap();
    assert_eq!(collection.len().unwrap(), 1);
}

#[test]
fn test_no_insertion_after_detached_layer() {
    let store = TestStore::new();
    let collection = store.storage.create_collection("corpus", CollectionOptions::new()).unwrap();
    collection.insert_documents([words_document("a dog")]).unwrap();
    let template = Layer::builder("animals").attributes(["kind"]).build().unwrap();
    collection.add_layer(&template, &LayerOptions::new()).unwrap();

    let err = collection.insert().err().unwrap();
    assert_eq!(err.root_code(), ErrorCode::StructureConflict);
}

#[test]
fn test_relation_layers_dropped_before_v4() {
    let store = TestStore::new();
    let collection = store
        .storage
        .create_collection("corpus", CollectionOptions::new().version(CollectionVersion::V3))
        .unwrap();

    let mut document = words_document("a dog barks");
    let mut relations = Layer::builder("relations")
        .attributes(["kind"])
        .span_names(["subject", "verb"])
        .build()
        .unwrap();
    relations
        .add_relation(
            vec![("subject".to_string(), (2, 5).into()), ("verb".to_string(), (6, 11).into())],
            [("kind", json!("agent"))],
        )
        .unwrap();
    document.add_layer(relations).unwrap();

    let summary = collection.insert_documents([document]).unwrap();
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.dropped_relation_layers, 1);
    assert_eq!(collection.structure().unwrap().names(), vec!["words"]);
}

#[test]
fn test_scope_exit_flushes_pending_documents() {
    let store = TestStore::new();
    let collection = store.storage.create_collection("corpus", CollectionOptions::new()).unwrap();
    {
        let mut inserter = collection.insert().unwrap();
        inserter.insert(words_document("a dog").into()).unwrap();
        inserter.insert(words_document("a cat").into()).unwrap();
    }
    assert_eq!(collection.len().unwrap(), 2);
    assert_eq!(collection.structure().unwrap().names(), vec!["words"]);
}

#[test]
fn test_discard_drops_pending_documents() {
    let store = TestStore::new();
    let collection = store.storage.create_collection("corpus", CollectionOptions::new()).unwrap();
    let mut inserter = collection.insert().unwrap();
    inserter.insert(words_document("a dog").into()).unwrap();
    assert_eq!(inserter.discard(), 1);
    assert_eq!(collection.len().unwrap(), 0);
}

#[test]
fn test_largest_key_stops_auto_ids() {
    let store = TestStore::new();
    let collection = store.storage.create_collection("corpus", CollectionOptions::new()).unwrap();

    let mut inserter = collection.insert().unwrap();
    let id = inserter
        .insert(DocumentRow::new(words_document("last")).with_key(DocumentId::new(i64::MAX)))
        .unwrap();
    assert_eq!(id, DocumentId::new(i64::MAX));
    assert_eq!(inserter.next_id(), None);
    let err = inserter.insert(words_document("unkeyed").into()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    inserter.close().unwrap();

    let err = collection.insert_documents([words_document("unkeyed")]).unwrap_err();
    assert_eq!(err.root_code(), ErrorCode::InvalidArgument);
    collection
        .insert_documents([DocumentRow::new(words_document("keyed")).with_key(DocumentId::new(5))])
        .unwrap();
    assert_eq!(collection.len().unwrap(), 2);
}

#[test]
fn test_failed_flush_reports_batch_range() {
    let store = TestStore::new();
    let collection = store.storage.create_collection("corpus", CollectionOptions::new()).unwrap();
    collection.insert_documents([words_document("zero"), words_document("one")]).unwrap();

    let rows = [2, 3, 1, 4].map(|key| DocumentRow::new(words_document("again")).with_key(DocumentId::new(key)));
    let err = collection.insert_documents(rows).unwrap_err();
    assert_eq!(err.root_code(), ErrorCode::DuplicateKey);
    match &err {
        StoreError::Ingestion {
            flushed,
            document_id,
            failed_batch,
            ..
        } => {
            assert_eq!(*flushed, 0);
            assert_eq!(*document_id, Some(DocumentId::new(4)));
            assert_eq!(*failed_batch, Some((DocumentId::new(1), DocumentId::new(4))));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("failed batch of ids 1..=4"));
    assert_eq!(collection.len().unwrap(), 2);
}

#[test]
fn test_extend_copies_documents() {
    let store = TestStore::new();
    let meta = MetaSchema::new().with_column("year", MetaType::Int);
    let source = store
        .storage
        .create_collection("source", CollectionOptions::new().meta(meta.clone()))
        .unwrap();
    source
        .insert_documents(
            ["a dog barks", "the cat sleeps", "rain again"]
                .iter()
                .enumerate()
                .map(|(i, text)| DocumentRow::new(words_document(text)).with_meta("year", json!(2000 + i))),
        )
        .unwrap();
    source.hide_documents(&[DocumentId::new(1)]).unwrap();

    let target = store
        .storage
        .create_collection("target", CollectionOptions::new().meta(meta))
        .unwrap();
    let summary = target.extend(&source).unwrap();
    assert_eq!(summary.inserted, 3);
    assert_eq!(target.structure().unwrap().names(), vec!["words"]);
    assert_eq!(target.select().include_hidden(true).count().unwrap(), 3);
    assert_eq!(
        target.select().ids().unwrap(),
        vec![DocumentId::new(0), DocumentId::new(2)]
    );
    let copied = target
        .select()
        .query(strata_store::Query::keys([DocumentId::new(2)]))
        .collection_meta(["year"])
        .to_vec()
        .unwrap();
    assert_eq!(copied[0].document.text(), "rain again");
    assert_eq!(copied[0].meta["year"], json!(2002));

    let err = target.extend(&source).unwrap_err();
    assert_eq!(err.root_code(), ErrorCode::DuplicateKey);
    assert_eq!(target.select().include_hidden(true).count().unwrap(), 3);

    let err = target.extend(&target).unwrap_err();
    assert_eq!(err.root_code(), ErrorCode::InvalidArgument);
}

#[test]
fn test_extend_requires_matching_structure() {
    let store = TestStore::new();
    let source = store.storage.create_collection("source", CollectionOptions::new()).unwrap();
    source.insert_documents([words_document("a dog")]).unwrap();

    let dated = store
        .storage
        .create_collection(
            "dated",
            CollectionOptions::new().meta(MetaSchema::new().with_column("year", MetaType::Int)),
        )
        .unwrap();
    assert_eq!(dated.extend(&source).unwrap_err().root_code(), ErrorCode::StructureConflict);

    let plain = store.storage.create_collection("plain", CollectionOptions::new()).unwrap();
    plain.insert_documents([Document::new("no layers")]).unwrap();
    assert_eq!(plain.extend(&source).unwrap_err().root_code(), ErrorCode::StructureConflict);

    let template = Layer::builder("animals").attributes(["kind"]).build().unwrap();
    source.add_layer(&template, &LayerOptions::new()).unwrap();
    let empty = store.storage.create_collection("empty", CollectionOptions::new()).unwrap();
    assert_eq!(empty.extend(&source).unwrap_err().root_code(), ErrorCode::StructureConflict);
}
