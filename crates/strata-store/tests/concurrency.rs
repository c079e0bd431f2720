//! Concurrent writers on one database file.

mod common;

use std::thread;
use std::time::Duration;

use strata_common::config::StoreConfig;
use strata_common::error::ErrorCode;
use strata_common::types::Block;
use strata_model::Tagger;
use strata_store::{CreateMode, LayerOptions, StoreResult, WriteLock};

use common::{animal_collection, AnimalTagger, TestStore};

fn retry<T>(mut operation: impl FnMut() -> StoreResult<T>) -> StoreResult<T> {
    let mut attempts = 0;
    loop {
        match operation() {
            Err(err) if err.is_retryable() && attempts < 20 => {
                attempts += 1;
                thread::sleep(Duration::from_millis(25));
            }
            result => return result,
        }
    }
}

#[test]
fn test_held_write_lock_is_retryable() {
    let store = TestStore::new();
    animal_collection(&store.storage, "corpus");
    let other = store.reopen(StoreConfig::for_testing().with_busy_timeout(Duration::from_millis(50)));
    let collection = other.collection("corpus").unwrap();
    let template = AnimalTagger::new("animals").layer_template();

    let lock = WriteLock::acquire(store.storage.connection()).unwrap();
    let err = collection.add_layer(&template, &LayerOptions::new()).unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.root_code(), ErrorCode::ConcurrentModification);
    assert!(!collection.has_layer("animals").unwrap());

    lock.rollback().unwrap();
    collection.add_layer(&template, &LayerOptions::new()).unwrap();
    assert!(collection.has_layer("animals").unwrap());
}

#[test]
fn test_parallel_blocks() {
    let store = TestStore::new();
    animal_collection(&store.storage, "corpus");
    let path = store.dir.path().join("store.db");

    let workers: Vec<_> = Block::partition(3)
        .unwrap()
        .into_iter()
        .map(|block| {
            let path = path.clone();
            thread::spawn(move || {
                let config = StoreConfig::for_testing().with_busy_timeout(Duration::from_secs(5));
                let storage = strata_store::Storage::open(&path, config).unwrap();
                let collection = storage.collection("corpus").unwrap();
                let tagger = AnimalTagger::new("animals");
                let options = LayerOptions::new().mode(CreateMode::Append);
                retry(|| collection.create_layer_block(&tagger, block, &options)).unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let collection = store.storage.collection("corpus").unwrap();
    assert_eq!(collection.layer_meta("animals").unwrap().len(), 6);
    assert_eq!(collection.structure().unwrap().names(), vec!["words", "animals"]);
}
