//! Scenario 4: forcing splits with a small page size, then forcing merges
//! back down by deleting most of what was inserted, while keeping every
//! surviving key searchable throughout.

use std::sync::Arc;

use latchtree::page_array::MemPageArray;
use latchtree::{Config, Database};

fn open_db(page_size: u32) -> Arc<Database> {
    let page_array = Arc::new(MemPageArray::new(page_size));
    Database::open(Config::default().with_page_size(page_size), page_array).unwrap()
}

#[test]
fn small_pages_force_repeated_splits_and_all_keys_stay_searchable() {
    let db = open_db(512);
    let idx = db.open_index("widgets").unwrap();

    let mut txn = db.begin().unwrap();
    for i in 0..400u32 {
        let key = format!("key-{i:05}").into_bytes();
        txn.insert(idx, key, vec![i as u8; 24]).unwrap();
    }
    txn.commit().unwrap();

    for i in 0..400u32 {
        let key = format!("key-{i:05}").into_bytes();
        let got = db.get(idx, &key).unwrap();
        assert_eq!(got, Some(vec![i as u8; 24]), "missing key {i}");
    }
}

#[test]
fn deleting_most_keys_after_many_splits_leaves_the_rest_intact() {
    let db = open_db(512);
    let idx = db.open_index("widgets").unwrap();

    let mut txn = db.begin().unwrap();
    for i in 0..400u32 {
        let key = format!("key-{i:05}").into_bytes();
        txn.insert(idx, key, vec![i as u8; 24]).unwrap();
    }
    txn.commit().unwrap();

    let mut txn = db.begin().unwrap();
    for i in 0..400u32 {
        if i % 10 != 0 {
            let key = format!("key-{i:05}").into_bytes();
            assert!(txn.delete(idx, &key).unwrap());
        }
    }
    txn.commit().unwrap();

    for i in 0..400u32 {
        let key = format!("key-{i:05}").into_bytes();
        let got = db.get(idx, &key).unwrap();
        if i % 10 == 0 {
            assert_eq!(got, Some(vec![i as u8; 24]), "survivor {i} went missing");
        } else {
            assert!(got.is_none(), "deleted key {i} is still visible");
        }
    }
}

#[test]
fn reinserting_after_a_bulk_delete_still_finds_every_key() {
    let db = open_db(512);
    let idx = db.open_index("widgets").unwrap();

    let mut txn = db.begin().unwrap();
    for i in 0..200u32 {
        let key = format!("key-{i:05}").into_bytes();
        txn.insert(idx, key, vec![1u8; 16]).unwrap();
    }
    txn.commit().unwrap();

    let mut txn = db.begin().unwrap();
    for i in 0..200u32 {
        let key = format!("key-{i:05}").into_bytes();
        txn.delete(idx, &key).unwrap();
    }
    txn.commit().unwrap();

    let mut txn = db.begin().unwrap();
    for i in 0..200u32 {
        let key = format!("key-{i:05}").into_bytes();
        txn.insert(idx, key, vec![2u8; 16]).unwrap();
    }
    txn.commit().unwrap();

    for i in 0..200u32 {
        let key = format!("key-{i:05}").into_bytes();
        assert_eq!(db.get(idx, &key).unwrap(), Some(vec![2u8; 16]));
    }
}
