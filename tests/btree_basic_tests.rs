//! Scenario 3: single-threaded B-tree correctness through the `Database`
//! façade — insert, read-your-own-write inside a transaction, commit
//! visibility, and delete-then-miss.

use std::sync::Arc;

use latchtree::page_array::MemPageArray;
use latchtree::{Config, Database};

fn open_db() -> Arc<Database> {
    let page_array = Arc::new(MemPageArray::new(4096));
    Database::open(Config::default(), page_array).unwrap()
}

#[test]
fn single_threaded_insert_and_lookup_across_many_keys() {
    let db = open_db();
    let idx = db.open_index("widgets").unwrap();

    let mut txn = db.begin().unwrap();
    for i in 0..500u32 {
        let key = format!("w-{i:06}").into_bytes();
        txn.insert(idx, key, i.to_be_bytes().to_vec()).unwrap();
    }
    txn.commit().unwrap();

    for i in 0..500u32 {
        let key = format!("w-{i:06}").into_bytes();
        let value = db.get(idx, &key).unwrap().unwrap();
        assert_eq!(value, i.to_be_bytes());
    }
    assert!(db.get(idx, b"missing").unwrap().is_none());
}

#[test]
fn reads_inside_a_transaction_see_its_own_uncommitted_writes() {
    let db = open_db();
    let idx = db.open_index("widgets").unwrap();

    let mut txn = db.begin().unwrap();
    txn.insert(idx, b"a".to_vec(), b"1".to_vec()).unwrap();
    assert_eq!(txn.get(idx, b"a").unwrap(), Some(b"1".to_vec()));
    txn.commit().unwrap();
}

#[test]
fn overwriting_a_key_replaces_its_value() {
    let db = open_db();
    let idx = db.open_index("widgets").unwrap();

    let mut txn = db.begin().unwrap();
    txn.insert(idx, b"k".to_vec(), b"first".to_vec()).unwrap();
    txn.insert(idx, b"k".to_vec(), b"second".to_vec()).unwrap();
    txn.commit().unwrap();

    assert_eq!(db.get(idx, b"k").unwrap().unwrap(), b"second");
}

#[test]
fn delete_removes_visibility_of_a_committed_key() {
    let db = open_db();
    let idx = db.open_index("widgets").unwrap();

    let mut txn = db.begin().unwrap();
    txn.insert(idx, b"k".to_vec(), b"v".to_vec()).unwrap();
    txn.commit().unwrap();
    assert!(db.get(idx, b"k").unwrap().is_some());

    let mut txn = db.begin().unwrap();
    assert!(txn.delete(idx, b"k").unwrap());
    txn.commit().unwrap();
    assert!(db.get(idx, b"k").unwrap().is_none());
}

#[test]
fn two_named_indexes_keep_independent_keyspaces() {
    let db = open_db();
    let widgets = db.open_index("widgets").unwrap();
    let gadgets = db.open_index("gadgets").unwrap();
    assert_ne!(widgets, gadgets);

    let mut txn = db.begin().unwrap();
    txn.insert(widgets, b"k".to_vec(), b"from-widgets".to_vec()).unwrap();
    txn.insert(gadgets, b"k".to_vec(), b"from-gadgets".to_vec()).unwrap();
    txn.commit().unwrap();

    assert_eq!(db.get(widgets, b"k").unwrap().unwrap(), b"from-widgets");
    assert_eq!(db.get(gadgets, b"k").unwrap().unwrap(), b"from-gadgets");
}

#[test]
fn opening_the_same_index_name_twice_returns_the_same_id() {
    let db = open_db();
    let first = db.open_index("widgets").unwrap();
    let second = db.open_index("widgets").unwrap();
    assert_eq!(first, second);
}
