//! Transaction, diff and event tests against the in-memory backend.

use geostore::{
    AttributeType, DataStore, DataStoreConfig, Feature, FeatureEventKind, FeatureId, FeatureLock,
    FeatureType, Filter, MemoryDataStore, Query, StoreError, Transaction, Value,
};
use std::sync::Arc;
use std::time::Duration;

fn parcels_type() -> FeatureType {
    FeatureType::builder("parcels")
        .attribute("name", AttributeType::Text)
        .attribute("area", AttributeType::Float)
        .geometry("geom")
        .build()
        .unwrap()
}

/// Route store logs to the test output; later calls are no-ops.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn test_store() -> (Arc<MemoryDataStore>, DataStore) {
    let backend = Arc::new(MemoryDataStore::new());
    let store = DataStore::new(backend.clone(), DataStoreConfig::default());
    store.create_schema(&parcels_type()).unwrap();
    (backend, store)
}

fn parcel(store: &DataStore, id: &str, name: &str, area: f64) -> Feature {
    let mut f = Feature::new(store.schema("parcels").unwrap(), id);
    f.set_value("name", name).unwrap();
    f.set_value("area", area).unwrap();
    f
}

fn names(features: &[Feature]) -> Vec<String> {
    features
        .iter()
        .map(|f| f.value("name").and_then(Value::as_str).unwrap_or("").to_string())
        .collect()
}

fn count(store: &DataStore, tx: &Transaction) -> usize {
    store
        .feature_source_in("parcels", tx)
        .unwrap()
        .count(&Query::all())
        .unwrap()
        .unwrap()
}

// --- Commit Scenarios ---

#[test]
fn test_adds_commit_in_insertion_order() {
    let (_, store) = test_store();
    let before = count(&store, &Transaction::auto_commit());

    let tx = Transaction::new();
    let fs = store.feature_store("parcels", &tx).unwrap();
    let handle = fs.subscribe(64);

    let temp_ids = fs
        .add_features(&[
            parcel(&store, "f1", "first", 1.0),
            parcel(&store, "f2", "second", 2.0),
            parcel(&store, "f3", "third", 3.0),
        ])
        .unwrap();
    assert!(temp_ids.iter().all(|id| id.as_str().starts_with("new")));

    // Pending adds are visible to the transaction only.
    assert_eq!(count(&store, &tx), before + 3);
    assert_eq!(count(&store, &Transaction::auto_commit()), before);
    let pending: Vec<_> = handle.drain().into_iter().map(|e| e.kind).collect();
    assert_eq!(pending, vec![FeatureEventKind::Added; 3]);

    tx.commit().unwrap();

    let events = handle.drain();
    let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            FeatureEventKind::Added,
            FeatureEventKind::Added,
            FeatureEventKind::Added,
            FeatureEventKind::Commit
        ]
    );
    let committed: Vec<FeatureId> = events[..3].iter().map(|e| e.fids[0].clone()).collect();
    assert_eq!(
        committed,
        vec![
            FeatureId::from("parcels.1"),
            FeatureId::from("parcels.2"),
            FeatureId::from("parcels.3")
        ]
    );
    assert_eq!(events[3].fids, committed);

    let stored = store
        .feature_source("parcels")
        .unwrap()
        .all_features()
        .to_vec()
        .unwrap();
    assert_eq!(names(&stored), vec!["first", "second", "third"]);
    assert_eq!(count(&store, &Transaction::auto_commit()), before + 3);
    tx.close();
}

#[test]
fn test_modify_then_remove_is_single_removal() {
    let (_, store) = test_store();
    let auto = store.feature_store("parcels", &Transaction::auto_commit()).unwrap();
    let ids = auto
        .add_features(&[parcel(&store, "x", "keep", 1.0), parcel(&store, "y", "doomed", 2.0)])
        .unwrap();
    let doomed = ids[1].clone();

    let tx = Transaction::new();
    let fs = store.feature_store("parcels", &tx).unwrap();
    fs.modify_features(&["area"], &[Value::Float(99.0)], Filter::fid(doomed.clone()))
        .unwrap();
    fs.remove_features(Filter::fid(doomed.clone())).unwrap();

    let handle = fs.subscribe(16);
    tx.commit().unwrap();

    let events = handle.drain();
    let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![FeatureEventKind::Removed, FeatureEventKind::Commit]);
    assert_eq!(events[0].fids, vec![doomed]);

    let stored = auto.all_features().to_vec().unwrap();
    assert_eq!(names(&stored), vec!["keep"]);
    tx.close();
}

#[test]
fn test_updates_visible_in_transaction_only() {
    let (_, store) = test_store();
    let auto = store.feature_store("parcels", &Transaction::auto_commit()).unwrap();
    auto.add_features(&[parcel(&store, "a", "small", 1.0), parcel(&store, "b", "large", 50.0)])
        .unwrap();

    let tx = Transaction::new();
    let fs = store.feature_store("parcels", &tx).unwrap();
    fs.modify_features(&["area"], &[Value::Float(75.0)], Filter::eq("name", "small"))
        .unwrap();

    // The native read is widened so the edited row still matches.
    let big = Query::filtered(Filter::gt("area", 10.0));
    assert_eq!(fs.features(&big).size().unwrap(), 2);
    assert_eq!(auto.features(&big).size().unwrap(), 1);

    tx.commit().unwrap();
    assert_eq!(auto.features(&big).size().unwrap(), 2);
    tx.close();
}

#[test]
fn test_auto_commit_listeners_hear_commit() {
    let (_, store) = test_store();
    let auto = store.feature_source("parcels").unwrap();
    let watcher = auto.subscribe(16);

    let tx = Transaction::new();
    let fs = store.feature_store("parcels", &tx).unwrap();
    fs.add_features(&[parcel(&store, "a", "a", 1.0)]).unwrap();
    assert!(watcher.drain().is_empty());

    tx.commit().unwrap();
    let events = watcher.drain();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, FeatureEventKind::Commit);
    assert_eq!(events[0].fids, vec![FeatureId::from("parcels.1")]);
    tx.close();
}

// --- Writer Discipline ---

#[test]
fn test_empty_commit_opens_no_writer() {
    let (backend, store) = test_store();
    let tx = Transaction::new();
    let fs = store.feature_store("parcels", &tx).unwrap();
    let handle = fs.subscribe(4);
    assert_eq!(fs.count(&Query::all()).unwrap(), Some(0));

    let opens = backend.writer_open_count();
    tx.commit().unwrap();
    assert_eq!(backend.writer_open_count(), opens);
    assert!(handle.drain().is_empty());
    tx.close();
}

#[test]
fn test_cancelled_edits_commit_silently() {
    let (backend, store) = test_store();
    let watcher = store.feature_source("parcels").unwrap().subscribe(8);

    let tx = Transaction::new();
    let fs = store.feature_store("parcels", &tx).unwrap();
    let ids = fs.add_features(&[parcel(&store, "t", "transient", 1.0)]).unwrap();
    fs.remove_features(Filter::fid(ids[0].clone())).unwrap();
    assert_eq!(count(&store, &tx), 0);

    let opens = backend.writer_open_count();
    tx.commit().unwrap();
    assert_eq!(backend.writer_open_count(), opens);
    assert!(watcher.drain().is_empty());
    assert!(!store.entry("parcels").unwrap().state(&tx).has_pending_batch());
    tx.close();
}

#[test]
fn test_rollback_discards_without_writer() {
    let (backend, store) = test_store();
    let tx = Transaction::new();
    let fs = store.feature_store("parcels", &tx).unwrap();
    let handle = fs.subscribe(16);
    fs.add_features(&[parcel(&store, "a", "a", 1.0), parcel(&store, "b", "b", 2.0)])
        .unwrap();
    handle.drain();

    let opens = backend.writer_open_count();
    tx.rollback().unwrap();
    assert_eq!(backend.writer_open_count(), opens);

    let events = handle.drain();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, FeatureEventKind::Rollback);
    assert_eq!(events[0].fids.len(), 2);

    assert_eq!(count(&store, &tx), 0);
    assert_eq!(count(&store, &Transaction::auto_commit()), 0);

    // A second commit after rollback has nothing to apply.
    tx.commit().unwrap();
    assert_eq!(backend.writer_open_count(), opens);
    tx.close();
}

// --- States ---

#[test]
fn test_state_per_transaction() {
    let (_, store) = test_store();
    let auto = store.feature_store("parcels", &Transaction::auto_commit()).unwrap();
    auto.add_features(&[parcel(&store, "a", "a", 1.0)]).unwrap();
    assert_eq!(auto.count(&Query::all()).unwrap(), Some(1));

    let entry = store.entry("parcels").unwrap();
    let first = entry.state(&Transaction::auto_commit());
    let second = entry.state(&Transaction::auto_commit());
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.count().get(), Some(Some(1)));

    let tx = Transaction::new();
    let tx_state = entry.state(&tx);
    assert!(!Arc::ptr_eq(&first, &tx_state));
    assert_eq!(tx_state.count().get(), first.count().get());
    assert!(Arc::ptr_eq(&tx_state, &entry.state(&tx)));
    assert!(entry.has_state(tx.id()));

    tx.close();
    assert!(!entry.has_state(tx.id()));
    assert!(tx_state.is_closed());
}

#[test]
fn test_dropped_transactions_release_states() {
    let (_, store) = test_store();
    let entry = store.entry("parcels").unwrap();
    let baseline = entry.state_count();

    for i in 0..20 {
        let tx = Transaction::new();
        let fs = store.feature_store("parcels", &tx).unwrap();
        fs.add_features(&[parcel(&store, "d", &format!("d{}", i), 1.0)]).unwrap();
        tx.commit().unwrap();
    }

    assert_eq!(entry.state_count(), baseline);
    assert_eq!(count(&store, &Transaction::auto_commit()), 20);
}

#[test]
fn test_collection_size_matches_count() {
    let (_, store) = test_store();
    let auto = store.feature_store("parcels", &Transaction::auto_commit()).unwrap();
    auto.add_features(&[
        parcel(&store, "a", "a", 1.0),
        parcel(&store, "b", "b", 2.0),
        parcel(&store, "c", "c", 3.0),
    ])
    .unwrap();

    let view = auto.view(&Query::filtered(Filter::gt("area", 1.5))).unwrap();
    assert_eq!(
        view.features(&Query::all()).size().unwrap(),
        view.count(&Query::all()).unwrap().unwrap()
    );

    let tx = Transaction::new();
    let fs = store.feature_store("parcels", &tx).unwrap();
    fs.remove_features(Filter::eq("name", "a")).unwrap();
    assert_eq!(
        fs.features(&Query::all()).size().unwrap(),
        fs.count(&Query::all()).unwrap().unwrap()
    );
    tx.close();
}

// --- Partial Failure ---

#[test]
fn test_partial_commit_reports_applied_rows() {
    init_tracing();
    let (_, store) = test_store();
    let auto = store.feature_store("parcels", &Transaction::auto_commit()).unwrap();

    let tx = Transaction::new();
    let fs = store.feature_store("parcels", &tx).unwrap();
    fs.add_features(&[
        parcel(&store, "a", "applied", 2.0),
        parcel(&store, "parcels.taken", "clash", 3.0).with_provided_id(),
        parcel(&store, "c", "never", 4.0),
    ])
    .unwrap();

    // Another writer takes the id after the transaction staged it.
    auto.add_features(&[parcel(&store, "parcels.taken", "existing", 1.0).with_provided_id()])
        .unwrap();

    let handle = fs.subscribe(16);
    let err = tx.commit().unwrap_err();
    assert!(matches!(err, StoreError::FeatureExists(_)));

    let events = handle.drain();
    let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![FeatureEventKind::Added, FeatureEventKind::Commit]);
    assert_eq!(events[1].fids, events[0].fids);

    let stored = auto.all_features().to_vec().unwrap();
    assert_eq!(names(&stored), vec!["existing", "applied"]);

    // The diff was cleared; the transaction sees the store as it is.
    assert_eq!(count(&store, &tx), 2);
    tx.close();
}

#[test]
fn test_provided_ids_survive_commit() {
    let (_, store) = test_store();
    let tx = Transaction::new();
    let fs = store.feature_store("parcels", &tx).unwrap();
    let ids = fs
        .add_features(&[parcel(&store, "parcels.custom", "mine", 1.0).with_provided_id()])
        .unwrap();
    assert_eq!(ids, vec![FeatureId::from("parcels.custom")]);
    tx.commit().unwrap();

    let stored = store
        .feature_source("parcels")
        .unwrap()
        .features(&Query::filtered(Filter::fid("parcels.custom")))
        .to_vec()
        .unwrap();
    assert_eq!(names(&stored), vec!["mine"]);
    tx.close();
}

#[test]
fn test_duplicate_provided_id_in_transaction() {
    let (_, store) = test_store();
    let tx = Transaction::new();
    let fs = store.feature_store("parcels", &tx).unwrap();
    fs.add_features(&[parcel(&store, "parcels.dup", "first", 1.0).with_provided_id()])
        .unwrap();

    let err = fs
        .add_features(&[parcel(&store, "parcels.dup", "second", 2.0).with_provided_id()])
        .unwrap_err();
    assert!(matches!(err, StoreError::FeatureExists(ref id) if id.as_str() == "parcels.dup"));

    tx.commit().unwrap();
    let stored = store
        .feature_source("parcels")
        .unwrap()
        .all_features()
        .to_vec()
        .unwrap();
    assert_eq!(names(&stored), vec!["first"]);
    tx.close();
}

#[test]
fn test_provided_id_of_stored_row_in_transaction() {
    let (_, store) = test_store();
    let auto = store.feature_store("parcels", &Transaction::auto_commit()).unwrap();
    auto.add_features(&[parcel(&store, "parcels.held", "stored", 1.0).with_provided_id()])
        .unwrap();

    let tx = Transaction::new();
    let fs = store.feature_store("parcels", &tx).unwrap();
    let err = fs
        .add_features(&[parcel(&store, "parcels.held", "again", 2.0).with_provided_id()])
        .unwrap_err();
    assert!(matches!(err, StoreError::FeatureExists(_)));

    // Once removed in the transaction, the id is free again.
    fs.remove_features(Filter::fid("parcels.held")).unwrap();
    fs.add_features(&[parcel(&store, "parcels.held", "replacement", 3.0).with_provided_id()])
        .unwrap();
    tx.commit().unwrap();

    let stored = auto.all_features().to_vec().unwrap();
    assert_eq!(names(&stored), vec!["replacement"]);
    tx.close();
}

#[test]
fn test_concurrent_transactions_are_isolated() {
    init_tracing();
    let (_, store) = test_store();
    let store = Arc::new(store);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                let tx = Transaction::new();
                let fs = store.feature_store("parcels", &tx).unwrap();
                let features: Vec<_> = (0..5)
                    .map(|i| parcel(&store, "tmp", &format!("t{}-{}", t, i), i as f64))
                    .collect();
                fs.add_features(&features).unwrap();
                assert!(fs.count(&Query::all()).unwrap().unwrap() >= 5);
                tx.commit().unwrap();
                tx.close();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(count(&store, &Transaction::auto_commit()), 20);
}

// --- Locking ---

#[test]
fn test_transaction_lock_blocks_until_commit() {
    let (_, store) = test_store();
    let auto = store.feature_store("parcels", &Transaction::auto_commit()).unwrap();
    let ids = auto.add_features(&[parcel(&store, "a", "held", 1.0)]).unwrap();

    let tx1 = Transaction::new();
    let owner = store.feature_store("parcels", &tx1).unwrap();
    assert_eq!(owner.lock_features(Filter::fid(ids[0].clone())).unwrap(), 1);

    let err = auto
        .modify_features(&["area"], &[Value::Float(2.0)], Filter::fid(ids[0].clone()))
        .unwrap_err();
    assert!(matches!(err, StoreError::FeatureLocked { .. }));

    // The owner may still edit its locked feature.
    owner
        .modify_features(&["area"], &[Value::Float(3.0)], Filter::fid(ids[0].clone()))
        .unwrap();
    tx1.commit().unwrap();

    auto.modify_features(&["area"], &[Value::Float(4.0)], Filter::fid(ids[0].clone()))
        .unwrap();
    let stored = auto.all_features().to_vec().unwrap();
    assert_eq!(stored[0].value("area"), Some(&Value::Float(4.0)));
    tx1.close();
}

#[test]
fn test_authorization_lock() {
    let (_, store) = test_store();
    let auto = store.feature_store("parcels", &Transaction::auto_commit()).unwrap();
    let ids = auto.add_features(&[parcel(&store, "a", "held", 1.0)]).unwrap();

    let lock = FeatureLock::new(Duration::from_secs(60));
    auto.set_feature_lock(lock.clone());
    assert_eq!(auto.lock_features(Filter::Include).unwrap(), 1);

    let stranger = Transaction::new();
    let err = store
        .feature_store("parcels", &stranger)
        .unwrap()
        .remove_features(Filter::fid(ids[0].clone()))
        .unwrap_err();
    assert!(matches!(err, StoreError::FeatureLocked { .. }));
    stranger.close();

    let holder = Transaction::new();
    holder.add_authorization(lock.authorization().unwrap()).unwrap();
    let fs = store.feature_store("parcels", &holder).unwrap();
    fs.remove_features(Filter::fid(ids[0].clone())).unwrap();
    holder.commit().unwrap();
    holder.close();

    assert_eq!(count(&store, &Transaction::auto_commit()), 0);
}
