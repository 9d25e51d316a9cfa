//! Persistence tests for the directory backend.

use geostore::{
    AttributeType, DataStore, DataStoreConfig, DirectoryConfig, DirectoryDataStore, Feature,
    FeatureId, FeatureType, Filter, Geometry, Query, StoreError, Transaction, Value,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn parcels_type() -> FeatureType {
    FeatureType::builder("parcels")
        .attribute("name", AttributeType::Text)
        .attribute("area", AttributeType::Float)
        .geometry("geom")
        .build()
        .unwrap()
}

fn open_store(path: &Path) -> DataStore {
    let backend = DirectoryDataStore::open(DirectoryConfig {
        path: path.to_path_buf(),
        create_if_missing: true,
    })
    .unwrap();
    DataStore::new(Arc::new(backend), DataStoreConfig::default())
}

fn parcel(store: &DataStore, name: &str, area: f64) -> Feature {
    let mut f = Feature::new(store.schema("parcels").unwrap(), "tmp");
    f.set_value("name", name).unwrap();
    f.set_value("area", area).unwrap();
    f.set_value("geom", Geometry::point(area, area)).unwrap();
    f
}

fn stored(store: &DataStore) -> Vec<(String, String, f64)> {
    store
        .feature_source("parcels")
        .unwrap()
        .all_features()
        .to_vec()
        .unwrap()
        .iter()
        .map(|f| {
            (
                f.id().to_string(),
                f.value("name").and_then(Value::as_str).unwrap_or("").to_string(),
                f.value("area").and_then(Value::as_f64).unwrap_or(f64::NAN),
            )
        })
        .collect()
}

#[test]
fn test_commit_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_store(dir.path());
        store.create_schema(&parcels_type()).unwrap();

        let tx = Transaction::new();
        let fs = store.feature_store("parcels", &tx).unwrap();
        fs.add_features(&[parcel(&store, "north", 1.0), parcel(&store, "south", 2.0)])
            .unwrap();
        tx.commit().unwrap();
        tx.close();
        store.dispose().unwrap();
    }

    let store = open_store(dir.path());
    assert_eq!(store.type_names().unwrap(), vec!["parcels".to_string()]);
    assert_eq!(
        stored(&store),
        vec![
            ("parcels.1".to_string(), "north".to_string(), 1.0),
            ("parcels.2".to_string(), "south".to_string(), 2.0),
        ]
    );

    // Generated ids continue after the persisted sequence.
    let ids = store
        .feature_store("parcels", &Transaction::auto_commit())
        .unwrap()
        .add_features(&[parcel(&store, "east", 3.0)])
        .unwrap();
    assert_eq!(ids, vec![FeatureId::from("parcels.3")]);
}

#[test]
fn test_second_open_is_locked() {
    let dir = TempDir::new().unwrap();
    let _first = open_store(dir.path());
    let second = DirectoryDataStore::open(DirectoryConfig {
        path: dir.path().to_path_buf(),
        create_if_missing: false,
    });
    assert!(matches!(second, Err(StoreError::Locked)));
}

#[test]
fn test_lock_released_on_drop() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_store(dir.path());
        store.create_schema(&parcels_type()).unwrap();
    }
    let store = open_store(dir.path());
    assert!(store.schema("parcels").is_ok());
}

#[test]
fn test_edits_persist() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_store(dir.path());
        store.create_schema(&parcels_type()).unwrap();
        let fs = store
            .feature_store("parcels", &Transaction::auto_commit())
            .unwrap();
        fs.add_features(&[
            parcel(&store, "a", 1.0),
            parcel(&store, "b", 2.0),
            parcel(&store, "c", 3.0),
        ])
        .unwrap();

        let tx = Transaction::new();
        let edits = fs.in_transaction(&tx);
        edits
            .modify_features(&["area"], &[Value::Float(20.0)], Filter::eq("name", "b"))
            .unwrap();
        edits.remove_features(Filter::eq("name", "a")).unwrap();
        assert_eq!(stored(&store).len(), 3);
        tx.commit().unwrap();
        tx.close();
    }

    let store = open_store(dir.path());
    assert_eq!(
        stored(&store),
        vec![
            ("parcels.2".to_string(), "b".to_string(), 20.0),
            ("parcels.3".to_string(), "c".to_string(), 3.0),
        ]
    );
    let bounds = store
        .feature_source("parcels")
        .unwrap()
        .bounds()
        .unwrap()
        .unwrap();
    assert_eq!((bounds.min_x, bounds.max_x), (2.0, 3.0));
}

#[test]
fn test_queries_run_above_backend() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    store.create_schema(&parcels_type()).unwrap();
    let fs = store
        .feature_store("parcels", &Transaction::auto_commit())
        .unwrap();
    let features: Vec<_> = (0..10)
        .map(|i| parcel(&store, &format!("p{}", i), i as f64))
        .collect();
    fs.add_features(&features).unwrap();

    let page = fs
        .features(
            &Query::filtered(Filter::gt("area", 2.0))
                .with_start_index(1)
                .with_max_features(3),
        )
        .to_vec()
        .unwrap();
    let names: Vec<_> = page
        .iter()
        .filter_map(|f| f.value("name").and_then(Value::as_str))
        .collect();
    assert_eq!(names, vec!["p4", "p5", "p6"]);
}

#[test]
fn test_remove_schema_deletes_file() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());
    store.create_schema(&parcels_type()).unwrap();
    assert!(dir.path().join("parcels.features").exists());

    store.remove_schema("parcels").unwrap();
    assert!(!dir.path().join("parcels.features").exists());
    assert!(matches!(
        store.schema("parcels"),
        Err(StoreError::TypeNotFound(_))
    ));
}
