//! Query handling across backend capability combinations.

use geostore::{
    AttributeType, Capabilities, Crs, DataStore, DataStoreConfig, Feature, FeatureId, FeatureType,
    Filter, Geometry, MemoryDataStore, Query, SortBy, StoreError, Transaction, Value, WriteFlags,
};
use proptest::prelude::*;
use std::sync::Arc;

fn parcels_type() -> FeatureType {
    FeatureType::builder("parcels")
        .attribute("name", AttributeType::Text)
        .attribute("area", AttributeType::Float)
        .geometry("geom")
        .crs(Crs::wgs84())
        .build()
        .unwrap()
}

fn store_with(capabilities: Capabilities, rows: usize) -> DataStore {
    let backend = Arc::new(MemoryDataStore::with_capabilities(capabilities));
    let store = DataStore::new(backend, DataStoreConfig::default());
    store.create_schema(&parcels_type()).unwrap();

    let schema = store.schema("parcels").unwrap();
    let features: Vec<Feature> = (0..rows)
        .map(|i| {
            let mut f = Feature::new(Arc::clone(&schema), "tmp");
            f.set_value("name", format!("p{:02}", (i * 7) % rows.max(1))).unwrap();
            f.set_value("area", i as f64 * 1.5).unwrap();
            f.set_value("geom", Geometry::point(i as f64, (i % 5) as f64)).unwrap();
            f
        })
        .collect();
    store
        .feature_store("parcels", &Transaction::auto_commit())
        .unwrap()
        .add_features(&features)
        .unwrap();
    store
}

fn ids(features: &[Feature]) -> Vec<FeatureId> {
    features.iter().map(|f| f.id().clone()).collect()
}

fn attribute_names(feature_type: &FeatureType) -> Vec<String> {
    feature_type.attribute_names().map(str::to_string).collect()
}

// --- Views ---

#[test]
fn test_view_projects_and_filters() {
    let store = store_with(Capabilities::all_query_clauses(), 10);
    let source = store.feature_source("parcels").unwrap();
    let view = source
        .view(&Query::filtered(Filter::gt("area", 6.0)).with_properties(["name"]))
        .unwrap();

    assert!(view.is_view());
    assert_eq!(attribute_names(&view.schema().unwrap()), vec!["name"]);
    assert_eq!(view.count(&Query::all()).unwrap(), Some(5));

    // Queries against the view narrow it further.
    let narrowed = view.features(&Query::filtered(Filter::lt("area", 11.0)));
    assert_eq!(narrowed.size().unwrap(), 3);
    let rows = narrowed.to_vec().unwrap();
    assert!(rows.iter().all(|f| f.value("area").is_none()));
}

#[test]
fn test_view_is_read_only() {
    let store = store_with(Capabilities::all_query_clauses(), 3);
    let fs = store
        .feature_store("parcels", &Transaction::auto_commit())
        .unwrap();
    let view = fs.view(&Query::filtered(Filter::gt("area", 1.0))).unwrap();

    let err = view.writer(Filter::Include, WriteFlags::UPDATE).err().unwrap();
    assert!(matches!(err, StoreError::ReadOnly(_)));
    assert!(matches!(
        view.remove_features(Filter::Include),
        Err(StoreError::ReadOnly(_))
    ));
    assert_eq!(fs.count(&Query::all()).unwrap(), Some(3));
}

#[test]
fn test_collection_subcollection_and_sort() {
    let store = store_with(Capabilities::NONE.with_reliable_fids(true), 6);
    let source = store.feature_source("parcels").unwrap();
    let all = source.all_features();
    let big = all.subcollection(Filter::gt("area", 3.0)).unwrap();
    assert_eq!(big.size().unwrap(), 3);

    let sorted = big.sort(vec![SortBy::desc("area")]).to_vec().unwrap();
    let areas: Vec<f64> = sorted
        .iter()
        .filter_map(|f| f.value("area").and_then(Value::as_f64))
        .collect();
    assert_eq!(areas, vec![7.5, 6.0, 4.5]);
}

// --- Paging ---

#[test]
fn test_offset_without_order_is_unsupported() {
    let store = store_with(Capabilities::NONE, 5);
    let source = store.feature_source("parcels").unwrap();
    let err = source
        .reader(&Query::all().with_start_index(2))
        .err()
        .unwrap();
    assert!(matches!(err, StoreError::Unsupported(_)));

    // An explicit sort makes paging stable again.
    let page = source
        .features(&Query::all().with_start_index(2).with_sort(vec![SortBy::asc("area")]))
        .to_vec()
        .unwrap();
    assert_eq!(page.len(), 3);
}

#[test]
fn test_offset_with_reliable_fids_uses_natural_order() {
    let store = store_with(Capabilities::NONE.with_reliable_fids(true), 12);
    let source = store.feature_source("parcels").unwrap();
    let page = source
        .features(&Query::all().with_start_index(8).with_max_features(3))
        .to_vec()
        .unwrap();
    assert_eq!(
        ids(&page),
        vec![
            FeatureId::from("parcels.9"),
            FeatureId::from("parcels.10"),
            FeatureId::from("parcels.11")
        ]
    );
}

#[test]
fn test_unknown_sort_attribute() {
    let store = store_with(Capabilities::NONE.with_reliable_fids(true), 3);
    let source = store.feature_source("parcels").unwrap();
    let err = source
        .reader(&Query::all().with_sort(vec![SortBy::asc("height")]))
        .err()
        .unwrap();
    assert!(matches!(err, StoreError::InvalidQuery(_)));
}

// --- Retyping ---

#[test]
fn test_sort_on_unprojected_attribute() {
    for caps in [Capabilities::all_query_clauses(), Capabilities::NONE] {
        let store = store_with(caps.with_reliable_fids(true), 5);
        let source = store.feature_source("parcels").unwrap();
        let query = Query::all()
            .with_properties(["name"])
            .with_sort(vec![SortBy::desc("area")])
            .with_max_features(2);
        let rows = source.features(&query).to_vec().unwrap();

        assert_eq!(
            ids(&rows),
            vec![FeatureId::from("parcels.5"), FeatureId::from("parcels.4")]
        );
        assert!(rows.iter().all(|f| f.feature_type().attribute_count() == 1));
    }
}

#[test]
fn test_filter_on_unprojected_attribute() {
    let store = store_with(Capabilities::NONE.with_retype(true).with_reliable_fids(true), 6);
    let source = store.feature_source("parcels").unwrap();
    let query = Query::filtered(Filter::lt("area", 3.0)).with_properties(["name"]);
    let rows = source.features(&query).to_vec().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|f| f.value("area").is_none()));
}

// --- Reference Systems ---

#[test]
fn test_reproject_to_web_mercator() {
    let store = store_with(Capabilities::NONE.with_reliable_fids(true), 0);
    let fs = store
        .feature_store("parcels", &Transaction::auto_commit())
        .unwrap();
    let mut f = Feature::new(store.schema("parcels").unwrap(), "tmp");
    f.set_value("geom", Geometry::point(180.0, 0.0)).unwrap();
    fs.add_features(&[f]).unwrap();

    let collection = fs.features(&Query::all().with_reproject(Crs::web_mercator()));
    assert_eq!(collection.schema().unwrap().crs(), Some(&Crs::web_mercator()));

    let rows = collection.to_vec().unwrap();
    let Some(Geometry::Point(c)) = rows[0].default_geometry().cloned() else {
        panic!("expected a point");
    };
    assert!((c.x - 20_037_508.34).abs() < 0.01);
    assert!(c.y.abs() < 1e-6);
}

#[test]
fn test_force_crs_relabels_only() {
    let store = store_with(Capabilities::all_query_clauses(), 3);
    let source = store.feature_source("parcels").unwrap();
    let rows = source
        .features(&Query::all().with_crs(Crs::web_mercator()))
        .to_vec()
        .unwrap();
    assert_eq!(rows[1].feature_type().crs(), Some(&Crs::web_mercator()));
    assert_eq!(rows[1].default_geometry(), Some(&Geometry::point(1.0, 1.0)));

    // Forced then reprojected: coordinates are read as mercator meters.
    let back = source
        .features(&Query::all().with_crs(Crs::web_mercator()).with_reproject(Crs::wgs84()))
        .to_vec()
        .unwrap();
    let Some(Geometry::Point(c)) = back[1].default_geometry().cloned() else {
        panic!("expected a point");
    };
    assert!(c.x < 1e-4 && c.x > 0.0);
}

#[test]
fn test_bounds_follow_query() {
    let store = store_with(Capabilities::NONE.with_reliable_fids(true), 4);
    let source = store.feature_source("parcels").unwrap();
    let bounds = source.bounds().unwrap().unwrap();
    assert_eq!((bounds.min_x, bounds.max_x), (0.0, 3.0));

    let limited = source
        .bounds_of(&Query::filtered(Filter::lt("area", 2.0)))
        .unwrap()
        .unwrap();
    assert_eq!((limited.min_x, limited.max_x), (0.0, 1.0));
}

// --- Capability Equivalence ---

fn capabilities_strategy() -> impl Strategy<Value = Capabilities> {
    any::<[bool; 6]>().prop_map(|[filter, reproject, limit, offset, sort, retype]| Capabilities {
        filter,
        reproject,
        limit,
        offset,
        sort,
        retype,
        reliable_fids: true,
        use_provided_fid: true,
        ..Capabilities::NONE
    })
}

fn query_strategy() -> impl Strategy<Value = Query> {
    (
        0usize..6,
        prop::option::of(0usize..8),
        prop::option::of(0.0f64..20.0),
        0usize..4,
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(offset, max, threshold, sort, project, reproject)| {
            let mut query = Query::all();
            if offset > 0 {
                query = query.with_start_index(offset);
            }
            if let Some(max) = max {
                query = query.with_max_features(max);
            }
            if let Some(threshold) = threshold {
                query = query.with_filter(Filter::gt("area", threshold));
            }
            query = match sort {
                1 => query.with_sort(vec![SortBy::asc("name")]),
                2 => query.with_sort(vec![SortBy::desc("area")]),
                3 => query.with_sort(vec![SortBy::ReverseOrder]),
                _ => query,
            };
            if project {
                query = query.with_properties(["geom", "name"]);
            }
            if reproject {
                query = query.with_reproject(Crs::web_mercator());
            }
            query
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_results_independent_of_capabilities(
        caps in capabilities_strategy(),
        query in query_strategy(),
    ) {
        let reference = store_with(
            Capabilities::all_query_clauses().with_reliable_fids(true).with_use_provided_fid(true),
            15,
        );
        let candidate = store_with(caps, 15);

        let expected = reference.feature_source("parcels").unwrap().features(&query);
        let actual = candidate.feature_source("parcels").unwrap().features(&query);

        let expected_rows = expected.to_vec().unwrap();
        let actual_rows = actual.to_vec().unwrap();
        prop_assert_eq!(ids(&actual_rows), ids(&expected_rows));
        for (a, e) in actual_rows.iter().zip(&expected_rows) {
            prop_assert_eq!(a.values(), e.values());
            prop_assert_eq!(
                attribute_names(a.feature_type()),
                attribute_names(e.feature_type())
            );
        }
        prop_assert_eq!(actual.size().unwrap(), expected_rows.len());
    }
}
