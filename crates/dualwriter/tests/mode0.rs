#![forbid(unsafe_code)]

use std::sync::Arc;

use dualwrite::DualWriter;
use dualwrite_core::prelude::*;
use dualwrite_store::{Call, Method, MockStore};
use serde_json::json;

fn ctx() -> RequestContext {
    RequestContext::namespaced("default")
}

fn dash(name: &str, v: u32) -> Resource {
    Resource::new("example.io/v1", "Dashboard", name).with_namespace("default").with_spec(json!({ "v": v }))
}

fn writer(legacy: LegacyStorage, unified: &Arc<MockStore>) -> DualWriter {
    DualWriter::new(Mode::Mode0, legacy, unified.clone())
}

#[tokio::test]
async fn create_writes_legacy_then_unified_and_returns_unified() {
    let legacy = Arc::new(MockStore::new("dashboards").on_create(|o| Ok(o.clone().with_resource_version("1").with_uid("legacy-uid"))));
    let unified = Arc::new(MockStore::new("dashboards").on_create(|o| Ok(o.clone().with_resource_version("100"))));
    let dw = writer(LegacyStorage::full(legacy.clone()), &unified);

    let out = dw.create(&ctx(), dash("a", 1), None, &CreateOptions::default()).await.unwrap();
    assert_eq!(out.resource_version(), "100");
    assert_eq!(out.uid(), "legacy-uid");
    let sent = unified.created();
    assert_eq!(sent[0].resource_version(), "");
    assert_eq!(sent[0].uid(), "legacy-uid");
}

#[tokio::test]
async fn create_failure_in_legacy_skips_unified() {
    let legacy = Arc::new(MockStore::new("dashboards").on_create(|o| Err(StoreError::already_exists("dashboards", o.name()))));
    let unified = Arc::new(MockStore::new("dashboards"));
    let dw = writer(LegacyStorage::full(legacy.clone()), &unified);

    assert!(dw.create(&ctx(), dash("a", 1), None, &CreateOptions::default()).await.unwrap_err().is_already_exists());
    assert_eq!(unified.count(Method::Create), 0);
}

#[tokio::test]
async fn create_failure_in_unified_is_a_partial_write() {
    let legacy = Arc::new(MockStore::new("dashboards").on_create(|o| Ok(o.clone().with_resource_version("1").with_uid("u-1"))));
    let unified = Arc::new(MockStore::new("dashboards").on_create(|_| Err(StoreError::Invalid("bad spec".into()))));
    let dw = writer(LegacyStorage::full(legacy.clone()), &unified);

    let err = dw.create(&ctx(), dash("a", 1), None, &CreateOptions::default()).await.unwrap_err();
    let legacy_obj = err.partial_object().expect("legacy object carried");
    assert_eq!(legacy_obj.uid(), "u-1");
    assert_eq!(legacy_obj.resource_version(), "1");
    match err {
        StoreError::PartialWrite { cause, .. } => assert_eq!(*cause, StoreError::Invalid("bad spec".into())),
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn create_without_legacy_creater_goes_to_unified_only() {
    let legacy = Arc::new(MockStore::new("dashboards"));
    let unified = Arc::new(MockStore::new("dashboards"));
    let dw = writer(LegacyStorage::read_only(legacy.clone()), &unified);

    dw.create(&ctx(), dash("a", 1), None, &CreateOptions::default()).await.unwrap();
    assert_eq!(unified.count(Method::Create), 1);
    assert!(legacy.calls().is_empty());
}

#[tokio::test]
async fn reads_come_from_unified() {
    let legacy = Arc::new(MockStore::new("dashboards").on_get(|name| Ok(dash(name, 1))));
    let unified = Arc::new(
        MockStore::new("dashboards")
            .on_get(|name| Ok(dash(name, 2)))
            .on_list(|_| Ok(ResourceList::new(vec![dash("b", 2)]))),
    );
    let dw = writer(LegacyStorage::full(legacy.clone()), &unified);

    assert_eq!(dw.get(&ctx(), "a", &GetOptions::default()).await.unwrap().spec, json!({ "v": 2 }));
    assert_eq!(dw.list(&ctx(), &ListOptions::default()).await.unwrap().names(), vec!["b"]);
    assert!(legacy.calls().is_empty());
}

#[tokio::test]
async fn update_computes_once_and_restores_unified_identity() {
    let legacy = Arc::new(MockStore::new("dashboards").on_update(|_, o| Ok((o.clone().with_resource_version("31"), false))));
    let unified = Arc::new(MockStore::new("dashboards").on_get(|name| Ok(dash(name, 1).with_resource_version("7").with_uid("u-7"))));
    let dw = writer(LegacyStorage::full(legacy.clone()), &unified);

    let calls = std::sync::atomic::AtomicUsize::new(0);
    let info = UpdateFn::new(|old: Option<&Resource>| {
        calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut o = old.cloned().unwrap_or_default();
        o.spec = json!({ "v": 2 });
        Ok(o.with_label("team", "infra"))
    })
    .with_preconditions(Preconditions::resource_version("7"));
    let (out, created) = dw.update(&ctx(), "a", &info, None, None, false, &UpdateOptions::default()).await.unwrap();
    assert!(!created);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    match &legacy.calls()[0] {
        Call::Update { object, preconditions, .. } => {
            assert_eq!(object.resource_version(), "");
            assert_eq!(preconditions, &None);
        }
        other => panic!("unexpected call {:?}", other),
    }
    match &unified.calls().last() {
        Some(Call::Update { object, preconditions, .. }) => {
            assert_eq!(object.resource_version(), "7");
            assert_eq!(object.uid(), "u-7");
            assert_eq!(object.metadata.labels["team"], "infra");
            assert_eq!(preconditions, &Some(Preconditions::resource_version("7")));
        }
        other => panic!("unexpected call {:?}", other),
    }
    assert_eq!(out.spec, json!({ "v": 2 }));
}

#[tokio::test]
async fn update_of_missing_object_without_force_is_not_found() {
    let legacy = Arc::new(MockStore::new("dashboards"));
    let unified = Arc::new(MockStore::new("dashboards"));
    let dw = writer(LegacyStorage::full(legacy.clone()), &unified);

    let info = UpdateFn::new(|_old: Option<&Resource>| Ok(dash("a", 1)));
    let err = dw.update(&ctx(), "a", &info, None, None, false, &UpdateOptions::default()).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(legacy.count(Method::Update), 0);
}

#[tokio::test]
async fn update_legacy_failure_is_fatal() {
    let legacy = Arc::new(MockStore::new("dashboards").on_update(|_, _| Err(StoreError::Conflict("legacy row locked".into()))));
    let unified = Arc::new(MockStore::new("dashboards").on_get(|name| Ok(dash(name, 1))));
    let dw = writer(LegacyStorage::full(legacy.clone()), &unified);

    let info = UpdateFn::new(|_old: Option<&Resource>| Ok(dash("a", 2)));
    assert!(dw.update(&ctx(), "a", &info, None, None, false, &UpdateOptions::default()).await.unwrap_err().is_conflict());
    assert_eq!(unified.count(Method::Update), 0);
}

#[tokio::test]
async fn delete_returns_the_unified_receipt() {
    let legacy = Arc::new(MockStore::new("dashboards").on_delete(|name| Ok((dash(name, 1).with_resource_version("legacy"), false))));
    let unified = Arc::new(MockStore::new("dashboards").on_delete(|name| Ok((dash(name, 1).with_resource_version("unified"), true))));
    let dw = writer(LegacyStorage::full(legacy.clone()), &unified);

    let (obj, async_delete) = dw.delete(&ctx(), "a", None, &DeleteOptions::default()).await.unwrap();
    assert_eq!(obj.resource_version(), "unified");
    assert!(async_delete);
}

#[tokio::test]
async fn delete_aborts_on_legacy_error() {
    let legacy = Arc::new(MockStore::new("dashboards"));
    let unified = Arc::new(MockStore::new("dashboards").on_delete(|name| Ok((dash(name, 1), false))));
    let dw = writer(LegacyStorage::full(legacy.clone()), &unified);

    assert!(dw.delete(&ctx(), "a", None, &DeleteOptions::default()).await.unwrap_err().is_not_found());
    assert_eq!(unified.count(Method::Delete), 0);

    let out = dw
        .delete_collection(&ctx(), None, &DeleteOptions::default(), &ListOptions::default())
        .await;
    assert!(out.is_ok());
    let legacy = Arc::new(MockStore::new("dashboards").on_delete_collection(|_| Err(StoreError::Internal("x".into()))));
    let dw = writer(LegacyStorage::full(legacy.clone()), &unified);
    assert!(dw.delete_collection(&ctx(), None, &DeleteOptions::default(), &ListOptions::default()).await.is_err());
    assert_eq!(unified.count(Method::DeleteCollection), 1);
}

#[tokio::test]
async fn table_comes_from_unified_unless_overridden() {
    let legacy = Arc::new(MockStore::new("dashboards"));
    let unified = Arc::new(MockStore::new("dashboards"));
    let dw = writer(LegacyStorage::full(legacy.clone()), &unified);
    assert_eq!(dw.table_source(), dualwrite::TableSource::Unified);

    let obj = dash("a", 1);
    let table = dw.convert_to_table(&ctx(), TableInput::Object(&obj), &TableOptions::default()).unwrap();
    assert_eq!(table.rows.len(), 1);
    let dw = dw.with_table_source(dualwrite::TableSource::Legacy);
    assert_eq!(dw.table_source(), dualwrite::TableSource::Legacy);
}
