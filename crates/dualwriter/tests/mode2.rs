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

fn writer(legacy: &Arc<MockStore>, unified: &Arc<MockStore>) -> DualWriter {
    DualWriter::new(Mode::Mode2, LegacyStorage::full(legacy.clone()), unified.clone())
}

#[tokio::test]
async fn create_hands_legacy_identity_to_unified_with_cleared_version() {
    let legacy = Arc::new(MockStore::new("dashboards").on_create(|o| Ok(o.clone().with_resource_version("1").with_uid("legacy-uid"))));
    let unified = Arc::new(MockStore::new("dashboards").on_create(|o| Ok(o.clone().with_resource_version("42"))));
    let dw = writer(&legacy, &unified);

    let input = Resource::new("example.io/v1", "Dashboard", "foo").with_label("team", "infra").with_annotation("note", "x");
    let out = dw.create(&ctx(), input, None, &CreateOptions::default()).await.unwrap();
    assert_eq!(out.name(), "foo");
    assert_eq!(out.resource_version(), "42");

    let created = unified.created();
    let sent = &created[0];
    assert_eq!(sent.resource_version(), "");
    assert_eq!(sent.uid(), "legacy-uid");
    assert_eq!(sent.name(), "foo");
    assert_eq!(sent.metadata.labels["team"], "infra");
    assert_eq!(sent.metadata.annotations["note"], "x");
    assert_eq!(legacy.count(Method::Create), 1);
}

#[tokio::test]
async fn legacy_create_failure_never_reaches_unified() {
    let legacy = Arc::new(MockStore::new("dashboards").on_create(|_| Err(StoreError::Internal("db down".into()))));
    let unified = Arc::new(MockStore::new("dashboards"));
    let dw = writer(&legacy, &unified);

    let err = dw.create(&ctx(), dash("foo", 1), None, &CreateOptions::default()).await.unwrap_err();
    assert_eq!(err, StoreError::Internal("db down".into()));
    assert_eq!(unified.count(Method::Create), 0);
}

#[tokio::test]
async fn unified_create_failure_returns_the_legacy_copy() {
    let legacy = Arc::new(MockStore::new("dashboards").on_create(|o| Ok(o.clone().with_resource_version("1").with_uid("u-1"))));
    let unified = Arc::new(MockStore::new("dashboards").on_create(|o| Err(StoreError::already_exists("dashboards", o.name()))));
    let dw = writer(&legacy, &unified);

    let out = dw.create(&ctx(), dash("foo", 1), None, &CreateOptions::default()).await.unwrap();
    assert_eq!(out.uid(), "u-1");
    assert_eq!(out.resource_version(), "1");
    assert_eq!(unified.count(Method::Create), 1);
}

#[tokio::test]
async fn get_falls_back_to_legacy() {
    let legacy = Arc::new(MockStore::new("dashboards").on_get(|name| Ok(dash(name, 1).with_resource_version("3"))));
    let unified = Arc::new(MockStore::new("dashboards"));
    let dw = writer(&legacy, &unified);

    let out = dw.get(&ctx(), "x", &GetOptions::default()).await.unwrap();
    assert_eq!(out, dash("x", 1).with_resource_version("3"));
    assert_eq!(unified.count(Method::Get), 1);

    let unified = Arc::new(MockStore::new("dashboards").on_get(|_| Err(StoreError::Internal("timeout".into()))));
    let dw = writer(&legacy, &unified);
    assert_eq!(dw.get(&ctx(), "x", &GetOptions::default()).await.unwrap().name(), "x");
}

#[tokio::test]
async fn get_fallback_drops_the_unified_resource_version() {
    let legacy = Arc::new(MockStore::new("dashboards").on_get(|name| Ok(dash(name, 1).with_resource_version("3"))));
    let unified = Arc::new(MockStore::new("dashboards"));
    let dw = writer(&legacy, &unified);

    let opts = GetOptions { resource_version: Some("7".into()) };
    assert_eq!(dw.get(&ctx(), "x", &opts).await.unwrap().resource_version(), "3");
    assert_eq!(unified.calls(), vec![Call::Get { name: "x".into(), opts: opts.clone() }]);
    assert_eq!(legacy.calls(), vec![Call::Get { name: "x".into(), opts: GetOptions::default() }]);
}

#[tokio::test]
async fn unified_get_wins_when_present() {
    let legacy = Arc::new(MockStore::new("dashboards").on_get(|name| Ok(dash(name, 1))));
    let unified = Arc::new(MockStore::new("dashboards").on_get(|name| Ok(dash(name, 2))));
    let dw = writer(&legacy, &unified);

    assert_eq!(dw.get(&ctx(), "x", &GetOptions::default()).await.unwrap().spec, json!({ "v": 2 }));
    assert_eq!(legacy.count(Method::Get), 0);
}

#[tokio::test]
async fn list_shadows_legacy_entries_in_legacy_order() {
    let legacy = Arc::new(MockStore::new("dashboards").on_list(|_| {
        Ok(ResourceList {
            resource_version: "legacy-rv".into(),
            continue_token: Some("default/b".into()),
            items: vec![dash("a", 1), dash("b", 1)],
        })
    }));
    let unified = Arc::new(MockStore::new("dashboards").on_list(|_| Ok(ResourceList::new(vec![dash("a", 2)]))));
    let dw = writer(&legacy, &unified);

    let opts = ListOptions { limit: Some(2), ..ListOptions::selector("team=infra") };
    let out = dw.list(&ctx(), &opts).await.unwrap();
    assert_eq!(out.names(), vec!["a", "b"]);
    assert_eq!(out.items[0].spec, json!({ "v": 2 }));
    assert_eq!(out.items[1].spec, json!({ "v": 1 }));
    assert_eq!(out.continue_token.as_deref(), Some("default/b"));
    assert_eq!(out.resource_version, "legacy-rv");

    // unified is listed with the same filter but without paging
    match &unified.calls()[0] {
        Call::List(o) => assert_eq!(o, &ListOptions::selector("team=infra")),
        other => panic!("unexpected call {:?}", other),
    }
}

#[tokio::test]
async fn list_errors_are_fatal_on_either_side() {
    let legacy = Arc::new(MockStore::new("dashboards").on_list(|_| Err(StoreError::Internal("legacy".into()))));
    let unified = Arc::new(MockStore::new("dashboards"));
    assert!(writer(&legacy, &unified).list(&ctx(), &ListOptions::default()).await.is_err());
    assert_eq!(unified.count(Method::List), 0);

    let legacy = Arc::new(MockStore::new("dashboards"));
    let unified = Arc::new(MockStore::new("dashboards").on_list(|_| Err(StoreError::Internal("unified".into()))));
    let err = writer(&legacy, &unified).list(&ctx(), &ListOptions::default()).await.unwrap_err();
    assert_eq!(err, StoreError::Internal("unified".into()));
}

#[tokio::test]
async fn delete_tolerates_legacy_not_found_and_returns_legacy_outcome() {
    let legacy = Arc::new(MockStore::new("dashboards"));
    let unified = Arc::new(MockStore::new("dashboards").on_delete(|name| Ok((dash(name, 1), false))));
    let dw = writer(&legacy, &unified);

    let err = dw.delete(&ctx(), "a", None, &DeleteOptions::default()).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(unified.count(Method::Delete), 1);
}

#[tokio::test]
async fn delete_stops_on_other_legacy_errors() {
    let legacy = Arc::new(MockStore::new("dashboards").on_delete(|_| Err(StoreError::Conflict("locked".into()))));
    let unified = Arc::new(MockStore::new("dashboards"));
    let dw = writer(&legacy, &unified);

    assert!(dw.delete(&ctx(), "a", None, &DeleteOptions::default()).await.unwrap_err().is_conflict());
    assert_eq!(unified.count(Method::Delete), 0);
}

#[tokio::test]
async fn delete_ignores_unified_failure_and_strips_legacy_version_precondition() {
    let legacy = Arc::new(MockStore::new("dashboards").on_delete(|name| Ok((dash(name, 1).with_resource_version("4"), false))));
    let unified = Arc::new(MockStore::new("dashboards").on_delete(|_| Err(StoreError::Internal("boom".into()))));
    let dw = writer(&legacy, &unified);

    let opts = DeleteOptions {
        preconditions: Some(Preconditions { uid: Some("u-1".into()), resource_version: Some("77".into()) }),
        dry_run: false,
    };
    let (obj, async_delete) = dw.delete(&ctx(), "a", None, &opts).await.unwrap();
    assert_eq!(obj.resource_version(), "4");
    assert!(!async_delete);
    match &legacy.calls()[0] {
        Call::Delete { opts, .. } => assert_eq!(opts.preconditions, Some(Preconditions::uid("u-1"))),
        other => panic!("unexpected call {:?}", other),
    }
    match &unified.calls()[0] {
        Call::Delete { opts: sent, .. } => assert_eq!(sent, &opts),
        other => panic!("unexpected call {:?}", other),
    }
}

#[tokio::test]
async fn delete_collection_logs_legacy_failure_and_returns_unified() {
    let legacy = Arc::new(MockStore::new("dashboards").on_delete_collection(|_| Err(StoreError::Internal("partial".into()))));
    let unified = Arc::new(MockStore::new("dashboards").on_delete_collection(|_| Ok(ResourceList::new(vec![dash("a", 1)]))));
    let dw = writer(&legacy, &unified);

    let out = dw.delete_collection(&ctx(), None, &DeleteOptions::default(), &ListOptions::default()).await.unwrap();
    assert_eq!(out.names(), vec!["a"]);
    assert_eq!(legacy.count(Method::DeleteCollection), 1);
}

#[tokio::test]
async fn update_reads_unified_writes_legacy_then_restores_identity() {
    let old = dash("a", 1).with_resource_version("5").with_uid("u-1").with_label("x", "1").with_annotation("a", "1");
    let snapshot = old.clone();
    let legacy = Arc::new(
        MockStore::new("dashboards")
            .on_update(|_, o| Ok((o.clone().with_resource_version("9").with_label("y", "2").with_annotation("b", "2"), false))),
    );
    let unified = Arc::new(MockStore::new("dashboards").on_get(move |_| Ok(snapshot.clone())));
    let dw = writer(&legacy, &unified);

    let info = UpdateFn::new(|old: Option<&Resource>| {
        let mut o = old.cloned().expect("old from unified");
        o.spec = json!({ "v": 2 });
        Ok(o)
    });
    let (out, created) = dw.update(&ctx(), "a", &info, None, None, false, &UpdateOptions::default()).await.unwrap();
    assert!(!created);

    let legacy_updates = legacy.updated();
    let to_legacy = &legacy_updates[0];
    assert_eq!(to_legacy.resource_version(), "");
    assert_eq!(to_legacy.spec, json!({ "v": 2 }));

    let unified_updates = unified.updated();
    let to_unified = &unified_updates[0];
    assert_eq!(to_unified.resource_version(), "5");
    assert_eq!(to_unified.uid(), "u-1");
    assert_eq!(to_unified.spec, json!({ "v": 2 }));
    assert_eq!(to_unified.metadata.labels.len(), 1);
    assert_eq!(to_unified.metadata.labels["x"], "1");
    assert_eq!(to_unified.metadata.annotations["a"], "1");
    assert_eq!(to_unified.metadata.annotations["b"], "2");
    assert_eq!(out, *to_unified);
    assert_eq!(unified.count(Method::Get), 1);
    assert_eq!(legacy.count(Method::Get), 0);
}

#[tokio::test]
async fn update_of_object_missing_from_unified_forces_create() {
    let legacy = Arc::new(MockStore::new("dashboards"));
    let unified = Arc::new(MockStore::new("dashboards").on_update(|_, o| Ok((o.clone().with_resource_version("1"), true))));
    let dw = writer(&legacy, &unified);

    let info = UpdateFn::new(|old: Option<&Resource>| {
        assert!(old.is_none());
        Ok(dash("a", 1).with_label("team", "infra"))
    });
    let (out, created) = dw.update(&ctx(), "a", &info, None, None, false, &UpdateOptions::default()).await.unwrap();
    assert!(created);
    assert_eq!(out.resource_version(), "1");
    assert_eq!(out.metadata.labels["team"], "infra");
    for m in [&legacy, &unified] {
        match &m.calls().last() {
            Some(Call::Update { force_allow_create, .. }) => assert!(*force_allow_create),
            other => panic!("unexpected call {:?}", other),
        }
    }
}

#[tokio::test]
async fn update_with_stale_precondition_fails_before_legacy_write() {
    let unified = Arc::new(MockStore::new("dashboards").on_get(|name| Ok(dash(name, 1).with_resource_version("5"))));
    let legacy = Arc::new(MockStore::new("dashboards"));
    let dw = writer(&legacy, &unified);

    let info = UpdateFn::new(|old: Option<&Resource>| Ok(old.cloned().unwrap_or_default()))
        .with_preconditions(Preconditions::resource_version("4"));
    let err = dw.update(&ctx(), "a", &info, None, None, false, &UpdateOptions::default()).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(legacy.count(Method::Update), 0);
}

#[tokio::test]
async fn update_survives_unified_failure() {
    let legacy = Arc::new(MockStore::new("dashboards").on_update(|_, o| Ok((o.clone().with_resource_version("9"), false))));
    let unified = Arc::new(
        MockStore::new("dashboards")
            .on_get(|name| Ok(dash(name, 1).with_resource_version("5")))
            .on_update(|_, _| Err(StoreError::Internal("unified down".into()))),
    );
    let dw = writer(&legacy, &unified);

    let info = UpdateFn::new(|_old: Option<&Resource>| Ok(dash("a", 2)));
    let (out, _) = dw.update(&ctx(), "a", &info, None, None, false, &UpdateOptions::default()).await.unwrap();
    assert_eq!(out.resource_version(), "9");
    assert_eq!(out.spec, json!({ "v": 2 }));
}

#[tokio::test]
async fn missing_capabilities_are_reported_per_operation() {
    let legacy = Arc::new(MockStore::new("dashboards"));
    let unified = Arc::new(MockStore::new("dashboards"));
    let dw = DualWriter::new(Mode::Mode2, LegacyStorage::read_only(legacy.clone()), unified.clone());

    let err = dw.create(&ctx(), dash("a", 1), None, &CreateOptions::default()).await.unwrap_err();
    assert_eq!(err.missing_capability(), Some(Capability::Creater));
    let err = dw.list(&ctx(), &ListOptions::default()).await.unwrap_err();
    assert_eq!(err.missing_capability(), Some(Capability::Lister));
    let info = UpdateFn::new(|_old: Option<&Resource>| Ok(dash("a", 1)));
    let err = dw.update(&ctx(), "a", &info, None, None, false, &UpdateOptions::default()).await.unwrap_err();
    assert_eq!(err.missing_capability(), Some(Capability::Updater));
    let err = dw.delete(&ctx(), "a", None, &DeleteOptions::default()).await.unwrap_err();
    assert_eq!(err.missing_capability(), Some(Capability::GracefulDeleter));
    let err = dw
        .delete_collection(&ctx(), None, &DeleteOptions::default(), &ListOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.missing_capability(), Some(Capability::CollectionDeleter));
    assert!(unified.calls().is_empty());
}
