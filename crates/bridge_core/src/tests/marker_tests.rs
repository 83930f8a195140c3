use super::*;

use std::time::Duration;

use serde_json::json;
use shared::{
    error::ErrorCode,
    protocol::{map_channel, BridgeEvent, CommandEnvelope, MapObjectPayload},
};

use crate::{
    headless::HeadlessMapSurface,
    test_support::{png_bytes, GatedSurface, Harness, MemoryAssets},
};

async fn init_marker(harness: &Harness, arguments: Value) -> Identifier {
    let reply = harness
        .map_command("marker#init", arguments)
        .await
        .expect("marker#init");
    Identifier::new(reply.as_str().expect("id string"))
}

#[tokio::test]
async fn marker_lifecycle_scenario() {
    let harness = Harness::new().await;
    let id = init_marker(&harness, json!({"point": {"latitude": 1.0, "longitude": 2.0}})).await;

    harness
        .map_command("marker#update", json!({"id": id, "zIndex": 5.0}))
        .await
        .expect("update");
    let snapshot = harness.bridge.marker(&id).await.expect("live marker");
    assert_eq!(snapshot.z_index, 5.0);
    assert_eq!(snapshot.position, Point::new(1.0, 2.0));
    assert_eq!(snapshot.icon, ImageSpec::DefaultMarker);

    harness
        .map_command("marker#remove", json!({"id": id}))
        .await
        .expect("remove");
    assert!(harness.bridge.marker(&id).await.is_none());

    let reply = harness
        .map_command("marker#update", json!({"id": id, "visible": false}))
        .await
        .expect("update after remove is a no-op");
    assert!(reply.is_null());
    assert!(harness.bridge.registry().is_empty().await);
}

#[tokio::test]
async fn update_only_touches_present_fields() {
    let harness = Harness::new().await;
    let id = init_marker(
        &harness,
        json!({
            "point": {"latitude": 10.0, "longitude": 20.0},
            "icon": ["fromAsset", "icons/pin.png"],
            "draggable": true,
            "zIndex": 2.0,
            "opacity": 0.5
        }),
    )
    .await;

    harness
        .map_command("marker#update", json!({"id": id, "visible": false}))
        .await
        .expect("update");

    let snapshot = harness.bridge.marker(&id).await.expect("live marker");
    assert!(!snapshot.visible);
    assert!(snapshot.draggable);
    assert_eq!(snapshot.z_index, 2.0);
    assert_eq!(snapshot.opacity, 0.5);
    assert_eq!(
        snapshot.icon,
        ImageSpec::FromAsset {
            path: "icons/pin.png".into(),
            scale: None
        }
    );

    let placemark = harness.surface.placemark(&id).await.expect("placemark");
    let state = placemark.state().await;
    assert!(!state.visible);
    assert_eq!(state.icon, Some((40, 20)));
}

#[tokio::test]
async fn remove_twice_is_not_an_error() {
    let harness = Harness::new().await;
    let id = init_marker(&harness, json!({"point": {"latitude": 0.0, "longitude": 0.0}})).await;
    let placemark = harness.surface.placemark(&id).await.expect("placemark");

    for _ in 0..2 {
        let reply = harness
            .map_command("marker#remove", json!({"id": id}))
            .await
            .expect("remove");
        assert!(reply.is_null());
    }
    assert!(placemark.state().await.removed);
    assert!(harness.surface.placemark(&id).await.is_none());
    assert_eq!(harness.surface.placemark_count().await, 0);
}

#[tokio::test]
async fn init_rejects_out_of_range_point() {
    let harness = Harness::new().await;
    let err = harness
        .map_command(
            "marker#init",
            json!({"point": {"latitude": 91.0, "longitude": 0.0}}),
        )
        .await
        .expect_err("invalid point");
    assert_eq!(err.code, ErrorCode::InvalidArgument);

    let err = harness
        .map_command("marker#init", json!({"point": {"latitude": 1.0}}))
        .await
        .expect_err("missing longitude");
    assert_eq!(err.code, ErrorCode::InvalidArgument);
    assert!(harness.bridge.registry().is_empty().await);
}

#[tokio::test]
async fn events_after_remove_are_dropped() {
    let mut harness = Harness::new().await;
    let id = init_marker(&harness, json!({"point": {"latitude": 1.0, "longitude": 1.0}})).await;
    let callbacks = harness
        .surface
        .placemark_callbacks(&id)
        .await
        .expect("callbacks");

    callbacks.tap(Point::new(1.0, 1.0));
    let events = harness.drain_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].channel, harness.map_channel());
    assert_eq!(
        events[0].event,
        BridgeEvent::MapObjectTap(MapObjectPayload {
            id: id.clone(),
            point: Some(Point::new(1.0, 1.0)),
        })
    );

    harness
        .map_command("marker#remove", json!({"id": id}))
        .await
        .expect("remove");
    callbacks.tap(Point::new(1.0, 1.0));
    callbacks.drag_start();
    assert!(harness.drain_events().await.is_empty());
}

#[tokio::test]
async fn drag_moves_the_marker() {
    let mut harness = Harness::new().await;
    let id = init_marker(
        &harness,
        json!({"point": {"latitude": 5.0, "longitude": 5.0}, "draggable": true}),
    )
    .await;
    let callbacks = harness
        .surface
        .placemark_callbacks(&id)
        .await
        .expect("callbacks");

    callbacks.drag_start();
    callbacks.drag(Point::new(6.0, 7.0));
    callbacks.drag_end();

    let methods: Vec<&str> = harness
        .drain_events()
        .await
        .iter()
        .map(|published| published.event.method())
        .collect();
    assert_eq!(
        methods,
        vec!["onMapObjectDragStart", "onMapObjectDrag", "onMapObjectDragEnd"]
    );
    let snapshot = harness.bridge.marker(&id).await.expect("live marker");
    assert_eq!(snapshot.position, Point::new(6.0, 7.0));
}

#[tokio::test]
async fn failed_icon_keeps_previous_icon_and_fields() {
    let harness = Harness::with_assets(
        MemoryAssets::default().with("icons/pin.png", png_bytes(16, 16)),
    )
    .await;
    let id = init_marker(
        &harness,
        json!({
            "point": {"latitude": 1.0, "longitude": 1.0},
            "icon": ["fromAsset", "icons/pin.png"]
        }),
    )
    .await;

    let err = harness
        .map_command(
            "marker#update",
            json!({"id": id, "icon": ["fromAsset", "icons/missing.png"], "visible": false}),
        )
        .await
        .expect_err("missing asset");
    assert_eq!(err.code, ErrorCode::AssetResolution);

    let snapshot = harness.bridge.marker(&id).await.expect("live marker");
    assert!(snapshot.visible);
    assert_eq!(
        snapshot.icon,
        ImageSpec::FromAsset {
            path: "icons/pin.png".into(),
            scale: None
        }
    );
}

#[tokio::test]
async fn markers_follow_their_map_on_detach() {
    let mut harness = Harness::new().await;
    let id = init_marker(&harness, json!({"point": {"latitude": 1.0, "longitude": 1.0}})).await;
    let callbacks = harness
        .surface
        .placemark_callbacks(&id)
        .await
        .expect("callbacks");

    assert!(harness.bridge.detach_map(harness.map_id).await);
    assert!(!harness.bridge.detach_map(harness.map_id).await);
    assert!(harness.bridge.marker(&id).await.is_none());

    callbacks.tap(Point::new(1.0, 1.0));
    assert!(harness.drain_events().await.is_empty());

    let err = harness
        .map_command("marker#init", json!({"point": {"latitude": 1.0, "longitude": 1.0}}))
        .await
        .expect_err("map is gone");
    assert_eq!(err.code, ErrorCode::UnknownId);
}

#[tokio::test]
async fn oversized_icon_scale_is_rejected() {
    let harness = Harness::new().await;
    let err = harness
        .map_command(
            "marker#init",
            json!({
                "point": {"latitude": 1.0, "longitude": 2.0},
                "icon": ["fromAsset", "icons/pin.png", 1e9]
            }),
        )
        .await
        .expect_err("icon too large");
    assert_eq!(err.code, ErrorCode::AssetResolution);
    assert!(harness.bridge.registry().is_empty().await);

    let id = init_marker(
        &harness,
        json!({
            "point": {"latitude": 1.0, "longitude": 2.0},
            "icon": ["fromAsset", "icons/pin.png"]
        }),
    )
    .await;
    let err = harness
        .map_command(
            "marker#update",
            json!({"id": id, "icon": ["fromAssetImage", "icons/pin.png", 1e7, 1e7]}),
        )
        .await
        .expect_err("bounds too large");
    assert_eq!(err.code, ErrorCode::AssetResolution);
    let placemark = harness.surface.placemark(&id).await.expect("placemark");
    assert_eq!(placemark.state().await.icon, Some((40, 20)));
}

#[tokio::test]
async fn commands_on_another_map_leave_the_marker_alone() {
    let harness = Harness::new().await;
    let id = init_marker(&harness, json!({"point": {"latitude": 1.0, "longitude": 1.0}})).await;
    let other = harness
        .bridge
        .attach_map(Arc::new(HeadlessMapSurface::new()))
        .await;
    let other_channel = map_channel(other);

    let reply = harness
        .command(
            &other_channel,
            "marker#update",
            json!({"id": id, "visible": false}),
        )
        .await
        .expect("tolerated");
    assert!(reply.is_null());
    let reply = harness
        .command(&other_channel, "marker#remove", json!({"id": id}))
        .await
        .expect("tolerated");
    assert!(reply.is_null());

    let snapshot = harness.bridge.marker(&id).await.expect("still registered");
    assert!(snapshot.visible);
    assert_eq!(snapshot.map_id, harness.map_id);
}

#[tokio::test]
async fn registry_stays_available_during_placemark_updates() {
    let harness = Harness::new().await;
    let surface = Arc::new(GatedSurface::default());
    let map_id = harness.bridge.attach_map(surface.clone()).await;
    let channel = map_channel(map_id);
    let reply = harness
        .command(
            &channel,
            "marker#init",
            json!({"point": {"latitude": 1.0, "longitude": 1.0}}),
        )
        .await
        .expect("marker#init");
    let id = Identifier::new(reply.as_str().expect("id string"));

    let bridge = Arc::clone(&harness.bridge);
    let update = tokio::spawn({
        let id = id.clone();
        async move {
            bridge
                .handle(CommandEnvelope::new(
                    &channel,
                    "marker#update",
                    json!({"id": id, "visible": false}),
                ))
                .await
        }
    });
    surface.entered.notified().await;

    let snapshot = tokio::time::timeout(Duration::from_secs(1), harness.bridge.marker(&id))
        .await
        .expect("registry is not held by the update")
        .expect("live marker");
    assert!(snapshot.visible);

    surface.release.notify_one();
    update.await.expect("join").expect("update");
    let snapshot = harness.bridge.marker(&id).await.expect("live marker");
    assert!(!snapshot.visible);
}
