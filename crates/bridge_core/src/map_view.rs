use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use serde_json::Value;
use shared::{
    domain::{Animation, Color, MapId, Polygon},
    protocol::{CameraMoveArgs, PolygonArgs},
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::{
    camera::CameraStateMachine,
    capability::{CameraCallbacks, MapSurface},
    error::BridgeError,
    image_spec::ImageSpec,
    router::decode_args,
    Bridge,
};

const MIN_POLYGON_POINTS: usize = 3;

/// One attached map surface and the camera state that belongs to it.
pub struct MapView {
    id: MapId,
    surface: Arc<dyn MapSurface>,
    camera: Mutex<CameraStateMachine>,
    user_location_shown: Mutex<bool>,
}

impl MapView {
    fn new(id: MapId, surface: Arc<dyn MapSurface>) -> Self {
        Self {
            id,
            surface,
            camera: Mutex::new(CameraStateMachine::new()),
            user_location_shown: Mutex::new(false),
        }
    }

    pub fn id(&self) -> MapId {
        self.id
    }

    pub fn surface(&self) -> &Arc<dyn MapSurface> {
        &self.surface
    }

    pub fn camera(&self) -> &Mutex<CameraStateMachine> {
        &self.camera
    }
}

#[derive(Default)]
pub struct MapDirectory {
    views: RwLock<HashMap<MapId, Arc<MapView>>>,
    next_id: AtomicI64,
}

impl MapDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attach(&self, surface: Arc<dyn MapSurface>) -> Arc<MapView> {
        let id = MapId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let view = Arc::new(MapView::new(id, surface));
        self.views.write().await.insert(id, Arc::clone(&view));
        view
    }

    pub async fn get(&self, id: MapId) -> Option<Arc<MapView>> {
        self.views.read().await.get(&id).cloned()
    }

    pub async fn contains(&self, id: MapId) -> bool {
        self.views.read().await.contains_key(&id)
    }

    pub async fn remove(&self, id: MapId) -> Option<Arc<MapView>> {
        self.views.write().await.remove(&id)
    }

    pub async fn ids(&self) -> Vec<MapId> {
        let mut ids: Vec<MapId> = self.views.read().await.keys().copied().collect();
        ids.sort_by_key(|id| id.0);
        ids
    }
}

impl Bridge {
    async fn map_view(&self, map_id: MapId) -> Result<Arc<MapView>, BridgeError> {
        self.maps
            .get(map_id)
            .await
            .ok_or_else(|| BridgeError::unknown(map_id))
    }

    pub(crate) async fn move_camera(
        &self,
        map_id: MapId,
        arguments: Value,
    ) -> Result<(), BridgeError> {
        let args: CameraMoveArgs = decode_args(arguments)?;
        let target = args.position.target;
        if !target.is_valid() {
            return Err(BridgeError::invalid(format!(
                "camera target ({}, {}) is out of range",
                target.latitude, target.longitude
            )));
        }
        let view = self.map_view(map_id).await?;
        let animation = args
            .animation
            .map(|animation| Animation::from_millis(animation.smooth, animation.duration));

        let generation = view.camera.lock().await.begin_move();
        let callbacks = CameraCallbacks::new(map_id, generation, self.callbacks.clone());
        if let Err(err) = view
            .surface
            .move_camera(args.position, animation, callbacks)
            .await
        {
            view.camera.lock().await.abort(generation);
            return Err(BridgeError::capability("move camera")(err));
        }
        debug!(
            map_id = %map_id,
            generation,
            animated = animation.is_some(),
            "camera move started"
        );
        Ok(())
    }

    pub(crate) async fn add_polygon(
        &self,
        map_id: MapId,
        arguments: Value,
    ) -> Result<(), BridgeError> {
        let args: PolygonArgs = decode_args(arguments)?;
        if args.points.len() < MIN_POLYGON_POINTS {
            return Err(BridgeError::invalid(format!(
                "polygon needs at least {MIN_POLYGON_POINTS} points, got {}",
                args.points.len()
            )));
        }
        if let Some(point) = args.points.iter().find(|point| !point.is_valid()) {
            return Err(BridgeError::invalid(format!(
                "polygon point ({}, {}) is out of range",
                point.latitude, point.longitude
            )));
        }
        let view = self.map_view(map_id).await?;
        let polygon = Polygon {
            outer_ring: args.points,
            fill_color: Color::from_argb(args.fill_color),
            stroke_color: Color::from_argb(args.stroke_color),
            stroke_width: args.stroke_width,
            z_index: args.z_index,
        };
        let points = polygon.outer_ring.len();
        view.surface
            .add_polygon(polygon)
            .await
            .map_err(BridgeError::capability("add polygon"))?;
        debug!(map_id = %map_id, points, "polygon added");
        Ok(())
    }

    /// Enables the user-location layer once. Later calls return without
    /// touching the surface.
    pub(crate) async fn show_user_location(
        &self,
        map_id: MapId,
        arguments: Value,
    ) -> Result<(), BridgeError> {
        let view = self.map_view(map_id).await?;
        let mut shown = view.user_location_shown.lock().await;
        if *shown {
            return Ok(());
        }
        let spec = if arguments.is_null() {
            ImageSpec::DefaultMarker
        } else {
            ImageSpec::from_value(&arguments)?
        };
        let icon = self.images.resolve(&spec).await?;
        view.surface
            .show_user_location(icon)
            .await
            .map_err(BridgeError::capability("show user location"))?;
        *shown = true;
        info!(map_id = %map_id, "user location layer enabled");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/camera_tests.rs"]
mod tests;
