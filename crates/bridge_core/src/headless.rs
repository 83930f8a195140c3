//! In-memory collaborators for running the bridge without a rendering
//! surface: the host server, the replay tool and tests use them.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::domain::{Animation, CameraPosition, Identifier, Point, Polygon};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    capability::{CameraCallbacks, MapKitRuntime, MapSurface, MarkerCallbacks, Placemark},
    image_spec::ResolvedIcon,
};

/// Records the api key it was given.
#[derive(Debug, Default)]
pub struct HeadlessRuntime {
    api_key: Mutex<Option<String>>,
}

impl HeadlessRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn api_key(&self) -> Option<String> {
        self.api_key.lock().await.clone()
    }
}

#[async_trait]
impl MapKitRuntime for HeadlessRuntime {
    async fn set_api_key(&self, api_key: &str) -> Result<()> {
        *self.api_key.lock().await = Some(api_key.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacemarkState {
    pub point: Point,
    pub icon: Option<(u32, u32)>,
    pub visible: bool,
    pub draggable: bool,
    pub z_index: f32,
    pub opacity: f32,
    pub removed: bool,
}

/// A placemark drops out of its scene once removed.
pub struct HeadlessPlacemark {
    state: Mutex<PlacemarkState>,
    callbacks: MarkerCallbacks,
    scene: Weak<Mutex<Scene>>,
}

impl HeadlessPlacemark {
    fn new(point: Point, callbacks: MarkerCallbacks, scene: Weak<Mutex<Scene>>) -> Self {
        Self {
            state: Mutex::new(PlacemarkState {
                point,
                icon: None,
                visible: true,
                draggable: false,
                z_index: 0.0,
                opacity: 1.0,
                removed: false,
            }),
            callbacks,
            scene,
        }
    }

    pub async fn state(&self) -> PlacemarkState {
        self.state.lock().await.clone()
    }

    pub fn callbacks(&self) -> &MarkerCallbacks {
        &self.callbacks
    }

    async fn update(&self, apply: impl FnOnce(&mut PlacemarkState)) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.removed {
            return Err(anyhow!("placemark {} was removed", self.callbacks.id()));
        }
        apply(&mut state);
        Ok(())
    }
}

#[async_trait]
impl Placemark for HeadlessPlacemark {
    async fn set_icon(&self, icon: &ResolvedIcon) -> Result<()> {
        let size = icon.dimensions();
        self.update(|state| state.icon = size).await
    }

    async fn set_visible(&self, visible: bool) -> Result<()> {
        self.update(|state| state.visible = visible).await
    }

    async fn set_draggable(&self, draggable: bool) -> Result<()> {
        self.update(|state| state.draggable = draggable).await
    }

    async fn set_z_index(&self, z_index: f32) -> Result<()> {
        self.update(|state| state.z_index = z_index).await
    }

    async fn set_opacity(&self, opacity: f32) -> Result<()> {
        self.update(|state| state.opacity = opacity).await
    }

    async fn remove(&self) -> Result<()> {
        self.state.lock().await.removed = true;
        if let Some(scene) = self.scene.upgrade() {
            scene.lock().await.placemarks.remove(self.callbacks.id());
        }
        Ok(())
    }
}

#[derive(Default)]
struct Scene {
    camera: Option<CameraPosition>,
    polygons: Vec<Polygon>,
    placemarks: HashMap<Identifier, Arc<HeadlessPlacemark>>,
    user_location_icon: Option<ResolvedIcon>,
}

/// Map surface that keeps its scene in memory.
///
/// An immediate move reports a single finished position. An animated move
/// reports the starting position right away and the target, finished, once
/// the animation duration has elapsed.
#[derive(Default, Clone)]
pub struct HeadlessMapSurface {
    scene: Arc<Mutex<Scene>>,
}

impl HeadlessMapSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn camera(&self) -> Option<CameraPosition> {
        self.scene.lock().await.camera
    }

    pub async fn polygons(&self) -> Vec<Polygon> {
        self.scene.lock().await.polygons.clone()
    }

    pub async fn placemark(&self, id: &Identifier) -> Option<Arc<HeadlessPlacemark>> {
        self.scene.lock().await.placemarks.get(id).cloned()
    }

    pub async fn placemark_count(&self) -> usize {
        self.scene.lock().await.placemarks.len()
    }

    /// Listener of the placemark created for marker `id`, for driving taps
    /// and drags by hand.
    pub async fn placemark_callbacks(&self, id: &Identifier) -> Option<MarkerCallbacks> {
        self.placemark(id)
            .await
            .map(|placemark| placemark.callbacks().clone())
    }

    pub async fn user_location_icon(&self) -> Option<ResolvedIcon> {
        self.scene.lock().await.user_location_icon.clone()
    }
}

#[async_trait]
impl MapSurface for HeadlessMapSurface {
    async fn move_camera(
        &self,
        position: CameraPosition,
        animation: Option<Animation>,
        callbacks: CameraCallbacks,
    ) -> Result<()> {
        let Some(animation) = animation else {
            self.scene.lock().await.camera = Some(position);
            callbacks.position_changed(position, true);
            return Ok(());
        };

        let start = self.scene.lock().await.camera.unwrap_or(position);
        callbacks.position_changed(start, false);

        let duration = Duration::from_secs_f32(animation.duration_seconds.max(0.0));
        debug!(map_id = %callbacks.map_id(), ?duration, "headless camera animation scheduled");
        let scene = Arc::clone(&self.scene);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            scene.lock().await.camera = Some(position);
            callbacks.position_changed(position, true);
        });
        Ok(())
    }

    async fn add_polygon(&self, polygon: Polygon) -> Result<()> {
        self.scene.lock().await.polygons.push(polygon);
        Ok(())
    }

    async fn add_placemark(
        &self,
        point: Point,
        callbacks: MarkerCallbacks,
    ) -> Result<Arc<dyn Placemark>> {
        let id = callbacks.id().clone();
        let placemark = Arc::new(HeadlessPlacemark::new(
            point,
            callbacks,
            Arc::downgrade(&self.scene),
        ));
        self.scene
            .lock()
            .await
            .placemarks
            .insert(id, Arc::clone(&placemark));
        Ok(placemark as Arc<dyn Placemark>)
    }

    async fn show_user_location(&self, icon: ResolvedIcon) -> Result<()> {
        self.scene.lock().await.user_location_icon = Some(icon);
        Ok(())
    }
}
