use std::sync::Arc;

use serde_json::Value;
use shared::{
    domain::{Identifier, MapId, Point},
    protocol::{MarkerInitArgs, MarkerOptionsArgs, MarkerRemoveArgs, MarkerUpdateArgs},
};
use tracing::{debug, info, warn};

use crate::{
    capability::{MarkerCallbacks, Placemark},
    error::BridgeError,
    image_spec::{ImageResolver, ImageSpec, ResolvedIcon},
    registry::{Controller, EntityRecord},
    router::decode_args,
    Bridge,
};

/// State of one placemark on a map view. Fields only change through
/// `MarkerUpdate::apply` and drag events.
pub struct MarkerController {
    id: Identifier,
    map_id: MapId,
    position: Point,
    icon: ImageSpec,
    visible: bool,
    draggable: bool,
    z_index: f32,
    opacity: f32,
    placemark: Arc<dyn Placemark>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSnapshot {
    pub id: Identifier,
    pub map_id: MapId,
    pub position: Point,
    pub icon: ImageSpec,
    pub visible: bool,
    pub draggable: bool,
    pub z_index: f32,
    pub opacity: f32,
}

impl MarkerController {
    pub fn new(
        id: Identifier,
        map_id: MapId,
        position: Point,
        placemark: Arc<dyn Placemark>,
    ) -> Self {
        Self {
            id,
            map_id,
            position,
            icon: ImageSpec::DefaultMarker,
            visible: true,
            draggable: false,
            z_index: 0.0,
            opacity: 1.0,
            placemark,
        }
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    pub fn map_id(&self) -> MapId {
        self.map_id
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn placemark(&self) -> Arc<dyn Placemark> {
        Arc::clone(&self.placemark)
    }

    pub fn snapshot(&self) -> MarkerSnapshot {
        MarkerSnapshot {
            id: self.id.clone(),
            map_id: self.map_id,
            position: self.position,
            icon: self.icon.clone(),
            visible: self.visible,
            draggable: self.draggable,
            z_index: self.z_index,
            opacity: self.opacity,
        }
    }

    pub(crate) fn moved_to(&mut self, point: Point) {
        self.position = point;
    }
}

/// A partial marker update whose icon has already been resolved. Building one
/// performs every fallible step that does not touch the placemark.
#[derive(Debug, Default)]
pub struct MarkerUpdate {
    icon: Option<(ImageSpec, ResolvedIcon)>,
    visible: Option<bool>,
    draggable: Option<bool>,
    z_index: Option<f32>,
    opacity: Option<f32>,
}

impl MarkerUpdate {
    pub async fn resolve(
        options: &MarkerOptionsArgs,
        images: &ImageResolver,
    ) -> Result<Self, BridgeError> {
        if let Some(z_index) = options.z_index.filter(|value| !value.is_finite()) {
            return Err(BridgeError::invalid(format!("zIndex {z_index} is not finite")));
        }
        if let Some(opacity) = options.opacity.filter(|value| !value.is_finite()) {
            return Err(BridgeError::invalid(format!("opacity {opacity} is not finite")));
        }

        let icon = match options.icon.as_ref().filter(|value| !value.is_null()) {
            Some(raw) => {
                let spec = ImageSpec::from_value(raw)?;
                let resolved = images.resolve(&spec).await?;
                Some((spec, resolved))
            }
            None => None,
        };

        Ok(Self {
            icon,
            visible: options.visible,
            draggable: options.draggable,
            z_index: options.z_index,
            opacity: options.opacity,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.icon.is_none()
            && self.visible.is_none()
            && self.draggable.is_none()
            && self.z_index.is_none()
            && self.opacity.is_none()
    }

    /// Pushes present fields to the placemark and records them on the
    /// controller. A field is recorded only once the placemark accepted it.
    pub async fn apply(self, marker: &mut MarkerController) -> Result<(), BridgeError> {
        let placemark = marker.placemark();
        let (accepted, result) = self.push(placemark.as_ref()).await;
        accepted.record(marker);
        result
    }

    /// Sends present fields to the placemark in order and stops at the first
    /// refusal. Returns the accepted part alongside the outcome.
    async fn push(self, placemark: &dyn Placemark) -> (Self, Result<(), BridgeError>) {
        let mut accepted = Self::default();
        let result = self.push_into(placemark, &mut accepted).await;
        (accepted, result)
    }

    async fn push_into(
        self,
        placemark: &dyn Placemark,
        accepted: &mut Self,
    ) -> Result<(), BridgeError> {
        if let Some((spec, resolved)) = self.icon {
            placemark
                .set_icon(&resolved)
                .await
                .map_err(BridgeError::capability("placemark icon"))?;
            accepted.icon = Some((spec, resolved));
        }
        if let Some(visible) = self.visible {
            placemark
                .set_visible(visible)
                .await
                .map_err(BridgeError::capability("placemark visibility"))?;
            accepted.visible = Some(visible);
        }
        if let Some(draggable) = self.draggable {
            placemark
                .set_draggable(draggable)
                .await
                .map_err(BridgeError::capability("placemark draggable"))?;
            accepted.draggable = Some(draggable);
        }
        if let Some(z_index) = self.z_index {
            placemark
                .set_z_index(z_index)
                .await
                .map_err(BridgeError::capability("placemark z-index"))?;
            accepted.z_index = Some(z_index);
        }
        if let Some(opacity) = self.opacity {
            placemark
                .set_opacity(opacity)
                .await
                .map_err(BridgeError::capability("placemark opacity"))?;
            accepted.opacity = Some(opacity);
        }
        Ok(())
    }

    fn record(self, marker: &mut MarkerController) {
        if let Some((spec, _)) = self.icon {
            marker.icon = spec;
        }
        if let Some(visible) = self.visible {
            marker.visible = visible;
        }
        if let Some(draggable) = self.draggable {
            marker.draggable = draggable;
        }
        if let Some(z_index) = self.z_index {
            marker.z_index = z_index;
        }
        if let Some(opacity) = self.opacity {
            marker.opacity = opacity;
        }
    }
}

impl Bridge {
    pub(crate) async fn init_marker(
        &self,
        map_id: MapId,
        arguments: Value,
    ) -> Result<Identifier, BridgeError> {
        let args: MarkerInitArgs = decode_args(arguments)?;
        if !args.point.is_valid() {
            return Err(BridgeError::invalid(format!(
                "point ({}, {}) is out of range",
                args.point.latitude, args.point.longitude
            )));
        }
        let view = self
            .maps
            .get(map_id)
            .await
            .ok_or_else(|| BridgeError::unknown(map_id))?;
        let update = MarkerUpdate::resolve(&args.options, &self.images).await?;

        let id = self.ids.next();
        let callbacks = MarkerCallbacks::new(id.clone(), self.callbacks.clone());
        let placemark = view
            .surface()
            .add_placemark(args.point, callbacks)
            .await
            .map_err(BridgeError::capability("add placemark"))?;

        let mut marker = MarkerController::new(id.clone(), map_id, args.point, placemark);
        if let Err(err) = update.apply(&mut marker).await {
            discard_placemark(&marker).await;
            return Err(err);
        }

        let mut table = self.registry.lock().await;
        if !self.maps.contains(map_id).await {
            drop(table);
            discard_placemark(&marker).await;
            return Err(BridgeError::unknown(map_id));
        }
        if let Err(err) = table.insert(EntityRecord::new(id.clone(), Controller::Marker(marker))) {
            warn!(id = %id, error = %err, "marker id collision");
            return Err(err.into());
        }
        info!(id = %id, map_id = %map_id, "marker created");
        Ok(id)
    }

    /// The registry lock is released while the placemark is updated. Fields
    /// are recorded afterwards if the marker is still registered.
    pub(crate) async fn update_marker(
        &self,
        map_id: MapId,
        arguments: Value,
    ) -> Result<(), BridgeError> {
        let args: MarkerUpdateArgs = decode_args(arguments)?;
        let placemark = self.marker_on_map(map_id, &args.id).await?;
        let update = MarkerUpdate::resolve(&args.options, &self.images).await?;
        if update.is_empty() {
            return Ok(());
        }

        let (accepted, result) = update.push(placemark.as_ref()).await;
        let mut table = self.registry.lock().await;
        match table
            .lookup_mut(&args.id)
            .and_then(EntityRecord::as_marker_mut)
        {
            Some(marker) => accepted.record(marker),
            None => debug!(id = %args.id, "marker removed during update"),
        }
        drop(table);
        result?;
        debug!(id = %args.id, "marker updated");
        Ok(())
    }

    pub(crate) async fn remove_marker(
        &self,
        map_id: MapId,
        arguments: Value,
    ) -> Result<(), BridgeError> {
        let args: MarkerRemoveArgs = decode_args(arguments)?;
        let removed = {
            let mut table = self.registry.lock().await;
            let on_map = table
                .lookup(&args.id)
                .and_then(EntityRecord::as_marker)
                .is_some_and(|marker| marker.map_id() == map_id);
            if on_map {
                table.remove(&args.id)
            } else {
                None
            }
        };
        let Some(record) = removed else {
            return Err(BridgeError::unknown(&args.id));
        };
        if let Some(marker) = record.as_marker() {
            discard_placemark(marker).await;
        }
        info!(id = %args.id, "marker removed");
        Ok(())
    }

    /// Placemark of marker `id`, provided it lives on `map_id`.
    async fn marker_on_map(
        &self,
        map_id: MapId,
        id: &Identifier,
    ) -> Result<Arc<dyn Placemark>, BridgeError> {
        let table = self.registry.lock().await;
        let placemark = table
            .lookup(id)
            .and_then(EntityRecord::as_marker)
            .filter(|marker| marker.map_id() == map_id)
            .map(MarkerController::placemark);
        placemark.ok_or_else(|| BridgeError::unknown(id))
    }
}

pub(crate) async fn discard_placemark(marker: &MarkerController) {
    if let Err(err) = marker.placemark.remove().await {
        warn!(id = %marker.id, error = %err, "failed to remove placemark from surface");
    }
}

#[cfg(test)]
#[path = "tests/marker_tests.rs"]
mod tests;
