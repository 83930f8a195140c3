//! Icon specifications and their resolution to bitmaps.
//!
//! Two wire forms are accepted. The list form mirrors what map clients send:
//!
//! ```json
//! ["defaultMarker"]
//! ["fromAsset", "icons/pin.png"]
//! ["fromAssetImage", "icons/pin.png", "0.5"]
//! ["fromAssetImage", "icons/pin.png", 32, 48]
//! ```
//!
//! The object form names the variant in `type`:
//!
//! ```json
//! {"type": "fromAssetImage", "path": "icons/pin.png", "width": 32, "height": 48}
//! ```

use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use image::{imageops::FilterType, RgbaImage};
use serde_json::Value;

use crate::error::BridgeError;

#[derive(Debug, Clone, PartialEq)]
pub enum ImageSpec {
    DefaultMarker,
    FromAsset {
        path: String,
        scale: Option<f64>,
    },
    FromAssetImage {
        path: String,
        size: Option<AssetImageSize>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AssetImageSize {
    Scale(f64),
    Fit { width: f64, height: f64 },
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self::DefaultMarker
    }
}

impl ImageSpec {
    /// # Errors
    ///
    /// Returns `BridgeError::AssetResolution` for any malformed variant.
    pub fn from_value(value: &Value) -> Result<Self, BridgeError> {
        match value {
            Value::Array(items) => Self::from_list(items),
            Value::Object(map) => {
                let kind = map
                    .get("type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed("image spec object has no `type`"))?;
                let path = map.get("path");
                match kind {
                    "defaultMarker" => Ok(Self::DefaultMarker),
                    "fromAsset" => Ok(Self::FromAsset {
                        path: asset_path(path)?,
                        scale: optional_number(map.get("scale"))?,
                    }),
                    "fromAssetImage" => {
                        let size = match (
                            optional_number(map.get("width"))?,
                            optional_number(map.get("height"))?,
                        ) {
                            (Some(width), Some(height)) => {
                                Some(AssetImageSize::Fit { width, height })
                            }
                            (None, None) => {
                                optional_number(map.get("scale"))?.map(AssetImageSize::Scale)
                            }
                            _ => {
                                return Err(malformed(
                                    "fromAssetImage needs both width and height",
                                ))
                            }
                        };
                        Ok(Self::FromAssetImage {
                            path: asset_path(path)?,
                            size,
                        })
                    }
                    other => Err(malformed(format!("unknown image spec type `{other}`"))),
                }
            }
            _ => Err(malformed("image spec must be a list or an object")),
        }
    }

    fn from_list(items: &[Value]) -> Result<Self, BridgeError> {
        let kind = items
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("image spec list must start with its type"))?;
        match (kind, items.len()) {
            ("defaultMarker", _) => Ok(Self::DefaultMarker),
            ("fromAsset", 2) => Ok(Self::FromAsset {
                path: asset_path(items.get(1))?,
                scale: None,
            }),
            ("fromAsset", 3) => Ok(Self::FromAsset {
                path: asset_path(items.get(1))?,
                scale: Some(number(&items[2])?),
            }),
            ("fromAssetImage", 2) => Ok(Self::FromAssetImage {
                path: asset_path(items.get(1))?,
                size: None,
            }),
            ("fromAssetImage", 3) => Ok(Self::FromAssetImage {
                path: asset_path(items.get(1))?,
                size: Some(AssetImageSize::Scale(number(&items[2])?)),
            }),
            ("fromAssetImage", 4) => Ok(Self::FromAssetImage {
                path: asset_path(items.get(1))?,
                size: Some(AssetImageSize::Fit {
                    width: number(&items[2])?,
                    height: number(&items[3])?,
                }),
            }),
            (other, len) => Err(malformed(format!(
                "unsupported image spec `{other}` with {len} elements"
            ))),
        }
    }
}

fn malformed(message: impl Into<String>) -> BridgeError {
    BridgeError::AssetResolution(message.into())
}

fn asset_path(value: Option<&Value>) -> Result<String, BridgeError> {
    value
        .and_then(Value::as_str)
        .filter(|path| !path.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| malformed("image spec is missing its asset path"))
}

/// Numbers may arrive as JSON numbers or as numeric strings.
fn number(value: &Value) -> Result<f64, BridgeError> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| malformed(format!("expected a number, got {value}")))
}

fn optional_number(value: Option<&Value>) -> Result<Option<f64>, BridgeError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => number(value).map(Some),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedIcon {
    /// The surface's built-in marker icon.
    Default,
    Bitmap(RgbaImage),
}

impl ResolvedIcon {
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            Self::Default => None,
            Self::Bitmap(bitmap) => Some(bitmap.dimensions()),
        }
    }
}

#[async_trait]
pub trait AssetResolver: Send + Sync {
    async fn load(&self, path: &str) -> Result<Vec<u8>>;
}

/// Reads assets from a directory. Absolute paths and `..` components are
/// rejected so lookups stay under the root.
pub struct FsAssetResolver {
    root: PathBuf,
}

impl FsAssetResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[cfg(test)]
    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    fn resolve_path(&self, asset: &str) -> Result<PathBuf> {
        let relative = Path::new(asset);
        let escapes_root = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
        if escapes_root {
            return Err(anyhow!("asset path '{asset}' must be relative to the asset root"));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl AssetResolver for FsAssetResolver {
    async fn load(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.resolve_path(path)?;
        tokio::fs::read(&full_path)
            .await
            .with_context(|| format!("failed to read asset '{}'", full_path.display()))
    }
}

/// Decodes assets and applies the size adjustments an `ImageSpec` asks for.
pub struct ImageResolver {
    assets: Arc<dyn AssetResolver>,
    device_pixel_ratio: f64,
}

impl ImageResolver {
    pub fn new(assets: Arc<dyn AssetResolver>, device_pixel_ratio: f64) -> Self {
        Self {
            assets,
            device_pixel_ratio,
        }
    }

    /// # Errors
    ///
    /// Returns `BridgeError::AssetResolution` when the asset cannot be read or
    /// decoded, or when the requested size is not a positive finite number.
    pub async fn resolve(&self, spec: &ImageSpec) -> Result<ResolvedIcon, BridgeError> {
        let bitmap = match spec {
            ImageSpec::DefaultMarker => return Ok(ResolvedIcon::Default),
            ImageSpec::FromAsset { path, scale } => {
                let bitmap = self.decode(path).await?;
                match scale {
                    Some(scale) => scale_bitmap(&bitmap, *scale)?,
                    None => bitmap,
                }
            }
            ImageSpec::FromAssetImage { path, size } => {
                let bitmap = self.decode(path).await?;
                match size {
                    None => bitmap,
                    Some(AssetImageSize::Scale(scale)) => scale_bitmap(&bitmap, *scale)?,
                    Some(AssetImageSize::Fit { width, height }) => fit_bitmap(
                        &bitmap,
                        width * self.device_pixel_ratio,
                        height * self.device_pixel_ratio,
                    )?,
                }
            }
        };
        Ok(ResolvedIcon::Bitmap(bitmap))
    }

    async fn decode(&self, path: &str) -> Result<RgbaImage, BridgeError> {
        let bytes = self
            .assets
            .load(path)
            .await
            .map_err(|err| BridgeError::AssetResolution(format!("{path}: {err:#}")))?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|err| BridgeError::AssetResolution(format!("{path}: {err}")))?;
        Ok(decoded.to_rgba8())
    }
}

/// Upper bound for either side of a resolved icon, in pixels.
pub const MAX_ICON_SIDE: u32 = 2048;

/// Uniform scale; both axes are truncated to whole pixels. Sizes above
/// `MAX_ICON_SIDE` are rejected.
pub fn scaled_dimensions(width: u32, height: u32, scale: f64) -> Option<(u32, u32)> {
    if !scale.is_finite() || scale <= 0.0 {
        return None;
    }
    truncate_dimensions(width, height, scale)
}

/// Largest size that fits inside `target_width` × `target_height` while
/// keeping the aspect ratio: the smaller of the two axis ratios wins.
pub fn fit_dimensions(
    width: u32,
    height: u32,
    target_width: f64,
    target_height: f64,
) -> Option<(u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }
    let valid = |value: f64| value.is_finite() && value > 0.0;
    if !valid(target_width) || !valid(target_height) {
        return None;
    }
    let width_ratio = target_width / f64::from(width);
    let height_ratio = target_height / f64::from(height);
    truncate_dimensions(width, height, width_ratio.min(height_ratio))
}

fn truncate_dimensions(width: u32, height: u32, ratio: f64) -> Option<(u32, u32)> {
    let scaled = |value: u32| {
        let side = (f64::from(value) * ratio).trunc();
        (side <= f64::from(MAX_ICON_SIDE)).then(|| (side as u32).max(1))
    };
    Some((scaled(width)?, scaled(height)?))
}

fn scale_bitmap(bitmap: &RgbaImage, scale: f64) -> Result<RgbaImage, BridgeError> {
    let (width, height) = bitmap.dimensions();
    let (new_width, new_height) = scaled_dimensions(width, height, scale).ok_or_else(|| {
        malformed(format!(
            "icon scale {scale} is invalid or exceeds {MAX_ICON_SIDE}px"
        ))
    })?;
    Ok(image::imageops::resize(
        bitmap,
        new_width,
        new_height,
        FilterType::Nearest,
    ))
}

fn fit_bitmap(bitmap: &RgbaImage, width: f64, height: f64) -> Result<RgbaImage, BridgeError> {
    let (current_width, current_height) = bitmap.dimensions();
    let (new_width, new_height) = fit_dimensions(current_width, current_height, width, height)
        .ok_or_else(|| {
            malformed(format!(
                "icon bounds {width}x{height} are invalid or exceed {MAX_ICON_SIDE}px"
            ))
        })?;
    Ok(image::imageops::resize(
        bitmap,
        new_width,
        new_height,
        FilterType::Nearest,
    ))
}

#[cfg(test)]
#[path = "tests/image_spec_tests.rs"]
mod tests;
