use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{BoundingBox, CameraPosition, Identifier, MapId, Point},
    error::ApiError,
};

pub const ROOT_CHANNEL: &str = "mapkit";
const MAP_CHANNEL_PREFIX: &str = "mapkit/map_";
const SEARCH_MANAGER_CHANNEL_PREFIX: &str = "mapkit/search_manager_";

pub fn map_channel(map_id: MapId) -> String {
    format!("{MAP_CHANNEL_PREFIX}{}", map_id.0)
}

pub fn search_manager_channel(manager_id: &Identifier) -> String {
    format!("{SEARCH_MANAGER_CHANNEL_PREFIX}{manager_id}")
}

/// Logical channel a command is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelAddress {
    Root,
    Map(MapId),
    SearchManager(Identifier),
}

impl ChannelAddress {
    pub fn parse(channel: &str) -> Option<Self> {
        let channel = channel.trim();
        if channel == ROOT_CHANNEL {
            return Some(Self::Root);
        }
        if let Some(raw) = channel.strip_prefix(MAP_CHANNEL_PREFIX) {
            return raw.parse::<i64>().ok().map(|id| Self::Map(MapId(id)));
        }
        channel
            .strip_prefix(SEARCH_MANAGER_CHANNEL_PREFIX)
            .filter(|raw| !raw.is_empty())
            .map(|raw| Self::SearchManager(Identifier::new(raw)))
    }

    pub fn channel_name(&self) -> String {
        match self {
            Self::Root => ROOT_CHANNEL.to_string(),
            Self::Map(map_id) => map_channel(*map_id),
            Self::SearchManager(manager_id) => search_manager_channel(manager_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub channel: String,
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl CommandEnvelope {
    pub fn new(channel: impl Into<String>, method: impl Into<String>, arguments: Value) -> Self {
        Self {
            channel: channel.into(),
            method: method.into(),
            arguments,
        }
    }
}

pub type CommandReply = Result<Value, ApiError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerOptionsArgs {
    #[serde(default)]
    pub icon: Option<Value>,
    #[serde(default)]
    pub visible: Option<bool>,
    #[serde(default)]
    pub draggable: Option<bool>,
    #[serde(default)]
    pub z_index: Option<f32>,
    #[serde(default)]
    pub opacity: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerInitArgs {
    pub point: Point,
    #[serde(flatten)]
    pub options: MarkerOptionsArgs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerUpdateArgs {
    pub id: Identifier,
    #[serde(flatten)]
    pub options: MarkerOptionsArgs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerRemoveArgs {
    pub id: Identifier,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CameraAnimationArgs {
    #[serde(default)]
    pub smooth: bool,
    /// Milliseconds.
    #[serde(default)]
    pub duration: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraMoveArgs {
    pub position: CameraPosition,
    #[serde(default)]
    pub animation: Option<CameraAnimationArgs>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolygonArgs {
    pub points: Vec<Point>,
    #[serde(default)]
    pub fill_color: i64,
    #[serde(default)]
    pub stroke_color: i64,
    #[serde(default)]
    pub stroke_width: f32,
    #[serde(default)]
    pub z_index: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSearchManagerArgs {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Coordinates stay optional so that a missing field surfaces as an invalid
/// argument rather than a decode failure with a serde message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitWithPointArgs {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub zoom: Option<f32>,
    #[serde(default)]
    pub types: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestWithTextArgs {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, alias = "window")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default)]
    pub types: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toponym {
    pub point: Point,
    pub formatted_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toponym: Option<Toponym>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponsePayload {
    pub session_id: String,
    pub is_success: bool,
    pub items: Vec<SearchItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestItemType {
    Unknown,
    Toponym,
    Business,
    Transit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestAction {
    Search,
    Substitute,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestDistance {
    pub value: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestItem {
    #[serde(rename = "type")]
    pub kind: SuggestItemType,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub search_text: String,
    pub display_text: String,
    pub action: SuggestAction,
    #[serde(default)]
    pub is_personal: bool,
    #[serde(default)]
    pub is_word_item: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<SuggestDistance>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestResultPayload {
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub items: Vec<SuggestItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraPositionChangedPayload {
    pub position: CameraPosition,
    pub finished: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapObjectPayload {
    pub id: Identifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<Point>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "arguments")]
pub enum BridgeEvent {
    #[serde(rename = "onCameraPositionChanged")]
    CameraPositionChanged(CameraPositionChangedPayload),
    #[serde(rename = "onMapObjectDragStart")]
    MapObjectDragStart(MapObjectPayload),
    #[serde(rename = "onMapObjectDrag")]
    MapObjectDrag(MapObjectPayload),
    #[serde(rename = "onMapObjectDragEnd")]
    MapObjectDragEnd(MapObjectPayload),
    #[serde(rename = "onMapObjectTap")]
    MapObjectTap(MapObjectPayload),
    #[serde(rename = "success")]
    SearchSuccess(SearchResponsePayload),
    #[serde(rename = "failure")]
    SearchFailure(SearchResponsePayload),
    #[serde(rename = "onSuggestResponse")]
    SuggestResponse(SuggestResultPayload),
}

impl BridgeEvent {
    pub fn method(&self) -> &'static str {
        match self {
            Self::CameraPositionChanged(_) => "onCameraPositionChanged",
            Self::MapObjectDragStart(_) => "onMapObjectDragStart",
            Self::MapObjectDrag(_) => "onMapObjectDrag",
            Self::MapObjectDragEnd(_) => "onMapObjectDragEnd",
            Self::MapObjectTap(_) => "onMapObjectTap",
            Self::SearchSuccess(_) => "success",
            Self::SearchFailure(_) => "failure",
            Self::SuggestResponse(_) => "onSuggestResponse",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    pub channel: String,
    pub event: BridgeEvent,
}

/// Frame sent by a transport client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundFrame {
    pub id: u64,
    #[serde(flatten)]
    pub command: CommandEnvelope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundFrame {
    Reply { id: u64, result: Value },
    Error { id: u64, error: ApiError },
    Event(OutboundEvent),
}

impl OutboundFrame {
    pub fn from_reply(id: u64, reply: CommandReply) -> Self {
        match reply {
            Ok(result) => Self::Reply { id, result },
            Err(error) => Self::Error { id, error },
        }
    }
}
