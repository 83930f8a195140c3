use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    domain::{Identifier, MapId},
    protocol::{ChannelAddress, CommandEnvelope, CommandReply},
};
use tracing::{debug, warn};

use crate::{error::BridgeError, Bridge};

pub const ROUTER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::router");

pub(crate) fn decode_args<T: DeserializeOwned>(arguments: Value) -> Result<T, BridgeError> {
    serde_json::from_value(arguments).map_err(|err| BridgeError::invalid(err.to_string()))
}

/// Like `decode_args`, but a missing (`null`) argument yields `T::default()`.
pub(crate) fn decode_args_or_default<T>(arguments: Value) -> Result<T, BridgeError>
where
    T: DeserializeOwned + Default,
{
    if arguments.is_null() {
        return Ok(T::default());
    }
    decode_args(arguments)
}

/// Mutations addressed to an entity that is already gone succeed as no-ops;
/// callers routinely race their own disposals.
fn tolerate_unknown(method: &str, result: Result<(), BridgeError>) -> Result<(), BridgeError> {
    match result {
        Err(BridgeError::UnknownId(id)) => {
            debug!(target: ROUTER_TARGET, method, id = %id, "ignoring command for unknown id");
            Ok(())
        }
        other => other,
    }
}

fn not_implemented(channel: &ChannelAddress, method: &str) -> BridgeError {
    BridgeError::NotImplemented {
        channel: channel.channel_name(),
        method: method.to_string(),
    }
}

fn null(result: Result<(), BridgeError>) -> Result<Value, BridgeError> {
    result.map(|()| Value::Null)
}

impl Bridge {
    /// Runs one command and produces its single reply.
    pub async fn handle(&self, command: CommandEnvelope) -> CommandReply {
        let CommandEnvelope {
            channel,
            method,
            arguments,
        } = command;
        debug!(target: ROUTER_TARGET, channel = %channel, method = %method, "routing command");

        let result = match ChannelAddress::parse(&channel) {
            Some(ChannelAddress::Root) => self.route_root(&method, arguments).await,
            Some(ChannelAddress::Map(map_id)) => self.route_map(map_id, &method, arguments).await,
            Some(ChannelAddress::SearchManager(manager_id)) => {
                self.route_search_manager(&manager_id, &method, arguments)
                    .await
            }
            None => Err(BridgeError::NotImplemented {
                channel: channel.clone(),
                method: method.clone(),
            }),
        };

        result.map_err(|err| {
            warn!(
                target: ROUTER_TARGET,
                channel = %channel,
                method = %method,
                code = ?err.code(),
                error = %err,
                "command failed"
            );
            err.into()
        })
    }

    async fn route_root(&self, method: &str, arguments: Value) -> Result<Value, BridgeError> {
        match method {
            "setApiKey" => {
                self.api_key
                    .apply_value(self.runtime.as_ref(), &arguments)
                    .await?;
                Ok(Value::Null)
            }
            "createSearchManager" => self
                .create_search_manager(arguments)
                .await
                .map(|id| Value::String(id.to_string())),
            "disposeSearchManager" => null(tolerate_unknown(
                method,
                self.dispose_search_manager(arguments).await,
            )),
            _ => Err(not_implemented(&ChannelAddress::Root, method)),
        }
    }

    async fn route_map(
        &self,
        map_id: MapId,
        method: &str,
        arguments: Value,
    ) -> Result<Value, BridgeError> {
        if !self.maps.contains(map_id).await {
            return Err(BridgeError::unknown(map_id));
        }
        match method {
            "move" => null(self.move_camera(map_id, arguments).await),
            "polygon#add" | "addPolygon" => null(self.add_polygon(map_id, arguments).await),
            "showUserLocation" => null(self.show_user_location(map_id, arguments).await),
            "marker#init" => self
                .init_marker(map_id, arguments)
                .await
                .map(|id| Value::String(id.to_string())),
            "marker#update" => null(tolerate_unknown(
                method,
                self.update_marker(map_id, arguments).await,
            )),
            "marker#remove" => null(tolerate_unknown(
                method,
                self.remove_marker(map_id, arguments).await,
            )),
            _ => Err(not_implemented(&ChannelAddress::Map(map_id), method)),
        }
    }

    async fn route_search_manager(
        &self,
        manager_id: &Identifier,
        method: &str,
        arguments: Value,
    ) -> Result<Value, BridgeError> {
        match method {
            "submitWithPoint" => self
                .submit_with_point(manager_id, arguments)
                .await
                .map(Value::String),
            "suggestWithText" => null(self.suggest_with_text(manager_id, arguments).await),
            "cancel" => null(tolerate_unknown(
                method,
                self.cancel_search(manager_id, arguments).await,
            )),
            "cancelSuggest" => null(tolerate_unknown(
                method,
                self.cancel_suggest(manager_id).await,
            )),
            _ => Err(not_implemented(
                &ChannelAddress::SearchManager(manager_id.clone()),
                method,
            )),
        }
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
