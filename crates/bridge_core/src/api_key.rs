use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{capability::MapKitRuntime, error::BridgeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyOutcome {
    Applied,
    AlreadySet,
}

/// Process-wide "api key already set" flag, owned by the bridge instead of
/// living in a static.
#[derive(Debug, Default)]
pub struct ApiKeyGuard {
    applied: Mutex<Option<String>>,
}

impl ApiKeyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_set(&self) -> bool {
        self.applied.lock().await.is_some()
    }

    /// Applies `api_key` through `runtime` unless a key was already applied.
    /// The guard stays unset when the runtime rejects the key.
    pub async fn apply(
        &self,
        runtime: &dyn MapKitRuntime,
        api_key: &str,
    ) -> Result<ApiKeyOutcome, BridgeError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(BridgeError::invalid("api key must not be empty"));
        }
        let mut applied = self.applied.lock().await;
        if applied.is_some() {
            debug!("api key already applied; ignoring");
            return Ok(ApiKeyOutcome::AlreadySet);
        }
        runtime
            .set_api_key(api_key)
            .await
            .map_err(BridgeError::capability("set api key"))?;
        *applied = Some(api_key.to_string());
        info!("api key applied");
        Ok(ApiKeyOutcome::Applied)
    }

    pub async fn apply_value(
        &self,
        runtime: &dyn MapKitRuntime,
        arguments: &Value,
    ) -> Result<ApiKeyOutcome, BridgeError> {
        match arguments {
            Value::String(api_key) => self.apply(runtime, api_key).await,
            other => Err(BridgeError::invalid(format!(
                "setApiKey expects a string, got {other}"
            ))),
        }
    }
}
