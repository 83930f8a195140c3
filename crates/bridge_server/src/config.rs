use std::{collections::HashMap, fs, path::Path};

use anyhow::Context;
use bridge_core::BridgeConfig;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "bridge.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    pub bind_addr: String,
    pub asset_root: String,
    pub device_pixel_ratio: f64,
    pub event_buffer: usize,
    pub api_key: Option<String>,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        let core = BridgeConfig::default();
        Self {
            bind_addr: "127.0.0.1:8787".into(),
            asset_root: "./assets".into(),
            device_pixel_ratio: core.device_pixel_ratio,
            event_buffer: core.event_buffer,
            api_key: None,
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            event_buffer: self.event_buffer,
            device_pixel_ratio: self.device_pixel_ratio,
            ..BridgeConfig::default()
        }
    }
}

/// Defaults, then the flat string table in `config_file` (a missing default
/// file is fine), then the process environment.
pub fn load_settings(config_file: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match config_file {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file '{}'", path.display()))?;
            apply_file(&mut settings, &raw)
                .with_context(|| format!("invalid config file '{}'", path.display()))?;
        }
        None => {
            if let Ok(raw) = fs::read_to_string(DEFAULT_CONFIG_FILE) {
                apply_file(&mut settings, &raw)
                    .with_context(|| format!("invalid config file '{DEFAULT_CONFIG_FILE}'"))?;
            }
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

pub(crate) fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg = toml::from_str::<HashMap<String, String>>(raw)?;
    if let Some(v) = file_cfg.get("bind_addr") {
        settings.bind_addr = v.clone();
    }
    if let Some(v) = file_cfg.get("asset_root") {
        settings.asset_root = v.clone();
    }
    if let Some(v) = file_cfg.get("device_pixel_ratio") {
        set_ratio(settings, v);
    }
    if let Some(v) = file_cfg.get("event_buffer") {
        set_buffer(settings, v);
    }
    if let Some(v) = file_cfg.get("api_key") {
        settings.api_key = Some(v.clone());
    }
    if let Some(v) = file_cfg.get("log_filter") {
        settings.log_filter = v.clone();
    }
    Ok(())
}

pub(crate) fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("BRIDGE_BIND") {
        settings.bind_addr = v;
    }
    if let Some(v) = var("APP__BIND_ADDR") {
        settings.bind_addr = v;
    }

    if let Some(v) = var("BRIDGE_ASSET_ROOT") {
        settings.asset_root = v;
    }

    if let Some(v) = var("BRIDGE_DEVICE_PIXEL_RATIO") {
        set_ratio(settings, &v);
    }
    if let Some(v) = var("BRIDGE_EVENT_BUFFER") {
        set_buffer(settings, &v);
    }

    if let Some(v) = var("BRIDGE_API_KEY").filter(|key| !key.trim().is_empty()) {
        settings.api_key = Some(v);
    }

    if let Some(v) = var("RUST_LOG") {
        settings.log_filter = v;
    }
}

fn set_ratio(settings: &mut Settings, raw: &str) {
    if let Ok(parsed) = raw.trim().parse::<f64>() {
        if parsed.is_finite() && parsed > 0.0 {
            settings.device_pixel_ratio = parsed;
        }
    }
}

fn set_buffer(settings: &mut Settings, raw: &str) {
    if let Ok(parsed) = raw.trim().parse::<usize>() {
        if parsed > 0 {
            settings.event_buffer = parsed;
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
