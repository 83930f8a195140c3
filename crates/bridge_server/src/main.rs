use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{ws::WebSocket, Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use bridge_core::{headless::HeadlessMapSurface, Bridge, BridgeServices};
use clap::Parser;
use serde::Serialize;
use shared::{
    domain::MapId,
    error::{ApiError, ErrorCode},
    protocol::{map_channel, CommandEnvelope, InboundFrame, OutboundFrame},
};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, Settings};

#[derive(Parser, Debug)]
#[command(about = "Serves the map bridge command channel over HTTP and WebSocket")]
struct Cli {
    /// Flat TOML settings file; `bridge.toml` is read when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides `bind_addr` from the file and environment.
    #[arg(long)]
    bind: Option<String>,
}

#[derive(Clone)]
struct AppState {
    bridge: Arc<Bridge>,
}

#[derive(Debug, Serialize)]
struct CommandResult {
    result: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MapCreated {
    map_id: i64,
    channel: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        settings.bind_addr = bind;
    }

    let filter =
        EnvFilter::try_new(&settings.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let state = build_state(&settings).await;
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address '{}'", settings.bind_addr))?;
    info!(%addr, asset_root = %settings.asset_root, "bridge listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn build_state(settings: &Settings) -> AppState {
    let bridge = Bridge::start(
        BridgeServices::headless(&settings.asset_root),
        settings.bridge_config(),
    );
    if let Some(api_key) = settings.api_key.as_deref() {
        match bridge.apply_api_key(api_key).await {
            Ok(outcome) => info!(?outcome, "startup api key"),
            Err(error) => warn!(%error, "failed to apply startup api key"),
        }
    }
    AppState { bridge }
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/commands", post(http_command))
        .route("/maps", post(http_attach_map).get(http_list_maps))
        .route("/maps/:map_id", delete(http_detach_map))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidArgument | ErrorCode::AssetResolution => StatusCode::BAD_REQUEST,
        ErrorCode::NotImplemented => StatusCode::NOT_FOUND,
        ErrorCode::UnknownId | ErrorCode::DuplicateId | ErrorCode::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn http_command(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<CommandEnvelope>,
) -> Result<Json<CommandResult>, (StatusCode, Json<ApiError>)> {
    state
        .bridge
        .handle(envelope)
        .await
        .map(|result| Json(CommandResult { result }))
        .map_err(|error| (status_for(error.code), Json(error)))
}

async fn http_attach_map(State(state): State<Arc<AppState>>) -> Json<MapCreated> {
    let map_id = state
        .bridge
        .attach_map(Arc::new(HeadlessMapSurface::new()))
        .await;
    Json(MapCreated {
        map_id: map_id.0,
        channel: map_channel(map_id),
    })
}

async fn http_list_maps(State(state): State<Arc<AppState>>) -> Json<Vec<i64>> {
    let ids = state.bridge.map_ids().await;
    Json(ids.into_iter().map(|map_id| map_id.0).collect())
}

async fn http_detach_map(
    State(state): State<Arc<AppState>>,
    Path(map_id): Path<i64>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    if state.bridge.detach_map(MapId(map_id)).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(ApiError::new(
                ErrorCode::UnknownId,
                format!("map {map_id} is not attached"),
            )),
        ))
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<OutboundFrame>();
    let mut events_rx = state.bridge.subscribe_events();

    let send_task = tokio::spawn(async move {
        while let Some(frame) = frames_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let event_frames = frames_tx.clone();
    let event_task = tokio::spawn(async move {
        loop {
            match events_rx.recv().await {
                Ok(event) => {
                    if event_frames.send(OutboundFrame::Event(event)).is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "websocket subscriber lagged; events skipped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let frame = match serde_json::from_str::<InboundFrame>(&text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "malformed websocket frame");
                let error = ApiError::new(ErrorCode::InvalidArgument, err.to_string());
                if frames_tx.send(OutboundFrame::Error { id: 0, error }).is_err() {
                    break;
                }
                continue;
            }
        };
        let reply = state.bridge.handle(frame.command).await;
        if frames_tx
            .send(OutboundFrame::from_reply(frame.id, reply))
            .is_err()
        {
            break;
        }
    }

    event_task.abort();
    send_task.abort();
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
