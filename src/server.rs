// src/server.rs

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::app::{AnalyzeError, AppState};
use crate::core::models::{AnalysisRequest, AnalysisResult};

// --- Error Mapping ---

impl IntoResponse for AnalyzeError {
    fn into_response(self) -> Response {
        let status = match &self {
            AnalyzeError::InvalidTarget(_) | AnalyzeError::MalformedRequest(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AnalyzeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

// --- Router ---

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/analyze", post(analyze))
        .route("/ws/analyze", get(analyze_ws));

    let prefix = state.settings.api_prefix.clone();
    let router = Router::new().route("/health", get(health));
    let router = if prefix == "/" { router.merge(api) } else { router.nest(&prefix, api) };

    let router = match cors_layer(&state.settings.cors_origins) {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin, error = %e, "Ignoring unusable CORS origin.");
                None
            }
        })
        .collect();
    Some(CorsLayer::new().allow_origin(allowed).allow_methods(Any).allow_headers(Any))
}

/// Binds the configured address and serves until the process is stopped.
pub async fn serve(state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(&state.settings.bind_addr).await?;
    info!(addr = %listener.local_addr()?, prefix = %state.settings.api_prefix, "Listening.");
    axum::serve(listener, router(state)).await
}

// --- Handlers ---

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "app_name": state.settings.app_name }))
}

async fn analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalysisRequest>, JsonRejection>,
) -> Result<Json<AnalysisResult>, AnalyzeError> {
    let Json(request) = payload.map_err(|rejection| {
        debug!(error = %rejection, "Rejected malformed analysis request.");
        AnalyzeError::MalformedRequest(rejection.body_text())
    })?;
    let result = state.analyze_target(&request.url).await?;
    Ok(Json(result))
}

async fn analyze_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| {
        let (sender, receiver) = socket.split();
        handle_socket(sender, receiver, state)
    })
}

// --- WebSocket ---

const ANALYSIS_IN_PROGRESS: &str = "Analysis already in progress";

/// Frames sent back to the client. Field names are the wire shape.
#[derive(Serialize)]
#[serde(untagged)]
enum WsReply {
    Error { error: String },
    Starting { status: &'static str, message: String },
    Complete { status: &'static str, data: Box<AnalysisResult> },
}

impl WsReply {
    fn error(message: impl Into<String>) -> Self {
        WsReply::Error { error: message.into() }
    }
}

/// Sends one reply. `false` means the connection is gone.
async fn send_reply<Tx>(sender: &mut Tx, reply: &WsReply) -> bool
where
    Tx: Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(reply) {
        Ok(text) => text,
        Err(e) => {
            error!(error = %e, "Failed to serialize WebSocket reply.");
            return true;
        }
    };
    sender.send(Message::Text(text)).await.is_ok()
}

/// One analysis at a time per connection. Frames that arrive while it runs
/// get a busy reply; a close cancels it.
async fn handle_socket<Tx, Rx>(mut sender: Tx, mut receiver: Rx, state: AppState)
where
    Tx: Sink<Message> + Unpin,
    Rx: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    info!("WebSocket client connected.");

    while let Some(incoming) = receiver.next().await {
        let text = match incoming {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let request = match serde_json::from_str::<AnalysisRequest>(&text) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "Rejected malformed WebSocket message.");
                if !send_reply(&mut sender, &WsReply::error("Invalid JSON")).await {
                    break;
                }
                continue;
            }
        };
        if request.url.trim().is_empty() {
            if !send_reply(&mut sender, &WsReply::error("URL is required")).await {
                break;
            }
            continue;
        }

        let starting = WsReply::Starting {
            status: "starting",
            message: format!("Analyzing {}...", request.url),
        };
        if !send_reply(&mut sender, &starting).await {
            break;
        }

        // Watch the socket while the analysis runs; a close drops the
        // analysis future and with it every probe task.
        let analysis = state.analyze_target(&request.url);
        tokio::pin!(analysis);
        let outcome = loop {
            tokio::select! {
                result = &mut analysis => break Some(result),
                frame = receiver.next() => match frame {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break None,
                    Some(Ok(Message::Text(_))) => {
                        debug!("Request received during analysis, replying busy.");
                        if !send_reply(&mut sender, &WsReply::error(ANALYSIS_IN_PROGRESS)).await {
                            break None;
                        }
                    }
                    Some(Ok(_)) => {}
                },
            }
        };

        let reply = match outcome {
            Some(Ok(result)) => WsReply::Complete { status: "complete", data: Box::new(result) },
            Some(Err(e)) => {
                warn!(error = %e, "WebSocket analysis failed.");
                WsReply::error(e.to_string())
            }
            None => {
                info!(url = %request.url, "Client went away mid-analysis, cancelled.");
                break;
            }
        };
        if !send_reply(&mut sender, &reply).await {
            break;
        }
    }

    info!("WebSocket disconnected.");
}
