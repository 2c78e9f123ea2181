use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use forge_engine::GenerationEngine;
use forge_store::Database;

use crate::auth::{self, StoreTokenVerifier, TokenVerifier};
use crate::client::{self, ClientId, ClientRegistry};
use crate::gateway;
use crate::orchestrator::Orchestrator;
use crate::questions::PendingQuestions;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
    pub question_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            max_send_queue: 256,
            question_timeout_secs: 300,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub registry: Arc<ClientRegistry>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub message_tx: mpsc::Sender<(ClientId, String)>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/chat/{client_id}", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps the
/// background tasks alive.
pub async fn start(
    config: ServerConfig,
    db: Database,
    engine: Arc<dyn GenerationEngine>,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ClientRegistry::new(config.max_send_queue));
    let questions = Arc::new(PendingQuestions::new());
    let verifier: Arc<dyn TokenVerifier> = Arc::new(StoreTokenVerifier::new(db.clone()));

    let orchestrator = Arc::new(
        Orchestrator::new(db.clone(), Arc::clone(&registry), questions, engine)
            .with_question_timeout(Duration::from_secs(config.question_timeout_secs)),
    );

    // Start dead-client cleanup task (every 60s)
    let _cleanup = client::start_cleanup_task(Arc::clone(&registry), Duration::from_secs(60));

    // Inbound message channel feeding the gateway
    let (msg_tx, msg_rx) = mpsc::channel::<(ClientId, String)>(1024);
    let gateway_handle = tokio::spawn(gateway::process_messages(
        msg_rx,
        Arc::clone(&orchestrator),
        Arc::clone(&registry),
    ));

    let app_state = AppState {
        db,
        registry: Arc::clone(&registry),
        verifier,
        message_tx: msg_tx,
    };

    let router = build_router(app_state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "Forge server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
        _gateway: gateway_handle,
        _cleanup,
    })
}

/// Handle returned by `start()` — keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _gateway: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// WebSocket upgrade handler. The optional token query parameter binds
/// the connection to a user; a bad token degrades to anonymous.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let user_id = auth::verify_optional(state.verifier.as_ref(), query.token.as_deref()).await;
    ws.on_upgrade(move |socket| handle_socket(socket, ClientId::from(client_id), user_id, state))
}

async fn handle_socket(
    socket: WebSocket,
    client_id: ClientId,
    user_id: Option<forge_core::UserId>,
    state: AppState,
) {
    let authenticated = user_id.is_some();
    let rx = state.registry.register(client_id.clone(), user_id);
    tracing::info!(client_id = %client_id, authenticated, "WebSocket client connected");

    client::handle_ws_connection(socket, client_id, rx, state.registry, state.message_tx).await;
}

/// Health check HTTP endpoint. Degrades to 503 when the database is
/// unreachable.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state
        .db
        .with_conn(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| forge_store::StoreError::Database(e.to_string()))
        })
        .is_ok();

    let status = if db_ok { "healthy" } else { "degraded" };
    let http_status = if db_ok {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    (
        http_status,
        axum::Json(serde_json::json!({
            "status": status,
            "connected_clients": state.registry.count(),
        })),
    )
}
