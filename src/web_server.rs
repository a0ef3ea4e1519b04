use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Request, State,
    },
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post, put},
    serve, Json, Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::consultant::Consultant;
use crate::error::SessionError;
use crate::parameters::{FieldDescriptor, ParamField, ProjectForm};

// Model output is inserted into the page as HTML. Only same-origin scripts
// may run, so markup in an answer cannot execute anything.
const CONTENT_SECURITY_POLICY: &str =
    "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'; img-src 'self' data:; object-src 'none'; base-uri 'none'";

// Shared application state
#[derive(Clone)]
struct AppState {
    templates: Arc<AutoReloader>,
    consultant: Arc<Consultant>,
}

/// Where the web server finds its page templates and static assets.
#[derive(Debug, Clone)]
pub struct WebAssets {
    pub templates_dir: String,
    pub static_dir: String,
}

// Minijinja Environment setup
fn create_minijinja_env(templates_dir: String) -> AutoReloader {
    AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(&templates_dir));
        // Watch the templates directory for changes
        notifier.watch_path(&templates_dir, true);
        Ok(env)
    })
}

#[derive(Debug)]
enum ApiError {
    Session(SessionError),
    UnknownField(String),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        ApiError::Session(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::UnknownField(message) => (StatusCode::NOT_FOUND, json!({ "error": message })),
            ApiError::Session(err) => {
                let status = match &err {
                    SessionError::NotFound(_) => StatusCode::NOT_FOUND,
                    SessionError::Busy | SessionError::NoEditOpen => StatusCode::CONFLICT,
                    SessionError::EmptyMessage | SessionError::Validation(_) => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    SessionError::Prompt(_) | SessionError::TaskFailed(_) => {
                        error!("Request failed: {}", err);
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                let body = match &err {
                    SessionError::Validation(validation) => {
                        json!({ "error": err.to_string(), "errors": validation.errors })
                    }
                    _ => json!({ "error": err.to_string() }),
                };
                (status, body)
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn parse_field(name: &str) -> ApiResult<ParamField> {
    name.parse::<ParamField>().map_err(ApiError::UnknownField)
}

async fn index_handler(State(state): State<AppState>) -> Response {
    let fields: Vec<FieldDescriptor> = ParamField::ALL.iter().map(|f| f.descriptor()).collect();
    // Acquire env, get template, and render within the same block
    let rendered = state.templates.acquire_env().and_then(|env| {
        env.get_template("index.html").and_then(|tmpl| {
            tmpl.render(minijinja::context! {
                title => "Steel Construction AI Consultant",
                fields => fields,
            })
        })
    });
    match rendered {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!("Failed to get or render template: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(format!("Internal Server Error: {}", e)),
            )
                .into_response()
        }
    }
}

async fn fields_handler() -> Json<Vec<FieldDescriptor>> {
    Json(ParamField::ALL.iter().map(|f| f.descriptor()).collect())
}

async fn create_session_handler(
    State(state): State<AppState>,
    Json(form): Json<ProjectForm>,
) -> ApiResult<impl IntoResponse> {
    // Returns while the first reply is still pending; it arrives over the
    // session's event feed.
    let id = state.consultant.begin_consultation(&form).await?;
    Ok((StatusCode::CREATED, Json(state.consultant.view(id)?)))
}

async fn get_session_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.consultant.view(id)?))
}

async fn delete_session_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    if state.consultant.close_session(id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(SessionError::NotFound(id).into())
    }
}

#[derive(Deserialize)]
struct ChatInput {
    message: String,
}

async fn message_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<ChatInput>,
) -> ApiResult<impl IntoResponse> {
    state.consultant.submit_message(id, &input.message).await?;
    Ok(Json(state.consultant.view(id)?))
}

#[derive(Deserialize)]
struct ValueInput {
    value: String,
}

async fn update_parameter_handler(
    State(state): State<AppState>,
    Path((id, field)): Path<(Uuid, String)>,
    Json(input): Json<ValueInput>,
) -> ApiResult<impl IntoResponse> {
    let field = parse_field(&field)?;
    state.consultant.update_parameter(id, field, &input.value).await?;
    Ok(Json(state.consultant.view(id)?))
}

#[derive(Deserialize)]
struct OpenEditInput {
    field: String,
}

async fn open_edit_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<OpenEditInput>,
) -> ApiResult<impl IntoResponse> {
    let field = parse_field(&input.field)?;
    Ok(Json(state.consultant.open_edit(id, field)?))
}

async fn edit_value_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<ValueInput>,
) -> ApiResult<StatusCode> {
    state.consultant.set_edit_value(id, input.value)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn save_edit_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    state.consultant.save_edit(id).await?;
    Ok(Json(state.consultant.view(id)?))
}

async fn cancel_edit_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    state.consultant.cancel_edit(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    // Reject unknown sessions before upgrading
    state.consultant.view(id)?;
    info!(session_id = %id, "WebSocket connection upgrade requested");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, id)))
}

// Forward one session's events to a WebSocket client
async fn handle_socket(socket: WebSocket, state: AppState, id: Uuid) {
    info!(session_id = %id, "New WebSocket connection established");
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.consultant.subscribe();

    // Send the current state so the client can render without a separate fetch
    if let Ok(view) = state.consultant.view(id) {
        let snapshot = json!({ "type": "snapshot", "session": view });
        if sender.send(Message::Text(snapshot.to_string())).await.is_err() {
            warn!("Failed to send snapshot to new WebSocket client");
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) if event.session_id() == id => {
                        match serde_json::to_string(&event) {
                            Ok(json_msg) => {
                                if sender.send(Message::Text(json_msg)).await.is_err() {
                                    warn!("WebSocket client disconnected or send error. Closing connection.");
                                    break;
                                }
                            }
                            Err(e) => error!("Failed to serialize session event: {}", e),
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "WebSocket subscriber lagged behind session events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        // The feed is one-way; actions go through the JSON API
                        debug!("Ignoring text message from client: {}", text);
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!("Received unexpected binary message from client");
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client closed WebSocket");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {}", e);
                        break;
                    }
                }
            }
        }
    }
    info!(session_id = %id, "WebSocket connection closed");
}

/// Builds the application router. Split from [`start_web_server`] so tests
/// can drive it without binding a socket.
pub fn build_router(consultant: Arc<Consultant>, assets: &WebAssets) -> Router {
    let state = AppState {
        templates: Arc::new(create_minijinja_env(assets.templates_dir.clone())),
        consultant,
    };

    // Serve static files from the configured directory
    let static_files_service = ServeDir::new(&assets.static_dir).not_found_service(tower::service_fn(
        |_: Request| async { Ok::<_, Infallible>((StatusCode::NOT_FOUND, "Not Found").into_response()) },
    ));

    let session_routes = Router::new()
        .route("/", post(create_session_handler))
        .route("/:id", get(get_session_handler).delete(delete_session_handler))
        .route("/:id/messages", post(message_handler))
        .route("/:id/parameters/:field", put(update_parameter_handler))
        .route(
            "/:id/edit",
            post(open_edit_handler)
                .put(edit_value_handler)
                .delete(cancel_edit_handler),
        )
        .route("/:id/edit/save", post(save_edit_handler))
        .route("/:id/events", get(ws_handler));

    Router::new()
        .route("/", get(index_handler))
        .route("/api/fields", get(fields_handler))
        .nest("/api/sessions", session_routes)
        .nest_service("/static", static_files_service)
        .with_state(state)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY_POLICY),
        ))
        .layer(TraceLayer::new_for_http()) // Add request logging
}

pub async fn start_web_server(addr: SocketAddr, consultant: Arc<Consultant>, assets: WebAssets) -> Result<()> {
    let app = build_router(consultant, &assets);

    info!("Web server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
